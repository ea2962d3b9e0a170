//! Extraction of CSS variables from design-token documents.
//!
//! Two document shapes are understood:
//!
//! - a nested token tree, where leaves carry `$value` (and optionally `$type`)
//!   and every other object is a group whose key becomes part of the name;
//! - a flat `variables` list as exported by design tools, where each entry
//!   already holds a resolved value per mode.
//!
//! Both produce the same ordered [`CssVariables`] mapping. Malformed nodes are
//! skipped and never abort the conversion.

use crate::emitter::emit_css;
use crate::resolver::{ResolutionConfig, resolve_value, stringify_value};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Variable name (without the leading `--`) to CSS value, in emission order.
pub type CssVariables = IndexMap<String, String>;

const FLAT_MODE_ID: &str = "1:0";

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("invalid token JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VariableType {
    Float,
    Color,
    #[default]
    #[serde(other)]
    Other,
}

/// One entry of a flat `variables` export.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatVariable {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: VariableType,
    #[serde(default)]
    pub resolved_values_by_mode: Map<String, Value>,
}

impl FlatVariable {
    fn resolved_value(&self) -> Option<&Value> {
        self.resolved_values_by_mode
            .get(FLAT_MODE_ID)?
            .get("resolvedValue")
            .filter(|value| !value.is_null())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Rgba {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    #[serde(default = "opaque")]
    pub a: f64,
}

impl Rgba {
    pub fn to_css(&self) -> String {
        format!(
            "rgba({}, {}, {}, {:.2})",
            color_channel(self.r),
            color_channel(self.g),
            color_channel(self.b),
            (self.a * 100.0).round() / 100.0
        )
    }
}

fn opaque() -> f64 {
    1.0
}

fn color_channel(channel: f64) -> i64 {
    (channel * 255.0).round() as i64
}

/// Converts raw token JSON into a `:root` block.
///
/// Invalid JSON and documents without any usable token both yield an empty
/// string. Use [`try_convert`] to tell them apart.
pub fn convert(json_text: &str, config: &ResolutionConfig) -> String {
    match try_convert(json_text, config) {
        Ok(variables) => emit_css(&variables),
        Err(err) => {
            debug!(error = %err, "token document rejected");
            String::new()
        }
    }
}

pub fn try_convert(
    json_text: &str,
    config: &ResolutionConfig,
) -> Result<CssVariables, ConversionError> {
    let document: Value = serde_json::from_str(json_text)?;
    Ok(convert_value(&document, config))
}

/// Picks the extraction strategy from the top-level shape of the document.
pub fn convert_value(document: &Value, config: &ResolutionConfig) -> CssVariables {
    match document.get("variables") {
        Some(Value::Array(variables)) => extract_flat_variables(variables, config),
        _ => walk_tokens(document, "", config),
    }
}

/// Walks a nested token tree depth-first, in document order.
///
/// Each call returns a fresh mapping for its subtree; the caller merges it so
/// that later names overwrite earlier ones in place.
pub fn walk_tokens(node: &Value, prefix: &str, config: &ResolutionConfig) -> CssVariables {
    let mut variables = CssVariables::new();

    for (key, child) in group_entries(node) {
        let path = format!("{}-{}", prefix, key.replace(' ', "-"));

        if let Some(raw) = leaf_value(child) {
            if raw.is_object() || raw.is_array() {
                debug!(token = %path, "skipping composite token value");
                continue;
            }
            let name = path.trim_matches('-').to_lowercase();
            let declared_type = child.get("$type").and_then(Value::as_str);
            let (name, value) = resolve_value(&name, raw, declared_type, config);
            variables.insert(name, value);
        } else if child.is_object() || child.is_array() {
            variables.extend(walk_tokens(child, &path, config));
        }
    }

    variables
}

/// Converts pre-resolved variables. Unit conversion and exclusion filters
/// do not apply on this path.
pub fn extract_flat_variables(variables: &[Value], _config: &ResolutionConfig) -> CssVariables {
    let mut extracted = CssVariables::new();

    for entry in variables {
        let variable = match FlatVariable::deserialize(entry) {
            Ok(variable) => variable,
            Err(err) => {
                debug!(error = %err, "skipping malformed variable entry");
                continue;
            }
        };
        let Some(value) = variable.resolved_value() else {
            debug!(
                variable = %variable.name,
                mode = FLAT_MODE_ID,
                "variable has no resolved value"
            );
            continue;
        };

        let name = variable.name.replace(['/', ' '], "-").to_lowercase();
        extracted.insert(name, flat_value(variable.kind, value));
    }

    extracted
}

fn flat_value(kind: VariableType, value: &Value) -> String {
    match kind {
        VariableType::Float if value.is_number() => format!("{}px", stringify_value(value)),
        VariableType::Color => match Rgba::deserialize(value) {
            Ok(rgba) => rgba.to_css(),
            Err(_) => stringify_value(value),
        },
        _ => stringify_value(value),
    }
}

fn group_entries(node: &Value) -> Vec<(String, &Value)> {
    match node {
        Value::Object(map) => map.iter().map(|(key, child)| (key.clone(), child)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(idx, child)| (idx.to_string(), child))
            .collect(),
        _ => Vec::new(),
    }
}

fn leaf_value(node: &Value) -> Option<&Value> {
    node.as_object()?.get("$value").filter(|value| !value.is_null())
}
