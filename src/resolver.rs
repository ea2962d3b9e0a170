use serde_json::Value;

pub const DEFAULT_REM_BASE_SIZE: f64 = 16.0;

/// Settings that steer how leaf values of a nested token tree are rendered.
///
/// A value is an immutable snapshot for one conversion; the flat variable path
/// ignores it except for interface symmetry.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionConfig {
    pub convert_px_to_rem: bool,
    pub rem_base_size: f64,
    pub exclude_filters: Vec<String>,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            convert_px_to_rem: true,
            rem_base_size: DEFAULT_REM_BASE_SIZE,
            exclude_filters: Vec::new(),
        }
    }
}

impl ResolutionConfig {
    pub fn is_excluded(&self, variable_name: &str) -> bool {
        self.exclude_filters
            .iter()
            .any(|filter| variable_name.contains(filter.as_str()))
    }
}

/// Splits a comma-separated filter list, trimming each segment and dropping
/// empty ones.
pub fn parse_exclude_filters(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolves one leaf token into its CSS variable name and final value.
pub fn resolve_value(
    variable_name: &str,
    raw: &Value,
    declared_type: Option<&str>,
    config: &ResolutionConfig,
) -> (String, String) {
    let mut value = stringify_value(raw);

    if declared_type == Some("number") && !config.is_excluded(variable_name) {
        if let Some(number) = numeric_value(raw) {
            value = if config.convert_px_to_rem {
                format!("{}rem", format_number(number / config.rem_base_size))
            } else {
                format!("{}px", value_as_number_text(raw, number))
            };
        }
    }

    if let Some(reference) = reference_key(&value) {
        value = format!("var(--{})", reference);
    }

    (variable_name.to_string(), value)
}

/// Renders a JSON scalar the way it should appear in CSS.
pub(crate) fn stringify_value(raw: &Value) -> String {
    match raw {
        Value::String(text) => text.clone(),
        Value::Number(number) => match (number.as_i64(), number.as_u64(), number.as_f64()) {
            (Some(int), _, _) => int.to_string(),
            (None, Some(uint), _) => uint.to_string(),
            (None, None, Some(float)) => format_number(float),
            _ => number.to_string(),
        },
        Value::Bool(flag) => flag.to_string(),
        Value::Null => String::new(),
        composite => composite.to_string(),
    }
}

/// Natural decimal form: `1.5`, `1`, `0.875`. Never `1.0`, never rounded.
pub(crate) fn format_number(number: f64) -> String {
    if number == 0.0 {
        return "0".to_string();
    }
    number.to_string()
}

fn numeric_value(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => parse_numeric_text(text),
        _ => None,
    }
}

fn parse_numeric_text(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty()
        || !trimmed
            .chars()
            .all(|ch| ch.is_ascii_digit() || matches!(ch, '.' | '-' | '+' | 'e' | 'E'))
        || !trimmed.chars().any(|ch| ch.is_ascii_digit())
    {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|number| number.is_finite())
}

// Numeric strings keep their own spelling in px output ("16" stays "16", " 8 " becomes "8").
fn value_as_number_text(raw: &Value, number: f64) -> String {
    match raw {
        Value::String(_) => format_number(number),
        other => stringify_value(other),
    }
}

/// Returns the hyphenated key of a `{group.token}` reference.
///
/// The value must open with `{` and its first `}` must be the final character.
fn reference_key(value: &str) -> Option<String> {
    if !value.starts_with('{') || value.find('}') != Some(value.len() - 1) {
        return None;
    }

    let replaced = value
        .to_lowercase()
        .replace(['{', '}'], "--")
        .replace(['.', ' '], "-");
    Some(collapse_hyphens(&replaced).trim_matches('-').to_string())
}

fn collapse_hyphens(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut previous_hyphen = false;
    for ch in input.chars() {
        if ch == '-' {
            if previous_hyphen {
                continue;
            }
            previous_hyphen = true;
        } else {
            previous_hyphen = false;
        }
        out.push(ch);
    }
    out
}
