use crate::tokens::CssVariables;

pub const STYLE_TAG_ID: &str = "dtb-tokens";

/// Renders variables as a single `:root` rule, in insertion order.
///
/// An empty mapping renders as an empty string rather than an empty rule.
pub fn emit_css(variables: &CssVariables) -> String {
    if variables.is_empty() {
        return String::new();
    }

    let mut css = String::from(":root {\n");
    for (name, value) in variables {
        css.push_str(&format!("  --{}: {};\n", name, value));
    }
    css.push('}');
    css
}

pub fn wrap_style_tag(css: &str) -> String {
    format!("<style id=\"{}\">{}</style>", STYLE_TAG_ID, css)
}
