//! Renderers turning parameter specs into deployment-platform fragments.
//!
//! Two shapes are produced: an invocation token that forwards a workflow
//! input to the launcher (`hf_action_<name>="${{ github.event.inputs.<name> }}"`),
//! and a YAML block declaring the parameter as a workflow-dispatch input.

use super::{ParamSpec, ParamType, ParamValue};

/// Prefix added to every forwarded input key. The launcher strips it again.
pub const INPUT_PREFIX: &str = "hf_action_";

const INDENT: &str = "        ";

impl ParamSpec {
    /// Render the `name="<platform expression>"` token for a run command.
    pub fn render_invocation_token(&self) -> String {
        let expression = wrap_expression(&format!("github.event.inputs.{}", self.name()));
        format!("{INPUT_PREFIX}{}=\"{expression}\"", self.name())
    }

    /// Render this parameter as a workflow-dispatch input block.
    pub fn render_input_schema(&self) -> String {
        let mut lines = vec![format!("{}:", self.name())];

        if let Some(description) = self.description().filter(|d| !d.is_empty()) {
            lines.push(format!("{INDENT}description: {}", quote(description)));
        }
        lines.push(format!("{INDENT}required: {}", self.required()));
        if let Some(default) = self.default() {
            lines.push(format!("{INDENT}default: {}", yaml_scalar(default)));
        }

        if !self.options().is_empty() {
            let options: Vec<String> = self.options().iter().map(yaml_scalar).collect();
            lines.push(format!("{INDENT}options: [{}]", options.join(", ")));
            lines.push(format!("{INDENT}type: choice"));
        } else if self.param_type() == ParamType::Boolean {
            lines.push(format!("{INDENT}type: boolean"));
        }

        lines.join("\n")
    }
}

/// Space-joined invocation tokens, in declaration order.
pub fn build_run_params(params: &[ParamSpec]) -> String {
    params
        .iter()
        .map(ParamSpec::render_invocation_token)
        .collect::<Vec<_>>()
        .join(" ")
}

/// One input block per parameter, in declaration order.
pub fn build_action_inputs(params: &[ParamSpec]) -> Vec<String> {
    params.iter().map(ParamSpec::render_input_schema).collect()
}

fn wrap_expression(inner: &str) -> String {
    format!("${{{{ {inner} }}}}")
}

/// Double-quoted YAML scalar. Anything outside the printable set, plus the
/// YAML 1.1 line breaks and the byte-order mark, is written as an escape.
fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if is_plain_printable(c) => out.push(c),
            c if u32::from(c) <= 0xFF => out.push_str(&format!("\\x{:02X}", u32::from(c))),
            c if u32::from(c) <= 0xFFFF => out.push_str(&format!("\\u{:04X}", u32::from(c))),
            c => out.push_str(&format!("\\U{:08X}", u32::from(c))),
        }
    }
    out.push('"');
    out
}

fn is_plain_printable(c: char) -> bool {
    matches!(
        u32::from(c),
        0x20..=0x7E | 0xA0..=0x2027 | 0x202A..=0xD7FF | 0xE000..=0xFEFE | 0xFF00..=0xFFFD | 0x10000..
    )
}

/// Floats always carry a `.` in the mantissa and a signed exponent, so YAML 1.1
/// readers resolve them as floats rather than strings.
fn yaml_float(f: f64) -> String {
    if f.is_nan() {
        return ".nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { ".inf" } else { "-.inf" }.to_string();
    }
    let repr = format!("{f:?}");
    match repr.split_once('e') {
        Some((mantissa, exponent)) => {
            let dot = if mantissa.contains('.') { "" } else { ".0" };
            let sign = if exponent.starts_with('-') { "" } else { "+" };
            format!("{mantissa}{dot}e{sign}{exponent}")
        }
        None => repr,
    }
}

fn yaml_scalar(value: &ParamValue) -> String {
    match value {
        ParamValue::Str(s) => quote(s),
        ParamValue::Int(i) => i.to_string(),
        ParamValue::Float(f) => yaml_float(*f),
        ParamValue::Bool(b) => b.to_string(),
    }
}
