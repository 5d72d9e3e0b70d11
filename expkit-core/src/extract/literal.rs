//! Restricted literal evaluator.
//!
//! Reads combinator arguments straight off the syntax tree. Accepts string,
//! numeric, boolean and `None` literals, the type names `str`/`int`/`float`/
//! `bool`, and flat lists or tuples of scalar literals. Every other expression
//! evaluates to `None`, so user code is never run to learn a value.

use tree_sitter::Node;

use super::syntax::{named_children, node_text};
use crate::param::{ParamType, ParamValue};

/// A statically known argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
    Type(ParamType),
    Seq(Vec<Literal>),
}

impl Literal {
    /// Short description used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Literal::Str(_) => "str",
            Literal::Int(_) => "int",
            Literal::Float(_) => "float",
            Literal::Bool(_) => "bool",
            Literal::None => "NoneType",
            Literal::Type(_) => "type",
            Literal::Seq(_) => "tuple",
        }
    }

    /// The parameter value for a scalar literal.
    pub fn to_value(&self) -> Option<ParamValue> {
        match self {
            Literal::Str(s) => Some(ParamValue::Str(s.clone())),
            Literal::Int(i) => Some(ParamValue::Int(*i)),
            Literal::Float(f) => Some(ParamValue::Float(*f)),
            Literal::Bool(b) => Some(ParamValue::Bool(*b)),
            Literal::None | Literal::Type(_) | Literal::Seq(_) => None,
        }
    }
}

/// Evaluate an argument expression.
pub fn evaluate(node: Node<'_>, source: &[u8]) -> Option<Literal> {
    match node.kind() {
        "identifier" => node_text(node, source).parse().ok().map(Literal::Type),
        "list" | "tuple" => named_children(node)
            .into_iter()
            .map(|element| scalar(element, source))
            .collect::<Option<Vec<_>>>()
            .map(Literal::Seq),
        "parenthesized_expression" => evaluate(*named_children(node).first()?, source),
        _ => scalar(node, source),
    }
}

fn scalar(node: Node<'_>, source: &[u8]) -> Option<Literal> {
    match node.kind() {
        "string" => string_literal(node, source).map(Literal::Str),
        "concatenated_string" => named_children(node)
            .into_iter()
            .map(|part| string_literal(part, source))
            .collect::<Option<String>>()
            .map(Literal::Str),
        "integer" => parse_int(node_text(node, source)).map(Literal::Int),
        "float" => parse_float(node_text(node, source)).map(Literal::Float),
        "true" => Some(Literal::Bool(true)),
        "false" => Some(Literal::Bool(false)),
        "none" => Some(Literal::None),
        "unary_operator" => {
            let operator = node_text(node.child_by_field_name("operator")?, source);
            let operand = scalar(node.child_by_field_name("argument")?, source)?;
            match (operator, operand) {
                ("-", Literal::Int(i)) => i.checked_neg().map(Literal::Int),
                ("-", Literal::Float(f)) => Some(Literal::Float(-f)),
                ("+", value @ (Literal::Int(_) | Literal::Float(_))) => Some(value),
                _ => None,
            }
        }
        "parenthesized_expression" => scalar(*named_children(node).first()?, source),
        _ => None,
    }
}

fn string_literal(node: Node<'_>, source: &[u8]) -> Option<String> {
    if node.kind() != "string" {
        return None;
    }
    let text = node_text(node, source);
    let quote_at = text.find(['"', '\''])?;
    let prefix = text[..quote_at].to_ascii_lowercase();
    if prefix.chars().any(|c| c != 'r' && c != 'u') {
        // bytes, f-strings and template strings are not plain str constants
        return None;
    }

    let quoted = &text[quote_at..];
    let width = if quoted.starts_with("\"\"\"") || quoted.starts_with("'''") {
        3
    } else {
        1
    };
    if quoted.len() < width * 2 {
        return None;
    }
    let body = &quoted[width..quoted.len() - width];

    if prefix.contains('r') {
        Some(body.to_string())
    } else {
        unescape(body)
    }
}

fn unescape(body: &str) -> Option<String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(escaped) = chars.next() else {
            out.push('\\');
            break;
        };
        match escaped {
            '\n' => {}
            '\r' => {
                chars.next_if_eq(&'\n');
            }
            '\\' | '\'' | '"' => out.push(escaped),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut code = escaped.to_digit(8)?;
                for _ in 0..2 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(digit) => {
                            code = code * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(code)?);
            }
            'x' => out.push(hex_escape(&mut chars, 2)?),
            'u' => out.push(hex_escape(&mut chars, 4)?),
            'U' => out.push(hex_escape(&mut chars, 8)?),
            // \N{...} needs the unicode name table
            'N' => return None,
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }

    Some(out)
}

fn hex_escape(chars: &mut impl Iterator<Item = char>, digits: usize) -> Option<char> {
    let mut code = 0u32;
    for _ in 0..digits {
        code = code * 16 + chars.next()?.to_digit(16)?;
    }
    char::from_u32(code)
}

fn parse_int(text: &str) -> Option<i64> {
    let cleaned = text.replace('_', "").to_ascii_lowercase();
    if cleaned.ends_with('j') {
        return None;
    }
    if let Some(hex) = cleaned.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()
    } else if let Some(oct) = cleaned.strip_prefix("0o") {
        i64::from_str_radix(oct, 8).ok()
    } else if let Some(bin) = cleaned.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()
    } else {
        cleaned.parse().ok()
    }
}

fn parse_float(text: &str) -> Option<f64> {
    let cleaned = text.replace('_', "");
    if cleaned.ends_with(['j', 'J']) {
        return None;
    }
    cleaned.parse().ok()
}
