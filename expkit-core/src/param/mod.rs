//! # Parameter Model
//!
//! Typed, validated descriptions of the inputs an experiment accepts.
//! A [`ParamSpec`] is built once from loosely-typed [`ParamArgs`] (as written
//! in a declaration) and is immutable afterwards. Both the static extractor and
//! the runtime registry construct specs through [`ParamSpec::from_args`], so a
//! declaration is accepted or rejected identically on either path.

pub mod name;
pub mod render;

pub use name::{MAX_NAME_LEN, check_name};
pub use render::{INPUT_PREFIX, build_action_inputs, build_run_params};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DispatchError, SpecError};

/// Name of the parameter every experiment carries implicitly.
pub const SEED_PARAM: &str = "seed";

/// Seed used when an experiment declares none.
pub const DEFAULT_SEED: i64 = 42;

/// The primitive types a parameter may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ParamType {
    #[serde(rename = "str")]
    String,
    #[serde(rename = "int")]
    Integer,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "bool")]
    Boolean,
}

impl ParamType {
    /// The declaration-language spelling of this type.
    pub fn type_name(self) -> &'static str {
        match self {
            ParamType::String => "str",
            ParamType::Integer => "int",
            ParamType::Float => "float",
            ParamType::Boolean => "bool",
        }
    }

    /// Parse a raw command-line string with the primitive's canonical parser.
    ///
    /// Booleans accept exactly `true` and `false`; integers are `i64`;
    /// strings are taken verbatim.
    pub fn parse_raw(self, raw: &str) -> Option<ParamValue> {
        match self {
            ParamType::String => Some(ParamValue::Str(raw.to_string())),
            ParamType::Integer => raw.parse::<i64>().ok().map(ParamValue::Int),
            ParamType::Float => raw.parse::<f64>().ok().map(ParamValue::Float),
            ParamType::Boolean => raw.parse::<bool>().ok().map(ParamValue::Bool),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl FromStr for ParamType {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "str" => Ok(ParamType::String),
            "int" => Ok(ParamType::Integer),
            "float" => Ok(ParamType::Float),
            "bool" => Ok(ParamType::Boolean),
            other => Err(SpecError::UnsupportedType {
                type_name: other.to_string(),
            }),
        }
    }
}

/// A concretely-typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    /// The native type of this value.
    pub fn type_of(&self) -> ParamType {
        match self {
            ParamValue::Str(_) => ParamType::String,
            ParamValue::Int(_) => ParamType::Integer,
            ParamValue::Float(_) => ParamType::Float,
            ParamValue::Bool(_) => ParamType::Boolean,
        }
    }

    /// Convert this value to `target`, or `None` if no conversion exists.
    ///
    /// Floats convert to integers only when finite and integral. Strings go
    /// through the target's canonical parser.
    pub fn convert(&self, target: ParamType) -> Option<ParamValue> {
        match (self, target) {
            (ParamValue::Str(s), _) => target.parse_raw(s),
            (value, ParamType::String) => Some(ParamValue::Str(value.to_string())),

            (ParamValue::Int(i), ParamType::Integer) => Some(ParamValue::Int(*i)),
            (ParamValue::Bool(b), ParamType::Integer) => Some(ParamValue::Int(i64::from(*b))),
            (ParamValue::Float(f), ParamType::Integer) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    Some(ParamValue::Int(*f as i64))
                } else {
                    None
                }
            }

            (ParamValue::Float(f), ParamType::Float) => Some(ParamValue::Float(*f)),
            (ParamValue::Int(i), ParamType::Float) => Some(ParamValue::Float(*i as f64)),
            (ParamValue::Bool(b), ParamType::Float) => {
                Some(ParamValue::Float(if *b { 1.0 } else { 0.0 }))
            }

            (ParamValue::Bool(b), ParamType::Boolean) => Some(ParamValue::Bool(*b)),
            (ParamValue::Int(i), ParamType::Boolean) => Some(ParamValue::Bool(*i != 0)),
            (ParamValue::Float(f), ParamType::Boolean) => Some(ParamValue::Bool(*f != 0.0)),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(i64::from(value))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// Unvalidated parameter arguments, exactly as a declaration states them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamArgs {
    pub name: String,
    pub param_type: Option<ParamType>,
    pub default: Option<ParamValue>,
    pub description: Option<String>,
    pub required: bool,
    pub options: Option<Vec<ParamValue>>,
}

/// A validated, immutable parameter specification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    name: String,
    #[serde(rename = "type")]
    param_type: ParamType,
    #[serde(skip_serializing_if = "Option::is_none")]
    default: Option<ParamValue>,
    required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    options: Vec<ParamValue>,
}

impl ParamSpec {
    /// Start building a spec for `name`.
    pub fn builder(name: impl Into<String>) -> ParamSpecBuilder {
        ParamSpecBuilder {
            args: ParamArgs {
                name: name.into(),
                ..ParamArgs::default()
            },
        }
    }

    /// Validate declaration arguments into a spec.
    ///
    /// The type is taken from `param_type`, else inferred from the default's
    /// native type, else `str`. A non-empty option list with no default
    /// makes its first option the default.
    pub fn from_args(args: ParamArgs) -> Result<Self, SpecError> {
        check_name(&args.name)?;
        let name = args.name;

        let param_type = args
            .param_type
            .or_else(|| args.default.as_ref().map(ParamValue::type_of))
            .unwrap_or(ParamType::String);

        let mut default = args
            .default
            .map(|value| convert_for(&name, &value, param_type))
            .transpose()?;

        let options = args
            .options
            .unwrap_or_default()
            .iter()
            .map(|value| convert_for(&name, value, param_type))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(first) = options.first() {
            match &default {
                None => default = Some(first.clone()),
                Some(value) if !options.contains(value) => {
                    return Err(SpecError::DefaultNotInOptions {
                        name,
                        default: value.to_string(),
                        options: join_values(&options),
                    });
                }
                Some(_) => {}
            }
        }

        Ok(Self {
            name,
            param_type,
            default,
            required: args.required,
            description: args.description,
            options,
        })
    }

    /// The implicit `seed` parameter. An explicit seed becomes an optional
    /// parameter defaulting to it; otherwise the seed is required with
    /// default [`DEFAULT_SEED`].
    pub fn seed(seed: Option<i64>) -> Self {
        Self {
            name: SEED_PARAM.to_string(),
            param_type: ParamType::Integer,
            default: Some(ParamValue::Int(seed.unwrap_or(DEFAULT_SEED))),
            required: seed.is_none(),
            description: None,
            options: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_type(&self) -> ParamType {
        self.param_type
    }

    pub fn default(&self) -> Option<&ParamValue> {
        self.default.as_ref()
    }

    pub fn required(&self) -> bool {
        self.required
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn options(&self) -> &[ParamValue] {
        &self.options
    }

    /// Convert a raw string to this parameter's type and check it against
    /// the option list.
    pub fn validate_and_coerce(&self, raw: &str) -> Result<ParamValue, DispatchError> {
        let value = self
            .param_type
            .parse_raw(raw)
            .ok_or_else(|| DispatchError::InvalidValue {
                name: self.name.clone(),
                reason: format!("{raw:?} cannot be converted to {}", self.param_type),
            })?;

        if !self.options.is_empty() && !self.options.contains(&value) {
            return Err(DispatchError::InvalidValue {
                name: self.name.clone(),
                reason: format!("{raw:?} is not one of [{}]", join_values(&self.options)),
            });
        }

        Ok(value)
    }
}

/// Builder over [`ParamArgs`] for declaring parameters from Rust code.
#[derive(Debug, Clone)]
pub struct ParamSpecBuilder {
    args: ParamArgs,
}

impl ParamSpecBuilder {
    pub fn param_type(mut self, param_type: ParamType) -> Self {
        self.args.param_type = Some(param_type);
        self
    }

    pub fn default(mut self, value: impl Into<ParamValue>) -> Self {
        self.args.default = Some(value.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.args.description = Some(description.into());
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.args.required = required;
        self
    }

    pub fn options<I, V>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        self.args.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> Result<ParamSpec, SpecError> {
        ParamSpec::from_args(self.args)
    }
}

/// Prepend the implicit seed parameter unless `declared` already has one.
///
/// When a `seed` parameter is declared explicitly it wins and the
/// experiment-level seed is discarded.
pub fn with_implicit_seed(seed: Option<i64>, declared: Vec<ParamSpec>) -> Vec<ParamSpec> {
    if declared.iter().any(|p| p.name() == SEED_PARAM) {
        return declared;
    }
    let mut params = Vec::with_capacity(declared.len() + 1);
    params.push(ParamSpec::seed(seed));
    params.extend(declared);
    params
}

fn convert_for(name: &str, value: &ParamValue, target: ParamType) -> Result<ParamValue, SpecError> {
    value.convert(target).ok_or_else(|| SpecError::Conversion {
        name: name.to_string(),
        value: format!("{value:?}"),
        target: target.to_string(),
    })
}

fn join_values(values: &[ParamValue]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
