//! Reading a single decorator expression as a declaration combinator.
//!
//! Shared by the static extractor and the script runtime, so both paths agree
//! on which decorators are combinators and what their arguments mean.

use std::collections::HashSet;

use tree_sitter::Node;

use super::literal::{Literal, evaluate};
use super::syntax::{named_children, node_text};
use crate::param::ParamArgs;

pub const EXPERIMENT_COMBINATOR: &str = "experiment";
pub const PARAM_COMBINATOR: &str = "param";

const EXPERIMENT_KEYWORDS: &[&str] = &["name", "seed"];
const PARAM_KEYWORDS: &[&str] = &["name", "default", "description", "required", "type", "options"];

/// Arguments of an `experiment(...)` combinator, before name validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentArgs {
    pub name: String,
    pub seed: Option<i64>,
}

/// One statically resolved link of a decorator chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainLink {
    Experiment(ExperimentArgs),
    Param(ParamArgs),
}

/// Why a decorator could not be read as a combinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Not a call to `experiment` or `param`.
    Foreign(String),
    /// A combinator call whose arguments are not statically known or not
    /// allowed.
    Malformed(String),
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::Foreign(text) => write!(f, "unrecognized decorator `{text}`"),
            LinkError::Malformed(reason) => f.write_str(reason),
        }
    }
}

/// Whether a decorator expression is a call whose target is `experiment`.
pub fn is_experiment_call(node: Node<'_>, source: &[u8]) -> bool {
    combinator_name(node, source) == Some(EXPERIMENT_COMBINATOR)
}

/// Resolve a decorator expression into a chain link.
pub fn read_link(node: Node<'_>, source: &[u8]) -> Result<ChainLink, LinkError> {
    let combinator = match combinator_name(node, source) {
        Some(EXPERIMENT_COMBINATOR) => EXPERIMENT_COMBINATOR,
        Some(PARAM_COMBINATOR) => PARAM_COMBINATOR,
        _ => return Err(LinkError::Foreign(node_text(node, source).to_string())),
    };

    let arguments = node
        .child_by_field_name("arguments")
        .ok_or_else(|| LinkError::Malformed(format!("`{combinator}` has no argument list")))?;
    let mut args = CallArgs::read(arguments, source, combinator)?;

    if combinator == EXPERIMENT_COMBINATOR {
        args.check_keywords(EXPERIMENT_KEYWORDS)?;
        let name = args.name()?;
        let seed = match args.take("seed") {
            None | Some(Literal::None) => None,
            Some(Literal::Int(seed)) => Some(seed),
            Some(other) => {
                return Err(LinkError::Malformed(format!(
                    "`seed` must be an int, got {}",
                    other.kind()
                )));
            }
        };
        return Ok(ChainLink::Experiment(ExperimentArgs { name, seed }));
    }

    args.check_keywords(PARAM_KEYWORDS)?;
    let name = args.name()?;

    let default = match args.take("default") {
        None | Some(Literal::None) => None,
        Some(literal) => Some(
            literal
                .to_value()
                .ok_or_else(|| wrong_kind("default", "a str, int, float or bool", &literal))?,
        ),
    };
    let description = match args.take("description") {
        None | Some(Literal::None) => None,
        Some(Literal::Str(text)) => Some(text),
        Some(other) => return Err(wrong_kind("description", "a str", &other)),
    };
    let required = match args.take("required") {
        None | Some(Literal::None) => false,
        Some(Literal::Bool(flag)) => flag,
        Some(other) => return Err(wrong_kind("required", "a bool", &other)),
    };
    let param_type = match args.take("type") {
        None | Some(Literal::None) => None,
        Some(Literal::Type(param_type)) => Some(param_type),
        Some(other) => return Err(wrong_kind("type", "one of str, int, float, bool", &other)),
    };
    let options = match args.take("options") {
        None | Some(Literal::None) => None,
        Some(Literal::Seq(items)) => Some(
            items
                .iter()
                .map(|item| {
                    item.to_value()
                        .ok_or_else(|| wrong_kind("options", "a sequence of scalars", item))
                })
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Some(other) => return Err(wrong_kind("options", "a list or tuple", &other)),
    };

    Ok(ChainLink::Param(ParamArgs {
        name,
        param_type,
        default,
        description,
        required,
        options,
    }))
}

fn combinator_name<'s>(node: Node<'_>, source: &'s [u8]) -> Option<&'s str> {
    if node.kind() != "call" {
        return None;
    }
    let target = node.child_by_field_name("function")?;
    (target.kind() == "identifier").then(|| node_text(target, source))
}

fn wrong_kind(keyword: &str, expected: &str, got: &Literal) -> LinkError {
    LinkError::Malformed(format!("`{keyword}` must be {expected}, got {}", got.kind()))
}

/// Evaluated call arguments.
struct CallArgs {
    combinator: &'static str,
    positional: Vec<Literal>,
    keywords: Vec<(String, Literal)>,
}

impl CallArgs {
    fn read(arguments: Node<'_>, source: &[u8], combinator: &'static str) -> Result<Self, LinkError> {
        if arguments.kind() != "argument_list" {
            return Err(LinkError::Malformed(format!(
                "`{combinator}` takes plain arguments"
            )));
        }

        let mut positional = Vec::new();
        let mut keywords: Vec<(String, Literal)> = Vec::new();
        let mut seen = HashSet::new();

        for argument in named_children(arguments) {
            match argument.kind() {
                "keyword_argument" => {
                    let (Some(key), Some(value)) = (
                        argument.child_by_field_name("name"),
                        argument.child_by_field_name("value"),
                    ) else {
                        return Err(LinkError::Malformed("incomplete keyword argument".into()));
                    };
                    let key = node_text(key, source).to_string();
                    if !seen.insert(key.clone()) {
                        return Err(LinkError::Malformed(format!(
                            "keyword `{key}` given more than once"
                        )));
                    }
                    let value = evaluate(value, source).ok_or_else(|| {
                        LinkError::Malformed(format!("value of `{key}` is not a literal"))
                    })?;
                    keywords.push((key, value));
                }
                "list_splat" | "dictionary_splat" => {
                    return Err(LinkError::Malformed("argument unpacking is not allowed".into()));
                }
                _ => {
                    if !keywords.is_empty() {
                        return Err(LinkError::Malformed(
                            "positional argument follows keyword argument".into(),
                        ));
                    }
                    let value = evaluate(argument, source).ok_or_else(|| {
                        LinkError::Malformed(format!(
                            "argument `{}` is not a literal",
                            node_text(argument, source)
                        ))
                    })?;
                    positional.push(value);
                }
            }
        }

        if positional.len() > 1 {
            return Err(LinkError::Malformed(format!(
                "`{combinator}` takes one positional argument, got {}",
                positional.len()
            )));
        }

        Ok(Self {
            combinator,
            positional,
            keywords,
        })
    }

    fn check_keywords(&self, allowed: &[&str]) -> Result<(), LinkError> {
        match self.keywords.iter().find(|(key, _)| !allowed.contains(&key.as_str())) {
            Some((key, _)) => Err(LinkError::Malformed(format!(
                "`{}` got an unexpected keyword `{key}`",
                self.combinator
            ))),
            None => Ok(()),
        }
    }

    fn take(&mut self, key: &str) -> Option<Literal> {
        let index = self.keywords.iter().position(|(k, _)| k == key)?;
        Some(self.keywords.remove(index).1)
    }

    fn name(&mut self) -> Result<String, LinkError> {
        let keyword = self.take("name");
        let literal = match (self.positional.pop(), keyword) {
            (Some(_), Some(_)) => {
                return Err(LinkError::Malformed(format!(
                    "`{}` got multiple values for `name`",
                    self.combinator
                )));
            }
            (Some(literal), None) | (None, Some(literal)) => literal,
            (None, None) => {
                return Err(LinkError::Malformed(format!(
                    "`{}` is missing a name",
                    self.combinator
                )));
            }
        };
        match literal {
            Literal::Str(name) => Ok(name),
            other => Err(wrong_kind("name", "a str", &other)),
        }
    }
}
