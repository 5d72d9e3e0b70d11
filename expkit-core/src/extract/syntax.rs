//! Tree-sitter front end for declaration files.
//!
//! Only the shape of the module is inspected: top-level `def` statements,
//! their decorators, and their parameter lists. Nothing is evaluated here.

use tree_sitter::{Node, Parser, Tree};

use crate::error::ExtractError;

/// A top-level function definition and the decorator expressions above it,
/// outermost first.
#[derive(Debug, Clone)]
pub struct FunctionDef<'tree> {
    pub name: String,
    /// 1-based line of the `def` keyword.
    pub line: usize,
    /// Number of declared parameters, including `*args`/`**kwargs`.
    pub arity: usize,
    pub is_async: bool,
    pub decorators: Vec<Node<'tree>>,
}

/// Create a parser loaded with the Python grammar.
pub fn python_parser() -> Result<Parser, ExtractError> {
    let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
    let mut parser = Parser::new();
    parser
        .set_language(&language)
        .map_err(|e| ExtractError::Grammar {
            message: e.to_string(),
        })?;
    Ok(parser)
}

/// Parse `source`, rejecting files that do not parse cleanly.
pub fn parse_module(parser: &mut Parser, source: &str, origin: &str) -> Result<Tree, ExtractError> {
    let tree = parser.parse(source, None).ok_or_else(|| ExtractError::Parse {
        path: origin.to_string(),
    })?;
    if tree.root_node().has_error() {
        return Err(ExtractError::Parse {
            path: origin.to_string(),
        });
    }
    Ok(tree)
}

/// Collect every function defined directly at module level.
pub fn top_level_functions<'tree>(root: Node<'tree>, source: &[u8]) -> Vec<FunctionDef<'tree>> {
    let mut functions = Vec::new();
    let mut cursor = root.walk();

    for statement in root.named_children(&mut cursor) {
        match statement.kind() {
            "function_definition" => {
                if let Some(def) = function_def(statement, Vec::new(), source) {
                    functions.push(def);
                }
            }
            "decorated_definition" => {
                let Some(definition) = statement.child_by_field_name("definition") else {
                    continue;
                };
                if definition.kind() != "function_definition" {
                    continue;
                }
                let mut inner = statement.walk();
                let decorators = statement
                    .named_children(&mut inner)
                    .filter(|child| child.kind() == "decorator")
                    .filter_map(decorator_expression)
                    .collect();
                if let Some(def) = function_def(definition, decorators, source) {
                    functions.push(def);
                }
            }
            _ => {}
        }
    }

    functions
}

/// Source text of a node, or an empty string for non-UTF-8 input.
pub fn node_text<'s>(node: Node<'_>, source: &'s [u8]) -> &'s str {
    node.utf8_text(source).unwrap_or_default()
}

/// Named children of a node, comments excluded.
pub fn named_children<'tree>(node: Node<'tree>) -> Vec<Node<'tree>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect()
}

fn decorator_expression(decorator: Node<'_>) -> Option<Node<'_>> {
    named_children(decorator).into_iter().next()
}

fn function_def<'tree>(
    node: Node<'tree>,
    decorators: Vec<Node<'tree>>,
    source: &[u8],
) -> Option<FunctionDef<'tree>> {
    let name = node_text(node.child_by_field_name("name")?, source).to_string();
    let is_async = node.child(0).is_some_and(|first| first.kind() == "async");
    let arity = node
        .child_by_field_name("parameters")
        .map(|params| {
            named_children(params)
                .into_iter()
                .filter(|p| !matches!(p.kind(), "keyword_separator" | "positional_separator"))
                .count()
        })
        .unwrap_or(0);

    Some(FunctionDef {
        name,
        line: node.start_position().row + 1,
        arity,
        is_async,
        decorators,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn functions_of(source: &str) -> Vec<(String, usize, usize, bool)> {
        let mut parser = python_parser().unwrap();
        let tree = parse_module(&mut parser, source, "test.py").unwrap();
        top_level_functions(tree.root_node(), source.as_bytes())
            .into_iter()
            .map(|f| (f.name, f.arity, f.decorators.len(), f.is_async))
            .collect()
    }

    #[test]
    fn test_collects_top_level_functions_only() {
        let source = r#"
def plain(a, b):
    def nested(x):
        pass

@experiment("x")
@param("lr", default=0.1)
def train(params):
    pass

class Trainer:
    def method(self, params):
        pass
"#;
        assert_eq!(
            functions_of(source),
            vec![
                ("plain".to_string(), 2, 0, false),
                ("train".to_string(), 1, 2, false),
            ]
        );
    }

    #[test]
    fn test_async_and_variadic_functions() {
        let source = "async def run(params):\n    pass\n\ndef loose(*args, **kwargs):\n    pass\n";
        assert_eq!(
            functions_of(source),
            vec![
                ("run".to_string(), 1, 0, true),
                ("loose".to_string(), 2, 0, false),
            ]
        );
    }

    #[test]
    fn test_syntax_error_rejected() {
        let mut parser = python_parser().unwrap();
        let result = parse_module(&mut parser, "def broken(:\n", "broken.py");
        assert!(matches!(result, Err(ExtractError::Parse { .. })));
    }
}
