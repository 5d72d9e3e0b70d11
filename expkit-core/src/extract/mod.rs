//! Static declaration extractor.
//!
//! Finds experiment declarations in Python-syntax source files without running
//! any of their code. A top-level function is a declaration when its outermost
//! decorator is a call to `experiment`; every decorator in its chain must then
//! resolve to an `experiment` or `param` combinator with literal arguments.
//!
//! Malformed declarations are logged and skipped. Name collisions (a second
//! experiment on one function, a repeated parameter name, a repeated
//! experiment name) abort the whole extraction.

pub mod chain;
pub mod literal;
pub mod syntax;

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{ExtractError, SpecError};
use crate::param::{ParamSpec, build_action_inputs, build_run_params, check_name, with_implicit_seed};
use chain::{ChainLink, ExperimentArgs, LinkError, is_experiment_call, read_link};
use syntax::{FunctionDef, parse_module, python_parser, top_level_functions};

/// The experiment half of a static declaration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentDecl {
    pub name: String,
    pub seed: Option<i64>,
    /// Name of the decorated function.
    pub function: String,
    /// 1-based line of the `def`.
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// An experiment declaration and the parameters declared on it, in the order
/// they are written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedExperiment {
    pub experiment: ExperimentDecl,
    pub params: Vec<ParamSpec>,
}

impl ExtractedExperiment {
    pub fn name(&self) -> &str {
        &self.experiment.name
    }

    /// A declared parameter by name.
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name() == name)
    }

    /// Full parameter list, with the implicit `seed` merged in.
    pub fn parameters(&self) -> Vec<ParamSpec> {
        with_implicit_seed(self.experiment.seed, self.params.clone())
    }

    /// The run command fragment forwarding every parameter.
    pub fn run_params(&self) -> String {
        build_run_params(&self.parameters())
    }

    /// One workflow input block per parameter.
    pub fn action_inputs(&self) -> Vec<String> {
        build_action_inputs(&self.parameters())
    }
}

/// Why a declaration was left out of the extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// A decorator in the chain is not a statically readable combinator.
    Unresolved(LinkError),
    /// The combinator arguments were read but failed validation.
    InvalidSpec(SpecError),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unresolved(e) => write!(f, "{e}"),
            SkipReason::InvalidSpec(e) => write!(f, "{e}"),
        }
    }
}

/// A declaration the extractor skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedDeclaration {
    pub function: String,
    pub line: usize,
    pub file: Option<PathBuf>,
    pub reason: SkipReason,
}

/// Reusable static extractor. Holds one tree-sitter parser.
pub struct Extractor {
    parser: tree_sitter::Parser,
    skipped: Vec<SkippedDeclaration>,
}

impl Extractor {
    pub fn new() -> Result<Self, ExtractError> {
        Ok(Self {
            parser: python_parser()?,
            skipped: Vec::new(),
        })
    }

    /// Declarations skipped by the most recent extraction call.
    pub fn skipped(&self) -> &[SkippedDeclaration] {
        &self.skipped
    }

    /// Extract declarations from in-memory source text.
    pub fn extract_source(&mut self, source: &str) -> Result<Vec<ExtractedExperiment>, ExtractError> {
        self.skipped.clear();
        let mut seen = HashSet::new();
        self.extract_into(source, None, &mut seen)
    }

    /// Extract declarations from a single file.
    pub fn extract_file(&mut self, path: &Path) -> crate::error::Result<Vec<ExtractedExperiment>> {
        self.skipped.clear();
        let source = std::fs::read_to_string(path)?;
        let mut seen = HashSet::new();
        Ok(self.extract_into(&source, Some(path), &mut seen)?)
    }

    /// Extract declarations from every file under `root` with the given
    /// extension, in sorted path order. Experiment names must be unique
    /// across all files.
    pub fn extract_dir(
        &mut self,
        root: &Path,
        extension: &str,
    ) -> crate::error::Result<Vec<ExtractedExperiment>> {
        self.skipped.clear();
        let mut seen = HashSet::new();
        let mut experiments = Vec::new();
        for path in declaration_files(root, extension) {
            let source = std::fs::read_to_string(&path)?;
            experiments.extend(self.extract_into(&source, Some(&path), &mut seen)?);
        }
        Ok(experiments)
    }

    fn extract_into(
        &mut self,
        source: &str,
        file: Option<&Path>,
        seen: &mut HashSet<String>,
    ) -> Result<Vec<ExtractedExperiment>, ExtractError> {
        let origin = file
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<source>".to_string());
        let tree = parse_module(&mut self.parser, source, &origin)?;
        let bytes = source.as_bytes();

        let mut experiments = Vec::new();
        for function in top_level_functions(tree.root_node(), bytes) {
            let (args, params) = match read_declaration(&function, bytes)? {
                Declaration::None => continue,
                Declaration::Skipped(reason) => {
                    warn!(
                        file = %origin,
                        function = %function.name,
                        line = function.line,
                        reason = %reason,
                        "Skipping experiment declaration"
                    );
                    self.skipped.push(SkippedDeclaration {
                        function: function.name.clone(),
                        line: function.line,
                        file: file.map(Path::to_path_buf),
                        reason,
                    });
                    continue;
                }
                Declaration::Found(args, params) => (args, params),
            };

            if !seen.insert(args.name.clone()) {
                return Err(ExtractError::DuplicateExperiment { name: args.name });
            }
            debug!(
                file = %origin,
                experiment = %args.name,
                params = params.len(),
                "Extracted experiment"
            );
            experiments.push(ExtractedExperiment {
                experiment: ExperimentDecl {
                    name: args.name,
                    seed: args.seed,
                    function: function.name.clone(),
                    line: function.line,
                    file: file.map(Path::to_path_buf),
                },
                params,
            });
        }

        Ok(experiments)
    }
}

/// Paths of all declaration files under `root`, sorted. Hidden entries and
/// `__pycache__` directories are not descended into.
pub fn declaration_files(root: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() == 0 || !(name.starts_with('.') || name == "__pycache__")
        })
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == extension))
        .collect();
    files.sort();
    files
}

enum Declaration {
    None,
    Skipped(SkipReason),
    Found(ExperimentArgs, Vec<ParamSpec>),
}

fn read_declaration(function: &FunctionDef<'_>, source: &[u8]) -> Result<Declaration, ExtractError> {
    let Some(outermost) = function.decorators.first() else {
        return Ok(Declaration::None);
    };
    if function.is_async || !is_experiment_call(*outermost, source) {
        return Ok(Declaration::None);
    }

    let links = match function
        .decorators
        .iter()
        .map(|decorator| read_link(*decorator, source))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(links) => links,
        Err(e) => return Ok(Declaration::Skipped(SkipReason::Unresolved(e))),
    };

    // Collisions abort extraction even when the colliding specs are invalid.
    let mut experiment: Option<ExperimentArgs> = None;
    let mut param_args = Vec::new();
    let mut param_names = HashSet::new();
    for link in links {
        match link {
            ChainLink::Experiment(args) => {
                if experiment.is_some() {
                    return Err(ExtractError::MultipleExperiments {
                        function: function.name.clone(),
                    });
                }
                experiment = Some(args);
            }
            ChainLink::Param(args) => {
                if !param_names.insert(args.name.clone()) {
                    return Err(ExtractError::DuplicateParam {
                        function: function.name.clone(),
                        name: args.name,
                    });
                }
                param_args.push(args);
            }
        }
    }

    let params = match param_args
        .into_iter()
        .map(ParamSpec::from_args)
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(params) => params,
        Err(e) => return Ok(Declaration::Skipped(SkipReason::InvalidSpec(e))),
    };

    let Some(args) = experiment else {
        return Ok(Declaration::None);
    };
    if let Err(e) = check_name(&args.name) {
        return Ok(Declaration::Skipped(SkipReason::InvalidSpec(e)));
    }
    Ok(Declaration::Found(args, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::{ParamType, ParamValue};
    use pretty_assertions::assert_eq;

    fn extract(source: &str) -> Result<Vec<ExtractedExperiment>, ExtractError> {
        Extractor::new().unwrap().extract_source(source)
    }

    const ALPACA: &str = r#"
from higgsfield.experiment import experiment, param

@experiment("alpaca_fp16", seed=1)
@param("size", options=["7b", "13b", "70b"])
@param("num_epochs", default=1, description="passes over the data")
def train(params):
    print(params)
"#;

    #[test]
    fn test_extracts_experiment_and_params() {
        let found = extract(ALPACA).unwrap();
        assert_eq!(found.len(), 1);
        let exp = &found[0];
        assert_eq!(exp.name(), "alpaca_fp16");
        assert_eq!(exp.experiment.seed, Some(1));
        assert_eq!(exp.experiment.function, "train");
        assert_eq!(exp.experiment.line, 7);

        let names: Vec<&str> = exp.params.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["size", "num_epochs"]);
        assert_eq!(
            exp.param("size").unwrap().default(),
            Some(&ParamValue::Str("7b".into()))
        );
        assert_eq!(exp.param("num_epochs").unwrap().param_type(), ParamType::Integer);
    }

    #[test]
    fn test_parameters_include_seed() {
        let found = extract(ALPACA).unwrap();
        let params = found[0].parameters();
        assert_eq!(params[0].name(), "seed");
        assert_eq!(params[0].default(), Some(&ParamValue::Int(1)));
        assert!(!params[0].required());
        assert!(found[0].run_params().starts_with(r#"hf_action_seed="${{ github.event.inputs.seed }}""#));
        assert_eq!(found[0].action_inputs().len(), 3);
    }

    #[test]
    fn test_functions_without_experiment_are_ignored() {
        let source = r#"
def helper(x):
    return x

@param("lr", default=0.1)
@experiment("inner")
def wrong_order(params):
    pass

@functools.cache
def cached(params):
    pass

@experiment("asynchronous")
async def run(params):
    pass
"#;
        assert!(extract(source).unwrap().is_empty());
    }

    #[test]
    fn test_unresolvable_chain_is_skipped() {
        let source = r#"
@experiment("dynamic", seed=compute_seed())
def first(params):
    pass

@experiment("decorated")
@torch.no_grad()
def second(params):
    pass

@experiment("fine")
def third(params):
    pass
"#;
        let mut extractor = Extractor::new().unwrap();
        let found = extractor.extract_source(source).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "fine");

        let skipped: Vec<&str> = extractor
            .skipped()
            .iter()
            .map(|s| s.function.as_str())
            .collect();
        assert_eq!(skipped, vec!["first", "second"]);
        assert!(matches!(
            extractor.skipped()[1].reason,
            SkipReason::Unresolved(LinkError::Foreign(_))
        ));
    }

    #[test]
    fn test_invalid_spec_is_skipped() {
        let source = r#"
@experiment("bad_default")
@param("size", default="30b", options=["7b", "13b"])
def first(params):
    pass

@experiment("this_name_is_way_too_long")
def second(params):
    pass
"#;
        let mut extractor = Extractor::new().unwrap();
        assert!(extractor.extract_source(source).unwrap().is_empty());
        assert_eq!(extractor.skipped().len(), 2);
        assert!(matches!(
            extractor.skipped()[1].reason,
            SkipReason::InvalidSpec(SpecError::NameLength { .. })
        ));
    }

    #[test]
    fn test_multiple_experiments_is_hard_error() {
        let source = r#"
@experiment("a")
@experiment("b")
def train(params):
    pass
"#;
        assert!(matches!(
            extract(source),
            Err(ExtractError::MultipleExperiments { function }) if function == "train"
        ));
    }

    #[test]
    fn test_duplicate_param_is_hard_error() {
        let source = r#"
@experiment("a")
@param("lr", default=0.1)
@param("lr", default=0.2)
def train(params):
    pass
"#;
        assert!(matches!(
            extract(source),
            Err(ExtractError::DuplicateParam { name, .. }) if name == "lr"
        ));
    }

    #[test]
    fn test_duplicate_invalid_param_is_hard_error() {
        let source = r#"
@experiment("x")
@param("9bad")
@param("9bad")
def train(params):
    pass
"#;
        let mut extractor = Extractor::new().unwrap();
        assert!(matches!(
            extractor.extract_source(source),
            Err(ExtractError::DuplicateParam { name, .. }) if name == "9bad"
        ));
        assert!(extractor.skipped().is_empty());

        let source = r#"
@experiment("x")
@param("9bad")
@experiment("y")
def train(params):
    pass
"#;
        assert!(matches!(
            extract(source),
            Err(ExtractError::MultipleExperiments { .. })
        ));
    }

    #[test]
    fn test_duplicate_experiment_is_hard_error() {
        let source = r#"
@experiment("x")
def first(params):
    pass

@experiment("x")
@param("lr", default=0.1)
def second(params):
    pass
"#;
        assert!(matches!(
            extract(source),
            Err(ExtractError::DuplicateExperiment { name }) if name == "x"
        ));
    }

    #[test]
    fn test_parse_error_is_reported() {
        assert!(matches!(
            extract("@experiment('x'\ndef broken(:\n"),
            Err(ExtractError::Parse { .. })
        ));
    }

    #[test]
    fn test_extract_dir_enforces_cross_file_uniqueness() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "@experiment('x')\ndef a(p):\n    pass\n").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(
            dir.path().join("nested/b.py"),
            "@experiment('y')\ndef b(p):\n    pass\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "@experiment('x')").unwrap();

        let mut extractor = Extractor::new().unwrap();
        let found = extractor.extract_dir(dir.path(), "py").unwrap();
        let names: Vec<&str> = found.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["x", "y"]);
        assert!(found[1].experiment.file.as_ref().unwrap().ends_with("nested/b.py"));

        std::fs::write(dir.path().join("c.py"), "@experiment('x')\ndef c(p):\n    pass\n").unwrap();
        let err = extractor.extract_dir(dir.path(), "py").unwrap_err();
        assert!(matches!(
            err,
            crate::error::ExpkitError::Extract(ExtractError::DuplicateExperiment { .. })
        ));
    }

    #[test]
    fn test_declaration_files_skip_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".venv")).unwrap();
        std::fs::write(dir.path().join(".venv/lib.py"), "").unwrap();
        std::fs::create_dir(dir.path().join("__pycache__")).unwrap();
        std::fs::write(dir.path().join("__pycache__/x.py"), "").unwrap();
        std::fs::write(dir.path().join("main.py"), "").unwrap();

        let files = declaration_files(dir.path(), "py");
        assert_eq!(files, vec![dir.path().join("main.py")]);
    }
}
