//! Declaration sources: things that populate a registry when executed.
//!
//! [`ScriptSource`] executes a Python-syntax declaration file: every top-level
//! function whose decorators are all `experiment`/`param` combinators has its
//! chain applied bottom-up, with the function body stood in for by a host
//! handler looked up in an [`EntryTable`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::bail;
use tracing::debug;

use super::annotate::{Annotated, ExperimentAnnotation, ExperimentEntry, ParamAnnotation};
use super::ExperimentRegistry;
use crate::error::{DeclarationError, Result};
use crate::extract::chain::{ChainLink, LinkError, read_link};
use crate::extract::declaration_files;
use crate::extract::syntax::{FunctionDef, parse_module, python_parser, top_level_functions};
use crate::launch::ParamBundle;
use crate::param::ParamSpec;

/// Something that registers experiments when executed.
pub trait DeclarationSource: Send + Sync {
    /// Human-readable origin, for logs.
    fn describe(&self) -> String;

    fn execute(&self, registry: &mut ExperimentRegistry) -> Result<()>;
}

/// A source backed by Rust code.
pub struct NativeSource<F> {
    name: String,
    register: F,
}

impl<F> NativeSource<F>
where
    F: Fn(&mut ExperimentRegistry) -> Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, register: F) -> Self {
        Self {
            name: name.into(),
            register,
        }
    }
}

impl<F> DeclarationSource for NativeSource<F>
where
    F: Fn(&mut ExperimentRegistry) -> Result<()> + Send + Sync,
{
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn execute(&self, registry: &mut ExperimentRegistry) -> Result<()> {
        (self.register)(registry)
    }
}

/// Host handlers for script functions, by function name.
#[derive(Clone, Default)]
pub struct EntryTable {
    entries: HashMap<String, Arc<dyn ExperimentEntry>>,
    fallback: Option<Arc<dyn ExperimentEntry>>,
}

impl EntryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the handler run for the script function named `function`.
    pub fn bind(mut self, function: impl Into<String>, entry: impl ExperimentEntry + 'static) -> Self {
        self.entries.insert(function.into(), Arc::new(entry));
        self
    }

    /// Handler for functions with no binding of their own.
    pub fn with_fallback(mut self, entry: impl ExperimentEntry + 'static) -> Self {
        self.fallback = Some(Arc::new(entry));
        self
    }

    pub fn resolve(&self, function: &str) -> Option<Arc<dyn ExperimentEntry>> {
        self.entries
            .get(function)
            .or(self.fallback.as_ref())
            .cloned()
    }
}

impl fmt::Debug for EntryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bound: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        bound.sort_unstable();
        f.debug_struct("EntryTable")
            .field("bound", &bound)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// A script function standing in for its body. Carries the function's own
/// arity so annotation checks see the declared signature.
struct ScriptEntry {
    function: String,
    arity: usize,
    handler: Option<Arc<dyn ExperimentEntry>>,
}

impl ExperimentEntry for ScriptEntry {
    fn arity(&self) -> usize {
        self.arity
    }

    fn call(&self, params: &ParamBundle) -> anyhow::Result<()> {
        match &self.handler {
            Some(handler) => handler.call(params),
            None => bail!("no handler is bound for function '{}'", self.function),
        }
    }
}

/// A declaration file executed by applying its combinator chains.
#[derive(Debug, Clone)]
pub struct ScriptSource {
    path: PathBuf,
    entries: Arc<EntryTable>,
}

impl ScriptSource {
    pub fn new(path: impl Into<PathBuf>, entries: Arc<EntryTable>) -> Self {
        Self {
            path: path.into(),
            entries,
        }
    }

    /// One source per declaration file under `root`, in sorted order.
    pub fn discover(root: &Path, extension: &str, entries: Arc<EntryTable>) -> Vec<Self> {
        declaration_files(root, extension)
            .into_iter()
            .map(|path| Self::new(path, Arc::clone(&entries)))
            .collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn apply_chain(
        &self,
        function: &FunctionDef<'_>,
        links: Vec<ChainLink>,
        registry: &mut ExperimentRegistry,
    ) -> Result<()> {
        let invalid = |reason: &str| DeclarationError::Invalid {
            function: function.name.clone(),
            reason: reason.to_string(),
        };
        if function.is_async {
            return Err(invalid("async functions cannot be experiments").into());
        }

        let entry = ScriptEntry {
            function: function.name.clone(),
            arity: function.arity,
            handler: self.entries.resolve(&function.name),
        };
        let mut target = Some(Annotated::bare(entry));

        for link in links.into_iter().rev() {
            let current = target
                .take()
                .ok_or_else(|| invalid("annotation applied on top of a registered experiment"))?;
            match link {
                ChainLink::Param(args) => {
                    let spec = ParamSpec::from_args(args)?;
                    target = Some(ParamAnnotation::new(spec).apply(current)?);
                }
                ChainLink::Experiment(args) => {
                    ExperimentAnnotation::from_args(args)?.apply(current, registry)?;
                }
            }
        }

        if target.is_some() {
            debug!(function = %function.name, "Chain has no experiment, nothing registered");
        }
        Ok(())
    }
}

impl DeclarationSource for ScriptSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn execute(&self, registry: &mut ExperimentRegistry) -> Result<()> {
        let origin = self.describe();
        let source = std::fs::read_to_string(&self.path)?;
        let mut parser = python_parser()?;
        let tree = parse_module(&mut parser, &source, &origin)?;
        let bytes = source.as_bytes();

        for function in top_level_functions(tree.root_node(), bytes) {
            if function.decorators.is_empty() {
                continue;
            }
            let links: Vec<_> = function
                .decorators
                .iter()
                .map(|node| read_link(*node, bytes))
                .collect();

            if let Some(Err(LinkError::Foreign(text))) = links
                .iter()
                .find(|link| matches!(link, Err(LinkError::Foreign(_))))
            {
                debug!(file = %origin, function = %function.name, decorator = %text, "Leaving function with foreign decorator alone");
                continue;
            }

            let links = links
                .into_iter()
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| DeclarationError::Invalid {
                    function: function.name.clone(),
                    reason: e.to_string(),
                })?;
            self.apply_chain(&function, links, registry)?;
        }

        debug!(file = %origin, total = registry.len(), "Executed declaration file");
        Ok(())
    }
}
