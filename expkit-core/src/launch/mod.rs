//! Launch dispatcher.
//!
//! A [`Launcher`] owns the experiment registry and the declaration sources
//! that populate it. Sources are executed once, on first use; every dispatch
//! then resolves raw `key=value` arguments against the chosen experiment's
//! parameters and calls its entry with the resulting [`ParamBundle`].

pub mod bundle;

pub use bundle::{ClusterEnv, ParamBundle, RunContext};

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{DispatchError, Result};
use crate::param::{INPUT_PREFIX, ParamSpec, ParamValue};
use crate::registry::{DeclarationSource, EntryTable, ExperimentRegistry, ScriptSource};

/// One dispatch request, as received from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub project_name: String,
    pub experiment_name: String,
    pub run_name: String,
    /// `-1` repeats without limit.
    pub max_repeats: i64,
    pub args: Vec<String>,
}

impl LaunchRequest {
    pub fn new(
        project_name: impl Into<String>,
        experiment_name: impl Into<String>,
        run_name: impl Into<String>,
    ) -> Self {
        Self {
            project_name: project_name.into(),
            experiment_name: experiment_name.into(),
            run_name: run_name.into(),
            max_repeats: -1,
            args: Vec::new(),
        }
    }

    pub fn with_max_repeats(mut self, max_repeats: i64) -> Self {
        self.max_repeats = max_repeats;
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> std::result::Result<(), DispatchError> {
        for (field, value) in [
            ("experiment_name", &self.experiment_name),
            ("project_name", &self.project_name),
            ("run_name", &self.run_name),
        ] {
            if value.is_empty() {
                return Err(DispatchError::InvalidArguments {
                    reason: format!("{field} must not be empty"),
                });
            }
        }
        if self.max_repeats < -1 {
            return Err(DispatchError::InvalidArguments {
                reason: format!("max_repeats must be -1 or greater, got {}", self.max_repeats),
            });
        }
        Ok(())
    }
}

/// Owns the registry and the sources that populate it.
pub struct Launcher {
    registry: ExperimentRegistry,
    sources: Vec<Box<dyn DeclarationSource>>,
    cluster: ClusterEnv,
    loaded: bool,
}

impl Launcher {
    pub fn new(cluster: ClusterEnv) -> Self {
        Self {
            registry: ExperimentRegistry::new(),
            sources: Vec::new(),
            cluster,
            loaded: false,
        }
    }

    pub fn with_source(mut self, source: impl DeclarationSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Add a script source for every declaration file under `root`.
    pub fn with_declarations(mut self, root: &Path, extension: &str, entries: Arc<EntryTable>) -> Self {
        for source in ScriptSource::discover(root, extension, entries) {
            self.sources.push(Box::new(source));
        }
        self
    }

    pub fn registry(&self) -> &ExperimentRegistry {
        &self.registry
    }

    pub fn cluster(&self) -> ClusterEnv {
        self.cluster
    }

    /// Execute every source into the registry. Only the first call does
    /// anything, even if it fails.
    pub fn load(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        self.loaded = true;
        for source in &self.sources {
            debug!(source = %source.describe(), "Executing declaration source");
            source.execute(&mut self.registry)?;
        }
        info!(
            sources = self.sources.len(),
            experiments = self.registry.len(),
            "Declarations loaded"
        );
        Ok(())
    }

    /// Resolve `request` against the registry and invoke the experiment.
    pub fn dispatch(&mut self, request: &LaunchRequest) -> Result<()> {
        request.validate()?;
        let raw = parse_raw_args(&request.args);
        self.load()?;

        let experiment = self.registry.get(&request.experiment_name).ok_or_else(|| {
            DispatchError::ExperimentNotFound {
                name: request.experiment_name.clone(),
            }
        })?;
        let params = resolve_params(experiment.parameters(), &raw)?;
        let bundle = ParamBundle::new(
            RunContext {
                experiment_name: request.experiment_name.clone(),
                project_name: request.project_name.clone(),
                run_name: request.run_name.clone(),
                rank: self.cluster.rank,
                world_size: self.cluster.world_size,
                local_rank: self.cluster.local_rank,
            },
            params,
        );

        let entry = experiment
            .entry()
            .ok_or_else(|| DispatchError::EntryFailed {
                name: request.experiment_name.clone(),
                source: anyhow::anyhow!("experiment has no bound entry"),
            })?;

        info!(
            experiment = %request.experiment_name,
            run = %request.run_name,
            max_repeats = request.max_repeats,
            rank = self.cluster.rank,
            world_size = self.cluster.world_size,
            "Dispatching experiment"
        );
        entry
            .call(&bundle)
            .map_err(|source| DispatchError::EntryFailed {
                name: request.experiment_name.clone(),
                source,
            })?;
        Ok(())
    }
}

/// Build a launcher over the declaration files under `root`, with cluster
/// placement read from the environment, and dispatch `request`.
pub fn dispatch(
    root: &Path,
    extension: &str,
    entries: Arc<EntryTable>,
    request: &LaunchRequest,
) -> Result<()> {
    request.validate()?;
    let mut launcher =
        Launcher::new(ClusterEnv::from_env()?).with_declarations(root, extension, entries);
    launcher.dispatch(request)
}

/// Split `key=value` items. Items without exactly one `=` are ignored; a
/// repeated key keeps its last value.
pub fn parse_raw_args(args: &[String]) -> HashMap<String, String> {
    let mut parsed = HashMap::new();
    for arg in args {
        match arg.split_once('=') {
            Some((key, value)) if !value.contains('=') => {
                parsed.insert(key.to_string(), value.to_string());
            }
            _ => debug!(arg = %arg, "Ignoring malformed argument"),
        }
    }
    parsed
}

/// Resolve raw values against `params`. Incoming keys must carry the
/// `hf_action_` prefix; keys matching no parameter are dropped.
pub fn resolve_params(
    params: &[ParamSpec],
    raw: &HashMap<String, String>,
) -> std::result::Result<BTreeMap<String, ParamValue>, DispatchError> {
    let incoming: HashMap<&str, &str> = raw
        .iter()
        .filter_map(|(key, value)| Some((key.strip_prefix(INPUT_PREFIX)?, value.as_str())))
        .collect();

    let mut resolved = BTreeMap::new();
    for spec in params {
        let value = match incoming.get(spec.name()) {
            Some(raw) => spec.validate_and_coerce(raw)?,
            None => match spec.default() {
                Some(default) => default.clone(),
                None if spec.required() => {
                    return Err(DispatchError::MissingRequiredParameter {
                        name: spec.name().to_string(),
                    });
                }
                None => continue,
            },
        };
        resolved.insert(spec.name().to_string(), value);
    }
    Ok(resolved)
}
