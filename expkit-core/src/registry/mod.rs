//! Runtime annotation registry.
//!
//! Experiments are registered into an explicit [`ExperimentRegistry`] value
//! by applying annotations ([`annotate`]) or by executing declaration sources
//! ([`script`]). The registry is append-only: names are unique and nothing is
//! ever unregistered.

pub mod annotate;
pub mod script;

pub use annotate::{Annotated, ExperimentAnnotation, ExperimentEntry, ParamAnnotation, ParamChain};
pub use script::{DeclarationSource, EntryTable, NativeSource, ScriptSource};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::DeclarationError;
use crate::extract::ExtractedExperiment;
use crate::param::ParamSpec;

/// A named experiment: ordered parameters plus, when registered live, the
/// entry that runs it.
#[derive(Clone)]
pub struct Experiment {
    name: String,
    parameters: Vec<ParamSpec>,
    entry: Option<Arc<dyn ExperimentEntry>>,
}

impl Experiment {
    pub fn new(
        name: impl Into<String>,
        parameters: Vec<ParamSpec>,
        entry: Option<Arc<dyn ExperimentEntry>>,
    ) -> Self {
        Self {
            name: name.into(),
            parameters,
            entry,
        }
    }

    /// A data-only experiment built from a static declaration.
    pub fn from_extracted(extracted: &ExtractedExperiment) -> Self {
        Self::new(extracted.name(), extracted.parameters(), None)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[ParamSpec] {
        &self.parameters
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name() == name)
    }

    pub fn entry(&self) -> Option<&Arc<dyn ExperimentEntry>> {
        self.entry.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.entry.is_some()
    }
}

impl fmt::Debug for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Registered experiments, keyed by unique name, in registration order.
#[derive(Debug, Default)]
pub struct ExperimentRegistry {
    experiments: Vec<Experiment>,
    by_name: HashMap<String, usize>,
}

impl ExperimentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an experiment. Nothing is stored if the name is taken.
    pub fn insert(&mut self, experiment: Experiment) -> Result<(), DeclarationError> {
        if self.by_name.contains_key(experiment.name()) {
            return Err(DeclarationError::DuplicateExperiment {
                name: experiment.name,
            });
        }
        debug!(
            experiment = %experiment.name,
            params = experiment.parameters.len(),
            bound = experiment.is_bound(),
            "Registered experiment"
        );
        self.by_name
            .insert(experiment.name.clone(), self.experiments.len());
        self.experiments.push(experiment);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Experiment> {
        self.by_name.get(name).map(|&index| &self.experiments[index])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.experiments.iter().map(Experiment::name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Experiment> {
        self.experiments.iter()
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }
}
