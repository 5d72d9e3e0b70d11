//! The resolved parameter bundle handed to an experiment entry.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::DispatchError;
use crate::param::ParamValue;

/// Placement of this process within a distributed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClusterEnv {
    pub rank: u32,
    pub world_size: u32,
    pub local_rank: u32,
}

impl Default for ClusterEnv {
    fn default() -> Self {
        Self {
            rank: 0,
            world_size: 1,
            local_rank: 0,
        }
    }
}

impl ClusterEnv {
    /// Read `RANK`, `WORLD_SIZE` and `LOCAL_RANK` from the process environment.
    pub fn from_env() -> Result<Self, DispatchError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the cluster variables through `lookup`. Absent variables take
    /// their single-process defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DispatchError> {
        let defaults = Self::default();
        let read = |key: &str, default: u32| -> Result<u32, DispatchError> {
            match lookup(key) {
                None => Ok(default),
                Some(raw) => raw.trim().parse().map_err(|_| DispatchError::InvalidArguments {
                    reason: format!("{key}={raw:?} is not a non-negative integer"),
                }),
            }
        };
        Ok(Self {
            rank: read("RANK", defaults.rank)?,
            world_size: read("WORLD_SIZE", defaults.world_size)?,
            local_rank: read("LOCAL_RANK", defaults.local_rank)?,
        })
    }
}

/// Fields injected into every bundle alongside the declared parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunContext {
    pub experiment_name: String,
    pub project_name: String,
    pub run_name: String,
    pub rank: u32,
    pub world_size: u32,
    pub local_rank: u32,
}

/// Concrete parameter values for one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamBundle {
    context: RunContext,
    params: BTreeMap<String, ParamValue>,
}

impl ParamBundle {
    pub fn new(context: RunContext, params: BTreeMap<String, ParamValue>) -> Self {
        Self { context, params }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn experiment_name(&self) -> &str {
        &self.context.experiment_name
    }

    pub fn run_name(&self) -> &str {
        &self.context.run_name
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParamValue::as_str)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ParamValue::as_int)
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ParamValue::as_float)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(ParamValue::as_bool)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// Parameter values sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}
