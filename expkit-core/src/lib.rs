//! # Expkit Core
//!
//! Core library for declaring and launching parameterized experiments.
//! Provides the parameter model, the static declaration extractor, the
//! runtime annotation registry, the launch dispatcher, and configuration.

pub mod config;
pub mod error;
pub mod extract;
pub mod launch;
pub mod param;
pub mod registry;

// Re-export commonly used types at the crate root.
pub use config::{ConfigOverrides, ProjectConfig, load_config};
pub use error::{
    ConfigError, DeclarationError, DispatchError, ExpkitError, ExtractError, Result, SpecError,
};
pub use extract::{ExperimentDecl, ExtractedExperiment, Extractor, SkipReason, SkippedDeclaration};
pub use launch::{ClusterEnv, LaunchRequest, Launcher, ParamBundle, RunContext, dispatch};
pub use param::{ParamArgs, ParamSpec, ParamSpecBuilder, ParamType, ParamValue};
pub use registry::{
    Annotated, DeclarationSource, EntryTable, Experiment, ExperimentAnnotation, ExperimentEntry,
    ExperimentRegistry, NativeSource, ParamAnnotation, ScriptSource,
};
