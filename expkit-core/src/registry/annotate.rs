//! Annotation chain for registering experiments from Rust code.
//!
//! Annotations are applied innermost-first, the same order decorators take
//! effect:
//!
//! ```ignore
//! let chain = Annotated::bare(train)
//!     .param(ParamSpec::builder("num_epochs").default(1).build()?)?
//!     .param(ParamSpec::builder("size").options(["7b", "13b"]).build()?)?;
//! ExperimentAnnotation::new("alpaca")?.with_seed(1).apply(chain, &mut registry)?;
//! ```
//!
//! A chain moves from [`Annotated::Bare`] to [`Annotated::Params`] as
//! parameters accumulate, and is consumed when the experiment annotation
//! registers it.

use std::sync::Arc;

use crate::error::{DeclarationError, Result, SpecError};
use crate::extract::chain::{EXPERIMENT_COMBINATOR, ExperimentArgs, PARAM_COMBINATOR};
use crate::launch::ParamBundle;
use crate::param::{ParamSpec, check_name, with_implicit_seed};

use super::{Experiment, ExperimentRegistry};

/// The callable bound to a registered experiment.
pub trait ExperimentEntry: Send + Sync {
    /// Number of arguments the entry declares. Only entries taking exactly
    /// one argument (the parameter bundle) can be annotated.
    fn arity(&self) -> usize {
        1
    }

    fn call(&self, params: &ParamBundle) -> anyhow::Result<()>;
}

impl<F> ExperimentEntry for F
where
    F: Fn(&ParamBundle) -> anyhow::Result<()> + Send + Sync,
{
    fn call(&self, params: &ParamBundle) -> anyhow::Result<()> {
        self(params)
    }
}

/// An entry with parameters accumulated on it.
#[derive(Clone)]
pub struct ParamChain {
    entry: Arc<dyn ExperimentEntry>,
    params: Vec<ParamSpec>,
}

impl ParamChain {
    /// Accumulated parameters, outermost annotation first.
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }
}

/// A function under construction.
#[derive(Clone)]
pub enum Annotated {
    Bare(Arc<dyn ExperimentEntry>),
    Params(ParamChain),
}

impl Annotated {
    pub fn bare(entry: impl ExperimentEntry + 'static) -> Self {
        Annotated::Bare(Arc::new(entry))
    }

    /// Apply a parameter annotation on top of this value.
    pub fn param(self, spec: ParamSpec) -> Result<Self> {
        ParamAnnotation::new(spec).apply(self)
    }

    /// Parameters accumulated so far.
    pub fn params(&self) -> &[ParamSpec] {
        match self {
            Annotated::Bare(_) => &[],
            Annotated::Params(chain) => chain.params(),
        }
    }

    fn entry(&self) -> &Arc<dyn ExperimentEntry> {
        match self {
            Annotated::Bare(entry) => entry,
            Annotated::Params(chain) => &chain.entry,
        }
    }
}

impl std::fmt::Debug for Annotated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Annotated::Bare(_) => f.write_str("Bare"),
            Annotated::Params(chain) => f.debug_tuple("Params").field(&chain.params).finish(),
        }
    }
}

/// `param(...)`: adds one parameter to a chain.
#[derive(Debug, Clone)]
pub struct ParamAnnotation {
    spec: ParamSpec,
}

impl ParamAnnotation {
    pub fn new(spec: ParamSpec) -> Self {
        Self { spec }
    }

    /// Apply to `target`. A repeated name is accepted only when both
    /// definitions are identical, in which case they collapse into one.
    pub fn apply(self, target: Annotated) -> Result<Annotated> {
        match target {
            Annotated::Bare(entry) => {
                check_arity(PARAM_COMBINATOR, entry.as_ref())?;
                Ok(Annotated::Params(ParamChain {
                    entry,
                    params: vec![self.spec],
                }))
            }
            Annotated::Params(mut chain) => {
                match chain.params.iter().find(|p| p.name() == self.spec.name()) {
                    Some(existing) if *existing == self.spec => {}
                    Some(_) => {
                        return Err(SpecError::DuplicateParam {
                            name: self.spec.name().to_string(),
                        }
                        .into());
                    }
                    // outer annotations are written above inner ones
                    None => chain.params.insert(0, self.spec),
                }
                Ok(Annotated::Params(chain))
            }
        }
    }
}

/// `experiment(name, seed=...)`: registers a chain under a name.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentAnnotation {
    name: String,
    seed: Option<i64>,
}

impl ExperimentAnnotation {
    pub fn new(name: impl Into<String>) -> std::result::Result<Self, SpecError> {
        let name = name.into();
        check_name(&name)?;
        Ok(Self { name, seed: None })
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn from_args(args: ExperimentArgs) -> std::result::Result<Self, SpecError> {
        let mut annotation = Self::new(args.name)?;
        annotation.seed = args.seed;
        Ok(annotation)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn seed(&self) -> Option<i64> {
        self.seed
    }

    /// Bind `target` as the experiment's entry and register it.
    ///
    /// The implicit `seed` parameter is placed first unless the chain
    /// declares its own `seed`, in which case the annotation's seed is
    /// ignored.
    pub fn apply(self, target: Annotated, registry: &mut ExperimentRegistry) -> Result<()> {
        check_arity(EXPERIMENT_COMBINATOR, target.entry().as_ref())?;
        let (entry, declared) = match target {
            Annotated::Bare(entry) => (entry, Vec::new()),
            Annotated::Params(chain) => (chain.entry, chain.params),
        };
        let parameters = with_implicit_seed(self.seed, declared);
        registry.insert(Experiment::new(self.name, parameters, Some(entry)))?;
        Ok(())
    }
}

fn check_arity(combinator: &str, entry: &dyn ExperimentEntry) -> std::result::Result<(), DeclarationError> {
    match entry.arity() {
        1 => Ok(()),
        arity => Err(DeclarationError::BadArity {
            combinator: combinator.to_string(),
            arity,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExpkitError;
    use crate::param::{ParamValue, SEED_PARAM};

    fn noop(_: &ParamBundle) -> anyhow::Result<()> {
        Ok(())
    }

    struct TwoArgs;

    impl ExperimentEntry for TwoArgs {
        fn arity(&self) -> usize {
            2
        }

        fn call(&self, _: &ParamBundle) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn spec(name: &str, default: i64) -> ParamSpec {
        ParamSpec::builder(name).default(default).build().unwrap()
    }

    #[test]
    fn test_bare_experiment_gets_required_seed() {
        let mut registry = ExperimentRegistry::new();
        ExperimentAnnotation::new("plain")
            .unwrap()
            .apply(Annotated::bare(noop), &mut registry)
            .unwrap();

        let experiment = registry.get("plain").unwrap();
        assert!(experiment.is_bound());
        let seed = experiment.param(SEED_PARAM).unwrap();
        assert!(seed.required());
        assert_eq!(seed.default(), Some(&ParamValue::Int(42)));
    }

    #[test]
    fn test_params_keep_written_order() {
        // @experiment("ordered", seed=3) / @param("a") / @param("b")
        let chain = Annotated::bare(noop)
            .param(spec("b", 2))
            .unwrap()
            .param(spec("a", 1))
            .unwrap();
        let mut registry = ExperimentRegistry::new();
        ExperimentAnnotation::new("ordered")
            .unwrap()
            .with_seed(3)
            .apply(chain, &mut registry)
            .unwrap();

        let names: Vec<&str> = registry
            .get("ordered")
            .unwrap()
            .parameters()
            .iter()
            .map(|p| p.name())
            .collect();
        assert_eq!(names, vec!["seed", "a", "b"]);
        let seed = registry.get("ordered").unwrap().param("seed").unwrap();
        assert_eq!(seed.default(), Some(&ParamValue::Int(3)));
        assert!(!seed.required());
    }

    #[test]
    fn test_explicit_seed_param_wins() {
        let chain = Annotated::bare(noop).param(spec("seed", 9)).unwrap();
        let mut registry = ExperimentRegistry::new();
        ExperimentAnnotation::new("seeded")
            .unwrap()
            .with_seed(3)
            .apply(chain, &mut registry)
            .unwrap();

        let params = registry.get("seeded").unwrap().parameters();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].default(), Some(&ParamValue::Int(9)));
    }

    #[test]
    fn test_identical_duplicate_param_collapses() {
        let chain = Annotated::bare(noop)
            .param(spec("lr", 1))
            .unwrap()
            .param(spec("lr", 1))
            .unwrap();
        assert_eq!(chain.params().len(), 1);
    }

    #[test]
    fn test_conflicting_duplicate_param_rejected() {
        let err = Annotated::bare(noop)
            .param(spec("lr", 1))
            .unwrap()
            .param(spec("lr", 2))
            .unwrap_err();
        assert!(matches!(
            err,
            ExpkitError::Spec(SpecError::DuplicateParam { name }) if name == "lr"
        ));
    }

    #[test]
    fn test_bad_arity_rejected() {
        let err = Annotated::Bare(Arc::new(TwoArgs))
            .param(spec("lr", 1))
            .unwrap_err();
        assert!(matches!(
            err,
            ExpkitError::Declaration(DeclarationError::BadArity { arity: 2, .. })
        ));

        let mut registry = ExperimentRegistry::new();
        let err = ExperimentAnnotation::new("x")
            .unwrap()
            .apply(Annotated::Bare(Arc::new(TwoArgs)), &mut registry)
            .unwrap_err();
        assert!(matches!(
            err,
            ExpkitError::Declaration(DeclarationError::BadArity { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_experiment_not_partially_registered() {
        let mut registry = ExperimentRegistry::new();
        ExperimentAnnotation::new("x")
            .unwrap()
            .apply(Annotated::bare(noop), &mut registry)
            .unwrap();

        let chain = Annotated::bare(noop).param(spec("lr", 1)).unwrap();
        let err = ExperimentAnnotation::new("x")
            .unwrap()
            .apply(chain, &mut registry)
            .unwrap_err();
        assert!(matches!(
            err,
            ExpkitError::Declaration(DeclarationError::DuplicateExperiment { .. })
        ));
        assert!(registry.get("x").unwrap().param("lr").is_none());
    }

    #[test]
    fn test_invalid_experiment_name() {
        assert!(matches!(
            ExperimentAnnotation::new("a".repeat(21)),
            Err(SpecError::NameLength { .. })
        ));
        assert!(matches!(
            ExperimentAnnotation::new("1st"),
            Err(SpecError::NamePattern { .. })
        ));
    }
}
