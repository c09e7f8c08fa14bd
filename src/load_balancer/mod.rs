//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Service endpoint resolved with `urls` + strategy name
//!     → StrategyRegistry::build (name → factory)
//!     → Box<dyn BalancingStrategy> owned by one proxy policy
//!     → next_target() on every dispatched request:
//!         - round_robin.rs (rotate through backends)
//!         - random.rs (uniform pick)
//! ```
//!
//! # Design Decisions
//! - One strategy instance per service endpoint per policy; never shared
//! - Unknown strategy names fail at construction, never at dispatch
//! - No health filtering: a failed pick is not skipped

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use url::Url;

pub mod random;
pub mod round_robin;

pub use random::Random;
pub use round_robin::RoundRobin;

/// Strategy used when an endpoint does not name one.
pub const DEFAULT_STRATEGY: &str = "round-robin";

/// Selects the next backend from a fixed, non-empty list of targets.
pub trait BalancingStrategy: Send + Sync + fmt::Debug {
    /// Registry name of this strategy.
    fn name(&self) -> &'static str;

    /// The ordered targets captured at construction.
    fn targets(&self) -> &[Url];

    /// Pick the target for the next request.
    fn next_target(&self) -> &Url;
}

/// Errors raised while building a strategy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StrategyError {
    #[error("unknown balancing strategy '{0}'")]
    Unknown(String),
    #[error("balancing strategy '{0}' needs at least one target")]
    NoTargets(String),
}

type StrategyFactory = Arc<dyn Fn(Vec<Url>) -> Box<dyn BalancingStrategy> + Send + Sync>;

/// Open registry mapping strategy names to factories.
#[derive(Clone)]
pub struct StrategyRegistry {
    factories: HashMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register (or replace) a strategy under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(Vec<Url>) -> Box<dyn BalancingStrategy> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build the strategy `name` over `targets`.
    pub fn build(
        &self,
        name: &str,
        targets: Vec<Url>,
    ) -> Result<Box<dyn BalancingStrategy>, StrategyError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| StrategyError::Unknown(name.to_string()))?;
        if targets.is_empty() {
            return Err(StrategyError::NoTargets(name.to_string()));
        }
        Ok(factory(targets))
    }
}

impl Default for StrategyRegistry {
    /// Registry with the built-in strategies.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register(round_robin::NAME, |targets| Box::new(RoundRobin::new(targets)))
            .register(random::NAME, |targets| Box::new(Random::new(targets)));
        registry
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("StrategyRegistry")
            .field("strategies", &names)
            .finish()
    }
}
