//! Random load balancing strategy.

use url::Url;

use crate::load_balancer::{BalancingStrategy, StrategyError};

pub const NAME: &str = "random";

/// Picks a target uniformly at random on every call.
#[derive(Debug)]
pub struct Random {
    targets: Vec<Url>,
}

impl Random {
    pub fn try_new(targets: Vec<Url>) -> Result<Self, StrategyError> {
        if targets.is_empty() {
            return Err(StrategyError::NoTargets(NAME.to_string()));
        }
        Ok(Self::new(targets))
    }

    /// `targets` must not be empty; the registry checks before calling.
    pub(crate) fn new(targets: Vec<Url>) -> Self {
        Self { targets }
    }
}

impl BalancingStrategy for Random {
    fn name(&self) -> &'static str {
        NAME
    }

    fn targets(&self) -> &[Url] {
        &self.targets
    }

    fn next_target(&self) -> &Url {
        &self.targets[fastrand::usize(..self.targets.len())]
    }
}
