//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use url::Url;

use crate::load_balancer::{BalancingStrategy, StrategyError};

pub const NAME: &str = "round-robin";

/// Round-robin selector.
/// Stores a cursor that always stays within `0..targets.len()`.
#[derive(Debug)]
pub struct RoundRobin {
    targets: Vec<Url>,
    cursor: AtomicUsize,
}

impl RoundRobin {
    /// Selector over `targets`, starting at the first one.
    pub fn try_new(targets: Vec<Url>) -> Result<Self, StrategyError> {
        if targets.is_empty() {
            return Err(StrategyError::NoTargets(NAME.to_string()));
        }
        Ok(Self::new(targets))
    }

    /// `targets` must not be empty; the registry checks before calling.
    pub(crate) fn new(targets: Vec<Url>) -> Self {
        Self {
            targets,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl BalancingStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        NAME
    }

    fn targets(&self) -> &[Url] {
        &self.targets
    }

    fn next_target(&self) -> &Url {
        let len = self.targets.len();
        // Read-then-advance in a single atomic step, so concurrent callers
        // never observe the same index within one rotation.
        let index = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current + 1) % len)
            })
            .unwrap_or_else(|current| current);
        &self.targets[index]
    }
}
