//! Process-wide decision handle injected into every session

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{
    decide, to_relative, DecisionSource, Direction, Heuristic, MlpPolicy, Observation,
    PolicyError, SteerAction,
};
use crate::util::time::Timer;

/// Chooses between the learned policy and the heuristic.
///
/// Whether a policy is present is fixed at construction. A policy that errors
/// or panics at inference time is retired for the rest of the process
/// lifetime and the heuristic takes over.
pub struct Decider {
    policy: Option<Arc<dyn DecisionSource>>,
    degraded: AtomicBool,
    budget: Duration,
}

impl Decider {
    /// Heuristic only
    pub fn heuristic(budget: Duration) -> Self {
        Self {
            policy: None,
            degraded: AtomicBool::new(false),
            budget,
        }
    }

    pub fn with_policy(policy: Arc<dyn DecisionSource>, budget: Duration) -> Self {
        Self {
            policy: Some(policy),
            degraded: AtomicBool::new(false),
            budget,
        }
    }

    /// Load the learned policy if one is configured.
    ///
    /// Any load failure is logged here, once, and leaves the heuristic in
    /// charge.
    pub fn load(model_path: Option<&Path>, budget: Duration) -> Self {
        let Some(path) = model_path else {
            info!("No MODEL_PATH configured, serving heuristic decisions");
            return Self::heuristic(budget);
        };

        match MlpPolicy::from_path(path) {
            Ok(policy) => {
                info!(
                    path = %path.display(),
                    layers = policy.layer_count(),
                    "Learned policy loaded"
                );
                Self::with_policy(Arc::new(policy), budget)
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Policy unavailable, falling back to heuristic for this process"
                );
                Self::heuristic(budget)
            }
        }
    }

    /// Label of the source currently producing decisions
    pub fn source_name(&self) -> &'static str {
        match self.active_policy() {
            Some(policy) => policy.name(),
            None => Heuristic.name(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Decision with policy inference moved to the blocking pool and bounded
    /// by the decision budget.
    ///
    /// An overrun only costs that tick: the heuristic answers and the policy
    /// keeps serving. Errors and panics inside the policy retire it.
    pub async fn decide_within(&self, observation: &Observation, facing: Direction) -> SteerAction {
        let Some(policy) = self.active_policy().cloned() else {
            return decide(observation, facing);
        };

        let timer = Timer::new();
        let window = *observation;
        let inference = tokio::task::spawn_blocking(move || policy.predict(&window));

        let intended = match tokio::time::timeout(self.budget, inference).await {
            Ok(Ok(Ok(dir))) => {
                debug!(latency_us = timer.elapsed_micros(), "Policy decision");
                dir
            }
            Ok(Ok(Err(e))) => {
                self.degrade(&e);
                Heuristic.intent(observation)
            }
            Ok(Err(join_err)) => {
                self.degrade(&PolicyError::Inference(join_err.to_string()));
                Heuristic.intent(observation)
            }
            Err(_) => {
                debug!(
                    error = %PolicyError::Timeout(self.budget),
                    "Policy over budget, heuristic answers this tick"
                );
                Heuristic.intent(observation)
            }
        };

        to_relative(intended, facing)
    }

    fn active_policy(&self) -> Option<&Arc<dyn DecisionSource>> {
        if self.is_degraded() {
            return None;
        }
        self.policy.as_ref()
    }

    /// Retire the policy; only the first failure is logged
    fn degrade(&self, error: &PolicyError) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!(
                error = %error,
                "Policy failed at inference, falling back to heuristic for this process"
            );
        }
    }
}
