//! Restore decision
//!
//! A found record is not automatically usable: it must have been produced
//! under the current hash algorithm and cache implementation version, and
//! it must carry a value for every tracked property a reconciliation rule
//! demands. The decision is made once per module and is final.

use buildcache_core::config::{CacheConfig, StepId};
use buildcache_core::model::{BuildRecord, CACHE_IMPLEMENTATION_VERSION};
use std::fmt;
use tracing::debug;

/// Why a record was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    AlgorithmMismatch { recorded: String, current: String },
    VersionMismatch { recorded: String, current: String },
    MissingTrackedProperty { step: String, property: String },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlgorithmMismatch { recorded, current } => write!(
                f,
                "record was hashed with {recorded}, this session uses {current}"
            ),
            Self::VersionMismatch { recorded, current } => write!(
                f,
                "record was produced by cache implementation {recorded}, this is {current}"
            ),
            Self::MissingTrackedProperty { step, property } => write!(
                f,
                "step {step} does not record tracked property '{property}'"
            ),
        }
    }
}

/// Outcome of evaluating a candidate record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreDecision {
    Usable,
    Rejected(RejectionReason),
}

impl RestoreDecision {
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Usable)
    }
}

/// Decides whether a found record may substitute for a build
pub struct RestoreDecider<'a> {
    config: &'a CacheConfig,
}

impl<'a> RestoreDecider<'a> {
    #[must_use]
    pub fn new(config: &'a CacheConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn evaluate(&self, record: &BuildRecord) -> RestoreDecision {
        let current = self.config.algorithm();
        if record.fingerprint.algorithm() != current {
            return RestoreDecision::Rejected(RejectionReason::AlgorithmMismatch {
                recorded: record.fingerprint.algorithm().id().to_string(),
                current: current.id().to_string(),
            });
        }
        if record.implementation_version != CACHE_IMPLEMENTATION_VERSION {
            return RestoreDecision::Rejected(RejectionReason::VersionMismatch {
                recorded: record.implementation_version.clone(),
                current: CACHE_IMPLEMENTATION_VERSION.to_string(),
            });
        }
        for step in &record.steps {
            let step_id = StepId {
                group_id: &step.plugin.group_id,
                artifact_id: &step.plugin.artifact_id,
                execution_id: &step.execution_id,
                goal: &step.goal,
            };
            let Some(rule) = self.config.reconciliation_for(&step_id) else {
                continue;
            };
            for tracked in &rule.reconciles.reconcile {
                if !step.tracked_properties.contains_key(&tracked.property_name) {
                    debug!(
                        step = %step.plugin,
                        property = %tracked.property_name,
                        "record rejected: tracked property missing"
                    );
                    return RestoreDecision::Rejected(RejectionReason::MissingTrackedProperty {
                        step: format!("{}:{}", step.plugin, step.goal),
                        property: tracked.property_name.clone(),
                    });
                }
            }
        }
        RestoreDecision::Usable
    }
}
