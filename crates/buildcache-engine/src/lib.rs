//! Caching engine for a module-oriented build tool
//!
//! For each module in the reactor the engine computes a content
//! fingerprint over everything that affects its build (sources, effective
//! descriptor, plugin configurations, upstream fingerprints), looks up a
//! previously produced build record under that fingerprint, and either
//! restores the recorded artifacts in place of executing the build steps
//! or lets the build run and captures its outputs afterwards.
//!
//! The build driver integrates through four calls:
//!
//! 1. [`session::initialize`] once per build,
//! 2. [`session::CacheEngine::begin_module`] before a module's first step,
//! 3. [`controller::ModuleCacheSession::around_step`] around every step,
//! 4. [`session::CacheEngine::on_module_complete`] and
//!    [`session::CacheEngine::on_build_complete`] afterwards.

pub mod context;
pub mod controller;
pub mod decider;
pub mod descriptor;
pub mod fingerprint;
pub mod reconcile;
pub mod report;
pub mod scanner;
pub mod session;

pub use context::{
    BuildStep, DriverSession, ExecutionDescriptor, ModuleArtifact, ModuleBuildContext,
    ModuleCompletion, PluginDescriptor, StepReport,
};
pub use controller::{ModuleCacheSession, ModuleState, StepOutcome};
pub use decider::{RestoreDecider, RestoreDecision};
pub use fingerprint::{FingerprintIndex, ProjectFingerprinter};
pub use reconcile::{BaselineSource, Reconciler};
pub use scanner::InputScanner;
pub use session::{initialize, CacheEngine, CacheState, ModuleSummary};
