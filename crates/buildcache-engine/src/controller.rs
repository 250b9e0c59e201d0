//! Per-module execution control
//!
//! A [`ModuleCacheSession`] accompanies one module through the build. It
//! carries the module's cache decision and intercepts every step: a step
//! covered by a usable record is not executed, a run-always step executes
//! regardless, a step missing from the record either skips (when
//! configured ignorable) or executes. Executed steps are recorded in order
//! so a successful miss can be captured into a new build record.
//!
//! State machine per module:
//! UNDECIDED → SCANNED → LOOKED_UP → {HIT, MISS} → EXECUTED →
//! {SAVED, SAVE_SKIPPED} → DONE. A restore failure downgrades HIT to MISS;
//! an integrity failure aborts the build.

use crate::context::{BuildStep, ModuleBuildContext, ModuleCompletion, StepReport};
use crate::fingerprint::ProjectFingerprinter;
use buildcache_core::config::CacheConfig;
use buildcache_core::hash::Fingerprint;
use buildcache_core::model::{
    ArtifactEntry, BuildRecord, RecordSource, StepExecutionRecord, UpstreamModule,
    CACHE_IMPLEMENTATION_VERSION, SCHEMA_VERSION,
};
use buildcache_core::{Error, Result};
use buildcache_store::repository::{CacheRepository, ProducedArtifact, SaveOutcome, SaveReceipt};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Lifecycle state of a module within the cache.
///
/// The states before `Hit`/`Miss` are traversed inside
/// `CacheEngine::begin_module`; a session handed to the driver is already
/// decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Undecided,
    Scanned,
    LookedUp,
    Hit,
    Miss,
    Executed,
    Saved,
    SaveSkipped,
    Done,
}

/// How the cache handled one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Covered by the record; not executed, outputs restored
    Restored,
    /// Absent from the record but configured ignorable; not executed
    Skipped,
    /// Executed by the driver
    Executed,
}

/// Cache companion of one module build.
///
/// Driven by a single thread: the driver calls [`Self::around_step`] for
/// every step in order, then hands the session back to the engine on
/// module completion.
pub struct ModuleCacheSession {
    ctx: ModuleBuildContext,
    config: Arc<CacheConfig>,
    repository: Arc<CacheRepository>,
    state: ModuleState,
    /// Ineligible modules (failed scan, ineligible upstream) never save
    eligible: bool,
    fingerprint: Option<Fingerprint>,
    upstream: Vec<UpstreamModule>,
    record: Option<BuildRecord>,
    restored: bool,
    executed_steps: Vec<StepExecutionRecord>,
}

impl ModuleCacheSession {
    pub(crate) fn for_hit(
        ctx: ModuleBuildContext,
        config: Arc<CacheConfig>,
        repository: Arc<CacheRepository>,
        fingerprint: Fingerprint,
        upstream: Vec<UpstreamModule>,
        record: BuildRecord,
    ) -> Self {
        Self {
            ctx,
            config,
            repository,
            state: ModuleState::Hit,
            eligible: true,
            fingerprint: Some(fingerprint),
            upstream,
            record: Some(record),
            restored: false,
            executed_steps: Vec::new(),
        }
    }

    pub(crate) fn for_miss(
        ctx: ModuleBuildContext,
        config: Arc<CacheConfig>,
        repository: Arc<CacheRepository>,
        fingerprint: Fingerprint,
        upstream: Vec<UpstreamModule>,
    ) -> Self {
        Self {
            ctx,
            config,
            repository,
            state: ModuleState::Miss,
            eligible: true,
            fingerprint: Some(fingerprint),
            upstream,
            record: None,
            restored: false,
            executed_steps: Vec::new(),
        }
    }

    pub(crate) fn ineligible(
        ctx: ModuleBuildContext,
        config: Arc<CacheConfig>,
        repository: Arc<CacheRepository>,
    ) -> Self {
        Self {
            ctx,
            config,
            repository,
            state: ModuleState::Miss,
            eligible: false,
            fingerprint: None,
            upstream: Vec::new(),
            record: None,
            restored: false,
            executed_steps: Vec::new(),
        }
    }

    #[must_use]
    pub fn module_context(&self) -> &ModuleBuildContext {
        &self.ctx
    }

    #[must_use]
    pub fn state(&self) -> ModuleState {
        self.state
    }

    #[must_use]
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    #[must_use]
    pub fn is_hit(&self) -> bool {
        self.state == ModuleState::Hit
    }

    /// Restore every artifact of the usable record into the output
    /// directory. Returns `false` after downgrading the module to a miss
    /// when an artifact is unavailable.
    ///
    /// # Errors
    ///
    /// A digest mismatch aborts the build with an integrity error.
    pub fn ensure_restored(&mut self) -> Result<bool> {
        if self.restored {
            return Ok(true);
        }
        let Some(record) = self.record.clone() else {
            return Ok(false);
        };
        let output_dir = self.ctx.output_dir();
        let restore_generated = self.config.is_restore_generated_sources();
        for entry in &record.artifacts {
            if !restore_generated && entry.file_name.starts_with("generated-") {
                debug!(artifact = %entry.file_name, "generated sources restore disabled; skipping");
                continue;
            }
            let target = join_relative(&output_dir, &entry.file_name);
            match self.repository.restore_artifact(&record, entry, &target) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(module = %self.ctx.id, artifact = %entry.file_name,
                        "artifact unavailable; module downgraded to a full build");
                    self.downgrade();
                    return Ok(false);
                }
                Err(e @ Error::Integrity { .. }) => return Err(e),
                Err(e) => {
                    warn!(module = %self.ctx.id, artifact = %entry.file_name, error = %e,
                        "artifact restore failed; module downgraded to a full build");
                    self.downgrade();
                    return Ok(false);
                }
            }
        }
        self.restored = true;
        Ok(true)
    }

    fn downgrade(&mut self) {
        self.record = None;
        self.restored = false;
        self.state = ModuleState::Miss;
    }

    /// The hook the driver wraps around every step invocation.
    ///
    /// The outer `Result` carries fatal cache failures (integrity); the
    /// inner one is the driver's own step result, passed through unchanged.
    pub fn around_step<E>(
        &mut self,
        step: &BuildStep,
        run: impl FnOnce() -> std::result::Result<StepReport, E>,
    ) -> Result<std::result::Result<StepOutcome, E>> {
        let step_id = step.step_id();

        if self.config.is_forced_execution(&step_id) {
            debug!(module = %self.ctx.id, step = %step.plugin, goal = %step.goal,
                "step configured runAlways; executing");
            return self.execute_step(step, run);
        }

        if self.state == ModuleState::Hit {
            let recorded = self
                .record
                .as_ref()
                .is_some_and(|r| r.find_step(&step.plugin, &step.execution_id, &step.goal).is_some());
            if recorded {
                if self.ensure_restored()? {
                    debug!(module = %self.ctx.id, step = %step.plugin, goal = %step.goal,
                        "step satisfied from cache");
                    return Ok(Ok(StepOutcome::Restored));
                }
                // restore failure downgraded the module; execute instead
            } else if self.config.can_ignore_missing(&step_id) {
                debug!(module = %self.ctx.id, step = %step.plugin, goal = %step.goal,
                    "step not in record but ignorable; skipping");
                return Ok(Ok(StepOutcome::Skipped));
            }
        }

        self.execute_step(step, run)
    }

    fn execute_step<E>(
        &mut self,
        step: &BuildStep,
        run: impl FnOnce() -> std::result::Result<StepReport, E>,
    ) -> Result<std::result::Result<StepOutcome, E>> {
        match run() {
            Ok(report) => {
                let record = self.record_step(step, &report);
                self.executed_steps.push(record);
                Ok(Ok(StepOutcome::Executed))
            }
            // the driver's failure is not ours to translate
            Err(e) => Ok(Err(e)),
        }
    }

    fn record_step(&self, step: &BuildStep, report: &StepReport) -> StepExecutionRecord {
        let step_id = step.step_id();
        let fingerprinter = ProjectFingerprinter::new(&self.config);
        let configuration_digest = fingerprinter.plugin_configuration_digest(
            &step.plugin.group_id,
            &step.plugin.artifact_id,
            &step.configuration,
        );

        let mut tracked = BTreeMap::new();
        let mut observed = BTreeMap::new();
        let mut nolog: BTreeSet<&str> = BTreeSet::new();
        if let Some(rule) = self.config.reconciliation_for(&step_id) {
            for t in &rule.reconciles.reconcile {
                if let Some(value) = report.properties.get(&t.property_name) {
                    tracked.insert(t.property_name.clone(), value.clone());
                }
            }
            for logged in &rule.logs.log {
                if let Some(value) = report.properties.get(logged) {
                    observed.insert(logged.clone(), value.clone());
                }
            }
            nolog = rule.nologs.nolog.iter().map(String::as_str).collect();
        }
        if self.config.is_log_all_properties(&step_id) {
            for (key, value) in &report.properties {
                if !tracked.contains_key(key)
                    && !observed.contains_key(key)
                    && !nolog.contains(key.as_str())
                {
                    observed.insert(key.clone(), value.clone());
                }
            }
        }

        StepExecutionRecord {
            plugin: step.plugin.clone(),
            execution_id: step.execution_id.clone(),
            goal: step.goal.clone(),
            configuration_digest,
            tracked_properties: tracked,
            observed_properties: observed,
        }
    }

    /// The step records reconciliation compares against the baseline:
    /// what actually ran, or the restored record's steps on a full hit
    #[must_use]
    pub fn current_steps(&self) -> &[StepExecutionRecord] {
        if self.executed_steps.is_empty() {
            self.record.as_ref().map_or(&[], |r| &r.steps)
        } else {
            &self.executed_steps
        }
    }

    /// Capture a successful miss into a new record and save it.
    ///
    /// Returns `None` when nothing was saved (hit, failure, or ineligible
    /// module). The local store is bounded afterwards, sparing every
    /// fingerprint in `in_use`.
    pub(crate) fn save_if_miss(
        &mut self,
        completion: &ModuleCompletion,
        in_use: &HashSet<String>,
    ) -> Result<Option<(BuildRecord, SaveReceipt)>> {
        match self.state {
            ModuleState::Hit => {
                self.state = ModuleState::Done;
                return Ok(None);
            }
            ModuleState::Miss => {}
            _ => return Ok(None),
        }
        if !completion.success {
            debug!(module = %self.ctx.id, "module failed; nothing to save");
            self.state = ModuleState::Done;
            return Ok(None);
        }
        self.state = ModuleState::Executed;
        let (Some(fingerprint), true) = (self.fingerprint.clone(), self.eligible) else {
            debug!(module = %self.ctx.id, "module ineligible for caching; skipping save");
            self.state = ModuleState::Done;
            return Ok(None);
        };

        let produced = match self.collect_artifacts(completion) {
            Ok(produced) => produced,
            Err(e) => {
                warn!(module = %self.ctx.id, error = %e,
                    "could not capture produced artifacts; save skipped");
                self.state = ModuleState::SaveSkipped;
                return Ok(None);
            }
        };
        let record = BuildRecord {
            schema_version: SCHEMA_VERSION.to_string(),
            implementation_version: CACHE_IMPLEMENTATION_VERSION.to_string(),
            module: self.ctx.id.clone(),
            fingerprint,
            timestamp: Utc::now(),
            source: RecordSource::Local,
            steps: self.executed_steps.clone(),
            artifacts: produced.iter().map(|p| p.entry.clone()).collect(),
            upstream: self.upstream.clone(),
        };
        let receipt = self.repository.save_build(&record, &produced)?;
        self.state = match receipt.local {
            SaveOutcome::Saved => ModuleState::Saved,
            SaveOutcome::AlreadyPresent | SaveOutcome::Skipped => ModuleState::SaveSkipped,
        };
        if let Some(max) = self.config.max_local_builds_cached() {
            self.repository.enforce_local_limit(max, in_use)?;
        }
        Ok(Some((record, receipt)))
    }

    pub(crate) fn mark_done(&mut self) {
        self.state = ModuleState::Done;
    }

    /// Driver-declared artifacts plus everything under the configured
    /// attached-output directories, minus the exclusion patterns
    fn collect_artifacts(&self, completion: &ModuleCompletion) -> Result<Vec<ProducedArtifact>> {
        let algorithm = self.config.algorithm();
        let mut produced = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();

        for artifact in &completion.artifacts {
            if self.config.is_output_excluded(&artifact.relative_path) {
                debug!(artifact = %artifact.relative_path, "artifact excluded from record");
                continue;
            }
            if !seen.insert(artifact.relative_path.clone()) {
                continue;
            }
            let (digest, size_bytes) = algorithm.hash_file(&artifact.file).map_err(into_store_read)?;
            produced.push(ProducedArtifact {
                entry: ArtifactEntry {
                    file_name: artifact.relative_path.clone(),
                    classifier: artifact.classifier.clone(),
                    extension: artifact.extension.clone(),
                    digest,
                    size_bytes,
                },
                file: artifact.file.clone(),
            });
        }

        let output_dir = self.ctx.output_dir();
        for dir_name in self.config.attached_output_dirs() {
            let root = output_dir.join(dir_name);
            if !root.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&output_dir) else {
                    continue;
                };
                let rel_str = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if self.config.is_output_excluded(&rel_str) || !seen.insert(rel_str.clone()) {
                    continue;
                }
                let (digest, size_bytes) =
                    algorithm.hash_file(entry.path()).map_err(into_store_read)?;
                let extension = entry
                    .path()
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_default();
                produced.push(ProducedArtifact {
                    entry: ArtifactEntry {
                        file_name: rel_str,
                        classifier: Some(dir_name.clone()),
                        extension,
                        digest,
                        size_bytes,
                    },
                    file: entry.path().to_path_buf(),
                });
            }
        }
        Ok(produced)
    }
}

/// Produced files are outputs, not inputs; a read failure while capturing
/// them is a store-side problem and downgrades the save, not the build.
fn into_store_read(e: Error) -> Error {
    match e {
        Error::InputIo {
            source,
            path,
            operation,
        } => Error::store_io(source, path.display().to_string(), operation),
        other => other,
    }
}

fn join_relative(base: &Path, relative: &str) -> std::path::PathBuf {
    let mut path = base.to_path_buf();
    for part in relative.split('/').filter(|p| !p.is_empty()) {
        path.push(part);
    }
    path
}
