//! Cache lifecycle and driver surface
//!
//! [`initialize`] reads the configuration and either disables the cache
//! for the session or returns a [`CacheEngine`] handle the driver threads
//! share. Per module, the driver asks for a [`ModuleCacheSession`] before
//! the first step, wraps every step in
//! [`ModuleCacheSession::around_step`], and reports completion through
//! [`CacheEngine::on_module_complete`]. [`CacheEngine::on_build_complete`]
//! writes the project index and releases pooled remote sessions.

use crate::context::{DriverSession, ModuleBuildContext, ModuleCompletion};
use crate::controller::{ModuleCacheSession, ModuleState};
use crate::decider::RestoreDecider;
use crate::descriptor::canonicalize_descriptor;
use crate::fingerprint::{FingerprintIndex, ProjectFingerprinter};
use crate::reconcile::{BaselineSource, Reconciler};
use crate::report::Reporter;
use crate::scanner::{warn_degraded, InputScanner};
use buildcache_core::config::{CacheConfig, CacheConfigDocument, CacheProperties, DEFAULT_CONFIG_LOCATION};
use buildcache_core::hash::Fingerprint;
use buildcache_core::model::{DiffReport, ModuleId, ProjectIndex, DIFF_FILE};
use buildcache_core::{xml, Error, Result};
use buildcache_store::repository::{record_path, CacheRepository};
use buildcache_store::{
    FileTransport, LocalBlobStore, RemoteBlobStore, Transport, TransportFactory, TransportSettings,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, info_span, warn};

/// Result of initializing the cache for a build session
#[derive(Debug)]
pub enum CacheState {
    /// The user or the configuration disabled caching; every later call
    /// is a no-op
    Disabled,
    Initialized(CacheEngine),
}

impl CacheState {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Initialized(_))
    }

    /// The engine handle, or [`Error::Disabled`]
    pub fn engine(&self) -> Result<&CacheEngine> {
        match self {
            Self::Initialized(engine) => Ok(engine),
            Self::Disabled => Err(Error::Disabled),
        }
    }
}

/// Read the configuration and build the engine for this session.
///
/// The configuration file is looked up at
/// `<multimodule_root>/.mvn/maven-cache-config.xml` unless the
/// `remote.cache.configPath` property points elsewhere. A missing file
/// enables the cache with defaults; an unreadable or malformed file is a
/// fatal configuration error.
pub fn initialize(session: &DriverSession) -> Result<CacheState> {
    let properties =
        CacheProperties::from_maps(&session.user_properties, &session.system_properties);
    if !properties.is_enabled() {
        info!("cache disabled by property; project will be built fully and not cached");
        return Ok(CacheState::Disabled);
    }

    let config_path = properties
        .config_path
        .clone()
        .unwrap_or_else(|| session.multimodule_root.join(DEFAULT_CONFIG_LOCATION));
    let document = if config_path.is_file() {
        info!(path = %config_path.display(), "loading cache configuration");
        let bytes = std::fs::read(&config_path).map_err(|e| {
            Error::configuration(format!(
                "cannot read cache configuration {}: {e}",
                config_path.display()
            ))
        })?;
        CacheConfigDocument::from_xml(&bytes)?
    } else {
        info!(path = %config_path.display(),
            "cache configuration not found; cache enabled with defaults");
        CacheConfigDocument::default()
    };

    let config = CacheConfig::from_document(document, properties)?;
    if !config.is_enabled() {
        info!("cache disabled by configuration");
        return Ok(CacheState::Disabled);
    }

    let local_root = resolve_against(&session.multimodule_root, config.local_location());
    let local = LocalBlobStore::new(local_root);

    let remote = if config.is_remote_enabled() {
        let url = config
            .remote_url()
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();
        let root = url.strip_prefix("file://").unwrap_or(&url).to_string();
        let settings = TransportSettings {
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
        };
        let factory: TransportFactory = Box::new(move || {
            Ok(Box::new(FileTransport::connect(root.clone(), settings)?) as Box<dyn Transport>)
        });
        Some(RemoteBlobStore::new(factory, config.is_offline()))
    } else {
        None
    };

    let repository = CacheRepository::new(local, remote, config.is_save_to_remote());
    let baseline = config.baseline_url().map(BaselineSource::open);

    info!(algorithm = %config.algorithm(), "cache initialized");
    Ok(CacheState::Initialized(CacheEngine {
        config: Arc::new(config),
        repository: Arc::new(repository),
        index: Arc::new(FingerprintIndex::new()),
        reporter: Reporter::new(),
        baseline,
        in_use: Mutex::new(HashSet::new()),
    }))
}

fn resolve_against(root: &Path, location: &str) -> PathBuf {
    let path = Path::new(location);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Outcome summary handed back to the driver on module completion
#[derive(Debug)]
pub struct ModuleSummary {
    pub module: ModuleId,
    pub state: ModuleState,
    pub fingerprint: Option<Fingerprint>,
    pub diff: Option<DiffReport>,
}

/// The shared cache engine for one build session.
///
/// Safe to share across the driver's module threads; each module is
/// driven by a single thread through its own [`ModuleCacheSession`].
pub struct CacheEngine {
    config: Arc<CacheConfig>,
    repository: Arc<CacheRepository>,
    index: Arc<FingerprintIndex>,
    reporter: Reporter,
    baseline: Option<BaselineSource>,
    /// Fingerprints referenced by this build; eviction never deletes them
    in_use: Mutex<HashSet<String>>,
}

impl CacheEngine {
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[must_use]
    pub fn fingerprint_index(&self) -> &FingerprintIndex {
        &self.index
    }

    #[must_use]
    pub fn repository(&self) -> &CacheRepository {
        &self.repository
    }

    /// Prepare the cache decision for one module: wait for upstream
    /// fingerprints, scan, fingerprint, publish, look up, and (unless lazy
    /// restore is on) restore a usable record's artifacts.
    ///
    /// Every recoverable failure degrades the module to a forced miss; an
    /// integrity failure during eager restore aborts.
    pub fn begin_module(&self, ctx: ModuleBuildContext) -> Result<ModuleCacheSession> {
        let span = info_span!("module_cache", module = %ctx.id);
        let _guard = span.enter();

        let Some(upstream) = self.index.wait_for_upstream(&ctx.upstream) else {
            warn!(module = %ctx.id, "upstream module ineligible; building without caching");
            self.index.publish_ineligible(ctx.id.clone());
            return Ok(self.ineligible(ctx));
        };

        let inputs = match InputScanner::new(&self.config).scan(&ctx) {
            Ok(inputs) => inputs,
            Err(e) if e.degrades_to_miss() => {
                warn_degraded(&ctx.id, &e);
                self.index.publish_ineligible(ctx.id.clone());
                return Ok(self.ineligible(ctx));
            }
            Err(e) => return Err(e),
        };

        let canonical = canonicalize_descriptor(
            &ctx.effective_descriptor,
            &self.config.descriptor_exclude_properties(),
        )?;
        let fingerprint = ProjectFingerprinter::new(&self.config)
            .compute(&ctx, &inputs, &canonical, &upstream)?;
        self.index.publish(ctx.id.clone(), fingerprint.clone());
        self.in_use
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(fingerprint.to_hex());

        let record = self.repository.find_build(&ctx.id, &fingerprint)?;
        let session = match record {
            Some(record) => {
                match RestoreDecider::new(&self.config).evaluate(&record) {
                    crate::decider::RestoreDecision::Usable => {
                        let mut session = ModuleCacheSession::for_hit(
                            ctx,
                            Arc::clone(&self.config),
                            Arc::clone(&self.repository),
                            fingerprint,
                            upstream,
                            record,
                        );
                        if !self.config.is_lazy_restore() {
                            // integrity failures abort; other failures have
                            // already downgraded the session to a miss
                            session.ensure_restored()?;
                        }
                        session
                    }
                    crate::decider::RestoreDecision::Rejected(reason) => {
                        info!(module = %ctx.id, %reason, "cached record not usable");
                        self.miss(ctx, fingerprint, upstream)
                    }
                }
            }
            None => {
                debug!(module = %ctx.id, "cache miss");
                self.miss(ctx, fingerprint, upstream)
            }
        };
        Ok(session)
    }

    fn ineligible(&self, ctx: ModuleBuildContext) -> ModuleCacheSession {
        ModuleCacheSession::ineligible(ctx, Arc::clone(&self.config), Arc::clone(&self.repository))
    }

    fn miss(
        &self,
        ctx: ModuleBuildContext,
        fingerprint: Fingerprint,
        upstream: Vec<buildcache_core::model::UpstreamModule>,
    ) -> ModuleCacheSession {
        ModuleCacheSession::for_miss(
            ctx,
            Arc::clone(&self.config),
            Arc::clone(&self.repository),
            fingerprint,
            upstream,
        )
    }

    /// Conclude a module: capture a successful miss into the stores, feed
    /// the project index, and reconcile against the baseline when one is
    /// configured.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Reconciliation`] when a tracked property
    /// differs from the baseline and fail-fast is enabled.
    pub fn on_module_complete(
        &self,
        session: &mut ModuleCacheSession,
        completion: &ModuleCompletion,
    ) -> Result<ModuleSummary> {
        let module = session.module_context().id.clone();
        let output_dir = session.module_context().output_dir();

        let saved = {
            let in_use = self
                .in_use
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone();
            session.save_if_miss(completion, &in_use)?
        };

        if completion.success {
            if let Some(fingerprint) = session.fingerprint() {
                let url = saved.as_ref().and_then(|(record, receipt)| {
                    (receipt.remote == buildcache_store::SaveOutcome::Saved)
                        .then(|| {
                            self.config.remote_url().map(|base| {
                                format!(
                                    "{}/{}",
                                    base.trim_end_matches('/'),
                                    record_path(&record.module, &record.fingerprint)
                                )
                            })
                        })
                        .flatten()
                });
                self.reporter.add_module(module.clone(), fingerprint.clone(), url);
            }
        }

        let mut diff = None;
        if completion.success {
            diff = self.reconcile_module(session, &module, &output_dir)?;
        }

        session.mark_done();
        Ok(ModuleSummary {
            module,
            state: session.state(),
            fingerprint: session.fingerprint().cloned(),
            diff,
        })
    }

    fn reconcile_module(
        &self,
        session: &ModuleCacheSession,
        module: &ModuleId,
        output_dir: &Path,
    ) -> Result<Option<DiffReport>> {
        let Some(baseline) = &self.baseline else {
            return Ok(None);
        };
        let baseline_record = match baseline.record_for(module) {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(%module, error = %e, "baseline record unavailable; reconciliation skipped");
                return Ok(None);
            }
        };

        let report =
            Reconciler::new(&self.config).reconcile(module, session.current_steps(), &baseline_record);
        match xml::write_diff_report(&report) {
            Ok(bytes) => {
                let path = output_dir.join(DIFF_FILE);
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = std::fs::write(&path, bytes) {
                    warn!(%module, path = %path.display(), error = %e, "could not write diff report");
                }
            }
            Err(e) => warn!(%module, error = %e, "could not serialize diff report"),
        }

        if report.has_errors() && self.config.is_fail_fast() {
            return Err(Error::reconciliation(
                module.to_string(),
                report.error_count(),
            ));
        }
        Ok(Some(report))
    }

    /// Write the project index for this build and release pooled remote
    /// sessions. Identical module outcomes produce identical index bytes.
    pub fn on_build_complete(&self, build_id: &str) -> Result<ProjectIndex> {
        let index = self.reporter.build_index(build_id);
        self.repository.save_report(&index)?;
        self.repository.shutdown();
        info!(build_id, modules = index.entries.len(), "project index written");
        Ok(index)
    }
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("algorithm", &self.config.algorithm())
            .field("remote", &self.config.is_remote_enabled())
            .finish_non_exhaustive()
    }
}
