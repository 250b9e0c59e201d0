//! Baseline reconciliation
//!
//! When a baseline build is configured, every completed module is compared
//! against the record the baseline's project index points at. Steps pair
//! by (plugin, execution id, goal); property differences classify by the
//! reconciliation rules: tracked → ERROR, logged → WARN, nolog → silent,
//! and with log-all enabled everything else → INFO. The resulting diff is
//! persisted as `diff.xml` next to the module's build output.

use buildcache_core::config::{CacheConfig, StepId};
use buildcache_core::model::{
    BuildRecord, DiffEntry, DiffReport, DiffSeverity, ModuleId, PairedStep, ProjectIndex,
    RecordSource, StepExecutionRecord,
};
use buildcache_core::{xml, Result};
use buildcache_store::repository::record_path;
use buildcache_store::{BlobStore, LocalBlobStore};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

/// Reads baseline records referenced by a published project index.
///
/// The baseline URL names a directory holding the baseline's
/// `cache-report.xml`; record lookups resolve each entry's URL against the
/// same root, falling back to the canonical record path convention.
pub struct BaselineSource {
    store: LocalBlobStore,
    index: OnceLock<Option<ProjectIndex>>,
}

impl BaselineSource {
    #[must_use]
    pub fn open(url: &str) -> Self {
        let root = url.strip_prefix("file://").unwrap_or(url);
        Self {
            store: LocalBlobStore::new(root),
            index: OnceLock::new(),
        }
    }

    fn index(&self) -> &Option<ProjectIndex> {
        self.index.get_or_init(|| {
            match self
                .store
                .get(buildcache_core::model::PROJECT_INDEX_FILE)
            {
                Ok(Some(bytes)) => match xml::read_project_index(&bytes) {
                    Ok(index) => {
                        info!(build_id = %index.build_id, "baseline project index loaded");
                        Some(index)
                    }
                    Err(e) => {
                        warn!(error = %e, "baseline project index unreadable; reconciliation disabled");
                        None
                    }
                },
                Ok(None) => {
                    warn!("baseline project index not found; reconciliation disabled");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "baseline project index unreachable; reconciliation disabled");
                    None
                }
            }
        })
    }

    /// The baseline record for a module, when the index references one
    pub fn record_for(&self, module: &ModuleId) -> Result<Option<BuildRecord>> {
        let Some(index) = self.index() else {
            return Ok(None);
        };
        let Some(entry) = index.find(&module.group_id, &module.artifact_id) else {
            debug!(%module, "module absent from baseline index");
            return Ok(None);
        };
        let path = entry
            .url
            .clone()
            .unwrap_or_else(|| record_path(&entry.module, &entry.fingerprint));
        let Some(bytes) = self.store.get(&path)? else {
            warn!(%module, path, "baseline record not found");
            return Ok(None);
        };
        let mut record = xml::read_build_record(&bytes)?;
        record.source = RecordSource::Baseline;
        Ok(Some(record))
    }
}

impl std::fmt::Debug for BaselineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaselineSource").finish_non_exhaustive()
    }
}

/// Compares a just-run build against a baseline record
pub struct Reconciler<'a> {
    config: &'a CacheConfig,
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub fn new(config: &'a CacheConfig) -> Self {
        Self { config }
    }

    /// Pair steps and classify every property difference
    #[must_use]
    pub fn reconcile(
        &self,
        module: &ModuleId,
        current_steps: &[StepExecutionRecord],
        baseline: &BuildRecord,
    ) -> DiffReport {
        let mut paired_steps = Vec::new();
        let mut entries = Vec::new();

        for current in current_steps {
            let Some(base) =
                baseline.find_step(&current.plugin, &current.execution_id, &current.goal)
            else {
                debug!(%module, plugin = %current.plugin, goal = %current.goal,
                    "step has no baseline counterpart; not compared");
                continue;
            };
            paired_steps.push(PairedStep {
                plugin: current.plugin.clone(),
                execution_id: current.execution_id.clone(),
                goal: current.goal.clone(),
            });
            self.diff_step(module, current, base, &mut entries);
        }

        DiffReport {
            module: module.clone(),
            paired_steps,
            entries,
        }
    }

    fn diff_step(
        &self,
        module: &ModuleId,
        current: &StepExecutionRecord,
        baseline: &StepExecutionRecord,
        entries: &mut Vec<DiffEntry>,
    ) {
        let step_id = StepId {
            group_id: &current.plugin.group_id,
            artifact_id: &current.plugin.artifact_id,
            execution_id: &current.execution_id,
            goal: &current.goal,
        };
        let rule = self.config.reconciliation_for(&step_id);
        let log_all = self.config.is_log_all_properties(&step_id);

        let mut names: BTreeSet<&String> = BTreeSet::new();
        for map in [
            &current.tracked_properties,
            &current.observed_properties,
            &baseline.tracked_properties,
            &baseline.observed_properties,
        ] {
            names.extend(map.keys());
        }

        for name in names {
            let current_value = current
                .tracked_properties
                .get(name)
                .or_else(|| current.observed_properties.get(name));
            let baseline_value = baseline
                .tracked_properties
                .get(name)
                .or_else(|| baseline.observed_properties.get(name));
            if current_value == baseline_value {
                continue;
            }

            let severity = match rule {
                Some(rule) => {
                    if let Some(tracked) = rule
                        .reconciles
                        .reconcile
                        .iter()
                        .find(|t| t.property_name == *name)
                    {
                        // a baseline value equal to the configured skip
                        // value is tolerated
                        if tracked.skip_value.as_deref() == baseline_value.map(String::as_str) {
                            continue;
                        }
                        DiffSeverity::Error
                    } else if rule.logs.log.contains(name) {
                        DiffSeverity::Warn
                    } else if rule.nologs.nolog.contains(name) {
                        continue;
                    } else if log_all {
                        DiffSeverity::Info
                    } else {
                        continue;
                    }
                }
                None if log_all => DiffSeverity::Info,
                None => continue,
            };

            match severity {
                DiffSeverity::Error => error!(%module, plugin = %current.plugin, goal = %current.goal,
                    property = %name, baseline = ?baseline_value, current = ?current_value,
                    "tracked property differs from baseline"),
                DiffSeverity::Warn => warn!(%module, property = %name,
                    baseline = ?baseline_value, current = ?current_value,
                    "logged property differs from baseline"),
                DiffSeverity::Info => info!(%module, property = %name,
                    baseline = ?baseline_value, current = ?current_value,
                    "property differs from baseline"),
            }
            entries.push(DiffEntry {
                plugin: current.plugin.clone(),
                execution_id: current.execution_id.clone(),
                goal: current.goal.clone(),
                property: name.clone(),
                severity,
                baseline_value: baseline_value.cloned(),
                current_value: current_value.cloned(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildcache_core::config::{CacheConfigDocument, CacheProperties};
    use buildcache_core::hash::HashAlgorithm;
    use buildcache_core::model::{PluginId, CACHE_IMPLEMENTATION_VERSION, SCHEMA_VERSION};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn reconciling_config() -> CacheConfig {
        let doc = CacheConfigDocument::from_xml(
            br"<cache>
                <executionControl>
                  <reconcile>
                    <plugins>
                      <plugin>
                        <artifactId>compiler-plugin</artifactId>
                        <goal>compile</goal>
                        <reconciles>
                          <reconcile><propertyName>javac.source</propertyName></reconcile>
                          <reconcile>
                            <propertyName>debug</propertyName>
                            <skipValue>legacy</skipValue>
                          </reconcile>
                        </reconciles>
                        <logs><log>verbose</log></logs>
                        <nologs><nolog>timestamp</nolog></nologs>
                      </plugin>
                    </plugins>
                  </reconcile>
                </executionControl>
              </cache>",
        )
        .unwrap();
        CacheConfig::from_document(doc, CacheProperties::default()).unwrap()
    }

    fn step(tracked: &[(&str, &str)], observed: &[(&str, &str)]) -> StepExecutionRecord {
        StepExecutionRecord {
            plugin: PluginId::new("org.apache", "compiler-plugin", "3.1"),
            execution_id: "default-compile".to_string(),
            goal: "compile".to_string(),
            configuration_digest: HashAlgorithm::Sha256.hash(b"cfg"),
            tracked_properties: tracked
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            observed_properties: observed
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn baseline_with(steps: Vec<StepExecutionRecord>) -> BuildRecord {
        BuildRecord {
            schema_version: SCHEMA_VERSION.to_string(),
            implementation_version: CACHE_IMPLEMENTATION_VERSION.to_string(),
            module: ModuleId::new("org.example", "app", "1.0.0"),
            fingerprint: HashAlgorithm::Sha256.hash(b"baseline"),
            timestamp: Utc::now(),
            source: RecordSource::Baseline,
            steps,
            artifacts: vec![],
            upstream: vec![],
        }
    }

    fn module() -> ModuleId {
        ModuleId::new("org.example", "app", "1.0.0")
    }

    #[test]
    fn tracked_difference_is_error() {
        let config = reconciling_config();
        let current = vec![step(&[("javac.source", "11")], &[])];
        let baseline = baseline_with(vec![step(&[("javac.source", "1.8")], &[])]);
        let report = Reconciler::new(&config).reconcile(&module(), &current, &baseline);
        assert_eq!(report.paired_steps.len(), 1);
        assert_eq!(report.entries.len(), 1);
        let entry = &report.entries[0];
        assert_eq!(entry.severity, DiffSeverity::Error);
        assert_eq!(entry.property, "javac.source");
        assert_eq!(entry.baseline_value.as_deref(), Some("1.8"));
        assert_eq!(entry.current_value.as_deref(), Some("11"));
        assert!(report.has_errors());
    }

    #[test]
    fn equal_properties_produce_no_entries() {
        let config = reconciling_config();
        let current = vec![step(&[("javac.source", "11")], &[])];
        let baseline = baseline_with(vec![step(&[("javac.source", "11")], &[])]);
        let report = Reconciler::new(&config).reconcile(&module(), &current, &baseline);
        assert!(report.entries.is_empty());
        assert!(!report.has_errors());
    }

    #[test]
    fn skip_value_tolerates_baseline_difference() {
        let config = reconciling_config();
        let current = vec![step(&[("debug", "false")], &[])];
        let baseline = baseline_with(vec![step(&[("debug", "legacy")], &[])]);
        let report = Reconciler::new(&config).reconcile(&module(), &current, &baseline);
        assert!(report.entries.is_empty());
    }

    #[test]
    fn logged_difference_is_warn_and_nolog_is_silent() {
        let config = reconciling_config();
        let current = vec![step(
            &[],
            &[("verbose", "true"), ("timestamp", "2024-04-02")],
        )];
        let baseline = baseline_with(vec![step(
            &[],
            &[("verbose", "false"), ("timestamp", "2023-01-01")],
        )]);
        let report = Reconciler::new(&config).reconcile(&module(), &current, &baseline);
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].property, "verbose");
        assert_eq!(report.entries[0].severity, DiffSeverity::Warn);
    }

    #[test]
    fn log_all_reports_unclassified_differences_at_info() {
        let doc = CacheConfigDocument::from_xml(
            br"<cache>
                <executionControl>
                  <reconcile>
                    <logAllProperties>true</logAllProperties>
                    <plugins/>
                  </reconcile>
                </executionControl>
              </cache>",
        )
        .unwrap();
        let config = CacheConfig::from_document(doc, CacheProperties::default()).unwrap();
        let current = vec![step(&[], &[("anything", "new")])];
        let baseline = baseline_with(vec![step(&[], &[("anything", "old")])]);
        let report = Reconciler::new(&config).reconcile(&module(), &current, &baseline);
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].severity, DiffSeverity::Info);
    }

    #[test]
    fn unpaired_steps_are_not_compared() {
        let config = reconciling_config();
        let current = vec![step(&[("javac.source", "11")], &[])];
        let baseline = baseline_with(vec![]);
        let report = Reconciler::new(&config).reconcile(&module(), &current, &baseline);
        assert!(report.paired_steps.is_empty());
        assert!(report.entries.is_empty());
    }

    #[test]
    fn baseline_source_resolves_records() {
        use buildcache_core::model::{ProjectIndex, ProjectIndexEntry};
        use tempfile::TempDir;

        let baseline_dir = TempDir::new().unwrap();
        let record = baseline_with(vec![step(&[("javac.source", "1.8")], &[])]);
        let index = ProjectIndex {
            build_id: "baseline-1".to_string(),
            entries: vec![ProjectIndexEntry {
                module: record.module.clone(),
                fingerprint: record.fingerprint.clone(),
                url: None,
            }],
        };
        let store = LocalBlobStore::new(baseline_dir.path());
        store
            .put(
                buildcache_core::model::PROJECT_INDEX_FILE,
                &xml::write_project_index(&index).unwrap(),
            )
            .unwrap();
        store
            .put(
                &record_path(&record.module, &record.fingerprint),
                &xml::write_build_record(&record).unwrap(),
            )
            .unwrap();

        let source = BaselineSource::open(&baseline_dir.path().display().to_string());
        let found = source.record_for(&record.module).unwrap().unwrap();
        assert_eq!(found.source, RecordSource::Baseline);
        assert_eq!(found.fingerprint, record.fingerprint);
        assert!(source
            .record_for(&ModuleId::new("other", "module", "1"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn missing_baseline_index_disables_reconciliation() {
        let source = BaselineSource::open("/nonexistent/baseline");
        assert!(source.record_for(&module()).unwrap().is_none());
    }
}
