//! Entities persisted by and exchanged with the cache
//!
//! Fingerprints and input records are value types, computed once per module
//! per build and never mutated. A [`BuildRecord`] is created when a local
//! build completes successfully; its bytes are immutable once written.

use crate::hash::Fingerprint;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Schema version written into every build record
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Version of the cache implementation. Participates in every fingerprint
/// and in the store path prefix (`v1/...`), so a change invalidates every
/// record produced by earlier implementations.
pub const CACHE_IMPLEMENTATION_VERSION: &str = "1";

/// Well-known file name of the build record inside a record directory
pub const BUILD_RECORD_FILE: &str = "build.xml";

/// Well-known file name of the project index document
pub const PROJECT_INDEX_FILE: &str = "cache-report.xml";

/// Well-known file name of the reconciliation diff document
pub const DIFF_FILE: &str = "diff.xml";

/// Identity of a module in the reactor.
///
/// The version participates in identification but never in the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
}

impl ModuleId {
    #[must_use]
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)
    }
}

/// Identity of a build plugin
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
}

impl PluginId {
    #[must_use]
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
        }
    }

    /// `group:artifact` coordinates without the version, the form used when
    /// folding plugin identity into a fingerprint
    #[must_use]
    pub fn coordinates(&self) -> String {
        format!("{}:{}", self.group_id, self.artifact_id)
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)
    }
}

/// One file in a module's canonical input set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFileRecord {
    /// Forward-slash path relative to the module root
    pub relative_path: String,
    pub digest: Fingerprint,
    pub size_bytes: u64,
}

/// Where a build record was obtained from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSource {
    Local,
    Remote,
    Baseline,
}

impl RecordSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::Remote => "REMOTE",
            Self::Baseline => "BASELINE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOCAL" => Some(Self::Local),
            "REMOTE" => Some(Self::Remote),
            "BASELINE" => Some(Self::Baseline),
            _ => None,
        }
    }
}

/// Recorded execution of a single build step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepExecutionRecord {
    pub plugin: PluginId,
    pub execution_id: String,
    pub goal: String,
    pub configuration_digest: Fingerprint,
    /// Properties reconciled against a baseline
    pub tracked_properties: BTreeMap<String, String>,
    /// Properties captured for logging only
    pub observed_properties: BTreeMap<String, String>,
}

impl StepExecutionRecord {
    /// True when this record corresponds to the given step coordinates
    #[must_use]
    pub fn matches(&self, plugin: &PluginId, execution_id: &str, goal: &str) -> bool {
        self.plugin == *plugin && self.execution_id == execution_id && self.goal == goal
    }
}

/// One produced artifact referenced by a build record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEntry {
    pub file_name: String,
    /// Absent for the primary artifact
    pub classifier: Option<String>,
    pub extension: String,
    pub digest: Fingerprint,
    pub size_bytes: u64,
}

impl ArtifactEntry {
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.classifier.is_none()
    }
}

/// Fingerprint published by an upstream module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamModule {
    pub module: ModuleId,
    pub fingerprint: Fingerprint,
}

/// Immutable document capturing one successful module build: the inputs'
/// fingerprint, the step executions in order, and the artifact manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRecord {
    pub schema_version: String,
    pub implementation_version: String,
    pub module: ModuleId,
    pub fingerprint: Fingerprint,
    pub timestamp: DateTime<Utc>,
    pub source: RecordSource,
    /// Steps in the exact execution order
    pub steps: Vec<StepExecutionRecord>,
    pub artifacts: Vec<ArtifactEntry>,
    pub upstream: Vec<UpstreamModule>,
}

impl BuildRecord {
    /// Find the recorded execution of a step, if any
    #[must_use]
    pub fn find_step(
        &self,
        plugin: &PluginId,
        execution_id: &str,
        goal: &str,
    ) -> Option<&StepExecutionRecord> {
        self.steps
            .iter()
            .find(|s| s.matches(plugin, execution_id, goal))
    }

    /// The primary artifact, when the build produced one
    #[must_use]
    pub fn primary_artifact(&self) -> Option<&ArtifactEntry> {
        self.artifacts.iter().find(|a| a.is_primary())
    }
}

/// One module's outcome in the project index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectIndexEntry {
    pub module: ModuleId,
    pub fingerprint: Fingerprint,
    /// Store URL of the record, when it was saved to a shared store
    pub url: Option<String>,
}

/// Per-top-level-build directory of module fingerprints and record
/// locations, consumed by later runs as a reconciliation baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectIndex {
    pub build_id: String,
    pub entries: Vec<ProjectIndexEntry>,
}

impl ProjectIndex {
    /// Look up a module by (group, artifact), ignoring the version
    #[must_use]
    pub fn find(&self, group_id: &str, artifact_id: &str) -> Option<&ProjectIndexEntry> {
        self.entries
            .iter()
            .find(|e| e.module.group_id == group_id && e.module.artifact_id == artifact_id)
    }
}

/// Severity of one reconciliation difference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffSeverity {
    Error,
    Warn,
    Info,
}

impl DiffSeverity {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ERROR" => Some(Self::Error),
            "WARN" => Some(Self::Warn),
            "INFO" => Some(Self::Info),
            _ => None,
        }
    }
}

/// One property difference between a build and its baseline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub plugin: PluginId,
    pub execution_id: String,
    pub goal: String,
    pub property: String,
    pub severity: DiffSeverity,
    pub baseline_value: Option<String>,
    pub current_value: Option<String>,
}

/// A step present in both the candidate build and the baseline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedStep {
    pub plugin: PluginId,
    pub execution_id: String,
    pub goal: String,
}

/// Reconciliation outcome for one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffReport {
    pub module: ModuleId,
    pub paired_steps: Vec<PairedStep>,
    pub entries: Vec<DiffEntry>,
}

impl DiffReport {
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.severity == DiffSeverity::Error)
            .count()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;

    fn fp(data: &[u8]) -> Fingerprint {
        HashAlgorithm::Sha256.hash(data)
    }

    #[test]
    fn module_id_display_and_order() {
        let a = ModuleId::new("org.example", "alpha", "1.0");
        let b = ModuleId::new("org.example", "beta", "1.0");
        assert_eq!(a.to_string(), "org.example:alpha:1.0");
        assert!(a < b);
    }

    #[test]
    fn primary_artifact_has_no_classifier() {
        let primary = ArtifactEntry {
            file_name: "app-1.0.jar".into(),
            classifier: None,
            extension: "jar".into(),
            digest: fp(b"jar"),
            size_bytes: 3,
        };
        let sources = ArtifactEntry {
            file_name: "app-1.0-sources.jar".into(),
            classifier: Some("sources".into()),
            extension: "jar".into(),
            digest: fp(b"src"),
            size_bytes: 3,
        };
        assert!(primary.is_primary());
        assert!(!sources.is_primary());

        let record = BuildRecord {
            schema_version: SCHEMA_VERSION.into(),
            implementation_version: CACHE_IMPLEMENTATION_VERSION.into(),
            module: ModuleId::new("g", "a", "1.0"),
            fingerprint: fp(b"inputs"),
            timestamp: Utc::now(),
            source: RecordSource::Local,
            steps: vec![],
            artifacts: vec![sources, primary.clone()],
            upstream: vec![],
        };
        assert_eq!(record.primary_artifact(), Some(&primary));
    }

    #[test]
    fn find_step_matches_full_coordinates() {
        let plugin = PluginId::new("org.example", "compiler", "3.1");
        let step = StepExecutionRecord {
            plugin: plugin.clone(),
            execution_id: "default-compile".into(),
            goal: "compile".into(),
            configuration_digest: fp(b"cfg"),
            tracked_properties: BTreeMap::new(),
            observed_properties: BTreeMap::new(),
        };
        let record = BuildRecord {
            schema_version: SCHEMA_VERSION.into(),
            implementation_version: CACHE_IMPLEMENTATION_VERSION.into(),
            module: ModuleId::new("g", "a", "1.0"),
            fingerprint: fp(b"inputs"),
            timestamp: Utc::now(),
            source: RecordSource::Local,
            steps: vec![step],
            artifacts: vec![],
            upstream: vec![],
        };
        assert!(record
            .find_step(&plugin, "default-compile", "compile")
            .is_some());
        assert!(record.find_step(&plugin, "default-compile", "test").is_none());
    }

    #[test]
    fn index_lookup_ignores_version() {
        let index = ProjectIndex {
            build_id: "build-1".into(),
            entries: vec![ProjectIndexEntry {
                module: ModuleId::new("g", "a", "2.0-SNAPSHOT"),
                fingerprint: fp(b"x"),
                url: None,
            }],
        };
        assert!(index.find("g", "a").is_some());
        assert!(index.find("g", "b").is_none());
    }

    #[test]
    fn source_round_trip() {
        for source in [RecordSource::Local, RecordSource::Remote, RecordSource::Baseline] {
            assert_eq!(RecordSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(RecordSource::parse("local"), None);
    }

    #[test]
    fn diff_report_counts_errors() {
        let report = DiffReport {
            module: ModuleId::new("g", "a", "1.0"),
            paired_steps: vec![],
            entries: vec![
                DiffEntry {
                    plugin: PluginId::new("g", "p", "1"),
                    execution_id: "default".into(),
                    goal: "compile".into(),
                    property: "source".into(),
                    severity: DiffSeverity::Error,
                    baseline_value: Some("1.8".into()),
                    current_value: Some("11".into()),
                },
                DiffEntry {
                    plugin: PluginId::new("g", "p", "1"),
                    execution_id: "default".into(),
                    goal: "compile".into(),
                    property: "verbose".into(),
                    severity: DiffSeverity::Warn,
                    baseline_value: None,
                    current_value: Some("true".into()),
                },
            ],
        };
        assert_eq!(report.error_count(), 1);
        assert!(report.has_errors());
    }
}
