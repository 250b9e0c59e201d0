//! On-disk layout of `maven-cache-config.xml`
//!
//! Plain serde documents; every section and list is optional in the file
//! and defaults to empty. The runtime view with compiled patterns and
//! matching rules lives in [`super::CacheConfig`].

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Root element `<cache>`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "cache", rename_all = "camelCase", default)]
pub struct CacheConfigDocument {
    pub configuration: ConfigurationSection,
    pub input: InputSection,
    pub execution_control: ExecutionControlSection,
    pub output: OutputSection,
}

impl CacheConfigDocument {
    /// Parse a configuration document from XML bytes.
    ///
    /// # Errors
    ///
    /// A malformed document is a configuration error; it is fatal at
    /// initialize time rather than silently replaced by defaults.
    pub fn from_xml(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| {
            Error::configuration(format!("cache configuration is not valid UTF-8: {e}"))
        })?;
        quick_xml::de::from_str(text)
            .map_err(|e| Error::configuration(format!("cannot parse cache configuration: {e}")))
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut out = String::new();
        let mut ser = quick_xml::se::Serializer::new(&mut out);
        ser.indent(' ', 2);
        self.serialize(ser)
            .map_err(|e| Error::configuration(format!("cannot serialize configuration: {e}")))?;
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigurationSection {
    pub enabled: bool,
    pub hash_algorithm: String,
    pub local: LocalSection,
    pub remote: RemoteSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_versioning: Option<ProjectVersioningSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attached_outputs: Option<AttachedOutputsSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multi_module: Option<MultiModuleSection>,
}

impl Default for ConfigurationSection {
    fn default() -> Self {
        Self {
            enabled: true,
            hash_algorithm: "SHA-256".to_string(),
            local: LocalSection::default(),
            remote: RemoteSection::default(),
            project_versioning: None,
            attached_outputs: None,
            multi_module: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalSection {
    /// Root directory of the local store; relative paths resolve against
    /// the multimodule root. Defaults to `.mvn/cache`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Upper bound on retained record directories; 0 means unbounded
    pub max_builds_cached: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteSection {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub save_to_remote: bool,
    pub offline: bool,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            save_to_remote: false,
            offline: false,
            connect_timeout_ms: 5_000,
            request_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectVersioningSection {
    pub adjust_meta_inf: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachedOutputsSection {
    pub dir_names: DirNames,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirNames {
    pub dir_name: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MultiModuleSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoverySection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoverySection {
    pub scan_profiles: ScanProfiles,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanProfiles {
    pub scan_profile: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputSection {
    pub global: PathSetSection,
    pub plugins: InputPlugins,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputPlugins {
    pub plugin: Vec<PluginInputConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathSetSection {
    /// Glob restricting which regular files count as inputs; empty means
    /// every regular file under the scanned roots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glob: Option<String>,
    pub includes: Includes,
    pub excludes: Excludes,
    pub follow_symlinks: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Includes {
    pub include: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Excludes {
    pub exclude: Vec<String>,
}

/// Input-scan rules for one plugin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginInputConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub artifact_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir_scan: Option<DirScan>,
    pub executions: PluginExecutionsScan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_pom: Option<EffectivePom>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginExecutionsScan {
    pub execution: Vec<ExecutionScan>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionScan {
    pub exec_ids: ExecIds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir_scan: Option<DirScan>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecIds {
    pub exec_id: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirScan {
    pub includes: Includes,
    pub excludes: Excludes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EffectivePom {
    pub exclude_properties: ExcludeProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExcludeProperties {
    pub exclude_property: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionControlSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_always: Option<Executables>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_missing: Option<Executables>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileSection>,
}

/// A set of step selectors: whole plugins, execution-id lists, goal lists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Executables {
    pub plugins: ExecutablePlugins,
    pub executions: ExecutableExecutions,
    pub goals_lists: GoalsLists,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutablePlugins {
    pub plugin: Vec<PluginCoordinates>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginCoordinates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub artifact_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutableExecutions {
    pub execution: Vec<ExecutionIds>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionIds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub artifact_id: String,
    pub exec_ids: ExecIds,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoalsLists {
    pub goals_list: Vec<GoalsList>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoalsList {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub artifact_id: String,
    pub goals: Goals,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Goals {
    pub goal: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcileSection {
    pub log_all_properties: bool,
    pub plugins: ReconcilePlugins,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcilePlugins {
    pub plugin: Vec<GoalReconciliation>,
}

/// Per-goal reconciliation rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoalReconciliation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub artifact_id: String,
    pub goal: String,
    pub reconciles: Reconciles,
    pub logs: Logs,
    pub nologs: Nologs,
    pub log_all: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Reconciles {
    pub reconcile: Vec<TrackedProperty>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackedProperty {
    pub property_name: String,
    /// A recorded value equal to this one satisfies the rule even when the
    /// current build reports something else
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Logs {
    pub log: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Nologs {
    pub nolog: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputSection {
    pub exclude: OutputExclude,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputExclude {
    pub patterns: Patterns,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Patterns {
    pub pattern: Vec<String>,
}
