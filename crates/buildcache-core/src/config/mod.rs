//! Typed cache configuration
//!
//! [`CacheConfig`] is the runtime view handed to every component: the parsed
//! document plus compiled output-exclusion patterns, the resolved hash
//! algorithm, and the `remote.cache.*` property overrides supplied by the
//! driver session. All rule matching (run-always, ignore-missing,
//! reconciliation, plugin scan config) lives here.

mod schema;

pub use schema::*;

use crate::hash::HashAlgorithm;
use crate::{Error, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

/// Property overriding the configuration file location
pub const CONFIG_PATH_PROPERTY: &str = "remote.cache.configPath";
/// Property disabling the cache entirely ("true" by default)
pub const CACHE_ENABLED_PROPERTY: &str = "remote.cache.enabled";
/// Property enabling saves to the remote store
pub const SAVE_ENABLED_PROPERTY: &str = "remote.cache.save.enabled";
/// Property marking saved records as final (not overridable downstream)
pub const SAVE_FINAL_PROPERTY: &str = "remote.cache.save.final";
/// Property failing the build on the first reconciliation error
pub const FAIL_FAST_PROPERTY: &str = "remote.cache.failFast";
/// Property pointing at the baseline build used for reconciliation
pub const BASELINE_URL_PROPERTY: &str = "remote.cache.baselineUrl";
/// Property deferring artifact restore until first use
pub const LAZY_RESTORE_PROPERTY: &str = "remote.cache.lazyRestore";
/// Property controlling restore of generated-sources directories
pub const RESTORE_GENERATED_SOURCES_PROPERTY: &str = "remote.cache.restoreGeneratedSources";

/// Default location of the local store, relative to the multimodule root
pub const DEFAULT_LOCAL_LOCATION: &str = ".mvn/cache";

/// Default location of the configuration file, relative to the multimodule root
pub const DEFAULT_CONFIG_LOCATION: &str = ".mvn/maven-cache-config.xml";

/// Resolved `remote.cache.*` properties.
///
/// Lookup order is user properties first, then system properties; booleans
/// parse as true iff the lowercased value equals "true".
#[derive(Debug, Clone, Default)]
pub struct CacheProperties {
    pub enabled: Option<bool>,
    pub save_enabled: bool,
    pub save_final: bool,
    pub fail_fast: bool,
    pub baseline_url: Option<String>,
    pub lazy_restore: bool,
    pub restore_generated_sources: Option<bool>,
    pub config_path: Option<PathBuf>,
}

impl CacheProperties {
    #[must_use]
    pub fn from_maps(
        user: &BTreeMap<String, String>,
        system: &BTreeMap<String, String>,
    ) -> Self {
        let get = |key: &str| user.get(key).or_else(|| system.get(key)).cloned();
        let get_bool = |key: &str| get(key).map(|v| parse_bool(&v));
        Self {
            enabled: get_bool(CACHE_ENABLED_PROPERTY),
            save_enabled: get_bool(SAVE_ENABLED_PROPERTY).unwrap_or(false),
            save_final: get_bool(SAVE_FINAL_PROPERTY).unwrap_or(false),
            fail_fast: get_bool(FAIL_FAST_PROPERTY).unwrap_or(false),
            baseline_url: get(BASELINE_URL_PROPERTY),
            lazy_restore: get_bool(LAZY_RESTORE_PROPERTY).unwrap_or(false),
            restore_generated_sources: get_bool(RESTORE_GENERATED_SOURCES_PROPERTY),
            config_path: get(CONFIG_PATH_PROPERTY).map(PathBuf::from),
        }
    }

    /// Cache enablement from properties alone; the configuration file can
    /// still disable it
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

fn parse_bool(value: &str) -> bool {
    value.to_lowercase() == "true"
}

/// Coordinates of one build step, the view rule matching operates on
#[derive(Debug, Clone, Copy)]
pub struct StepId<'a> {
    pub group_id: &'a str,
    pub artifact_id: &'a str,
    pub execution_id: &'a str,
    pub goal: &'a str,
}

/// Runtime cache configuration
#[derive(Debug)]
pub struct CacheConfig {
    document: CacheConfigDocument,
    algorithm: HashAlgorithm,
    output_exclude: Vec<Regex>,
    properties: CacheProperties,
}

impl CacheConfig {
    /// Build the runtime view from a parsed document and session properties.
    ///
    /// # Errors
    ///
    /// An unknown hash algorithm or a malformed output-exclusion pattern is
    /// a configuration error.
    pub fn from_document(
        document: CacheConfigDocument,
        properties: CacheProperties,
    ) -> Result<Self> {
        let algorithm = HashAlgorithm::from_id(&document.configuration.hash_algorithm)?;
        let output_exclude = document
            .output
            .exclude
            .patterns
            .pattern
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    Error::configuration(format!("invalid output exclusion pattern '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            document,
            algorithm,
            output_exclude,
            properties,
        })
    }

    /// Enabled-with-defaults configuration, used when no file is present
    pub fn with_defaults(properties: CacheProperties) -> Result<Self> {
        Self::from_document(CacheConfigDocument::default(), properties)
    }

    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub fn properties(&self) -> &CacheProperties {
        &self.properties
    }

    #[must_use]
    pub fn document(&self) -> &CacheConfigDocument {
        &self.document
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.properties.is_enabled() && self.document.configuration.enabled
    }

    // --- input scanning ----------------------------------------------------

    #[must_use]
    pub fn global_glob(&self) -> Option<&str> {
        self.document
            .input
            .global
            .glob
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
    }

    #[must_use]
    pub fn global_includes(&self) -> &[String] {
        &self.document.input.global.includes.include
    }

    #[must_use]
    pub fn global_excludes(&self) -> &[String] {
        &self.document.input.global.excludes.exclude
    }

    #[must_use]
    pub fn follow_symlinks(&self) -> bool {
        self.document.input.global.follow_symlinks
    }

    #[must_use]
    pub fn output_exclude_patterns(&self) -> &[Regex] {
        &self.output_exclude
    }

    /// True when the artifact path is excluded from records by pattern
    #[must_use]
    pub fn is_output_excluded(&self, path: &str) -> bool {
        self.output_exclude.iter().any(|p| p.is_match(path))
    }

    /// Scan rules configured for a plugin, if any
    #[must_use]
    pub fn plugin_scan(&self, group_id: &str, artifact_id: &str) -> Option<&PluginInputConfig> {
        self.document
            .input
            .plugins
            .plugin
            .iter()
            .find(|p| plugin_matches(p.group_id.as_deref(), &p.artifact_id, group_id, artifact_id))
    }

    /// Dir-scan rules for one plugin execution, when configured
    #[must_use]
    pub fn execution_scan(
        &self,
        group_id: &str,
        artifact_id: &str,
        execution_id: &str,
    ) -> Option<&DirScan> {
        let plugin = self.plugin_scan(group_id, artifact_id)?;
        plugin
            .executions
            .execution
            .iter()
            .find(|e| e.exec_ids.exec_id.iter().any(|id| id == execution_id))
            .and_then(|e| e.dir_scan.as_ref())
    }

    /// Effective-descriptor properties excluded by any configured plugin
    #[must_use]
    pub fn descriptor_exclude_properties(&self) -> BTreeSet<&str> {
        self.document
            .input
            .plugins
            .plugin
            .iter()
            .filter_map(|p| p.effective_pom.as_ref())
            .flat_map(|e| e.exclude_properties.exclude_property.iter())
            .map(String::as_str)
            .collect()
    }

    /// Configuration properties excluded when digesting one plugin's
    /// configuration
    #[must_use]
    pub fn plugin_config_excludes(&self, group_id: &str, artifact_id: &str) -> BTreeSet<&str> {
        self.plugin_scan(group_id, artifact_id)
            .and_then(|p| p.effective_pom.as_ref())
            .map(|e| {
                e.exclude_properties
                    .exclude_property
                    .iter()
                    .map(String::as_str)
                    .collect()
            })
            .unwrap_or_default()
    }

    // --- execution control -------------------------------------------------

    /// True when the step must execute on every build; a cache hit never
    /// skips it
    #[must_use]
    pub fn is_forced_execution(&self, step: &StepId<'_>) -> bool {
        self.document
            .execution_control
            .run_always
            .as_ref()
            .is_some_and(|e| executables_match(e, step))
    }

    /// True when a step absent from the record does not force a miss
    #[must_use]
    pub fn can_ignore_missing(&self, step: &StepId<'_>) -> bool {
        self.document
            .execution_control
            .ignore_missing
            .as_ref()
            .is_some_and(|e| executables_match(e, step))
    }

    /// The reconciliation rule matching a step, if any
    #[must_use]
    pub fn reconciliation_for(&self, step: &StepId<'_>) -> Option<&GoalReconciliation> {
        let reconcile = self.document.execution_control.reconcile.as_ref()?;
        reconcile.plugins.plugin.iter().find(|rule| {
            plugin_matches(
                rule.group_id.as_deref(),
                &rule.artifact_id,
                step.group_id,
                step.artifact_id,
            ) && rule.goal == step.goal
        })
    }

    /// True when every non-tracked, non-nolog difference of this step is
    /// logged at INFO during reconciliation
    #[must_use]
    pub fn is_log_all_properties(&self, step: &StepId<'_>) -> bool {
        if self.reconciliation_for(step).is_some_and(|r| r.log_all) {
            return true;
        }
        self.document
            .execution_control
            .reconcile
            .as_ref()
            .is_some_and(|r| r.log_all_properties)
    }

    // --- stores ------------------------------------------------------------

    #[must_use]
    pub fn local_location(&self) -> &str {
        self.document
            .configuration
            .local
            .location
            .as_deref()
            .unwrap_or(DEFAULT_LOCAL_LOCATION)
    }

    /// Upper bound on locally retained records; `None` means unbounded
    #[must_use]
    pub fn max_local_builds_cached(&self) -> Option<usize> {
        match self.document.configuration.local.max_builds_cached {
            0 => None,
            n => Some(n),
        }
    }

    #[must_use]
    pub fn remote_url(&self) -> Option<&str> {
        self.document.configuration.remote.url.as_deref()
    }

    #[must_use]
    pub fn is_remote_enabled(&self) -> bool {
        self.document.configuration.remote.enabled && self.remote_url().is_some()
    }

    #[must_use]
    pub fn is_save_to_remote(&self) -> bool {
        self.properties.save_enabled || self.document.configuration.remote.save_to_remote
    }

    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.document.configuration.remote.offline
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.document.configuration.remote.connect_timeout_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.document.configuration.remote.request_timeout_ms)
    }

    // --- session behavior --------------------------------------------------

    #[must_use]
    pub fn is_fail_fast(&self) -> bool {
        self.properties.fail_fast
    }

    #[must_use]
    pub fn baseline_url(&self) -> Option<&str> {
        self.properties.baseline_url.as_deref()
    }

    #[must_use]
    pub fn is_lazy_restore(&self) -> bool {
        self.properties.lazy_restore
    }

    #[must_use]
    pub fn is_restore_generated_sources(&self) -> bool {
        self.properties.restore_generated_sources.unwrap_or(true)
    }

    #[must_use]
    pub fn is_save_final(&self) -> bool {
        self.properties.save_final
    }

    /// Whether plugin configurations participate in the fingerprint.
    ///
    /// Not configurable: the knob existed upstream but was hardwired to
    /// true, and nothing ever read it as false.
    #[must_use]
    pub fn is_process_plugins(&self) -> bool {
        true
    }

    #[must_use]
    pub fn attached_output_dirs(&self) -> &[String] {
        self.document
            .configuration
            .attached_outputs
            .as_ref()
            .map(|a| a.dir_names.dir_name.as_slice())
            .unwrap_or(&[])
    }

    #[must_use]
    pub fn multi_module(&self) -> Option<&MultiModuleSection> {
        self.document.configuration.multi_module.as_ref()
    }
}

/// A rule matches a plugin iff its artifact id equals the rule's artifact id
/// and the rule's group id is absent or equal
fn plugin_matches(
    rule_group: Option<&str>,
    rule_artifact: &str,
    group_id: &str,
    artifact_id: &str,
) -> bool {
    rule_artifact == artifact_id && rule_group.is_none_or(|g| g == group_id)
}

fn executables_match(rules: &Executables, step: &StepId<'_>) -> bool {
    for plugin in &rules.plugins.plugin {
        if plugin_matches(
            plugin.group_id.as_deref(),
            &plugin.artifact_id,
            step.group_id,
            step.artifact_id,
        ) {
            return true;
        }
    }
    for execution in &rules.executions.execution {
        if plugin_matches(
            execution.group_id.as_deref(),
            &execution.artifact_id,
            step.group_id,
            step.artifact_id,
        ) && execution
            .exec_ids
            .exec_id
            .iter()
            .any(|id| id == step.execution_id)
        {
            return true;
        }
    }
    for goals in &rules.goals_lists.goals_list {
        if plugin_matches(
            goals.group_id.as_deref(),
            &goals.artifact_id,
            step.group_id,
            step.artifact_id,
        ) && goals.goals.goal.iter().any(|g| g == step.goal)
        {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step<'a>(
        group: &'a str,
        artifact: &'a str,
        execution: &'a str,
        goal: &'a str,
    ) -> StepId<'a> {
        StepId {
            group_id: group,
            artifact_id: artifact,
            execution_id: execution,
            goal,
        }
    }

    fn config_from(xml: &str) -> CacheConfig {
        let doc = CacheConfigDocument::from_xml(xml.as_bytes()).unwrap();
        CacheConfig::from_document(doc, CacheProperties::default()).unwrap()
    }

    #[test]
    fn defaults_are_enabled_and_empty() {
        let config = CacheConfig::with_defaults(CacheProperties::default()).unwrap();
        assert!(config.is_enabled());
        assert_eq!(config.algorithm(), HashAlgorithm::Sha256);
        assert!(config.global_includes().is_empty());
        assert!(config.max_local_builds_cached().is_none());
        assert!(!config.is_remote_enabled());
        assert!(!config.is_forced_execution(&step("g", "a", "default", "compile")));
        assert!(config.is_process_plugins());
    }

    #[test]
    fn property_parsing_is_lowercase_true() {
        let mut user = BTreeMap::new();
        user.insert(CACHE_ENABLED_PROPERTY.to_string(), "TRUE".to_string());
        user.insert(FAIL_FAST_PROPERTY.to_string(), "yes".to_string());
        let props = CacheProperties::from_maps(&user, &BTreeMap::new());
        assert_eq!(props.enabled, Some(true));
        assert!(!props.fail_fast);
    }

    #[test]
    fn user_properties_shadow_system_properties() {
        let mut user = BTreeMap::new();
        let mut system = BTreeMap::new();
        user.insert(BASELINE_URL_PROPERTY.to_string(), "file:///user".to_string());
        system.insert(BASELINE_URL_PROPERTY.to_string(), "file:///system".to_string());
        system.insert(SAVE_ENABLED_PROPERTY.to_string(), "true".to_string());
        let props = CacheProperties::from_maps(&user, &system);
        assert_eq!(props.baseline_url.as_deref(), Some("file:///user"));
        assert!(props.save_enabled);
    }

    #[test]
    fn disabled_by_property_overrides_document() {
        let props = CacheProperties {
            enabled: Some(false),
            ..Default::default()
        };
        let config = CacheConfig::with_defaults(props).unwrap();
        assert!(!config.is_enabled());
    }

    #[test]
    fn unknown_algorithm_fails_construction() {
        let mut doc = CacheConfigDocument::default();
        doc.configuration.hash_algorithm = "CRC32".to_string();
        let err = CacheConfig::from_document(doc, CacheProperties::default()).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn malformed_exclude_pattern_fails_construction() {
        let mut doc = CacheConfigDocument::default();
        doc.output.exclude.patterns.pattern.push("([".to_string());
        let err = CacheConfig::from_document(doc, CacheProperties::default()).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn plugin_rule_without_group_matches_any_group() {
        let config = config_from(
            r"<cache>
                <executionControl>
                  <runAlways>
                    <plugins>
                      <plugin><artifactId>enforcer</artifactId></plugin>
                    </plugins>
                  </runAlways>
                </executionControl>
              </cache>",
        );
        assert!(config.is_forced_execution(&step("org.one", "enforcer", "e1", "enforce")));
        assert!(config.is_forced_execution(&step("org.two", "enforcer", "e1", "enforce")));
        assert!(!config.is_forced_execution(&step("org.one", "other", "e1", "enforce")));
    }

    #[test]
    fn execution_rule_requires_execution_id() {
        let config = config_from(
            r"<cache>
                <executionControl>
                  <ignoreMissing>
                    <executions>
                      <execution>
                        <groupId>org.example</groupId>
                        <artifactId>report-plugin</artifactId>
                        <execIds><execId>nightly</execId></execIds>
                      </execution>
                    </executions>
                  </ignoreMissing>
                </executionControl>
              </cache>",
        );
        assert!(config.can_ignore_missing(&step("org.example", "report-plugin", "nightly", "report")));
        assert!(!config.can_ignore_missing(&step("org.example", "report-plugin", "default", "report")));
        assert!(!config.can_ignore_missing(&step("org.other", "report-plugin", "nightly", "report")));
    }

    #[test]
    fn goal_rule_requires_goal() {
        let config = config_from(
            r"<cache>
                <executionControl>
                  <runAlways>
                    <goalsLists>
                      <goalsList>
                        <groupId>org.example</groupId>
                        <artifactId>some-plugin</artifactId>
                        <goals><goal>generate</goal></goals>
                      </goalsList>
                    </goalsLists>
                  </runAlways>
                </executionControl>
              </cache>",
        );
        assert!(config.is_forced_execution(&step("org.example", "some-plugin", "e", "generate")));
        assert!(!config.is_forced_execution(&step("org.example", "some-plugin", "e", "verify")));
    }

    #[test]
    fn reconciliation_rule_matches_plugin_and_goal() {
        let config = config_from(
            r"<cache>
                <executionControl>
                  <reconcile>
                    <logAllProperties>true</logAllProperties>
                    <plugins>
                      <plugin>
                        <artifactId>compiler-plugin</artifactId>
                        <goal>compile</goal>
                        <reconciles>
                          <reconcile><propertyName>source</propertyName></reconcile>
                        </reconciles>
                      </plugin>
                    </plugins>
                  </reconcile>
                </executionControl>
              </cache>",
        );
        let matching = step("org.apache", "compiler-plugin", "default", "compile");
        let rule = config.reconciliation_for(&matching).unwrap();
        assert_eq!(rule.reconciles.reconcile[0].property_name, "source");
        assert!(config.reconciliation_for(&step("org.apache", "compiler-plugin", "default", "testCompile")).is_none());
        // section-level logAllProperties applies to every step
        assert!(config.is_log_all_properties(&step("g", "other", "e", "goal")));
    }

    #[test]
    fn plugin_scan_and_execution_scan_lookup() {
        let config = config_from(
            r"<cache>
                <input>
                  <plugins>
                    <plugin>
                      <artifactId>codegen</artifactId>
                      <dirScan>
                        <includes><include>schemas/</include></includes>
                      </dirScan>
                      <executions>
                        <execution>
                          <execIds><execId>gen-test</execId></execIds>
                          <dirScan>
                            <includes><include>test-schemas/</include></includes>
                          </dirScan>
                        </execution>
                      </executions>
                    </plugin>
                  </plugins>
                </input>
              </cache>",
        );
        let scan = config.plugin_scan("any.group", "codegen").unwrap();
        assert_eq!(
            scan.dir_scan.as_ref().unwrap().includes.include,
            vec!["schemas/"]
        );
        let exec_scan = config.execution_scan("any.group", "codegen", "gen-test").unwrap();
        assert_eq!(exec_scan.includes.include, vec!["test-schemas/"]);
        assert!(config.execution_scan("any.group", "codegen", "other").is_none());
    }

    #[test]
    fn output_exclusion_uses_regex() {
        let config = config_from(
            r"<cache>
                <output>
                  <exclude>
                    <patterns><pattern>.*\.tmp$</pattern></patterns>
                  </exclude>
                </output>
              </cache>",
        );
        assert!(config.is_output_excluded("target/scratch.tmp"));
        assert!(!config.is_output_excluded("target/app.jar"));
    }

    #[test]
    fn save_to_remote_from_property_or_document() {
        let props = CacheProperties {
            save_enabled: true,
            ..Default::default()
        };
        let config = CacheConfig::with_defaults(props).unwrap();
        assert!(config.is_save_to_remote());

        let config = config_from(
            r"<cache>
                <configuration>
                  <remote>
                    <url>/srv/cache</url>
                    <saveToRemote>true</saveToRemote>
                  </remote>
                </configuration>
              </cache>",
        );
        assert!(config.is_save_to_remote());
        assert!(config.is_remote_enabled());
    }
}
