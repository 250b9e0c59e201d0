//! Driver-supplied context types
//!
//! The build driver owns module iteration and step execution; the engine
//! sees builds only through these handles. All of them are plain data so a
//! driver can assemble them from whatever project model it carries.

use buildcache_core::config::StepId;
use buildcache_core::model::{ModuleId, PluginId};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The top-level build session as the driver sees it
#[derive(Debug, Clone, Default)]
pub struct DriverSession {
    /// Root directory of the multimodule reactor
    pub multimodule_root: PathBuf,
    /// `-D` style properties supplied on the command line
    pub user_properties: BTreeMap<String, String>,
    /// Properties of the surrounding process/environment
    pub system_properties: BTreeMap<String, String>,
}

/// One module about to be built
#[derive(Debug, Clone)]
pub struct ModuleBuildContext {
    pub id: ModuleId,
    /// The module's source root
    pub root_dir: PathBuf,
    /// Name of the build output directory under the root, e.g. `target`
    pub output_dir_name: String,
    /// The effective project descriptor, as XML bytes
    pub effective_descriptor: Vec<u8>,
    /// Plugins configured in this module
    pub plugins: Vec<PluginDescriptor>,
    /// Immediate upstream modules in the reactor
    pub upstream: Vec<ModuleId>,
}

impl ModuleBuildContext {
    /// The module's build output directory
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.root_dir.join(&self.output_dir_name)
    }
}

/// One plugin configured in a module
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub id: PluginId,
    /// Effective plugin configuration as flat properties
    pub configuration: BTreeMap<String, String>,
    pub executions: Vec<ExecutionDescriptor>,
}

/// One configured execution of a plugin
#[derive(Debug, Clone)]
pub struct ExecutionDescriptor {
    pub id: String,
    pub goals: Vec<String>,
}

/// One build step about to be invoked
#[derive(Debug, Clone)]
pub struct BuildStep {
    pub plugin: PluginId,
    pub execution_id: String,
    pub goal: String,
    /// Effective configuration of this invocation as flat properties
    pub configuration: BTreeMap<String, String>,
}

impl BuildStep {
    #[must_use]
    pub fn step_id(&self) -> StepId<'_> {
        StepId {
            group_id: &self.plugin.group_id,
            artifact_id: &self.plugin.artifact_id,
            execution_id: &self.execution_id,
            goal: &self.goal,
        }
    }
}

/// What an executed step reports back to the cache
#[derive(Debug, Clone, Default)]
pub struct StepReport {
    /// Properties observed after execution, e.g. resolved tool versions
    pub properties: BTreeMap<String, String>,
}

/// One artifact the driver declares after a successful module build
#[derive(Debug, Clone)]
pub struct ModuleArtifact {
    /// Produced file on disk
    pub file: PathBuf,
    /// Path relative to the output directory under which the artifact is
    /// recorded and later restored; usually just the file name
    pub relative_path: String,
    /// Classifier; absent for the primary artifact
    pub classifier: Option<String>,
    pub extension: String,
}

/// Driver-reported outcome of a module build
#[derive(Debug, Clone, Default)]
pub struct ModuleCompletion {
    pub success: bool,
    /// Artifacts produced by the build, primary first by convention
    pub artifacts: Vec<ModuleArtifact>,
}
