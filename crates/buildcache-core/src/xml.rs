//! Persisted XML documents
//!
//! Serde documents for the three record files (`build.xml`,
//! `cache-report.xml`, `diff.xml`) plus the conversions to and from the
//! model types. The documents keep every digest as a hex string next to a
//! `hashAlgorithm` element, so a record produced under another algorithm is
//! rejected at parse time rather than misread.
//!
//! Maps persist as repeated `<property>` elements with `name`/`value`
//! children, backed by `BTreeMap` in the model so serialized bytes are
//! deterministic for equal content.

use crate::hash::{Fingerprint, HashAlgorithm};
use crate::model::{
    ArtifactEntry, BuildRecord, DiffEntry, DiffReport, DiffSeverity, ModuleId, PairedStep,
    PluginId, ProjectIndex, ProjectIndexEntry, RecordSource, StepExecutionRecord, UpstreamModule,
};
use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn parse_error(file: &'static str, message: impl Into<String>) -> Error {
    Error::store_io(
        std::io::Error::new(std::io::ErrorKind::InvalidData, message.into()),
        file,
        "parse",
    )
}

fn from_xml<'de, T: Deserialize<'de>>(file: &'static str, bytes: &'de [u8]) -> Result<T> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| parse_error(file, format!("document is not valid UTF-8: {e}")))?;
    quick_xml::de::from_str(text).map_err(|e| parse_error(file, e.to_string()))
}

fn to_xml<T: Serialize>(file: &'static str, value: &T) -> Result<Vec<u8>> {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let mut ser = quick_xml::se::Serializer::new(&mut out);
    ser.indent(' ', 2);
    value.serialize(ser).map_err(|e| {
        Error::store_io(
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
            file,
            "serialize",
        )
    })?;
    out.push('\n');
    Ok(out.into_bytes())
}

// --- shared fragments ------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ModuleIdDoc {
    group_id: String,
    artifact_id: String,
    version: String,
}

impl From<&ModuleId> for ModuleIdDoc {
    fn from(id: &ModuleId) -> Self {
        Self {
            group_id: id.group_id.clone(),
            artifact_id: id.artifact_id.clone(),
            version: id.version.clone(),
        }
    }
}

impl From<ModuleIdDoc> for ModuleId {
    fn from(doc: ModuleIdDoc) -> Self {
        Self {
            group_id: doc.group_id,
            artifact_id: doc.artifact_id,
            version: doc.version,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PluginIdDoc {
    group_id: String,
    artifact_id: String,
    version: String,
}

impl From<&PluginId> for PluginIdDoc {
    fn from(id: &PluginId) -> Self {
        Self {
            group_id: id.group_id.clone(),
            artifact_id: id.artifact_id.clone(),
            version: id.version.clone(),
        }
    }
}

impl From<PluginIdDoc> for PluginId {
    fn from(doc: PluginIdDoc) -> Self {
        Self {
            group_id: doc.group_id,
            artifact_id: doc.artifact_id,
            version: doc.version,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PropertyDoc {
    name: String,
    value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PropertiesDoc {
    property: Vec<PropertyDoc>,
}

impl PropertiesDoc {
    fn from_map(map: &BTreeMap<String, String>) -> Self {
        Self {
            property: map
                .iter()
                .map(|(name, value)| PropertyDoc {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }

    fn into_map(self) -> BTreeMap<String, String> {
        self.property
            .into_iter()
            .map(|p| (p.name, p.value))
            .collect()
    }
}

// --- build record ----------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "buildInfo", rename_all = "camelCase", default)]
struct BuildInfoDoc {
    schema_version: String,
    cache_implementation_version: String,
    hash_algorithm: String,
    module_id: ModuleIdDoc,
    fingerprint: String,
    timestamp: String,
    source: String,
    steps: StepsDoc,
    artifacts: ArtifactsDoc,
    upstream: UpstreamDoc,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StepsDoc {
    step: Vec<StepDoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StepDoc {
    plugin_id: PluginIdDoc,
    execution_id: String,
    goal: String,
    configuration_digest: String,
    tracked_properties: PropertiesDoc,
    observed_properties: PropertiesDoc,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ArtifactsDoc {
    artifact: Vec<ArtifactDoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ArtifactDoc {
    #[serde(rename = "filename")]
    file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    classifier: Option<String>,
    extension: String,
    content_digest: String,
    size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UpstreamDoc {
    module: Vec<UpstreamEntryDoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UpstreamEntryDoc {
    module_id: ModuleIdDoc,
    fingerprint: String,
}

/// Serialize a build record to `build.xml` bytes
pub fn write_build_record(record: &BuildRecord) -> Result<Vec<u8>> {
    let algorithm = record.fingerprint.algorithm();
    let doc = BuildInfoDoc {
        schema_version: record.schema_version.clone(),
        cache_implementation_version: record.implementation_version.clone(),
        hash_algorithm: algorithm.id().to_string(),
        module_id: (&record.module).into(),
        fingerprint: record.fingerprint.to_hex(),
        timestamp: record
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        source: record.source.as_str().to_string(),
        steps: StepsDoc {
            step: record
                .steps
                .iter()
                .map(|s| StepDoc {
                    plugin_id: (&s.plugin).into(),
                    execution_id: s.execution_id.clone(),
                    goal: s.goal.clone(),
                    configuration_digest: s.configuration_digest.to_hex(),
                    tracked_properties: PropertiesDoc::from_map(&s.tracked_properties),
                    observed_properties: PropertiesDoc::from_map(&s.observed_properties),
                })
                .collect(),
        },
        artifacts: ArtifactsDoc {
            artifact: record
                .artifacts
                .iter()
                .map(|a| ArtifactDoc {
                    file_name: a.file_name.clone(),
                    classifier: a.classifier.clone(),
                    extension: a.extension.clone(),
                    content_digest: a.digest.to_hex(),
                    size_bytes: a.size_bytes,
                })
                .collect(),
        },
        upstream: UpstreamDoc {
            module: record
                .upstream
                .iter()
                .map(|u| UpstreamEntryDoc {
                    module_id: (&u.module).into(),
                    fingerprint: u.fingerprint.to_hex(),
                })
                .collect(),
        },
    };
    to_xml(crate::model::BUILD_RECORD_FILE, &doc)
}

/// Parse `build.xml` bytes back into a build record.
///
/// # Errors
///
/// Malformed documents, unknown algorithms and digests of the wrong width
/// all fail; a caller treating the record as optional degrades to a miss.
pub fn read_build_record(bytes: &[u8]) -> Result<BuildRecord> {
    const FILE: &str = crate::model::BUILD_RECORD_FILE;
    let doc: BuildInfoDoc = from_xml(FILE, bytes)?;
    let algorithm = HashAlgorithm::from_id(&doc.hash_algorithm)
        .map_err(|e| parse_error(FILE, e.to_string()))?;
    let fingerprint = Fingerprint::from_hex(algorithm, &doc.fingerprint)
        .map_err(|e| parse_error(FILE, e.to_string()))?;
    let timestamp = DateTime::parse_from_rfc3339(&doc.timestamp)
        .map_err(|e| parse_error(FILE, format!("bad timestamp '{}': {e}", doc.timestamp)))?
        .with_timezone(&Utc);
    let source = RecordSource::parse(&doc.source)
        .ok_or_else(|| parse_error(FILE, format!("unknown record source '{}'", doc.source)))?;

    let steps = doc
        .steps
        .step
        .into_iter()
        .map(|s| {
            Ok(StepExecutionRecord {
                plugin: s.plugin_id.into(),
                execution_id: s.execution_id,
                goal: s.goal,
                configuration_digest: Fingerprint::from_hex(algorithm, &s.configuration_digest)
                    .map_err(|e| parse_error(FILE, e.to_string()))?,
                tracked_properties: s.tracked_properties.into_map(),
                observed_properties: s.observed_properties.into_map(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let artifacts = doc
        .artifacts
        .artifact
        .into_iter()
        .map(|a| {
            Ok(ArtifactEntry {
                file_name: a.file_name,
                classifier: a.classifier,
                extension: a.extension,
                digest: Fingerprint::from_hex(algorithm, &a.content_digest)
                    .map_err(|e| parse_error(FILE, e.to_string()))?,
                size_bytes: a.size_bytes,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let upstream = doc
        .upstream
        .module
        .into_iter()
        .map(|u| {
            Ok(UpstreamModule {
                module: u.module_id.into(),
                fingerprint: Fingerprint::from_hex(algorithm, &u.fingerprint)
                    .map_err(|e| parse_error(FILE, e.to_string()))?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(BuildRecord {
        schema_version: doc.schema_version,
        implementation_version: doc.cache_implementation_version,
        module: doc.module_id.into(),
        fingerprint,
        timestamp,
        source,
        steps,
        artifacts,
        upstream,
    })
}

// --- project index ---------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "cacheReport", rename_all = "camelCase", default)]
struct CacheReportDoc {
    build_id: String,
    hash_algorithm: String,
    projects: ProjectsDoc,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ProjectsDoc {
    project: Vec<ProjectDoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ProjectDoc {
    group_id: String,
    artifact_id: String,
    version: String,
    fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

/// Serialize a project index to `cache-report.xml` bytes.
///
/// Output bytes depend only on the index content, so identical inputs
/// always produce identical documents.
pub fn write_project_index(index: &ProjectIndex) -> Result<Vec<u8>> {
    const FILE: &str = crate::model::PROJECT_INDEX_FILE;
    let algorithm = match index.entries.first() {
        Some(first) => first.fingerprint.algorithm(),
        None => HashAlgorithm::default(),
    };
    if index
        .entries
        .iter()
        .any(|e| e.fingerprint.algorithm() != algorithm)
    {
        return Err(Error::configuration(
            "project index mixes fingerprints of different algorithms",
        ));
    }
    let doc = CacheReportDoc {
        build_id: index.build_id.clone(),
        hash_algorithm: algorithm.id().to_string(),
        projects: ProjectsDoc {
            project: index
                .entries
                .iter()
                .map(|e| ProjectDoc {
                    group_id: e.module.group_id.clone(),
                    artifact_id: e.module.artifact_id.clone(),
                    version: e.module.version.clone(),
                    fingerprint: e.fingerprint.to_hex(),
                    url: e.url.clone(),
                })
                .collect(),
        },
    };
    to_xml(FILE, &doc)
}

/// Parse `cache-report.xml` bytes back into a project index
pub fn read_project_index(bytes: &[u8]) -> Result<ProjectIndex> {
    const FILE: &str = crate::model::PROJECT_INDEX_FILE;
    let doc: CacheReportDoc = from_xml(FILE, bytes)?;
    let algorithm = HashAlgorithm::from_id(&doc.hash_algorithm)
        .map_err(|e| parse_error(FILE, e.to_string()))?;
    let entries = doc
        .projects
        .project
        .into_iter()
        .map(|p| {
            Ok(ProjectIndexEntry {
                module: ModuleId::new(p.group_id, p.artifact_id, p.version),
                fingerprint: Fingerprint::from_hex(algorithm, &p.fingerprint)
                    .map_err(|e| parse_error(FILE, e.to_string()))?,
                url: p.url,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ProjectIndex {
        build_id: doc.build_id,
        entries,
    })
}

// --- reconciliation diff ---------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "diff", rename_all = "camelCase", default)]
struct DiffDoc {
    module_id: ModuleIdDoc,
    paired_steps: PairedStepsDoc,
    property_diffs: PropertyDiffsDoc,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PairedStepsDoc {
    step: Vec<PairedStepDoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PairedStepDoc {
    plugin_id: PluginIdDoc,
    execution_id: String,
    goal: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PropertyDiffsDoc {
    diff: Vec<PropertyDiffDoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PropertyDiffDoc {
    plugin_id: PluginIdDoc,
    execution_id: String,
    goal: String,
    property: String,
    severity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    baseline_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_value: Option<String>,
}

/// Serialize a reconciliation diff to `diff.xml` bytes
pub fn write_diff_report(report: &DiffReport) -> Result<Vec<u8>> {
    let doc = DiffDoc {
        module_id: (&report.module).into(),
        paired_steps: PairedStepsDoc {
            step: report
                .paired_steps
                .iter()
                .map(|s| PairedStepDoc {
                    plugin_id: (&s.plugin).into(),
                    execution_id: s.execution_id.clone(),
                    goal: s.goal.clone(),
                })
                .collect(),
        },
        property_diffs: PropertyDiffsDoc {
            diff: report
                .entries
                .iter()
                .map(|e| PropertyDiffDoc {
                    plugin_id: (&e.plugin).into(),
                    execution_id: e.execution_id.clone(),
                    goal: e.goal.clone(),
                    property: e.property.clone(),
                    severity: e.severity.as_str().to_string(),
                    baseline_value: e.baseline_value.clone(),
                    current_value: e.current_value.clone(),
                })
                .collect(),
        },
    };
    to_xml(crate::model::DIFF_FILE, &doc)
}

/// Parse `diff.xml` bytes back into a diff report
pub fn read_diff_report(bytes: &[u8]) -> Result<DiffReport> {
    const FILE: &str = crate::model::DIFF_FILE;
    let doc: DiffDoc = from_xml(FILE, bytes)?;
    let entries = doc
        .property_diffs
        .diff
        .into_iter()
        .map(|d| {
            let severity = DiffSeverity::parse(&d.severity)
                .ok_or_else(|| parse_error(FILE, format!("unknown severity '{}'", d.severity)))?;
            Ok(DiffEntry {
                plugin: d.plugin_id.into(),
                execution_id: d.execution_id,
                goal: d.goal,
                property: d.property,
                severity,
                baseline_value: d.baseline_value,
                current_value: d.current_value,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(DiffReport {
        module: doc.module_id.into(),
        paired_steps: doc
            .paired_steps
            .step
            .into_iter()
            .map(|s| PairedStep {
                plugin: s.plugin_id.into(),
                execution_id: s.execution_id,
                goal: s.goal,
            })
            .collect(),
        entries,
    })
}
