//! End-to-end tests for the cache lifecycle
//!
//! Each test drives the engine the way the build driver would: initialize,
//! begin module, wrap steps, complete, write the index. Scenarios cover
//! hit/miss flows, execution control, reconciliation, remote degradation,
//! and the bounded local store.

use buildcache_core::hash::HashAlgorithm;
use buildcache_core::model::{
    ModuleId, PluginId, RecordSource, StepExecutionRecord, BUILD_RECORD_FILE,
    CACHE_IMPLEMENTATION_VERSION, PROJECT_INDEX_FILE, SCHEMA_VERSION,
};
use buildcache_core::xml;
use buildcache_engine::{
    initialize, BuildStep, CacheEngine, CacheState, DriverSession, ModuleArtifact,
    ModuleBuildContext, ModuleCompletion, ModuleState, StepOutcome, StepReport,
};
use buildcache_store::repository::record_path;
use buildcache_store::{BlobStore, LocalBlobStore};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn driver_session(root: &Path, props: &[(&str, &str)]) -> DriverSession {
    DriverSession {
        multimodule_root: root.to_path_buf(),
        user_properties: props
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        system_properties: BTreeMap::new(),
    }
}

fn engine_for(root: &Path, props: &[(&str, &str)]) -> CacheEngine {
    match initialize(&driver_session(root, props)).unwrap() {
        CacheState::Initialized(engine) => engine,
        CacheState::Disabled => panic!("cache unexpectedly disabled"),
    }
}

fn write_config(root: &Path, xml: &str) {
    fs::create_dir_all(root.join(".mvn")).unwrap();
    fs::write(root.join(".mvn/maven-cache-config.xml"), xml).unwrap();
}

fn module_ctx(root: &Path) -> ModuleBuildContext {
    ModuleBuildContext {
        id: ModuleId::new("org.example", "app", "1.0.0"),
        root_dir: root.to_path_buf(),
        output_dir_name: "target".to_string(),
        effective_descriptor: b"<project><groupId>org.example</groupId></project>".to_vec(),
        plugins: vec![],
        upstream: vec![],
    }
}

fn compile_step() -> BuildStep {
    BuildStep {
        plugin: PluginId::new("org.apache.maven.plugins", "maven-compiler-plugin", "3.11.0"),
        execution_id: "default-compile".to_string(),
        goal: "compile".to_string(),
        configuration: BTreeMap::new(),
    }
}

fn jar_artifact(root: &Path) -> ModuleArtifact {
    ModuleArtifact {
        file: root.join("target/app-1.0.0.jar"),
        relative_path: "app-1.0.0.jar".to_string(),
        classifier: None,
        extension: "jar".to_string(),
    }
}

/// Run one full module build: the step writes the jar, completion declares
/// it. Returns the final module state.
fn build_module(engine: &CacheEngine, root: &Path, jar_contents: &[u8]) -> (ModuleState, bool) {
    let mut session = engine.begin_module(module_ctx(root)).unwrap();
    let was_hit = session.is_hit();
    let jar = root.join("target/app-1.0.0.jar");
    let outcome = session
        .around_step(&compile_step(), || {
            fs::create_dir_all(jar.parent().unwrap()).unwrap();
            fs::write(&jar, jar_contents).unwrap();
            Ok::<_, String>(StepReport::default())
        })
        .unwrap()
        .unwrap();
    if was_hit {
        assert_eq!(outcome, StepOutcome::Restored);
    } else {
        assert_eq!(outcome, StepOutcome::Executed);
    }
    let completion = ModuleCompletion {
        success: true,
        artifacts: vec![jar_artifact(root)],
    };
    let summary = engine.on_module_complete(&mut session, &completion).unwrap();
    (summary.state, was_hit)
}

fn record_dirs(root: &Path) -> Vec<PathBuf> {
    let base = root.join(".mvn/cache/v1/org.example/app");
    if !base.is_dir() {
        return vec![];
    }
    let mut dirs: Vec<PathBuf> = fs::read_dir(&base)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

#[test]
fn identical_builds_miss_then_hit() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("src/Main.java"), "class Main {}").unwrap();

    // first build: miss, executed, saved
    let engine = engine_for(root, &[]);
    let (state, was_hit) = build_module(&engine, root, b"jar bytes v1");
    assert!(!was_hit);
    assert_eq!(state, ModuleState::Saved);
    engine.on_build_complete("build-1").unwrap();

    let dirs = record_dirs(root);
    assert_eq!(dirs.len(), 1);
    let record_bytes = fs::read(dirs[0].join(BUILD_RECORD_FILE)).unwrap();
    let record = xml::read_build_record(&record_bytes).unwrap();
    assert_eq!(record.steps.len(), 1);
    assert_eq!(record.artifacts.len(), 1);

    // wipe the build output, rebuild: hit, restored, done
    fs::remove_dir_all(root.join("target")).unwrap();
    let engine = engine_for(root, &[]);
    let (state, was_hit) = build_module(&engine, root, b"must not be written");
    assert!(was_hit);
    assert_eq!(state, ModuleState::Done);

    // the restored artifact carries the recorded digest
    let restored = root.join("target/app-1.0.0.jar");
    let (digest, _) = HashAlgorithm::Sha256.hash_file(&restored).unwrap();
    assert_eq!(digest, record.artifacts[0].digest);
    assert_eq!(fs::read(&restored).unwrap(), b"jar bytes v1");
}

#[test]
fn source_change_changes_fingerprint_and_misses() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("src/Main.java"), "class Main {}").unwrap();

    let engine = engine_for(root, &[]);
    let (state, _) = build_module(&engine, root, b"jar v1");
    assert_eq!(state, ModuleState::Saved);

    fs::write(root.join("src/Main.java"), "class Main { int changed; }").unwrap();
    let engine = engine_for(root, &[]);
    let (state, was_hit) = build_module(&engine, root, b"jar v2");
    assert!(!was_hit);
    assert_eq!(state, ModuleState::Saved);

    // two distinct record directories under different fingerprints
    assert_eq!(record_dirs(root).len(), 2);
}

#[test]
fn run_always_step_executes_while_others_restore() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("src/Main.java"), "class Main {}").unwrap();
    write_config(
        root,
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

    let generate_step = BuildStep {
        plugin: PluginId::new("org.example", "some-plugin", "1.0"),
        execution_id: "default".to_string(),
        goal: "generate".to_string(),
        configuration: BTreeMap::new(),
    };

    let run_build = |expect_hit: bool| {
        let engine = engine_for(root, &[]);
        let mut session = engine.begin_module(module_ctx(root)).unwrap();
        assert_eq!(session.is_hit(), expect_hit);

        let generated = std::cell::Cell::new(false);
        let outcome = session
            .around_step(&generate_step, || {
                generated.set(true);
                Ok::<_, String>(StepReport::default())
            })
            .unwrap()
            .unwrap();
        assert_eq!(outcome, StepOutcome::Executed);
        assert!(generated.get(), "runAlways step must execute on every build");

        let jar = root.join("target/app-1.0.0.jar");
        let outcome = session
            .around_step(&compile_step(), || {
                fs::create_dir_all(jar.parent().unwrap()).unwrap();
                fs::write(&jar, b"jar").unwrap();
                Ok::<_, String>(StepReport::default())
            })
            .unwrap()
            .unwrap();
        if expect_hit {
            assert_eq!(outcome, StepOutcome::Restored);
        } else {
            assert_eq!(outcome, StepOutcome::Executed);
        }

        let completion = ModuleCompletion {
            success: true,
            artifacts: vec![jar_artifact(root)],
        };
        engine.on_module_complete(&mut session, &completion).unwrap();
    };

    run_build(false);
    run_build(true);
}

fn seed_baseline(baseline_dir: &Path, module: &ModuleId, javac_source: &str) {
    let algo = HashAlgorithm::Sha256;
    let record = buildcache_core::model::BuildRecord {
        schema_version: SCHEMA_VERSION.to_string(),
        implementation_version: CACHE_IMPLEMENTATION_VERSION.to_string(),
        module: module.clone(),
        fingerprint: algo.hash(b"baseline inputs"),
        timestamp: chrono::Utc::now(),
        source: RecordSource::Local,
        steps: vec![StepExecutionRecord {
            plugin: PluginId::new("org.apache.maven.plugins", "maven-compiler-plugin", "3.11.0"),
            execution_id: "default-compile".to_string(),
            goal: "compile".to_string(),
            configuration_digest: algo.hash(b"cfg"),
            tracked_properties: [("javac.source".to_string(), javac_source.to_string())]
                .into_iter()
                .collect(),
            observed_properties: BTreeMap::new(),
        }],
        artifacts: vec![],
        upstream: vec![],
    };
    let index = buildcache_core::model::ProjectIndex {
        build_id: "baseline-build".to_string(),
        entries: vec![buildcache_core::model::ProjectIndexEntry {
            module: module.clone(),
            fingerprint: record.fingerprint.clone(),
            url: None,
        }],
    };
    let store = LocalBlobStore::new(baseline_dir);
    store
        .put(PROJECT_INDEX_FILE, &xml::write_project_index(&index).unwrap())
        .unwrap();
    store
        .put(
            &record_path(&record.module, &record.fingerprint),
            &xml::write_build_record(&record).unwrap(),
        )
        .unwrap();
}

const RECONCILE_CONFIG: &str = r"<cache>
    <executionControl>
      <reconcile>
        <plugins>
          <plugin>
            <artifactId>maven-compiler-plugin</artifactId>
            <goal>compile</goal>
            <reconciles>
              <reconcile><propertyName>javac.source</propertyName></reconcile>
            </reconciles>
          </plugin>
        </plugins>
      </reconcile>
    </executionControl>
  </cache>";

fn reconciled_build(root: &Path, baseline: &Path, fail_fast: bool) -> buildcache_core::Result<ModuleState> {
    let baseline_url = baseline.display().to_string();
    let mut props = vec![("remote.cache.baselineUrl", baseline_url.as_str())];
    if fail_fast {
        props.push(("remote.cache.failFast", "true"));
    }
    let engine = engine_for(root, &props);
    let mut session = engine.begin_module(module_ctx(root)).unwrap();
    let jar = root.join("target/app-1.0.0.jar");
    session
        .around_step(&compile_step(), || {
            fs::create_dir_all(jar.parent().unwrap()).unwrap();
            fs::write(&jar, b"jar").unwrap();
            Ok::<_, String>(StepReport {
                properties: [("javac.source".to_string(), "11".to_string())]
                    .into_iter()
                    .collect(),
            })
        })
        .unwrap()
        .unwrap();
    let completion = ModuleCompletion {
        success: true,
        artifacts: vec![jar_artifact(root)],
    };
    engine
        .on_module_complete(&mut session, &completion)
        .map(|summary| summary.state)
}

#[test]
fn baseline_mismatch_is_collected_without_fail_fast() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("src/Main.java"), "class Main {}").unwrap();
    write_config(root, RECONCILE_CONFIG);

    let baseline_dir = TempDir::new().unwrap();
    seed_baseline(baseline_dir.path(), &module_ctx(root).id, "1.8");

    let state = reconciled_build(root, baseline_dir.path(), false).unwrap();
    assert_eq!(state, ModuleState::Done);

    // diff.xml holds the ERROR severity entry
    let diff_bytes = fs::read(root.join("target/diff.xml")).unwrap();
    let diff = xml::read_diff_report(&diff_bytes).unwrap();
    assert_eq!(diff.entries.len(), 1);
    assert_eq!(diff.entries[0].property, "javac.source");
    assert_eq!(
        diff.entries[0].severity,
        buildcache_core::model::DiffSeverity::Error
    );
    assert_eq!(diff.entries[0].baseline_value.as_deref(), Some("1.8"));
    assert_eq!(diff.entries[0].current_value.as_deref(), Some("11"));
}

#[test]
fn baseline_mismatch_fails_module_with_fail_fast() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("src/Main.java"), "class Main {}").unwrap();
    write_config(root, RECONCILE_CONFIG);

    let baseline_dir = TempDir::new().unwrap();
    seed_baseline(baseline_dir.path(), &module_ctx(root).id, "1.8");

    let err = reconciled_build(root, baseline_dir.path(), true).unwrap_err();
    assert!(matches!(
        err,
        buildcache_core::Error::Reconciliation { .. }
    ));
}

#[test]
fn unreachable_remote_degrades_and_local_save_succeeds() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("src/Main.java"), "class Main {}").unwrap();
    write_config(
        root,
        r"<cache>
            <configuration>
              <remote>
                <url>/nonexistent/shared/cache</url>
                <saveToRemote>true</saveToRemote>
              </remote>
            </configuration>
          </cache>",
    );

    let engine = engine_for(root, &[]);
    // lookup returns absent instead of failing
    let (state, was_hit) = build_module(&engine, root, b"jar bytes");
    assert!(!was_hit);
    // local save succeeded even though the remote one was skipped
    assert_eq!(state, ModuleState::Saved);
    assert_eq!(record_dirs(root).len(), 1);
}

#[test]
fn local_store_is_bounded_lru() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("src")).unwrap();
    write_config(
        root,
        r"<cache>
            <configuration>
              <local><maxBuildsCached>2</maxBuildsCached></local>
            </configuration>
          </cache>",
    );

    let mut fingerprint_dirs = Vec::new();
    for revision in ["one", "two", "three"] {
        fs::write(
            root.join("src/Main.java"),
            format!("class Main {{ /* {revision} */ }}"),
        )
        .unwrap();
        // records need distinct mtimes for LRU ordering
        std::thread::sleep(std::time::Duration::from_millis(20));
        let engine = engine_for(root, &[]);
        let (state, _) = build_module(&engine, root, revision.as_bytes());
        assert_eq!(state, ModuleState::Saved);
        fingerprint_dirs.push(record_dirs(root));
    }

    let remaining = record_dirs(root);
    assert_eq!(remaining.len(), 2, "only the two newest records remain");
    // the first build's record is the one that was evicted
    let first = &fingerprint_dirs[0][0];
    assert!(!first.exists());
}

#[test]
fn project_index_is_written_and_idempotent() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("src/Main.java"), "class Main {}").unwrap();

    let engine = engine_for(root, &[]);
    build_module(&engine, root, b"jar");
    let index = engine.on_build_complete("build-7").unwrap();
    assert_eq!(index.entries.len(), 1);
    assert_eq!(index.entries[0].module.artifact_id, "app");

    let store = LocalBlobStore::new(root.join(".mvn/cache"));
    let written = store
        .get("v1/reports/build-7/cache-report.xml")
        .unwrap()
        .unwrap();
    assert_eq!(xml::read_project_index(&written).unwrap(), index);
    // identical outcomes serialize to identical bytes
    assert_eq!(written, xml::write_project_index(&index).unwrap());
}

#[test]
fn upstream_fingerprint_feeds_downstream() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let lib_root = root.join("lib");
    let app_root = root.join("app");
    fs::create_dir_all(lib_root.join("src")).unwrap();
    fs::create_dir_all(app_root.join("src")).unwrap();
    fs::write(lib_root.join("src/Lib.java"), "class Lib {}").unwrap();
    fs::write(app_root.join("src/App.java"), "class App {}").unwrap();

    let lib_id = ModuleId::new("org.example", "lib", "1.0.0");
    let app_fingerprint = |lib_source: &str| {
        fs::write(lib_root.join("src/Lib.java"), lib_source).unwrap();
        let engine = engine_for(root, &[]);
        let lib_ctx = ModuleBuildContext {
            id: lib_id.clone(),
            root_dir: lib_root.clone(),
            output_dir_name: "target".to_string(),
            effective_descriptor: b"<project/>".to_vec(),
            plugins: vec![],
            upstream: vec![],
        };
        let app_ctx = ModuleBuildContext {
            id: ModuleId::new("org.example", "app", "1.0.0"),
            root_dir: app_root.clone(),
            output_dir_name: "target".to_string(),
            effective_descriptor: b"<project/>".to_vec(),
            plugins: vec![],
            upstream: vec![lib_id.clone()],
        };

        // downstream begins on another thread and blocks on the upstream
        // publication
        let engine = std::sync::Arc::new(engine);
        let downstream = {
            let engine = std::sync::Arc::clone(&engine);
            std::thread::spawn(move || {
                let session = engine.begin_module(app_ctx).unwrap();
                session.fingerprint().cloned()
            })
        };
        let lib_session = engine.begin_module(lib_ctx).unwrap();
        assert!(lib_session.fingerprint().is_some());
        downstream.join().unwrap().unwrap()
    };

    let base = app_fingerprint("class Lib {}");
    let same = app_fingerprint("class Lib {}");
    let changed = app_fingerprint("class Lib { int v2; }");
    assert_eq!(base, same);
    assert_ne!(base, changed, "upstream change must invalidate downstream");
}

#[test]
fn concurrent_saves_keep_exactly_one_record() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("src/Main.java"), "class Main {}").unwrap();

    // two independent engines over the same store, both deciding "miss"
    // before either saves
    let engine_a = engine_for(root, &[]);
    let engine_b = engine_for(root, &[]);
    let mut session_a = engine_a.begin_module(module_ctx(root)).unwrap();
    let mut session_b = engine_b.begin_module(module_ctx(root)).unwrap();
    assert!(!session_a.is_hit());
    assert!(!session_b.is_hit());

    let jar = root.join("target/app-1.0.0.jar");
    for session in [&mut session_a, &mut session_b] {
        session
            .around_step(&compile_step(), || {
                fs::create_dir_all(jar.parent().unwrap()).unwrap();
                fs::write(&jar, b"jar bytes").unwrap();
                Ok::<_, String>(StepReport::default())
            })
            .unwrap()
            .unwrap();
    }

    let completion = ModuleCompletion {
        success: true,
        artifacts: vec![jar_artifact(root)],
    };
    let (state_a, state_b) = std::thread::scope(|scope| {
        let a = scope.spawn(|| {
            engine_a
                .on_module_complete(&mut session_a, &completion)
                .unwrap()
                .state
        });
        let b = scope.spawn(|| {
            engine_b
                .on_module_complete(&mut session_b, &completion)
                .unwrap()
                .state
        });
        (a.join().unwrap(), b.join().unwrap())
    });

    let outcomes = [state_a, state_b];
    assert!(outcomes.contains(&ModuleState::Saved));
    assert!(outcomes.contains(&ModuleState::SaveSkipped));
    // exactly one record exists
    assert_eq!(record_dirs(root).len(), 1);
    let record_file = record_dirs(root)[0].join(BUILD_RECORD_FILE);
    assert!(record_file.exists());
}

#[test]
fn disabled_cache_initializes_to_disabled() {
    let tmp = TempDir::new().unwrap();
    let state = initialize(&driver_session(
        tmp.path(),
        &[("remote.cache.enabled", "false")],
    ))
    .unwrap();
    assert!(!state.is_enabled());
    assert!(matches!(
        state.engine().unwrap_err(),
        buildcache_core::Error::Disabled
    ));
}

#[test]
fn malformed_configuration_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write_config(root, "<cache><configuration>");
    let err = initialize(&driver_session(root, &[])).unwrap_err();
    assert!(matches!(err, buildcache_core::Error::Configuration { .. }));
}

#[test]
fn config_path_property_overrides_default_location() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let alt = tmp.path().join("custom-config.xml");
    fs::write(
        &alt,
        r"<cache><configuration><enabled>false</enabled></configuration></cache>",
    )
    .unwrap();
    let alt_str = alt.display().to_string();
    let state = initialize(&driver_session(
        root,
        &[("remote.cache.configPath", alt_str.as_str())],
    ))
    .unwrap();
    assert!(!state.is_enabled());
}
