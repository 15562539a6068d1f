use finch::prelude::*;
use finch_platform_mock::InMemoryPlatform;
use std::fs;
use std::path::Path;
use std::time::Duration;

const RESULTS: &str = r#"{
    "contradiction": {"precision": 0.81, "recall": 0.84, "f1-score": 0.82, "support": 1670},
    "entailment": {"precision": 0.87, "recall": 0.76, "f1-score": 0.82, "support": 1670},
    "neutral": {"precision": 0.74, "recall": 0.81, "f1-score": 0.77, "support": 1670},
    "micro avg": {"precision": 0.80, "recall": 0.80, "f1-score": 0.80, "support": 5010}
}"#;

fn write_sources(root: &Path) {
    fs::create_dir_all(root.join("utils_nlp/dataset")).unwrap();
    fs::write(root.join("utils_nlp/__init__.py"), "").unwrap();
    fs::write(root.join("utils_nlp/dataset/xnli.py"), "def load(): pass").unwrap();
    fs::write(root.join("train.py"), "import utils_nlp").unwrap();
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("finch=debug")
        .with_test_writer()
        .try_init();
}

fn config(root: &Path) -> PipelineConfig {
    let workspace = WorkspaceRef {
        subscription_id: Some("sub".into()),
        resource_group: Some("nlp-rg".into()),
        workspace_name: Some("nlp-ws".into()),
        region: Some("eastus".into()),
    };
    let cluster = ClusterSpec::new(defaults::CLUSTER_NAME, defaults::VM_SIZE, defaults::NODE_COUNT).unwrap();

    PipelineConfig {
        credential_file: Some(root.join("config.json")),
        library_dir: root.join("utils_nlp"),
        entry_script: root.join("train.py"),
        project_dir: root.join("project"),
        output_dir: root.join("outputs"),
        provision_poll: Duration::from_millis(1),
        run_poll: Duration::from_millis(1),
        ..PipelineConfig::new(workspace, cluster)
    }
}

#[tokio::test]
async fn second_run_reuses_workspace_cluster_and_blobs() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());

    let platform = InMemoryPlatform::new()
        .with_provisioning_polls(1)
        .with_artifact(defaults::RESULTS_ARTIFACT, RESULTS);

    let first = Pipeline::new(platform.clone(), config(dir.path())).run().await.unwrap();
    let after_first = platform.stats();
    assert_eq!(after_first.workspaces_created, 1);
    assert_eq!(after_first.clusters_created, 1);
    assert!(after_first.blobs_uploaded >= 3);

    let second = Pipeline::new(platform.clone(), config(dir.path())).run().await.unwrap();
    let after_second = platform.stats();

    assert_ne!(first.run.id, second.run.id);
    assert_eq!(second.cluster.name, first.cluster.name);
    assert_eq!(after_second.workspaces_created, 1);
    assert_eq!(after_second.clusters_created, 1);
    assert_eq!(after_second.blobs_uploaded, after_first.blobs_uploaded);
    assert_eq!(after_second.runs_submitted, 2);
}

#[tokio::test]
async fn report_keeps_the_platform_values() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path());

    let platform = InMemoryPlatform::new().with_artifact(defaults::RESULTS_ARTIFACT, RESULTS);
    let outcome = Pipeline::new(platform, config(dir.path())).run().await.unwrap();

    let labels: Vec<&str> = outcome.report.classes().map(|(label, _)| label).collect();
    assert_eq!(labels, vec!["contradiction", "entailment", "neutral"]);
    assert_eq!(outcome.report.get("micro avg").unwrap().support, 5010.0);

    let rendered = outcome.report.render(TableStyle { decimals: Some(2) });
    assert!(rendered.contains("0.87"));
    assert!(rendered.contains("micro avg"));
}
