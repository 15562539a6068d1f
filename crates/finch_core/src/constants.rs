pub mod routes {
    pub const HEALTH: &str = "/health";

    pub const WORKSPACE: &str = "/workspaces/{subscription}/{resource_group}/{workspace}";
    pub const COMPUTE: &str = "/workspaces/{subscription}/{resource_group}/{workspace}/computes/{name}";
    pub const RUNS: &str =
        "/workspaces/{subscription}/{resource_group}/{workspace}/experiments/{experiment}/runs";

    pub const SNAPSHOTS: &str = "/snapshots";
    pub const SNAPSHOT_BLOB: &str = "/snapshots/blobs/{hash}";

    pub const RUN: &str = "/runs/{id}";
    pub const RUN_LOGS: &str = "/runs/{id}/logs";
    pub const RUN_ARTIFACTS: &str = "/runs/{id}/artifacts";
    pub const RUN_ARTIFACT: &str = "/runs/{id}/artifacts/{path}";
}

/// Defaults of the XNLI fine-tuning experiment.
pub mod defaults {
    pub const CREDENTIAL_FILE: &str = "config.json";

    pub const CLUSTER_NAME: &str = "gpucluster";
    pub const VM_SIZE: &str = "STANDARD_NC6";
    pub const NODE_COUNT: u32 = 2;
    pub const PROCESSES_PER_NODE: u32 = 1;
    pub const IDLE_SECONDS_BEFORE_SCALEDOWN: u64 = 120;

    pub const EXPERIMENT: &str = "NLP-Entailment-BERT";
    pub const PROJECT_DIR: &str = "./entailment_xnli_bert_azureml";
    pub const LIBRARY_DIR: &str = "./utils_nlp";
    pub const ENTRY_SCRIPT: &str = "train.py";
    pub const FRAMEWORK_VERSION: &str = "1.0";

    pub const CONDA_PACKAGES: &[&str] = &["scikit-learn=0.20.3", "numpy", "spacy", "nltk"];
    pub const PIP_PACKAGES: &[&str] = &["pandas", "seqeval[gpu]", "pytorch-pretrained-bert"];

    pub const RESULTS_ARTIFACT: &str = "outputs/results.json";
    pub const OUTPUT_DIR: &str = "./outputs";

    pub const PROVISION_POLL_SECS: u64 = 5;
    pub const RUN_POLL_SECS: u64 = 10;
}
