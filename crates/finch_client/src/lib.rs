//! # Finch Client
//! [![Crates.io](https://img.shields.io/crates/v/finch_client.svg)](https://crates.io/crates/finch_client)
//! [![Docs](https://docs.rs/finch_client/badge.svg)](https://docs.rs/finch_client/)
//!
//! An async HTTP client for the ML platform REST API.
//!
//! [`FinchClient`] implements every backend trait of `finch_core` (workspaces, compute, jobs and
//! artifacts), so it can be handed to the orchestrator directly or mixed with other backends
//! through `CoreServices`.
//!
//! Run logs are streamed over a websocket. Transient transport errors while streaming are
//! retried a bounded number of times.
//!
//! ## Example
//!
//! ```no_run
//! use finch_client::FinchClient;
//! use finch_core::prelude::*;
//!
//! async fn run() -> Result<(), RunError> {
//!     let client = FinchClient::new("https://ml.example.com/api", Some("my-token".into()));
//!
//!     let details = client.run_details("NLP-Entailment-BERT_1234").await?;
//!     println!("{}", details.status);
//!     Ok(())
//! }
//! ```

use bytes::Bytes;
use finch_core::prelude::{routes::*, *};
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::{debug, warn};

/// Reconnect attempts after a transport error on the log stream.
const LOG_RECONNECTS: u32 = 3;
const LOG_RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum FinchClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server returned error {0}: {1}")]
    ServerError(StatusCode, String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl FinchClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::ServerError(status, _) => Some(*status),
            Self::Network(e) => e.status(),
            _ => None,
        }
    }

    fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }
}

impl From<FinchClientError> for PlatformError {
    fn from(e: FinchClientError) -> Self {
        match e {
            FinchClientError::ServerError(StatusCode::NOT_FOUND, msg) => PlatformError::NotFound(msg),
            FinchClientError::ServerError(status, msg) if status.is_client_error() => {
                PlatformError::InvalidRequest(format!("{status}: {msg}"))
            }
            e => PlatformError::System(e.to_string()),
        }
    }
}

impl From<FinchClientError> for ProvisioningError {
    fn from(e: FinchClientError) -> Self {
        match e {
            FinchClientError::ServerError(StatusCode::NOT_FOUND, msg) => ProvisioningError::NotFound(msg),
            e => ProvisioningError::System(e.to_string()),
        }
    }
}

impl From<FinchClientError> for SubmissionError {
    fn from(e: FinchClientError) -> Self {
        match e {
            FinchClientError::Io(e) => SubmissionError::Io(e),
            FinchClientError::ServerError(status, msg) if status.is_client_error() => {
                SubmissionError::Rejected(format!("{status}: {msg}"))
            }
            e => SubmissionError::System(e.to_string()),
        }
    }
}

impl From<FinchClientError> for RunError {
    fn from(e: FinchClientError) -> Self {
        RunError::System(e.to_string())
    }
}

impl From<FinchClientError> for ArtifactError {
    fn from(e: FinchClientError) -> Self {
        match e {
            FinchClientError::Io(e) => ArtifactError::Io(e),
            e => ArtifactError::System(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, FinchClientError>;

type Socket = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Clone)]
pub struct FinchClient {
    base_url: String,
    client: Client,
    token: Option<String>,
}

#[derive(Serialize)]
struct CreateWorkspaceRequest<'a> {
    region: &'a str,
}

#[derive(Deserialize)]
struct SnapshotResponse {
    id: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

impl FinchClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth_request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.token {
            builder.header("Authorization", format!("Bearer {token}"))
        } else {
            builder
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Response> {
        let response = self.auth_request(builder).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(FinchClientError::ServerError(status, text));
        }

        Ok(response)
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| FinchClientError::Validation(format!("Failed to parse {what}: {e}")))
    }

    /// Checks that the platform is reachable and the token is accepted.
    pub async fn health(&self) -> Result<()> {
        self.send(self.client.get(self.url(HEALTH))).await?;
        Ok(())
    }

    async fn connect_logs(&self, run_id: &str) -> Result<Socket> {
        let url = ws_url(&self.url(&RUN_LOGS.replace("{id}", run_id)))?;

        let mut req = url.into_client_request()?;
        if let Some(token) = &self.token {
            let header_val =
                tokio_tungstenite::tungstenite::http::HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| FinchClientError::Validation(e.to_string()))?;
            req.headers_mut().insert("Authorization", header_val);
        }

        let (socket, res) = tokio_tungstenite::connect_async(req)
            .await
            .map_err(|e| match e {
                tokio_tungstenite::tungstenite::Error::Http(res) => {
                    FinchClientError::ServerError(res.status(), "Handshake rejected".into())
                }
                _ => FinchClientError::WebSocket(e),
            })?;

        if res.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Err(FinchClientError::ServerError(
                res.status(),
                "Upgrade failed".into(),
            ));
        }

        Ok(socket)
    }
}

/// Swaps an `http(s)` url for its websocket counterpart.
fn ws_url(url: &str) -> Result<String> {
    let parsed = Url::from_str(url)?;
    Ok(match parsed.scheme() {
        "https" => url.replacen("https://", "wss://", 1),
        "http" => url.replacen("http://", "ws://", 1),
        _ => url.to_string(),
    })
}

/// Turns one websocket frame into a log line. [`None`] for frames that carry none.
fn decode_frame(msg: Message) -> Option<LogOutput> {
    match msg {
        Message::Binary(bin) => match serde_json::from_slice(&bin) {
            Ok(log) => Some(log),
            Err(e) => {
                warn!("Failed to deserialize log frame: {e}");
                None
            }
        },
        Message::Text(txt) => Some(serde_json::from_str(txt.as_str()).unwrap_or_else(|_| LogOutput {
            source: LogSource::Console,
            timestamp: None,
            message: txt.as_str().to_string(),
        })),
        _ => None,
    }
}

struct LogState {
    client: FinchClient,
    run_id: String,
    socket: Option<Socket>,
    reconnects_left: u32,
}

impl WorkspaceBackend for FinchClient {
    async fn get_workspace(
        &self,
        identity: &WorkspaceIdentity,
    ) -> std::result::Result<Option<WorkspaceHandle>, PlatformError> {
        let url = self.url(&identity.route(WORKSPACE));
        match self.send(self.client.get(url)).await {
            Ok(response) => Ok(Some(Self::json(response, "workspace").await?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_workspace(
        &self,
        identity: &WorkspaceIdentity,
        region: &str,
    ) -> std::result::Result<WorkspaceHandle, PlatformError> {
        let url = self.url(&identity.route(WORKSPACE));
        let response = self
            .send(self.client.put(url).json(&CreateWorkspaceRequest { region }))
            .await?;
        Ok(Self::json(response, "workspace").await?)
    }
}

impl ComputeBackend for FinchClient {
    async fn get_cluster(
        &self,
        workspace: &WorkspaceHandle,
        name: &str,
    ) -> std::result::Result<Option<ComputeClusterHandle>, ProvisioningError> {
        let url = self.url(&workspace.route(COMPUTE).replace("{name}", name));
        match self.send(self.client.get(url)).await {
            Ok(response) => Ok(Some(Self::json(response, "compute target").await?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_cluster(
        &self,
        workspace: &WorkspaceHandle,
        spec: &ClusterSpec,
    ) -> std::result::Result<ComputeClusterHandle, ProvisioningError> {
        let url = self.url(&workspace.route(COMPUTE).replace("{name}", &spec.name));
        let response = self.send(self.client.put(url).json(spec)).await?;
        Ok(Self::json(response, "compute target").await?)
    }
}

impl JobBackend for FinchClient {
    async fn has_blob(&self, hash: &str) -> std::result::Result<bool, SubmissionError> {
        let url = self.url(&SNAPSHOT_BLOB.replace("{hash}", hash));
        match self.send(self.client.head(url)).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn upload_blob(&self, hash: &str, data: Bytes) -> std::result::Result<(), SubmissionError> {
        let local_hash = hex::encode(Sha256::digest(&data));
        if local_hash != hash {
            return Err(SubmissionError::InvalidDescriptor(format!(
                "blob content hashes to {local_hash}, expected {hash}"
            )));
        }

        let url = self.url(&SNAPSHOT_BLOB.replace("{hash}", hash));
        let size = data.len();
        self.send(self.client.put(url).header("Content-Length", size).body(data))
            .await?;
        debug!("Uploaded blob {hash} ({size} bytes)");
        Ok(())
    }

    async fn register_snapshot(
        &self,
        manifest: &SnapshotManifest,
    ) -> std::result::Result<String, SubmissionError> {
        let response = self
            .send(self.client.post(self.url(SNAPSHOTS)).json(manifest))
            .await?;
        let data: SnapshotResponse = Self::json(response, "snapshot response").await?;

        if data.id != manifest.id() {
            warn!("Platform assigned snapshot id {} to manifest {}", data.id, manifest.id());
        }
        Ok(data.id)
    }

    async fn submit(
        &self,
        workspace: &WorkspaceHandle,
        submission: &JobSubmission,
    ) -> std::result::Result<RunHandle, SubmissionError> {
        let experiment = &submission.descriptor.experiment;
        let url = self.url(&workspace.route(RUNS).replace("{experiment}", experiment));
        let response = self.send(self.client.post(url).json(submission)).await?;
        let data: SubmitResponse = Self::json(response, "submit response").await?;

        Ok(RunHandle::new(data.id, experiment.clone(), workspace.clone()))
    }

    async fn run_details(&self, run_id: &str) -> std::result::Result<RunDetails, RunError> {
        let url = self.url(&RUN.replace("{id}", run_id));
        match self.send(self.client.get(url)).await {
            Ok(response) => Ok(Self::json(response, "run details").await?),
            Err(e) if e.is_not_found() => Err(RunError::NotFound(run_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn logs(
        &self,
        run_id: &str,
    ) -> std::result::Result<BoxStream<'static, std::result::Result<LogOutput, RunError>>, RunError> {
        let socket = match self.connect_logs(run_id).await {
            Ok(socket) => socket,
            Err(e) if e.is_not_found() => return Err(RunError::NotFound(run_id.to_string())),
            Err(e) => return Err(e.into()),
        };

        let state = LogState {
            client: self.clone(),
            run_id: run_id.to_string(),
            socket: Some(socket),
            reconnects_left: LOG_RECONNECTS,
        };

        Ok(stream::unfold(state, |mut state| async move {
            loop {
                let socket = state.socket.as_mut()?;
                match socket.next().await {
                    Some(Ok(Message::Close(_))) | None => return None,
                    Some(Ok(msg)) => {
                        if let Some(log) = decode_frame(msg) {
                            return Some((Ok(log), state));
                        }
                    }
                    Some(Err(e)) => {
                        if state.reconnects_left == 0 {
                            state.socket = None;
                            return Some((Err(RunError::System(format!("Log stream failed: {e}"))), state));
                        }
                        state.reconnects_left -= 1;
                        warn!("Log stream of {} interrupted ({e}), reconnecting", state.run_id);
                        tokio::time::sleep(LOG_RECONNECT_DELAY).await;

                        match state.client.connect_logs(&state.run_id).await {
                            Ok(socket) => state.socket = Some(socket),
                            Err(e) => {
                                state.socket = None;
                                return Some((Err(e.into()), state));
                            }
                        }
                    }
                }
            }
        })
        .boxed())
    }
}

impl ArtifactStore for FinchClient {
    async fn fetch(&self, run_id: &str, path: &str) -> std::result::Result<Bytes, ArtifactError> {
        let route = RUN_ARTIFACT
            .replace("{id}", run_id)
            .replace("{path}", path.trim_start_matches('/'));
        match self.send(self.client.get(self.url(&route))).await {
            Ok(response) => Ok(response.bytes().await.map_err(FinchClientError::from)?),
            Err(e) if e.is_not_found() => Err(ArtifactError::NotFound(path.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, run_id: &str) -> std::result::Result<Vec<String>, ArtifactError> {
        let url = self.url(&RUN_ARTIFACTS.replace("{id}", run_id));
        let response = self.send(self.client.get(url)).await?;
        Ok(Self::json(response, "artifact list").await?)
    }
}

impl PlatformServices for FinchClient {
    type Workspace = Self;
    type Compute = Self;
    type Jobs = Self;
    type Artifacts = Self;

    fn workspace(&self) -> &Self {
        self
    }
    fn compute(&self) -> &Self {
        self
    }
    fn jobs(&self) -> &Self {
        self
    }
    fn artifacts(&self) -> &Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> WorkspaceIdentity {
        WorkspaceIdentity {
            subscription_id: "sub".into(),
            resource_group: "rg".into(),
            workspace_name: "ws".into(),
        }
    }

    fn workspace() -> WorkspaceHandle {
        WorkspaceHandle {
            subscription_id: "sub".into(),
            resource_group: "rg".into(),
            workspace_name: "ws".into(),
            region: "eastus".into(),
        }
    }

    #[tokio::test]
    async fn missing_workspace_is_none() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/workspaces/sub/rg/ws")
            .with_status(404)
            .create_async()
            .await;

        let client = FinchClient::new(server.url(), None);
        assert_eq!(client.get_workspace(&identity()).await.unwrap(), None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn workspace_creation_sends_region_and_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/workspaces/sub/rg/ws")
            .match_header("authorization", "Bearer secret")
            .match_body(mockito::Matcher::JsonString(r#"{"region":"eastus"}"#.to_string()))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"subscription_id":"sub","resource_group":"rg","workspace_name":"ws","region":"eastus"}"#)
            .create_async()
            .await;

        let client = FinchClient::new(server.url(), Some("secret".into()));
        let handle = client.create_workspace(&identity(), "eastus").await.unwrap();

        assert_eq!(handle, workspace());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn cluster_status_is_parsed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/workspaces/sub/rg/ws/computes/gpucluster")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "name": "gpucluster",
                    "vm_size": "STANDARD_NC6",
                    "scale": {"min_nodes": 0, "max_nodes": 2},
                    "provisioning_state": "Creating",
                    "allocation_state": "Resizing",
                    "nodes": {"current": 1, "preparing": 1},
                    "created_at": null,
                    "modified_at": null
                }"#,
            )
            .create_async()
            .await;

        let client = FinchClient::new(server.url(), None);
        let cluster = client.cluster_status(&workspace(), "gpucluster").await.unwrap();

        assert_eq!(cluster.provisioning_state, ProvisioningState::Creating);
        assert_eq!(cluster.nodes.current, 1);
        assert_eq!(cluster.scale.max_nodes(), 2);
    }

    #[tokio::test]
    async fn unknown_cluster_status_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/workspaces/sub/rg/ws/computes/gpucluster")
            .with_status(404)
            .create_async()
            .await;

        let client = FinchClient::new(server.url(), None);
        assert!(matches!(
            client.cluster_status(&workspace(), "gpucluster").await,
            Err(ProvisioningError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn blob_presence_follows_head_status() {
        let mut server = mockito::Server::new_async().await;
        server.mock("HEAD", "/snapshots/blobs/aaa").with_status(200).create_async().await;
        server.mock("HEAD", "/snapshots/blobs/bbb").with_status(404).create_async().await;

        let client = FinchClient::new(server.url(), None);
        assert!(client.has_blob("aaa").await.unwrap());
        assert!(!client.has_blob("bbb").await.unwrap());
    }

    #[tokio::test]
    async fn blob_with_wrong_hash_is_not_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client = FinchClient::new(server.url(), None);
        let result = client.upload_blob("not-the-hash", Bytes::from_static(b"data")).await;

        assert!(matches!(result, Err(SubmissionError::InvalidDescriptor(_))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_submission_maps_to_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/workspaces/sub/rg/ws/experiments/exp/runs")
            .with_status(422)
            .with_body("unknown compute target")
            .create_async()
            .await;

        let client = FinchClient::new(server.url(), None);
        let submission = JobSubmission::new(JobDescriptor::new("exp", "train.py"), "gpucluster", "snap");

        match client.submit(&workspace(), &submission).await {
            Err(SubmissionError::Rejected(msg)) => assert!(msg.contains("unknown compute target")),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn accepted_submission_starts_queued() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/workspaces/sub/rg/ws/experiments/exp/runs")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"compute_target":"gpucluster","arguments":["--seed","42","--epochs","2","--data_percent_used","1.0"]}"#
                    .to_string(),
            ))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"exp_1"}"#)
            .create_async()
            .await;

        let client = FinchClient::new(server.url(), None);
        let submission = JobSubmission::new(JobDescriptor::new("exp", "train.py"), "gpucluster", "snap");
        let run = client.submit(&workspace(), &submission).await.unwrap();

        assert_eq!(run.id, "exp_1");
        assert_eq!(run.status(), &RunStatus::Queued);
    }

    #[tokio::test]
    async fn run_details_are_parsed_and_missing_runs_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/runs/exp_1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"exp_1","status":{"Failed":"oom"},"started_at":null,"ended_at":null}"#)
            .create_async()
            .await;
        server.mock("GET", "/runs/exp_2").with_status(404).create_async().await;

        let client = FinchClient::new(server.url(), None);
        let details = client.run_details("exp_1").await.unwrap();
        assert_eq!(details.status, RunStatus::Failed("oom".into()));

        assert!(matches!(
            client.run_details("exp_2").await,
            Err(RunError::NotFound(id)) if id == "exp_2"
        ));
    }

    #[tokio::test]
    async fn artifacts_are_fetched_by_relative_path() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/runs/exp_1/artifacts/outputs/results.json")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        server
            .mock("GET", "/runs/exp_1/artifacts/outputs/missing.json")
            .with_status(404)
            .create_async()
            .await;

        let client = FinchClient::new(server.url(), None);
        assert_eq!(
            client.fetch("exp_1", "outputs/results.json").await.unwrap(),
            Bytes::from_static(b"{}")
        );
        assert!(matches!(
            client.fetch("exp_1", "outputs/missing.json").await,
            Err(ArtifactError::NotFound(p)) if p == "outputs/missing.json"
        ));
    }

    #[test]
    fn websocket_url_follows_scheme() {
        assert_eq!(ws_url("https://ml.example.com/runs/1/logs").unwrap(), "wss://ml.example.com/runs/1/logs");
        assert_eq!(ws_url("http://localhost:3000/runs/1/logs").unwrap(), "ws://localhost:3000/runs/1/logs");
    }

    #[test]
    fn text_frames_become_console_lines() {
        let log = decode_frame(Message::Text("node 0 ready".into())).unwrap();
        assert_eq!(log.source, LogSource::Console);
        assert_eq!(log.message, "node 0 ready");

        let json = r#"{"source":"Stderr","timestamp":null,"message":"warn"}"#;
        let log = decode_frame(Message::Binary(Bytes::from_static(json.as_bytes()))).unwrap();
        assert_eq!(log.source, LogSource::Stderr);
        assert!(decode_frame(Message::Ping(Bytes::new())).is_none());
    }
}
