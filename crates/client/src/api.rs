use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ledgerpilot_chat::{DecodeStats, EventDecoder, StreamEvent, TextDecoder};
use ledgerpilot_config::ServerConfig;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::abort::AbortSignal;
use crate::error::ApiError;
use crate::types::{
    ChatRequest, Commit, Conversation, FileContent, FileEntry, WriteFileRequest, unwrap_envelope,
};

#[derive(Debug, Clone)]
enum Auth {
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

/// Typed client for the administration server's REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    auth: Auth,
    /// Bounded by `request_timeout_secs`.
    http: Client,
    /// Connect timeout only; chat and log streams stay open indefinitely.
    stream_http: Client,
}

impl ApiClient {
    pub fn new(config: &ServerConfig) -> Result<Self, ApiError> {
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs.max(1));
        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;
        let stream_http = Client::builder().connect_timeout(connect_timeout).build()?;

        let auth = if !config.api_token.is_empty() {
            Auth::Bearer(config.api_token.clone())
        } else if !config.username.is_empty() {
            Auth::Basic {
                username: config.username.clone(),
                password: config.password.clone(),
            }
        } else {
            Auth::None
        };

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth,
            http,
            stream_http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, client: &Client, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = client.request(method, url);
        match &self.auth {
            Auth::None => builder,
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
        }
    }

    async fn send(builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let builder = self.request(&self.http, Method::GET, path).query(query);
        let body = Self::send(builder).await?.text().await?;
        let value = unwrap_envelope(serde_json::from_str(&body)?);
        Ok(serde_json::from_value(value)?)
    }

    // ── Chat ─────────────────────────────────────────────────────────────────

    /// Stream one chat turn, forwarding each decoded event to `tx` as it
    /// arrives.
    ///
    /// Chunks are read one at a time.  Firing `abort` (or dropping the
    /// receiving end of `tx`) stops the read loop with [`ApiError::Aborted`].
    pub async fn stream_chat(
        &self,
        request: &ChatRequest,
        tx: mpsc::UnboundedSender<StreamEvent>,
        mut abort: AbortSignal,
    ) -> Result<DecodeStats, ApiError> {
        if abort.is_aborted() {
            return Err(ApiError::Aborted);
        }

        let path = format!("/api/v1/ai/{}/chat", request.project_id);
        let builder = self
            .request(&self.stream_http, Method::POST, &path)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request);

        let mut response = tokio::select! {
            _ = abort.aborted() => return Err(ApiError::Aborted),
            response = Self::send(builder) => response?,
        };

        let mut decoder = EventDecoder::new();
        loop {
            let chunk = tokio::select! {
                _ = abort.aborted() => return Err(ApiError::Aborted),
                chunk = response.chunk() => chunk?,
            };
            let Some(chunk) = chunk else {
                break;
            };
            for event in decoder.push(&chunk) {
                if tx.send(event).is_err() {
                    debug!("chat event receiver dropped; stopping stream");
                    return Err(ApiError::Aborted);
                }
            }
        }
        for event in decoder.finish() {
            let _ = tx.send(event);
        }

        let stats = decoder.stats();
        info!(
            events = stats.events,
            malformed = stats.malformed,
            unknown = stats.unknown,
            "chat stream finished"
        );
        Ok(stats)
    }

    // ── Conversations ────────────────────────────────────────────────────────

    pub async fn list_conversations(&self, project_id: i64) -> Result<Vec<Conversation>, ApiError> {
        self.get_json(&format!("/api/v1/ai/{project_id}/conversations"), &[])
            .await
    }

    pub async fn get_conversation(
        &self,
        project_id: i64,
        conversation_id: &str,
    ) -> Result<Conversation, ApiError> {
        self.get_json(
            &format!("/api/v1/ai/{project_id}/conversations/{conversation_id}"),
            &[],
        )
        .await
    }

    // ── Commits ──────────────────────────────────────────────────────────────

    pub async fn list_commits(&self, project_id: i64) -> Result<Vec<Commit>, ApiError> {
        self.get_json(&format!("/api/v1/chaincode-projects/{project_id}/commits"), &[])
            .await
    }

    /// Unified diff of `file` at `hash`, as plain text.
    pub async fn commit_diff(
        &self,
        project_id: i64,
        hash: &str,
        file: &str,
    ) -> Result<String, ApiError> {
        let path = format!("/api/v1/chaincode-projects/{project_id}/commits/{hash}/diff");
        let builder = self
            .request(&self.http, Method::GET, &path)
            .query(&[("file", file)]);
        let body = Self::send(builder).await?.text().await?;
        // Either a bare diff or a JSON body carrying one.
        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(value) => {
                let value = unwrap_envelope(value);
                Ok(match value.get("diff").and_then(|d| d.as_str()) {
                    Some(diff) => diff.to_string(),
                    None => value.as_str().map(str::to_string).unwrap_or(body),
                })
            }
            Err(_) => Ok(body),
        }
    }

    // ── Files ────────────────────────────────────────────────────────────────

    pub async fn read_file(&self, project_id: i64, path: &str) -> Result<FileContent, ApiError> {
        let mut file: FileContent = self
            .get_json(
                &format!("/api/v1/chaincode-projects/{project_id}/files/read"),
                &[("path", path)],
            )
            .await?;
        if file.path.is_empty() {
            file.path = path.to_string();
        }
        Ok(file)
    }

    pub async fn write_file(
        &self,
        project_id: i64,
        path: &str,
        content: &str,
    ) -> Result<(), ApiError> {
        let builder = self
            .request(
                &self.http,
                Method::POST,
                &format!("/api/v1/chaincode-projects/{project_id}/files/write"),
            )
            .json(&WriteFileRequest { path, content });
        Self::send(builder).await?;
        debug!(project_id, path, bytes = content.len(), "file written");
        Ok(())
    }

    pub async fn list_dir(&self, project_id: i64, dir: &str) -> Result<Vec<FileEntry>, ApiError> {
        self.get_json(
            &format!("/api/v1/chaincode-projects/{project_id}/files/list"),
            &[("dir", dir)],
        )
        .await
    }

    // ── Nodes ────────────────────────────────────────────────────────────────

    /// Follow a node's log stream, sending one line per `data:` message
    /// until the server closes the stream or `abort` fires.
    pub async fn follow_node_logs(
        &self,
        node_id: i64,
        tx: mpsc::UnboundedSender<String>,
        mut abort: AbortSignal,
    ) -> Result<(), ApiError> {
        let builder = self
            .request(
                &self.stream_http,
                Method::GET,
                &format!("/api/v1/nodes/{node_id}/logs"),
            )
            .query(&[("follow", "true")])
            .header(reqwest::header::ACCEPT, "text/event-stream");

        let mut response = tokio::select! {
            _ = abort.aborted() => return Err(ApiError::Aborted),
            response = Self::send(builder) => response?,
        };

        let mut decoder = TextDecoder::new();
        loop {
            let chunk = tokio::select! {
                _ = abort.aborted() => return Err(ApiError::Aborted),
                chunk = response.chunk() => chunk?,
            };
            let Some(chunk) = chunk else {
                break;
            };
            for line in decoder.push(&chunk) {
                if tx.send(line).is_err() {
                    return Err(ApiError::Aborted);
                }
            }
        }
        if let Some(line) = decoder.finish() {
            let _ = tx.send(line);
        }
        Ok(())
    }

    // ── Download ─────────────────────────────────────────────────────────────

    /// Download the project archive to `dest`.  Returns the number of bytes
    /// written.
    ///
    /// The body is streamed into `<dest>.part` and renamed into place once
    /// complete, so a failed download never leaves a truncated archive.
    pub async fn download_project(&self, project_id: i64, dest: &Path) -> Result<u64, ApiError> {
        let builder = self.request(
            &self.stream_http,
            Method::GET,
            &format!("/api/v1/chaincode-projects/{project_id}/download"),
        );
        let mut response = Self::send(builder).await?;

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let part = partial_path(dest);
        let written = match write_body(&mut response, &part).await {
            Ok(written) => written,
            Err(err) => {
                if let Err(remove_err) = tokio::fs::remove_file(&part).await {
                    debug!("removing {} failed: {remove_err}", part.display());
                }
                return Err(err);
            }
        };
        tokio::fs::rename(&part, dest).await?;
        info!(project_id, bytes = written, dest = %dest.display(), "project downloaded");
        Ok(written)
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

async fn write_body(response: &mut Response, path: &Path) -> Result<u64, ApiError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::abort_pair;
    use ledgerpilot_chat::{HistoryMessage, Role, ToolPhase};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(uri: &str) -> ServerConfig {
        ServerConfig {
            base_url: uri.to_string(),
            api_token: "test-token".to_string(),
            ..ServerConfig::default()
        }
    }

    fn chat_request() -> ChatRequest {
        ChatRequest {
            conversation_id: Some("c1".to_string()),
            project_id: 3,
            messages: vec![HistoryMessage {
                role: Role::User,
                content: "create a.go".to_string(),
            }],
        }
    }

    const BODY: &str = concat!(
        "data: {\"type\":\"tool_start\",\"toolCallID\":\"1\",\"name\":\"write_file\"}\n",
        "data: {not valid json\n",
        "data: {\"type\":\"tool_update\",\"toolCallID\":\"1\",\"arguments\":\"{\\\"path\\\":\\\"a.go\\\"}\"}\n",
        "data: {\"type\":\"tool_result\",\"toolCallID\":\"1\",\"result\":{\"ok\":true}}\n",
        "data: {\"type\":\"llm\",\"content\":\"done\"}",
    );

    #[tokio::test]
    async fn stream_chat_forwards_events() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/ai/3/chat"))
            .and(header("Authorization", "Bearer test-token"))
            .and(body_json(json!({
                "conversationId": "c1",
                "projectId": 3,
                "messages": [{"role": "user", "content": "create a.go"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(BODY, "text/event-stream"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(&config(&mock_server.uri())).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stats = client
            .stream_chat(&chat_request(), tx, AbortSignal::never())
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].phase(), Some(ToolPhase::Start));
        assert_eq!(
            events[3],
            StreamEvent::Llm {
                content: "done".to_string()
            }
        );
        assert_eq!(stats.malformed, 1);
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/ai/3/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model offline"))
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(&config(&mock_server.uri())).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = client
            .stream_chat(&chat_request(), tx, AbortSignal::never())
            .await
            .unwrap_err();
        assert!(!err.is_abort());
        assert!(matches!(err, ApiError::Status { status: 500, ref body } if body == "model offline"));
    }

    #[tokio::test]
    async fn abort_before_start_sends_nothing() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(&config(&mock_server.uri())).unwrap();
        let (handle, signal) = abort_pair();
        handle.abort();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = client
            .stream_chat(&chat_request(), tx, signal)
            .await
            .unwrap_err();
        assert!(err.is_abort());
    }

    #[tokio::test]
    async fn abort_while_waiting_is_not_a_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(BODY, "text/event-stream")
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(&config(&mock_server.uri())).unwrap();
        let (handle, signal) = abort_pair();
        let (tx, _rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move { client.stream_chat(&chat_request(), tx, signal).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();
        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.unwrap_err().is_abort());
    }

    #[tokio::test]
    async fn lists_conversations_inside_data_envelope() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/ai/3/conversations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "c1", "title": "Asset contract"}, {"id": 2}]
            })))
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(&config(&mock_server.uri())).unwrap();
        let conversations = client.list_conversations(3).await.unwrap();
        assert_eq!(conversations.len(), 2);
        assert_eq!(conversations[0].title.as_deref(), Some("Asset contract"));
        assert_eq!(conversations[1].id, "2");
    }

    #[tokio::test]
    async fn get_conversation_with_messages() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/ai/3/conversations/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "c1",
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"}
                ]
            })))
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(&config(&mock_server.uri())).unwrap();
        let conversation = client.get_conversation(3, "c1").await.unwrap();
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[1].content, "hello");
    }

    #[tokio::test]
    async fn commits_and_diff() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/chaincode-projects/3/commits"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"hash": "abcdef123456", "message": "Initial"}
            ])))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/chaincode-projects/3/commits/abcdef123456/diff"))
            .and(query_param("file", "asset.go"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "diff": "--- a/asset.go\n+++ b/asset.go\n"
            })))
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(&config(&mock_server.uri())).unwrap();
        let commits = client.list_commits(3).await.unwrap();
        assert_eq!(commits[0].short_hash(), "abcdef1");
        let diff = client
            .commit_diff(3, &commits[0].hash, "asset.go")
            .await
            .unwrap();
        assert!(diff.starts_with("--- a/asset.go"));
    }

    #[tokio::test]
    async fn plain_text_diff_is_returned_verbatim() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/chaincode-projects/3/commits/abc/diff"))
            .respond_with(ResponseTemplate::new(200).set_body_string("@@ -1 +1 @@\n-a\n+b\n"))
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(&config(&mock_server.uri())).unwrap();
        let diff = client.commit_diff(3, "abc", "a.go").await.unwrap();
        assert_eq!(diff, "@@ -1 +1 @@\n-a\n+b\n");
    }

    #[tokio::test]
    async fn file_read_write_and_list() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/chaincode-projects/3/files/read"))
            .and(query_param("path", "chaincode/asset.go"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"content": "package main\n"})),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chaincode-projects/3/files/write"))
            .and(body_json(json!({"path": "a.go", "content": "x"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/chaincode-projects/3/files/list"))
            .and(query_param("dir", "chaincode"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "asset.go", "path": "chaincode/asset.go", "isDir": false},
                {"name": "lib", "path": "chaincode/lib", "isDir": true}
            ])))
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(&config(&mock_server.uri())).unwrap();
        let file = client.read_file(3, "chaincode/asset.go").await.unwrap();
        assert_eq!(file.path, "chaincode/asset.go");
        assert_eq!(file.content, "package main\n");

        client.write_file(3, "a.go", "x").await.unwrap();

        let entries = client.list_dir(3, "chaincode").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[1].is_dir);
    }

    #[tokio::test]
    async fn basic_auth_is_used_without_token() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/ai/1/conversations"))
            .and(header("Authorization", "Basic YWRtaW46c2VjcmV0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let cfg = ServerConfig {
            base_url: mock_server.uri(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            ..ServerConfig::default()
        };
        let client = ApiClient::new(&cfg).unwrap();
        assert!(client.list_conversations(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn node_logs_are_streamed_line_by_line() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/nodes/9/logs"))
            .and(query_param("follow", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: peer started\n\ndata: block 1 committed\n",
                "text/event-stream",
            ))
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(&config(&mock_server.uri())).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        client
            .follow_node_logs(9, tx, AbortSignal::never())
            .await
            .unwrap();
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        assert_eq!(lines, vec!["peer started", "block 1 committed"]);
    }

    #[tokio::test]
    async fn download_writes_archive() {
        let mock_server = MockServer::start().await;
        let archive = b"PK\x03\x04fake-zip".to_vec();
        Mock::given(method("GET"))
            .and(path("/api/v1/chaincode-projects/3/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive.clone()))
            .mount(&mock_server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("out/project-3.zip");
        let client = ApiClient::new(&config(&mock_server.uri())).unwrap();
        let written = client.download_project(3, &dest).await.unwrap();
        assert_eq!(written, archive.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), archive);
    }

    #[tokio::test]
    async fn download_cut_short_leaves_no_file() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: application/zip\r\nContent-Length: 100000\r\n\r\nPK\x03\x04012345",
                )
                .await;
            let _ = socket.shutdown().await;
        });

        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("project-3.zip");
        let client = ApiClient::new(&config(&format!("http://{addr}"))).unwrap();
        let err = client.download_project(3, &dest).await.unwrap_err();
        assert!(!err.is_abort());
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
