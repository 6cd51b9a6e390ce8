//! API Server Core Tool
//!
//! HTTP surface of the assistant. Every handler goes through the
//! [`AssistantHandle`] in the [`CoreContext`]; the server holds no state of
//! its own.
//!
//! # Endpoints
//!
//! - GET / - Bundled web front end
//! - GET /health - Health report
//! - POST /api/chat - Chat with the assistant
//! - POST /api/novel - Indonesian story writing
//! - POST /api/execute - Run a snippet through the bounded executor
//! - POST /api/upload - Multipart upload into the workspace
//! - GET /api/files - Uploaded files, newest first
//! - GET /api/conversations - Conversations, most recently updated first
//! - GET /api/conversations/:id/messages - Conversation history

use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sdk::{AssistantHandle, ChatRequest, CoreContext, CoreTool, EngineError};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Room for multipart framing on top of the upload cap
const MULTIPART_OVERHEAD: usize = 64 * 1024;

const DEFAULT_CONVERSATION_LIMIT: i64 = 20;
const DEFAULT_MESSAGE_LIMIT: i64 = 50;

/// Shared handler state
#[derive(Clone)]
struct ServerState {
    assistant: AssistantHandle,
}

/// API server
pub struct ApiServer {
    bind: String,
    max_upload_bytes: usize,
    addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ApiServer {
    /// Create a server that will listen on `bind` (`host:port`) once started
    pub fn new(bind: impl Into<String>, max_upload_bytes: usize) -> Self {
        Self {
            bind: bind.into(),
            max_upload_bytes,
            addr: None,
            shutdown_tx: None,
            task: None,
        }
    }

    /// Address the server is listening on, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Wait until the server task exits
    pub async fn wait(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("API server task failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl CoreTool for ApiServer {
    fn name(&self) -> &str {
        "api-server"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn start(&mut self, ctx: CoreContext) -> Result<(), EngineError> {
        let listener = tokio::net::TcpListener::bind(&self.bind)
            .await
            .map_err(|e| EngineError::Network(format!("Failed to bind to {}: {}", self.bind, e)))?;

        let addr = listener
            .local_addr()
            .map_err(|e| EngineError::Network(format!("Failed to get local address: {}", e)))?;

        let app = router(ctx, self.max_upload_bytes);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            tracing::info!("API server listening on http://{}", addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_rx.await.ok();
                    tracing::info!("API server shutting down gracefully");
                })
                .await
                .unwrap_or_else(|e| {
                    tracing::error!("API server error: {}", e);
                });
        });

        self.addr = Some(addr);
        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(task);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), EngineError> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            shutdown_tx.send(()).ok();
            self.wait().await;
            tracing::info!("API server stopped");
        }
        Ok(())
    }
}

/// Build the application router
pub fn router(ctx: CoreContext, max_upload_bytes: usize) -> Router {
    let state = ServerState {
        assistant: ctx.assistant,
    };

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/novel", post(novel_handler))
        .route("/api/execute", post(execute_handler))
        .route(
            "/api/upload",
            post(upload_handler)
                .layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD)),
        )
        .route("/api/files", get(files_handler))
        .route("/api/conversations", get(conversations_handler))
        .route("/api/conversations/:id/messages", get(messages_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Engine error rendered as an HTTP response
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            EngineError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            EngineError::FeatureDisabled(_) => (StatusCode::FORBIDDEN, self.0.to_string()),
            EngineError::UploadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, self.0.to_string())
            }
            EngineError::PathDenied(_) | EngineError::PathOutsideWorkspace(_) => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            _ => {
                tracing::error!("Request failed: {}", self.0);
                (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string())
            }
        };

        (status, Json(json!({"success": false, "error": message}))).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError(EngineError::InvalidRequest(message.into()))
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.assistant.health().await)
}

async fn chat_handler(
    State(state): State<ServerState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    let reply = state.assistant.chat(request).await?;
    Ok(Json(reply).into_response())
}

#[derive(Debug, Deserialize)]
struct NovelRequest {
    #[serde(default)]
    prompt: String,
}

async fn novel_handler(
    State(state): State<ServerState>,
    body: Result<Json<NovelRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    let reply = state.assistant.write_story(&request.prompt).await?;
    Ok(Json(reply).into_response())
}

fn default_language() -> String {
    "python".to_string()
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    code: String,
    #[serde(default = "default_language")]
    language: String,
}

async fn execute_handler(
    State(state): State<ServerState>,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    if request.code.trim().is_empty() {
        return Err(bad_request("Code is required"));
    }
    let result = state
        .assistant
        .execute(&request.code, &request.language)
        .await?;
    Ok(Json(result).into_response())
}

async fn upload_handler(
    State(state): State<ServerState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Ok(multipart_error(e.status(), e.body_text())),
        };

        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return Ok(multipart_error(e.status(), e.body_text())),
        };

        tracing::debug!("Upload received: {} ({} bytes)", filename, bytes.len());
        let receipt = state.assistant.upload(&filename, &bytes).await?;
        return Ok(Json(receipt).into_response());
    }

    Err(bad_request("No file provided"))
}

fn multipart_error(status: StatusCode, message: String) -> Response {
    (status, Json(json!({"success": false, "error": message}))).into_response()
}

async fn files_handler(State(state): State<ServerState>) -> Json<serde_json::Value> {
    match state.assistant.list_files().await {
        Ok(files) => Json(json!({ "files": files })),
        Err(e) => {
            tracing::warn!("Failed to list files: {}", e);
            Json(json!({ "files": [], "error": e.to_string() }))
        }
    }
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<i64>,
}

async fn conversations_handler(
    State(state): State<ServerState>,
    Query(query): Query<LimitQuery>,
) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(DEFAULT_CONVERSATION_LIMIT);
    match state.assistant.list_conversations(limit).await {
        Ok(conversations) => Json(json!({ "conversations": conversations })),
        Err(e) => {
            tracing::warn!("Failed to list conversations: {}", e);
            Json(json!({ "conversations": [], "error": e.to_string() }))
        }
    }
}

async fn messages_handler(
    State(state): State<ServerState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(DEFAULT_MESSAGE_LIMIT);
    match state.assistant.history(&conversation_id, limit).await {
        Ok(messages) => Json(json!({ "messages": messages })),
        Err(e) => {
            tracing::warn!("Failed to load history for {}: {}", conversation_id, e);
            Json(json!({ "messages": [], "error": e.to_string() }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use chrono::Utc;
    use sdk::{
        AssistantHandleImpl, ChatReply, ChatStatus, ConversationSummary, ExecutionResult,
        FileEntry, HealthReport, HistoryMessage, Role, UploadReceipt,
    };
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    #[derive(Default)]
    struct MockAssistant {
        execution_disabled: bool,
        broken_store: bool,
        uploads: Mutex<Vec<(String, usize)>>,
        history_limits: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl AssistantHandleImpl for MockAssistant {
        async fn chat(&self, request: ChatRequest) -> Result<ChatReply, EngineError> {
            if request.message.trim().is_empty() {
                return Err(EngineError::InvalidRequest("Message is required".to_string()));
            }
            Ok(ChatReply {
                response: format!("echo: {}", request.message),
                status: ChatStatus::Success,
                conversation_id: request.conversation_id.unwrap_or_else(|| "new".to_string()),
                code_execution: None,
            })
        }

        async fn write_story(&self, prompt: &str) -> Result<ChatReply, EngineError> {
            if prompt.trim().is_empty() {
                return Err(EngineError::InvalidRequest("Prompt is required".to_string()));
            }
            self.chat(ChatRequest::new(format!("story: {}", prompt))).await
        }

        async fn execute(
            &self,
            code: &str,
            language: &str,
        ) -> Result<ExecutionResult, EngineError> {
            if self.execution_disabled {
                return Err(EngineError::FeatureDisabled("code execution".to_string()));
            }
            Ok(ExecutionResult::completed(language, true, code, ""))
        }

        async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<UploadReceipt, EngineError> {
            if filename == ".env" {
                return Err(EngineError::PathDenied(filename.into()));
            }
            if bytes.len() > 16 {
                return Err(EngineError::UploadTooLarge {
                    size: bytes.len(),
                    limit: 16,
                });
            }
            self.uploads
                .lock()
                .unwrap()
                .push((filename.to_string(), bytes.len()));
            Ok(UploadReceipt::new(filename, bytes.len() as u64))
        }

        async fn list_files(&self) -> Result<Vec<FileEntry>, EngineError> {
            if self.broken_store {
                return Err(EngineError::Database("disk I/O error".to_string()));
            }
            Ok(vec![FileEntry {
                filename: "notes.txt".to_string(),
                size: 5,
                created_at: Utc::now(),
            }])
        }

        async fn list_conversations(
            &self,
            limit: i64,
        ) -> Result<Vec<ConversationSummary>, EngineError> {
            if self.broken_store {
                return Err(EngineError::Database("disk I/O error".to_string()));
            }
            let now = Utc::now();
            Ok((0..limit.min(2))
                .map(|i| ConversationSummary {
                    id: format!("c{}", i),
                    title: "hello".to_string(),
                    created_at: now,
                    updated_at: now,
                })
                .collect())
        }

        async fn history(
            &self,
            conversation_id: &str,
            limit: i64,
        ) -> Result<Vec<HistoryMessage>, EngineError> {
            self.history_limits.lock().unwrap().push(limit);
            Ok(vec![HistoryMessage {
                role: Role::User,
                content: format!("in {}", conversation_id),
                timestamp: Utc::now(),
            }])
        }

        async fn health(&self) -> HealthReport {
            HealthReport {
                status: "OK".to_string(),
                version: "0.1.0".to_string(),
                features: vec!["chat".to_string()],
                api_key_configured: false,
                model: "test-model".to_string(),
                workspace: "/tmp/ws".to_string(),
                database: "SQLite with conversation history".to_string(),
            }
        }
    }

    fn app_with(mock: Arc<MockAssistant>) -> Router {
        router(CoreContext::new(AssistantHandle::new(mock)), 1024)
    }

    fn app() -> Router {
        app_with(Arc::new(MockAssistant::default()))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn multipart_body(field: &str, filename: &str, content: &[u8]) -> Request<Body> {
        let boundary = "cove-test-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::post("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_index_serves_front_end() {
        let response = app().oneshot(get_req("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("<html"));
        assert!(html.contains("/api/chat"));
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(app(), get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "OK");
        assert_eq!(body["database"], "SQLite with conversation history");
        assert_eq!(body["api_key_configured"], false);
    }

    #[tokio::test]
    async fn test_chat_round_trip() {
        let (status, body) = send(
            app(),
            post_json("/api/chat", json!({"message": "hi", "conversation_id": "c9"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "echo: hi");
        assert_eq!(body["status"], "success");
        assert_eq!(body["conversation_id"], "c9");
        assert!(body.get("code_execution").is_none());
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_and_malformed() {
        let (status, body) = send(app(), post_json("/api/chat", json!({"message": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Message is required");

        let (status, _) = send(app(), post_json("/api/chat", json!({"text": "hi"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_novel() {
        let (status, body) = send(app(), post_json("/api/novel", json!({"prompt": "rain"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "echo: story: rain");

        let (status, body) = send(app(), post_json("/api/novel", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Prompt is required");
    }

    #[tokio::test]
    async fn test_execute_defaults_to_python() {
        let (status, body) =
            send(app(), post_json("/api/execute", json!({"code": "print(1)"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["language"], "python");
        assert_eq!(body["success"], true);

        let (status, body) = send(app(), post_json("/api/execute", json!({"code": " "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Code is required");
    }

    #[tokio::test]
    async fn test_disabled_feature_is_forbidden() {
        let mock = Arc::new(MockAssistant {
            execution_disabled: true,
            ..Default::default()
        });
        let (status, body) = send(
            app_with(mock),
            post_json("/api/execute", json!({"code": "ls", "language": "bash"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("code execution"));
    }

    #[tokio::test]
    async fn test_upload() {
        let mock = Arc::new(MockAssistant::default());
        let (status, body) = send(
            app_with(Arc::clone(&mock)),
            multipart_body("file", "notes.txt", b"hello"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["filename"], "notes.txt");
        assert_eq!(body["size"], 5);
        assert_eq!(
            *mock.uploads.lock().unwrap(),
            vec![("notes.txt".to_string(), 5)]
        );
    }

    #[tokio::test]
    async fn test_upload_failures() {
        let (status, body) = send(app(), multipart_body("other", "a.txt", b"x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No file provided");

        let (status, body) = send(app(), multipart_body("file", ".env", b"SECRET=1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = send(app(), multipart_body("file", "big.bin", &[0u8; 64])).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_listings() {
        let (status, body) = send(app(), get_req("/api/files")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files"][0]["filename"], "notes.txt");

        let (_, body) = send(app(), get_req("/api/conversations")).await;
        assert_eq!(body["conversations"].as_array().unwrap().len(), 2);
        assert_eq!(body["conversations"][0]["id"], "c0");
    }

    #[tokio::test]
    async fn test_listing_errors_return_empty_lists() {
        let mock = Arc::new(MockAssistant {
            broken_store: true,
            ..Default::default()
        });
        let (status, body) = send(app_with(Arc::clone(&mock)), get_req("/api/files")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files"], json!([]));
        assert!(body["error"].as_str().unwrap().contains("disk I/O error"));

        let (_, body) = send(app_with(mock), get_req("/api/conversations")).await;
        assert_eq!(body["conversations"], json!([]));
    }

    #[tokio::test]
    async fn test_history_limit_parameter() {
        let mock = Arc::new(MockAssistant::default());
        let (status, body) = send(
            app_with(Arc::clone(&mock)),
            get_req("/api/conversations/abc/messages"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"][0]["content"], "in abc");
        assert_eq!(body["messages"][0]["role"], "user");

        send(
            app_with(Arc::clone(&mock)),
            get_req("/api/conversations/abc/messages?limit=3"),
        )
        .await;
        assert_eq!(*mock.history_limits.lock().unwrap(), vec![50, 3]);
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let request = Request::get("/health")
            .header(header::ORIGIN, "http://example.com")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert!(response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[tokio::test]
    async fn test_core_tool_lifecycle() {
        let mut server = ApiServer::new("127.0.0.1:0", 1024);
        assert_eq!(server.name(), "api-server");
        assert!(server.local_addr().is_none());

        let ctx = CoreContext::new(AssistantHandle::new(Arc::new(MockAssistant::default())));
        server.start(ctx).await.unwrap();
        let addr = server.local_addr().unwrap();

        let body: Value = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "OK");

        server.stop().await.unwrap();
        assert!(reqwest::get(format!("http://{}/health", addr)).await.is_err());
    }
}
