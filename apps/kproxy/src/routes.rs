use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Json, State};
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::error;

use kproxy_core::GatewayError;
use kproxy_gateway::{ChatOutcome, ChunkStream, Dispatcher};
use kproxy_protocol::openai::{CreateChatCompletionRequest, Model, ModelList};

/// Models under the provider's own namespace reject streaming.
const RESERVED_MODEL_PREFIX: &str = "amazonq";

const FINGERPRINT_OVERRIDE_HEADER: &str = "x-machine-id";

const CATALOG_CREATED: i64 = 1_714_521_600;

pub struct AppState {
    pub dispatcher: Dispatcher,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateChatCompletionRequest>,
) -> Response {
    if request.stream && request.model.starts_with(RESERVED_MODEL_PREFIX) {
        return error_response(&GatewayError::UnsupportedMode(format!(
            "model {} does not support streaming",
            request.model
        )));
    }
    let Some(auth_value) = bearer_value(&headers) else {
        return error_response(&GatewayError::Authentication(
            "missing authorization header".to_string(),
        ));
    };
    let fingerprint_override = headers
        .get(FINGERPRINT_OVERRIDE_HEADER)
        .and_then(|value| value.to_str().ok());

    match state
        .dispatcher
        .dispatch(request, &auth_value, fingerprint_override)
        .await
    {
        Ok(ChatOutcome::Completion(response)) => Json(response).into_response(),
        Ok(ChatOutcome::Stream(stream)) => sse_response(stream),
        Err(err) => error_response(&err),
    }
}

async fn list_models() -> Response {
    let catalog = ModelList::new(vec![
        Model::new("claude-sonnet-4-20250514", CATALOG_CREATED, "anthropic"),
        Model::new("claude-3-7-sonnet-20250219", CATALOG_CREATED, "anthropic"),
        Model::new("claude-3-5-haiku-20241022", CATALOG_CREATED, "anthropic"),
        Model::new("amazonq-chat", CATALOG_CREATED, "amazon"),
    ]);
    Json(catalog).into_response()
}

async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

fn bearer_value(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let value = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn sse_response(stream: ChunkStream) -> Response {
    let mut response = Response::new(Body::from_stream(stream));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn error_response(err: &GatewayError) -> Response {
    let body = match err {
        GatewayError::Authentication(message) => json!({
            "error": { "message": message, "type": "authentication_error" }
        }),
        GatewayError::UnsupportedMode(message) => json!({
            "error": { "message": message, "type": "invalid_request_error" }
        }),
        // surfaced verbatim once the pool is exhausted
        GatewayError::Upstream { payload } => payload.clone(),
        GatewayError::Internal(source) => {
            error!(event = "internal_error", error = %source);
            json!({
                "error": { "message": "internal server error", "type": "server_error" }
            })
        }
    };
    let mut response = Json(body).into_response();
    *response.status_mut() = err.status();
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::body::to_bytes;
    use axum::http::{Request, StatusCode};
    use bytes::Bytes;
    use futures_util::stream;
    use tower::ServiceExt;

    use kproxy_core::CredentialRegistry;
    use kproxy_gateway::{UpstreamAttempt, UpstreamTransport};

    struct ScriptedTransport {
        scripts: Mutex<Vec<Vec<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Vec<&str>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(
                    scripts
                        .into_iter()
                        .map(|chunks| chunks.into_iter().map(str::to_string).collect())
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl UpstreamTransport for ScriptedTransport {
        async fn send(&self, _attempt: UpstreamAttempt) -> Result<ChunkStream, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let chunks = {
                let mut scripts = self.scripts.lock().unwrap();
                if scripts.is_empty() {
                    Vec::new()
                } else {
                    scripts.remove(0)
                }
            };
            let items: Vec<Result<Bytes, std::io::Error>> =
                chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
            Ok(Box::pin(stream::iter(items)))
        }
    }

    fn app_with(transport: Arc<ScriptedTransport>) -> Router {
        let registry = Arc::new(CredentialRegistry::new(None));
        let dispatcher = Dispatcher::new(registry, transport);
        router(Arc::new(AppState { dispatcher }))
    }

    fn chat_request(body: &str, auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header(CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(AUTHORIZATION, auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn reserved_model_with_streaming_is_rejected_before_dispatch() {
        let transport = ScriptedTransport::new(vec![]);
        let app = app_with(transport.clone());

        let response = app
            .oneshot(chat_request(
                r#"{"model":"amazonq-chat","messages":[{"role":"user","content":"hi"}],"stream":true}"#,
                Some("Bearer tok-a"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn missing_authorization_is_rejected() {
        let transport = ScriptedTransport::new(vec![]);
        let app = app_with(transport.clone());

        let response = app
            .oneshot(chat_request(
                r#"{"model":"claude-sonnet-4","messages":[{"role":"user","content":"hi"}]}"#,
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blacklisted_pool_yields_a_structured_authentication_error() {
        let transport = ScriptedTransport::new(vec![]);
        let registry = Arc::new(CredentialRegistry::new(None));
        registry.blacklist_credential("tok-dead");
        let dispatcher = Dispatcher::new(registry, transport.clone());
        let app = router(Arc::new(AppState { dispatcher }));

        let response = app
            .oneshot(chat_request(
                r#"{"model":"claude-sonnet-4","messages":[{"role":"user","content":"hi"}]}"#,
                Some("Bearer tok-dead"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "authentication_error");
    }

    #[tokio::test]
    async fn aggregated_completion_has_zeroed_usage() {
        let transport = ScriptedTransport::new(vec![vec!["Hi there"]]);
        let app = app_with(transport);

        let response = app
            .oneshot(chat_request(
                r#"{"model":"claude-sonnet-4","messages":[{"role":"user","content":"hi"}]}"#,
                Some("Bearer tok-a"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["choices"][0]["message"]["content"], "Hi there");
        assert_eq!(body["usage"]["total_tokens"], 0);
        assert_eq!(body["object"], "chat.completion");
        assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
    }

    #[tokio::test]
    async fn streaming_response_is_an_event_stream() {
        let transport = ScriptedTransport::new(vec![vec!["Hello"]]);
        let app = app_with(transport);

        let response = app
            .oneshot(chat_request(
                r#"{"model":"claude-sonnet-4","messages":[{"role":"user","content":"hi"}],"stream":true}"#,
                Some("Bearer tok-a"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains(r#""content":"Hello""#));
        assert!(text.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn exhausted_pool_surfaces_the_upstream_payload() {
        let transport =
            ScriptedTransport::new(vec![vec![r#"{"error":{"message":"expired"}}"#]]);
        let app = app_with(transport);

        let response = app
            .oneshot(chat_request(
                r#"{"model":"claude-sonnet-4","messages":[{"role":"user","content":"hi"}]}"#,
                Some("Bearer tok-a"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "expired");
    }

    #[tokio::test]
    async fn models_and_health_endpoints_answer() {
        let app = app_with(ScriptedTransport::new(vec![]));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/models")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["object"], "list");
        assert!(!body["data"].as_array().unwrap().is_empty());

        let app = app_with(ScriptedTransport::new(vec![]));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
