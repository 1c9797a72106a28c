use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use kproxy_core::{CredentialRegistry, GatewayError, parse_auth_value, redact};
use kproxy_protocol::UpstreamFrame;
use kproxy_protocol::openai::{ChatCompletionResponse, CreateChatCompletionRequest};

use crate::encode::encode_conversation;
use crate::translate::{ResponseTag, aggregate, next_frame, stream_events};
use crate::transport::{ChunkStream, UpstreamAttempt, UpstreamTransport};

/// Terminal result of one dispatched chat request.
pub enum ChatOutcome {
    Completion(ChatCompletionResponse),
    Stream(ChunkStream),
}

impl std::fmt::Debug for ChatOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatOutcome::Completion(response) => {
                f.debug_tuple("Completion").field(response).finish()
            }
            ChatOutcome::Stream(_) => f.debug_tuple("Stream").finish_non_exhaustive(),
        }
    }
}

/// Credential-rotating dispatcher: selects a credential, runs one upstream
/// attempt, and on a confirmed upstream error blacklists the credential and
/// retries with the shrunken pool. Each failed attempt removes exactly one
/// credential, so the loop runs at most once per supplied credential.
pub struct Dispatcher {
    registry: Arc<CredentialRegistry>,
    transport: Arc<dyn UpstreamTransport>,
}

impl Dispatcher {
    pub fn new(registry: Arc<CredentialRegistry>, transport: Arc<dyn UpstreamTransport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    pub fn registry(&self) -> &Arc<CredentialRegistry> {
        &self.registry
    }

    pub async fn dispatch(
        &self,
        request: CreateChatCompletionRequest,
        auth_value: &str,
        fingerprint_override: Option<&str>,
    ) -> Result<ChatOutcome, GatewayError> {
        let candidates = parse_auth_value(auth_value);
        let mut pool = self.registry.usable_pool(candidates);

        loop {
            let Some(credential) = self.registry.select(&pool).cloned() else {
                return Err(GatewayError::Authentication(
                    "no usable credential".to_string(),
                ));
            };
            self.registry.record_attempt(&credential);
            let fingerprint = self.registry.fingerprint(&credential, fingerprint_override);

            let trace_id = Uuid::new_v4().to_string();
            let request_id = Uuid::new_v4().to_string();
            let body = encode_conversation(&request_id, &request.model, &request.messages);
            info!(
                event = "upstream_request",
                trace_id = %trace_id,
                credential = %redact(&credential),
                model = %request.model,
                is_stream = request.stream,
                pool_size = pool.len(),
            );

            let mut chunks = self
                .transport
                .send(UpstreamAttempt {
                    credential: credential.clone(),
                    fingerprint,
                    trace_id: trace_id.clone(),
                    request_id,
                    body,
                })
                .await?;

            // The first frame decides whether this attempt is retriable: an
            // error envelope before any content means the credential failed.
            let first = match next_frame(&mut chunks).await {
                Some(Ok(UpstreamFrame::Error(payload))) => {
                    warn!(
                        event = "attempt_failed",
                        trace_id = %trace_id,
                        credential = %redact(&credential),
                    );
                    self.registry.blacklist_credential(&credential);
                    pool.retain(|entry| entry != &credential);
                    if pool.is_empty() {
                        return Err(GatewayError::Upstream { payload });
                    }
                    continue;
                }
                Some(Ok(frame)) => Some(frame),
                Some(Err(err)) => {
                    return Err(GatewayError::Internal(
                        anyhow::Error::new(err).context("upstream stream read failed"),
                    ));
                }
                None => None,
            };

            let tag = ResponseTag {
                id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
                model: request.model.clone(),
                created: self.registry.now().unix_timestamp(),
            };
            return if request.stream {
                Ok(ChatOutcome::Stream(Box::pin(stream_events(
                    tag, first, chunks,
                ))))
            } else {
                Ok(ChatOutcome::Completion(aggregate(tag, first, chunks).await?))
            };
        }
    }
}
