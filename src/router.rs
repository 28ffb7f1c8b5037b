//! Retrieval orchestration.
//!
//! A chat request is answered by trying, in order:
//!
//! 1. **Primary** (primary handler mode only): a long-lived streaming call
//!    through the primary relay with the full parameter and header set. In
//!    streaming mode its tokens are re-framed to the client as they arrive.
//! 2. **Fallback chain**: the strategy list from [`Strategy::fallback_chain`],
//!    tried strictly one after another. The first non-empty content wins.
//! 3. **Canned reply** from [`crate::fallback`] when everything came back empty.
//!
//! Upstream failures never reach the client; they only advance the chain.

use std::{future::Future, sync::Arc};

use bytes::Bytes;
use futures_util::StreamExt as _;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument as _};

use crate::{
    chat::ChatRequest,
    config::{Config, HandlerMode},
    fallback,
    framer::{Disconnected, Framer, Pacing, SseStream},
    models::ModelMap,
    upstream::{query, Conversation, Strategy, UpstreamClient},
};

/// Shared, read-only application state injected into every request handler via
/// [`axum::extract::State`].
pub struct RouterState {
    pub config: Arc<Config>,
    pub models: ModelMap,
    pub upstream: UpstreamClient,
    /// The live primary call.
    pub primary: Strategy,
    /// Fallback strategies, in the order they are tried.
    pub strategies: Vec<Strategy>,
    pub pacing: Pacing,
    /// Resolved once at startup from `upstream.relay_api_key_env`.
    relay_key: Option<String>,
}

impl RouterState {
    pub fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let upstream = UpstreamClient::new(&config.gateway)?;
        let relay_key = config.upstream.relay_api_key();
        if relay_key.is_none() {
            info!("no relay API key configured, relay calls will be keyless");
        }

        Ok(Self {
            models: ModelMap::builtin(),
            upstream,
            primary: Strategy::primary(&config.upstream),
            strategies: Strategy::fallback_chain(&config.upstream),
            pacing: Pacing::new(config.gateway.chunk_delay()),
            relay_key,
            config,
        })
    }

    /// Override the pacing policy (tests use [`Pacing::immediate`]).
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    fn conversation<'a>(&'a self, request: &'a ChatRequest) -> Conversation<'a> {
        let vendor_model = self.models.to_vendor(&request.model);
        let served_as = self.models.to_public(vendor_model);
        if served_as != request.model {
            debug!(requested = %request.model, served_as, "model not in table, using default");
        }
        Conversation {
            prompt: request.prompt(),
            history: &request.messages,
            vendor_model,
        }
    }

    fn query(&self, strategy: &Strategy, conversation: &Conversation<'_>) -> query::VendorQuery {
        query::build(strategy, &self.config.upstream, self.relay_key.as_deref(), conversation)
    }

    fn primary_enabled(&self) -> bool {
        self.config.gateway.handler_mode == HandlerMode::Primary
    }
}

/// Try each strategy once, in order, and return the index and content of the
/// first one that produces non-empty content.
///
/// Errors and empty results both advance to the next strategy. `None` means
/// every strategy was exhausted, which is not an error.
pub async fn first_non_empty<'s, F, Fut>(
    strategies: &'s [Strategy],
    mut attempt: F,
) -> Option<(usize, String)>
where
    F: FnMut(&'s Strategy) -> Fut,
    Fut: Future<Output = anyhow::Result<String>>,
{
    for (idx, strategy) in strategies.iter().enumerate() {
        debug!(strategy = %strategy.name, attempt = idx + 1, "trying strategy");
        match attempt(strategy).await {
            Ok(content) if !content.is_empty() => {
                info!(strategy = %strategy.name, len = content.len(), "strategy succeeded");
                return Some((idx, content));
            }
            Ok(_) => debug!(strategy = %strategy.name, "strategy returned no content"),
            Err(e) => warn!(strategy = %strategy.name, error = %e, "strategy failed"),
        }
    }

    warn!(attempted = strategies.len(), "all strategies exhausted");
    None
}

/// Run the fallback chain for `conversation`.
pub async fn retrieve(state: &RouterState, conversation: &Conversation<'_>) -> Option<String> {
    first_non_empty(&state.strategies, |strategy| {
        let query = state.query(strategy, conversation);
        async move { state.upstream.fetch(&query).await }
    })
    .await
    .map(|(_, content)| content)
}

/// The fallback chain, then the canned reply. Never empty.
async fn recover(state: &RouterState, request: &ChatRequest) -> String {
    let conversation = state.conversation(request);
    match retrieve(state, &conversation).await {
        Some(content) => content,
        None => {
            info!("using canned fallback reply");
            fallback::respond(conversation.prompt).to_owned()
        }
    }
}

/// Produce the full content for a non-streaming request.
#[tracing::instrument(
    skip_all,
    fields(model = %request.model, mode = %state.config.gateway.handler_mode)
)]
pub async fn complete(state: &RouterState, request: &ChatRequest) -> String {
    if state.primary_enabled() {
        let conversation = state.conversation(request);
        let query = state.query(&state.primary, &conversation);
        match state.upstream.open_stream(&query).await {
            Ok(tokens) => {
                let content: String = tokens.collect().await;
                if !content.is_empty() {
                    info!(len = content.len(), "primary call succeeded");
                    return content;
                }
                info!("primary call returned no content, trying fallback strategies");
            }
            Err(e) => warn!(error = %e, "primary call failed, trying fallback strategies"),
        }
    }

    recover(state, request).await
}

/// Produce an SSE body for a streaming request.
///
/// A background task does the upstream work and pushes framed chunks through a
/// channel. When the client disconnects the channel closes, the task stops, and
/// the upstream connection is dropped with it.
pub fn stream_completion(state: Arc<RouterState>, request: ChatRequest) -> SseStream {
    let (tx, mut rx) = mpsc::channel::<anyhow::Result<Bytes>>(32);
    let span = tracing::info_span!("stream_completion", model = %request.model);

    tokio::spawn(
        async move {
            let framer = Framer::new(&request.model);
            if stream_into(&state, &request, &framer, &tx).await.is_ok() {
                let _ = tx.send(Ok(framer.finish())).await;
            } else {
                debug!("client disconnected mid-stream");
            }
        }
        .instrument(span),
    );

    Box::pin(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)))
}

async fn stream_into(
    state: &RouterState,
    request: &ChatRequest,
    framer: &Framer,
    tx: &mpsc::Sender<anyhow::Result<Bytes>>,
) -> Result<(), Disconnected> {
    if state.primary_enabled() {
        let conversation = state.conversation(request);
        let query = state.query(&state.primary, &conversation);

        let opened = tokio::select! {
            _ = tx.closed() => return Err(Disconnected),
            opened = state.upstream.open_stream(&query) => opened,
        };

        match opened {
            Ok(mut tokens) => {
                let mut emitted = 0usize;
                loop {
                    let token = tokio::select! {
                        _ = tx.closed() => return Err(Disconnected),
                        token = tokens.next() => token,
                    };
                    let Some(token) = token else { break };
                    tx.send(Ok(framer.chunk(&token)))
                        .await
                        .map_err(|_| Disconnected)?;
                    emitted += 1;
                }
                if emitted > 0 {
                    info!(tokens = emitted, "primary stream completed");
                    return Ok(());
                }
                info!("primary stream returned no content, trying fallback strategies");
            }
            Err(e) => warn!(error = %e, "primary call failed, trying fallback strategies"),
        }
    }

    let content = tokio::select! {
        _ = tx.closed() => return Err(Disconnected),
        content = recover(state, request) => content,
    };
    framer.send_paced(tx, &content, state.pacing).await
}
