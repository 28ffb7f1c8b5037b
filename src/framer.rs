//! OpenAI response framing.
//!
//! A [`Framer`] fixes the response id, creation timestamp and model once, so
//! every chunk of one streamed response carries the same identity. Content is
//! rendered either as a single `chat.completion` object or as a sequence of
//! `chat.completion.chunk` SSE frames ending in a stop chunk and `[DONE]`.

use std::{pin::Pin, time::Duration};

use bytes::Bytes;
use futures_util::Stream;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::chat::Role;

/// Byte stream of SSE frames handed to the HTTP body.
pub type SseStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// How simulated word chunks are spaced out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pacing {
    pub delay: Duration,
}

impl Pacing {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// No delay; used by tests.
    pub fn immediate() -> Self {
        Self::default()
    }
}

/// The receiving side of a streamed response went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("client disconnected")]
pub struct Disconnected;

// ──────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ChatCompletion<'a> {
    pub id: &'a str,
    pub object: &'static str,
    pub created: i64,
    pub model: &'a str,
    pub choices: [CompletionChoice<'a>; 1],
}

#[derive(Debug, Serialize)]
pub struct CompletionChoice<'a> {
    pub index: u32,
    pub message: AssistantMessage<'a>,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AssistantMessage<'a> {
    pub role: Role,
    pub content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionChunk<'a> {
    id: &'a str,
    object: &'static str,
    created: i64,
    model: &'a str,
    choices: [ChunkChoice<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChunkChoice<'a> {
    index: u32,
    delta: Delta<'a>,
    finish_reason: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct Delta<'a> {
    content: &'a str,
}

// ──────────────────────────────────────────────────────────────────────────────
// Framer
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Framer {
    id: String,
    created: i64,
    model: String,
}

impl Framer {
    /// Start framing a response for `model`, stamping id and timestamp now.
    pub fn new(model: impl Into<String>) -> Self {
        let created = chrono::Utc::now().timestamp();
        Self {
            id: format!("chatcmpl-{created}"),
            created,
            model: model.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The non-streaming response body.
    pub fn completion<'a>(&'a self, content: &'a str) -> ChatCompletion<'a> {
        ChatCompletion {
            id: &self.id,
            object: "chat.completion",
            created: self.created,
            model: &self.model,
            choices: [CompletionChoice {
                index: 0,
                message: AssistantMessage {
                    role: Role::Assistant,
                    content,
                },
                finish_reason: "stop",
            }],
        }
    }

    /// One content chunk as an SSE frame.
    pub fn chunk(&self, content: &str) -> Bytes {
        self.frame(content, None)
    }

    /// The terminal stop chunk followed by the `[DONE]` sentinel.
    pub fn finish(&self) -> Bytes {
        let mut out = String::from_utf8_lossy(&self.frame("", Some("stop"))).into_owned();
        out.push_str(DONE_FRAME);
        Bytes::from(out)
    }

    /// One chunk per whitespace-separated word, each with a trailing space.
    pub fn word_chunks<'a>(&'a self, content: &'a str) -> impl Iterator<Item = Bytes> + 'a {
        content.split_whitespace().map(move |word| self.chunk(&format!("{word} ")))
    }

    fn frame(&self, content: &str, finish_reason: Option<&'static str>) -> Bytes {
        let chunk = ChatCompletionChunk {
            id: &self.id,
            object: "chat.completion.chunk",
            created: self.created,
            model: &self.model,
            choices: [ChunkChoice {
                index: 0,
                delta: Delta { content },
                finish_reason,
            }],
        };
        // Borrowed strings and integers always serialize.
        let json = serde_json::to_string(&chunk).unwrap_or_default();
        Bytes::from(format!("data: {json}\n\n"))
    }

    /// Send `content` as paced word chunks (without the terminal chunk).
    ///
    /// The delay sits between words, not after the last one.
    pub async fn send_paced(
        &self,
        tx: &mpsc::Sender<anyhow::Result<Bytes>>,
        content: &str,
        pacing: Pacing,
    ) -> Result<(), Disconnected> {
        let mut words = self.word_chunks(content).peekable();
        while let Some(chunk) = words.next() {
            tx.send(Ok(chunk)).await.map_err(|_| Disconnected)?;
            if !pacing.delay.is_zero() && words.peek().is_some() {
                tokio::time::sleep(pacing.delay).await;
            }
        }
        Ok(())
    }
}
