//! HTTP client for the vendor search endpoint and its relays.
//!
//! Two [`reqwest::Client`]s are held: one with the short per-attempt timeout
//! used by the fallback strategies, and one with the long timeout used by the
//! live primary call. Both are built once at startup and shared by every
//! request.

pub mod extract;
pub mod query;

use std::{io, pin::Pin, time::Duration};

use anyhow::Context;
use futures_util::{Stream, StreamExt as _, TryStreamExt as _};
use reqwest::{Client, Response};
use bytes::{Bytes, BytesMut};
use tokio_util::{
    codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, FramedRead},
    io::StreamReader,
};
use tracing::{debug, warn};

use crate::config::GatewayConfig;

pub use query::{Conversation, Strategy, VendorQuery};

/// Tokens extracted from a live upstream body, in arrival order.
pub type TokenStream = Pin<Box<dyn Stream<Item = String> + Send>>;

pub struct UpstreamClient {
    /// Fallback strategies, bounded by `fallback_timeout_ms`.
    client: Client,
    /// The live primary call, bounded by `primary_timeout_ms`.
    stream_client: Client,
    /// Log raw upstream lines.
    verbose: bool,
}

impl UpstreamClient {
    pub fn new(gateway: &GatewayConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(gateway.fallback_timeout_ms))
            .build()
            .context("building reqwest client")?;

        let stream_client = Client::builder()
            .timeout(Duration::from_millis(gateway.primary_timeout_ms))
            .build()
            .context("building streaming reqwest client")?;

        Ok(Self {
            client,
            stream_client,
            verbose: gateway.debug,
        })
    }

    /// Run one fallback attempt and return its accumulated content.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-2xx status. An empty
    /// string is a successful call that produced no tokens.
    pub async fn fetch(&self, query: &VendorQuery) -> anyhow::Result<String> {
        let response = send(&self.client, query).await?;
        Ok(token_stream(response, self.verbose).collect::<String>().await)
    }

    /// Open the live primary call and return its token stream.
    ///
    /// The stream holds the upstream connection; dropping it closes the
    /// connection.
    pub async fn open_stream(&self, query: &VendorQuery) -> anyhow::Result<TokenStream> {
        let response = send(&self.stream_client, query).await?;
        Ok(token_stream(response, self.verbose))
    }
}

async fn send(client: &Client, query: &VendorQuery) -> anyhow::Result<Response> {
    let url = query.request_url()?;
    debug!(%url, "GET upstream");

    let mut request = client.get(&url);
    for (name, value) in &query.headers {
        request = request.header(*name, value);
    }

    let response = request.send().await.with_context(|| format!("GET {url}"))?;
    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("upstream returned HTTP {status}");
    }
    Ok(response)
}

fn token_stream(response: Response, verbose: bool) -> TokenStream {
    let body = response.bytes_stream().map_err(io::Error::other);
    let lines = FramedRead::new(StreamReader::new(body), BodyLines::new());
    Box::pin(extract::tokens(lines, verbose))
}

/// Longest upstream line kept; anything longer is dropped up to its newline.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits an upstream body on `\n` without caring what the bytes are.
///
/// Relays sometimes hand back bodies that are not UTF-8 or have no line
/// breaks at all. Such lines come out lossily decoded or, past
/// [`MAX_LINE_BYTES`], as an empty line, and [`extract::parse_line`] skips
/// them. Only transport errors end the stream.
struct BodyLines {
    inner: AnyDelimiterCodec,
    max_length: usize,
}

impl BodyLines {
    fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), max_length),
            max_length,
        }
    }

    fn finish(
        &self,
        chunk: Result<Option<Bytes>, AnyDelimiterCodecError>,
    ) -> Result<Option<String>, io::Error> {
        match chunk {
            Ok(line) => Ok(line.map(|b| String::from_utf8_lossy(&b).into_owned())),
            Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                warn!(max = self.max_length, "upstream line too long, skipping it");
                Ok(Some(String::new()))
            }
            Err(AnyDelimiterCodecError::Io(e)) => Err(e),
        }
    }
}

impl Decoder for BodyLines {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let chunk = self.inner.decode(src);
        self.finish(chunk)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let chunk = self.inner.decode_eof(src);
        self.finish(chunk)
    }
}
