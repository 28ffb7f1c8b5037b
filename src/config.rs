//! Configuration types for you2api.
//!
//! Config is loaded once at startup from a TOML file and validated before the
//! server opens its port. Every field has a default, so an empty file (or no
//! file at all) yields a working configuration.
//!
//! # Example
//! ```toml
//! [gateway]
//! port         = 8080
//! handler_mode = "primary"
//!
//! [upstream]
//! search_url        = "https://you.com/api/streamingSearch"
//! relay_url         = "https://proxy.cors.sh/"
//! relay_api_key_env = "CORS_API_KEY"
//! ```

use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Which request handler serves `/v1/chat/completions`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HandlerMode {
    /// Open a live stream against the primary relay first, then fall back to
    /// the strategy list if it yields nothing.
    #[default]
    Primary,
    /// Skip the live primary call and go straight to the strategy list.
    Fallback,
}

impl std::fmt::Display for HandlerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        })
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure_http_url("upstream.search_url", &self.upstream.search_url)?;
        ensure_http_url("upstream.relay_url", &self.upstream.relay_url)?;
        for relay in &self.upstream.alternate_relays {
            ensure_http_url("upstream.alternate_relays", relay)?;
        }

        anyhow::ensure!(
            self.gateway.primary_timeout_ms > 0,
            "gateway.primary_timeout_ms must be greater than zero"
        );
        anyhow::ensure!(
            self.gateway.fallback_timeout_ms > 0,
            "gateway.fallback_timeout_ms must be greater than zero"
        );

        Ok(())
    }

    /// Apply the service wrapper's environment flags on top of the file config.
    ///
    /// `lookup` is `std::env::var` in production; tests pass a closure over a
    /// fixed map so no process environment is touched.
    ///
    /// | Variable | Effect |
    /// |---|---|
    /// | `USE_FALLBACK=true` / `FALLBACK_MODE=true` | `handler_mode = "fallback"` |
    /// | `DEBUG=true` | `debug = true` |
    /// | `PORT=<u16>` | listen port |
    pub fn apply_env_flags<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |name: &str| lookup(name).is_some_and(|v| v.eq_ignore_ascii_case("true"));

        if flag("USE_FALLBACK") || flag("FALLBACK_MODE") {
            self.gateway.handler_mode = HandlerMode::Fallback;
        }
        if flag("DEBUG") {
            self.gateway.debug = true;
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.parse::<u16>().ok()) {
            self.gateway.port = port;
        }
    }
}

fn ensure_http_url(field: &str, value: &str) -> anyhow::Result<()> {
    let url = reqwest::Url::parse(value)
        .with_context(|| format!("{field} is not a valid URL: `{value}`"))?;
    anyhow::ensure!(
        matches!(url.scheme(), "http" | "https"),
        "{field} must be an http(s) URL, got `{value}`"
    );
    anyhow::ensure!(
        url.host_str().is_some_and(|host| !host.is_empty()),
        "{field} must name a host, got `{value}`"
    );
    Ok(())
}

/// Listener and request-handling settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Port for the client API (default: 8080).
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Log filter override (`RUST_LOG` still wins when set).
    #[serde(default)]
    pub log_level: Option<String>,

    /// Which handler serves chat completions (default: `primary`).
    #[serde(default)]
    pub handler_mode: HandlerMode,

    /// Log every raw upstream line and parsed frame.
    #[serde(default)]
    pub debug: bool,

    /// Delay between simulated word chunks in milliseconds (default: 50).
    /// Set to 0 to emit all chunks back-to-back.
    #[serde(default = "defaults::chunk_delay_ms")]
    pub chunk_delay_ms: u64,

    /// Timeout for the live primary call, body included (default: 300 000).
    #[serde(default = "defaults::primary_timeout_ms")]
    pub primary_timeout_ms: u64,

    /// Timeout for each fallback strategy attempt (default: 30 000).
    #[serde(default = "defaults::fallback_timeout_ms")]
    pub fallback_timeout_ms: u64,
}

impl GatewayConfig {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: defaults::port(),
            log_level: None,
            handler_mode: HandlerMode::default(),
            debug: false,
            chunk_delay_ms: defaults::chunk_delay_ms(),
            primary_timeout_ms: defaults::primary_timeout_ms(),
            fallback_timeout_ms: defaults::fallback_timeout_ms(),
        }
    }
}

/// Where and how the vendor search endpoint is reached.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// The vendor's streaming search endpoint.
    #[serde(default = "defaults::search_url")]
    pub search_url: String,

    /// Market/locale sent as the `mkt` parameter.
    #[serde(default = "defaults::locale")]
    pub locale: String,

    /// Primary CORS relay; the vendor URL is appended verbatim.
    #[serde(default = "defaults::relay_url")]
    pub relay_url: String,

    /// Environment variable holding the primary relay's API key.
    ///
    /// Leave unset (or leave the variable empty) to call the relay keyless.
    #[serde(default = "defaults::relay_api_key_env")]
    pub relay_api_key_env: Option<String>,

    /// Extra relays tried in order; the vendor URL is appended percent-encoded.
    #[serde(default = "defaults::alternate_relays")]
    pub alternate_relays: Vec<String>,
}

impl UpstreamConfig {
    /// Resolve the relay API key from the configured environment variable.
    pub fn relay_api_key(&self) -> Option<String> {
        self.relay_api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            search_url: defaults::search_url(),
            locale: defaults::locale(),
            relay_url: defaults::relay_url(),
            relay_api_key_env: defaults::relay_api_key_env(),
            alternate_relays: defaults::alternate_relays(),
        }
    }
}

mod defaults {
    pub fn port() -> u16 { 8080 }
    pub fn chunk_delay_ms() -> u64 { 50 }
    pub fn primary_timeout_ms() -> u64 { 300_000 }
    pub fn fallback_timeout_ms() -> u64 { 30_000 }
    pub fn search_url() -> String { "https://you.com/api/streamingSearch".into() }
    pub fn locale() -> String { "zh-HK".into() }
    pub fn relay_url() -> String { "https://proxy.cors.sh/".into() }
    pub fn relay_api_key_env() -> Option<String> { Some("CORS_API_KEY".into()) }
    pub fn alternate_relays() -> Vec<String> {
        vec![
            "https://cors-anywhere.herokuapp.com/".into(),
            "https://api.allorigins.win/raw?url=".into(),
            "https://thingproxy.freeboard.io/fetch/".into(),
        ]
    }
}
