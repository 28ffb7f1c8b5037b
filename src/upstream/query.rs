//! Vendor query construction.
//!
//! A [`Strategy`] is plain data: which relay wraps the vendor URL, which
//! parameter profile to send and which header set to attach. [`build`] turns a
//! strategy plus a [`Conversation`] into a [`VendorQuery`] that the client can
//! send as-is.

use anyhow::Context;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Url;
use serde::Serialize;

use crate::{
    chat::{ChatMessage, Role},
    config::UpstreamConfig,
};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const VENDOR_ORIGIN: &str = "https://you.com";
const VENDOR_REFERER: &str = "https://you.com/";
const RELAY_KEY_HEADER: &str = "x-cors-api-key";

/// Query-component escaping for encoded relays: everything but the RFC 3986
/// unreserved set.
const RELAY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// How the vendor URL is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relay {
    /// Call the vendor URL itself.
    Direct,
    /// Relay URL followed by the raw vendor URL (`https://relay/https://vendor?...`).
    Prefix(String),
    /// Relay URL followed by the percent-encoded vendor URL (`https://relay/?url=https%3A...`).
    Encoded(String),
}

/// Which query parameters are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamProfile {
    /// Full browser parameter set plus the encoded chat history.
    Conversation,
    /// Pagination, safe-search and locale, no history.
    Standard,
    /// Query, domain and model only.
    Minimal,
}

/// Which request headers are attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderProfile {
    /// Relay key plus a full browser-like header set.
    Browser,
    /// Relay key plus a user agent.
    RelayAgent,
    /// Relay key only.
    RelayKey,
    /// User agent with vendor `Referer`/`Origin`, for unrelayed calls.
    Referer,
    None,
}

/// One retrieval variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    pub name: String,
    pub relay: Relay,
    pub params: ParamProfile,
    pub headers: HeaderProfile,
}

impl Strategy {
    /// The live primary call: primary relay, full parameters and headers.
    pub fn primary(upstream: &UpstreamConfig) -> Self {
        Self {
            name: "primary".into(),
            relay: Relay::Prefix(upstream.relay_url.clone()),
            params: ParamProfile::Conversation,
            headers: HeaderProfile::Browser,
        }
    }

    /// The ordered fallback list tried after the primary call.
    pub fn fallback_chain(upstream: &UpstreamConfig) -> Vec<Self> {
        let mut chain = vec![
            Self {
                name: "relay-standard".into(),
                relay: Relay::Prefix(upstream.relay_url.clone()),
                params: ParamProfile::Standard,
                headers: HeaderProfile::RelayAgent,
            },
            Self {
                name: "relay-minimal".into(),
                relay: Relay::Prefix(upstream.relay_url.clone()),
                params: ParamProfile::Minimal,
                headers: HeaderProfile::RelayKey,
            },
        ];

        chain.extend(upstream.alternate_relays.iter().map(|relay| Self {
            name: format!("alternate-relay:{relay}"),
            relay: Relay::Encoded(relay.clone()),
            params: ParamProfile::Minimal,
            headers: HeaderProfile::None,
        }));

        chain.push(Self {
            name: "direct".into(),
            relay: Relay::Direct,
            params: ParamProfile::Minimal,
            headers: HeaderProfile::Referer,
        });

        chain
    }
}

/// Everything about the inbound request that the vendor query needs.
#[derive(Debug, Clone, Copy)]
pub struct Conversation<'a> {
    pub prompt: &'a str,
    pub history: &'a [ChatMessage],
    pub vendor_model: &'a str,
}

/// One history turn in the vendor's `chat` parameter. Exactly one side is
/// filled; the other is an empty string.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub(crate) struct HistoryTurn<'a> {
    question: &'a str,
    answer: &'a str,
}

pub(crate) fn encode_history(history: &[ChatMessage]) -> String {
    let turns: Vec<HistoryTurn<'_>> = history
        .iter()
        .map(|m| match m.role {
            Role::Assistant => HistoryTurn {
                question: "",
                answer: &m.content,
            },
            Role::User | Role::System | Role::Other => HistoryTurn {
                question: &m.content,
                answer: "",
            },
        })
        .collect();
    // Serializing plain string pairs cannot fail.
    serde_json::to_string(&turns).unwrap_or_else(|_| "[]".to_owned())
}

/// A fully-formed upstream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorQuery {
    /// The vendor endpoint, before any relay wrapping.
    pub endpoint: String,
    pub params: Vec<(&'static str, String)>,
    pub headers: Vec<(&'static str, String)>,
    pub relay: Relay,
}

impl VendorQuery {
    /// The vendor URL with its query string.
    pub fn target_url(&self) -> anyhow::Result<Url> {
        Url::parse_with_params(&self.endpoint, &self.params)
            .with_context(|| format!("invalid vendor endpoint `{}`", self.endpoint))
    }

    /// The URL actually requested, after relay wrapping.
    pub fn request_url(&self) -> anyhow::Result<String> {
        let target = self.target_url()?;
        Ok(match &self.relay {
            Relay::Direct => target.into(),
            Relay::Prefix(relay) => format!("{relay}{target}"),
            Relay::Encoded(relay) => {
                format!("{relay}{}", utf8_percent_encode(target.as_str(), RELAY_ESCAPE))
            }
        })
    }
}

/// Build the query for one strategy.
pub fn build(
    strategy: &Strategy,
    upstream: &UpstreamConfig,
    relay_key: Option<&str>,
    conversation: &Conversation<'_>,
) -> VendorQuery {
    VendorQuery {
        endpoint: upstream.search_url.clone(),
        params: params(strategy.params, &upstream.locale, conversation),
        headers: headers(strategy.headers, relay_key),
        relay: strategy.relay.clone(),
    }
}

fn params(
    profile: ParamProfile,
    locale: &str,
    conversation: &Conversation<'_>,
) -> Vec<(&'static str, String)> {
    let q = ("q", conversation.prompt.to_owned());
    let domain = ("domain", "youchat".to_owned());
    let model = ("selectedAiModel", conversation.vendor_model.to_owned());

    match profile {
        ParamProfile::Minimal => vec![q, domain, model],
        ParamProfile::Standard => vec![
            q,
            ("page", "1".into()),
            ("count", "10".into()),
            ("safeSearch", "Moderate".into()),
            ("mkt", locale.to_owned()),
            domain,
            model,
            ("selectedChatMode", "custom".into()),
        ],
        ParamProfile::Conversation => vec![
            q,
            ("page", "1".into()),
            ("count", "10".into()),
            ("safeSearch", "Moderate".into()),
            ("mkt", locale.to_owned()),
            // Vendor's own spelling.
            ("enable_worklow_generation_ux", "true".into()),
            domain,
            ("use_personalization_extraction", "true".into()),
            (
                "pastChatLength",
                conversation.history.len().saturating_sub(1).to_string(),
            ),
            ("selectedChatMode", "custom".into()),
            model,
            ("enable_agent_clarification_questions", "true".into()),
            ("use_nested_youchat_updates", "true".into()),
            ("chat", encode_history(conversation.history)),
        ],
    }
}

fn headers(profile: HeaderProfile, relay_key: Option<&str>) -> Vec<(&'static str, String)> {
    let key = relay_key.map(|k| (RELAY_KEY_HEADER, k.to_owned()));
    let agent = ("User-Agent", BROWSER_USER_AGENT.to_owned());

    match profile {
        HeaderProfile::None => Vec::new(),
        HeaderProfile::RelayKey => key.into_iter().collect(),
        HeaderProfile::RelayAgent => key.into_iter().chain([agent]).collect(),
        HeaderProfile::Referer => vec![
            agent,
            ("Referer", VENDOR_REFERER.into()),
            ("Origin", VENDOR_ORIGIN.into()),
        ],
        HeaderProfile::Browser => key
            .into_iter()
            .chain([
                agent,
                ("Accept", "text/event-stream".into()),
                ("Accept-Language", "en-US,en;q=0.9".into()),
                ("Referer", VENDOR_REFERER.into()),
                ("Origin", VENDOR_ORIGIN.into()),
                ("DNT", "1".into()),
                ("Sec-Fetch-Dest", "empty".into()),
                ("Sec-Fetch-Mode", "cors".into()),
                ("Sec-Fetch-Site", "same-origin".into()),
                (
                    "sec-ch-ua",
                    r#""Not_A Brand";v="8", "Chromium";v="120", "Google Chrome";v="120""#.into(),
                ),
                ("sec-ch-ua-mobile", "?0".into()),
                ("sec-ch-ua-platform", r#""Windows""#.into()),
            ])
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(role: Role, content: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: content.into(),
        }
    }

    fn history() -> Vec<ChatMessage> {
        vec![
            message(Role::System, "be brief"),
            message(Role::User, "hi"),
            message(Role::Assistant, "hello!"),
            message(Role::User, "what's new & fun?"),
        ]
    }

    fn conversation(history: &[ChatMessage]) -> Conversation<'_> {
        Conversation {
            prompt: "what's new & fun?",
            history,
            vendor_model: "gpt_4o",
        }
    }

    fn param<'a>(query: &'a VendorQuery, name: &str) -> Option<&'a str> {
        query.params.iter().find(|(k, _)| *k == name).map(|(_, v)| v.as_str())
    }

    fn header<'a>(query: &'a VendorQuery, name: &str) -> Option<&'a str> {
        query.headers.iter().find(|(k, _)| *k == name).map(|(_, v)| v.as_str())
    }

    // -----------------------------------------------------------------------
    // History encoding
    // -----------------------------------------------------------------------

    #[test]
    fn history_fills_exactly_one_side_per_turn() {
        let encoded = encode_history(&history());
        let turns: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        let turns = turns.as_array().unwrap();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0], serde_json::json!({"question": "be brief", "answer": ""}));
        assert_eq!(turns[2], serde_json::json!({"question": "", "answer": "hello!"}));
        assert_eq!(turns[3]["question"], "what's new & fun?");
    }

    #[test]
    fn other_roles_are_sent_as_questions() {
        let history = vec![ChatMessage {
            role: Role::Other,
            content: "answer in French".into(),
        }];
        let turns: serde_json::Value = serde_json::from_str(&encode_history(&history)).unwrap();
        assert_eq!(
            turns[0],
            serde_json::json!({"question": "answer in French", "answer": ""})
        );
    }

    // -----------------------------------------------------------------------
    // Parameter profiles
    // -----------------------------------------------------------------------

    #[test]
    fn primary_sends_conversation_params_with_history() {
        let upstream = UpstreamConfig::default();
        let history = history();
        let query = build(&Strategy::primary(&upstream), &upstream, None, &conversation(&history));

        assert_eq!(param(&query, "q"), Some("what's new & fun?"));
        assert_eq!(param(&query, "selectedAiModel"), Some("gpt_4o"));
        assert_eq!(param(&query, "mkt"), Some("zh-HK"));
        assert_eq!(param(&query, "pastChatLength"), Some("3"));
        assert_eq!(param(&query, "use_nested_youchat_updates"), Some("true"));
        assert!(param(&query, "chat").unwrap().starts_with('['));
    }

    #[test]
    fn minimal_profile_sends_three_params() {
        let upstream = UpstreamConfig::default();
        let history = history();
        let strategy = Strategy {
            name: "t".into(),
            relay: Relay::Direct,
            params: ParamProfile::Minimal,
            headers: HeaderProfile::None,
        };
        let query = build(&strategy, &upstream, None, &conversation(&history));
        let names: Vec<&str> = query.params.iter().map(|(k, _)| *k).collect();
        assert_eq!(names, ["q", "domain", "selectedAiModel"]);
        assert!(query.headers.is_empty());
    }

    #[test]
    fn standard_profile_has_pagination_but_no_history() {
        let upstream = UpstreamConfig::default();
        let history = history();
        let chain = Strategy::fallback_chain(&upstream);
        let query = build(&chain[0], &upstream, None, &conversation(&history));
        assert_eq!(param(&query, "page"), Some("1"));
        assert_eq!(param(&query, "safeSearch"), Some("Moderate"));
        assert!(param(&query, "chat").is_none());
    }

    // -----------------------------------------------------------------------
    // Headers
    // -----------------------------------------------------------------------

    #[test]
    fn relay_key_header_is_attached_only_when_configured() {
        let upstream = UpstreamConfig::default();
        let history = history();
        let primary = Strategy::primary(&upstream);

        let keyed = build(&primary, &upstream, Some("live_abc"), &conversation(&history));
        assert_eq!(header(&keyed, "x-cors-api-key"), Some("live_abc"));
        assert_eq!(header(&keyed, "Accept"), Some("text/event-stream"));

        let keyless = build(&primary, &upstream, None, &conversation(&history));
        assert!(header(&keyless, "x-cors-api-key").is_none());
        assert!(header(&keyless, "User-Agent").is_some());
    }

    #[test]
    fn direct_strategy_sends_referer_and_origin() {
        let upstream = UpstreamConfig::default();
        let history = history();
        let direct = Strategy::fallback_chain(&upstream).pop().unwrap();
        let query = build(&direct, &upstream, Some("ignored"), &conversation(&history));
        assert_eq!(header(&query, "Referer"), Some("https://you.com/"));
        assert_eq!(header(&query, "Origin"), Some("https://you.com"));
        assert!(header(&query, "x-cors-api-key").is_none());
    }

    // -----------------------------------------------------------------------
    // Strategy list & relay wrapping
    // -----------------------------------------------------------------------

    #[test]
    fn fallback_chain_order_is_fixed() {
        let upstream = UpstreamConfig::default();
        let names: Vec<String> =
            Strategy::fallback_chain(&upstream).into_iter().map(|s| s.name).collect();
        assert_eq!(names.len(), 6);
        assert_eq!(names[0], "relay-standard");
        assert_eq!(names[1], "relay-minimal");
        assert!(names[2..5].iter().all(|n| n.starts_with("alternate-relay:")));
        assert_eq!(names[5], "direct");
    }

    #[test]
    fn prefix_relay_appends_raw_vendor_url() {
        let upstream = UpstreamConfig::default();
        let history = history();
        let chain = Strategy::fallback_chain(&upstream);
        let url = build(&chain[1], &upstream, None, &conversation(&history))
            .request_url()
            .unwrap();
        assert!(
            url.starts_with("https://proxy.cors.sh/https://you.com/api/streamingSearch?q="),
            "url: {url}"
        );
    }

    #[test]
    fn encoded_relay_percent_encodes_vendor_url() {
        let upstream = UpstreamConfig::default();
        let history = history();
        let chain = Strategy::fallback_chain(&upstream);
        let url = build(&chain[3], &upstream, None, &conversation(&history))
            .request_url()
            .unwrap();
        let wrapped = url
            .strip_prefix("https://api.allorigins.win/raw?url=")
            .expect("relay prefix");
        assert!(
            wrapped.starts_with("https%3A%2F%2Fyou.com%2Fapi%2FstreamingSearch%3Fq%3D"),
            "url: {url}"
        );
        // Unreserved characters pass through untouched.
        assert!(wrapped.contains("selectedAiModel%3Dgpt_4o"), "url: {url}");
        assert!(!wrapped.contains('&'));
    }

    #[test]
    fn direct_url_form_encodes_prompt() {
        let upstream = UpstreamConfig::default();
        let history = history();
        let direct = Strategy::fallback_chain(&upstream).pop().unwrap();
        let query = build(&direct, &upstream, None, &conversation(&history));
        let url = query.request_url().unwrap();
        assert!(
            url.starts_with("https://you.com/api/streamingSearch?q=what%27s+new+%26+fun%3F"),
            "url: {url}"
        );

        let parsed = query.target_url().unwrap();
        let q = parsed.query_pairs().find(|(k, _)| k == "q").map(|(_, v)| v.into_owned());
        assert_eq!(q.as_deref(), Some("what's new & fun?"));
    }

    #[test]
    fn invalid_endpoint_is_an_error() {
        let mut upstream = UpstreamConfig::default();
        upstream.search_url = "not a url".into();
        let history = history();
        let query = build(&Strategy::primary(&upstream), &upstream, None, &conversation(&history));
        assert!(query.request_url().is_err());
    }
}
