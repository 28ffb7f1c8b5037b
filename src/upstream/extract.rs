//! Token extraction from the vendor's event stream.
//!
//! The vendor's frame schema is undocumented and drifts, so frames are kept as
//! loose [`Value`]s and searched with an ordered list of JSON pointers; the first
//! non-empty string wins. Each line is handled independently: a malformed line
//! is skipped, never fatal.

use futures_util::{future, Stream, StreamExt as _};
use serde_json::Value;
use tracing::{debug, warn};

/// JSON pointers tried in order for the token text.
const TOKEN_POINTERS: &[&str] = &[
    "/youChatToken",
    "/text",
    "/message",
    "/content",
    "/answer",
    "/response",
    "/completion",
    "/output",
    "/result",
    "/reply",
    "/data",
    "/delta/content",
    "/choices/0/message/content",
    "/choices/0/delta/content",
];

const DONE_SENTINEL: &str = "[DONE]";

/// What one line of the upstream body contributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Token(String),
    /// The `[DONE]` sentinel; nothing after it is read.
    Done,
    /// Blank, placeholder, unparseable or token-less line.
    Skip,
}

/// Pull the token text out of a parsed frame.
pub fn extract_text(frame: &Value) -> Option<&str> {
    TOKEN_POINTERS
        .iter()
        .filter_map(|pointer| frame.pointer(pointer).and_then(Value::as_str))
        .find(|text| !text.is_empty())
}

/// Classify one line. Accepts both `data: {...}` and bare JSON lines.
pub fn parse_line(line: &str) -> Frame {
    let line = line.trim_end_matches('\r');
    let payload = line
        .strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))
        .unwrap_or(line)
        .trim();

    if payload == DONE_SENTINEL {
        return Frame::Done;
    }
    if payload.is_empty() || payload == "{}" {
        return Frame::Skip;
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(frame) if frame.is_object() => match extract_text(&frame) {
            Some(text) => Frame::Token(text.to_owned()),
            None => Frame::Skip,
        },
        _ => Frame::Skip,
    }
}

/// Adapt a stream of decoded lines into a stream of tokens.
///
/// The token stream ends at `[DONE]`, at the end of the input, or at the first
/// read error (tokens already yielded are kept). Bad line content is never an
/// error here; it parses to [`Frame::Skip`]. With `verbose` set, every raw line
/// is logged at `debug`.
pub fn tokens<S, E>(lines: S, verbose: bool) -> impl Stream<Item = String>
where
    S: Stream<Item = Result<String, E>>,
    E: std::fmt::Display,
{
    lines
        .scan((), move |_, line| {
            future::ready(match line {
                Ok(line) => {
                    if verbose {
                        debug!(raw = %line, "upstream line");
                    }
                    match parse_line(&line) {
                        Frame::Done => None,
                        frame => Some(frame),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "upstream body read failed, ending token stream");
                    None
                }
            })
        })
        .filter_map(|frame| {
            future::ready(match frame {
                Frame::Token(text) => Some(text),
                _ => None,
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{stream, StreamExt as _};
    use serde_json::json;

    // -----------------------------------------------------------------------
    // parse_line
    // -----------------------------------------------------------------------

    #[test]
    fn vendor_token_line_yields_token() {
        assert_eq!(parse_line(r#"data: {"youChatToken":"hi"}"#), Frame::Token("hi".into()));
    }

    #[test]
    fn done_sentinel_ends_stream() {
        assert_eq!(parse_line("data: [DONE]"), Frame::Done);
    }

    #[test]
    fn malformed_and_placeholder_lines_are_skipped() {
        assert_eq!(parse_line("data: {not json"), Frame::Skip);
        assert_eq!(parse_line("data: {}"), Frame::Skip);
        assert_eq!(parse_line("data: "), Frame::Skip);
        assert_eq!(parse_line(""), Frame::Skip);
        assert_eq!(parse_line("event: youChatToken"), Frame::Skip);
        assert_eq!(parse_line(r#"data: "just a string""#), Frame::Skip);
    }

    #[test]
    fn bare_json_lines_are_accepted() {
        assert_eq!(parse_line(r#"{"text":"raw"}"#), Frame::Token("raw".into()));
    }

    #[test]
    fn carriage_returns_are_tolerated() {
        assert_eq!(parse_line("data: {\"youChatToken\":\"x\"}\r"), Frame::Token("x".into()));
    }

    // -----------------------------------------------------------------------
    // extract_text lookup order
    // -----------------------------------------------------------------------

    #[test]
    fn vendor_field_wins_over_generic_fields() {
        let frame = json!({ "text": "generic", "youChatToken": "vendor" });
        assert_eq!(extract_text(&frame), Some("vendor"));
    }

    #[test]
    fn empty_strings_fall_through_to_next_pointer() {
        let frame = json!({ "youChatToken": "", "message": "next" });
        assert_eq!(extract_text(&frame), Some("next"));
    }

    #[test]
    fn non_string_fields_are_ignored() {
        let frame = json!({ "text": 42, "data": { "nested": true }, "reply": "ok" });
        assert_eq!(extract_text(&frame), Some("ok"));
    }

    #[test]
    fn nested_delta_content_is_found() {
        let frame = json!({ "delta": { "content": "d" } });
        assert_eq!(extract_text(&frame), Some("d"));
    }

    #[test]
    fn openai_shaped_frames_are_found() {
        let message = json!({ "choices": [{ "message": { "content": "m" } }] });
        let delta = json!({ "choices": [{ "delta": { "content": "d" } }] });
        assert_eq!(extract_text(&message), Some("m"));
        assert_eq!(extract_text(&delta), Some("d"));
    }

    #[test]
    fn frames_without_known_fields_yield_nothing() {
        assert_eq!(extract_text(&json!({ "youChatUpdate": { "t": "x" } })), None);
        assert_eq!(parse_line(r#"data: {"thirdPartySearchResults":[]}"#), Frame::Skip);
    }

    // -----------------------------------------------------------------------
    // tokens
    // -----------------------------------------------------------------------

    async fn collect_body(body: &str) -> String {
        let lines = body.lines().map(|l| Ok::<_, std::io::Error>(l.to_owned())).collect::<Vec<_>>();
        tokens(stream::iter(lines), false).collect().await
    }

    #[tokio::test]
    async fn collect_concatenates_in_order_and_survives_bad_lines() {
        let body = "event: youChatToken\n\
                    data: {\"youChatToken\":\"Hel\"}\n\
                    data: {not json\n\
                    \n\
                    data: {}\n\
                    data: {\"youChatToken\":\"lo\"}\n\
                    data: [DONE]\n\
                    data: {\"youChatToken\":\"ignored\"}\n";
        assert_eq!(collect_body(body).await, "Hello");
    }

    #[tokio::test]
    async fn collect_of_empty_body_is_empty() {
        assert_eq!(collect_body("").await, "");
    }

    #[tokio::test]
    async fn token_stream_stops_at_done() {
        let lines = stream::iter(vec![
            Ok::<_, std::io::Error>(r#"data: {"youChatToken":"a"}"#.to_owned()),
            Ok("data: {broken".to_owned()),
            Ok(r#"data: {"youChatToken":"b"}"#.to_owned()),
            Ok("data: [DONE]".to_owned()),
            Ok(r#"data: {"youChatToken":"c"}"#.to_owned()),
        ]);
        let out: Vec<String> = tokens(lines, false).collect().await;
        assert_eq!(out, ["a", "b"]);
    }

    #[tokio::test]
    async fn token_stream_keeps_tokens_before_read_error() {
        let lines = stream::iter(vec![
            Ok(r#"data: {"youChatToken":"kept"}"#.to_owned()),
            Err(std::io::Error::other("connection reset")),
            Ok(r#"data: {"youChatToken":"lost"}"#.to_owned()),
        ]);
        let out: Vec<String> = tokens(lines, true).collect().await;
        assert_eq!(out, ["kept"]);
    }
}
