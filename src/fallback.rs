//! Canned replies for when every retrieval strategy comes back empty.
//!
//! The table is an explicit ordered list so the first match is deterministic;
//! longer phrases sit ahead of the short keywords they would otherwise lose to
//! (`"thank you"` before `"hi"`, question words before `"hi"`).

/// `(keyword, reply)` pairs, checked in order by substring containment on the
/// lower-cased input.
const KEYWORD_REPLIES: &[(&str, &str)] = &[
    ("thank you", "You're very welcome! Feel free to ask if you need anything else."),
    ("thanks", "You're welcome! Is there anything else I can help you with?"),
    ("hello", "Hello! How can I help you today?"),
    ("你好", "你好！我是AI助手，很高兴为您服务！"),
    ("谢谢", "不客气！如果您还有其他问题，请随时告诉我。"),
    ("help", "I'm here to help! Please let me know what you need assistance with."),
    ("what", "I'm an AI assistant created to help answer questions and have conversations."),
    ("who", "I'm an AI assistant. How may I assist you today?"),
    ("how", "I can help you with various questions and tasks. What would you like to know?"),
    ("hi", "Hi there! What can I do for you?"),
];

pub const APOLOGY_EN: &str = "I apologize, but I'm currently unable to process your request. \
This might be due to network connectivity issues or temporary service unavailability. \
Please try again later or rephrase your question.";

pub const APOLOGY_ZH: &str =
    "抱歉，我目前无法处理您的请求。这可能是由于网络连接问题或服务暂时不可用。请稍后再试，或者重新表述您的问题。";

/// Pick a reply for `message`. Never empty.
pub fn respond(message: &str) -> &'static str {
    let lower = message.to_lowercase();

    KEYWORD_REPLIES
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|&(_, reply)| reply)
        .unwrap_or_else(|| {
            if contains_cjk(message) {
                APOLOGY_ZH
            } else {
                APOLOGY_EN
            }
        })
}

/// Any code point in the CJK Unified Ideographs block (U+4E00–U+9FFF).
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| ('\u{4E00}'..='\u{9FFF}').contains(&c))
}
