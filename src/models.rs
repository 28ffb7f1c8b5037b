//! Public ↔ vendor model name translation.
//!
//! Clients address models by their OpenAI-style public ids (`gpt-4o`,
//! `claude-3.5-sonnet`); the vendor expects its own internal ids (`gpt_4o`,
//! `claude_3_5_sonnet`). Lookups never fail: anything outside the table maps to
//! a default, so a round trip is only faithful for ids that are in the table.

use std::collections::HashMap;

/// Vendor model used for any public id that is not in the table.
pub const DEFAULT_VENDOR_MODEL: &str = "deepseek_v3";

/// Public model reported for any vendor id that is not in the table.
pub const DEFAULT_PUBLIC_MODEL: &str = "deepseek-chat";

/// `(public, vendor)` pairs, in the order `/v1/models` lists them.
const MODEL_TABLE: &[(&str, &str)] = &[
    ("deepseek-reasoner", "deepseek_r1"),
    ("deepseek-chat", "deepseek_v3"),
    ("o3-mini-high", "openai_o3_mini_high"),
    ("o3-mini-medium", "openai_o3_mini_medium"),
    ("o1", "openai_o1"),
    ("o1-mini", "openai_o1_mini"),
    ("o1-preview", "openai_o1_preview"),
    ("gpt-4o", "gpt_4o"),
    ("gpt-4o-mini", "gpt_4o_mini"),
    ("gpt-4-turbo", "gpt_4_turbo"),
    ("gpt-3.5-turbo", "gpt_3_5"),
    ("claude-3-opus", "claude_3_opus"),
    ("claude-3-sonnet", "claude_3_sonnet"),
    ("claude-3.5-sonnet", "claude_3_5_sonnet"),
    ("claude-3.5-haiku", "claude_3_5_haiku"),
    ("gemini-1.5-pro", "gemini_1_5_pro"),
    ("gemini-1.5-flash", "gemini_1_5_flash"),
    ("llama-3.2-90b", "llama3_2_90b"),
    ("llama-3.1-405b", "llama3_1_405b"),
    ("mistral-large-2", "mistral_large_2"),
    ("qwen-2.5-72b", "qwen2p5_72b"),
    ("qwen-2.5-coder-32b", "qwen2p5_coder_32b"),
    ("command-r-plus", "command_r_plus"),
];

/// Immutable bidirectional model map.
///
/// Built once at startup and shared through [`crate::router::RouterState`];
/// nothing on the request path can mutate it.
#[derive(Debug, Clone)]
pub struct ModelMap {
    to_vendor: HashMap<&'static str, &'static str>,
    to_public: HashMap<&'static str, &'static str>,
}

impl ModelMap {
    /// The built-in table.
    pub fn builtin() -> Self {
        Self {
            to_vendor: MODEL_TABLE.iter().copied().collect(),
            to_public: MODEL_TABLE.iter().map(|&(p, v)| (v, p)).collect(),
        }
    }

    /// Vendor id for a public id, or [`DEFAULT_VENDOR_MODEL`].
    pub fn to_vendor(&self, public: &str) -> &'static str {
        self.to_vendor.get(public).copied().unwrap_or(DEFAULT_VENDOR_MODEL)
    }

    /// Public id for a vendor id, or [`DEFAULT_PUBLIC_MODEL`].
    pub fn to_public(&self, vendor: &str) -> &'static str {
        self.to_public.get(vendor).copied().unwrap_or(DEFAULT_PUBLIC_MODEL)
    }

    /// Every public id, in table order.
    pub fn public_ids(&self) -> impl Iterator<Item = &'static str> {
        MODEL_TABLE.iter().map(|&(public, _)| public)
    }
}

impl Default for ModelMap {
    fn default() -> Self {
        Self::builtin()
    }
}
