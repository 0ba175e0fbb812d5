//! Prompt compression.
//!
//! Compression runs before the cache key is computed, so its output must be a
//! pure function of the input prompt and the configuration.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

#[allow(clippy::expect_used)]
static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("markup pattern is valid"));

/// Configuration for prompt compression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Prompts longer than this many characters are truncated.
    pub max_chars: usize,

    /// Characters kept from the start of a truncated prompt.
    pub head_chars: usize,

    /// Characters kept from the end of a truncated prompt.
    pub tail_chars: usize,

    /// Inserted between head and tail.
    pub elision_marker: String,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_chars: 8000,
            head_chars: 2000,
            tail_chars: 2000,
            elision_marker: "\n...(中间省略)...\n".to_string(),
        }
    }
}

/// Collapse whitespace, strip markup tags and truncate long prompts to their
/// head and tail.
///
/// Lengths are counted in characters so truncation never splits a UTF-8
/// sequence.
pub fn compress_prompt(prompt: &str, config: &CompressionConfig) -> String {
    let collapsed = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    let stripped = MARKUP.replace_all(&collapsed, "").into_owned();

    let len = stripped.chars().count();
    if len <= config.max_chars {
        return stripped;
    }

    let head: String = stripped.chars().take(config.head_chars).collect();
    let tail: String = stripped
        .chars()
        .skip(len.saturating_sub(config.tail_chars))
        .collect();
    format!("{head}{}{tail}", config.elision_marker)
}
