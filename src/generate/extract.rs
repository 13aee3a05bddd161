use regex::Regex;
use std::sync::LazyLock;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:tsx|typescript|jsx|javascript|ts|js)?[ \t]*\r?\n([\s\S]*?)\r?\n[ \t]*```")
        .unwrap()
});

static OPEN_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:tsx|typescript|jsx|javascript|ts|js)?[ \t]*\r?\n([\s\S]*)$").unwrap()
});

/// Pull component source out of a model reply.
///
/// First fenced block if there is one; an opening fence with no closing fence yields
/// everything after it; otherwise the whole reply, trimmed. Always returns a string.
pub fn extract_component_code(reply: &str) -> String {
    if let Some(caps) = FENCED_BLOCK.captures(reply) {
        return caps[1].trim().to_string();
    }
    if let Some(caps) = OPEN_FENCE.captures(reply) {
        return caps[1].trim().to_string();
    }
    reply.trim().to_string()
}
