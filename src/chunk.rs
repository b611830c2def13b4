//! Size-bounded line-boundary text chunker.
//!
//! Splits file content into retrievable spans that respect a maximum
//! character budget. Accumulation is line-by-line so chunks never cut a
//! line in half; a single line longer than the budget becomes its own
//! oversized chunk rather than being split mid-line.

/// Default chunk budget in characters.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 1000;

/// Split `content` into trimmed chunks of at most `max_chars` characters
/// (modulo single oversized lines). Returns at least one chunk for any
/// non-whitespace input, and none for blank input.
pub fn chunk_content(content: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if !current.is_empty() && current.len() + line.len() + 1 > max_chars {
            push_trimmed(&mut chunks, &current);
            current.clear();
        }
        current.push_str(line);
        current.push('\n');
    }

    push_trimmed(&mut chunks, &current);

    if chunks.is_empty() && !content.trim().is_empty() {
        chunks.push(content.trim().to_string());
    }

    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, buf: &str) {
    let trimmed = buf.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}
