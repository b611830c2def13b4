//! Query-aware snippet extraction.
//!
//! For each chunk chosen into the final top-K, retrieval shows a fixed-width
//! excerpt rather than the whole chunk. The window with the most distinct
//! query terms wins; its edges are softly adjusted to word boundaries and
//! ellipses mark whichever side does not reach the content's start or end.

/// How far from a window edge the word-boundary adjustment may move.
const BOUNDARY_SLACK: usize = 24;

/// Extract the best `width`-byte window of `content` for `query`.
///
/// Content no larger than the window is returned whole. Term matching is
/// ASCII-case-insensitive; a query with no matches yields the content head.
pub fn extract_snippet(content: &str, query: &str, width: usize) -> String {
    let content = content.trim();
    if content.len() <= width || width == 0 {
        return content.to_string();
    }

    let hay = content.to_ascii_lowercase();
    let query_lower = query.to_ascii_lowercase();
    let terms: Vec<&str> = {
        let mut t: Vec<&str> = query_lower.split_whitespace().collect();
        t.sort_unstable();
        t.dedup();
        t
    };

    let start = best_window_start(content, &hay, &terms, width);
    let mut end = snap_to_char_boundary(content, (start + width).min(content.len()));

    // Soft word-boundary adjustment near each edge.
    let mut adjusted_start = start;
    if adjusted_start > 0 {
        let probe_end = (adjusted_start + BOUNDARY_SLACK).min(end);
        if let Some(pos) = content[adjusted_start..probe_end].find(char::is_whitespace) {
            adjusted_start += pos + 1;
        }
    }
    if end < content.len() {
        let probe_start = end.saturating_sub(BOUNDARY_SLACK).max(adjusted_start);
        if let Some(pos) = content[probe_start..end].rfind(char::is_whitespace) {
            end = probe_start + pos;
        }
    }

    let mut snippet = String::new();
    if adjusted_start > 0 {
        snippet.push_str("...");
    }
    snippet.push_str(content[adjusted_start..end].trim());
    if end < content.len() {
        snippet.push_str("...");
    }
    snippet
}

/// Score candidate windows by distinct-term count; earliest best window wins.
fn best_window_start(content: &str, hay: &str, terms: &[&str], width: usize) -> usize {
    let max_start = content.len() - width;
    let mut candidates = vec![0usize];

    for term in terms {
        let mut from = 0;
        while let Some(pos) = hay[from..].find(term) {
            let absolute = from + pos;
            let start = absolute.saturating_sub(width / 3).min(max_start);
            candidates.push(snap_to_char_boundary(content, start));
            from = absolute + term.len().max(1);
            if candidates.len() > 256 {
                break;
            }
        }
    }

    let mut best = (0usize, 0usize); // (score, start)
    let mut first = true;
    candidates.sort_unstable();
    candidates.dedup();

    for &start in &candidates {
        let end = snap_to_char_boundary(content, (start + width).min(content.len()));
        let window = &hay[start..end];
        let score = terms.iter().filter(|t| window.contains(*t)).count();
        if first || score > best.0 {
            best = (score, start);
            first = false;
        }
    }

    best.1
}

fn snap_to_char_boundary(content: &str, mut idx: usize) -> usize {
    while idx > 0 && !content.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_content_returned_whole() {
        let snippet = extract_snippet("tiny chunk", "anything", 240);
        assert_eq!(snippet, "tiny chunk");
        assert!(!snippet.contains("..."));
    }

    #[test]
    fn test_window_centers_on_matches() {
        let filler = "irrelevant words ".repeat(30);
        let content = format!("{}the cache invalidation rule lives here {}", filler, filler);

        let snippet = extract_snippet(&content, "cache invalidation", 80);
        assert!(snippet.contains("cache invalidation"));
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
        // The window itself is bounded; ellipses add a few bytes on top.
        assert!(snippet.len() <= 80 + 6);
    }

    #[test]
    fn test_no_match_yields_content_head() {
        let content = "alpha beta gamma ".repeat(40);
        let snippet = extract_snippet(&content, "zzz", 60);
        assert!(snippet.starts_with("alpha beta gamma"));
        assert!(snippet.ends_with("..."));
        assert!(!snippet.starts_with("..."));
    }

    #[test]
    fn test_match_at_end_gets_trailing_coverage() {
        let filler = "padding text ".repeat(40);
        let content = format!("{}needle appears last", filler);
        let snippet = extract_snippet(&content, "needle", 60);
        assert!(snippet.contains("needle"));
        assert!(snippet.starts_with("..."));
        assert!(!snippet.ends_with("..."));
    }

    #[test]
    fn test_word_boundary_adjustment() {
        let content = "word ".repeat(100);
        let snippet = extract_snippet(&content, "word", 52);
        // Every piece between the ellipses is a whole word.
        for part in snippet.trim_matches('.').split_whitespace() {
            assert_eq!(part, "word");
        }
    }

    #[test]
    fn test_multibyte_content_safe() {
        let content = "日本語のテキスト ".repeat(50);
        // Must not panic on char boundaries.
        let snippet = extract_snippet(&content, "テキスト", 40);
        assert!(!snippet.is_empty());
    }
}
