//! Plain-text flattening of CMS rich text documents and summary truncation.

use serde_json::Value as JsonValue;

const MAX_DEPTH: usize = 64;

const BLOCK_NODES: &[&str] = &[
    "paragraph",
    "heading",
    "blockquote",
    "list_item",
    "bullet_list",
    "ordered_list",
    "code_block",
];

/// Flattens a rich text tree (or a plain string) into single-spaced text.
pub fn extract_plain_text(value: &JsonValue) -> String {
    let mut out = String::new();
    match value {
        JsonValue::String(s) => out.push_str(s),
        JsonValue::Object(_) => {
            if let Some(children) = value.get("content").and_then(JsonValue::as_array) {
                for child in children {
                    walk(child, 0, &mut out);
                }
            }
        }
        _ => {}
    }
    collapse_whitespace(&out)
}

fn walk(node: &JsonValue, depth: usize, out: &mut String) {
    if depth >= MAX_DEPTH {
        return;
    }
    let node_type = node.get("type").and_then(JsonValue::as_str).unwrap_or_default();
    match node_type {
        "text" => {
            if let Some(text) = node.get("text").and_then(JsonValue::as_str) {
                out.push_str(text);
            }
        }
        "hard_break" => out.push(' '),
        _ => {
            let is_block = BLOCK_NODES.contains(&node_type);
            if is_block {
                out.push(' ');
            }
            if let Some(children) = node.get("content").and_then(JsonValue::as_array) {
                for child in children {
                    walk(child, depth + 1, out);
                }
            }
            if is_block {
                out.push(' ');
            }
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Shortens `description` to at most `max_len` characters for result cards.
///
/// Prefers ending on a full sentence in the last 30% of the window, then on a
/// word boundary in the last 20% (with an ellipsis), else cuts hard.
pub fn create_summary(description: &str, max_len: usize) -> String {
    if description.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = description.chars().collect();
    if chars.len() <= max_len {
        return description.to_string();
    }

    let window = &chars[..max_len];
    let limit = max_len as f64;

    if let Some(dot) = window.iter().rposition(|c| *c == '.') {
        if dot as f64 > limit * 0.7 {
            return window[..=dot].iter().collect();
        }
    }

    if let Some(space) = window.iter().rposition(|c| *c == ' ') {
        if space as f64 > limit * 0.8 {
            let mut summary: String = window[..space].iter().collect();
            summary.push_str("...");
            return summary;
        }
    }

    let mut summary: String = window.iter().collect();
    summary.push_str("...");
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_paragraphs_with_marks() {
        let doc = json!({
            "type": "doc",
            "content": [
                {"type": "paragraph", "content": [
                    {"type": "text", "text": "Great "},
                    {"type": "text", "text": "coffee", "marks": [{"type": "bold"}]},
                    {"type": "text", "text": "."}
                ]},
                {"type": "paragraph", "content": [{"type": "text", "text": "Fast wifi."}]}
            ]
        });
        assert_eq!(extract_plain_text(&doc), "Great coffee. Fast wifi.");
    }

    #[test]
    fn hard_breaks_and_lists_become_spaces() {
        let doc = json!({
            "type": "doc",
            "content": [
                {"type": "paragraph", "content": [
                    {"type": "text", "text": "Mon-Fri"},
                    {"type": "hard_break"},
                    {"type": "text", "text": "8-18"}
                ]},
                {"type": "bullet_list", "content": [
                    {"type": "list_item", "content": [
                        {"type": "paragraph", "content": [{"type": "text", "text": "oat milk"}]}
                    ]},
                    {"type": "list_item", "content": [
                        {"type": "paragraph", "content": [{"type": "text", "text": "cold brew"}]}
                    ]}
                ]}
            ]
        });
        assert_eq!(extract_plain_text(&doc), "Mon-Fri 8-18 oat milk cold brew");
    }

    #[test]
    fn missing_or_odd_input_yields_empty_text() {
        assert_eq!(extract_plain_text(&JsonValue::Null), "");
        assert_eq!(extract_plain_text(&json!({"type": "doc"})), "");
        assert_eq!(extract_plain_text(&json!(42)), "");
        assert_eq!(extract_plain_text(&json!("  plain   string ")), "plain string");
    }

    #[test]
    fn deeply_nested_trees_do_not_recurse_forever() {
        let mut node = json!({"type": "text", "text": "deep"});
        for _ in 0..200 {
            node = json!({"type": "blockquote", "content": [node]});
        }
        let doc = json!({"type": "doc", "content": [node]});
        assert_eq!(extract_plain_text(&doc), "");
    }

    #[test]
    fn short_descriptions_are_unchanged() {
        assert_eq!(create_summary("", 150), "");
        assert_eq!(create_summary("Tiny.", 150), "Tiny.");
        let exact = "a".repeat(150);
        assert_eq!(create_summary(&exact, 150), exact);
    }

    #[test]
    fn cuts_at_late_sentence_boundary() {
        // Sentence ends at index 119 (> 105), so the summary keeps that sentence.
        let text = format!("{}. {}", "a".repeat(119), "b".repeat(60));
        let summary = create_summary(&text, 150);
        assert_eq!(summary, format!("{}.", "a".repeat(119)));
    }

    #[test]
    fn early_sentence_falls_back_to_word_boundary() {
        // Dot at index 10 is too early; last space at 130 (> 120) wins.
        let text = format!("{}. {} {}", "a".repeat(10), "b".repeat(118), "c".repeat(40));
        let summary = create_summary(&text, 150);
        assert_eq!(summary, format!("{}. {}...", "a".repeat(10), "b".repeat(118)));
    }

    #[test]
    fn no_boundary_means_hard_cut() {
        let text = "x".repeat(200);
        let summary = create_summary(&text, 150);
        assert_eq!(summary.chars().count(), 153);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "é".repeat(160);
        let summary = create_summary(&text, 150);
        assert_eq!(summary, format!("{}...", "é".repeat(150)));
    }
}
