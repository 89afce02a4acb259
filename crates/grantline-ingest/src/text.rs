//! Text utilities: HTML flattening, whitespace collapse, list cleanup and
//! fold-insensitive merging.

use scraper::Html;

/// Collapse runs of whitespace into single spaces and trim.
pub fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut a string to at most `max_len` characters, appending an ellipsis when
/// truncated.
pub fn truncate_text(text: &str, max_len: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= max_len {
        return text.to_string();
    }
    if max_len > 3 {
        let cut: String = text.chars().take(max_len - 3).collect();
        return cut + "...";
    }
    text.chars().take(max_len).collect()
}

/// Convert HTML to plain text by walking the DOM, collapsing whitespace.
pub fn html_to_text(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    let doc = Html::parse_fragment(html);
    let text: String = doc
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ");
    clean_text(&text)
}

/// Append a value to a list unless an equal (case-insensitive) entry exists.
pub fn append_unique(mut list: Vec<String>, v: &str) -> Vec<String> {
    let v_clean = v.trim();
    if v_clean.is_empty() {
        return list;
    }
    let v_lower = v_clean.to_lowercase();
    if list.iter().any(|existing| existing.to_lowercase() == v_lower) {
        return list;
    }
    list.push(v_clean.to_string());
    list
}

/// Split a text block into cleaned list entries: one per line, leading
/// bullets and numeric enumerators stripped, case-insensitive deduplicated.
pub fn split_and_clean_list(block: &str) -> Vec<String> {
    let normalized = block.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = Vec::new();
    for raw in normalized.split('\n') {
        let mut s = raw.trim();
        if s.is_empty() {
            continue;
        }

        s = s.trim_start_matches([' ', '\t', '-', '*', '•', '–', '—']);
        let s = strip_leading_numbering(s.trim());
        let s = clean_text(&s);
        if s.is_empty() {
            continue;
        }

        out.push(s);
    }

    merge_unique_fold(Vec::new(), out)
}

/// Strip a leading numeric enumerator ("1.", "2)", "3 -") from a list entry.
pub fn strip_leading_numbering(s: &str) -> String {
    let s = s.trim();
    if s.is_empty() {
        return s.to_string();
    }

    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == 0 || i >= bytes.len() {
        return s.to_string();
    }

    while i < bytes.len() {
        match bytes[i] {
            b'.' | b')' | b'-' | b':' | b' ' | b'\t' => i += 1,
            _ => return s[i..].trim().to_string(),
        }
    }

    s[i..].trim().to_string()
}

/// Merge `items` into `dst`, skipping entries already present when compared
/// case-insensitively. Preserves first-seen casing and order.
pub fn merge_unique_fold(mut dst: Vec<String>, items: Vec<String>) -> Vec<String> {
    let mut seen: std::collections::HashSet<String> = dst
        .iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();

    for v in items {
        let v = v.trim().to_string();
        if v.is_empty() {
            continue;
        }
        let k = v.to_lowercase();
        if seen.contains(&k) {
            continue;
        }
        dst.push(v);
        seen.insert(k);
    }

    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  a \n\t b   c "), "a b c");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_text("áéíóú", 10), "áéíóú");
        let cut = truncate_text("convocatoria pública de innovación", 20);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), 20);
    }

    #[test]
    fn html_to_text_flattens_markup() {
        let html = "<div><p>Deadline: <b>18 June</b></p><p>Apply now</p></div>";
        assert_eq!(html_to_text(html), "Deadline: 18 June Apply now");
    }

    #[test]
    fn append_unique_is_case_insensitive() {
        let list = vec!["Research".to_string()];
        let list = append_unique(list, "research");
        assert_eq!(list.len(), 1);
        let list = append_unique(list, " Innovation ");
        assert_eq!(list, vec!["Research", "Innovation"]);
    }

    #[test]
    fn split_and_clean_list_strips_bullets_and_numbers() {
        let block = "- First item\n2. Second item\n• third ITEM\nsecond item\n";
        let out = split_and_clean_list(block);
        assert_eq!(out, vec!["First item", "Second item", "third ITEM"]);
    }

    #[test]
    fn strip_leading_numbering_variants() {
        assert_eq!(strip_leading_numbering("1. Universities"), "Universities");
        assert_eq!(strip_leading_numbering("12) NGOs"), "NGOs");
        assert_eq!(strip_leading_numbering("3 - Startups"), "Startups");
        assert_eq!(strip_leading_numbering("No numbering"), "No numbering");
        assert_eq!(strip_leading_numbering("2026"), "2026");
    }

    #[test]
    fn merge_unique_fold_preserves_first_seen_casing() {
        let dst = vec!["Health".to_string()];
        let merged = merge_unique_fold(dst, vec!["HEALTH".into(), "Climate".into(), "".into()]);
        assert_eq!(merged, vec!["Health", "Climate"]);
    }
}
