/// Cleanup of specification prose.
///
/// Guideline content arrives as HTML fragments (`<p>`, `<a href>`, `<code>`, entities).
/// [`clean_text`] turns it into a single line of plain prose suitable both for display
/// and for lexical comparison.
use std::sync::LazyLock;

use regex::Regex;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static SPACE_BEFORE_PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" +([.,;:!?)\]}])").expect("valid regex"));

/// Strip markup and entities and normalize spacing.
///
/// Never fails; empty input yields an empty string. Decoding can reveal markup that was
/// escaped in the source (`&lt;b&gt;`), so the pass repeats until the text is stable,
/// which makes the function idempotent. Escaped element names are therefore dropped
/// along with real tags.
pub fn clean_text(raw: &str) -> String {
    let mut current = clean_pass(raw);
    loop {
        let next = clean_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn clean_pass(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let without_tags = TAG_RE.replace_all(text, " ");
    let decoded = html_escape::decode_html_entities(&without_tags);
    let collapsed = decoded.split_whitespace().collect::<Vec<_>>().join(" ");
    SPACE_BEFORE_PUNCT_RE
        .replace_all(&collapsed, "$1")
        .trim()
        .to_string()
}
