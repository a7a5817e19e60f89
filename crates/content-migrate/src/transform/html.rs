//! HTML cleanup for legacy markup.

use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;

static SCRIPT_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("valid regex"));
static STYLE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").expect("valid regex"));
static BOLD_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<(/?)b(\s[^>]*)?>").expect("valid regex"));
static ITALIC_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<(/?)i(\s[^>]*)?>").expect("valid regex"));
static REPEATED_BR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(<br\s*/?>\s*){2,}").expect("valid regex"));
static EMPTY_PARAGRAPH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<p\b[^>]*>(\s|&nbsp;|&#160;|<br\s*/?>)*</p\s*>").expect("valid regex")
});
static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t\r]*(\n[ \t\r]*)+").expect("valid regex"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Remove `<script>` and `<style>` blocks including their contents.
pub fn strip_unsafe_blocks(html: &str) -> String {
    let without_scripts = SCRIPT_BLOCK_RE.replace_all(html, "");
    STYLE_BLOCK_RE.replace_all(&without_scripts, "").into_owned()
}

/// Plain text of an HTML fragment: tags dropped, entities decoded, whitespace collapsed.
pub fn strip_tags(html: &str) -> String {
    let safe = strip_unsafe_blocks(html);
    if !safe.contains('<') && !safe.contains('&') {
        return collapse_whitespace(&safe);
    }
    let fragment = Html::parse_fragment(&safe);
    let text: String = fragment.root_element().text().collect();
    collapse_whitespace(&text)
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

/// Clean a legacy body for the new editor.
///
/// Drops script/style blocks, rewrites legacy asset paths in `src`/`href`
/// attributes to `media_prefix`, upgrades `<b>`/`<i>` to `<strong>`/`<em>`,
/// collapses repeated line breaks and removes empty paragraphs.
pub fn clean_body(html: &str, legacy_asset_prefixes: &[String], media_prefix: &str) -> String {
    let mut body = strip_unsafe_blocks(html);

    for prefix in legacy_asset_prefixes.iter().filter(|p| !p.is_empty()) {
        let pattern = format!(r#"(?i)\b(src|href)=(["']){}"#, regex::escape(prefix));
        if let Ok(re) = Regex::new(&pattern) {
            let replacement = format!("${{1}}=${{2}}{}", media_prefix.replace('$', "$$"));
            body = re.replace_all(&body, replacement.as_str()).into_owned();
        }
    }

    body = BOLD_TAG_RE.replace_all(&body, "<${1}strong${2}>").into_owned();
    body = ITALIC_TAG_RE.replace_all(&body, "<${1}em${2}>").into_owned();
    body = REPEATED_BR_RE.replace_all(&body, "<br>").into_owned();
    body = EMPTY_PARAGRAPH_RE.replace_all(&body, "").into_owned();
    body = BLANK_LINES_RE.replace_all(&body, "\n").into_owned();

    body.trim().to_string()
}

/// URL-safe slug: lowercase ASCII alphanumerics separated by single hyphens.
pub fn slugify(text: &str) -> String {
    let slug: String = text
        .to_lowercase()
        .chars()
        .map(fold_accent)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();

    // Collapse consecutive hyphens.
    let mut result = String::with_capacity(slug.len());
    let mut prev_hyphen = false;
    for c in slug.chars() {
        if c == '-' {
            if !prev_hyphen {
                result.push('-');
            }
            prev_hyphen = true;
        } else {
            result.push(c);
            prev_hyphen = false;
        }
    }

    result.trim_matches('-').to_string()
}

/// Map common Latin accented letters to their ASCII base.
fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

/// Truncate to at most `max` characters on a char boundary, trimming trailing space.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_tags_decodes_entities() {
        assert_eq!(
            strip_tags("<h1>Tom &amp; Jerry</h1>\n<p>  go&nbsp;home </p>"),
            "Tom & Jerry go home"
        );
        assert_eq!(strip_tags("plain   text"), "plain text");
    }

    #[test]
    fn test_strip_tags_drops_script_contents() {
        assert_eq!(
            strip_tags("Hi<script>alert('x')</script><style>p{}</style> there"),
            "Hi there"
        );
    }

    #[test]
    fn test_clean_body() {
        let html = "<p><b>Bold</b> and <i class=\"x\">it</i></p>\
                    <p>&nbsp;</p>\
                    <img src=\"/uploads/cat.jpg\">\
                    line<br><br/><br>next\
                    <script>evil()</script>";
        let cleaned = clean_body(html, &["/uploads/".to_string()], "/media/legacy/");
        assert_eq!(
            cleaned,
            "<p><strong>Bold</strong> and <em class=\"x\">it</em></p>\
             <img src=\"/media/legacy/cat.jpg\">\
             line<br>next"
        );
    }

    #[test]
    fn test_clean_body_leaves_other_tags() {
        let cleaned = clean_body("<blockquote>q</blockquote>\n\n\n<br>", &[], "/m/");
        assert_eq!(cleaned, "<blockquote>q</blockquote>\n<br>");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  --Café  Crème-- "), "cafe-creme");
        assert_eq!(slugify("日本語"), "");
        assert_eq!(slugify("2024 Review: Part 1"), "2024-review-part-1");
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("ab cd", 3), "ab");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
