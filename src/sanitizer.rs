//! Markup cleaning before content leaves the acquirer.
//!
//! Executable, style, vector-graphic, embedded-frame, no-script and
//! `<plaintext>` elements are removed wholesale (not just their text),
//! comments are dropped, the `<body>` subtree is re-serialized and whitespace
//! runs are collapsed.
//!
//! A serialize/re-parse round trip is not a fixed point for every DOM html5ever
//! can build (misnested forms, adoption-agency leftovers), so cleaning repeats
//! until the output stops changing. Truncated output goes through the same
//! loop, which keeps `sanitize(sanitize(x)) == sanitize(x)`.

use once_cell::sync::Lazy;
use scraper::{Html, Node, Selector};

/// Elements removed together with their whole subtree.
pub const STRIPPED_ELEMENTS: &[&str] = &["script", "style", "svg", "iframe", "noscript", "plaintext"];

/// Upper bound on clean passes; real markup settles in two.
const MAX_CLEAN_PASSES: usize = 8;

static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("static selector"));

/// Clean `markup` and cap it at `max_chars` chars.
pub fn sanitize(markup: &str, max_chars: usize) -> String {
    let cleaned = clean(markup);
    if cleaned.chars().count() <= max_chars {
        return cleaned;
    }
    truncate_closed(&cleaned, max_chars)
}

/// Whitespace-normalized char count of the text a reader would see.
pub fn visible_text_len(markup: &str) -> usize {
    let document = Html::parse_document(markup);
    let Some(body) = document.select(&BODY).next() else {
        return 0;
    };

    let mut words = 0usize;
    let mut chars = 0usize;
    for node in body.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| STRIPPED_ELEMENTS.contains(&el.name()))
        });
        if hidden {
            continue;
        }
        for word in text.split_whitespace() {
            words += 1;
            chars += word.chars().count();
        }
    }

    // single spaces between words
    chars + words.saturating_sub(1)
}

fn clean(markup: &str) -> String {
    let mut current = clean_pass(markup);
    for _ in 1..MAX_CLEAN_PASSES {
        let next = clean_pass(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn clean_pass(markup: &str) -> String {
    let mut document = Html::parse_document(markup);

    let doomed: Vec<_> = document
        .tree
        .root()
        .descendants()
        .filter(|node| match node.value() {
            Node::Comment(_) => true,
            Node::Element(el) => STRIPPED_ELEMENTS.contains(&el.name()),
            _ => false,
        })
        .map(|node| node.id())
        .collect();

    for id in doomed {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }

    collapse_whitespace(&body_html(&document))
}

fn body_html(document: &Html) -> String {
    document
        .select(&BODY)
        .next()
        .map(|body| body.html())
        .unwrap_or_else(|| document.root_element().html())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut at a tag boundary, then re-clean so open elements get closed.
/// Re-closing adds a few chars, so shrink the cut until the result fits.
fn truncate_closed(cleaned: &str, max_chars: usize) -> String {
    let mut cut = max_chars;
    loop {
        let prefix = safe_prefix(cleaned, cut);
        let closed = clean(prefix);
        let len = closed.chars().count();
        if len <= max_chars {
            return closed;
        }
        if cut == 0 {
            return String::new();
        }
        cut = cut.saturating_sub(len - max_chars);
    }
}

/// First `max_chars` chars of `s`, backed off so no tag or entity is split.
fn safe_prefix(s: &str, max_chars: usize) -> &str {
    let end = s
        .char_indices()
        .nth(max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(s.len());
    let mut prefix = &s[..end];

    if let Some(lt) = prefix.rfind('<') {
        if !prefix[lt..].contains('>') {
            prefix = &prefix[..lt];
        }
    }
    if let Some(amp) = prefix.rfind('&') {
        let tail = &prefix[amp..];
        if !tail.contains(';') && !tail.contains(' ') {
            prefix = &prefix[..amp];
        }
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head><title>Shop</title><style>.x { color: red }</style></head>
  <body>
    <!-- tracking banner -->
    <script>var secret = "do not keep";</script>
    <noscript>enable javascript</noscript>
    <svg><text>vector label</text></svg>
    <iframe src="https://ads.example.com"></iframe>
    <div class="product">
       <h2>Laptop   Pro</h2>
       <p>Price:
          $999</p>
    </div>
  </body>
</html>"#;

    #[test]
    fn test_removes_non_content_elements_wholesale() {
        let out = sanitize(PAGE, 300_000);
        assert!(!out.contains("do not keep"));
        assert!(!out.contains("enable javascript"));
        assert!(!out.contains("vector label"));
        assert!(!out.contains("<iframe"));
        assert!(!out.contains("tracking banner"));
        assert!(!out.contains("color: red"));
        assert!(out.contains("Laptop Pro"));
        assert!(out.contains("Price: $999"));
        assert!(out.starts_with("<body>"));
    }

    #[test]
    fn test_collapses_whitespace() {
        let out = sanitize(PAGE, 300_000);
        assert!(!out.contains("  "));
        assert!(!out.contains('\n'));
    }

    #[test]
    fn test_is_idempotent() {
        let samples = [
            PAGE,
            "",
            "plain text only",
            "<p>unclosed <b>bold <i>italic",
            "<table> <tr><td>a</td> <td>b &amp; c</td></tr> </table>",
            "<div title=\"a\n\nb\">x<!-- c --></div><script>1</script>",
            "<p>intro</p><plaintext>abc",
            "<plaintext></body></html><p>after",
            "<form id=a><div></form><form id=b>x</form>",
            "<a href=/1><p>one<a href=/2>two</p>three",
            "<table><tr><td>cell<form>f</td>stray</table>",
            "<b><i>bi</b>i</i><p>x<li>y",
        ];
        for sample in samples {
            let once = sanitize(sample, 300_000);
            assert_eq!(sanitize(&once, 300_000), once, "sample: {sample:?}");
        }
    }

    #[test]
    fn test_plaintext_is_stripped() {
        let out = sanitize("<p>intro</p><plaintext>abc", 300_000);
        assert_eq!(out, "<body><p>intro</p></body>");
    }

    #[test]
    fn test_misnested_forms_settle() {
        let out = sanitize("<form id=a><div></form><form id=b>x</form>", 300_000);
        assert_eq!(out.matches("<form").count(), 1);
        assert!(out.contains('x'));
    }

    #[test]
    fn test_tag_soup_is_idempotent() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        const FRAGMENTS: &[&str] = &[
            "<p>", "</p>", "<div>", "</div>", "<form id=f>", "</form>", "<b>", "</b>", "<i>", "</i>",
            "<a href=\"/x\">", "</a>", "<table>", "<tr>", "<td>", "</table>", "<ul><li>", "<li>",
            "<h1>", "</h2>", "<br>", "<select><option>", "<textarea>", "<title>", "<plaintext>",
            "<script>s()</script>", "<!-- c -->", "text", " two  words ", "&amp;", "<", "\n",
        ];

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..300 {
            let len = rng.gen_range(1..16);
            let soup: String = (0..len)
                .map(|_| FRAGMENTS[rng.gen_range(0..FRAGMENTS.len())])
                .collect();
            let once = sanitize(&soup, 300_000);
            assert_eq!(sanitize(&once, 300_000), once, "soup: {soup:?}");

            let short = sanitize(&soup, 60);
            assert!(short.chars().count() <= 60, "soup: {soup:?}");
            assert_eq!(sanitize(&short, 60), short, "soup: {soup:?}");
        }
    }

    #[test]
    fn test_truncation_respects_budget_and_tags() {
        let mut page = String::from("<html><body>");
        for i in 0..200 {
            page.push_str(&format!("<div class=\"row\"><span>item number {i}</span></div>"));
        }
        page.push_str("</body></html>");

        let out = sanitize(&page, 1_000);
        assert!(out.chars().count() <= 1_000);
        assert!(out.ends_with("</body>"));
        // every opened tag was closed properly, nothing dangling
        assert_eq!(out.matches("<div").count(), out.matches("</div>").count());
        assert_eq!(sanitize(&out, 1_000), out);
    }

    #[test]
    fn test_truncation_handles_multibyte_text() {
        let page = format!("<body><p>{}</p></body>", "é".repeat(5_000));
        let out = sanitize(&page, 500);
        assert!(out.chars().count() <= 500);
        assert_eq!(sanitize(&out, 500), out);
    }

    #[test]
    fn test_tiny_budget_yields_empty() {
        assert_eq!(sanitize(PAGE, 5), "");
        assert_eq!(sanitize("", 5), "");
    }

    #[test]
    fn test_safe_prefix_backs_off_partial_tag_and_entity() {
        assert_eq!(safe_prefix("<p>abc</p><di", 13), "<p>abc</p>");
        assert_eq!(safe_prefix("<p>a &am", 8), "<p>a ");
        assert_eq!(safe_prefix("<p>a &amp; b", 12), "<p>a &amp; b");
    }

    #[test]
    fn test_visible_text_len_ignores_markup_and_scripts() {
        let markup = "<html><body><h1>Hello</h1>\n<script>var x = 1;</script><p>  big   world </p></body></html>";
        assert_eq!(visible_text_len(markup), "Hello big world".len());
        assert_eq!(visible_text_len(""), 0);
    }
}
