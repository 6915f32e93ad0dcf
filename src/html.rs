//! HTML → plain text conversion for forum post bodies.

use scraper::{ElementRef, Html, Node};

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "blockquote", "tr", "table",
];
const SKIPPED_TAGS: &[&str] = &["script", "style", "head", "template"];

/// Parse `html` as a fragment and collect its text. Line breaks and block
/// boundaries become newlines, entities come back decoded, and the result
/// is trimmed.
pub fn to_plain_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len());
    walk(fragment.root_element(), &mut out);
    out.replace('\u{a0}', " ").trim().to_string()
}

fn walk(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if name == "br" {
                    out.push('\n');
                    continue;
                }
                if SKIPPED_TAGS.contains(&name) {
                    continue;
                }
                let Some(inner) = ElementRef::wrap(child) else { continue };
                let block = BLOCK_TAGS.contains(&name);
                if block {
                    out.push('\n');
                }
                walk(inner, out);
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_become_lines() {
        assert_eq!(to_plain_text("<p>Hi</p>"), "Hi");
        assert_eq!(to_plain_text("<p>one</p><p>two<br/>three</p>"), "one\n\ntwo\nthree");
    }

    #[test]
    fn inline_tags_are_dropped() {
        assert_eq!(to_plain_text("see <b>this</b> <a href=\"x\">link</a>"), "see this link");
        assert_eq!(to_plain_text("<a title=\"a > b\">link</a> here"), "link here");
    }

    #[test]
    fn script_and_style_bodies_are_dropped() {
        assert_eq!(to_plain_text("<style>p { color: red }</style>ok<script>alert(1)</script>"), "ok");
    }

    #[test]
    fn named_entities_decode() {
        assert_eq!(
            to_plain_text("It&rsquo;s due Friday&hellip; see &ldquo;ps1&rdquo; &mdash; caf&eacute;"),
            "It\u{2019}s due Friday\u{2026} see \u{201c}ps1\u{201d} \u{2014} caf\u{e9}"
        );
        assert_eq!(to_plain_text("a&nbsp;b"), "a b");
    }

    #[test]
    fn entities_decode_once() {
        assert_eq!(to_plain_text("a &amp;lt; b &#65;&#x42;"), "a &lt; b AB");
    }
}
