//! Thread → chat attachments.
//!
//! Everything here is pure: the same thread and author table always yield
//! the same segments, so a re-delivered event re-renders identically.

use std::collections::{HashMap, HashSet};

use crate::html;
use crate::models::{Author, AuthorId, MessageSegment, Revision, Thread};

pub const STUDENT_COLOR: &str = "#8dc63f";
pub const INSTRUCTOR_COLOR: &str = "#faae40";

/// Leading tokens an excerpt always keeps.
const EXCERPT_TOKENS: usize = 30;
/// Largest remainder (in words) kept verbatim instead of elided.
const ELISION_THRESHOLD: usize = 10;

static UNKNOWN: Author = Author::Unknown;

/// Tenant values the renderer needs to build thread links.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub forum_url: &'a str,
    pub nid: &'a str,
}

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Every whitespace run that contains a newline shrinks to one `\n`;
/// whitespace after the run's last newline stays.
fn collapse_blank_lines(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if !chars[i].is_whitespace() {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        let run = &chars[start..i];
        match run.iter().rposition(|&c| c == '\n') {
            Some(last) => {
                out.push('\n');
                out.extend(&run[last + 1..]);
            }
            None => out.extend(run),
        }
    }
    out
}

/// Number of words ending in `text`: a word character followed by a
/// non-word character or the end of the text.
fn count_word_ends(text: &[char]) -> usize {
    text.iter()
        .enumerate()
        .filter(|&(i, &c)| is_word(c) && text.get(i + 1).map_or(true, |&n| !is_word(n)))
        .count()
}

/// Plain-text excerpt of an HTML body.
///
/// Keeps any leading punctuation plus up to 30 `word+ non-word+` tokens.
/// If the discarded remainder holds more than 10 words it is replaced by
/// ` _...N words..._`, otherwise it is kept as is.
pub fn excerpt(html: &str) -> String {
    let text = collapse_blank_lines(&html::to_plain_text(html));
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();

    let mut cut = chars.iter().position(|&c| is_word(c)).unwrap_or(n);
    for _ in 0..EXCERPT_TOKENS {
        let word_end = cut + chars[cut..].iter().take_while(|&&c| is_word(c)).count();
        if word_end == cut {
            break;
        }
        let gap_end = word_end + chars[word_end..].iter().take_while(|&&c| !is_word(c)).count();
        if gap_end == word_end {
            break;
        }
        cut = gap_end;
    }

    let mut out: String = chars[..cut].iter().collect();
    let rest = &chars[cut..];
    let more = count_word_ends(rest);
    if more > ELISION_THRESHOLD {
        out.push_str(&format!(" _...{more} words..._"));
    } else {
        out.extend(rest);
    }
    out
}

/// Escape the three characters the chat markup treats as control characters.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Contributors in chronological order → each contributor once, most
/// recent first.
pub fn contributors<'a, I>(chronological: I) -> Vec<&'a AuthorId>
where
    I: IntoIterator<Item = &'a AuthorId>,
    I::IntoIter: DoubleEndedIterator,
{
    let mut seen = HashSet::new();
    chronological.into_iter().rev().filter(|id| seen.insert(*id)).collect()
}

fn lookup<'a>(authors: &'a HashMap<AuthorId, Author>, id: &AuthorId) -> &'a Author {
    authors.get(id).unwrap_or(&UNKNOWN)
}

fn plain_name(author: &Author) -> &str {
    match author {
        Author::Known { display, .. } => display.as_str(),
        Author::Unknown => "unknown",
    }
}

fn markup_name(author: &Author) -> String {
    match author {
        Author::Known { display, link: Some(link), .. } => format!("<{link}|{display}>"),
        Author::Known { display, link: None, .. } => escape(display),
        Author::Unknown => "_unknown_".to_string(),
    }
}

/// Comma-joined author list in both fallback and markup flavours.
struct Byline {
    plain: String,
    markup: String,
}

impl Byline {
    fn new<'a, I>(chronological: I, authors: &HashMap<AuthorId, Author>) -> Self
    where
        I: IntoIterator<Item = &'a AuthorId>,
        I::IntoIter: DoubleEndedIterator,
    {
        let resolved: Vec<&Author> = contributors(chronological).into_iter().map(|id| lookup(authors, id)).collect();
        Byline {
            plain: resolved.iter().map(|a| plain_name(a)).collect::<Vec<_>>().join(", "),
            markup: resolved.iter().map(|a| markup_name(a)).collect::<Vec<_>>().join(", "),
        }
    }
}

fn answer_segment(
    label: &str,
    color: &str,
    history: &[Revision],
    authors: &HashMap<AuthorId, Author>,
) -> Option<MessageSegment> {
    let latest = history.first()?;
    let text = excerpt(&latest.content);
    let by = Byline::new(history.iter().rev().map(|r| &r.uid), authors);
    Some(MessageSegment {
        fallback: format!("{label} ({}): {text}", by.plain),
        pretext: Some(format!("{label} ({})", by.markup)),
        color: Some(color.to_string()),
        text: escape(&text),
    })
}

/// Render a thread into its ordered attachment list: root, student answer,
/// instructor answer, then every followup directly followed by its replies.
pub fn render(thread: &Thread, authors: &HashMap<AuthorId, Author>, ctx: &RenderContext<'_>) -> Vec<MessageSegment> {
    let mut segments = Vec::new();

    if let Some(latest) = thread.root.first() {
        let title = excerpt(&latest.subject);
        let text = excerpt(&latest.content);
        let by = Byline::new(thread.root.iter().rev().map(|r| &r.uid), authors);
        let nr = thread.number;
        let url = format!("{}/class/{}?cid={}", ctx.forum_url.trim_end_matches('/'), ctx.nid, nr);
        let (plain_flag, markup_flag) = if thread.private { ("[private] ", "ᵖʳⁱᵛᵃᵗᵉ ") } else { ("", "") };
        let color = if lookup(authors, &latest.uid).is_student() { STUDENT_COLOR } else { INSTRUCTOR_COLOR };
        segments.push(MessageSegment {
            fallback: format!("@{nr}: {title} {plain_flag}({})\n{text}", by.plain),
            pretext: Some(format!("*<{url}|@{nr}: {}>* {markup_flag}({})", escape(&title), by.markup)),
            color: Some(color.to_string()),
            text: escape(&text),
        });
    }

    if let Some(history) = &thread.student_answer {
        segments.extend(answer_segment("Student Answer", STUDENT_COLOR, history, authors));
    }
    if let Some(history) = &thread.instructor_answer {
        segments.extend(answer_segment("Instructor Answer", INSTRUCTOR_COLOR, history, authors));
    }

    for followup in &thread.followups {
        let text = excerpt(&followup.subject);
        let chronological: Vec<&AuthorId> =
            std::iter::once(&followup.author).chain(followup.replies.iter().map(|r| &r.author)).collect();
        let by = Byline::new(chronological, authors);
        segments.push(MessageSegment {
            fallback: format!("Discussion ({}): {text}", by.plain),
            pretext: Some(format!("Discussion ({})", by.markup)),
            color: None,
            text: escape(&text),
        });
        for reply in &followup.replies {
            let text = excerpt(&reply.subject);
            segments.push(MessageSegment { text: escape(&text), fallback: text, pretext: None, color: None });
        }
    }

    segments
}
