//! Page labels: printed pagination assigned to physical pages.
//!
//! Labeling is a left fold over physical page indices. Front matter (pages
//! before the first numbered page) gets lower-case roman numerals, pages
//! inside an illustration range get `illus.N`, everything else gets the next
//! plain number. The two counters only ever move forward, so a page's label
//! depends on every page before it; [`LabelState`] carries them explicitly.
//!
//! Each labeled page is written to the output document behind a tag:
//!
//! ```text
//! {{page|LABEL|file=FILENAME|page=N}}
//! ```
//!
//! Splitting and proofreading tools locate page boundaries by this tag, so
//! [`PageTag::render`] and [`PageTag::parse`] must stay exact inverses.

use crate::config::LabelingConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The printed identity of one page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageLabel {
    /// Front matter, e.g. `"vii"`.
    RomanNumeral(String),
    /// Plate or illustration page, rendered `illus.N`.
    Illustration(u32),
    /// Regular numbered page.
    Numbered(u32),
}

impl fmt::Display for PageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageLabel::RomanNumeral(r) => f.write_str(r),
            PageLabel::Illustration(n) => write!(f, "illus.{n}"),
            PageLabel::Numbered(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for PageLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(n) = s.strip_prefix("illus.") {
            return n
                .parse()
                .map(PageLabel::Illustration)
                .map_err(|_| format!("bad illustration label '{s}'"));
        }
        if let Ok(n) = s.parse::<u32>() {
            return Ok(PageLabel::Numbered(n));
        }
        if !s.is_empty() && s.chars().all(|c| "ivxlcdm".contains(c)) {
            return Ok(PageLabel::RomanNumeral(s.to_string()));
        }
        Err(format!("unrecognised page label '{s}'"))
    }
}

/// Lower-case roman numeral; empty for zero.
pub fn to_roman(mut num: usize) -> String {
    const TABLE: [(&str, usize); 13] = [
        ("m", 1000),
        ("cm", 900),
        ("d", 500),
        ("cd", 400),
        ("c", 100),
        ("xc", 90),
        ("l", 50),
        ("xl", 40),
        ("x", 10),
        ("ix", 9),
        ("v", 5),
        ("iv", 4),
        ("i", 1),
    ];
    let mut out = String::new();
    for (glyph, value) in TABLE {
        while num >= value {
            out.push_str(glyph);
            num -= value;
        }
    }
    out
}

/// Running counters of the labeling fold. One per document pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelState {
    next_illustration: u32,
    next_numbered: u32,
}

impl Default for LabelState {
    fn default() -> Self {
        Self {
            next_illustration: 1,
            next_numbered: 1,
        }
    }
}

impl LabelState {
    /// Label physical page `index` and advance the counters.
    ///
    /// Returns `None` for the cover page, which consumes no counter. Pages
    /// must be fed in ascending order with no gaps for the counters to match
    /// the printed book.
    pub fn advance(&mut self, index: usize, config: &LabelingConfig) -> Option<PageLabel> {
        if config.is_cover(index) {
            return None;
        }
        if index < config.first_numbered_page_index() {
            let value = index - usize::from(config.has_cover_image());
            return Some(PageLabel::RomanNumeral(to_roman(value)));
        }
        if config.is_illustration(index) {
            let label = PageLabel::Illustration(self.next_illustration);
            self.next_illustration += 1;
            return Some(label);
        }
        let label = PageLabel::Numbered(self.next_numbered);
        self.next_numbered += 1;
        Some(label)
    }
}

/// Label physical pages `1..=last_page`, omitting the cover.
pub fn assign_labels(last_page: usize, config: &LabelingConfig) -> BTreeMap<usize, PageLabel> {
    let mut state = LabelState::default();
    (1..=last_page)
        .filter_map(|index| state.advance(index, config).map(|label| (index, label)))
        .collect()
}

// ── Page tags ────────────────────────────────────────────────────────────

static RE_PAGE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{page\|([^|}]*)\|file=([^|}]*)\|page=(\d+)\}\}").unwrap()
});

/// The machine-readable anchor written before every page of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTag {
    pub label: String,
    pub file: String,
    pub page: usize,
}

impl PageTag {
    /// Characters in `file` that would end the tag early become `_`.
    pub fn new(label: &PageLabel, file: impl Into<String>, page: usize) -> Self {
        Self {
            label: label.to_string(),
            file: sanitise_file_name(file.into()),
            page,
        }
    }

    /// `{{page|LABEL|file=FILE|page=N}}`
    pub fn render(&self) -> String {
        format!("{{{{page|{}|file={}|page={}}}}}", self.label, self.file, self.page)
    }

    /// Parse the first tag found in `s`.
    pub fn parse(s: &str) -> Option<Self> {
        RE_PAGE_TAG.captures(s).and_then(|caps| {
            Some(Self {
                label: caps[1].to_string(),
                file: caps[2].to_string(),
                page: caps[3].parse().ok()?,
            })
        })
    }
}

impl fmt::Display for PageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn sanitise_file_name(file: String) -> String {
    let breaks_tag = |c: char| matches!(c, '|' | '{' | '}' | '\n');
    if file.contains(breaks_tag) {
        file.replace(breaks_tag, "_")
    } else {
        file
    }
}

/// Format one page block: tag line, text, trailing newline.
pub fn format_page_block(tag: &PageTag, text: &str) -> String {
    format!("{}\n{}\n", tag.render(), text)
}

/// One page block of an assembled document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSegment {
    pub tag: PageTag,
    /// Text after the tag up to the next tag, tag itself excluded.
    pub content: String,
}

/// Split an assembled document into its page blocks, in file order.
///
/// Text before the first tag is dropped.
pub fn split_document(text: &str) -> Vec<DocumentSegment> {
    let matches: Vec<_> = RE_PAGE_TAG.captures_iter(text).collect();
    let mut segments = Vec::with_capacity(matches.len());

    for (i, caps) in matches.iter().enumerate() {
        let whole = caps.get(0).map(|m| (m.start(), m.end()));
        let Some((_, end)) = whole else { continue };
        let next_start = matches
            .get(i + 1)
            .and_then(|c| c.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());
        let Ok(page) = caps[3].parse() else { continue };

        let content = text[end..next_start].strip_prefix('\n').unwrap_or(&text[end..next_start]);
        segments.push(DocumentSegment {
            tag: PageTag {
                label: caps[1].to_string(),
                file: caps[2].to_string(),
                page,
            },
            content: content.strip_suffix('\n').unwrap_or(content).to_string(),
        });
    }
    segments
}

/// Find the front-matter page whose opening text mentions `title`.
///
/// Only pages before the one labeled `1` are searched (all pages when there
/// is none), and only their first 200 characters, so a title quoted deep in
/// the body is not mistaken for the title page.
pub fn find_front_matter_page<'a>(title: &str, segments: &'a [DocumentSegment]) -> Option<&'a DocumentSegment> {
    let needle = title.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    let front = segments
        .iter()
        .position(|s| s.tag.label == "1")
        .map(|i| &segments[..i])
        .unwrap_or(segments);

    front.iter().find(|s| {
        let head: String = s.content.chars().take(200).collect();
        head.to_lowercase().contains(&needle)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(last: usize, config: &LabelingConfig) -> Vec<(usize, String)> {
        assign_labels(last, config)
            .into_iter()
            .map(|(i, l)| (i, l.to_string()))
            .collect()
    }

    #[test]
    fn roman_numerals() {
        assert_eq!(to_roman(0), "");
        assert_eq!(to_roman(1), "i");
        assert_eq!(to_roman(4), "iv");
        assert_eq!(to_roman(9), "ix");
        assert_eq!(to_roman(14), "xiv");
        assert_eq!(to_roman(1994), "mcmxciv");
    }

    #[test]
    fn cover_then_front_matter_then_numbers() {
        let cfg = LabelingConfig::builder()
            .has_cover_image(true)
            .first_numbered_page_index(3)
            .build()
            .unwrap();
        let got = labels(10, &cfg);
        assert_eq!(got.first(), Some(&(2, "i".to_string())));
        let numbers: Vec<_> = got[1..].iter().map(|(_, l)| l.as_str()).collect();
        assert_eq!(numbers, ["1", "2", "3", "4", "5", "6", "7", "8"]);
        assert!(!got.iter().any(|(i, _)| *i == 1), "cover must be skipped");
    }

    #[test]
    fn no_cover_front_matter_starts_at_i() {
        let cfg = LabelingConfig::builder()
            .first_numbered_page_index(4)
            .build()
            .unwrap();
        let got = labels(5, &cfg);
        let l: Vec<_> = got.iter().map(|(_, l)| l.as_str()).collect();
        assert_eq!(l, ["i", "ii", "iii", "1", "2"]);
    }

    #[test]
    fn illustrations_do_not_consume_page_numbers() {
        let cfg = LabelingConfig::builder()
            .first_numbered_page_index(1)
            .illustration_range(3, 4)
            .illustration_range(7, 7)
            .build()
            .unwrap();
        let got = labels(8, &cfg);
        let l: Vec<_> = got.iter().map(|(_, l)| l.as_str()).collect();
        assert_eq!(l, ["1", "2", "illus.1", "illus.2", "3", "4", "illus.3", "5"]);
    }

    #[test]
    fn front_matter_wins_over_illustration_range() {
        let cfg = LabelingConfig::builder()
            .first_numbered_page_index(4)
            .illustration_range(2, 5)
            .build()
            .unwrap();
        let got = labels(6, &cfg);
        let l: Vec<_> = got.iter().map(|(_, l)| l.as_str()).collect();
        assert_eq!(l, ["i", "ii", "iii", "illus.1", "illus.2", "1"]);
    }

    #[test]
    fn label_parse_round_trip() {
        for l in [
            PageLabel::RomanNumeral("xiv".into()),
            PageLabel::Illustration(3),
            PageLabel::Numbered(120),
        ] {
            assert_eq!(l.to_string().parse::<PageLabel>().unwrap(), l);
        }
        assert!("page".parse::<PageLabel>().is_err());
    }

    #[test]
    fn tag_renders_exact_format() {
        let tag = PageTag::new(&PageLabel::Numbered(12), "Book.pdf", 19);
        assert_eq!(tag.render(), "{{page|12|file=Book.pdf|page=19}}");
        assert_eq!(PageTag::parse(&tag.render()), Some(tag));
    }

    #[test]
    fn tag_file_names_cannot_break_the_tag() {
        let tag = PageTag::new(&PageLabel::Numbered(1), "Vol|2 {draft}}.pdf", 7);
        assert_eq!(tag.file, "Vol_2 _draft__.pdf");
        assert_eq!(PageTag::parse(&tag.render()), Some(tag));
    }

    #[test]
    fn split_document_recovers_blocks() {
        let a = PageTag::new(&PageLabel::RomanNumeral("i".into()), "B.pdf", 2);
        let b = PageTag::new(&PageLabel::Numbered(1), "B.pdf", 3);
        let doc = format!(
            "{}{}",
            format_page_block(&a, "The Title\nBy Someone"),
            format_page_block(&b, "Chapter One")
        );
        let segs = split_document(&doc);
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].tag, a);
        assert_eq!(segs[0].content, "The Title\nBy Someone");
        assert_eq!(segs[1].tag.page, 3);
        assert_eq!(segs[1].content, "Chapter One");
    }

    #[test]
    fn front_matter_search_stops_at_page_one() {
        let a = PageTag::new(&PageLabel::RomanNumeral("i".into()), "B.pdf", 2);
        let b = PageTag::new(&PageLabel::Numbered(1), "B.pdf", 3);
        let doc = format!(
            "{}{}",
            format_page_block(&a, "Preface"),
            format_page_block(&b, "The Lost Hope begins here")
        );
        let segs = split_document(&doc);
        assert!(find_front_matter_page("The Lost Hope", &segs).is_none());
        assert_eq!(
            find_front_matter_page("preface", &segs).map(|s| s.tag.page),
            Some(2)
        );
    }
}
