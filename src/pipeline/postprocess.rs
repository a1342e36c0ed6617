//! Post-processing: deterministic cleanup of transcribed page text.
//!
//! Even well-prompted models occasionally introduce artefacts that are
//! harmless to them but break wiki import:
//!
//! - Wrapping output in ` ```wikitext ... ``` ` fences despite the prompt
//! - Windows-style `\r\n` line endings and zero-width characters
//! - Typographic apostrophes the archive spells as a plain `'`
//! - A bare printed page number left at the top or bottom of the page
//!
//! OCR text additionally carries line-end hyphenation from the printed
//! column width, repaired by [`repair_hyphenation`].
//!
//! ## Rule Order
//!
//! Fences are stripped before line endings are normalised so the fence regex
//! sees a clean first line; invisible characters are removed before the page
//! number rule so a zero-width space cannot hide a bare number.

use once_cell::sync::Lazy;
use regex::Regex;

/// Marker a model emits for a page with no text.
pub const BLANK_MARKER: &str = "--BLANK--";

/// Apply all cleanup rules to a raw engine response.
///
/// Rules (applied in order):
/// 1. Strip outer code fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, form feeds)
/// 4. Trim trailing whitespace per line
/// 5. Collapse 3+ consecutive blank lines down to 2
/// 6. Normalise apostrophe glyphs
/// 7. Drop a bare page number on the first or last line
/// 8. Repair line-end hyphenation
///
/// A response that is only the blank marker comes back as exactly
/// [`BLANK_MARKER`].
pub fn clean_transcription(input: &str) -> String {
    let s = strip_code_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    if is_blank_marker(&s) {
        return BLANK_MARKER.to_string();
    }
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = normalise_apostrophes(&s);
    let s = strip_bare_page_numbers(&s);
    repair_hyphenation(s.trim_matches('\n'))
}

/// True when the text is the blank-page marker and nothing else.
pub fn is_blank_marker(text: &str) -> bool {
    text.trim() == BLANK_MARKER
}

// ── Rule 1: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:wikitext|mediawiki|wiki|text|markdown)?[ \t]*\r?\n(.*?)\r?\n```\s*$").unwrap()
});

fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove invisible characters ──────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{000C}'],
        "",
    )
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 6: Normalise apostrophes ────────────────────────────────────────────

/// Replace typographic apostrophes and modifier letters with `'`.
///
/// Wiki emphasis uses `''`, so a closing curly quote followed by a straight
/// one would otherwise render as italics; the archive spells all of these
/// as a plain apostrophe.
pub fn normalise_apostrophes(input: &str) -> String {
    input.replace(['\u{2019}', '\u{2018}', '\u{02BC}', '\u{02BB}', '\u{00B4}', '\u{0060}'], "'")
}

// ── Rule 7: Bare page numbers ────────────────────────────────────────────────

fn is_bare_page_number(line: &str) -> bool {
    let t = line.trim().trim_matches(|c: char| c == '-' || c == '—' || c == ' ');
    !t.is_empty() && t.len() <= 4 && t.chars().all(|c| c.is_ascii_digit())
}

fn strip_bare_page_numbers(input: &str) -> String {
    let mut lines: Vec<&str> = input.lines().collect();
    if let Some(first) = lines.iter().position(|l| !l.trim().is_empty()) {
        if is_bare_page_number(lines[first]) {
            lines.remove(first);
        }
    }
    if let Some(last) = lines.iter().rposition(|l| !l.trim().is_empty()) {
        if is_bare_page_number(lines[last]) {
            lines.remove(last);
        }
    }
    lines.join("\n")
}

// ── Rule 8: Hyphenation repair ───────────────────────────────────────────────

/// Rejoin words split across lines by a trailing hyphen.
///
/// For `word-⏎next` where the hyphen follows a word character:
/// - lower-case continuation → hyphen and line break removed (`inter-⏎national`
///   → `international`);
/// - upper-case continuation → hyphen kept, line break removed
///   (`Anglo-⏎Saxon` → `Anglo-Saxon`).
///
/// Spaces or tabs around the line break are absorbed. Any other continuation
/// (digit, punctuation, blank line, end of text) is left untouched. The
/// preceding character is checked against the already-repaired output, so a
/// chain like `a-⏎b-⏎c` is fully joined in one pass and a second pass is a
/// no-op.
pub fn repair_hyphenation(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '-' && out.chars().next_back().is_some_and(is_word_char) {
            if let Some((next, resume)) = continuation_after_break(&chars, i + 1) {
                if next.is_lowercase() {
                    i = resume;
                    continue;
                }
                if next.is_uppercase() {
                    out.push('-');
                    i = resume;
                    continue;
                }
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// From `start`, skip `[ \t]* \n [ \t]*` and return the next char and its index.
fn continuation_after_break(chars: &[char], start: usize) -> Option<(char, usize)> {
    let mut j = start;
    while j < chars.len() && matches!(chars[j], ' ' | '\t') {
        j += 1;
    }
    if chars.get(j) != Some(&'\n') {
        return None;
    }
    j += 1;
    while j < chars.len() && matches!(chars[j], ' ' | '\t') {
        j += 1;
    }
    chars.get(j).map(|&c| (c, j))
}

// ── Page seams ───────────────────────────────────────────────────────────────

static RE_SEAM_HYPHEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Za-z]+)-[ \t]*\n\s*(\{\{page\|[^}]+\}\})[ \t]*\n\s*([a-z]+)").unwrap()
});

static RE_SEAM_NEWLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\{\{page\|[^}]+\}\})\n([^{|!=*#\n])").unwrap());

/// Repair text flow across page tags in an assembled document.
///
/// 1. A word hyphenated across a page boundary is joined and the tag moved
///    in front of it: `partici-⏎{{page|…}}⏎pating` → `{{page|…}}participating`.
/// 2. The line break after a tag is dropped when the next line is running
///    text, so paragraphs continue across pages. Tables (`{|`, `|`, `!`),
///    headings (`=`) and lists (`*`, `#`) keep their line break.
pub fn repair_page_seams(document: &str) -> String {
    let s = RE_SEAM_HYPHEN.replace_all(document, "$2$1$3");
    RE_SEAM_NEWLINE.replace_all(&s, "$1$2").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyphen_removed_before_lowercase() {
        assert_eq!(repair_hyphenation("inter-\nnational"), "international");
    }

    #[test]
    fn hyphen_kept_before_uppercase() {
        assert_eq!(repair_hyphenation("Anglo-\nSaxon"), "Anglo-Saxon");
    }

    #[test]
    fn hyphen_with_surrounding_spaces() {
        assert_eq!(repair_hyphenation("some-  \n   thing"), "something");
    }

    #[test]
    fn hyphen_chain_joins_in_one_pass() {
        let once = repair_hyphenation("a-\nb-\nc");
        assert_eq!(once, "abc");
        assert_eq!(repair_hyphenation(&once), once);
    }

    #[test]
    fn hyphen_untouched_cases() {
        // Digit continuation, blank line, dash not attached to a word, end of text.
        for s in ["page 12-\n14", "word-\n\nnext", "a --\nword", "trailing-", "x - \ny"] {
            assert_eq!(repair_hyphenation(s), s, "input {s:?}");
        }
    }

    #[test]
    fn hyphen_non_ascii_letters() {
        assert_eq!(repair_hyphenation("Bahá-\n'í"), "Bahá-\n'í");
        assert_eq!(repair_hyphenation("Über-\nsetzung"), "Übersetzung");
    }

    #[test]
    fn clean_strips_fences_and_normalises() {
        let input = "```wikitext\r\nFirst line   \r\n\r\n\r\n\r\n\r\nIt\u{2019}s here\u{200B}\r\n```";
        let out = clean_transcription(input);
        assert_eq!(out, "First line\n\n\nIt's here");
    }

    #[test]
    fn clean_keeps_blank_marker() {
        assert_eq!(clean_transcription("```\n--BLANK--\n```"), BLANK_MARKER);
        assert_eq!(clean_transcription("  --BLANK--\n"), BLANK_MARKER);
    }

    #[test]
    fn clean_drops_bare_page_numbers() {
        assert_eq!(clean_transcription("42\nBody text\n- 43 -"), "Body text");
        assert_eq!(clean_transcription("In 1844 the\nstory"), "In 1844 the\nstory");
    }

    #[test]
    fn clean_repairs_hyphenation() {
        assert_eq!(clean_transcription("a pro-\nclamation"), "a proclamation");
    }

    #[test]
    fn seam_hyphen_moves_tag() {
        let doc = "partici-\n{{page|2|file=B.pdf|page=5}}\npating in it";
        assert_eq!(
            repair_page_seams(doc),
            "{{page|2|file=B.pdf|page=5}}participating in it"
        );
    }

    #[test]
    fn seam_keeps_structural_lines() {
        let doc = "{{page|1|file=B.pdf|page=3}}\n== Heading ==\n{{page|2|file=B.pdf|page=4}}\nprose";
        assert_eq!(
            repair_page_seams(doc),
            "{{page|1|file=B.pdf|page=3}}\n== Heading ==\n{{page|2|file=B.pdf|page=4}}prose"
        );
    }
}
