//! Instructions sent to the vision and text models.
//!
//! Every prompt lives here so a wording change never touches retry or
//! fallback logic, and so tests can assert on the rules a prompt carries.
//!
//! Three prompts cover the three model calls the pipeline makes:
//!
//! | Prompt | Call | Input |
//! |--------|------|-------|
//! | [`TRANSCRIBE_PAGE_PROMPT`] | primary engine | page image |
//! | [`PAGE_NUMBER_PROMPT`] | calibration probe | page image |
//! | [`REFORMAT_OCR_PROMPT`] | secondary reformat pass | raw OCR text |

/// System prompt for transcribing one scanned book page into wiki markup.
pub const TRANSCRIBE_PAGE_PROMPT: &str = r#"You are transcribing one scanned page of a printed book for a wiki archive.

Follow these rules precisely:

1. TEXT
   - Transcribe ALL body text exactly as printed, in reading order
   - Preserve paragraph breaks: one blank line between paragraphs
   - Join lines within a paragraph; do not keep the printed line breaks
   - Do not correct spelling, modernise wording, or translate

2. ORTHOGRAPHY
   - Write every apostrophe and single closing quote as a plain ' character
   - Keep diacritics exactly as printed

3. UNREADABLE TEXT
   - Replace a word you cannot read with [unreadable]
   - Never guess at a damaged word

4. MARKUP (MediaWiki)
   - Headings: == Heading == and === Subheading ===
   - Italics: ''text''   Bold: '''text'''
   - Tables: {| class="wikitable" ... |} syntax
   - Footnotes: <ref>footnote text</ref> at the point of the reference mark

5. WHAT TO IGNORE
   - The printed page number
   - Running headers and footers repeated on every page

6. EMPTY PAGES
   - If the page carries no text at all, output exactly: --BLANK--

7. OUTPUT FORMAT
   - Output ONLY the transcription
   - Do NOT wrap it in code fences
   - Do NOT add commentary"#;

/// Prompt for reading the printed page number during calibration.
pub const PAGE_NUMBER_PROMPT: &str =
    "Return ONLY the integer value of the printed page number in the header/footer. If none, return 'NONE'.";

/// System prompt for turning raw OCR output into the archive's markup.
pub const REFORMAT_OCR_PROMPT: &str = r#"You are cleaning raw OCR output of one printed book page for a wiki archive.

Rewrite the text below following these rules:

1. Keep every word of the body text; do not summarise, reword or translate.
2. Rejoin lines within a paragraph; keep one blank line between paragraphs.
3. Rejoin words split across lines by a hyphen, unless the hyphen is part
   of a compound word.
4. Remove running headers, footers and printed page numbers.
5. Write every apostrophe as a plain ' character.
6. Use MediaWiki markup: == Heading ==, ''italics'', '''bold''',
   {| class="wikitable" |} tables.
7. Output ONLY the cleaned text, with no code fences and no commentary."#;

/// Wrap raw OCR text as the user turn of the reformat call.
pub fn reformat_request(raw_ocr: &str) -> String {
    format!("Raw OCR text:\n\"\"\"\n{}\n\"\"\"", raw_ocr.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::postprocess::BLANK_MARKER;

    #[test]
    fn transcribe_prompt_names_blank_marker() {
        assert!(TRANSCRIBE_PAGE_PROMPT.contains(BLANK_MARKER));
    }

    #[test]
    fn page_number_prompt_allows_none() {
        assert!(PAGE_NUMBER_PROMPT.contains("NONE"));
    }

    #[test]
    fn reformat_request_embeds_text() {
        let req = reformat_request("  line one\nline two \n");
        assert!(req.contains("line one\nline two"));
        assert!(req.starts_with("Raw OCR text:"));
    }
}
