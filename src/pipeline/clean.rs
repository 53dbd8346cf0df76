//! Text normalisation for acquired document text.
//!
//! Both acquisition strategies leave artefacts that confuse the table and
//! entity stages: pdfium emits `\r\n` and stray zero-width characters,
//! and VLM transcripts sometimes arrive wrapped in a ```` ```markdown ````
//! fence despite the prompt. These passes are pure `&str → String`
//! functions applied in a fixed order.
//!
//! ## Rule Order
//!
//! Fences are stripped before line endings are normalised so the fence
//! regex only has to match `\n`; blank-line collapsing runs after trailing
//! whitespace is trimmed so whitespace-only lines count as blank.

use once_cell::sync::Lazy;
use regex::Regex;

/// Normalise text from the document's own text layer.
///
/// 1. CRLF / CR → LF
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Trim trailing whitespace per line
/// 4. Collapse runs of 3+ blank lines down to 2
/// 5. Trim leading/trailing blank lines
pub fn normalise_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim_matches('\n').to_string()
}

/// Normalise a page transcript produced by a vision model.
///
/// Same as [`normalise_text`], after removing an outer Markdown fence.
pub fn clean_transcript(input: &str) -> String {
    normalise_text(&strip_outer_fence(input.trim()))
}

static RE_OUTER_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:markdown|md|text)?\r?\n(.*)\r?\n```\s*$")
        .expect("fence regex is valid")
});

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{4,}").expect("blank-run regex is valid"));

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUNS.replace_all(input, "\n\n\n").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_becomes_lf() {
        assert_eq!(normalise_text("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn invisible_chars_removed() {
        assert_eq!(normalise_text("\u{FEFF}Total\u{200B} 12"), "Total 12");
    }

    #[test]
    fn blank_runs_collapsed() {
        let out = normalise_text("a\n\n\n\n\n\nb");
        assert_eq!(out, "a\n\n\nb");
    }

    #[test]
    fn trailing_spaces_trimmed_but_inner_alignment_kept() {
        let out = normalise_text("Revenue    1,200    900   \nCosts      400      300");
        assert_eq!(out, "Revenue    1,200    900\nCosts      400      300");
    }

    #[test]
    fn transcript_fence_stripped() {
        let out = clean_transcript("```markdown\n# Statement\n\n| A | B |\n```\n");
        assert_eq!(out, "# Statement\n\n| A | B |");
    }

    #[test]
    fn transcript_without_fence_untouched() {
        assert_eq!(clean_transcript("Plain text"), "Plain text");
    }
}
