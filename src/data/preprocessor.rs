// ============================================================
// Layer 4 — Sentence Preprocessor
// ============================================================
// Cleans one line of a parallel corpus before tokenisation.
//
// Corpus dumps (IWSLT transcripts, WMT news crawls) contain:
//   - Non-breaking and zero-width spaces
//   - Byte order marks at the start of files
//   - Tabs and stray control characters
//   - Runs of spaces left over from alignment
//
// Cleaning steps (applied in order):
//   1. Map Unicode whitespace variants and control chars to a space
//   2. Collapse runs of spaces into one
//   3. Trim both ends
//
// A line never contains a newline after cleaning, so source and
// target files stay aligned one sentence per line.

pub struct Preprocessor;

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Clean a single corpus line.
    pub fn clean(&self, line: &str) -> String {
        let mut out        = String::with_capacity(line.len());
        let mut last_space = true; // swallows leading spaces

        for c in line.chars() {
            let c = match c {
                '\u{00A0}' | '\u{200B}' | '\u{FEFF}' => ' ',
                c if c.is_control() || c.is_whitespace() => ' ',
                c => c,
            };
            if c == ' ' {
                if !last_space {
                    out.push(' ');
                }
                last_space = true;
            } else {
                out.push(c);
                last_space = false;
            }
        }

        // At most one trailing space can survive the loop
        if out.ends_with(' ') {
            out.pop();
        }
        out
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_multiple_spaces() {
        let p = Preprocessor::new();
        assert_eq!(p.clean("hello   world"), "hello world");
    }

    #[test]
    fn test_trims_edges() {
        let p = Preprocessor::new();
        assert_eq!(p.clean("  hello world  "), "hello world");
    }

    #[test]
    fn test_removes_control_chars_and_bom() {
        let p = Preprocessor::new();
        assert_eq!(p.clean("\u{FEFF}hello\x01world\r"), "hello world");
    }

    #[test]
    fn test_tabs_and_nbsp_become_spaces() {
        let p = Preprocessor::new();
        assert_eq!(p.clean("Guten\tTag\u{00A0}!"), "Guten Tag !");
    }

    #[test]
    fn test_blank_line_is_empty() {
        let p = Preprocessor::new();
        assert_eq!(p.clean(" \t "), "");
        assert_eq!(p.clean(""), "");
    }
}
