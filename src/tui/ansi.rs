// ANSI output parsing: alternates between CSI `ESC[<params>m` sequences
// and plain-text runs, accumulating style state across sequences so two
// consecutive escapes (fg then bold) both color the text that follows.
// Built from SPEC_FULL.md §4.E.2; no teacher counterpart.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

static CSI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[([0-9;]*)m").unwrap());

const PALETTE: [&str; 8] = ["black", "red", "green", "yellow", "blue", "magenta", "cyan", "white"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleState {
    pub fg: Option<String>,
    pub bg: Option<String>,
    pub styles: HashSet<String>,
}

impl StyleState {
    fn apply_code(&mut self, code: u32) {
        match code {
            0 => *self = StyleState::default(),
            1 => {
                self.styles.insert("bold".to_string());
            }
            3 => {
                self.styles.insert("italic".to_string());
            }
            4 => {
                self.styles.insert("underline".to_string());
            }
            30..=37 => self.fg = Some(PALETTE[(code - 30) as usize].to_string()),
            40..=47 => self.bg = Some(PALETTE[(code - 40) as usize].to_string()),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledSpan {
    pub text: String,
    pub offset: usize,
    pub style: StyleState,
}

/// Parses ANSI-styled output into text spans carrying the style state
/// active when each span was emitted. State persists across calls to
/// `feed` so a caller can parse output incrementally.
#[derive(Debug, Clone, Default)]
pub struct AnsiParser {
    state: StyleState,
}

impl AnsiParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one chunk. The returned offsets restart at zero for this
    /// chunk, per SPEC_FULL.md §4.E.2 ("per-chunk" offsets).
    pub fn feed(&mut self, chunk: &str) -> Vec<StyledSpan> {
        let mut spans = Vec::new();
        let mut last_end = 0;
        let mut assembled_offset = 0;

        for caps in CSI_RE.captures_iter(chunk) {
            let m = caps.get(0).unwrap();
            if m.start() > last_end {
                let text = &chunk[last_end..m.start()];
                spans.push(StyledSpan {
                    text: text.to_string(),
                    offset: assembled_offset,
                    style: self.state.clone(),
                });
                assembled_offset += text.len();
            }
            let params = &caps[1];
            if params.is_empty() {
                self.state = StyleState::default();
            } else {
                for part in params.split(';') {
                    if let Ok(code) = part.parse::<u32>() {
                        self.state.apply_code(code);
                    }
                }
            }
            last_end = m.end();
        }

        if last_end < chunk.len() {
            let text = &chunk[last_end..];
            spans.push(StyledSpan {
                text: text.to_string(),
                offset: assembled_offset,
                style: self.state.clone(),
            });
        }

        spans
    }
}

/// Removes every `ESC[<params>m` sequence, leaving only plain text.
pub fn strip_ansi(text: &str) -> String {
    CSI_RE.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persists_style_state_across_consecutive_escapes() {
        let mut parser = AnsiParser::new();
        let spans = parser.feed("\x1b[31m\x1b[1mhello");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "hello");
        assert_eq!(spans[0].style.fg.as_deref(), Some("red"));
        assert!(spans[0].style.styles.contains("bold"));
    }

    #[test]
    fn reset_code_clears_accumulated_state() {
        let mut parser = AnsiParser::new();
        parser.feed("\x1b[31mred");
        let spans = parser.feed("\x1b[0mplain");
        assert_eq!(spans[0].style.fg, None);
        assert_eq!(spans[0].text, "plain");
    }

    #[test]
    fn strip_ansi_removes_escape_sequences() {
        assert_eq!(strip_ansi("\x1b[31mhello\x1b[0m"), "hello");
    }

    #[test]
    fn unknown_codes_are_ignored_without_error() {
        let mut parser = AnsiParser::new();
        let spans = parser.feed("\x1b[99mtext");
        assert_eq!(spans[0].text, "text");
        assert_eq!(spans[0].style, StyleState::default());
    }
}
