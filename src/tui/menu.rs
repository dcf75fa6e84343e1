// Menu detection and navigation over PTY output. Built from SPEC_FULL.md
// §4.E.4; no teacher counterpart. The bullet-prefix ambiguity (a line
// could match more than one pattern) is resolved as documented in
// DESIGN.md: first recognized prefix wins, checked in the fixed order
// numbered -> asterisk -> dash -> bracketed.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{ErrorCode, OrchestratorError};

static NUMBERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\s*(.+)$").unwrap());
static ASTERISK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\*\s*(.+)$").unwrap());
static DASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-\s*(.+)$").unwrap());
static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[\d+\]\s*(.+)$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub label: String,
}

/// Parses menu items from the visible lines of `output`, trying each
/// bullet style in a fixed order per line and taking the first match.
pub fn parse_items(output: &str) -> Vec<MenuItem> {
    output
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            for re in [&*NUMBERED, &*ASTERISK, &*DASH, &*BRACKETED] {
                if let Some(caps) = re.captures(trimmed) {
                    return Some(MenuItem { label: caps[1].trim().to_string() });
                }
            }
            None
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct MenuContext {
    pub level: u32,
    pub items: Vec<MenuItem>,
    pub selected_index: usize,
    pub history: Vec<String>,
}

impl MenuContext {
    pub fn reset(&mut self) {
        *self = MenuContext::default();
    }

    /// Locates `target` by case-insensitive substring match against the
    /// current item labels.
    pub fn locate(&self, target: &str) -> Result<usize, OrchestratorError> {
        let needle = target.to_lowercase();
        self.items
            .iter()
            .position(|item| item.label.to_lowercase().contains(&needle))
            .ok_or_else(|| {
                let available: Vec<&str> = self.items.iter().map(|i| i.label.as_str()).collect();
                OrchestratorError::usage(
                    ErrorCode::UNSUPPORTED_ACTION,
                    format!("menu item '{target}' not found; available: [{}]", available.join(", ")),
                )
            })
    }

    /// Computes the arrow-key presses needed to move `selected_index`
    /// from its current value to `target_index`: negative means
    /// `ArrowUp`, positive `ArrowDown`.
    pub fn steps_to(&self, target_index: usize) -> i64 {
        target_index as i64 - self.selected_index as i64
    }

    pub fn advance_to(&mut self, target_index: usize, segment: &str) {
        self.selected_index = target_index;
        self.level += 1;
        self.history.push(segment.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_recognized_bullet_styles() {
        let output = "1. First\n* Second\n- Third\n[4] Fourth\nplain text";
        let items = parse_items(output);
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].label, "First");
        assert_eq!(items[3].label, "Fourth");
    }

    #[test]
    fn numbered_prefix_wins_when_a_line_could_match_more_than_one() {
        // "1. * item" matches NUMBERED first; the rest is treated as the label verbatim.
        let items = parse_items("1. * item");
        assert_eq!(items[0].label, "* item");
    }

    #[test]
    fn locate_is_case_insensitive_substring_match() {
        let ctx = MenuContext {
            items: vec![MenuItem { label: "Settings".into() }, MenuItem { label: "Logout".into() }],
            ..Default::default()
        };
        assert_eq!(ctx.locate("setting").unwrap(), 0);
        assert!(ctx.locate("missing").is_err());
    }

    #[test]
    fn steps_to_computes_signed_distance() {
        let ctx = MenuContext { selected_index: 1, ..Default::default() };
        assert_eq!(ctx.steps_to(3), 2);
        assert_eq!(ctx.steps_to(0), -1);
    }
}
