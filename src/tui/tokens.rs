// Input tokenization: `{Name}` placeholders resolve against a per-platform
// key map; ESC-prefixed mappings stay atomic so inter-keystroke delay
// never splits an escape sequence. Built from SPEC_FULL.md §4.E.1 with no
// teacher counterpart.

use std::collections::HashMap;

const ESC: char = '\u{1b}';

/// One unit of stdin to write, with the delay policy applied uniformly
/// regardless of whether it came from a named key or a literal character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteToken(pub String);

/// Builds the platform key map for `{Name}` resolution. Per SPEC_FULL.md
/// §4.E.1: `Enter`, `Tab`, `Escape`, and the four arrow keys at minimum.
pub fn platform_key_map(platform: &str) -> HashMap<&'static str, &'static str> {
    let mut map = HashMap::new();
    match platform {
        "win32" => {
            map.insert("Enter", "\r\n");
        }
        _ => {
            map.insert("Enter", "\n");
        }
    }
    map.insert("Tab", "\t");
    map.insert("Escape", "\u{1b}");
    map.insert("ArrowUp", "\u{1b}[A");
    map.insert("ArrowDown", "\u{1b}[B");
    map.insert("ArrowLeft", "\u{1b}[D");
    map.insert("ArrowRight", "\u{1b}[C");
    map
}

/// Tokenizes `input` against `key_map`. A `{Name}` resolved to a mapping
/// starting with ESC becomes one atomic token; otherwise each resulting
/// character becomes its own token (matching real per-keystroke timing).
/// Unknown `{Name}` or an unmatched `{` is emitted character-by-character.
pub fn tokenize(input: &str, key_map: &HashMap<&'static str, &'static str>) -> Vec<WriteToken> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '{' {
            if let Some(close) = chars[i..].iter().position(|&c| c == '}') {
                let name: String = chars[i + 1..i + close].iter().collect();
                if let Some(&mapped) = key_map.get(name.as_str()) {
                    if mapped.starts_with(ESC) {
                        tokens.push(WriteToken(mapped.to_string()));
                    } else {
                        for ch in mapped.chars() {
                            tokens.push(WriteToken(ch.to_string()));
                        }
                    }
                    i += close + 1;
                    continue;
                }
                // Unknown name: emit the literal braces and name verbatim.
                for ch in chars[i..=i + close].iter() {
                    tokens.push(WriteToken(ch.to_string()));
                }
                i += close + 1;
                continue;
            }
        }
        tokens.push(WriteToken(chars[i].to_string()));
        i += 1;
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_escape_sequence_as_one_atomic_token() {
        let map = platform_key_map("linux");
        let tokens = tokenize("{ArrowUp}", &map);
        assert_eq!(tokens, vec![WriteToken("\u{1b}[A".to_string())]);
    }

    #[test]
    fn splits_non_escape_mapping_into_individual_characters() {
        let map = platform_key_map("win32");
        let tokens = tokenize("{Enter}", &map);
        assert_eq!(tokens, vec![WriteToken("\r".to_string()), WriteToken("\n".to_string())]);
    }

    #[test]
    fn unknown_name_emitted_verbatim() {
        let map = platform_key_map("linux");
        let tokens = tokenize("{Bogus}", &map);
        let joined: String = tokens.iter().map(|t| t.0.clone()).collect();
        assert_eq!(joined, "{Bogus}");
    }

    #[test]
    fn literal_text_produces_one_token_per_character() {
        let map = platform_key_map("linux");
        let tokens = tokenize("hi", &map);
        assert_eq!(tokens.len(), 2);
    }
}
