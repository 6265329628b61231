use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::TOKEN_SEPARATOR;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<key>[A-Z][A-Z0-9_]*):(?P<value>.*)$").expect("valid token regex"));

/// Split raw log text into trimmed, non-empty tokens, line by line.
pub fn tokenize(text: &str) -> Vec<String> {
    text.lines()
        .flat_map(|line| line.split(TOKEN_SEPARATOR))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a `KEY:value` token. Tokens without an upper-case key are opaque.
pub fn split_token(token: &str) -> Option<(&str, &str)> {
    let caps = TOKEN_RE.captures(token)?;
    let key = caps.name("key")?.as_str();
    let value = caps.name("value")?.as_str();
    Some((key, value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_splits_lines_and_separators() {
        let tokens = tokenize("TEAM:RedSox| PLAYER:Ortiz |\n\nEVENT:HomeRun");
        assert_eq!(tokens, vec!["TEAM:RedSox", "PLAYER:Ortiz", "EVENT:HomeRun"]);
    }

    #[test]
    fn test_split_token() {
        assert_eq!(split_token("TEAM: Red Sox "), Some(("TEAM", "Red Sox")));
        assert_eq!(split_token("EVENT:"), Some(("EVENT", "")));
        assert_eq!(split_token("team:RedSox"), None);
        assert_eq!(split_token("no separator"), None);
    }
}
