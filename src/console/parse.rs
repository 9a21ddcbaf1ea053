// Licensed under the Apache-2.0 license

//! Command-line tokenizer and value parsing.

/// Longest token handed out. Longer runs are split into several tokens.
pub const MAX_TOKEN_LENGTH: usize = 10;

fn is_delimiter(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// Splits a command line on spaces and tabs.
#[derive(Clone, Debug)]
pub struct Tokens<'a> {
    rest: &'a str,
}

impl<'a> Tokens<'a> {
    #[must_use]
    pub fn new(line: &'a str) -> Self {
        Self { rest: line }
    }

    /// Next token, or `""` once the line is used up.
    pub fn next_or_empty(&mut self) -> &'a str {
        self.next().unwrap_or("")
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let rest = self.rest.trim_start_matches(is_delimiter);
        if rest.is_empty() {
            self.rest = rest;
            return None;
        }
        let end = rest.find(is_delimiter).unwrap_or(rest.len());
        let limit = rest
            .char_indices()
            .nth(MAX_TOKEN_LENGTH)
            .map_or(rest.len(), |(i, _)| i);
        let (token, tail) = rest.split_at(end.min(limit));
        self.rest = tail;
        Some(token)
    }
}

/// Parse a hex byte: optional `0x`/`0X` prefix, then one or two hex digits.
#[must_use]
pub fn parse_hex(token: &str) -> Option<u8> {
    let digits = strip_hex_prefix(token);
    if digits.is_empty() || digits.len() > 2 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(digits, 16).ok()
}

/// `token` without its `0x` prefix, as echoed back in error messages.
#[must_use]
pub fn strip_hex_prefix(token: &str) -> &str {
    token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token)
}

/// Case-insensitive command name match.
#[must_use]
pub fn command_eq(token: &str, name: &str) -> bool {
    token.eq_ignore_ascii_case(name)
}
