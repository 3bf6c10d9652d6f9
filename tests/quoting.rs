//! Quoted identifiers and literals read back as the original value

use pgconverge::statement::{quote_identifier, quote_literal};

const AWKWARD: &[&str] = &[
    "plain",
    "MixedCase",
    "with space",
    "semi;colon",
    "dou\"ble",
    "\"\"",
    "sin'gle",
    "''",
    "back\\slash",
    "trailing\\",
    "'; DROP ROLE postgres; --",
    "\"; DROP ROLE postgres; --",
    "ünïcødé",
    "",
];

/// Read a double-quoted identifier the way the server lexer does
fn unquote_identifier(quoted: &str) -> Option<String> {
    let body = quoted.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::new();
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == '"' {
            // Inside the body a quote is only valid when doubled
            if chars.next() != Some('"') {
                return None;
            }
        }
        out.push(c);
    }
    Some(out)
}

/// Read a standard or `E'...'` string literal
fn unquote_literal(quoted: &str) -> Option<String> {
    let (escape, rest) = match quoted.strip_prefix('E') {
        Some(rest) => (true, rest),
        None => (false, quoted),
    };
    let body = rest.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut out = String::new();
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                if chars.next() != Some('\'') {
                    return None;
                }
                out.push('\'');
            }
            '\\' if escape => out.push(chars.next()?),
            _ => out.push(c),
        }
    }
    Some(out)
}

#[test]
fn identifiers_round_trip() {
    for value in AWKWARD {
        let quoted = quote_identifier(value);
        assert_eq!(unquote_identifier(&quoted).as_deref(), Some(*value), "{quoted}");
    }
}

#[test]
fn literals_round_trip() {
    for value in AWKWARD {
        let quoted = quote_literal(value);
        assert_eq!(unquote_literal(&quoted).as_deref(), Some(*value), "{quoted}");
    }
}

#[test]
fn escape_prefix_only_with_backslashes() {
    assert_eq!(quote_literal("it's"), "'it''s'");
    assert_eq!(quote_literal("a\\b"), "E'a\\\\b'");
}
