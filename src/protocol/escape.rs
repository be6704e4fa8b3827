//! Transport escaping for the API reply format.
//!
//! The wire format reserves `|` (section separator), `,` (field separator),
//! `=` (key/value separator) and `\` (escape). A rig escapes a literal
//! occurrence by prefixing a backslash. Splitting a reply naively would trip
//! on escaped separators, so decoding happens in two passes: first every
//! escaped reserved character is replaced with a private placeholder byte
//! that cannot occur in the payload, then after splitting each field value
//! has the placeholders substituted back exactly once.

/// Placeholder bytes, one per reserved character. Control bytes below 0x05
/// never appear in API payloads.
const PLACE_PIPE: char = '\u{1}';
const PLACE_BACKSLASH: char = '\u{2}';
const PLACE_EQUALS: char = '\u{3}';
const PLACE_COMMA: char = '\u{4}';

/// Replace each escaped reserved character with its placeholder so later
/// splitting on `|`, `,` and `=` is unambiguous. A backslash before any
/// other character (or at end of input) is dropped, passing the character
/// through unchanged.
pub fn neutralize(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('|') => out.push(PLACE_PIPE),
            Some('\\') => out.push(PLACE_BACKSLASH),
            Some('=') => out.push(PLACE_EQUALS),
            Some(',') => out.push(PLACE_COMMA),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Substitute placeholders back to their literal characters. Applied to
/// each field value exactly once, after splitting.
pub fn restore(value: &str) -> String {
    value
        .chars()
        .map(|ch| match ch {
            PLACE_PIPE => '|',
            PLACE_BACKSLASH => '\\',
            PLACE_EQUALS => '=',
            PLACE_COMMA => ',',
            other => other,
        })
        .collect()
}

/// Escape a string for transport, the inverse of receive-side decoding.
/// Used when sending command parameters that may contain reserved
/// characters (pool URLs, worker passwords).
pub fn escape_for_transport(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '|' | '\\' | '=' | ',') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_characters_round_trip() {
        for s in ["a|b", "a\\b", "a=b", "a,b", "|\\=,", "plain", ""] {
            let wire = escape_for_transport(s);
            assert_eq!(restore(&neutralize(&wire)), s);
        }
    }

    #[test]
    fn neutralized_line_splits_safely() {
        // An escaped comma inside a value must survive the comma split.
        let line = neutralize("POOL=0,URL=stratum://x\\,y");
        let fields: Vec<&str> = line.split(',').collect();
        assert_eq!(fields.len(), 2);
        assert_eq!(restore(fields[1]), "URL=stratum://x,y");
    }

    #[test]
    fn stray_backslash_passes_character_through() {
        assert_eq!(neutralize("a\\bc"), "abc");
        assert_eq!(neutralize("trailing\\"), "trailing");
    }
}
