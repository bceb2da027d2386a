//! PDF text string and name token helpers

use lopdf::{Object, StringFormat};

/// Resolve a field identifier from a typed name token.
///
/// Accepts bare names (`first_name`), PDF literal strings (`(first_name)`),
/// and PDF name objects (`/first_name`). Backslash escapes inside literal
/// strings are undone. Returns `None` when nothing is left after trimming.
pub fn field_name_from_token(token: &str) -> Option<String> {
    let token = token.trim();

    let name = if let Some(inner) = token
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
    {
        unescape_literal(inner)
    } else if let Some(inner) = token.strip_prefix('/') {
        inner.to_string()
    } else {
        token.to_string()
    };

    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn unescape_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            // Line continuation
            Some('\r') => {
                chars.next_if_eq(&'\n');
            }
            Some('\n') => {}
            Some(d @ '0'..='7') => {
                let mut code = d as u32 - '0' as u32;
                for _ in 0..2 {
                    match chars.next_if(|c| matches!(c, '0'..='7')) {
                        Some(d) => code = code * 8 + (d as u32 - '0' as u32),
                        None => break,
                    }
                }
                // High-order overflow is ignored
                out.push(char::from((code & 0xFF) as u8));
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Decode the bytes of a PDF text string.
///
/// UTF-16BE with a byte order mark first, then UTF-8, then Latin-1.
pub fn decode_text(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Encode a value as a PDF text string object.
///
/// ASCII stays a literal string; anything else becomes UTF-16BE hex with a BOM.
pub fn encode_text(value: &str) -> Object {
    if value.is_ascii() {
        return Object::String(value.as_bytes().to_vec(), StringFormat::Literal);
    }

    let mut bytes = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Read a string or name object as text.
pub fn object_text(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => Some(decode_text(bytes)),
        Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("first_name", Some("first_name"))]
    #[case("(first_name)", Some("first_name"))]
    #[case("/first_name", Some("first_name"))]
    #[case("  (email)  ", Some("email"))]
    #[case("(a\\)b)", Some("a)b"))]
    #[case("(a\\053b)", Some("a+b"))]
    #[case("(\\101\\102)", Some("AB"))]
    #[case("(\\0619)", Some("19"))]
    #[case("(first\\\n_name)", Some("first_name"))]
    #[case("(last\\\r\n_name)", Some("last_name"))]
    #[case("()", None)]
    #[case("/", None)]
    #[case("   ", None)]
    fn test_field_name_from_token(#[case] token: &str, #[case] expected: Option<&str>) {
        assert_eq!(
            field_name_from_token(token),
            expected.map(|s| s.to_string())
        );
    }

    #[test]
    fn test_decode_utf16_with_bom() {
        let bytes = [0xFE, 0xFF, 0x00, 0x41, 0x00, 0xE9];
        assert_eq!(decode_text(&bytes), "Aé");
    }

    #[test]
    fn test_decode_latin1_fallback() {
        assert_eq!(decode_text(&[0x4A, 0xF6]), "Jö");
    }

    #[test]
    fn test_encode_non_ascii_is_utf16() {
        let obj = encode_text("Zoë");
        match &obj {
            Object::String(bytes, StringFormat::Hexadecimal) => {
                assert_eq!(&bytes[..2], &[0xFE, 0xFF]);
            }
            other => panic!("unexpected object: {:?}", other),
        }
        assert_eq!(object_text(&obj).as_deref(), Some("Zoë"));
    }

    #[test]
    fn test_encode_ascii_is_literal() {
        assert!(matches!(
            encode_text("alice@example.com"),
            Object::String(_, StringFormat::Literal)
        ));
    }
}
