//! Request-target helpers: percent-decoding, traversal normalisation,
//! query splitting and `Host` validation.

use std::collections::HashMap;

use crate::http::parser::ParseError;

/// Characters allowed verbatim in a request target.
pub fn is_uri_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~' | b'/' | b'?' | b'&' | b'=' | b'%')
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decodes `%XX` escapes.
///
/// A `%` that is not followed by two hex digits is an error, including a
/// truncated escape at the end of the input. The decoded bytes must be
/// valid UTF-8.
pub fn percent_decode(input: &str) -> Result<String, ParseError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).copied().and_then(hex_value);
            let lo = bytes.get(i + 2).copied().and_then(hex_value);
            match (hi, lo) {
                (Some(hi), Some(lo)) => out.push(hi << 4 | lo),
                _ => return Err(ParseError::InvalidPercentEncoding),
            }
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).map_err(|_| ParseError::InvalidPercentEncoding)
}

/// Percent-encodes every byte outside the unreserved set.
pub fn percent_encode(input: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(input.len());
    for &b in input {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~' | b'/') {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0f) as usize] as char);
        }
    }
    out
}

/// Resolves `.` and `..` segments with a segment stack.
///
/// A `..` with nothing left to pop would escape the root and is rejected.
/// Empty segments collapse; a trailing slash is preserved.
pub fn normalize_path(path: &str) -> Result<String, ParseError> {
    let mut stack: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if stack.pop().is_none() {
                    return Err(ParseError::Traversal);
                }
            }
            s => stack.push(s),
        }
    }

    let mut normalized = String::with_capacity(path.len());
    for segment in &stack {
        normalized.push('/');
        normalized.push_str(segment);
    }

    let trailing = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");
    if normalized.is_empty() || (trailing && !stack.is_empty()) {
        normalized.push('/');
    }

    Ok(normalized)
}

/// Splits `a=1&b=2` into pairs.
///
/// Empty pieces (as in `a=1&&b=2` or a trailing `&`) are skipped; a piece
/// without `=` or with an empty key is malformed.
pub fn parse_query(query: &str) -> Result<HashMap<String, String>, ParseError> {
    let mut pairs = HashMap::new();

    for piece in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = piece.split_once('=').ok_or(ParseError::MalformedQuery)?;
        if key.is_empty() {
            return Err(ParseError::MalformedQuery);
        }
        pairs.insert(key.to_string(), value.to_string());
    }

    Ok(pairs)
}

/// Accepts `localhost`, a dotted IPv4 address or a domain name, each with
/// an optional numeric `:port`.
pub fn is_valid_host(value: &str) -> bool {
    let (name, port) = match value.split_once(':') {
        Some((name, port)) => (name, Some(port)),
        None => (value, None),
    };

    if let Some(port) = port {
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
    }

    if name.is_empty() {
        return false;
    }
    if name == "localhost" {
        return true;
    }

    // Anything made only of digits and dots is judged as an IPv4 literal.
    if name.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return is_ipv4(name);
    }

    name.split('.').all(is_domain_label)
}

fn is_ipv4(name: &str) -> bool {
    let octets: Vec<&str> = name.split('.').collect();
    octets.len() == 4
        && octets.iter().all(|o| {
            !o.is_empty() && o.len() <= 3 && o.parse::<u16>().map(|n| n <= 255).unwrap_or(false)
        })
}

fn is_domain_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
        }
        _ => false,
    }
}
