//! Raw RFC 822 extraction: headers/body split on the first blank line and
//! a minimal, unfolding header reader. No MIME decoding.

use comanda_common::{Error, Result};

/// Split a raw message at the first blank-line separator. Everything
/// before is the header block, everything after is the body verbatim.
pub fn split_raw_message(raw: &[u8]) -> Result<(String, String)> {
    let text = String::from_utf8_lossy(raw);

    // Accept both canonical CRLFCRLF and bare LFLF separators.
    let split_at = text
        .find("\r\n\r\n")
        .map(|pos| (pos, 4))
        .or_else(|| text.find("\n\n").map(|pos| (pos, 2)));

    match split_at {
        Some((pos, sep_len)) => {
            let headers = text[..pos].to_string();
            let body = text[pos + sep_len..].to_string();
            Ok((headers, body))
        }
        None => {
            if text.trim().is_empty() {
                return Err(Error::InvalidInput("empty message source".to_string()));
            }
            // Headers only, no body.
            Ok((text.to_string(), String::new()))
        }
    }
}

/// Value of the first header with the given name, continuation lines
/// unfolded. Header names compare case-insensitively; the value is kept
/// raw (no RFC 2047 decoding).
pub fn header_value(headers: &str, name: &str) -> Option<String> {
    let mut value: Option<String> = None;

    for line in headers.lines() {
        if let Some(current) = value.as_mut() {
            // Folded continuation lines start with whitespace.
            if line.starts_with(' ') || line.starts_with('\t') {
                current.push(' ');
                current.push_str(line.trim());
                continue;
            }
            break;
        }

        if let Some(colon) = line.find(':') {
            if line[..colon].eq_ignore_ascii_case(name) {
                value = Some(line[colon + 1..].trim().to_string());
            }
        }
    }

    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_crlf_message() {
        let raw = b"Subject: Ruta Norte\r\nFrom: a@b\r\n\r\nCliente: Super Uno\r\n1 L - Leche - 1.20";
        let (headers, body) = split_raw_message(raw).unwrap();
        assert!(headers.contains("Subject: Ruta Norte"));
        assert!(body.starts_with("Cliente: Super Uno"));
    }

    #[test]
    fn test_split_lf_message() {
        let raw = b"Subject: Ruta Sur\n\nbody here";
        let (headers, body) = split_raw_message(raw).unwrap();
        assert_eq!(header_value(&headers, "Subject").as_deref(), Some("Ruta Sur"));
        assert_eq!(body, "body here");
    }

    #[test]
    fn test_headers_only_message() {
        let raw = b"Subject: Ruta Norte\r\nFrom: a@b";
        let (headers, body) = split_raw_message(raw).unwrap();
        assert!(headers.contains("Subject"));
        assert_eq!(body, "");
    }

    #[test]
    fn test_empty_message_is_error() {
        assert!(split_raw_message(b"").is_err());
        assert!(split_raw_message(b"  \r\n  ").is_err());
    }

    #[test]
    fn test_header_value_case_insensitive() {
        let headers = "subject: Ruta Norte\nFrom: x";
        assert_eq!(header_value(headers, "Subject").as_deref(), Some("Ruta Norte"));
    }

    #[test]
    fn test_header_value_unfolds_continuations() {
        let headers = "Subject: Ruta\r\n Norte\r\nFrom: x";
        assert_eq!(header_value(headers, "Subject").as_deref(), Some("Ruta Norte"));
    }

    #[test]
    fn test_missing_header() {
        assert_eq!(header_value("From: x", "Subject"), None);
    }
}
