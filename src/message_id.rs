//! Message identifiers: mailbox-local UIDs and RFC 5322 Message-ID tokens
//!
//! Two kinds of identifier flow through the tools. The caller addresses
//! messages by mailbox-local UID (a decimal string such as `"19"`), while
//! threading works on `<local@domain>` tokens taken from `Message-ID`,
//! `In-Reply-To` and `References`.

use crate::errors::{AppError, AppResult};

/// Parse a mailbox-local message ID
///
/// Accepts a non-empty decimal UID (leading/trailing whitespace ignored).
///
/// # Example
///
/// ```ignore
/// assert_eq!(parse_uid("19").expect("valid uid"), 19);
/// assert!(parse_uid("abc").is_err());
/// ```
pub fn parse_uid(raw: &str) -> AppResult<u32> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid("message_id must not be empty"));
    }
    if trimmed.len() > 10 || !trimmed.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(AppError::invalid(
            "message_id must be a numeric mailbox-local id",
        ));
    }
    match trimmed.parse::<u32>() {
        Ok(0) => Err(AppError::invalid("message_id must be greater than zero")),
        Ok(uid) => Ok(uid),
        Err(_) => Err(AppError::invalid("message_id is out of range")),
    }
}

/// Extract Message-ID tokens from a header value
///
/// Returns tokens in order of appearance, each in canonical `<...>` form.
/// Values without angle brackets (seen from some broken mailers) fall back to
/// their whitespace-separated words.
pub fn extract_tokens(value: &str) -> Vec<String> {
    let mut bracketed = Vec::new();
    let mut rest = value;
    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let Some(end) = after.find(['<', '>']) else {
            break;
        };
        let inner = &after[..end];
        if after[end..].starts_with('>') && !inner.is_empty() && !inner.contains(char::is_whitespace)
        {
            bracketed.push(format!("<{inner}>"));
            rest = &after[end + 1..];
        } else {
            rest = &after[end..];
        }
    }
    if !bracketed.is_empty() {
        return bracketed;
    }

    value
        .split_whitespace()
        .map(format_token)
        .filter(|token| !token.is_empty())
        .collect()
}

/// First token of a single-valued header such as `Message-ID`
pub fn first_token(value: &str) -> Option<String> {
    extract_tokens(value).into_iter().next()
}

/// Normalize a token to `<...>` form; empty input yields an empty string
pub fn format_token(raw: &str) -> String {
    let inner = raw
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim();
    if inner.is_empty() {
        String::new()
    } else {
        format!("<{inner}>")
    }
}

/// Build an IMAP `HEADER <name> "<value>"` search criterion
///
/// # Errors
///
/// Returns `InvalidInput` if the value is empty or contains control
/// characters (which could otherwise inject IMAP commands).
pub fn header_search(header: &str, value: &str) -> AppResult<String> {
    if value.is_empty() {
        return Err(AppError::invalid("header search value must not be empty"));
    }
    if value.chars().any(|ch| ch.is_ascii_control()) {
        return Err(AppError::invalid(
            "header search value must not contain control characters",
        ));
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    Ok(format!("HEADER {header} \"{escaped}\""))
}

#[cfg(test)]
mod tests {
    use super::{extract_tokens, first_token, format_token, header_search, parse_uid};

    #[test]
    fn parses_numeric_uid() {
        assert_eq!(parse_uid("19").expect("valid"), 19);
        assert_eq!(parse_uid(" 42 ").expect("valid"), 42);
    }

    #[test]
    fn rejects_malformed_uid() {
        for bad in ["", "  ", "abc", "-1", "1.5", "0", "99999999999"] {
            assert!(parse_uid(bad).is_err(), "'{bad}' must be rejected");
        }
    }

    #[test]
    fn extracts_bracketed_tokens_in_order() {
        let tokens = extract_tokens("<b@x> <c@x>\t<d@x>");
        assert_eq!(tokens, vec!["<b@x>", "<c@x>", "<d@x>"]);
    }

    #[test]
    fn falls_back_to_bare_words() {
        assert_eq!(extract_tokens("a@x b@x"), vec!["<a@x>", "<b@x>"]);
        assert_eq!(extract_tokens("<<a@x> <>"), vec!["<a@x>"]);
        assert!(extract_tokens("   ").is_empty());
    }

    #[test]
    fn first_token_of_message_id() {
        assert_eq!(first_token(" <a@x> ").as_deref(), Some("<a@x>"));
        assert_eq!(first_token(""), None);
    }

    #[test]
    fn format_token_normalizes_brackets() {
        assert_eq!(format_token("a@x"), "<a@x>");
        assert_eq!(format_token("<a@x>"), "<a@x>");
        assert_eq!(format_token("<>"), "");
    }

    #[test]
    fn header_search_quotes_and_rejects_controls() {
        assert_eq!(
            header_search("Message-ID", "<a@x>").expect("valid"),
            "HEADER Message-ID \"<a@x>\""
        );
        assert_eq!(
            header_search("References", "<a\"b@x>").expect("valid"),
            "HEADER References \"<a\\\"b@x>\""
        );
        assert!(header_search("References", "<a@x>\r\nA1 LOGOUT").is_err());
    }
}
