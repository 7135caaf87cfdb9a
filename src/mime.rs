//! Message parsing and MIME handling
//!
//! Parses RFC822 messages using `mailparse`, extracts body text/HTML,
//! threading headers and attachments. Sanitizes HTML with `ammonia` and
//! derives plain text from HTML-only messages with `html2text`.

use std::collections::BTreeMap;

use mailparse::{DispositionType, MailHeaderMap, ParsedMail};

use crate::errors::{AppError, AppResult};
use crate::message_id;

/// Maximum characters kept in a message snippet
pub const SNIPPET_MAX_CHARS: usize = 200;

/// Content type used when a part does not declare one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Parsed message representation
#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    /// Parsed Date header
    pub date: Option<String>,
    /// Parsed From header
    pub from: Option<String>,
    /// Parsed To header
    pub to: Option<String>,
    /// Parsed Cc header
    pub cc: Option<String>,
    /// Parsed Subject header
    pub subject: Option<String>,
    /// `Message-ID` token in `<...>` form
    pub message_id: Option<String>,
    /// `In-Reply-To` token in `<...>` form
    pub in_reply_to: Option<String>,
    /// `References` tokens; `None` when the header is absent
    pub references: Option<Vec<String>>,
    /// Plain text body, falling back to text rendered from HTML
    pub body_text: Option<String>,
    /// Sanitized HTML body
    pub body_html_sanitized: Option<String>,
    /// Attachments with decoded content, in MIME tree order
    pub attachments: Vec<ParsedAttachment>,
}

/// Decoded attachment part
#[derive(Debug, Clone)]
pub struct ParsedAttachment {
    /// Position among the message's attachments (0-based)
    pub index: usize,
    /// Filename from Content-Disposition or Content-Type `name`
    pub filename: Option<String>,
    /// Lowercased MIME type
    pub content_type: String,
    /// Decoded bytes
    pub content: Vec<u8>,
}

/// Parse RFC822 message into structured representation
///
/// # Errors
///
/// - `Internal` if `mailparse` fails or an attachment body cannot be decoded
pub fn parse_message(raw: &[u8]) -> AppResult<ParsedMessage> {
    let parsed = mailparse::parse_mail(raw)
        .map_err(|e| AppError::Internal(format!("failed to parse RFC822 message: {e}")))?;

    let mut body_text = None;
    let mut body_html = None;
    let mut attachments = Vec::new();
    walk_parts(&parsed, &mut body_text, &mut body_html, &mut attachments)?;

    let text = body_text.or_else(|| body_html.as_deref().and_then(html_to_text));
    let html = body_html.map(|h| ammonia::clean(&h));

    let headers = &parsed.headers;
    let references = headers
        .get_first_value("References")
        .map(|v| message_id::extract_tokens(&v));

    Ok(ParsedMessage {
        date: headers.get_first_value("Date"),
        from: headers.get_first_value("From"),
        to: headers.get_first_value("To"),
        cc: headers.get_first_value("Cc"),
        subject: headers.get_first_value("Subject"),
        message_id: headers
            .get_first_value("Message-ID")
            .and_then(|v| message_id::first_token(&v)),
        in_reply_to: headers
            .get_first_value("In-Reply-To")
            .and_then(|v| message_id::first_token(&v)),
        references,
        body_text: text,
        body_html_sanitized: html,
        attachments,
    })
}

/// Walk MIME part tree recursively
///
/// Keeps the first text/plain and text/html bodies and collects every
/// attachment leaf.
fn walk_parts(
    part: &ParsedMail<'_>,
    body_text: &mut Option<String>,
    body_html: &mut Option<String>,
    attachments: &mut Vec<ParsedAttachment>,
) -> AppResult<()> {
    if part.subparts.is_empty() {
        let ctype = part.ctype.mimetype.to_ascii_lowercase();
        let disp = part.get_content_disposition();
        let filename = attachment_filename(part, &disp.params);
        let is_attachment = disp.disposition == DispositionType::Attachment || filename.is_some();

        if !is_attachment {
            if ctype == "text/plain"
                && body_text.is_none()
                && let Ok(text) = part.get_body()
            {
                *body_text = Some(text);
            }

            if ctype == "text/html"
                && body_html.is_none()
                && let Ok(html) = part.get_body()
            {
                *body_html = Some(html);
            }
            return Ok(());
        }

        let content = part
            .get_body_raw()
            .map_err(|e| AppError::Internal(format!("failed decoding attachment body: {e}")))?;
        attachments.push(ParsedAttachment {
            index: attachments.len(),
            filename,
            content_type: if ctype.is_empty() {
                DEFAULT_CONTENT_TYPE.to_owned()
            } else {
                ctype
            },
            content,
        });
        return Ok(());
    }

    for sub in &part.subparts {
        walk_parts(sub, body_text, body_html, attachments)?;
    }
    Ok(())
}

/// Extract attachment filename from part
///
/// Checks Content-Disposition parameter first, falls back to Content-Type
/// name parameter.
fn attachment_filename(
    part: &ParsedMail<'_>,
    disp_params: &BTreeMap<String, String>,
) -> Option<String> {
    disp_params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned())
        .filter(|name| !name.trim().is_empty())
}

/// Render HTML to plain text for messages without a text/plain part
fn html_to_text(html: &str) -> Option<String> {
    html2text::from_read(html.as_bytes(), 100).ok()
}

/// Unix seconds from a `Date` header value
///
/// `mailparse::dateparse` answers `Ok(0)` for text it cannot read, so zero
/// counts as unparseable here.
pub fn parse_date(value: &str) -> Option<i64> {
    mailparse::dateparse(value).ok().filter(|ts| *ts != 0)
}

/// Whitespace-collapsed preview of a body, bounded to [`SNIPPET_MAX_CHARS`]
pub fn snippet(body: &str) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(collapsed, SNIPPET_MAX_CHARS)
}

/// Split an address-list header into individual addresses
///
/// Uses `mailparse::addrparse` and falls back to comma splitting when the
/// header is not RFC-conformant.
pub fn address_list(value: &str) -> Vec<String> {
    match mailparse::addrparse(value) {
        Ok(list) => list
            .iter()
            .flat_map(|addr| match addr {
                mailparse::MailAddr::Single(info) => vec![info.addr.clone()],
                mailparse::MailAddr::Group(group) => {
                    group.addrs.iter().map(|info| info.addr.clone()).collect()
                }
            })
            .filter(|addr| !addr.is_empty())
            .collect(),
        Err(_) => value
            .split(',')
            .map(|part| part.trim().to_owned())
            .filter(|part| !part.is_empty())
            .collect(),
    }
}

/// Truncate string to maximum characters (Unicode-aware)
pub fn truncate_chars(input: String, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::{address_list, parse_date, parse_message, snippet, truncate_chars};

    #[test]
    fn truncates_unicode_by_character() {
        let input = "a😀b😀c".to_owned();
        let out = truncate_chars(input, 4);
        assert_eq!(out, "a😀b😀");
    }

    #[test]
    fn parses_simple_plain_text_message() {
        let raw = b"From: sender@example.com\r\nTo: user@example.com\r\nSubject: Hi\r\nDate: Wed, 1 Jan 2025 00:00:00 +0000\r\n\r\nHello there";
        let parsed = parse_message(raw).expect("parse should succeed");

        assert_eq!(parsed.subject.as_deref(), Some("Hi"));
        assert_eq!(parsed.from.as_deref(), Some("sender@example.com"));
        assert_eq!(parsed.to.as_deref(), Some("user@example.com"));
        assert_eq!(parsed.body_text.as_deref(), Some("Hello there"));
        assert!(parsed.message_id.is_none());
        assert!(parsed.references.is_none());
        assert!(parsed.attachments.is_empty());
    }

    #[test]
    fn parses_threading_headers() {
        let raw = b"Message-ID: <a@x>\r\nIn-Reply-To: <b@x>\r\nReferences: <c@x>\r\n <b@x>\r\nSubject: Re: t\r\n\r\nbody";
        let parsed = parse_message(raw).expect("parse should succeed");

        assert_eq!(parsed.message_id.as_deref(), Some("<a@x>"));
        assert_eq!(parsed.in_reply_to.as_deref(), Some("<b@x>"));
        assert_eq!(
            parsed.references,
            Some(vec!["<c@x>".to_owned(), "<b@x>".to_owned()])
        );
    }

    #[test]
    fn collects_attachments_with_fallbacks() {
        let raw = concat!(
            "From: a@x\r\n",
            "Subject: files\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n",
            "\r\n",
            "--XYZ\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "see attached\r\n",
            "--XYZ\r\n",
            "Content-Type: application/pdf; name=\"report.pdf\"\r\n",
            "Content-Disposition: attachment; filename=\"report.pdf\"\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "aGVsbG8=\r\n",
            "--XYZ\r\n",
            "Content-Type: image/png\r\n",
            "Content-Disposition: attachment\r\n",
            "\r\n",
            "png\r\n",
            "--XYZ--\r\n",
        );
        let parsed = parse_message(raw.as_bytes()).expect("parse should succeed");

        assert_eq!(parsed.body_text.as_deref().map(str::trim), Some("see attached"));
        assert_eq!(parsed.attachments.len(), 2);
        let pdf = &parsed.attachments[0];
        assert_eq!(pdf.index, 0);
        assert_eq!(pdf.filename.as_deref(), Some("report.pdf"));
        assert_eq!(pdf.content_type, "application/pdf");
        assert_eq!(pdf.content, b"hello");
        let png = &parsed.attachments[1];
        assert_eq!(png.index, 1);
        assert!(png.filename.is_none());
    }

    #[test]
    fn html_only_message_gets_text_and_sanitized_html() {
        let raw = b"From: a@x\r\nContent-Type: text/html\r\n\r\n<p>Hello <b>world</b></p><script>alert(1)</script>";
        let parsed = parse_message(raw).expect("parse should succeed");

        let html = parsed.body_html_sanitized.expect("html present");
        assert!(!html.contains("<script>"));
        let text = parsed.body_text.expect("text derived from html");
        assert!(text.contains("Hello"));
        assert!(text.contains("world"));
    }

    #[test]
    fn unreadable_dates_are_none() {
        assert_eq!(
            parse_date("Wed, 1 Jan 2025 00:00:00 +0000"),
            Some(1_735_689_600)
        );
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn snippet_collapses_whitespace() {
        assert_eq!(snippet("  line one\r\n\r\n  line\ttwo "), "line one line two");
        assert_eq!(snippet(&"x".repeat(500)).chars().count(), 200);
    }

    #[test]
    fn address_list_splits_named_addresses() {
        assert_eq!(
            address_list("Jane Doe <jane@example.com>, bob@example.com"),
            vec!["jane@example.com", "bob@example.com"]
        );
    }
}
