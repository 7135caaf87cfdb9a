//! Reply composition
//!
//! Turns a target message and the caller's text into a threaded
//! [`OutgoingMessage`]: reply address from `From`, `Re:` subject, optional
//! quoted original, `In-Reply-To` and extended `References`.

use chrono::DateTime;

use crate::errors::{AppError, AppResult};
use crate::mailbox::MailboxReader;
use crate::mime;
use crate::models::{DeliveryResult, Message, OutgoingMessage, ReplyRequest};
use crate::smtp::MailSender;

/// Maximum reply body length in characters
pub const MAX_REPLY_BODY_CHARS: usize = 100_000;

const QUOTE_DATE_FORMAT: &str = "%a, %b %-d, %Y, %-I:%M %p";

/// Compose a reply to `request.uid` and hand it to `sender`
///
/// # Errors
///
/// - `InvalidInput` for an empty or oversized body, before any network call
/// - connection-level errors from fetching the target
///
/// A missing target, an undeterminable reply address and delivery failures
/// are all reported as a failed [`DeliveryResult`].
pub async fn compose_and_send<R, S>(
    reader: &R,
    sender: &S,
    request: &ReplyRequest,
) -> AppResult<DeliveryResult>
where
    R: MailboxReader,
    S: MailSender,
{
    validate_reply_body(&request.body)?;

    let fetched = reader.fetch_full(&[request.uid]).await?;
    let Some(raw) = fetched.into_iter().find(|m| m.uid == request.uid) else {
        return Ok(DeliveryResult::failure(format!(
            "message {} not found",
            request.uid
        )));
    };
    let original = match raw.to_message() {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(uid = request.uid, error = %e, "reply target could not be parsed");
            return Ok(DeliveryResult::failure(format!(
                "message {} could not be decoded",
                request.uid
            )));
        }
    };

    let Some(outgoing) = compose(&original, &request.body, request.include_quote) else {
        return Ok(DeliveryResult::failure(format!(
            "could not determine reply address from '{}'",
            original.from
        )));
    };

    Ok(sender.send(outgoing).await)
}

/// Build the outgoing reply; `None` when no reply address can be derived
pub fn compose(original: &Message, body: &str, include_quote: bool) -> Option<OutgoingMessage> {
    let to = extract_reply_address(&original.from)?;

    let body = match original.body.as_deref() {
        Some(text) if include_quote && !text.is_empty() => {
            build_reply_body(body, original.date.as_deref(), &original.from, text)
        }
        _ => body.to_owned(),
    };

    Some(OutgoingMessage {
        to: vec![to],
        subject: reply_subject(&original.subject),
        body,
        in_reply_to: original.message_id.clone(),
        references: reply_references(original),
        ..OutgoingMessage::default()
    })
}

/// Reject bodies that are blank or longer than [`MAX_REPLY_BODY_CHARS`]
pub fn validate_reply_body(body: &str) -> AppResult<()> {
    if body.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "reply body must not be empty".to_owned(),
        ));
    }
    let chars = body.chars().count();
    if chars > MAX_REPLY_BODY_CHARS {
        return Err(AppError::InvalidInput(format!(
            "reply body is {chars} characters, maximum is {MAX_REPLY_BODY_CHARS}"
        )));
    }
    Ok(())
}

/// Address to reply to
///
/// Angle-bracketed address wins; otherwise the first bare `local@domain`
/// word. Anything without an `@` yields `None`.
pub fn extract_reply_address(from: &str) -> Option<String> {
    if let Some(start) = from.find('<')
        && let Some(len) = from[start + 1..].find('>')
    {
        let inner = from[start + 1..start + 1 + len].trim();
        return is_address(inner).then(|| inner.to_owned());
    }

    from.split(|c: char| c.is_whitespace() || matches!(c, ',' | ';'))
        .map(|word| {
            word.trim_matches(|c: char| matches!(c, '"' | '\'' | '(' | ')' | ':' | '<' | '>'))
        })
        .find(|word| is_address(word))
        .map(str::to_owned)
}

fn is_address(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@')
        }
        None => false,
    }
}

/// `Re: ` prefix unless the subject already starts with `Re:`
pub fn reply_subject(subject: &str) -> String {
    if subject.starts_with("Re:") {
        subject.to_owned()
    } else {
        format!("Re: {subject}")
    }
}

/// Prefix every line with `> `
pub fn quote_body(body: &str) -> String {
    body.split('\n')
        .map(|line| format!("> {}", line.strip_suffix('\r').unwrap_or(line)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reply text followed by an attribution line and the quoted original
pub fn build_reply_body(reply: &str, date: Option<&str>, from: &str, original: &str) -> String {
    format!(
        "{reply}\n\n---\nOn {}, {from} wrote:\n{}",
        quote_date(date),
        quote_body(original)
    )
}

/// Attribution date, falling back to the raw header when it does not parse
fn quote_date(date: Option<&str>) -> String {
    let Some(raw) = date else {
        return "an unknown date".to_owned();
    };
    mime::parse_date(raw)
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.format(QUOTE_DATE_FORMAT).to_string())
        .unwrap_or_else(|| raw.to_owned())
}

/// Original `References` with the original `Message-ID` appended
pub fn reply_references(original: &Message) -> Vec<String> {
    let mut references = original.references.clone().unwrap_or_default();
    references.retain(|r| !r.is_empty());
    if let Some(id) = original.message_id.as_ref().filter(|id| !id.is_empty()) {
        references.push(id.clone());
    }
    references
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::{
        build_reply_body, compose_and_send, extract_reply_address, quote_body, reply_subject,
        validate_reply_body,
    };
    use crate::errors::AppError;
    use crate::models::{DeliveryResult, OutgoingMessage, ReplyRequest};
    use crate::smtp::MailSender;
    use crate::thread::tests::{FakeMailbox, message};

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<OutgoingMessage>>,
        fail: bool,
    }

    impl MailSender for RecordingSender {
        async fn send(&self, message: OutgoingMessage) -> DeliveryResult {
            self.sent.lock().expect("lock").push(message);
            if self.fail {
                DeliveryResult::failure("SMTP delivery failed: 550 rejected")
            } else {
                DeliveryResult::sent("<new@example.com>", "Reply sent")
            }
        }
    }

    fn mailbox_with_19() -> FakeMailbox {
        FakeMailbox::default().with(
            19,
            &message(
                &[
                    ("From", "Jane Doe <jane@example.com>"),
                    ("Subject", "Meeting"),
                    ("Date", "Tue, 2 Jan 2024 15:04:00 +0000"),
                    ("Message-ID", "<m19@example.com>"),
                    ("References", "<m1@example.com> <m2@example.com>"),
                ],
                "line1\nline2",
            ),
        )
    }

    fn request(uid: u32, body: &str, include_quote: bool) -> ReplyRequest {
        ReplyRequest {
            uid,
            body: body.to_owned(),
            include_quote,
        }
    }

    #[test]
    fn subject_prefix_is_not_doubled() {
        assert_eq!(reply_subject("Meeting"), "Re: Meeting");
        assert_eq!(reply_subject("Re: Meeting"), "Re: Meeting");
        assert_eq!(reply_subject("RE: Meeting"), "Re: RE: Meeting");
    }

    #[test]
    fn quotes_each_line() {
        assert_eq!(quote_body("line1\nline2"), "> line1\n> line2");
        assert_eq!(quote_body("a\r\nb"), "> a\n> b");
    }

    #[test]
    fn reply_address_extraction() {
        assert_eq!(
            extract_reply_address("Jane Doe <jane@example.com>").as_deref(),
            Some("jane@example.com")
        );
        assert_eq!(
            extract_reply_address("jane@example.com").as_deref(),
            Some("jane@example.com")
        );
        assert_eq!(
            extract_reply_address("\"Support\" support@example.com (bot)").as_deref(),
            Some("support@example.com")
        );
        assert_eq!(
            extract_reply_address("Jane <jane@example.com").as_deref(),
            Some("jane@example.com")
        );
        assert_eq!(extract_reply_address("Jane Doe"), None);
        assert_eq!(extract_reply_address("Jane <nobody>"), None);
    }

    #[test]
    fn body_validation() {
        assert!(validate_reply_body("Thanks!").is_ok());
        assert!(matches!(
            validate_reply_body("  \n"),
            Err(AppError::InvalidInput(_))
        ));
        let long = "x".repeat(super::MAX_REPLY_BODY_CHARS + 1);
        assert!(matches!(
            validate_reply_body(&long),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn attribution_uses_formatted_date_or_raw_header() {
        let body = build_reply_body(
            "Sure",
            Some("Tue, 2 Jan 2024 15:04:00 +0000"),
            "Jane <jane@x>",
            "hi",
        );
        assert_eq!(
            body,
            "Sure\n\n---\nOn Tue, Jan 2, 2024, 3:04 PM, Jane <jane@x> wrote:\n> hi"
        );

        let body = build_reply_body("Sure", Some("sometime"), "jane@x", "hi");
        assert_eq!(body, "Sure\n\n---\nOn sometime, jane@x wrote:\n> hi");
        assert!(!body.contains("1970"));

        let body = build_reply_body("Sure", None, "jane@x", "hi");
        assert!(body.contains("On an unknown date, jane@x wrote:"));
    }

    #[tokio::test]
    async fn reply_without_quote_threads_onto_original() {
        let mailbox = mailbox_with_19();
        let sender = RecordingSender::default();

        let result = compose_and_send(&mailbox, &sender, &request(19, "Thanks!", false))
            .await
            .expect("no transport error");

        assert!(result.success);
        let sent = sender.sent.lock().expect("lock");
        assert_eq!(sent.len(), 1);
        let out = &sent[0];
        assert_eq!(out.to, vec!["jane@example.com"]);
        assert_eq!(out.subject, "Re: Meeting");
        assert_eq!(out.body, "Thanks!");
        assert_eq!(out.in_reply_to.as_deref(), Some("<m19@example.com>"));
        assert_eq!(
            out.references,
            vec!["<m1@example.com>", "<m2@example.com>", "<m19@example.com>"]
        );
    }

    #[tokio::test]
    async fn reply_with_quote_appends_original() {
        let mailbox = mailbox_with_19();
        let sender = RecordingSender::default();

        compose_and_send(&mailbox, &sender, &request(19, "Thanks!", true))
            .await
            .expect("no transport error");

        let sent = sender.sent.lock().expect("lock");
        assert!(sent[0].body.starts_with("Thanks!\n\n---\nOn "));
        assert!(sent[0].body.ends_with("wrote:\n> line1\n> line2"));
    }

    #[tokio::test]
    async fn missing_target_is_failure_result() {
        let mailbox = FakeMailbox::default();
        let sender = RecordingSender::default();

        let result = compose_and_send(&mailbox, &sender, &request(42, "hello", true))
            .await
            .expect("no transport error");

        assert!(!result.success);
        assert!(result.message_id.is_empty());
        assert!(result.message.contains("not found"));
        assert!(sender.sent.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn undeterminable_address_is_failure_result() {
        let mailbox = FakeMailbox::default().with(
            7,
            &message(&[("From", "Jane Doe"), ("Subject", "Hi")], "body"),
        );
        let sender = RecordingSender::default();

        let result = compose_and_send(&mailbox, &sender, &request(7, "hello", true))
            .await
            .expect("no transport error");

        assert!(!result.success);
        assert!(result.message.contains("could not determine reply address"));
        assert!(sender.sent.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn sender_failure_is_passed_through() {
        let mailbox = mailbox_with_19();
        let sender = RecordingSender {
            fail: true,
            ..RecordingSender::default()
        };

        let result = compose_and_send(&mailbox, &sender, &request(19, "hello", false))
            .await
            .expect("no transport error");

        assert!(!result.success);
        assert!(result.message.contains("550"));
    }

    #[tokio::test]
    async fn connection_error_propagates() {
        let mailbox = FakeMailbox {
            fail_connect: true,
            ..FakeMailbox::default()
        };
        let sender = RecordingSender::default();

        let err = compose_and_send(&mailbox, &sender, &request(19, "hello", false))
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::Timeout(_)));
    }
}
