//! Configuration for the IMAP/SMTP account and server settings
//!
//! All configuration is loaded from environment variables prefixed with
//! `MAIL_`. Defaults target Gmail with an app password; any IMAP/SMTP
//! provider works by overriding the host and port keys.

use std::env;

use secrecy::SecretString;

use crate::errors::{AppError, AppResult};

/// Server-wide configuration
///
/// Holds the single mailbox account and global settings. Shared with tool
/// handlers via `Arc`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// IMAP server hostname
    pub imap_host: String,
    /// IMAP server port (993 for implicit TLS)
    pub imap_port: u16,
    /// Whether to use TLS (insecure connections are rejected at connect time)
    pub imap_secure: bool,
    /// SMTP server hostname
    pub smtp_host: String,
    /// SMTP port; 465 uses implicit TLS, anything else STARTTLS
    pub smtp_port: u16,
    /// Username for IMAP and SMTP authentication (also the From address)
    pub user: String,
    /// Password stored in a type that prevents accidental logging
    pub pass: SecretString,
    /// Optional display name for outgoing mail
    pub from_name: Option<String>,
    /// Mailbox all tools operate on
    pub mailbox: String,
    /// Whether write tools (send, reply, flag updates) are enabled
    pub write_enabled: bool,
    /// TCP connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// TLS handshake, greeting and LOGIN timeout in milliseconds
    pub greeting_timeout_ms: u64,
    /// Per-command socket timeout in milliseconds
    pub socket_timeout_ms: u64,
}

impl ServerConfig {
    /// Load all configuration from process environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `MAIL_USER`/`MAIL_PASS` are missing or any
    /// value is malformed.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// MAIL_USER=user@gmail.com
    /// MAIL_PASS=app-password
    /// MAIL_MAILBOX=INBOX
    /// MAIL_WRITE_ENABLED=true
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        Self::load_with(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    ///
    /// Unset and empty values are treated alike and fall back to defaults.
    pub fn load_with<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let user = get("MAIL_USER").ok_or_else(|| missing("MAIL_USER"))?;
        let pass = get("MAIL_PASS").ok_or_else(|| missing("MAIL_PASS"))?;
        let mailbox = get("MAIL_MAILBOX").unwrap_or_else(|| "INBOX".to_owned());
        if mailbox.chars().any(|ch| ch.is_ascii_control()) {
            return Err(AppError::invalid(
                "MAIL_MAILBOX must not contain control characters",
            ));
        }

        Ok(Self {
            imap_host: get("MAIL_IMAP_HOST").unwrap_or_else(|| "imap.gmail.com".to_owned()),
            imap_port: parse_num("MAIL_IMAP_PORT", get("MAIL_IMAP_PORT"), 993)?,
            imap_secure: parse_bool("MAIL_IMAP_SECURE", get("MAIL_IMAP_SECURE"), true)?,
            smtp_host: get("MAIL_SMTP_HOST").unwrap_or_else(|| "smtp.gmail.com".to_owned()),
            smtp_port: parse_num("MAIL_SMTP_PORT", get("MAIL_SMTP_PORT"), 465)?,
            user,
            pass: SecretString::new(pass.into()),
            from_name: get("MAIL_FROM_NAME"),
            mailbox,
            write_enabled: parse_bool("MAIL_WRITE_ENABLED", get("MAIL_WRITE_ENABLED"), true)?,
            connect_timeout_ms: parse_num(
                "MAIL_CONNECT_TIMEOUT_MS",
                get("MAIL_CONNECT_TIMEOUT_MS"),
                10_000,
            )?,
            greeting_timeout_ms: parse_num(
                "MAIL_GREETING_TIMEOUT_MS",
                get("MAIL_GREETING_TIMEOUT_MS"),
                10_000,
            )?,
            socket_timeout_ms: parse_num(
                "MAIL_SOCKET_TIMEOUT_MS",
                get("MAIL_SOCKET_TIMEOUT_MS"),
                60_000,
            )?,
        })
    }
}

fn missing(key: &str) -> AppError {
    AppError::InvalidInput(format!("missing required environment variable {key}"))
}

/// Parse a boolean setting with flexible values
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set to an unrecognized value.
fn parse_bool(key: &str, value: Option<String>, default: bool) -> AppResult<bool> {
    match value {
        Some(v) => parse_bool_value(&v).ok_or_else(|| {
            AppError::InvalidInput(format!("invalid boolean environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a numeric setting with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but does not parse as `T`.
fn parse_num<T>(key: &str, value: Option<String>, default: T) -> AppResult<T>
where
    T: std::str::FromStr,
{
    match value {
        Some(v) => v.trim().parse::<T>().map_err(|_| {
            AppError::InvalidInput(format!("invalid numeric environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::{ServerConfig, parse_bool_value};

    fn load(pairs: &[(&str, &str)]) -> Result<ServerConfig, crate::errors::AppError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ServerConfig::load_with(|key| vars.get(key).cloned())
    }

    #[test]
    fn parse_bool_value_accepts_common_truthy_and_falsy_values() {
        for truthy in ["1", "true", "TRUE", " yes ", "Y", "on"] {
            assert_eq!(parse_bool_value(truthy), Some(true));
        }

        for falsy in ["0", "false", "FALSE", " no ", "N", "off"] {
            assert_eq!(parse_bool_value(falsy), Some(false));
        }
    }

    #[test]
    fn parse_bool_value_rejects_unrecognized_values() {
        for invalid in ["", "2", "maybe", "enabled", "disabled"] {
            assert_eq!(parse_bool_value(invalid), None);
        }
    }

    #[test]
    fn defaults_target_gmail() {
        let config = load(&[("MAIL_USER", "me@gmail.com"), ("MAIL_PASS", "app-pass")])
            .expect("config loads");
        assert_eq!(config.imap_host, "imap.gmail.com");
        assert_eq!(config.imap_port, 993);
        assert!(config.imap_secure);
        assert_eq!(config.smtp_host, "smtp.gmail.com");
        assert_eq!(config.smtp_port, 465);
        assert_eq!(config.mailbox, "INBOX");
        assert!(config.write_enabled);
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert_eq!(config.pass.expose_secret(), "app-pass");
    }

    #[test]
    fn overrides_and_empty_values() {
        let config = load(&[
            ("MAIL_USER", "me@example.com"),
            ("MAIL_PASS", "secret"),
            ("MAIL_IMAP_HOST", "imap.example.com"),
            ("MAIL_SMTP_PORT", "587"),
            ("MAIL_WRITE_ENABLED", "off"),
            ("MAIL_MAILBOX", "  "),
            ("MAIL_FROM_NAME", "Me"),
        ])
        .expect("config loads");
        assert_eq!(config.imap_host, "imap.example.com");
        assert_eq!(config.smtp_port, 587);
        assert!(!config.write_enabled);
        assert_eq!(config.mailbox, "INBOX");
        assert_eq!(config.from_name.as_deref(), Some("Me"));
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let err = load(&[("MAIL_USER", "me@gmail.com")]).expect_err("must fail");
        assert!(err.to_string().contains("MAIL_PASS"));
    }

    #[test]
    fn malformed_port_is_rejected() {
        let err = load(&[
            ("MAIL_USER", "me@gmail.com"),
            ("MAIL_PASS", "x"),
            ("MAIL_IMAP_PORT", "99999"),
        ])
        .expect_err("must fail");
        assert!(err.to_string().contains("MAIL_IMAP_PORT"));
    }
}
