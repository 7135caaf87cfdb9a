//! IMAP transport and session operations
//!
//! Provides timeout-bounded wrappers around `async-imap` operations. All network
//! calls are enforced to use TLS, and timeouts are derived from server config.

use std::sync::Arc;
use std::time::Duration;

use async_imap::types::{Fetch, Flag};
use async_imap::{Client, Session};
use futures::TryStreamExt;
use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::models::FlagState;

/// Type alias for authenticated IMAP session over TLS
pub type ImapSession = Session<tokio_rustls::client::TlsStream<TcpStream>>;

/// Header fields requested by header-only fetches
pub const SUMMARY_HEADER_FIELDS: &str =
    "DATE FROM TO CC SUBJECT MESSAGE-ID IN-REPLY-TO REFERENCES";

fn socket_timeout(server: &ServerConfig) -> Duration {
    Duration::from_millis(server.socket_timeout_ms)
}

/// Connect to IMAP server and authenticate
///
/// Performs full connection sequence with timeouts:
/// 1. TCP connect
/// 2. TLS handshake with webpki root certificates
/// 3. Read IMAP greeting
/// 4. LOGIN authentication
///
/// # Security
///
/// Rejects insecure connections (`imap_secure: false`) to prevent password
/// exposure.
///
/// # Errors
///
/// - `InvalidInput` if TLS is disabled or hostname is invalid for TLS SNI
/// - `Timeout` if any connection phase times out
/// - `AuthFailed` if authentication fails
/// - `Internal` for TCP, TLS, or greeting failures
pub async fn connect_authenticated(server: &ServerConfig) -> AppResult<ImapSession> {
    if !server.imap_secure {
        return Err(AppError::InvalidInput(
            "insecure IMAP is not supported; set MAIL_IMAP_SECURE=true".to_owned(),
        ));
    }

    let connect_duration = Duration::from_millis(server.connect_timeout_ms);
    let greeting_duration = Duration::from_millis(server.greeting_timeout_ms);

    let tcp = timeout(
        connect_duration,
        TcpStream::connect((server.imap_host.as_str(), server.imap_port)),
    )
    .await
    .map_err(|_| AppError::Timeout("tcp connect timeout".to_owned()))
    .and_then(|r| r.map_err(|e| AppError::Internal(format!("tcp connect failed: {e}"))))?;

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let server_name = ServerName::try_from(server.imap_host.clone())
        .map_err(|_| AppError::InvalidInput("invalid IMAP host for TLS SNI".to_owned()))?;
    let tls_stream = timeout(greeting_duration, connector.connect(server_name, tcp))
        .await
        .map_err(|_| AppError::Timeout("TLS handshake timeout".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Internal(format!("TLS handshake failed: {e}"))))?;

    let mut client = Client::new(tls_stream);
    let greeting = timeout(greeting_duration, client.read_response())
        .await
        .map_err(|_| AppError::Timeout("IMAP greeting timeout".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Internal(format!("IMAP greeting failed: {e}"))))?;

    if greeting.is_none() {
        return Err(AppError::Internal(
            "IMAP server closed connection before greeting".to_owned(),
        ));
    }

    let pass = server.pass.expose_secret();
    let session = timeout(greeting_duration, client.login(server.user.as_str(), pass))
        .await
        .map_err(|_| AppError::Timeout("IMAP login timeout".to_owned()))
        .and_then(|r| {
            r.map_err(|(e, _)| {
                let msg = e.to_string();
                if msg.to_ascii_lowercase().contains("auth") || msg.contains("LOGIN") {
                    AppError::AuthFailed(msg)
                } else {
                    AppError::Internal(msg)
                }
            })
        })?;

    tracing::debug!(host = %server.imap_host, "IMAP session authenticated");
    Ok(session)
}

/// Log out and drop the connection
///
/// Teardown failures are logged only; the socket is closed on drop either way.
pub async fn logout(server: &ServerConfig, mut session: ImapSession) {
    match timeout(socket_timeout(server), session.logout()).await {
        Ok(Ok(())) => tracing::debug!("IMAP session closed"),
        Ok(Err(e)) => tracing::debug!(error = %e, "IMAP logout failed"),
        Err(_) => tracing::debug!("IMAP logout timed out"),
    }
}

/// Encode a mailbox name as modified UTF-7 for the wire
fn wire_mailbox(mailbox: &str) -> String {
    utf7_imap::encode_utf7_imap(mailbox.to_owned())
}

/// Select mailbox in read-only mode
///
/// Uses `EXAMINE` so fetching never marks messages as read.
pub async fn select_mailbox_readonly(
    server: &ServerConfig,
    session: &mut ImapSession,
    mailbox: &str,
) -> AppResult<()> {
    timeout(socket_timeout(server), session.examine(wire_mailbox(mailbox)))
        .await
        .map_err(|_| AppError::Timeout(format!("EXAMINE timed out for mailbox '{mailbox}'")))
        .and_then(|r| {
            r.map_err(|e| AppError::NotFound(format!("cannot examine mailbox '{mailbox}': {e}")))
        })?;
    Ok(())
}

/// Select mailbox in read-write mode
pub async fn select_mailbox_readwrite(
    server: &ServerConfig,
    session: &mut ImapSession,
    mailbox: &str,
) -> AppResult<()> {
    timeout(socket_timeout(server), session.select(wire_mailbox(mailbox)))
        .await
        .map_err(|_| AppError::Timeout(format!("SELECT timed out for mailbox '{mailbox}'")))
        .and_then(|r| {
            r.map_err(|e| AppError::NotFound(format!("cannot select mailbox '{mailbox}': {e}")))
        })?;
    Ok(())
}

/// Run `UID FETCH` over a UID set
///
/// UIDs that no longer exist are simply absent from the result.
pub async fn uid_fetch(
    server: &ServerConfig,
    session: &mut ImapSession,
    uids: &[u32],
    query: &str,
) -> AppResult<Vec<Fetch>> {
    if uids.is_empty() {
        return Ok(Vec::new());
    }
    let set = uid_set(uids);
    let stream = timeout(socket_timeout(server), session.uid_fetch(set, query))
        .await
        .map_err(|_| AppError::Timeout("UID FETCH timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Internal(format!("uid fetch failed: {e}"))))?;
    timeout(socket_timeout(server), stream.try_collect::<Vec<Fetch>>())
        .await
        .map_err(|_| AppError::Timeout("UID FETCH stream timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Internal(format!("uid fetch stream failed: {e}"))))
}

/// Comma-separated UID set
fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Flag state of a fetched message
pub fn flag_state(fetch: &Fetch) -> FlagState {
    let mut state = FlagState::default();
    for flag in fetch.flags() {
        match flag {
            Flag::Seen => state.is_read = true,
            Flag::Flagged => state.is_starred = true,
            _ => {}
        }
    }
    state
}

/// INTERNALDATE as Unix seconds
pub fn internal_date(fetch: &Fetch) -> Option<i64> {
    fetch.internal_date().map(|d| d.timestamp())
}

/// Search for messages matching query
///
/// Runs `UID SEARCH` and returns matching UIDs in descending order (newest
/// first).
pub async fn uid_search(
    server: &ServerConfig,
    session: &mut ImapSession,
    query: &str,
) -> AppResult<Vec<u32>> {
    let set = timeout(socket_timeout(server), session.uid_search(query))
        .await
        .map_err(|_| AppError::Timeout("UID SEARCH timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Internal(format!("uid search failed: {e}"))))?;
    let mut uids: Vec<u32> = set.into_iter().collect();
    uids.sort_unstable_by(|a, b| b.cmp(a));
    Ok(uids)
}

/// Store flags on a message
///
/// Runs `UID STORE` with a flag query string. Use `+FLAGS.SILENT` to add
/// flags or `-FLAGS.SILENT` to remove flags.
pub async fn uid_store(
    server: &ServerConfig,
    session: &mut ImapSession,
    uid: u32,
    query: &str,
) -> AppResult<()> {
    let stream = timeout(
        socket_timeout(server),
        session.uid_store(uid.to_string(), query),
    )
    .await
    .map_err(|_| AppError::Timeout("UID STORE timed out".to_owned()))
    .and_then(|r| r.map_err(|e| AppError::Internal(format!("uid store failed: {e}"))))?;
    let _: Vec<Fetch> = timeout(socket_timeout(server), stream.try_collect())
        .await
        .map_err(|_| AppError::Timeout("UID STORE stream timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Internal(format!("uid store stream failed: {e}"))))?;
    Ok(())
}
