//! gmail-imap-mcp-rs: Gmail/IMAP MCP server
//!
//! Exposes one IMAP/SMTP account (Gmail by default) as a fixed set of Model
//! Context Protocol tools: list, search, read, thread, send, reply, flag and
//! download attachments. Served over stdio by default, or streamable HTTP.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading, CLI and transport setup
//! - [`config`]: Environment-driven configuration for the account and timeouts
//! - [`errors`]: Application error model with MCP error mapping
//! - [`headers`]: Folding of raw header blocks into a case-insensitive map
//! - [`imap`]: IMAP transport/session operations with timeout wrappers
//! - [`mailbox`]: Per-call IMAP connections behind the `MailboxReader` seam
//! - [`message_id`]: Message-ID token and UID parsing, header search criteria
//! - [`mime`]: Message parsing, body extraction, sanitization and attachments
//! - [`models`]: Input/output DTOs and schema-bearing types
//! - [`reply`]: Threaded reply composition
//! - [`server`]: MCP tool handlers with validation and orchestration
//! - [`smtp`]: Outgoing mail over `lettre` behind the `MailSender` seam
//! - [`thread`]: Client-side conversation reconstruction

mod config;
mod errors;
mod headers;
mod imap;
mod mailbox;
mod message_id;
mod mime;
mod models;
mod reply;
mod server;
mod smtp;
mod thread;

use std::net::SocketAddr;

use clap::{Parser, ValueEnum};
use config::ServerConfig;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::server::GmailMcpServer;

/// MCP transport to serve on
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// Newline-delimited JSON-RPC over stdin/stdout
    Stdio,
    /// Streamable HTTP under `/mcp`
    Http,
}

#[derive(Debug, Parser)]
#[command(name = "gmail-imap-mcp-rs", version, about = "Gmail/IMAP MCP server")]
struct Cli {
    /// Transport to serve the MCP protocol on
    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,

    /// Listen address for the HTTP transport
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,
}

/// Application entry point
///
/// Initializes tracing from environment, loads config, and serves the MCP
/// server. Logs go to stderr; stdout belongs to the stdio transport.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// MAIL_USER=user@gmail.com \
/// MAIL_PASS=app-password \
/// cargo run -- --transport http --bind 127.0.0.1:8080
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load_from_env()?;
    let server = GmailMcpServer::new(config)?;

    match cli.transport {
        Transport::Stdio => {
            tracing::info!("serving MCP over stdio");
            let service = server.serve(stdio()).await?;
            service.waiting().await?;
        }
        Transport::Http => serve_http(server, cli.bind).await?,
    }
    Ok(())
}

/// Serve streamable HTTP under `/mcp` until Ctrl-C
async fn serve_http(
    server: GmailMcpServer,
    bind: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );
    let router = axum::Router::new().nest_service("/mcp", service);

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
        }
        trigger.cancel();
    });

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %bind, "serving MCP over streamable HTTP at /mcp");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled_owned().await })
        .await?;
    Ok(())
}
