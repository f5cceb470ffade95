//! Message sources: the upstream producers of envelope batches.
//!
//! Exactly one source is active per server. Each variant has two sides: an
//! emit loop that blocks on its transport and feeds batches into the engine,
//! and an accept path that forwards browser-originated batches back out.
//! The emit loop returns `Ok(())` on clean end-of-stream; only a broken
//! transport is an error.

pub mod exec;
pub mod mqhub;
pub mod mqtt;
pub mod stream;

use crate::visualizer::Visualizer;
use see_protocol::Envelope;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("invalid bus url {url}: {reason}")]
    BadUrl { url: String, reason: String },
    #[error("bus connection failed: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("bus request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// The active message source, selected from the CLI at startup.
pub enum Source {
    Stdio(stream::StreamSource<tokio::io::Stdin, tokio::io::Stdout>),
    Exec(exec::ExecSource),
    Bus(mqtt::BusSource),
    Translator(mqhub::TranslatorSource),
}

impl Source {
    /// Runs the emit loop until the transport ends or breaks.
    pub async fn run(&self, vis: &Visualizer) -> Result<(), SourceError> {
        match self {
            Source::Stdio(s) => s.run(vis).await,
            Source::Exec(s) => s.run(vis).await,
            Source::Bus(s) => s.run(vis).await,
            Source::Translator(s) => s.run(vis).await,
        }
    }

    /// Forwards a browser-originated batch out through the transport.
    /// Failures are local: logged, never fatal.
    pub async fn accept(&self, batch: &[Envelope]) {
        match self {
            Source::Stdio(s) => s.accept(batch).await,
            Source::Exec(s) => s.accept(batch).await,
            Source::Bus(s) => s.accept(batch).await,
            Source::Translator(s) => s.accept(batch).await,
        }
    }
}
