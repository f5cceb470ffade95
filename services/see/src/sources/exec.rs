//! Child-process source: line-delimited JSON over a spawned program's stdio.

use super::stream::StreamSource;
use super::SourceError;
use crate::visualizer::Visualizer;
use see_protocol::Envelope;
use std::process::Stdio;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::info;

/// A stream source wrapping a spawned child's stdout/stdin. The child's
/// stderr passes straight through to the server's stderr.
///
/// The child is detached: it gets its own process group on unix so terminal
/// signals aimed at the server never reach it, and it is not killed when the
/// server exits; it may outlive a restart.
pub struct ExecSource {
    io: StreamSource<ChildStdout, ChildStdin>,
    _child: Child,
}

impl ExecSource {
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, SourceError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        #[cfg(unix)]
        command.process_group(0);

        let spawn_err = |source: std::io::Error| SourceError::Spawn {
            program: program.to_owned(),
            source,
        };
        let mut child = command.spawn().map_err(spawn_err)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_err(std::io::Error::other("child stdout unavailable")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_err(std::io::Error::other("child stdin unavailable")))?;

        info!(program = %program, pid = child.id().unwrap_or_default(), "child source started");
        Ok(ExecSource {
            io: StreamSource::new(stdout, stdin),
            _child: child,
        })
    }

    pub async fn run(&self, vis: &Visualizer) -> Result<(), SourceError> {
        self.io.run(vis).await
    }

    pub async fn accept(&self, batch: &[Envelope]) {
        self.io.accept(batch).await;
    }
}
