//! Line-delimited JSON stream source, used for stdio and child processes.

use super::SourceError;
use crate::visualizer::Visualizer;
use see_protocol::{encode_batch, BatchDecoder, Envelope};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;

const READ_CHUNK: usize = 8 * 1024;

/// Reads JSON-array batches from `reader`, writes browser batches to
/// `writer` one newline-terminated array per batch. End-of-stream is the
/// reader's EOF.
pub struct StreamSource<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
}

impl<R, W> StreamSource<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        StreamSource {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }

    pub async fn run(&self, vis: &Visualizer) -> Result<(), SourceError> {
        let mut reader = self.reader.lock().await;
        let mut decoder = BatchDecoder::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                if decoder.finish().is_err() {
                    warn!("stream ended inside a message batch; dropping partial input");
                }
                return Ok(());
            }
            decoder.feed(&chunk[..n]);
            loop {
                match decoder.next_batch() {
                    Ok(Some(batch)) => vis.recv_from_source(batch).await,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed batch from stream");
                        decoder.resync();
                    }
                }
            }
        }
    }

    pub async fn accept(&self, batch: &[Envelope]) {
        let frame = match encode_batch(batch) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to encode batch for stream sink");
                return;
            }
        };
        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_all(frame.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!(error = %e, "failed to forward batch to stream sink");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn reads_batches_until_eof_then_ends_cleanly() {
        let (vis, _client_rx) = Visualizer::new();
        let (mut feeder, source_end) = tokio::io::duplex(1024);
        let source = StreamSource::new(source_end, tokio::io::sink());

        feeder
            .write_all(b"[{\"action\":\"object\",\"object\":{\"id\":\"a\",\"x\":1}}]\n")
            .await
            .expect("write");
        drop(feeder); // EOF

        source.run(&vis).await.expect("clean end of stream");
        let objects = vis.states.objects().await;
        assert_eq!(objects["a"].get("x"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn malformed_line_is_dropped_and_stream_continues() {
        let (vis, _client_rx) = Visualizer::new();
        let (mut feeder, source_end) = tokio::io::duplex(1024);
        let source = StreamSource::new(source_end, tokio::io::sink());

        feeder.write_all(b"{garbage}\n").await.expect("write");
        feeder
            .write_all(b"[{\"action\":\"data\",\"id\":\"t\",\"value\":7}]\n")
            .await
            .expect("write");
        drop(feeder);

        source.run(&vis).await.expect("clean end of stream");
        assert_eq!(vis.states.data_values().await.get("t"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn accept_writes_one_array_per_line() {
        let (reader, writer) = tokio::io::duplex(1024);
        let source = StreamSource::new(tokio::io::empty(), writer);

        let batch: Vec<Envelope> =
            serde_json::from_value(json!([{"action": "move", "dir": {"x": 1}}])).expect("batch");
        source.accept(&batch).await;
        drop(source);

        let mut out = String::new();
        let mut reader = tokio::io::BufReader::new(reader);
        tokio::io::AsyncReadExt::read_to_string(&mut reader, &mut out)
            .await
            .expect("read");
        assert_eq!(out, "[{\"action\":\"move\",\"dir\":{\"x\":1}}]\n");
    }
}
