//! Newline-delimited JSON-RPC framing over the child's stdio (spec.md §4.A).
//!
//! Built on [`tokio_util::codec::LinesCodec`] rather than a hand-rolled
//! `BufReader::lines()` loop: its `new_with_max_length` constructor already
//! implements the "accept up to N bytes, reject larger lines with a discrete
//! error, resynchronize on the next newline" contract the spec calls for.

use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, ChildStdout};
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::warn;

use crate::error::AdapterError;

/// Decodes newline-delimited JSON lines from the child's stdout.
///
/// Empty lines are ignored (spec.md §4.A). Oversized lines surface once as a
/// logged warning and are otherwise skipped — [`LinesCodec`] already discards
/// the offending buffered bytes and resumes on the next newline, so the
/// stream keeps producing subsequent, well-formed lines.
pub struct FrameReader {
    inner: FramedRead<ChildStdout, LinesCodec>,
}

impl FrameReader {
    pub fn new(stdout: ChildStdout, max_frame_bytes: usize) -> Self {
        Self {
            inner: FramedRead::new(stdout, LinesCodec::new_with_max_length(max_frame_bytes)),
        }
    }

    /// Read the next decoded JSON value, transparently skipping blank and
    /// oversized lines. Returns `Ok(None)` on clean EOF.
    pub async fn next_message(&mut self) -> Result<Option<Value>, AdapterError> {
        loop {
            match self.inner.next().await {
                None => return Ok(None),
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(&line) {
                        Ok(value) => return Ok(Some(value)),
                        Err(err) => {
                            warn!(error = %err, "received unparseable line from codex app-server stdout");
                            continue;
                        }
                    }
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!("codex app-server emitted a line exceeding the frame size limit; discarding and resynchronizing");
                    continue;
                }
                Some(Err(LinesCodecError::Io(err))) => {
                    return Err(AdapterError::Transport(format!(
                        "error reading codex app-server stdout: {err}"
                    )));
                }
            }
        }
    }
}

/// Encodes JSON-RPC messages to the child's stdin, one line per message.
///
/// A plain `AsyncWriteExt` writer rather than a `FramedWrite`/`Sink`: the
/// encoder side never needs a size cap or line-oriented buffering, only
/// "append exactly one newline, never embed one in the payload" (spec.md
/// §4.A), which `serde_json::to_string` already guarantees for any JSON
/// value.
pub struct FrameWriter {
    stdin: ChildStdin,
}

impl FrameWriter {
    pub fn new(stdin: ChildStdin) -> Self {
        Self { stdin }
    }

    pub async fn send(&mut self, message: &impl Serialize) -> Result<(), AdapterError> {
        let line = serde_json::to_string(message).map_err(AdapterError::Serialize)?;
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|err| AdapterError::Transport(format!("error writing to codex app-server stdin: {err}")))?;
        self.stdin
            .write_all(b"\n")
            .await
            .map_err(|err| AdapterError::Transport(format!("error writing to codex app-server stdin: {err}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|err| AdapterError::Transport(format!("error flushing codex app-server stdin: {err}")))
    }
}
