//! Server-Sent Events reader for streaming provider responses.
//!
//! Yields the `data:` payload of each event. Events split across network
//! chunks are reassembled; `event:`, `id:`, `retry:` and comment lines are
//! ignored.

use super::LlmError;
use async_stream::stream;
use futures::stream::{Stream, TryStreamExt};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::io::StreamReader;

/// Read SSE data payloads from a response body.
///
/// `idle_timeout` bounds the wait for each line; expiry ends the stream with a
/// network error.
pub fn sse_data_stream(
    response: reqwest::Response,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<String, LlmError>> + Send {
    let bytes = response.bytes_stream().map_err(std::io::Error::other);
    sse_data_lines(BufReader::new(StreamReader::new(bytes)), idle_timeout)
}

/// Same as [`sse_data_stream`] over any buffered reader
pub fn sse_data_lines<R>(
    reader: R,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<String, LlmError>> + Send
where
    R: AsyncBufRead + Unpin + Send,
{
    stream! {
        let mut lines = reader.lines();
        let mut data = String::new();

        loop {
            let line = match tokio::time::timeout(idle_timeout, lines.next_line()).await {
                Ok(Ok(line)) => line,
                Ok(Err(e)) => {
                    yield Err(LlmError::network(format!("Stream interrupted: {e}")));
                    return;
                }
                Err(_) => {
                    yield Err(LlmError::network(format!(
                        "No data received for {}s",
                        idle_timeout.as_secs()
                    )));
                    return;
                }
            };

            let Some(line) = line else { break };

            if line.is_empty() {
                // Blank line terminates an event
                if !data.is_empty() {
                    yield Ok(std::mem::take(&mut data));
                }
                continue;
            }

            if let Some(payload) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(payload.strip_prefix(' ').unwrap_or(payload));
            }
        }

        // Flush an event the server didn't terminate
        if !data.is_empty() {
            yield Ok(data);
        }
    }
}
