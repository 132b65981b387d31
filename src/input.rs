//! Operator console input.
//!
//! [`LineCollector`] turns a line-oriented reader into the stream of text
//! the protocol sends.  The stream ends on EOF or on two consecutive blank
//! lines.  A single blank line followed by more text is kept as an empty
//! line.
//!
//! [`pump`] forwards every collected line to a [`LineSink`] and closes the
//! sink when input ends.

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::config::Config;
use crate::connection::{Connection, EndpointError};

/// Line reader with two-blank-line termination.
#[derive(Debug)]
pub struct LineCollector<R> {
    reader: R,
    /// A blank line has been read and not yet emitted.
    pending_blank: bool,
    /// A line read after a pending blank, emitted on the next call.
    held: Option<String>,
    done: bool,
}

impl<R: AsyncBufRead + Unpin> LineCollector<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending_blank: false,
            held: None,
            done: false,
        }
    }

    /// Next line including its trailing newline, or `None` once input ended.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.held.take() {
            return Ok(Some(line));
        }
        if self.done {
            return Ok(None);
        }

        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                self.done = true;
                return Ok(None);
            }
            if !line.ends_with('\n') {
                line.push('\n');
            }

            if line.trim_end_matches(['\r', '\n']).is_empty() {
                if self.pending_blank {
                    self.done = true;
                    return Ok(None);
                }
                self.pending_blank = true;
                continue;
            }

            if std::mem::take(&mut self.pending_blank) {
                self.held = Some(line);
                return Ok(Some("\n".to_owned()));
            }
            return Ok(Some(line));
        }
    }
}

/// Destination for operator lines.
pub trait LineSink {
    /// Queue one line for delivery.
    fn send_line(&self, line: &str) -> impl Future<Output = Result<(), EndpointError>> + Send;

    /// Input ended; start the termination handshake.
    fn finish(&self) -> impl Future<Output = ()> + Send;
}

/// A client's single connection, closed with the configured drain timeout.
#[derive(Debug, Clone)]
pub struct ConnectionSink {
    pub conn: Arc<Connection>,
    pub config: Config,
}

impl LineSink for ConnectionSink {
    async fn send_line(&self, line: &str) -> Result<(), EndpointError> {
        self.conn.enqueue(line.as_bytes()).await.map(|_| ())
    }

    async fn finish(&self) {
        self.conn.close(&self.config).await;
    }
}

/// Forward lines from `lines` to `sink` until input ends, then finish.
///
/// Returns the number of lines forwarded.  Stops early, without finishing,
/// if the sink is already closing.
pub async fn pump<R, S>(mut lines: LineCollector<R>, sink: &S) -> Result<usize, EndpointError>
where
    R: AsyncBufRead + Unpin,
    S: LineSink,
{
    let mut count = 0;
    while let Some(line) = lines.next_line().await? {
        match sink.send_line(&line).await {
            Ok(()) => count += 1,
            Err(EndpointError::Closing(id)) => {
                log::info!("[input] connection {id} closed by peer; input ignored");
                return Ok(count);
            }
            Err(e) => return Err(e),
        }
    }
    log::debug!("[input] end of input after {count} line(s)");
    sink.finish().await;
    Ok(count)
}
