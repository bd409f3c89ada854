//! TCP connection with newline-delimited frame I/O.
//!
//! The pool speaks JSON over TCP, one message per line. [`Connection`]
//! wraps the stream in buffered halves and converts between lines and
//! [`Frame`]s. The [`Transport`] trait abstracts the frame I/O so the
//! session can run over channels in tests.
//!
//! The session task is the sole writer, and each frame is written and
//! flushed as a unit, so frame boundaries are never interleaved.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::error::{StratumError, StratumResult};
use super::messages::Frame;

/// Frame-level I/O for the pool protocol.
#[async_trait]
pub trait Transport: Send {
    /// Read one frame.
    ///
    /// Returns `Ok(None)` exactly once, on clean connection close (EOF).
    /// A line that is not a well-formed frame yields a recoverable
    /// [`StratumError::Protocol`]; the stream position advances past it.
    async fn read_frame(&mut self) -> StratumResult<Option<Frame>>;

    /// Write one frame followed by a newline, flushing immediately.
    async fn write_frame(&mut self, frame: &Frame) -> StratumResult<()>;
}

/// Buffered TCP connection to a pool.
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    line: String,
}

impl Connection {
    /// Wrap an established TCP stream.
    pub fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            line: String::with_capacity(4096),
        }
    }

    /// Connect to a pool.
    pub async fn connect(host: &str, port: u16) -> StratumResult<Self> {
        debug!(host, port, "connecting to pool");

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| StratumError::Connect(e.to_string()))?;

        debug!("connected");
        Ok(Self::new(stream))
    }
}

#[async_trait]
impl Transport for Connection {
    async fn read_frame(&mut self) -> StratumResult<Option<Frame>> {
        loop {
            // The line buffer persists across calls and read_line appends,
            // so a read cancelled mid-line (select racing another branch)
            // resumes without losing the partial line. The buffer is only
            // cleared once a complete line has been consumed.
            let n = self
                .reader
                .read_line(&mut self.line)
                .await
                .map_err(StratumError::Io)?;

            if n == 0 {
                return Ok(None);
            }

            let line = self.line.trim();
            if line.is_empty() {
                self.line.clear();
                continue;
            }

            trace!(rx = %line, "frame received");

            let result = match serde_json::from_str(line) {
                Ok(frame) => Ok(Some(frame)),
                Err(e) => Err(StratumError::Protocol(format!("bad frame: {e}: {line}"))),
            };
            self.line.clear();
            return result;
        }
    }

    async fn write_frame(&mut self, frame: &Frame) -> StratumResult<()> {
        let json = serde_json::to_string(frame)?;
        trace!(tx = %json, "frame sent");

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        Ok(())
    }
}

/// Channel-backed transport for deterministic session tests.
///
/// Create a pair with [`MockTransport::pair()`]; the transport is the
/// session's side, the handle is the test's side.
#[cfg(test)]
pub(crate) struct MockTransport {
    rx: tokio::sync::mpsc::UnboundedReceiver<Frame>,
    tx: tokio::sync::mpsc::UnboundedSender<Frame>,
}

/// Test-side handle for a [`MockTransport`].
#[cfg(test)]
pub(crate) struct MockTransportHandle {
    tx: Option<tokio::sync::mpsc::UnboundedSender<Frame>>,
    rx: tokio::sync::mpsc::UnboundedReceiver<Frame>,
}

#[cfg(test)]
impl MockTransport {
    pub fn pair() -> (Self, MockTransportHandle) {
        let (session_tx, handle_rx) = tokio::sync::mpsc::unbounded_channel();
        let (handle_tx, session_rx) = tokio::sync::mpsc::unbounded_channel();

        (
            MockTransport {
                rx: session_rx,
                tx: session_tx,
            },
            MockTransportHandle {
                tx: Some(handle_tx),
                rx: handle_rx,
            },
        )
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    async fn read_frame(&mut self) -> StratumResult<Option<Frame>> {
        Ok(self.rx.recv().await)
    }

    async fn write_frame(&mut self, frame: &Frame) -> StratumResult<()> {
        self.tx
            .send(frame.clone())
            .map_err(|_| StratumError::ConnectionClosed)
    }
}

#[cfg(test)]
impl MockTransportHandle {
    /// Feed a frame to the session.
    pub fn send(&self, frame: Frame) {
        self.tx
            .as_ref()
            .expect("transport closed")
            .send(frame)
            .expect("transport dropped");
    }

    /// Simulate peer disconnect: the session's next read returns EOF.
    pub fn disconnect(&mut self) {
        self.tx = None;
    }

    /// Receive a frame the session wrote.
    pub async fn recv(&mut self) -> Frame {
        self.rx.recv().await.expect("transport dropped")
    }

    /// Receive a frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_frame_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // echo server
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut conn = Connection::new(socket);
            while let Ok(Some(frame)) = conn.read_frame().await {
                conn.write_frame(&frame).await.unwrap();
            }
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut conn = Connection::new(stream);

        let request = Frame::request(1, "mining.subscribe", json!(["agent"]));
        conn.write_frame(&request).await.unwrap();

        let echoed = conn.read_frame().await.unwrap().unwrap();
        assert_eq!(echoed.id(), Some(1));
        assert_eq!(echoed.method(), Some("mining.subscribe"));
    }

    #[tokio::test]
    async fn test_bad_line_is_recoverable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"this is not json\n").await.unwrap();
            socket
                .write_all(b"{\"id\":null,\"method\":\"mining.notify\",\"params\":[]}\n")
                .await
                .unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut conn = Connection::new(stream);

        // first line fails as a protocol error
        let err = conn.read_frame().await.unwrap_err();
        assert!(err.is_recoverable());

        // the stream is still usable afterwards
        let frame = conn.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.method(), Some("mining.notify"));
    }

    #[tokio::test]
    async fn test_eof_reported_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut conn = Connection::new(stream);

        assert!(conn.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_lines_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"\n\n{\"id\":3,\"result\":true,\"error\":null}\n")
                .await
                .unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut conn = Connection::new(stream);

        let frame = conn.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.id(), Some(3));
    }
}
