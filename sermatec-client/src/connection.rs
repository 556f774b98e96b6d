//! Connection management.
//!
//! The inverter answers one command at a time over a plain TCP socket. Each
//! query is sent and its responses read under a single lock, so commands are
//! never interleaved.

use crate::error::ClientError;
use sermatec_protocol::{
    validate_responses, Decoder, Frame, IntegrityError, ResponseCorrelation, DEFAULT_PORT,
};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default timeout for writing a request.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for each socket read while collecting responses.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of send/receive attempts per query.
pub const DEFAULT_ATTEMPTS: u32 = 5;

/// Default read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 256;

/// Minimum read buffer size.
pub const MIN_READ_BUFFER_SIZE: usize = 64;

/// Maximum read buffer size (64 KiB).
pub const MAX_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Inverter hostname or IP address.
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub read_timeout: Duration,
    /// Send/receive attempts per query.
    pub attempts: u32,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            attempts: DEFAULT_ATTEMPTS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    /// `host:port` string used to connect.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Why a single send/receive attempt failed.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("write timed out")]
    WriteTimeout,

    #[error("read timed out after {0} of {1} frames")]
    ReadTimeout(usize, usize),

    #[error("{0}")]
    Integrity(#[from] IntegrityError),

    #[error("connection reset: {0}")]
    Reset(io::Error),

    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for AttemptError {
    fn from(e: io::Error) -> Self {
        if is_reset(&e) {
            AttemptError::Reset(e)
        } else {
            AttemptError::Io(e)
        }
    }
}

fn is_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

/// A connection to an inverter.
pub struct Connection {
    config: ConnectionConfig,
    correlation: ResponseCorrelation,
    stream: Mutex<Option<TcpStream>>,
    decoder: Mutex<Decoder>,
    connected: AtomicBool,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig, correlation: ResponseCorrelation) -> Self {
        Self {
            config,
            correlation,
            stream: Mutex::new(None),
            decoder: Mutex::new(Decoder::new()),
            connected: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connects to the inverter, replacing any previous socket.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let addr = self.config.addr();
        tracing::debug!("Connecting to {}...", addr);

        let tcp_stream =
            tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&addr))
                .await
                .map_err(|_| {
                    tracing::debug!("Connection timeout");
                    ClientError::ConnectTimeout { addr: addr.clone() }
                })?
                .map_err(|e| {
                    tracing::debug!("Connection failed: {}", e);
                    ClientError::Io(e)
                })?;

        tcp_stream.set_nodelay(true).ok();

        *self.stream.lock().await = Some(tcp_stream);
        self.decoder.lock().await.clear();
        self.connected.store(true, Ordering::SeqCst);

        tracing::debug!("Connected to {}", addr);
        Ok(())
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Closes the connection.
    pub async fn close(&self) {
        tracing::debug!("Closing connection...");
        self.connected.store(false, Ordering::SeqCst);

        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.shutdown().await;
        }
        self.decoder.lock().await.clear();
    }

    /// Sends `command` and returns its validated response frames.
    ///
    /// Timeouts and integrity failures are retried up to the configured
    /// number of attempts; a connection reset fails immediately and marks the
    /// connection closed.
    pub async fn send_query(&self, command: u8, payload: &[u8]) -> Result<Vec<Frame>, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let request = Frame::request(command, payload)?;
        let expected = self.correlation.expected(command).len();

        let mut stream_guard = self.stream.lock().await;
        let stream = stream_guard.as_mut().ok_or(ClientError::NotConnected)?;
        let mut decoder = self.decoder.lock().await;

        for attempt in 1..=self.config.attempts {
            decoder.clear();

            let result = self
                .attempt(stream, &mut decoder, &request, command, expected)
                .await;

            match result {
                Ok(frames) => {
                    tracing::debug!(
                        "Command {:#04x} answered with {} frame(s) on attempt {}",
                        command,
                        frames.len(),
                        attempt
                    );
                    return Ok(frames);
                }
                Err(AttemptError::Reset(e)) => {
                    tracing::error!("Connection reset during command {:#04x}: {}", command, e);
                    *stream_guard = None;
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(ClientError::ConnectionReset);
                }
                Err(e) => {
                    tracing::debug!(
                        "Attempt {}/{} for command {:#04x} failed: {}",
                        attempt,
                        self.config.attempts,
                        command,
                        e
                    );
                }
            }
        }

        tracing::error!(
            "Command {:#04x} failed after {} attempts",
            command,
            self.config.attempts
        );
        Err(ClientError::CommunicationFailed {
            command,
            attempts: self.config.attempts,
        })
    }

    async fn attempt(
        &self,
        stream: &mut TcpStream,
        decoder: &mut Decoder,
        request: &Frame,
        command: u8,
        expected: usize,
    ) -> Result<Vec<Frame>, AttemptError> {
        tokio::time::timeout(self.config.write_timeout, stream.write_all(request.as_bytes()))
            .await
            .map_err(|_| AttemptError::WriteTimeout)??;

        let mut frames = Vec::with_capacity(expected);
        let mut buf = vec![0u8; self.config.read_buffer_size];

        while frames.len() < expected {
            if let Some(frame) = decoder.decode_frame() {
                tracing::debug!("Received frame: {:02x?}", frame.as_bytes());
                frames.push(frame);
                continue;
            }

            let n = tokio::time::timeout(self.config.read_timeout, stream.read(&mut buf))
                .await
                .map_err(|_| AttemptError::ReadTimeout(frames.len(), expected))??;

            if n == 0 {
                return Err(AttemptError::Reset(io::ErrorKind::UnexpectedEof.into()));
            }
            decoder.extend(&buf[..n]);
        }

        validate_responses(&frames, command, &self.correlation)?;
        Ok(frames)
    }
}
