use std::io::{BufRead, BufReader, Read, Write};
use std::process::Child;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use switchboard_core::{ProviderError, ProviderResult};

use crate::protocol::{JsonRpcRequestEnvelope, JsonRpcResponseEnvelope};
use crate::server::{Connection, ProviderRpcServer};

/// One request/response exchange with a provider.
///
/// Every failure to complete the exchange is a `Transport` error.
pub trait Transport: Send + Sync {
    fn call(&self, request: &JsonRpcRequestEnvelope) -> ProviderResult<JsonRpcResponseEnvelope>;
}

/// In-process transport that hands encoded envelopes straight to a server.
pub struct LocalTransport {
    server: Arc<ProviderRpcServer>,
    connection: Connection,
}

impl LocalTransport {
    pub fn new(server: Arc<ProviderRpcServer>) -> Self {
        Self {
            server,
            connection: Connection::new(),
        }
    }
}

impl Transport for LocalTransport {
    fn call(&self, request: &JsonRpcRequestEnvelope) -> ProviderResult<JsonRpcResponseEnvelope> {
        let line = encode_request(request)?;
        let response = self.server.handle_line(&self.connection, &line);
        decode_response(&response)
    }
}

/// Newline-delimited JSON over a reader/writer pair, e.g. child process pipes.
///
/// Exchanges are serialized: one request is in flight per connection.
/// Responses whose id does not match the pending request are discarded.
pub struct StreamTransport {
    io: Mutex<StreamIo>,
    timeout: Option<Duration>,
}

struct StreamIo {
    writer: Box<dyn Write + Send>,
    responses: Receiver<ReaderEvent>,
}

enum ReaderEvent {
    Line(String),
    IoError(String),
    Eof,
}

impl StreamTransport {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self {
            io: Mutex::new(StreamIo {
                writer: Box::new(writer),
                responses: spawn_reader(reader),
            }),
            timeout: None,
        }
    }

    /// Fail exchanges that wait longer than `timeout` for a response.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Take over the stdio pipes of a spawned provider process.
    pub fn from_child(child: &mut Child) -> ProviderResult<Self> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProviderError::Transport("provider stdin is not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Transport("provider stdout is not piped".into()))?;
        Ok(Self::new(stdout, stdin))
    }
}

impl Transport for StreamTransport {
    fn call(&self, request: &JsonRpcRequestEnvelope) -> ProviderResult<JsonRpcResponseEnvelope> {
        let line = encode_request(request)?;
        let mut io = self
            .io
            .lock()
            .map_err(|_| ProviderError::Transport("connection lock poisoned".into()))?;

        io.writer
            .write_all(line.as_bytes())
            .and_then(|()| io.writer.write_all(b"\n"))
            .and_then(|()| io.writer.flush())
            .map_err(|err| ProviderError::Transport(format!("failed to send request: {err}")))?;

        loop {
            let event = match self.timeout {
                Some(timeout) => io.responses.recv_timeout(timeout),
                None => io
                    .responses
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };

            match event {
                Ok(ReaderEvent::Line(line)) => {
                    let response = decode_response(&line)?;
                    if response.id == request.id {
                        return Ok(response);
                    }
                    tracing::warn!(
                        method = %request.method,
                        "discarding response for a different request id"
                    );
                }
                Ok(ReaderEvent::IoError(message)) => {
                    return Err(ProviderError::Transport(format!(
                        "failed to read response: {message}"
                    )))
                }
                Ok(ReaderEvent::Eof) | Err(RecvTimeoutError::Disconnected) => {
                    return Err(ProviderError::Transport(
                        "provider closed the connection".into(),
                    ))
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(ProviderError::Transport(format!(
                        "timed out waiting for {} response after {}ms",
                        request.method,
                        self.timeout.map_or(0, |timeout| timeout.as_millis())
                    )))
                }
            }
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(reader: R) -> Receiver<ReaderEvent> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let reader = BufReader::new(reader);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if tx.send(ReaderEvent::Line(line)).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    let _ = tx.send(ReaderEvent::IoError(err.to_string()));
                    return;
                }
            }
        }

        let _ = tx.send(ReaderEvent::Eof);
    });
    rx
}

fn encode_request(request: &JsonRpcRequestEnvelope) -> ProviderResult<String> {
    serde_json::to_string(request)
        .map_err(|err| ProviderError::Transport(format!("failed to encode request: {err}")))
}

fn decode_response(line: &str) -> ProviderResult<JsonRpcResponseEnvelope> {
    serde_json::from_str(line)
        .map_err(|err| ProviderError::Transport(format!("undecodable response ({err}): {line}")))
}
