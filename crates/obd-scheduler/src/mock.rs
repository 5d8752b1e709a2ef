//! Scripted ELM327 stand-in for tests

use crate::supervisor::Connector;
use obd_protocol::TransportError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

/// How the fake adapter answers one request
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Send these bytes (should end with `>`)
    Frame(String),
    /// Say nothing; the client times out
    Silent,
    /// Drop the link
    Hangup,
}

/// `None` falls back to a stock adapter: init commands succeed, anything else gets `?`
pub(crate) type Script = Arc<dyn Fn(&str, usize) -> Option<Reply> + Send + Sync>;

/// Requests seen by the adapter, in order
pub(crate) type RequestLog = Arc<Mutex<Vec<String>>>;

pub(crate) fn count(log: &RequestLog, command: &str) -> usize {
    log.lock().unwrap().iter().filter(|c| c.as_str() == command).count()
}

/// Answer requests from `script`.
///
/// The script gets the command mnemonic and how many times it has been seen,
/// counting this request.
pub(crate) fn spawn_adapter(mut stream: DuplexStream, script: Script, log: RequestLog) {
    tokio::spawn(async move {
        let mut pending = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            pending.extend_from_slice(&buf[..n]);

            while let Some(pos) = pending.iter().position(|&b| b == b'\r') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                let command = String::from_utf8_lossy(&line[..line.len() - 1]).to_string();
                let seen = {
                    let mut log = log.lock().unwrap();
                    log.push(command.clone());
                    log.iter().filter(|c| **c == command).count()
                };

                let reply = script(&command, seen).unwrap_or_else(|| match command.as_str() {
                    "ATZ" => Reply::Frame("\r\rELM327 v1.5\r\r>".to_string()),
                    "ATE0" => Reply::Frame("OK\r\r>".to_string()),
                    _ => Reply::Frame("?\r\r>".to_string()),
                });

                match reply {
                    Reply::Frame(text) => {
                        if stream.write_all(text.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                    Reply::Silent => {}
                    Reply::Hangup => return,
                }
            }
        }
    });
}

/// A healthy vehicle: 30 km/h, 1726 RPM, 75 °C, 12.6 V
pub(crate) fn healthy() -> Script {
    Arc::new(|command: &str, _: usize| healthy_reply(command))
}

pub(crate) fn healthy_reply(command: &str) -> Option<Reply> {
    let text = match command {
        "010D" => "41 0D 1E \r\r>",
        "010C" => "41 0C 1A F8 \r\r>",
        "0105" => "41 05 73 \r\r>",
        "ATRV" => "12.6V\r\r>",
        _ => return None,
    };
    Some(Reply::Frame(text.to_string()))
}

/// Connector handing out fake adapters; `None` entries fail to connect
pub(crate) struct MockConnector {
    outcomes: VecDeque<Option<Script>>,
    pub log: RequestLog,
    pub attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(outcomes: Vec<Option<Script>>) -> Self {
        Self {
            outcomes: outcomes.into(),
            log: Arc::new(Mutex::new(Vec::new())),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Connector for MockConnector {
    type Stream = DuplexStream;

    async fn connect(&mut self) -> Result<DuplexStream, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.pop_front().flatten() {
            Some(script) => {
                let (client, adapter) = duplex(1024);
                spawn_adapter(adapter, script, self.log.clone());
                Ok(client)
            }
            None => Err(TransportError::Io(std::io::ErrorKind::ConnectionRefused.into())),
        }
    }
}
