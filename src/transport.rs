//! # Serial Transport
//!
//! Blocking byte transport underneath a [`Light`](crate::Light) session: write one
//! frame, then read one terminator-delimited reply line.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};
use tracing::trace;

use crate::error::{LightError, Result};
use crate::protocol::ProtocolConfig;

/// Port read timeout used when the protocol has no read deadline; reads keep
/// polling until the terminator arrives.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub trait Transport: Send {
    /// Drop bytes already waiting on the input side, e.g. a reply that showed up
    /// after its read timed out.
    fn clear_input(&mut self) -> Result<()>;

    fn write_all(&mut self, frame: &[u8]) -> std::io::Result<()>;

    /// Read up to and including `terminator`.
    ///
    /// With `timeout = None` this blocks until the terminator shows up.
    fn read_until(&mut self, terminator: u8, timeout: Option<Duration>) -> Result<Vec<u8>>;
}

impl Transport for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> Result<()> {
        self.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn write_all(&mut self, frame: &[u8]) -> std::io::Result<()> {
        Write::write_all(self, frame)?;
        self.flush()
    }

    fn read_until(&mut self, terminator: u8, timeout: Option<Duration>) -> Result<Vec<u8>> {
        let mut received_bytes: Vec<u8> = Vec::new();
        let mut byte_buf = [0u8; 1];
        let start_time = Instant::now();

        loop {
            if let Some(limit) = timeout {
                if start_time.elapsed() > limit {
                    return Err(LightError::Timeout(limit));
                }
            }

            match self.read(&mut byte_buf) {
                Ok(1) => {
                    received_bytes.push(byte_buf[0]);
                    if byte_buf[0] == terminator {
                        return Ok(received_bytes);
                    }
                }
                Ok(_) => continue,
                Err(ref e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Open `name` with the serial settings of `config`.
pub fn open_port(name: &str, config: &ProtocolConfig) -> Result<Box<dyn SerialPort>> {
    let port = serialport::new(name, config.baud_rate)
        .data_bits(config.data_bits)
        .stop_bits(config.stop_bits)
        .parity(config.parity)
        .timeout(config.timeout.unwrap_or(POLL_INTERVAL))
        .open()?;
    Ok(port)
}

/// Names of the serial ports present on this machine.
pub fn list_ports() -> Vec<String> {
    serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(|p| p.port_name)
        .collect()
}

/// One step of traffic seen by a [`LoopbackTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    Write(Vec<u8>),
    Read(Vec<u8>),
}

#[derive(Debug, Default)]
struct LoopbackState {
    replies: VecDeque<Vec<u8>>,
    stale: VecDeque<Vec<u8>>,
    log: Vec<Exchange>,
    echo: bool,
}

/// In-memory transport that answers with scripted replies and records traffic.
///
/// Clones share state, so a test can keep one handle while the session owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Once the scripted replies run out, answer every frame with itself.
    pub fn echoing() -> Self {
        let port = Self::default();
        port.lock().echo = true;
        port
    }

    /// Queue a reply line. The terminator must be part of `reply`.
    pub fn push_reply(&self, reply: impl Into<Vec<u8>>) {
        self.lock().replies.push_back(reply.into());
    }

    /// Queue bytes that sit in the input buffer before the next command is sent,
    /// like a late reply to a query that already timed out.
    pub fn push_stale_reply(&self, reply: impl Into<Vec<u8>>) {
        self.lock().stale.push_back(reply.into());
    }

    /// Every exchange so far, in order.
    pub fn log(&self) -> Vec<Exchange> {
        self.lock().log.clone()
    }

    /// Only the frames written so far.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock()
            .log
            .iter()
            .filter_map(|e| match e {
                Exchange::Write(frame) => Some(frame.clone()),
                Exchange::Read(_) => None,
            })
            .collect()
    }

    pub fn pending_replies(&self) -> usize {
        self.lock().replies.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LoopbackState> {
        // a panicking test thread must not hide the log from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Transport for LoopbackTransport {
    fn clear_input(&mut self) -> Result<()> {
        self.lock().stale.clear();
        Ok(())
    }

    fn write_all(&mut self, frame: &[u8]) -> std::io::Result<()> {
        trace!(frame = ?String::from_utf8_lossy(frame), "loopback write");
        self.lock().log.push(Exchange::Write(frame.to_vec()));
        Ok(())
    }

    fn read_until(&mut self, _terminator: u8, _timeout: Option<Duration>) -> Result<Vec<u8>> {
        let mut state = self.lock();
        let mut next = state.stale.pop_front();
        if next.is_none() {
            next = state.replies.pop_front();
        }
        if next.is_none() && state.echo {
            next = state.log.iter().rev().find_map(|e| match e {
                Exchange::Write(frame) => Some(frame.clone()),
                Exchange::Read(_) => None,
            });
        }
        let reply = next.ok_or_else(|| {
            std::io::Error::new(ErrorKind::UnexpectedEof, "no scripted reply left")
        })?;
        state.log.push(Exchange::Read(reply.clone()));
        Ok(reply)
    }
}
