//! Serial port plumbing for the stimulator.
//!
//! [`SerialTransport`] is the persistent async link (tokio-serial).
//! [`SerialProbe`] checks presence with a short-lived blocking open through
//! the `serialport` crate, so it never touches the persistent link.

use super::{LineTransport, LinkTiming, StimulatorHardware, StimulatorLink, BAUD_RATE, IO_TIMEOUT};
use crate::error::{SyncError, SyncResult};
use crate::watcher::Probe;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, warn};

/// Async serial line transport.
pub struct SerialTransport {
    port: String,
    stream: Option<SerialStream>,
    /// Bytes of a reply line not terminated yet.
    partial: Vec<u8>,
}

impl SerialTransport {
    /// Opens `port` at the stimulator baud rate.
    pub fn open(port: &str) -> SyncResult<Self> {
        let stream = tokio_serial::new(port, BAUD_RATE)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(IO_TIMEOUT)
            .open_native_async()
            .map_err(|e| SyncError::LinkUnavailable {
                port: port.to_string(),
                reason: e.to_string(),
            })?;
        debug!("Serial port '{}' opened at {} baud", port, BAUD_RATE);

        Ok(Self {
            port: port.to_string(),
            stream: Some(stream),
            partial: Vec::new(),
        })
    }

    fn stream(&mut self) -> SyncResult<&mut SerialStream> {
        let port = &self.port;
        self.stream
            .as_mut()
            .ok_or_else(|| SyncError::LinkIo(format!("'{}' is closed", port)))
    }

    /// Moves every complete line out of the partial buffer.
    fn take_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(end) = self.partial.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }
}

#[async_trait]
impl LineTransport for SerialTransport {
    async fn write_line(&mut self, line: &str) -> SyncResult<()> {
        let port = self.port.clone();
        let stream = self.stream()?;
        let payload = format!("{}\n", line);
        let write = async {
            stream.write_all(payload.as_bytes()).await?;
            stream.flush().await
        };
        match tokio::time::timeout(IO_TIMEOUT, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SyncError::LinkIo(format!("write to '{}' failed: {}", port, e))),
            Err(_) => Err(SyncError::LinkIo(format!("write to '{}' timed out", port))),
        }
    }

    async fn drain_lines(&mut self) -> SyncResult<Vec<String>> {
        let port = self.port.clone();
        let mut chunk = Vec::new();
        {
            let stream = self.stream()?;
            loop {
                let waiting = stream
                    .bytes_to_read()
                    .map_err(|e| SyncError::LinkIo(format!("'{}': {}", port, e)))?;
                if waiting == 0 {
                    break;
                }
                let mut buf = vec![0u8; waiting as usize];
                let n = match tokio::time::timeout(IO_TIMEOUT, stream.read(&mut buf)).await {
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) => {
                        return Err(SyncError::LinkIo(format!("read from '{}' failed: {}", port, e)))
                    }
                    Err(_) => break,
                };
                if n == 0 {
                    break;
                }
                chunk.extend_from_slice(&buf[..n]);
            }
        }
        self.partial.extend_from_slice(&chunk);
        Ok(self.take_lines())
    }

    async fn close(&mut self) -> SyncResult<()> {
        // Dropping the stream closes the file descriptor.
        self.stream = None;
        self.partial.clear();
        Ok(())
    }
}

/// Presence check: open, hold for the reset time, close.
#[derive(Debug, Clone)]
pub struct SerialProbe {
    port: String,
    hold: Duration,
}

impl SerialProbe {
    /// Probe for `port`, holding it open for `hold` on success.
    #[must_use]
    pub fn new(port: &str, hold: Duration) -> Self {
        Self {
            port: port.to_string(),
            hold,
        }
    }
}

#[async_trait]
impl Probe for SerialProbe {
    fn target(&self) -> &str {
        &self.port
    }

    async fn probe(&self) -> bool {
        let port = self.port.clone();
        let opened = tokio::task::spawn_blocking(move || {
            serialport::new(&port, BAUD_RATE).timeout(IO_TIMEOUT).open()
        })
        .await;

        match opened {
            Ok(Ok(handle)) => {
                tokio::time::sleep(self.hold).await;
                drop(handle);
                true
            }
            Ok(Err(e)) => {
                debug!("Probe of '{}' failed: {}", self.port, e);
                false
            }
            Err(e) => {
                warn!("Probe task for '{}' failed: {}", self.port, e);
                false
            }
        }
    }
}

/// The physical stimulator on a serial port.
#[derive(Debug, Clone)]
pub struct SerialStimulator {
    port: String,
    timing: LinkTiming,
    probe: SerialProbe,
}

impl SerialStimulator {
    /// Stimulator on `port` with the given link timing.
    #[must_use]
    pub fn new(port: &str, timing: LinkTiming) -> Self {
        Self {
            port: port.to_string(),
            timing,
            probe: SerialProbe::new(port, timing.settle),
        }
    }
}

#[async_trait]
impl Probe for SerialStimulator {
    fn target(&self) -> &str {
        &self.port
    }

    async fn probe(&self) -> bool {
        self.probe.probe().await
    }
}

#[async_trait]
impl StimulatorHardware for SerialStimulator {
    type Transport = SerialTransport;

    async fn open(&self) -> SyncResult<StimulatorLink<SerialTransport>> {
        StimulatorLink::open(&self.port, self.timing).await
    }
}
