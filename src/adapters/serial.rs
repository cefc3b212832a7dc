//! Serial-port transport.
//!
//! Wraps the `serialport` crate's blocking I/O in Tokio blocking tasks so
//! the drivers stay async. One transport owns one port; the gantry and the
//! digitizer each get their own.

use super::Transport;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use serialport::SerialPort;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub struct SerialTransport {
    port_name: String,
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    timeout: Duration,
}

impl SerialTransport {
    /// Open a serial port. The short internal timeout keeps single reads
    /// responsive; `timeout` bounds a whole response.
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()
            .with_context(|| {
                format!("failed to open serial port '{port_name}' at {baud_rate} baud")
            })?;
        debug!("serial port '{port_name}' opened at {baud_rate} baud");
        Ok(Self {
            port_name: port_name.to_string(),
            port: Arc::new(Mutex::new(port)),
            timeout,
        })
    }

    async fn write_command(&self, command: &str) -> Result<()> {
        let port = Arc::clone(&self.port);
        let framed = format!("{command}\n");
        let label = command.to_string();
        tokio::task::spawn_blocking(move || {
            let mut guard = port.blocking_lock();
            guard
                .write_all(framed.as_bytes())
                .context("serial write failed")?;
            guard.flush().context("serial flush failed")?;
            debug!("sent: {label}");
            Ok(())
        })
        .await
        .context("serial I/O task panicked")?
    }

    async fn read_response_line(&self) -> Result<String> {
        let port = Arc::clone(&self.port);
        let timeout = self.timeout;
        let name = self.port_name.clone();
        tokio::task::spawn_blocking(move || -> Result<String> {
            let mut guard = port.blocking_lock();
            let mut response = String::new();
            let mut buffer = [0u8; 1];
            let start = Instant::now();
            loop {
                if start.elapsed() > timeout {
                    return Err(anyhow!(
                        "serial read on '{name}' timed out after {timeout:?}"
                    ));
                }
                match guard.read(&mut buffer) {
                    Ok(1) => {
                        let c = buffer[0] as char;
                        if c == '\n' {
                            return Ok(response.trim().to_string());
                        }
                        response.push(c);
                    }
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => return Err(e).context("serial read failed"),
                }
            }
        })
        .await
        .context("serial I/O task panicked")?
    }

    /// Drain bytes until the line goes quiet for one internal timeout.
    async fn read_until_quiet(&self) -> Result<Vec<u8>> {
        let port = Arc::clone(&self.port);
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let mut guard = port.blocking_lock();
            let mut data = Vec::new();
            let mut buffer = [0u8; 4096];
            let start = Instant::now();
            loop {
                match guard.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => data.extend_from_slice(&buffer[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        if !data.is_empty() || start.elapsed() > timeout {
                            break;
                        }
                    }
                    Err(e) => return Err(e).context("serial read failed"),
                }
            }
            Ok(data)
        })
        .await
        .context("serial I/O task panicked")?
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, command: &str) -> Result<()> {
        self.write_command(command).await
    }

    async fn query(&mut self, command: &str) -> Result<String> {
        self.write_command(command).await?;
        self.read_response_line().await
    }

    async fn read_line(&mut self) -> Result<String> {
        self.read_response_line().await
    }

    async fn query_raw(&mut self, command: &str) -> Result<Vec<u8>> {
        self.write_command(command).await?;
        self.read_until_quiet().await
    }
}
