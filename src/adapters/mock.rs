//! Scripted in-memory transport for driver tests.

use super::Transport;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Replays queued responses and records every command sent.
///
/// Text responses are consumed in FIFO order by [`Transport::query`] and
/// [`Transport::read_line`]; binary blocks feed [`Transport::query_raw`].
/// Running out of queued responses is an error, so a test that issues an
/// unexpected extra query fails loudly instead of hanging on a default.
#[derive(Default)]
pub struct MockTransport {
    responses: VecDeque<String>,
    raw_blocks: VecDeque<Vec<u8>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text response for the next query or line read.
    pub fn push_response(&mut self, response: impl Into<String>) {
        self.responses.push_back(response.into());
    }

    /// Queue a binary block for the next raw query.
    pub fn push_raw(&mut self, block: Vec<u8>) {
        self.raw_blocks.push_back(block);
    }

    /// Shared handle to the list of commands sent so far.
    pub fn sent_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.sent)
    }

    fn record(&self, command: &str) {
        self.sent.lock().unwrap().push(command.to_string());
    }

    fn next_response(&mut self) -> Result<String> {
        self.responses
            .pop_front()
            .ok_or_else(|| anyhow!("mock transport has no queued response"))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, command: &str) -> Result<()> {
        self.record(command);
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String> {
        self.record(command);
        self.next_response()
    }

    async fn read_line(&mut self) -> Result<String> {
        self.next_response()
    }

    async fn query_raw(&mut self, command: &str) -> Result<Vec<u8>> {
        self.record(command);
        self.raw_blocks
            .pop_front()
            .ok_or_else(|| anyhow!("mock transport has no queued raw block"))
    }
}
