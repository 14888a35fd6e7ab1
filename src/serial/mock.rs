//! In-memory channel that replays a scripted byte stream.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{ByteChannel, Result, SerialError};

#[derive(Debug, Clone)]
enum Event {
    Byte(u8),
    /// Device stays silent for one read window
    Gap,
    /// Port disappears
    Fail(String),
    /// Next write is held off for a whole window
    Stall,
}

#[derive(Debug, Default)]
pub struct ScriptedChannel {
    script: VecDeque<Event>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel that will deliver `bytes` and then go silent
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::new().then_bytes(bytes)
    }

    pub fn then_bytes(mut self, bytes: &[u8]) -> Self {
        self.script.extend(bytes.iter().copied().map(Event::Byte));
        self
    }

    /// End the current read early, as a read timeout would
    pub fn then_gap(mut self) -> Self {
        self.script.push_back(Event::Gap);
        self
    }

    /// Time out the next write once the reads before it are consumed
    pub fn then_write_stall(mut self) -> Self {
        self.script.push_back(Event::Stall);
        self
    }

    /// Make the next read after the scripted bytes fail with a closed port
    pub fn then_fail(mut self, reason: &str) -> Self {
        self.script.push_back(Event::Fail(reason.to_string()));
        self
    }

    /// Shared view of every command written so far
    pub fn writes_handle(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.writes)
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Bytes still waiting to be read, up to the next gap or failure
    pub fn pending_bytes(&self) -> Vec<u8> {
        self.script
            .iter()
            .map_while(|event| match event {
                Event::Byte(b) => Some(*b),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ByteChannel for ScriptedChannel {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self.script.front() {
            Some(Event::Fail(reason)) => return Err(SerialError::Closed(reason.clone())),
            Some(Event::Stall) => {
                self.script.pop_front();
                return Err(SerialError::Timeout);
            }
            _ => {}
        }
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(data.to_vec());
        Ok(())
    }

    async fn read_exact_or_timeout(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self.script.front().cloned() {
                Some(Event::Byte(b)) => {
                    self.script.pop_front();
                    out.push(b);
                }
                Some(Event::Gap) => {
                    self.script.pop_front();
                    tokio::time::sleep(timeout).await;
                    break;
                }
                Some(Event::Fail(reason)) => return Err(SerialError::Closed(reason)),
                Some(Event::Stall) | None => {
                    tokio::time::sleep(timeout).await;
                    break;
                }
            }
        }
        Ok(out)
    }

    async fn read_byte_or_timeout(&mut self, timeout: Duration) -> Result<Option<u8>> {
        match self.script.front().cloned() {
            Some(Event::Byte(b)) => {
                self.script.pop_front();
                Ok(Some(b))
            }
            Some(Event::Gap) => {
                self.script.pop_front();
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
            Some(Event::Fail(reason)) => Err(SerialError::Closed(reason)),
            Some(Event::Stall) | None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }
}
