//! Shared mutable state of the relay process.
//!
//! One `Relay` is created at startup and handed to the serial task and every
//! HTTP handler as an `Arc`. All fields are latest-value slots or bounded
//! logs; nothing here queues.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

/// Oldest entries are evicted past this point so a flapping serial line
/// cannot grow memory without bound.
pub const ERROR_LOG_CAPACITY: usize = 256;

/// Bounded append-only error log.
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: VecDeque<String>,
}

impl ErrorLog {
    pub fn push(&mut self, entry: String) {
        if self.entries.len() == ERROR_LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as a stringified list, the shape the old clients poll for.
    pub fn render(&self) -> String {
        let quoted: Vec<String> = self.entries.iter().map(|e| format!("{e:?}")).collect();
        format!("[{}]", quoted.join(", "))
    }
}

pub type SharedRelay = Arc<Relay>;

#[derive(Debug, Default)]
pub struct Relay {
    reading: RwLock<String>,
    command: RwLock<String>,
    speed: RwLock<String>,
    device_errors: Mutex<ErrorLog>,
    process_errors: Mutex<ErrorLog>,
}

impl Relay {
    pub fn new() -> SharedRelay {
        Arc::new(Self::default())
    }

    /// Overwrite the latest telemetry line. No history is kept.
    pub async fn set_reading(&self, line: String) {
        *self.reading.write().await = line;
    }

    pub async fn reading(&self) -> String {
        self.reading.read().await.clone()
    }

    pub async fn set_command(&self, body: String) {
        *self.command.write().await = body;
    }

    pub async fn command(&self) -> String {
        self.command.read().await.clone()
    }

    pub async fn set_speed(&self, body: String) {
        *self.speed.write().await = body;
    }

    pub async fn speed(&self) -> String {
        self.speed.read().await.clone()
    }

    /// Record a failure reported by the serial side (open/read/write).
    pub async fn push_device_error(&self, entry: String) {
        self.device_errors.lock().await.push(entry);
    }

    pub async fn device_errors(&self) -> String {
        self.device_errors.lock().await.render()
    }

    /// Record a failure on the relay process side (handlers, camera).
    pub async fn push_process_error(&self, entry: String) {
        self.process_errors.lock().await.push(entry);
    }

    pub async fn process_errors(&self) -> String {
        self.process_errors.lock().await.render()
    }
}
