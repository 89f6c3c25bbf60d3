//! Derived-event publication
//!
//! Events are published to a downstream log after the store transaction
//! commits, at-least-once: a crash between commit and publish loses the
//! event, and a redelivered claim re-emits it. Downstream consumers must
//! tolerate both. Each event carries a partition key so one relationship's
//! events stay in order downstream.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::event::DerivedEvent;
use crate::error::{Error, Result};

/// Publishes derived events to the downstream log
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, key: &str, event: &DerivedEvent) -> Result<()>;
}

/// Wire envelope: partition key plus the event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub key: String,
    pub event: DerivedEvent,
}

/// Event publisher appending one JSON envelope per line to a log file
pub struct JsonlEventPublisher {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlEventPublisher {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventPublisher for JsonlEventPublisher {
    async fn publish(&self, key: &str, event: &DerivedEvent) -> Result<()> {
        let envelope = EventEnvelope {
            key: key.to_string(),
            event: event.clone(),
        };
        let json = serde_json::to_string(&envelope)
            .map_err(|e| Error::Other(format!("Failed to serialize event: {}", e)))?;

        let mut file = self
            .file
            .lock()
            .map_err(|_| Error::Other("event log writer poisoned".to_string()))?;
        writeln!(file, "{}", json)?;
        file.flush()?;

        debug!(key = %key, status = %event.status, "Derived event published");
        Ok(())
    }
}

/// In-memory publisher for tests and dry runs
#[derive(Default)]
pub struct InMemoryPublisher {
    events: Mutex<Vec<(String, DerivedEvent)>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in publication order
    pub fn published(&self) -> Vec<(String, DerivedEvent)> {
        self.events.lock().expect("publisher lock poisoned").clone()
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish(&self, key: &str, event: &DerivedEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| Error::Other("publisher lock poisoned".to_string()))?
            .push((key.to_string(), event.clone()));
        Ok(())
    }
}
