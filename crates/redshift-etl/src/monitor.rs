//! Progress reporting for ETL steps.
//!
//! Every extract and load step announces itself to a [`Monitor`] before it
//! runs and reports success or failure afterwards. The default monitor writes
//! structured log events; tests use [`RecordingMonitor`] to assert on the
//! sequence of steps.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{error, info};

/// Description of one monitored step for one relation.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorPayload {
    /// Target identifier ("schema.table").
    pub identifier: String,

    /// Step name ("extract", "load", "upgrade").
    pub step: String,

    /// Active orchestration options ("dry-run", "keep-going", ...).
    pub options: Vec<String>,

    /// Source coordinates (upstream name, bucket, ...).
    pub source: BTreeMap<String, String>,

    /// Destination coordinates (bucket and key, or warehouse table).
    pub destination: BTreeMap<String, String>,

    /// Position within the run as (1-based index, total), when known.
    pub index: Option<(usize, usize)>,

    pub dry_run: bool,
}

impl MonitorPayload {
    pub fn new(identifier: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            step: step.into(),
            options: Vec::new(),
            source: BTreeMap::new(),
            destination: BTreeMap::new(),
            index: None,
            dry_run: false,
        }
    }

    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    pub fn with_source(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.source.insert(key.into(), value.into());
        self
    }

    pub fn with_destination(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.destination.insert(key.into(), value.into());
        self
    }

    pub fn with_index(mut self, index: usize, total: usize) -> Self {
        self.index = Some((index, total));
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Receiver for step lifecycle events.
pub trait Monitor: Send + Sync {
    fn started(&self, payload: &MonitorPayload);
    fn succeeded(&self, payload: &MonitorPayload);
    fn failed(&self, payload: &MonitorPayload, message: &str);
}

/// Monitor that emits log events.
#[derive(Debug, Default)]
pub struct LogMonitor;

impl LogMonitor {
    fn position(payload: &MonitorPayload) -> String {
        match payload.index {
            Some((index, total)) => format!(" ({}/{})", index, total),
            None => String::new(),
        }
    }
}

impl Monitor for LogMonitor {
    fn started(&self, payload: &MonitorPayload) {
        info!(
            step = %payload.step,
            relation = %payload.identifier,
            dry_run = payload.dry_run,
            "Starting {} of {}{}",
            payload.step,
            payload.identifier,
            Self::position(payload)
        );
    }

    fn succeeded(&self, payload: &MonitorPayload) {
        info!(
            step = %payload.step,
            relation = %payload.identifier,
            "Finished {} of {}",
            payload.step,
            payload.identifier
        );
    }

    fn failed(&self, payload: &MonitorPayload, message: &str) {
        error!(
            step = %payload.step,
            relation = %payload.identifier,
            "Failed {} of {}: {}",
            payload.step,
            payload.identifier,
            message
        );
    }
}

/// Monitor that records events for inspection. Test use only, but exported so
/// downstream crates can assert on orchestration behavior.
#[derive(Debug, Default)]
pub struct RecordingMonitor {
    events: std::sync::Mutex<Vec<MonitorEvent>>,
}

/// One recorded lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    Started { identifier: String, step: String, dry_run: bool },
    Succeeded { identifier: String, step: String },
    Failed { identifier: String, step: String, message: String },
}

impl RecordingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MonitorEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn push(&self, event: MonitorEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl Monitor for RecordingMonitor {
    fn started(&self, payload: &MonitorPayload) {
        self.push(MonitorEvent::Started {
            identifier: payload.identifier.clone(),
            step: payload.step.clone(),
            dry_run: payload.dry_run,
        });
    }

    fn succeeded(&self, payload: &MonitorPayload) {
        self.push(MonitorEvent::Succeeded {
            identifier: payload.identifier.clone(),
            step: payload.step.clone(),
        });
    }

    fn failed(&self, payload: &MonitorPayload, message: &str) {
        self.push(MonitorEvent::Failed {
            identifier: payload.identifier.clone(),
            step: payload.step.clone(),
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_monitor_keeps_order() {
        let monitor = RecordingMonitor::new();
        let payload = MonitorPayload::new("www.orders", "load").with_index(1, 3);
        monitor.started(&payload);
        monitor.failed(&payload, "boom");
        let events = monitor.events();
        assert_eq!(
            events,
            vec![
                MonitorEvent::Started {
                    identifier: "www.orders".to_string(),
                    step: "load".to_string(),
                    dry_run: false,
                },
                MonitorEvent::Failed {
                    identifier: "www.orders".to_string(),
                    step: "load".to_string(),
                    message: "boom".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_payload_builder() {
        let payload = MonitorPayload::new("www.orders", "extract")
            .with_option("keep-going")
            .with_source("name", "www")
            .with_destination("bucket", "example-etl")
            .with_dry_run(true);
        assert_eq!(payload.options, vec!["keep-going"]);
        assert_eq!(payload.source.get("name").map(String::as_str), Some("www"));
        assert!(payload.dry_run);
    }
}
