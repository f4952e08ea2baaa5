//! Observation log.
//!
//! One `Observation` summarizes what a processed frame contained. The log
//! keeps every distinct `(timestamp, labels)` pair in insertion order for the
//! life of the process; repeats are dropped on insert. Timestamps have
//! one-second granularity, so frames within the same second collapse to one
//! row unless their label set changes.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use crate::detect::Prediction;
use crate::error::{LookoutError, Result};

/// One logged row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Observation {
    /// Whole seconds since the monitor started.
    pub timestamp: String,
    /// Labels seen in the frame, `", "`-joined in detection order.
    pub labels: String,
}

impl Observation {
    /// Column names, in display order.
    pub const COLUMNS: [&'static str; 2] = ["timestamp", "labels"];

    pub fn new(timestamp: impl Into<String>, labels: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            labels: labels.into(),
        }
    }

    /// Summarize a frame's predictions at `elapsed` since start.
    pub fn from_predictions(elapsed: Duration, predictions: &[Prediction]) -> Self {
        let labels = predictions
            .iter()
            .map(|p| p.label.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            timestamp: format_elapsed(elapsed),
            labels,
        }
    }

    /// Value of a column by name.
    pub fn field(&self, column: &str) -> Option<&str> {
        match column {
            "timestamp" => Some(&self.timestamp),
            "labels" => Some(&self.labels),
            _ => None,
        }
    }

    /// Timestamp as seconds, for ordering. Unparseable values sort first.
    pub fn seconds(&self) -> u64 {
        self.timestamp.parse().unwrap_or(0)
    }
}

/// Elapsed time rounded to whole seconds, halves to even, without a
/// decimal part.
pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{}", elapsed.as_secs_f64().round_ties_even() as u64)
}

#[derive(Default)]
struct LogInner {
    rows: Vec<Observation>,
    seen: HashSet<Observation>,
}

/// Append-only, deduplicating observation log.
///
/// A single mutex guards both operations, so a snapshot never sees a row
/// that is only partly written.
#[derive(Default)]
pub struct ObservationLog {
    inner: Mutex<LogInner>,
}

impl ObservationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unless an identical row exists. Returns true when inserted.
    pub fn append(&self, observation: Observation) -> Result<bool> {
        let mut inner = self.lock()?;
        if inner.seen.contains(&observation) {
            return Ok(false);
        }
        inner.seen.insert(observation.clone());
        inner.rows.push(observation);
        Ok(true)
    }

    /// Every row, in insertion order.
    pub fn snapshot(&self) -> Result<Vec<Observation>> {
        Ok(self.lock()?.rows.clone())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.rows.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LogInner>> {
        self.inner
            .lock()
            .map_err(|_| LookoutError::Poisoned("observation log"))
    }
}
