#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use keylock::{BoxError, LogSink, Work};

/// Ordered record of what units of work did, shared between tasks.
#[derive(Clone, Default)]
pub struct Trail(Arc<Mutex<Vec<String>>>);

impl Trail {
    pub fn push(&self, entry: impl Into<String>) {
        if let Ok(mut entries) = self.0.lock() {
            entries.push(entry.into());
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries().iter().any(|e| e == entry)
    }

    /// Position of an entry, for ordering assertions.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    /// A log sink appending every line to this trail.
    pub fn sink(&self) -> LogSink {
        let trail = self.clone();
        LogSink::custom(move |line| trail.push(line))
    }
}

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Work that records "<name> start" and "<name> end" around a sleep, and returns its name.
pub fn sleeper(trail: &Trail, name: &str, duration_ms: u64) -> Work<String> {
    let trail = trail.clone();
    let name = name.to_string();
    Work::future(move || async move {
        trail.push(format!("{name} start"));
        tokio::time::sleep(ms(duration_ms)).await;
        trail.push(format!("{name} end"));
        Ok::<_, BoxError>(name)
    })
}
