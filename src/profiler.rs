//! Wall-clock profiling of per-node forward execution.
//!
//! Each graph node registers an event key at creation; the executor
//! brackets every layer invocation with `start`/`finish` and durations
//! accumulate per key. The profiler is owned by the graph instance, so
//! separate graphs never share state.

use std::fmt;
use std::time::{Duration, Instant};

/// Key of one registered profiling event.
pub type EventKey = usize;

#[derive(Debug, Clone)]
struct EventStat {
    name: String,
    total: Duration,
    hits: u64,
    started: Option<Instant>,
}

/// Accumulates execution durations per registered event.
#[derive(Debug, Default)]
pub struct Profiler {
    events: Vec<EventStat>,
}

impl Profiler {
    /// Create an empty profiler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named event and return its key.
    pub fn register_event(&mut self, name: &str) -> EventKey {
        self.events.push(EventStat {
            name: name.to_string(),
            total: Duration::ZERO,
            hits: 0,
            started: None,
        });
        self.events.len() - 1
    }

    /// Mark the start of an event occurrence.
    pub fn start(&mut self, key: EventKey) {
        if let Some(ev) = self.events.get_mut(key) {
            ev.started = Some(Instant::now());
        }
    }

    /// Mark the end of an event occurrence, accumulating its duration.
    pub fn finish(&mut self, key: EventKey) {
        if let Some(ev) = self.events.get_mut(key) {
            if let Some(started) = ev.started.take() {
                ev.total += started.elapsed();
                ev.hits += 1;
            }
        }
    }

    /// Accumulated duration of an event.
    pub fn total(&self, key: EventKey) -> Duration {
        self.events.get(key).map(|e| e.total).unwrap_or_default()
    }

    /// Number of completed occurrences of an event.
    pub fn hits(&self, key: EventKey) -> u64 {
        self.events.get(key).map(|e| e.hits).unwrap_or(0)
    }
}

impl fmt::Display for Profiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<24} {:>8} {:>12}", "event", "hits", "total")?;
        for ev in &self.events {
            writeln!(f, "{:<24} {:>8} {:>10}us", ev.name, ev.hits, ev.total.as_micros())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_accumulate() {
        let mut p = Profiler::new();
        let k = p.register_event("conv1");
        assert_eq!(p.hits(k), 0);

        p.start(k);
        p.finish(k);
        p.start(k);
        p.finish(k);
        assert_eq!(p.hits(k), 2);
    }

    #[test]
    fn test_unbalanced_finish_is_ignored() {
        let mut p = Profiler::new();
        let k = p.register_event("fc1");
        p.finish(k);
        assert_eq!(p.hits(k), 0);
    }

    #[test]
    fn test_report_lists_events() {
        let mut p = Profiler::new();
        p.register_event("input0");
        p.register_event("conv1");
        let report = p.to_string();
        assert!(report.contains("input0"));
        assert!(report.contains("conv1"));
    }
}
