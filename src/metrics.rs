//! Process-wide logging/metrics services accessed through a narrow trait,
//! so zone resolution can be tested against a fake sink instead of the
//! global `log` facade and a real metrics backend (§4.D, §9 "Global
//! logger / metrics"). Counters: `total_queries`, `by_type`,
//! `by_responder`, all labeled by zone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub trait Metrics: Send + Sync {
    fn log_event(&self, level: log::Level, target: &str, message: &str);

    /// Increments `total_queries{zone}`, `by_type{zone,type}` and
    /// `by_responder{zone,responder}` for one completed query. `responder`
    /// is `"fail"` when no responder handled the query.
    fn count_query(&self, zone: &str, qtype: &str, responder: &str);
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct Key {
    zone: String,
    qtype: String,
    responder: String,
}

/// Forwards events to the `log` crate and keeps counters in memory for a
/// periodic metrics-report task.
#[derive(Default)]
pub struct LogMetrics {
    total_queries: AtomicU64,
    by_type: Mutex<HashMap<Key, u64>>,
    by_responder: Mutex<HashMap<Key, u64>>,
}

impl LogMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_queries(&self) -> u64 {
        self.total_queries.load(Ordering::Relaxed)
    }

    pub fn by_responder(&self, zone: &str, responder: &str) -> u64 {
        let key = Key {
            zone: zone.to_string(),
            qtype: String::new(),
            responder: responder.to_string(),
        };
        *self.by_responder.lock().unwrap().get(&key).unwrap_or(&0)
    }

    pub fn by_type(&self, zone: &str, qtype: &str) -> u64 {
        let key = Key {
            zone: zone.to_string(),
            qtype: qtype.to_string(),
            responder: String::new(),
        };
        *self.by_type.lock().unwrap().get(&key).unwrap_or(&0)
    }
}

impl Metrics for LogMetrics {
    fn log_event(&self, level: log::Level, target: &str, message: &str) {
        log::logger().log(
            &log::Record::builder()
                .args(format_args!("{}", message))
                .level(level)
                .target(target)
                .build(),
        );
    }

    fn count_query(&self, zone: &str, qtype: &str, responder: &str) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);

        *self
            .by_type
            .lock()
            .unwrap()
            .entry(Key {
                zone: zone.to_string(),
                qtype: qtype.to_string(),
                responder: String::new(),
            })
            .or_insert(0) += 1;

        *self
            .by_responder
            .lock()
            .unwrap()
            .entry(Key {
                zone: zone.to_string(),
                qtype: String::new(),
                responder: responder.to_string(),
            })
            .or_insert(0) += 1;
    }
}

#[cfg(test)]
/// A fake sink tests can inject in place of `LogMetrics` to assert on
/// counts without touching the global logger.
pub struct FakeMetrics {
    pub counts: Mutex<HashMap<(String, String, String), u64>>,
}

#[cfg(test)]
impl FakeMetrics {
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, zone: &str, qtype: &str, responder: &str) -> u64 {
        *self
            .counts
            .lock()
            .unwrap()
            .get(&(zone.to_string(), qtype.to_string(), responder.to_string()))
            .unwrap_or(&0)
    }
}

#[cfg(test)]
impl Metrics for FakeMetrics {
    fn log_event(&self, _level: log::Level, _target: &str, _message: &str) {}

    fn count_query(&self, zone: &str, qtype: &str, responder: &str) {
        *self
            .counts
            .lock()
            .unwrap()
            .entry((zone.to_string(), qtype.to_string(), responder.to_string()))
            .or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_metrics_counts_by_zone_type_responder() {
        let m = LogMetrics::new();
        m.count_query("example.com.", "A", "records");
        m.count_query("example.com.", "A", "records");
        m.count_query("example.com.", "AAAA", "fail");

        assert_eq!(m.total_queries(), 3);
        assert_eq!(m.by_type("example.com.", "A"), 2);
        assert_eq!(m.by_responder("example.com.", "records"), 2);
        assert_eq!(m.by_responder("example.com.", "fail"), 1);
    }
}
