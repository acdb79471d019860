use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Collects wall-clock samples for named spans
#[derive(Debug, Default)]
pub struct Profiler {
    spans: RwLock<HashMap<String, SpanStats>>,
}

/// Statistics for a profiled span
#[derive(Debug, Clone, PartialEq)]
pub struct SpanStats {
    pub count: usize,
    pub total_time: Duration,
    pub min_time: Duration,
    pub max_time: Duration,
    /// Every recorded duration, in recording order
    pub samples: Vec<Duration>,
}

impl SpanStats {
    fn new(duration: Duration) -> Self {
        Self {
            count: 1,
            total_time: duration,
            min_time: duration,
            max_time: duration,
            samples: vec![duration],
        }
    }

    fn update(&mut self, duration: Duration) {
        self.count += 1;
        self.total_time += duration;
        self.min_time = self.min_time.min(duration);
        self.max_time = self.max_time.max(duration);
        self.samples.push(duration);
    }

    /// Arithmetic mean of the samples, in seconds
    pub fn mean_secs(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.total_time.as_secs_f64() / self.count as f64
    }
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a timed span; the duration is recorded when the guard drops
    pub fn start_span(&self, name: impl Into<String>) -> ProfilerGuard<'_> {
        ProfilerGuard {
            profiler: self,
            name: name.into(),
            start_time: Instant::now(),
        }
    }

    fn record_span(&self, name: &str, duration: Duration) {
        let mut spans = self.spans.write();
        match spans.get_mut(name) {
            Some(stats) => stats.update(duration),
            None => {
                spans.insert(name.to_string(), SpanStats::new(duration));
            }
        }
    }

    pub fn stats(&self, name: &str) -> Option<SpanStats> {
        self.spans.read().get(name).cloned()
    }
}

/// Guard for a profiling span
pub struct ProfilerGuard<'a> {
    profiler: &'a Profiler,
    name: String,
    start_time: Instant,
}

impl Drop for ProfilerGuard<'_> {
    fn drop(&mut self) {
        let duration = self.start_time.elapsed();
        self.profiler.record_span(&self.name, duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_basic_profiling() {
        let profiler = Profiler::new();

        {
            let _guard = profiler.start_span("test_op");
            thread::sleep(Duration::from_millis(20));
        }

        let stats = profiler.stats("test_op").unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.samples.len(), 1);
        assert!(stats.total_time >= Duration::from_millis(20));
        assert!(profiler.stats("missing").is_none());
    }

    #[test]
    fn test_mean_is_arithmetic_mean() {
        let profiler = Profiler::new();
        for millis in [100, 200, 600] {
            profiler.record_span("generate", Duration::from_millis(millis));
        }

        let stats = profiler.stats("generate").unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min_time, Duration::from_millis(100));
        assert_eq!(stats.max_time, Duration::from_millis(600));
        assert!((stats.mean_secs() - 0.3).abs() < 1e-9);
    }
}
