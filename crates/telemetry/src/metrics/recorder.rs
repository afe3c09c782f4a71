use std::time::Instant;

use opentelemetry::{Key, KeyValue, Value, metrics::Histogram};

/// Records the time elapsed since its creation to a histogram, in milliseconds.
///
/// ```rust
/// use telemetry::metrics::{Recorder, RATE_LIMIT_EVALUATION_DURATION};
///
/// let mut recorder = Recorder::new(RATE_LIMIT_EVALUATION_DURATION);
/// recorder.push_attribute("algorithm", "sliding");
/// recorder.record();
/// ```
pub struct Recorder {
    start: Instant,
    histogram: Histogram<f64>,
    attributes: Vec<KeyValue>,
}

impl Recorder {
    /// Creates a new recorder for the specified metric and starts timing.
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            histogram: super::meter().f64_histogram(name).build(),
            attributes: Vec::new(),
        }
    }

    /// Adds an attribute to be recorded with the metric.
    pub fn push_attribute<K, V>(&mut self, key: K, value: V)
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        self.attributes.push(KeyValue::new(key, value));
    }

    /// Records the elapsed time to the histogram.
    pub fn record(self) {
        let duration = self.start.elapsed().as_secs_f64() * 1000.0;
        self.histogram.record(duration, &self.attributes);
    }
}
