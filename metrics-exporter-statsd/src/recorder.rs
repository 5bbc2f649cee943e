use std::sync::Arc;

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Label, Metadata,
    Recorder, SharedString, Unit,
};

use crate::client::StatsdClient;

/// A recorder that forwards metrics to a StatsD server through a [`StatsdClient`].
///
/// Counters are sent as StatsD counters, gauges as gauges, and histograms as timers, with values taken to be in
/// milliseconds. Labels are sent as DogStatsD-style tags. Nothing is aggregated locally: every update is queued for
/// the next flush of the client.
#[derive(Clone)]
pub struct StatsdRecorder {
    client: StatsdClient,
}

impl StatsdRecorder {
    /// Creates a new `StatsdRecorder` wrapping the given client.
    pub fn new(client: StatsdClient) -> Self {
        StatsdRecorder { client }
    }

    /// Returns the client this recorder sends through.
    pub fn client(&self) -> &StatsdClient {
        &self.client
    }

    fn handle(&self, key: &Key) -> Arc<Handle> {
        Arc::new(Handle {
            client: self.client.clone(),
            name: key.name().to_string(),
            tags: key.labels().cloned().collect(),
        })
    }
}

impl Recorder for StatsdRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        Counter::from_arc(self.handle(key))
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(self.handle(key))
    }

    fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(self.handle(key))
    }
}

/// A registered metric, bound to its name and tags.
struct Handle {
    client: StatsdClient,
    name: String,
    tags: Vec<Label>,
}

impl CounterFn for Handle {
    fn increment(&self, value: u64) {
        let value = i64::try_from(value).unwrap_or(i64::MAX);
        self.client.record_counter(&self.name, value, 1.0, &self.tags);
    }

    fn absolute(&self, value: u64) {
        // StatsD counters can't be set, so an absolute counter is reported like a gauge.
        self.client.record_gauge(&self.name, value as f64, 1.0, false, &self.tags);
    }
}

impl GaugeFn for Handle {
    fn increment(&self, value: f64) {
        self.client.record_gauge(&self.name, value, 1.0, true, &self.tags);
    }

    fn decrement(&self, value: f64) {
        self.client.record_gauge(&self.name, -value, 1.0, true, &self.tags);
    }

    fn set(&self, value: f64) {
        self.client.record_gauge(&self.name, value, 1.0, false, &self.tags);
    }
}

impl HistogramFn for Handle {
    fn record(&self, value: f64) {
        self.client.record_timing(&self.name, value, 1.0, &self.tags);
    }
}
