use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use metrics::Label;
use parking_lot::Mutex;
use tracing::{error, warn};

use crate::{
    collector::Collector,
    exit::{ExitHook, ExitRegistry},
    sender::{Sender, SharedQueue},
    timer::Timer,
    transport::Transport,
};

/// Returns `true` if a call recorded at `rate` should be kept.
///
/// A rate of `1.0` or more always keeps the call, and a rate of `0.0` (or NaN) never does.
fn should_sample(rate: f64) -> bool {
    if rate >= 1.0 {
        return true;
    }

    rand::random::<f64>() < rate
}

struct Inner {
    shared: Arc<SharedQueue>,
    transport: Arc<dyn Transport>,

    // Serializes starting and stopping. Never held by the recording path.
    sender: Mutex<Option<Sender>>,
    hook_id: u64,
}

impl Inner {
    fn start(self: &Arc<Self>) -> std::io::Result<()> {
        let mut sender = self.sender.lock();
        if sender.is_some() {
            return Ok(());
        }

        *sender = Some(Sender::start(Arc::clone(&self.shared), Arc::clone(&self.transport))?);

        let hook: Weak<Inner> = Arc::downgrade(self);
        ExitRegistry::global().register(self.hook_id, hook);
        Ok(())
    }

    fn stop(&self) {
        // The lifecycle lock is held until the sender has exited, so a concurrent `stop` returns only after the final
        // flush has happened.
        let mut sender = self.sender.lock();
        let Some(sender) = sender.take() else {
            return;
        };

        if let Err(e) = sender.ask_stop() {
            warn!(error = %e, "Sender was already stopping.");
        }
        if sender.join().is_err() {
            error!("Sender thread panicked. Queued metrics may have been lost.");
        }

        ExitRegistry::global().deregister(self.hook_id);
    }

    fn is_running(&self) -> bool {
        self.sender.lock().as_ref().is_some_and(|sender| !sender.is_finished())
    }
}

impl ExitHook for Inner {
    fn on_exit(&self) {
        self.stop();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A StatsD client.
///
/// Recording a metric serializes it into an in-memory buffer and wakes a background sender thread, which drains the
/// buffer and sends it to the server over the configured transport. Recording never waits on the network: the only
/// blocking on the recording path is a short critical section around the buffer.
///
/// Delivery is best-effort. Payloads that fail to send are dropped, and nothing is retried.
///
/// Clients are cheap to clone, and all clones share the same buffer and sender thread. The client is stopped, flushing
/// anything still buffered, when the last clone is dropped, when [`stop`][StatsdClient::stop] is called, or when a
/// [`ClientScope`] ends.
///
/// # Sampling
///
/// Every recording method takes a sampling rate between `0.0` and `1.0`. Each call is kept with that probability, and
/// dropped otherwise, before anything else happens. Kept calls are tagged with their rate so the server can scale them
/// back up. Sampling is random, so the number of calls kept only approximates `rate * calls`.
#[derive(Clone)]
pub struct StatsdClient {
    inner: Arc<Inner>,
}

impl StatsdClient {
    /// Creates a client and starts its sender thread.
    pub(crate) fn new(
        max_payload_len: usize,
        prefix: Option<String>,
        transport: Arc<dyn Transport>,
    ) -> std::io::Result<Self> {
        let collector = Collector::new(max_payload_len).with_prefix(prefix);
        let inner = Arc::new(Inner {
            shared: Arc::new(SharedQueue::new(collector)),
            transport,
            sender: Mutex::new(None),
            hook_id: ExitRegistry::global().next_id(),
        });

        inner.start()?;
        Ok(StatsdClient { inner })
    }

    /// Changes the counter `name` by `count`.
    pub fn counter(&self, name: &str, count: i64, rate: f64) {
        self.record_counter(name, count, rate, &[]);
    }

    /// Increments the counter `name` by one.
    pub fn increment(&self, name: &str) {
        self.counter(name, 1, 1.0);
    }

    /// Decrements the counter `name` by `count`.
    pub fn decrement(&self, name: &str, count: i64, rate: f64) {
        self.counter(name, count.saturating_neg(), rate);
    }

    /// Sets the gauge `name` to `value`.
    ///
    /// StatsD reads a negative gauge value as a decrement, so setting a negative value first resets the gauge to zero.
    /// The reset is sent whenever the call itself is kept, regardless of `rate`. Non-finite values are dropped, reset
    /// included.
    pub fn gauge(&self, name: &str, value: f64, rate: f64) {
        self.record_gauge(name, value, rate, false, &[]);
    }

    /// Changes the gauge `name` by `delta`.
    pub fn gauge_delta(&self, name: &str, delta: f64, rate: f64) {
        self.record_gauge(name, delta, rate, true, &[]);
    }

    /// Records a timing of `millis` milliseconds for `name`.
    pub fn timing(&self, name: &str, millis: f64, rate: f64) {
        self.record_timing(name, millis, rate, &[]);
    }

    /// Records a timing of a whole number of milliseconds for `name`.
    pub fn timing_ms(&self, name: &str, millis: u64, rate: f64) {
        if !should_sample(rate) {
            return;
        }

        let millis = i64::try_from(millis).unwrap_or(i64::MAX);
        self.inner.shared.push(|collector| {
            collector.push_whole_timer(name, millis, rate, &[]);
        });
    }

    /// Records `duration` as a timing for `name`.
    pub fn timing_duration(&self, name: &str, duration: Duration, rate: f64) {
        self.timing(name, duration.as_secs_f64() * 1000.0, rate);
    }

    /// Adds `value` to the set `name`.
    pub fn set_add(&self, name: &str, value: i64, rate: f64) {
        if !should_sample(rate) {
            return;
        }

        self.inner.shared.push(|collector| {
            collector.push_set(name, value, rate, &[]);
        });
    }

    pub(crate) fn record_counter(&self, name: &str, count: i64, rate: f64, tags: &[Label]) {
        if !should_sample(rate) {
            return;
        }

        self.inner.shared.push(|collector| {
            collector.push_counter(name, count, rate, tags);
        });
    }

    pub(crate) fn record_gauge(&self, name: &str, value: f64, rate: f64, delta: bool, tags: &[Label]) {
        if !should_sample(rate) {
            return;
        }

        self.inner.shared.push(|collector| {
            // The collector drops non-finite values, and the reset must not go out without the value it precedes.
            if value < 0.0 && value.is_finite() && !delta {
                collector.push_gauge(name, 0.0, 1.0, false, tags);
            }
            collector.push_gauge(name, value, rate, delta, tags);
        });
    }

    pub(crate) fn record_timing(&self, name: &str, millis: f64, rate: f64, tags: &[Label]) {
        if !should_sample(rate) {
            return;
        }

        self.inner.shared.push(|collector| {
            collector.push_timer(name, millis, rate, tags);
        });
    }

    /// Creates a [`Timer`] that reports to the timing `name`.
    ///
    /// The timer doesn't record anything until it is started and stopped.
    pub fn timer(&self, name: &str, rate: f64) -> Timer {
        Timer::new(self.clone(), name.to_string(), rate)
    }

    /// Starts the sender thread, if it isn't already running.
    ///
    /// A client starts running when it's built, so this is only needed to restart a client after
    /// [`stop`][StatsdClient::stop]. Metrics recorded while the client was stopped are sent once it restarts.
    ///
    /// # Errors
    ///
    /// If the sender thread cannot be spawned, an error is returned.
    pub fn start(&self) -> std::io::Result<()> {
        self.inner.start()
    }

    /// Stops the sender thread, after it sends everything recorded so far.
    ///
    /// Blocks until the sender thread has exited. Calling this on a stopped client does nothing.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Returns `true` if the sender thread is running.
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Starts the client, if needed, and returns a guard that stops it when dropped.
    ///
    /// The guard stops the client even if the scope unwinds due to a panic.
    ///
    /// # Errors
    ///
    /// If the sender thread cannot be spawned, an error is returned.
    pub fn scope(&self) -> std::io::Result<ClientScope<'_>> {
        self.start()?;
        Ok(ClientScope { client: self })
    }
}

/// Guard returned by [`StatsdClient::scope`].
///
/// Dereferences to the client, and stops it when dropped.
pub struct ClientScope<'a> {
    client: &'a StatsdClient,
}

impl std::ops::Deref for ClientScope<'_> {
    type Target = StatsdClient;

    fn deref(&self) -> &Self::Target {
        self.client
    }
}

impl Drop for ClientScope<'_> {
    fn drop(&mut self) {
        self.client.stop();
    }
}
