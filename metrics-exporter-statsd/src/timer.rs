use quanta::{Clock, Instant};
use tracing::debug;

use crate::{client::StatsdClient, errors::UsageError};

/// Measures how long something takes, and reports it as a timing.
///
/// A timer can be driven by hand, with [`start`][Timer::start] and [`stop`][Timer::stop], or wrapped around a closure
/// with [`time`][Timer::time] or a scope with [`guard`][Timer::guard]. Either way, each measurement is sent exactly once.
///
/// Durations are measured with a monotonic clock and reported in whole milliseconds, rounded to the nearest
/// millisecond.
///
/// ```no_run
/// # use metrics_exporter_statsd::StatsdBuilder;
/// let client = StatsdBuilder::default().build().expect("failed to build client");
///
/// let mut timer = client.timer("db.query", 1.0);
/// timer.start();
/// // ... run the query ...
/// timer.stop(true).expect("timer was started");
///
/// let rows = client.timer("db.query", 1.0).time(|| 42);
/// # let _ = rows;
/// ```
pub struct Timer {
    client: StatsdClient,
    name: String,
    rate: f64,
    clock: Clock,
    started_at: Option<Instant>,
    elapsed_ms: Option<u64>,
    sent: bool,
}

impl Timer {
    pub(crate) fn new(client: StatsdClient, name: String, rate: f64) -> Self {
        Timer {
            client,
            name,
            rate,
            clock: Clock::new(),
            started_at: None,
            elapsed_ms: None,
            sent: false,
        }
    }

    /// Replaces the clock used to measure durations.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Starts measuring.
    ///
    /// Starting an already started timer restarts it, discarding any previous measurement.
    pub fn start(&mut self) -> &mut Self {
        self.elapsed_ms = None;
        self.sent = false;
        self.started_at = Some(self.clock.now());
        self
    }

    /// Stops measuring, and sends the measurement if `send` is `true`.
    ///
    /// # Errors
    ///
    /// If the timer was never started, [`UsageError::TimerNotStarted`] is returned. If `send` is `true` and the
    /// measurement was already sent, [`UsageError::AlreadySent`] is returned.
    pub fn stop(&mut self, send: bool) -> Result<&mut Self, UsageError> {
        let started_at = self.started_at.ok_or(UsageError::TimerNotStarted)?;

        let elapsed = self.clock.now().duration_since(started_at);
        self.elapsed_ms = Some((elapsed.as_secs_f64() * 1000.0).round() as u64);

        if send {
            self.send()?;
        }

        Ok(self)
    }

    /// Sends the measurement.
    ///
    /// # Errors
    ///
    /// If nothing has been measured yet, [`UsageError::NothingRecorded`] is returned. If the measurement was already
    /// sent, [`UsageError::AlreadySent`] is returned.
    pub fn send(&mut self) -> Result<(), UsageError> {
        let elapsed_ms = self.elapsed_ms.ok_or(UsageError::NothingRecorded)?;
        if self.sent {
            return Err(UsageError::AlreadySent);
        }

        self.sent = true;
        self.client.timing_ms(&self.name, elapsed_ms, self.rate);
        Ok(())
    }

    /// Returns the last measured duration, in milliseconds.
    pub fn elapsed_ms(&self) -> Option<u64> {
        self.elapsed_ms
    }

    /// Returns `true` if the last measurement has been sent.
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Starts the timer, and returns a guard that stops it and sends the measurement when dropped.
    ///
    /// The measurement is sent even if the scope unwinds due to a panic.
    pub fn guard(&mut self) -> TimerGuard<'_> {
        self.start();
        TimerGuard { timer: self }
    }

    /// Runs `f`, and sends how long it took.
    pub fn time<F, T>(&mut self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let _guard = self.guard();
        f()
    }
}

/// Guard returned by [`Timer::guard`].
pub struct TimerGuard<'a> {
    timer: &'a mut Timer,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.timer.stop(true) {
            debug!(error = %e, timer = %self.timer.name, "Timer guard could not send its measurement.");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{panic, sync::Arc, time::Duration};

    use quanta::Clock;

    use crate::{
        client::StatsdClient, debugging::DebuggingTransport, errors::UsageError, timer::Timer,
    };

    fn client() -> (StatsdClient, DebuggingTransport) {
        let transport = DebuggingTransport::new();
        let client = StatsdClient::new(1432, Some("testing".to_string()), Arc::new(transport.clone()))
            .unwrap();
        (client, transport)
    }

    #[test]
    fn measures_with_clock() {
        let (client, transport) = client();
        let (clock, mock) = Clock::mock();

        let mut timer = client.timer("test", 1.0).with_clock(clock);
        timer.start();
        mock.increment(Duration::from_micros(100_400));
        timer.stop(true).unwrap();

        assert_eq!(timer.elapsed_ms(), Some(100));
        assert!(timer.is_sent());

        client.stop();
        assert_eq!(transport.lines(), ["testing.test:100|ms"]);
    }

    #[test]
    fn rounds_half_up() {
        let (client, _transport) = client();
        let (clock, mock) = Clock::mock();

        let mut timer = client.timer("test", 1.0).with_clock(clock);
        timer.start();
        mock.increment(Duration::from_micros(2_500));
        timer.stop(false).unwrap();

        assert_eq!(timer.elapsed_ms(), Some(3));
        assert!(!timer.is_sent());
    }

    #[test]
    fn usage_errors() {
        let (client, transport) = client();
        let mut timer = client.timer("test", 1.0);

        assert_eq!(timer.stop(true).err(), Some(UsageError::TimerNotStarted));
        assert_eq!(timer.send(), Err(UsageError::NothingRecorded));

        timer.start();
        assert_eq!(timer.send(), Err(UsageError::NothingRecorded));
        timer.stop(true).unwrap();
        assert_eq!(timer.send(), Err(UsageError::AlreadySent));

        client.stop();
        assert_eq!(transport.lines().len(), 1);
    }

    #[test]
    fn restart_resets_measurement() {
        let (client, transport) = client();
        let (clock, mock) = Clock::mock();

        let mut timer = client.timer("test", 1.0).with_clock(clock);
        timer.start();
        mock.increment(Duration::from_millis(5));
        timer.stop(true).unwrap();

        timer.start();
        assert_eq!(timer.elapsed_ms(), None);
        assert!(!timer.is_sent());
        mock.increment(Duration::from_millis(7));
        timer.stop(true).unwrap();

        client.stop();
        assert_eq!(transport.lines(), ["testing.test:5|ms", "testing.test:7|ms"]);
    }

    #[test]
    fn time_closure() {
        let (client, transport) = client();
        let (clock, mock) = Clock::mock();

        let mut timer = client.timer("test", 1.0).with_clock(clock);
        let value = timer.time(|| {
            mock.increment(Duration::from_millis(42));
            "done"
        });

        assert_eq!(value, "done");
        client.stop();
        assert_eq!(transport.lines(), ["testing.test:42|ms"]);
    }

    #[test]
    fn guard_sends_on_panic() {
        let (client, transport) = client();
        let (clock, mock) = Clock::mock();

        let mut timer: Timer = client.timer("test", 1.0).with_clock(clock);
        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            let _guard = timer.guard();
            mock.increment(Duration::from_millis(13));
            panic!("boom");
        }));

        assert!(result.is_err());
        client.stop();
        assert_eq!(transport.lines(), ["testing.test:13|ms"]);
    }
}
