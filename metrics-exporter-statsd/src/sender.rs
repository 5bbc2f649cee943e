use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::{
    collector::{Batch, Collector},
    errors::UsageError,
    transport::Transport,
};

const SENDER_THREAD_NAME: &str = "statsd-sender";

/// State guarded by the queue lock.
struct Queue {
    collector: Collector,

    // Only ever read or written while holding the lock.
    running: bool,
}

/// The hand-off point between threads recording metrics and the sender thread.
///
/// Producers push into the collector and signal the condition variable. The sender waits on the condition variable,
/// drains the collector, and transmits outside of the lock.
pub(crate) struct SharedQueue {
    queue: Mutex<Queue>,
    cv: Condvar,
}

impl SharedQueue {
    /// Creates a new `SharedQueue` around the given collector.
    pub fn new(collector: Collector) -> Self {
        SharedQueue { queue: Mutex::new(Queue { collector, running: false }), cv: Condvar::new() }
    }

    /// Pushes into the collector under the lock, and wakes the sender.
    ///
    /// Never performs I/O, so the lock is only held for as long as it takes to serialize the metric.
    pub fn push<F>(&self, f: F)
    where
        F: FnOnce(&mut Collector),
    {
        let mut queue = self.queue.lock();
        f(&mut queue.collector);
        self.cv.notify_one();
    }
}

/// Handle to a running sender thread.
///
/// A sender is started once and stopped once. Restarting a client creates a new sender against the same queue.
pub(crate) struct Sender {
    shared: Arc<SharedQueue>,
    handle: JoinHandle<()>,
}

impl Sender {
    /// Marks the queue as running and spawns the sender thread.
    ///
    /// # Errors
    ///
    /// If the thread cannot be spawned, the queue is marked as stopped again and an error is returned.
    pub fn start(shared: Arc<SharedQueue>, transport: Arc<dyn Transport>) -> io::Result<Self> {
        shared.queue.lock().running = true;

        let worker = Worker { shared: Arc::clone(&shared), transport };
        let spawned = thread::Builder::new()
            .name(SENDER_THREAD_NAME.to_string())
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => Ok(Sender { shared, handle }),
            Err(e) => {
                shared.queue.lock().running = false;
                Err(e)
            }
        }
    }

    /// Asks the sender thread to send everything still queued and then exit.
    ///
    /// Returns immediately. Use [`join`][Sender::join] to wait for the thread to finish.
    ///
    /// # Errors
    ///
    /// If the sender has already been asked to stop, [`UsageError::SenderNotRunning`] is returned.
    pub fn ask_stop(&self) -> Result<(), UsageError> {
        let mut queue = self.shared.queue.lock();
        if !queue.running {
            return Err(UsageError::SenderNotRunning);
        }

        queue.running = false;
        self.shared.cv.notify_one();
        Ok(())
    }

    /// Waits for the sender thread to exit.
    ///
    /// # Errors
    ///
    /// If the sender thread panicked, the panic payload is returned.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }

    /// Returns `true` if the sender thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

struct Worker {
    shared: Arc<SharedQueue>,
    transport: Arc<dyn Transport>,
}

impl Worker {
    fn run(self) {
        debug!(transport = self.transport.transport_id(), "Sender thread started.");

        let final_batch = loop {
            let mut queue = self.shared.queue.lock();
            if !queue.running {
                break queue.collector.flush();
            }

            // Metrics pushed while the last batch was being sent had nobody waiting on their notification, so only wait
            // when there's nothing left to drain. A wakeup doesn't always mean there's new data, so an empty drain is
            // fine.
            if queue.collector.is_empty() {
                self.shared.cv.wait(&mut queue);
            }
            let batch = queue.collector.flush();

            // The stop request may have arrived while we were waiting, so `running` has to be checked again. The drain
            // above happened in the same critical section, so it holds everything pushed before the stop request.
            if !queue.running {
                break batch;
            }

            drop(queue);
            self.transmit(batch);
        };

        self.transmit(final_batch);

        debug!("Sender thread stopped.");
    }

    /// Sends every payload in the batch, in order, dropping any that fail.
    fn transmit(&self, batch: Batch) {
        let points_dropped = batch.points_dropped();
        if batch.len() == 0 && points_dropped == 0 {
            return;
        }

        let mut payloads_sent = 0;
        let mut payloads_dropped = 0;

        for payload in batch {
            match self.transport.send(&payload) {
                Ok(_) => payloads_sent += 1,
                Err(_) => payloads_dropped += 1,
            }

            trace!(payload_len = payload.len(), "Sent payload.");
        }

        debug!(payloads_sent, payloads_dropped, points_dropped, "Finished sending payloads.");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{mpsc, Arc},
        thread,
        time::Duration,
    };

    use super::{Sender, SharedQueue};
    use crate::{collector::Collector, debugging::DebuggingTransport, errors::UsageError};

    fn shared_queue() -> Arc<SharedQueue> {
        Arc::new(SharedQueue::new(Collector::new(1432)))
    }

    #[test]
    fn drains_on_stop() {
        let shared = shared_queue();
        let transport = DebuggingTransport::new();
        let sender = Sender::start(Arc::clone(&shared), Arc::new(transport.clone())).unwrap();

        shared.push(|c| {
            c.push_counter("test", 123, 1.0, &[]);
        });

        sender.ask_stop().unwrap();
        sender.join().unwrap();

        assert_eq!(transport.lines(), ["test:123|c"]);
    }

    #[test]
    fn ask_stop_twice_is_a_usage_error() {
        let shared = shared_queue();
        let sender = Sender::start(shared, Arc::new(DebuggingTransport::new())).unwrap();

        sender.ask_stop().unwrap();
        assert_eq!(sender.ask_stop(), Err(UsageError::SenderNotRunning));
        sender.join().unwrap();
    }

    #[test]
    fn transport_errors_are_swallowed() {
        let shared = shared_queue();
        let transport = DebuggingTransport::new();
        transport.fail_sends(true);
        let sender = Sender::start(Arc::clone(&shared), Arc::new(transport.clone())).unwrap();

        for i in 0..10 {
            shared.push(|c| {
                c.push_counter("lost", i, 1.0, &[]);
            });
        }

        sender.ask_stop().unwrap();
        sender.join().unwrap();

        assert!(transport.payloads().is_empty());
        assert!(transport.failed_sends() > 0);
    }

    #[test]
    fn stop_racing_producers_does_not_hang() {
        // Stop immediately after pushing, over and over, so the stop signal regularly lands before the sender starts
        // waiting.
        let (done_tx, done_rx) = mpsc::channel();

        thread::spawn(move || {
            for _ in 0..200 {
                let shared = shared_queue();
                let transport = DebuggingTransport::new();
                let sender =
                    Sender::start(Arc::clone(&shared), Arc::new(transport.clone())).unwrap();

                shared.push(|c| {
                    c.push_counter("race", 1, 1.0, &[]);
                });
                sender.ask_stop().unwrap();
                sender.join().unwrap();

                assert_eq!(transport.lines(), ["race:1|c"]);
            }

            done_tx.send(()).unwrap();
        });

        done_rx
            .recv_timeout(Duration::from_secs(30))
            .expect("sender did not stop in time");
    }

    #[test]
    fn stop_without_data_exits() {
        let shared = shared_queue();
        let transport = DebuggingTransport::new();
        let sender = Sender::start(shared, Arc::new(transport.clone())).unwrap();
        assert!(!sender.is_finished());

        sender.ask_stop().unwrap();
        sender.join().unwrap();

        assert!(transport.payloads().is_empty());
    }
}
