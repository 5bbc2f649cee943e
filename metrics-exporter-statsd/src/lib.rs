//! A low-overhead client for sending metrics to a [StatsD][statsd] server.
//!
//! [statsd]: https://github.com/statsd/statsd
//!
//! # Usage
//!
//! ```no_run
//! # use metrics_exporter_statsd::StatsdBuilder;
//! // First, create a builder, configure it, and build a client.
//! //
//! // Building the client resolves the server address and spawns the background sender thread.
//! let client = StatsdBuilder::default()
//!     .with_remote_address("localhost:8125")
//!     .expect("failed to parse remote address")
//!     .with_prefix("my_app")
//!     .build()
//!     .expect("failed to build StatsD client");
//!
//! // Record metrics from any thread. None of these calls touch the network.
//! client.increment("requests");
//! client.gauge("queue_depth", 12.0, 1.0);
//! client.timing("request_time", 35.0, 0.1);
//! client.set_add("unique_users", 8152, 1.0);
//!
//! // Stopping the client flushes whatever hasn't been sent yet.
//! client.stop();
//! ```
//!
//! # Design
//!
//! Recording a metric serializes it into a shared buffer under a lock, signals a condition variable, and returns. A
//! single background thread per client waits on the condition variable, drains the buffer into datagram-sized
//! payloads, and sends them after releasing the lock. Recording threads never wait on network I/O, and the sender
//! never holds the lock while sending.
//!
//! Delivery is best-effort, as is usual for StatsD: a payload that fails to send is dropped, and nothing is retried.
//! Stopping a client, explicitly or by dropping it, sends everything recorded before the stop.
//!
//! ## Sampling
//!
//! Every recording method takes a sampling rate. Calls are kept with that probability, and the rate is sent along
//! with the metric so the server can scale the value back up.
//!
//! ## Shutdown
//!
//! Rust does not run destructors for values still alive when the process exits, so a client that's stored in a
//! `static`, or leaked, would never flush its last batch. Prefer scoping clients with [`StatsdClient::scope`], or
//! stopping them explicitly. As a fallback, [`shutdown`] stops every client that's still running, and can be called
//! at the end of `main`.
//!
//! ## `metrics` support
//!
//! [`StatsdRecorder`] implements [`metrics::Recorder`], so the client can be installed as the global recorder with
//! [`StatsdBuilder::install`]. Labels are sent as DogStatsD-style tags.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{BuildError, StatsdBuilder, DEFAULT_PORT};

mod client;
pub use self::client::{ClientScope, StatsdClient};

mod collector;

pub mod debugging;

mod errors;
pub use self::errors::UsageError;

mod exit;
pub use self::exit::shutdown;

mod recorder;
pub use self::recorder::StatsdRecorder;

mod sender;

mod timer;
pub use self::timer::{Timer, TimerGuard};

mod transport;
pub use self::transport::{Transport, UdpTransport};
