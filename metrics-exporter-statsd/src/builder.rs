use std::{
    net::{SocketAddr, ToSocketAddrs as _},
    sync::{Arc, Once},
    time::Duration,
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    client::StatsdClient,
    collector::SMALLEST_VALID_PAYLOAD,
    recorder::StatsdRecorder,
    transport::{Transport, UdpTransport},
};

/// The port StatsD servers listen on by default.
pub const DEFAULT_PORT: u16 = 8125;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_MAX_PAYLOAD_LEN: usize = 1432;
const MAX_UDP_PAYLOAD_LEN: usize = 65_507;

static MAX_UDP_SIZE_WARNING: Once = Once::new();

/// Errors that could occur while building or installing a StatsD client.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse or resolve the remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the failure.
        reason: String,
    },

    /// The maximum payload length is outside of the range that can be sent in a single datagram.
    #[error("invalid maximum payload length {len} (must be between {min} and {max})")]
    InvalidPayloadLength {
        /// The configured length.
        len: usize,
        /// Smallest allowed length.
        min: usize,
        /// Largest allowed length.
        max: usize,
    },

    /// Failed to open the transport.
    #[error("failed to open transport: {0}")]
    Transport(#[source] std::io::Error),

    /// Failed to spawn the background sender thread.
    #[error("failed to spawn background sender thread: {0}")]
    Backend(#[source] std::io::Error),

    /// Failed to install the recorder due to an existing global recorder already being installed.
    #[error("failed to install exporter as global recorder")]
    FailedToInstall,
}

/// Builder for a StatsD client.
///
/// ```no_run
/// # use metrics_exporter_statsd::StatsdBuilder;
/// let client = StatsdBuilder::default()
///     .with_host("statsd.internal")
///     .with_prefix("app")
///     .build()
///     .expect("failed to build StatsD client");
///
/// client.counter("hits", 1, 1.0);
/// ```
pub struct StatsdBuilder {
    host: String,
    port: u16,
    prefix: Option<String>,
    write_timeout: Duration,
    max_payload_len: usize,
    transport: Option<Arc<dyn Transport>>,
}

impl StatsdBuilder {
    /// Set the host of the StatsD server.
    ///
    /// The host is resolved once, when the client is built. Defaults to `127.0.0.1`.
    #[must_use]
    pub fn with_host<H>(mut self, host: H) -> Self
    where
        H: Into<String>,
    {
        self.host = host.into();
        self
    }

    /// Set the port of the StatsD server.
    ///
    /// Defaults to [`DEFAULT_PORT`].
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the host and port of the StatsD server from an address in the format of `<host>:<port>`.
    ///
    /// # Errors
    ///
    /// If the address doesn't have a valid port, an error will be returned indicating the reason.
    pub fn with_remote_address<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        let addr = addr.as_ref();
        let (host, port) = addr.rsplit_once(':').ok_or_else(|| BuildError::InvalidRemoteAddress {
            reason: format!("'{addr}' is missing a port"),
        })?;
        let port = port.parse::<u16>().map_err(|e| BuildError::InvalidRemoteAddress {
            reason: format!("invalid port '{port}': {e}"),
        })?;

        // Bracketed IPv6 literals, like `[::1]:8125`, resolve without their brackets.
        self.host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        self.port = port;
        Ok(self)
    }

    /// Set the prefix applied to every metric name.
    ///
    /// Metric names are sent as `<prefix>.<name>`. An empty prefix leaves names unchanged. Defaults to no prefix.
    #[must_use]
    pub fn with_prefix<P>(mut self, prefix: P) -> Self
    where
        P: Into<String>,
    {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set the write timeout for sending payloads.
    ///
    /// When the write timeout is reached, the payload being sent at the time will be dropped without retrying.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the maximum payload length for sending metrics.
    ///
    /// Several metrics are packed into each datagram, up to this many bytes. A single metric larger than this is
    /// dropped.
    ///
    /// The default of 1432 bytes fits in a single Ethernet frame. Networks with jumbo frames, or servers on the same
    /// host, can use larger payloads.
    #[must_use]
    pub fn with_maximum_payload_length(mut self, max_payload_len: usize) -> Self {
        self.max_payload_len = max_payload_len;
        self
    }

    /// Accepted for compatibility with other StatsD clients, and ignored.
    ///
    /// Payload sizing is controlled by [`with_maximum_payload_length`][Self::with_maximum_payload_length]. A warning
    /// is logged the first time this is called.
    #[must_use]
    pub fn with_max_udp_size(self, _max_udp_size: usize) -> Self {
        MAX_UDP_SIZE_WARNING.call_once(|| {
            warn!("`max_udp_size` is not supported and will be ignored. Use `with_maximum_payload_length` instead.");
        });
        self
    }

    /// Send payloads over the given transport instead of UDP.
    ///
    /// The host and port are not resolved when a custom transport is set.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    fn resolve(&self) -> Result<SocketAddr, BuildError> {
        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| BuildError::InvalidRemoteAddress { reason: e.to_string() })?
            .collect::<Vec<_>>();

        // Prefer IPv4, to match the local socket most StatsD servers listen on.
        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| BuildError::InvalidRemoteAddress {
                reason: format!("'{}' did not resolve to any address", self.host),
            })
    }

    /// Builds the client and starts its background sender thread.
    ///
    /// # Errors
    ///
    /// If the maximum payload length is invalid, the host can't be resolved, the socket can't be opened, or the sender
    /// thread can't be spawned, an error is returned. No thread is started if building fails.
    pub fn build(self) -> Result<StatsdClient, BuildError> {
        let min = SMALLEST_VALID_PAYLOAD.len();
        if !(min..=MAX_UDP_PAYLOAD_LEN).contains(&self.max_payload_len) {
            return Err(BuildError::InvalidPayloadLength {
                len: self.max_payload_len,
                min,
                max: MAX_UDP_PAYLOAD_LEN,
            });
        }

        let transport = match self.transport {
            Some(ref transport) => Arc::clone(transport),
            None => {
                let remote_addr = self.resolve()?;
                debug!(%remote_addr, "Resolved StatsD server address.");

                let transport = UdpTransport::connect(remote_addr, self.write_timeout)
                    .map_err(BuildError::Transport)?;
                Arc::new(transport)
            }
        };

        StatsdClient::new(self.max_payload_len, self.prefix, transport).map_err(BuildError::Backend)
    }

    /// Builds a client, and wraps it in a recorder.
    ///
    /// # Errors
    ///
    /// See [`build`][Self::build].
    pub fn build_recorder(self) -> Result<StatsdRecorder, BuildError> {
        self.build().map(StatsdRecorder::new)
    }

    /// Builds a client, and installs it as the global recorder.
    ///
    /// # Errors
    ///
    /// If the client can't be built, or if a global recorder is already installed, an error will be returned.
    pub fn install(self) -> Result<(), BuildError> {
        let recorder = self.build_recorder()?;

        metrics::set_global_recorder(recorder).map_err(|_| BuildError::FailedToInstall)
    }
}

impl Default for StatsdBuilder {
    fn default() -> Self {
        StatsdBuilder {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            prefix: None,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            transport: None,
        }
    }
}
