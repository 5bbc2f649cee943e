//! In-process transport for inspecting what a client sends.
use std::{io, sync::Arc};

use parking_lot::Mutex;

use crate::transport::Transport;

#[derive(Default)]
struct Captured {
    payloads: Vec<Vec<u8>>,
    fail_sends: bool,
    failed_sends: usize,
}

/// A transport that captures payloads in memory instead of sending them.
///
/// Clones share the same captured state, so one clone can be handed to the client while another is kept to inspect
/// the results.
#[derive(Clone, Default)]
pub struct DebuggingTransport {
    captured: Arc<Mutex<Captured>>,
}

impl DebuggingTransport {
    /// Creates a new `DebuggingTransport`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent send fail (or succeed again), to simulate an unreachable server.
    pub fn fail_sends(&self, fail: bool) {
        self.captured.lock().fail_sends = fail;
    }

    /// Returns the number of sends that were failed on purpose.
    pub fn failed_sends(&self) -> usize {
        self.captured.lock().failed_sends
    }

    /// Returns every payload captured so far, in the order they were sent.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.captured.lock().payloads.clone()
    }

    /// Returns every metric line captured so far, in the order they were sent.
    ///
    /// Payloads holding several lines are split apart.
    pub fn lines(&self) -> Vec<String> {
        self.captured
            .lock()
            .payloads
            .iter()
            .flat_map(|payload| String::from_utf8_lossy(payload).split('\n').map(String::from).collect::<Vec<_>>())
            .collect()
    }

    /// Clears all captured payloads.
    pub fn clear(&self) {
        self.captured.lock().payloads.clear();
    }
}

impl Transport for DebuggingTransport {
    fn send(&self, payload: &[u8]) -> io::Result<usize> {
        let mut captured = self.captured.lock();
        if captured.fail_sends {
            captured.failed_sends += 1;
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "sends are failing"));
        }

        captured.payloads.push(payload.to_vec());
        Ok(payload.len())
    }

    fn transport_id(&self) -> &'static str {
        "debug"
    }
}

#[cfg(test)]
mod tests {
    use super::DebuggingTransport;
    use crate::transport::Transport as _;

    #[test]
    fn captures_fails_and_clears() {
        let transport = DebuggingTransport::new();
        let observer = transport.clone();

        transport.send(b"a:1|c\nb:2|c").unwrap();
        assert_eq!(observer.payloads(), [b"a:1|c\nb:2|c".to_vec()]);
        assert_eq!(observer.lines(), ["a:1|c", "b:2|c"]);

        observer.fail_sends(true);
        assert!(transport.send(b"c:3|c").is_err());
        assert_eq!(observer.failed_sends(), 1);
        assert_eq!(observer.lines().len(), 2);

        observer.fail_sends(false);
        observer.clear();
        assert!(observer.payloads().is_empty());

        transport.send(b"d:4|c").unwrap();
        assert_eq!(observer.lines(), ["d:4|c"]);
        assert_eq!(observer.failed_sends(), 1);
    }
}
