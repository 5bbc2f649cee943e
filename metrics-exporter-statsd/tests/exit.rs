use std::sync::Arc;

use metrics_exporter_statsd::{debugging::DebuggingTransport, shutdown, StatsdBuilder};

// Lives in its own test binary: `shutdown` stops every client in the process.
#[test]
fn shutdown_flushes_live_clients() {
    let transport = DebuggingTransport::new();
    let client = StatsdBuilder::default()
        .with_transport(Arc::new(transport.clone()))
        .build()
        .expect("failed to build client");

    client.increment("before_exit");
    shutdown();

    assert!(!client.is_running());
    assert_eq!(transport.lines(), ["before_exit:1|c"]);

    // A stopped client doesn't send anything more when dropped.
    drop(client);
    assert_eq!(transport.lines(), ["before_exit:1|c"]);
}
