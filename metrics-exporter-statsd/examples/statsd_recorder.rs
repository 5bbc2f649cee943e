use std::{thread, time::Duration};

use metrics::{counter, gauge, histogram};
use metrics_exporter_statsd::StatsdBuilder;

fn main() {
    tracing_subscriber::fmt::init();

    StatsdBuilder::default()
        .with_remote_address("localhost:8125")
        .expect("failed to parse remote address")
        .install()
        .expect("failed to install StatsD recorder");

    gauge!("testing").set(42.0);

    let server_loops = counter!("tcp_server_loops", "system" => "foo");
    let server_loops_delta_ms = histogram!("tcp_server_loop_delta_ms", "system" => "foo");

    for _ in 0..50 {
        server_loops.increment(1);
        server_loops_delta_ms.record(rand::random::<f64>() * 100.0);

        if rand::random::<bool>() {
            gauge!("lucky_iterations").increment(1.0);
        } else {
            gauge!("lucky_iterations").decrement(1.0);
        }

        thread::sleep(Duration::from_millis(20));
    }

    // The global recorder is never dropped, so stop it explicitly to flush what's left.
    metrics_exporter_statsd::shutdown();
}
