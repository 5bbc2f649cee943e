use std::{thread, time::Duration};

use metrics_exporter_statsd::StatsdBuilder;

fn main() {
    tracing_subscriber::fmt::init();

    let client = StatsdBuilder::default()
        .with_remote_address("localhost:8125")
        .expect("failed to parse remote address")
        .with_prefix("example")
        .build()
        .expect("failed to build StatsD client");

    let mut queue_depth = 0.0;
    for iteration in 0..100 {
        client.increment("loops");
        client.set_add("iterations", iteration, 1.0);

        // Pretend to do some work, and time it.
        let mut timer = client.timer("work", 0.5);
        timer.time(|| thread::sleep(Duration::from_millis(rand::random::<u64>() % 50)));

        let delta = if rand::random::<bool>() { 1.0 } else { -1.0 };
        queue_depth += delta;
        client.gauge_delta("queue_depth", delta, 1.0);
    }

    client.gauge("queue_depth", queue_depth, 1.0);

    // Sends anything still buffered before exiting.
    client.stop();
}
