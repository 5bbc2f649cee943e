use std::{net::UdpSocket, time::Duration};

use metrics_exporter_statsd::StatsdBuilder;

fn server() -> UdpSocket {
    let server = UdpSocket::bind("127.0.0.1:0").expect("failed to bind test server");
    server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    server
}

fn recv_string(server: &UdpSocket) -> String {
    let mut buf = [0u8; 2048];
    let (len, _) = server.recv_from(&mut buf).expect("no datagram received");
    String::from_utf8(buf[..len].to_vec()).unwrap()
}

#[test]
fn sends_over_udp() {
    let server = server();
    let port = server.local_addr().unwrap().port();

    let client = StatsdBuilder::default()
        .with_host("127.0.0.1")
        .with_port(port)
        .with_prefix("testing")
        .build()
        .expect("failed to build client");

    // Queue both metrics while stopped, so they go out together in one datagram.
    client.stop();
    client.counter("test", 123, 1.0);
    client.gauge("test", -123.0, 1.0);
    {
        let _client = client.scope().unwrap();
    }

    let received = recv_string(&server);
    let lines: Vec<_> = received.lines().collect();
    assert_eq!(lines, ["testing.test:123|c", "testing.test:0.0|g", "testing.test:-123.0|g"]);
}

#[test]
fn payloads_respect_maximum_length() {
    let server = server();
    let addr = server.local_addr().unwrap();

    let client = StatsdBuilder::default()
        .with_remote_address(addr.to_string())
        .unwrap()
        .with_maximum_payload_length(64)
        .build()
        .expect("failed to build client");

    client.stop();
    for i in 0..20 {
        client.counter("bounded", i, 1.0);
    }
    client.start().unwrap();
    client.stop();

    let mut lines = Vec::new();
    while lines.len() < 20 {
        let payload = recv_string(&server);
        assert!(payload.len() <= 64, "payload of {} bytes", payload.len());
        lines.extend(payload.lines().map(String::from));
    }

    let expected: Vec<_> = (0..20).map(|i| format!("bounded:{i}|c")).collect();
    assert_eq!(lines, expected);
}
