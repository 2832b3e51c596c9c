//! Load testing for the tunnel relay.

use std::time::{Duration, Instant};

use tunnel_relay::protocol::Command;

mod common;

#[tokio::test]
async fn test_concurrent_sessions() {
    // 1. Setup destination and relay
    let destination = common::start_echo_destination().await;
    let (relay, shutdown) = common::start_relay(common::relay_config()).await;

    // 2. Run sessions
    let concurrency = 20;
    let messages_per_session = 25;
    let start = Instant::now();

    let mut tasks = Vec::new();
    for session in 0..concurrency {
        tasks.push(tokio::spawn(async move {
            let mut client = common::connect(relay).await;
            let mut latencies = Vec::new();

            let opening = format!("s{session}-open");
            let sent = Instant::now();
            common::send(
                &mut client,
                &common::request(Command::Tcp, "127.0.0.1", destination.port(), opening.as_bytes()),
            )
            .await;
            let reply = common::recv(&mut client).await.unwrap();
            assert_eq!(&reply[2..], format!("echo:{opening}").as_bytes());
            latencies.push(sent.elapsed());

            for i in 0..messages_per_session {
                let message = format!("s{session}-m{i}");
                let sent = Instant::now();
                common::send(&mut client, message.as_bytes()).await;
                let reply = common::recv(&mut client).await.unwrap();
                assert_eq!(reply, format!("echo:{message}").into_bytes());
                latencies.push(sent.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies: Vec<Duration> = Vec::new();
    for task in tasks {
        all_latencies.extend(task.await.unwrap());
    }

    let duration = start.elapsed();
    let total = all_latencies.len();
    assert_eq!(total, concurrency * (messages_per_session + 1));

    all_latencies.sort();
    let p50 = all_latencies[total / 2];
    let p99 = all_latencies[(total as f64 * 0.99) as usize];

    println!("\n--- Load Test Results ---");
    println!("Sessions:        {}", concurrency);
    println!("Round trips:     {}", total);
    println!("Total Duration:  {:?}", duration);
    println!("Round trips/sec: {:.2}", total as f64 / duration.as_secs_f64());
    println!("P50 Latency:     {:?}", p50);
    println!("P99 Latency:     {:?}", p99);
    println!("-------------------------\n");

    shutdown.trigger();
}
