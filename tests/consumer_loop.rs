//! Receive loop behaviour: idle timeouts, reconnects and shutdown.

mod common;

use std::time::Duration;
use common::*;
use routing_daemon::lifecycle::Shutdown;

#[tokio::test]
async fn test_run_processes_messages_and_reconnects() {
    let h = Harness::with_config(|c| c.broker.update_interval_secs = 1);
    let bus = MemoryBus::new();
    bus.push_message("m-1", &add_endpoint_body("blog", "alice", "10.0.0.5", 8080, "small"));
    bus.push(Delivery::Disconnect);
    bus.push_message("m-2", &add_endpoint_body("blog", "alice", "10.0.0.6", 8080, "small"));

    let mut consumer = h.consumer(bus.clone()).await;
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();

    let watcher = {
        let bus = bus.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            while bus.acks().len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            shutdown.trigger();
        })
    };

    tokio::time::timeout(Duration::from_secs(10), consumer.run(rx))
        .await
        .expect("consumer did not stop")
        .unwrap();
    watcher.await.unwrap();

    assert_eq!(bus.acks(), vec!["m-1", "m-2"]);
    assert_eq!(bus.connects(), 2);
    assert_eq!(bus.pending(), 0);
    let members = consumer
        .dispatcher()
        .controller()
        .members("pool_ose_blog_alice")
        .await
        .unwrap();
    assert_eq!(members.len(), 2);
}

#[tokio::test]
async fn test_idle_timeout_keeps_connection() {
    let h = Harness::with_config(|c| c.broker.update_interval_secs = 1);
    let bus = MemoryBus::new();
    let mut consumer = h.consumer(bus.clone()).await;
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();

    let publisher = {
        let bus = bus.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            bus.push_message("m-late", &add_endpoint_body("blog", "alice", "10.0.0.5", 8080, "small"));
            while bus.acks().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            shutdown.trigger();
        })
    };

    tokio::time::timeout(Duration::from_secs(10), consumer.run(rx))
        .await
        .expect("consumer did not stop")
        .unwrap();
    publisher.await.unwrap();

    assert_eq!(bus.acks(), vec!["m-late"]);
    assert_eq!(bus.connects(), 1);
    assert!(consumer.dispatcher().controller().contains("pool_ose_blog_alice"));
}

#[tokio::test]
async fn test_shutdown_while_idle() {
    let h = Harness::new();
    let bus = MemoryBus::new();
    let mut consumer = h.consumer(bus.clone()).await;

    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    shutdown.trigger();

    tokio::time::timeout(Duration::from_secs(5), consumer.run(rx))
        .await
        .expect("consumer did not stop")
        .unwrap();
    assert!(bus.acks().is_empty());
}
