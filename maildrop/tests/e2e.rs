//! End-to-end tests over real loopback TCP and an in-process directory.
//!
//! Two (or more) mailboxes share a `MemoryDirectory`, register their
//! identities, and exchange messages through the full pipeline:
//! resolution, pooled connections, framing, and the inbound listener.

use std::rc::Rc;
use std::time::Duration;

use maildrop::{
    EventReceiver, Mailbox, MailboxConfig, MailboxError, MailboxEvent, MemoryDirectory,
    RegistrationState,
};

/// Create a local tokio runtime and drive the future on a LocalSet
/// (mailboxes spawn their background tasks with `spawn_local`).
fn run_local<F: std::future::Future>(future: F) -> F::Output {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let local = tokio::task::LocalSet::new();
    runtime.block_on(local.run_until(future))
}

fn test_config(identity: &str) -> MailboxConfig {
    MailboxConfig::default()
        .with_identity(identity)
        .with_retry_policy(2, Duration::from_millis(10))
        .with_connect_timeout(Duration::from_secs(1))
}

/// Start a mailbox, take its events, and consume the leading `Ready`.
async fn start_ready(
    config: MailboxConfig,
    directory: Rc<MemoryDirectory>,
) -> (Mailbox, EventReceiver) {
    let mut mailbox = Mailbox::start(config, directory).await.expect("start");
    let mut events = mailbox.take_events().expect("events not yet taken");

    match events.recv().await {
        Some(MailboxEvent::Ready { address }) => {
            assert_eq!(address, mailbox.local_address());
        }
        other => panic!("expected Ready, got {:?}", other),
    }
    (mailbox, events)
}

/// Receive the next `Message` event, skipping unrelated events.
async fn next_message(events: &mut EventReceiver, wait: Duration) -> Vec<u8> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("timed out waiting for message")
            .expect("event channel closed");
        if let MailboxEvent::Message(payload) = event {
            return payload;
        }
    }
}

#[test]
fn test_alice_bob_roundtrip_exactly_once() {
    run_local(async {
        let directory = Rc::new(MemoryDirectory::new());
        let (alice, mut alice_events) =
            start_ready(test_config("alice"), directory.clone()).await;
        let (bob, _bob_events) = start_ready(test_config("bob"), directory.clone()).await;

        assert_eq!(alice.registration_state(), RegistrationState::Refreshing);

        bob.send("alice", b"hi").await.expect("send");

        let payload = next_message(&mut alice_events, Duration::from_secs(5)).await;
        assert_eq!(payload, b"hi");

        // Exactly once: nothing else arrives.
        let extra = tokio::time::timeout(Duration::from_millis(200), alice_events.recv()).await;
        assert!(extra.is_err(), "unexpected second event: {:?}", extra);

        let _ = (alice, bob);
    });
}

#[test]
fn test_500_one_byte_messages_in_order() {
    run_local(async {
        let directory = Rc::new(MemoryDirectory::new());
        let (_alice, mut alice_events) =
            start_ready(test_config("alice"), directory.clone()).await;
        let (bob, _bob_events) = start_ready(test_config("bob"), directory.clone()).await;

        for i in 0..500u32 {
            bob.send("alice", &[(i % 256) as u8]).await.expect("send");
        }

        for i in 0..500u32 {
            let payload = next_message(&mut alice_events, Duration::from_secs(10)).await;
            assert_eq!(payload.len(), 1, "message {} has wrong length", i);
            assert_eq!(payload[0], (i % 256) as u8, "message {} out of order", i);
        }
    });
}

#[test]
fn test_million_byte_payload_reassembly() {
    run_local(async {
        let directory = Rc::new(MemoryDirectory::new());
        let (_alice, mut alice_events) =
            start_ready(test_config("alice"), directory.clone()).await;
        let (bob, _bob_events) = start_ready(test_config("bob"), directory.clone()).await;

        let payload: Vec<u8> = (0..1_000_000).map(|i| (i % 251) as u8).collect();
        bob.send("alice", &payload).await.expect("send");

        let received = next_message(&mut alice_events, Duration::from_secs(30)).await;
        assert_eq!(received.len(), 1_000_000);
        assert_eq!(received, payload);
    });
}

#[test]
fn test_self_send_delivers() {
    run_local(async {
        let directory = Rc::new(MemoryDirectory::new());
        let (mailbox, mut events) = start_ready(test_config("solo"), directory).await;

        let identity = mailbox.identity().to_string();
        mailbox.send(&identity, b"loopback").await.expect("send");

        let payload = next_message(&mut events, Duration::from_secs(5)).await;
        assert_eq!(payload, b"loopback");
    });
}

#[test]
fn test_unknown_identity_fails_after_exact_budget() {
    run_local(async {
        let directory = Rc::new(MemoryDirectory::new());
        let (bob, _events) = start_ready(test_config("bob"), directory).await;

        // Bounded: must resolve (to an error) well before this timeout.
        let result = tokio::time::timeout(Duration::from_secs(5), bob.send("ghost", b"hi"))
            .await
            .expect("send must not hang");

        match result {
            Err(MailboxError::DeliveryFailed {
                identity, attempts, ..
            }) => {
                assert_eq!(identity, "ghost");
                // Initial attempt plus the configured two retries.
                assert_eq!(attempts, 3);
            }
            other => panic!("expected DeliveryFailed, got {:?}", other),
        }
    });
}

#[test]
fn test_oversize_payload_fails_without_retry() {
    run_local(async {
        let directory = Rc::new(MemoryDirectory::new());
        let (bob, _events) = start_ready(test_config("bob"), directory).await;

        let payload = vec![0u8; maildrop::MAX_PAYLOAD_SIZE + 1];
        let result = bob.send("anyone", &payload).await;
        assert!(matches!(result, Err(MailboxError::Frame(_))));
    });
}

#[test]
fn test_stale_address_recovers_after_rebind() {
    run_local(async {
        let directory = Rc::new(MemoryDirectory::new());
        let (mut alice_one, mut alice_one_events) =
            start_ready(test_config("alice"), directory.clone()).await;
        let (bob, _bob_events) = start_ready(test_config("bob"), directory.clone()).await;

        bob.send("alice", b"one").await.expect("send one");
        assert_eq!(
            next_message(&mut alice_one_events, Duration::from_secs(5)).await,
            b"one"
        );

        // First instance goes away; bob's cached address and pooled
        // connection both go stale.
        alice_one.close().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A new instance re-registers the same identity at a fresh port.
        let (_alice_two, mut alice_two_events) =
            start_ready(test_config("alice"), directory.clone()).await;

        // The first attempt hits the dead address, invalidates, and the
        // retry resolves the new registration.
        bob.send("alice", b"two").await.expect("send two");
        assert_eq!(
            next_message(&mut alice_two_events, Duration::from_secs(5)).await,
            b"two"
        );
    });
}

#[test]
fn test_protocol_error_tears_down_one_connection_only() {
    run_local(async {
        use tokio::io::AsyncWriteExt;

        let directory = Rc::new(MemoryDirectory::new());
        let (alice, mut alice_events) =
            start_ready(test_config("alice"), directory.clone()).await;
        let (bob, _bob_events) = start_ready(test_config("bob"), directory.clone()).await;

        // A raw client speaking garbage: not hex digits, so the decoder
        // reports a protocol error and the connection is torn down.
        let mut rogue = tokio::net::TcpStream::connect(alice.local_address())
            .await
            .expect("connect");
        rogue.write_all(b"zz|garbage").await.expect("write");

        match tokio::time::timeout(Duration::from_secs(5), alice_events.recv())
            .await
            .expect("expected protocol error event")
        {
            Some(MailboxEvent::Error(MailboxError::Protocol { .. })) => {}
            other => panic!("expected protocol error, got {:?}", other),
        }

        // The listener and other connections are unaffected.
        bob.send("alice", b"still works").await.expect("send");
        assert_eq!(
            next_message(&mut alice_events, Duration::from_secs(5)).await,
            b"still works"
        );
    });
}

#[test]
fn test_refresh_longer_than_ttl_rejected_at_startup() {
    run_local(async {
        let directory = Rc::new(MemoryDirectory::new());
        let config = MailboxConfig::default()
            .with_identity("misconfigured")
            .with_ttl(Duration::from_secs(10), Duration::from_secs(60));

        let result = Mailbox::start(config, directory).await;
        assert!(matches!(result, Err(MailboxError::Config(_))));
    });
}

#[test]
fn test_heartbeat_keeps_registration_alive() {
    run_local(async {
        let directory = Rc::new(MemoryDirectory::new());
        let config = test_config("alice").with_ttl(
            Duration::from_millis(100),
            Duration::from_millis(30),
        );
        let (_alice, _events) = start_ready(config, directory.clone()).await;
        let (bob, _bob_events) = start_ready(test_config("bob"), directory.clone()).await;

        // Well past the TTL, the heartbeat has kept the entry fresh.
        tokio::time::sleep(Duration::from_millis(300)).await;
        bob.send("alice", b"alive").await.expect("send");
    });
}

#[test]
fn test_messages_relay_across_three_mailboxes() {
    run_local(async {
        let directory = Rc::new(MemoryDirectory::new());
        let (m1, mut m1_events) = start_ready(test_config("m1"), directory.clone()).await;
        let (m2, mut m2_events) = start_ready(test_config("m2"), directory.clone()).await;
        let (m3, mut m3_events) = start_ready(test_config("m3"), directory.clone()).await;

        // m1 -> m2 -> m3 -> back to m1.
        m1.send("m2", b"around the ring").await.expect("send");

        let hop = next_message(&mut m2_events, Duration::from_secs(5)).await;
        m2.send("m3", &hop).await.expect("relay");

        let hop = next_message(&mut m3_events, Duration::from_secs(5)).await;
        m3.send("m1", &hop).await.expect("relay");

        let full_circle = next_message(&mut m1_events, Duration::from_secs(5)).await;
        assert_eq!(full_circle, b"around the ring");
    });
}
