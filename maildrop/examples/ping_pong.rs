//! Two mailboxes exchanging messages through an in-process directory.
//!
//! Run with: `cargo run --example ping_pong`

use std::rc::Rc;
use std::time::Duration;

use maildrop::{Mailbox, MailboxConfig, MailboxEvent, MemoryDirectory};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Mailboxes spawn their background tasks with spawn_local, so they
    // need a current-thread runtime driving a LocalSet.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();

    runtime.block_on(local.run_until(async {
        let directory = Rc::new(MemoryDirectory::new());

        let mut ping = Mailbox::start(
            MailboxConfig::default().with_identity("ping"),
            directory.clone(),
        )
        .await?;
        let mut pong = Mailbox::start(
            MailboxConfig::default().with_identity("pong"),
            directory.clone(),
        )
        .await?;

        let mut ping_events = ping.take_events().expect("events");
        let mut pong_events = pong.take_events().expect("events");

        // Echo task: every message delivered to 'pong' bounces back.
        tokio::task::spawn_local(async move {
            while let Some(event) = pong_events.recv().await {
                if let MailboxEvent::Message(payload) = event {
                    println!("pong received: {}", String::from_utf8_lossy(&payload));
                    if pong.send("ping", &payload).await.is_err() {
                        break;
                    }
                }
            }
        });

        for round in 0..3u32 {
            let payload = format!("hello {}", round);
            ping.send("pong", payload.as_bytes()).await?;

            loop {
                match tokio::time::timeout(Duration::from_secs(5), ping_events.recv()).await? {
                    Some(MailboxEvent::Message(echoed)) => {
                        println!("ping received: {}", String::from_utf8_lossy(&echoed));
                        break;
                    }
                    Some(_) => continue,
                    None => return Ok(()),
                }
            }
        }

        ping.close().await;
        Ok::<(), Box<dyn std::error::Error>>(())
    }))?;

    Ok(())
}
