//! End-to-end walkthrough against a scripted in-memory network.
//!
//! Registers alice@example.com, places a call to bob, hangs up, and
//! unregisters. A background task plays the far end: it answers REGISTERs
//! and BYEs with 200 and rings before answering INVITEs.
//!
//! Run with: `cargo run -p sipua-client-core --example softphone`

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;

use sipua_client_core::{Client, ClientEvent, MemoryTransport, Method, TransportEvent};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let transport = Arc::new(MemoryTransport::new());
    let (net_tx, net_rx) = mpsc::channel(64);
    let (client, mut events) = Client::builder(transport.clone(), net_rx).build();

    spawn_scripted_far_end(transport.clone(), net_tx);

    let registration = client.register("alice", "example.com", "secret").await?;
    wait_for(&mut events, |event| {
        matches!(event, ClientEvent::RegistrationStateChanged(info)
            if info.new_state == sipua_client_core::RegistrationState::Registered)
    })
    .await;
    println!("registered as sip:alice@example.com");

    let call = client.start_call(registration, "bob@example.com").await?;
    wait_for(&mut events, |event| {
        matches!(event, ClientEvent::CallStateChanged(info)
            if info.new_state == sipua_client_core::CallState::Established)
    })
    .await;
    println!("call to bob established");

    tokio::time::sleep(Duration::from_millis(200)).await;

    client.end_call(call).await?;
    wait_for(&mut events, |event| {
        matches!(event, ClientEvent::CallStateChanged(info)
            if info.new_state == sipua_client_core::CallState::Terminated)
    })
    .await;
    println!("call ended");

    client.unregister(registration).await?;
    wait_for(&mut events, |event| {
        matches!(event, ClientEvent::RegistrationStateChanged(info)
            if info.new_state == sipua_client_core::RegistrationState::Unregistered)
    })
    .await;
    println!("unregistered");

    client.shutdown().await;
    Ok(())
}

/// Consume events, narrating each one, until `done` matches.
async fn wait_for(
    events: &mut mpsc::Receiver<ClientEvent>,
    done: impl Fn(&ClientEvent) -> bool,
) {
    while let Some(event) = events.recv().await {
        match &event {
            ClientEvent::RegistrationStateChanged(info) => {
                println!("  registration: {} -> {}", info.old_state, info.new_state);
            }
            ClientEvent::CallStateChanged(info) => {
                println!("  call: {} -> {}", info.old_state, info.new_state);
            }
            ClientEvent::IncomingCall(info) => {
                println!("  incoming call from {}", info.caller_uri);
            }
        }
        if done(&event) {
            return;
        }
    }
}

/// Answer everything the client sends: 200 to REGISTER and BYE, 180 then
/// 200 to INVITE.
fn spawn_scripted_far_end(transport: Arc<MemoryTransport>, net_tx: mpsc::Sender<TransportEvent>) {
    tokio::spawn(async move {
        let mut answered = HashSet::new();
        loop {
            tokio::time::sleep(Duration::from_millis(10)).await;
            for request in transport.sent() {
                if !answered.insert(request.transaction.clone()) {
                    continue; // retransmission of something already answered
                }
                match request.method {
                    Method::Register => {
                        let _ = net_tx
                            .send(TransportEvent::Response {
                                transaction: request.transaction.clone(),
                                status: 200,
                                expires: request.expires,
                            })
                            .await;
                    }
                    Method::Invite => {
                        let _ = net_tx
                            .send(TransportEvent::Response {
                                transaction: request.transaction.clone(),
                                status: 180,
                                expires: None,
                            })
                            .await;
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        let _ = net_tx
                            .send(TransportEvent::Response {
                                transaction: request.transaction.clone(),
                                status: 200,
                                expires: None,
                            })
                            .await;
                    }
                    Method::Bye => {
                        let _ = net_tx
                            .send(TransportEvent::Response {
                                transaction: request.transaction.clone(),
                                status: 200,
                                expires: None,
                            })
                            .await;
                    }
                }
            }
        }
    });
}
