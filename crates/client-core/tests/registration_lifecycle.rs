//! Registration lifecycle tests driven over the in-memory transport with
//! virtual time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use sipua_client_core::{
    Client, ClientError, ClientEvent, MemoryTransport, Method, RegistrationState,
    RegistrationStatusInfo, TransportEvent,
};

struct Harness {
    client: Client,
    events: mpsc::Receiver<ClientEvent>,
    transport: Arc<MemoryTransport>,
    net_tx: mpsc::Sender<TransportEvent>,
}

fn harness() -> Harness {
    let transport = Arc::new(MemoryTransport::new());
    let (net_tx, net_rx) = mpsc::channel(32);
    let (client, events) = Client::builder(transport.clone(), net_rx).build();
    Harness { client, events, transport, net_tx }
}

async fn next_registration_event(
    events: &mut mpsc::Receiver<ClientEvent>,
) -> RegistrationStatusInfo {
    loop {
        match events.recv().await.expect("event stream open") {
            ClientEvent::RegistrationStateChanged(info) => return info,
            _ => continue,
        }
    }
}

async fn respond(
    harness: &Harness,
    request_index: usize,
    response_status: u16,
    expires: Option<u32>,
) {
    let sent = harness.transport.sent();
    let request = &sent[request_index];
    harness
        .net_tx
        .send(TransportEvent::Response {
            transaction: request.transaction.clone(),
            status: response_status,
            expires,
        })
        .await
        .expect("inject response");
}

#[tokio::test(start_paused = true)]
async fn register_reaches_registered_exactly_once() {
    let mut h = harness();

    let id = h.client.register("alice", "example.com", "pw").await.expect("register");

    // The REGISTER went out immediately, without credentials.
    assert_eq!(h.transport.sent_count(), 1);
    let sent = h.transport.last_sent().unwrap();
    assert_eq!(sent.method, Method::Register);
    assert_eq!(sent.target, "sip:example.com");
    assert!(sent.credentials.is_none());
    assert_eq!(sent.expires, Some(3600));

    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.new_state, RegistrationState::Registering);

    respond(&h, 0, 200, Some(3600)).await;
    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.old_state, RegistrationState::Registering);
    assert_eq!(change.new_state, RegistrationState::Registered);
    assert!(change.reason.is_none());

    assert_eq!(h.client.registration_state(id), Some(RegistrationState::Registered));
    let info = h.client.registration_info(id).unwrap();
    assert_eq!(info.expires, Some(3600));
    assert_eq!(info.user_uri, "sip:alice@example.com");

    // Exactly one Registered transition and no stray events.
    assert!(h.events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn refresh_fires_at_ninety_percent_of_the_granted_lifetime() {
    let mut h = harness();
    let started = tokio::time::Instant::now();

    let id = h.client.register("alice", "example.com", "pw").await.expect("register");
    respond(&h, 0, 200, Some(3600)).await;

    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.new_state, RegistrationState::Registering);
    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.new_state, RegistrationState::Registered);

    // Nothing else is scheduled, so the next event can only be the
    // refresh, and virtual time lands exactly on the 90% mark.
    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.new_state, RegistrationState::Refreshing);
    assert_eq!(started.elapsed(), Duration::from_secs(3240));

    h.transport.wait_for_sends(2).await;
    let refresh = h.transport.last_sent().unwrap();
    assert_eq!(refresh.method, Method::Register);
    assert_eq!(refresh.expires, Some(3600));

    // The refresh completes and the binding returns to Registered.
    respond(&h, 1, 200, Some(3600)).await;
    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.old_state, RegistrationState::Refreshing);
    assert_eq!(change.new_state, RegistrationState::Registered);
    assert_eq!(h.client.registration_state(id), Some(RegistrationState::Registered));
}

#[tokio::test(start_paused = true)]
async fn empty_identity_fails_fast_without_a_transaction() {
    let h = harness();

    let err = h.client.register("", "example.com", "pw").await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidIdentity { .. }));

    let err = h.client.register("alice", "  ", "pw").await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidIdentity { .. }));

    assert_eq!(h.transport.sent_count(), 0);
    assert_eq!(h.client.stats().total_registrations, 0);
}

#[tokio::test(start_paused = true)]
async fn one_challenge_retries_with_credentials_then_succeeds() {
    let mut h = harness();

    let id = h.client.register("alice", "example.com", "pw").await.expect("register");
    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.new_state, RegistrationState::Registering);

    respond(&h, 0, 401, None).await;
    h.transport.wait_for_sends(2).await;

    // The retry carries the credentials.
    let retry = h.transport.last_sent().unwrap();
    assert_eq!(retry.method, Method::Register);
    let credentials = retry.credentials.expect("credentials on retry");
    assert_eq!(credentials.username, "alice");
    assert_eq!(credentials.password, "pw");

    respond(&h, 1, 200, Some(3600)).await;
    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.new_state, RegistrationState::Registered);
    assert_eq!(h.client.registration_state(id), Some(RegistrationState::Registered));
}

#[tokio::test(start_paused = true)]
async fn two_consecutive_challenges_end_in_auth_failure() {
    let mut h = harness();

    let id = h.client.register("alice", "example.com", "wrong").await.expect("register");
    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.new_state, RegistrationState::Registering);

    respond(&h, 0, 401, None).await;
    h.transport.wait_for_sends(2).await;
    respond(&h, 1, 401, None).await;

    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.new_state, RegistrationState::Failed);
    assert_eq!(change.reason.as_deref(), Some("authentication failed"));

    // Never a third attempt.
    assert_eq!(h.transport.sent_count(), 2);
    assert_eq!(h.client.registration_state(id), Some(RegistrationState::Failed));
}

#[tokio::test(start_paused = true)]
async fn no_response_times_out_after_exhausting_retransmissions() {
    let mut h = harness();

    let id = h.client.register("alice", "example.com", "pw").await.expect("register");
    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.new_state, RegistrationState::Registering);

    // Nobody answers; virtual time runs until the transaction gives up.
    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.new_state, RegistrationState::Failed);
    let reason = change.reason.expect("failure reason");
    assert!(reason.contains("timed out"), "unexpected reason: {reason}");

    // Initial send plus the configured seven retransmissions, no more.
    assert_eq!(h.transport.sent_count(), 8);
    assert_eq!(h.client.registration_state(id), Some(RegistrationState::Failed));
}

#[tokio::test(start_paused = true)]
async fn registration_rejected_with_final_status_fails() {
    let mut h = harness();

    let id = h.client.register("alice", "example.com", "pw").await.expect("register");
    let _ = next_registration_event(&mut h.events).await;

    respond(&h, 0, 403, None).await;
    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.new_state, RegistrationState::Failed);
    assert!(change.reason.unwrap().contains("403"));
    assert_eq!(h.client.registration_state(id), Some(RegistrationState::Failed));
}

#[tokio::test(start_paused = true)]
async fn transport_reported_error_fails_the_registration() {
    let mut h = harness();

    let _id = h.client.register("alice", "example.com", "pw").await.expect("register");
    let _ = next_registration_event(&mut h.events).await;

    let transaction = h.transport.last_sent().unwrap().transaction;
    h.net_tx
        .send(TransportEvent::Error {
            transaction,
            message: "destination unreachable".to_string(),
        })
        .await
        .expect("inject error");

    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.new_state, RegistrationState::Failed);
    assert!(change.reason.unwrap().contains("destination unreachable"));
}

#[tokio::test(start_paused = true)]
async fn failing_transport_at_register_time_fails_asynchronously() {
    let mut h = harness();
    h.transport.set_failing(true);

    let id = h.client.register("alice", "example.com", "pw").await.expect("register");
    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.new_state, RegistrationState::Registering);
    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.new_state, RegistrationState::Failed);
    assert!(change.reason.unwrap().contains("network error"));
    assert_eq!(h.client.registration_state(id), Some(RegistrationState::Failed));
}

#[tokio::test(start_paused = true)]
async fn unregister_is_optimistic_and_sends_a_zero_expiry_register() {
    let mut h = harness();

    let id = h.client.register("alice", "example.com", "pw").await.expect("register");
    respond(&h, 0, 200, Some(3600)).await;
    let _ = next_registration_event(&mut h.events).await; // Registering
    let _ = next_registration_event(&mut h.events).await; // Registered

    h.client.unregister(id).await.expect("unregister");

    // Locally unregistered before the network confirms anything.
    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.old_state, RegistrationState::Registered);
    assert_eq!(change.new_state, RegistrationState::Unregistered);
    assert_eq!(h.client.registration_state(id), Some(RegistrationState::Unregistered));

    h.transport.wait_for_sends(2).await;
    let sent = h.transport.last_sent().unwrap();
    assert_eq!(sent.method, Method::Register);
    assert_eq!(sent.expires, Some(0));

    // Confirmation destroys the record; the id no longer resolves.
    respond(&h, 1, 200, None).await;
    tokio::task::yield_now().await;
    let err = h.client.unregister(id).await.unwrap_err();
    assert!(matches!(err, ClientError::RegistrationNotFound { .. }));

    // The refresh timer died with the binding: no further traffic ever.
    tokio::time::sleep(Duration::from_secs(7200)).await;
    assert_eq!(h.transport.sent_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn unregister_failure_is_reported_but_never_resurrects() {
    let mut h = harness();

    let id = h.client.register("alice", "example.com", "pw").await.expect("register");
    respond(&h, 0, 200, Some(3600)).await;
    let _ = next_registration_event(&mut h.events).await;
    let _ = next_registration_event(&mut h.events).await;

    h.client.unregister(id).await.expect("unregister");
    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.new_state, RegistrationState::Unregistered);

    // The expires=0 REGISTER times out; the failure is reported, but the
    // registration stays gone.
    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.new_state, RegistrationState::Unregistered);
    assert!(change.reason.unwrap().contains("timed out"));
    assert_eq!(h.client.registration_state(id), Some(RegistrationState::Unregistered));
}

#[tokio::test(start_paused = true)]
async fn unregister_unknown_id_is_an_error() {
    let h = harness();
    let err = h.client.unregister(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, ClientError::RegistrationNotFound { .. }));
}

#[tokio::test(start_paused = true)]
async fn refresh_failure_moves_the_binding_to_failed() {
    let mut h = harness();

    let id = h.client.register("alice", "example.com", "pw").await.expect("register");
    respond(&h, 0, 200, Some(3600)).await;
    let _ = next_registration_event(&mut h.events).await; // Registering
    let _ = next_registration_event(&mut h.events).await; // Registered

    // The refresh fires at 3240s...
    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.new_state, RegistrationState::Refreshing);

    // ...and the registrar rejects it.
    h.transport.wait_for_sends(2).await;
    respond(&h, 1, 503, None).await;
    let change = next_registration_event(&mut h.events).await;
    assert_eq!(change.old_state, RegistrationState::Refreshing);
    assert_eq!(change.new_state, RegistrationState::Failed);
    assert_eq!(h.client.registration_state(id), Some(RegistrationState::Failed));
}
