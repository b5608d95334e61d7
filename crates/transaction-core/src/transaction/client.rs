//! The client transaction state machine.
//!
//! One machine drives REGISTER, INVITE and BYE alike:
//!
//! ```text
//!            1xx                     2xx-6xx
//! Trying ──────────▶ Proceeding ──────────────▶ Completed
//!   │                    │
//!   │ retransmits        │ retransmits
//!   │ exhausted /        │ exhausted /
//!   │ deadline           │ deadline
//!   ▼                    ▼
//! Terminated ◀───────────┘
//! ```
//!
//! While Trying/Proceeding the request is retransmitted with exponential
//! backoff (doubling from `t1`, capped at `t2`) until either a final
//! response arrives, `max_retransmits` retransmissions have gone out, or
//! the absolute `transaction_timeout` deadline passes. A provisional
//! response pushes the absolute deadline back out but leaves the
//! retransmission schedule untouched.
//!
//! The machine owns its two timer handles and releases them on every exit
//! path: final response, timeout, transport failure and explicit abort.

use std::cmp;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::timer::{TimerHandle, TimerKind, TimerManager, TimerSettings};
use crate::transaction::{
    status, Method, TransactionEvent, TransactionKey, TransactionState, TransactionTimer,
};
use crate::transport::{Credentials, OutboundRequest, Transport};

/// A single outstanding request, owned by a registration or call session.
pub struct ClientTransaction {
    key: TransactionKey,
    method: Method,
    state: TransactionState,
    request: OutboundRequest,
    /// Retransmissions performed so far (the initial send does not count).
    retransmits: u32,
    /// Current retransmission interval (doubles per fire, capped at `t2`).
    interval: std::time::Duration,
    retransmit_timer: Option<TimerHandle>,
    timeout_timer: Option<TimerHandle>,
    transport: Arc<dyn Transport>,
    timers: TimerManager<TransactionTimer>,
    settings: TimerSettings,
}

impl std::fmt::Debug for ClientTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTransaction")
            .field("key", &self.key)
            .field("method", &self.method)
            .field("state", &self.state)
            .field("retransmits", &self.retransmits)
            .finish_non_exhaustive()
    }
}

impl ClientTransaction {
    /// Send the initial request and arm the retransmission and absolute
    /// timeout timers.
    ///
    /// Fails if the very first send is refused by the transport, in which
    /// case no transaction exists and nothing was scheduled.
    pub async fn initiate(
        method: Method,
        target: impl Into<String>,
        credentials: Option<Credentials>,
        expires: Option<u32>,
        transport: Arc<dyn Transport>,
        timers: TimerManager<TransactionTimer>,
        settings: TimerSettings,
    ) -> Result<Self> {
        let key = TransactionKey::new();
        let request = OutboundRequest {
            transaction: key.clone(),
            method,
            target: target.into(),
            credentials,
            expires,
        };

        transport.send_request(&request).await?;

        let mut transaction = Self {
            key: key.clone(),
            method,
            state: TransactionState::Trying,
            request,
            retransmits: 0,
            interval: settings.t1,
            retransmit_timer: None,
            timeout_timer: None,
            transport,
            timers,
            settings,
        };
        transaction.arm_retransmit();
        transaction.arm_timeout();
        debug!(id = %key, method = %method, "transaction initiated");
        Ok(transaction)
    }

    pub fn key(&self) -> &TransactionKey {
        &self.key
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn target(&self) -> &str {
        &self.request.target
    }

    /// Retransmissions performed so far.
    pub fn retransmits(&self) -> u32 {
        self.retransmits
    }

    /// Feed a response status code into the machine.
    ///
    /// Late and duplicate responses (anything arriving after a terminal
    /// state) are ignored and return `None`.
    pub fn on_response(&mut self, response_status: u16) -> Option<TransactionEvent> {
        if !self.state.retransmits() {
            trace!(id = %self.key, status = response_status, state = %self.state, "late response ignored");
            return None;
        }

        if status::is_provisional(response_status) {
            if self.state == TransactionState::Trying {
                self.state = TransactionState::Proceeding;
                debug!(id = %self.key, status = response_status, "Trying -> Proceeding");
            }
            // Push the absolute deadline out; the retransmission schedule
            // and count are untouched.
            if let Some(handle) = self.timeout_timer.take() {
                handle.cancel();
            }
            self.arm_timeout();
            return Some(TransactionEvent::Provisional {
                transaction: self.key.clone(),
                method: self.method,
                status: response_status,
            });
        }

        // Final response: the transaction is complete whatever the class.
        self.release_timers();
        self.state = TransactionState::Completed;
        debug!(id = %self.key, status = response_status, "transaction completed");
        Some(TransactionEvent::Final {
            transaction: self.key.clone(),
            method: self.method,
            status: response_status,
        })
    }

    /// Feed a timer fire into the machine.
    ///
    /// Stray fires against a terminal state are ignored.
    pub async fn on_timer(&mut self, kind: TimerKind) -> Option<TransactionEvent> {
        if !self.state.retransmits() {
            trace!(id = %self.key, timer = %kind, state = %self.state, "stray timer fire ignored");
            return None;
        }

        match kind {
            TimerKind::Retransmit => {
                self.retransmit_timer = None;
                if self.retransmits >= self.settings.max_retransmits {
                    warn!(id = %self.key, retransmits = self.retransmits, "retransmissions exhausted");
                    return Some(self.terminate_timed_out());
                }
                if let Err(e) = self.transport.send_request(&self.request).await {
                    warn!(id = %self.key, error = %e, "retransmission failed");
                    return Some(self.terminate_transport_error(e.to_string()));
                }
                self.retransmits += 1;
                self.interval = cmp::min(self.interval * 2, self.settings.t2);
                trace!(id = %self.key, count = self.retransmits, next = ?self.interval, "request retransmitted");
                self.arm_retransmit();
                None
            }
            TimerKind::Timeout => {
                self.timeout_timer = None;
                warn!(id = %self.key, "transaction deadline passed");
                Some(self.terminate_timed_out())
            }
        }
    }

    /// The transport reported an asynchronous failure for this transaction.
    pub fn on_transport_error(&mut self, message: impl Into<String>) -> Option<TransactionEvent> {
        if self.state.is_terminal() {
            return None;
        }
        Some(self.terminate_transport_error(message.into()))
    }

    /// Abort the transaction without waiting for the network.
    ///
    /// Cancels outstanding timers and forces Terminated. No event is
    /// emitted; the caller decided this, so the caller already knows.
    pub fn abort(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.release_timers();
        self.state = TransactionState::Terminated;
        debug!(id = %self.key, "transaction aborted");
    }

    fn terminate_timed_out(&mut self) -> TransactionEvent {
        self.release_timers();
        self.state = TransactionState::Terminated;
        TransactionEvent::TimedOut {
            transaction: self.key.clone(),
            method: self.method,
        }
    }

    fn terminate_transport_error(&mut self, message: String) -> TransactionEvent {
        self.release_timers();
        self.state = TransactionState::Terminated;
        TransactionEvent::TransportError {
            transaction: self.key.clone(),
            method: self.method,
            message,
        }
    }

    fn arm_retransmit(&mut self) {
        let event = TransactionTimer {
            transaction: self.key.clone(),
            kind: TimerKind::Retransmit,
        };
        self.retransmit_timer = Some(self.timers.schedule(self.interval, event));
    }

    fn arm_timeout(&mut self) {
        let event = TransactionTimer {
            transaction: self.key.clone(),
            kind: TimerKind::Timeout,
        };
        self.timeout_timer = Some(self.timers.schedule(self.settings.transaction_timeout, event));
    }

    fn release_timers(&mut self) {
        if let Some(handle) = self.retransmit_timer.take() {
            handle.cancel();
        }
        if let Some(handle) = self.timeout_timer.take() {
            handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use crate::transport::MemoryTransport;

    struct TestSetup {
        transaction: ClientTransaction,
        transport: Arc<MemoryTransport>,
        timer_rx: mpsc::Receiver<TransactionTimer>,
    }

    async fn setup(method: Method, settings: TimerSettings) -> TestSetup {
        let transport = Arc::new(MemoryTransport::new());
        let (timers, timer_rx) = TimerManager::channel(32);
        let transaction = ClientTransaction::initiate(
            method,
            "sip:bob@example.com",
            None,
            None,
            transport.clone(),
            timers,
            settings,
        )
        .await
        .expect("initiate");
        TestSetup { transaction, transport, timer_rx }
    }

    #[tokio::test(start_paused = true)]
    async fn initiate_sends_request_and_enters_trying() {
        let setup = setup(Method::Invite, TimerSettings::default()).await;
        assert_eq!(setup.transaction.state(), TransactionState::Trying);
        assert_eq!(setup.transport.sent_count(), 1);
        let sent = setup.transport.last_sent().unwrap();
        assert_eq!(sent.method, Method::Invite);
        assert_eq!(&sent.transaction, setup.transaction.key());
    }

    #[tokio::test(start_paused = true)]
    async fn provisional_moves_to_proceeding_without_touching_retransmits() {
        let mut setup = setup(Method::Invite, TimerSettings::default()).await;

        let event = setup.transaction.on_response(180).expect("event");
        assert!(matches!(event, TransactionEvent::Provisional { status: 180, .. }));
        assert_eq!(setup.transaction.state(), TransactionState::Proceeding);
        assert_eq!(setup.transaction.retransmits(), 0);

        // A second provisional stays in Proceeding.
        let event = setup.transaction.on_response(183).expect("event");
        assert!(matches!(event, TransactionEvent::Provisional { status: 183, .. }));
        assert_eq!(setup.transaction.state(), TransactionState::Proceeding);
    }

    #[tokio::test(start_paused = true)]
    async fn final_response_completes_and_cancels_timers() {
        let mut setup = setup(Method::Register, TimerSettings::default()).await;

        let event = setup.transaction.on_response(200).expect("event");
        assert!(matches!(event, TransactionEvent::Final { status: 200, .. }));
        assert_eq!(setup.transaction.state(), TransactionState::Completed);

        // With both timers cancelled nothing is ever delivered, even well
        // past the absolute deadline.
        let outcome = tokio::time::timeout(Duration::from_secs(120), setup.timer_rx.recv()).await;
        assert!(outcome.is_err(), "no timer should fire after completion");
        assert_eq!(setup.transport.sent_count(), 1, "no retransmission after completion");
    }

    #[tokio::test(start_paused = true)]
    async fn late_responses_are_ignored() {
        let mut setup = setup(Method::Register, TimerSettings::default()).await;
        setup.transaction.on_response(200).expect("final");
        assert!(setup.transaction.on_response(200).is_none());
        assert!(setup.transaction.on_response(503).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn retransmission_backs_off_exponentially_up_to_the_cap() {
        let settings = TimerSettings::default();
        let mut setup = setup(Method::Register, settings).await;
        let started = tokio::time::Instant::now();

        // Expected fire offsets with t1=0.5s, t2=4s: 0.5, 1.5, 3.5, 7.5,
        // 11.5, 15.5, 19.5 (interval capped at 4s), then the exhausted fire
        // at 23.5.
        let expected_offsets = [0.5_f64, 1.5, 3.5, 7.5, 11.5, 15.5, 19.5];
        for (i, offset) in expected_offsets.iter().enumerate() {
            let fire = setup.timer_rx.recv().await.expect("timer fire");
            assert_eq!(fire.kind, TimerKind::Retransmit);
            assert_eq!(started.elapsed(), Duration::from_secs_f64(*offset));
            let event = setup.transaction.on_timer(fire.kind).await;
            assert!(event.is_none(), "retransmission {} should not terminate", i);
            assert_eq!(setup.transport.sent_count(), i + 2);
        }
        assert_eq!(setup.transaction.retransmits(), settings.max_retransmits);

        // The next retransmit fire finds the budget exhausted.
        let fire = setup.timer_rx.recv().await.expect("exhausted fire");
        assert_eq!(fire.kind, TimerKind::Retransmit);
        assert_eq!(started.elapsed(), Duration::from_secs_f64(23.5));
        let event = setup.transaction.on_timer(fire.kind).await.expect("event");
        assert!(matches!(event, TransactionEvent::TimedOut { .. }));
        assert_eq!(setup.transaction.state(), TransactionState::Terminated);
        assert_eq!(setup.transport.sent_count(), 1 + settings.max_retransmits as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn absolute_timeout_terminates_regardless_of_retransmit_count() {
        // A long t1 means no retransmission ever happens; only the absolute
        // deadline is in play.
        let settings = TimerSettings::default()
            .with_t1(Duration::from_secs(60))
            .with_t2(Duration::from_secs(60))
            .with_transaction_timeout(Duration::from_secs(5));
        let mut setup = setup(Method::Invite, settings).await;
        let started = tokio::time::Instant::now();

        let fire = setup.timer_rx.recv().await.expect("timeout fire");
        assert_eq!(fire.kind, TimerKind::Timeout);
        assert_eq!(started.elapsed(), Duration::from_secs(5));

        let event = setup.transaction.on_timer(fire.kind).await.expect("event");
        assert!(matches!(event, TransactionEvent::TimedOut { .. }));
        assert_eq!(setup.transaction.state(), TransactionState::Terminated);
        assert_eq!(setup.transaction.retransmits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn provisional_response_resets_the_absolute_deadline() {
        let settings = TimerSettings::default()
            .with_t1(Duration::from_secs(60))
            .with_t2(Duration::from_secs(60))
            .with_transaction_timeout(Duration::from_secs(5));
        let mut setup = setup(Method::Invite, settings).await;
        let started = tokio::time::Instant::now();

        // 3 seconds in, a 180 arrives and pushes the deadline out.
        tokio::time::sleep(Duration::from_secs(3)).await;
        setup.transaction.on_response(180).expect("provisional");

        let fire = setup.timer_rx.recv().await.expect("timeout fire");
        assert_eq!(fire.kind, TimerKind::Timeout);
        // New deadline: 3s + a fresh 5s window.
        assert_eq!(started.elapsed(), Duration::from_secs(8));

        let event = setup.transaction.on_timer(fire.kind).await.expect("event");
        assert!(matches!(event, TransactionEvent::TimedOut { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn retransmission_send_failure_terminates_with_transport_error() {
        let mut setup = setup(Method::Register, TimerSettings::default()).await;
        setup.transport.set_failing(true);

        let fire = setup.timer_rx.recv().await.expect("retransmit fire");
        let event = setup.transaction.on_timer(fire.kind).await.expect("event");
        assert!(matches!(event, TransactionEvent::TransportError { .. }));
        assert_eq!(setup.transaction.state(), TransactionState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_send_failure_creates_no_transaction() {
        let transport = Arc::new(MemoryTransport::new());
        transport.set_failing(true);
        let (timers, mut timer_rx) = TimerManager::channel(8);

        // Mirror real callers, which hand `initiate` a clone and keep their own
        // manager alive; otherwise the failure path would drop the sole channel
        // sender and `recv` would return `None` instead of timing out.
        let _timers_keepalive = timers.clone();
        let result = ClientTransaction::initiate(
            Method::Register,
            "sip:example.com",
            None,
            Some(3600),
            transport.clone(),
            timers,
            TimerSettings::default(),
        )
        .await;
        assert!(result.is_err());

        // Nothing was scheduled either.
        let outcome = tokio::time::timeout(Duration::from_secs(120), timer_rx.recv()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_cancels_timers_and_forces_terminated() {
        let mut setup = setup(Method::Invite, TimerSettings::default()).await;

        setup.transaction.abort();
        assert_eq!(setup.transaction.state(), TransactionState::Terminated);

        let outcome = tokio::time::timeout(Duration::from_secs(120), setup.timer_rx.recv()).await;
        assert!(outcome.is_err(), "no timer should fire after abort");

        // Stray fires and late responses after abort are harmless.
        assert!(setup.transaction.on_timer(TimerKind::Retransmit).await.is_none());
        assert!(setup.transaction.on_response(200).is_none());
    }
}
