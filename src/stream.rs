//! Push-based completion detection over a publish/subscribe broker.
//!
//! The platform announces finished runs on a completion-event channel. The
//! [`StreamingSubscriber`] owns one broker connection for one run:
//!
//! ```text
//!   Idle ──handshake──► Handshaking ──subscribe──► Subscribed
//!                            │                         │
//!                       (rejected)           ┌─────────┼──────────┐
//!                            │               ▼         ▼          ▼
//!                            │         EventReceived TimedOut TransportDown
//!                            │               │         │          │ (one
//!                            ▼               ▼         ▼          ▼  retry)
//!                       Unavailable ───────────► Closed ◄─────────┘
//! ```
//!
//! A handshake rejection is not an error: it reports the capability as
//! unavailable and the orchestrator degrades to queue polling. The same
//! goes for the timeout, which is the expected outcome for a broker that
//! never delivers a matching event.
//!
//! Every received event advances a [`ReplayCursor`], so the single
//! permitted reconnect resumes exactly after the last processed event:
//! nothing is lost, nothing is redelivered.
//!
//! [`CometdBroker`] is the production transport: a minimal Bayeux
//! long-polling client that re-reads the access token from the
//! [`Connection`] on every outbound frame, because a multi-hour
//! subscription can outlive the token it was opened with.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::id::RunId;
use crate::platform::Connection;

/// Channel on which the platform publishes run-completion events.
pub const COMPLETION_CHANNEL: &str = "/systemTopic/TestResult";

/// Platform default ceiling for waiting on a completion event.
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(14_400);

/// Resumption point within the broker's event history.
///
/// Monotonic: [`advance`](Self::advance) never moves backwards, so a
/// reconnect with the stored cursor cannot re-deliver a processed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayCursor {
    /// Only events published after subscribing (`-1`).
    NewOnly,
    /// Everything the broker retains (`-2`).
    All,
    /// Events strictly after the given sequence number.
    After(i64),
}

impl ReplayCursor {
    /// The wire value for the replay extension.
    pub fn as_replay_id(self) -> i64 {
        match self {
            Self::NewOnly => -1,
            Self::All => -2,
            Self::After(n) => n,
        }
    }

    /// Records a delivered event's sequence number.
    pub fn advance(&mut self, replay_id: i64) {
        match *self {
            Self::After(seen) if replay_id <= seen => {}
            _ => *self = Self::After(replay_id),
        }
    }
}

/// A run-completion event as delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvent {
    /// Run the event refers to. Raw string: events for other runs flow on
    /// the same channel and are filtered, not validated.
    pub run_id: String,
    pub replay_id: i64,
}

/// Broker-side failures.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Subscribe failed: {0}")]
    Subscribe(String),
    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Inbound notification from a subscription.
#[derive(Debug)]
pub enum BrokerMessage {
    Event(CompletionEvent),
    /// The subscription's transport is dead; no more events will arrive on
    /// this receiver.
    TransportDown(String),
}

/// A publish/subscribe broker connection.
///
/// One instance serves one run; implementations do not share subscription
/// state across runs.
#[async_trait]
pub trait Broker: Send {
    async fn handshake(&mut self) -> Result<(), BrokerError>;

    /// Opens a subscription, replaying history from `cursor`. Events and
    /// transport-down notifications arrive on the returned receiver; a
    /// closed receiver also means the transport is gone.
    async fn subscribe(
        &mut self,
        channel: &str,
        cursor: ReplayCursor,
    ) -> Result<mpsc::Receiver<BrokerMessage>, BrokerError>;

    /// Releases the broker connection. Idempotent.
    async fn disconnect(&mut self);
}

/// How a streaming wait ended.
#[derive(Debug)]
pub enum StreamOutcome {
    /// A completion event for the tracked run arrived.
    Completed(CompletionEvent),
    /// No matching event before the timeout, or the transport failed past
    /// its retry budget. Not an error: the caller falls back to polling.
    TimedOut,
    /// The handshake was rejected or the broker is unreachable; streaming
    /// is unavailable for this run.
    Unavailable(String),
    /// The caller tore the run down.
    Cancelled,
}

/// Waits for the completion event of a single run.
///
/// Exclusively owned by one run for its lifetime; `wait_for_completion`
/// consumes the subscriber and releases the broker connection on every
/// exit path.
pub struct StreamingSubscriber<B: Broker> {
    broker: B,
    cursor: ReplayCursor,
    timeout: Duration,
}

impl<B: Broker> StreamingSubscriber<B> {
    pub fn new(broker: B) -> Self {
        Self {
            broker,
            cursor: ReplayCursor::NewOnly,
            timeout: DEFAULT_STREAM_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolves with the first completion event matching `run_id`.
    ///
    /// Events for other runs are dropped. The broker connection is
    /// disconnected before this returns, whatever the outcome.
    pub async fn wait_for_completion(
        mut self,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> StreamOutcome {
        let outcome = self.detect(&run_id, &cancel).await;
        self.broker.disconnect().await;
        debug!(%run_id, ?outcome, "streaming subscriber closed");
        outcome
    }

    async fn detect(&mut self, run_id: &RunId, cancel: &CancellationToken) -> StreamOutcome {
        let deadline = Instant::now() + self.timeout;

        if let Err(e) = self.broker.handshake().await {
            warn!(%run_id, "streaming handshake failed: {e}");
            return StreamOutcome::Unavailable(e.to_string());
        }

        let mut events = match self.broker.subscribe(COMPLETION_CHANNEL, self.cursor).await {
            Ok(events) => events,
            Err(e) => {
                warn!(%run_id, "completion channel subscribe failed: {e}");
                return StreamOutcome::Unavailable(e.to_string());
            }
        };
        debug!(%run_id, channel = COMPLETION_CHANNEL, "subscribed");

        let mut reconnects_left = 1u32;
        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => return StreamOutcome::Cancelled,
                () = tokio::time::sleep_until(deadline) => {
                    info!(%run_id, "no completion event before timeout");
                    return StreamOutcome::TimedOut;
                }
                message = events.recv() => message,
            };

            match message {
                Some(BrokerMessage::Event(event)) => {
                    self.cursor.advance(event.replay_id);
                    if event.run_id == run_id.as_str() {
                        info!(%run_id, replay_id = event.replay_id, "run complete event received");
                        return StreamOutcome::Completed(event);
                    }
                    debug!(%run_id, other = %event.run_id, "ignoring event for different run");
                }
                down => {
                    let reason = match down {
                        Some(BrokerMessage::TransportDown(reason)) => reason,
                        _ => "event channel closed".to_string(),
                    };
                    if reconnects_left == 0 {
                        warn!(%run_id, "transport down past retry budget: {reason}");
                        return StreamOutcome::TimedOut;
                    }
                    warn!(%run_id, "transport down, reconnecting with replay cursor: {reason}");
                    reconnects_left -= 1;
                    events = match self.broker.subscribe(COMPLETION_CHANNEL, self.cursor).await {
                        Ok(events) => events,
                        Err(e) => {
                            warn!(%run_id, "reconnect failed: {e}");
                            return StreamOutcome::TimedOut;
                        }
                    };
                }
            }
        }
    }
}

/// Bayeux long-polling broker client.
///
/// Speaks the minimum of the protocol the completion channel needs:
/// `/meta/handshake`, `/meta/subscribe` with the replay extension, a
/// `/meta/connect` long-poll loop, and `/meta/disconnect`.
pub struct CometdBroker {
    client: reqwest::Client,
    conn: Arc<dyn Connection>,
    endpoint: String,
    client_id: Option<String>,
    poll_task: Option<JoinHandle<()>>,
}

impl CometdBroker {
    /// Broker endpoint is the instance base URL plus the fixed
    /// `/cometd/{version}` path segment.
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        let endpoint = format!("{}/cometd/{}", conn.instance_url(), conn.api_version());
        Self {
            client: reqwest::Client::new(),
            conn,
            endpoint,
            client_id: None,
            poll_task: None,
        }
    }

    /// Sends one Bayeux frame. The token is fetched fresh per frame.
    async fn send_frame(
        client: &reqwest::Client,
        conn: &dyn Connection,
        endpoint: &str,
        frame: Value,
    ) -> Result<Vec<Value>, BrokerError> {
        let token = conn.access_token().await;
        let response = client
            .post(endpoint)
            .header("Authorization", format!("OAuth {token}"))
            .json(&json!([frame]))
            .send()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BrokerError::Transport(format!("broker answered {status}")));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        body.as_array()
            .cloned()
            .ok_or_else(|| BrokerError::Transport("broker response is not a batch".to_string()))
    }

    fn message_id() -> String {
        Uuid::new_v4().to_string()
    }
}

#[async_trait]
impl Broker for CometdBroker {
    async fn handshake(&mut self) -> Result<(), BrokerError> {
        let frame = json!({
            "id": Self::message_id(),
            "channel": "/meta/handshake",
            "version": "1.0",
            "supportedConnectionTypes": ["long-polling"],
        });
        let batch =
            Self::send_frame(&self.client, self.conn.as_ref(), &self.endpoint, frame).await?;
        let client_id = parse_handshake_ack(&batch)?;
        debug!(client_id, "broker handshake complete");
        self.client_id = Some(client_id);
        Ok(())
    }

    async fn subscribe(
        &mut self,
        channel: &str,
        cursor: ReplayCursor,
    ) -> Result<mpsc::Receiver<BrokerMessage>, BrokerError> {
        let client_id = self
            .client_id
            .clone()
            .ok_or_else(|| BrokerError::Subscribe("subscribe before handshake".to_string()))?;

        // A stale long-poll loop from a previous subscribe must not keep
        // consuming /meta/connect responses for this client id.
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }

        let frame = json!({
            "id": Self::message_id(),
            "channel": "/meta/subscribe",
            "clientId": client_id,
            "subscription": channel,
            "ext": { "replay": { channel: cursor.as_replay_id() } },
        });
        let batch =
            Self::send_frame(&self.client, self.conn.as_ref(), &self.endpoint, frame).await?;
        let ack = batch
            .first()
            .ok_or_else(|| BrokerError::Subscribe("empty subscribe response".to_string()))?;
        if ack["successful"] != json!(true) {
            return Err(BrokerError::Subscribe(ack.to_string()));
        }

        let (tx, rx) = mpsc::channel(16);
        let client = self.client.clone();
        let conn = Arc::clone(&self.conn);
        let endpoint = self.endpoint.clone();
        let channel = channel.to_string();
        self.poll_task = Some(tokio::spawn(async move {
            poll_loop(client, conn, endpoint, client_id, channel, tx).await;
        }));
        Ok(rx)
    }

    async fn disconnect(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        let Some(client_id) = self.client_id.take() else {
            return;
        };
        let frame = json!({
            "id": Self::message_id(),
            "channel": "/meta/disconnect",
            "clientId": client_id,
        });
        // Best effort: the server times the client out anyway.
        if let Err(e) =
            Self::send_frame(&self.client, self.conn.as_ref(), &self.endpoint, frame).await
        {
            debug!("broker disconnect failed: {e}");
        }
    }
}

/// `/meta/connect` long-poll loop. Runs until the transport fails or the
/// receiver side goes away.
async fn poll_loop(
    client: reqwest::Client,
    conn: Arc<dyn Connection>,
    endpoint: String,
    client_id: String,
    channel: String,
    tx: mpsc::Sender<BrokerMessage>,
) {
    loop {
        let frame = json!({
            "id": CometdBroker::message_id(),
            "channel": "/meta/connect",
            "clientId": client_id,
            "connectionType": "long-polling",
        });
        let batch =
            match CometdBroker::send_frame(&client, conn.as_ref(), &endpoint, frame).await {
                Ok(batch) => batch,
                Err(e) => {
                    let _ = tx.send(BrokerMessage::TransportDown(e.to_string())).await;
                    return;
                }
            };

        let (events, down) = dispatch_connect_batch(&channel, &batch);
        for event in events {
            if tx.send(BrokerMessage::Event(event)).await.is_err() {
                return; // subscriber gone
            }
        }
        if let Some(reason) = down {
            let _ = tx.send(BrokerMessage::TransportDown(reason)).await;
            return;
        }
    }
}

/// Validates a `/meta/handshake` response batch and extracts the client id.
fn parse_handshake_ack(batch: &[Value]) -> Result<String, BrokerError> {
    let ack = batch
        .first()
        .ok_or_else(|| BrokerError::Handshake("empty handshake response".to_string()))?;
    if ack["successful"] != json!(true) {
        return Err(BrokerError::Handshake(ack.to_string()));
    }
    ack["clientId"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| BrokerError::Handshake("handshake without clientId".to_string()))
}

/// Sorts one `/meta/connect` response batch into deliverable events and an
/// optional transport-down reason.
///
/// An unsuccessful `/meta/connect` ack kills the long poll; events ahead of
/// it in the batch are still delivered. Messages on other channels and
/// events that do not parse are dropped.
fn dispatch_connect_batch(
    channel: &str,
    batch: &[Value],
) -> (Vec<CompletionEvent>, Option<String>) {
    let mut events = Vec::new();
    for message in batch {
        if message["channel"] == json!("/meta/connect") {
            if message["successful"] != json!(true) {
                return (events, Some(message.to_string()));
            }
            continue;
        }
        if message["channel"] != json!(channel) {
            continue;
        }
        match parse_completion_event(message) {
            Some(event) => events.push(event),
            None => debug!("unparseable event on {channel}: {message}"),
        }
    }
    (events, None)
}

/// Extracts `{runId, replayId}` from a completion-channel message.
fn parse_completion_event(message: &Value) -> Option<CompletionEvent> {
    let replay_id = message["data"]["event"]["replayId"].as_i64()?;
    let run_id = message["data"]["sobject"]["Id"].as_str()?;
    Some(CompletionEvent {
        run_id: run_id.to_string(),
        replay_id,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[test]
    fn replay_cursor_is_monotonic() {
        let mut cursor = ReplayCursor::NewOnly;
        assert_eq!(cursor.as_replay_id(), -1);

        cursor.advance(5);
        assert_eq!(cursor, ReplayCursor::After(5));
        cursor.advance(9);
        assert_eq!(cursor, ReplayCursor::After(9));
        cursor.advance(7);
        assert_eq!(cursor, ReplayCursor::After(9));
    }

    #[test]
    fn completion_event_parses_from_wire_shape() {
        let message = serde_json::json!({
            "channel": COMPLETION_CHANNEL,
            "data": {
                "event": { "replayId": 42, "type": "updated" },
                "sobject": { "Id": "707xx0000AGQ3jbAAI" }
            }
        });
        let event = parse_completion_event(&message).unwrap();
        assert_eq!(event.run_id, "707xx0000AGQ3jbAAI");
        assert_eq!(event.replay_id, 42);
    }

    fn wire_event(run: &str, replay: i64) -> Value {
        serde_json::json!({
            "channel": COMPLETION_CHANNEL,
            "data": {
                "event": { "replayId": replay, "type": "updated" },
                "sobject": { "Id": run }
            }
        })
    }

    #[test]
    fn handshake_ack_yields_the_client_id() {
        let batch = vec![serde_json::json!({
            "channel": "/meta/handshake",
            "successful": true,
            "clientId": "client-77"
        })];
        assert_eq!(parse_handshake_ack(&batch).unwrap(), "client-77");
    }

    #[test]
    fn bad_handshake_responses_are_rejected() {
        let rejected = vec![serde_json::json!({
            "channel": "/meta/handshake",
            "successful": false,
            "error": "403::Handshake denied"
        })];
        let anonymous = vec![serde_json::json!({
            "channel": "/meta/handshake",
            "successful": true
        })];
        for batch in [Vec::new(), rejected, anonymous] {
            assert!(matches!(
                parse_handshake_ack(&batch),
                Err(BrokerError::Handshake(_))
            ));
        }
    }

    #[test]
    fn connect_batch_keeps_only_parseable_events_on_the_subscribed_channel() {
        let batch = vec![
            serde_json::json!({ "channel": "/meta/connect", "successful": true }),
            serde_json::json!({ "channel": "/systemTopic/Logging", "data": {} }),
            serde_json::json!({ "channel": COMPLETION_CHANNEL, "data": { "garbled": true } }),
            wire_event("707xx0000AGQ3jbAAI", 8),
        ];
        let (events, down) = dispatch_connect_batch(COMPLETION_CHANNEL, &batch);
        assert_eq!(events, vec![CompletionEvent {
            run_id: "707xx0000AGQ3jbAAI".to_string(),
            replay_id: 8,
        }]);
        assert!(down.is_none());
    }

    #[test]
    fn unsuccessful_connect_ack_is_transport_down_after_pending_events() {
        let batch = vec![
            wire_event("707xx0000AGQ3jbAAI", 4),
            serde_json::json!({
                "channel": "/meta/connect",
                "successful": false,
                "error": "402::Unknown client"
            }),
            wire_event("707xx0000AGQ3jbAAI", 5),
        ];
        let (events, down) = dispatch_connect_batch(COMPLETION_CHANNEL, &batch);
        // The event ahead of the failing ack still goes out; the one
        // behind it does not.
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].replay_id, 4);
        assert!(down.unwrap().contains("402::Unknown client"));
    }

    /// Scripted broker: one message batch per subscribe call.
    struct FakeBroker {
        handshake_ok: bool,
        subscribe_ok: bool,
        batches: Mutex<Vec<Vec<BrokerMessage>>>,
        subscribed_cursors: Arc<Mutex<Vec<ReplayCursor>>>,
        disconnected: Arc<AtomicBool>,
        // Keeps channels open after their scripted batch is delivered.
        open_senders: Mutex<Vec<mpsc::Sender<BrokerMessage>>>,
    }

    impl FakeBroker {
        fn new(mut batches: Vec<Vec<BrokerMessage>>) -> Self {
            batches.reverse();
            Self {
                handshake_ok: true,
                subscribe_ok: true,
                batches: Mutex::new(batches),
                subscribed_cursors: Arc::new(Mutex::new(Vec::new())),
                disconnected: Arc::new(AtomicBool::new(false)),
                open_senders: Mutex::new(Vec::new()),
            }
        }

        fn disconnect_flag(&self) -> Arc<AtomicBool> {
            Arc::clone(&self.disconnected)
        }

        fn cursor_log(&self) -> Arc<Mutex<Vec<ReplayCursor>>> {
            Arc::clone(&self.subscribed_cursors)
        }
    }

    #[async_trait]
    impl Broker for FakeBroker {
        async fn handshake(&mut self) -> Result<(), BrokerError> {
            if self.handshake_ok {
                Ok(())
            } else {
                Err(BrokerError::Handshake("rejected".to_string()))
            }
        }

        async fn subscribe(
            &mut self,
            _channel: &str,
            cursor: ReplayCursor,
        ) -> Result<mpsc::Receiver<BrokerMessage>, BrokerError> {
            if !self.subscribe_ok {
                return Err(BrokerError::Subscribe("rejected".to_string()));
            }
            self.subscribed_cursors.lock().unwrap().push(cursor);
            let batch = self.batches.lock().unwrap().pop().unwrap_or_default();
            let (tx, rx) = mpsc::channel(16);
            for message in batch {
                tx.try_send(message).unwrap();
            }
            self.open_senders.lock().unwrap().push(tx);
            Ok(rx)
        }

        async fn disconnect(&mut self) {
            self.open_senders.lock().unwrap().clear();
            self.disconnected.store(true, Ordering::SeqCst);
        }
    }

    fn run_id() -> RunId {
        RunId::parse("707xx0000AGQ3jbAAI").unwrap()
    }

    fn event(run: &str, replay: i64) -> BrokerMessage {
        BrokerMessage::Event(CompletionEvent {
            run_id: run.to_string(),
            replay_id: replay,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn matching_event_completes_the_wait() {
        let broker = FakeBroker::new(vec![vec![event("707xx0000AGQ3jbAAI", 3)]]);
        let disconnected = broker.disconnect_flag();
        let outcome = StreamingSubscriber::new(broker)
            .wait_for_completion(run_id(), CancellationToken::new())
            .await;

        match outcome {
            StreamOutcome::Completed(ev) => assert_eq!(ev.replay_id, 3),
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(disconnected.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn events_for_other_runs_are_ignored() {
        let broker = FakeBroker::new(vec![vec![
            event("707xx0000OTHERxAAI", 1),
            event("707xx0000OTHERyAAI", 2),
            event("707xx0000AGQ3jbAAI", 3),
        ]]);
        let outcome = StreamingSubscriber::new(broker)
            .wait_for_completion(run_id(), CancellationToken::new())
            .await;
        assert!(matches!(
            outcome,
            StreamOutcome::Completed(CompletionEvent { replay_id: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn no_event_before_timeout_degrades_to_polling() {
        let broker = FakeBroker::new(vec![vec![]]);
        let disconnected = broker.disconnect_flag();
        let outcome = StreamingSubscriber::new(broker)
            .with_timeout(Duration::from_secs(5))
            .wait_for_completion(run_id(), CancellationToken::new())
            .await;
        assert!(matches!(outcome, StreamOutcome::TimedOut));
        assert!(disconnected.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn a_nonmatching_event_leaves_the_wait_pending() {
        let broker = FakeBroker::new(vec![vec![event("707xx0000OTHERxAAI", 1)]]);
        let outcome = StreamingSubscriber::new(broker)
            .with_timeout(Duration::from_secs(5))
            .wait_for_completion(run_id(), CancellationToken::new())
            .await;
        // Only a matching event resolves the wait; otherwise it runs to
        // its timeout and hands over to the poller.
        assert!(matches!(outcome, StreamOutcome::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_failure_reports_unavailable() {
        let mut broker = FakeBroker::new(vec![]);
        broker.handshake_ok = false;
        let disconnected = broker.disconnect_flag();
        let outcome = StreamingSubscriber::new(broker)
            .wait_for_completion(run_id(), CancellationToken::new())
            .await;
        assert!(matches!(outcome, StreamOutcome::Unavailable(_)));
        assert!(disconnected.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_down_reconnects_once_with_the_stored_cursor() {
        let broker = FakeBroker::new(vec![
            vec![
                event("707xx0000OTHERxAAI", 11),
                BrokerMessage::TransportDown("connection reset".to_string()),
            ],
            vec![event("707xx0000AGQ3jbAAI", 12)],
        ]);
        let cursors = broker.cursor_log();
        let outcome = StreamingSubscriber::new(broker)
            .wait_for_completion(run_id(), CancellationToken::new())
            .await;

        assert!(matches!(outcome, StreamOutcome::Completed(_)));
        let cursors = cursors.lock().unwrap();
        assert_eq!(cursors.as_slice(), &[
            ReplayCursor::NewOnly,
            // Resumes after the last event seen before the drop.
            ReplayCursor::After(11),
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_transport_failure_exhausts_the_retry_budget() {
        let broker = FakeBroker::new(vec![
            vec![BrokerMessage::TransportDown("reset".to_string())],
            vec![BrokerMessage::TransportDown("reset again".to_string())],
        ]);
        let disconnected = broker.disconnect_flag();
        let outcome = StreamingSubscriber::new(broker)
            .with_timeout(Duration::from_secs(60))
            .wait_for_completion(run_id(), CancellationToken::new())
            .await;
        assert!(matches!(outcome, StreamOutcome::TimedOut));
        assert!(disconnected.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_closes_the_subscription() {
        let broker = FakeBroker::new(vec![vec![]]);
        let disconnected = broker.disconnect_flag();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = StreamingSubscriber::new(broker)
            .wait_for_completion(run_id(), cancel)
            .await;
        assert!(matches!(outcome, StreamOutcome::Cancelled));
        assert!(disconnected.load(Ordering::SeqCst));
    }
}
