//! MQTT subscription worker.
//!
//! Two tasks per run: the delivery task owns the rumqttc event loop and pushes
//! every publish into a bounded queue; the processor task drains the queue one
//! message at a time through the [`IngestionCoordinator`]. Only the delivery
//! task is cancelled on stop; the processor drains whatever is already queued
//! and exits when the queue's sender is dropped.

use crate::errors::Error;
use crate::ingest::{DropReason, IngestOutcome, IngestionCoordinator, Origin};
use crate::metrics::{
    CHANNEL_FULL_TOTAL, DROPPED_MESSAGES_TOTAL, FAILED_MESSAGES_TOTAL, MESSAGES_TOTAL,
    MQTT_CONNECTED,
};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 5000;
const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);
const REQUEST_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub keep_alive: Duration,
    pub channel_capacity: usize,
    /// Consecutive connection failures tolerated before the worker gives up.
    pub reconnect_attempts: u32,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::Starting,
            2 => WorkerState::Running,
            3 => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(WorkerState::Stopped as u8))
    }

    fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// A message handed from the delivery task to the processor task.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// What happened to one delivered message. The worker never propagates it.
#[derive(Debug)]
pub enum MessageOutcome {
    Persisted { id: i64 },
    Dropped(DropReason),
    Failed(Error),
}

struct RunHandles {
    cancel: CancellationToken,
    client: AsyncClient,
    delivery: JoinHandle<()>,
    processor: JoinHandle<()>,
}

pub struct SubscriptionWorker {
    config: WorkerConfig,
    coordinator: IngestionCoordinator,
    state: Arc<StateCell>,
    run: Mutex<Option<RunHandles>>,
}

impl SubscriptionWorker {
    pub fn new(config: WorkerConfig, coordinator: IngestionCoordinator) -> Self {
        Self {
            config,
            coordinator,
            state: Arc::new(StateCell::new()),
            run: Mutex::new(None),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Spawns the worker and returns immediately; the broker connection is
    /// established in the background. Returns `false` (and does nothing) unless
    /// the worker is currently stopped. Must be called inside a Tokio runtime.
    pub fn start(&self) -> bool {
        if !self
            .state
            .transition(WorkerState::Stopped, WorkerState::Starting)
        {
            debug!(state = ?self.state.get(), "Start ignored, worker already active");
            return false;
        }

        let mut mqtt_options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.broker.clone(),
            self.config.port,
        );
        mqtt_options.set_keep_alive(self.config.keep_alive);
        mqtt_options.set_clean_session(false);

        let (client, eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let cancel = CancellationToken::new();

        let delivery = tokio::spawn(run_delivery(
            eventloop,
            client.clone(),
            self.config.topic.clone(),
            self.config.reconnect_attempts,
            self.state.clone(),
            tx,
            cancel.clone(),
        ));
        let processor = tokio::spawn(run_processor(rx, self.coordinator.clone()));

        let previous = self
            .run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(RunHandles {
                cancel,
                client,
                delivery,
                processor,
            });
        if let Some(previous) = previous {
            // Left behind by a run that gave up on the broker by itself.
            previous.cancel.cancel();
        }

        info!(
            broker = %self.config.broker,
            port = self.config.port,
            topic = %self.config.topic,
            "MQTT subscription worker started"
        );
        true
    }

    /// Stops delivery, requests a broker disconnect and waits up to
    /// `shutdown_timeout` while the processor finishes every message already
    /// queued. Tasks still running after that are aborted and the rest of the
    /// queue is lost. Returns `false` if there was nothing to stop.
    pub async fn stop(&self) -> bool {
        let handles = self
            .run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut handles) = handles else {
            return false;
        };

        self.state.set(WorkerState::Stopping);
        if let Err(e) = handles.client.try_disconnect() {
            warn!(error = %e, "Failed to request MQTT disconnect");
        }
        handles.cancel.cancel();

        let joined = tokio::time::timeout(self.config.shutdown_timeout, async {
            for (name, handle) in [
                ("delivery", &mut handles.delivery),
                ("processor", &mut handles.processor),
            ] {
                if let Err(e) = handle.await {
                    error!(task = name, error = %e, "Worker task ended abnormally");
                }
            }
        })
        .await;

        if joined.is_err() {
            warn!(
                timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                "Worker tasks did not stop in time, aborting"
            );
            handles.delivery.abort();
            handles.processor.abort();
        }

        self.state.set(WorkerState::Stopped);
        MQTT_CONNECTED.set(0.0);
        info!("MQTT subscription worker stopped");
        true
    }
}

async fn run_delivery(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topic: String,
    reconnect_attempts: u32,
    state: Arc<StateCell>,
    tx: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                failures = 0;
                MQTT_CONNECTED.set(1.0);
                info!(session_present = ack.session_present, "Connected to MQTT broker");

                if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
                    error!(topic = %topic, error = %e, "Failed to request subscription");
                }
                state.transition(WorkerState::Starting, WorkerState::Running);
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                info!(topic = %topic, "Subscribed with QoS 1");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                MESSAGES_TOTAL.inc();
                debug!(
                    "Received message on topic {}, size: {} bytes",
                    publish.topic,
                    publish.payload.len()
                );

                let message = InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                if !forward(&tx, message).await {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                MQTT_CONNECTED.set(0.0);
                failures += 1;
                if failures > reconnect_attempts {
                    error!(
                        error = %e,
                        attempts = failures,
                        "Giving up on MQTT broker, stopping worker"
                    );
                    cancel.cancel();
                    if !state.transition(WorkerState::Running, WorkerState::Stopped) {
                        state.transition(WorkerState::Starting, WorkerState::Stopped);
                    }
                    return;
                }

                let backoff = reconnect_backoff(failures);
                warn!(
                    error = %e,
                    attempt = failures,
                    max_attempts = reconnect_attempts,
                    "MQTT connection error, retrying in {}ms",
                    backoff.as_millis()
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }

    flush_disconnect(&mut eventloop).await;
    MQTT_CONNECTED.set(0.0);
    info!("MQTT delivery stopped");
}

/// Gives the event loop a short window to send a queued DISCONNECT.
async fn flush_disconnect(eventloop: &mut EventLoop) {
    let _ = tokio::time::timeout(DISCONNECT_FLUSH, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
}

/// Queues a message for the processor, waiting when the queue is full.
/// Returns `false` if the processor is gone.
async fn forward(tx: &mpsc::Sender<InboundMessage>, message: InboundMessage) -> bool {
    match tx.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(message)) => {
            CHANNEL_FULL_TOTAL.inc();
            debug!("Processing queue full, waiting");
            tx.send(message).await.is_ok()
        }
        Err(TrySendError::Closed(_)) => {
            error!("Processing queue closed, cannot forward message");
            false
        }
    }
}

/// Handles queued messages in order until every sender is dropped. A message
/// being handled is never interrupted; `stop` bounds the whole drain.
async fn run_processor(mut rx: mpsc::Receiver<InboundMessage>, coordinator: IngestionCoordinator) {
    let mut handled: u64 = 0;
    while let Some(message) = rx.recv().await {
        handle_message(&coordinator, &message.topic, &message.payload).await;
        handled += 1;
    }

    debug!(handled, "Processing queue drained");
    info!("Message processor stopped");
}

/// Decodes a message body into a JSON object.
pub fn decode_payload(payload: &[u8]) -> Result<Map<String, Value>, DropReason> {
    let text = std::str::from_utf8(payload).map_err(|_| DropReason::InvalidEncoding)?;
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(DropReason::NotAnObject),
        Err(_) => Err(DropReason::InvalidJson),
    }
}

/// Processes one delivered message to completion or drop. Never fails.
pub async fn handle_message(
    coordinator: &IngestionCoordinator,
    topic: &str,
    payload: &[u8],
) -> MessageOutcome {
    let document = match decode_payload(payload) {
        Ok(document) => document,
        Err(reason) => {
            DROPPED_MESSAGES_TOTAL
                .with_label_values(&[reason.as_str()])
                .inc();
            warn!(topic, reason = %reason, "Invalid payload received, dropping message");
            return MessageOutcome::Dropped(reason);
        }
    };

    match coordinator
        .ingest(&Origin::Topic(topic.to_string()), &document)
        .await
    {
        Ok(IngestOutcome::Persisted(row)) => MessageOutcome::Persisted { id: row.id },
        Ok(IngestOutcome::Dropped(reason)) => MessageOutcome::Dropped(reason),
        Err(e) => {
            FAILED_MESSAGES_TOTAL.inc();
            error!(
                topic,
                device_id = ?document.get("device_id"),
                error = %e,
                "Error processing MQTT message, dropping it"
            );
            MessageOutcome::Failed(e)
        }
    }
}

fn reconnect_backoff(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    Duration::from_millis((INITIAL_BACKOFF_MS << exp).min(MAX_BACKOFF_MS))
}
