//! EventLoop - owns the subscriber registry and drives every iteration
//!
//! ## Iteration
//!
//! ```text
//! receive (long-poll) → apply commands in arrival order → metric check (if due)
//!                     → answer queued /value requests → sleep / control commands
//! ```
//!
//! Commands finish, including their durable writes, before the metric check
//! runs, and the check (evaluation, sends, persistence) finishes before any
//! `/value` reply is sent.
//!
//! ## Failure handling
//!
//! Receive, fetch and send failures are logged and the iteration carries on.
//! A panic inside an iteration is caught at the loop boundary. Only
//! cancellation ends the loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::alerts::AlertFormatter;
use crate::commands::{CommandKind, InboundCommand, interpret};
use crate::registry::{RegistryError, SubscriberRegistry, ThresholdUpdate};
use crate::source::{MetricSource, RetryPolicy, fetch_with_retries};
use crate::storage::StateStore;
use crate::transport::{Cursor, MessageTransport};
use crate::{GlobalState, SubscriberId, Thresholds};

use super::messages::{LoopCommand, LoopStats};

#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Global default band
    pub defaults: Thresholds,

    /// Time between scheduled metric checks
    pub check_interval: Duration,

    /// Long-poll timeout handed to the transport
    pub poll_timeout: Duration,

    /// Sleep between iterations
    pub poll_interval: Duration,

    pub retry: RetryPolicy,

    /// Label used in every message
    pub metric_name: String,

    /// Subscribed at startup if not already present
    pub seed_subscriber: Option<SubscriberId>,
}

pub struct EventLoop {
    config: LoopConfig,
    registry: SubscriberRegistry,
    store: Arc<dyn StateStore>,
    transport: Arc<dyn MessageTransport>,
    source: Arc<dyn MetricSource>,
    formatter: AlertFormatter,
    command_rx: mpsc::Receiver<LoopCommand>,
    cursor: Cursor,
    last_value: Option<f64>,
    next_check: Instant,
    stats: LoopStats,
}

impl EventLoop {
    /// Load persisted state and prepare the loop. The first check is due
    /// immediately.
    pub fn new(
        config: LoopConfig,
        transport: Arc<dyn MessageTransport>,
        source: Arc<dyn MetricSource>,
        store: Arc<dyn StateStore>,
        command_rx: mpsc::Receiver<LoopCommand>,
    ) -> Self {
        let registry = SubscriberRegistry::load(store.clone(), config.defaults);
        let global = store.load_global();
        info!(
            "starting with last value {:?} and {} subscribers ({})",
            global.last_value,
            registry.len(),
            store.describe()
        );

        Self {
            formatter: AlertFormatter::new(config.metric_name.clone()),
            config,
            registry,
            store,
            transport,
            source,
            command_rx,
            cursor: Cursor::new(),
            last_value: global.last_value,
            next_check: Instant::now(),
            stats: LoopStats::default(),
        }
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn last_value(&self) -> Option<f64> {
        self.last_value
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            subscribers: self.registry.len(),
            last_value: self.last_value,
            cursor: self.cursor,
            ..self.stats.clone()
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Cancellation is observed during the long-poll and between iterations;
    /// an iteration that already started its sends runs to completion.
    #[instrument(skip_all)]
    pub async fn run(mut self, shutdown: CancellationToken) {
        debug!("starting event loop");
        self.seed_subscriber();

        'iterations: loop {
            if shutdown.is_cancelled() {
                break;
            }

            let iteration = AssertUnwindSafe(self.run_iteration(&shutdown))
                .catch_unwind()
                .await;
            if let Err(panic) = iteration {
                error!("iteration panicked: {}", panic_message(panic.as_ref()));
            }

            let pause = tokio::time::sleep(self.config.poll_interval);
            tokio::pin!(pause);
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => break 'iterations,

                    Some(command) = self.command_rx.recv() => self.handle_command(command).await,

                    _ = &mut pause => break,
                }
            }
        }

        info!("shutting down");
    }

    /// One full iteration: inbound commands, the metric check if due, then
    /// `/value` replies.
    pub async fn run_iteration(&mut self, shutdown: &CancellationToken) {
        let received = tokio::select! {
            biased;

            _ = shutdown.cancelled() => return,
            received = self.transport.receive(self.cursor, self.config.poll_timeout) => received,
        };

        let mut value_requests = Vec::new();
        match received {
            Ok(poll) => {
                self.cursor.merge(poll.cursor);
                for message in &poll.messages {
                    self.cursor.advance(message.message_id);
                    let command = interpret(message);
                    self.apply_command(command, &mut value_requests).await;
                }
            }
            Err(e) => warn!("updates error: {e}"),
        }

        if Instant::now() >= self.next_check {
            // logged inside; the schedule already moved on
            let _ = self.run_metric_check().await;
        }

        self.answer_value_requests(&value_requests).await;
    }

    /// Fetch the metric, notify crossings and persist.
    ///
    /// The next scheduled check is one interval after this attempt, whether
    /// or not it succeeds.
    #[instrument(skip(self))]
    pub async fn run_metric_check(&mut self) -> Result<f64> {
        self.next_check = Instant::now() + self.config.check_interval;
        self.stats.checks_attempted += 1;

        let value = match fetch_with_retries(self.source.as_ref(), &self.config.retry).await {
            Ok(value) => value,
            Err(e) => {
                self.stats.checks_failed += 1;
                warn!("metric check failed: {e:#}");
                return Err(e);
            }
        };

        let notifications = self.registry.observe(value);
        for notification in &notifications {
            let text = self.formatter.notification(notification);
            match self.transport.send(notification.recipient, &text).await {
                Ok(()) => {
                    self.stats.alerts_sent += 1;
                    info!(
                        "alert to {} zone={} value={value:.2} upper={:.2} lower={:.2}",
                        notification.recipient,
                        notification.zone,
                        notification.thresholds.upper,
                        notification.thresholds.lower
                    );
                }
                Err(e) => {
                    self.stats.send_failures += 1;
                    warn!("alert send error to {}: {e}", notification.recipient);
                }
            }
        }

        if let Err(e) = self.registry.persist() {
            error!("failed to persist subscriber states: {e}");
        }
        self.last_value = Some(value);
        if let Err(e) = self.store.save_global(&GlobalState::observed(value)) {
            error!("failed to persist global state: {e}");
        }

        info!(
            "checked value {value:.2} for {} subscribers",
            self.registry.len()
        );
        Ok(value)
    }

    fn seed_subscriber(&mut self) {
        let Some(id) = self.config.seed_subscriber else {
            return;
        };
        match self.registry.upsert_on_start(id) {
            Ok(true) => info!("subscribed configured chat {id}"),
            Ok(false) => trace!("configured chat {id} already subscribed"),
            Err(e) => error!("failed to subscribe configured chat {id}: {e}"),
        }
    }

    async fn apply_command(&mut self, command: InboundCommand, value_requests: &mut Vec<SubscriberId>) {
        let InboundCommand {
            sender_id: id,
            kind,
            args,
        } = command;

        match kind {
            CommandKind::Start => match self.registry.upsert_on_start(id) {
                Ok(created) => {
                    info!("/start from {id} (new: {created})");
                    self.reply(id, self.formatter.subscribed()).await;
                }
                Err(e) => {
                    error!("failed to subscribe {id}: {e}");
                    self.reply(id, self.formatter.save_failed()).await;
                }
            },
            CommandKind::Stop => match self.registry.remove_on_stop(id) {
                Ok(removed) => {
                    info!("/stop from {id} (was subscribed: {removed})");
                    self.reply(id, self.formatter.unsubscribed()).await;
                }
                Err(e) => {
                    error!("failed to unsubscribe {id}: {e}");
                    self.reply(id, self.formatter.save_failed()).await;
                }
            },
            CommandKind::Value => {
                if !value_requests.contains(&id) {
                    value_requests.push(id);
                }
            }
            CommandKind::ShowSettings => {
                let thresholds = self.registry.effective_thresholds(id);
                let custom = self
                    .registry
                    .get(id)
                    .is_some_and(|subscriber| subscriber.has_overrides());
                self.reply(id, self.formatter.settings(thresholds, custom))
                    .await;
            }
            CommandKind::SetUpper | CommandKind::SetLower | CommandKind::SetThresholds => {
                self.apply_threshold_command(id, kind, &args).await;
            }
            CommandKind::Reset => match self.registry.reset(id) {
                Ok(_) => {
                    info!("reset thresholds for {id}");
                    self.reply(id, self.formatter.reset()).await;
                }
                Err(e) => {
                    error!("failed to reset thresholds for {id}: {e}");
                    self.reply(id, self.formatter.save_failed()).await;
                }
            },
            CommandKind::Help => self.reply(id, self.formatter.help()).await,
            CommandKind::Unrecognized => trace!("ignoring message from {id}"),
        }
    }

    async fn apply_threshold_command(&mut self, id: SubscriberId, kind: CommandKind, args: &[String]) {
        let update = match kind {
            CommandKind::SetUpper => ThresholdUpdate::upper(args),
            CommandKind::SetLower => ThresholdUpdate::lower(args),
            _ => ThresholdUpdate::both(args),
        };

        let result = update
            .map_err(RegistryError::from)
            .and_then(|update| self.registry.apply(id, update));

        let text = match result {
            Ok(thresholds) => {
                info!(
                    "saved thresholds for {id} -> upper={} lower={}",
                    thresholds.upper, thresholds.lower
                );
                self.formatter.saved(thresholds)
            }
            Err(RegistryError::Validation(e)) => {
                warn!("threshold command from {id} rejected ({kind:?} {args:?}): {e}");
                self.formatter.threshold_error(&e)
            }
            Err(RegistryError::Storage(e)) => {
                error!("failed to save thresholds for {id}: {e}");
                self.formatter.save_failed()
            }
        };
        self.reply(id, text).await;
    }

    async fn answer_value_requests(&mut self, requests: &[SubscriberId]) {
        if requests.is_empty() {
            return;
        }

        if self.last_value.is_none() {
            match fetch_with_retries(self.source.as_ref(), &self.config.retry).await {
                Ok(value) => self.last_value = Some(value),
                Err(e) => warn!("quick fetch for /value failed: {e:#}"),
            }
        }

        for &id in requests {
            let thresholds = self.registry.effective_thresholds(id);
            let text = self.formatter.value_report(self.last_value, thresholds);
            self.reply(id, text).await;
            debug!("/value replied to {id}");
        }
    }

    async fn reply(&mut self, recipient: SubscriberId, text: String) {
        if let Err(e) = self.transport.send(recipient, &text).await {
            self.stats.send_failures += 1;
            warn!("reply to {recipient} failed: {e}");
        }
    }

    async fn handle_command(&mut self, command: LoopCommand) {
        match command {
            LoopCommand::CheckNow { respond_to } => {
                debug!("received CheckNow command");
                let result = self.run_metric_check().await;
                let _ = respond_to.send(result);
            }
            LoopCommand::GetStats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Handle for controlling a running [`EventLoop`]
///
/// Cloneable; every clone talks to the same task.
#[derive(Clone)]
pub struct BotHandle {
    sender: mpsc::Sender<LoopCommand>,
    shutdown: CancellationToken,
}

impl BotHandle {
    /// Build the loop, spawn it as a tokio task and return a handle to it.
    ///
    /// Cancelling `shutdown` (directly or via [`BotHandle::shutdown`]) stops
    /// the loop after its current iteration.
    pub fn spawn(
        config: LoopConfig,
        transport: Arc<dyn MessageTransport>,
        source: Arc<dyn MetricSource>,
        store: Arc<dyn StateStore>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let event_loop = EventLoop::new(config, transport, source, store, command_rx);
        let task = tokio::spawn(event_loop.run(shutdown.clone()));

        (
            Self {
                sender: command_tx,
                shutdown,
            },
            task,
        )
    }

    /// Run a metric check as soon as the loop is between iterations.
    pub async fn check_now(&self) -> Result<f64> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LoopCommand::CheckNow { respond_to: tx })
            .await
            .context("failed to send CheckNow command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn stats(&self) -> Result<LoopStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LoopCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive response")
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
