use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use switchboard_core::config::RouterConfig;
use switchboard_core::types::SessionKey;

use crate::{
    channel::{Channel, StartContext},
    error::{ChannelError, RouterError},
    handler::MessageHandler,
    types::{ChannelStatus, InboundMessage, OutboundMessage},
};

type Registry = BTreeMap<String, Arc<dyn Channel>>;

/// Sent instead of queueing when a conversation already has a full backlog.
pub const BUSY_REPLY: &str =
    "⚠️ Error: too many pending messages in this conversation, please wait for the current reply";
/// Sent for every accepted message that was still queued when the router stopped.
pub const SHUTDOWN_REPLY: &str = "⚠️ Service is shutting down, please resend your message later.";

enum Phase {
    Idle,
    Starting,
    Running(Running),
    Stopped,
}

struct Running {
    /// Cancels the dispatcher and the session workers.
    intake: CancellationToken,
    /// Handed to adapters. `stop` cancels it only after the handlers have
    /// drained; cancelling the root token reaches it directly.
    adapters: CancellationToken,
    tracker: TaskTracker,
}

/// Fans inbound messages from every registered adapter into the message
/// handler and sends each reply back through the adapter it came from.
///
/// Messages sharing a [`SessionKey`] are handled one at a time in the order
/// they were received. Different keys are handled in parallel, and a busy
/// conversation never holds up another one.
///
/// A router is single use: `register*`, `start`, then `stop`.
pub struct Router {
    handler: Arc<dyn MessageHandler>,
    config: RouterConfig,
    registry: RwLock<Registry>,
    phase: Mutex<Phase>,
    sessions: Arc<AtomicUsize>,
}

impl Router {
    pub fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self::with_config(handler, RouterConfig::default())
    }

    pub fn with_config(handler: Arc<dyn MessageHandler>, config: RouterConfig) -> Self {
        Self {
            handler,
            config,
            registry: RwLock::new(BTreeMap::new()),
            phase: Mutex::new(Phase::Idle),
            sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add an adapter. Only allowed before [`start`](Router::start).
    pub fn register(&self, adapter: Arc<dyn Channel>) -> Result<(), RouterError> {
        let phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*phase, Phase::Idle) {
            return Err(RouterError::Lifecycle(format!(
                "cannot register '{}' after start",
                adapter.name()
            )));
        }

        let name = adapter.name().to_string();
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        if registry.contains_key(&name) {
            return Err(RouterError::Lifecycle(format!(
                "adapter '{name}' is already registered"
            )));
        }
        info!(channel = %name, "registering channel adapter");
        registry.insert(name, adapter);
        Ok(())
    }

    /// Start every registered adapter concurrently and begin dispatching.
    ///
    /// If any adapter fails, the ones that did start are stopped again and
    /// every failure is returned in [`RouterError::Startup`].
    ///
    /// Cancelling `shutdown` stops intake and every adapter at once; call
    /// [`stop`](Router::stop) afterwards to wait for the drain and close the
    /// adapters.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<(), RouterError> {
        {
            let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
            if !matches!(*phase, Phase::Idle) {
                return Err(RouterError::Lifecycle("router already started".to_string()));
            }
            *phase = Phase::Starting;
        }

        let registry: Arc<Registry> = Arc::new(self.snapshot());
        let (tx, rx) = mpsc::channel(self.config.inbound_queue_capacity.max(1));
        let intake = shutdown.child_token();
        let adapters = shutdown.child_token();

        let starts = registry.iter().map(|(name, adapter)| {
            let ctx = StartContext {
                inbound: tx.clone(),
                shutdown: adapters.clone(),
            };
            async move {
                info!(channel = %name, "starting channel");
                (name.clone(), adapter.start(ctx).await)
            }
        });
        let results = join_all(starts).await;
        drop(tx);

        let mut started = Vec::new();
        let mut failures = Vec::new();
        for (name, result) in results {
            match result {
                Ok(()) => started.push(name),
                Err(e) => {
                    error!(channel = %name, error = %e, "channel failed to start");
                    failures.push((name, e));
                }
            }
        }

        if !failures.is_empty() {
            adapters.cancel();
            let to_stop: Vec<(String, Arc<dyn Channel>)> = started
                .into_iter()
                .filter_map(|name| registry.get(&name).map(|a| (name, Arc::clone(a))))
                .collect();
            warn!(count = to_stop.len(), "rolling back started channels");
            self.stop_adapters(to_stop).await;
            self.set_phase(Phase::Stopped);
            return Err(RouterError::Startup { failures });
        }

        let tracker = TaskTracker::new();
        let dispatcher = Dispatcher {
            registry: Arc::clone(&registry),
            handler: Arc::clone(&self.handler),
            intake: intake.clone(),
            tracker: tracker.clone(),
            capacity: self.config.session_queue_capacity.max(1),
            idle: Duration::from_millis(self.config.session_idle_ms.max(1)),
            active: Arc::clone(&self.sessions),
        };
        tracker.spawn(dispatcher.run(rx));

        info!(channels = registry.len(), "router started");
        self.set_phase(Phase::Running(Running {
            intake,
            adapters,
            tracker,
        }));
        Ok(())
    }

    /// Stop intake, wait for in-flight handler calls (bounded by the grace
    /// period), then stop every adapter concurrently.
    ///
    /// A no-op before `start` and on repeat calls.
    pub async fn stop(&self) {
        let running = {
            let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *phase, Phase::Stopped) {
                Phase::Running(running) => running,
                Phase::Idle => {
                    *phase = Phase::Idle;
                    debug!("router stop before start, nothing to do");
                    return;
                }
                other => {
                    *phase = other;
                    return;
                }
            }
        };

        info!("router stopping");
        running.intake.cancel();
        running.tracker.close();

        let grace = Duration::from_millis(self.config.shutdown_grace_ms);
        if timeout(grace, running.tracker.wait()).await.is_err() {
            warn!(
                in_flight = running.tracker.len(),
                grace_ms = self.config.shutdown_grace_ms,
                "grace period elapsed with handler calls still running"
            );
        }

        running.adapters.cancel();
        let all: Vec<(String, Arc<dyn Channel>)> = self
            .snapshot()
            .into_iter()
            .collect();
        self.stop_adapters(all).await;
        info!("router stopped");
    }

    /// Current status of every adapter, sorted by name.
    pub fn statuses(&self) -> Vec<(String, ChannelStatus)> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, ch)| (name.clone(), ch.status()))
            .collect()
    }

    /// Number of conversations that currently have a session worker.
    pub fn active_sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn adapter_names(&self) -> Vec<String> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn snapshot(&self) -> Registry {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_phase(&self, next: Phase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    async fn stop_adapters(&self, adapters: Vec<(String, Arc<dyn Channel>)>) {
        let budget = Duration::from_millis(self.config.adapter_stop_timeout_ms);
        let stops = adapters.into_iter().map(|(name, adapter)| async move {
            info!(channel = %name, "stopping channel");
            if timeout(budget, adapter.stop()).await.is_err() {
                warn!(
                    channel = %name,
                    budget_ms = budget.as_millis() as u64,
                    "channel did not stop in time, abandoning"
                );
            }
        });
        join_all(stops).await;
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

struct SessionSlot {
    generation: u64,
    tx: mpsc::Sender<InboundMessage>,
    /// Messages queued to this worker so far.
    sent: u64,
}

/// A worker that went idle asks to be retired, reporting how many messages
/// it has handled.
struct Retire {
    key: SessionKey,
    generation: u64,
    handled: u64,
}

struct Dispatcher {
    registry: Arc<Registry>,
    handler: Arc<dyn MessageHandler>,
    intake: CancellationToken,
    tracker: TaskTracker,
    capacity: usize,
    idle: Duration,
    active: Arc<AtomicUsize>,
}

impl Dispatcher {
    /// Route each inbound message to the worker that owns its session key,
    /// spawning the worker on first sight of the key. Never waits on a
    /// session queue.
    async fn run(self, mut rx: mpsc::Receiver<InboundMessage>) {
        let (retire_tx, mut retire_rx) = mpsc::unbounded_channel::<Retire>();
        let mut workers: HashMap<SessionKey, SessionSlot> = HashMap::new();
        let mut generation = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = self.intake.cancelled() => break,
                Some(retire) = retire_rx.recv() => {
                    let idle = workers.get(&retire.key).is_some_and(|slot| {
                        slot.generation == retire.generation && slot.sent == retire.handled
                    });
                    if idle {
                        // Dropping the sender lets the worker's recv return None.
                        workers.remove(&retire.key);
                        debug!(session = %retire.key, "retired idle session worker");
                    }
                }
                msg = rx.recv() => match msg {
                    Some(msg) => {
                        let key = msg.session_key.clone();
                        let slot = workers.entry(key.clone()).or_insert_with(|| {
                            generation += 1;
                            self.spawn_worker(key.clone(), generation, retire_tx.clone())
                        });
                        match slot.tx.try_send(msg) {
                            Ok(()) => slot.sent += 1,
                            Err(mpsc::error::TrySendError::Full(msg)) => {
                                warn!(session = %key, capacity = self.capacity, "session queue full, sending busy reply");
                                let registry = Arc::clone(&self.registry);
                                self.tracker.spawn(async move {
                                    send_reply(&registry, &msg, BUSY_REPLY.to_string()).await;
                                });
                            }
                            Err(mpsc::error::TrySendError::Closed(msg)) => {
                                warn!(session = %key, "session worker gone, starting a new one");
                                generation += 1;
                                let mut fresh = self.spawn_worker(key.clone(), generation, retire_tx.clone());
                                // A new queue always has room for one message.
                                if fresh.tx.try_send(msg).is_ok() {
                                    fresh.sent = 1;
                                }
                                workers.insert(key, fresh);
                            }
                        }
                    }
                    None => break,
                },
            }
            self.active.store(workers.len(), Ordering::SeqCst);
        }

        if self.intake.is_cancelled() {
            // Accepted by an adapter but never routed to a worker.
            while let Ok(msg) = rx.try_recv() {
                send_reply(&self.registry, &msg, SHUTDOWN_REPLY.to_string()).await;
            }
        }
        debug!(sessions = workers.len(), "dispatcher exiting");
        drop(workers);
        self.active.store(0, Ordering::SeqCst);
    }

    fn spawn_worker(
        &self,
        key: SessionKey,
        generation: u64,
        retire: mpsc::UnboundedSender<Retire>,
    ) -> SessionSlot {
        debug!(session = %key, "spawning session worker");
        let (tx, rx) = mpsc::channel(self.capacity);
        let worker = SessionWorker {
            key,
            generation,
            registry: Arc::clone(&self.registry),
            handler: Arc::clone(&self.handler),
            intake: self.intake.clone(),
            idle: self.idle,
            retire,
        };
        self.tracker.spawn(worker.run(rx));
        SessionSlot {
            generation,
            tx,
            sent: 0,
        }
    }
}

struct SessionWorker {
    key: SessionKey,
    generation: u64,
    registry: Arc<Registry>,
    handler: Arc<dyn MessageHandler>,
    intake: CancellationToken,
    idle: Duration,
    retire: mpsc::UnboundedSender<Retire>,
}

impl SessionWorker {
    /// Handle the messages of one session strictly in order.
    async fn run(self, mut rx: mpsc::Receiver<InboundMessage>) {
        let mut handled = 0u64;
        loop {
            let msg = tokio::select! {
                biased;
                _ = self.intake.cancelled() => break,
                msg = timeout(self.idle, rx.recv()) => match msg {
                    Ok(Some(msg)) => msg,
                    Ok(None) => break,
                    Err(_) => {
                        // Ask to be retired; the dispatcher answers by closing
                        // the queue, or by sending another message.
                        let _ = self.retire.send(Retire {
                            key: self.key.clone(),
                            generation: self.generation,
                            handled,
                        });
                        continue;
                    }
                },
            };
            handle_one(&self.key, msg, &self.registry, self.handler.as_ref()).await;
            handled += 1;
        }

        let mut unanswered = 0usize;
        while let Ok(msg) = rx.try_recv() {
            send_reply(&self.registry, &msg, SHUTDOWN_REPLY.to_string()).await;
            unanswered += 1;
        }
        if unanswered > 0 {
            warn!(session = %self.key, unanswered, "stopped with queued messages, sent shutdown replies");
        }
    }
}

async fn handle_one(
    key: &SessionKey,
    msg: InboundMessage,
    registry: &Registry,
    handler: &dyn MessageHandler,
) {
    debug!(session = %key, channel = %msg.channel, "handling message");

    let content = match handler.handle(key, &msg.content).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(session = %key, error = %e, "handler failed, sending error reply");
            format!("⚠️ Error: {e}")
        }
    };
    send_reply(registry, &msg, content).await;
}

/// Send `content` back through the adapter `msg` arrived on.
async fn send_reply(registry: &Registry, msg: &InboundMessage, content: String) {
    let Some(adapter) = registry.get(&msg.channel) else {
        error!(channel = %msg.channel, session = %msg.session_key, "reply for unregistered channel dropped");
        return;
    };

    let reply = OutboundMessage::reply_to(msg, content);
    match adapter.send(&reply).await {
        Ok(()) => {}
        Err(ChannelError::UnknownSession(s)) => {
            warn!(channel = %msg.channel, session = %s, "adapter does not know session, reply dropped");
        }
        Err(e) => {
            error!(channel = %msg.channel, session = %msg.session_key, error = %e, "failed to send reply");
        }
    }
}
