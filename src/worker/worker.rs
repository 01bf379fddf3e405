use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::queue::queue::TaskQueue;
use crate::queue::redis::{create_redis_pool, create_redis_pool_with_config, RedisConfig, RedisStore};
use crate::queue::store::QueueStore;
use crate::task::task::{HandlerRegistry, TaskHandler};
use crate::worker::dispatcher::Dispatcher;
use crate::worker::error::WorkerError;

/// Optional metrics sink to expose counters without coupling to a specific
/// backend. The engine reports `task_completed`, `task_failed`,
/// `task_discarded` and `queue_empty`.
pub trait MetricsSink: Send + Sync + 'static {
    fn inc_counter(&self, name: &str, value: u64);

    fn observe_duration(&self, _name: &str, _dur: Duration) {}
}

/// Default sink that discards all metrics.
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn inc_counter(&self, _name: &str, _value: u64) {}
}

/// Simple exponential backoff helper for idle polls
struct Backoff {
    current: Duration,
    base: Duration,
    max: Duration,
}

impl Backoff {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            current: base,
            base,
            max,
        }
    }

    fn reset(&mut self) {
        self.current = self.base;
    }

    fn next(&mut self) -> Duration {
        let next = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        next
    }
}

/// Worker process surface: a handler registry plus polling loops over the
/// dispatcher.
///
/// The engine holds no queue state of its own — everything shared lives in
/// the injected [`QueueStore`], so any number of engines (processes, tests)
/// can run against the same store without coordination beyond the store's
/// atomic claim.
pub struct WorkerEngine {
    queue: Arc<TaskQueue>,
    dispatcher: Dispatcher,
    registry: HandlerRegistry,
    config: WorkerConfig,
    running: Arc<RwLock<bool>>,
    shutdown_tx: watch::Sender<bool>,
    cancel_token: CancellationToken,
    metrics: Arc<dyn MetricsSink>,
}

impl WorkerEngine {
    /// Build an engine over an injected store. Most callers go through
    /// [`WorkerEngine::builder`] instead, which also sets up the Redis pool.
    pub fn new(store: Arc<dyn QueueStore>, config: WorkerConfig) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let cancel_token = CancellationToken::new();
        let queue = Arc::new(TaskQueue::new(store));
        let dispatcher = Dispatcher::new(queue.clone()).with_cancel_token(cancel_token.clone());
        Self {
            queue,
            dispatcher,
            registry: HandlerRegistry::new(),
            config,
            running: Arc::new(RwLock::new(false)),
            shutdown_tx,
            cancel_token,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn builder() -> WorkerEngineBuilder {
        WorkerEngineBuilder::new()
    }

    pub fn with_metrics(&mut self, sink: Arc<dyn MetricsSink>) {
        self.metrics = sink;
    }

    /// Register a handler under its declared topic. Must happen before
    /// [`start`](Self::start); registration is not synchronized with running
    /// loops.
    pub fn register_handler(&mut self, handler: Arc<dyn TaskHandler>) {
        self.registry.register(handler);
    }

    /// Shared queue handle, for producers and supervisors colocated with the
    /// worker.
    pub fn queue(&self) -> Arc<TaskQueue> {
        self.queue.clone()
    }

    /// Resolve the handler for `topic` and run exactly one
    /// claim-execute-record cycle, returning the minted task id.
    ///
    /// This is the single-cycle surface the rest of the system composes
    /// against; [`start`](Self::start) is just this in a loop.
    pub async fn work(&self, topic: &str, persist: bool) -> Result<Uuid, WorkerError> {
        let handler = self.registry.resolve(topic)?;
        self.dispatcher
            .process_queue_item(topic, handler, persist)
            .await
    }

    /// Run one polling loop per configured topic until a shutdown signal
    /// (Ctrl+C or SIGTERM) arrives or every loop ends.
    ///
    /// Topics come from the config when set, otherwise every registered
    /// handler gets a loop.
    pub async fn start(&self) -> Result<(), WorkerError> {
        let topics: Vec<String> = if self.config.topics.is_empty() {
            self.registry.topics().map(String::from).collect()
        } else {
            self.config.topics.clone()
        };

        // Every configured topic must resolve before any loop claims a task.
        for topic in &topics {
            self.registry.resolve(topic)?;
        }

        {
            let mut running = self.running.write().await;
            if *running {
                return Err(WorkerError::AlreadyRunning);
            }
            *running = true;
        }

        info!(topics = ?topics, persist = self.config.persist, "starting worker engine");

        let mut join_handles = Vec::new();
        for topic in topics {
            join_handles.push(self.start_topic_loop(topic));
        }

        tokio::select! {
            _ = self.wait_for_shutdown() => {
                info!("shutdown signal received, stopping worker engine");
            }
            result = futures::future::try_join_all(join_handles) => {
                match result {
                    Ok(results) => match results.into_iter().find_map(Result::err) {
                        Some(e) => error!(error = %e, "a topic loop failed"),
                        None => info!("all topic loops completed"),
                    },
                    Err(e) => error!(error = %e, "a topic loop panicked"),
                }
            }
        }

        self.stop().await;
        info!("worker engine stopped");
        Ok(())
    }

    /// Signal a graceful stop: topic loops finish their current cycle, and
    /// handlers see their cancellation tokens fire.
    pub async fn stop(&self) {
        info!("stopping worker engine");
        let mut running = self.running.write().await;
        *running = false;
        let _ = self.shutdown_tx.send(true);
        self.cancel_token.cancel();
    }

    fn start_topic_loop(&self, topic: String) -> tokio::task::JoinHandle<Result<(), WorkerError>> {
        let running = self.running.clone();
        let dispatcher = self.dispatcher.clone();
        let registry = self.registry.clone();
        let metrics = self.metrics.clone();
        let persist = self.config.persist;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let base = Duration::from_millis(self.config.poll_backoff_ms);
        let max = Duration::from_millis(self.config.poll_backoff_max_ms);

        tokio::spawn(async move {
            debug!(topic = %topic, "starting topic loop");
            let handler = registry.resolve(&topic)?;
            let mut backoff = Backoff::new(base, max);

            while *running.read().await {
                if *shutdown_rx.borrow() {
                    break;
                }

                // Once a cycle has claimed an envelope it must run to
                // completion or a recorded failure, so the cycle itself is
                // never raced against shutdown. Handlers observe shutdown
                // through their cancellation token; the loop checks the
                // signal between cycles.
                let outcome = dispatcher
                    .process_queue_item(&topic, handler.clone(), persist)
                    .await;

                match outcome {
                    Ok(_task_id) => {
                        metrics.inc_counter("task_completed", 1);
                        backoff.reset();
                    }
                    Err(WorkerError::QueueEmpty(_)) => {
                        metrics.inc_counter("queue_empty", 1);
                        let sleep_for = backoff.next();
                        tokio::select! {
                            _ = tokio::time::sleep(sleep_for) => {},
                            _ = shutdown_rx.changed() => break,
                        }
                    }
                    Err(WorkerError::Execution { task_id, source }) => {
                        // Already recorded by the dispatcher per persist mode;
                        // the loop just counts it and moves on.
                        if persist {
                            metrics.inc_counter("task_failed", 1);
                        } else {
                            metrics.inc_counter("task_discarded", 1);
                        }
                        warn!(topic = %topic, task_id = %task_id, error = %source, "task failed");
                        backoff.reset();
                    }
                    Err(e) => {
                        error!(topic = %topic, error = %e, "cycle failed");
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(1)) => {},
                            _ = shutdown_rx.changed() => break,
                        }
                    }
                }
            }

            debug!(topic = %topic, "topic loop stopped");
            Ok(())
        })
    }

    async fn wait_for_shutdown(&self) {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            sigterm.recv().await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => { info!("received Ctrl+C signal"); },
            _ = terminate => { info!("received SIGTERM signal"); },
        }
    }
}

/// Fluent construction for [`WorkerEngine`].
///
/// By default the engine connects to Redis at the configured URL; tests and
/// embedded setups can inject any [`QueueStore`] with
/// [`store`](WorkerEngineBuilder::store) instead.
pub struct WorkerEngineBuilder {
    config: WorkerConfig,
    redis_config: Option<RedisConfig>,
    store: Option<Arc<dyn QueueStore>>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl WorkerEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: WorkerConfig::default(),
            redis_config: None,
            store: None,
            metrics: None,
        }
    }

    pub fn redis_url(mut self, url: &str) -> Self {
        self.config.redis_url = url.to_string();
        self
    }

    /// Topics this engine polls. When left empty, every registered handler's
    /// topic gets a loop.
    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Persist mode used by the polling loops (durable failure residue when
    /// `true`).
    pub fn persist(mut self, persist: bool) -> Self {
        self.config.persist = persist;
        self
    }

    pub fn poll_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.config.poll_backoff_ms = base.as_millis() as u64;
        self.config.poll_backoff_max_ms = max.as_millis() as u64;
        self
    }

    pub fn redis_config(mut self, config: RedisConfig) -> Self {
        self.redis_config = Some(config);
        self
    }

    /// Inject a store directly, skipping the Redis connection.
    pub fn store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    pub async fn build(self) -> Result<WorkerEngine, WorkerError> {
        let store: Arc<dyn QueueStore> = match self.store {
            Some(store) => store,
            None => {
                let pool = if let Some(redis_config) = self.redis_config {
                    create_redis_pool_with_config(&self.config.redis_url, redis_config).await?
                } else {
                    create_redis_pool(&self.config.redis_url).await?
                };
                Arc::new(RedisStore::new(pool))
            }
        };

        let mut engine = WorkerEngine::new(store, self.config);
        if let Some(metrics) = self.metrics {
            engine.with_metrics(metrics);
        }
        Ok(engine)
    }
}

impl Default for WorkerEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
