//! Engine wiring: owns the caches, buffers and background loops.

use std::{sync::Arc, time::Duration};

use {
    courier_config::CourierConfig,
    tokio::{
        sync::{Mutex, Notify, RwLock, mpsc},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    backup::BackupManager,
    batcher::{GroupBatch, GroupBatcher},
    client::ForwardClient,
    dispatcher::Dispatcher,
    rate_limit::AdaptiveRateLimiter,
    rules::RuleBook,
    stats::StatsRecorder,
    store::ForwardStore,
    types::ChatMessage,
};

pub struct ForwardEngine {
    rules: Arc<RuleBook>,
    stats: Arc<StatsRecorder>,
    batcher: Arc<GroupBatcher>,
    dispatcher: Arc<Dispatcher>,
    backups: Arc<BackupManager>,
    flush_rx: Mutex<Option<mpsc::UnboundedReceiver<GroupBatch>>>,
    inbound_handle: Mutex<Option<JoinHandle<()>>>,
    flush_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
    running: RwLock<bool>,
}

impl ForwardEngine {
    pub fn new(
        store: Arc<dyn ForwardStore>,
        client: Arc<dyn ForwardClient>,
        config: &CourierConfig,
    ) -> Arc<Self> {
        let rules = Arc::new(RuleBook::new(
            Arc::clone(&store),
            Duration::from_secs(config.forward.rule_cache_ttl_secs),
        ));
        let stats = Arc::new(StatsRecorder::new(Arc::clone(&store)));
        let (batcher, flush_rx) =
            GroupBatcher::new(Duration::from_millis(config.forward.group_debounce_ms));
        let batcher = Arc::new(batcher);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&client),
            Arc::clone(&rules),
            Arc::new(AdaptiveRateLimiter::new(config.rate_limit.clone())),
            Arc::clone(&stats),
            Arc::clone(&batcher),
            config.forward.clone(),
        ));
        let backups = Arc::new(
            BackupManager::new(
                store,
                client,
                config.backup.clone(),
                config.rate_limit.clone(),
            )
            .with_max_flood_retries(config.forward.max_flood_retries),
        );

        Arc::new(Self {
            rules,
            stats,
            batcher,
            dispatcher,
            backups,
            flush_rx: Mutex::new(Some(flush_rx)),
            inbound_handle: Mutex::new(None),
            flush_handle: Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
            running: RwLock::new(false),
        })
    }

    pub fn rules(&self) -> &Arc<RuleBook> {
        &self.rules
    }

    pub fn stats(&self) -> &Arc<StatsRecorder> {
        &self.stats
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.backups
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Spawn the inbound loop and the group-flush consumer.
    ///
    /// Inbound messages are handled one at a time, in arrival order. The
    /// engine cannot be restarted once stopped.
    pub async fn start(&self, mut inbound: mpsc::Receiver<ChatMessage>) -> Result<()> {
        let mut running = self.running.write().await;
        if *running {
            return Err(Error::message("forward engine already running"));
        }
        let Some(mut flush_rx) = self.flush_rx.lock().await.take() else {
            return Err(Error::message("forward engine cannot be restarted"));
        };

        let dispatcher = Arc::clone(&self.dispatcher);
        let inbound_handle = tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                if let Err(e) = dispatcher.handle_message(&message).await {
                    warn!(
                        chat_id = message.chat_id,
                        message_id = message.message_id,
                        error = %e,
                        "failed to handle message"
                    );
                }
            }
            debug!("inbound channel closed");
        });

        let dispatcher = Arc::clone(&self.dispatcher);
        let shutdown = Arc::clone(&self.shutdown);
        let flush_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    batch = flush_rx.recv() => match batch {
                        Some(batch) => relay_batch(&dispatcher, batch).await,
                        None => break,
                    },
                    () = shutdown.notified() => {
                        while let Ok(batch) = flush_rx.try_recv() {
                            relay_batch(&dispatcher, batch).await;
                        }
                        break;
                    },
                }
            }
        });

        *self.inbound_handle.lock().await = Some(inbound_handle);
        *self.flush_handle.lock().await = Some(flush_handle);
        *running = true;
        info!("forward engine started");
        Ok(())
    }

    /// Stop taking inbound messages, relay every buffered album, and abort
    /// running backup jobs (they stay resumable).
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        if !*running {
            return;
        }
        *running = false;

        if let Some(handle) = self.inbound_handle.lock().await.take() {
            handle.abort();
        }
        let flushed = self.batcher.flush_all();
        self.shutdown.notify_one();
        let flush_handle = self.flush_handle.lock().await.take();
        if let Some(handle) = flush_handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "group flush loop ended abnormally");
        }
        let stopped = self.backups.stop_all();
        info!(flushed, stopped_backups = stopped, "forward engine stopped");
    }
}

async fn relay_batch(dispatcher: &Dispatcher, batch: GroupBatch) {
    let source_id = batch.source_id;
    if let Err(e) = dispatcher.relay_group(batch).await {
        warn!(source_id, error = %e, "failed to relay group");
    }
}
