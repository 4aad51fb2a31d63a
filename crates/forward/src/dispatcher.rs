//! Inbound handling and chained relaying.

use std::{collections::HashSet, sync::Arc, time::Duration};

use {
    courier_config::ForwardConfig,
    tracing::{debug, info, warn},
};

use crate::{
    Result,
    batcher::{GroupBatch, GroupBatcher},
    client::{ClientError, ForwardClient, ForwardRequest},
    filter::should_forward,
    rate_limit::AdaptiveRateLimiter,
    rules::RuleBook,
    stats::StatsRecorder,
    types::{ChatId, ChatMessage, MediaKind, MessageId, RuleOptions},
};

/// Why a relay chain ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStop {
    /// The last target has no active rule.
    End,
    /// The next hop would exceed the configured depth.
    DepthLimit,
    /// The next target was already visited in this chain.
    Revisit { chat: ChatId },
    /// The platform returned no ids to carry forward.
    NoIds,
    /// The hop's source chat disallows forwarding; its rule was removed.
    ContentProtected { chat: ChatId },
    /// Flood-wait retries ran out.
    RateLimited,
    /// Any other platform failure.
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    /// Successful hops, the initial relay included.
    pub hops: usize,
    pub stop: ChainStop,
}

impl RelayReport {
    #[must_use]
    pub fn relayed(&self) -> bool {
        self.hops > 0
    }
}

/// Call the client, backing off and retrying the same request on flood-wait
/// up to `max_retries` times. Throttles before every attempt.
pub async fn forward_with_retry(
    client: &dyn ForwardClient,
    limiter: &AdaptiveRateLimiter,
    request: &ForwardRequest,
    max_retries: usize,
) -> std::result::Result<Vec<MessageId>, ClientError> {
    let mut retries = 0;
    loop {
        limiter.throttle().await;
        match client.forward(request).await {
            Ok(ids) => {
                limiter.on_success();
                return Ok(ids);
            },
            Err(ClientError::RateLimited { retry_after_secs }) if retries < max_retries => {
                retries += 1;
                warn!(
                    from_chat = request.from_chat,
                    to_chat = request.to_chat,
                    retry_after_secs,
                    attempt = retries,
                    "rate limited, backing off"
                );
                limiter.on_flood_wait(retry_after_secs);
                tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
            },
            Err(e) => return Err(e),
        }
    }
}

pub struct Dispatcher {
    client: Arc<dyn ForwardClient>,
    rules: Arc<RuleBook>,
    limiter: Arc<AdaptiveRateLimiter>,
    stats: Arc<StatsRecorder>,
    batcher: Arc<GroupBatcher>,
    config: ForwardConfig,
}

impl Dispatcher {
    pub fn new(
        client: Arc<dyn ForwardClient>,
        rules: Arc<RuleBook>,
        limiter: Arc<AdaptiveRateLimiter>,
        stats: Arc<StatsRecorder>,
        batcher: Arc<GroupBatcher>,
        config: ForwardConfig,
    ) -> Self {
        Self {
            client,
            rules,
            limiter,
            stats,
            batcher,
            config,
        }
    }

    pub fn rules(&self) -> &Arc<RuleBook> {
        &self.rules
    }

    /// Entry point for every observed message.
    ///
    /// Album parts go to the batcher (even when filtered, so one admitted
    /// part releases the whole album). Anything else is relayed immediately.
    /// Returns `None` when nothing was relayed synchronously.
    pub async fn handle_message(&self, message: &ChatMessage) -> Result<Option<RelayReport>> {
        let Some(rule) = self.rules.get(message.chat_id).await? else {
            return Ok(None);
        };
        let admitted = should_forward(message, &rule);

        if self
            .batcher
            .enqueue(message, rule.target_id, &rule.options, admitted)
        {
            return Ok(None);
        }
        if !admitted {
            debug!(
                chat_id = message.chat_id,
                message_id = message.message_id,
                "message not forwarded"
            );
            return Ok(None);
        }

        let report = self
            .relay(
                message.chat_id,
                rule.target_id,
                vec![message.message_id],
                &rule.options,
            )
            .await?;
        if report.relayed() {
            self.record_stats(message.chat_id, message.media).await;
        }
        Ok(Some(report))
    }

    /// Relay a flushed album.
    pub async fn relay_group(&self, batch: GroupBatch) -> Result<RelayReport> {
        let report = self
            .relay(
                batch.source_id,
                batch.target_id,
                batch.message_ids,
                &batch.options,
            )
            .await?;
        if report.relayed() {
            self.record_stats(batch.source_id, batch.media).await;
        }
        Ok(report)
    }

    /// Relay `message_ids` from `from` to `to`, then follow active rules on
    /// each target, carrying the new ids, until the chain ends.
    pub async fn relay(
        &self,
        from: ChatId,
        to: ChatId,
        message_ids: Vec<MessageId>,
        options: &RuleOptions,
    ) -> Result<RelayReport> {
        let mut visited = HashSet::from([from]);
        let mut from = from;
        let mut to = to;
        let mut ids = message_ids;
        let mut options = options.clone();
        let mut depth = 0usize;

        let stop = loop {
            if !visited.insert(to) {
                break ChainStop::Revisit { chat: to };
            }

            let request = ForwardRequest {
                from_chat: from,
                to_chat: to,
                message_ids: ids,
                silent: options.silent,
                reply_to: options.reply_to,
            };
            let new_ids = match forward_with_retry(
                self.client.as_ref(),
                &self.limiter,
                &request,
                self.config.max_flood_retries,
            )
            .await
            {
                Ok(new_ids) => new_ids,
                Err(ClientError::ContentProtected { .. }) => {
                    info!(source_id = from, "forwarding disabled by source, removing rule");
                    if let Err(e) = self.rules.delete(from).await
                        && !e.is_not_found()
                    {
                        return Err(e);
                    }
                    break ChainStop::ContentProtected { chat: from };
                },
                Err(ClientError::RateLimited { retry_after_secs }) => {
                    warn!(
                        from_chat = from,
                        to_chat = to,
                        retry_after_secs,
                        "giving up after flood-wait retries"
                    );
                    break ChainStop::RateLimited;
                },
                Err(e) => {
                    warn!(from_chat = from, to_chat = to, error = %e, "relay failed");
                    break ChainStop::Failed {
                        message: e.to_string(),
                    };
                },
            };
            debug!(from_chat = from, to_chat = to, depth, "hop relayed");
            depth += 1;

            let Some(next) = self.rules.active(to).await? else {
                break ChainStop::End;
            };
            if depth > self.config.max_chain_depth {
                debug!(chat_id = to, depth, "chain depth ceiling reached");
                break ChainStop::DepthLimit;
            }
            if new_ids.is_empty() {
                break ChainStop::NoIds;
            }

            tokio::time::sleep(Duration::from_millis(self.config.chain_delay_ms)).await;
            from = to;
            to = next.target_id;
            ids = new_ids;
            options = next.options;
        };

        Ok(RelayReport { hops: depth, stop })
    }

    async fn record_stats(&self, source_id: ChatId, media: MediaKind) {
        if let Err(e) = self.stats.record(source_id, media).await {
            warn!(source_id, error = %e, "failed to record stats");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            batcher::DEFAULT_DEBOUNCE,
            rules::DEFAULT_CACHE_TTL,
            stats::today,
            store::ForwardStore,
            store_memory::InMemoryStore,
            test_support::FakeClient,
            types::ForwardRule,
        },
        tokio::sync::mpsc,
    };

    struct Harness {
        client: Arc<FakeClient>,
        store: Arc<InMemoryStore>,
        dispatcher: Dispatcher,
        flushed: mpsc::UnboundedReceiver<GroupBatch>,
    }

    fn harness() -> Harness {
        let client = Arc::new(FakeClient::new());
        let store = Arc::new(InMemoryStore::new());
        let rules = Arc::new(RuleBook::new(store.clone(), DEFAULT_CACHE_TTL));
        let stats = Arc::new(StatsRecorder::new(store.clone()));
        let (batcher, flushed) = GroupBatcher::new(DEFAULT_DEBOUNCE);
        let dispatcher = Dispatcher::new(
            client.clone(),
            rules,
            Arc::new(AdaptiveRateLimiter::default()),
            stats,
            Arc::new(batcher),
            ForwardConfig::default(),
        );
        Harness {
            client,
            store,
            dispatcher,
            flushed,
        }
    }

    async fn put_rule(store: &InMemoryStore, source: ChatId, target: ChatId) {
        store.set_rule(source, &ForwardRule::new(target)).await.unwrap();
    }

    async fn stats_total(store: &InMemoryStore, source: ChatId) -> u64 {
        store
            .get_stats(&today(), source)
            .await
            .unwrap()
            .map(|r| r.total)
            .unwrap_or(0)
    }

    #[tokio::test(start_paused = true)]
    async fn single_message_is_relayed_and_counted() {
        let h = harness();
        put_rule(&h.store, 100, 200).await;

        let report = h
            .dispatcher
            .handle_message(&ChatMessage::text(100, 7, "hello"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report, RelayReport {
            hops: 1,
            stop: ChainStop::End
        });
        assert_eq!(h.client.relayed_into(200), vec![7]);
        assert_eq!(stats_total(&h.store, 100).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_without_rule_are_ignored() {
        let h = harness();
        let report = h
            .dispatcher
            .handle_message(&ChatMessage::text(1, 1, "x"))
            .await
            .unwrap();
        assert!(report.is_none());
        assert!(h.client.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn filtered_and_paused_rules_do_not_relay() {
        let h = harness();
        let mut rule = ForwardRule::new(200);
        rule.filters.insert("spam".into());
        h.store.set_rule(100, &rule).await.unwrap();
        let mut paused = ForwardRule::new(400);
        paused.paused = true;
        h.store.set_rule(300, &paused).await.unwrap();

        let d = &h.dispatcher;
        assert!(d.handle_message(&ChatMessage::text(100, 1, "SPAM!")).await.unwrap().is_none());
        assert!(d.handle_message(&ChatMessage::text(300, 1, "hi")).await.unwrap().is_none());
        assert!(h.client.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn chain_carries_new_ids_and_options() {
        let h = harness();
        put_rule(&h.store, 1, 2).await;
        let mut silent = ForwardRule::new(3);
        silent.options.silent = true;
        h.store.set_rule(2, &silent).await.unwrap();

        let report = h
            .dispatcher
            .handle_message(&ChatMessage::text(1, 5, "x"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.hops, 2);
        let requests = h.client.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].message_ids, vec![5]);
        assert!(!requests[0].silent);
        assert_eq!((requests[1].from_chat, requests[1].to_chat), (2, 3));
        assert_eq!(requests[1].message_ids, vec![10_000]);
        assert!(requests[1].silent);
        // Chained hops do not add stats.
        assert_eq!(stats_total(&h.store, 1).await, 1);
        assert_eq!(stats_total(&h.store, 2).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_intermediate_rule_ends_the_chain() {
        let h = harness();
        put_rule(&h.store, 1, 2).await;
        let mut paused = ForwardRule::new(3);
        paused.paused = true;
        h.store.set_rule(2, &paused).await.unwrap();

        let report = h.dispatcher.relay(1, 2, vec![1], &RuleOptions::default()).await.unwrap();
        assert_eq!(report.hops, 1);
        assert_eq!(h.client.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn depth_ceiling_stops_long_chains() {
        let h = harness();
        // 0 -> 1 -> ... -> 10, inserted without the loop check.
        for chat in 0..10 {
            put_rule(&h.store, chat, chat + 1).await;
        }

        let report = h
            .dispatcher
            .handle_message(&ChatMessage::text(0, 1, "x"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.stop, ChainStop::DepthLimit);
        // Initial relay plus five chained hops.
        assert_eq!(report.hops, 6);
        assert_eq!(h.client.requests().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_inserted_behind_the_detector_stops_at_revisit() {
        let h = harness();
        put_rule(&h.store, 1, 2).await;
        put_rule(&h.store, 2, 1).await;

        let report = h.dispatcher.relay(1, 2, vec![1], &RuleOptions::default()).await.unwrap();
        assert_eq!(report.stop, ChainStop::Revisit { chat: 1 });
        assert_eq!(report.hops, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn content_protection_removes_the_rule() {
        let h = harness();
        put_rule(&h.store, 100, 200).await;
        h.client.protect(100);

        let report = h
            .dispatcher
            .handle_message(&ChatMessage::text(100, 1, "x"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.stop, ChainStop::ContentProtected { chat: 100 });
        assert!(!report.relayed());
        assert!(h.store.get_rule(100).await.unwrap().is_none());
        assert!(h.dispatcher.rules().get(100).await.unwrap().is_none());
        assert_eq!(stats_total(&h.store, 100).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flood_wait_is_retried_on_the_same_hop() {
        let h = harness();
        put_rule(&h.store, 1, 2).await;
        h.client.fail_next(ClientError::RateLimited {
            retry_after_secs: 3,
        });

        let start = tokio::time::Instant::now();
        let report = h
            .dispatcher
            .handle_message(&ChatMessage::text(1, 9, "x"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.hops, 1);
        assert_eq!(h.client.attempts(), 2);
        assert_eq!(h.client.relayed_into(2), vec![9]);
        // throttle, flood sleep, then the raised throttle
        assert!(start.elapsed() >= Duration::from_millis(500 + 3_000 + 3_600));
    }

    #[tokio::test(start_paused = true)]
    async fn flood_wait_retries_are_bounded() {
        let h = harness();
        put_rule(&h.store, 1, 2).await;
        for _ in 0..10 {
            h.client.fail_next(ClientError::RateLimited {
                retry_after_secs: 1,
            });
        }

        let report = h
            .dispatcher
            .handle_message(&ChatMessage::text(1, 9, "x"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.stop, ChainStop::RateLimited);
        assert_eq!(h.client.attempts(), 1 + ForwardConfig::default().max_flood_retries);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_abandons_the_message() {
        let h = harness();
        put_rule(&h.store, 1, 2).await;
        h.client.fail_next(ClientError::transient("boom"));

        let report = h
            .dispatcher
            .handle_message(&ChatMessage::text(1, 9, "x"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.stop, ChainStop::Failed {
            message: "boom".into()
        });
        assert!(h.store.get_rule(1).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn album_is_relayed_once_after_debounce() {
        let mut h = harness();
        put_rule(&h.store, 1, 2).await;

        for id in [3, 1, 2] {
            let mut part = ChatMessage::text(1, id, "");
            part.group_id = Some("555".into());
            part.media = MediaKind::Photo;
            assert!(h.dispatcher.handle_message(&part).await.unwrap().is_none());
        }
        assert!(h.client.requests().is_empty());

        let batch = h.flushed.recv().await.unwrap();
        let report = h.dispatcher.relay_group(batch).await.unwrap();

        assert_eq!(report.hops, 1);
        let requests = h.client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].message_ids, vec![1, 2, 3]);
        let record = h.store.get_stats(&today(), 1).await.unwrap().unwrap();
        assert_eq!(record.counts["photo"], 1);
    }
}
