//! Rule store front: read-through cache plus rule management operations.

use std::{collections::HashMap, sync::Arc, sync::Mutex, time::Duration};

use {
    tokio::time::Instant,
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    loop_detect::{LoopCheck, check_new_rule},
    store::ForwardStore,
    types::{ChatId, ForwardRule, RuleCreate, RuleOptions},
};

/// Default lifetime of a cached lookup.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

struct CachedRule {
    /// `None` caches the absence of a rule.
    rule: Option<ForwardRule>,
    fetched_at: Instant,
}

/// Cached access to forwarding rules.
///
/// Reads are served from a per-source entry for `ttl`; writes go to the
/// backing store first and then replace or evict the entry.
pub struct RuleBook {
    store: Arc<dyn ForwardStore>,
    ttl: Duration,
    cache: Mutex<HashMap<ChatId, CachedRule>>,
}

impl RuleBook {
    pub fn new(store: Arc<dyn ForwardStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ForwardStore> {
        &self.store
    }

    // ── Store contract ──────────────────────────────────────────────────

    pub async fn get(&self, source_id: ChatId) -> Result<Option<ForwardRule>> {
        if let Some(hit) = self.cached(source_id) {
            return Ok(hit);
        }
        let rule = self.store.get_rule(source_id).await?;
        self.remember(source_id, rule.clone());
        Ok(rule)
    }

    pub async fn set(&self, source_id: ChatId, rule: ForwardRule) -> Result<()> {
        self.store.set_rule(source_id, &rule).await?;
        self.remember(source_id, Some(rule));
        Ok(())
    }

    pub async fn delete(&self, source_id: ChatId) -> Result<()> {
        let result = self.store.delete_rule(source_id).await;
        if result.is_ok() || result.as_ref().is_err_and(Error::is_not_found) {
            self.remember(source_id, None);
        }
        result
    }

    pub async fn list(&self) -> Result<Vec<(ChatId, ForwardRule)>> {
        self.store.list_rules().await
    }

    /// The rule for `source_id` when it exists and is not paused.
    pub async fn active(&self, source_id: ChatId) -> Result<Option<ForwardRule>> {
        Ok(self.get(source_id).await?.filter(ForwardRule::is_active))
    }

    /// Drop every cached entry.
    pub fn invalidate_all(&self) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn cached(&self, source_id: ChatId) -> Option<Option<ForwardRule>> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .get(&source_id)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.rule.clone())
    }

    fn remember(&self, source_id: ChatId, rule: Option<ForwardRule>) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(source_id, CachedRule {
            rule,
            fetched_at: Instant::now(),
        });
    }

    // ── Rule management ─────────────────────────────────────────────────

    /// Run the loop detector for a proposed rule against the stored graph.
    pub async fn check_loop(&self, source_id: ChatId, target_id: ChatId) -> Result<LoopCheck> {
        let edges: HashMap<ChatId, ChatId> = self
            .list()
            .await?
            .into_iter()
            .map(|(source, rule)| (source, rule.target_id))
            .collect();
        Ok(check_new_rule(source_id, target_id, |chat| {
            edges.get(&chat).copied()
        }))
    }

    /// Validate and persist a new rule, replacing any rule for the same source.
    pub async fn add_rule(&self, create: RuleCreate) -> Result<ForwardRule> {
        let check = self.check_loop(create.source_id, create.target_id).await?;
        if check.is_circular() {
            warn!(
                source_id = create.source_id,
                target_id = create.target_id,
                reason = %check,
                "rejected circular rule"
            );
            return Err(Error::circular(check));
        }

        let mut rule = ForwardRule::new(create.target_id);
        rule.options = create.options;
        rule.filters = normalize_keywords(&create.filters).collect();
        rule.source_display = create.source_display;
        rule.target_display = create.target_display;

        self.set(create.source_id, rule.clone()).await?;
        info!(
            source_id = create.source_id,
            target_id = rule.target_id,
            "forward rule added"
        );
        Ok(rule)
    }

    pub async fn remove_rule(&self, source_id: ChatId) -> Result<()> {
        self.delete(source_id).await?;
        info!(source_id, "forward rule removed");
        Ok(())
    }

    pub async fn set_paused(&self, source_id: ChatId, paused: bool) -> Result<ForwardRule> {
        let rule = self.update(source_id, |r| r.paused = paused).await?;
        info!(source_id, paused, "forward rule pause state changed");
        Ok(rule)
    }

    pub async fn add_filters(&self, source_id: ChatId, keywords: &[String]) -> Result<ForwardRule> {
        self.update(source_id, |r| r.filters.extend(normalize_keywords(keywords)))
            .await
    }

    pub async fn remove_filters(
        &self,
        source_id: ChatId,
        keywords: &[String],
    ) -> Result<ForwardRule> {
        self.update(source_id, |r| {
            for keyword in normalize_keywords(keywords) {
                r.filters.remove(&keyword);
            }
        })
        .await
    }

    pub async fn set_options(&self, source_id: ChatId, options: RuleOptions) -> Result<ForwardRule> {
        self.update(source_id, |r| r.options = options).await
    }

    pub async fn set_display(
        &self,
        source_id: ChatId,
        source_display: Option<String>,
        target_display: Option<String>,
    ) -> Result<ForwardRule> {
        self.update(source_id, |r| {
            if source_display.is_some() {
                r.source_display = source_display;
            }
            if target_display.is_some() {
                r.target_display = target_display;
            }
        })
        .await
    }

    /// Read from the backing store (not the cache), modify, write through.
    async fn update<F>(&self, source_id: ChatId, f: F) -> Result<ForwardRule>
    where
        F: FnOnce(&mut ForwardRule),
    {
        let mut rule = self
            .store
            .get_rule(source_id)
            .await?
            .ok_or_else(|| Error::rule_not_found(source_id))?;
        f(&mut rule);
        self.set(source_id, rule.clone()).await?;
        debug!(source_id, "forward rule updated");
        Ok(rule)
    }
}

fn normalize_keywords(keywords: &[String]) -> impl Iterator<Item = String> + '_ {
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
}
