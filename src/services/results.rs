//! Terminal store of the pipeline.
//!
//! The sink consumer writes one entry per token, HTTP handlers pop it. Writes
//! are last-write-wins so a redelivered terminal message replaces rather than
//! duplicates. Entries nobody collects are swept once their TTL has passed.

use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::Instant,
};

use crate::{
    broker::Delivery,
    models::{CorrelationToken, PipelineMessage, RecommendationPayload},
    worker::{Disposition, MessageHandler},
};

struct StoredResult {
    payload: RecommendationPayload,
    stored_at: Instant,
}

pub struct ResultStore {
    entries: Mutex<HashMap<CorrelationToken, StoredResult>>,
    ttl: Duration,
}

impl ResultStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Stores the result for its token, replacing any earlier one
    pub async fn insert(&self, payload: RecommendationPayload) {
        let token = payload.request_id;
        let previous = self.entries.lock().await.insert(
            token,
            StoredResult {
                payload,
                stored_at: Instant::now(),
            },
        );

        if previous.is_some() {
            tracing::debug!(request_id = %token, "Result overwritten by duplicate delivery");
        }
    }

    /// Removes and returns the result for `token`.
    ///
    /// Check and removal happen under one lock, so concurrent callers see the
    /// result at most once. An entry past its TTL counts as absent.
    pub async fn take(&self, token: &CorrelationToken) -> Option<RecommendationPayload> {
        let stored = self.entries.lock().await.remove(token)?;

        if stored.stored_at.elapsed() >= self.ttl {
            tracing::debug!(request_id = %token, "Dropped expired result on read");
            return None;
        }
        Some(stored.payload)
    }

    /// Removes every expired entry and returns how many went
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, stored| stored.stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Spawns the background eviction task; it stops when `shutdown` flips
    /// or its sender is dropped
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                ttl_secs = self.ttl.as_secs(),
                interval_secs = interval.as_secs(),
                "Result sweeper started"
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = self.sweep().await;
                        if evicted > 0 {
                            tracing::info!(evicted, "Evicted uncollected results");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Result sweeper stopped");
        })
    }
}

/// Consumer of the results queue that fills a [`ResultStore`]
pub struct ResultSink {
    store: Arc<ResultStore>,
}

impl ResultSink {
    pub fn new(store: Arc<ResultStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl MessageHandler for ResultSink {
    async fn on_message(&self, delivery: &Delivery) -> Disposition {
        let payload = match PipelineMessage::decode(&delivery.body)
            .and_then(RecommendationPayload::try_from)
        {
            Ok(payload) => payload,
            Err(e) => return Disposition::Discard(e.to_string()),
        };

        tracing::info!(
            request_id = %payload.request_id,
            recommendations = payload.recommendations.len(),
            "Result stored"
        );
        self.store.insert(payload).await;
        Disposition::Ack
    }
}
