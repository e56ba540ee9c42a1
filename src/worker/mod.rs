//! Consumption loop shared by every stage and by the result sink.
//!
//! A [`Consumer`] pulls one delivery at a time from its queue, hands it to a
//! [`MessageHandler`] and settles it according to the returned
//! [`Disposition`]. Handlers never touch acknowledgment themselves.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::Instrument;

use crate::broker::{Backoff, Channel, ChannelResult, Delivery, Queue};

pub mod emotion;
pub mod personalize;
pub mod recommend;
pub mod stage;

pub use emotion::EmotionStage;
pub use personalize::PersonalizeStage;
pub use recommend::RecommendStage;
pub use stage::{Stage, StageWorker};

/// What to do with a delivery once its handler returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Fully handled, including any downstream publish
    Ack,
    /// Transient failure; deliver again later
    Requeue(String),
    /// Poison: can never succeed; dead-lettered at once, never retried
    Discard(String),
}

/// How a delivery was finally settled on the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Discarded,
    Requeued,
    DeadLettered,
}

#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, delivery: &Delivery) -> Disposition;
}

/// Blocking receive-process-settle loop over one queue
pub struct Consumer {
    channel: Arc<dyn Channel>,
    queue: Queue,
    name: String,
    max_deliveries: u32,
}

impl Consumer {
    pub fn new(channel: Arc<dyn Channel>, queue: Queue, name: impl Into<String>, max_deliveries: u32) -> Self {
        Self {
            channel,
            queue,
            name: name.into(),
            max_deliveries: max_deliveries.max(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs until `shutdown` flips to true or its sender is dropped
    pub async fn run<H>(&self, handler: &H, mut shutdown: watch::Receiver<bool>)
    where
        H: MessageHandler + ?Sized,
    {
        let mut backoff = Backoff::default();
        tracing::info!(queue = %self.queue, consumer = %self.name, "Consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                received = self.channel.receive(self.queue, &self.name) => received,
                _ = shutdown.changed() => break,
            };

            match received {
                Ok(Some(delivery)) => {
                    backoff.reset();
                    let delivery_id = delivery.id.clone();
                    if let Err(e) = self.dispatch(handler, delivery).await {
                        // Left unacked; the channel redelivers it
                        tracing::error!(
                            queue = %self.queue,
                            delivery_id = %delivery_id,
                            error = %e,
                            "Failed to settle delivery"
                        );
                    }
                }
                Ok(None) => backoff.reset(),
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        queue = %self.queue,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Receive failed"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        tracing::info!(queue = %self.queue, consumer = %self.name, "Consumer stopped");
    }

    /// Hands one delivery to the handler and settles it
    pub async fn dispatch<H>(&self, handler: &H, delivery: Delivery) -> ChannelResult<Settlement>
    where
        H: MessageHandler + ?Sized,
    {
        let span = tracing::info_span!(
            "delivery",
            queue = %self.queue,
            delivery_id = %delivery.id,
            attempt = delivery.attempt,
        );

        self.settle(handler, &delivery).instrument(span).await
    }

    async fn settle<H>(&self, handler: &H, delivery: &Delivery) -> ChannelResult<Settlement>
    where
        H: MessageHandler + ?Sized,
    {
        match handler.on_message(delivery).await {
            Disposition::Ack => {
                self.channel.ack(delivery).await?;
                Ok(Settlement::Acked)
            }
            Disposition::Discard(reason) => {
                tracing::warn!(reason = %reason, "Dead-lettering poison message");
                self.channel
                    .dead_letter(delivery, &format!("poison: {}", reason))
                    .await?;
                Ok(Settlement::Discarded)
            }
            Disposition::Requeue(reason) if delivery.attempt.saturating_add(1) >= self.max_deliveries => {
                tracing::error!(
                    reason = %reason,
                    max_deliveries = self.max_deliveries,
                    "Delivery attempts exhausted, dead-lettering"
                );
                self.channel.dead_letter(delivery, &reason).await?;
                Ok(Settlement::DeadLettered)
            }
            Disposition::Requeue(reason) => {
                tracing::warn!(reason = %reason, "Requeueing delivery");
                self.channel.requeue(delivery).await?;
                Ok(Settlement::Requeued)
            }
        }
    }
}
