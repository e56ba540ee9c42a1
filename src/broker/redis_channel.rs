//! Channel backed by Redis Streams.
//!
//! Each queue is a stream with one consumer group. Entries carry the
//! serialized message under `payload` and the delivery attempt under
//! `attempt`. Acked entries are deleted, so a stream only holds work that is
//! waiting or in flight.

use redis::{
    aio::MultiplexedConnection,
    streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply},
    AsyncCommands, RedisResult,
};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

use super::{BrokerConnection, Channel, ChannelError, ChannelResult, ConnectionState, Delivery, Queue};

const RECLAIM_BATCH: usize = 10;

#[derive(Debug, Clone)]
pub struct RedisChannelConfig {
    /// How long one receive call blocks waiting for a message
    pub block: Duration,
    /// Idle time after which an unacked delivery is considered abandoned
    pub visibility_timeout: Duration,
    /// How often a consumer scans for abandoned deliveries
    pub reclaim_interval: Duration,
}

impl Default for RedisChannelConfig {
    fn default() -> Self {
        Self {
            block: Duration::from_secs(5),
            visibility_timeout: Duration::from_secs(120),
            reclaim_interval: Duration::from_secs(30),
        }
    }
}

pub struct RedisChannel {
    broker: Arc<BrokerConnection>,
    config: RedisChannelConfig,
    /// Dedicated connections for blocking reads, one per consumer
    readers: Mutex<HashMap<String, MultiplexedConnection>>,
    last_reclaim: Mutex<HashMap<Queue, Instant>>,
}

impl RedisChannel {
    pub fn new(broker: Arc<BrokerConnection>, config: RedisChannelConfig) -> Self {
        Self {
            broker,
            config,
            readers: Mutex::new(HashMap::new()),
            last_reclaim: Mutex::new(HashMap::new()),
        }
    }

    /// Creates the streams and consumer groups for the given queues
    pub async fn init(&self, queues: &[Queue]) -> ChannelResult<()> {
        for queue in queues {
            self.ensure_group(*queue).await?;
        }
        Ok(())
    }

    async fn ensure_group(&self, queue: Queue) -> ChannelResult<()> {
        let mut conn = self.broker.connection().await?;
        let result: RedisResult<()> = conn
            .xgroup_create_mkstream(queue.stream_key(), queue.consumer_group(), "0")
            .await;

        match result {
            Ok(()) => {
                tracing::info!(queue = %queue, group = %queue.consumer_group(), "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                tracing::debug!(queue = %queue, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(self.track(e)),
        }
    }

    /// Reports connection failures to the broker before passing the error on
    fn track(&self, err: redis::RedisError) -> ChannelError {
        let err = ChannelError::from(err);
        self.broker.report(&err);
        err
    }

    async fn add(&self, queue: Queue, body: &str, attempt: u32) -> ChannelResult<String> {
        let mut conn = self.broker.connection().await?;
        let attempt = attempt.to_string();

        conn.xadd(
            queue.stream_key(),
            "*",
            &[("payload", body), ("attempt", attempt.as_str())],
        )
        .await
        .map_err(|e| self.track(e))
    }

    async fn reader(&self, consumer: &str) -> ChannelResult<MultiplexedConnection> {
        let mut readers = self.readers.lock().await;
        if let Some(conn) = readers.get(consumer) {
            return Ok(conn.clone());
        }

        let conn = self.broker.dedicated_connection().await?;
        readers.insert(consumer.to_string(), conn.clone());
        Ok(conn)
    }

    async fn drop_reader(&self, consumer: &str) {
        self.readers.lock().await.remove(consumer);
    }

    fn to_delivery(queue: Queue, entry: &StreamId, redeliveries: u32) -> Delivery {
        let body: String = entry.get("payload").unwrap_or_default();
        let attempt: u32 = entry.get("attempt").unwrap_or(0);

        Delivery {
            id: entry.id.clone(),
            queue,
            body,
            attempt: attempt.saturating_add(redeliveries),
        }
    }

    /// Takes over one delivery abandoned by a dead consumer, if any.
    ///
    /// Runs at most once per `reclaim_interval` per queue.
    async fn reclaim_stale(&self, queue: Queue, consumer: &str) -> ChannelResult<Option<Delivery>> {
        {
            let mut last = self.last_reclaim.lock().await;
            let due = last
                .get(&queue)
                .map_or(true, |at| at.elapsed() >= self.config.reclaim_interval);
            if !due {
                return Ok(None);
            }
            last.insert(queue, Instant::now());
        }

        let mut conn = self.broker.connection().await?;
        let group = queue.consumer_group();
        let min_idle_ms = self.config.visibility_timeout.as_millis() as usize;

        // Idle filtering happens server-side
        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(queue.stream_key())
            .arg(&group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(RECLAIM_BATCH)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.track(e))?;

        for stale in &pending.ids {
            let claimed: StreamClaimReply = conn
                .xclaim(queue.stream_key(), &group, consumer, min_idle_ms, &[&stale.id])
                .await
                .map_err(|e| self.track(e))?;

            match claimed.ids.first() {
                Some(entry) => {
                    let delivery = Self::to_delivery(queue, entry, stale.times_delivered as u32);
                    tracing::warn!(
                        queue = %queue,
                        delivery_id = %delivery.id,
                        previous_consumer = %stale.consumer,
                        attempt = delivery.attempt,
                        "Reclaimed abandoned delivery"
                    );
                    return Ok(Some(delivery));
                }
                None => {
                    // Entry was deleted after its consumer died; clear the pending slot
                    let _: () = conn
                        .xack(queue.stream_key(), &group, &[&stale.id])
                        .await
                        .map_err(|e| self.track(e))?;
                }
            }
        }

        Ok(None)
    }
}

#[async_trait::async_trait]
impl Channel for RedisChannel {
    fn state(&self) -> ConnectionState {
        self.broker.state()
    }

    async fn publish(&self, queue: Queue, body: &str) -> ChannelResult<()> {
        let id = self.add(queue, body, 0).await?;
        tracing::debug!(queue = %queue, delivery_id = %id, "Published message");
        Ok(())
    }

    async fn receive(&self, queue: Queue, consumer: &str) -> ChannelResult<Option<Delivery>> {
        if let Some(delivery) = self.reclaim_stale(queue, consumer).await? {
            return Ok(Some(delivery));
        }

        let mut conn = self.reader(consumer).await?;
        let options = StreamReadOptions::default()
            .group(queue.consumer_group(), consumer)
            .count(1)
            .block(self.config.block.as_millis() as usize);

        let reply: RedisResult<Option<StreamReadReply>> = conn
            .xread_options(&[queue.stream_key()], &[">"], &options)
            .await;

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) if e.code() == Some("NOGROUP") => {
                tracing::warn!(queue = %queue, "Consumer group missing, recreating");
                self.ensure_group(queue).await?;
                return Ok(None);
            }
            Err(e) => {
                self.drop_reader(consumer).await;
                return Err(self.track(e));
            }
        };

        let delivery = reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|key| key.ids.into_iter().next())
            .map(|entry| Self::to_delivery(queue, &entry, 0));

        Ok(delivery)
    }

    async fn ack(&self, delivery: &Delivery) -> ChannelResult<()> {
        let mut conn = self.broker.connection().await?;
        let key = delivery.queue.stream_key();

        let _: () = conn
            .xack(key, delivery.queue.consumer_group(), &[&delivery.id])
            .await
            .map_err(|e| self.track(e))?;
        let _: () = conn
            .xdel(key, &[&delivery.id])
            .await
            .map_err(|e| self.track(e))?;

        tracing::debug!(queue = %delivery.queue, delivery_id = %delivery.id, "Acknowledged delivery");
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> ChannelResult<()> {
        // Copy first: a crash between the two steps duplicates, never loses
        self.add(delivery.queue, &delivery.body, delivery.attempt.saturating_add(1))
            .await?;
        self.ack(delivery).await
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> ChannelResult<()> {
        let mut conn = self.broker.connection().await?;
        let attempt = delivery.attempt.to_string();

        let _: String = conn
            .xadd(
                Queue::DeadLetter.stream_key(),
                "*",
                &[
                    ("payload", delivery.body.as_str()),
                    ("reason", reason),
                    ("queue", delivery.queue.stream_key()),
                    ("attempt", attempt.as_str()),
                    ("original_id", delivery.id.as_str()),
                ],
            )
            .await
            .map_err(|e| self.track(e))?;

        self.ack(delivery).await
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Backoff;

    async fn connected_channel() -> RedisChannel {
        connected_channel_with(RedisChannelConfig {
            block: Duration::from_millis(200),
            ..Default::default()
        })
        .await
    }

    async fn connected_channel_with(config: RedisChannelConfig) -> RedisChannel {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let broker = Arc::new(BrokerConnection::new(&redis_url, Backoff::default()).unwrap());
        broker.connect().await.unwrap();

        let channel = RedisChannel::new(broker, config);
        channel.init(&[Queue::DeadLetter]).await.unwrap();
        channel
    }

    #[tokio::test]
    async fn test_publish_without_connection_fails_fast() {
        let broker = Arc::new(BrokerConnection::new("redis://localhost:6379", Backoff::default()).unwrap());
        let channel = RedisChannel::new(broker, RedisChannelConfig::default());

        let err = channel.publish(Queue::Requests, "{}").await.unwrap_err();
        assert!(matches!(err, ChannelError::Unavailable(_)));
        assert!(!channel.is_available());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_publish_receive_requeue_ack() {
        let channel = connected_channel().await;
        let queue = Queue::DeadLetter;
        let consumer = format!("test-{}", uuid::Uuid::new_v4());

        channel.publish(queue, "first").await.unwrap();

        let delivery = loop {
            match channel.receive(queue, &consumer).await.unwrap() {
                Some(d) if d.body == "first" => break d,
                Some(other) => channel.ack(&other).await.unwrap(),
                None => continue,
            }
        };
        assert_eq!(delivery.attempt, 0);

        channel.requeue(&delivery).await.unwrap();
        let again = channel.receive(queue, &consumer).await.unwrap().unwrap();
        assert_eq!(again.body, "first");
        assert_eq!(again.attempt, 1);

        channel.ack(&again).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_abandoned_delivery_is_reclaimed_by_another_consumer() {
        let channel = connected_channel_with(RedisChannelConfig {
            block: Duration::from_millis(200),
            visibility_timeout: Duration::from_millis(100),
            reclaim_interval: Duration::ZERO,
        })
        .await;
        let queue = Queue::DeadLetter;
        let crashed = format!("test-a-{}", uuid::Uuid::new_v4());
        let survivor = format!("test-b-{}", uuid::Uuid::new_v4());
        let body = format!("orphan-{}", uuid::Uuid::new_v4());

        channel.publish(queue, &body).await.unwrap();
        let held = loop {
            match channel.receive(queue, &crashed).await.unwrap() {
                Some(d) if d.body == body => break d,
                Some(other) => channel.ack(&other).await.unwrap(),
                None => continue,
            }
        };
        assert_eq!(held.attempt, 0);

        // The first consumer never acks; wait past the visibility timeout
        tokio::time::sleep(Duration::from_millis(250)).await;

        let mut reclaimed = None;
        for _ in 0..20 {
            match channel.receive(queue, &survivor).await.unwrap() {
                Some(d) if d.id == held.id => {
                    reclaimed = Some(d);
                    break;
                }
                Some(other) => channel.ack(&other).await.unwrap(),
                None => {}
            }
        }

        let reclaimed = reclaimed.expect("abandoned delivery was not reclaimed");
        assert_eq!(reclaimed.body, body);
        assert_eq!(reclaimed.attempt, 1);
        channel.ack(&reclaimed).await.unwrap();
    }
}
