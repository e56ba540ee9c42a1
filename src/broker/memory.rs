//! In-process channel with the same delivery contract as the Redis one.
//!
//! Used by tests and single-process runs. Deliveries move from the queue to an
//! in-flight table on receive and leave it on ack, requeue or dead-letter.
//! [`MemoryChannel::redeliver_in_flight`] plays the part of a consumer crash.

use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tokio::sync::{Mutex, Notify};

use super::{Channel, ChannelError, ChannelResult, ConnectionState, Delivery, Queue};

#[derive(Default)]
struct MemoryInner {
    queues: HashMap<Queue, VecDeque<Delivery>>,
    in_flight: HashMap<String, Delivery>,
    dead_letters: Vec<(Delivery, String)>,
    next_id: u64,
}

impl MemoryInner {
    fn push(&mut self, queue: Queue, body: &str, attempt: u32) {
        self.next_id += 1;
        let delivery = Delivery {
            id: format!("{}-0", self.next_id),
            queue,
            body: body.to_string(),
            attempt,
        };
        self.queues.entry(queue).or_default().push_back(delivery);
    }
}

pub struct MemoryChannel {
    inner: Mutex<MemoryInner>,
    notify: Notify,
    available: AtomicBool,
    block: Duration,
}

impl MemoryChannel {
    pub fn new(block: Duration) -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            notify: Notify::new(),
            available: AtomicBool::new(true),
            block,
        }
    }

    /// Simulates the broker going away or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Messages waiting in a queue, not counting in-flight ones
    pub async fn len(&self, queue: Queue) -> usize {
        self.inner
            .lock()
            .await
            .queues
            .get(&queue)
            .map_or(0, VecDeque::len)
    }

    pub async fn in_flight(&self) -> usize {
        self.inner.lock().await.in_flight.len()
    }

    /// Bodies waiting in a queue, oldest first
    pub async fn peek(&self, queue: Queue) -> Vec<String> {
        self.inner
            .lock()
            .await
            .queues
            .get(&queue)
            .map(|q| q.iter().map(|d| d.body.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn dead_letters(&self) -> Vec<(Delivery, String)> {
        self.inner.lock().await.dead_letters.clone()
    }

    /// Puts every unacked delivery back at the front of its queue, as the
    /// broker does when a consumer dies holding them
    pub async fn redeliver_in_flight(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let orphans: Vec<Delivery> = inner.in_flight.drain().map(|(_, d)| d).collect();
        let count = orphans.len();

        for delivery in orphans {
            let attempt = delivery.attempt.saturating_add(1);
            inner
                .queues
                .entry(delivery.queue)
                .or_default()
                .push_front(Delivery { attempt, ..delivery });
        }
        drop(inner);

        self.notify.notify_waiters();
        count
    }

    fn check_available(&self) -> ChannelResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChannelError::unavailable("memory channel switched off"))
        }
    }

    /// Removes a delivery from the in-flight table; the caller holds the lock
    fn settle(inner: &mut MemoryInner, delivery: &Delivery) -> ChannelResult<Delivery> {
        inner
            .in_flight
            .remove(&delivery.id)
            .ok_or_else(|| ChannelError::UnknownDelivery(delivery.id.clone()))
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

#[async_trait::async_trait]
impl Channel for MemoryChannel {
    fn state(&self) -> ConnectionState {
        if self.available.load(Ordering::SeqCst) {
            ConnectionState::Ready
        } else {
            ConnectionState::Faulted
        }
    }

    async fn publish(&self, queue: Queue, body: &str) -> ChannelResult<()> {
        self.check_available()?;
        self.inner.lock().await.push(queue, body, 0);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, queue: Queue, _consumer: &str) -> ChannelResult<Option<Delivery>> {
        let deadline = tokio::time::Instant::now() + self.block;

        loop {
            self.check_available()?;

            // Register interest before looking so a publish in between is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().await;
                if let Some(delivery) = inner.queues.get_mut(&queue).and_then(VecDeque::pop_front) {
                    inner.in_flight.insert(delivery.id.clone(), delivery.clone());
                    return Ok(Some(delivery));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> ChannelResult<()> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        Self::settle(&mut inner, delivery).map(|_| ())
    }

    async fn requeue(&self, delivery: &Delivery) -> ChannelResult<()> {
        self.check_available()?;
        {
            let mut inner = self.inner.lock().await;
            let settled = Self::settle(&mut inner, delivery)?;
            inner.push(settled.queue, &settled.body, settled.attempt.saturating_add(1));
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> ChannelResult<()> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let settled = Self::settle(&mut inner, delivery)?;
        inner.dead_letters.push((settled, reason.to_string()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_receive_times_out_on_empty_queue() {
        let channel = MemoryChannel::new(Duration::from_millis(20));
        let received = channel.receive(Queue::Requests, "c1").await.unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_queues_are_fifo_and_isolated() {
        let channel = MemoryChannel::default();
        assert_ok!(channel.publish(Queue::Requests, "a").await);
        assert_ok!(channel.publish(Queue::Requests, "b").await);
        assert_ok!(channel.publish(Queue::Results, "r").await);

        let first = channel.receive(Queue::Requests, "c1").await.unwrap().unwrap();
        let second = channel.receive(Queue::Requests, "c1").await.unwrap().unwrap();
        assert_eq!(first.body, "a");
        assert_eq!(second.body, "b");
        assert_eq!(channel.len(Queue::Results).await, 1);
        assert_eq!(channel.in_flight().await, 2);
    }

    #[tokio::test]
    async fn test_blocked_receive_wakes_on_publish() {
        let channel = Arc::new(MemoryChannel::new(Duration::from_secs(5)));
        let consumer = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.receive(Queue::Emotions, "c1").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.publish(Queue::Emotions, "late").await.unwrap();

        let delivery = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.body, "late");
    }

    #[tokio::test]
    async fn test_requeue_increments_attempt() {
        let channel = MemoryChannel::default();
        channel.publish(Queue::Requests, "retry me").await.unwrap();

        let delivery = channel.receive(Queue::Requests, "c1").await.unwrap().unwrap();
        channel.requeue(&delivery).await.unwrap();

        let again = channel.receive(Queue::Requests, "c1").await.unwrap().unwrap();
        assert_eq!(again.body, "retry me");
        assert_eq!(again.attempt, 1);
        assert_ne!(again.id, delivery.id);
    }

    #[tokio::test]
    async fn test_ack_twice_fails() {
        let channel = MemoryChannel::default();
        channel.publish(Queue::Requests, "once").await.unwrap();

        let delivery = channel.receive(Queue::Requests, "c1").await.unwrap().unwrap();
        assert_ok!(channel.ack(&delivery).await);
        let err = assert_err!(channel.ack(&delivery).await);
        assert!(matches!(err, ChannelError::UnknownDelivery(ref id) if *id == delivery.id));
        assert!(!err.is_connection_failure());
        assert!(channel.is_available());
        assert_eq!(channel.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_dead_letter_records_reason() {
        let channel = MemoryChannel::default();
        channel.publish(Queue::Emotions, "doomed").await.unwrap();

        let delivery = channel.receive(Queue::Emotions, "c1").await.unwrap().unwrap();
        channel.dead_letter(&delivery, "too many attempts").await.unwrap();

        let dead = channel.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].0.body, "doomed");
        assert_eq!(dead[0].1, "too many attempts");
    }

    #[tokio::test]
    async fn test_crash_redelivers_unacked_message() {
        let channel = MemoryChannel::default();
        channel.publish(Queue::Requests, "in progress").await.unwrap();
        let _lost = channel.receive(Queue::Requests, "c1").await.unwrap().unwrap();

        assert_eq!(channel.redeliver_in_flight().await, 1);

        let again = channel.receive(Queue::Requests, "c2").await.unwrap().unwrap();
        assert_eq!(again.body, "in progress");
        assert_eq!(again.attempt, 1);
    }

    #[tokio::test]
    async fn test_unavailable_channel_fails_fast() {
        let channel = MemoryChannel::default();
        channel.set_available(false);

        assert!(!channel.is_available());
        let err = channel.publish(Queue::Requests, "x").await.unwrap_err();
        assert!(matches!(err, ChannelError::Unavailable(_)));
    }
}
