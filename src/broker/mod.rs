//! Message channel between pipeline stages.
//!
//! Queues are durable, deliveries are at-least-once and acknowledgment is
//! explicit. A delivery stays owned by its consumer until it is acked,
//! requeued or dead-lettered; a consumer that dies holding one gets it
//! redelivered to another consumer.

pub mod backoff;
pub mod connection;
pub mod error;
pub mod memory;
pub mod queues;
pub mod redis_channel;

pub use backoff::Backoff;
pub use connection::{BrokerConnection, ConnectionState};
pub use error::{ChannelError, ChannelResult};
pub use memory::MemoryChannel;
pub use queues::{Queue, Topology};
pub use redis_channel::{RedisChannel, RedisChannelConfig};

/// One message handed to a consumer
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Broker-assigned id, used to ack
    pub id: String,
    pub queue: Queue,
    pub body: String,
    /// Zero on first delivery, incremented by every requeue
    pub attempt: u32,
}

/// Durable queue transport
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    /// Current connection state
    fn state(&self) -> ConnectionState;

    /// Whether operations can currently succeed
    fn is_available(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Publishes a persistent message
    async fn publish(&self, queue: Queue, body: &str) -> ChannelResult<()>;

    /// Waits a bounded time for the next message; `None` when nothing arrived
    async fn receive(&self, queue: Queue, consumer: &str) -> ChannelResult<Option<Delivery>>;

    /// Confirms the delivery was fully handled
    async fn ack(&self, delivery: &Delivery) -> ChannelResult<()>;

    /// Puts the message back at the tail of its queue with `attempt + 1`
    async fn requeue(&self, delivery: &Delivery) -> ChannelResult<()>;

    /// Moves the message to the dead-letter queue and acks the original
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> ChannelResult<()>;

    /// Human-readable name for logging and health reporting
    fn name(&self) -> &'static str;
}
