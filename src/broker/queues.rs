use std::fmt::Display;

/// Stage boundaries of the pipeline.
///
/// The stream keys are the contract every component agrees on; they are
/// defined here and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    /// Raw user requests, consumed by the emotion stage
    Requests,
    /// Requests with a detected emotion, consumed by the recommendation stage
    Emotions,
    /// Ranked candidates awaiting personalization
    Candidates,
    /// Terminal results, consumed by the result sink
    Results,
    /// Messages that exhausted their deliveries
    DeadLetter,
}

impl Queue {
    pub const ALL: [Queue; 5] = [
        Queue::Requests,
        Queue::Emotions,
        Queue::Candidates,
        Queue::Results,
        Queue::DeadLetter,
    ];

    pub fn stream_key(&self) -> &'static str {
        match self {
            Queue::Requests => "cinesense:requests",
            Queue::Emotions => "cinesense:emotions",
            Queue::Candidates => "cinesense:candidates",
            Queue::Results => "cinesense:results",
            Queue::DeadLetter => "cinesense:dead-letter",
        }
    }

    /// Consumer group shared by every worker instance of this queue
    pub fn consumer_group(&self) -> String {
        format!("{}:workers", self.stream_key())
    }
}

impl Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.stream_key())
    }
}

/// Routing between stages, fixed once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    pub personalize: bool,
}

impl Topology {
    /// Where the recommendation stage sends its output
    pub fn after_recommendation(&self) -> Queue {
        if self.personalize {
            Queue::Candidates
        } else {
            Queue::Results
        }
    }
}
