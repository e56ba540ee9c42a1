pub mod gateway;
pub mod poller;
pub mod providers;
pub mod results;

pub use gateway::RequestGateway;
pub use poller::{poll, HttpResultSource, PollConfig, PollOutcome, ResultSource, ResultStatus};
pub use results::{ResultSink, ResultStore};
