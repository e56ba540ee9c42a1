use std::sync::Arc;

use crate::{
    broker::Channel,
    services::{RequestGateway, ResultStore},
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub gateway: RequestGateway,
    pub results: Arc<ResultStore>,
    pub channel: Arc<dyn Channel>,
}

impl AppState {
    pub fn new(channel: Arc<dyn Channel>, results: Arc<ResultStore>) -> Self {
        Self {
            gateway: RequestGateway::new(channel.clone()),
            results,
            channel,
        }
    }
}
