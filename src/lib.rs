pub mod api;
pub mod broker;
pub mod config;
pub mod error;
pub mod models;
pub mod runtime;
pub mod services;
pub mod worker;
