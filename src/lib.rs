pub mod api;
pub mod batch;
pub mod config;
pub mod context;
pub mod humanize;
pub mod ledger;
pub mod limiter;
pub mod logging;
pub mod observability;
pub mod orchestrator;
pub mod provider;
pub mod retry;
pub mod storage;
