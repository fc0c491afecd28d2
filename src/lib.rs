pub mod config;
pub mod contract;
pub mod cursor;
pub mod dedup;
pub mod error;
pub mod events;
pub mod handlers;
pub mod logging;
pub mod query;
pub mod repository;
pub mod retry;
pub mod rpc;
pub mod scheduler;
pub mod supervisor;
