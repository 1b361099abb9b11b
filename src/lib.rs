pub mod chunker;
pub mod config;
pub mod error;
pub mod ir;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod sentinels;
pub mod server;
pub mod store;
pub mod textutil;
