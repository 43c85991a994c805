pub mod config;
pub mod error;
pub mod event_mapper;
pub mod key_value;
pub mod logging;
pub mod notifier;
pub mod platform_client;
pub mod storage;
