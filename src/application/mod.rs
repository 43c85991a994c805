pub mod active_tab;
pub mod bootstrap;
pub mod commands;
pub mod config_store;
pub mod engine;
pub mod notification;
pub mod realtime;
pub mod reminder_store;
pub mod reminder_types;
pub mod scheduler;
