pub mod account;
pub mod app;
pub mod config;
pub mod guard;
pub mod watch;
