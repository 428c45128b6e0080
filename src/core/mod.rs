pub mod cancel;
pub mod chat_stream;
pub mod client;
pub mod config;
pub mod message;
pub mod persistence;
pub mod providers;
pub mod session;
pub mod store;
