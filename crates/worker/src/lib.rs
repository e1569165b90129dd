pub mod client;
pub mod config;
pub mod transport;
pub mod worker;
