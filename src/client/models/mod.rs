pub mod connection;
pub mod progress;
