pub mod api_client;
pub mod event_stream;
pub mod health;
