pub mod api;
pub mod config;
pub mod decompress;
pub mod event;
pub mod forward;
pub mod msgpack;
pub mod multiplexer;
pub mod prometheus;
pub mod router;
pub mod server;
pub mod sinks;
