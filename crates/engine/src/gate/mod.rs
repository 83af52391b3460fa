pub mod auth;
pub mod rest;
pub mod stream;

pub use rest::GateClient;
pub use stream::GateTickerStream;
