pub mod context;
pub mod executor;
pub mod feed;
pub mod gate;
pub mod lifecycle;
pub mod pricing;
pub mod recovery;
pub mod retry;

pub use context::EngineContext;
pub use executor::{OrderExecutor, Placement};
pub use feed::PriceFeed;
pub use gate::{GateClient, GateTickerStream};
pub use lifecycle::{Engine, EngineHandle, Tick};
pub use pricing::{PricingPolicy, Quote};
pub use recovery::RecoveryController;
pub use retry::RetryPolicy;
