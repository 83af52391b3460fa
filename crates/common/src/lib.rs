pub mod config;
pub mod error;
pub mod exchange;
pub mod types;

pub use config::{
    Config, Credentials, FeedSettings, RestSettings, RetrySettings, SideAdjust, TradingConfig,
};
pub use error::{Error, Result};
pub use exchange::OrderBackend;
pub use types::*;
