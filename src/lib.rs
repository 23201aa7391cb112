pub mod api;
pub mod broker;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod pricefeed;

pub use broker::{BrokerAdapter, BrokerError, HttpBroker, MockBroker};
pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    ControlMode, Decimal, ExitPhase, IntentStatus, OrderIntent, OrderStatus, Position, ReasonCode,
    Symbol, TimeMs,
};
pub use error::AppError;
pub use orchestration::ExitRuntime;
pub use pricefeed::{BestPrice, MockPriceFeed, PriceFeed, StoredPriceFeed};
