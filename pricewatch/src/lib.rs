/// Pricewatch - Market Alert Engine
///
/// Detection core built on top of `pricewatch-data`:
/// - Price threshold alerts for crypto, US equities and KR equities with per alert cooldowns
/// - RSI level and RSI/price divergence alerts evaluated on a fixed poll interval
/// - Whale trade detection across every supported exchange
/// - Volume spike detection against a rolling 4 hour baseline
///
/// Every trigger path claims the trigger before sending a [`Notification`](notify::Notification)
/// and rolls the claim back if delivery fails. [`AppContext`] owns one instance of each
/// component and drives their workers.
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod indicator;
pub mod model;
pub mod monitor;
pub mod notify;
pub mod persist;
pub mod registry;
pub mod signal;
pub mod volume;
pub mod whale;

// Re-export commonly used types for convenience
pub use config::Config;
pub use context::{AppContext, Providers};
pub use error::AlertError;
pub use evaluator::{IndicatorAlert, IndicatorEvaluator, IndicatorKind, IndicatorMarket};
pub use model::{AlertId, Condition, Market};
pub use notify::{Channel, LogNotifier, Notification, Notifier};
pub use registry::{AlertRegistry, PriceAlert};
pub use signal::StopSignal;
pub use volume::VolumeDetector;
pub use whale::WhaleDetector;
