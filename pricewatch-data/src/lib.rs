/// Pricewatch Data - Market Data Integration
///
/// This library normalises exchange WebSocket feeds and REST market data into the canonical
/// units consumed by the pricewatch alert engine:
/// - Exchange connectors for Binance, OKX, Bybit and Upbit ticker and trade streams
/// - Connection units: one supervised task per (exchange, purpose) with a cooperative stop,
///   fixed backoff reconnects and an optional resubscribe side channel
/// - REST providers for crypto klines, equities chart history and KRX quotes
/// - Candle resampling for intervals a provider does not serve natively
pub mod error;
pub mod event;
pub mod exchange;
pub mod provider;
pub mod streams;
pub mod subscription;

// Re-export commonly used types for convenience
pub use error::DataError;
pub use event::{DataKind, MarketEvent, PriceTick, PublicTrade, Side};
pub use exchange::{Connector, ExchangeId};
pub use provider::{Candle, CandleProvider, QuoteProvider, Timeframe, TokenProvider};
pub use streams::{ConnectionUnit, EventCallback, UnitConfig, UnitHandle, UnitState};
pub use subscription::{Purpose, StaticSymbols, SymbolSource, UnitId};
