//! Pure technical indicator functions. No state, no I/O.

/// RSI/price divergence classification.
pub mod divergence;

/// Strict local peak and trough detection.
pub mod extrema;

/// Relative Strength Index and its coarse interpretation.
pub mod rsi;

pub use divergence::{DivergenceConfig, DivergenceKind, DivergenceResult, Point, detect_divergence};
pub use extrema::{find_peaks, find_troughs};
pub use rsi::{DEFAULT_RSI_PERIOD, RsiStatus, compute_rsi};
