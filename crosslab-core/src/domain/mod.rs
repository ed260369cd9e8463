//! Domain types for CrossLab

pub mod candle;
pub mod position;
pub mod timeframe;
pub mod trade;

pub use candle::Candle;
pub use position::{Position, PositionSide};
pub use timeframe::{Timeframe, TimeframeParseError};
pub use trade::{ExitReason, Trade};

/// Symbol type alias
pub type Symbol = String;
