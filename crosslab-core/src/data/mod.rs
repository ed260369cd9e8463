//! Candle acquisition: providers, the Parquet cache, and ingest normalization.

pub mod binance;
pub mod cache;
pub mod cached;
pub mod circuit_breaker;
pub mod csv_import;
pub mod download;
pub mod ingest;
pub mod provider;
pub mod synthetic;

pub use binance::BinanceProvider;
pub use cache::{dataset_hash, CacheMeta, CacheStatus, CoverageResult, ParquetCache};
pub use cached::CachedProvider;
pub use circuit_breaker::CircuitBreaker;
pub use csv_import::CsvProvider;
pub use download::{download_symbols, DownloadProgress, DownloadSummary, StdoutProgress};
pub use ingest::{normalize, IngestReport};
pub use provider::{CandleProvider, DataError};
pub use synthetic::SyntheticProvider;
