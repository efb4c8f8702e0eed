//! Market data access and state persistence for Tradewind.
//!
//! The scheduler and optimiser consume bars through the [`MarketDataSource`]
//! trait; the control plane persists entities through [`StateStore`]. Both
//! are external collaborators to the core; this crate supplies the
//! contracts plus in-memory implementations used by tests, backtests, and
//! the demo service.

pub mod cache;
pub mod csv_loader;
pub mod memory;
pub mod source;
pub mod store;
pub mod synthetic;

pub use cache::CachedDataSource;
pub use csv_loader::load_bars_csv;
pub use memory::MemoryDataSource;
pub use source::{BarQuery, MarketDataSource};
pub use store::{MemoryStateStore, StateStore, StoreResult};
