pub mod adapter;
pub mod definition;
pub mod format;
pub mod request;

pub use adapter::{ExchangeAdapter, KindSpec, RawBundle, RawResponse};
pub use definition::{ExchangeDefinition, RowLimits};
pub use request::{PairTarget, PreparedRequest};
