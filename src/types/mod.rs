pub mod currency_pair;
pub mod interval;
pub mod record;
pub mod request_kind;
pub mod value;

pub use currency_pair::CurrencyPair;
pub use interval::Interval;
pub use record::Record;
pub use request_kind::RequestKind;
pub use value::Value;
