//! Data providers and the helpers around them

pub mod circuit_breaker;
pub mod codes;
pub mod eastmoney;
pub mod exchange;
pub mod ingest;
pub mod provider;

pub use circuit_breaker::CircuitBreaker;
pub use codes::{parse_code_list, read_code_file, split_code_arg};
pub use eastmoney::{EastMoneyConfig, EastMoneyProvider};
pub use exchange::{has_exchange_prefix, resolve_exchange, strip_exchange_prefix, CodeProbe};
pub use ingest::{ingest_records, RawRecord};
pub use provider::{DataError, DataProvider, FetchRequest};
