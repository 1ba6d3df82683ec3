pub mod cursor;
pub mod error;
pub mod schema;
pub mod stats;
pub mod store;
pub mod vacuum;

mod row;

pub use crate::cursor::{decode_cursor, encode_cursor};
pub use crate::error::StoreError;
pub use crate::stats::BasicStats;
pub use crate::store::{NewEvent, QueryFilter, QueryOrder, QueryResult, Store};
