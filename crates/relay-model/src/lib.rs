pub mod event;
pub mod shard;
pub mod status;

pub use event::control::{ControlEvent, ControlKind};
pub use event::data::{ColumnSpec, DbmsData, RowChange};
pub use event::header::EventHeader;
pub use event::{ReplDbmsEvent, ReplEvent};
pub use shard::{SHARD_ID_DEFAULT, SHARD_ID_UNKNOWN, hash_partition, stable_shard_hash};
pub use status::StatusReport;
