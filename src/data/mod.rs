pub mod record;
pub mod store;
pub mod io;

pub use record::{Group, ImpressionDay, ImpressionHour, RawRecord, UserRecord};
pub use store::{count, load, rate, split_by_group, Dataset, GroupSplit, LoadOutcome, Snapshot};
pub use io::{read_csv, read_records, write_csv, write_records, DataIoError};
