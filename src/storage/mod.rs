mod models;
mod queries;
mod sink;
mod sqlite;

pub use models::MediaRecord;
pub use sink::{MemorySink, ResultSink};
pub use sqlite::Database;
