mod record;
mod stdout;
mod timestream;

pub use record::{Dimension, MeasureValueType, Record};
pub use stdout::StdoutSink;
pub use timestream::TimestreamSink;

use async_trait::async_trait;
use std::fmt;

/// Upper bound on records per submission; Timestream rejects larger WriteRecords calls.
pub const MAX_RECORDS_PER_WRITE: usize = 100;

/// Destination for one batch of records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn write_records(&self, records: &[Record]) -> Result<(), SinkError>;
}

/// One record the sink refused. `index` is relative to the submitted slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub index: usize,
    pub reason: String,
    pub existing_version: Option<i64>,
}

impl fmt::Display for RejectedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record {}: {}", self.index, self.reason)?;
        if let Some(version) = self.existing_version {
            write!(f, " (existing version {version})")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("{} record(s) rejected", .0.len())]
    Rejected(Vec<RejectedRecord>),
    #[error("write failed: {0}")]
    Submit(String),
}
