use crate::points::Point;
use crate::protocol::Outcome;
use crate::sink::{Record, RecordSink, SinkError, MAX_RECORDS_PER_WRITE};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

/// What one `emit` call did with the cycle's records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Records built from this cycle.
    pub records: usize,
    /// Records accepted by the sink.
    pub submitted: usize,
    pub rejected: usize,
    /// Records lost to failed writes.
    pub dropped: usize,
    pub failed_writes: usize,
    /// Records held back until enough cycles are coalesced.
    pub pending: usize,
}

pub fn build_records(points: &[Point], outcomes: &[Outcome], timestamp: DateTime<Utc>) -> Vec<Record> {
    assert_eq!(
        points.len(),
        outcomes.len(),
        "every point of a cycle needs exactly one outcome"
    );
    points
        .iter()
        .zip(outcomes)
        .map(|(point, outcome)| Record::new(point, outcome, timestamp))
        .collect()
}

/// Turns completed cycles into sink writes.
///
/// Records of `cycles_per_write` consecutive cycles are shipped together, split into
/// chunks the sink accepts. Sink failures are logged and never returned.
pub struct BatchEmitter {
    sink: Arc<dyn RecordSink>,
    cycles_per_write: usize,
    pending: Vec<Record>,
    pending_cycles: usize,
}

impl BatchEmitter {
    pub fn new(sink: Arc<dyn RecordSink>, cycles_per_write: usize) -> Self {
        Self {
            sink,
            cycles_per_write: cycles_per_write.max(1),
            pending: Vec::new(),
            pending_cycles: 0,
        }
    }

    pub async fn emit(
        &mut self,
        points: &[Point],
        outcomes: &[Outcome],
        timestamp: DateTime<Utc>,
    ) -> EmitReport {
        let records = build_records(points, outcomes, timestamp);
        let built = records.len();
        self.pending.extend(records);
        self.pending_cycles += 1;

        if self.pending_cycles < self.cycles_per_write {
            tracing::debug!(
                pending = self.pending.len(),
                cycles = self.pending_cycles,
                "holding records for coalesced write"
            );
            return EmitReport {
                records: built,
                pending: self.pending.len(),
                ..EmitReport::default()
            };
        }

        let mut report = self.flush().await;
        report.records = built;
        report
    }

    /// Writes whatever is pending, regardless of how many cycles it spans.
    pub async fn flush(&mut self) -> EmitReport {
        let batch = std::mem::take(&mut self.pending);
        self.pending_cycles = 0;
        let mut report = EmitReport::default();

        for (chunk_idx, chunk) in batch.chunks(MAX_RECORDS_PER_WRITE).enumerate() {
            let offset = chunk_idx * MAX_RECORDS_PER_WRITE;
            let started = Instant::now();
            match self.sink.write_records(chunk).await {
                Ok(()) => {
                    report.submitted += chunk.len();
                    tracing::debug!(
                        len = chunk.len(),
                        micros = started.elapsed().as_micros() as u64,
                        "wrote records"
                    );
                }
                Err(SinkError::Rejected(rejected)) => {
                    let mut refused = BTreeSet::new();
                    for record in &rejected {
                        let Some(entry) = chunk.get(record.index) else {
                            tracing::warn!(
                                index = record.index,
                                len = chunk.len(),
                                reason = %record.reason,
                                "sink rejected an index outside the batch"
                            );
                            continue;
                        };
                        if !refused.insert(record.index) {
                            continue;
                        }
                        tracing::warn!(
                            index = offset + record.index,
                            measure = entry.measure_name.as_str(),
                            reason = %record.reason,
                            existing_version = record.existing_version,
                            "record rejected"
                        );
                    }
                    report.rejected += refused.len();
                    report.submitted += chunk.len() - refused.len();
                }
                Err(err) => {
                    tracing::error!(error = %err, len = chunk.len(), "dropping batch after failed write");
                    report.failed_writes += 1;
                    report.dropped += chunk.len();
                }
            }
        }
        report
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
