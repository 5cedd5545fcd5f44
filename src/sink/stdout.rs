use super::{Record, RecordSink, SinkError};
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Writes every batch as one JSON line. Used for dry runs against a live device.
pub struct StdoutSink {
    out: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self::with_writer(tokio::io::stdout())
    }

    pub fn with_writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(writer)),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordSink for StdoutSink {
    async fn write_records(&self, records: &[Record]) -> Result<(), SinkError> {
        let mut line =
            serde_json::to_vec(records).map_err(|err| SinkError::Submit(err.to_string()))?;
        line.push(b'\n');
        let mut out = self.out.lock().await;
        out.write_all(&line)
            .await
            .map_err(|err| SinkError::Submit(err.to_string()))?;
        out.flush()
            .await
            .map_err(|err| SinkError::Submit(err.to_string()))
    }
}
