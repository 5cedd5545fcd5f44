use super::record::{MeasureValueType, Record};
use super::{RecordSink, RejectedRecord, SinkError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_timestreamwrite::error::DisplayErrorContext;
use aws_sdk_timestreamwrite::operation::write_records::WriteRecordsError;
use aws_sdk_timestreamwrite::types;
use aws_sdk_timestreamwrite::Client;
use aws_types::region::Region;

/// Amazon Timestream table writer. Credentials come from the default AWS provider chain.
pub struct TimestreamSink {
    client: Client,
    database: String,
    table: String,
}

impl TimestreamSink {
    pub async fn connect(region: Option<&str>, database: &str, table: &str) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        let config = loader.load().await;

        let (client, reload) = Client::new(&config)
            .with_endpoint_discovery_enabled()
            .await
            .map_err(|err| anyhow::anyhow!(err))
            .context("failed to discover Timestream write endpoint")?;
        tokio::spawn(reload.reload_task());

        tracing::info!(database, table, "timestream sink ready");
        Ok(Self {
            client,
            database: database.to_string(),
            table: table.to_string(),
        })
    }
}

fn to_sdk_record(record: &Record) -> Result<types::Record, SinkError> {
    let dimensions = record
        .dimensions
        .iter()
        .map(|dimension| {
            types::Dimension::builder()
                .name(&dimension.name)
                .value(&dimension.value)
                .build()
                .map_err(|err| SinkError::Submit(err.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let value_type = match record.measure_value_type {
        MeasureValueType::Double => types::MeasureValueType::Double,
        MeasureValueType::Varchar => types::MeasureValueType::Varchar,
    };
    Ok(types::Record::builder()
        .time(&record.time)
        .time_unit(types::TimeUnit::Milliseconds)
        .set_dimensions(Some(dimensions))
        .measure_name(&record.measure_name)
        .measure_value(&record.measure_value)
        .measure_value_type(value_type)
        .build())
}

#[async_trait]
impl RecordSink for TimestreamSink {
    async fn write_records(&self, records: &[Record]) -> Result<(), SinkError> {
        let records = records
            .iter()
            .map(to_sdk_record)
            .collect::<Result<Vec<_>, _>>()?;

        let result = self
            .client
            .write_records()
            .database_name(&self.database)
            .table_name(&self.table)
            .set_records(Some(records))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                if let Some(WriteRecordsError::RejectedRecordsException(rejected)) =
                    err.as_service_error()
                {
                    let rejected = rejected
                        .rejected_records()
                        .iter()
                        .map(|record| RejectedRecord {
                            index: usize::try_from(record.record_index()).unwrap_or_default(),
                            reason: record.reason().unwrap_or("unspecified").to_string(),
                            existing_version: record.existing_version(),
                        })
                        .collect();
                    return Err(SinkError::Rejected(rejected));
                }
                Err(SinkError::Submit(DisplayErrorContext(&err).to_string()))
            }
        }
    }
}
