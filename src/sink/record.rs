use crate::points::{Point, PropertyId};
use crate::protocol::Outcome;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub(crate) const TAG_DIMENSION: &str = "tag";
pub(crate) const REFERENCE_DIMENSION: &str = "BACnet_ref";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MeasureValueType {
    Double,
    Varchar,
}

impl MeasureValueType {
    /// Live measurement properties are numeric; everything else is stored as text.
    pub fn for_property(property: PropertyId) -> Self {
        match property {
            PropertyId::PRESENT_VALUE | PropertyId::COV_INCREMENT => MeasureValueType::Double,
            _ => MeasureValueType::Varchar,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

/// One time-series row, shaped like a Timestream `Record` with millisecond time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Record {
    pub time: String,
    pub dimensions: Vec<Dimension>,
    pub measure_name: String,
    pub measure_value: String,
    pub measure_value_type: MeasureValueType,
}

impl Record {
    pub fn new(point: &Point, outcome: &Outcome, timestamp: DateTime<Utc>) -> Self {
        Self {
            time: timestamp.timestamp_millis().to_string(),
            dimensions: vec![
                Dimension {
                    name: TAG_DIMENSION.to_string(),
                    value: point.tag.clone(),
                },
                Dimension {
                    name: REFERENCE_DIMENSION.to_string(),
                    value: point.object.to_string(),
                },
            ],
            measure_name: point.property.to_string(),
            measure_value: outcome.to_string(),
            measure_value_type: MeasureValueType::for_property(point.property),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PointValue;
    use chrono::TimeZone;

    fn point(object: &str, property: PropertyId) -> Point {
        Point::new(
            "10.10.2.30:47808".parse().unwrap(),
            object.parse().unwrap(),
            property,
            "T1",
        )
    }

    #[test]
    fn builds_timestream_shaped_json() {
        let timestamp = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let record = Record::new(
            &point("analogInput:105", PropertyId::PRESENT_VALUE),
            &Outcome::Value(PointValue::Real(12.5)),
            timestamp,
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "Time": "1700000000123",
                "Dimensions": [
                    {"Name": "tag", "Value": "T1"},
                    {"Name": "BACnet_ref", "Value": "analogInput:105"}
                ],
                "MeasureName": "presentValue",
                "MeasureValue": "12.5",
                "MeasureValueType": "DOUBLE"
            })
        );
    }

    #[test]
    fn only_live_measurements_are_numeric() {
        assert_eq!(
            MeasureValueType::for_property(PropertyId::PRESENT_VALUE),
            MeasureValueType::Double
        );
        assert_eq!(
            MeasureValueType::for_property(PropertyId::COV_INCREMENT),
            MeasureValueType::Double
        );
        for property in [
            PropertyId::EVENT_STATE,
            PropertyId::RELIABILITY,
            PropertyId::OUT_OF_SERVICE,
            PropertyId::UNITS,
            PropertyId(9999),
        ] {
            assert_eq!(
                MeasureValueType::for_property(property),
                MeasureValueType::Varchar
            );
        }
    }

    #[test]
    fn faults_keep_their_description_as_value() {
        let record = Record::new(
            &point("analogInput:111", PropertyId::RELIABILITY),
            &Outcome::Fault("timeout".to_string()),
            Utc::now(),
        );
        assert_eq!(record.measure_value, "timeout");
        assert_eq!(record.measure_value_type, MeasureValueType::Varchar);
    }
}
