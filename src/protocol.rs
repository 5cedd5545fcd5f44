use crate::points::{ObjectId, ObjectType, Point, PropertyId};
use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;

/// A read of one property, addressed to one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub device: SocketAddr,
    pub object: ObjectId,
    pub property: PropertyId,
    pub array_index: Option<u32>,
}

impl ReadRequest {
    pub fn for_point(point: &Point) -> Self {
        Self {
            device: point.device,
            object: point.object,
            property: point.property,
            array_index: point.array_index,
        }
    }
}

/// Request/response transport for property reads.
///
/// Implementations resolve each call exactly once, with either a decoded value or an error.
/// They may retry internally; callers never do.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn read_property(&self, request: &ReadRequest) -> Result<PointValue, ProtocolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("timeout")]
    Timeout,
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{}: {}", error_class_name(.class), error_code_name(.code))]
    Remote { class: u32, code: u32 },
    #[error("request rejected (reason {0})")]
    Reject(u8),
    #[error("request aborted (reason {0})")]
    Abort(u8),
    #[error("{0} is not a BACnet/IP (IPv4) address")]
    Unaddressable(SocketAddr),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("unknown datatype for {object_type} {property}")]
    UnknownDatatype {
        object_type: ObjectType,
        property: PropertyId,
    },
    #[error("expected {expected}, device returned {found}")]
    UnexpectedDatatype {
        expected: &'static str,
        found: &'static str,
    },
}

fn error_class_name(class: &u32) -> String {
    match *class {
        0 => "device".to_string(),
        1 => "object".to_string(),
        2 => "property".to_string(),
        3 => "resources".to_string(),
        4 => "security".to_string(),
        5 => "services".to_string(),
        6 => "vt".to_string(),
        7 => "communication".to_string(),
        other => format!("class {other}"),
    }
}

fn error_code_name(code: &u32) -> String {
    match *code {
        0 => "other".to_string(),
        3 => "deviceBusy".to_string(),
        9 => "invalidDataType".to_string(),
        25 => "operationalProblem".to_string(),
        27 => "readAccessDenied".to_string(),
        29 => "serviceRequestDenied".to_string(),
        30 => "timeout".to_string(),
        31 => "unknownObject".to_string(),
        32 => "unknownProperty".to_string(),
        42 => "invalidArrayIndex".to_string(),
        50 => "propertyIsNotAnArray".to_string(),
        other => format!("code {other}"),
    }
}

/// Raw BACnet date: year offset from 1900, month, day, weekday. 0xFF means unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacnetDate(pub [u8; 4]);

/// Raw BACnet time: hour, minute, second, hundredths. 0xFF means unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacnetTime(pub [u8; 4]);

/// A decoded property value, typed by the property's declared datatype.
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    Null,
    Boolean(bool),
    Unsigned(u64),
    Signed(i64),
    Real(f32),
    Double(f64),
    Octets(Vec<u8>),
    Text(String),
    Bits(Vec<bool>),
    Enumerated {
        value: u32,
        name: Option<&'static str>,
    },
    Date(BacnetDate),
    Time(BacnetTime),
    Object(ObjectId),
    List(Vec<PointValue>),
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointValue::Null => f.write_str("null"),
            PointValue::Boolean(value) => write!(f, "{value}"),
            PointValue::Unsigned(value) => write!(f, "{value}"),
            PointValue::Signed(value) => write!(f, "{value}"),
            PointValue::Real(value) => write!(f, "{value}"),
            PointValue::Double(value) => write!(f, "{value}"),
            PointValue::Octets(bytes) => {
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            PointValue::Text(text) => f.write_str(text),
            PointValue::Bits(bits) => {
                for bit in bits {
                    f.write_str(if *bit { "1" } else { "0" })?;
                }
                Ok(())
            }
            PointValue::Enumerated { value, name } => match name {
                Some(name) => f.write_str(name),
                None => write!(f, "{value}"),
            },
            PointValue::Date(BacnetDate([year, month, day, _])) => {
                write_field(f, *year, |year| 1900 + year as u32, 4)?;
                f.write_str("-")?;
                write_field(f, *month, u32::from, 2)?;
                f.write_str("-")?;
                write_field(f, *day, u32::from, 2)
            }
            PointValue::Time(BacnetTime([hour, minute, second, hundredths])) => {
                write_field(f, *hour, u32::from, 2)?;
                f.write_str(":")?;
                write_field(f, *minute, u32::from, 2)?;
                f.write_str(":")?;
                write_field(f, *second, u32::from, 2)?;
                f.write_str(".")?;
                write_field(f, *hundredths, u32::from, 2)
            }
            PointValue::Object(id) => write!(f, "{id}"),
            PointValue::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

fn write_field(
    f: &mut fmt::Formatter<'_>,
    raw: u8,
    map: impl Fn(u8) -> u32,
    width: usize,
) -> fmt::Result {
    if raw == 0xFF {
        f.write_str("*")
    } else {
        write!(f, "{:0width$}", map(raw), width = width)
    }
}

/// Result of one point's read within a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Value(PointValue),
    Fault(String),
}

impl Outcome {
    pub fn is_fault(&self) -> bool {
        matches!(self, Outcome::Fault(_))
    }
}

impl From<Result<PointValue, ProtocolError>> for Outcome {
    fn from(result: Result<PointValue, ProtocolError>) -> Self {
        match result {
            Ok(value) => Outcome::Value(value),
            Err(err) => Outcome::Fault(err.to_string()),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Value(value) => write!(f, "{value}"),
            Outcome::Fault(reason) => f.write_str(reason),
        }
    }
}
