use super::client::object_id;
use crate::points::{ObjectType, PropertyId};
use crate::protocol::{BacnetDate, BacnetTime, PointValue, ProtocolError, ReadRequest};
use bacnet_types::primitives::PropertyValue;

type EnumNames = fn(u32) -> Option<&'static str>;

/// Declared datatype of a property, used to cast the raw application values of an ACK.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Datatype {
    Real,
    Boolean,
    Unsigned,
    Enumerated(EnumNames),
    CharacterString,
    BitString,
    ObjectIdentifier,
    /// Any primitive, e.g. priority array slots that may be Null.
    Any,
    Array(&'static Datatype),
}

impl Datatype {
    fn name(&self) -> &'static str {
        match self {
            Datatype::Real => "Real",
            Datatype::Boolean => "Boolean",
            Datatype::Unsigned => "Unsigned",
            Datatype::Enumerated(_) => "Enumerated",
            Datatype::CharacterString => "CharacterString",
            Datatype::BitString => "BitString",
            Datatype::ObjectIdentifier => "ObjectIdentifier",
            Datatype::Any => "any primitive",
            Datatype::Array(_) => "Array",
        }
    }
}

static OBJECT_IDENTIFIER: Datatype = Datatype::ObjectIdentifier;
static PROPERTY_IDENTIFIER: Datatype = Datatype::Enumerated(property_name);
static CHARACTER_STRING: Datatype = Datatype::CharacterString;
static ANY: Datatype = Datatype::Any;

pub(crate) fn datatype_for(object_type: ObjectType, property: PropertyId) -> Option<Datatype> {
    let datatype = match property {
        PropertyId::PRESENT_VALUE | PropertyId::RELINQUISH_DEFAULT => {
            if object_type.is_analog() {
                Datatype::Real
            } else if object_type.is_binary() {
                Datatype::Enumerated(binary_pv_name)
            } else if object_type.is_multi_state() {
                Datatype::Unsigned
            } else {
                return None;
            }
        }
        PropertyId::COV_INCREMENT
        | PropertyId::HIGH_LIMIT
        | PropertyId::LOW_LIMIT
        | PropertyId::DEADBAND
        | PropertyId::MIN_PRES_VALUE
        | PropertyId::MAX_PRES_VALUE
        | PropertyId::RESOLUTION => {
            if !object_type.is_analog() {
                return None;
            }
            Datatype::Real
        }
        PropertyId::EVENT_STATE => Datatype::Enumerated(event_state_name),
        PropertyId::RELIABILITY => Datatype::Enumerated(reliability_name),
        PropertyId::UNITS => Datatype::Enumerated(units_name),
        PropertyId::POLARITY => Datatype::Enumerated(polarity_name),
        PropertyId::SYSTEM_STATUS => Datatype::Enumerated(device_status_name),
        PropertyId::NOTIFY_TYPE => Datatype::Enumerated(notify_type_name),
        PropertyId::OBJECT_TYPE => Datatype::Enumerated(object_type_name),
        PropertyId::OUT_OF_SERVICE => Datatype::Boolean,
        PropertyId::STATUS_FLAGS | PropertyId::EVENT_ENABLE => Datatype::BitString,
        PropertyId::OBJECT_NAME
        | PropertyId::DESCRIPTION
        | PropertyId::DEVICE_TYPE
        | PropertyId::MODEL_NAME
        | PropertyId::VENDOR_NAME
        | PropertyId::FIRMWARE_REVISION
        | PropertyId::APPLICATION_SOFTWARE_VERSION => Datatype::CharacterString,
        PropertyId::OBJECT_IDENTIFIER => Datatype::ObjectIdentifier,
        PropertyId::NUMBER_OF_STATES
        | PropertyId::VENDOR_IDENTIFIER
        | PropertyId::MAX_APDU_LENGTH_ACCEPTED
        | PropertyId::NOTIFICATION_CLASS
        | PropertyId::TIME_DELAY => Datatype::Unsigned,
        PropertyId::OBJECT_LIST => Datatype::Array(&OBJECT_IDENTIFIER),
        PropertyId::PROPERTY_LIST => Datatype::Array(&PROPERTY_IDENTIFIER),
        PropertyId::STATE_TEXT => Datatype::Array(&CHARACTER_STRING),
        PropertyId::PRIORITY_ARRAY => Datatype::Array(&ANY),
        _ => return None,
    };
    Some(datatype)
}

/// Casts the values of a ReadProperty-ACK according to the property's declared datatype.
/// Array index 0 addresses the array length; any other index addresses one element.
pub(crate) fn cast(request: &ReadRequest, values: Vec<PropertyValue>) -> Result<PointValue, ProtocolError> {
    let datatype = datatype_for(request.object.object_type, request.property).ok_or(
        ProtocolError::UnknownDatatype {
            object_type: request.object.object_type,
            property: request.property,
        },
    )?;

    match (datatype, request.array_index) {
        (Datatype::Array(_), Some(0)) => cast_single(Datatype::Unsigned, values),
        (Datatype::Array(element), Some(_)) => cast_single(*element, values),
        (Datatype::Array(element), None) => values
            .into_iter()
            .map(|value| cast_value(*element, value))
            .collect::<Result<Vec<_>, _>>()
            .map(PointValue::List),
        (datatype, _) => cast_single(datatype, values),
    }
}

fn cast_single(datatype: Datatype, values: Vec<PropertyValue>) -> Result<PointValue, ProtocolError> {
    let count = values.len();
    let mut values = values.into_iter();
    match (values.next(), values.next()) {
        (Some(value), None) => cast_value(datatype, value),
        _ => Err(ProtocolError::Malformed(format!(
            "expected one {} value, got {count}",
            datatype.name()
        ))),
    }
}

fn cast_value(datatype: Datatype, value: PropertyValue) -> Result<PointValue, ProtocolError> {
    let cast = match (datatype, value) {
        (Datatype::Real, PropertyValue::Real(value)) => PointValue::Real(value),
        (Datatype::Real, PropertyValue::Double(value)) => PointValue::Double(value),
        (Datatype::Boolean, PropertyValue::Boolean(value)) => PointValue::Boolean(value),
        (Datatype::Unsigned, PropertyValue::Unsigned(value)) => PointValue::Unsigned(value),
        (Datatype::Enumerated(names), PropertyValue::Enumerated(value)) => PointValue::Enumerated {
            value,
            name: names(value),
        },
        (Datatype::CharacterString, PropertyValue::CharacterString(text)) => PointValue::Text(text),
        (Datatype::BitString, value @ PropertyValue::BitString { .. }) => primitive(value),
        (Datatype::ObjectIdentifier, PropertyValue::ObjectIdentifier(id)) => {
            PointValue::Object(object_id(id))
        }
        (Datatype::Any, value) => primitive(value),
        (datatype, value) => {
            return Err(ProtocolError::UnexpectedDatatype {
                expected: datatype.name(),
                found: kind(&value),
            })
        }
    };
    Ok(cast)
}

fn primitive(value: PropertyValue) -> PointValue {
    match value {
        PropertyValue::Null => PointValue::Null,
        PropertyValue::Boolean(value) => PointValue::Boolean(value),
        PropertyValue::Unsigned(value) => PointValue::Unsigned(value),
        PropertyValue::Signed(value) => PointValue::Signed(i64::from(value)),
        PropertyValue::Real(value) => PointValue::Real(value),
        PropertyValue::Double(value) => PointValue::Double(value),
        PropertyValue::OctetString(bytes) => PointValue::Octets(bytes),
        PropertyValue::CharacterString(text) => PointValue::Text(text),
        PropertyValue::BitString { unused_bits, data } => PointValue::Bits(bits(unused_bits, &data)),
        PropertyValue::Enumerated(value) => PointValue::Enumerated { value, name: None },
        PropertyValue::Date(date) => {
            PointValue::Date(BacnetDate([date.year, date.month, date.day, date.day_of_week]))
        }
        PropertyValue::Time(time) => {
            PointValue::Time(BacnetTime([time.hour, time.minute, time.second, time.hundredths]))
        }
        PropertyValue::ObjectIdentifier(id) => PointValue::Object(object_id(id)),
        PropertyValue::List(items) => PointValue::List(items.into_iter().map(primitive).collect()),
    }
}

/// Bits in transmission order, most significant bit of each octet first.
fn bits(unused_bits: u8, data: &[u8]) -> Vec<bool> {
    let len = (data.len() * 8).saturating_sub(usize::from(unused_bits));
    (0..len)
        .map(|bit| data[bit / 8] & (0x80 >> (bit % 8)) != 0)
        .collect()
}

fn kind(value: &PropertyValue) -> &'static str {
    match value {
        PropertyValue::Null => "Null",
        PropertyValue::Boolean(_) => "Boolean",
        PropertyValue::Unsigned(_) => "Unsigned",
        PropertyValue::Signed(_) => "Signed",
        PropertyValue::Real(_) => "Real",
        PropertyValue::Double(_) => "Double",
        PropertyValue::OctetString(_) => "OctetString",
        PropertyValue::CharacterString(_) => "CharacterString",
        PropertyValue::BitString { .. } => "BitString",
        PropertyValue::Enumerated(_) => "Enumerated",
        PropertyValue::Date(_) => "Date",
        PropertyValue::Time(_) => "Time",
        PropertyValue::ObjectIdentifier(_) => "ObjectIdentifier",
        PropertyValue::List(_) => "List",
    }
}

fn lookup(table: &'static [(u32, &'static str)], value: u32) -> Option<&'static str> {
    table
        .iter()
        .find(|(id, _)| *id == value)
        .map(|(_, name)| *name)
}

fn binary_pv_name(value: u32) -> Option<&'static str> {
    lookup(&[(0, "inactive"), (1, "active")], value)
}

fn event_state_name(value: u32) -> Option<&'static str> {
    lookup(
        &[
            (0, "normal"),
            (1, "fault"),
            (2, "offnormal"),
            (3, "highLimit"),
            (4, "lowLimit"),
            (5, "lifeSafetyAlarm"),
        ],
        value,
    )
}

fn reliability_name(value: u32) -> Option<&'static str> {
    lookup(
        &[
            (0, "noFaultDetected"),
            (1, "noSensor"),
            (2, "overRange"),
            (3, "underRange"),
            (4, "openLoop"),
            (5, "shortedLoop"),
            (6, "noOutput"),
            (7, "unreliableOther"),
            (8, "processError"),
            (9, "multiStateFault"),
            (10, "configurationError"),
            (12, "communicationFailure"),
            (13, "memberFault"),
        ],
        value,
    )
}

fn units_name(value: u32) -> Option<&'static str> {
    lookup(
        &[
            (3, "amperes"),
            (5, "volts"),
            (19, "kilowattHours"),
            (27, "hertz"),
            (48, "kilowatts"),
            (55, "bars"),
            (62, "degreesCelsius"),
            (63, "degreesKelvin"),
            (73, "seconds"),
            (74, "metersPerSecond"),
            (80, "cubicMeters"),
            (85, "cubicMetersPerSecond"),
            (87, "litersPerSecond"),
            (95, "noUnits"),
            (98, "percent"),
            (135, "cubicMetersPerHour"),
            (199, "decibels"),
        ],
        value,
    )
}

fn polarity_name(value: u32) -> Option<&'static str> {
    lookup(&[(0, "normal"), (1, "reverse")], value)
}

fn device_status_name(value: u32) -> Option<&'static str> {
    lookup(
        &[
            (0, "operational"),
            (1, "operationalReadOnly"),
            (2, "downloadRequired"),
            (3, "downloadInProgress"),
            (4, "nonOperational"),
            (5, "backupInProgress"),
        ],
        value,
    )
}

fn notify_type_name(value: u32) -> Option<&'static str> {
    lookup(&[(0, "alarm"), (1, "event"), (2, "ackNotification")], value)
}

fn object_type_name(value: u32) -> Option<&'static str> {
    u16::try_from(value).ok().and_then(|id| ObjectType(id).name())
}

fn property_name(value: u32) -> Option<&'static str> {
    PropertyId(value).name()
}
