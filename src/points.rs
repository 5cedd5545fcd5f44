use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::ops::Deref;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

pub const BACNET_DEFAULT_PORT: u16 = 47808;
const MAX_INSTANCE: u32 = 0x3F_FFFF;

#[derive(Debug, thiserror::Error)]
pub enum PointError {
    #[error("invalid object reference {0:?} (expected objectType:instance)")]
    InvalidObject(String),
    #[error("invalid property identifier {0:?}")]
    InvalidProperty(String),
    #[error("invalid device address {0:?}")]
    InvalidAddress(String),
    #[error("point {index} has no tag and the point file sets no default tag")]
    MissingTag { index: usize },
    #[error("failed to read point file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse point file: {0}")]
    Json(#[from] serde_json::Error),
}

const OBJECT_TYPE_NAMES: &[(u16, &str)] = &[
    (0, "analogInput"),
    (1, "analogOutput"),
    (2, "analogValue"),
    (3, "binaryInput"),
    (4, "binaryOutput"),
    (5, "binaryValue"),
    (6, "calendar"),
    (7, "command"),
    (8, "device"),
    (9, "eventEnrollment"),
    (10, "file"),
    (11, "group"),
    (12, "loop"),
    (13, "multiStateInput"),
    (14, "multiStateOutput"),
    (15, "notificationClass"),
    (16, "program"),
    (17, "schedule"),
    (18, "averaging"),
    (19, "multiStateValue"),
    (20, "trendLog"),
];

const PROPERTY_NAMES: &[(u32, &str)] = &[
    (12, "applicationSoftwareVersion"),
    (17, "notificationClass"),
    (22, "covIncrement"),
    (25, "deadband"),
    (28, "description"),
    (31, "deviceType"),
    (35, "eventEnable"),
    (36, "eventState"),
    (44, "firmwareRevision"),
    (45, "highLimit"),
    (59, "lowLimit"),
    (62, "maxApduLengthAccepted"),
    (65, "maxPresValue"),
    (69, "minPresValue"),
    (70, "modelName"),
    (72, "notifyType"),
    (74, "numberOfStates"),
    (75, "objectIdentifier"),
    (76, "objectList"),
    (77, "objectName"),
    (79, "objectType"),
    (81, "outOfService"),
    (84, "polarity"),
    (85, "presentValue"),
    (87, "priorityArray"),
    (103, "reliability"),
    (104, "relinquishDefault"),
    (106, "resolution"),
    (110, "stateText"),
    (111, "statusFlags"),
    (112, "systemStatus"),
    (113, "timeDelay"),
    (117, "units"),
    (120, "vendorIdentifier"),
    (121, "vendorName"),
    (371, "propertyList"),
];

/// BACnet object type number. Unnamed (proprietary) types round-trip as plain numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectType(pub u16);

impl ObjectType {
    pub const ANALOG_INPUT: Self = Self(0);
    pub const ANALOG_OUTPUT: Self = Self(1);
    pub const ANALOG_VALUE: Self = Self(2);
    pub const BINARY_INPUT: Self = Self(3);
    pub const BINARY_OUTPUT: Self = Self(4);
    pub const BINARY_VALUE: Self = Self(5);
    pub const DEVICE: Self = Self(8);
    pub const MULTI_STATE_INPUT: Self = Self(13);
    pub const MULTI_STATE_OUTPUT: Self = Self(14);
    pub const MULTI_STATE_VALUE: Self = Self(19);

    pub fn name(self) -> Option<&'static str> {
        OBJECT_TYPE_NAMES
            .iter()
            .find(|(id, _)| *id == self.0)
            .map(|(_, name)| *name)
    }

    pub fn is_analog(self) -> bool {
        matches!(self, Self::ANALOG_INPUT | Self::ANALOG_OUTPUT | Self::ANALOG_VALUE)
    }

    pub fn is_binary(self) -> bool {
        matches!(self, Self::BINARY_INPUT | Self::BINARY_OUTPUT | Self::BINARY_VALUE)
    }

    pub fn is_multi_state(self) -> bool {
        matches!(
            self,
            Self::MULTI_STATE_INPUT | Self::MULTI_STATE_OUTPUT | Self::MULTI_STATE_VALUE
        )
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for ObjectType {
    type Err = PointError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if let Some((id, _)) = OBJECT_TYPE_NAMES.iter().find(|(_, name)| *name == raw) {
            return Ok(Self(*id));
        }
        raw.parse::<u16>()
            .ok()
            .filter(|id| *id < 1024)
            .map(Self)
            .ok_or_else(|| PointError::InvalidObject(raw.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub object_type: ObjectType,
    pub instance: u32,
}

impl ObjectId {
    pub fn new(object_type: ObjectType, instance: u32) -> Self {
        Self {
            object_type,
            instance,
        }
    }

    /// Packed 32-bit form used on the wire: 10 bits of type, 22 bits of instance.
    pub fn to_u32(self) -> u32 {
        ((self.object_type.0 as u32) << 22) | (self.instance & MAX_INSTANCE)
    }

    pub fn from_u32(raw: u32) -> Self {
        Self {
            object_type: ObjectType((raw >> 22) as u16),
            instance: raw & MAX_INSTANCE,
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.instance)
    }
}

impl FromStr for ObjectId {
    type Err = PointError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || PointError::InvalidObject(raw.to_string());
        let (object_type, instance) = raw.trim().split_once(':').ok_or_else(invalid)?;
        let object_type = object_type.parse::<ObjectType>().map_err(|_| invalid())?;
        let instance = instance
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|value| *value <= MAX_INSTANCE)
            .ok_or_else(invalid)?;
        Ok(Self::new(object_type, instance))
    }
}

/// BACnet property identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyId(pub u32);

impl PropertyId {
    pub const COV_INCREMENT: Self = Self(22);
    pub const DESCRIPTION: Self = Self(28);
    pub const DEVICE_TYPE: Self = Self(31);
    pub const EVENT_STATE: Self = Self(36);
    pub const FIRMWARE_REVISION: Self = Self(44);
    pub const HIGH_LIMIT: Self = Self(45);
    pub const LOW_LIMIT: Self = Self(59);
    pub const MAX_APDU_LENGTH_ACCEPTED: Self = Self(62);
    pub const MAX_PRES_VALUE: Self = Self(65);
    pub const MIN_PRES_VALUE: Self = Self(69);
    pub const MODEL_NAME: Self = Self(70);
    pub const NUMBER_OF_STATES: Self = Self(74);
    pub const OBJECT_IDENTIFIER: Self = Self(75);
    pub const OBJECT_LIST: Self = Self(76);
    pub const OBJECT_NAME: Self = Self(77);
    pub const OBJECT_TYPE: Self = Self(79);
    pub const OUT_OF_SERVICE: Self = Self(81);
    pub const POLARITY: Self = Self(84);
    pub const PRESENT_VALUE: Self = Self(85);
    pub const RELIABILITY: Self = Self(103);
    pub const RELINQUISH_DEFAULT: Self = Self(104);
    pub const RESOLUTION: Self = Self(106);
    pub const STATE_TEXT: Self = Self(110);
    pub const STATUS_FLAGS: Self = Self(111);
    pub const SYSTEM_STATUS: Self = Self(112);
    pub const TIME_DELAY: Self = Self(113);
    pub const UNITS: Self = Self(117);
    pub const VENDOR_IDENTIFIER: Self = Self(120);
    pub const VENDOR_NAME: Self = Self(121);
    pub const APPLICATION_SOFTWARE_VERSION: Self = Self(12);
    pub const NOTIFICATION_CLASS: Self = Self(17);
    pub const DEADBAND: Self = Self(25);
    pub const EVENT_ENABLE: Self = Self(35);
    pub const NOTIFY_TYPE: Self = Self(72);
    pub const PRIORITY_ARRAY: Self = Self(87);
    pub const PROPERTY_LIST: Self = Self(371);

    pub fn name(self) -> Option<&'static str> {
        PROPERTY_NAMES
            .iter()
            .find(|(id, _)| *id == self.0)
            .map(|(_, name)| *name)
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for PropertyId {
    type Err = PointError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if let Some((id, _)) = PROPERTY_NAMES.iter().find(|(_, name)| *name == raw) {
            return Ok(Self(*id));
        }
        raw.parse::<u32>()
            .ok()
            .filter(|id| *id < (1 << 22))
            .map(Self)
            .ok_or_else(|| PointError::InvalidProperty(raw.to_string()))
    }
}

/// One sampling target: a property of an object on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    pub device: SocketAddr,
    pub object: ObjectId,
    pub property: PropertyId,
    pub array_index: Option<u32>,
    pub tag: String,
}

impl Point {
    pub fn new(device: SocketAddr, object: ObjectId, property: PropertyId, tag: &str) -> Self {
        Self {
            device,
            object,
            property,
            array_index: None,
            tag: tag.to_string(),
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.device, self.object, self.property)?;
        if let Some(index) = self.array_index {
            write!(f, "[{index}]")?;
        }
        Ok(())
    }
}

pub fn parse_device_address(raw: &str) -> Result<SocketAddr, PointError> {
    let raw = raw.trim();
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Ok(addr);
    }
    raw.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, BACNET_DEFAULT_PORT))
        .map_err(|_| PointError::InvalidAddress(raw.to_string()))
}

/// Ordered, read-only point catalog. Cloning shares the same allocation.
#[derive(Debug, Clone)]
pub struct PointList(Arc<[Point]>);

impl PointList {
    pub fn new(points: Vec<Point>) -> Self {
        Self(points.into())
    }

    pub fn from_file(path: &Path) -> Result<Self, PointError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, PointError> {
        let file: PointFile = serde_json::from_str(contents)?;
        let (default_tag, specs) = match file {
            PointFile::List(points) => (None, points),
            PointFile::Table { tag, points } => (tag, points),
        };

        let mut points = Vec::with_capacity(specs.len());
        for (index, spec) in specs.into_iter().enumerate() {
            let tag = spec
                .tag
                .or_else(|| default_tag.clone())
                .map(|tag| tag.trim().to_string())
                .filter(|tag| !tag.is_empty())
                .ok_or(PointError::MissingTag { index })?;
            points.push(Point {
                device: parse_device_address(&spec.device)?,
                object: spec.object.parse()?,
                property: spec.property.parse()?,
                array_index: spec.array_index,
                tag,
            });
        }
        Ok(Self::new(points))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        let specs: Vec<PointSpec> = self
            .0
            .iter()
            .map(|point| PointSpec {
                device: point.device.to_string(),
                object: point.object.to_string(),
                property: point.property.to_string(),
                tag: Some(point.tag.clone()),
                array_index: point.array_index,
            })
            .collect();
        serde_json::to_string_pretty(&specs)
    }
}

impl Deref for PointList {
    type Target = [Point];

    fn deref(&self) -> &[Point] {
        &self.0
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PointSpec {
    device: String,
    object: String,
    property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    array_index: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PointFile {
    List(Vec<PointSpec>),
    Table {
        #[serde(default)]
        tag: Option<String>,
        points: Vec<PointSpec>,
    },
}

/// Point table of a Flexim FLUXUS ultrasonic flow meter, channels A and B.
pub fn flexim_points(device: SocketAddr, tag: &str) -> PointList {
    let mut points = Vec::with_capacity(16);
    for channel in [100u32, 200] {
        let ai = |offset: u32| ObjectId::new(ObjectType::ANALOG_INPUT, channel + offset);
        // signal amplitude, sound speed
        points.push(Point::new(device, ai(5), PropertyId::PRESENT_VALUE, tag));
        points.push(Point::new(device, ai(6), PropertyId::PRESENT_VALUE, tag));
        // flow rate and its diagnostics
        for property in [
            PropertyId::PRESENT_VALUE,
            PropertyId::EVENT_STATE,
            PropertyId::RELIABILITY,
            PropertyId::OUT_OF_SERVICE,
        ] {
            points.push(Point::new(device, ai(11), property, tag));
        }
        // SNR, SCNR
        points.push(Point::new(device, ai(21), PropertyId::PRESENT_VALUE, tag));
        points.push(Point::new(device, ai(22), PropertyId::PRESENT_VALUE, tag));
    }
    PointList::new(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn object_id_parses_names_and_numbers() {
        let named: ObjectId = "analogInput:105".parse().unwrap();
        assert_eq!(named, ObjectId::new(ObjectType::ANALOG_INPUT, 105));
        assert_eq!(named.to_string(), "analogInput:105");

        let numeric: ObjectId = "2:9".parse().unwrap();
        assert_eq!(numeric.object_type, ObjectType::ANALOG_VALUE);

        let proprietary: ObjectId = "600:1".parse().unwrap();
        assert_eq!(proprietary.to_string(), "600:1");

        assert!("analogInput".parse::<ObjectId>().is_err());
        assert!("analogInput:4194304".parse::<ObjectId>().is_err());
        assert!("bogus:1".parse::<ObjectId>().is_err());
    }

    #[test]
    fn object_id_packs_type_and_instance() {
        let id = ObjectId::new(ObjectType::ANALOG_INPUT, 105);
        assert_eq!(id.to_u32(), 105);
        let id = ObjectId::new(ObjectType::DEVICE, 1234);
        assert_eq!(id.to_u32(), (8 << 22) | 1234);
        assert_eq!(ObjectId::from_u32(id.to_u32()), id);
    }

    #[test]
    fn property_id_parses_names_and_numbers() {
        assert_eq!(
            "presentValue".parse::<PropertyId>().unwrap(),
            PropertyId::PRESENT_VALUE
        );
        assert_eq!("85".parse::<PropertyId>().unwrap(), PropertyId::PRESENT_VALUE);
        assert_eq!("5000".parse::<PropertyId>().unwrap().to_string(), "5000");
        assert!("presentvalue".parse::<PropertyId>().is_err());
    }

    #[test]
    fn device_address_defaults_bacnet_port() {
        assert_eq!(
            parse_device_address("10.10.2.30").unwrap(),
            "10.10.2.30:47808".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(parse_device_address("10.0.0.1:47809").unwrap().port(), 47809);
        assert!(parse_device_address("flexim.local").is_err());
    }

    #[test]
    fn point_file_accepts_plain_list() {
        let list = PointList::from_json(
            r#"[
                {"device": "10.10.2.30", "object": "analogInput:105", "property": "presentValue", "tag": "T1"},
                {"device": "10.10.2.30", "object": "device:7", "property": "objectList", "tag": "T1", "array_index": 0}
            ]"#,
        )
        .unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].tag, "T1");
        assert_eq!(list[1].object.object_type, ObjectType::DEVICE);
        assert_eq!(list[1].array_index, Some(0));
    }

    #[test]
    fn point_file_table_applies_default_tag() {
        let list = PointList::from_json(
            r#"{"tag": "457999", "points": [
                {"device": "10.10.2.30", "object": "analogInput:111", "property": "reliability"},
                {"device": "10.10.2.30", "object": "analogInput:111", "property": "eventState", "tag": "other"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(list[0].tag, "457999");
        assert_eq!(list[1].tag, "other");
    }

    #[test]
    fn point_file_requires_a_tag() {
        let err = PointList::from_json(
            r#"[{"device": "10.10.2.30", "object": "analogInput:1", "property": "presentValue"}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, PointError::MissingTag { index: 0 }));
    }

    #[test]
    fn point_file_round_trips_through_disk() {
        let device = parse_device_address("10.10.2.30").unwrap();
        let original = flexim_points(device, "457999");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(original.to_json().unwrap().as_bytes()).unwrap();

        let loaded = PointList::from_file(file.path()).unwrap();
        assert_eq!(&*loaded, &*original);
    }

    #[test]
    fn flexim_table_matches_channel_layout() {
        let device = parse_device_address("10.10.2.30").unwrap();
        let list = flexim_points(device, "T");
        assert_eq!(list.len(), 16);
        assert_eq!(list[0].object.to_string(), "analogInput:105");
        assert_eq!(list[3].property, PropertyId::EVENT_STATE);
        assert_eq!(list[5].property, PropertyId::OUT_OF_SERVICE);
        assert_eq!(list[8].object.to_string(), "analogInput:205");
        assert_eq!(list[15].object.to_string(), "analogInput:222");
    }
}
