use super::datatype;
use crate::points::{ObjectId, PropertyId};
use crate::protocol::{PointValue, ProtocolClient, ProtocolError, ReadRequest};
use async_trait::async_trait;
use bacnet_client::client::{BACnetClient, ClientConfig};
use bacnet_encoding::primitives::decode_application_value;
use bacnet_transport::bip::BipTransport;
use bacnet_types::enums::PropertyIdentifier;
use bacnet_types::error::Error as BacnetError;
use bacnet_types::primitives::{ObjectIdentifier, PropertyValue};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tracing::debug;

/// BACnet/IP client issuing confirmed ReadProperty requests.
///
/// Transactions, retries and invoke ids are handled by the `bacnet-client` stack; this type
/// addresses devices by socket address and casts the ACK to the property's datatype.
pub struct BacnetClient {
    inner: BACnetClient<BipTransport>,
}

impl BacnetClient {
    pub async fn bind(
        bind: SocketAddr,
        apdu_timeout: Duration,
        apdu_retries: u8,
    ) -> Result<Self, ProtocolError> {
        let SocketAddr::V4(bind) = bind else {
            return Err(ProtocolError::Unaddressable(bind));
        };
        let config = ClientConfig {
            interface: *bind.ip(),
            port: bind.port(),
            apdu_timeout_ms: apdu_timeout.as_millis() as u64,
            apdu_retries,
            segmented_response_accepted: false,
            ..ClientConfig::default()
        };
        let transport = BipTransport::new(config.interface, config.port, config.broadcast_address);
        let inner = BACnetClient::start(config, transport).await?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        mac_to_addr(self.inner.local_mac())
    }
}

#[async_trait]
impl ProtocolClient for BacnetClient {
    async fn read_property(&self, request: &ReadRequest) -> Result<PointValue, ProtocolError> {
        let mac = addr_to_mac(request.device)?;
        let ack = self
            .inner
            .read_property(
                &mac,
                object_identifier(request.object),
                PropertyIdentifier::from_raw(request.property.0),
                request.array_index,
            )
            .await?;

        let object = object_id(ack.object_identifier);
        let property = PropertyId(ack.property_identifier.to_raw());
        if object != request.object
            || property != request.property
            || ack.property_array_index != request.array_index
        {
            debug!(
                device = %request.device,
                %object,
                %property,
                array_index = ?ack.property_array_index,
                "ack does not answer the request"
            );
            return Err(ProtocolError::Malformed(format!(
                "ack for {object} {property}{} does not match request",
                ack.property_array_index
                    .map(|index| format!("[{index}]"))
                    .unwrap_or_default()
            )));
        }

        let values = decode_values(&ack.property_value)?;
        datatype::cast(request, values)
    }
}

impl From<BacnetError> for ProtocolError {
    fn from(err: BacnetError) -> Self {
        match err {
            BacnetError::Timeout(_) => ProtocolError::Timeout,
            BacnetError::Transport(err) => ProtocolError::Io(err),
            BacnetError::Protocol { class, code } => ProtocolError::Remote { class, code },
            BacnetError::Reject { reason } => ProtocolError::Reject(reason),
            BacnetError::Abort { reason } => ProtocolError::Abort(reason),
            other => ProtocolError::Malformed(other.to_string()),
        }
    }
}

/// Splits the `propertyValue` of an ACK into its application-tagged values.
fn decode_values(data: &[u8]) -> Result<Vec<PropertyValue>, ProtocolError> {
    let mut values = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let (value, next) = decode_application_value(data, offset)?;
        values.push(value);
        offset = next;
    }
    Ok(values)
}

pub(crate) fn object_id(id: ObjectIdentifier) -> ObjectId {
    ObjectId::from_u32(u32::from_be_bytes(id.encode()))
}

fn object_identifier(id: ObjectId) -> ObjectIdentifier {
    ObjectIdentifier::new_unchecked(
        bacnet_types::enums::ObjectType::from_raw(u32::from(id.object_type.0)),
        id.instance,
    )
}

/// BACnet/IP MAC: IPv4 octets followed by the big-endian UDP port.
fn addr_to_mac(addr: SocketAddr) -> Result<[u8; 6], ProtocolError> {
    let SocketAddr::V4(v4) = addr else {
        return Err(ProtocolError::Unaddressable(addr));
    };
    let mut mac = [0u8; 6];
    mac[..4].copy_from_slice(&v4.ip().octets());
    mac[4..].copy_from_slice(&v4.port().to_be_bytes());
    Ok(mac)
}

fn mac_to_addr(mac: &[u8]) -> Option<SocketAddr> {
    let mac: [u8; 6] = mac.try_into().ok()?;
    let ip = Ipv4Addr::new(mac[0], mac[1], mac[2], mac[3]);
    let port = u16::from_be_bytes([mac[4], mac[5]]);
    Some(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bacnet_encoding::apdu::{self, encode_apdu, Apdu, ComplexAck, ErrorPdu};
    use bacnet_encoding::primitives::encode_property_value;
    use bacnet_network::layer::{NetworkLayer, ReceivedApdu};
    use bacnet_services::read_property::{ReadPropertyACK, ReadPropertyRequest};
    use bacnet_types::enums::{ConfirmedServiceChoice, ErrorClass, ErrorCode, NetworkPriority};
    use bytes::{Bytes, BytesMut};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Field device double on loopback, speaking through the crate's own network layer.
    struct FakeDevice {
        network: NetworkLayer<BipTransport>,
        rx: mpsc::Receiver<ReceivedApdu>,
        addr: SocketAddr,
    }

    async fn client() -> BacnetClient {
        BacnetClient::bind(
            "127.0.0.1:0".parse().unwrap(),
            Duration::from_millis(100),
            2,
        )
        .await
        .unwrap()
    }

    async fn fake_device() -> FakeDevice {
        let transport = BipTransport::new(Ipv4Addr::LOCALHOST, 0, Ipv4Addr::BROADCAST);
        let mut network = NetworkLayer::new(transport);
        let rx = network.start().await.unwrap();
        let addr = mac_to_addr(network.local_mac()).unwrap();
        FakeDevice { network, rx, addr }
    }

    fn request(device: SocketAddr, object: &str, property: PropertyId) -> ReadRequest {
        ReadRequest {
            device,
            object: object.parse().unwrap(),
            property,
            array_index: None,
        }
    }

    /// Answers the next ReadProperty with `reply`, built from the invoke id and decoded request.
    async fn answer_once(
        mut device: FakeDevice,
        reply: impl FnOnce(u8, ReadPropertyRequest) -> Apdu,
    ) {
        let received = tokio::time::timeout(Duration::from_secs(2), device.rx.recv())
            .await
            .unwrap()
            .unwrap();
        let Apdu::ConfirmedRequest(req) = apdu::decode_apdu(received.apdu.clone()).unwrap() else {
            panic!("device expected a confirmed request");
        };
        assert_eq!(req.service_choice, ConfirmedServiceChoice::READ_PROPERTY);
        let read = ReadPropertyRequest::decode(&req.service_request).unwrap();

        let mut buf = BytesMut::new();
        encode_apdu(&mut buf, &reply(req.invoke_id, read));
        device
            .network
            .send_apdu(&buf, &received.source_mac, false, NetworkPriority::NORMAL)
            .await
            .unwrap();
        device.network.stop().await.unwrap();
    }

    fn ack(invoke_id: u8, ack: ReadPropertyACK) -> Apdu {
        let mut service_ack = BytesMut::new();
        ack.encode(&mut service_ack);
        Apdu::ComplexAck(ComplexAck {
            segmented: false,
            more_follows: false,
            invoke_id,
            sequence_number: None,
            proposed_window_size: None,
            service_choice: ConfirmedServiceChoice::READ_PROPERTY,
            service_ack: Bytes::from(service_ack.to_vec()),
        })
    }

    fn encoded(values: &[PropertyValue]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for value in values {
            encode_property_value(&mut buf, value).unwrap();
        }
        buf.to_vec()
    }

    #[tokio::test]
    async fn reads_present_value_from_device() {
        let device = fake_device().await;
        let addr = device.addr;
        let client = client().await;
        let read = request(addr, "analogInput:105", PropertyId::PRESENT_VALUE);

        let responder = tokio::spawn(async move {
            answer_once(device, |invoke_id, req| {
                ack(
                    invoke_id,
                    ReadPropertyACK {
                        object_identifier: req.object_identifier,
                        property_identifier: req.property_identifier,
                        property_array_index: req.property_array_index,
                        property_value: encoded(&[PropertyValue::Real(12.5)]),
                    },
                )
            })
            .await;
        });

        let value = client.read_property(&read).await.unwrap();
        assert_eq!(value, PointValue::Real(12.5));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn device_error_becomes_remote_error() {
        let device = fake_device().await;
        let addr = device.addr;
        let client = client().await;
        let read = request(addr, "analogInput:105", PropertyId::RELIABILITY);

        let responder = tokio::spawn(async move {
            answer_once(device, |invoke_id, _| {
                Apdu::Error(ErrorPdu {
                    invoke_id,
                    service_choice: ConfirmedServiceChoice::READ_PROPERTY,
                    error_class: ErrorClass::PROPERTY,
                    error_code: ErrorCode::UNKNOWN_PROPERTY,
                    error_data: Bytes::new(),
                })
            })
            .await;
        });

        let err = client.read_property(&read).await.unwrap_err();
        assert_eq!(err.to_string(), "property: unknownProperty");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn ack_for_another_array_slot_is_rejected() {
        let device = fake_device().await;
        let addr = device.addr;
        let client = client().await;
        let read = ReadRequest {
            array_index: Some(3),
            ..request(addr, "device:7", PropertyId::OBJECT_LIST)
        };

        let responder = tokio::spawn(async move {
            answer_once(device, |invoke_id, req| {
                assert_eq!(req.property_array_index, Some(3));
                ack(
                    invoke_id,
                    ReadPropertyACK {
                        object_identifier: req.object_identifier,
                        property_identifier: req.property_identifier,
                        property_array_index: Some(0),
                        property_value: encoded(&[PropertyValue::ObjectIdentifier(
                            ObjectIdentifier::new_unchecked(
                                bacnet_types::enums::ObjectType::ANALOG_INPUT,
                                1,
                            ),
                        )]),
                    },
                )
            })
            .await;
        });

        let err = client.read_property(&read).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
        assert_eq!(
            err.to_string(),
            "malformed response: ack for device:7 objectList[0] does not match request"
        );
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn silent_device_times_out_after_retries() {
        let device = fake_device().await;
        let addr = device.addr;
        let client = client().await;
        let read = request(addr, "analogInput:105", PropertyId::PRESENT_VALUE);
        let received = Arc::new(AtomicUsize::new(0));

        let FakeDevice {
            mut network,
            mut rx,
            ..
        } = device;
        let counter = received.clone();
        let listener = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let err = client.read_property(&read).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout));
        assert_eq!(received.load(Ordering::SeqCst), 3);
        listener.abort();
        network.stop().await.unwrap();
    }

    #[tokio::test]
    async fn ipv6_device_is_unaddressable() {
        let client = client().await;
        let read = request("[::1]:47808".parse().unwrap(), "analogInput:1", PropertyId::PRESENT_VALUE);
        let err = client.read_property(&read).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Unaddressable(_)));
    }

    #[test]
    fn socket_addresses_map_to_bip_macs() {
        let addr: SocketAddr = "10.10.2.30:47808".parse().unwrap();
        let mac = addr_to_mac(addr).unwrap();
        assert_eq!(mac, [10, 10, 2, 30, 0xBA, 0xC0]);
        assert_eq!(mac_to_addr(&mac), Some(addr));
        assert_eq!(mac_to_addr(&[1, 2, 3]), None);
    }

    #[test]
    fn object_ids_survive_the_crate_types() {
        let id: ObjectId = "multiStateValue:4194303".parse().unwrap();
        assert_eq!(object_id(object_identifier(id)), id);
    }
}
