use bytes::BytesMut;
use rdg_gateway_codec::{
    Error, HEADER_LEN, PacketHeader,
    packet::{ChannelCreate, Packet},
};

#[test]
fn malformed_header_declares_length_shorter_than_header() {
    // spec.md §8 scenario 7: first 8 bytes declare length=4 (< header size).
    let buf = [0u8, 0, 0x01, 0, 0, 0, 4, 0];
    assert!(matches!(PacketHeader::decode(&buf), Err(Error::Malformed(_))));
}

#[test]
fn channel_create_with_multiple_resources_round_trips() {
    let packet = Packet::ChannelCreate(ChannelCreate {
        resource_names: vec![
            "host-a:3389".to_string(),
            "host-b:3389".to_string(),
            "evil:3389".to_string(),
        ],
        protocol: 3,
        port: 3389,
    });

    let mut bytes = BytesMut::new();
    packet.encode(&mut bytes).unwrap();

    let header = PacketHeader::decode(&bytes).unwrap();
    let decoded = Packet::decode(&header, &bytes[HEADER_LEN..]).unwrap();
    assert_eq!(decoded, packet);
}

#[test]
fn body_over_limit_is_rejected_on_encode() {
    use rdg_gateway_codec::packet::Data;

    let packet = Packet::Data(Data {
        payload: vec![0u8; 64 * 1024 + 1],
    });

    let mut bytes = BytesMut::new();
    assert!(matches!(packet.encode(&mut bytes), Err(Error::BodyTooLarge)));
}
