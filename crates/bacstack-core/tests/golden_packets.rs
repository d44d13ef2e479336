use bacstack_core::address::{Address, Mac};
use bacstack_core::encoding::{Reader, Writer};
use bacstack_core::npdu::{NetworkPriority, Npci, NpduAddress};

#[cfg(feature = "alloc")]
use bacstack_core::npdu::{NetworkMessage, RejectReason, RoutingTableEntry};

#[test]
fn plain_apdu_frame_matches_fixture() {
    let mut buf = [0u8; 32];
    let mut w = Writer::new(&mut buf);
    Npci::new().encode(&mut w).unwrap();
    // Unconfirmed Who-Is, as the application layer would hand it down.
    w.write_all(&[0x10, 0x08]).unwrap();

    assert_eq!(w.as_written(), &[0x01, 0x00, 0x10, 0x08]);
}

#[test]
fn expecting_reply_urgent_frame_matches_fixture() {
    let mut npci = Npci::new();
    npci.expecting_reply = true;
    npci.priority = NetworkPriority::Urgent;

    let mut buf = [0u8; 8];
    let mut w = Writer::new(&mut buf);
    npci.encode(&mut w).unwrap();

    assert_eq!(w.as_written(), &[0x01, 0x05]);
}

#[cfg(feature = "alloc")]
#[test]
fn who_is_router_broadcast_frame_matches_fixture() {
    // Router discovery for network 443, sent to the global broadcast with
    // a fresh hop count.
    let msg = NetworkMessage::WhoIsRouterToNetwork { network: Some(443) };
    let mut npci = Npci::new();
    npci.destination = NpduAddress::from_destination(&Address::global_broadcast());
    npci.message_type = Some(msg.message_type());

    let mut buf = [0u8; 32];
    let mut w = Writer::new(&mut buf);
    npci.encode(&mut w).unwrap();
    msg.encode(&mut w).unwrap();

    assert_eq!(
        w.as_written(),
        &[0x01, 0xA0, 0xFF, 0xFF, 0x00, 0xFF, 0x00, 0x01, 0xBB]
    );
}

#[cfg(feature = "alloc")]
#[test]
fn i_am_router_frame_matches_fixture() {
    let msg = NetworkMessage::IAmRouterToNetwork {
        networks: vec![1, 443],
    };
    let mut npci = Npci::new();
    npci.message_type = Some(msg.message_type());

    let mut buf = [0u8; 32];
    let mut w = Writer::new(&mut buf);
    npci.encode(&mut w).unwrap();
    msg.encode(&mut w).unwrap();

    assert_eq!(w.as_written(), &[0x01, 0x80, 0x01, 0x00, 0x01, 0x01, 0xBB]);
}

#[test]
fn relayed_apdu_frame_matches_fixture() {
    // One hop into a relay: destination still two networks away, source
    // stamped by the first router, hop count already decremented.
    let mut npci = Npci::new();
    npci.destination = Some(NpduAddress {
        network: 2,
        mac: Mac::from_octet(5),
    });
    npci.source = Some(NpduAddress {
        network: 1,
        mac: Mac::new(&[10, 0, 0, 1, 0xBA, 0xC0]).unwrap(),
    });
    npci.hop_count = Some(254);

    let mut buf = [0u8; 32];
    let mut w = Writer::new(&mut buf);
    npci.encode(&mut w).unwrap();
    w.write_all(&[0xDE, 0xAD]).unwrap();

    assert_eq!(
        w.as_written(),
        &[
            0x01, 0x28, 0x00, 0x02, 0x01, 0x05, 0x00, 0x01, 0x06, 0x0A, 0x00, 0x00, 0x01, 0xBA,
            0xC0, 0xFE, 0xDE, 0xAD,
        ]
    );
}

#[cfg(feature = "alloc")]
#[test]
fn reject_message_frame_matches_fixture() {
    let msg = NetworkMessage::RejectMessageToNetwork {
        reason: RejectReason::NoRouteToNetwork,
        network: 99,
    };
    let mut npci = Npci::new();
    npci.message_type = Some(msg.message_type());

    let mut buf = [0u8; 16];
    let mut w = Writer::new(&mut buf);
    npci.encode(&mut w).unwrap();
    msg.encode(&mut w).unwrap();

    assert_eq!(w.as_written(), &[0x01, 0x80, 0x03, 0x01, 0x00, 0x63]);
}

#[cfg(feature = "alloc")]
#[test]
fn network_number_is_frame_matches_fixture() {
    let msg = NetworkMessage::NetworkNumberIs {
        network: 88,
        configured: true,
    };
    let mut npci = Npci::new();
    npci.message_type = Some(msg.message_type());

    let mut buf = [0u8; 16];
    let mut w = Writer::new(&mut buf);
    npci.encode(&mut w).unwrap();
    msg.encode(&mut w).unwrap();

    assert_eq!(w.as_written(), &[0x01, 0x80, 0x13, 0x00, 0x58, 0x01]);
}

#[cfg(feature = "alloc")]
#[test]
fn routing_table_ack_fixture_decodes_expected() {
    let fixture = [
        0x01, 0x80, // version, network message
        0x07, // Initialize-Routing-Table-Ack
        0x01, // one entry
        0x01, 0xBB, // network 443
        0x02, // port id 2
        0x06, // port info length
        0xC0, 0xA8, 0x01, 0x02, 0xBA, 0xC0, // 192.168.1.2:47808
    ];

    let mut r = Reader::new(&fixture);
    let npci = Npci::decode(&mut r).unwrap();
    assert_eq!(npci.message_type, Some(0x07));

    let msg = NetworkMessage::decode(0x07, &mut r).unwrap();
    assert_eq!(
        msg,
        NetworkMessage::InitializeRoutingTableAck {
            entries: vec![RoutingTableEntry {
                network: 443,
                port_id: 2,
                port_info: vec![0xC0, 0xA8, 0x01, 0x02, 0xBA, 0xC0],
            }],
        }
    );
}

#[test]
fn forwarded_broadcast_fixture_decodes_expected() {
    // A globally broadcast APDU as it arrives off the wire from a router.
    let fixture = [
        0x01, 0x28, // version, destination and source present
        0xFF, 0xFF, 0x00, // DNET global broadcast, DLEN 0
        0x00, 0x01, 0x01, 0x63, // SNET 1, SLEN 1, station 99
        0x42, // hop count
        0x10, 0x08, // Who-Is
    ];

    let mut r = Reader::new(&fixture);
    let npci = Npci::decode(&mut r).unwrap();
    assert_eq!(
        npci.destination.unwrap().to_destination(),
        Address::global_broadcast()
    );
    assert_eq!(
        npci.source.unwrap().to_source(),
        Address::remote_station(1, Mac::from_octet(99))
    );
    assert_eq!(npci.hop_count, Some(0x42));
    assert_eq!(r.read_remaining(), &[0x10, 0x08]);
}
