//! Handshake scenarios: cookie assignment, event ordering, and the
//! provisional-peer gate that keeps noise out of the connection map.

mod common;

use common::*;
use kcp_link::{ClientEvent, ServerEvent, Transport};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn handshake_round_trip() {
    init_tracing();
    let (mut client, mut server) = client_server(test_config());

    run_ticks(&mut client, &mut server, 0, 10, 1);

    assert!(client.connected());
    assert_eq!(server.connection_count(), 1);

    let client_events = drain_client(&mut client);
    assert!(matches!(client_events.first(), Some(ClientEvent::Connected)));

    let server_events = drain_server(&mut server);
    assert!(matches!(
        server_events.first(),
        Some(ServerEvent::Connected(_))
    ));
}

#[test]
fn server_assigns_nonzero_cookie_and_client_adopts_it() {
    let (mut client, mut server) = client_server(test_config());
    establish(&mut client, &mut server);

    let id = match drain_server(&mut server).first() {
        Some(ServerEvent::Connected(id)) => *id,
        other => panic!("expected Connected event, got {other:?}"),
    };

    let server_cookie = server.peer_mut(id).unwrap().cookie();
    let client_cookie = client.peer_mut().unwrap().cookie();
    assert_ne!(server_cookie, 0);
    assert_eq!(server_cookie, client_cookie);
}

#[test]
fn connection_id_resolves_to_address() {
    let (mut client, mut server) = client_server(test_config());
    establish(&mut client, &mut server);

    let id = match drain_server(&mut server).first() {
        Some(ServerEvent::Connected(id)) => *id,
        other => panic!("expected Connected event, got {other:?}"),
    };

    assert_eq!(server.address_of(id), Some(CLIENT_ADDR.parse().unwrap()));
    assert_eq!(server.address_of(id ^ 1), None);
}

#[test]
fn garbage_first_contact_is_discarded() {
    let hub = Hub::new();
    let server_addr = SERVER_ADDR.parse().unwrap();
    let mut server =
        kcp_link::Server::new(hub.transport(server_addr), test_config()).unwrap();
    let mut noise = hub.transport("127.0.0.1:50001".parse().unwrap());

    // unreliable data without a handshake, then plain junk
    noise
        .send_to(&[2, 0xAA, 0xBB, 0xCC, 0xDD, 2, 1, 2, 3], server_addr)
        .unwrap();
    noise.send_to(&[0xFF; 48], server_addr).unwrap();

    for now in 1..=5 {
        server.tick(now);
    }

    assert_eq!(server.connection_count(), 0);
    assert!(drain_server(&mut server).is_empty());
}

#[test]
fn two_clients_multiplex_on_one_server() {
    let hub = Hub::new();
    let server_addr: std::net::SocketAddr = SERVER_ADDR.parse().unwrap();
    let mut server =
        kcp_link::Server::new(hub.transport(server_addr), test_config()).unwrap();

    let mut alice = kcp_link::Client::connect(
        hub.transport("127.0.0.1:50010".parse().unwrap()),
        server_addr,
        test_config(),
        0,
    )
    .unwrap();
    let mut bob = kcp_link::Client::connect(
        hub.transport("127.0.0.1:50011".parse().unwrap()),
        server_addr,
        test_config(),
        0,
    )
    .unwrap();

    for now in 1..=10 {
        alice.tick(now);
        bob.tick(now);
        server.tick(now);
    }

    assert!(alice.connected());
    assert!(bob.connected());
    assert_eq!(server.connection_count(), 2);

    // ids are distinct and both route back to their own address
    let ids: Vec<_> = drain_server(&mut server)
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::Connected(id) => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}
