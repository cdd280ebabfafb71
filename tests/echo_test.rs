//! Message delivery scenarios across both channels: tiny payloads, the
//! maximum reliable size, fragmented sequences, and ordering.

mod common;

use common::*;
use kcp_link::{reliable_max_message_size, Channel, ClientEvent, Config, ServerEvent};

#[test]
fn tiny_reliable_message() {
    let (mut client, mut server) = client_server(test_config());
    let now = establish(&mut client, &mut server);
    drain_server(&mut server);

    client.send(&[0x01, 0x02], Channel::Reliable).unwrap();
    run_ticks(&mut client, &mut server, now, 5, 1);

    let received: Vec<_> = drain_server(&mut server)
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::Data(_, data, channel) => Some((data, channel)),
            _ => None,
        })
        .collect();

    assert_eq!(received.len(), 1, "exactly one message");
    assert_eq!(&received[0].0[..], &[0x01, 0x02]);
    assert_eq!(received[0].1, Channel::Reliable);
}

#[test]
fn echo_both_directions() {
    let (mut client, mut server) = client_server(test_config());
    let now = establish(&mut client, &mut server);
    let id = match drain_server(&mut server).first() {
        Some(ServerEvent::Connected(id)) => *id,
        other => panic!("expected Connected, got {other:?}"),
    };

    client.send(b"marco", Channel::Reliable).unwrap();
    // the engine flushes on a 10 ms cadence even when ticked every 1 ms
    let now = run_ticks(&mut client, &mut server, now, 15, 1);

    for event in drain_server(&mut server) {
        if let ServerEvent::Data(from, data, channel) = event {
            assert_eq!(from, id);
            assert_eq!(&data[..], b"marco");
            server.send(id, b"polo", channel).unwrap();
        }
    }
    run_ticks(&mut client, &mut server, now, 15, 1);

    let echoed: Vec<_> = drain_client(&mut client)
        .into_iter()
        .filter_map(|event| match event {
            ClientEvent::Data(data, _) => Some(data),
            _ => None,
        })
        .collect();
    assert_eq!(echoed.len(), 1);
    assert_eq!(&echoed[0][..], b"polo");
}

#[test]
fn max_size_reliable_message() {
    let config = Config::default().interval(1).window_size(128 * 1000, 128 * 1000);
    let (mut client, mut server) = client_server(config.clone());
    let now = establish(&mut client, &mut server);
    drain_server(&mut server);

    let max = reliable_max_message_size(config.mtu, config.receive_window_size);
    let payload: Vec<u8> = (0..max).map(|i| (i & 0xFF) as u8).collect();
    client.send(&payload, Channel::Reliable).unwrap();

    // one byte more must be refused outright
    let oversize = vec![0u8; max + 1];
    assert!(client.send(&oversize, Channel::Reliable).is_err());

    run_ticks(&mut client, &mut server, now, 30, 1);

    let received: Vec<_> = drain_server(&mut server)
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::Data(_, data, _) => Some(data),
            _ => None,
        })
        .collect();

    assert_eq!(received.len(), 1, "exactly once");
    assert_eq!(received[0].len(), payload.len());
    assert_eq!(&received[0][..], &payload[..]);
}

#[test]
fn fragmented_sequence_integrity() {
    let config = Config::default().interval(1).window_size(128 * 1000, 128 * 1000);
    let (mut client, mut server) = client_server(config.clone());
    let now = establish(&mut client, &mut server);
    drain_server(&mut server);

    let max = reliable_max_message_size(config.mtu, config.receive_window_size);
    let payloads: Vec<Vec<u8>> = (0..10u8)
        .map(|m| (0..max).map(|i| (i as u8).wrapping_add(m)).collect())
        .collect();

    // all ten queued before any tick moves a byte
    for payload in &payloads {
        client.send(payload, Channel::Reliable).unwrap();
    }
    run_ticks(&mut client, &mut server, now, 60, 1);

    let received: Vec<_> = drain_server(&mut server)
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::Data(_, data, _) => Some(data),
            _ => None,
        })
        .collect();

    assert_eq!(received.len(), payloads.len(), "all delivered exactly once");
    for (got, want) in received.iter().zip(&payloads) {
        assert_eq!(&got[..], &want[..], "original order and bytes preserved");
    }
}

#[test]
fn many_small_messages_keep_order() {
    let (mut client, mut server) = client_server(test_config());
    let now = establish(&mut client, &mut server);
    drain_server(&mut server);

    for i in 0u16..200 {
        client.send(&i.to_le_bytes(), Channel::Reliable).unwrap();
    }
    // the default 32-segment send window drains over several flush rounds
    run_ticks(&mut client, &mut server, now, 120, 1);

    let received: Vec<u16> = drain_server(&mut server)
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::Data(_, data, _) => {
                Some(u16::from_le_bytes([data[0], data[1]]))
            }
            _ => None,
        })
        .collect();

    assert_eq!(received, (0u16..200).collect::<Vec<_>>());
}
