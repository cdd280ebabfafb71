//! Engine integration tests: two engines wired back to back with a manual
//! clock, exercising delivery, reassembly, retransmission, and rejection
//! paths without any I/O.

use bytes::BytesMut;
use kcp_link_core::protocol::constants::*;
use kcp_link_core::protocol::KcpHeader;
use kcp_link_core::{Kcp, KcpConfig, KcpError, NoDelayConfig};

/// Deliver all of src's flushed datagrams into dst.
fn transfer(src: &mut Kcp, dst: &mut Kcp) {
    for pkt in src.drain_output() {
        dst.input(&pkt).expect("conformant peer datagram");
    }
}

/// Drive both engines through `rounds` update/transfer cycles.
fn pump(a: &mut Kcp, b: &mut Kcp, start: u32, rounds: u32, step: u32) {
    for i in 0..rounds {
        let now = start + i * step;
        a.update(now);
        transfer(a, b);
        b.update(now);
        transfer(b, a);
    }
}

fn fast_config() -> KcpConfig {
    KcpConfig {
        nodelay: NoDelayConfig::fast(),
        ..KcpConfig::default()
    }
}

#[test]
fn basic_send_recv() {
    let mut client = Kcp::new(1, fast_config());
    let mut server = Kcp::new(1, fast_config());

    client.update(0);
    server.update(0);
    client.send(b"hello").unwrap();
    pump(&mut client, &mut server, 10, 4, 10);

    let mut buf = [0u8; 64];
    let n = server.recv(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello");
}

#[test]
fn header_byte_layout() {
    let hdr = KcpHeader {
        conv: 0x0403_0201,
        cmd: 0x05,
        frg: 0x06,
        wnd: 0x0807,
        ts: 0x0C0B_0A09,
        sn: 0x100F_0E0D,
        una: 0x1413_1211,
        len: 0,
    };

    // encode at offset 4 to prove position independence
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&[0xAA; 4]);
    hdr.encode(&mut buf);

    assert_eq!(buf.len(), 4 + KcpHeader::SIZE);
    assert_eq!(
        &buf[4..],
        &[
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
            0x0F, 0x10, 0x11, 0x12, 0x13, 0x14, 0x00, 0x00, 0x00, 0x00
        ]
    );
}

#[test]
fn header_decode_roundtrip() {
    let hdr = KcpHeader {
        conv: 77,
        cmd: KCP_CMD_PUSH,
        frg: 3,
        wnd: 128,
        ts: 123_456,
        sn: 42,
        una: 40,
        len: 9,
    };
    let mut buf = BytesMut::new();
    hdr.encode(&mut buf);

    let decoded = KcpHeader::decode(&mut &buf[..]).unwrap();
    assert_eq!(decoded, hdr);
}

#[test]
fn fragmentation_and_reassembly() {
    let mut client = Kcp::new(2, fast_config());
    let mut server = Kcp::new(2, fast_config());
    client.update(0);
    server.update(0);

    // several mss worth of patterned payload
    let payload: Vec<u8> = (0..4000usize).map(|i| (i & 0xFF) as u8).collect();
    client.send(&payload).unwrap();
    pump(&mut client, &mut server, 10, 8, 10);

    let mut buf = vec![0u8; 8192];
    let n = server.recv(&mut buf).unwrap();
    assert_eq!(n, payload.len());
    assert_eq!(&buf[..n], &payload[..]);
    assert!(matches!(
        server.recv(&mut buf),
        Err(KcpError::NoMessageAvailable)
    ));
}

#[test]
fn reordered_datagrams_deliver_in_order() {
    let mut client = Kcp::new(3, fast_config());
    let mut server = Kcp::new(3, fast_config());
    client.update(0);
    server.update(0);

    // one datagram per message so reversal is a real reorder
    for i in 0u8..5 {
        client.send(&[i; 1100]).unwrap();
    }
    client.update(20);

    let mut packets = client.drain_output();
    assert_eq!(packets.len(), 5);
    packets.reverse();
    for pkt in packets {
        server.input(&pkt).unwrap();
    }

    let mut buf = [0u8; 2048];
    for i in 0u8..5 {
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[i; 1100]);
    }
}

#[test]
fn loss_and_duplication_deliver_exactly_once() {
    let mut client = Kcp::new(4, fast_config());
    let mut server = Kcp::new(4, fast_config());
    client.update(0);
    server.update(0);

    // large enough that one flush spans several datagrams
    let expected: Vec<Vec<u8>> = (0u8..10).map(|i| vec![i; 600]).collect();
    for msg in &expected {
        client.send(msg).unwrap();
    }

    let mut received = Vec::new();
    let mut counter = 0u32;
    let mut now = 10;
    let mut buf = [0u8; 1024];

    while received.len() < expected.len() && now < 30_000 {
        client.update(now);
        for pkt in client.drain_output() {
            counter += 1;
            if counter % 3 == 0 {
                continue; // lost
            }
            server.input(&pkt).unwrap();
            if counter % 4 == 0 {
                server.input(&pkt).unwrap(); // duplicated
            }
        }

        server.update(now);
        transfer(&mut server, &mut client);

        while let Ok(n) = server.recv(&mut buf) {
            received.push(buf[..n].to_vec());
        }
        now += 10;
    }

    assert_eq!(received, expected);
}

#[test]
fn peek_size_matches_recv() {
    let mut client = Kcp::new(5, fast_config());
    let mut server = Kcp::new(5, fast_config());
    client.update(0);
    server.update(0);

    let payload = vec![0x5Au8; 3000];
    client.send(&payload).unwrap();
    client.update(10);
    let packets = client.drain_output();
    assert!(packets.len() > 1, "payload should span datagrams");

    // only the first datagram: message incomplete
    server.input(&packets[0]).unwrap();
    assert_eq!(server.peek_size(), None);

    for pkt in &packets[1..] {
        server.input(pkt).unwrap();
    }
    let size = server.peek_size().expect("message complete");
    assert_eq!(size, payload.len());

    let mut buf = vec![0u8; 4096];
    assert_eq!(server.recv(&mut buf).unwrap(), size);
}

#[test]
fn recv_rejects_small_buffer() {
    let mut client = Kcp::new(6, fast_config());
    let mut server = Kcp::new(6, fast_config());
    client.update(0);
    server.update(0);

    client.send(&[0u8; 100]).unwrap();
    pump(&mut client, &mut server, 10, 2, 10);

    let mut tiny = [0u8; 10];
    assert!(matches!(
        server.recv(&mut tiny),
        Err(KcpError::BufferTooSmall {
            required: 100,
            provided: 10
        })
    ));

    // message still intact afterwards
    let mut buf = [0u8; 128];
    assert_eq!(server.recv(&mut buf).unwrap(), 100);
}

#[test]
fn conv_mismatch_is_rejected() {
    let mut client = Kcp::new(100, fast_config());
    let mut server = Kcp::new(999, fast_config());
    client.update(0);
    server.update(0);

    client.send(b"mismatch").unwrap();
    client.update(10);

    for pkt in client.drain_output() {
        assert!(matches!(
            server.input(&pkt),
            Err(KcpError::ConvMismatch {
                expected: 999,
                actual: 100
            })
        ));
    }
    assert_eq!(server.peek_size(), None);
}

#[test]
fn malformed_input_is_rejected() {
    let mut kcp = Kcp::new(7, fast_config());
    kcp.update(0);

    assert!(matches!(
        kcp.input(&[0u8; 10]),
        Err(KcpError::SegmentTooShort(10))
    ));

    // valid size, unknown command byte
    let mut buf = BytesMut::new();
    KcpHeader {
        conv: 7,
        cmd: 99,
        ..KcpHeader::default()
    }
    .encode(&mut buf);
    assert!(matches!(kcp.input(&buf), Err(KcpError::UnknownCommand(99))));

    // declared payload larger than the datagram
    let mut buf = BytesMut::new();
    KcpHeader {
        conv: 7,
        cmd: KCP_CMD_PUSH,
        len: 100,
        ..KcpHeader::default()
    }
    .encode(&mut buf);
    assert!(matches!(
        kcp.input(&buf),
        Err(KcpError::PayloadOverflow {
            declared: 100,
            available: 0
        })
    ));
}

/// Decode the command bytes of every segment packed into one datagram.
fn commands_in(pkt: &[u8]) -> Vec<u8> {
    let mut cmds = Vec::new();
    let mut rest = pkt;
    while let Some(hdr) = KcpHeader::decode(&mut rest) {
        cmds.push(hdr.cmd);
        rest = &rest[hdr.len as usize..];
    }
    cmds
}

#[test]
fn zero_remote_window_triggers_probe() {
    let mut kcp = Kcp::new(8, fast_config());
    kcp.update(0);

    // remote announces a closed window
    let mut buf = BytesMut::new();
    KcpHeader {
        conv: 8,
        cmd: KCP_CMD_ACK,
        wnd: 0,
        ..KcpHeader::default()
    }
    .encode(&mut buf);
    kcp.input(&buf).unwrap();

    // first flush schedules the probe, nothing sent yet
    kcp.update(10);
    assert!(kcp.drain_output().is_empty());

    // after the initial probe delay a WASK goes out
    kcp.update(10 + KCP_PROBE_INIT + 50);
    let packets = kcp.drain_output();
    assert_eq!(packets.len(), 1);
    assert_eq!(commands_in(&packets[0]), vec![KCP_CMD_WASK]);
}

#[test]
fn window_ask_is_answered_with_window_tell() {
    let mut kcp = Kcp::new(9, fast_config());
    kcp.update(0);

    let mut buf = BytesMut::new();
    KcpHeader {
        conv: 9,
        cmd: KCP_CMD_WASK,
        wnd: 128,
        ..KcpHeader::default()
    }
    .encode(&mut buf);
    kcp.input(&buf).unwrap();

    kcp.update(20);
    let packets = kcp.drain_output();
    assert_eq!(packets.len(), 1);
    assert_eq!(commands_in(&packets[0]), vec![KCP_CMD_WINS]);
}

#[test]
fn unanswered_retransmits_kill_the_link() {
    let config = KcpConfig {
        nodelay: NoDelayConfig::fast(),
        dead_link: 3,
        ..KcpConfig::default()
    };
    let mut kcp = Kcp::new(10, config);
    kcp.update(0);
    kcp.send(b"into the void").unwrap();

    let mut now = 0;
    while kcp.state() == 0 && now < 10_000 {
        now += 10;
        kcp.update(now);
        kcp.drain_output(); // wire drops everything
    }

    assert_eq!(kcp.state(), -1, "state must signal the dead link");
}

#[test]
fn check_returns_next_deadline() {
    let mut kcp = Kcp::new(11, fast_config());
    // before the first update, check demands an immediate call
    assert_eq!(kcp.check(0), 0);

    kcp.update(0);
    let next = kcp.check(0);
    assert!(next > 0 && next <= 10, "idle engine waits one interval");

    // overdue clock: immediate again
    assert_eq!(kcp.check(1000), 0);
}

#[test]
fn bulk_transfer_over_lossy_link() {
    let config = KcpConfig {
        nodelay: NoDelayConfig::fast(),
        snd_wnd: 128,
        rcv_wnd: 128,
        ..KcpConfig::default()
    };
    let mut client = Kcp::new(12, config.clone());
    let mut server = Kcp::new(12, config);
    client.update(0);
    server.update(0);

    let expected: Vec<Vec<u8>> = (0..20u32)
        .map(|i| {
            (0..1500usize)
                .map(|j| ((i as usize + j) & 0xFF) as u8)
                .collect()
        })
        .collect();
    for msg in &expected {
        client.send(msg).unwrap();
    }

    let mut received = Vec::new();
    let mut counter = 0u32;
    let mut now = 10;
    let mut buf = vec![0u8; 4096];

    while received.len() < expected.len() && now < 60_000 {
        client.update(now);
        for pkt in client.drain_output() {
            counter += 1;
            if counter % 5 == 0 {
                continue; // 20% loss
            }
            server.input(&pkt).unwrap();
        }

        server.update(now);
        transfer(&mut server, &mut client);

        while let Ok(n) = server.recv(&mut buf) {
            received.push(buf[..n].to_vec());
        }
        now += 10;
    }

    assert_eq!(received.len(), expected.len());
    assert_eq!(received, expected);
}
