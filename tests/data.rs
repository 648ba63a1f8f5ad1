mod common;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use tapstack::header::TcpFlags;
use tapstack::tcp::TimerKind;
use tapstack::time::ManualClock;
use tapstack::{Error, State, TcpConfig, TcpEvent};

fn read_all(endpoint: &Endpoint, quad: &tapstack::Quad) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 700];
    loop {
        match endpoint.tcp.recv(quad, &mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => panic!("recv failed: {e}"),
        }
    }
    out
}

#[test]
fn data_flows_both_ways() {
    let (client, server) = established_pair();

    assert_eq!(client.tcp.send(&client_quad(), b"hello").unwrap(), 5);
    pump(&client, &server);
    assert_eq!(
        server.events(),
        vec![TcpEvent::Readable {
            quad: server_quad()
        }]
    );
    assert_eq!(read_all(&server, &server_quad()), b"hello");

    server.tcp.send(&server_quad(), b"world!").unwrap();
    pump(&client, &server);
    assert_eq!(read_all(&client, &client_quad()), b"world!");

    let c = client.tcp.info(&client_quad()).unwrap();
    assert_eq!((c.snd_una, c.snd_nxt, c.rcv_nxt), (106, 106, 507));
    assert_eq!(c.unacked_segments, 0);
    assert!(!c.timers.contains(&TimerKind::Retransmission));
}

#[test]
fn large_writes_are_split_by_mss() {
    let (client, server) = established_pair();
    let data: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
    client.tcp.send(&client_quad(), &data).unwrap();

    let segments = client.sent();
    let sizes: Vec<usize> = segments.iter().map(|s| s.payload().len()).collect();
    assert_eq!(sizes, vec![1460, 1460, 1460, 620]);
    assert!(segments
        .iter()
        .all(|s| s.flags() == TcpFlags::ACK | TcpFlags::PSH));

    for s in &segments {
        server.tcp.process_segment(s.source, s.destination, &s.bytes);
    }
    pump(&client, &server);
    assert_eq!(read_all(&server, &server_quad()), data);
    assert_eq!(client.tcp.info(&client_quad()).unwrap().unacked_segments, 0);
}

#[test]
fn sending_stops_at_the_peer_window() {
    let (_client, server) = pair();
    Peer::handshake(&server, 1000);
    server.tcp.send(&server_quad(), &[1u8; 3000]).unwrap();

    let sent = server.sent();
    let total: usize = sent.iter().map(|s| s.payload().len()).sum();
    assert_eq!(total, 1000);
    let info = server.tcp.info(&server_quad()).unwrap();
    assert_eq!(info.send_queue, 2000);

    // acknowledging half the window lets 500 more out
    Peer::send(&server.tcp, TcpFlags::ACK, 1001, 1001, 1000, &[]);
    let total: usize = server.sent().iter().map(|s| s.payload().len()).sum();
    assert_eq!(total, 500);
}

#[test]
fn duplicate_data_is_acked_not_delivered() {
    let (_client, server) = pair();
    Peer::handshake(&server, 8000);

    Peer::send(&server.tcp, TcpFlags::ACK | TcpFlags::PSH, 1001, 501, 8000, b"hello");
    let ack = server.sent();
    assert_eq!(ack.len(), 1);
    assert_eq!(ack[0].ack(), 1006);

    Peer::send(&server.tcp, TcpFlags::ACK | TcpFlags::PSH, 1001, 501, 8000, b"hello");
    let dup = server.sent();
    assert_eq!(dup.len(), 1);
    assert_eq!(dup[0].flags(), TcpFlags::ACK);
    assert_eq!((dup[0].seq(), dup[0].ack()), (501, 1006));

    let info = server.tcp.info(&server_quad()).unwrap();
    assert_eq!(info.rcv_nxt, 1006);
    assert_eq!(info.recv_queue, 5);
}

#[test]
fn overlapping_data_is_trimmed() {
    let (_client, server) = pair();
    Peer::handshake(&server, 8000);
    Peer::send(&server.tcp, TcpFlags::ACK, 1001, 501, 8000, b"hel");
    Peer::send(&server.tcp, TcpFlags::ACK, 1001, 501, 8000, b"hello");
    assert_eq!(read_all(&server, &server_quad()), b"hello");
    assert_eq!(server.tcp.info(&server_quad()).unwrap().rcv_nxt, 1006);
}

#[test]
fn out_of_order_data_is_dropped_with_duplicate_ack() {
    let (_client, server) = pair();
    Peer::handshake(&server, 8000);

    Peer::send(&server.tcp, TcpFlags::ACK, 1011, 501, 8000, b"world");
    let ack = server.sent();
    assert_eq!(ack.len(), 1);
    assert_eq!(ack[0].ack(), 1001);

    let info = server.tcp.info(&server_quad()).unwrap();
    assert_eq!(info.rcv_nxt, 1001);
    assert_eq!(info.recv_queue, 0);

    // the gap is filled by the retransmission
    Peer::send(&server.tcp, TcpFlags::ACK, 1001, 501, 8000, b"0123456789");
    assert_eq!(server.sent()[0].ack(), 1011);
}

#[test]
fn older_window_update_is_ignored() {
    let (_client, server) = pair();
    Peer::handshake(&server, 1000);
    server.tcp.send(&server_quad(), b"xyz").unwrap();
    server.sent();

    Peer::send(&server.tcp, TcpFlags::ACK, 1001, 504, 5000, &[]);
    let info = server.tcp.info(&server_quad()).unwrap();
    assert_eq!((info.snd_wnd, info.snd_wl1, info.snd_wl2), (5000, 1001, 504));

    // reordered ACK from before the last update
    Peer::send(&server.tcp, TcpFlags::ACK, 1001, 502, 10, &[]);
    let info = server.tcp.info(&server_quad()).unwrap();
    assert_eq!((info.snd_wnd, info.snd_wl2), (5000, 504));
    assert_eq!(info.snd_una, 504);
}

#[test]
fn ack_for_unsent_data_is_answered() {
    let (_client, server) = pair();
    Peer::handshake(&server, 1000);
    Peer::send(&server.tcp, TcpFlags::ACK, 1001, 900, 1000, b"ignored");

    let reply = server.sent();
    assert_eq!(reply.len(), 1);
    assert_eq!((reply[0].seq(), reply[0].ack()), (501, 1001));
    assert_eq!(server.tcp.info(&server_quad()).unwrap().recv_queue, 0);
}

#[test]
fn corrupted_checksum_changes_nothing() {
    let (_client, server) = pair();
    Peer::handshake(&server, 8000);
    let before = server.tcp.info(&server_quad()).unwrap();

    let mut bytes = Peer::segment(TcpFlags::ACK | TcpFlags::PSH, 1001, 501, 8000, b"hello");
    let last = bytes.len() - 1;
    bytes[last] ^= 0x20;
    server.tcp.process_segment(CLIENT, SERVER, &bytes);

    assert!(server.sent().is_empty());
    assert!(server.events().is_empty());
    let after = server.tcp.info(&server_quad()).unwrap();
    assert_eq!(after.rcv_nxt, before.rcv_nxt);
    assert_eq!(after.snd_wnd, before.snd_wnd);
    assert_eq!(after.recv_queue, 0);
    assert_eq!(after.state, State::Established);
}

#[test]
fn in_window_syn_gets_challenge_ack() {
    let (_client, server) = pair();
    Peer::handshake(&server, 8000);
    Peer::send(&server.tcp, TcpFlags::SYN, 1500, 0, 8000, &[]);

    let reply = server.sent();
    assert_eq!(reply.len(), 1);
    assert_eq!(reply[0].flags(), TcpFlags::ACK);
    assert_eq!(reply[0].ack(), 1001);
    assert_eq!(server.tcp.state(&server_quad()), Some(State::Established));
}

#[test]
fn urgent_pointer_is_tracked() {
    let (_client, server) = pair();
    Peer::handshake(&server, 8000);
    let bytes = Peer::segment(TcpFlags::ACK | TcpFlags::URG, 1001, 501, 8000, b"!!");
    let (mut header, _) = etherparse::TcpHeader::from_slice(&bytes).unwrap();
    header.urgent_pointer = 2;
    let bytes = tapstack::header::encode_segment(&mut header, CLIENT, SERVER, b"!!").unwrap();
    server.tcp.process_segment(CLIENT, SERVER, &bytes);

    assert_eq!(server.tcp.info(&server_quad()).unwrap().rcv_up, 1003);
}

#[test]
fn recv_would_block_until_data_then_zero_after_fin() {
    let (_client, server) = pair();
    Peer::handshake(&server, 8000);
    let mut buf = [0u8; 16];

    match server.tcp.recv(&server_quad(), &mut buf) {
        Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::WouldBlock),
        other => panic!("expected WouldBlock, got {other:?}"),
    }

    Peer::send(&server.tcp, TcpFlags::ACK | TcpFlags::FIN, 1001, 501, 8000, b"bye");
    let ack = server.sent();
    assert_eq!(ack.len(), 1);
    assert_eq!(ack[0].ack(), 1005);
    assert_eq!(server.tcp.state(&server_quad()), Some(State::CloseWait));

    assert_eq!(server.tcp.recv(&server_quad(), &mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"bye");
    assert_eq!(server.tcp.recv(&server_quad(), &mut buf).unwrap(), 0);
    assert_eq!(
        server.events(),
        vec![
            TcpEvent::Readable {
                quad: server_quad()
            },
            TcpEvent::PeerClosed {
                quad: server_quad()
            },
        ]
    );
}

#[test]
fn unknown_connection_is_not_connected() {
    let (client, _server) = pair();
    assert!(matches!(
        client.tcp.send(&client_quad(), b"x"),
        Err(Error::NotConnected)
    ));
}

#[test]
fn data_queued_during_handshake_goes_out_once_established() {
    let (client, server) = pair();
    client
        .tcp
        .connect_from(CLIENT_PORT, server_addr())
        .unwrap();
    client.tcp.send(&client_quad(), b"early").unwrap();
    assert_eq!(client.tcp.info(&client_quad()).unwrap().send_queue, 5);

    pump(&client, &server);
    assert_eq!(read_all(&server, &server_quad()), b"early");
    assert_eq!(client.tcp.info(&client_quad()).unwrap().send_queue, 0);
}

#[test]
fn zero_window_sends_persist_probes() {
    let (_client, server) = pair();
    Peer::handshake(&server, 0);

    assert_eq!(server.tcp.send(&server_quad(), b"hello").unwrap(), 5);
    assert!(server.sent().is_empty());
    let info = server.tcp.info(&server_quad()).unwrap();
    assert!(info.timers.contains(&TimerKind::Persist));
    assert!(!info.timers.contains(&TimerKind::Retransmission));

    server.advance(Duration::from_secs(5));
    let probe = server.sent();
    assert_eq!(probe.len(), 1);
    assert_eq!(probe[0].seq(), 501);
    assert_eq!(probe[0].payload(), b"h");

    // backoff doubled to 10s
    server.advance(Duration::from_secs(5));
    assert!(server.sent().is_empty());
    server.advance(Duration::from_secs(5));
    let probe = server.sent();
    assert_eq!(probe.len(), 1);
    assert_eq!((probe[0].seq(), probe[0].payload()), (501, b"h".to_vec()));

    // the window opens and the rest follows
    Peer::send(&server.tcp, TcpFlags::ACK, 1001, 502, 1000, &[]);
    let rest = server.sent();
    assert_eq!(rest.len(), 1);
    assert_eq!((rest[0].seq(), rest[0].payload()), (502, b"ello".to_vec()));
    let info = server.tcp.info(&server_quad()).unwrap();
    assert!(!info.timers.contains(&TimerKind::Persist));
    assert!(info.timers.contains(&TimerKind::Retransmission));
}

#[test]
fn reading_reopens_the_window() {
    let clock = Arc::new(ManualClock::new());
    let config = TcpConfig {
        recv_buffer: 2000,
        ..TcpConfig::default()
    };
    let server = Endpoint::new(SERVER, 500, &clock, config);
    server.tcp.listen(SERVER_PORT).unwrap();
    Peer::handshake(&server, 8000);

    Peer::send(&server.tcp, TcpFlags::ACK, 1001, 501, 8000, &[b'a'; 1000]);
    Peer::send(&server.tcp, TcpFlags::ACK, 2001, 501, 8000, &[b'b'; 1000]);
    let acks = server.sent();
    assert_eq!(acks.last().unwrap().segment().window(), 0);

    // a full window is refused outright
    Peer::send(&server.tcp, TcpFlags::ACK, 3001, 501, 8000, b"c");
    assert_eq!(server.sent()[0].ack(), 3001);

    let mut buf = [0u8; 500];
    server.tcp.recv(&server_quad(), &mut buf).unwrap();
    assert!(server.sent().is_empty());

    let mut buf = [0u8; 100];
    server.tcp.recv(&server_quad(), &mut buf).unwrap();
    let update = server.sent();
    assert_eq!(update.len(), 1);
    assert_eq!(update[0].flags(), TcpFlags::ACK);
    assert_eq!(update[0].segment().window(), 600);
}
