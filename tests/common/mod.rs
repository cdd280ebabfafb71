//! Shared test harness: an in-memory datagram hub and a deterministic clock.
//!
//! Every endpoint registers one queue with the hub; `send_to` routes into the
//! target's queue, `recv_from` pops the own queue. No sockets, no sleeps;
//! tests pass timestamps explicitly.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use kcp_link::{Client, ClientEvent, Config, Server, ServerEvent, Transport};

type Queue = Rc<RefCell<VecDeque<(Vec<u8>, SocketAddr)>>>;
type Routes = Rc<RefCell<HashMap<SocketAddr, Queue>>>;

/// Routing table shared by all transports of one test.
#[derive(Clone, Default)]
pub struct Hub {
    routes: Routes,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint and hand back its transport.
    pub fn transport(&self, addr: SocketAddr) -> MemoryTransport {
        let queue: Queue = Rc::new(RefCell::new(VecDeque::new()));
        self.routes.borrow_mut().insert(addr, queue.clone());
        MemoryTransport {
            addr,
            rx: queue,
            routes: self.routes.clone(),
        }
    }
}

/// In-memory [`Transport`]: perfect, ordered, lossless delivery.
pub struct MemoryTransport {
    addr: SocketAddr,
    rx: Queue,
    routes: Routes,
}

impl Transport for MemoryTransport {
    fn send_to(&mut self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        if let Some(queue) = self.routes.borrow().get(&target) {
            queue.borrow_mut().push_back((buf.to_vec(), self.addr));
        }
        // unknown targets silently eat the datagram, like a real network
        Ok(buf.len())
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.rx.borrow_mut().pop_front() {
            Some((data, from)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(Some((n, from)))
            }
            None => Ok(None),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

pub const SERVER_ADDR: &str = "127.0.0.1:7777";
pub const CLIENT_ADDR: &str = "127.0.0.1:50000";

/// A 1 ms tick cadence configuration for fast deterministic tests.
pub fn test_config() -> Config {
    Config::default().interval(1)
}

/// Build a connected hub with one server and one connecting client at t=0.
pub fn client_server(
    config: Config,
) -> (Client<MemoryTransport>, Server<MemoryTransport>) {
    let hub = Hub::new();
    let server_addr: SocketAddr = SERVER_ADDR.parse().unwrap();
    let client_addr: SocketAddr = CLIENT_ADDR.parse().unwrap();

    let server = Server::new(hub.transport(server_addr), config.clone()).unwrap();
    let client = Client::connect(hub.transport(client_addr), server_addr, config, 0).unwrap();
    (client, server)
}

/// Tick both sides `count` times starting after `start`; returns the final
/// timestamp.
pub fn run_ticks(
    client: &mut Client<MemoryTransport>,
    server: &mut Server<MemoryTransport>,
    start: u32,
    count: u32,
    step: u32,
) -> u32 {
    let mut now = start;
    for _ in 0..count {
        now += step;
        client.tick(now);
        server.tick(now);
    }
    now
}

/// Run the handshake to completion; returns the timestamp afterwards.
pub fn establish(
    client: &mut Client<MemoryTransport>,
    server: &mut Server<MemoryTransport>,
) -> u32 {
    let now = run_ticks(client, server, 0, 10, 1);
    assert!(client.connected(), "handshake must complete within 10 ticks");
    assert_eq!(server.connection_count(), 1);
    now
}

pub fn drain_client(client: &mut Client<MemoryTransport>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Some(event) = client.poll_event() {
        events.push(event);
    }
    events
}

pub fn drain_server(server: &mut Server<MemoryTransport>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Some(event) = server.poll_event() {
        events.push(event);
    }
    events
}
