//! Behavioural tests for the daemon TCP listener.

use std::cell::RefCell;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::{Duration, Instant};

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::transport::{CountingHandler, ListenerError, ListenerHandle, SocketListener};

const LOOPBACK: &str = "127.0.0.1";

#[derive(Default)]
struct ListenerWorld {
    handle: Option<ListenerHandle>,
    accepted: Arc<AtomicUsize>,
    address: Option<SocketAddr>,
    occupied: Option<TcpListener>,
    error: Option<ListenerError>,
}

impl ListenerWorld {
    fn bind(&mut self, port: u16) {
        let (count, handler) = CountingHandler::new();
        self.accepted = count;
        let started = SocketListener::bind(LOOPBACK, port).and_then(|listener| {
            self.address = Some(listener.local_addr());
            listener.start(handler)
        });
        match started {
            Ok(handle) => self.handle = Some(handle),
            Err(error) => self.error = Some(error),
        }
    }

    fn occupied_port(&self) -> u16 {
        self.occupied
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
            .map(|addr| addr.port())
            .expect("a port should be occupied")
    }

    fn await_accepted(&self, expected: usize) -> usize {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let seen = self.accepted.load(Ordering::SeqCst);
            if seen >= expected || Instant::now() >= deadline {
                return seen;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for ListenerWorld {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
            drop(handle.join());
        }
    }
}

#[fixture]
fn world() -> RefCell<ListenerWorld> {
    RefCell::new(ListenerWorld::default())
}

#[given("a listener bound to port 0 on the loopback interface")]
fn given_ephemeral_listener(world: &RefCell<ListenerWorld>) {
    world.borrow_mut().bind(0);
    if let Some(error) = world.borrow().error.as_ref() {
        panic!("listener failed to start: {error}");
    }
}

#[given("another socket already holds a loopback port")]
fn given_occupied_port(world: &RefCell<ListenerWorld>) {
    let socket = TcpListener::bind((LOOPBACK, 0)).expect("bind occupying socket");
    world.borrow_mut().occupied = Some(socket);
}

#[when("{count} clients connect")]
fn when_clients_connect(world: &RefCell<ListenerWorld>, count: usize) {
    let addr = world.borrow().address.expect("listener address");
    let clients: Vec<TcpStream> = (0..count)
        .map(|_| TcpStream::connect(addr).expect("connect client"))
        .collect();
    drop(clients);
}

#[when("a listener binds the same port")]
fn when_listener_binds_same_port(world: &RefCell<ListenerWorld>) {
    let port = world.borrow().occupied_port();
    world.borrow_mut().bind(port);
}

#[then("the listener reports a non-zero loopback port")]
fn then_ephemeral_port(world: &RefCell<ListenerWorld>) {
    let addr = world.borrow().address.expect("listener address");
    assert!(addr.ip().is_loopback());
    assert_ne!(addr.port(), 0);
}

#[then("the handler sees {count} connections")]
fn then_handler_sees(world: &RefCell<ListenerWorld>, count: usize) {
    let seen = world.borrow().await_accepted(count);
    assert_eq!(seen, count);
}

#[then("binding fails with an address error")]
fn then_binding_fails(world: &RefCell<ListenerWorld>) {
    let state = world.borrow();
    assert!(state.handle.is_none());
    assert!(
        matches!(state.error, Some(ListenerError::BindTcp { .. })),
        "unexpected outcome: {:?}",
        state.error
    );
}

#[scenario(path = "tests/features/daemon_socket.feature")]
fn daemon_socket_listener(#[from(world)] world: RefCell<ListenerWorld>) {
    drop(world);
}
