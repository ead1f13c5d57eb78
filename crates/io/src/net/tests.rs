use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use super::*;
use crate::events::EventSource;
use crate::runtime::{EventLoop, next_tick};

type Log = Rc<RefCell<Vec<String>>>;

fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn record(log: &Log, entry: impl Into<String>) {
    log.borrow_mut().push(entry.into());
}

fn run<F: FnOnce()>(setup: F) {
    let event_loop = EventLoop::new().unwrap();
    assert!(event_loop.run_for(Duration::from_secs(10), setup), "event loop did not drain");
}

fn local_listen() -> ListenOptions {
    ListenOptions::tcp(0).host("127.0.0.1")
}

fn port_of(server: &Server) -> u16 {
    server.address().and_then(|address| address.port()).unwrap()
}

/// A loopback port nothing listens on.
fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn loopback_ping() {
    let log = new_log();
    let received = Rc::new(RefCell::new(Vec::new()));

    let (log_in, received_in) = (Rc::clone(&log), Rc::clone(&received));
    run(move || {
        let server = Server::new();

        let closer = server.clone();
        let server_log = Rc::clone(&log_in);
        server.on(ServerEventKind::Connection, move |event| {
            let ServerEvent::Connection(socket) = event else { return };
            record(&server_log, "connection");

            let connect_log = Rc::clone(&server_log);
            socket.on(SocketEventKind::Connect, move |_| record(&connect_log, "server socket connect"));
            let data = Rc::clone(&received_in);
            socket.on(SocketEventKind::Data, move |event| {
                if let SocketEvent::Data(chunk) = event {
                    data.borrow_mut().extend_from_slice(chunk.as_bytes());
                }
            });
            let end_log = Rc::clone(&server_log);
            socket.on(SocketEventKind::End, move |_| record(&end_log, "server socket end"));
            let closer = closer.clone();
            socket.on(SocketEventKind::Close, move |_| {
                closer.close();
            });
        });
        let close_log = Rc::clone(&log_in);
        server.on(ServerEventKind::Close, move |_| record(&close_log, "server close"));

        let listening = server.clone();
        let client_log = Rc::clone(&log_in);
        assert!(server.listen_with(local_listen(), move || {
            let client = Socket::new();
            let connect_log = Rc::clone(&client_log);
            assert!(client.connect_with(("127.0.0.1", port_of(&listening)), move || record(&connect_log, "client connect")));
            assert!(!client.write("ping"));
            assert!(client.end());
            let close_log = Rc::clone(&client_log);
            client.on(SocketEventKind::Close, move |event| {
                if let SocketEvent::Close { had_error } = event {
                    record(&close_log, format!("client close {had_error}"));
                }
            });
        }));
    });

    assert_eq!(received.borrow().as_slice(), b"ping");
    let log = log.borrow();
    let position = |entry: &str| log.iter().position(|e| e == entry).unwrap_or_else(|| panic!("missing {entry}: {log:?}"));
    assert!(position("connection") < position("server socket connect"));
    assert!(position("server socket end") < position("server close"));
    position("client connect");
    position("client close false");
}

#[test]
fn writes_before_connect_are_flushed_in_order() {
    let log = new_log();
    let received = Rc::new(RefCell::new(String::new()));

    let (log_in, received_in) = (Rc::clone(&log), Rc::clone(&received));
    run(move || {
        let server = create_server(move |socket| {
            assert!(socket.set_encoding("utf8"));
            let data = Rc::clone(&received_in);
            socket.on(SocketEventKind::Data, move |event| {
                if let SocketEvent::Data(chunk) = event {
                    data.borrow_mut().push_str(std::str::from_utf8(chunk.as_bytes()).unwrap());
                }
            });
        });
        let closer = server.clone();
        server.on(ServerEventKind::Connection, move |event| {
            let ServerEvent::Connection(socket) = event else { return };
            let closer = closer.clone();
            socket.on(SocketEventKind::Close, move |_| {
                closer.close();
            });
        });

        let listening = server.clone();
        server.listen_with(local_listen(), move || {
            let client = create_connection(("127.0.0.1", port_of(&listening)));
            for part in ["a", "b", "c"] {
                let write_log = Rc::clone(&log_in);
                assert!(!client.write_with(part, move || record(&write_log, format!("flushed {part}"))));
            }
            assert_eq!(client.buffer_size(), 3);

            let drain_log = Rc::clone(&log_in);
            let ender = client.clone();
            client.on(SocketEventKind::Drain, move |_| {
                record(&drain_log, "drain");
                ender.end();
            });
        });
    });

    assert_eq!(*received.borrow(), "abc");
    assert_eq!(*log.borrow(), ["flushed a", "flushed b", "flushed c", "drain"]);
}

#[test]
fn failed_connect_drops_queued_writes() {
    let log = new_log();
    let flushed = Rc::new(Cell::new(false));

    let (log_in, flushed_in) = (Rc::clone(&log), Rc::clone(&flushed));
    run(move || {
        let client = Socket::new();
        client.connect(("127.0.0.1", closed_port()));
        assert_eq!(client.state(), SocketState::Connecting);

        let flag = Rc::clone(&flushed_in);
        assert!(!client.write_with("lost", move || flag.set(true)));
        assert!(!client.write("also lost"));

        let error_log = Rc::clone(&log_in);
        client.on(SocketEventKind::Error, move |event| {
            if let SocketEvent::Error(error) = event {
                record(&error_log, format!("error {}", error.code()));
            }
        });
        let close_log = Rc::clone(&log_in);
        let after = client.clone();
        client.on(SocketEventKind::Close, move |event| {
            if let SocketEvent::Close { had_error } = event {
                record(&close_log, format!("close {had_error}"));
            }
            assert!(!after.write("too late"));
        });
    });

    assert_eq!(*log.borrow(), ["error ECONNREFUSED", "close true"]);
    assert!(!flushed.get());
}

#[test]
fn server_close_waits_for_connections_to_drain() {
    let log = new_log();

    let log_in = Rc::clone(&log);
    run(move || {
        let server = Server::new();

        let closer = server.clone();
        let server_log = Rc::clone(&log_in);
        server.on(ServerEventKind::Connection, move |event| {
            let ServerEvent::Connection(socket) = event else { return };

            let close_log = Rc::clone(&server_log);
            assert!(closer.close_with(move || record(&close_log, "server close")));
            assert!(!closer.close());
            assert_eq!(closer.connections(), 1);
            assert_eq!(closer.state(), ServerState::Closed);

            let tick_log = Rc::clone(&server_log);
            let pending = closer.clone();
            next_tick(move || record(&tick_log, format!("connections {}", pending.connections())));

            let socket_log = Rc::clone(&server_log);
            socket.on(SocketEventKind::Close, move |_| record(&socket_log, "socket close"));
            socket.end_with("bye");
        });

        let listening = server.clone();
        server.listen_with(local_listen(), move || {
            let client = create_connection(("127.0.0.1", port_of(&listening)));
            client.on(SocketEventKind::Data, |_| {});
        });
    });

    assert_eq!(*log.borrow(), ["connections 1", "socket close", "server close"]);
}

#[test]
fn second_listen_is_rejected() {
    let errors = Rc::new(Cell::new(0));

    let errors_in = Rc::clone(&errors);
    run(move || {
        let server = Server::new();
        let counter = Rc::clone(&errors_in);
        server.on(ServerEventKind::Error, move |_| counter.set(counter.get() + 1));

        assert!(server.listen(local_listen()));
        assert!(!server.listen(local_listen()));
        assert!(server.listening());
        assert!(server.close());
        assert!(!server.close());
    });

    assert_eq!(errors.get(), 0);
}

#[test]
fn bind_failure_is_reported_once_and_leaves_server_idle() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let log = new_log();

    let log_in = Rc::clone(&log);
    run(move || {
        let server = Server::new();
        let error_log = Rc::clone(&log_in);
        server.on(ServerEventKind::Error, move |event| {
            if let ServerEvent::Error(error) = event {
                record(&error_log, format!("{} {}", error.syscall(), error.code()));
            }
        });
        let listening_log = Rc::clone(&log_in);
        assert!(!server.listen_with(("127.0.0.1", port), move || record(&listening_log, "listening")));
        assert_eq!(server.state(), ServerState::Idle);
        assert!(server.address().is_none());
    });

    assert_eq!(*log.borrow(), ["bind EADDRINUSE"]);
    drop(occupied);
}

#[test]
fn destroy_is_idempotent() {
    let closes = Rc::new(Cell::new(0));

    let closes_in = Rc::clone(&closes);
    run(move || {
        let server = create_server(|_| {});
        let closer = server.clone();
        server.on(ServerEventKind::Connection, move |event| {
            let ServerEvent::Connection(socket) = event else { return };
            let closer = closer.clone();
            socket.on(SocketEventKind::Close, move |_| {
                closer.close();
            });
        });

        let listening = server.clone();
        server.listen_with(local_listen(), move || {
            let client = Socket::new();
            let target = client.clone();
            let counter = Rc::clone(&closes_in);
            client.on(SocketEventKind::Close, move |event| {
                assert!(matches!(event, SocketEvent::Close { had_error: false }));
                counter.set(counter.get() + 1);
            });
            client.connect_with(("127.0.0.1", port_of(&listening)), move || {
                target.destroy();
                target.destroy();
                assert!(target.is_destroyed());
                assert!(!target.write("nope"));
                assert!(!target.end());
                assert!(!target.connect(1));
            });
        });
    });

    assert_eq!(closes.get(), 1);
}

#[test]
fn unreferenced_server_does_not_keep_the_loop_alive() {
    let listening = Rc::new(Cell::new(false));

    let listening_in = Rc::clone(&listening);
    run(move || {
        let server = Server::new();
        server.unref_handle();
        let flag = Rc::clone(&listening_in);
        assert!(server.listen_with(local_listen(), move || flag.set(true)));
    });

    assert!(listening.get());
}

#[test]
fn bytes_are_counted_both_ways() {
    let counts = Rc::new(RefCell::new((0, 0)));

    let counts_in = Rc::clone(&counts);
    run(move || {
        let server = Server::with_options(ServerOptions { allow_half_open: true });
        let closer = server.clone();
        server.on(ServerEventKind::Connection, move |event| {
            let ServerEvent::Connection(socket) = event else { return };
            assert!(socket.allow_half_open());
            let reply = socket.clone();
            socket.on(SocketEventKind::End, move |_| {
                assert!(reply.writable());
                reply.end_with("pong!");
            });
            let closer = closer.clone();
            socket.on(SocketEventKind::Close, move |_| {
                closer.close();
            });
        });

        let listening = server.clone();
        server.listen_with(local_listen(), move || {
            let client = create_connection(("127.0.0.1", port_of(&listening)));
            client.end_with("ping");
            let observed = client.clone();
            let counts = Rc::clone(&counts_in);
            client.on(SocketEventKind::End, move |_| {
                *counts.borrow_mut() = (observed.bytes_written(), observed.bytes_read());
            });
        });
    });

    assert_eq!(*counts.borrow(), (4, 5));
}

#[test]
fn connections_over_the_limit_are_refused() {
    let log = new_log();

    let log_in = Rc::clone(&log);
    run(move || {
        let server = Server::new();
        server.set_max_connections(Some(0));
        let connection_log = Rc::clone(&log_in);
        server.on(ServerEventKind::Connection, move |_| record(&connection_log, "connection"));

        let listening = server.clone();
        server.listen_with(local_listen(), move || {
            let client = create_connection(("127.0.0.1", port_of(&listening)));
            let end_log = Rc::clone(&log_in);
            client.on(SocketEventKind::End, move |_| record(&end_log, "client end"));
            let closer = listening.clone();
            client.on(SocketEventKind::Close, move |_| {
                assert_eq!(closer.connections(), 0);
                closer.close();
            });
        });
    });

    assert_eq!(*log.borrow(), ["client end"]);
}

#[cfg(unix)]
#[test]
fn pipe_round_trip() {
    let path = std::env::temp_dir().join(format!("micro-io-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let received = Rc::new(RefCell::new(Vec::new()));

    let (received_in, pipe) = (Rc::clone(&received), path.clone());
    run(move || {
        let server = Server::new();
        let closer = server.clone();
        server.on(ServerEventKind::Connection, move |event| {
            let ServerEvent::Connection(socket) = event else { return };
            let data = Rc::clone(&received_in);
            socket.on(SocketEventKind::Data, move |event| {
                if let SocketEvent::Data(chunk) = event {
                    data.borrow_mut().extend_from_slice(chunk.as_bytes());
                }
            });
            let closer = closer.clone();
            socket.on(SocketEventKind::Close, move |_| {
                closer.close();
            });
        });

        let target = pipe.clone();
        let listening = server.clone();
        assert!(server.listen_with(ListenOptions::pipe(&pipe), move || {
            assert_eq!(listening.address(), Some(Address::Pipe(target.clone())));
            let client = create_connection(target);
            client.end_with("over the pipe");
        }));
    });

    assert_eq!(received.borrow().as_slice(), b"over the pipe");
    assert!(!path.exists(), "closing the server leaves the pipe behind");
}

#[cfg(unix)]
#[test]
fn pipe_can_be_listened_on_again_after_close() {
    let path = std::env::temp_dir().join(format!("micro-io-relisten-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let log = new_log();

    let (log_in, pipe) = (Rc::clone(&log), path.clone());
    run(move || {
        let server = Server::new();
        let error_log = Rc::clone(&log_in);
        server.on(ServerEventKind::Error, move |event| {
            if let ServerEvent::Error(error) = event {
                record(&error_log, format!("error {} {}", error.syscall(), error.code()));
            }
        });

        let listening = server.clone();
        assert!(server.listen_with(ListenOptions::pipe(&pipe), move || {
            assert!(listening.close());
            assert!(!pipe.exists());

            let again = listening.clone();
            let relisten_log = Rc::clone(&log_in);
            let relistened = listening.listen_with(ListenOptions::pipe(&pipe), move || {
                record(&relisten_log, "listening again");
                again.close();
            });
            record(&log_in, format!("relisten {relistened}"));
        }));
    });

    assert_eq!(*log.borrow(), ["relisten true", "listening again"]);
    assert!(!path.exists());
}

#[test]
fn ip_literals() {
    assert_eq!(is_ip("127.0.0.1"), 4);
    assert_eq!(is_ip("::1"), 6);
    assert_eq!(is_ip("fe80::1:2"), 6);
    assert_eq!(is_ip("localhost"), 0);
    assert!(!is_ipv4("256.0.0.1"));
    assert!(!is_ipv6("127.0.0.1"));
}
