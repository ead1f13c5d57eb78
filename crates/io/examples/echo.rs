//! A TCP echo server.
//!
//! ```sh
//! cargo run -p micro-io --example echo
//! nc 127.0.0.1 7000
//! ```

use micro_io::events::EventSource;
use micro_io::net::{self, ServerEvent, ServerEventKind, SocketEvent, SocketEventKind};
use micro_io::runtime::EventLoop;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            error!(cause = %e, "failed to create event loop");
            return;
        }
    };

    event_loop.run(|| {
        let server = net::create_server(|socket| {
            info!(peer = ?socket.remote_address(), "accepted connection");

            let echo = socket.clone();
            socket.on(SocketEventKind::Data, move |event| {
                if let SocketEvent::Data(chunk) = event
                    && !echo.write(chunk.clone().into_bytes())
                {
                    // stop reading until the peer catches up
                    echo.pause();
                }
            });
            let resume = socket.clone();
            socket.on(SocketEventKind::Drain, move |_| resume.resume());
            socket.on(SocketEventKind::Close, |event| {
                if let SocketEvent::Close { had_error } = event {
                    info!(had_error, "connection closed");
                }
            });
        });

        server.on(ServerEventKind::Error, |event| {
            if let ServerEvent::Error(e) = event {
                error!(cause = %e, code = e.code(), "echo server error");
            }
        });
        server.listen(("127.0.0.1", 7000));
    });
}
