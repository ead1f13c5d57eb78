//! ```sh
//! cargo run -p micro-io-http --example hello_world
//! curl -v http://127.0.0.1:3000/
//! ```

use micro_io::events::EventSource;
use micro_io::runtime::EventLoop;
use micro_io_http::{ServerEvent, ServerEventKind};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            error!(cause = %e, "failed to create event loop");
            return;
        }
    };

    event_loop.run(|| {
        let server = micro_io_http::create_server(|request, response| {
            info!(method = ?request.method(), url = %request.url(), "request");

            let body = if request.url() == "/" { "hello world\r\n" } else { "404 not found\r\n" };
            if request.url() != "/"
                && let Err(e) = response.set_status_code(404)
            {
                warn!(cause = %e, "failed to set status");
            }
            if let Err(e) = response.set_header("Content-Type", "text/plain; charset=utf-8") {
                warn!(cause = %e, "failed to set content type");
            }
            response.end_with(body);
        });

        server.on(ServerEventKind::Error, |event| {
            if let ServerEvent::Error(e) = event {
                error!(cause = %e, "bind server error");
            }
        });
        server.listen_with(("127.0.0.1", 3000), || info!(port = 3000, "start listening"));
    });
}
