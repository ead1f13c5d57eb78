//! Streams every request body back as a chunked response.
//!
//! The request is paused whenever the response cannot take more data and resumed on the
//! response's `drain`, so a slow client never makes the server buffer a whole upload.
//!
//! ```sh
//! cargo run -p micro-io-http --example echo_body
//! curl -v -H "Transfer-Encoding: chunked" --data-binary @Cargo.toml http://127.0.0.1:3000/
//! ```

use micro_io::events::EventSource;
use micro_io::runtime::EventLoop;
use micro_io_http::{IncomingEvent, IncomingEventKind, ResponseEventKind};
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
        let server = micro_io_http::create_server(|request, response| {
            if let Some(content_type) = request.header("content-type") {
                let _ = response.set_header("Content-Type", &content_type.to_string());
            }

            let (paused, writer) = (request.clone(), response.clone());
            request.on(IncomingEventKind::Data, move |event| {
                if let IncomingEvent::Data(chunk) = event
                    && !writer.write(chunk.clone().into_bytes())
                {
                    paused.pause();
                }
            });
            let resumed = request.clone();
            response.on(ResponseEventKind::Drain, move |_| resumed.resume());

            let (finisher, trailers) = (response.clone(), request.clone());
            request.on(IncomingEventKind::End, move |_| {
                info!(trailers = trailers.trailers().len(), "request body complete");
                finisher.end();
            });
        });

        server.listen_with(("127.0.0.1", 3000), || info!(port = 3000, "start listening"));
    });
}
