use std::thread;
use std::time::Duration;

use http::{HeaderValue, StatusCode, header};
use micro_conn::handler::{Application, HandlerError, Outcome, Reply};
use micro_conn::protocol::RequestContext;
use micro_conn::protocol::body::channel;
use micro_conn::server::{Server, init_tracing};
use tracing::{Level, error, info};

struct Routes;

impl Application for Routes {
    fn call(&self, ctx: &mut RequestContext) -> Result<Outcome, HandlerError> {
        match ctx.uri().path() {
            // curl -v http://127.0.0.1:8080/
            "/" => Ok(Reply::ok().body("hello world\r\n").into()),

            // curl -v http://127.0.0.1:8080/slow
            "/slow" => {
                thread::sleep(Duration::from_millis(200));
                Ok(Reply::ok().body(format!("computed on a worker, threaded: {}\r\n", ctx.is_threaded())).into())
            }

            // curl -v http://127.0.0.1:8080/later
            "/later" => {
                let callback = ctx.take_async_callback().ok_or("async callback already taken")?;
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(500));
                    if let Err(e) = callback.complete(Reply::ok().body("answered later\r\n")) {
                        error!(cause = %e, "failed to complete suspended request");
                    }
                });
                Ok(Outcome::Suspended)
            }

            // curl -v -N http://127.0.0.1:8080/stream
            "/stream" => {
                let (writer, body) = channel();
                thread::spawn(move || {
                    for i in 0..5 {
                        if writer.send(format!("tick {i}\r\n")).is_err() {
                            info!("client went away, stop streaming");
                            return;
                        }
                        thread::sleep(Duration::from_millis(300));
                    }
                    writer.finish();
                });
                Ok(Reply::ok()
                    .header(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"))
                    .header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))
                    .body(body)
                    .into())
            }

            _ => Ok(Reply::new(StatusCode::NOT_FOUND).body("404 not found\r\n").into()),
        }
    }

    fn wants_deferred(&self, ctx: &RequestContext) -> bool {
        ctx.uri().path() == "/slow"
    }
}

fn main() {
    init_tracing(Level::INFO);

    let server = match Server::builder().address("127.0.0.1:8080").application(Routes).workers(4).build() {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "invalid server configuration");
            return;
        }
    };

    if let Err(e) = server.run() {
        error!(cause = %e, "server stopped");
    }
}
