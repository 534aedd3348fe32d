//! HTTP server for the setup portal.
//!
//! Uses `tiny_http` which works on both host and ESP32 (via std::net). The
//! server is polled from the device loop with `try_recv`, so it never blocks
//! a tick. At most one request is parked waiting for a deferred answer.

use super::controller::Reply;
use super::http::{Method, Request, Response};
use log::{info, warn};
use std::io::Read;
use std::net::Ipv4Addr;

/// Largest request body accepted.
///
/// tiny_http reads bodies up to this size on its connection thread before
/// the request is queued. Anything bigger would be read from the socket by
/// the device loop.
pub const MAX_BODY_LEN: usize = 1024;

/// Something that answers portal requests.
pub trait PortalHandler {
    /// Answer a request now, or defer it.
    fn handle(&mut self, request: &Request) -> Reply;

    /// The answer for the deferred request, once it is known.
    fn take_deferred_response(&mut self) -> Option<Response>;
}

/// Portal HTTP server.
pub struct PortalServer {
    server: tiny_http::Server,
    parked: Option<tiny_http::Request>,
}

impl PortalServer {
    /// Start listening on `bind:port`.
    pub fn bind(bind: Ipv4Addr, port: u16) -> Result<Self, std::io::Error> {
        let addr = format!("{}:{}", bind, port);
        let server = tiny_http::Server::http(&addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, format!("{}", e)))?;

        info!("Portal listening on http://{}/", addr);
        Ok(Self {
            server,
            parked: None,
        })
    }

    /// Port the server is bound to.
    pub fn port(&self) -> Option<u16> {
        self.server.server_addr().to_ip().map(|addr| addr.port())
    }

    /// Deliver a deferred answer if one is ready, then serve all waiting requests.
    ///
    /// Returns the number of responses sent.
    pub fn poll<H: PortalHandler + ?Sized>(&mut self, handler: &mut H) -> usize {
        let mut sent = 0;

        if self.parked.is_some() {
            if let Some(response) = handler.take_deferred_response() {
                if let Some(request) = self.parked.take() {
                    respond(request, response);
                    sent += 1;
                }
            }
        }

        loop {
            let mut raw = match self.server.try_recv() {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(e) => {
                    warn!("Portal receive failed: {}", e);
                    break;
                }
            };

            if let Some(response) = rejection(&raw) {
                warn!("Rejecting {} {}: {}", raw.method(), raw.url(), response.body);
                // Dropping a request drains its unread body, which may never arrive
                std::thread::spawn(move || respond(raw, response));
                sent += 1;
                continue;
            }

            let request = match convert(&mut raw) {
                Ok(request) => request,
                Err(e) => {
                    warn!("Failed to read request body: {}", e);
                    respond(raw, Response::text(400, "bad request"));
                    sent += 1;
                    continue;
                }
            };

            match handler.handle(&request) {
                Reply::Now(response) => {
                    respond(raw, response);
                    sent += 1;
                }
                Reply::Deferred if self.parked.is_none() => self.parked = Some(raw),
                Reply::Deferred => {
                    respond(raw, Response::text(503, "validation in progress"));
                    sent += 1;
                }
            }
        }
        sent
    }
}

/// Response for a request whose body is not already in memory.
fn rejection(raw: &tiny_http::Request) -> Option<Response> {
    let has = |name: &'static str| raw.headers().iter().any(|h| h.field.equiv(name));
    if has("Transfer-Encoding") {
        Some(Response::text(411, "length required"))
    } else if has("Expect") {
        Some(Response::text(417, "expectation failed"))
    } else if raw.body_length().is_some_and(|len| len > MAX_BODY_LEN) {
        Some(Response::text(413, "request body too large"))
    } else {
        None
    }
}

fn convert(raw: &mut tiny_http::Request) -> Result<Request, std::io::Error> {
    let mut request = Request::new(Method::parse(raw.method().as_str()), raw.url());
    request.host = raw
        .headers()
        .iter()
        .find(|h| h.field.equiv("Host"))
        .map(|h| h.value.as_str().to_string());

    let mut body = Vec::new();
    raw.as_reader()
        .take(MAX_BODY_LEN as u64)
        .read_to_end(&mut body)?;
    request.body = body;
    Ok(request)
}

fn respond(raw: tiny_http::Request, response: Response) {
    let mut out = tiny_http::Response::from_string(response.body).with_status_code(response.status);
    let headers = std::iter::once(("Content-Type", response.content_type))
        .chain(response.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    for (name, value) in headers {
        match tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            Ok(header) => out.add_header(header),
            Err(()) => warn!("Dropping invalid header {}", name),
        }
    }
    if let Err(e) = raw.respond(out) {
        warn!("Failed to send response: {}", e);
    }
}
