//! Structured HTTP requests and responses, and the portal routing table.
//!
//! Handlers are plain functions from a [`Request`] and a [`PortalView`] to an
//! [`Action`]. They never touch the radio or the store; the controller
//! carries out whatever they ask for.

use super::form::Submission;
use crate::network::ScanEntry;
use std::net::Ipv4Addr;

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    /// Anything else (HEAD, PUT, ...).
    Other,
}

impl Method {
    /// Parse a method token.
    pub fn parse(token: &str) -> Self {
        match token.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "POST" => Self::Post,
            _ => Self::Other,
        }
    }
}

/// An inbound request, independent of the server library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Path without the query string.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: String,
    /// Value of the `Host` header, if sent.
    pub host: Option<String>,
    pub body: Vec<u8>,
}

impl Request {
    /// Build a request from a method and a request target (`/path?query`).
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };
        Self {
            method,
            path: if path.is_empty() { "/" } else { path }.to_string(),
            query: query.to_string(),
            host: None,
            body: Vec::new(),
        }
    }

    /// Shorthand for a GET request.
    pub fn get(target: &str) -> Self {
        Self::new(Method::Get, target)
    }

    /// Shorthand for a POST request with a form body.
    pub fn post(target: &str, body: &str) -> Self {
        let mut request = Self::new(Method::Post, target);
        request.body = body.as_bytes().to_vec();
        request
    }

    /// Set the `Host` header.
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Host header with any `:port` suffix removed.
    pub fn host_name(&self) -> Option<&str> {
        let host = self.host.as_deref()?.trim();
        if host.starts_with('[') {
            // IPv6 literal: [::1]:80
            return Some(host.split(']').next().map_or(host, |h| &h[1..]));
        }
        Some(host.rsplit_once(':').map_or(host, |(name, _)| name))
    }
}

/// An outbound response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    /// Extra headers besides `Content-Type`.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Response {
    /// HTML response.
    pub fn html(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "text/html; charset=utf-8",
            headers: Vec::new(),
            body,
        }
    }

    /// Plain text response.
    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    /// `302 Found` to `location` with an empty body.
    pub fn redirect(location: &str) -> Self {
        let mut response = Self::text(302, "");
        response
            .headers
            .push(("Location".to_string(), location.to_string()));
        response
    }

    /// Look up a header by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the portal looks like to a handler.
#[derive(Debug, Clone, Copy)]
pub struct PortalView<'a> {
    /// Address of the access point.
    pub address: Ipv4Addr,
    /// Port the portal is served on.
    pub port: u16,
    /// Networks from the most recent scan, empty if the route does not scan.
    pub networks: &'a [ScanEntry],
}

impl PortalView<'_> {
    /// Base URL of the portal, e.g. `http://192.168.4.1/`.
    pub fn base_url(&self) -> String {
        if self.port == 80 {
            format!("http://{}/", self.address)
        } else {
            format!("http://{}:{}/", self.address, self.port)
        }
    }

    /// True if `request` was addressed to the portal itself.
    ///
    /// A request without a `Host` header counts as local.
    pub fn is_local(&self, request: &Request) -> bool {
        match request.host_name() {
            None => true,
            Some(host) => host.parse::<Ipv4Addr>().is_ok_and(|ip| ip == self.address),
        }
    }
}

/// Result of a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Answer immediately.
    Respond(Response),
    /// Try the submitted credentials; the answer comes when the join resolves.
    Validate(Submission),
}

/// Handler signature.
pub type Handler = fn(&Request, &PortalView<'_>) -> Action;

/// One routing table entry.
#[derive(Clone, Copy)]
pub struct Route {
    pub method: Method,
    pub path: &'static str,
    /// The handler renders scan results, so the controller must scan first.
    pub scans: bool,
    pub handler: Handler,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("scans", &self.scans)
            .finish()
    }
}

/// Maps `(method, path)` to a handler, with a fallback for everything else.
#[derive(Debug, Clone)]
pub struct Router {
    routes: Vec<Route>,
    fallback: Route,
}

impl Router {
    /// Create a router whose unmatched requests go to `fallback`.
    pub fn new(fallback: Handler, fallback_scans: bool) -> Self {
        Self {
            routes: Vec::new(),
            fallback: Route {
                method: Method::Other,
                path: "*",
                scans: fallback_scans,
                handler: fallback,
            },
        }
    }

    /// Add a route.
    pub fn route(mut self, method: Method, path: &'static str, scans: bool, handler: Handler) -> Self {
        self.routes.push(Route {
            method,
            path,
            scans,
            handler,
        });
        self
    }

    /// Find the route for `request`.
    pub fn lookup(&self, request: &Request) -> &Route {
        self.routes
            .iter()
            .find(|r| r.method == request.method && r.path == request.path)
            .unwrap_or(&self.fallback)
    }
}
