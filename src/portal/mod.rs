//! Setup portal served while the device is its own access point.
//!
//! # Components
//!
//! - [`http`] - structured requests/responses and the routing table
//! - [`form`] - decoding of the setup form
//! - [`page`] - HTML rendering
//! - [`controller`] - the provisioning state machine
//! - [`dns`] - captive DNS codec and responder
//! - [`server`] - `tiny_http` adapter

pub mod controller;
pub mod dns;
pub mod form;
pub mod http;
pub mod page;
pub mod server;

pub use controller::{portal_router, PortalPoll, PortalState, ProvisioningController, Reply};
pub use dns::{DnsError, DnsResponder};
pub use form::{Submission, SubmissionError};
pub use http::{Action, Method, PortalView, Request, Response, Route, Router};
pub use server::{PortalHandler, PortalServer};
