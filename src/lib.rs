//! # asnhdr
//!
//! HTTP middleware that tells the rest of the chain which network a client
//! comes from.
//!
//! The edge in front of you puts the client address in a header
//! (`True-Client-IP` by default). asnhdr looks it up in an offline MaxMind
//! ASN database and writes the result into another header (`X-ASN`):
//!
//! ```text
//! X-ASN: {"AutonomousSystemNumber":3209,"AutonomousSystemOrganization":"Vodafone GmbH"}
//! ```
//!
//! Routing rules, access control and analytics downstream read that header
//! instead of doing their own lookups.
//!
//! ## The contract
//!
//! - The database is decoded once per [`Registry`] and shared by every
//!   middleware instance built against it. The first source wins.
//! - Building a middleware never fails. A missing or broken database is
//!   logged once and the instance keeps forwarding traffic.
//! - Every request reaches the next handler exactly once. When there is no
//!   answer the output header is set to the empty string.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use asnhdr::{AsnConfig, AsnMiddleware, Registry, Request, Response};
//!
//! # async fn run(incoming: http::Request<bytes::Bytes>) {
//! let registry = Arc::new(Registry::new());
//! let config = AsnConfig::default().database("/etc/geoip/GeoLite2-ASN.mmdb");
//!
//! let Ok(decorated) = AsnMiddleware::construct(upstream, config, "asn", registry);
//!
//! // Whatever server the host runs hands each collected request over:
//! let res: http::Response<bytes::Bytes> = decorated.handle(Request::from(incoming)).await.into_http();
//! # }
//!
//! async fn upstream(req: Request) -> Response {
//!     Response::text(req.header("x-asn").unwrap_or_default().to_owned())
//! }
//! ```
//!
//! Serving is left to the host; `demos/decorate.rs` wires a decorated
//! handler into a bare hyper connection.

mod config;
mod error;
mod handler;
mod lookup;
mod registry;
mod request;
mod response;

pub mod middleware;

pub use config::{AsnConfig, DEFAULT_DATABASE, DEFAULT_INPUT_HEADER, DEFAULT_OUTPUT_HEADER};
pub use error::{Error, LookupError};
pub use handler::Handler;
pub use lookup::{AsnLookup, AsnRecord, DatabaseSource, MmdbAsnLookup};
pub use middleware::{AsnMiddleware, Degradation, Resolution};
pub use registry::Registry;
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
