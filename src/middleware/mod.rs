//! Middleware layer.
//!
//! Middleware sits in front of a [`Handler`](crate::Handler), rewrites the
//! request, and always hands it on. Nothing here writes a response of its
//! own.
//!
//! - [`AsnMiddleware`] — stamps the client's Autonomous System onto a header

mod asn;

pub use asn::{AsnMiddleware, Degradation, Resolution};
