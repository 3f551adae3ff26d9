//! Unified error types.

use thiserror::Error;

use crate::lookup::DatabaseSource;

/// The error type returned by asnhdr's fallible operations.
///
/// None of these ever reach a client. The middleware absorbs every variant
/// into a degraded instance or an empty header; they surface in logs and
/// from [`MmdbAsnLookup::open`](crate::MmdbAsnLookup::open).
#[derive(Debug, Error)]
pub enum Error {
    /// The configured database location does not resolve to readable data.
    #[error("ASN database {db} not found: {source}")]
    SourceMissing {
        db: DatabaseSource,
        #[source]
        source: std::io::Error,
    },

    /// The source exists but could not be decoded as an mmdb database.
    #[error("ASN database {db} is not usable: {source}")]
    InvalidDatabase {
        db: DatabaseSource,
        #[source]
        source: maxminddb::MaxMindDbError,
    },
}

/// Why a single lookup produced no record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The address is valid but the database has no network covering it.
    #[error("address not found in ASN database")]
    NotFound,

    /// The database holds a record for the address that could not be read.
    #[error("malformed ASN record: {0}")]
    Decode(String),
}
