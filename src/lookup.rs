//! ASN lookup capability and its MaxMind adapter.
//!
//! Everything format-specific lives here. The rest of the crate only sees
//! [`AsnLookup`]: give it an address, get an [`AsnRecord`] or a
//! [`LookupError`] back.

use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use maxminddb::{Reader, geoip2};
use serde::{Deserialize, Serialize};

use crate::error::{Error, LookupError};

// ── AsnRecord ────────────────────────────────────────────────────────────────

/// Network ownership of one address.
///
/// Serializes to the header encoding downstream consumers parse:
///
/// ```text
/// {"AutonomousSystemNumber":3209,"AutonomousSystemOrganization":"Vodafone GmbH"}
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsnRecord {
    #[serde(rename = "AutonomousSystemNumber")]
    pub asn_number: u32,
    #[serde(rename = "AutonomousSystemOrganization")]
    pub asn_organization: String,
}

impl AsnRecord {
    pub fn new(asn_number: u32, asn_organization: impl Into<String>) -> Self {
        Self { asn_number, asn_organization: asn_organization.into() }
    }

    /// Compact JSON, number first.
    ///
    /// The result is always a valid header value. serde_json escapes the C0
    /// controls but leaves DEL (0x7f) raw, so it is written as `\u007f`.
    pub fn encode(&self) -> String {
        // Two plain fields; serialization cannot fail.
        serde_json::to_string(self)
            .map(|json| json.replace('\u{7f}', "\\u007f"))
            .unwrap_or_default()
    }
}

// ── AsnLookup ────────────────────────────────────────────────────────────────

/// A loaded ASN database.
///
/// Implementations must be cheap, in-memory and non-blocking: `resolve` runs
/// on the request path of every decorated request.
pub trait AsnLookup: Send + Sync {
    fn resolve(&self, ip: IpAddr) -> Result<AsnRecord, LookupError>;
}

/// Plain functions and closures are lookups too, which keeps test doubles and
/// static tables one line long.
impl<F> AsnLookup for F
where
    F: Fn(IpAddr) -> Result<AsnRecord, LookupError> + Send + Sync,
{
    fn resolve(&self, ip: IpAddr) -> Result<AsnRecord, LookupError> {
        self(ip)
    }
}

// ── DatabaseSource ───────────────────────────────────────────────────────────

/// Where the mmdb bytes come from.
///
/// Configuration files only ever name a path; [`DatabaseSource::Memory`] is
/// for hosts that ship the database embedded or fetched by other means.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "PathBuf")]
pub enum DatabaseSource {
    File(PathBuf),
    Memory(Arc<[u8]>),
}

impl DatabaseSource {
    /// Checks that the source resolves to data without reading it.
    pub(crate) fn check_present(&self) -> std::io::Result<()> {
        match self {
            Self::File(path) => std::fs::metadata(path).map(|_| ()),
            Self::Memory(_) => Ok(()),
        }
    }

    fn load(&self) -> Result<Vec<u8>, Error> {
        match self {
            Self::File(path) => std::fs::read(path)
                .map_err(|source| Error::SourceMissing { db: self.clone(), source }),
            Self::Memory(bytes) => Ok(bytes.to_vec()),
        }
    }
}

impl From<PathBuf> for DatabaseSource {
    fn from(path: PathBuf) -> Self { Self::File(path) }
}

impl From<&Path> for DatabaseSource {
    fn from(path: &Path) -> Self { Self::File(path.to_path_buf()) }
}

impl From<&str> for DatabaseSource {
    fn from(path: &str) -> Self { Self::File(PathBuf::from(path)) }
}

impl From<Vec<u8>> for DatabaseSource {
    fn from(bytes: Vec<u8>) -> Self { Self::Memory(bytes.into()) }
}

impl fmt::Display for DatabaseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Memory(bytes) => write!(f, "<memory: {} bytes>", bytes.len()),
        }
    }
}

// Raw bytes would drown any log line; print the same thing Display does.
impl fmt::Debug for DatabaseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Memory(bytes) => f.debug_tuple("Memory").field(&bytes.len()).finish(),
        }
    }
}

// ── MaxMind adapter ──────────────────────────────────────────────────────────

/// [`AsnLookup`] backed by a GeoLite2-ASN (or compatible) mmdb file.
pub struct MmdbAsnLookup {
    reader: Reader<Vec<u8>>,
}

impl MmdbAsnLookup {
    /// Reads and decodes the whole database into memory.
    ///
    /// Fails with [`Error::SourceMissing`] when the file cannot be read and
    /// [`Error::InvalidDatabase`] when the bytes are not an mmdb database.
    pub fn open(source: &DatabaseSource) -> Result<Self, Error> {
        let bytes = source.load()?;
        let reader = Reader::from_source(bytes)
            .map_err(|source_err| Error::InvalidDatabase { db: source.clone(), source: source_err })?;
        Ok(Self { reader })
    }

    /// `database_type` from the mmdb metadata, e.g. `GeoLite2-ASN`.
    pub fn database_type(&self) -> &str {
        &self.reader.metadata.database_type
    }
}

impl AsnLookup for MmdbAsnLookup {
    fn resolve(&self, ip: IpAddr) -> Result<AsnRecord, LookupError> {
        // maxminddb 0.27: lookup() yields a LookupResult; has_data() tells a
        // miss apart from a decode failure.
        let found = self.reader
            .lookup(ip)
            .map_err(|e| LookupError::Decode(e.to_string()))?;
        if !found.has_data() {
            return Err(LookupError::NotFound);
        }
        match found.decode::<geoip2::Asn>() {
            Ok(Some(asn)) => Ok(AsnRecord {
                asn_number: asn.autonomous_system_number.unwrap_or_default(),
                asn_organization: asn.autonomous_system_organization
                    .unwrap_or_default()
                    .to_owned(),
            }),
            Ok(None) => Err(LookupError::NotFound),
            Err(e) => Err(LookupError::Decode(e.to_string())),
        }
    }
}
