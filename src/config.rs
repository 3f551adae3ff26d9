//! Middleware configuration.
//!
//! The keys match the plugin configuration hosts already write:
//!
//! ```json
//! {
//!   "MM_ASN_DB": "/etc/geoip/GeoLite2-ASN.mmdb",
//!   "MM_CLIENT_ASN_HEADER": "X-ASN",
//!   "TRUE_CLIENT_IP_HEADER": "True-Client-IP"
//! }
//! ```
//!
//! Every key is optional. How the document is read (file, labels, CLI) is
//! up to the host.

use serde::Deserialize;

use crate::lookup::DatabaseSource;

pub const DEFAULT_DATABASE: &str = "./GeoLite2-ASN.mmdb";
pub const DEFAULT_OUTPUT_HEADER: &str = "X-ASN";
pub const DEFAULT_INPUT_HEADER: &str = "True-Client-IP";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AsnConfig {
    /// mmdb database to load.
    #[serde(rename = "MM_ASN_DB")]
    pub database: DatabaseSource,

    /// Header the encoded [`AsnRecord`](crate::AsnRecord) is written to.
    #[serde(rename = "MM_CLIENT_ASN_HEADER")]
    pub output_header: String,

    /// Header carrying the client IP, as set by the edge in front of us.
    #[serde(rename = "TRUE_CLIENT_IP_HEADER")]
    pub input_header: String,

    /// When the database is missing, blank both header names on the instance
    /// so it neither reads nor writes headers.
    #[serde(rename = "BLANK_HEADERS_ON_MISSING_DB")]
    pub blank_headers_on_missing_db: bool,
}

impl AsnConfig {
    pub fn database(mut self, source: impl Into<DatabaseSource>) -> Self {
        self.database = source.into();
        self
    }

    pub fn output_header(mut self, name: impl Into<String>) -> Self {
        self.output_header = name.into();
        self
    }

    pub fn input_header(mut self, name: impl Into<String>) -> Self {
        self.input_header = name.into();
        self
    }

    pub fn blank_headers_on_missing_db(mut self, blank: bool) -> Self {
        self.blank_headers_on_missing_db = blank;
        self
    }
}

impl Default for AsnConfig {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.into(),
            output_header: DEFAULT_OUTPUT_HEADER.to_owned(),
            input_header: DEFAULT_INPUT_HEADER.to_owned(),
            blank_headers_on_missing_db: false,
        }
    }
}
