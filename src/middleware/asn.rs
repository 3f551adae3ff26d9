//! ASN decoration.
//!
//! Reads the client IP from one header, resolves it against the shared
//! [`Registry`], and writes the encoded [`AsnRecord`] into another header:
//!
//! ```text
//! True-Client-IP: 188.193.88.199
//!        ↓
//! X-ASN: {"AutonomousSystemNumber":3209,"AutonomousSystemOrganization":"Vodafone GmbH"}
//! ```
//!
//! Enrichment is best effort. A missing or broken database, a missing or
//! garbled client IP, an address the database does not know: every one of
//! them ends with `X-ASN` set to the empty string and the request forwarded
//! as usual. Diagnostics are logged when an instance is built, never per
//! request.

use std::convert::Infallible;
use std::net::IpAddr;
use std::sync::Arc;

use http::header::{HeaderName, HeaderValue};
use tracing::warn;

use crate::config::AsnConfig;
use crate::error::LookupError;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, private};
use crate::lookup::{AsnLookup, AsnRecord};
use crate::registry::Registry;
use crate::request::Request;
use crate::response::Response;

/// Why an instance cannot enrich requests right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Degradation {
    /// The configured database location does not exist.
    SourceMissing,
    /// The database exists but the registry holds no capability, because
    /// this or an earlier attempt in the epoch failed to decode it.
    CapabilityUnavailable,
}

/// Outcome of resolving one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Found(AsnRecord),
    /// The address parsed but the database has no entry for it.
    NotFound,
    /// No usable address, or the database entry could not be read.
    Invalid,
}

impl Resolution {
    /// The output header value: the encoded record, or empty for anything
    /// that is not [`Resolution::Found`]. A found record never encodes to
    /// the empty string.
    pub fn header_value(&self) -> String {
        match self {
            Self::Found(record) => record.encode(),
            Self::NotFound | Self::Invalid => String::new(),
        }
    }
}

/// One configured instance of the ASN decorator.
///
/// Instances are cheap; build one per route if routes need different
/// headers. All instances built against the same [`Registry`] share its
/// capability.
pub struct AsnMiddleware {
    name: String,
    config: AsnConfig,
    input: Option<HeaderName>,
    output: Option<HeaderName>,
    degradation: Option<Degradation>,
    registry: Arc<Registry>,
    next: BoxedHandler,
}

impl AsnMiddleware {
    /// Builds an instance in front of `next` and makes sure `registry` has
    /// made its attempt to load `config.database`.
    ///
    /// Never fails. When the database is missing the instance is returned in
    /// a degraded state (see [`degradation`](Self::degradation)); with
    /// [`blank_headers_on_missing_db`](AsnConfig::blank_headers_on_missing_db)
    /// set, its header names are also blanked and it leaves requests
    /// untouched.
    pub fn construct(
        next: impl Handler,
        config: AsnConfig,
        name: impl Into<String>,
        registry: Arc<Registry>,
    ) -> Result<Self, Infallible> {
        let name = name.into();
        let mut config = config;

        let degradation = match config.database.check_present() {
            Err(err) => {
                warn!(db = %config.database, name = %name, err = %err, "ASN database not found");
                if config.blank_headers_on_missing_db {
                    config.input_header.clear();
                    config.output_header.clear();
                }
                Some(Degradation::SourceMissing)
            }
            Ok(()) => {
                registry.ensure_initialized(&config.database);
                registry.current().is_none().then_some(Degradation::CapabilityUnavailable)
            }
        };

        let input = parse_header_name(&name, "input", &config.input_header);
        let output = parse_header_name(&name, "output", &config.output_header);

        Ok(Self {
            name,
            config,
            input,
            output,
            degradation,
            registry,
            next: next.into_boxed_handler(),
        })
    }

    pub fn name(&self) -> &str { &self.name }

    /// The configuration snapshot, after any blanking.
    pub fn config(&self) -> &AsnConfig { &self.config }

    /// `None` when the instance had a capability at construction time.
    pub fn degradation(&self) -> Option<Degradation> { self.degradation }

    /// Decorates `req` and runs the next handler on it.
    pub async fn handle(&self, mut req: Request) -> Response {
        self.decorate(&mut req);
        self.next.call(req).await
    }

    /// Sets the output header on `req`, overwriting any value the client
    /// sent. Does nothing when the output header name is blank or invalid.
    pub fn decorate(&self, req: &mut Request) {
        let Some(output) = &self.output else { return };

        let value = match self.registry.current() {
            Some(lookup) => self.resolve(lookup.as_ref(), req).header_value(),
            None => String::new(),
        };
        // Non-ASCII organization bytes are valid obs-text, and `encode`
        // escapes the controls header values reject, so the fallback is
        // never taken.
        let value = HeaderValue::from_bytes(value.as_bytes())
            .unwrap_or_else(|_| HeaderValue::from_static(""));

        req.set_header(output.clone(), value);
    }

    /// Resolves the client IP carried by `req`.
    pub fn resolve(&self, lookup: &dyn AsnLookup, req: &Request) -> Resolution {
        let ip = self.input.as_ref()
            .and_then(|name| req.headers().get(name))
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<IpAddr>().ok());
        let Some(ip) = ip else { return Resolution::Invalid };

        match lookup.resolve(ip) {
            Ok(record) => Resolution::Found(record),
            Err(LookupError::NotFound) => Resolution::NotFound,
            Err(LookupError::Decode(_)) => Resolution::Invalid,
        }
    }
}

fn parse_header_name(instance: &str, role: &str, header: &str) -> Option<HeaderName> {
    if header.is_empty() {
        return None;
    }
    match HeaderName::try_from(header) {
        Ok(name) => Some(name),
        Err(err) => {
            warn!(name = %instance, header, role, err = %err, "invalid header name, ignoring it");
            None
        }
    }
}

impl private::Sealed for AsnMiddleware {}

impl Handler for AsnMiddleware {
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(self)
    }
}

impl ErasedHandler for AsnMiddleware {
    fn call(&self, mut req: Request) -> BoxFuture {
        self.decorate(&mut req);
        self.next.call(req)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;

    use super::*;
    use crate::lookup::DatabaseSource;

    const VODAFONE: &str =
        r#"{"AutonomousSystemNumber":3209,"AutonomousSystemOrganization":"Vodafone GmbH"}"#;

    fn table(ip: IpAddr) -> Result<AsnRecord, LookupError> {
        match ip.to_string().as_str() {
            "188.193.88.199" => Ok(AsnRecord::new(3209, "Vodafone GmbH")),
            "203.0.113.9" => Err(LookupError::Decode("bad pointer".into())),
            _ => Err(LookupError::NotFound),
        }
    }

    fn table_registry() -> Arc<Registry> {
        Arc::new(Registry::with_opener(|_| {
            let lookup: Arc<dyn AsnLookup> = Arc::new(table);
            Ok(lookup)
        }))
    }

    /// A source that always counts as present.
    fn present() -> AsnConfig {
        AsnConfig::default().database(DatabaseSource::from(vec![0u8; 16]))
    }

    /// Echoes the `x-asn` header the handler saw and counts its calls.
    fn echo(calls: &Arc<AtomicUsize>) -> impl Handler + use<> {
        let calls = Arc::clone(calls);
        move |req: Request| {
            calls.fetch_add(1, Ordering::SeqCst);
            let seen = match req.headers().get("x-asn") {
                Some(value) => String::from_utf8_lossy(value.as_bytes()).into_owned(),
                None => "<unset>".to_owned(),
            };
            async move { Response::text(seen) }
        }
    }

    fn request(client_ip: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri("http://localhost/");
        if let Some(ip) = client_ip {
            builder = builder.header("True-Client-IP", ip);
        }
        Request::from(builder.body(Bytes::new()).unwrap())
    }

    async fn seen_by_next(mw: &AsnMiddleware, req: Request) -> String {
        String::from_utf8(mw.handle(req).await.body().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn found_writes_encoded_record() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mw = AsnMiddleware::construct(echo(&calls), present(), "asn", table_registry()).unwrap();
        assert_eq!(mw.degradation(), None);

        assert_eq!(seen_by_next(&mw, request(Some("188.193.88.199"))).await, VODAFONE);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn every_failure_writes_empty_and_delegates_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mw = AsnMiddleware::construct(echo(&calls), present(), "asn", table_registry()).unwrap();

        let cases = [None, Some(""), Some("not-an-ip"), Some(" 188.193.88.199"), Some("192.0.2.1"), Some("203.0.113.9")];
        for ip in cases {
            assert_eq!(seen_by_next(&mw, request(ip)).await, "", "client ip {ip:?}");
        }
        assert_eq!(calls.load(Ordering::SeqCst), cases.len());
    }

    #[tokio::test]
    async fn no_capability_writes_empty() {
        let registry = Arc::new(Registry::with_opener(|source| {
            Err(crate::Error::SourceMissing {
                db: source.clone(),
                source: std::io::ErrorKind::NotFound.into(),
            })
        }));
        let calls = Arc::new(AtomicUsize::new(0));
        let mw = AsnMiddleware::construct(echo(&calls), present(), "asn", registry).unwrap();
        assert_eq!(mw.degradation(), Some(Degradation::CapabilityUnavailable));

        assert_eq!(seen_by_next(&mw, request(Some("188.193.88.199"))).await, "");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn client_supplied_output_header_is_overwritten() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mw = AsnMiddleware::construct(echo(&calls), present(), "asn", table_registry()).unwrap();

        let mut req = request(Some("192.0.2.1"));
        req.headers_mut().insert("x-asn", HeaderValue::from_static("{\"AutonomousSystemNumber\":1}"));
        assert_eq!(seen_by_next(&mw, req).await, "");
    }

    #[tokio::test]
    async fn missing_source_does_not_touch_registry() {
        let registry = table_registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let config = AsnConfig::default().database("./non-existing");
        let mw = AsnMiddleware::construct(echo(&calls), config, "asn", Arc::clone(&registry)).unwrap();

        assert_eq!(mw.degradation(), Some(Degradation::SourceMissing));
        assert!(registry.current().is_none());
        assert_eq!(mw.config().output_header, "X-ASN");
        assert_eq!(seen_by_next(&mw, request(Some("188.193.88.199"))).await, "");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_source_blanks_headers_when_asked() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = AsnConfig::default()
            .database("./non-existing")
            .blank_headers_on_missing_db(true);
        let mw = AsnMiddleware::construct(echo(&calls), config, "asn", table_registry()).unwrap();

        assert_eq!(mw.config().output_header, "");
        assert_eq!(mw.config().input_header, "");
        assert_eq!(seen_by_next(&mw, request(Some("188.193.88.199"))).await, "<unset>");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_source_still_uses_capability_installed_by_another_instance() {
        let registry = table_registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let _loaded = AsnMiddleware::construct(echo(&calls), present(), "first", Arc::clone(&registry)).unwrap();

        let config = AsnConfig::default().database("./non-existing");
        let mw = AsnMiddleware::construct(echo(&calls), config, "second", registry).unwrap();
        assert_eq!(mw.degradation(), Some(Degradation::SourceMissing));
        assert_eq!(seen_by_next(&mw, request(Some("188.193.88.199"))).await, VODAFONE);
    }

    #[tokio::test]
    async fn invalid_output_header_name_leaves_request_alone() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = present().output_header("X ASN");
        let mw = AsnMiddleware::construct(echo(&calls), config, "asn", table_registry()).unwrap();

        let mut req = request(Some("188.193.88.199"));
        mw.decorate(&mut req);
        assert!(req.headers().get("x-asn").is_none());
        assert_eq!(req.headers().len(), 1);
    }

    #[tokio::test]
    async fn custom_headers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = present().input_header("X-Real-IP").output_header("X-Client-ASN");
        let mw = AsnMiddleware::construct(echo(&calls), config, "asn", table_registry()).unwrap();

        let mut req = Request::from(
            http::Request::builder()
                .header("x-real-ip", "188.193.88.199")
                .header("true-client-ip", "192.0.2.1")
                .body(Bytes::new())
                .unwrap(),
        );
        mw.decorate(&mut req);
        assert_eq!(req.header("x-client-asn"), Some(VODAFONE));
    }

    #[test]
    fn non_ascii_organization_survives_into_header() {
        let registry = Arc::new(Registry::with_opener(|_| {
            let lookup: Arc<dyn AsnLookup> = Arc::new(|_: IpAddr| -> Result<AsnRecord, LookupError> {
                Ok(AsnRecord::new(3352, "Telefónica de España"))
            });
            Ok(lookup)
        }));
        let mw = AsnMiddleware::construct(
            |_: Request| async { Response::text("") },
            present(),
            "asn",
            registry,
        )
        .unwrap();

        let mut req = request(Some("80.58.61.250"));
        mw.decorate(&mut req);
        let raw = req.headers().get("x-asn").unwrap().as_bytes();
        let record: AsnRecord = serde_json::from_slice(raw).unwrap();
        assert_eq!(record.asn_organization, "Telefónica de España");
    }

    #[test]
    fn organization_with_control_bytes_is_not_blanked() {
        let registry = Arc::new(Registry::with_opener(|_| {
            let lookup: Arc<dyn AsnLookup> = Arc::new(|_: IpAddr| -> Result<AsnRecord, LookupError> {
                Ok(AsnRecord::new(64512, "Acme\u{7f}Net"))
            });
            Ok(lookup)
        }));
        let mw = AsnMiddleware::construct(
            |_: Request| async { Response::text("") },
            present(),
            "asn",
            registry,
        )
        .unwrap();

        let mut req = request(Some("198.51.100.7"));
        mw.decorate(&mut req);
        let raw = req.headers().get("x-asn").unwrap().as_bytes();
        assert!(!raw.is_empty());
        let record: AsnRecord = serde_json::from_slice(raw).unwrap();
        assert_eq!(record, AsnRecord::new(64512, "Acme\u{7f}Net"));
    }

    #[test]
    fn resolution_header_values() {
        assert_eq!(Resolution::Found(AsnRecord::new(3209, "Vodafone GmbH")).header_value(), VODAFONE);
        assert_eq!(Resolution::NotFound.header_value(), "");
        assert_eq!(Resolution::Invalid.header_value(), "");
    }

    #[tokio::test]
    async fn middleware_chains_into_middleware() {
        let registry = table_registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = AsnMiddleware::construct(
            echo(&calls),
            present().output_header("X-Inner-ASN"),
            "inner",
            Arc::clone(&registry),
        )
        .unwrap();
        let outer = AsnMiddleware::construct(inner, present(), "outer", registry).unwrap();

        assert_eq!(seen_by_next(&outer, request(Some("188.193.88.199"))).await, VODAFONE);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
