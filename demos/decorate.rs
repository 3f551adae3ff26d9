//! Serve a decorated handler over a bare hyper HTTP/1 connection.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example decorate -- [config.json]
//!
//! The optional config file uses the plugin keys, e.g.
//!   {"MM_ASN_DB": "/etc/geoip/GeoLite2-ASN.mmdb"}
//!
//! Try:
//!   curl -H 'True-Client-IP: 188.193.88.199' -H 'X-Real-IP: 8.8.8.8' http://localhost:3000/

use std::net::SocketAddr;
use std::sync::Arc;

use asnhdr::{AsnConfig, AsnMiddleware, Registry, Request, Response};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config: AsnConfig = match std::env::args().nth(1) {
        Some(path) => serde_json::from_slice(&std::fs::read(path)?)?,
        None => AsnConfig::default(),
    };

    // Both instances share the registry; the database is decoded once.
    let registry = Arc::new(Registry::new());
    let Ok(real_ip) = AsnMiddleware::construct(
        echo,
        config.clone().input_header("X-Real-IP").output_header("X-Real-ASN"),
        "real-ip",
        Arc::clone(&registry),
    );
    let Ok(chain) = AsnMiddleware::construct(real_ip, config, "client-ip", registry);
    let chain = Arc::new(chain);

    let addr: SocketAddr = "0.0.0.0:3000".parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let chain = Arc::clone(&chain);

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let chain = Arc::clone(&chain);
                async move { dispatch(&chain, req).await }
            });
            if let Err(e) = http1::Builder::new().serve_connection(TokioIo::new(stream), svc).await {
                error!(%peer, "connection error: {e}");
            }
        });
    }
}

async fn dispatch(
    chain: &AsnMiddleware,
    req: hyper::Request<Incoming>,
) -> Result<hyper::Response<Full<Bytes>>, hyper::Error> {
    let (head, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();
    let res = chain.handle(Request::from(http::Request::from_parts(head, body))).await;
    Ok(res.into_http().map(Full::new))
}

// Every header the upstream would have received.
async fn echo(req: Request) -> Response {
    let lines: Vec<String> = req.headers()
        .iter()
        .map(|(name, value)| format!("{name}: {}", String::from_utf8_lossy(value.as_bytes())))
        .collect();
    Response::text(lines.join("\n"))
}
