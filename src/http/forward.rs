//! Upstream forwarding.
//!
//! # Responsibilities
//! - Define the capability the dispatcher forwards through
//! - Rewrite the request URI onto the chosen upstream
//! - Strip hop-by-hop headers in both directions
//! - Stream request and response bodies without buffering

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use axum::body::Body;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{HeaderMap, HeaderName, Request, Response, Uri};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("cannot build upstream uri: {0}")]
    Uri(#[from] axum::http::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
}

/// Sends a request to an upstream and returns its response.
pub trait Forwarder: Send + Sync + 'static {
    fn forward(
        &self,
        target: &Url,
        request: Request<Body>,
    ) -> impl Future<Output = Result<Response<Body>, ForwardError>> + Send;
}

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    HeaderName::from_static("connection"),
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("proxy-authenticate"),
    HeaderName::from_static("proxy-authorization"),
    HeaderName::from_static("te"),
    HeaderName::from_static("trailer"),
    HeaderName::from_static("upgrade"),
];

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in Connection are hop-by-hop too.
    let named: Vec<HeaderName> = headers
        .get_all(axum::http::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_str(name.trim()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Map `original` onto `target`.
///
/// The target's base path is prepended to the request path and both query
/// strings are kept, target first.
pub fn upstream_uri(target: &Url, original: &Uri) -> Result<Uri, axum::http::Error> {
    let base = target.path().trim_end_matches('/');
    let path = original.path();
    let mut path_and_query = if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    };

    match (target.query(), original.query()) {
        (Some(a), Some(b)) => path_and_query.push_str(&format!("?{a}&{b}")),
        (Some(q), None) | (None, Some(q)) => path_and_query.push_str(&format!("?{q}")),
        (None, None) => {}
    }

    let host = target.host_str().unwrap_or_default();
    let authority = match target.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    Uri::builder()
        .scheme(Scheme::from_str(target.scheme())?)
        .authority(Authority::from_str(&authority)?)
        .path_and_query(PathAndQuery::from_str(&path_and_query)?)
        .build()
}

/// Plain HTTP forwarder backed by a pooled hyper client.
#[derive(Clone)]
pub struct HttpForwarder {
    client: Client<HttpConnector, Body>,
}

impl HttpForwarder {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));

        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client }
    }
}

impl Forwarder for HttpForwarder {
    async fn forward(
        &self,
        target: &Url,
        request: Request<Body>,
    ) -> Result<Response<Body>, ForwardError> {
        let (mut parts, body) = request.into_parts();
        parts.uri = upstream_uri(target, &parts.uri)?;
        strip_hop_by_hop(&mut parts.headers);

        let response: Response<Incoming> =
            self.client.request(Request::from_parts(parts, body)).await?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}
