//! Conversion between wire messages and pipeline messages.
//!
//! # Responsibilities
//! - Build a pipeline `Request` from an inbound axum request
//! - Turn a pipeline `Request` into a hyper request for the upstream client
//! - Wrap an upstream hyper response as a pipeline `Response`
//! - Write a pipeline `Response` back to the client
//!
//! # Design Decisions
//! - Bodies stay streaming in both directions; the entity buffers only what
//!   a branch needs to replay
//! - Hop-by-hop headers never cross the gateway

use std::io;
use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{self, header, HeaderMap, Uri};
use futures_util::{StreamExt, TryStreamExt};
use hyper::body::Incoming;
use hyper::ext::ReasonPhrase;
use url::Url;

use crate::entity::{BodyStream, Entity, SpillLimits};
use crate::error::GatewayError;
use crate::message::{Request, Response};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Chunk stream over a wire body.
pub fn body_stream(body: Body) -> BodyStream {
    body.into_data_stream().map_err(io::Error::other).boxed()
}

/// Pipeline request for an inbound wire request.
///
/// The URI is rebuilt from the connection's local address when known, so it
/// reflects where the request actually arrived; the `Host` header is kept
/// untouched for filters that need to reconcile the two.
pub fn inbound_request(
    request: http::Request<Body>,
    local_address: Option<SocketAddr>,
    is_secure: bool,
    limits: SpillLimits,
) -> Result<Request, GatewayError> {
    let (parts, body) = request.into_parts();
    let uri = absolute_uri(&parts.uri, &parts.headers, local_address, is_secure)?;
    Ok(Request {
        method: parts.method,
        uri,
        version: parts.version,
        headers: parts.headers,
        entity: Entity::from_stream(body_stream(body), limits),
    })
}

fn absolute_uri(
    uri: &Uri,
    headers: &HeaderMap,
    local_address: Option<SocketAddr>,
    is_secure: bool,
) -> Result<Url, GatewayError> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Url::parse(&uri.to_string())
            .map_err(|e| GatewayError::BadRequest(format!("invalid request URI: {}", e)));
    }

    let authority = match local_address {
        Some(address) => address.to_string(),
        None => headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("localhost")
            .to_string(),
    };
    let scheme = if is_secure { "https" } else { "http" };
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Url::parse(&format!("{}://{}{}", scheme, authority, path))
        .map_err(|e| GatewayError::BadRequest(format!("invalid request URI: {}", e)))
}

/// Hyper request addressed to `request.uri`.
pub fn upstream_request(request: Request) -> Result<http::Request<Body>, GatewayError> {
    let Request {
        method,
        mut uri,
        mut headers,
        entity,
        ..
    } = request;

    uri.set_fragment(None);
    let target: Uri = uri
        .as_str()
        .parse()
        .map_err(|e| GatewayError::BadRequest(format!("invalid upstream URI {}: {}", uri, e)))?;

    let has_body = headers.contains_key(header::CONTENT_LENGTH)
        || headers.contains_key(header::TRANSFER_ENCODING);
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);

    let body = if has_body {
        Body::from_stream(entity.into_stream())
    } else {
        Body::empty()
    };

    let mut outbound = http::Request::new(body);
    *outbound.method_mut() = method;
    *outbound.uri_mut() = target;
    *outbound.headers_mut() = headers;
    Ok(outbound)
}

/// Pipeline response for an upstream reply.
pub fn upstream_response(response: http::Response<Incoming>, limits: SpillLimits) -> Response {
    let (parts, body) = response.into_parts();
    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);

    let mut converted = Response::new(parts.status);
    converted.version = parts.version;
    converted.headers = headers;
    converted.entity = Entity::from_stream(body_stream(Body::new(body)), limits);
    converted
}

/// Wire response for a pipeline response.
pub fn client_response(response: Response) -> axum::response::Response {
    let Response {
        status,
        reason,
        mut headers,
        entity,
        ..
    } = response;
    strip_hop_by_hop(&mut headers);

    let mut outbound = axum::response::Response::new(Body::from_stream(entity.into_stream()));
    *outbound.status_mut() = status;
    *outbound.headers_mut() = headers;
    if let Some(reason) = reason {
        if let Ok(phrase) = ReasonPhrase::try_from(reason) {
            outbound.extensions_mut().insert(phrase);
        }
    }
    outbound
}
