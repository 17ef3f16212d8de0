//! Request metadata extractors.
//!
//! None of these can fail, so handlers take them only to enrich logs:
//!
//! - [`CorrelationId`]: the id the correlation layer assigned to the request
//! - [`ClientIp`]: caller address, honoring reverse-proxy headers
//! - [`UserAgent`]: the `User-Agent` header, if sent
//!
//! ```ignore
//! async fn login(
//!     State(state): State<AppState>,
//!     ClientIp(ip): ClientIp,
//!     Json(request): Json<LoginRequest>,
//! ) -> Result<ApiResponse<LoginResponse>, AppError> {
//!     tracing::info!(client_ip = %ip, "Login link requested");
//!     ...
//! }
//! ```

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use uuid::Uuid;

use crate::middleware::CORRELATION_ID_HEADER;

/// Correlation id of the current request.
///
/// Prefers the id stored by [`crate::middleware::correlation_id_layer`], so
/// handler logs carry the same id as the response header. Without the layer
/// it falls back to the request header, then to a fresh UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts.extensions.get::<Uuid>().copied().or_else(|| {
            parts
                .headers
                .get(CORRELATION_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| Uuid::parse_str(s).ok())
        });
        Ok(Self(id.unwrap_or_else(Uuid::new_v4)))
    }
}

/// Address of the caller.
///
/// Checked in order: the first `X-Forwarded-For` entry, `X-Real-IP`, the
/// socket address (when served with connect info), then loopback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let socket = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip());
        Ok(Self(
            forwarded_ip(&parts.headers)
                .or(socket)
                .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        ))
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    text("x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
        .or_else(|| text("x-real-ip").and_then(|ip| ip.trim().parse().ok()))
}

/// The `User-Agent` header, `None` when absent or not valid text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgent(pub Option<String>);

impl UserAgent {
    /// Header value, or `"unknown"`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_deref().unwrap_or("unknown")
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for UserAgent
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string),
        ))
    }
}
