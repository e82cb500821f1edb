//! Body conversions shared by the handler and the tunnel.

use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Response;
use std::convert::Infallible;

/// Body type of every response the proxy hands to hyper.
pub type ProxyBody = UnsyncBoxBody<Bytes, hyper::Error>;

/// Extension trait for `Response<Full<Bytes>>` providing common transformations.
pub trait ResponseExt {
    /// Convert the response body into the proxy's boxed body type.
    fn into_boxed(self) -> Response<ProxyBody>;
}

impl ResponseExt for Response<Full<Bytes>> {
    fn into_boxed(self) -> Response<ProxyBody> {
        self.map(|b| b.map_err(|never: Infallible| match never {}).boxed_unsync())
    }
}
