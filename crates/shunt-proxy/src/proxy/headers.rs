//! Header names the proxy treats specially.
//!
//! Static `HeaderName`s avoid runtime `.parse().unwrap()` calls at the
//! forwarding sites.

use hyper::header::{HeaderName, HeaderValue};
use hyper::Response;

pub static PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");
pub static KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");
pub static X_SHUNT_MOCKED: HeaderName = HeaderName::from_static("x-shunt-mocked");

pub static VALUE_TRUE: HeaderValue = HeaderValue::from_static("true");

/// Request headers that describe the client-to-proxy hop and are never sent upstream.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    use hyper::header::{CONNECTION, HOST, PROXY_AUTHORIZATION, TE, TRANSFER_ENCODING, UPGRADE};

    name == HOST
        || name == CONNECTION
        || name == PROXY_AUTHORIZATION
        || name == TE
        || name == TRANSFER_ENCODING
        || name == UPGRADE
        || name == PROXY_CONNECTION
        || name == KEEP_ALIVE
}

/// Extension trait for tagging responses produced by the proxy itself.
pub trait ShuntHeadersExt {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue);
}

impl<B> ShuntHeadersExt for Response<B> {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        self.headers_mut().insert(name.clone(), value.clone());
    }
}
