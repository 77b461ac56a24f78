//! Response helpers.

use rustkit_net::http::{HeaderMap, StatusCode};
use rustkit_net::Response;

/// The mutable parts of a response passed to a [`copy_response`] modifier.
#[derive(Debug, Clone)]
pub struct ResponseInit {
    pub headers: HeaderMap,
    pub status: StatusCode,
    pub status_text: String,
}

/// Build a fresh response with the same body, status and headers.
///
/// The copy is not marked as redirected and carries no URL, so it can be
/// stored and replayed as a plain response. `modifier` may adjust the
/// headers and status on the way.
pub fn copy_response<F>(response: &Response, modifier: Option<F>) -> Response
where
    F: FnOnce(ResponseInit) -> ResponseInit,
{
    let init = ResponseInit {
        headers: response.headers.clone(),
        status: response.status,
        status_text: response.status_text.clone(),
    };
    let init = match modifier {
        Some(modify) => modify(init),
        None => init,
    };

    let mut copy = Response::new(init.status, response.bytes());
    copy.headers = init.headers;
    copy.status_text = init.status_text;
    copy
}
