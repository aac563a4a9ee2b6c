//! HTTP front end for a [`Publisher`].
//!
//! Serves `SUBSCRIBE` and `UNSUBSCRIBE` on `/event/<service id>`; other
//! methods get `405` and other paths `404`.

use std::convert::Infallible;

use tracing::trace;
use warp::http::header::HeaderValue;
use warp::http::{HeaderMap, Method, StatusCode};
use warp::reply::Response;
use warp::{Filter, Reply};

use super::publisher::{GenaRequest, GenaResponse, Publisher};

/// Path of the event URL of `service_id`, relative to the endpoint root.
pub fn event_path(service_id: &str) -> String {
    format!("/event/{}", service_id)
}

/// Warp filter answering GENA requests for every service of `publisher`.
pub fn event_route(
    publisher: Publisher,
) -> impl Filter<Extract = (Response,), Error = Infallible> + Clone {
    warp::path!("event" / String)
        .and(warp::method())
        .and(warp::header::headers_cloned())
        .map(move |service_id: String, method: Method, headers: HeaderMap| {
            let pairs = headers
                .iter()
                .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), value)));
            let request = GenaRequest::from_headers(method.as_str(), &service_id, pairs);
            let response = publisher.handle_request(&request);
            trace!(method = %method, %service_id, status = response.status, "GENA request handled");
            into_reply(response, &publisher.config().server_product)
        })
        .recover(|_rejection: warp::Rejection| async {
            Ok::<_, Infallible>(warp::reply::with_status(warp::reply(), StatusCode::NOT_FOUND).into_response())
        })
        .unify()
}

fn into_reply(response: GenaResponse, server_product: &str) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut reply = warp::reply::with_status(warp::reply(), status).into_response();
    let headers = reply.headers_mut();
    if let Ok(value) = HeaderValue::from_str(server_product) {
        headers.insert("server", value);
    }
    if let Some(value) = response.sid.and_then(|sid| HeaderValue::from_str(&sid).ok()) {
        headers.insert("sid", value);
    }
    if let Some(value) = response
        .timeout
        .and_then(|timeout| HeaderValue::from_str(&timeout.to_string()).ok())
    {
        headers.insert("timeout", value);
    }
    reply
}
