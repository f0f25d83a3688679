use crate::http::{make_error_response, make_text_response};
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Liveness and readiness probes for Kubernetes.
///
/// `/health` always answers `ok` while the process is serving. `/ready`
/// consults the readiness callback so a service can report that its event
/// worker has stopped.
pub struct AdminService<F, E> {
    is_ready: F,
    _error: PhantomData<E>,
}

impl<F, E> AdminService<F, E>
where
    F: Fn() -> bool,
{
    pub fn new(is_ready: F) -> Self {
        Self {
            is_ready,
            _error: PhantomData,
        }
    }

    /// Answers a probe request for `path`.
    pub fn respond(&self, path: &str) -> Response<BoxBody<Bytes, Infallible>> {
        probe_response(path, (self.is_ready)())
    }
}

impl<F, E> Service<Request<Incoming>> for AdminService<F, E>
where
    F: Fn() -> bool + Send + Sync + 'static,
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let response = self.respond(req.uri().path());

        Box::pin(async move { Ok(response) })
    }
}

fn probe_response(path: &str, is_ready: bool) -> Response<BoxBody<Bytes, Infallible>> {
    match path {
        "/health" => make_text_response(StatusCode::OK, "ok\n"),
        "/ready" if is_ready => make_text_response(StatusCode::OK, "ok\n"),
        "/ready" => make_error_response(StatusCode::SERVICE_UNAVAILABLE),
        _ => make_error_response(StatusCode::NOT_FOUND),
    }
}
