use crate::errors::ServiceError;
use crate::handler::MonacoHandler;
use crate::metrics_defs::EVENTS_RECEIVED;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use keptn::events::CloudEvent;
use shared::admin_service::AdminService;
use shared::counter;
use shared::http::{make_error_response, make_text_response};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Events waiting for the worker. Senders wait once the queue is full.
pub const EVENT_QUEUE_SIZE: usize = 64;

type ReadinessCheck = Box<dyn Fn() -> bool + Send + Sync>;

/// Accepts CloudEvents over HTTP and queues them for the worker. `GET`
/// requests are answered by the health probes; the service is ready while
/// the worker still holds the receiving end of the queue.
pub struct EventIngestService {
    queue: mpsc::Sender<CloudEvent>,
    probes: AdminService<ReadinessCheck, ServiceError>,
}

impl EventIngestService {
    pub fn new(queue: mpsc::Sender<CloudEvent>) -> Self {
        let worker_queue = queue.clone();
        let is_ready: ReadinessCheck = Box::new(move || !worker_queue.is_closed());

        EventIngestService {
            queue,
            probes: AdminService::new(is_ready),
        }
    }
}

impl Service<Request<Incoming>> for EventIngestService {
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = ServiceError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        if req.method() != Method::POST {
            return self.probes.call(req);
        }

        let queue = self.queue.clone();
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = body.collect().await?.to_bytes();
            Ok(accept_event(&queue, &parts.headers, &body).await)
        })
    }
}

async fn accept_event(
    queue: &mpsc::Sender<CloudEvent>,
    headers: &http::HeaderMap,
    body: &[u8],
) -> Response<BoxBody<Bytes, Infallible>> {
    let event = match CloudEvent::from_http(headers, body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected malformed event");
            return make_text_response(StatusCode::BAD_REQUEST, format!("{e}\n"));
        }
    };

    tracing::info!(event_type = %event.r#type, id = %event.id, "Received event");
    counter!(EVENTS_RECEIVED).increment(1);

    match queue.send(event).await {
        Ok(()) => make_text_response(StatusCode::ACCEPTED, "accepted\n"),
        Err(_) => {
            tracing::error!("Event worker is gone, rejecting event");
            make_error_response(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// Processes queued events one at a time until every sender is dropped.
/// Once the worker is gone, by returning or by panicking, the queue is
/// closed and the readiness probe fails.
pub async fn run_worker(handler: Arc<MonacoHandler>, mut queue: mpsc::Receiver<CloudEvent>) {
    while let Some(event) = queue.recv().await {
        if let Err(e) = handler.handle(&event).await {
            tracing::error!(
                event_type = %event.r#type,
                id = %event.id,
                error = %e,
                "Could not handle event"
            );
        }
    }

    tracing::info!("Event worker stopped");
}
