//! HTTP middleware stack for the mock inference listener.
//!
//! Transport layers are listed outermost first. The request/response log
//! wraps all of them, so timeouts and caught panics are logged too.

use std::any::Any;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::HeaderName;
use axum::http::{Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::catch_panic::{CatchPanicLayer, ResponseForPanic};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::config::ListenerConfig;
use super::error::INTERNAL_ERROR_MESSAGE;

/// The composed Tower layer type produced by [`build_http_layers`].
type HttpLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        TimeoutLayer,
        tower::layer::util::Stack<
            CatchPanicLayer<PanicAsInternalError>,
            tower::layer::util::Stack<
                TraceLayer<
                    tower_http::classify::SharedClassifier<
                        tower_http::classify::ServerErrorsAsFailures,
                    >,
                >,
                tower::layer::util::Stack<
                    SetRequestIdLayer<MakeRequestUuid>,
                    tower::layer::util::Identity,
                >,
            >,
        >,
    >,
>;

/// Builds the transport-level middleware stack.
///
/// Outermost to innermost:
/// 1. `SetRequestId` -- tags each request with a fresh `x-request-id`
/// 2. `Tracing` -- request/response trace spans
/// 3. `CatchPanic` -- a panicking handler becomes a generic 500
/// 4. `Timeout` -- caps total request time, simulated delay included
/// 5. `PropagateRequestId` -- copies `X-Request-Id` from the request to the response
#[must_use]
pub fn build_http_layers(config: &ListenerConfig) -> HttpLayers {
    let x_request_id = HeaderName::from_static("x-request-id");

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(PanicAsInternalError))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

/// Applies the transport stack and, outermost, the request/response log.
pub fn with_http_layers<S>(router: Router<S>, config: &ListenerConfig) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(build_http_layers(config))
        .layer(axum::middleware::from_fn(log_requests))
}

/// Logs method and path before each request and the status code after it.
pub async fn log_requests(request: Request, next: Next) -> Response<Body> {
    info!("Request: {} {}", request.method(), request.uri().path());

    let response = next.run(request).await;
    let status = response.status();

    info!("Response: {}", status.as_u16());
    metrics::counter!(
        "mock_analysis_http_responses_total",
        "status" => status.as_u16().to_string()
    )
    .increment(1);

    response
}

/// Converts a handler panic into the generic internal-error response.
#[derive(Debug, Clone, Copy)]
pub struct PanicAsInternalError;

impl ResponseForPanic for PanicAsInternalError {
    type ResponseBody = Body;

    fn response_for_panic(&mut self, err: Box<dyn Any + Send + 'static>) -> Response<Body> {
        let detail = if let Some(s) = err.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = err.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        error!(panic = %detail, "request handler panicked");

        (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE).into_response()
    }
}
