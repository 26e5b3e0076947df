//! Mount a `RouteTable` onto an axum router.
//!
//! Sync routes run their handler inline on the connection task. Async routes
//! are submitted to the dispatcher; the connection task then waits for the
//! worker to complete the deferred request.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{MethodFilter, MethodRouter},
};
use tokio::sync::oneshot;
use tracing::Instrument;

use crate::dispatch::{Dispatcher, Handler, WorkerContext};
use crate::error::ApiError;
use crate::request::{DeviceRequest, RequestId};
use crate::routing::{EndpointHandler, EndpointResult, HttpMethod, Route, RouteTable};

use super::deferred::{DeferredHttpRequest, PendingRequest};

pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher<DeferredHttpRequest>>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher<DeferredHttpRequest>>) -> Self {
        Self {
            dispatcher,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }
}

/// How a mounted route executes.
#[derive(Clone)]
enum Execution {
    Inline(EndpointHandler),
    Dispatched(Handler<DeferredHttpRequest>),
}

impl Execution {
    fn for_route(route: &Route) -> Self {
        let endpoint = Arc::clone(&route.handler);
        if !route.run_async {
            return Execution::Inline(endpoint);
        }
        Execution::Dispatched(Arc::new(
            move |deferred: &mut DeferredHttpRequest, ctx: &WorkerContext| {
                tracing::debug!(worker = %ctx.slot(), request_id = %deferred.request().id, "Running deferred request");
                let response = endpoint_response(endpoint(deferred.request()));
                deferred.respond(response);
            },
        ))
    }
}

fn method_filter(method: HttpMethod) -> MethodFilter {
    match method {
        HttpMethod::Get => MethodFilter::GET,
        HttpMethod::Post => MethodFilter::POST,
        HttpMethod::Put => MethodFilter::PUT,
        HttpMethod::Delete => MethodFilter::DELETE,
    }
}

pub fn endpoint_response(result: EndpointResult) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn not_found() -> ApiError {
    ApiError::not_found("Not found")
}

async fn method_not_allowed() -> ApiError {
    ApiError::new(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

pub fn router(table: &RouteTable, state: AppState) -> Router {
    let mut by_path: BTreeMap<&str, MethodRouter> = BTreeMap::new();

    for route in table.routes() {
        let execution = Execution::for_route(route);
        let state = state.clone();
        let handler = move |req: Request| {
            let execution = execution.clone();
            let state = state.clone();
            async move { handle(execution, state, req).await }
        };

        let methods = by_path
            .remove(route.path.as_str())
            .unwrap_or_else(|| MethodRouter::new().fallback(method_not_allowed));
        by_path.insert(&route.path, methods.on(method_filter(route.method), handler));
    }

    by_path
        .into_iter()
        .fold(Router::new(), |router, (path, methods)| {
            router.route(path, methods)
        })
        .fallback(not_found)
}

async fn handle(execution: Execution, state: AppState, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let id = RequestId::new();
    let span = tracing::info_span!(
        "request",
        request_id = %id,
        method = %parts.method,
        path = %parts.uri.path()
    );

    async move {
        let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read request body");
                return ApiError::bad_request("Failed to read request body").into_response();
            }
        };

        let request = DeviceRequest {
            id,
            path: parts.uri.path().to_string(),
            method: parts.method,
            headers: parts.headers,
            body,
        };

        match execution {
            Execution::Inline(endpoint) => endpoint_response(endpoint(&request)),
            Execution::Dispatched(handler) => dispatch(&state, request, handler).await,
        }
    }
    .instrument(span)
    .await
}

async fn dispatch(
    state: &AppState,
    request: DeviceRequest,
    handler: Handler<DeferredHttpRequest>,
) -> Response {
    let (tx, rx) = oneshot::channel();

    if let Err(e) = state
        .dispatcher
        .submit(PendingRequest::new(request, tx), handler)
        .await
    {
        tracing::warn!(error = %e, "Request rejected by dispatcher");
        return ApiError::from(e).into_response();
    }

    rx.await.unwrap_or_else(|_| {
        tracing::error!("Worker released request without responding");
        ApiError::internal("Request completed without a response").into_response()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchConfig;
    use axum::body::Body;
    use axum::http;
    use crate::endpoints::tests::RecordingWifi;
    use crate::endpoints::{DispatchPolicy, WebContext, device_routes};
    use crate::health::HealthReporter;
    use crate::wifi::WifiManager;
    use http_body_util::BodyExt;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn started(workers: usize) -> Arc<Dispatcher<DeferredHttpRequest>> {
        Arc::new(
            Dispatcher::try_start(DispatchConfig {
                workers,
                ..Default::default()
            })
            .unwrap(),
        )
    }

    async fn wait_idle(dispatcher: &Dispatcher<DeferredHttpRequest>, idle: usize) {
        for _ in 0..1000 {
            if dispatcher.stats().idle == idle {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("dispatcher never reached {idle} idle workers");
    }

    fn device_app(dispatcher: Arc<Dispatcher<DeferredHttpRequest>>) -> (Router, Arc<RecordingWifi>) {
        let wifi = Arc::new(RecordingWifi::default());
        let health = HealthReporter::new().with_fields(dispatcher.clone());
        let table = device_routes(
            WebContext::new(wifi.clone()),
            Arc::new(health),
            DispatchPolicy::default(),
        )
        .unwrap();
        (router(&table, AppState::new(dispatcher)), wifi)
    }

    fn post(path: &str, body: &'static str) -> Request {
        http::Request::post(path)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn set_hostname_round_trip() {
        let dispatcher = started(2);
        wait_idle(&dispatcher, 2).await;
        let (app, wifi) = device_app(dispatcher);

        let response = app
            .clone()
            .oneshot(post("/set_hostname", r#"{"host_name":"device-42"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response_json(response).await,
            serde_json::json!({"status": "OK", "host_name": "device-42"})
        );
        assert_eq!(wifi.host_name().as_deref(), Some("device-42"));

        let response = app.oneshot(post("/set_hostname", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response_json(response).await,
            serde_json::json!({"error": "Content-Length required", "statusCode": 400})
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn healthz_runs_inline_with_worker_stats() {
        let dispatcher = started(3);
        wait_idle(&dispatcher, 3).await;
        let (app, _) = device_app(dispatcher);

        let response = app
            .oneshot(http::Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert!(json["uptime"].is_u64());
        assert!(json["time"].is_string());
        assert_eq!(json["workers"], serde_json::json!({"total": 3, "idle": 3}));
    }

    #[tokio::test]
    async fn unknown_path_is_json_404() {
        let (app, _) = device_app(Arc::new(Dispatcher::unavailable()));

        let response = app
            .oneshot(http::Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response_json(response).await,
            serde_json::json!({"error": "Not found", "statusCode": 404})
        );
    }

    #[tokio::test]
    async fn wrong_method_is_json_405() {
        let (app, _) = device_app(Arc::new(Dispatcher::unavailable()));

        let response = app
            .oneshot(http::Request::get("/reset").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response_json(response).await["statusCode"], 405);
    }

    #[tokio::test]
    async fn async_route_without_dispatcher_is_500() {
        let (app, wifi) = device_app(Arc::new(Dispatcher::unavailable()));

        let response = app.oneshot(post("/reset", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response_json(response).await["error"],
            "Async dispatch unavailable"
        );
        assert_eq!(*wifi.cleared.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn oversized_body_rejected() {
        let mut table = RouteTable::new();
        table
            .register(
                "/echo",
                HttpMethod::Post,
                Arc::new(|_: &DeviceRequest| -> EndpointResult { Ok(serde_json::json!({})) }),
                false,
            )
            .unwrap();
        let app = router(
            &table,
            AppState::new(Arc::new(Dispatcher::unavailable())).with_max_body_bytes(4),
        );

        let response = app.oneshot(post("/echo", "0123456789")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response_json(response).await["error"],
            "Failed to read request body"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn busy_pool_returns_503() {
        let dispatcher = started(1);
        wait_idle(&dispatcher, 1).await;

        // The single worker parks in this handler until released.
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));
        let mut table = RouteTable::new();
        table
            .register(
                "/slow",
                HttpMethod::Post,
                Arc::new(move |_: &DeviceRequest| -> EndpointResult {
                    let _ = release_rx.lock().unwrap().recv();
                    Ok(serde_json::json!({"status": "OK"}))
                }),
                true,
            )
            .unwrap();
        let app = router(&table, AppState::new(dispatcher.clone()));

        let first = tokio::spawn(app.clone().oneshot(post("/slow", "")));
        wait_idle(&dispatcher, 0).await;

        let response = app.clone().oneshot(post("/slow", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response_json(response).await,
            serde_json::json!({"error": "Server busy, try again", "statusCode": 503})
        );

        release_tx.send(()).unwrap();
        let response = first.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn handler_panic_still_answers() {
        let dispatcher = started(1);
        wait_idle(&dispatcher, 1).await;

        let mut table = RouteTable::new();
        table
            .register(
                "/boom",
                HttpMethod::Post,
                Arc::new(|_: &DeviceRequest| -> EndpointResult { panic!("endpoint failure") }),
                true,
            )
            .unwrap();
        let app = router(&table, AppState::new(dispatcher.clone()));

        let response = app.oneshot(post("/boom", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response_json(response).await["error"],
            "Request completed without a response"
        );
        wait_idle(&dispatcher, 1).await;
    }
}
