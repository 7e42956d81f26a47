//! JSON control API served on connections whose first request targets the
//! API prefix.
use std::{sync::Arc, time::Instant};

use axum::{
    body::{Body as AxumBody, to_bytes},
    http::{Method, StatusCode, header},
};
use eyre::{Result, WrapErr};
use hyper::{Request, Response};
use serde::Serialize;

use crate::core::{
    control::{ControlError, ControlPlane},
    route::Route,
    router::{Dispatch, Router, Verb},
};

/// Largest request body the API will buffer.
const MAX_BODY_BYTES: usize = 1024 * 1024;

const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";

/// Operations reachable through the control API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    ListRoutes,
    CreateRoute,
    GetRoute,
    DeleteRoute,
    GetBackends,
    SetBackends,
    Reconcile,
    Status,
}

/// Build the endpoint table under `prefix` (which starts and ends with `/`).
pub fn api_router(prefix: &str) -> Router<Endpoint> {
    let routes = format!("{prefix}v1/routes");
    let route = format!("{routes}/*");
    let backends = format!("{route}/backends");

    Router::builder()
        .handle(Verb::Get, &routes, Endpoint::ListRoutes)
        .handle(Verb::Post, &routes, Endpoint::CreateRoute)
        .handle(Verb::Get, &route, Endpoint::GetRoute)
        .handle(Verb::Delete, &route, Endpoint::DeleteRoute)
        .handle(Verb::Get, &backends, Endpoint::GetBackends)
        .handle(Verb::Post, &backends, Endpoint::SetBackends)
        .handle(Verb::Post, &format!("{prefix}v1/reconcile"), Endpoint::Reconcile)
        .handle(Verb::Get, &format!("{prefix}v1/status"), Endpoint::Status)
        .build()
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// HTTP handler for the control API
pub struct ApiHandler {
    router: Router<Endpoint>,
    control: Arc<ControlPlane>,
    started_at: Instant,
}

impl ApiHandler {
    pub fn new(control: Arc<ControlPlane>, prefix: &str) -> Self {
        Self {
            router: api_router(prefix),
            control,
            started_at: Instant::now(),
        }
    }

    /// Dispatch one request. Domain failures become JSON error responses;
    /// only a failure to assemble a response is returned as `Err`.
    pub async fn handle_request(&self, req: Request<AxumBody>) -> Result<Response<AxumBody>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let (endpoint, captures) = match self.router.dispatch(method.as_str(), &path) {
            Dispatch::Matched { handler, captures } => (*handler, captures),
            Dispatch::NotFound => {
                return error_response(StatusCode::NOT_FOUND, &format!("no route for {path}"));
            }
            Dispatch::MethodNotAllowed => {
                let allowed = self
                    .router
                    .allowed(&path)
                    .into_iter()
                    .map(Verb::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut response = error_response(
                    StatusCode::METHOD_NOT_ALLOWED,
                    &format!("{method} is not allowed on {path}"),
                )?;
                if let Ok(value) = allowed.parse() {
                    response.headers_mut().insert(header::ALLOW, value);
                }
                return Ok(response);
            }
        };

        tracing::debug!(%method, %path, ?endpoint, "Control API request");

        // Captures are raw path segments; route names are stored decoded.
        let name = match captures.first() {
            Some(raw) => match urlencoding::decode(raw) {
                Ok(name) => name.into_owned(),
                Err(e) => {
                    return error_response(
                        StatusCode::BAD_REQUEST,
                        &format!("invalid route name in path: {e}"),
                    );
                }
            },
            None => String::new(),
        };
        let result = match endpoint {
            Endpoint::ListRoutes => self.control.list_routes().await.map(json),
            Endpoint::GetRoute => self.control.get_route(&name).await.map(json),
            Endpoint::CreateRoute => match read_json::<Route>(req).await {
                Ok(route) => self.control.create_route(route).await.map(json),
                Err(e) => Err(e),
            },
            Endpoint::DeleteRoute => self
                .control
                .delete_route(&name)
                .await
                .map(|()| Reply::NoContent),
            Endpoint::GetBackends => self.control.get_backends(&name).await.map(json),
            Endpoint::SetBackends => match read_json::<Vec<String>>(req).await {
                Ok(backends) => self.control.set_backends(&name, backends).await.map(json),
                Err(e) => Err(e),
            },
            Endpoint::Reconcile => self
                .control
                .reconcile()
                .await
                .map(|routes| Reply::Json(serde_json::json!({ "routes": routes }))),
            Endpoint::Status => self.status().await,
        };

        match result {
            Ok(Reply::Json(body)) => json_response(StatusCode::OK, &body),
            Ok(Reply::NoContent) => Response::builder()
                .status(StatusCode::NO_CONTENT)
                .body(AxumBody::empty())
                .wrap_err("Failed to build empty response"),
            Err(e) => {
                let status = e.status_code();
                if status.is_server_error() {
                    tracing::error!(%method, %path, error = %e, "Control API request failed");
                } else {
                    tracing::debug!(%method, %path, error = %e, "Control API request rejected");
                }
                error_response(status, &e.to_string())
            }
        }
    }

    async fn status(&self) -> Result<Reply, ControlError> {
        let routes = self.control.list_routes().await?;
        let routable = routes.iter().filter(|r| r.is_routable()).count();
        Ok(Reply::Json(serde_json::json!({
            "service": "quay",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": self.started_at.elapsed().as_secs(),
            "routes": {
                "total": routes.len(),
                "routable": routable
            },
            "timestamp": chrono::Utc::now().to_rfc3339()
        })))
    }
}

enum Reply {
    Json(serde_json::Value),
    NoContent,
}

fn json<T: Serialize>(value: T) -> Reply {
    Reply::Json(serde_json::to_value(value).unwrap_or(serde_json::Value::Null))
}

async fn read_json<T: serde::de::DeserializeOwned>(req: Request<AxumBody>) -> Result<T, ControlError> {
    if req.method() != Method::POST {
        return Err(ControlError::BadRequest("expected a POST body".to_string()));
    }
    let bytes = to_bytes(req.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| ControlError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ControlError::BadRequest(format!("invalid JSON body: {e}")))
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Result<Response<AxumBody>> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, JSON_CONTENT_TYPE)
        .body(AxumBody::from(body.to_string()))
        .wrap_err("Failed to build JSON response")
}

fn error_response(status: StatusCode, message: &str) -> Result<Response<AxumBody>> {
    let body = serde_json::to_value(ErrorBody { error: message })
        .wrap_err("Failed to encode error body")?;
    json_response(status, &body)
}
