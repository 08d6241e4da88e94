//! gRPC surface: Info and Health services plus the unary auth layer.

use chrono::{SecondsFormat, Utc};
use http::{HeaderValue, Request as HttpRequest, Response as HttpResponse};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::body::BoxBody;
use tonic::{Request, Response, Status};
use tower::{Layer, Service};

use qazna_core::observability::metrics::set_ready;

use crate::middleware::auth::extract_bearer_token;
use crate::services::tokens::TokenService;
use crate::{ReadyProbe, SERVICE_NAME};

pub mod proto {
    pub mod qazna {
        pub mod v1 {
            tonic::include_proto!("qazna.v1");
        }
    }
}

use proto::qazna::v1 as pb;
use proto::qazna::v1::health_service_server::{HealthService, HealthServiceServer};
use proto::qazna::v1::info_service_server::{InfoService, InfoServiceServer};

/// Methods callable without a bearer token.
const PUBLIC_METHODS: &[&str] =
    &["/qazna.v1.HealthService/Check", "/qazna.v1.InfoService/GetInfo"];

pub struct QaznaGrpc {
    readiness: ReadyProbe,
    version: String,
}

impl QaznaGrpc {
    pub fn new(readiness: ReadyProbe, version: impl Into<String>) -> Self {
        Self { readiness, version: version.into() }
    }

    pub fn info_service(readiness: ReadyProbe, version: &str) -> InfoServiceServer<QaznaGrpc> {
        InfoServiceServer::new(QaznaGrpc::new(readiness, version))
    }

    pub fn health_service(readiness: ReadyProbe, version: &str) -> HealthServiceServer<QaznaGrpc> {
        HealthServiceServer::new(QaznaGrpc::new(readiness, version))
    }
}

#[tonic::async_trait]
impl InfoService for QaznaGrpc {
    async fn get_info(
        &self,
        _request: Request<pb::InfoRequest>,
    ) -> Result<Response<pb::InfoResponse>, Status> {
        Ok(Response::new(pb::InfoResponse {
            name: SERVICE_NAME.to_string(),
            version: self.version.clone(),
            time_rfc3339: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }))
    }
}

#[tonic::async_trait]
impl HealthService for QaznaGrpc {
    async fn check(
        &self,
        _request: Request<pb::HealthCheckRequest>,
    ) -> Result<Response<pb::HealthCheckResponse>, Status> {
        if let Err(err) = self.readiness.check().await {
            set_ready(false);
            return Err(Status::unavailable(format!("not ready: {err}")));
        }
        set_ready(true);
        Ok(Response::new(pb::HealthCheckResponse {
            status: "ok".to_string(),
            service: SERVICE_NAME.to_string(),
            version: self.version.clone(),
            time_rfc3339: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }))
    }
}

/// Unary auth mirror of the HTTP middleware: requests to methods outside
/// the public allow-list must carry `authorization: Bearer <token>`
/// metadata that verifies against the cached signing keys.
#[derive(Clone)]
pub struct GrpcAuthLayer {
    tokens: Option<Arc<TokenService>>,
}

impl GrpcAuthLayer {
    pub fn new(tokens: Option<Arc<TokenService>>) -> Self {
        Self { tokens }
    }
}

impl<S> Layer<S> for GrpcAuthLayer {
    type Service = GrpcAuth<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GrpcAuth { inner, tokens: self.tokens.clone() }
    }
}

#[derive(Clone)]
pub struct GrpcAuth<S> {
    inner: S,
    tokens: Option<Arc<TokenService>>,
}

impl<S, ReqBody> Service<HttpRequest<ReqBody>> for GrpcAuth<S>
where
    S: Service<HttpRequest<ReqBody>, Response = HttpResponse<BoxBody>> + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: HttpRequest<ReqBody>) -> Self::Future {
        let denied = match &self.tokens {
            Some(tokens) if !PUBLIC_METHODS.contains(&request.uri().path()) => {
                match bearer_from_headers(&request) {
                    Ok(token) => tokens
                        .verify_cached(token)
                        .err()
                        .map(|_| Status::unauthenticated("invalid token")),
                    Err(message) => Some(Status::unauthenticated(message)),
                }
            }
            _ => None,
        };

        if let Some(status) = denied {
            return Box::pin(async move { Ok(status_response(status)) });
        }
        let future = self.inner.call(request);
        Box::pin(future)
    }
}

fn bearer_from_headers<B>(request: &HttpRequest<B>) -> Result<&str, &'static str> {
    let header = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    extract_bearer_token(header)
}

/// Trailers-only gRPC error response: HTTP 200 with grpc-status headers.
fn status_response(status: Status) -> HttpResponse<BoxBody> {
    let mut response = HttpResponse::new(tonic::body::empty_body());
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/grpc"),
    );
    response
        .headers_mut()
        .insert("grpc-status", HeaderValue::from(status.code() as i32));
    if let Ok(message) = HeaderValue::from_str(status.message()) {
        response.headers_mut().insert("grpc-message", message);
    }
    response
}
