//! Shim HTTP server.

use crate::error::ShimError;
use crate::function::{Handler, Invoker, ProcessInvoker};
use crate::http::{FunctionRequest, FunctionResponse};
use crate::runtime::{Metrics, RequestHandler, ShimConfig};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::http::request::Parts;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// HTTP server for a single function.
///
/// Serves the function on `/` and the `/healthz` and `/metrics` endpoints.
/// Each connection runs on its own task and each invocation in its own
/// worker process, so requests never wait on each other.
pub struct ShimServer {
    /// Server configuration.
    config: ShimConfig,
    /// Function pipeline.
    pipeline: Arc<RequestHandler>,
    /// Metrics registry.
    metrics: Metrics,
}

impl ShimServer {
    /// Create a server that runs `handler` in worker processes.
    pub fn new(config: ShimConfig, handler: Handler) -> Result<Self, ShimError> {
        let invoker = ProcessInvoker::new().with_max_output(config.max_response_size);
        Self::with_invoker(config, handler, Arc::new(invoker))
    }

    /// Create a server that runs `handler` through `invoker`.
    pub fn with_invoker(
        config: ShimConfig,
        handler: Handler,
        invoker: Arc<dyn Invoker>,
    ) -> Result<Self, ShimError> {
        let metrics = Metrics::new()?;
        let context = config.function_context(&handler);
        let pipeline = Arc::new(RequestHandler::new(
            handler,
            context,
            invoker,
            metrics.clone(),
        ));
        Ok(Self {
            config,
            pipeline,
            metrics,
        })
    }

    /// Get the metrics registry.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = self.config.bind_addr().parse()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve connections accepted from `listener`.
    pub async fn serve(
        self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(
            "Serving '{}' on {} (timeout {}s)",
            self.pipeline.context().function_name,
            listener.local_addr()?,
            self.pipeline.context().timeout
        );

        let server = Arc::new(self);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);

            let server = server.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.handle_request(req, remote_addr).await) }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    error!("Error serving connection: {:?}", err);
                }
            });
        }
    }

    /// Handle an incoming HTTP request.
    async fn handle_request(
        &self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Response<Full<Bytes>> {
        let started = Instant::now();
        let (parts, body) = req.into_parts();
        let method = parts.method.clone();
        let url = request_url(&parts.uri);
        let path = parts.uri.path().to_string();

        let request = read_request(parts, body, self.config.max_body_size);
        let response = self.route(&method, &path, request).await;

        info!(
            "{} \"{} {}\" {} {:.3}ms",
            remote_addr,
            method,
            url,
            response.status.as_u16(),
            started.elapsed().as_secs_f64() * 1000.0
        );

        build_response(response)
    }

    /// Route a buffered request.
    pub async fn dispatch(&self, request: FunctionRequest) -> FunctionResponse {
        let method = request.method.clone();
        let path = request.path().to_string();
        self.route(&method, &path, async move { Ok::<_, ShimError>(request) })
            .await
    }

    /// Route a request by its method and path. `request` is only awaited
    /// on the function route.
    async fn route<F>(&self, method: &Method, path: &str, request: F) -> FunctionResponse
    where
        F: Future<Output = Result<FunctionRequest, ShimError>>,
    {
        let allowed: &[Method] = match path {
            "/" => &[Method::GET, Method::POST, Method::PATCH, Method::DELETE],
            "/healthz" | "/metrics" => &[Method::GET],
            _ => return FunctionResponse::error(StatusCode::NOT_FOUND, "Not Found"),
        };
        if !allowed.contains(method) {
            return FunctionResponse::error(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        }

        match path {
            "/healthz" => FunctionResponse::text("OK"),
            "/metrics" => self.metrics_response(),
            _ => match self.pipeline.handle(method, request).await {
                Ok(response) => response,
                Err(e) => {
                    error!(
                        "Function '{}' failed: {}",
                        self.pipeline.context().function_name,
                        e
                    );
                    e.into()
                }
            },
        }
    }

    fn metrics_response(&self) -> FunctionResponse {
        match self.metrics.encode() {
            Ok(text) => FunctionResponse::ok()
                .header("Content-Type", Metrics::content_type())
                .body(text),
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                ShimError::from(e).into()
            }
        }
    }
}

fn request_url(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

/// Buffer a hyper request into a FunctionRequest, reading at most
/// `max_body_size` bytes of body.
async fn read_request(
    parts: Parts,
    body: Incoming,
    max_body_size: usize,
) -> Result<FunctionRequest, ShimError> {
    let url = request_url(&parts.uri);

    let body = match Limited::new(body, max_body_size).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            warn!("Rejecting {} {}: body exceeds {} bytes", parts.method, url, max_body_size);
            return Err(ShimError::PayloadTooLarge(max_body_size));
        }
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            return Err(ShimError::BodyRead(e.to_string()));
        }
    };
    debug!("Buffered {} body bytes for {} {}", body.len(), parts.method, url);

    Ok(FunctionRequest {
        method: parts.method,
        url,
        headers: parts.headers,
        body,
    })
}

/// Build a hyper Response from a FunctionResponse.
fn build_response(response: FunctionResponse) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(response.status);

    for (name, value) in response.headers {
        builder = builder.header(name, value);
    }

    let body = response.body.unwrap_or_default();
    builder.body(Full::new(body)).unwrap_or_else(|e| {
        warn!("Invalid response, falling back to 500 Internal Server Error: {}", e);
        let mut fallback = Response::new(Full::new(Bytes::from_static(b"Internal Server Error")));
        *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    })
}
