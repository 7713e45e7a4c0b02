//! High level request logging. Grounded on the teacher's `LogLayer`/
//! `LogService` tower middleware, adapted to log method + path rather than
//! the whole request (axum's `Body` doesn't implement `Debug`).

use std::task::{Context, Poll};

use axum::extract::Request;
use tower::{Layer, Service};

#[derive(Default, Clone)]
pub struct LogLayer;

impl<S> Layer<S> for LogLayer {
    type Service = LogService<S>;

    fn layer(&self, service: S) -> Self::Service {
        LogService { service }
    }
}

#[derive(Clone)]
pub struct LogService<S> {
    service: S,
}

impl<S> Service<Request> for LogService<S>
where
    S: Service<Request>,
{
    type Error = S::Error;
    type Future = S::Future;
    type Response = S::Response;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        log::info!("gateway server: {} {}", req.method(), req.uri());
        self.service.call(req)
    }
}
