//! Shared HTTP serving for the REST-style engines.

use crate::{
    Error, Result,
    runtime::{EngineThread, Ready, ShutdownSignal},
};
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, error};

/// Serve `router` on `localhost:port` from a dedicated engine thread
pub(crate) async fn serve_router(name: String, port: u16, router: Router) -> Result<EngineThread> {
    EngineThread::spawn(name.clone(), move |ready, shutdown| {
        serve(name, port, router, ready, shutdown)
    })
    .await
}

async fn serve(name: String, port: u16, router: Router, ready: Ready, shutdown: ShutdownSignal) {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(source) => {
            return ready.fail(Error::Bind {
                addr: addr.to_string(),
                source,
            });
        }
    };
    ready.ok();

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("{} stopped with error: {}", name, e);
    }
    debug!("{} on {} stopped", name, addr);
}

/// Confluent-style error body
#[derive(Debug)]
pub(crate) struct ApiError {
    pub status: StatusCode,
    pub error_code: u32,
    pub message: String,
    /// Failing statement, for stream-query errors
    pub statement: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, error_code: u32, message: impl Into<String>) -> Self {
        Self {
            status,
            error_code,
            message: message.into(),
            statement: None,
        }
    }

    pub fn for_statement(mut self, statement: &str) -> Self {
        self.statement = Some(statement.to_string());
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, 50001, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error_code": self.error_code,
            "message": self.message,
        });
        if let Some(statement) = self.statement {
            body["@type"] = json!("statement_error");
            body["statementText"] = json!(statement);
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::internal(e.to_string())
    }
}
