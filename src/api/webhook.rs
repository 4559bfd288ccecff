//! Webhook dispatcher: admit, read the body, acknowledge, run the script detached.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{Bytes, to_bytes},
    extract::{ConnectInfo, Request, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::{debug, error, info, info_span};
use uuid::Uuid;

use crate::SharedState;
use crate::auth::{QueryParams, admit};
use crate::error::{HookError, Result};
use crate::interpreter::InterpreterPool;
use crate::webhook::{HookEnvelope, HookRoute};

/// Scope name of the decoded payload.
pub const REQUEST_BINDING: &str = "Request";
/// Scope name of the resolved hosting flavor.
pub const HOSTING_BINDING: &str = "Hosting";

/// Handles every request that reaches the gateway.
///
/// A 200 only means the request was admitted and its body was read; the
/// script runs afterwards on a blocking thread and its outcome is only logged.
pub async fn handle_hook(
    AxumState(state): AxumState<SharedState>,
    request: Request,
) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let uri = request.uri().to_string();

    let admitted = match admit(request.method(), &uri, &state.config.secret, &remote_addr) {
        Ok(admitted) => admitted,
        Err(e) => return e.into_response(),
    };

    let body = match to_bytes(request.into_body(), state.config.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            let err = HookError::BodyRead(e.to_string());
            error!(remote_addr = %remote_addr, uri = %uri, "{}", err);
            return err.into_response();
        }
    };

    let job = HookJob {
        request_id: Uuid::now_v7(),
        remote_addr,
        uri,
        path: admitted.path,
        params: admitted.params,
        body,
        default_hosting: state.config.default_hosting.clone(),
    };
    debug!(request_id = %job.request_id, "Accepted {} ({} bytes)", job.uri, job.body.len());

    let pool = Arc::clone(&state.pool);
    // Never awaited; the outcome is only logged.
    tokio::task::spawn_blocking(move || job.run(&pool));

    StatusCode::OK.into_response()
}

/// One admitted webhook, waiting to be run against a leased interpreter.
#[derive(Debug, Clone)]
pub struct HookJob {
    pub request_id: Uuid,
    pub remote_addr: String,
    pub uri: String,
    pub path: String,
    pub params: QueryParams,
    pub body: Bytes,
    pub default_hosting: String,
}

impl HookJob {
    /// Executes the job and logs its outcome.
    pub fn run(self, pool: &Arc<InterpreterPool>) {
        let span = info_span!(
            "hook",
            request_id = %self.request_id,
            remote_addr = %self.remote_addr,
            uri = %self.uri,
        );
        let _entered = span.enter();

        match self.execute(pool) {
            Ok(()) => info!("Success"),
            Err(e) => error!("{}", e),
        }
    }

    /// Resolves the route, decodes the body, then leases, binds and executes.
    ///
    /// A body that fails to decode never leases an interpreter. Once leased,
    /// the interpreter goes back to the pool on every return path when the
    /// lease drops.
    pub fn execute(&self, pool: &Arc<InterpreterPool>) -> Result<()> {
        let route = HookRoute::resolve(&self.path, &self.default_hosting);
        let envelope = HookEnvelope::decode(route.flavor.shape(), &self.body)?;
        let request = envelope.to_value()?;
        debug!(
            git_ref = envelope.git_ref().unwrap_or("-"),
            repository = envelope.repository_name().unwrap_or("-"),
            "Decoded {} payload",
            route.flavor.as_str()
        );

        let mut lease = pool.get()?;
        debug!(
            "Running '{}' for {} on {}",
            route.script,
            route.flavor.as_str(),
            lease.id()
        );

        lease.bind(REQUEST_BINDING, &request)?;
        lease.bind(HOSTING_BINDING, &Value::String(route.flavor.as_str().to_string()))?;
        lease.exec(&route.script, &self.params)?;
        Ok(())
    }
}
