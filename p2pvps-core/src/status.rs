//! Read-only local status listener.
//!
//! Serves `GET /status` with the most recent lifecycle snapshot. The
//! orchestrator publishes; handlers only ever read.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::agent::{LifecycleSnapshot, LifecycleState};

struct StatusState {
    device_id: String,
    snapshot: watch::Receiver<LifecycleSnapshot>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub device_id: String,
    pub state: LifecycleState,
    pub timer_armed: bool,
}

async fn status_handler(State(st): State<Arc<StatusState>>) -> Json<StatusResponse> {
    let snapshot = *st.snapshot.borrow();
    Json(StatusResponse {
        device_id: st.device_id.clone(),
        state: snapshot.state,
        timer_armed: snapshot.timer_armed,
    })
}

pub fn router(device_id: impl Into<String>, snapshot: watch::Receiver<LifecycleSnapshot>) -> Router {
    let state = Arc::new(StatusState { device_id: device_id.into(), snapshot });
    Router::new().route("/status", get(status_handler)).with_state(state)
}

/// Serve `router` on an already-bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("status listener on http://{}", addr);
    }
    axum::serve(listener, router).await
}
