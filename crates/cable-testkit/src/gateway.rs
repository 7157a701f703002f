//! Local Kernel Gateway serving the REST control plane and channel sockets.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::{
    Json, Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use cable_core::{Envelope, KernelInfo, KernelState};
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use crate::FakeKernel;

struct Hosted {
    name: String,
    kernel: FakeKernel,
}

#[derive(Default)]
struct GatewayState {
    kernels: Mutex<HashMap<Uuid, Hosted>>,
    interrupts: AtomicUsize,
    deletes: AtomicUsize,
    connections: AtomicUsize,
}

impl GatewayState {
    fn kernels(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Hosted>> {
        self.kernels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Deserialize)]
struct CreateKernel {
    name: String,
}

/// A running fake gateway.
pub struct FakeGateway {
    url: Url,
    state: Arc<GatewayState>,
}

impl FakeGateway {
    /// Serve on an ephemeral local port.
    ///
    /// # Panics
    /// Panics if no local port can be bound.
    pub async fn spawn() -> Self {
        let state = Arc::new(GatewayState::default());
        let app = Router::new()
            .route("/api/kernels", get(list_kernels).post(create_kernel))
            .route("/api/kernels/{kernel_id}", axum::routing::delete(delete_kernel))
            .route("/api/kernels/{kernel_id}/interrupt", post(interrupt_kernel))
            .route("/api/kernels/{kernel_id}/channels", get(channels))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake gateway");
        let addr = listener.local_addr().expect("fake gateway address");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Fake gateway stopped: {e}");
            }
        });

        let url = Url::parse(&format!("http://{addr}")).expect("fake gateway url");
        Self { url, state }
    }

    /// Base URL to configure a session with.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Ids of live kernels.
    #[must_use]
    pub fn kernel_ids(&self) -> Vec<Uuid> {
        self.state.kernels().keys().copied().collect()
    }

    #[must_use]
    pub fn interrupts(&self) -> usize {
        self.state.interrupts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn deletes(&self) -> usize {
        self.state.deletes.load(Ordering::SeqCst)
    }

    /// Channel sockets opened so far.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

fn model(id: Uuid, name: &str, state: KernelState) -> KernelInfo {
    KernelInfo {
        id,
        name: name.to_string(),
        execution_state: Some(state),
        last_activity: None,
        connections: 0,
    }
}

async fn list_kernels(State(state): State<Arc<GatewayState>>) -> Json<Vec<KernelInfo>> {
    let kernels = state
        .kernels()
        .iter()
        .map(|(id, hosted)| model(*id, &hosted.name, KernelState::Idle))
        .collect();
    Json(kernels)
}

async fn create_kernel(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<CreateKernel>,
) -> (StatusCode, Json<KernelInfo>) {
    let id = Uuid::new_v4();
    state.kernels().insert(
        id,
        Hosted {
            name: body.name.clone(),
            kernel: FakeKernel::new(),
        },
    );
    tracing::debug!("Fake gateway started {} kernel {id}", body.name);
    (
        StatusCode::CREATED,
        Json(model(id, &body.name, KernelState::Starting)),
    )
}

async fn delete_kernel(
    State(state): State<Arc<GatewayState>>,
    Path(kernel_id): Path<Uuid>,
) -> StatusCode {
    state.deletes.fetch_add(1, Ordering::SeqCst);
    match state.kernels().remove(&kernel_id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

async fn interrupt_kernel(
    State(state): State<Arc<GatewayState>>,
    Path(kernel_id): Path<Uuid>,
) -> StatusCode {
    state.interrupts.fetch_add(1, Ordering::SeqCst);
    if state.kernels().contains_key(&kernel_id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn channels(
    State(state): State<Arc<GatewayState>>,
    Path(kernel_id): Path<Uuid>,
    upgrade: WebSocketUpgrade,
) -> Response {
    if !state.kernels().contains_key(&kernel_id) {
        return StatusCode::NOT_FOUND.into_response();
    }
    state.connections.fetch_add(1, Ordering::SeqCst);
    upgrade.on_upgrade(move |socket| serve_channels(socket, state, kernel_id))
}

async fn serve_channels(mut socket: WebSocket, state: Arc<GatewayState>, kernel_id: Uuid) {
    while let Some(msg) = socket.recv().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("Fake gateway socket error: {e}");
                break;
            }
        };
        let request: Envelope = match serde_json::from_str(text.as_str()) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Fake gateway got a malformed envelope: {e}");
                continue;
            }
        };

        let replies = match state.kernels().get_mut(&kernel_id) {
            Some(hosted) => hosted.kernel.respond(&request),
            None => break,
        };
        for reply in replies {
            let Ok(json) = serde_json::to_string(&reply) else {
                continue;
            };
            if socket.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
    }
}
