use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State as AxumState;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::admission::{self, AdmissionReview};
use crate::metrics::Metrics;
use crate::Result;

#[derive(Clone, Default)]
pub struct State {
    metrics: Arc<Metrics>,
}

/// Serves /healthz and /mutate, over TLS unless a plaintext override was
/// configured. The apiserver is the only expected client.
pub async fn serve_webhook(
    addr: SocketAddr,
    tls: Option<RustlsConfig>,
    state: Arc<State>,
    cancel: CancellationToken,
) -> Result<()> {
    let app = webhook_router(state);

    match tls {
        Some(tls) => {
            info!("webhook listening on {}", addr);
            let handle = axum_server::Handle::new();
            tokio::spawn(graceful_shutdown(handle.clone(), cancel));
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = TcpListener::bind(addr).await?;
            info!("webhook listening on {} without TLS", addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown(cancel))
                .await?;
        }
    }
    Ok(())
}

pub async fn serve_metrics(
    addr: SocketAddr,
    state: Arc<State>,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("metrics listening on {}", addr);

    let app = metrics_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown(cancel))
        .await?;
    Ok(())
}

pub fn webhook_router(state: Arc<State>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/mutate", post(mutate))
        .with_state(state)
}

pub fn metrics_router(state: Arc<State>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn mutate(
    AxumState(state): AxumState<Arc<State>>,
    Json(review): Json<AdmissionReview>,
) -> Json<AdmissionReview> {
    state.metrics.reviews.inc();

    let mut response = admission::handle(review.request.as_ref());
    if let Some(request) = review.request.as_ref() {
        response.uid = request.uid.clone();
    }
    if response.patch.is_some() {
        state.metrics.patched.inc();
    }
    if !response.allowed {
        state.metrics.denied.inc();
    }

    info!(
        uid = %response.uid,
        allowed = response.allowed,
        patched = response.patch.is_some(),
        "handled admission review"
    );

    Json(AdmissionReview {
        api_version: review.api_version,
        kind: review.kind,
        request: None,
        response: Some(response),
    })
}

async fn metrics(AxumState(state): AxumState<Arc<State>>) -> String {
    state.metrics.encode()
}

pub(crate) async fn shutdown(cancel: CancellationToken) {
    select! {
        _ = cancel.cancelled() => {}
    }
}

async fn graceful_shutdown(handle: axum_server::Handle, cancel: CancellationToken) {
    cancel.cancelled().await;
    handle.graceful_shutdown(Some(Duration::from_secs(5)));
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    fn review_body(uid: &str, kind: &str, object: Value) -> String {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": uid,
                "kind": { "group": "", "version": "v1", "kind": kind },
                "object": object
            }
        })
        .to_string()
    }

    fn mutate_request(body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/mutate")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn response_review(response: axum::response::Response) -> AdmissionReview {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let router = webhook_router(Arc::new(State::default()));

        let request = Request::builder()
            .method("GET")
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn mutate_patches_macvtap_pod() {
        let router = webhook_router(Arc::new(State::default()));

        let body = review_body(
            "uid-http-1",
            "Pod",
            json!({
                "metadata": {
                    "annotations": { "k8s.v1.cni.cncf.io/networks": "default/macvtap-net" }
                },
                "spec": { "containers": [{ "name": "app" }] }
            }),
        );
        let response = router.oneshot(mutate_request(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "application/json"
        );

        let review = response_review(response).await;
        assert_eq!(review.api_version, "admission.k8s.io/v1");
        assert!(review.request.is_none());

        let resp = review.response.unwrap();
        assert_eq!(resp.uid, "uid-http-1");
        assert!(resp.allowed);

        let patch: Value = serde_json::from_slice(&resp.patch.unwrap()).unwrap();
        assert_eq!(
            patch["spec"]["containers"][0]["securityContext"]["privileged"],
            json!(true)
        );
    }

    #[tokio::test]
    async fn mutate_leaves_plain_pod_alone() {
        let router = webhook_router(Arc::new(State::default()));

        let body = review_body(
            "uid-http-2",
            "Pod",
            json!({ "spec": { "containers": [{ "name": "app" }] } }),
        );
        let response = router.oneshot(mutate_request(body)).await.unwrap();
        let resp = response_review(response).await.response.unwrap();

        assert!(resp.allowed);
        assert!(resp.patch.is_none());
        assert_eq!(resp.uid, "uid-http-2");
    }

    #[tokio::test]
    async fn mutate_rejects_malformed_envelope() {
        let router = webhook_router(Arc::new(State::default()));

        let response = router
            .oneshot(mutate_request("{ not an envelope".into()))
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn metrics_count_handled_reviews() {
        let state = Arc::new(State::default());

        let body = review_body(
            "uid-http-3",
            "Pod",
            json!({ "spec": { "containers": [{ "name": "app" }] } }),
        );
        webhook_router(state.clone())
            .oneshot(mutate_request(body))
            .await
            .unwrap();

        let request = Request::builder()
            .method("GET")
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = metrics_router(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("macvtap_webhook_admission_reviews_total 1"));
        assert!(text.contains("macvtap_webhook_pods_patched_total 0"));
    }
}
