//! SCM Client Tests
//!
//! ## Test Scopes
//! - **Failures**: A failed call surfaces after one attempt.
//! - **Snapshot download**: Body lands on disk under the staging root; `204` means none.

#[cfg(test)]
mod tests {
    use crate::scm::protocol::ENDPOINT_SNAPSHOT;
    use crate::scm::{ContainerSource, HttpContainerSource};
    use crate::store::db::DB_FILE;
    use axum::{Router, http::StatusCode, routing::get};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        addr
    }

    // ============================================================
    // TEST 1: FAILED CALLS
    // ============================================================

    #[tokio::test]
    async fn test_failed_call_is_not_retried_inline() {
        // ARRANGE: a peer that accepts and immediately hangs up
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        {
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    drop(socket);
                }
            });
        }
        let source = HttpContainerSource::new(&addr.to_string());

        // ACT
        let result = source.container_count().await;

        // ASSERT
        assert!(result.is_err());
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let router = Router::new().route(
            "/scm/containers/count",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let addr = serve(router).await;
        let source = HttpContainerSource::new(&format!("http://{}/", addr));

        let err = source.container_count().await.unwrap_err();

        assert!(err.to_string().contains("500"), "unexpected error: {:#}", err);
    }

    // ============================================================
    // TEST 2: SNAPSHOT DOWNLOAD
    // ============================================================

    #[tokio::test]
    async fn test_snapshot_body_is_written_to_staging_dir() {
        // ARRANGE: a body large enough to arrive in several chunks
        let body: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        let served = body.clone();
        let router = Router::new().route(
            ENDPOINT_SNAPSHOT,
            get(move || {
                let served = served.clone();
                async move { served }
            }),
        );
        let addr = serve(router).await;
        let source = HttpContainerSource::new(&addr.to_string());
        let staging = TempDir::new().unwrap();

        // ACT
        let handle = source.snapshot(staging.path()).await.unwrap().unwrap();

        // ASSERT
        assert!(handle.location.starts_with(staging.path()));
        let written = std::fs::read(handle.location.join(DB_FILE)).unwrap();
        assert_eq!(written, body);
    }

    #[tokio::test]
    async fn test_no_content_means_no_snapshot() {
        let router = Router::new().route(ENDPOINT_SNAPSHOT, get(|| async { StatusCode::NO_CONTENT }));
        let addr = serve(router).await;
        let source = HttpContainerSource::new(&addr.to_string());
        let staging = TempDir::new().unwrap();

        let handle = source.snapshot(staging.path()).await.unwrap();

        assert!(handle.is_none());
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
    }
}
