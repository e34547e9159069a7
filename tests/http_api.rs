//! End-to-end HTTP flow over a temporary on-disk database: ingest,
//! query, delete, and a restart that reloads everything from SQLite.

use std::path::Path;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;
use tower::ServiceExt;

use iqdb::server::{create_router, AppState, ImageResponse, QueryMatch, StatusResponse};
use iqdb_core::{ImageDb, NUM_PIXELS_SQUARED};

fn open_router(path: &Path) -> Router {
    let state = Arc::new(AppState {
        db: RwLock::new(ImageDb::open(path).unwrap()),
    });
    create_router(state)
}

fn channel_body(seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut plane = || -> Vec<u8> { (0..NUM_PIXELS_SQUARED).map(|_| rng.gen()).collect() };
    let body = serde_json::json!({ "channels": { "r": plane(), "g": plane(), "b": plane() } });
    serde_json::to_vec(&body).unwrap()
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get_status(router: &Router) -> StatusResponse {
    let request = Request::builder()
        .method("GET")
        .uri("/status")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    read_json(response).await
}

async fn add_image(router: &Router, post_id: u64, seed: u64) -> ImageResponse {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/images/{post_id}"))
        .header("Content-Type", "application/json")
        .body(Body::from(channel_body(seed)))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    read_json(response).await
}

async fn query_by_hash(router: &Router, hash: &str, limit: usize) -> Vec<QueryMatch> {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/query?hash={hash}&limit={limit}"))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    read_json(response).await
}

#[tokio::test]
async fn full_lifecycle_with_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("iqdb.db");

    let hash2 = {
        let router = open_router(&db_path);

        assert_eq!(get_status(&router).await.images, 0);

        let added1 = add_image(&router, 1, 101).await;
        let added2 = add_image(&router, 2, 102).await;
        add_image(&router, 3, 103).await;

        // Internal indices start at the store's first primary key (1),
        // so the table carries one permanent hole at slot 0.
        assert_eq!(get_status(&router).await.images, 4);

        // Identity query self-retrieves with a near-perfect score.
        let matches = query_by_hash(&router, &added2.hash, 10).await;
        assert_eq!(matches[0].post_id, 2);
        assert!(matches[0].score >= 99.0 && matches[0].score <= 100.01);
        assert_eq!(matches[0].hash, added2.hash);
        for pair in matches.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }

        // Deleting post 1 retires it from all future results.
        let request = Request::builder()
            .method("DELETE")
            .uri("/images/1")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let matches = query_by_hash(&router, &added1.hash, 10).await;
        assert!(matches.iter().all(|m| m.post_id != 1));
        assert_eq!(matches.len(), 2);

        added2.hash
    };

    // Restart: a fresh process-equivalent reloads the corpus from the
    // database file.
    let router = open_router(&db_path);

    assert_eq!(get_status(&router).await.images, 4);

    let request = Request::builder()
        .method("GET")
        .uri("/images/2")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stored: ImageResponse = read_json(response).await;
    assert_eq!(stored.hash, hash2, "hash survives persist-and-reload byte for byte");

    let matches = query_by_hash(&router, &hash2, 5).await;
    assert_eq!(matches[0].post_id, 2);
    assert!(matches[0].score >= 99.0);

    // The deleted post stays deleted across restarts.
    let request = Request::builder()
        .method("GET")
        .uri("/images/1")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn replace_returns_the_new_hash() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("iqdb.db");
    let router = open_router(&db_path);

    let first = add_image(&router, 7, 1).await;
    let second = add_image(&router, 7, 2).await;
    assert_ne!(first.hash, second.hash);

    let request = Request::builder()
        .method("GET")
        .uri("/images/7")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let stored: ImageResponse = read_json(response).await;
    assert_eq!(stored.hash, second.hash);

    // The old signature still surfaces the post as a candidate.
    let matches = query_by_hash(&router, &first.hash, 10).await;
    assert!(matches.iter().any(|m| m.post_id == 7));
}
