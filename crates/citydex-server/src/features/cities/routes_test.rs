//! Route tests for record upload

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::features::cities::cities_routes;
    use crate::features::test_support::{backends, multipart_body};
    use crate::ingest::JobState;

    const BOUNDARY: &str = "citydex-boundary";

    fn upload(field: &str, content: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(BOUNDARY, field, content)))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_upload_starts_job() {
        let b = backends();
        let app: Router = cities_routes(1024 * 1024).with_state(b.coordinator.clone());

        let response = app
            .oneshot(upload("file", r#"[{"CODGEO": "75056", "Nom Com": "Paris"}, {"CODGEO": "13055"}]"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["message"], "job started");
        assert_eq!(body["data"]["records"], 2);

        let job_id: u64 = body["data"]["job_id"].as_str().unwrap().parse().unwrap();
        b.coordinator.shutdown(Duration::from_secs(5)).await;

        let completion = b.coordinator.job_log().get(job_id).await.unwrap().unwrap();
        assert_eq!(completion.state, JobState::Completed);
        assert!(!b.coordinator.status_store().is_active(job_id).await.unwrap());
        assert_eq!(b.documents.calls.lock().unwrap().len(), 1);
        assert_eq!(b.search.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_upload_is_rejected() {
        let b = backends();
        let app: Router = cities_routes(1024 * 1024).with_state(b.coordinator.clone());

        let response = app.oneshot(upload("file", r#"{"not": "an array"}"#)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "MALFORMED_RECORD");
        assert!(b.documents.calls.lock().unwrap().is_empty());
        assert!(b.coordinator.status_store().active_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_field() {
        let b = backends();
        let app: Router = cities_routes(1024 * 1024).with_state(b.coordinator);

        let response = app.oneshot(upload("attachment", "[]")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_oversized_upload() {
        let b = backends();
        let app: Router = cities_routes(64).with_state(b.coordinator);

        let content = format!("[{}]", vec![r#"{"CODGEO": "01001"}"#; 20].join(","));
        let response = app.oneshot(upload("file", &content)).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
