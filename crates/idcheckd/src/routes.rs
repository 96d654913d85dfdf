use crate::engine::EngineHandle;
use crate::error::ApiError;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Request, State};
use axum::http::{StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use idcheck_core::{DocumentMatchReport, FaceDetectionReport, StoreMatchReport};
use serde_json::json;
use std::collections::HashMap;
use tracing::Instrument;
use uuid::Uuid;

pub fn router(engine: EngineHandle, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/identity/detect-face", post(detect_face))
        .route("/identity/verify-with-databaseimages", post(verify_with_store))
        .route("/identity/verify-with-idproof", post(verify_with_document))
        .route("/healthz", get(healthz))
        .fallback(fallback)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(middleware::from_fn(request_span))
        .with_state(engine)
}

/// Wraps each request in a span carrying a fresh request id and the path, so
/// every event logged while serving it is attributable.
async fn request_span(req: Request, next: Next) -> Response {
    let span = tracing::info_span!(
        "request",
        id = %Uuid::new_v4(),
        method = %req.method(),
        path = %req.uri().path(),
    );
    next.run(req).instrument(span).await
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn fallback(uri: Uri) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("no route for {uri}") })),
    )
}

async fn detect_face(
    State(engine): State<EngineHandle>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<FaceDetectionReport>, ApiError> {
    let mut uploads = read_uploads(multipart, &["image"]).await?;
    let image = take(&mut uploads, "image")?;
    Ok(Json(engine.detect_faces(image.bytes).await?))
}

async fn verify_with_store(
    State(engine): State<EngineHandle>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<StoreMatchReport>, ApiError> {
    let mut uploads = read_uploads(multipart, &["live_image"]).await?;
    let live = take(&mut uploads, "live_image")?;
    Ok(Json(engine.match_with_store(live.bytes).await?))
}

async fn verify_with_document(
    State(engine): State<EngineHandle>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DocumentMatchReport>, ApiError> {
    let mut uploads = read_uploads(multipart, &["live_image", "idproof_image"]).await?;
    let live = take(&mut uploads, "live_image")?;
    let document = take(&mut uploads, "idproof_image")?;
    Ok(Json(
        engine
            .match_with_document(live.bytes, document.bytes, document.file_name)
            .await?,
    ))
}

struct Upload {
    file_name: Option<String>,
    bytes: Vec<u8>,
}

/// Collect the named file fields of a multipart body; unknown fields are skipped.
async fn read_uploads(
    multipart: Result<Multipart, MultipartRejection>,
    wanted: &[&'static str],
) -> Result<HashMap<&'static str, Upload>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::Multipart(e.body_text()))?;
    let mut uploads = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Multipart(e.to_string()))?
    {
        let Some(name) = wanted.iter().copied().find(|w| field.name() == Some(*w)) else {
            continue;
        };
        let file_name = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::Multipart(e.to_string()))?;
        tracing::debug!(field = name, file_name = ?file_name, size = bytes.len(), "received upload");
        uploads.insert(
            name,
            Upload {
                file_name,
                bytes: bytes.to_vec(),
            },
        );
    }
    Ok(uploads)
}

fn take(uploads: &mut HashMap<&'static str, Upload>, name: &'static str) -> Result<Upload, ApiError> {
    uploads.remove(name).ok_or(ApiError::MissingField(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::header::CONTENT_TYPE;
    use idcheck_core::decoder::RasterizeError;
    use idcheck_core::detector::DetectorError;
    use idcheck_core::ocr::OcrError;
    use idcheck_core::recognizer::RecognizerError;
    use idcheck_core::{
        Bitmap, BoundingBox, Embedding, FaceDetector, FaceRecognizer, MemoryStore, PageRasterizer,
        Providers, ReferenceRecord, TextFragment, TextRecognizer, Verifier, VerifierConfig,
    };
    use image::{ImageEncoder, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const BOUNDARY: &str = "idcheck-test-boundary";

    struct BoxDetector {
        faces: usize,
        delay: Duration,
    }

    impl FaceDetector for BoxDetector {
        fn detect(&self, _bitmap: &Bitmap) -> Result<Vec<BoundingBox>, DetectorError> {
            std::thread::sleep(self.delay);
            Ok((0..self.faces)
                .map(|i| BoundingBox {
                    x: 2.0 + 14.0 * i as f32,
                    y: 4.0,
                    width: 12.0,
                    height: 12.0,
                    confidence: 0.9,
                    landmarks: Some([(5.0, 7.0), (10.0, 7.0), (8.0, 10.0), (6.0, 13.0), (10.0, 13.0)]),
                })
                .collect())
        }
    }

    struct ConstRecognizer;

    impl FaceRecognizer for ConstRecognizer {
        fn embed(&self, _bitmap: &Bitmap, _face: &BoundingBox) -> Result<Embedding, RecognizerError> {
            Ok(Embedding::new(vec![1.0, 0.0, 0.0], Some("fake")))
        }
    }

    struct FixedOcr;

    impl TextRecognizer for FixedOcr {
        fn recognize(&self, _bitmap: &Bitmap) -> Result<Vec<TextFragment>, OcrError> {
            Ok(vec![TextFragment {
                text: "DRIVER LICENSE".into(),
                confidence: 90.0,
            }])
        }
    }

    struct RejectingRasterizer;

    impl PageRasterizer for RejectingRasterizer {
        fn first_page(&self, _document: &[u8]) -> Result<RgbImage, RasterizeError> {
            Err(RasterizeError::Rejected("May not be a PDF file".into()))
        }
    }

    fn app(faces: usize, delay: Duration, timeout: Duration) -> Router {
        let providers = Providers {
            detector: Arc::new(BoxDetector { faces, delay }),
            recognizer: Arc::new(ConstRecognizer),
            text: Arc::new(FixedOcr),
            rasterizer: Arc::new(RejectingRasterizer),
            store: Arc::new(MemoryStore::new(vec![ReferenceRecord {
                id: "alice.jpg".into(),
                embedding: Embedding::new(vec![1.0, 0.0, 0.0], Some("fake")),
            }])),
        };
        let verifier = Verifier::new(providers, VerifierConfig::default());
        router(EngineHandle::new(Arc::new(verifier), timeout), 1024 * 1024)
    }

    fn default_app(faces: usize) -> Router {
        app(faces, Duration::ZERO, Duration::from_secs(5))
    }

    fn png() -> Vec<u8> {
        let img = RgbImage::from_pixel(32, 24, Rgb([128, 90, 70]));
        let mut out = Cursor::new(Vec::new());
        image::codecs::png::PngEncoder::new(&mut out)
            .write_image(img.as_raw(), img.width(), img.height(), image::ExtendedColorType::Rgb8)
            .unwrap();
        out.into_inner()
    }

    fn multipart(uri: &str, parts: &[(&str, &str, &[u8])]) -> axum::http::Request<Body> {
        let mut body = Vec::new();
        for (name, file_name, bytes) in parts {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn call(app: Router, req: axum::http::Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_healthz() {
        let req = axum::http::Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(default_app(1), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let req = axum::http::Request::builder()
            .uri("/identity/enroll")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(default_app(1), req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_detect_face() {
        let image = png();
        let req = multipart("/identity/detect-face", &[("image", "frame.png", &image)]);
        let (status, body) = call(default_app(1), req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["faces_detected"], 1);
        assert_eq!(body["locations"], json!([[2, 4, 14, 16]]));
        assert!(body["image_with_box"].is_string());
    }

    #[tokio::test]
    async fn test_detect_face_without_faces() {
        let image = png();
        let req = multipart("/identity/detect-face", &[("image", "frame.png", &image)]);
        let (status, body) = call(default_app(0), req).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("face"));
    }

    #[tokio::test]
    async fn test_missing_and_empty_fields() {
        let image = png();
        let req = multipart("/identity/detect-face", &[("photo", "frame.png", &image)]);
        let (status, body) = call(default_app(1), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing form field 'image'");

        let req = multipart("/identity/detect-face", &[("image", "frame.png", &[])]);
        let (status, _) = call(default_app(1), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_not_multipart() {
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/identity/verify-with-databaseimages")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let (status, body) = call(default_app(1), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_verify_with_store() {
        let image = png();
        let req = multipart(
            "/identity/verify-with-databaseimages",
            &[("live_image", "live.png", &image)],
        );
        let (status, body) = call(default_app(1), req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["matched_with"], "alice.jpg");
        assert_eq!(body["similarity_score"], 1.0);
        assert_eq!(body["message"], "Match");
    }

    #[tokio::test]
    async fn test_verify_with_store_multiple_faces() {
        let image = png();
        let req = multipart(
            "/identity/verify-with-databaseimages",
            &[("live_image", "live.png", &image)],
        );
        let (status, _) = call(default_app(2), req).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_verify_with_idproof() {
        let image = png();
        let req = multipart(
            "/identity/verify-with-idproof",
            &[("live_image", "live.png", &image), ("idproof_image", "licence.png", &image)],
        );
        let (status, body) = call(default_app(1), req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["similarity_score"], 1.0);
        assert_eq!(body["id_text_summary"], "DRIVER LICENSE");
    }

    #[tokio::test]
    async fn test_verify_with_idproof_bad_pdf() {
        let image = png();
        let req = multipart(
            "/identity/verify-with-idproof",
            &[("live_image", "live.png", &image), ("idproof_image", "licence.pdf", b"garbage")],
        );
        let (status, body) = call(default_app(1), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("pdf"));
    }

    #[tokio::test]
    async fn test_verify_timeout() {
        let image = png();
        let slow = app(1, Duration::from_millis(500), Duration::from_millis(50));
        let req = multipart("/identity/detect-face", &[("image", "frame.png", &image)]);
        let (status, body) = call(slow, req).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert!(body["error"].as_str().unwrap().contains("timed out"));
    }
}
