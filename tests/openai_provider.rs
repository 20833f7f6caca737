//! OpenAI-compatible scoring provider against a mock HTTP server.

use caseguard::config::MatcherConfig;
use caseguard::matcher::DuplicateCaseMatcher;
use caseguard::models::{CaseRecord, CaseStatus, CaseType, NewCase};
use caseguard::scoring::{fetch_image, CaseText, OpenAiScoreProvider, ScoreError, ScoreProvider};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake-image-data";

fn config(server: &MockServer) -> MatcherConfig {
    MatcherConfig {
        provider: "openai".into(),
        model: Some("text-model".into()),
        vision_model: Some("vision-model".into()),
        base_url: format!("{}/v1", server.uri()),
        max_retries: 0,
        timeout_secs: 5,
        ..MatcherConfig::default()
    }
}

fn provider(server: &MockServer) -> OpenAiScoreProvider {
    OpenAiScoreProvider::with_api_key(&config(server), "sk-test").unwrap()
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [
            { "index": 0, "message": { "role": "assistant", "content": content } }
        ]
    })
}

async fn mount_image(server: &MockServer, route: &str, body: &[u8], mime: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_vec(), mime))
        .mount(server)
        .await;
}

/// Serve an image whose chunked body never ends; returns its URL.
async fn endless_chunked_image() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 2048];
        let _ = socket.read(&mut request).await;

        let head = "HTTP/1.1 200 OK\r\n\
                    Content-Type: image/jpeg\r\n\
                    Transfer-Encoding: chunked\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        let chunk = format!("400\r\n{}\r\n", "x".repeat(1024));
        while socket.write_all(chunk.as_bytes()).await.is_ok() {}
    });

    format!("http://{}/stream.jpg", addr)
}

fn stored_case(id: &str, image_url: Option<String>) -> CaseRecord {
    CaseRecord {
        id: id.into(),
        child_name: "Maya Torres".into(),
        age: 11,
        location: "Springfield".into(),
        description: "Yellow raincoat, red backpack".into(),
        contact_info: "555-123-4567".into(),
        case_type: CaseType::Missing,
        image_url,
        physical_traits: None,
        status: CaseStatus::Open,
        reporter: None,
        blockchain_id: None,
        created_at: 1_700_000_000,
        updated_at: 1_700_000_000,
    }
}

#[tokio::test]
async fn test_text_score_from_json_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "text-model",
            "response_format": { "type": "json_object" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"similarityScore": 0.83, "reasoning": "same name and coat"}"#,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let score = provider(&server)
        .score_text(
            &CaseText::new("Maya", "yellow raincoat"),
            &CaseText::new("Maya T.", "raincoat, yellow"),
        )
        .await
        .unwrap();
    assert!((score - 0.83).abs() < 1e-9);
}

#[tokio::test]
async fn test_fenced_reply_is_accepted_and_clamped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "```json\n{\"similarityScore\": 1.7}\n```",
        )))
        .mount(&server)
        .await;

    let score = provider(&server)
        .score_text(&CaseText::new("a", "b"), &CaseText::new("c", "d"))
        .await
        .unwrap();
    assert_eq!(score, 1.0);
}

#[tokio::test]
async fn test_reply_without_score_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion(r#"{"reasoning": "unsure"}"#)),
        )
        .mount(&server)
        .await;

    let err = provider(&server)
        .score_text(&CaseText::new("a", "b"), &CaseText::new("c", "d"))
        .await
        .unwrap_err();
    assert!(matches!(err, ScoreError::Parse(_)));
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = MatcherConfig {
        max_retries: 3,
        ..config(&server)
    };
    let provider = OpenAiScoreProvider::with_api_key(&cfg, "sk-test").unwrap();
    let err = provider
        .score_text(&CaseText::new("a", "b"), &CaseText::new("c", "d"))
        .await
        .unwrap_err();

    match err {
        ScoreError::Http { status, body } => {
            assert_eq!(status, 400);
            assert_eq!(body, "bad model");
        }
        other => panic!("expected Http error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion(r#"{"similarityScore": 0.4}"#)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cfg = MatcherConfig {
        max_retries: 1,
        ..config(&server)
    };
    let provider = OpenAiScoreProvider::with_api_key(&cfg, "sk-test").unwrap();
    let score = provider
        .score_text(&CaseText::new("a", "b"), &CaseText::new("c", "d"))
        .await
        .unwrap();
    assert!((score - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn test_slow_attempt_is_retried_within_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion(r#"{"similarityScore": 0.1}"#))
                .set_delay(Duration::from_secs(8)),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion(r#"{"similarityScore": 0.6}"#)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cfg = MatcherConfig {
        max_retries: 1,
        timeout_secs: 6,
        request_timeout_secs: 1,
        ..config(&server)
    };
    let provider = OpenAiScoreProvider::with_api_key(&cfg, "sk-test").unwrap();

    let score = tokio::time::timeout(
        cfg.timeout(),
        provider.score_text(&CaseText::new("a", "b"), &CaseText::new("c", "d")),
    )
    .await
    .expect("retry should finish inside the comparison budget")
    .unwrap();
    assert!((score - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn test_image_score_uses_vision_model_and_data_uris() {
    let server = MockServer::start().await;
    mount_image(&server, "/photos/a.png", PNG_BYTES, "image/png").await;
    mount_image(&server, "/photos/b.png", PNG_BYTES, "image/png").await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "model": "vision-model" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion(r#"{"similarityScore": 0.9}"#)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let score = provider(&server)
        .score_images(
            &format!("{}/photos/a.png", server.uri()),
            &format!("{}/photos/b.png", server.uri()),
        )
        .await
        .unwrap();
    assert!((score - 0.9).abs() < 1e-9);

    let requests = server.received_requests().await.unwrap();
    let chat = requests
        .iter()
        .find(|r| r.url.path() == "/v1/chat/completions")
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&chat.body).unwrap();
    let parts = body["messages"][1]["content"].as_array().unwrap();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0]["type"], "text");
    let uri = parts[1]["image_url"]["url"].as_str().unwrap();
    assert!(uri.starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn test_non_image_content_is_rejected() {
    let server = MockServer::start().await;
    mount_image(&server, "/photos/a.png", PNG_BYTES, "image/png").await;
    mount_image(&server, "/login", b"<html>sign in</html>", "text/html").await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("{}")))
        .expect(0)
        .mount(&server)
        .await;

    let err = provider(&server)
        .score_images(
            &format!("{}/photos/a.png", server.uri()),
            &format!("{}/login", server.uri()),
        )
        .await
        .unwrap_err();
    match err {
        ScoreError::ImageFetch { url, reason } => {
            assert!(url.ends_with("/login"));
            assert!(reason.contains("text/html"));
        }
        other => panic!("expected ImageFetch error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_oversized_image_is_rejected() {
    let server = MockServer::start().await;
    mount_image(&server, "/photos/a.png", PNG_BYTES, "image/png").await;
    mount_image(&server, "/photos/huge.png", &[0u8; 64], "image/png").await;

    let cfg = MatcherConfig {
        max_image_bytes: 32,
        ..config(&server)
    };
    let provider = OpenAiScoreProvider::with_api_key(&cfg, "sk-test").unwrap();
    let err = provider
        .score_images(
            &format!("{}/photos/a.png", server.uri()),
            &format!("{}/photos/huge.png", server.uri()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ScoreError::ImageFetch { .. }));
}

#[tokio::test]
async fn test_chunked_image_stops_at_limit() {
    let url = endless_chunked_image().await;
    let client = reqwest::Client::new();

    let outcome = tokio::time::timeout(Duration::from_secs(10), fetch_image(&client, &url, 4096))
        .await
        .expect("fetch should give up once the body passes the limit");

    match outcome {
        Err(ScoreError::ImageFetch { reason, .. }) => {
            assert!(reason.contains("limit of 4096"), "unexpected reason: {}", reason);
        }
        other => panic!("expected ImageFetch error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_matcher_end_to_end_with_broken_image() {
    let server = MockServer::start().await;
    mount_image(&server, "/photos/a.png", PNG_BYTES, "image/png").await;
    Mock::given(method("GET"))
        .and(path("/photos/gone.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "model": "text-model" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion(r#"{"similarityScore": 0.9}"#)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let matcher = DuplicateCaseMatcher::new(Arc::new(provider(&server)), Duration::from_secs(5));
    let draft = NewCase {
        image_url: Some(format!("{}/photos/a.png", server.uri())),
        ..NewCase::from(&stored_case("draft", None))
    };
    let existing = stored_case("existing", Some(format!("{}/photos/gone.png", server.uri())));

    let result = matcher.compare(&draft, &existing).await;

    // Both cases carry an image, so image weighting applies even though the
    // fetch failed: 0.4 * 0.9 + 0.4 * 0 + 0.2 * 1.0.
    assert!((result.physical_match - 0.9).abs() < 1e-9);
    assert_eq!(result.distinctive_features_match, 0.0);
    assert_eq!(result.contact_match, 1.0);
    assert!((result.overall_similarity - 0.56).abs() < 1e-9);
}
