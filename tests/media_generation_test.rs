use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chathdi::gemini::{CredentialHook, GatewayError, ImageQuality};
use chathdi::{GatewayConfig, GeminiClient};

/// Test double for the host credential capability.
struct RecordingHook {
    has_credential: bool,
    prompts: AtomicUsize,
}

impl RecordingHook {
    fn new(has_credential: bool) -> Arc<Self> {
        Arc::new(Self {
            has_credential,
            prompts: AtomicUsize::new(0),
        })
    }

    fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialHook for RecordingHook {
    async fn has_credential(&self) -> bool {
        self.has_credential
    }

    async fn prompt_select(&self) {
        self.prompts.fetch_add(1, Ordering::SeqCst);
    }
}

fn test_config(server: &MockServer, media_dir: &TempDir) -> GatewayConfig {
    GatewayConfig {
        base_url: server.uri(),
        api_key: "test-key".to_string(),
        chat_model: "chat-model".to_string(),
        image_model_low: "image-low".to_string(),
        image_model_high: "image-high".to_string(),
        video_model: "video-model".to_string(),
        poll_interval: Duration::from_millis(10),
        max_polls: 5,
        media_dir: media_dir.path().to_path_buf(),
    }
}

#[tokio::test]
async fn image_with_inline_part_becomes_a_data_uri() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/image-low:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{"content": {"parts": [
                {"text": "Here you go:"},
                {"inlineData": {"mimeType": "image/png", "data": "aGVsbG8="}}
            ]}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let media_dir = TempDir::new().unwrap();
    let gateway = GeminiClient::new(test_config(&server, &media_dir));

    let uri = gateway
        .generate_image("a turbine at dusk", ImageQuality::Low)
        .await
        .unwrap()
        .expect("an image");
    assert_eq!(uri, "data:image/png;base64,aGVsbG8=");
}

#[tokio::test]
async fn image_without_inline_part_is_none_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "I can only describe it."}]}}]
        })))
        .mount(&server)
        .await;

    let media_dir = TempDir::new().unwrap();
    let gateway = GeminiClient::new(test_config(&server, &media_dir));

    let result = gateway
        .generate_image("a turbine at dusk", ImageQuality::Low)
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn high_quality_image_prompts_for_a_missing_credential_first() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/image-high:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{"content": {"parts": [
                {"inlineData": {"mimeType": "image/png", "data": "eA=="}}
            ]}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let media_dir = TempDir::new().unwrap();
    let hook = RecordingHook::new(false);
    let gateway = GeminiClient::with_hook(test_config(&server, &media_dir), hook.clone());

    gateway
        .generate_image("detailed render", ImageQuality::High)
        .await
        .unwrap();
    assert_eq!(hook.prompt_count(), 1);
}

#[tokio::test]
async fn low_quality_image_does_not_touch_the_hook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": []
        })))
        .mount(&server)
        .await;

    let media_dir = TempDir::new().unwrap();
    let hook = RecordingHook::new(false);
    let gateway = GeminiClient::with_hook(test_config(&server, &media_dir), hook.clone());

    gateway
        .generate_image("fast render", ImageQuality::Low)
        .await
        .unwrap();
    assert_eq!(hook.prompt_count(), 0);
}

#[tokio::test]
async fn entity_not_found_fires_the_hook_and_propagates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": {"code": 404, "message": "Requested entity was not found."}
        })))
        .mount(&server)
        .await;

    let media_dir = TempDir::new().unwrap();
    let hook = RecordingHook::new(true);
    let gateway = GeminiClient::with_hook(test_config(&server, &media_dir), hook.clone());

    let result = gateway
        .generate_image("anything", ImageQuality::Low)
        .await;
    assert!(matches!(result, Err(GatewayError::EntityNotFound(_))));
    // The hook was prompted reactively, and the error still reached us: no
    // automatic retry.
    assert_eq!(hook.prompt_count(), 1);
}

#[tokio::test]
async fn slide_outline_parses_schema_constrained_json() {
    let server = MockServer::start().await;
    let outline_json = serde_json::json!([
        {"title": "Why Hydrogen", "content": ["Dense", "Clean"]},
        {"title": "Challenges", "content": ["Storage", "Cost", "Transport"]}
    ]);
    Mock::given(method("POST"))
        .and(path("/v1beta/models/chat-model:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": outline_json.to_string()}]}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let media_dir = TempDir::new().unwrap();
    let gateway = GeminiClient::new(test_config(&server, &media_dir));

    let outline = gateway
        .generate_slide_outline("Hydrogen Economy", 2)
        .await
        .unwrap();
    assert_eq!(outline.len(), 2);
    assert_eq!(outline[0].title, "Why Hydrogen");
    assert_eq!(outline[1].content.len(), 3);
}

#[tokio::test]
async fn unparsable_slide_outline_degrades_to_empty() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "sorry, no JSON today"}]}}]
        })))
        .mount(&server)
        .await;

    let media_dir = TempDir::new().unwrap();
    let gateway = GeminiClient::new(test_config(&server, &media_dir));

    let outline = gateway
        .generate_slide_outline("Hydrogen Economy", 5)
        .await
        .unwrap();
    assert!(outline.is_empty());
}
