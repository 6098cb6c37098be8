//! Content generation scenarios
//!
//! 1. A healthy model answers and the answer is cached
//! 2. A failing model degrades to templates without an error
//! 3. Social copy and topics stay available offline

use reelforge::app::AppContext;
use reelforge::content::{ScriptRequest, SocialCopyRequest, TopicRequest};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{config_in, script_completion};

async fn ollama(status: u16, completion: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({
            "response": completion,
            "done": true
        })))
        .mount(&server)
        .await;
    server
}

// ============================================================================
// Model available
// ============================================================================

#[tokio::test]
async fn test_script_from_model_then_cache() {
    let server = ollama(200, &script_completion()).await;
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.providers.ollama_url = Some(server.uri());
    let app = AppContext::new(config).unwrap();

    let request = ScriptRequest::new("home coffee");
    let first = app.content().generate_script(&request).await.unwrap();
    assert!(!first.used_fallback);
    assert!(!first.from_cache);
    assert_eq!(first.used_provider, "ollama:llama3.2");
    assert_eq!(first.value.title, "Three coffee hacks");
    assert_eq!(first.value.sections.len(), 2);
    assert!(first.value.hashtags.contains(&"#coffee".to_string()));

    let second = app.content().generate_script(&request).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.value.title, first.value.title);

    // the model was only asked once
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);

    let status = app.monitor().get_status();
    let llm = status
        .services
        .iter()
        .find(|s| s.service == "ollama:llama3.2")
        .unwrap();
    assert_eq!(llm.total_attempts, 1);
    assert_eq!(llm.success_rate, 1.0);
}

// ============================================================================
// Model failing
// ============================================================================

#[tokio::test]
async fn test_failing_model_falls_back_to_templates() {
    let server = ollama(500, "").await;
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.providers.ollama_url = Some(server.uri());
    let app = AppContext::new(config).unwrap();

    let result = app
        .content()
        .generate_script(&ScriptRequest::new("budget travel"))
        .await
        .unwrap();

    assert!(result.used_fallback);
    assert!(!result.value.sections.is_empty());
    assert!(result.errors.contains_key("ollama:llama3.2"));

    let status = app.monitor().get_status();
    let llm = status
        .services
        .iter()
        .find(|s| s.service == "ollama:llama3.2")
        .unwrap();
    assert_eq!(llm.success_rate, 0.0);
    assert!(llm.last_error.is_some());
}

#[tokio::test]
async fn test_malformed_completion_is_a_provider_failure() {
    let server = ollama(200, "I would rather not answer in JSON").await;
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.providers.ollama_url = Some(server.uri());
    let app = AppContext::new(config).unwrap();

    let result = app
        .content()
        .generate_script(&ScriptRequest::new("indoor plants"))
        .await
        .unwrap();
    assert!(result.used_fallback);
}

// ============================================================================
// Offline
// ============================================================================

#[tokio::test]
async fn test_offline_social_and_topics() {
    let dir = TempDir::new().unwrap();
    let app = AppContext::new(config_in(&dir)).unwrap();

    let social = app
        .content()
        .generate_social_copy(&SocialCopyRequest {
            platform: "tiktok".to_string(),
            topic: "morning routines".to_string(),
            summary: None,
            tone: None,
        })
        .await
        .unwrap();
    assert!(social.used_fallback);
    assert!(!social.value.caption.trim().is_empty());

    let topics = app
        .content()
        .suggest_topics(&TopicRequest::new("morning routines", 3))
        .await
        .unwrap();
    assert_eq!(topics.value.len(), 3);
}

#[tokio::test]
async fn test_invalid_request_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = AppContext::new(config_in(&dir)).unwrap();

    let result = app
        .content()
        .generate_script(&ScriptRequest::new("   "))
        .await;
    assert!(result.is_err());
}
