//! Tutor API contract tests.
//!
//! These tests run the HTTP tutor client against a mock chat completions
//! server and verify:
//! - the request carries the model, sampling options, JSON mode and auth
//! - the lesson context travels in the user message
//! - fenced and bare JSON replies parse into tutor responses
//! - rate limits, missing keys and malformed replies become fallbacks

use pyvidhya::config::TutorConfig;
use pyvidhya::lesson::{ContextEvent, Curriculum, LessonContext, Stage, reduce};
use pyvidhya::tutor::{ActionKind, HttpTutorClient, TutorClient, TutorError, TutorResponse};
use pyvidhya::LessonConfig;
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn context() -> LessonContext {
    let curriculum = Curriculum::builtin().unwrap();
    LessonContext::initial(&curriculum, &LessonConfig::default())
}

fn client_for(server: &MockServer) -> HttpTutorClient {
    HttpTutorClient::new(TutorConfig {
        api_url: server.uri(),
        api_model: "tutor-test".into(),
        api_key: "test-key".into(),
        ..TutorConfig::default()
    })
    .unwrap()
}

/// A chat completion whose message content is `content`.
fn completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": "tutor-test",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

fn tutor_json() -> String {
    json!({
        "readingContent": "Nice work! 🎉 Your variable holds your name.",
        "speakingContent": "Nice work! Your variable holds your name.",
        "actions": [{"type": "awardCoins", "payload": {"coins": 10}}],
        "checklist": ["✓ Acknowledged current stage"],
        "rubric": {
            "stage": "explore",
            "successCriteria": ["Change the value of name"],
            "commonMistakes": []
        },
        "nextStep": {"label": "Try another name", "reason": "See the output change"}
    })
    .to_string()
}

// ────────────────────────────────────────────────────────────────────────────
// Request format
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn request_carries_model_options_and_auth() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "tutor-test",
            "temperature": 0.7,
            "max_tokens": 1024,
            "response_format": {"type": "json_object"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(&tutor_json())))
        .expect(1)
        .mount(&server)
        .await;

    let response = client_for(&server)
        .request(&context(), "what is a variable?")
        .await
        .unwrap();
    assert_eq!(response.rubric.map(|r| r.stage), Some(Stage::Explore));
}

#[tokio::test]
async fn user_message_embeds_input_and_context() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(&tutor_json())))
        .mount(&server)
        .await;

    client_for(&server)
        .get_response(&context(), "what is a variable?")
        .await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["messages"][0]["role"], "system");
    assert!(
        body["messages"][0]["content"]
            .as_str()
            .unwrap()
            .contains("Pyvidhya")
    );
    assert_eq!(body["messages"][1]["role"], "user");
    let user = body["messages"][1]["content"].as_str().unwrap();
    assert!(user.starts_with("User Input: what is a variable?\nContext:\n"));
    assert!(user.contains("\"chapterIndex\": 0"));
    assert!(user.contains("\"episodeTitle\": \"Variables & Your First Program\""));
}

// ────────────────────────────────────────────────────────────────────────────
// Response parsing
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn structured_reply_is_parsed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(&tutor_json())))
        .mount(&server)
        .await;

    let response = client_for(&server).get_response(&context(), "hi").await;
    assert_eq!(
        response.speaking_content,
        "Nice work! Your variable holds your name."
    );
    assert_eq!(response.actions.len(), 1);
    assert_eq!(response.actions[0].kind(), ActionKind::AwardCoins);
    assert_eq!(response.actions[0].coins(), 10);
    assert_eq!(
        response.rubric.as_ref().unwrap().success_criteria,
        vec!["Change the value of name"]
    );
    assert_eq!(response.next_step.label, "Try another name");
}

#[tokio::test]
async fn fenced_reply_is_parsed() {
    let server = MockServer::start().await;
    let fenced = format!("```json\n{}\n```", tutor_json());

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(&fenced)))
        .mount(&server)
        .await;

    let response = client_for(&server).request(&context(), "hi").await.unwrap();
    assert_eq!(response.rubric.map(|r| r.stage), Some(Stage::Explore));
}

#[tokio::test]
async fn prose_reply_falls_back_and_keeps_stage() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("Sure! Variables are boxes for values.")),
        )
        .mount(&server)
        .await;

    let context = reduce(&context(), ContextEvent::StageAdvanced(Stage::Practice));
    let client = client_for(&server);

    let err = client.request(&context, "hi").await.unwrap_err();
    assert!(matches!(err, TutorError::Parse(_)));

    let response = client.get_response(&context, "hi").await;
    assert_eq!(response, TutorResponse::failure(Stage::Practice));
}

#[tokio::test]
async fn completion_without_choices_is_a_parse_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .request(&context(), "hi")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PARSE_FAILED");
}

// ────────────────────────────────────────────────────────────────────────────
// Error mapping
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn status_429_becomes_rate_limited_fallback() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Too many requests", "type": "rate_limit_error"}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.request(&context(), "hi").await.unwrap_err();
    assert_eq!(err, TutorError::RateLimited("Too many requests".into()));

    let response = client.get_response(&context(), "hi").await;
    assert_eq!(response, TutorResponse::rate_limited(Stage::Discover));
}

#[tokio::test]
async fn quota_message_is_rate_limited_regardless_of_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": {"message": "RESOURCE_EXHAUSTED: check your quota"}
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .request(&context(), "hi")
        .await
        .unwrap_err();
    assert!(err.is_rate_limited());
}

#[tokio::test]
async fn server_error_becomes_generic_fallback() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.request(&context(), "hi").await.unwrap_err();
    assert_eq!(
        err,
        TutorError::Http {
            status: 500,
            message: "internal error".into()
        }
    );
    let response = client.get_response(&context(), "hi").await;
    assert_eq!(response, TutorResponse::failure(Stage::Discover));
}

#[tokio::test]
async fn missing_api_key_makes_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(&tutor_json())))
        .expect(0)
        .mount(&server)
        .await;

    let client = HttpTutorClient::new(TutorConfig {
        api_url: server.uri(),
        api_key: String::new(),
        api_key_env: "PYVIDHYA_TEST_KEY_THAT_IS_NEVER_SET".into(),
        ..TutorConfig::default()
    })
    .unwrap();

    let context = reduce(&context(), ContextEvent::StageAdvanced(Stage::Apply));
    let response = client.get_response(&context, "hi").await;
    assert_eq!(response, TutorResponse::missing_api_key(Stage::Apply));
}

#[tokio::test]
async fn unreachable_server_becomes_generic_fallback() {
    let client = HttpTutorClient::new(TutorConfig {
        api_url: "http://127.0.0.1:9".into(),
        api_key: "test-key".into(),
        timeout_secs: 2,
        ..TutorConfig::default()
    })
    .unwrap();

    let err = client.request(&context(), "hi").await.unwrap_err();
    assert_eq!(err.code(), "REQUEST_FAILED");
}
