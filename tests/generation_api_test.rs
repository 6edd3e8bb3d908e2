use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use quizgen_backend::config::{
    AiConfig, ApiTimeouts, Config, MonitorConfig, QuestionLimits, RetrySettings, TaskConfig,
    ValidationConfig,
};
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "test_secret_key";

fn test_config(api_url: String) -> Config {
    Config {
        server_address: "127.0.0.1:0".into(),
        jwt_secret: SECRET.into(),
        ai: AiConfig::new("sk-test", api_url),
        timeouts: ApiTimeouts {
            base: Duration::from_secs(5),
            ..ApiTimeouts::default()
        },
        retry: RetrySettings {
            max_retries: 1,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
        },
        question: QuestionLimits::default(),
        validation: ValidationConfig::default(),
        task: TaskConfig::default(),
        monitor: MonitorConfig::default(),
    }
}

fn app(api_url: String) -> Router {
    let config = test_config(api_url);
    quizgen_backend::router(quizgen_backend::AppState::new(&config))
}

fn token_for(user: JsonValue) -> String {
    let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize;
    encode(
        &Header::default(),
        &json!({ "userId": user, "exp": exp }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, JsonValue) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn generate_request(token: &str, body: JsonValue) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/ai-qa/generate")
        .header("Authorization", format!("Bearer {}", token))
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn progress_request(token: &str, task_id: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("/api/ai-qa/progress/{}", task_id))
        .header("Authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn generate_then_poll_until_completed() {
    let server = MockServer::start().await;
    let completion = json!([
        {
            "question": "应用求根公式解方程 x^2-3x+2=0",
            "options": ["A. 1和2", "B. -1和-2"],
            "correctAnswer": "A",
            "explanation": "代入求根公式得 x=1 或 x=2"
        }
    ]);
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "output": { "text": completion.to_string() } })),
        )
        .mount(&server)
        .await;

    let app = app(server.uri());
    let token = token_for(json!(42));

    let (status, body) = send(
        &app,
        generate_request(
            &token,
            json!({
                "topic": "二次函数",
                "difficulty": "中等",
                "count": 5,
                "knowledgePoints": "求根公式,不包括虚数"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let task_id = body["taskId"].as_str().unwrap().to_string();
    assert!(task_id.starts_with("generate_42_"));

    let mut last = JsonValue::Null;
    for _ in 0..300 {
        let (status, body) = send(&app, progress_request(&token, &task_id)).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == "completed" || body["status"] == "failed" {
            last = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(last["status"], "completed");
    assert_eq!(last["progress"], 100);
    assert_eq!(last["result"]["cards"][0]["correctAnswer"], "A. 1和2");
    assert!(last["result"]["validation"]["overallScore"].is_number());

    let (status, health) = send(
        &app,
        Request::builder()
            .uri("/api/monitor/health")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["stats"]["totalCalls"], 1);
    assert_eq!(health["healthy"], true);
}

#[tokio::test]
async fn progress_is_scoped_to_the_owner() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let app = app(server.uri());
    let owner = token_for(json!("alice"));
    let other = token_for(json!("bob"));

    let (status, body) = send(
        &app,
        generate_request(&owner, json!({"topic": "递归", "difficulty": "简单", "count": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let task_id = body["taskId"].as_str().unwrap();

    let (status, _) = send(&app, progress_request(&other, task_id)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, progress_request(&owner, "generate_alice_0_missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("generate_alice_0_missing"));
}

#[tokio::test]
async fn rejects_invalid_payloads_and_tokens() {
    let app = app("http://127.0.0.1:1/unused".into());
    let token = token_for(json!("u1"));

    let (status, _) = send(
        &app,
        generate_request(&token, json!({"topic": "递归", "difficulty": "简单", "count": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        generate_request(&token, json!({"topic": "", "difficulty": "简单", "count": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let missing = Request::builder()
        .method("POST")
        .uri("/api/ai-qa/generate")
        .header("Content-Type", "application/json")
        .body(Body::from(json!({"topic": "递归", "difficulty": "简单", "count": 3}).to_string()))
        .unwrap();
    let (status, body) = send(&app, missing).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "missing_authorization");

    let (status, body) = send(&app, progress_request("not-a-jwt", "anything")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn count_limit_comes_from_config() {
    let mut config = test_config("http://127.0.0.1:1/unused".into());
    config.question = QuestionLimits {
        min_count: 1,
        max_count: 80,
    };
    let app = quizgen_backend::router(quizgen_backend::AppState::new(&config));
    let token = token_for(json!("u1"));

    let (status, _) = send(
        &app,
        generate_request(&token, json!({"topic": "递归", "difficulty": "简单", "count": 60})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = send(
        &app,
        generate_request(&token, json!({"topic": "递归", "difficulty": "简单", "count": 81})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("80"));
}

#[tokio::test]
async fn liveness_and_monitor_reset() {
    let app = app("http://127.0.0.1:1/unused".into());

    let (status, body) = send(
        &app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let token = token_for(json!("ops"));
    let (status, _) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/monitor/reset")
            .header("Authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}
