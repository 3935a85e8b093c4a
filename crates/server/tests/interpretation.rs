//! Drives the router in-process with a scripted upstream provider.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::Router;
use divination::{
    compute_hexagram, LlmProvider, PromptPayload, RateLimitSettings, ResponseFormat,
    SlidingWindowLimiter, UpstreamError,
};
use serde_json::{json, Value};
use server::{router, AppState};
use tower::ServiceExt;

/// Returns a fixed reply and remembers every prompt it was given.
struct ScriptedProvider {
    reply: Result<String, UpstreamError>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<PromptPayload>>,
}

impl ScriptedProvider {
    fn replying(reply: Result<String, UpstreamError>) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, prompt: &PromptPayload) -> Result<String, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        self.reply.clone()
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

fn app(provider: Arc<ScriptedProvider>, format: ResponseFormat) -> Router {
    let limiter = Arc::new(SlidingWindowLimiter::new(RateLimitSettings::default()));
    router(AppState::new(provider, limiter, format), &[])
}

fn structured_reply(hexagram: &str) -> String {
    json!({
        "questionBackground": { "question": "事业运如何？" },
        "hexagramOverview": {
            "hexagram": hexagram,
            "xiangCi": "明出地上，晋。",
            "guaCi": "晋：康侯用锡马蕃庶，昼日三接。",
            "yaoCi": "六三：众允，悔亡。",
            "fortune": "吉",
            "keyHint": "众人信服，稳步上进"
        },
        "hexagramAnalysis": {
            "xiangCiInterpretation": "日出地上，光明渐进。",
            "guaCiEssence": "得到赏识。",
            "yaoCiAnalysis": "获得众人认可。",
            "changedHexagramAnalysis": "变为火山旅。"
        },
        "problemAnalysis": { "analysis": "上升期。", "recommendations": ["争取支持", "保持谦逊"] },
        "reminder": "勿骄勿躁。"
    })
    .to_string()
}

fn body_for(question: &str, gua: &str, yao: u8) -> Value {
    json!({ "question": question, "divinationData": { "guaName": gua, "yaoIndex": yao } })
}

/// A JSON POST arriving from `peer_ip`, as `into_make_service_with_connect_info` would tag it.
fn post(path: &str, body: &Value, peer_ip: &str) -> Request<Body> {
    let mut request = Request::post(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let peer: SocketAddr = format!("{peer_ip}:40000").parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(peer));
    request
}

fn with_forwarded_for(mut request: Request<Body>, value: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
    request
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, retry_after, body)
}

#[tokio::test]
async fn cast_prompt_and_structured_reply_round_trip() {
    let hexagram = compute_hexagram(123, 456, 789);
    let provider = ScriptedProvider::replying(Ok(structured_reply(&hexagram.hexagram_name)));
    let app = app(provider.clone(), ResponseFormat::JsonSchema);

    let body = json!({
        "question": "事业运如何？",
        "divinationData": {
            "guaName": hexagram.hexagram_name,
            "yaoIndex": hexagram.line_index.get(),
            "yaoText": hexagram.line_text,
        }
    });
    let (status, _, result) = send(&app, post("/api/v1/get-interpretation", &body, "198.51.100.7")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["hexagramOverview"]["hexagram"], "火地晋");
    assert_eq!(result["problemAnalysis"]["recommendations"][1], "保持谦逊");

    let prompts = provider.prompts.lock().unwrap();
    let system = &prompts[0].messages[0].content;
    assert!(system.contains("「火地晋」"));
    assert!(system.contains("第3爻（六三）"));
    assert!(system.contains("事业运如何？"));
}

#[tokio::test]
async fn sectioned_mode_returns_ordered_sections() {
    let reply = "【问题】\n• 事业运如何？\n\n【卦象总览】\n• 本卦：火地晋\n\n【总结启示】\n• 顺势而为。";
    let provider = ScriptedProvider::replying(Ok(reply.to_string()));
    let app = app(provider, ResponseFormat::SectionedText);

    let (status, _, result) = send(
        &app,
        post("/api/get-interpretation", &body_for("事业运如何？", "火地晋", 3), "198.51.100.7"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let titles: Vec<&str> = result["sections"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, ["问题", "卦象总览", "总结启示"]);
    assert_eq!(result["sections"][2]["content"], "• 顺势而为。");
}

#[tokio::test]
async fn sixth_request_from_one_client_is_rate_limited() {
    let provider = ScriptedProvider::replying(Ok(structured_reply("乾为天")));
    let app = app(provider.clone(), ResponseFormat::JsonSchema);
    let body = body_for("q", "乾为天", 1);

    for _ in 0..5 {
        let (status, _, _) = send(&app, post("/api/v1/get-interpretation", &body, "203.0.113.1")).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, retry_after_header, error) =
        send(&app, post("/api/v1/get-interpretation", &body, "203.0.113.1")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let retry_after = error["retryAfter"].as_u64().unwrap();
    assert!(retry_after > 0 && retry_after <= 60);
    assert_eq!(retry_after_header, Some(retry_after.to_string()));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 5);

    // Another client is unaffected.
    let (status, _, _) = send(&app, post("/api/v1/get-interpretation", &body, "203.0.113.2")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn rate_limit_is_checked_before_validation() {
    let provider = ScriptedProvider::replying(Ok(structured_reply("乾为天")));
    let app = app(provider, ResponseFormat::JsonSchema);
    let invalid = json!({ "question": "" });

    for _ in 0..5 {
        let (status, _, _) = send(&app, post("/api/v1/get-interpretation", &invalid, "192.0.2.9")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    let (status, _, _) = send(&app, post("/api/v1/get-interpretation", &invalid, "192.0.2.9")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn invalid_inputs_are_rejected_without_calling_upstream() {
    let provider = ScriptedProvider::replying(Ok(structured_reply("乾为天")));
    let app = app(provider.clone(), ResponseFormat::JsonSchema);

    let cases = [
        (json!({ "question": "  ", "divinationData": { "guaName": "乾为天", "yaoIndex": 1 } }), "question"),
        (json!({ "question": 7 }), "question"),
        (json!({ "question": "q" }), "divinationData"),
        (json!({ "question": "q", "divinationData": { "yaoIndex": 1 } }), "guaName"),
        (json!({ "question": "q", "divinationData": { "guaName": "乾为天", "yaoIndex": 7 } }), "yaoIndex"),
    ];
    for (i, (body, mentions)) in cases.iter().enumerate() {
        let ip = format!("10.1.0.{i}");
        let (status, _, error) = send(&app, post("/api/v1/get-interpretation", body, &ip)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(error["error"], "Invalid request parameters");
        assert!(error["details"].as_str().unwrap().contains(mentions), "{error}");
    }

    let not_json = Request::post("/api/v1/get-interpretation")
        .body(Body::from("question=hi"))
        .unwrap();
    let (status, _, _) = send(&app, not_json).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn upstream_unauthorized_becomes_actionable_401() {
    let provider = ScriptedProvider::replying(Err(UpstreamError::Rejected {
        status: 401,
        message: "No auth credentials found".into(),
        retry_after_secs: None,
    }));
    let app = app(provider, ResponseFormat::JsonSchema);

    let (status, _, error) = send(
        &app,
        post("/api/v1/get-interpretation", &body_for("q", "乾为天", 1), "10.2.0.1"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error["error"], "Upstream API key is invalid or expired");
    assert_eq!(error["details"], "No auth credentials found");
    assert!(error["suggestion"].as_str().unwrap().contains("API key"));
}

#[tokio::test]
async fn upstream_status_is_mirrored() {
    let provider = ScriptedProvider::replying(Err(UpstreamError::Rejected {
        status: 429,
        message: "Rate limit exceeded: free-models-per-min".into(),
        retry_after_secs: Some(20),
    }));
    let app = app(provider, ResponseFormat::JsonSchema);

    let (status, retry_after, error) = send(
        &app,
        post("/api/v1/get-interpretation", &body_for("q", "乾为天", 1), "10.3.0.1"),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error["retryAfter"], 20);
    assert_eq!(retry_after.as_deref(), Some("20"));
    assert_eq!(error["details"], "Rate limit exceeded: free-models-per-min");
}

#[tokio::test]
async fn transport_and_body_failures_are_500s() {
    for failure in [
        UpstreamError::Transport {
            message: "request timed out after 30s".into(),
        },
        UpstreamError::MalformedBody {
            message: "expected value at line 1 column 1".into(),
        },
        UpstreamError::MissingContent,
    ] {
        let app = app(ScriptedProvider::replying(Err(failure.clone())), ResponseFormat::JsonSchema);
        let (status, _, error) = send(
            &app,
            post("/api/v1/get-interpretation", &body_for("q", "乾为天", 1), "10.4.0.1"),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{failure:?}");
        assert_eq!(error["details"], failure.to_string());
    }
}

#[tokio::test]
async fn unparseable_model_output_is_500_with_raw_text() {
    let provider = ScriptedProvider::replying(Ok("好的，以下是解读：……".into()));
    let app = app(provider, ResponseFormat::JsonSchema);

    let (status, _, error) = send(
        &app,
        post("/api/v1/get-interpretation", &body_for("q", "乾为天", 1), "10.5.0.1"),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error["error"], "Failed to parse the model response");
    assert_eq!(error["raw"], "好的，以下是解读：……");
}

#[tokio::test]
async fn blank_reply_in_sectioned_mode_is_one_fallback_section() {
    let provider = ScriptedProvider::replying(Ok("  \n ".into()));
    let app = app(provider, ResponseFormat::SectionedText);

    let (status, _, result) = send(
        &app,
        post("/api/v1/get-interpretation", &body_for("q", "乾为天", 1), "10.6.0.1"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let sections = result["sections"].as_array().unwrap();
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0]["title"], divination::FALLBACK_SECTION_TITLE);
}

#[tokio::test]
async fn rotating_forwarded_for_does_not_escape_the_peer_limit() {
    let provider = ScriptedProvider::replying(Ok(structured_reply("乾为天")));
    let app = app(provider.clone(), ResponseFormat::JsonSchema);
    let body = body_for("q", "乾为天", 1);

    let mut statuses = Vec::new();
    for i in 0..20 {
        let request = with_forwarded_for(
            post("/api/v1/get-interpretation", &body, "192.0.2.50"),
            &format!("10.0.0.{i}"),
        );
        statuses.push(send(&app, request).await.0);
    }

    assert!(statuses[..5].iter().all(|s| *s == StatusCode::OK));
    assert!(statuses[5..].iter().all(|s| *s == StatusCode::TOO_MANY_REQUESTS));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn trusted_proxy_keys_on_forwarded_for() {
    let provider = ScriptedProvider::replying(Ok(structured_reply("乾为天")));
    let limiter = Arc::new(SlidingWindowLimiter::new(RateLimitSettings::default()));
    let state = AppState::new(provider.clone(), limiter, ResponseFormat::JsonSchema).trust_forwarded_for(true);
    let app = router(state, &[]);
    let body = body_for("q", "乾为天", 1);

    for i in 0..6 {
        let request = with_forwarded_for(
            post("/api/v1/get-interpretation", &body, "192.0.2.60"),
            &format!("198.51.100.{i}, 192.0.2.60"),
        );
        assert_eq!(send(&app, request).await.0, StatusCode::OK);
    }
    assert_eq!(provider.calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app(ScriptedProvider::replying(Ok(String::new())), ResponseFormat::JsonSchema);
    let request = Request::get("/api/health").body(Body::empty()).unwrap();
    let (status, _, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].as_str().is_some());
    assert!(body["version"].as_str().is_some());
}
