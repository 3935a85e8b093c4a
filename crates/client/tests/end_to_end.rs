//! Client against the real interpretation server with a scripted upstream.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use client::{ClientError, InterpretationClient, RetryOptions};
use divination::{
    compute_hexagram, InterpretationResult, LlmProvider, PromptPayload, RateLimitSettings, ResponseFormat,
    SlidingWindowLimiter, UpstreamError,
};
use serde_json::json;
use server::{router, AppState};

struct CannedUpstream {
    calls: AtomicUsize,
    reply: fn(&PromptPayload, usize) -> Result<String, UpstreamError>,
}

#[async_trait]
impl LlmProvider for CannedUpstream {
    async fn complete(&self, prompt: &PromptPayload) -> Result<String, UpstreamError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        (self.reply)(prompt, n)
    }

    fn model(&self) -> &str {
        "canned"
    }
}

async fn start(upstream: Arc<CannedUpstream>, format: ResponseFormat) -> InterpretationClient {
    let limiter = Arc::new(SlidingWindowLimiter::new(RateLimitSettings::default()));
    let app = router(AppState::new(upstream, limiter, format), &[]);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    InterpretationClient::new(format!("http://{addr}"), Duration::from_secs(5)).unwrap()
}

fn fast() -> RetryOptions {
    RetryOptions {
        max_retries: 3,
        base_delay: Duration::from_millis(5),
    }
}

/// Echoes the templated hexagram name back as a structured answer.
fn structured_echo(prompt: &PromptPayload, _: usize) -> Result<String, UpstreamError> {
    let system = &prompt.messages[0].content;
    let start = system.find('「').map(|i| i + '「'.len_utf8()).unwrap_or(0);
    let end = system.find('」').unwrap_or(start);
    let hexagram = &system[start..end];

    Ok(json!({
        "questionBackground": { "question": "事业运如何？" },
        "hexagramOverview": {
            "hexagram": hexagram,
            "xiangCi": "明出地上，晋。",
            "guaCi": "晋：康侯用锡马蕃庶，昼日三接。",
            "yaoCi": "六三：众允，悔亡。",
            "fortune": "吉",
            "keyHint": "稳步上进"
        },
        "hexagramAnalysis": {
            "xiangCiInterpretation": "光明渐进。",
            "guaCiEssence": "得到赏识。",
            "yaoCiAnalysis": "众人认可。",
            "changedHexagramAnalysis": "变为火山旅。"
        },
        "problemAnalysis": { "analysis": "上升期。", "recommendations": ["争取支持"] },
        "reminder": "勿骄勿躁。"
    })
    .to_string())
}

#[tokio::test]
async fn cast_hexagram_is_interpreted_end_to_end() {
    let upstream = Arc::new(CannedUpstream {
        calls: AtomicUsize::new(0),
        reply: structured_echo,
    });
    let client = start(upstream.clone(), ResponseFormat::JsonSchema).await;
    let hexagram = compute_hexagram(123, 456, 789);

    let result = client
        .get_interpretation("事业运如何？", &hexagram, &fast())
        .await
        .unwrap();

    let InterpretationResult::Structured(interpretation) = &result else {
        panic!("expected structured result, got {result:?}");
    };
    assert_eq!(interpretation.hexagram_overview.hexagram, hexagram.hexagram_name);
    assert_eq!(interpretation.hexagram_overview.hexagram, "火地晋");
    assert_eq!(result.sections()[1].title, "卦象总览");
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sectioned_deployment_yields_ordered_sections() {
    let upstream = Arc::new(CannedUpstream {
        calls: AtomicUsize::new(0),
        reply: |_, _| Ok("【问题】\n• 事业运如何？\n【卦象分析】\n• 光明渐进\n【总结启示】\n• 顺势而为".into()),
    });
    let client = start(upstream, ResponseFormat::SectionedText).await;

    let result = client
        .get_interpretation("事业运如何？", &compute_hexagram(123, 456, 789), &fast())
        .await
        .unwrap();

    let titles: Vec<String> = result.sections().into_iter().map(|s| s.title).collect();
    assert_eq!(titles, ["问题", "卦象分析", "总结启示"]);
}

#[tokio::test]
async fn model_format_misses_are_retried_by_the_client() {
    let upstream = Arc::new(CannedUpstream {
        calls: AtomicUsize::new(0),
        reply: |prompt, n| {
            if n < 3 {
                Ok("抱歉，我先想一想。".into())
            } else {
                structured_echo(prompt, n)
            }
        },
    });
    let client = start(upstream.clone(), ResponseFormat::JsonSchema).await;

    let result = client
        .get_interpretation("事业运如何？", &compute_hexagram(123, 456, 789), &fast())
        .await
        .unwrap();

    assert!(matches!(result, InterpretationResult::Structured(_)));
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn bad_upstream_credential_reaches_the_caller_after_one_attempt() {
    let upstream = Arc::new(CannedUpstream {
        calls: AtomicUsize::new(0),
        reply: |_, _| {
            Err(UpstreamError::Rejected {
                status: 401,
                message: "User not found.".into(),
                retry_after_secs: None,
            })
        },
    });
    let client = start(upstream.clone(), ResponseFormat::JsonSchema).await;

    let err = client
        .get_interpretation("事业运如何？", &compute_hexagram(123, 456, 789), &fast())
        .await
        .unwrap_err();

    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    let ClientError::CredentialInvalid { details, suggestion } = &err else {
        panic!("expected credential error, got {err:?}");
    };
    assert_eq!(details, "User not found.");
    assert!(suggestion.as_deref().is_some_and(|s| s.contains("OPENROUTER_API_KEY")));
}

#[tokio::test]
async fn server_rate_limit_surfaces_on_the_sixth_call() {
    let upstream = Arc::new(CannedUpstream {
        calls: AtomicUsize::new(0),
        reply: structured_echo,
    });
    let client = start(upstream.clone(), ResponseFormat::JsonSchema).await;
    let hexagram = compute_hexagram(123, 456, 789);

    for _ in 0..5 {
        client.get_interpretation("q", &hexagram, &fast()).await.unwrap();
    }
    let err = client.get_interpretation("q", &hexagram, &fast()).await.unwrap_err();

    let wait = err.retry_after().unwrap();
    assert!(wait > Duration::ZERO && wait <= Duration::from_secs(60), "{wait:?}");
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 5);
}
