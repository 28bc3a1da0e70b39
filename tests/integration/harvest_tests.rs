//! Integration tests for the harvester
//!
//! These tests use wiremock as the scraping proxy and run full harvests
//! against a checkpoint log in a temporary directory.

use sanad_harvest::config::{
    Config, HarvestConfig, OutputConfig, ProxyConfig, RetryConfig, TargetConfig,
};
use sanad_harvest::crawler::Coordinator;
use sanad_harvest::{ConfigError, HarvestError};
use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BASE_URL: &str = "https://shamela.ws";

/// Creates a test configuration for book 1681 pages `start..=end`
fn create_test_config(
    server: &MockServer,
    dir: &Path,
    keys: &[&str],
    start: u64,
    end: u64,
    concurrency: u32,
) -> Config {
    Config {
        proxy: ProxyConfig {
            endpoint: format!("{}/v2/scrape", server.uri()),
            api_keys: keys.iter().map(|k| k.to_string()).collect(),
            timeout_secs: 5,
            render_full_page: true,
        },
        harvest: HarvestConfig {
            concurrency,
            batch_delay_ms: 0,
            ..HarvestConfig::default()
        },
        // Very short backoff for testing
        retry: RetryConfig {
            base_ms: 1,
            rate_limit_base_ms: 1,
            upstream_base_ms: 1,
            challenge_base_ms: 1,
            cap_ms: 5,
            jitter_ms: 0,
            ..RetryConfig::default()
        },
        output: OutputConfig {
            checkpoint_path: dir.join("book_1681.jsonl"),
            report_path: dir.join("failure_report.json"),
            debug_dir: Some(dir.join("debug")),
        },
        target: TargetConfig::Book {
            book_id: 1681,
            start_page: start,
            end_page: end,
            base_url: BASE_URL.to_string(),
        },
    }
}

fn page_url(page: u64) -> String {
    format!("{}/book/1681/{}", BASE_URL, page)
}

fn page_html(page: u64) -> String {
    format!(
        r#"<html><head><title>صحيح البخاري</title></head><body>
        <div class="nass">حدثنا <a href="/narrator/{}">الحميدي</a> قال حدثنا
        <a href="/narrator/77">سفيان</a> <span class="c2">متن الحديث في الصفحة {}</span></div>
        </body></html>"#,
        100 + page,
        page
    )
}

const NO_NARRATORS_HTML: &str = r#"<html><head><title>صحيح البخاري</title></head><body>
    <div class="nass"><p>باب ما جاء في فضل العلم وأهله، وليس في هذه الصفحة إسناد ولا رواة</p></div>
    </body></html>"#;

fn envelope(html: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "data": {
            "html": html,
            "metadata": { "statusCode": 200 }
        }
    }))
}

/// Answers every scrape with a page carrying narrator links
async fn mount_success(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .respond_with(envelope(&page_html(1)))
        .mount(server)
        .await;
}

fn log_lines(path: &Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("log line is JSON"))
        .collect()
}

fn lines_for_page(lines: &[Value], page: u64) -> Vec<&Value> {
    lines
        .iter()
        .filter(|line| line["page_number"] == page)
        .collect()
}

async fn run(config: Config) -> sanad_harvest::output::RunStatistics {
    let coordinator = Coordinator::new(config, None).expect("Failed to create coordinator");
    coordinator.run().await.expect("Harvest failed")
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    // Page 3 fails twice at the proxy, then falls through to the success mock
    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .and(body_partial_json(json!({ "url": page_url(3) })))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .respond_with(envelope(&page_html(3)))
        .expect(5)
        .mount(&server)
        .await;

    let config = create_test_config(&server, dir.path(), &["key-one"], 1, 5, 2);
    let log_path = config.output.checkpoint_path.clone();
    let stats = run(config).await;

    assert_eq!(stats.attempted, 5);
    assert_eq!(stats.succeeded, 5);
    assert_eq!(stats.failed(), 0);

    let lines = log_lines(&log_path);
    assert_eq!(lines.len(), 5);
    let page_3 = lines_for_page(&lines, 3);
    assert_eq!(page_3.len(), 1);
    assert_eq!(page_3[0]["status"], "success");
    assert_eq!(page_3[0]["url"], page_url(3));
    assert!(page_3[0]["hadith_blocks"].is_array());
}

#[tokio::test]
async fn test_no_target_entities_is_recorded_once() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .and(body_partial_json(json!({ "url": page_url(7) })))
        .respond_with(envelope(NO_NARRATORS_HTML))
        .expect(1)
        .mount(&server)
        .await;
    mount_success(&server).await;

    let config = create_test_config(&server, dir.path(), &["key-one"], 6, 8, 2);
    let log_path = config.output.checkpoint_path.clone();
    let debug_dir = dir.path().join("debug");

    let stats = run(config.clone()).await;
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.errors(), 0);

    let lines = log_lines(&log_path);
    let page_7 = lines_for_page(&lines, 7);
    assert_eq!(page_7.len(), 1);
    assert_eq!(page_7[0]["status"], "failed");
    assert_eq!(page_7[0]["reason"], "no_target_entities");
    assert!(debug_dir.join("page_7_no_target_entities.html").exists());

    // The benign failure is never repaired
    let coordinator = Coordinator::new(config, None).unwrap();
    assert!(coordinator.plan().unwrap().is_empty());
    let stats = coordinator.run().await.unwrap();
    assert_eq!(stats.scheduled_repair, 0);
    assert_eq!(stats.attempted, 0);
    assert_eq!(log_lines(&log_path).len(), 3);
}

#[tokio::test]
async fn test_rerun_over_done_range_adds_nothing() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .respond_with(envelope(&page_html(1)))
        .expect(3)
        .mount(&server)
        .await;

    let config = create_test_config(&server, dir.path(), &["key-one"], 1, 3, 2);
    let log_path = config.output.checkpoint_path.clone();

    run(config.clone()).await;
    let before = std::fs::read_to_string(&log_path).unwrap();

    let stats = run(config).await;
    assert_eq!(stats.attempted, 0);
    assert_eq!(stats.scheduled_expand, 0);
    assert_eq!(std::fs::read_to_string(&log_path).unwrap(), before);
}

#[tokio::test]
async fn test_concurrent_quota_exhaustion_rotates_once() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .and(header("authorization", "Bearer key-one"))
        .respond_with(ResponseTemplate::new(402))
        .expect(4)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .and(header("authorization", "Bearer key-two"))
        .respond_with(envelope(&page_html(10)))
        .expect(4)
        .mount(&server)
        .await;

    let config = create_test_config(&server, dir.path(), &["key-one", "key-two"], 10, 13, 4);
    let log_path = config.output.checkpoint_path.clone();

    let coordinator = Coordinator::new(config, None).unwrap();
    let stats = coordinator.run().await.unwrap();

    assert_eq!(coordinator.session().pool().position(), 1);
    assert!(!coordinator.session().is_halted());
    assert_eq!(stats.succeeded, 4);

    let lines = log_lines(&log_path);
    assert_eq!(lines.len(), 4);
    assert!(lines.iter().all(|line| line["status"] == "success"));
}

#[tokio::test]
async fn test_pool_exhaustion_halts_scheduling() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .and(header("authorization", "Bearer key-one"))
        .respond_with(ResponseTemplate::new(402))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .and(header("authorization", "Bearer key-two"))
        .respond_with(ResponseTemplate::new(402))
        .expect(2)
        .mount(&server)
        .await;

    let config = create_test_config(&server, dir.path(), &["key-one", "key-two"], 1, 6, 2);
    let log_path = config.output.checkpoint_path.clone();
    let report_path = config.output.report_path.clone();

    let coordinator = Coordinator::new(config, Some("abc123".to_string())).unwrap();
    let stats = coordinator.run().await.unwrap();

    assert!(coordinator.session().pool().is_exhausted());
    assert_eq!(coordinator.session().pool().position(), 2);
    assert_eq!(stats.scheduled_expand, 6);
    assert_eq!(stats.attempted, 2);
    assert_eq!(stats.halt_cause.as_deref(), Some("All API keys exhausted"));

    let lines = log_lines(&log_path);
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|line| line["reason"] == "quota_exhausted"));

    let report: Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["scope"], "book 1681 pages 1-6");
    assert_eq!(report["configHash"], "abc123");
    assert_eq!(report["halted"], "All API keys exhausted");
    assert_eq!(
        report["byReason"],
        json!([{ "reason": "quota_exhausted", "count": 2 }])
    );
    assert_eq!(report["stillFailing"].as_array().unwrap().len(), 2);
    assert_eq!(report["stillFailing"][0]["unitId"], "1681/1");
}

#[tokio::test]
async fn test_repair_phase_compacts_and_retries() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .respond_with(envelope(&page_html(2)))
        .expect(2)
        .mount(&server)
        .await;

    let config = create_test_config(&server, dir.path(), &["key-one"], 1, 4, 2);
    let log_path = config.output.checkpoint_path.clone();

    // Older log written with legacy reason names
    std::fs::write(
        &log_path,
        concat!(
            r#"{"status":"success","book_id":1681,"page_number":1,"url":"https://shamela.ws/book/1681/1"}"#,
            "\n",
            r#"{"status":"failed","book_id":1681,"page_number":2,"reason":"api_failure","message":"old"}"#,
            "\n",
            r#"{"status":"failed","book_id":1681,"page_number":4,"reason":"no_narrators","message":"old"}"#,
            "\n",
        ),
    )
    .unwrap();

    let stats = run(config).await;

    assert_eq!(stats.scheduled_repair, 1);
    assert_eq!(stats.compacted, 1);
    assert_eq!(stats.repaired, 1);
    assert_eq!(stats.scheduled_expand, 1);

    let lines = log_lines(&log_path);
    assert_eq!(lines.len(), 4);
    assert!(lines.iter().all(|line| line["reason"] != "api_failure"));
    assert_eq!(lines_for_page(&lines, 2)[0]["status"], "success");
    assert_eq!(lines_for_page(&lines, 3)[0]["status"], "success");
    assert_eq!(lines_for_page(&lines, 4)[0]["reason"], "no_narrators");
}

#[tokio::test]
async fn test_unit_failing_again_in_repair_is_retried_in_expand() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    // Page 2 is rejected by the proxy on every attempt
    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .and(body_partial_json(json!({ "url": page_url(2) })))
        .respond_with(ResponseTemplate::new(400))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .respond_with(envelope(&page_html(1)))
        .expect(2)
        .mount(&server)
        .await;

    let config = create_test_config(&server, dir.path(), &["key-one"], 1, 3, 2);
    let log_path = config.output.checkpoint_path.clone();
    std::fs::write(
        &log_path,
        concat!(
            r#"{"status":"failed","book_id":1681,"page_number":2,"reason":"proxy_failure","message":"old"}"#,
            "\n",
        ),
    )
    .unwrap();

    let stats = run(config).await;

    assert_eq!(stats.scheduled_repair, 1);
    assert_eq!(stats.repaired, 0);
    assert_eq!(stats.scheduled_expand, 3);
    assert_eq!(stats.attempted, 4);
    assert_eq!(
        stats.failure_sample(sanad_harvest::FailureReason::ProxyFailure, 5),
        &[
            sanad_harvest::UnitKey::page(1681, 2),
            sanad_harvest::UnitKey::page(1681, 2)
        ]
    );

    let lines = log_lines(&log_path);
    let page_2 = lines_for_page(&lines, 2);
    assert_eq!(page_2.len(), 2);
    assert!(page_2.iter().all(|line| line["reason"] == "proxy_failure"));
    assert!(page_2.iter().all(|line| line["message"] != "old"));
    assert_eq!(lines_for_page(&lines, 1)[0]["status"], "success");
    assert_eq!(lines_for_page(&lines, 3)[0]["status"], "success");
}

#[tokio::test]
async fn test_attempt_budget_exhaustion_is_recorded() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let config = create_test_config(&server, dir.path(), &["key-one"], 1, 1, 2);
    let log_path = config.output.checkpoint_path.clone();
    let stats = run(config).await;

    assert_eq!(stats.errors(), 1);
    let lines = log_lines(&log_path);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["reason"], "proxy_failure");
    assert!(lines[0]["message"]
        .as_str()
        .unwrap()
        .ends_with("after 3 attempts"));
}

#[tokio::test]
async fn test_missing_credentials_fail_fast() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let config = create_test_config(&server, dir.path(), &[" "], 1, 3, 2);
    let log_path = config.output.checkpoint_path.clone();

    let result = Coordinator::new(config, None);
    assert!(matches!(
        result,
        Err(HarvestError::Config(ConfigError::NoCredentials))
    ));
    assert!(!log_path.exists());
    assert!(server.received_requests().await.unwrap().is_empty());
}
