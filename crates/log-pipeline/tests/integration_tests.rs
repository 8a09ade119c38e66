//! 통합 테스트 -- 파이프라인 전체 흐름 검증
//!
//! 로그 파일 수집부터 finding 전달까지의 흐름을 공개 API만으로 검증합니다.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use siemlite_core::clock::{ManualClock, SequentialIds};
use siemlite_core::config::SiemConfig;
use siemlite_core::{
    ActionTable, EventFactory, HealthStatus, Pipeline, Severity, SinkItem, SourceSpec,
};
use siemlite_log_pipeline::{
    ChannelSink, LineProcessor, OverflowPolicy, ParserRegistry, PipelineConfig,
    PipelineConfigBuilder, PipelineStats, PreflightOptions, SiemPipeline, SiemPipelineBuilder,
    SinkTarget, StartPosition, run_preflight,
};

const FAILED: &str =
    "Mar  9 08:15:01 web-01 sshd[4242]: Failed password for alice from 203.0.113.7 port 51122 ssh2";

fn auth_source(path: &Path) -> SourceSpec {
    SourceSpec {
        name: "auth_log".to_owned(),
        path: path.to_path_buf(),
        source_type: "auth_log".to_owned(),
    }
}

fn fixed_factory() -> EventFactory {
    let now = chrono::DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    EventFactory::new(
        Arc::new(ManualClock::new(now)),
        Arc::new(SequentialIds::new("evt")),
    )
}

fn build(config: PipelineConfig) -> (SiemPipeline, mpsc::Receiver<SinkItem>) {
    let (sink, rx) = ChannelSink::new(4096);
    let pipeline = SiemPipelineBuilder::new()
        .config(config)
        .factory(fixed_factory())
        .sink(Arc::new(sink))
        .build()
        .unwrap();
    (pipeline, rx)
}

fn collect(rx: &mut mpsc::Receiver<SinkItem>) -> (Vec<SinkItem>, Vec<SinkItem>) {
    let mut events = Vec::new();
    let mut findings = Vec::new();
    while let Ok(item) = rx.try_recv() {
        match item {
            SinkItem::Event(_) => events.push(item),
            SinkItem::Finding(_) => findings.push(item),
        }
    }
    (events, findings)
}

async fn wait_for_accepted(pipeline: &SiemPipeline, count: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while pipeline.snapshot().events_accepted < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("events were not accepted in time");
}

/// 파일에 쓴 무차별 대입 로그가 하나의 finding으로 이어지는지 확인
#[tokio::test]
async fn brute_force_file_produces_single_finding() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("auth.log");
    let mut content = String::new();
    for _ in 0..6 {
        content.push_str(FAILED);
        content.push('\n');
    }
    std::fs::write(&path, content).unwrap();

    let config = PipelineConfigBuilder::new()
        .source(auth_source(&path))
        .start_position(StartPosition::Beginning)
        .poll_interval(Duration::from_millis(10))
        .build()
        .unwrap();
    let (mut pipeline, mut rx) = build(config);

    pipeline.start().await.unwrap();
    wait_for_accepted(&pipeline, 6).await;
    pipeline.stop().await.unwrap();

    let (events, findings) = collect(&mut rx);
    assert_eq!(events.len(), 6);
    // 6번째 실패는 cooldown 중이므로 finding은 하나
    assert_eq!(findings.len(), 1);
    let SinkItem::Finding(finding) = &findings[0] else {
        unreachable!()
    };
    assert_eq!(finding.detector_id, "repeated_failure");
    assert_eq!(finding.severity, Severity::High);
    assert_eq!(finding.event_ids.len(), 5);
    assert_eq!(finding.key.to_string(), "alice@web-01");

    // finding이 가리키는 이벤트가 모두 싱크에 전달됨
    let delivered: Vec<&str> = events.iter().map(SinkItem::id).collect();
    for id in &finding.event_ids {
        assert!(delivered.contains(&id.as_str()));
    }
}

/// 실행 중 추가된 라인, 파싱 실패, 잘림(truncation)을 모두 처리하는지 확인
#[tokio::test]
async fn tailing_appends_and_truncation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("auth.log");
    std::fs::write(&path, "").unwrap();

    let config = PipelineConfigBuilder::new()
        .source(auth_source(&path))
        .start_position(StartPosition::Beginning)
        .poll_interval(Duration::from_millis(10))
        .build()
        .unwrap();
    let (mut pipeline, mut rx) = build(config);
    pipeline.start().await.unwrap();

    {
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{FAILED}").unwrap();
        writeln!(file, "this is not an auth.log line").unwrap();
    }
    wait_for_accepted(&pipeline, 1).await;

    // 잘린 뒤 새로 쓴 라인만 전달됨
    std::fs::write(
        &path,
        "Mar  9 08:20:00 web-01 sshd[4243]: Accepted publickey for bob from 10.0.0.2 port 2200 ssh2\n",
    )
    .unwrap();
    wait_for_accepted(&pipeline, 2).await;

    pipeline.stop().await.unwrap();
    let snapshot = pipeline.snapshot();
    assert_eq!(snapshot.parse_failures, 1);
    assert_eq!(snapshot.events_accepted, 2);
    assert!(snapshot.rotations >= 1);

    let (events, _) = collect(&mut rx);
    assert_eq!(events.len(), 2);
    let SinkItem::Event(last) = &events[1] else {
        unreachable!()
    };
    assert_eq!(last.actor().user.as_deref(), Some("bob"));
}

/// sudo 실패 연쇄 뒤 성공이 High 권한 상승 finding이 되는지 확인
#[tokio::test]
async fn sudo_after_failures_is_escalation() {
    let config = PipelineConfigBuilder::new().shard_count(1).build().unwrap();
    let (mut pipeline, mut rx) = build(config);
    pipeline.start().await.unwrap();

    let failure = "Mar 10 10:00:00 web-01 sudo:    alice : 3 incorrect password attempts ; TTY=pts/0 ; PWD=/home/alice ; USER=root ; COMMAND=/bin/bash";
    let success = "Mar 10 10:00:30 web-01 sudo:    alice : TTY=pts/0 ; PWD=/home/alice ; USER=root ; COMMAND=/bin/bash";
    for line in [failure, failure, failure, success] {
        assert!(pipeline.ingest_line("replay", "auth_log", line).await.unwrap());
    }
    pipeline.stop().await.unwrap();

    let (events, findings) = collect(&mut rx);
    assert_eq!(events.len(), 4);
    assert_eq!(findings.len(), 1);
    let SinkItem::Finding(finding) = &findings[0] else {
        unreachable!()
    };
    assert_eq!(finding.detector_id, "privilege_escalation");
    assert_eq!(finding.severity, Severity::High);
    assert_eq!(finding.event_ids.len(), 4);
}

/// JSON 소스와 auth.log 소스가 같은 키로 합쳐지는지 확인
#[tokio::test]
async fn json_and_auth_log_share_tracking_keys() {
    let config = PipelineConfigBuilder::new().shard_count(3).build().unwrap();
    let (mut pipeline, mut rx) = build(config);
    pipeline.start().await.unwrap();

    let json = r#"{"event_time":"2024-03-09T08:15:01Z","category":"authentication","type":"login","outcome":"failure","user":"alice","host":"web-01"}"#;
    for _ in 0..3 {
        pipeline.ingest_line("vpn", "json", json).await.unwrap();
    }
    for _ in 0..2 {
        pipeline.ingest_line("replay", "auth_log", FAILED).await.unwrap();
    }
    pipeline.stop().await.unwrap();

    let (_, findings) = collect(&mut rx);
    assert_eq!(findings.len(), 1);
}

/// 싱크 파일 출력이 JSON lines인지 확인
#[tokio::test]
async fn file_sink_writes_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("events.jsonl");

    let config = PipelineConfigBuilder::new()
        .sink_target(SinkTarget::File(out.clone()))
        .build()
        .unwrap();
    let mut pipeline = SiemPipelineBuilder::new()
        .config(config)
        .factory(fixed_factory())
        .build()
        .unwrap();

    pipeline.start().await.unwrap();
    pipeline.ingest_line("replay", "auth_log", FAILED).await.unwrap();
    pipeline.stop().await.unwrap();

    let content = std::fs::read_to_string(&out).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["kind"], "event");
    assert_eq!(lines[0]["data"]["metadata"]["event_id"], "evt-1");
    assert_eq!(lines[0]["data"]["raw"]["message"], FAILED);
    assert_eq!(lines[0]["data"]["metadata"]["parser_version"], "authlog-v1");
}

/// 버퍼 드롭 정책에서 과부하 시 항목을 드롭하며 멈추지 않는지 확인
#[tokio::test]
async fn overflow_drops_instead_of_blocking() {
    let (sink, _rx) = ChannelSink::new(1);
    let config = PipelineConfigBuilder::new()
        .buffer_capacity(2)
        .overflow_policy(OverflowPolicy::DropNewest)
        .flush_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let mut pipeline = SiemPipelineBuilder::new()
        .config(config)
        .sink(Arc::new(sink))
        .build()
        .unwrap();

    pipeline.start().await.unwrap();
    // 수신측을 읽지 않으므로 싱크가 막힘
    for _ in 0..20 {
        pipeline.ingest_line("replay", "auth_log", FAILED).await.unwrap();
    }
    tokio::time::timeout(Duration::from_secs(5), pipeline.stop())
        .await
        .expect("stop must respect flush deadline")
        .unwrap();

    let snapshot = pipeline.snapshot();
    assert!(snapshot.sink_dropped > 0);
    assert!(snapshot.sink_delivered + snapshot.sink_dropped <= 24);
}

/// 실행 중 헬스 체크
#[tokio::test]
async fn health_reflects_lifecycle() {
    let (mut pipeline, _rx) = build(PipelineConfig::default());
    assert!(pipeline.health_check().await.is_unhealthy());
    pipeline.start().await.unwrap();
    assert_eq!(pipeline.health_check().await, HealthStatus::Healthy);
    pipeline.stop().await.unwrap();
    assert!(pipeline.health_check().await.is_unhealthy());
}

/// 설정 문서에서 파이프라인까지
#[tokio::test]
async fn config_document_to_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("auth.log");
    std::fs::write(&log, format!("{FAILED}\n")).unwrap();

    let yaml = format!(
        "log_sources:\n  auth_log:\n    enabled: true\n    path: {}\npipeline:\n  shard_count: 2\n  start_position: beginning\n",
        log.display()
    );
    let core = SiemConfig::parse_yaml(&yaml).unwrap();

    let report = run_preflight(&core, &PreflightOptions::default()).await;
    assert!(report.passed(), "{:?}", report.diagnostics);
    assert_eq!(report.sources.len(), 1);
    assert_eq!(report.sources[0].preview, vec![FAILED.to_owned()]);

    let config = PipelineConfig::from_core(&core).unwrap();
    assert_eq!(config.shard_count, 2);
    let (mut pipeline, mut rx) = build(config);
    pipeline.start().await.unwrap();
    wait_for_accepted(&pipeline, 1).await;
    pipeline.stop().await.unwrap();

    let (events, _) = collect(&mut rx);
    assert_eq!(events.len(), 1);
}

/// 프리플라이트는 필수 소스 문제를 치명적으로 보고
#[tokio::test]
async fn preflight_fails_on_missing_required_file() {
    let core = SiemConfig::parse_yaml(
        "log_sources:\n  auth_log:\n    enabled: true\n    path: /nonexistent/siemlite/auth.log\n",
    )
    .unwrap();
    let report = run_preflight(&core, &PreflightOptions::default()).await;
    assert!(!report.passed());
    assert!(report.fatal().unwrap().contains("does not exist"));
}

/// 라인 처리기는 원시 라인을 그대로 보존
#[test]
fn line_processor_preserves_raw_line() {
    let registry = Arc::new(ParserRegistry::with_defaults(ActionTable::builtin()).unwrap());
    let processor = LineProcessor::new(registry, fixed_factory(), Arc::new(PipelineStats::new()));

    let record = processor.process_str("auth_log", "auth_log", FAILED).unwrap();
    assert_eq!(record.raw().message, FAILED);
    assert_eq!(record.event_id(), "evt-1");

    let rejected = processor
        .process_str("auth_log", "auth_log", "garbage line")
        .unwrap_err();
    assert_eq!(rejected.raw(), "garbage line");
    assert_eq!(processor.stats().snapshot().parse_failures, 1);
}
