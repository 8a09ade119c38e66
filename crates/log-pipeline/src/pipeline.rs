//! 파이프라인 오케스트레이션 -- 수집/파싱/검증/탐지/전달의 전체 흐름을 관리합니다.
//!
//! [`SiemPipeline`]은 core의 [`Pipeline`] trait을 구현하여
//! CLI에서 start/stop/health_check 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! SourceWorker x N --hash(key)--> shard x M (DetectorPipeline) --> SinkEmitter --> EventSink
//! ```
//!
//! # 종료 순서
//! 1. 취소 토큰 발동: 소스 워커는 이미 읽은 배치를 끝까지 처리한 뒤 종료
//! 2. 라우터(샤드 송신측) 해제: 샤드는 큐를 비우고 종료
//! 3. 이미터 닫기: 플러시 데드라인 안에서 남은 항목 전달
//!
//! 1~2단계가 `flush_timeout` 안에 끝나지 않으면(`block` 정책에서 싱크가 죽어
//! 샤드가 버퍼 공간을 기다리는 경우) 이미터를 먼저 닫습니다. 닫힌 이미터는
//! 새 항목을 `shutdown` 사유로 드롭 처리하므로 샤드와 워커가 풀려납니다.
//!
//! 모든 태스크는 abort하지 않고 await합니다.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use siemlite_core::error::{PipelineError, SiemError};
use siemlite_core::{ActionTable, EventFactory, EventSink, HealthStatus, Pipeline};

use crate::collector::{Backoff, SourceWorker};
use crate::config::PipelineConfig;
use crate::detect::{DetectorPipeline, ShardRouter, run_shard};
use crate::error::LogPipelineError;
use crate::ingest::LineProcessor;
use crate::parser::ParserRegistry;
use crate::sink::{EmitterHandle, JsonLinesSink, SinkEmitter};
use crate::stats::{PipelineStats, StatsSnapshot};

/// 싱크 버퍼 사용률이 이 값을 넘으면 Degraded
const DEGRADED_UTILIZATION: f64 = 0.9;

/// 파이프라인 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 실행 중에만 존재하는 태스크와 채널
struct Runtime {
    cancel: CancellationToken,
    router: Option<ShardRouter>,
    workers: Vec<(String, JoinHandle<Result<(), LogPipelineError>>)>,
    shards: Vec<JoinHandle<()>>,
    emitter: EmitterHandle,
    emitter_task: JoinHandle<()>,
}

/// siemlite 파이프라인
///
/// # 사용 예시
/// ```ignore
/// use siemlite_log_pipeline::{PipelineConfig, SiemPipelineBuilder};
/// use siemlite_core::Pipeline;
///
/// let mut pipeline = SiemPipelineBuilder::new()
///     .config(PipelineConfig::from_core(&core_config)?)
///     .build()?;
///
/// pipeline.start().await?;
/// // ...
/// pipeline.stop().await?;
/// ```
pub struct SiemPipeline {
    config: PipelineConfig,
    state: PipelineState,
    processor: LineProcessor,
    sink: Option<Arc<dyn EventSink>>,
    runtime: Option<Runtime>,
}

impl std::fmt::Debug for SiemPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiemPipeline")
            .field("state", &self.state)
            .field("sources", &self.config.sources.len())
            .field("shards", &self.config.shard_count)
            .field("sink", &self.sink.as_ref().map(|s| s.name().to_owned()))
            .finish_non_exhaustive()
    }
}

impl SiemPipeline {
    /// 현재 상태 이름
    pub fn state_name(&self) -> &'static str {
        match self.state {
            PipelineState::Initialized => "initialized",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        }
    }

    /// 실행 중인지 확인합니다.
    pub fn is_running(&self) -> bool {
        self.state == PipelineState::Running
    }

    /// 파이프라인 설정
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 공유 통계
    pub fn stats(&self) -> &Arc<PipelineStats> {
        self.processor.stats()
    }

    /// 현재 통계 스냅샷
    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats().snapshot()
    }

    /// 싱크 버퍼 사용률. 실행 중이 아니면 0입니다.
    pub fn buffer_utilization(&self) -> f64 {
        self.runtime
            .as_ref()
            .map_or(0.0, |rt| rt.emitter.utilization())
    }

    /// 라인 하나를 소스 워커를 거치지 않고 파이프라인에 넣습니다.
    ///
    /// 파일 재생(replay)처럼 호출자가 직접 라인을 공급할 때 사용합니다.
    /// 파싱 또는 검증에 실패한 라인은 기록 후 `Ok(false)`를 반환합니다.
    pub async fn ingest_line(
        &self,
        source: &str,
        source_type: &str,
        line: &str,
    ) -> Result<bool, LogPipelineError> {
        self.ingest_bytes(source, source_type, line.as_bytes()).await
    }

    /// 종결자가 제거된 바이트 라인을 넣습니다. UTF-8이 아니면 파싱 실패입니다.
    pub async fn ingest_bytes(
        &self,
        source: &str,
        source_type: &str,
        line: &[u8],
    ) -> Result<bool, LogPipelineError> {
        let Some(router) = self.runtime.as_ref().and_then(|rt| rt.router.as_ref()) else {
            return Err(LogPipelineError::Channel(
                "pipeline is not running".to_owned(),
            ));
        };
        self.stats().add_lines_read(1);
        match self.processor.process_bytes(source, source_type, line) {
            Ok(record) => {
                router.route(Arc::new(record)).await?;
                Ok(true)
            }
            // LineProcessor가 이미 기록함
            Err(_) => Ok(false),
        }
    }

    async fn open_sink(&self) -> Result<Arc<dyn EventSink>, SiemError> {
        if let Some(sink) = &self.sink {
            return Ok(Arc::clone(sink));
        }
        let sink = JsonLinesSink::open(&self.config.sink.target).await?;
        Ok(Arc::new(sink))
    }
}

impl Pipeline for SiemPipeline {
    async fn start(&mut self) -> Result<(), SiemError> {
        if self.state == PipelineState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!(
            sources = self.config.sources.len(),
            shards = self.config.shard_count,
            "starting siemlite pipeline"
        );

        // 1. 싱크와 이미터
        let sink = self.open_sink().await?;
        let stats = Arc::clone(self.stats());
        let (emitter, handle) = SinkEmitter::new(sink, &self.config.sink, Arc::clone(&stats));
        let emitter_task = tokio::spawn(emitter.run());

        // 2. 탐지 샤드
        let mut senders = Vec::with_capacity(self.config.shard_count);
        let mut shards = Vec::with_capacity(self.config.shard_count);
        for shard in 0..self.config.shard_count {
            let (tx, rx) = mpsc::channel(self.config.channel_capacity);
            let detectors = DetectorPipeline::from_settings(
                &self.config.detectors,
                self.processor.factory().clone(),
                Arc::clone(&stats),
            );
            senders.push(tx);
            shards.push(tokio::spawn(run_shard(shard, rx, detectors, handle.clone())));
        }
        let router = ShardRouter::new(senders);

        // 3. 소스 워커
        let cancel = CancellationToken::new();
        let mut workers = Vec::with_capacity(self.config.sources.len());
        for spec in &self.config.sources {
            let worker = SourceWorker::new(
                spec.clone(),
                self.config.start_position,
                self.processor.clone(),
                router.clone(),
                self.config.poll_interval,
                Backoff::new(self.config.backoff_base, self.config.backoff_cap),
            );
            workers.push((spec.name.clone(), tokio::spawn(worker.run(cancel.clone()))));
        }

        self.runtime = Some(Runtime {
            cancel,
            router: Some(router),
            workers,
            shards,
            emitter: handle,
            emitter_task,
        });
        self.state = PipelineState::Running;
        info!("siemlite pipeline started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SiemError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }
        let Some(mut runtime) = self.runtime.take() else {
            return Err(PipelineError::NotRunning.into());
        };

        info!("stopping siemlite pipeline");

        // 1~2. 소스 워커와 샤드
        runtime.cancel.cancel();
        let deadline = self.config.sink.flush_timeout;
        let producers = drain_producers(
            std::mem::take(&mut runtime.workers),
            runtime.router.take(),
            std::mem::take(&mut runtime.shards),
        );
        tokio::pin!(producers);
        if tokio::time::timeout(deadline, &mut producers).await.is_err() {
            warn!(
                timeout_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                buffered = runtime.emitter.len(),
                sink_unavailable = runtime.emitter.is_sink_unavailable(),
                "detector shards did not drain in time, closing sink emitter early"
            );
            runtime.emitter.close();
            producers.await;
        }

        // 3. 이미터: 데드라인 안에서 플러시
        runtime.emitter.close();
        if let Err(e) = runtime.emitter_task.await {
            error!(error = %e, "sink emitter task failed");
        }

        self.state = PipelineState::Stopped;
        let snapshot = self.snapshot();
        info!(
            lines_read = snapshot.lines_read,
            events_accepted = snapshot.events_accepted,
            parse_failures = snapshot.parse_failures,
            validation_failures = snapshot.validation_failures,
            findings = snapshot.findings,
            sink_delivered = snapshot.sink_delivered,
            sink_dropped = snapshot.sink_dropped,
            "siemlite pipeline stopped"
        );
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
            PipelineState::Running => {
                let Some(runtime) = &self.runtime else {
                    return HealthStatus::Unhealthy("runtime missing".to_owned());
                };
                if runtime.emitter.is_sink_unavailable() {
                    return HealthStatus::Degraded(format!(
                        "sink '{}' unavailable",
                        runtime.emitter.sink_name()
                    ));
                }
                let utilization = runtime.emitter.utilization();
                if utilization > DEGRADED_UTILIZATION {
                    return HealthStatus::Degraded(format!(
                        "sink buffer utilization high: {:.1}%",
                        utilization * 100.0
                    ));
                }
                let exited: Vec<&str> = runtime
                    .workers
                    .iter()
                    .filter(|(_, task)| task.is_finished())
                    .map(|(source, _)| source.as_str())
                    .collect();
                if !exited.is_empty() {
                    return HealthStatus::Degraded(format!(
                        "source workers exited: {}",
                        exited.join(", ")
                    ));
                }
                HealthStatus::Healthy
            }
        }
    }
}

/// 소스 워커를 기다린 뒤 라우터를 해제하고 샤드가 큐를 비울 때까지 기다립니다.
async fn drain_producers(
    workers: Vec<(String, JoinHandle<Result<(), LogPipelineError>>)>,
    router: Option<ShardRouter>,
    shards: Vec<JoinHandle<()>>,
) {
    for (source, task) in workers {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(source = %source, error = %e, "source worker exited with error"),
            Err(e) => error!(source = %source, error = %e, "source worker task failed"),
        }
    }

    // 마지막 송신측이 사라져야 샤드가 종료된다
    drop(router);
    for (shard, task) in shards.into_iter().enumerate() {
        if let Err(e) = task.await {
            error!(shard, error = %e, "detector shard task failed");
        }
    }
}

/// 파이프라인 빌더
pub struct SiemPipelineBuilder {
    config: PipelineConfig,
    factory: Option<EventFactory>,
    registry: Option<ParserRegistry>,
    actions: ActionTable,
    sink: Option<Arc<dyn EventSink>>,
    stats: Option<Arc<PipelineStats>>,
}

impl SiemPipelineBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            factory: None,
            registry: None,
            actions: ActionTable::builtin(),
            sink: None,
            stats: None,
        }
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// 시계와 ID 생성기를 지정합니다. 기본값은 시스템 시계와 UUID입니다.
    pub fn factory(mut self, factory: EventFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// 파서 레지스트리를 지정합니다. 기본값은 내장 파서입니다.
    pub fn registry(mut self, registry: ParserRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 내장 JSON 파서가 사용할 액션 태그 테이블을 지정합니다.
    pub fn actions(mut self, actions: ActionTable) -> Self {
        self.actions = actions;
        self
    }

    /// 싱크를 지정합니다. 지정하지 않으면 설정의 대상에 JSON lines로 씁니다.
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 통계 카운터를 공유합니다.
    pub fn stats(mut self, stats: Arc<PipelineStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// 파이프라인을 빌드합니다.
    pub fn build(self) -> Result<SiemPipeline, LogPipelineError> {
        self.config.validate()?;

        let registry = match self.registry {
            Some(registry) => registry,
            None => ParserRegistry::with_defaults(self.actions)?,
        };
        for spec in &self.config.sources {
            if !registry.contains(&spec.source_type) {
                return Err(LogPipelineError::Config {
                    field: format!("log_sources.{}.source_type", spec.name),
                    reason: format!(
                        "no parser registered for '{}' (available: {})",
                        spec.source_type,
                        registry.source_types().join(", ")
                    ),
                });
            }
        }

        let processor = LineProcessor::new(
            Arc::new(registry),
            self.factory.unwrap_or_else(EventFactory::system),
            self.stats.unwrap_or_default(),
        );

        Ok(SiemPipeline {
            config: self.config,
            state: PipelineState::Initialized,
            processor,
            sink: self.sink,
            runtime: None,
        })
    }
}

impl Default for SiemPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use siemlite_core::{BoxFuture, SinkError, SinkItem, SourceSpec};

    use crate::config::{OverflowPolicy, PipelineConfigBuilder, StartPosition};
    use crate::sink::ChannelSink;

    const FAILED: &str =
        "Mar  9 08:15:01 web-01 sshd[1]: Failed password for alice from 10.0.0.1 port 22 ssh2";

    /// 항상 Unavailable을 반환하는 싱크
    struct DeadSink;

    impl EventSink for DeadSink {
        fn name(&self) -> &str {
            "dead"
        }

        fn deliver<'a>(&'a self, _item: &'a SinkItem) -> BoxFuture<'a, Result<(), SinkError>> {
            Box::pin(async {
                Err(SinkError::Unavailable {
                    sink: "dead".to_owned(),
                    reason: "connection refused".to_owned(),
                })
            })
        }
    }

    fn channel_pipeline(config: PipelineConfig) -> (SiemPipeline, mpsc::Receiver<SinkItem>) {
        let (sink, rx) = ChannelSink::new(1024);
        let pipeline = SiemPipelineBuilder::new()
            .config(config)
            .sink(Arc::new(sink))
            .build()
            .unwrap();
        (pipeline, rx)
    }

    #[test]
    fn builder_creates_pipeline() {
        let (pipeline, _rx) = channel_pipeline(PipelineConfig::default());
        assert_eq!(pipeline.state_name(), "initialized");
        assert!(!pipeline.is_running());
        assert_eq!(pipeline.buffer_utilization(), 0.0);
        assert_eq!(pipeline.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn builder_with_invalid_config_fails() {
        let config = PipelineConfig {
            shard_count: 0,
            ..Default::default()
        };
        assert!(SiemPipelineBuilder::new().config(config).build().is_err());
    }

    #[test]
    fn builder_rejects_source_without_parser() {
        let config = PipelineConfigBuilder::new()
            .source(SourceSpec {
                name: "nginx".to_owned(),
                path: "/var/log/nginx/access.log".into(),
                source_type: "nginx".to_owned(),
            })
            .build()
            .unwrap();
        let err = SiemPipelineBuilder::new().config(config).build().unwrap_err();
        assert!(err.to_string().contains("nginx"));
    }

    #[tokio::test]
    async fn lifecycle_and_health() {
        let (mut pipeline, _rx) = channel_pipeline(PipelineConfig::default());

        assert!(pipeline.health_check().await.is_unhealthy());
        assert!(pipeline.stop().await.is_err());

        pipeline.start().await.unwrap();
        assert!(pipeline.is_running());
        assert_eq!(pipeline.health_check().await, HealthStatus::Healthy);
        assert!(matches!(
            pipeline.start().await,
            Err(SiemError::Pipeline(PipelineError::AlreadyRunning))
        ));

        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.state_name(), "stopped");
        assert!(pipeline.health_check().await.is_unhealthy());
        assert!(pipeline.stop().await.is_err());
    }

    #[tokio::test]
    async fn ingest_line_requires_running_pipeline() {
        let (pipeline, _rx) = channel_pipeline(PipelineConfig::default());
        assert!(pipeline.ingest_line("replay", "auth_log", FAILED).await.is_err());
    }

    #[tokio::test]
    async fn ingested_lines_reach_sink_before_stop_returns() {
        let config = PipelineConfigBuilder::new()
            .shard_count(2)
            .overflow_policy(OverflowPolicy::Block)
            .build()
            .unwrap();
        let (mut pipeline, mut rx) = channel_pipeline(config);
        pipeline.start().await.unwrap();

        for _ in 0..5 {
            assert!(pipeline.ingest_line("replay", "auth_log", FAILED).await.unwrap());
        }
        assert!(!pipeline.ingest_line("replay", "auth_log", "garbage").await.unwrap());
        pipeline.stop().await.unwrap();

        let mut events = 0;
        let mut findings = Vec::new();
        while let Ok(item) = rx.try_recv() {
            match item {
                SinkItem::Event(_) => events += 1,
                SinkItem::Finding(f) => findings.push(f),
            }
        }
        assert_eq!(events, 5);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].detector_id, "repeated_failure");

        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.lines_read, 6);
        assert_eq!(snapshot.parse_failures, 1);
        assert_eq!(snapshot.events_accepted, 5);
        assert_eq!(snapshot.findings, 1);
        assert_eq!(snapshot.sink_delivered, 6);
    }

    #[tokio::test]
    async fn source_worker_feeds_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, format!("{FAILED}\n{FAILED}\n")).unwrap();

        let config = PipelineConfigBuilder::new()
            .source(SourceSpec {
                name: "auth_log".to_owned(),
                path: path.clone(),
                source_type: "auth_log".to_owned(),
            })
            .start_position(StartPosition::Beginning)
            .poll_interval(Duration::from_millis(10))
            .build()
            .unwrap();
        let (mut pipeline, mut rx) = channel_pipeline(config);
        pipeline.start().await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.kind(), "event");

        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.snapshot().events_accepted, 2);
    }

    #[tokio::test]
    async fn stop_is_bounded_when_blocked_on_dead_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, format!("{FAILED}\n").repeat(200)).unwrap();

        let config = PipelineConfigBuilder::new()
            .source(SourceSpec {
                name: "auth_log".to_owned(),
                path,
                source_type: "auth_log".to_owned(),
            })
            .start_position(StartPosition::Beginning)
            .poll_interval(Duration::from_millis(10))
            .shard_count(1)
            .channel_capacity(1)
            .buffer_capacity(2)
            .overflow_policy(OverflowPolicy::Block)
            .retries(1, Duration::from_millis(5))
            .flush_timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let mut pipeline = SiemPipelineBuilder::new()
            .config(config)
            .sink(Arc::new(DeadSink))
            .build()
            .unwrap();
        pipeline.start().await.unwrap();

        // 버퍼가 가득 차 샤드가 공간을 기다리는 상태
        tokio::time::timeout(Duration::from_secs(5), async {
            while pipeline.buffer_utilization() < 1.0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), pipeline.stop())
            .await
            .expect("stop must finish within the flush deadline")
            .unwrap();

        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.sink_delivered, 0);
        assert!(snapshot.sink_dropped > 0);
        assert_eq!(
            snapshot.sink_dropped,
            snapshot.events_accepted + snapshot.findings
        );
    }
}
