//! 소스 워커 -- 소스당 하나의 tokio 태스크로 읽기, 파싱, 검증을 수행합니다.
//!
//! 워커는 [`FileTailer`]를 반복 poll하며 읽은 라인을 [`LineProcessor`]로
//! 처리하고, 검증된 이벤트를 키 해시에 따라 탐지 샤드로 보냅니다.
//!
//! 읽기 에러는 해당 소스만 지수 백오프로 재시도하며 파이프라인을 멈추지 않습니다.
//! 취소 토큰이 발동하면 이미 읽은 배치를 끝까지 처리한 뒤 종료합니다.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use siemlite_core::SourceSpec;
use siemlite_core::error::SourceAccessError;
use siemlite_core::metrics as names;

use super::{FileTailer, RawLine};
use crate::config::StartPosition;
use crate::detect::ShardRouter;
use crate::error::LogPipelineError;
use crate::ingest::LineProcessor;
use crate::stats::PipelineStats;

/// 한 번의 poll에서 읽는 기본 최대 라인 수
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// 지수 백오프 계산기
///
/// 지연은 `base`에서 시작해 실패마다 두 배가 되며 `cap`을 넘지 않습니다.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    /// 새 백오프 계산기를 생성합니다.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            current: base.min(cap),
        }
    }

    /// 다음 대기 시간을 반환하고 내부 지연을 두 배로 늘립니다.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.cap);
        delay
    }

    /// 성공 후 지연을 초기값으로 되돌립니다.
    pub fn reset(&mut self) {
        self.current = self.base.min(self.cap);
    }
}

/// 소스 워커
pub struct SourceWorker {
    spec: SourceSpec,
    tailer: FileTailer,
    start: StartPosition,
    processor: LineProcessor,
    router: ShardRouter,
    poll_interval: Duration,
    backoff: Backoff,
    batch_size: usize,
}

impl SourceWorker {
    /// 새 소스 워커를 생성합니다.
    pub fn new(
        spec: SourceSpec,
        start: StartPosition,
        processor: LineProcessor,
        router: ShardRouter,
        poll_interval: Duration,
        backoff: Backoff,
    ) -> Self {
        let tailer = FileTailer::new(spec.path.clone());
        Self {
            spec,
            tailer,
            start,
            processor,
            router,
            poll_interval,
            backoff,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// 취소될 때까지 소스를 읽습니다.
    ///
    /// 샤드 채널이 닫히면 에러를 반환하며, 그 외의 읽기 에러는 백오프 후 재시도합니다.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), LogPipelineError> {
        info!(
            source = %self.spec.name,
            path = %self.spec.path.display(),
            source_type = %self.spec.source_type,
            "source worker started"
        );

        // 최초 열기: 실패하면 백오프 후 재시도
        loop {
            match self.tailer.open(self.start).await {
                Ok(()) => {
                    self.backoff.reset();
                    break;
                }
                Err(e) => {
                    if !self.wait_backoff(&cancel, &e).await {
                        self.finish();
                        return Ok(());
                    }
                }
            }
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let rotations_before = self.tailer.rotations();
            match self.tailer.poll(self.batch_size).await {
                Ok(lines) => {
                    self.backoff.reset();
                    self.record_rotations(rotations_before);

                    if lines.is_empty() {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(self.poll_interval) => {}
                        }
                        continue;
                    }
                    self.handle_batch(lines).await?;
                }
                Err(e) => {
                    if !self.wait_backoff(&cancel, &e).await {
                        break;
                    }
                }
            }
        }

        self.finish();
        Ok(())
    }

    /// 읽은 배치를 처리합니다. 취소 여부와 관계없이 배치 전체를 처리합니다.
    async fn handle_batch(&mut self, lines: Vec<bytes::Bytes>) -> Result<(), LogPipelineError> {
        let count = lines.len() as u64;
        self.stats().add_lines_read(count);
        counter!(names::LINES_READ_TOTAL, names::LABEL_SOURCE => self.spec.name.clone())
            .increment(count);
        debug!(source = %self.spec.name, lines = count, "read batch");

        for data in lines {
            let raw = RawLine::new(data, self.spec.name.as_str(), self.spec.source_type.as_str());
            // 실패는 LineProcessor가 기록함
            if let Ok(record) = self.processor.process(&raw) {
                self.router.route(Arc::new(record)).await?;
            }
        }
        Ok(())
    }

    /// 에러를 기록하고 백오프만큼 대기합니다. 대기 중 취소되면 `false`를 반환합니다.
    async fn wait_backoff(&mut self, cancel: &CancellationToken, err: &SourceAccessError) -> bool {
        let delay = self.backoff.next_delay();
        self.stats().add_source_errors(1);
        counter!(names::SOURCE_ERRORS_TOTAL, names::LABEL_SOURCE => self.spec.name.clone())
            .increment(1);
        warn!(
            source = %self.spec.name,
            error = %err,
            retry_in_ms = delay.as_millis() as u64,
            "source read failed, backing off"
        );

        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn record_rotations(&self, before: u64) {
        let rotated = self.tailer.rotations().saturating_sub(before);
        if rotated > 0 {
            self.stats().add_rotations(rotated);
            counter!(names::SOURCE_ROTATIONS_TOTAL, names::LABEL_SOURCE => self.spec.name.clone())
                .increment(rotated);
        }
    }

    fn finish(&mut self) {
        self.tailer.close();
        info!(
            source = %self.spec.name,
            offset = self.tailer.offset(),
            "source worker stopped"
        );
    }

    fn stats(&self) -> &Arc<PipelineStats> {
        self.processor.stats()
    }
}
