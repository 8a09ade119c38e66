//! 탐지 모듈 -- 검증된 이벤트에서 의심 패턴을 찾습니다.
//!
//! # 구성
//! - [`DetectorPipeline`]: 순서가 있는 탐지기 목록과 키별 히스토리
//! - [`ShardRouter`]: (actor.user, source.host) 해시로 이벤트를 샤드에 분배
//! - [`run_shard`]: 샤드 하나를 소유하는 tokio 태스크 본체
//! - [`RepeatedFailureDetector`], [`PrivilegeEscalationDetector`]: 내장 탐지기
//!
//! # 아키텍처
//! ```text
//! SourceWorker --hash(key)--> shard[i] (DetectorPipeline) --> SinkEmitter
//! ```
//! 키별 상태는 정확히 하나의 샤드 태스크가 소유하므로 공유 가변 상태가 없습니다.
//! 탐지기의 에러나 패닉은 해당 탐지기에서 격리되고 나머지 탐지기는 계속 실행됩니다.

pub mod arena;
pub mod history;
pub mod privilege;
pub mod repeated_failure;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use arena::KeyArena;
pub use history::EventHistory;
pub use privilege::PrivilegeEscalationDetector;
pub use repeated_failure::RepeatedFailureDetector;
pub use state::KeyState;

use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use siemlite_core::error::DetectorError;
use siemlite_core::metrics as names;
use siemlite_core::{
    DetectionContext, Detector, EventFactory, EventRecord, Finding, SinkItem, TrackingKey,
};

use crate::config::DetectorSettings;
use crate::error::LogPipelineError;
use crate::sink::EmitterHandle;
use crate::stats::PipelineStats;

/// 만료 상태 정리 주기 (처리한 이벤트 수)
const EVICTION_INTERVAL: u64 = 256;

/// 탐지기 파이프라인
///
/// 샤드 태스크 하나가 소유하며, 이벤트를 하나씩 모든 탐지기에 순서대로 전달합니다.
pub struct DetectorPipeline {
    detectors: Vec<Box<dyn Detector>>,
    history: EventHistory,
    factory: EventFactory,
    stats: Arc<PipelineStats>,
    /// 지금까지 본 가장 늦은 event_time
    watermark: Option<DateTime<Utc>>,
    processed: u64,
    /// 마지막으로 게이지에 반영한 키 수
    reported_keys: usize,
}

impl DetectorPipeline {
    /// 빈 탐지기 목록으로 생성합니다.
    pub fn new(history: EventHistory, factory: EventFactory, stats: Arc<PipelineStats>) -> Self {
        Self {
            detectors: Vec::new(),
            history,
            factory,
            stats,
            watermark: None,
            processed: 0,
            reported_keys: 0,
        }
    }

    /// 설정에서 활성화된 내장 탐지기로 생성합니다.
    pub fn from_settings(
        settings: &DetectorSettings,
        factory: EventFactory,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let history = EventHistory::new(
            settings.history_window,
            settings.history_per_key,
            settings.max_tracked_keys,
        );
        let mut pipeline = Self::new(history, factory, stats);
        if let Some(rf) = &settings.repeated_failure {
            pipeline.add_detector(Box::new(RepeatedFailureDetector::new(
                rf,
                settings.max_tracked_keys,
            )));
        }
        if let Some(pe) = &settings.privilege_escalation {
            pipeline.add_detector(Box::new(PrivilegeEscalationDetector::new(pe)));
        }
        pipeline
    }

    /// 탐지기를 목록 끝에 추가합니다.
    pub fn add_detector(&mut self, detector: Box<dyn Detector>) {
        self.detectors.push(detector);
    }

    /// 등록된 탐지기 ID 목록 (실행 순서)
    pub fn detector_ids(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.id()).collect()
    }

    /// 이벤트 하나를 모든 탐지기에 전달하고 생성된 finding을 반환합니다.
    pub fn process(&mut self, event: Arc<EventRecord>) -> Vec<Finding> {
        let key = event.tracking_key();
        let mut findings = Vec::new();

        {
            let ctx = DetectionContext {
                event: &event,
                key: &key,
                history: self.history.recent(&key),
                factory: &self.factory,
            };

            for detector in &mut self.detectors {
                let outcome = catch_unwind(AssertUnwindSafe(|| detector.inspect(&ctx)));
                let err = match outcome {
                    Ok(Ok(found)) => {
                        for finding in &found {
                            counter!(
                                names::FINDINGS_TOTAL,
                                names::LABEL_DETECTOR => finding.detector_id.clone(),
                                names::LABEL_SEVERITY => finding.severity.to_string().to_lowercase()
                            )
                            .increment(1);
                            info!(
                                detector = %finding.detector_id,
                                key = %finding.key,
                                severity = %finding.severity,
                                finding_id = %finding.finding_id,
                                "{}",
                                finding.reason
                            );
                        }
                        findings.extend(found);
                        continue;
                    }
                    Ok(Err(e)) => e,
                    Err(payload) => DetectorError::Panicked {
                        detector: detector.id().to_owned(),
                        reason: panic_message(payload.as_ref()),
                    },
                };

                self.stats.add_detector_errors(1);
                counter!(names::DETECTOR_ERRORS_TOTAL, names::LABEL_DETECTOR => detector.id().to_owned())
                    .increment(1);
                error!(
                    detector = detector.id(),
                    event_id = event.event_id(),
                    error = %err,
                    "detector failed, continuing with remaining detectors"
                );
            }
        }

        self.stats.add_findings(findings.len() as u64);

        let time = event.event_time();
        self.history.push(&key, event);
        if self.watermark.is_none_or(|w| time > w) {
            self.watermark = Some(time);
        }
        self.processed += 1;
        if self.processed % EVICTION_INTERVAL == 0 {
            self.evict_expired();
        }

        findings
    }

    /// 워터마크 기준으로 만료된 히스토리와 탐지기 상태를 정리합니다.
    pub fn evict_expired(&mut self) {
        let Some(watermark) = self.watermark else {
            return;
        };
        let removed = self.history.evict_expired(watermark);
        for detector in &mut self.detectors {
            detector.evict_expired(watermark);
        }
        if removed > 0 {
            debug!(removed, watermark = %watermark, "evicted expired history keys");
        }
        self.report_tracked_keys();
    }

    /// 추적 중인 키 수 (히스토리와 탐지기 중 최대)
    pub fn tracked_keys(&self) -> usize {
        self.detectors
            .iter()
            .map(|d| d.tracked_keys())
            .fold(self.history.len(), usize::max)
    }

    fn report_tracked_keys(&mut self) {
        let now = self.tracked_keys();
        let delta = now as f64 - self.reported_keys as f64;
        if delta != 0.0 {
            gauge!(names::TRACKED_KEYS).increment(delta);
        }
        self.reported_keys = now;
    }
}

impl std::fmt::Debug for DetectorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorPipeline")
            .field("detectors", &self.detector_ids())
            .field("history_keys", &self.history.len())
            .field("processed", &self.processed)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// 키 해시 기반 샤드 라우터
///
/// 같은 키의 이벤트는 항상 같은 샤드로 가므로 소스별 순서가 샤드 안에서 유지됩니다.
#[derive(Debug, Clone)]
pub struct ShardRouter {
    senders: Vec<mpsc::Sender<Arc<EventRecord>>>,
}

impl ShardRouter {
    /// 샤드 송신측 목록으로 생성합니다.
    pub fn new(senders: Vec<mpsc::Sender<Arc<EventRecord>>>) -> Self {
        Self { senders }
    }

    /// 키가 속한 샤드 번호
    pub fn shard_for(key: &TrackingKey, shards: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % shards.max(1) as u64) as usize
    }

    /// 샤드 수
    pub fn shard_count(&self) -> usize {
        self.senders.len()
    }

    /// 이벤트를 해당 샤드로 보냅니다. 샤드 큐가 가득 차면 대기합니다.
    pub async fn route(&self, event: Arc<EventRecord>) -> Result<(), LogPipelineError> {
        if self.senders.is_empty() {
            return Err(LogPipelineError::Channel("no detector shards".to_owned()));
        }
        let shard = Self::shard_for(&event.tracking_key(), self.senders.len());
        self.senders[shard]
            .send(event)
            .await
            .map_err(|_| LogPipelineError::Channel(format!("detector shard {shard} closed")))
    }
}

/// 샤드 태스크 본체
///
/// 모든 송신측이 닫힐 때까지 큐를 비우며, 각 이벤트와 그 finding을 emitter에 넘깁니다.
pub async fn run_shard(
    shard: usize,
    mut rx: mpsc::Receiver<Arc<EventRecord>>,
    mut detectors: DetectorPipeline,
    emitter: EmitterHandle,
) {
    debug!(shard, detectors = ?detectors.detector_ids(), "detector shard started");

    while let Some(event) = rx.recv().await {
        let findings = detectors.process(Arc::clone(&event));
        // 거부된 항목은 이미터가 드롭으로 집계함
        if let Err(e) = emitter.submit(SinkItem::Event(event)).await {
            debug!(shard, error = %e, "emitter rejected event");
        }
        for finding in findings {
            if let Err(e) = emitter.submit(SinkItem::Finding(finding)).await {
                debug!(shard, error = %e, "emitter rejected finding");
            }
        }
    }

    detectors.evict_expired();
    debug!(shard, tracked_keys = detectors.tracked_keys(), "detector shard drained");
}
