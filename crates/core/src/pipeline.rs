//! 파이프라인 trait -- 확장 포인트 정의
//!
//! 새 로그 형식은 [`EventParser`], 새 탐지 규칙은 [`Detector`],
//! 새 전달 대상은 [`EventSink`]를 구현하여 추가합니다.
//! [`Pipeline`]은 시작/정지/상태 확인 생명주기를 정의합니다.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{DetectorError, ParseError, SiemError, SinkError};
use crate::event::{EventDraft, EventFactory, EventRecord};
use crate::types::{Finding, SinkItem, TrackingKey};

/// dyn 호환 trait에서 사용하는 boxed future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 구성요소 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    /// 정상 동작
    Healthy,
    /// 동작하지만 성능 저하 또는 부분 장애
    Degraded(String),
    /// 동작 불가
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

/// 파이프라인 생명주기 trait
pub trait Pipeline: Send {
    /// 파이프라인을 시작합니다. 이미 실행 중이면 에러입니다.
    fn start(&mut self) -> impl Future<Output = Result<(), SiemError>> + Send;

    /// 파이프라인을 정지합니다.
    ///
    /// 진행 중인 배치를 마치고, 큐를 비우고, 싱크를 플러시한 뒤 반환합니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), SiemError>> + Send;

    /// 현재 상태를 반환합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

/// 로그 파서 trait
///
/// 원시 라인 하나를 받아 채워진 초안을 반환합니다. 초안은 반드시
/// `factory.skeleton()`으로 시작해야 하며, `parser_version`을 기록해야 합니다.
pub trait EventParser: Send + Sync {
    /// 디스패치 키로 사용되는 source_type
    fn source_type(&self) -> &str;

    /// 초안에 기록되는 파서 버전 (예: `authlog-v1`)
    fn parser_version(&self) -> &str;

    /// 원시 라인을 파싱합니다.
    ///
    /// event_time, action.category, action.type, outcome.result 중 하나라도
    /// 추출할 수 없으면 원시 라인을 담은 [`ParseError`]를 반환합니다.
    fn parse(&self, line: &str, factory: &EventFactory) -> Result<EventDraft, ParseError>;
}

/// 탐지기에 전달되는 입력
#[derive(Debug)]
pub struct DetectionContext<'a> {
    /// 검사 대상 이벤트
    pub event: &'a Arc<EventRecord>,
    /// 이벤트의 추적 키
    pub key: &'a TrackingKey,
    /// 같은 키의 최근 이벤트 (오래된 순, 현재 이벤트 제외)
    pub history: &'a [Arc<EventRecord>],
    /// finding ID 발급용
    pub factory: &'a EventFactory,
}

/// 탐지기 trait
///
/// 샤드 태스크가 소유하므로 `&mut self`로 키별 상태를 갱신할 수 있습니다.
/// 에러나 패닉은 해당 탐지기에서 격리되고 나머지 탐지기는 계속 실행됩니다.
pub trait Detector: Send {
    /// 탐지기 ID (finding의 detector_id)
    fn id(&self) -> &str;

    /// 이벤트 하나를 검사합니다.
    fn inspect(&mut self, ctx: &DetectionContext<'_>) -> Result<Vec<Finding>, DetectorError>;

    /// 윈도우 밖으로 밀려난 키별 상태를 제거합니다.
    fn evict_expired(&mut self, _watermark: chrono::DateTime<chrono::Utc>) {}

    /// 현재 추적 중인 키 수
    fn tracked_keys(&self) -> usize {
        0
    }
}

/// 이벤트/결과 전달 대상
///
/// `deliver`가 `Ok`를 반환해야 항목이 버퍼에서 제거됩니다.
pub trait EventSink: Send + Sync {
    /// 싱크 이름
    fn name(&self) -> &str;

    /// 항목 하나를 전달합니다.
    fn deliver<'a>(&'a self, item: &'a SinkItem) -> BoxFuture<'a, Result<(), SinkError>>;

    /// 내부 버퍼를 비웁니다.
    fn flush(&self) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async { Ok(()) })
    }
}
