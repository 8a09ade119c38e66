//! 이벤트 레코드 -- 보안 관련 로그 라인의 정규화된 표현
//!
//! 레코드는 세 단계를 거칩니다.
//!
//! ```text
//! EventFactory::skeleton() → EventDraft (파서가 채움) → Validator → EventRecord (불변)
//! ```
//!
//! [`EventDraft`]는 파서가 자유롭게 채우는 가변 구조체이고,
//! [`EventRecord`]는 검증기만 만들 수 있는 읽기 전용 구조체입니다.
//! 두 타입 모두 아홉 개의 섹션(`metadata`, `source`, `actor`, `target`,
//! `action`, `outcome`, `network`, `privilege`, `raw`)으로 직렬화되며,
//! 이 형태가 하위 시스템과의 와이어 계약입니다.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::{ActionCategory, ActionType};
use crate::clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
use crate::types::TrackingKey;

/// 와이어 형식의 최상위 섹션 이름 (검증 순서)
pub const SECTIONS: [&str; 9] = [
    "metadata",
    "source",
    "actor",
    "target",
    "action",
    "outcome",
    "network",
    "privilege",
    "raw",
];

// ─── 공용 섹션 ────────────────────────────────────────────────────────

/// 원시 라인의 출처
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceInfo {
    /// 호스트명
    pub host: Option<String>,
    /// 프로그램명 (sshd, sudo 등)
    pub program: Option<String>,
    /// 프로세스 ID
    pub pid: Option<u32>,
}

/// 행위 주체
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Actor {
    pub user: Option<String>,
    pub uid: Option<u32>,
}

/// 행위 대상
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    pub user: Option<String>,
    pub resource: Option<String>,
}

/// 네트워크 컨텍스트
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Network {
    pub src_ip: Option<IpAddr>,
    pub src_port: Option<u16>,
    pub protocol: Option<String>,
}

/// 권한 상승 정보
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Privilege {
    /// 권한 상승 여부. `None`은 알 수 없음.
    pub escalated: Option<bool>,
    pub target_user: Option<String>,
}

/// 결과 값 -- 정확히 두 가지뿐입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeResult {
    Success,
    Failure,
}

impl OutcomeResult {
    /// 안정적인 문자열 태그를 반환합니다.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    /// 태그 문자열을 해석합니다. 그 외 값은 `None`입니다.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }
}

impl fmt::Display for OutcomeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── 초안 (파서가 채우는 단계) ─────────────────────────────────────────

/// 초안 메타데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftMetadata {
    pub event_id: String,
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    pub ingest_time: DateTime<Utc>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub parser_version: Option<String>,
}

/// 초안 액션
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftAction {
    pub category: Option<ActionCategory>,
    #[serde(rename = "type")]
    pub kind: Option<ActionType>,
}

impl DraftAction {
    /// 타입과 그 카테고리를 함께 설정합니다.
    pub fn set(&mut self, kind: ActionType) {
        self.category = Some(kind.category());
        self.kind = Some(kind);
    }
}

/// 초안 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftOutcome {
    pub result: Option<OutcomeResult>,
    pub reason: Option<String>,
}

/// 초안 원본 메시지
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftRaw {
    pub message: Option<String>,
}

/// 파서가 채우는 가변 이벤트 초안
///
/// [`EventFactory::skeleton`]으로 생성하며, 검증 전까지는 자유롭게
/// 수정할 수 있습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    pub metadata: DraftMetadata,
    pub source: SourceInfo,
    pub actor: Actor,
    pub target: Target,
    pub action: DraftAction,
    pub outcome: DraftOutcome,
    pub network: Network,
    pub privilege: Privilege,
    pub raw: DraftRaw,
}

// ─── 검증된 레코드 (불변) ──────────────────────────────────────────────

/// 검증된 메타데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordMetadata {
    pub event_id: String,
    pub event_time: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
    pub source_type: String,
    pub parser_version: String,
}

/// 검증된 액션
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Action {
    pub category: ActionCategory,
    #[serde(rename = "type")]
    pub kind: ActionType,
}

/// 검증된 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub result: OutcomeResult,
    pub reason: Option<String>,
}

/// 검증된 원본 메시지
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawMessage {
    pub message: String,
}

/// 검증을 통과한 불변 이벤트 레코드
///
/// [`Validator`](crate::validate::Validator)만 생성할 수 있으며,
/// 읽기 전용 접근자만 제공합니다. 탐지기와 싱크는 `Arc<EventRecord>`로
/// 공유합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    metadata: RecordMetadata,
    source: SourceInfo,
    actor: Actor,
    target: Target,
    action: Action,
    outcome: Outcome,
    network: Network,
    privilege: Privilege,
    raw: RawMessage,
}

impl EventRecord {
    /// 검증기 전용 생성자
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        metadata: RecordMetadata,
        source: SourceInfo,
        actor: Actor,
        target: Target,
        action: Action,
        outcome: Outcome,
        network: Network,
        privilege: Privilege,
        raw: RawMessage,
    ) -> Self {
        Self {
            metadata,
            source,
            actor,
            target,
            action,
            outcome,
            network,
            privilege,
            raw,
        }
    }

    pub fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    pub fn source(&self) -> &SourceInfo {
        &self.source
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn privilege(&self) -> &Privilege {
        &self.privilege
    }

    pub fn raw(&self) -> &RawMessage {
        &self.raw
    }

    /// 이벤트 ID
    pub fn event_id(&self) -> &str {
        &self.metadata.event_id
    }

    /// 소스가 기록한 이벤트 시각
    pub fn event_time(&self) -> DateTime<Utc> {
        self.metadata.event_time
    }

    /// 액션 타입
    pub fn kind(&self) -> ActionType {
        self.action.kind
    }

    /// 실패 결과인지 확인합니다.
    pub fn is_failure(&self) -> bool {
        self.outcome.result == OutcomeResult::Failure
    }

    /// 탐지기 상태를 구분하는 (actor.user, source.host) 키
    pub fn tracking_key(&self) -> TrackingKey {
        TrackingKey::new(self.actor.user.as_deref(), self.source.host.as_deref())
    }
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EventRecord[{}] {}/{} {} key={}",
            &self.metadata.event_id[..8.min(self.metadata.event_id.len())],
            self.action.category,
            self.action.kind,
            self.outcome.result,
            self.tracking_key(),
        )
    }
}

// ─── 스켈레톤 생성기 ──────────────────────────────────────────────────

/// 이벤트 스켈레톤 생성기
///
/// 모든 파서가 공유하며, `event_id`와 `ingest_time`을 정확히 한 번,
/// 생성 시점에 할당합니다.
#[derive(Clone)]
pub struct EventFactory {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl EventFactory {
    /// 주입된 시계와 ID 생성기로 생성합니다.
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { clock, ids }
    }

    /// 시스템 시계와 UUID v4 생성기를 사용합니다.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(UuidGenerator))
    }

    /// 현재 시각
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// 시계 참조
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// 새 ID를 발급합니다. (finding ID 등에도 사용)
    pub fn next_id(&self) -> String {
        self.ids.next_id()
    }

    /// 원시 라인에 대한 스켈레톤 초안을 생성합니다.
    ///
    /// `raw.message`에는 라인이 그대로 보존됩니다.
    pub fn skeleton(&self, source_type: &str, raw_line: &str) -> EventDraft {
        EventDraft {
            metadata: DraftMetadata {
                event_id: self.ids.next_id(),
                event_time: None,
                ingest_time: self.clock.now(),
                source_type: Some(source_type.to_owned()),
                parser_version: None,
            },
            source: SourceInfo::default(),
            actor: Actor::default(),
            target: Target::default(),
            action: DraftAction::default(),
            outcome: DraftOutcome::default(),
            network: Network::default(),
            privilege: Privilege::default(),
            raw: DraftRaw {
                message: Some(raw_line.to_owned()),
            },
        }
    }
}

impl fmt::Debug for EventFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFactory").finish_non_exhaustive()
    }
}

impl Default for EventFactory {
    fn default() -> Self {
        Self::system()
    }
}
