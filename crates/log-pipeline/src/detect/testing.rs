//! 탐지기 테스트용 이벤트 생성 헬퍼

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use siemlite_core::event::OutcomeResult;
use siemlite_core::{ActionType, EventFactory, EventRecord, Validator};

/// 테스트 기준 시각 + `secs`초
pub(crate) fn time(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// 지정한 액션의 검증된 이벤트를 생성합니다.
pub(crate) fn event(
    user: &str,
    kind: ActionType,
    secs: i64,
    success: bool,
    escalated: Option<bool>,
) -> Arc<EventRecord> {
    let factory = EventFactory::system();
    let mut draft = factory.skeleton("test", &format!("{kind} {user} at {secs}"));
    draft.metadata.event_time = Some(time(secs));
    draft.metadata.parser_version = Some("test-v1".to_owned());
    draft.source.host = Some("web-01".to_owned());
    draft.actor.user = Some(user.to_owned());
    draft.action.set(kind);
    draft.outcome.result = Some(if success {
        OutcomeResult::Success
    } else {
        OutcomeResult::Failure
    });
    draft.privilege.escalated = escalated;
    Arc::new(Validator::validate(&draft).unwrap())
}

/// 로그인 이벤트 (`failure`가 true이면 실패)
pub(crate) fn event_at(user: &str, secs: i64, failure: bool) -> Arc<EventRecord> {
    event(user, ActionType::Login, secs, !failure, None)
}
