//! 권한 상승 탐지기
//!
//! `sudo`, `su`, `user_add` 이벤트 중 다음을 표시합니다.
//! - 같은 키의 연속 실패 N건 직후에 이어진 성공 (High)
//! - `privilege.escalated`가 true인 이벤트 (Medium)
//!
//! 한 이벤트에서는 finding을 최대 하나만 만들며, 실패 연쇄가 우선합니다.
//! 키별 상태는 두지 않고 파이프라인의 히스토리만 참고합니다.

use siemlite_core::error::DetectorError;
use siemlite_core::{ActionType, DetectionContext, Detector, Finding, Severity};

use crate::config::PrivilegeEscalationSettings;

/// 탐지기 ID
pub const DETECTOR_ID: &str = "privilege_escalation";

/// 권한 상승 탐지기
#[derive(Debug, Clone)]
pub struct PrivilegeEscalationDetector {
    failure_chain: usize,
}

impl PrivilegeEscalationDetector {
    /// 설정으로 탐지기를 생성합니다.
    pub fn new(settings: &PrivilegeEscalationSettings) -> Self {
        Self {
            failure_chain: settings.failure_chain.max(1),
        }
    }
}

impl Detector for PrivilegeEscalationDetector {
    fn id(&self) -> &str {
        DETECTOR_ID
    }

    fn inspect(&mut self, ctx: &DetectionContext<'_>) -> Result<Vec<Finding>, DetectorError> {
        let event = ctx.event;
        let kind = event.kind();
        if !matches!(kind, ActionType::Sudo | ActionType::Su | ActionType::UserAdd) {
            return Ok(Vec::new());
        }

        let finding = |severity: Severity, event_ids: Vec<String>, reason: String| Finding {
            finding_id: ctx.factory.next_id(),
            detector_id: DETECTOR_ID.to_owned(),
            event_ids,
            severity,
            reason,
            key: ctx.key.clone(),
            detected_at: event.event_time(),
        };

        if !event.is_failure() {
            // 직전까지 이어진 실패 연쇄
            let chain = ctx
                .history
                .iter()
                .rev()
                .take_while(|e| e.is_failure())
                .count();
            if chain >= self.failure_chain {
                let start = ctx.history.len() - chain;
                let mut event_ids: Vec<String> = ctx.history[start..]
                    .iter()
                    .map(|e| e.event_id().to_owned())
                    .collect();
                event_ids.push(event.event_id().to_owned());
                return Ok(vec![finding(
                    Severity::High,
                    event_ids,
                    format!("successful {kind} by {} after {chain} consecutive failures", ctx.key),
                )]);
            }
        }

        if event.privilege().escalated == Some(true) {
            let target = event
                .privilege()
                .target_user
                .as_deref()
                .unwrap_or(siemlite_core::types::UNKNOWN_KEY_PART);
            return Ok(vec![finding(
                Severity::Medium,
                vec![event.event_id().to_owned()],
                format!("{kind} by {} escalated privileges to {target}", ctx.key),
            )]);
        }

        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use siemlite_core::{EventFactory, EventRecord};

    use crate::detect::testing::{event, event_at};

    fn detector(chain: usize) -> PrivilegeEscalationDetector {
        PrivilegeEscalationDetector::new(&PrivilegeEscalationSettings {
            failure_chain: chain,
        })
    }

    fn inspect(
        detector: &mut PrivilegeEscalationDetector,
        event: &Arc<EventRecord>,
        history: &[Arc<EventRecord>],
    ) -> Vec<Finding> {
        let factory = EventFactory::system();
        let key = event.tracking_key();
        let ctx = DetectionContext {
            event,
            key: &key,
            history,
            factory: &factory,
        };
        detector.inspect(&ctx).unwrap()
    }

    #[test]
    fn escalated_sudo_is_medium() {
        let mut detector = detector(3);
        let sudo = event("alice", ActionType::Sudo, 0, true, Some(true));
        let findings = inspect(&mut detector, &sudo, &[]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Medium);
        assert_eq!(findings[0].event_ids, vec![sudo.event_id().to_owned()]);
    }

    #[test]
    fn success_after_failure_chain_is_high() {
        let mut detector = detector(3);
        let history = vec![
            event_at("alice", 0, false),
            event("alice", ActionType::Sudo, 10, false, Some(false)),
            event("alice", ActionType::Sudo, 20, false, Some(false)),
            event("alice", ActionType::Sudo, 30, false, Some(false)),
        ];
        let su = event("alice", ActionType::Su, 40, true, Some(false));
        let findings = inspect(&mut detector, &su, &history);

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
        // 연쇄 3건 + 현재 이벤트
        assert_eq!(findings[0].event_ids.len(), 4);
        assert_eq!(findings[0].event_ids[0], history[1].event_id());
        assert_eq!(findings[0].event_ids[3], su.event_id());
    }

    #[test]
    fn short_chain_does_not_trigger() {
        let mut detector = detector(3);
        let history = vec![
            event("alice", ActionType::Sudo, 10, false, Some(false)),
            event_at("alice", 15, false),
            event("alice", ActionType::Sudo, 20, false, Some(false)),
            event("alice", ActionType::Sudo, 30, false, Some(false)),
        ];
        let sudo = event("alice", ActionType::Sudo, 40, true, Some(false));
        assert!(inspect(&mut detector, &sudo, &history).is_empty());
    }

    #[test]
    fn other_actions_and_failures_are_ignored() {
        let mut detector = detector(1);
        let history = vec![event_at("alice", 0, true)];
        let login = event_at("alice", 10, false);
        assert!(inspect(&mut detector, &login, &history).is_empty());

        let failed_sudo = event("alice", ActionType::Sudo, 20, false, Some(false));
        assert!(inspect(&mut detector, &failed_sudo, &history).is_empty());
    }

    #[test]
    fn root_user_add_is_flagged() {
        let mut detector = detector(3);
        let add = event("-", ActionType::UserAdd, 0, true, Some(true));
        let findings = inspect(&mut detector, &add, &[]);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].reason.contains("user_add"));
    }
}
