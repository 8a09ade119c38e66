//! 반복 로그인 실패 탐지기
//!
//! (actor.user, source.host) 키마다 슬라이딩 윈도우 안의 실패한 `login`
//! 이벤트를 셉니다. 임계값에 도달하면 finding 하나를 내보내고 카운터를
//! 비운 뒤 cooldown에 들어갑니다.
//!
//! - cooldown 중의 실패는 카운트되지만 finding을 내보내지 않습니다.
//! - cooldown이 끝난 뒤 첫 실패는 직전 finding이 아직 윈도우 안에 있으면
//!   바로 새 finding을 내보냅니다. 기여 이벤트는 직전 finding 이후의
//!   실패(cooldown 중 카운트된 것 포함)입니다.
//! - 직전 finding이 윈도우 밖으로 빠졌으면 키는 clean으로 돌아간 것으로 보고
//!   다시 임계값부터 셉니다.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use siemlite_core::error::DetectorError;
use siemlite_core::{ActionType, DetectionContext, Detector, Finding, Severity, TrackingKey};

use super::arena::KeyArena;
use super::state::KeyState;
use crate::config::RepeatedFailureSettings;

/// 탐지기 ID
pub const DETECTOR_ID: &str = "repeated_failure";

#[derive(Debug, Default)]
struct FailureTrack {
    /// (event_time, event_id), 오래된 순
    failures: VecDeque<(DateTime<Utc>, String)>,
    cooldown_until: Option<DateTime<Utc>>,
    /// 마지막 finding 시각
    last_alert: Option<DateTime<Utc>>,
}

impl FailureTrack {
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        while self.failures.front().is_some_and(|(t, _)| *t < cutoff) {
            self.failures.pop_front();
        }
    }
}

/// 반복 실패 탐지기
#[derive(Debug)]
pub struct RepeatedFailureDetector {
    threshold: usize,
    window: Duration,
    cooldown: Duration,
    tracks: KeyArena<FailureTrack>,
}

impl RepeatedFailureDetector {
    /// 설정으로 탐지기를 생성합니다.
    pub fn new(settings: &RepeatedFailureSettings, max_keys: usize) -> Self {
        Self {
            threshold: settings.threshold.max(1),
            window: Duration::from_std(settings.window).unwrap_or(Duration::MAX),
            cooldown: Duration::from_std(settings.cooldown).unwrap_or(Duration::MAX),
            tracks: KeyArena::new(max_keys),
        }
    }

    /// 키의 현재 상태를 `now` 기준으로 계산합니다.
    pub fn state(&self, key: &TrackingKey, now: DateTime<Utc>) -> KeyState {
        let Some(track) = self.tracks.get(key) else {
            return KeyState::Clean;
        };
        let in_window = match now.checked_sub_signed(self.window) {
            Some(cutoff) => track.failures.iter().filter(|(t, _)| *t >= cutoff).count(),
            None => track.failures.len(),
        };
        KeyState::derive(in_window, track.cooldown_until, now)
    }
}

impl Detector for RepeatedFailureDetector {
    fn id(&self) -> &str {
        DETECTOR_ID
    }

    fn inspect(&mut self, ctx: &DetectionContext<'_>) -> Result<Vec<Finding>, DetectorError> {
        let event = ctx.event;
        if event.kind() != ActionType::Login || !event.is_failure() {
            return Ok(Vec::new());
        }

        let time = event.event_time();
        let track = self
            .tracks
            .get_or_insert_with(ctx.key, time, FailureTrack::default);
        track.failures.push_back((time, event.event_id().to_owned()));
        if let Some(cutoff) = time.checked_sub_signed(self.window) {
            track.prune(cutoff);
        }

        if let Some(until) = track.cooldown_until {
            if time < until {
                tracing::debug!(
                    key = %ctx.key,
                    failures = track.failures.len(),
                    "failure counted during cooldown"
                );
                return Ok(Vec::new());
            }
            track.cooldown_until = None;
        }

        // 직전 finding이 윈도우 안이면 공격이 이어지는 중
        let previous = track
            .last_alert
            .filter(|at| time.signed_duration_since(*at) <= self.window);
        if previous.is_none() {
            track.last_alert = None;
            if track.failures.len() < self.threshold {
                return Ok(Vec::new());
            }
        }

        let event_ids: Vec<String> = track.failures.drain(..).map(|(_, id)| id).collect();
        track.cooldown_until = time.checked_add_signed(self.cooldown);
        track.last_alert = Some(time);

        let reason = match previous {
            Some(at) => format!(
                "{} more failed logins for {} after cooldown (previous finding at {})",
                event_ids.len(),
                ctx.key,
                at.to_rfc3339()
            ),
            None => format!(
                "{} failed logins for {} within {}s",
                event_ids.len(),
                ctx.key,
                self.window.num_seconds()
            ),
        };

        let finding = Finding {
            finding_id: ctx.factory.next_id(),
            detector_id: DETECTOR_ID.to_owned(),
            reason,
            event_ids,
            severity: Severity::High,
            key: ctx.key.clone(),
            detected_at: time,
        };
        Ok(vec![finding])
    }

    fn evict_expired(&mut self, watermark: DateTime<Utc>) {
        let Some(cutoff) = watermark.checked_sub_signed(self.window) else {
            return;
        };
        let removed = self.tracks.retain(|_, track| {
            track.prune(cutoff);
            !track.failures.is_empty()
                || track.cooldown_until.is_some_and(|until| until > watermark)
                || track.last_alert.is_some_and(|at| at >= cutoff)
        });
        if removed > 0 {
            tracing::debug!(removed, detector = DETECTOR_ID, "evicted idle keys");
        }
    }

    fn tracked_keys(&self) -> usize {
        self.tracks.len()
    }
}
