//! 키별 최근 이벤트 히스토리
//!
//! 탐지기가 참고하는 이벤트 목록을 키마다 시간 윈도우와 개수 상한으로 제한합니다.
//! 윈도우 계산은 이벤트의 `event_time`을 기준으로 합니다.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use siemlite_core::{EventRecord, TrackingKey};

use super::arena::KeyArena;

/// 키별 이벤트 히스토리
#[derive(Debug)]
pub struct EventHistory {
    events: KeyArena<VecDeque<Arc<EventRecord>>>,
    window: Duration,
    per_key: usize,
}

impl EventHistory {
    /// 새 히스토리를 생성합니다.
    pub fn new(window: std::time::Duration, per_key: usize, max_keys: usize) -> Self {
        Self {
            events: KeyArena::new(max_keys),
            window: Duration::from_std(window).unwrap_or(Duration::MAX),
            per_key: per_key.max(1),
        }
    }

    /// 키의 최근 이벤트를 오래된 순으로 반환합니다.
    pub fn recent(&mut self, key: &TrackingKey) -> &[Arc<EventRecord>] {
        match self.events.get_mut(key) {
            Some(events) => events.make_contiguous(),
            None => &[],
        }
    }

    /// 이벤트를 기록하고 윈도우 밖 이벤트를 정리합니다.
    pub fn push(&mut self, key: &TrackingKey, event: Arc<EventRecord>) {
        let time = event.event_time();
        let cutoff = time.checked_sub_signed(self.window);
        let per_key = self.per_key;

        let events = self.events.get_or_insert_with(key, time, VecDeque::new);
        events.push_back(event);
        while events.len() > per_key {
            events.pop_front();
        }
        if let Some(cutoff) = cutoff {
            while events.front().is_some_and(|e| e.event_time() < cutoff) {
                events.pop_front();
            }
        }
    }

    /// 워터마크 기준으로 윈도우를 벗어난 이벤트와 빈 키를 제거합니다.
    ///
    /// 제거된 키 수를 반환합니다.
    pub fn evict_expired(&mut self, watermark: DateTime<Utc>) -> usize {
        let Some(cutoff) = watermark.checked_sub_signed(self.window) else {
            return 0;
        };
        self.events.retain(|_, events| {
            while events.front().is_some_and(|e| e.event_time() < cutoff) {
                events.pop_front();
            }
            !events.is_empty()
        })
    }

    /// 추적 중인 키 수
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
