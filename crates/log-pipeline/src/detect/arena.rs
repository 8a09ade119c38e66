//! 키별 상태 아레나
//!
//! 추적 키마다 값 하나를 밀집 벡터에 저장하고, 해시 인덱스로 위치를 찾습니다.
//! 제거는 `swap_remove`로 수행하므로 슬롯에 구멍이 생기지 않습니다.
//!
//! 키 수가 상한에 도달하면 가장 오래 갱신되지 않은 키를 먼저 제거합니다.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use siemlite_core::TrackingKey;

struct Slot<V> {
    key: TrackingKey,
    value: V,
    last_seen: DateTime<Utc>,
}

/// 추적 키 → 값 아레나
pub struct KeyArena<V> {
    slots: Vec<Slot<V>>,
    index: HashMap<TrackingKey, usize>,
    max_keys: usize,
    evicted: u64,
}

impl<V> KeyArena<V> {
    /// 최대 키 수를 지정하여 생성합니다. 0은 1로 취급합니다.
    pub fn new(max_keys: usize) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            max_keys: max_keys.max(1),
            evicted: 0,
        }
    }

    /// 키의 값을 가져오거나 없으면 생성합니다.
    ///
    /// `seen`은 키의 최근 활동 시각으로 기록됩니다.
    pub fn get_or_insert_with(
        &mut self,
        key: &TrackingKey,
        seen: DateTime<Utc>,
        init: impl FnOnce() -> V,
    ) -> &mut V {
        let idx = match self.index.get(key) {
            Some(&idx) => idx,
            None => {
                if self.slots.len() >= self.max_keys {
                    self.evict_least_recent();
                }
                self.slots.push(Slot {
                    key: key.clone(),
                    value: init(),
                    last_seen: seen,
                });
                let idx = self.slots.len() - 1;
                self.index.insert(key.clone(), idx);
                idx
            }
        };

        let slot = &mut self.slots[idx];
        if seen > slot.last_seen {
            slot.last_seen = seen;
        }
        &mut slot.value
    }

    /// 키의 값을 조회합니다.
    pub fn get(&self, key: &TrackingKey) -> Option<&V> {
        self.index.get(key).map(|&idx| &self.slots[idx].value)
    }

    /// 키의 값을 가변으로 조회합니다.
    pub fn get_mut(&mut self, key: &TrackingKey) -> Option<&mut V> {
        let idx = *self.index.get(key)?;
        Some(&mut self.slots[idx].value)
    }

    /// 키를 제거하고 값을 반환합니다.
    pub fn remove(&mut self, key: &TrackingKey) -> Option<V> {
        let idx = self.index.remove(key)?;
        Some(self.take(idx))
    }

    /// 조건을 만족하지 않는 키를 제거하고 제거된 수를 반환합니다.
    pub fn retain(&mut self, mut keep: impl FnMut(&TrackingKey, &mut V) -> bool) -> usize {
        let mut removed = 0;
        // 뒤에서부터 순회하면 swap_remove로 당겨지는 슬롯은 이미 검사한 슬롯임
        for idx in (0..self.slots.len()).rev() {
            let slot = &mut self.slots[idx];
            if !keep(&slot.key, &mut slot.value) {
                self.index.remove(&slot.key);
                self.take(idx);
                removed += 1;
            }
        }
        removed
    }

    /// 추적 중인 키 수
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 상한 때문에 제거된 키 수 (누적)
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// 인덱스에서 이미 제거된 슬롯을 벡터에서 빼냅니다.
    fn take(&mut self, idx: usize) -> V {
        let slot = self.slots.swap_remove(idx);
        if let Some(moved) = self.slots.get(idx) {
            self.index.insert(moved.key.clone(), idx);
        }
        slot.value
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .slots
            .iter()
            .min_by_key(|slot| slot.last_seen)
            .map(|slot| slot.key.clone());
        if let Some(key) = oldest {
            tracing::debug!(key = %key, max_keys = self.max_keys, "tracked key cap reached, evicting");
            self.remove(&key);
            self.evicted += 1;
        }
    }
}

impl<V> std::fmt::Debug for KeyArena<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyArena")
            .field("len", &self.slots.len())
            .field("max_keys", &self.max_keys)
            .field("evicted", &self.evicted)
            .finish()
    }
}
