//! 싱크 버퍼 -- 전달 대기 항목을 담는 유한 큐
//!
//! [`SinkBuffer`]는 싱크가 수락하기 전까지 항목을 보관합니다. 항목은
//! 싱크가 전달을 확인한 뒤에만 [`pop_if`](SinkBuffer::pop_if)로 제거됩니다.
//!
//! # 오버플로우 정책
//! 버퍼가 가득 찬 경우:
//! - [`OverflowPolicy::DropOldest`]: 가장 오래된 항목을 드롭하고 새 항목을 넣음
//! - [`OverflowPolicy::DropNewest`]: 새 항목을 거부
//! - [`OverflowPolicy::Block`]: 항목을 돌려주어 호출자가 공간을 기다리게 함

use std::collections::VecDeque;

use siemlite_core::SinkItem;

use crate::config::OverflowPolicy;

/// 전달 대기 항목
#[derive(Debug, Clone)]
pub struct Pending {
    /// 버퍼 내 순번 (단조 증가)
    pub seq: u64,
    /// 항목
    pub item: SinkItem,
}

/// `push` 결과
#[derive(Debug)]
pub enum PushOutcome {
    /// 큐에 들어감
    Queued,
    /// 큐에 들어갔고 대신 가장 오래된 항목이 드롭됨
    DroppedOldest(SinkItem),
    /// 새 항목이 거부됨
    Rejected(SinkItem),
    /// 가득 참 (Block 정책). 항목을 돌려줍니다.
    Full(SinkItem),
}

/// 싱크 전달 버퍼
#[derive(Debug)]
pub struct SinkBuffer {
    items: VecDeque<Pending>,
    capacity: usize,
    policy: OverflowPolicy,
    next_seq: u64,
    /// 드롭된 항목 카운터 (통계용)
    dropped_count: u64,
    /// 총 유입 항목 카운터
    total_received: u64,
}

impl SinkBuffer {
    /// 새 버퍼를 생성합니다. 용량 0은 1로 취급합니다.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(10_000)),
            capacity,
            policy,
            next_seq: 0,
            dropped_count: 0,
            total_received: 0,
        }
    }

    /// 항목을 추가합니다.
    pub fn push(&mut self, item: SinkItem) -> PushOutcome {
        if self.items.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    let dropped = self.items.pop_front().map(|p| p.item);
                    self.enqueue(item);
                    self.dropped_count += 1;
                    return match dropped {
                        Some(dropped) => PushOutcome::DroppedOldest(dropped),
                        None => PushOutcome::Queued,
                    };
                }
                OverflowPolicy::DropNewest => {
                    self.total_received += 1;
                    self.dropped_count += 1;
                    return PushOutcome::Rejected(item);
                }
                OverflowPolicy::Block => return PushOutcome::Full(item),
            }
        }

        self.enqueue(item);
        PushOutcome::Queued
    }

    fn enqueue(&mut self, item: SinkItem) {
        self.total_received += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.push_back(Pending { seq, item });
    }

    /// 가장 오래된 항목을 봅니다.
    pub fn front(&self) -> Option<&Pending> {
        self.items.front()
    }

    /// 맨 앞 항목의 순번이 `seq`이면 제거하여 반환합니다.
    ///
    /// 전달 도중 DropOldest로 이미 밀려났다면 `None`을 반환합니다.
    pub fn pop_if(&mut self, seq: u64) -> Option<SinkItem> {
        if self.items.front().is_some_and(|p| p.seq == seq) {
            self.items.pop_front().map(|p| p.item)
        } else {
            None
        }
    }

    /// 남은 항목을 모두 꺼냅니다.
    pub fn drain_all(&mut self) -> Vec<SinkItem> {
        self.items.drain(..).map(|p| p.item).collect()
    }

    /// 현재 항목 수
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 최대 용량
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 지금까지 오버플로우로 드롭된 항목 수
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    /// 총 유입 항목 수
    pub fn total_received(&self) -> u64 {
        self.total_received
    }

    /// 사용률 (0.0~1.0)
    pub fn utilization(&self) -> f64 {
        f64::from(u32::try_from(self.items.len()).unwrap_or(u32::MAX))
            / f64::from(u32::try_from(self.capacity).unwrap_or(u32::MAX))
    }
}
