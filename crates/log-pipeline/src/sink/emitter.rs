//! 싱크 이미터 -- 버퍼링, 재시도, 종료 시 플러시
//!
//! 탐지 샤드는 [`EmitterHandle::submit`]으로 항목을 넣고, 단일 [`SinkEmitter`]
//! 태스크가 버퍼 맨 앞부터 싱크에 전달합니다. 싱크가 `Ok`를 반환해야
//! 항목이 버퍼에서 제거되므로 전달은 최소 1회(at-least-once)입니다.
//!
//! 재시도 가능한 에러는 지수 백오프로 `max_retries`번까지 재시도합니다.
//! 그래도 실패하면 싱크를 사용 불가로 표시하고 항목은 버퍼에 남겨 둡니다.
//! 이후 들어오는 항목은 오버플로우 정책에 따라 처리됩니다.
//!
//! 종료 시에는 `flush_timeout` 안에서만 남은 항목을 전달하고, 데드라인이
//! 지나면 나머지를 `shutdown` 사유로 드롭 처리합니다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use siemlite_core::metrics as names;
use siemlite_core::{EventSink, SinkError, SinkItem};

use super::buffer::{Pending, PushOutcome, SinkBuffer};
use crate::collector::Backoff;
use crate::config::SinkSettings;
use crate::stats::PipelineStats;

/// 이미터와 핸들이 공유하는 상태
#[derive(Debug)]
struct Shared {
    buffer: Mutex<SinkBuffer>,
    item_ready: Notify,
    space_ready: Notify,
    closed: CancellationToken,
    sink_name: String,
    unavailable: AtomicBool,
    stats: Arc<PipelineStats>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SinkBuffer> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_buffer_size(&self, len: usize) {
        gauge!(names::SINK_BUFFER_SIZE).set(len as f64);
    }

    fn record_drop(&self, item: &SinkItem, reason: &'static str) {
        self.stats.add_sink_dropped(1);
        counter!(
            names::SINK_DROPPED_TOTAL,
            names::LABEL_SINK => self.sink_name.clone(),
            names::LABEL_REASON => reason,
        )
        .increment(1);
        warn!(
            sink = %self.sink_name,
            kind = item.kind(),
            id = item.id(),
            reason,
            "sink item dropped"
        );
    }
}

/// 샤드가 항목을 넣는 핸들
#[derive(Debug, Clone)]
pub struct EmitterHandle {
    shared: Arc<Shared>,
}

impl EmitterHandle {
    /// 항목을 버퍼에 넣습니다.
    ///
    /// `block` 정책에서는 공간이 생길 때까지 기다립니다. 드롭 정책에서 밀려난
    /// 항목은 카운트하고 로그를 남긴 뒤 `Ok`를 반환합니다.
    /// 이미터가 닫혔으면 항목을 `shutdown` 사유로 드롭 처리하고
    /// [`SinkError::Closed`]를 반환합니다. 공간을 기다리던 중 닫혀도 같습니다.
    pub async fn submit(&self, item: SinkItem) -> Result<(), SinkError> {
        let shared = &self.shared;
        let mut item = item;
        loop {
            if shared.closed.is_cancelled() {
                shared.record_drop(&item, "shutdown");
                return Err(SinkError::Closed {
                    sink: shared.sink_name.clone(),
                });
            }

            let space = shared.space_ready.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            let (outcome, len) = {
                let mut buffer = shared.lock();
                let outcome = buffer.push(item);
                (outcome, buffer.len())
            };

            match outcome {
                PushOutcome::Queued => {}
                PushOutcome::DroppedOldest(dropped) => shared.record_drop(&dropped, "overflow"),
                PushOutcome::Rejected(rejected) => {
                    shared.record_drop(&rejected, "overflow");
                    return Ok(());
                }
                PushOutcome::Full(back) => {
                    item = back;
                    tokio::select! {
                        () = &mut space => continue,
                        () = shared.closed.cancelled() => continue,
                    }
                }
            }

            shared.record_buffer_size(len);
            shared.item_ready.notify_one();
            return Ok(());
        }
    }

    /// 이미터를 닫습니다. 이미터는 남은 항목을 플러시한 뒤 종료합니다.
    pub fn close(&self) {
        self.shared.closed.cancel();
    }

    /// 버퍼 사용률 (0.0~1.0)
    pub fn utilization(&self) -> f64 {
        self.shared.lock().utilization()
    }

    /// 버퍼에 남은 항목 수
    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    /// 버퍼가 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.shared.lock().is_empty()
    }

    /// 재시도를 모두 소진해 싱크가 사용 불가 상태인지 확인합니다.
    pub fn is_sink_unavailable(&self) -> bool {
        self.shared.unavailable.load(Ordering::Relaxed)
    }

    /// 싱크 이름
    pub fn sink_name(&self) -> &str {
        &self.shared.sink_name
    }
}

/// 한 항목의 전달 결과
enum Delivery {
    /// 싱크가 수락했거나 재시도 불가로 버림
    Settled,
    /// 재시도를 소진함. 항목은 버퍼에 남아 있음
    Exhausted,
    /// 재시도 중 이미터가 닫힘
    Interrupted,
}

/// 싱크 전달 태스크
pub struct SinkEmitter {
    shared: Arc<Shared>,
    sink: Arc<dyn EventSink>,
    delivery_timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
    flush_timeout: Duration,
}

impl std::fmt::Debug for SinkEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkEmitter")
            .field("sink", &self.sink.name())
            .field("delivery_timeout", &self.delivery_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff", &self.retry_backoff)
            .field("flush_timeout", &self.flush_timeout)
            .finish()
    }
}

impl SinkEmitter {
    /// 이미터와 핸들을 생성합니다. 이미터는 [`run`](Self::run)으로 실행합니다.
    pub fn new(
        sink: Arc<dyn EventSink>,
        settings: &SinkSettings,
        stats: Arc<PipelineStats>,
    ) -> (Self, EmitterHandle) {
        let shared = Arc::new(Shared {
            buffer: Mutex::new(SinkBuffer::new(
                settings.buffer_capacity,
                settings.overflow_policy,
            )),
            item_ready: Notify::new(),
            space_ready: Notify::new(),
            closed: CancellationToken::new(),
            sink_name: sink.name().to_owned(),
            unavailable: AtomicBool::new(false),
            stats,
        });
        let emitter = Self {
            shared: Arc::clone(&shared),
            sink,
            delivery_timeout: settings.delivery_timeout,
            max_retries: settings.max_retries,
            retry_backoff: settings.retry_backoff,
            flush_timeout: settings.flush_timeout,
        };
        (emitter, EmitterHandle { shared })
    }

    /// 핸들이 닫힐 때까지 항목을 전달하고, 닫히면 플러시 후 반환합니다.
    pub async fn run(self) {
        info!(sink = %self.shared.sink_name, "sink emitter started");

        loop {
            if self.shared.closed.is_cancelled() {
                break;
            }
            let item_ready = self.shared.item_ready.notified();
            let Some(pending) = self.front() else {
                tokio::select! {
                    () = item_ready => {}
                    () = self.shared.closed.cancelled() => {}
                }
                continue;
            };

            match self.deliver_with_retry(pending).await {
                Delivery::Settled => {}
                Delivery::Interrupted => break,
                Delivery::Exhausted => {
                    // 같은 항목을 다시 시도하기 전에 백오프 상한만큼 쉰다
                    tokio::select! {
                        () = tokio::time::sleep(self.retry_cap()) => {}
                        () = self.shared.closed.cancelled() => break,
                    }
                }
            }
        }

        self.flush_remaining().await;
        info!(sink = %self.shared.sink_name, "sink emitter stopped");
    }

    fn front(&self) -> Option<Pending> {
        self.shared.lock().front().cloned()
    }

    fn retry_cap(&self) -> Duration {
        self.retry_backoff
            .saturating_mul(1u32 << self.max_retries.min(16))
    }

    async fn deliver_once(&self, item: &SinkItem) -> Result<(), SinkError> {
        match tokio::time::timeout(self.delivery_timeout, self.sink.deliver(item)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout {
                sink: self.shared.sink_name.clone(),
                timeout_ms: u64::try_from(self.delivery_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    async fn deliver_with_retry(&self, pending: Pending) -> Delivery {
        let mut backoff = Backoff::new(self.retry_backoff, self.retry_cap());
        let mut attempt: u32 = 0;

        loop {
            match self.deliver_once(&pending.item).await {
                Ok(()) => {
                    self.settle(pending.seq);
                    self.shared.stats.add_sink_delivered(1);
                    counter!(
                        names::SINK_DELIVERED_TOTAL,
                        names::LABEL_SINK => self.shared.sink_name.clone(),
                    )
                    .increment(1);
                    if self.shared.unavailable.swap(false, Ordering::Relaxed) {
                        info!(sink = %self.shared.sink_name, "sink recovered");
                    }
                    return Delivery::Settled;
                }
                Err(e) if !e.is_retryable() => {
                    error!(
                        sink = %self.shared.sink_name,
                        id = pending.item.id(),
                        error = %e,
                        "sink rejected item"
                    );
                    if let Some(item) = self.settle(pending.seq) {
                        self.shared.record_drop(&item, "rejected");
                    }
                    return Delivery::Settled;
                }
                Err(e) if attempt >= self.max_retries => {
                    if !self.shared.unavailable.swap(true, Ordering::Relaxed) {
                        error!(
                            sink = %self.shared.sink_name,
                            attempts = attempt + 1,
                            error = %e,
                            "sink unavailable, buffering items"
                        );
                    }
                    return Delivery::Exhausted;
                }
                Err(e) => {
                    attempt += 1;
                    self.shared.stats.add_sink_retries(1);
                    counter!(
                        names::SINK_RETRIES_TOTAL,
                        names::LABEL_SINK => self.shared.sink_name.clone(),
                    )
                    .increment(1);
                    let delay = backoff.next_delay();
                    debug!(
                        sink = %self.shared.sink_name,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "retrying sink delivery"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = self.shared.closed.cancelled() => return Delivery::Interrupted,
                    }
                }
            }
        }
    }

    /// 전달이 끝난 항목을 버퍼에서 제거하고 생산자를 깨웁니다.
    fn settle(&self, seq: u64) -> Option<SinkItem> {
        let (item, len) = {
            let mut buffer = self.shared.lock();
            let item = buffer.pop_if(seq);
            (item, buffer.len())
        };
        self.shared.record_buffer_size(len);
        self.shared.space_ready.notify_one();
        item
    }

    /// 플러시 데드라인 안에서 남은 항목을 전달합니다.
    async fn flush_remaining(&self) {
        let deadline = Instant::now() + self.flush_timeout;
        let drained = tokio::time::timeout_at(deadline, async {
            while let Some(pending) = self.front() {
                match self.deliver_once(&pending.item).await {
                    Ok(()) => {
                        self.settle(pending.seq);
                        self.shared.stats.add_sink_delivered(1);
                        counter!(
                            names::SINK_DELIVERED_TOTAL,
                            names::LABEL_SINK => self.shared.sink_name.clone(),
                        )
                        .increment(1);
                    }
                    Err(e) if e.is_retryable() => tokio::time::sleep(self.retry_backoff).await,
                    Err(e) => {
                        warn!(sink = %self.shared.sink_name, error = %e, "sink rejected item during flush");
                        if let Some(item) = self.settle(pending.seq) {
                            self.shared.record_drop(&item, "rejected");
                        }
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            let leftover = self.shared.lock().drain_all();
            if !leftover.is_empty() {
                error!(
                    sink = %self.shared.sink_name,
                    count = leftover.len(),
                    flush_timeout_ms = u64::try_from(self.flush_timeout.as_millis()).unwrap_or(u64::MAX),
                    "flush deadline exceeded, dropping remaining items"
                );
            }
            for item in &leftover {
                self.shared.record_drop(item, "shutdown");
            }
            self.shared.record_buffer_size(0);
        }
        // 닫힌 뒤 기다리던 생산자가 있으면 깨운다
        self.shared.space_ready.notify_waiters();

        match tokio::time::timeout(self.delivery_timeout, self.sink.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(sink = %self.shared.sink_name, error = %e, "sink flush failed"),
            Err(_) => warn!(sink = %self.shared.sink_name, "sink flush timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use siemlite_core::BoxFuture;
    use tokio::sync::Semaphore;

    use crate::config::OverflowPolicy;
    use crate::detect::testing::event_at;
    use crate::sink::ChannelSink;

    fn settings(capacity: usize, policy: OverflowPolicy) -> SinkSettings {
        SinkSettings {
            buffer_capacity: capacity,
            overflow_policy: policy,
            delivery_timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_backoff: Duration::from_millis(5),
            flush_timeout: Duration::from_millis(200),
            ..SinkSettings::default()
        }
    }

    fn item(secs: i64) -> SinkItem {
        SinkItem::Event(event_at("alice", secs, true))
    }

    /// 처음 `failures`번은 Unavailable을 반환하는 싱크
    struct FlakySink {
        failures: usize,
        calls: AtomicUsize,
        delivered: Mutex<Vec<String>>,
    }

    impl FlakySink {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    impl EventSink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        fn deliver<'a>(&'a self, item: &'a SinkItem) -> BoxFuture<'a, Result<(), SinkError>> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call < self.failures {
                    return Err(SinkError::Unavailable {
                        sink: "flaky".to_owned(),
                        reason: "connection refused".to_owned(),
                    });
                }
                self.delivered.lock().unwrap().push(item.id().to_owned());
                Ok(())
            })
        }
    }

    /// 세마포어 허가가 있을 때만 수락하는 싱크
    struct GatedSink {
        gate: Semaphore,
    }

    impl EventSink for GatedSink {
        fn name(&self) -> &str {
            "gated"
        }

        fn deliver<'a>(&'a self, _item: &'a SinkItem) -> BoxFuture<'a, Result<(), SinkError>> {
            Box::pin(async move {
                self.gate.acquire().await.unwrap().forget();
                Ok(())
            })
        }
    }

    struct RejectingSink;

    impl EventSink for RejectingSink {
        fn name(&self) -> &str {
            "rejecting"
        }

        fn deliver<'a>(&'a self, _item: &'a SinkItem) -> BoxFuture<'a, Result<(), SinkError>> {
            Box::pin(async {
                Err(SinkError::Encode {
                    sink: "rejecting".to_owned(),
                    reason: "unsupported".to_owned(),
                })
            })
        }
    }

    #[tokio::test]
    async fn delivers_in_submission_order() {
        let (sink, mut rx) = ChannelSink::new(16);
        let stats = Arc::new(PipelineStats::new());
        let (emitter, handle) = SinkEmitter::new(
            Arc::new(sink),
            &settings(16, OverflowPolicy::DropOldest),
            Arc::clone(&stats),
        );
        let task = tokio::spawn(emitter.run());

        let items: Vec<SinkItem> = (0..5).map(item).collect();
        for i in &items {
            handle.submit(i.clone()).await.unwrap();
        }
        for expected in &items {
            let got = rx.recv().await.unwrap();
            assert_eq!(got.id(), expected.id());
        }

        handle.close();
        task.await.unwrap();
        assert_eq!(stats.snapshot().sink_delivered, 5);
        assert!(handle.is_empty());
    }

    #[tokio::test]
    async fn retries_until_sink_accepts() {
        let sink = Arc::new(FlakySink::new(2));
        let stats = Arc::new(PipelineStats::new());
        let (emitter, handle) = SinkEmitter::new(
            Arc::clone(&sink) as Arc<dyn EventSink>,
            &settings(16, OverflowPolicy::DropOldest),
            Arc::clone(&stats),
        );
        let task = tokio::spawn(emitter.run());

        let event = item(0);
        handle.submit(event.clone()).await.unwrap();
        while stats.snapshot().sink_delivered == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.close();
        task.await.unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sink_retries, 2);
        assert_eq!(snapshot.sink_dropped, 0);
        assert_eq!(*sink.delivered.lock().unwrap(), vec![event.id().to_owned()]);
    }

    #[tokio::test]
    async fn unavailable_sink_keeps_items_and_drops_on_shutdown() {
        let sink = Arc::new(FlakySink::new(usize::MAX));
        let stats = Arc::new(PipelineStats::new());
        let (emitter, handle) = SinkEmitter::new(
            Arc::clone(&sink) as Arc<dyn EventSink>,
            &settings(16, OverflowPolicy::DropOldest),
            Arc::clone(&stats),
        );
        let task = tokio::spawn(emitter.run());

        for secs in 0..3 {
            handle.submit(item(secs)).await.unwrap();
        }
        while !handle.is_sink_unavailable() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handle.len(), 3);

        handle.close();
        // 플러시 데드라인 안에 반드시 끝나야 한다
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sink_delivered, 0);
        assert_eq!(snapshot.sink_dropped, 3);
        assert!(handle.is_empty());
    }

    #[tokio::test]
    async fn block_policy_waits_for_space() {
        let sink = Arc::new(GatedSink {
            gate: Semaphore::new(0),
        });
        let stats = Arc::new(PipelineStats::new());
        let (emitter, handle) = SinkEmitter::new(
            Arc::clone(&sink) as Arc<dyn EventSink>,
            &settings(1, OverflowPolicy::Block),
            Arc::clone(&stats),
        );
        let task = tokio::spawn(emitter.run());

        handle.submit(item(0)).await.unwrap();
        let blocked = handle.clone();
        let mut second = tokio::spawn(async move { blocked.submit(item(1)).await });

        // 첫 항목이 전달되지 않는 동안 두 번째 submit은 끝나지 않는다
        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut second)
                .await
                .is_err()
        );

        sink.gate.add_permits(2);
        second.await.unwrap().unwrap();
        while stats.snapshot().sink_delivered < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.close();
        task.await.unwrap();
        assert_eq!(stats.snapshot().sink_dropped, 0);
    }

    #[tokio::test]
    async fn drop_newest_counts_overflow() {
        let sink = Arc::new(GatedSink {
            gate: Semaphore::new(0),
        });
        let stats = Arc::new(PipelineStats::new());
        let (emitter, handle) = SinkEmitter::new(
            Arc::clone(&sink) as Arc<dyn EventSink>,
            &settings(1, OverflowPolicy::DropNewest),
            Arc::clone(&stats),
        );
        let task = tokio::spawn(emitter.run());

        handle.submit(item(0)).await.unwrap();
        handle.submit(item(1)).await.unwrap();
        assert_eq!(stats.snapshot().sink_dropped, 1);
        assert_eq!(handle.len(), 1);
        assert!((handle.utilization() - 1.0).abs() < f64::EPSILON);

        sink.gate.add_permits(1);
        handle.close();
        task.await.unwrap();
        assert_eq!(stats.snapshot().sink_delivered, 1);
    }

    #[tokio::test]
    async fn non_retryable_errors_discard_item() {
        let stats = Arc::new(PipelineStats::new());
        let (emitter, handle) = SinkEmitter::new(
            Arc::new(RejectingSink),
            &settings(4, OverflowPolicy::DropOldest),
            Arc::clone(&stats),
        );
        let task = tokio::spawn(emitter.run());

        handle.submit(item(0)).await.unwrap();
        while stats.snapshot().sink_dropped == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.close();
        task.await.unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sink_retries, 0);
        assert_eq!(snapshot.sink_dropped, 1);
        assert!(!handle.is_sink_unavailable());
    }

    #[tokio::test]
    async fn close_releases_blocked_submitter_and_counts_drop() {
        let sink = Arc::new(FlakySink::new(usize::MAX));
        let stats = Arc::new(PipelineStats::new());
        let (emitter, handle) = SinkEmitter::new(
            Arc::clone(&sink) as Arc<dyn EventSink>,
            &settings(1, OverflowPolicy::Block),
            Arc::clone(&stats),
        );
        let task = tokio::spawn(emitter.run());

        handle.submit(item(0)).await.unwrap();
        let blocked = handle.clone();
        let mut second = tokio::spawn(async move { blocked.submit(item(1)).await });
        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut second)
                .await
                .is_err()
        );

        handle.close();
        let err = tokio::time::timeout(Duration::from_secs(2), second)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, SinkError::Closed { .. }));

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sink_delivered, 0);
        // 대기하던 항목 1 + 플러시 데드라인에 남은 항목 1
        assert_eq!(snapshot.sink_dropped, 2);
    }

    #[tokio::test]
    async fn submit_after_close_fails() {
        let (sink, _rx) = ChannelSink::new(1);
        let (emitter, handle) = SinkEmitter::new(
            Arc::new(sink),
            &settings(4, OverflowPolicy::DropOldest),
            Arc::new(PipelineStats::new()),
        );
        handle.close();
        emitter.run().await;

        let err = handle.submit(item(0)).await.unwrap_err();
        assert!(matches!(err, SinkError::Closed { .. }));
    }
}
