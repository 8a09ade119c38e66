//! 채널 싱크
//!
//! 항목을 tokio mpsc 채널로 넘깁니다. 파이프라인을 라이브러리로 임베딩하거나
//! 테스트에서 출력을 직접 받아볼 때 사용합니다.

use tokio::sync::mpsc;

use siemlite_core::{BoxFuture, EventSink, SinkError, SinkItem};

/// 싱크 이름
pub const SINK_NAME: &str = "channel";

/// mpsc 채널로 항목을 보내는 싱크
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<SinkItem>,
}

impl ChannelSink {
    /// 싱크와 수신단을 생성합니다.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SinkItem>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    fn deliver<'a>(&'a self, item: &'a SinkItem) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            self.tx
                .send(item.clone())
                .await
                .map_err(|_| SinkError::Closed {
                    sink: SINK_NAME.to_owned(),
                })
        })
    }
}
