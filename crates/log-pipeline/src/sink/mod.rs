//! 싱크 -- 이벤트와 finding의 최종 전달
//!
//! - [`SinkBuffer`]: 오버플로우 정책이 있는 유한 전달 큐
//! - [`SinkEmitter`] / [`EmitterHandle`]: 재시도와 종료 플러시를 담당하는 전달 태스크
//! - [`JsonLinesSink`]: 표준 출력 또는 파일에 JSON lines
//! - [`ChannelSink`]: tokio mpsc 채널

pub mod buffer;
pub mod channel;
pub mod emitter;
pub mod jsonl;

pub use buffer::{PushOutcome, SinkBuffer};
pub use channel::ChannelSink;
pub use emitter::{EmitterHandle, SinkEmitter};
pub use jsonl::JsonLinesSink;
