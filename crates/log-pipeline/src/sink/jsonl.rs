//! JSON lines 싱크
//!
//! 항목 하나를 JSON 한 줄로 표준 출력 또는 파일(append)에 씁니다.
//!
//! ```text
//! {"kind":"event","data":{"metadata":{...},"source":{...},...}}
//! {"kind":"finding","data":{"finding_id":"...","detector_id":"repeated_failure",...}}
//! ```

use std::path::Path;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use siemlite_core::{BoxFuture, EventSink, SinkError, SinkItem};

use crate::config::SinkTarget;

type Writer = BufWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// JSON lines 싱크
pub struct JsonLinesSink {
    name: String,
    writer: Mutex<Writer>,
}

impl std::fmt::Debug for JsonLinesSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl JsonLinesSink {
    /// 표준 출력 싱크를 생성합니다.
    pub fn stdout() -> Self {
        Self::from_writer("stdout", Box::new(tokio::io::stdout()))
    }

    /// 파일 싱크를 엽니다. 파일이 없으면 생성하고 있으면 뒤에 붙입니다.
    pub async fn file(path: &Path) -> Result<Self, SinkError> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| SinkError::Unavailable {
                sink: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::from_writer(
            &path.display().to_string(),
            Box::new(file),
        ))
    }

    /// 설정 대상에 맞는 싱크를 엽니다.
    pub async fn open(target: &SinkTarget) -> Result<Self, SinkError> {
        match target {
            SinkTarget::Stdout => Ok(Self::stdout()),
            SinkTarget::File(path) => Self::file(path).await,
        }
    }

    /// 임의의 writer로 싱크를 생성합니다.
    pub fn from_writer(name: &str, writer: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            name: name.to_owned(),
            writer: Mutex::new(BufWriter::new(writer)),
        }
    }

    fn io_error(&self, e: &std::io::Error) -> SinkError {
        SinkError::Unavailable {
            sink: self.name.clone(),
            reason: e.to_string(),
        }
    }
}

impl EventSink for JsonLinesSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver<'a>(&'a self, item: &'a SinkItem) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            let mut line = serde_json::to_vec(item).map_err(|e| SinkError::Encode {
                sink: self.name.clone(),
                reason: e.to_string(),
            })?;
            line.push(b'\n');

            let mut writer = self.writer.lock().await;
            writer
                .write_all(&line)
                .await
                .map_err(|e| self.io_error(&e))?;
            // 한 줄 단위로 내보내야 다른 프로세스가 tail할 수 있다
            writer.flush().await.map_err(|e| self.io_error(&e))
        })
    }

    fn flush(&self) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async move {
            let mut writer = self.writer.lock().await;
            writer.flush().await.map_err(|e| self.io_error(&e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::testing::event_at;
    use siemlite_core::{Finding, Severity};

    #[tokio::test]
    async fn file_sink_appends_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        std::fs::write(&path, "{\"kind\":\"existing\"}\n").unwrap();

        let sink = JsonLinesSink::open(&SinkTarget::File(path.clone()))
            .await
            .unwrap();
        let event = event_at("alice", 0, true);
        sink.deliver(&SinkItem::Event(event.clone())).await.unwrap();
        sink.deliver(&SinkItem::Finding(Finding {
            finding_id: "f-1".to_owned(),
            detector_id: "repeated_failure".to_owned(),
            event_ids: vec![event.event_id().to_owned()],
            severity: Severity::High,
            reason: "test".to_owned(),
            key: event.tracking_key(),
            detected_at: event.event_time(),
        }))
        .await
        .unwrap();
        sink.flush().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);

        let first: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(first["kind"], "event");
        assert_eq!(first["data"]["metadata"]["event_id"], event.event_id());
        assert_eq!(first["data"]["raw"]["message"], event.raw().message);

        let second: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(second["kind"], "finding");
        assert_eq!(second["data"]["severity"], "high");
    }

    #[tokio::test]
    async fn unopenable_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.jsonl");
        let err = JsonLinesSink::file(&path).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
