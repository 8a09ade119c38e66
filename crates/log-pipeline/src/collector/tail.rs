//! 파일 tail -- 오프셋을 추적하며 새 라인을 읽습니다.
//!
//! `tail -F`와 유사한 동작을 비동기 방식으로 구현합니다.
//!
//! # 로테이션 감지
//! - inode 변경 감지 (logrotate 등, Unix 전용)
//! - 파일 크기가 읽기 오프셋 또는 마지막으로 본 크기보다 작아짐 (truncation)
//! - 파일 앞부분([`HEAD_LEN`] 바이트)이 달라짐 (copytruncate 후 재성장)
//!
//! inode가 바뀐 경우 이전 핸들을 EOF까지 읽어 남은 라인을 먼저 전달한 뒤
//! 새 파일을 오프셋 0부터 엽니다. 경로가 잠시 사라진 동안에도 이전 핸들은
//! 계속 읽습니다. 절단된 경우 이전 내용은 사라졌으므로 바로 다시 엽니다.
//! 개행이 아직 없는 마지막 라인은 완성될 때까지 보류합니다.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, info};

use siemlite_core::error::SourceAccessError;

use super::preflight::strip_terminator;
use crate::config::StartPosition;

/// 파일 재작성 감지에 쓰는 앞부분 지문 길이
pub const HEAD_LEN: usize = 128;

/// 파일 tailer
///
/// [`poll`](Self::poll)을 반복 호출하여 사용합니다. 호출 사이에 상태(오프셋,
/// inode, 보류 중인 부분 라인)를 유지하므로 재시작 가능한 지연 시퀀스로
/// 동작합니다.
#[derive(Debug)]
pub struct FileTailer {
    /// 파일 경로
    path: PathBuf,
    /// 열린 파일
    reader: Option<BufReader<File>>,
    /// 지금까지 소비한 바이트 오프셋 (보류 중인 부분 라인 포함)
    offset: u64,
    /// 현재 파일의 inode (Unix 전용)
    inode: Option<u64>,
    /// 마지막 poll에서 본 파일 크기
    seen_size: u64,
    /// 파일 앞부분 지문 (최대 `HEAD_LEN` 바이트)
    head: Vec<u8>,
    /// 개행을 기다리는 부분 라인
    pending: Vec<u8>,
    /// 감지된 회전/절단 횟수
    rotations: u64,
}

impl FileTailer {
    /// 새 tailer를 생성합니다. 파일은 첫 `open` 또는 `poll`에서 열립니다.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reader: None,
            offset: 0,
            inode: None,
            seen_size: 0,
            head: Vec::new(),
            pending: Vec::new(),
            rotations: 0,
        }
    }

    /// 파일을 열고 시작 위치로 이동합니다.
    pub async fn open(&mut self, start: StartPosition) -> Result<(), SourceAccessError> {
        let file = File::open(&self.path)
            .await
            .map_err(|e| self.access_error(e))?;
        let metadata = file.metadata().await.map_err(|e| self.read_error(e))?;

        let offset = match start {
            StartPosition::Beginning => 0,
            StartPosition::End => metadata.len(),
        };
        let mut reader = BufReader::new(file);
        let head = match read_head(&mut reader, offset).await {
            Ok(head) => head,
            Err(e) => return Err(self.read_error(e)),
        };

        self.reader = Some(reader);
        self.offset = offset;
        self.inode = inode_of(&metadata);
        self.seen_size = metadata.len();
        self.head = head;
        self.pending.clear();
        debug!(path = %self.path.display(), offset, "opened log file");
        Ok(())
    }

    /// 새로 완성된 라인을 최대 `max_lines`개 읽습니다.
    ///
    /// 읽을 것이 없으면 빈 벡터를 반환하며, 이는 에러가 아닙니다.
    pub async fn poll(&mut self, max_lines: usize) -> Result<Vec<Bytes>, SourceAccessError> {
        if self.reader.is_none() {
            self.open(StartPosition::Beginning).await?;
        }

        let mut lines = Vec::new();
        match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => {
                let inode = inode_of(&metadata);
                let replaced = inode.is_some() && self.inode.is_some() && inode != self.inode;
                if replaced {
                    // 이전 핸들에 남은 라인을 먼저 전달
                    self.read_lines(&mut lines, max_lines).await?;
                    if lines.len() >= max_lines {
                        return Ok(lines);
                    }
                    if !self.pending.is_empty() {
                        // 이동된 파일의 마지막 라인은 더 이상 완성되지 않음
                        lines.push(Bytes::copy_from_slice(strip_terminator(&self.pending)));
                        self.pending.clear();
                    }
                    self.reopen("replaced").await?;
                } else if self.rewritten(metadata.len()).await? {
                    self.reopen("truncated").await?;
                } else {
                    self.seen_size = metadata.len();
                }
            }
            // logrotate가 이동한 뒤 새 파일을 만들기 전
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "log file temporarily missing");
                self.read_lines(&mut lines, max_lines).await?;
                return Ok(lines);
            }
            Err(e) => return Err(self.access_error(e)),
        }

        self.read_lines(&mut lines, max_lines).await?;
        Ok(lines)
    }

    async fn reopen(&mut self, cause: &'static str) -> Result<(), SourceAccessError> {
        info!(
            path = %self.path.display(),
            cause,
            offset = self.offset,
            "log rotation detected, reopening from start"
        );
        self.rotations += 1;
        self.open(StartPosition::Beginning).await
    }

    /// 현재 핸들이 가리키던 내용이 제자리에서 다시 쓰였는지 판단합니다.
    async fn rewritten(&mut self, len: u64) -> Result<bool, SourceAccessError> {
        if len < self.offset || len < self.seen_size {
            return Ok(true);
        }
        if len == self.seen_size || self.offset == 0 {
            return Ok(false);
        }

        let offset = self.offset;
        let Some(reader) = self.reader.as_mut() else {
            return Ok(false);
        };
        let head = match read_head(reader, offset).await {
            Ok(head) => head,
            Err(e) => return Err(self.read_error(e)),
        };
        let common = head.len().min(self.head.len());
        if head[..common] != self.head[..common] {
            return Ok(true);
        }
        if head.len() > self.head.len() {
            self.head = head;
        }
        Ok(false)
    }

    /// 현재 핸들에서 완성된 라인을 `lines`가 `max_lines`개가 될 때까지 읽습니다.
    async fn read_lines(
        &mut self,
        lines: &mut Vec<Bytes>,
        max_lines: usize,
    ) -> Result<(), SourceAccessError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(());
        };

        while lines.len() < max_lines {
            let n = match reader.read_until(b'\n', &mut self.pending).await {
                Ok(n) => n,
                Err(e) => {
                    return Err(SourceAccessError::ReadFailed {
                        path: self.path.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            };
            if n == 0 {
                break;
            }
            self.offset += n as u64;

            if self.pending.last() != Some(&b'\n') {
                // 부분 라인: 다음 poll에서 이어 읽음
                break;
            }
            lines.push(Bytes::copy_from_slice(strip_terminator(&self.pending)));
            self.pending.clear();
        }
        Ok(())
    }

    /// 파일 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 현재 오프셋
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 보류 중인 부분 라인의 바이트 수
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// 감지된 회전/절단 횟수
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    /// 파일을 닫습니다. 다음 `poll`에서 처음부터 다시 엽니다.
    pub fn close(&mut self) {
        self.reader = None;
    }

    fn access_error(&self, e: std::io::Error) -> SourceAccessError {
        let path = self.path.display().to_string();
        if e.kind() == std::io::ErrorKind::NotFound {
            SourceAccessError::NotFound { path }
        } else {
            SourceAccessError::Unreadable {
                path,
                reason: e.to_string(),
            }
        }
    }

    fn read_error(&self, e: std::io::Error) -> SourceAccessError {
        SourceAccessError::ReadFailed {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

/// 파일 앞부분을 읽고 `resume` 위치로 돌아갑니다.
async fn read_head(reader: &mut BufReader<File>, resume: u64) -> std::io::Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(0)).await?;
    let mut head = Vec::with_capacity(HEAD_LEN);
    (&mut *reader)
        .take(HEAD_LEN as u64)
        .read_to_end(&mut head)
        .await?;
    reader.seek(SeekFrom::Start(resume)).await?;
    Ok(head)
}

#[cfg(unix)]
fn inode_of(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn inode_of(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn append(path: &Path, data: &[u8]) {
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(data).unwrap();
    }

    fn text(lines: &[Bytes]) -> Vec<String> {
        lines
            .iter()
            .map(|l| String::from_utf8_lossy(l).into_owned())
            .collect()
    }

    #[tokio::test]
    async fn reads_complete_lines_and_strips_terminators() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, b"first\nsecond\r\nthird\n").unwrap();

        let mut tailer = FileTailer::new(&path);
        let lines = tailer.poll(100).await.unwrap();
        assert_eq!(text(&lines), vec!["first", "second", "third"]);
        assert_eq!(tailer.offset(), 21);
    }

    #[tokio::test]
    async fn holds_partial_line_until_completed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, b"complete\npart").unwrap();

        let mut tailer = FileTailer::new(&path);
        assert_eq!(text(&tailer.poll(100).await.unwrap()), vec!["complete"]);
        assert_eq!(tailer.pending_len(), 4);

        // 아직 개행 없음
        assert!(tailer.poll(100).await.unwrap().is_empty());

        append(&path, b"ial line\n");
        assert_eq!(text(&tailer.poll(100).await.unwrap()), vec!["partial line"]);
        assert_eq!(tailer.pending_len(), 0);
    }

    #[tokio::test]
    async fn idle_poll_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, b"only\n").unwrap();

        let mut tailer = FileTailer::new(&path);
        assert_eq!(tailer.poll(100).await.unwrap().len(), 1);
        assert!(tailer.poll(100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn respects_max_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, b"a\nb\nc\n").unwrap();

        let mut tailer = FileTailer::new(&path);
        assert_eq!(text(&tailer.poll(2).await.unwrap()), vec!["a", "b"]);
        assert_eq!(text(&tailer.poll(2).await.unwrap()), vec!["c"]);
    }

    #[tokio::test]
    async fn start_at_end_skips_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, b"old line\n").unwrap();

        let mut tailer = FileTailer::new(&path);
        tailer.open(StartPosition::End).await.unwrap();
        assert!(tailer.poll(100).await.unwrap().is_empty());

        append(&path, b"new line\n");
        assert_eq!(text(&tailer.poll(100).await.unwrap()), vec!["new line"]);
    }

    #[tokio::test]
    async fn truncation_restarts_from_zero_without_redelivery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, b"line one\nline two\nhalf").unwrap();

        let mut tailer = FileTailer::new(&path);
        assert_eq!(
            text(&tailer.poll(100).await.unwrap()),
            vec!["line one", "line two"]
        );

        // 더 짧은 내용으로 절단
        std::fs::write(&path, b"fresh\n").unwrap();
        let lines = tailer.poll(100).await.unwrap();
        assert_eq!(text(&lines), vec!["fresh"]);
        assert_eq!(tailer.rotations(), 1);
        assert_eq!(tailer.offset(), 6);
    }

    #[tokio::test]
    async fn copytruncate_regrown_past_offset_restarts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, b"old first line\n").unwrap();

        let mut tailer = FileTailer::new(&path);
        assert_eq!(text(&tailer.poll(100).await.unwrap()), vec!["old first line"]);

        // 같은 inode에서 절단 후 이전 오프셋보다 길게 다시 씀
        std::fs::write(&path, b"new first line after copytruncate\nnew second\n").unwrap();
        let lines = tailer.poll(100).await.unwrap();
        assert_eq!(
            text(&lines),
            vec!["new first line after copytruncate", "new second"]
        );
        assert_eq!(tailer.rotations(), 1);
    }

    #[tokio::test]
    async fn plain_growth_is_not_a_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, b"one\n").unwrap();

        let mut tailer = FileTailer::new(&path);
        assert_eq!(tailer.poll(100).await.unwrap().len(), 1);

        let long = "x".repeat(HEAD_LEN * 2);
        append(&path, format!("{long}\n").as_bytes());
        append(&path, b"three\n");
        let lines = tailer.poll(100).await.unwrap();
        assert_eq!(text(&lines), vec![long.as_str(), "three"]);
        assert_eq!(tailer.rotations(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rename_rotation_is_detected_by_inode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, b"before rotation\n").unwrap();

        let mut tailer = FileTailer::new(&path);
        assert_eq!(tailer.poll(100).await.unwrap().len(), 1);

        // 마지막 poll 이후 이전 파일에 쓰인 라인
        append(&path, b"b-before-rotate\n");
        std::fs::rename(&path, dir.path().join("auth.log.1")).unwrap();

        // 이전 파일보다 긴 새 파일 (크기만으로는 감지 불가)
        std::fs::write(&path, b"after rotation, a much longer line\n").unwrap();
        let lines = tailer.poll(100).await.unwrap();
        assert_eq!(
            text(&lines),
            vec!["b-before-rotate", "after rotation, a much longer line"]
        );
        assert_eq!(tailer.rotations(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rotated_file_is_drained_while_path_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        let rotated = dir.path().join("auth.log.1");
        std::fs::write(&path, b"a\n").unwrap();

        let mut tailer = FileTailer::new(&path);
        assert_eq!(text(&tailer.poll(100).await.unwrap()), vec!["a"]);

        append(&path, b"b\ntai");
        std::fs::rename(&path, &rotated).unwrap();
        // 새 파일이 아직 없음
        assert_eq!(text(&tailer.poll(100).await.unwrap()), vec!["b"]);

        // 이동 전에 열린 writer가 이전 파일에 계속 씀
        append(&rotated, b"l-end\nunterminated");
        std::fs::write(&path, b"c\n").unwrap();
        let lines = tailer.poll(100).await.unwrap();
        assert_eq!(text(&lines), vec!["tail-end", "unterminated", "c"]);
        assert_eq!(tailer.rotations(), 1);
        assert_eq!(tailer.pending_len(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rename_drain_respects_max_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, b"").unwrap();

        let mut tailer = FileTailer::new(&path);
        assert!(tailer.poll(10).await.unwrap().is_empty());

        append(&path, b"1\n2\n3\n");
        std::fs::rename(&path, dir.path().join("auth.log.1")).unwrap();
        std::fs::write(&path, b"new\n").unwrap();

        assert_eq!(text(&tailer.poll(2).await.unwrap()), vec!["1", "2"]);
        assert_eq!(tailer.rotations(), 0);
        assert_eq!(text(&tailer.poll(2).await.unwrap()), vec!["3", "new"]);
        assert_eq!(tailer.rotations(), 1);
    }

    #[tokio::test]
    async fn missing_file_on_first_poll_is_an_error() {
        let mut tailer = FileTailer::new("/nonexistent/auth.log");
        let err = tailer.poll(10).await.unwrap_err();
        assert!(matches!(err, SourceAccessError::NotFound { .. }));
    }
}
