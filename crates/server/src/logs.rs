//! Reading the daemon log file.

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TAIL_LINES: usize = 50;

const FOLLOW_POLL: Duration = Duration::from_millis(500);

/// The last `count` lines of `path`.
pub async fn tail(path: &Path, count: usize) -> Result<Vec<String>> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        bail!("no log file found at {}", path.display());
    }

    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut last = std::collections::VecDeque::with_capacity(count);
    while let Some(line) = lines.next_line().await? {
        if count == 0 {
            continue;
        }
        if last.len() == count {
            last.pop_front();
        }
        last.push_back(line);
    }
    Ok(last.into_iter().collect())
}

/// Copy everything appended to `path` after its current end into `out`
/// until `shutdown` fires.
pub async fn follow<W>(path: &Path, out: &mut W, shutdown: CancellationToken) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut position = file.seek(SeekFrom::End(0)).await?;
    let mut buf = Vec::new();

    loop {
        let len = tokio::fs::metadata(path).await?.len();
        if len < position {
            // Truncated underneath us; start over from the top.
            position = file.seek(SeekFrom::Start(0)).await?;
        }

        buf.clear();
        let read = file.read_to_end(&mut buf).await?;
        if read > 0 {
            position += read as u64;
            out.write_all(&buf).await?;
            out.flush().await?;
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(FOLLOW_POLL) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn tail_returns_last_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.log");
        let content: String = (1..=10).map(|n| format!("line {n}\n")).collect();
        std::fs::write(&path, content).unwrap();

        let lines = tail(&path, 3).await.unwrap();
        assert_eq!(lines, vec!["line 8", "line 9", "line 10"]);

        let all = tail(&path, 100).await.unwrap();
        assert_eq!(all.len(), 10);
    }

    #[tokio::test]
    async fn tail_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = tail(&dir.path().join("server.log"), 5).await.unwrap_err();
        assert!(err.to_string().starts_with("no log file found"));
    }

    #[tokio::test]
    async fn follow_streams_appended_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "old\n").unwrap();

        let shutdown = CancellationToken::new();
        let (mut reader, mut writer) = tokio::io::duplex(1024);
        let follower = {
            let path = path.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { follow(&path, &mut writer, shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"new\n").unwrap();
        }

        let mut received = [0u8; 4];
        tokio::time::timeout(Duration::from_secs(5), reader.read_exact(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&received, b"new\n");

        shutdown.cancel();
        follower.await.unwrap().unwrap();
    }
}
