//! Bounded capture of child process output

use tokio::io::{AsyncRead, AsyncReadExt};

/// Appended to a stream that hit the capture cap
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

const READ_CHUNK: usize = 8 * 1024;

/// Captured text of one stream
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct CapturedStream {
    pub text: String,
    pub truncated: bool,
}

/// Read `reader` to EOF keeping at most `cap` bytes.
///
/// Bytes past the cap are drained and discarded so the child never blocks on
/// a full pipe.
pub(crate) async fn read_capped<R>(mut reader: R, cap: usize) -> CapturedStream
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::with_capacity(cap.min(READ_CHUNK));
    let mut truncated = false;
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                if n > room {
                    kept.extend_from_slice(&chunk[..room]);
                    truncated = true;
                } else {
                    kept.extend_from_slice(&chunk[..n]);
                }
            }
        }
    }

    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    CapturedStream { text, truncated }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_short_output_is_kept_whole() {
        let captured = read_capped(&b"hello\nworld\n"[..], 1024).await;
        assert_eq!(captured.text, "hello\nworld\n");
        assert!(!captured.truncated);
    }

    #[tokio::test]
    async fn test_long_output_is_truncated_with_marker() {
        let data = vec![b'a'; 100_000];
        let captured = read_capped(&data[..], 64 * 1024).await;
        assert!(captured.truncated);
        assert!(captured.text.ends_with(TRUNCATION_MARKER));
        assert_eq!(captured.text.len(), 64 * 1024 + TRUNCATION_MARKER.len());
    }

    #[tokio::test]
    async fn test_exact_cap_is_not_truncated() {
        let data = vec![b'b'; 32];
        let captured = read_capped(&data[..], 32).await;
        assert!(!captured.truncated);
        assert_eq!(captured.text.len(), 32);
    }
}
