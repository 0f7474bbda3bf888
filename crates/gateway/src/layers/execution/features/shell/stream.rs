use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Drains `reader` to EOF, keeping at most `max_bytes`. The flag reports
/// whether anything was dropped.
pub(super) async fn read_bounded<R: AsyncRead + Unpin>(
    mut reader: R,
    max_bytes: usize,
) -> io::Result<(Vec<u8>, bool)> {
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 4096];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = max_bytes.saturating_sub(kept.len());
        if room < n {
            truncated = true;
        }
        kept.extend_from_slice(&chunk[..room.min(n)]);
    }
    Ok((kept, truncated))
}
