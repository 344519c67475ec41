//! Line reading for child process output

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Read the next line, replacing invalid UTF-8 instead of failing.
///
/// The trailing `\n` / `\r\n` is stripped. Returns `None` at end of stream.
pub async fn next_line_lossy<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_utf8_does_not_end_stream() {
        let mut input: &[u8] = b"ok\nbad \xff byte\r\ncaf\xe9\nlast";
        let mut buf = Vec::new();

        let mut lines = Vec::new();
        while let Some(line) = next_line_lossy(&mut input, &mut buf).await.unwrap() {
            lines.push(line);
        }

        assert_eq!(lines, vec!["ok", "bad \u{FFFD} byte", "caf\u{FFFD}", "last"]);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let mut input: &[u8] = b"";
        let mut buf = Vec::new();
        assert_eq!(next_line_lossy(&mut input, &mut buf).await.unwrap(), None);
    }
}
