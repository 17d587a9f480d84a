//! `Content-Length` framing for the server's stdio channel.
//!
//! Each message is `Content-Length: N\r\n\r\n` followed by N bytes of JSON.
//! [`FrameReader`] sits on the child's stdout, [`FrameWriter`] on its stdin.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Frames above 4 MiB are rejected before allocation.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Parse one header line. `Ok(None)` means a header other than Content-Length.
fn parse_content_length(line: &str) -> Result<Option<usize>> {
    let Some((key, value)) = line.split_once(':') else {
        return Ok(None);
    };
    if !key.trim().eq_ignore_ascii_case("Content-Length") {
        return Ok(None);
    }
    let len = value
        .trim()
        .parse()
        .with_context(|| format!("invalid Content-Length value {:?}", value.trim()))?;
    Ok(Some(len))
}

pub struct FrameReader<R> {
    reader: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: String::new(),
        }
    }

    /// Read the next message. `Ok(None)` is a clean EOF between frames.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(len) = self.read_headers().await? else {
            return Ok(None);
        };
        if len > MAX_FRAME_BYTES {
            bail!("Content-Length {len} exceeds maximum {MAX_FRAME_BYTES}");
        }

        let mut body = vec![0u8; len];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;
        let value = serde_json::from_slice(&body).context("parsing JSON-RPC frame")?;
        Ok(Some(value))
    }

    async fn read_headers(&mut self) -> Result<Option<usize>> {
        let mut content_length = None;
        let mut started = false;

        loop {
            self.line.clear();
            let n = self
                .reader
                .read_line(&mut self.line)
                .await
                .context("reading header line")?;
            if n == 0 {
                // EOF is only clean before the first header byte.
                if started {
                    bail!("unexpected EOF while reading headers");
                }
                return Ok(None);
            }
            started = true;

            let header = self.line.trim();
            if header.is_empty() {
                break;
            }
            if let Some(len) = parse_content_length(header)? {
                content_length = Some(len);
            }
        }

        content_length
            .map(Some)
            .context("missing Content-Length header")
    }
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(msg).context("serializing JSON-RPC frame")?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer
            .write_all(header.as_bytes())
            .await
            .context("writing frame header")?;
        self.writer
            .write_all(&body)
            .await
            .context("writing frame body")?;
        self.writer.flush().await.context("flushing frame")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{body}", body.len()).into_bytes()
    }

    #[tokio::test]
    async fn writer_output_is_readable() {
        let begin = serde_json::json!({"jsonrpc": "2.0", "method": "rustDocument/diagnosticsBegin"});
        let end = serde_json::json!({"jsonrpc": "2.0", "method": "rustDocument/diagnosticsEnd"});

        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        writer.write_frame(&begin).await.unwrap();
        writer.write_frame(&end).await.unwrap();

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), begin);
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), end);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_stream_is_clean_eof() {
        let mut reader = FrameReader::new(&b""[..]);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_inside_headers_is_error() {
        let mut reader = FrameReader::new(&b"Content-Length: 10\r\n"[..]);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn missing_length_is_error() {
        let mut reader = FrameReader::new(&b"Content-Type: application/json\r\n\r\n{}"[..]);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        let mut reader = FrameReader::new(header.as_bytes());
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn short_body_is_error() {
        let mut reader = FrameReader::new(&b"Content-Length: 100\r\n\r\n{}"[..]);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn extra_headers_and_case_are_tolerated() {
        let body = r#"{"id":7}"#;
        let frame = format!(
            "content-type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: {}\r\n\r\n{body}",
            body.len()
        );
        let mut reader = FrameReader::new(frame.as_bytes());
        assert_eq!(reader.read_frame().await.unwrap().unwrap()["id"], 7);
    }

    #[tokio::test]
    async fn length_counts_bytes_not_chars() {
        let bytes = framed(r#"{"k":"é"}"#);
        let mut reader = FrameReader::new(bytes.as_slice());
        assert_eq!(reader.read_frame().await.unwrap().unwrap()["k"], "é");
    }

    #[test]
    fn content_length_parsing() {
        assert_eq!(parse_content_length("Content-Length: 12").unwrap(), Some(12));
        assert_eq!(parse_content_length("Content-Type: x").unwrap(), None);
        assert_eq!(parse_content_length("garbage").unwrap(), None);
        assert!(parse_content_length("Content-Length: many").is_err());
    }
}
