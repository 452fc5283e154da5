//! text/event-stream のデコード。
//!
//! `data:` 行を溜めて空行で 1 フレームとして確定する。`event:` / `id:` / `retry:`
//! とコメント行（`:` 始まり）は使わないので読み捨てる。

use serde::de::DeserializeOwned;

use super::ApiError;

/// チャンク単位で受け取り、確定したフレームの data を返すデコーダ
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// チャンクを追加し、確定したフレームを返す。行やUTF-8文字がチャンク境界で
    /// 分かれていてもよい。
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let frame = self.data.join("\n");
            self.data.clear();
            return Some(frame);
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }
}

/// フレームの data を JSON メッセージとして読む
pub fn parse_frame<T: DeserializeOwned>(frame: &str) -> Result<T, ApiError> {
    serde_json::from_str(frame).map_err(|e| ApiError::Decode(format!("{e}: {frame}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: {\"type\":\"Reset\"}\n\n");
        assert_eq!(frames, vec!["{\"type\":\"Reset\"}".to_string()]);
    }

    #[test]
    fn test_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"a\"").is_empty());
        assert!(decoder.feed(b":1}\r\n").is_empty());
        let frames = decoder.feed(b"\r\ndata: 2\n\n");
        assert_eq!(frames, vec!["{\"a\":1}".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_multiline_and_ignored_fields() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b": keep-alive\nevent: message\nid: 4\ndata: a\ndata: b\n\n\n");
        assert_eq!(frames, vec!["a\nb".to_string()]);
    }

    #[test]
    fn test_utf8_split() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: \"日本\"\n\n".as_bytes();
        let (a, b) = bytes.split_at(8);
        assert!(decoder.feed(a).is_empty());
        let frames = decoder.feed(b);
        assert_eq!(frames, vec!["\"日本\"".to_string()]);
    }

    #[test]
    fn test_parse_frame_error() {
        let res: Result<u32, _> = parse_frame("not json");
        assert!(matches!(res, Err(ApiError::Decode(_))));
    }
}
