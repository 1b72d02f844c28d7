//! Length-prefixed framing used on the remote debugger socket.
//!
//! Every message is written as a textual header `{"size": N}` immediately
//! followed by exactly `N` payload bytes. There is no delimiter between
//! messages, so a single socket read may carry a fraction of a frame, exactly
//! one frame, or several frames back to back.

use crate::error::Error;
use bytes::{Buf, BytesMut};
use once_cell::sync;
use regex::bytes::Regex;
use serde::de::DeserializeOwned;

/// Default upper bound for buffered, not yet decodable bytes.
pub const DEFAULT_MAX_PENDING: usize = 16 * 1024 * 1024;

static HEADER_RE: sync::Lazy<Regex> =
    sync::Lazy::new(|| Regex::new(r#"\{"size":\s*(\d+)\}"#).expect("must compile"));

/// Build a frame for `payload`.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let header = format!(r#"{{"size": {}}}"#, payload.len());
    let mut frame = Vec::with_capacity(header.len() + payload.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Position of a matched header inside the pending buffer.
struct Header {
    start: usize,
    end: usize,
    size: usize,
}

/// Incremental frame decoder, one instance per connection.
#[derive(Debug)]
pub struct FrameCodec {
    pending: BytesMut,
    max_pending: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

impl FrameCodec {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            max_pending,
        }
    }

    /// Bytes carried over to the next [`FrameCodec::decode`] call.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Feed one raw read and return every payload completed by it.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
        self.decode_with(chunk, |payload| Some(payload.to_vec()))
    }

    /// Like [`FrameCodec::decode`], but a payload is only complete once it
    /// parses as `T`. A sized payload that does not parse stays buffered
    /// together with its header, exactly like a frame still missing bytes.
    pub fn decode_json<T: DeserializeOwned>(&mut self, chunk: &[u8]) -> Result<Vec<T>, Error> {
        self.decode_with(chunk, |payload| match serde_json::from_slice(payload) {
            Ok(msg) => Some(msg),
            Err(e) => {
                log::debug!(target: "link", "sized payload is not a message yet: {e}");
                None
            }
        })
    }

    fn decode_with<T>(
        &mut self,
        chunk: &[u8],
        mut accept: impl FnMut(&[u8]) -> Option<T>,
    ) -> Result<Vec<T>, Error> {
        self.pending.extend_from_slice(chunk);

        let mut decoded = vec![];
        let mut consumed = 0;
        loop {
            let rest = &self.pending[consumed..];
            let Some(header) = self.find_header(rest)? else {
                break;
            };
            let payload_end = header.end + header.size;
            if rest.len() < payload_end {
                break;
            }
            match accept(&rest[header.end..payload_end]) {
                Some(msg) => {
                    decoded.push(msg);
                    if header.start > 0 {
                        log::warn!(target: "link", "skip {} bytes before frame header", header.start);
                    }
                    consumed += payload_end;
                }
                None => break,
            }
        }
        self.pending.advance(consumed);

        if self.pending.len() > self.max_pending {
            return Err(Error::FragmentOverflow {
                pending: self.pending.len(),
                limit: self.max_pending,
            });
        }
        Ok(decoded)
    }

    fn find_header(&self, buf: &[u8]) -> Result<Option<Header>, Error> {
        let Some(caps) = HEADER_RE.captures(buf) else {
            return Ok(None);
        };
        let (Some(all), Some(digits)) = (caps.get(0), caps.get(1)) else {
            return Ok(None);
        };
        let digits = String::from_utf8_lossy(digits.as_bytes());
        let size: usize = digits
            .parse()
            .map_err(|_| Error::InvalidFrameSize(digits.to_string()))?;
        if size > self.max_pending {
            return Err(Error::FrameTooLarge {
                declared: size,
                limit: self.max_pending,
            });
        }
        Ok(Some(Header {
            start: all.start(),
            end: all.end(),
            size,
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::{json, Value};

    fn feed(codec: &mut FrameCodec, stream: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
        let mut out = vec![];
        let mut from = 0;
        for &cut in cuts.iter().chain(std::iter::once(&stream.len())) {
            out.extend(codec.decode(&stream[from..cut]).unwrap());
            from = cut;
        }
        out
    }

    #[test]
    fn test_encode_header() {
        assert_eq!(encode(b"abc"), br#"{"size": 3}abc"#.to_vec());
        assert_eq!(encode(b""), br#"{"size": 0}"#.to_vec());
    }

    #[test]
    fn test_reassembly_at_every_offset() {
        let payload = br#"{"method": "step", "result": {"stopped": true}}"#;
        let stream = encode(payload);

        for cut in 0..=stream.len() {
            let mut codec = FrameCodec::default();
            let first = codec.decode(&stream[..cut]).unwrap();
            let second = codec.decode(&stream[cut..]).unwrap();

            let all: Vec<_> = first.into_iter().chain(second).collect();
            assert_eq!(all, vec![payload.to_vec()], "cut at {cut}");
            assert!(codec.pending().is_empty());
        }
    }

    #[test]
    fn test_reassembly_byte_by_byte() {
        let payload = "ünïcode payload ✓".as_bytes();
        let stream = encode(payload);
        let cuts: Vec<usize> = (1..stream.len()).collect();

        let mut codec = FrameCodec::default();
        assert_eq!(feed(&mut codec, &stream, &cuts), vec![payload.to_vec()]);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut stream = encode(b"first");
        stream.extend(encode(b"second"));
        stream.extend(encode(b"thi"));
        stream.truncate(stream.len() - 1);

        let mut codec = FrameCodec::default();
        let decoded = codec.decode(&stream).unwrap();
        assert_eq!(decoded, vec![b"first".to_vec(), b"second".to_vec()]);
        assert_eq!(codec.pending(), br#"{"size": 3}th"#);

        let decoded = codec.decode(b"i").unwrap();
        assert_eq!(decoded, vec![b"thi".to_vec()]);
    }

    #[test]
    fn test_split_header_is_carried_verbatim() {
        let mut codec = FrameCodec::default();
        assert!(codec.decode(br#"{"si"#).unwrap().is_empty());
        assert_eq!(codec.pending(), br#"{"si"#);
        assert!(codec.decode(br#"ze": 1"#).unwrap().is_empty());
        assert_eq!(codec.decode(b"2}hello world!").unwrap(), vec![b"hello world!".to_vec()]);
    }

    #[test]
    fn test_stalled_frame_is_pending_not_error() {
        let mut codec = FrameCodec::default();
        let decoded = codec.decode(br#"{"size": 1000}only a few bytes"#).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(codec.pending().len(), br#"{"size": 1000}only a few bytes"#.len());
    }

    #[test]
    fn test_malformed_json_is_rebuffered() {
        let mut codec = FrameCodec::default();
        let mut stream = encode(br#"{"method": "st"#);
        stream.extend(encode(br#"{"method": "info", "result": 1}"#));

        let decoded: Vec<Value> = codec.decode_json(&stream).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(codec.pending(), stream.as_slice());
    }

    #[test]
    fn test_json_frames() {
        let mut codec = FrameCodec::default();
        let msg = json!({"method": "continue", "result": {"exited": true}});
        let stream = encode(msg.to_string().as_bytes());
        let (head, tail) = stream.split_at(7);

        assert!(codec.decode_json::<Value>(head).unwrap().is_empty());
        assert_eq!(codec.decode_json::<Value>(tail).unwrap(), vec![msg]);
    }

    #[test]
    fn test_limits() {
        let mut codec = FrameCodec::new(8);
        assert!(matches!(
            codec.decode(br#"{"size": 9}"#),
            Err(Error::FrameTooLarge {
                declared: 9,
                limit: 8
            })
        ));

        let mut codec = FrameCodec::new(8);
        assert!(matches!(
            codec.decode(b"no header at all"),
            Err(Error::FragmentOverflow { limit: 8, .. })
        ));

        let mut codec = FrameCodec::default();
        assert!(matches!(
            codec.decode(br#"{"size": 99999999999999999999999}"#),
            Err(Error::InvalidFrameSize(_))
        ));
    }
}
