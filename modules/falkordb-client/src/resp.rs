//! RESP2 framing for the client side of a connection.
//!
//! Commands go out as arrays of bulk strings; replies come back as any RESP2
//! value. The decoder is incremental: it returns `Ok(None)` until a complete
//! frame is buffered.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FalkorError, Result};

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Nested arrays deeper than this are treated as a framing error.
const MAX_NESTING: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// `+OK\r\n`
    SimpleString(String),
    /// `-ERR message\r\n`
    Error(String),
    /// `:1000\r\n`
    Integer(i64),
    /// `$6\r\nfoobar\r\n`
    BulkString(Bytes),
    /// `$-1\r\n` or `*-1\r\n`
    Null,
    /// `*2\r\n...`
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn bulk(data: impl AsRef<[u8]>) -> Self {
        RespValue::BulkString(Bytes::copy_from_slice(data.as_ref()))
    }

    /// Build a command frame: an array of bulk strings.
    pub fn command<I>(args: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        RespValue::Array(args.into_iter().map(RespValue::bulk).collect())
    }

    /// Text content of a simple or bulk string, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RespValue::SimpleString(_) => "simple string",
            RespValue::Error(_) => "error",
            RespValue::Integer(_) => "integer",
            RespValue::BulkString(_) => "bulk string",
            RespValue::Null => "null",
            RespValue::Array(_) => "array",
        }
    }

    fn write_to(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                buf.put_u8(b'-');
                buf.put_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Integer(i) => {
                buf.put_u8(b':');
                buf.put_slice(i.to_string().as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::BulkString(data) => {
                buf.put_u8(b'$');
                buf.put_slice(data.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                buf.put_slice(data);
                buf.put_slice(b"\r\n");
            }
            RespValue::Null => buf.put_slice(b"$-1\r\n"),
            RespValue::Array(items) => {
                buf.put_u8(b'*');
                buf.put_slice(items.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                for item in items {
                    item.write_to(buf);
                }
            }
        }
    }
}

/// Client-side RESP2 codec.
///
/// Incomplete frames are scanned once: the scan position and the element
/// counts of still-open arrays survive between `decode` calls, so each byte
/// is looked at a bounded number of times. The value tree is only built when
/// the whole frame is buffered.
pub struct RespCodec {
    max_frame_size: usize,
    scan: FrameScan,
}

/// Progress through a partially received frame.
#[derive(Debug, Default)]
struct FrameScan {
    /// Start of the next element header still to be checked.
    pos: usize,
    /// Elements still owed by each open array, outermost first.
    open_arrays: Vec<usize>,
}

impl RespCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            scan: FrameScan::default(),
        }
    }

    /// Advance the scan over `buf`. Returns the frame length once the frame
    /// is complete.
    fn scan_frame(&mut self, buf: &[u8]) -> Result<Option<usize>> {
        let scan = &mut self.scan;
        while scan.pos < buf.len() {
            let Some(line_end) = find_crlf(buf, scan.pos + 1) else {
                return Ok(None);
            };
            let line = &buf[scan.pos + 1..line_end];
            let next = line_end + 2;

            let element_end = match buf[scan.pos] {
                b'+' | b'-' => next,
                b':' => {
                    parse_int(line)?;
                    next
                }
                b'$' => match parse_int(line)? {
                    -1 => next,
                    len => {
                        let end = next + checked_len(len, self.max_frame_size)?;
                        if buf.len() < end + 2 {
                            return Ok(None);
                        }
                        if &buf[end..end + 2] != b"\r\n" {
                            return Err(FalkorError::Protocol(
                                "bulk string is not terminated by CRLF".to_string(),
                            ));
                        }
                        end + 2
                    }
                },
                b'*' => match parse_int(line)? {
                    -1 | 0 => next,
                    len => {
                        let len = checked_len(len, self.max_frame_size)?;
                        if scan.open_arrays.len() >= MAX_NESTING {
                            return Err(FalkorError::Protocol(format!(
                                "reply nesting exceeds {MAX_NESTING} levels"
                            )));
                        }
                        scan.open_arrays.push(len);
                        scan.pos = next;
                        continue;
                    }
                },
                other => {
                    return Err(FalkorError::Protocol(format!(
                        "invalid RESP type byte {:?}",
                        other as char
                    )))
                }
            };

            scan.pos = element_end;
            // a finished element may finish its enclosing arrays too
            loop {
                match scan.open_arrays.last_mut() {
                    None => return Ok(Some(element_end)),
                    Some(owed) if *owed > 1 => {
                        *owed -= 1;
                        break;
                    }
                    Some(_) => {
                        scan.open_arrays.pop();
                    }
                }
            }
        }
        Ok(None)
    }
}

impl Default for RespCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = FalkorError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RespValue>> {
        if src.is_empty() {
            return Ok(None);
        }

        let frame_len = match self.scan_frame(src) {
            Ok(Some(len)) => len,
            Ok(None) if src.len() > self.max_frame_size => {
                self.scan = FrameScan::default();
                return Err(FalkorError::Protocol(format!(
                    "reply exceeds maximum frame size of {} bytes",
                    self.max_frame_size
                )));
            }
            Ok(None) => return Ok(None),
            Err(e) => {
                self.scan = FrameScan::default();
                return Err(e);
            }
        };
        self.scan = FrameScan::default();

        let frame = src.split_to(frame_len);
        match parse_value(&frame, 0, 0, self.max_frame_size)? {
            Some((value, _)) => Ok(Some(value)),
            None => Err(FalkorError::Protocol(
                "frame ended early after a complete scan".to_string(),
            )),
        }
    }
}

impl Encoder<RespValue> for RespCodec {
    type Error = FalkorError;

    fn encode(&mut self, item: RespValue, dst: &mut BytesMut) -> Result<()> {
        item.write_to(dst);
        Ok(())
    }
}

/// Build the value starting at `pos`. Returns the value and the position just
/// past it, or `None` if the buffer ends first.
fn parse_value(
    buf: &[u8],
    pos: usize,
    depth: usize,
    max_frame_size: usize,
) -> Result<Option<(RespValue, usize)>> {
    if pos >= buf.len() {
        return Ok(None);
    }
    if depth > MAX_NESTING {
        return Err(FalkorError::Protocol(format!(
            "reply nesting exceeds {MAX_NESTING} levels"
        )));
    }

    let Some(line_end) = find_crlf(buf, pos + 1) else {
        return Ok(None);
    };
    let line = &buf[pos + 1..line_end];
    let next = line_end + 2;

    match buf[pos] {
        b'+' => Ok(Some((
            RespValue::SimpleString(String::from_utf8_lossy(line).into_owned()),
            next,
        ))),
        b'-' => Ok(Some((
            RespValue::Error(String::from_utf8_lossy(line).into_owned()),
            next,
        ))),
        b':' => Ok(Some((RespValue::Integer(parse_int(line)?), next))),
        b'$' => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Some((RespValue::Null, next)));
            }
            let len = checked_len(len, max_frame_size)?;
            let end = next + len;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(FalkorError::Protocol(
                    "bulk string is not terminated by CRLF".to_string(),
                ));
            }
            Ok(Some((
                RespValue::BulkString(Bytes::copy_from_slice(&buf[next..end])),
                end + 2,
            )))
        }
        b'*' => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Some((RespValue::Null, next)));
            }
            let len = checked_len(len, max_frame_size)?;
            let mut items = Vec::with_capacity(len.min(1024));
            let mut cursor = next;
            for _ in 0..len {
                match parse_value(buf, cursor, depth + 1, max_frame_size)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(items), cursor)))
        }
        other => Err(FalkorError::Protocol(format!(
            "invalid RESP type byte {:?}",
            other as char
        ))),
    }
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|offset| from + offset)
}

fn parse_int(line: &[u8]) -> Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            FalkorError::Protocol(format!(
                "invalid integer {:?}",
                String::from_utf8_lossy(line)
            ))
        })
}

fn checked_len(len: i64, max_frame_size: usize) -> Result<usize> {
    if len < 0 {
        return Err(FalkorError::Protocol(format!("invalid length {len}")));
    }
    let len = len as usize;
    if len > max_frame_size {
        return Err(FalkorError::Protocol(format!(
            "length {len} exceeds maximum frame size of {max_frame_size} bytes"
        )));
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Result<Option<RespValue>> {
        let mut buf = BytesMut::from(input);
        RespCodec::new().decode(&mut buf)
    }

    #[test]
    fn decodes_scalar_frames() {
        assert_eq!(
            decode_all(b"+OK\r\n").unwrap(),
            Some(RespValue::SimpleString("OK".into()))
        );
        assert_eq!(
            decode_all(b"-ERR boom\r\n").unwrap(),
            Some(RespValue::Error("ERR boom".into()))
        );
        assert_eq!(
            decode_all(b":-42\r\n").unwrap(),
            Some(RespValue::Integer(-42))
        );
        assert_eq!(
            decode_all(b"$5\r\nhello\r\n").unwrap(),
            Some(RespValue::bulk("hello"))
        );
        assert_eq!(decode_all(b"$-1\r\n").unwrap(), Some(RespValue::Null));
        assert_eq!(decode_all(b"$0\r\n\r\n").unwrap(), Some(RespValue::bulk("")));
    }

    #[test]
    fn decodes_nested_arrays() {
        let value = decode_all(b"*2\r\n*1\r\n:1\r\n$1\r\nn\r\n").unwrap();
        assert_eq!(
            value,
            Some(RespValue::Array(vec![
                RespValue::Array(vec![RespValue::Integer(1)]),
                RespValue::bulk("n"),
            ]))
        );
    }

    #[test]
    fn partial_frames_wait_for_more_data() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nfoo\r\n$3\r\nba"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 19);

        buf.extend_from_slice(b"r\r\n+next\r\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(RespValue::command(["foo", "bar"]))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(RespValue::SimpleString("next".into()))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_unknown_type_byte() {
        let err = decode_all(b"?what\r\n").unwrap_err();
        assert!(matches!(err, FalkorError::Protocol(_)));
    }

    #[test]
    fn rejects_bad_integer_and_unterminated_bulk() {
        assert!(matches!(
            decode_all(b":12x\r\n").unwrap_err(),
            FalkorError::Protocol(_)
        ));
        assert!(matches!(
            decode_all(b"$3\r\nfooXY").unwrap_err(),
            FalkorError::Protocol(_)
        ));
    }

    #[test]
    fn rejects_oversized_bulk_string() {
        let mut codec = RespCodec::with_max_frame_size(8);
        let mut buf = BytesMut::from(&b"$100\r\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf).unwrap_err(),
            FalkorError::Protocol(_)
        ));
    }

    #[test]
    fn encodes_commands_as_bulk_string_arrays() {
        let mut buf = BytesMut::new();
        RespCodec::new()
            .encode(RespValue::command(["GRAPH.QUERY", "social", "RETURN 1"]), &mut buf)
            .unwrap();
        assert_eq!(
            &buf[..],
            &b"*3\r\n$11\r\nGRAPH.QUERY\r\n$6\r\nsocial\r\n$8\r\nRETURN 1\r\n"[..]
        );
    }

    #[test]
    fn encoded_replies_decode_back() {
        let reply = RespValue::Array(vec![
            RespValue::SimpleString("OK".into()),
            RespValue::Error("ERR x".into()),
            RespValue::Integer(7),
            RespValue::Null,
            RespValue::bulk("multi\r\nline"),
        ]);
        let mut buf = BytesMut::new();
        RespCodec::new().encode(reply.clone(), &mut buf).unwrap();
        assert_eq!(RespCodec::new().decode(&mut buf).unwrap(), Some(reply));
    }

    #[test]
    fn large_reply_in_small_chunks_is_scanned_incrementally() {
        let count = 20_000;
        let reply = RespValue::Array(
            (0..count)
                .map(|i| RespValue::Array(vec![RespValue::Integer(i), RespValue::bulk(format!("value-{i}"))]))
                .collect(),
        );
        let mut encoded = BytesMut::new();
        RespCodec::new().encode(reply.clone(), &mut encoded).unwrap();

        let mut codec = RespCodec::new();
        let mut buf = BytesMut::new();
        let mut decoded = None;
        let mut last_pos = 0;
        for chunk in encoded.chunks(8 * 1024) {
            buf.extend_from_slice(chunk);
            match codec.decode(&mut buf).unwrap() {
                Some(value) => decoded = Some(value),
                None => {
                    // the scan resumes where it stopped instead of restarting
                    assert!(codec.scan.pos >= last_pos);
                    assert!(codec.scan.pos > 0);
                    last_pos = codec.scan.pos;
                }
            }
        }

        assert_eq!(decoded, Some(reply));
        assert!(buf.is_empty());
        assert_eq!(codec.scan.pos, 0);
        assert!(codec.scan.open_arrays.is_empty());
    }

    #[test]
    fn empty_and_null_arrays_complete_immediately() {
        assert_eq!(decode_all(b"*0\r\n").unwrap(), Some(RespValue::Array(vec![])));
        assert_eq!(decode_all(b"*-1\r\n").unwrap(), Some(RespValue::Null));
        assert_eq!(
            decode_all(b"*2\r\n*0\r\n*1\r\n*0\r\n").unwrap(),
            Some(RespValue::Array(vec![
                RespValue::Array(vec![]),
                RespValue::Array(vec![RespValue::Array(vec![])]),
            ]))
        );
    }

    #[test]
    fn rejects_excessive_nesting() {
        let input = b"*1\r\n".repeat(MAX_NESTING + 1);
        let err = decode_all(&input).unwrap_err();
        assert!(matches!(err, FalkorError::Protocol(_)));
    }
}
