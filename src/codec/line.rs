//! Newline-terminated line framing over a byte stream, tolerant of
//! partial reads and non-blocking sockets (§4.1).
//!
//! Mirrors the teacher's `wire::Codec` shape (a `tokio_util::codec`
//! `Decoder`/`Encoder` pair installed via `Framed`), but frames plain
//! UTF-8 lines rather than a binary job body — archive bytes travel
//! base64-encoded within a single `STORAGE_WRITE` line instead of a
//! separate framing state.

use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::error::Error;

/// Lines longer than this are a fatal framing error. Comfortably above
/// the 64 KiB floor required to carry base64-chunked archive writes.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

#[derive(Debug, Default)]
pub struct LineCodec;

impl codec::Decoder for LineCodec {
    type Item = String;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(newline_pos) = src.iter().position(|&b| b == b'\n') else {
            if src.len() > MAX_LINE_LENGTH {
                return Err(Error::LineTooLong);
            }
            return Ok(None);
        };

        if newline_pos > MAX_LINE_LENGTH {
            return Err(Error::LineTooLong);
        }

        let mut line = src.split_to(newline_pos);
        src.advance(1); // discard the \n

        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }

        let line = String::from_utf8(line.to_vec())
            .map_err(|e| Error::Malformed(format!("non-UTF-8 line: {e}")))?;

        Ok(Some(line))
    }
}

impl codec::Encoder<String> for LineCodec {
    type Error = Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.as_bytes());
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}

impl codec::Encoder<&str> for LineCodec {
    type Error = Error;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.as_bytes());
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;
    use tokio_util::codec::FramedRead;

    #[tokio::test]
    async fn splits_lines_and_strips_cr() {
        let stream: &[u8] = b"first\r\nsecond\nthird\r\n";
        let mut framed = FramedRead::new(stream, LineCodec);

        assert_eq!(framed.next().await.unwrap().unwrap(), "first");
        assert_eq!(framed.next().await.unwrap().unwrap(), "second");
        assert_eq!(framed.next().await.unwrap().unwrap(), "third");
        assert!(framed.next().await.is_none());
    }

    #[tokio::test]
    async fn tolerates_partial_reads() {
        let stream: &[u8] = b"hello world\n";
        let mut framed = FramedRead::new(stream, LineCodec);
        assert_eq!(framed.next().await.unwrap().unwrap(), "hello world");
    }

    #[tokio::test]
    async fn rejects_oversized_line() {
        let mut long = vec![b'a'; MAX_LINE_LENGTH + 10];
        long.push(b'\n');
        let mut framed = FramedRead::new(long.as_slice(), LineCodec);
        assert!(framed.next().await.unwrap().is_err());
    }
}
