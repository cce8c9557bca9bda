//! Versioned record codec.
//!
//! Each record is: `[u8 version][postcard payload]`. Postcard encodes enum
//! discriminants and sequence lengths as varint prefixes, so records are
//! tagged and length-prefixed without any text evaluation on either end.

use std::io;

use serde::{Deserialize, Serialize};

/// Current record format version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum accepted record size (1 MiB); the device side has little RAM.
pub const MAX_RECORD: usize = 1024 * 1024;

/// Encodes `msg` as a versioned record.
pub fn encode(msg: &impl Serialize) -> io::Result<Vec<u8>> {
    let mut out = vec![PROTOCOL_VERSION];
    let payload =
        postcard::to_allocvec(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    out.extend_from_slice(&payload);
    if out.len() > MAX_RECORD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "record exceeds 1 MiB limit",
        ));
    }
    Ok(out)
}

/// Decodes a versioned record produced by [`encode`].
pub fn decode<T: for<'de> Deserialize<'de>>(buf: &[u8]) -> io::Result<T> {
    let Some((&version, payload)) = buf.split_first() else {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "empty record"));
    };
    if version != PROTOCOL_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("record version {version}, expected {PROTOCOL_VERSION}"),
        ));
    }
    if buf.len() > MAX_RECORD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "record exceeds 1 MiB limit",
        ));
    }
    postcard::from_bytes(payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Reply, Request, Value};

    #[test]
    fn roundtrip_call() {
        let req = Request::Call {
            function: "os.listdir".into(),
            args: vec![Value::from("/lib")],
        };
        let buf = encode(&req).unwrap();
        assert_eq!(buf[0], PROTOCOL_VERSION);
        let decoded: Request = decode(&buf).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn roundtrip_nested_value() {
        let v = Value::List(vec![
            Value::Int(-3),
            Value::Bytes(vec![0, 255, 10]),
            Value::Map(vec![("k".into(), Value::Bool(true))]),
            Value::Nil,
        ]);
        let buf = encode(&Reply::Scalar(v.clone())).unwrap();
        let decoded: Reply = decode(&buf).unwrap();
        assert_eq!(decoded, Reply::Scalar(v));
    }

    #[test]
    fn stream_tags_are_distinct() {
        let cases = [
            Reply::StreamStart,
            Reply::StreamItem(Value::Nil),
            Reply::StreamEnd,
            Reply::Error("boom".into()),
        ];
        for reply in cases {
            let decoded: Reply = decode(&encode(&reply).unwrap()).unwrap();
            assert_eq!(decoded, reply);
        }
    }

    #[test]
    fn rejects_empty_record() {
        let result: io::Result<Reply> = decode(&[]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unknown_version() {
        let mut buf = encode(&Request::Exit).unwrap();
        buf[0] = PROTOCOL_VERSION + 1;
        let result: io::Result<Request> = decode(&buf);
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_truncated_payload() {
        let buf = encode(&Reply::Scalar(Value::from("hello"))).unwrap();
        let result: io::Result<Reply> = decode(&buf[..buf.len() - 2]);
        assert!(result.is_err());
    }
}
