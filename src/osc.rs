//! OSC wire codec for the X32 control protocol.
//!
//! Encodes and decodes single UDP datagrams in the Open Sound Control
//! format the console speaks: a NUL-padded address, a `,`-prefixed
//! type-tag string, then big-endian typed arguments. Pure and stateless;
//! the connection layer owns all protocol state.

use bytes::BufMut;
use thiserror::Error;

/// One typed OSC argument.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    /// `i` - 32-bit big-endian signed integer
    Int(i32),
    /// `f` - 32-bit big-endian IEEE-754 float
    Float(f32),
    /// `s` - NUL-terminated string, padded to a 4-byte boundary
    Str(String),
    /// `b` - length-prefixed binary blob, padded to a 4-byte boundary
    Blob(Vec<u8>),
}

impl OscArg {
    /// Type tag character for this argument.
    pub fn type_tag(&self) -> char {
        match self {
            OscArg::Int(_) => 'i',
            OscArg::Float(_) => 'f',
            OscArg::Str(_) => 's',
            OscArg::Blob(_) => 'b',
        }
    }

    /// Interpret the argument as an `f32`, converting integers.
    pub fn as_float(&self) -> Option<f32> {
        match self {
            OscArg::Float(v) => Some(*v),
            OscArg::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    /// Interpret the argument as an `i32`.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            OscArg::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Interpret the argument as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscArg::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Interpret the argument as a blob payload.
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            OscArg::Blob(v) => Some(v),
            _ => None,
        }
    }
}

/// A decoded OSC message: address plus argument list.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    /// Message with no arguments (bare get request, keepalive).
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            args: Vec::new(),
        }
    }

    /// Message with arguments.
    pub fn with_args(address: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// First argument, if any. Replies to value requests carry the
    /// value as the first (usually only) argument.
    pub fn first_arg(&self) -> Option<&OscArg> {
        self.args.first()
    }

    /// Encode into a wire datagram.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.address.len() + 8 + self.args.len() * 8);
        put_padded_str(&mut buf, &self.address);

        let mut tags = String::with_capacity(self.args.len() + 1);
        tags.push(',');
        for arg in &self.args {
            tags.push(arg.type_tag());
        }
        put_padded_str(&mut buf, &tags);

        for arg in &self.args {
            match arg {
                OscArg::Int(v) => buf.put_i32(*v),
                OscArg::Float(v) => buf.put_f32(*v),
                OscArg::Str(v) => put_padded_str(&mut buf, v),
                OscArg::Blob(v) => {
                    buf.put_i32(v.len() as i32);
                    buf.put_slice(v);
                    let pad = (4 - v.len() % 4) % 4;
                    buf.put_bytes(0, pad);
                },
            }
        }

        buf
    }

    /// Decode one inbound datagram.
    ///
    /// Tolerates a missing type-tag section (bare address), which the
    /// console uses for simple get requests. Malformed input yields an
    /// error, never a panic; callers log and drop.
    pub fn decode(data: &[u8]) -> Result<Self, OscError> {
        let (address, mut rest) = take_padded_str(data)?;
        if !address.starts_with('/') {
            return Err(OscError::BadAddress(address));
        }

        // Bare address, no type tags: zero arguments.
        if rest.is_empty() {
            return Ok(OscMessage::new(address));
        }

        let (tags, args_data) = take_padded_str(rest)?;
        rest = args_data;
        let tags = tags
            .strip_prefix(',')
            .ok_or(OscError::MissingTypeTags)?
            .to_string();

        let mut args = Vec::with_capacity(tags.len());
        for tag in tags.chars() {
            match tag {
                'i' => {
                    let (v, r) = take_u32(rest)?;
                    args.push(OscArg::Int(v as i32));
                    rest = r;
                },
                'f' => {
                    let (v, r) = take_u32(rest)?;
                    args.push(OscArg::Float(f32::from_bits(v)));
                    rest = r;
                },
                's' => {
                    let (v, r) = take_padded_str(rest)?;
                    args.push(OscArg::Str(v));
                    rest = r;
                },
                'b' => {
                    let (len, r) = take_u32(rest)?;
                    let len = len as usize;
                    let padded = len + (4 - len % 4) % 4;
                    if r.len() < len {
                        return Err(OscError::Truncated);
                    }
                    args.push(OscArg::Blob(r[..len].to_vec()));
                    rest = &r[padded.min(r.len())..];
                },
                other => return Err(OscError::UnsupportedTag(other)),
            }
        }

        Ok(OscMessage::with_args(address, args))
    }
}

/// Codec failure on a single datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OscError {
    #[error("address {0:?} does not start with '/'")]
    BadAddress(String),
    #[error("type-tag string does not start with ','")]
    MissingTypeTags,
    #[error("unsupported type tag {0:?}")]
    UnsupportedTag(char),
    #[error("string is not NUL-terminated")]
    UnterminatedString,
    #[error("datagram truncated")]
    Truncated,
}

/// Append a string with its NUL terminator, padded to a 4-byte boundary.
fn put_padded_str(buf: &mut Vec<u8>, s: &str) {
    buf.put_slice(s.as_bytes());
    let pad = 4 - s.len() % 4;
    buf.put_bytes(0, pad);
}

/// Read a NUL-terminated string and skip its padding.
fn take_padded_str(data: &[u8]) -> Result<(String, &[u8]), OscError> {
    let nul = data
        .iter()
        .position(|&b| b == 0)
        .ok_or(OscError::UnterminatedString)?;
    let s = String::from_utf8_lossy(&data[..nul]).into_owned();
    let consumed = (nul / 4 + 1) * 4;
    Ok((s, &data[consumed.min(data.len())..]))
}

/// Read a big-endian u32.
fn take_u32(data: &[u8]) -> Result<(u32, &[u8]), OscError> {
    if data.len() < 4 {
        return Err(OscError::Truncated);
    }
    let v = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    Ok((v, &data[4..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_fader_set() {
        // /ch/03/mix/fader <- 0.75, byte for byte
        let msg = OscMessage::with_args("/ch/03/mix/fader", vec![OscArg::Float(0.75)]);
        let bytes = msg.encode();

        // "/ch/03/mix/fader" is 16 bytes, so it pads to 20 with its NUL
        assert_eq!(&bytes[..16], b"/ch/03/mix/fader");
        assert_eq!(&bytes[16..20], &[0, 0, 0, 0]);
        assert_eq!(&bytes[20..24], b",f\0\0");
        assert_eq!(&bytes[24..28], 0.75f32.to_be_bytes());
        assert_eq!(bytes.len(), 28);
    }

    #[test]
    fn test_encode_bare_address() {
        let bytes = OscMessage::new("/xremote").encode();
        assert_eq!(&bytes[..8], b"/xremote");
        assert_eq!(&bytes[8..12], &[0, 0, 0, 0]);
        assert_eq!(&bytes[12..16], b",\0\0\0");
    }

    #[test]
    fn test_decode_bare_address_without_type_tags() {
        // Simple get requests are just a padded address
        let msg = OscMessage::decode(b"/xinfo\0\0").unwrap();
        assert_eq!(msg.address, "/xinfo");
        assert!(msg.args.is_empty());
    }

    #[test]
    fn test_decode_int_and_string() {
        let msg = OscMessage::with_args(
            "/formatsubscribe",
            vec![
                OscArg::Str("faders".to_string()),
                OscArg::Int(0),
                OscArg::Int(50),
            ],
        );
        let decoded = OscMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_blob_round_trip_with_padding() {
        // 5-byte blob forces 3 pad bytes
        let msg = OscMessage::with_args("/meters/2", vec![OscArg::Blob(vec![1, 2, 3, 4, 5])]);
        let bytes = msg.encode();
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(OscMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_decode_rejects_missing_slash() {
        let err = OscMessage::decode(b"xinfo\0\0\0").unwrap_err();
        assert_eq!(err, OscError::BadAddress("xinfo".to_string()));
    }

    #[test]
    fn test_decode_rejects_truncated_argument() {
        let mut bytes = OscMessage::with_args("/x", vec![OscArg::Int(7)]).encode();
        bytes.truncate(bytes.len() - 2);
        assert_eq!(OscMessage::decode(&bytes).unwrap_err(), OscError::Truncated);
    }

    #[test]
    fn test_decode_rejects_unsupported_tag() {
        // ",T" (true tag) is valid OSC but not part of the X32 subset
        let mut bytes = Vec::new();
        put_padded_str(&mut bytes, "/x");
        put_padded_str(&mut bytes, ",T");
        assert_eq!(
            OscMessage::decode(&bytes).unwrap_err(),
            OscError::UnsupportedTag('T')
        );
    }

    #[test]
    fn test_decode_never_panics_on_garbage() {
        let garbage: [&[u8]; 4] = [
            b"",
            &[0xff; 3],
            &[0xff; 64],
            b"/a\0\0,b\0\0\0\0\0\x05",
        ];
        for data in garbage {
            let _ = OscMessage::decode(data);
        }
    }

    fn arb_arg() -> impl Strategy<Value = OscArg> {
        prop_oneof![
            any::<i32>().prop_map(OscArg::Int),
            // Finite floats round-trip bit-exactly through be bytes
            prop::num::f32::NORMAL.prop_map(OscArg::Float),
            "[a-zA-Z0-9 /_-]{0,24}".prop_map(OscArg::Str),
            prop::collection::vec(any::<u8>(), 0..64).prop_map(OscArg::Blob),
        ]
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            addr in "/[a-z0-9/]{1,32}",
            args in prop::collection::vec(arb_arg(), 0..6),
        ) {
            let msg = OscMessage::with_args(addr, args);
            let bytes = msg.encode();
            prop_assert_eq!(bytes.len() % 4, 0);
            prop_assert_eq!(OscMessage::decode(&bytes).unwrap(), msg);
        }
    }
}
