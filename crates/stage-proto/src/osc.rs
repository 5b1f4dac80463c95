/// OSC 1.0 codec for the stage controller link.
///
/// Wire layout (all integers big-endian, every field padded to 4 bytes):
///
/// ```text
///   message := address-string  type-tag-string  argument*
///   bundle  := "#bundle\0"  timetag(u64)  ( size(i32)  packet )*
/// ```
///
/// Bundles may nest.  `OscPacket::flatten` walks them depth-first so the
/// caller sees leaf messages in the exact order they were packed.
use thiserror::Error;

pub const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// "Immediately" timetag as defined by OSC 1.0.
pub const TIMETAG_IMMEDIATE: u64 = 1;

/// Bundles nested deeper than this are rejected as malformed.
pub const MAX_BUNDLE_DEPTH: usize = 16;

#[derive(Debug, Error, PartialEq)]
pub enum OscError {
    #[error("packet truncated at offset {0}")]
    Truncated(usize),
    #[error("packet length {0} is not a multiple of 4")]
    Misaligned(usize),
    #[error("string at offset {0} is not valid utf-8")]
    BadString(usize),
    #[error("address {0:?} does not start with '/'")]
    BadAddress(String),
    #[error("type tag string does not start with ','")]
    MissingTypeTags,
    #[error("unknown type tag '{0}'")]
    UnknownTypeTag(char),
    #[error("invalid bundle element size {0}")]
    BadElementSize(i32),
    #[error("bundles nested deeper than {MAX_BUNDLE_DEPTH}")]
    TooDeep,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    String(String),
    Blob(Vec<u8>),
    Long(i64),
    Double(f64),
    Time(u64),
    Char(char),
    Bool(bool),
    Nil,
    Impulse,
}

impl OscArg {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscArg::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value of any int/float argument.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            OscArg::Int(v) => Some(v as f64),
            OscArg::Float(v) => Some(v as f64),
            OscArg::Long(v) => Some(v as f64),
            OscArg::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Controllers send booleans either as `T`/`F` tags or as 0/1 numbers.
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            OscArg::Bool(b) => Some(b),
            OscArg::Int(v) => Some(v != 0),
            OscArg::Long(v) => Some(v != 0),
            OscArg::Float(v) => Some(v != 0.0),
            OscArg::Double(v) => Some(v != 0.0),
            _ => None,
        }
    }

    fn tag(&self) -> char {
        match self {
            OscArg::Int(_) => 'i',
            OscArg::Float(_) => 'f',
            OscArg::String(_) => 's',
            OscArg::Blob(_) => 'b',
            OscArg::Long(_) => 'h',
            OscArg::Double(_) => 'd',
            OscArg::Time(_) => 't',
            OscArg::Char(_) => 'c',
            OscArg::Bool(true) => 'T',
            OscArg::Bool(false) => 'F',
            OscArg::Nil => 'N',
            OscArg::Impulse => 'I',
        }
    }
}

impl From<&str> for OscArg {
    fn from(s: &str) -> Self {
        OscArg::String(s.to_string())
    }
}

impl From<String> for OscArg {
    fn from(s: String) -> Self {
        OscArg::String(s)
    }
}

impl From<i32> for OscArg {
    fn from(v: i32) -> Self {
        OscArg::Int(v)
    }
}

impl From<f32> for OscArg {
    fn from(v: f32) -> Self {
        OscArg::Float(v)
    }
}

impl From<bool> for OscArg {
    fn from(v: bool) -> Self {
        OscArg::Bool(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub addr: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(addr: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            addr: addr.into(),
            args,
        }
    }

    pub fn arg(&self, idx: usize) -> Option<&OscArg> {
        self.args.get(idx)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OscBundle {
    pub timetag: u64,
    pub content: Vec<OscPacket>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OscPacket {
    Message(OscMessage),
    Bundle(OscBundle),
}

impl OscPacket {
    /// Leaf messages in depth-first, original order.
    pub fn flatten(self) -> Vec<OscMessage> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(self, out: &mut Vec<OscMessage>) {
        match self {
            OscPacket::Message(msg) => out.push(msg),
            OscPacket::Bundle(bundle) => {
                for packet in bundle.content {
                    packet.flatten_into(out);
                }
            }
        }
    }
}

impl From<OscMessage> for OscPacket {
    fn from(msg: OscMessage) -> Self {
        OscPacket::Message(msg)
    }
}

// ── decoding ──────────────────────────────────────────────────────────────────

pub fn decode(data: &[u8]) -> Result<OscPacket, OscError> {
    decode_packet(data, 0)
}

fn decode_packet(data: &[u8], depth: usize) -> Result<OscPacket, OscError> {
    if data.is_empty() {
        return Err(OscError::Truncated(0));
    }
    if data.len() % 4 != 0 {
        return Err(OscError::Misaligned(data.len()));
    }
    if data.starts_with(BUNDLE_TAG) {
        decode_bundle(data, depth).map(OscPacket::Bundle)
    } else {
        decode_message(data).map(OscPacket::Message)
    }
}

fn decode_bundle(data: &[u8], depth: usize) -> Result<OscBundle, OscError> {
    if depth >= MAX_BUNDLE_DEPTH {
        return Err(OscError::TooDeep);
    }
    let mut r = Reader::new(data);
    r.take(BUNDLE_TAG.len())?;
    let timetag = r.u64()?;

    let mut content = Vec::new();
    while r.remaining() > 0 {
        let size = r.i32()?;
        if size <= 0 || size % 4 != 0 {
            return Err(OscError::BadElementSize(size));
        }
        let element = r.take(size as usize)?;
        content.push(decode_packet(element, depth + 1)?);
    }

    Ok(OscBundle { timetag, content })
}

fn decode_message(data: &[u8]) -> Result<OscMessage, OscError> {
    let mut r = Reader::new(data);
    let addr = r.string()?;
    if !addr.starts_with('/') {
        return Err(OscError::BadAddress(addr));
    }

    // Some senders omit the type tag string for argument-less messages.
    if r.remaining() == 0 {
        return Ok(OscMessage { addr, args: Vec::new() });
    }

    let tags = r.string()?;
    let Some(tags) = tags.strip_prefix(',') else {
        return Err(OscError::MissingTypeTags);
    };

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        let arg = match tag {
            'i' => OscArg::Int(r.i32()?),
            'f' => OscArg::Float(f32::from_bits(r.u32()?)),
            's' | 'S' => OscArg::String(r.string()?),
            'b' => OscArg::Blob(r.blob()?),
            'h' => OscArg::Long(r.u64()? as i64),
            'd' => OscArg::Double(f64::from_bits(r.u64()?)),
            't' => OscArg::Time(r.u64()?),
            'c' => {
                let offset = r.pos;
                let code = r.u32()?;
                OscArg::Char(char::from_u32(code).ok_or(OscError::BadString(offset))?)
            }
            'T' => OscArg::Bool(true),
            'F' => OscArg::Bool(false),
            'N' => OscArg::Nil,
            'I' => OscArg::Impulse,
            // Array delimiters carry no data; array items are kept inline.
            '[' | ']' => continue,
            other => return Err(OscError::UnknownTypeTag(other)),
        };
        args.push(arg);
    }

    Ok(OscMessage { addr, args })
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], OscError> {
        if self.remaining() < n {
            return Err(OscError::Truncated(self.pos));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, OscError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, OscError> {
        self.u32().map(|v| v as i32)
    }

    fn u64(&mut self) -> Result<u64, OscError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    fn string(&mut self) -> Result<String, OscError> {
        let start = self.pos;
        let rest = &self.buf[start..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(OscError::Truncated(start))?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| OscError::BadString(start))?
            .to_string();
        self.take(pad4(nul + 1))?;
        Ok(s)
    }

    fn blob(&mut self) -> Result<Vec<u8>, OscError> {
        let size = self.i32()?;
        if size < 0 {
            return Err(OscError::BadElementSize(size));
        }
        let size = size as usize;
        let padded = self.take(pad4(size))?;
        Ok(padded[..size].to_vec())
    }
}

fn pad4(n: usize) -> usize {
    (n + 3) & !3
}

// ── encoding ──────────────────────────────────────────────────────────────────

pub fn encode(msg: &OscMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    write_message(msg, &mut out);
    out
}

pub fn encode_packet(packet: &OscPacket) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    write_packet(packet, &mut out);
    out
}

fn write_packet(packet: &OscPacket, out: &mut Vec<u8>) {
    match packet {
        OscPacket::Message(msg) => write_message(msg, out),
        OscPacket::Bundle(bundle) => {
            out.extend_from_slice(BUNDLE_TAG);
            out.extend_from_slice(&bundle.timetag.to_be_bytes());
            for element in &bundle.content {
                let mut inner = Vec::new();
                write_packet(element, &mut inner);
                out.extend_from_slice(&(inner.len() as i32).to_be_bytes());
                out.extend_from_slice(&inner);
            }
        }
    }
}

fn write_message(msg: &OscMessage, out: &mut Vec<u8>) {
    write_string(&msg.addr, out);

    let mut tags = String::with_capacity(msg.args.len() + 1);
    tags.push(',');
    tags.extend(msg.args.iter().map(OscArg::tag));
    write_string(&tags, out);

    for arg in &msg.args {
        match arg {
            OscArg::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
            OscArg::Float(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
            OscArg::String(s) => write_string(s, out),
            OscArg::Blob(b) => {
                out.extend_from_slice(&(b.len() as i32).to_be_bytes());
                out.extend_from_slice(b);
                out.resize(pad4(out.len()), 0);
            }
            OscArg::Long(v) => out.extend_from_slice(&v.to_be_bytes()),
            OscArg::Double(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
            OscArg::Time(v) => out.extend_from_slice(&v.to_be_bytes()),
            OscArg::Char(c) => out.extend_from_slice(&(*c as u32).to_be_bytes()),
            OscArg::Bool(_) | OscArg::Nil | OscArg::Impulse => {}
        }
    }
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
    out.resize(pad4(out.len()), 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(content: Vec<OscPacket>) -> OscPacket {
        OscPacket::Bundle(OscBundle {
            timetag: TIMETAG_IMMEDIATE,
            content,
        })
    }

    #[test]
    fn test_string_padding() {
        // "/hb" + NUL fits exactly in 4 bytes, "/abcd" needs 8.
        let msg = OscMessage::new("/hb", vec![]);
        let encoded = encode(&msg);
        assert_eq!(&encoded[..4], b"/hb\0");
        assert_eq!(&encoded[4..8], b",\0\0\0");

        let msg = OscMessage::new("/abcd", vec![]);
        let encoded = encode(&msg);
        assert_eq!(&encoded[..8], b"/abcd\0\0\0");
    }

    #[test]
    fn test_decode_song_name_message() {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"/setlist/activeSongName\0");
        raw.extend_from_slice(b",s\0\0");
        raw.extend_from_slice(b"Intro\0\0\0");

        let packet = decode(&raw).unwrap();
        let msgs = packet.flatten();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].addr, "/setlist/activeSongName");
        assert_eq!(msgs[0].args, vec![OscArg::String("Intro".into())]);
    }

    #[test]
    fn test_decode_mixed_arguments() {
        let msg = OscMessage::new(
            "/mixed",
            vec![
                OscArg::Int(-7),
                OscArg::Float(0.25),
                OscArg::Blob(vec![1, 2, 3]),
                OscArg::Long(1 << 40),
                OscArg::Double(0.125),
                OscArg::Bool(true),
                OscArg::Bool(false),
                OscArg::Nil,
                OscArg::Char('x'),
                "tail".into(),
            ],
        );
        let decoded = decode(&encode(&msg)).unwrap();
        assert_eq!(decoded, OscPacket::Message(msg));
    }

    #[test]
    fn test_nested_bundle_flattens_in_order() {
        let song = OscMessage::new("/setlist/activeSongName", vec!["X".into()]);
        let playing = OscMessage::new("/global/isPlaying", vec![OscArg::Bool(true)]);
        let packet = bundle(vec![
            bundle(vec![song.clone().into()]),
            bundle(vec![playing.clone().into()]),
        ]);

        let decoded = decode(&encode_packet(&packet)).unwrap();
        assert_eq!(decoded.flatten(), vec![song, playing]);
    }

    #[test]
    fn test_deep_bundle_keeps_depth_first_order() {
        let a = OscMessage::new("/a", vec![]);
        let b = OscMessage::new("/b", vec![]);
        let c = OscMessage::new("/c", vec![]);
        let packet = bundle(vec![
            bundle(vec![a.clone().into(), bundle(vec![b.clone().into()])]),
            c.clone().into(),
        ]);
        let decoded = decode(&encode_packet(&packet)).unwrap();
        assert_eq!(decoded.flatten(), vec![a, b, c]);
    }

    #[test]
    fn test_message_without_type_tags() {
        let decoded = decode(b"/heartbeat\0\0").unwrap();
        assert_eq!(decoded, OscPacket::Message(OscMessage::new("/heartbeat", vec![])));
    }

    #[test]
    fn test_array_delimiters_are_inlined() {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"/a\0\0");
        raw.extend_from_slice(b",[ii]\0\0\0");
        raw.extend_from_slice(&1i32.to_be_bytes());
        raw.extend_from_slice(&2i32.to_be_bytes());
        let msgs = decode(&raw).unwrap().flatten();
        assert_eq!(msgs[0].args, vec![OscArg::Int(1), OscArg::Int(2)]);
    }

    #[test]
    fn test_malformed_packets_are_errors() {
        assert_eq!(decode(b""), Err(OscError::Truncated(0)));
        assert_eq!(decode(b"/abc\0"), Err(OscError::Misaligned(5)));
        assert!(matches!(decode(b"abc\0,\0\0\0"), Err(OscError::BadAddress(_))));
        assert_eq!(decode(b"/ab\0xyz\0"), Err(OscError::MissingTypeTags));
        assert_eq!(decode(b"/ab\0,q\0\0"), Err(OscError::UnknownTypeTag('q')));
        // Declares an int argument but carries no payload.
        assert_eq!(decode(b"/ab\0,i\0\0"), Err(OscError::Truncated(8)));
    }

    #[test]
    fn test_bad_bundle_element_size() {
        let mut raw = Vec::new();
        raw.extend_from_slice(BUNDLE_TAG);
        raw.extend_from_slice(&TIMETAG_IMMEDIATE.to_be_bytes());
        raw.extend_from_slice(&6i32.to_be_bytes());
        raw.extend_from_slice(b"/a\0\0,\0\0\0");
        assert_eq!(decode(&raw), Err(OscError::BadElementSize(6)));
    }

    #[test]
    fn test_bundle_depth_limit() {
        let mut packet: OscPacket = OscMessage::new("/leaf", vec![]).into();
        for _ in 0..=MAX_BUNDLE_DEPTH {
            packet = bundle(vec![packet]);
        }
        assert_eq!(decode(&encode_packet(&packet)), Err(OscError::TooDeep));
    }

    #[test]
    fn test_arg_coercions() {
        assert_eq!(OscArg::Int(1).as_bool(), Some(true));
        assert_eq!(OscArg::Float(0.0).as_bool(), Some(false));
        assert_eq!(OscArg::Bool(true).as_bool(), Some(true));
        assert_eq!(OscArg::Nil.as_bool(), None);
        assert_eq!(OscArg::Float(0.5).as_f64(), Some(0.5));
        assert_eq!(OscArg::Int(2).as_f64(), Some(2.0));
        assert_eq!(OscArg::String("x".into()).as_f64(), None);
        assert_eq!(OscArg::String("x".into()).as_str(), Some("x"));
    }
}
