//! Wire primitives for the checkpoint format.
//!
//! Fixed-width little-endian integers plus length-prefixed UTF-8 strings,
//! read from and written to `std::io` streams so category codecs compose
//! with files, buffers, and test cursors alike. All failures surface as
//! `io::Error` (`UnexpectedEof` for truncation, `InvalidData` for malformed
//! content); the checkpoint layer maps them to its own error type.

use std::io::{self, Read, Write};

/// Strings longer than this are rejected on decode. Nothing legitimate in
/// a profile or submission body approaches it; a longer prefix means the
/// stream is corrupt and would otherwise trigger a huge allocation.
const MAX_STRING_LEN: usize = 1 << 20;

// ---------------------------------------------------------------------------
// Integers
// ---------------------------------------------------------------------------

pub(crate) fn write_u8(w: &mut dyn Write, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

pub(crate) fn read_u8(r: &mut dyn Read) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn write_i16(w: &mut dyn Write, v: i16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub(crate) fn read_i16(r: &mut dyn Read) -> io::Result<i16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(i16::from_le_bytes(buf))
}

pub(crate) fn write_i32(w: &mut dyn Write, v: i32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub(crate) fn read_i32(r: &mut dyn Read) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub(crate) fn write_i64(w: &mut dyn Write, v: i64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub(crate) fn read_i64(r: &mut dyn Read) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

pub(crate) fn write_u16(w: &mut dyn Write, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub(crate) fn read_u16(r: &mut dyn Read) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

/// `[len: u32 LE] [bytes: UTF-8]`.
pub(crate) fn write_str(w: &mut dyn Write, s: &str) -> io::Result<()> {
    let len = u32::try_from(s.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "string too long for u32 prefix"))?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(s.as_bytes())
}

pub(crate) fn read_str(r: &mut dyn Read) -> io::Result<String> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    let len = u32::from_le_bytes(buf) as usize;
    if len > MAX_STRING_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("string length {len} exceeds limit {MAX_STRING_LEN}"),
        ));
    }
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("invalid UTF-8: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    // === Integers ==========================================================

    #[test]
    fn integer_roundtrips() {
        let mut buf = Vec::new();
        write_u8(&mut buf, 0xAB).unwrap();
        write_i16(&mut buf, -2).unwrap();
        write_i32(&mut buf, -1).unwrap();
        write_i64(&mut buf, i64::MIN).unwrap();
        write_u16(&mut buf, 65_535).unwrap();

        let mut r = Cursor::new(buf);
        assert_eq!(read_u8(&mut r).unwrap(), 0xAB);
        assert_eq!(read_i16(&mut r).unwrap(), -2);
        assert_eq!(read_i32(&mut r).unwrap(), -1);
        assert_eq!(read_i64(&mut r).unwrap(), i64::MIN);
        assert_eq!(read_u16(&mut r).unwrap(), 65_535);
    }

    #[test]
    fn truncated_integer_is_unexpected_eof() {
        let mut r = Cursor::new(vec![0x01, 0x02]);
        let err = read_i32(&mut r).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    // === Strings ===========================================================

    #[test]
    fn string_roundtrip() {
        let mut buf = Vec::new();
        write_str(&mut buf, "Dawn, Lake Bled").unwrap();
        write_str(&mut buf, "").unwrap();
        write_str(&mut buf, "čaj — 茶").unwrap();

        let mut r = Cursor::new(buf);
        assert_eq!(read_str(&mut r).unwrap(), "Dawn, Lake Bled");
        assert_eq!(read_str(&mut r).unwrap(), "");
        assert_eq!(read_str(&mut r).unwrap(), "čaj — 茶");
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        let err = read_str(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&[0xFF, 0xFE]);
        let err = read_str(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_string_body_is_unexpected_eof() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_le_bytes());
        buf.extend_from_slice(b"abc");
        let err = read_str(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
