//! Shared primitives for reading and writing the little-endian, length
//! prefixed fields that make up every packet body.

use bytes::{Buf, BufMut, BytesMut};

use crate::Error;

/// Reads a `u16` length-prefixed, UTF-16LE encoded string.
///
/// Layout: `length: u16` (byte count of the encoded string, not character
/// count) followed by `length` bytes of UTF-16LE.
pub fn read_string(buf: &mut &[u8]) -> Result<String, Error> {
    if buf.len() < 2 {
        return Err(Error::Malformed("truncated string length"));
    }

    let len = buf.get_u16_le() as usize;
    if buf.len() < len {
        return Err(Error::Malformed("string body shorter than declared length"));
    }

    if len % 2 != 0 {
        return Err(Error::InvalidString);
    }

    let units: Vec<u16> = buf[..len]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();

    buf.advance(len);
    String::from_utf16(&units).map_err(|_| Error::InvalidString)
}

/// Writes a `u16` length-prefixed, UTF-16LE encoded string.
pub fn write_string(bytes: &mut BytesMut, value: &str) {
    let units: Vec<u16> = value.encode_utf16().collect();
    bytes.put_u16_le((units.len() * 2) as u16);
    for unit in units {
        bytes.put_u16_le(unit);
    }
}

/// Reads a `u16` count-prefixed list of `u16` length-prefixed strings.
pub fn read_string_list(buf: &mut &[u8]) -> Result<Vec<String>, Error> {
    if buf.len() < 2 {
        return Err(Error::Malformed("truncated list count"));
    }

    let count = buf.get_u16_le() as usize;
    let mut out = Vec::with_capacity(count.min(64));

    for _ in 0..count {
        if buf.is_empty() {
            return Err(Error::TruncatedList);
        }

        out.push(read_string(buf)?);
    }

    Ok(out)
}

/// Writes a `u16` count-prefixed list of `u16` length-prefixed strings.
pub fn write_string_list(bytes: &mut BytesMut, values: &[String]) {
    bytes.put_u16_le(values.len() as u16);
    for value in values {
        write_string(bytes, value);
    }
}

/// Reads a `u16` length-prefixed opaque byte blob.
///
/// Used for fields this codec must decode for forward compatibility but
/// does not interpret (SOH payloads, consent messages): see `spec.md` §9.
pub fn read_blob(buf: &mut &[u8]) -> Result<Vec<u8>, Error> {
    if buf.len() < 2 {
        return Err(Error::Malformed("truncated blob length"));
    }

    let len = buf.get_u16_le() as usize;
    if buf.len() < len {
        return Err(Error::Malformed("blob body shorter than declared length"));
    }

    let out = buf[..len].to_vec();
    buf.advance(len);
    Ok(out)
}

/// Writes a `u16` length-prefixed opaque byte blob.
pub fn write_blob(bytes: &mut BytesMut, value: &[u8]) {
    bytes.put_u16_le(value.len() as u16);
    bytes.extend_from_slice(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trip() {
        let mut bytes = BytesMut::new();
        write_string(&mut bytes, "client-box-01");

        let mut slice = &bytes[..];
        assert_eq!(read_string(&mut slice).unwrap(), "client-box-01");
        assert!(slice.is_empty());
    }

    #[test]
    fn empty_string_round_trip() {
        let mut bytes = BytesMut::new();
        write_string(&mut bytes, "");

        let mut slice = &bytes[..];
        assert_eq!(read_string(&mut slice).unwrap(), "");
    }

    #[test]
    fn string_list_round_trip() {
        let values = vec!["host-a:3389".to_string(), "host-b:3389".to_string()];

        let mut bytes = BytesMut::new();
        write_string_list(&mut bytes, &values);

        let mut slice = &bytes[..];
        assert_eq!(read_string_list(&mut slice).unwrap(), values);
    }

    #[test]
    fn truncated_string_is_malformed() {
        let mut bytes = BytesMut::new();
        bytes.put_u16_le(10);
        bytes.put_u16_le(b'x' as u16);

        let mut slice = &bytes[..];
        assert!(matches!(read_string(&mut slice), Err(Error::Malformed(_))));
    }
}
