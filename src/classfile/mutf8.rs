//! Modified UTF-8, the string encoding of `CONSTANT_Utf8` entries.
//!
//! Differences from standard UTF-8:
//! - U+0000 is encoded as `0xC0 0x80`
//! - supplementary characters are encoded as a surrogate pair, each half as
//!   a three byte sequence

use std::borrow::Cow;

/// Decode a modified UTF-8 byte string.
///
/// Returns `None` on a malformed sequence. Lone surrogates decode to
/// U+FFFD; the raw bytes in the constant pool are never rewritten, so this
/// only affects name comparisons.
pub fn decode(bytes: &[u8]) -> Option<Cow<'_, str>> {
    if bytes.iter().all(|&b| b != 0 && b < 0x80) {
        // ASCII is identical in both encodings.
        return std::str::from_utf8(bytes).ok().map(Cow::Borrowed);
    }

    let mut out = String::with_capacity(bytes.len());
    let mut pos = 0;
    while pos < bytes.len() {
        let b = bytes[pos];
        if b == 0 {
            return None;
        }
        if b & 0x80 == 0 {
            out.push(b as char);
            pos += 1;
        } else if b & 0xe0 == 0xc0 {
            let b2 = *bytes.get(pos + 1)?;
            if b2 & 0xc0 != 0x80 {
                return None;
            }
            let cp = ((b as u32 & 0x1f) << 6) | (b2 as u32 & 0x3f);
            out.push(char::from_u32(cp)?);
            pos += 2;
        } else if b & 0xf0 == 0xe0 {
            let cp = three_byte(bytes, pos)?;
            if (0xD800..=0xDBFF).contains(&cp) {
                if let Some(low) = three_byte(bytes, pos + 3) {
                    if (0xDC00..=0xDFFF).contains(&low) {
                        let supplementary = 0x10000 + ((cp - 0xD800) << 10) + (low - 0xDC00);
                        out.push(char::from_u32(supplementary)?);
                        pos += 6;
                        continue;
                    }
                }
                out.push('\u{FFFD}');
            } else {
                out.push(char::from_u32(cp).unwrap_or('\u{FFFD}'));
            }
            pos += 3;
        } else {
            return None;
        }
    }
    Some(Cow::Owned(out))
}

fn three_byte(bytes: &[u8], pos: usize) -> Option<u32> {
    let b1 = *bytes.get(pos)?;
    let b2 = *bytes.get(pos + 1)?;
    let b3 = *bytes.get(pos + 2)?;
    if b1 & 0xf0 != 0xe0 || b2 & 0xc0 != 0x80 || b3 & 0xc0 != 0x80 {
        return None;
    }
    Some(((b1 as u32 & 0x0f) << 12) | ((b2 as u32 & 0x3f) << 6) | (b3 as u32 & 0x3f))
}

/// Encode a string as modified UTF-8.
pub fn encode(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for c in s.chars() {
        let cp = c as u32;
        match cp {
            0x01..=0x7f => out.push(cp as u8),
            0x00 | 0x80..=0x7ff => {
                out.push(0xc0 | (cp >> 6) as u8);
                out.push(0x80 | (cp & 0x3f) as u8);
            }
            0x800..=0xffff => push_three_byte(&mut out, cp),
            _ => {
                let v = cp - 0x10000;
                push_three_byte(&mut out, 0xD800 + (v >> 10));
                push_three_byte(&mut out, 0xDC00 + (v & 0x3ff));
            }
        }
    }
    out
}

fn push_three_byte(out: &mut Vec<u8>, cp: u32) {
    out.push(0xe0 | (cp >> 12) as u8);
    out.push(0x80 | ((cp >> 6) & 0x3f) as u8);
    out.push(0x80 | (cp & 0x3f) as u8);
}
