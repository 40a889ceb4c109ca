use std::collections::HashMap;
use std::sync::LazyLock;

use crate::{Object, StringFormat};

/// Code points of PDFDocEncoding that differ from ISO Latin-1.
const PDF_DOC_DIFFERENCES: [(u8, Option<char>); 43] = [
    (0x18, Some('\u{02D8}')),
    (0x19, Some('\u{02C7}')),
    (0x1A, Some('\u{02C6}')),
    (0x1B, Some('\u{02D9}')),
    (0x1C, Some('\u{02DD}')),
    (0x1D, Some('\u{02DB}')),
    (0x1E, Some('\u{02DA}')),
    (0x1F, Some('\u{02DC}')),
    (0x7F, None),
    (0x80, Some('\u{2022}')),
    (0x81, Some('\u{2020}')),
    (0x82, Some('\u{2021}')),
    (0x83, Some('\u{2026}')),
    (0x84, Some('\u{2014}')),
    (0x85, Some('\u{2013}')),
    (0x86, Some('\u{0192}')),
    (0x87, Some('\u{2044}')),
    (0x88, Some('\u{2039}')),
    (0x89, Some('\u{203A}')),
    (0x8A, Some('\u{2212}')),
    (0x8B, Some('\u{2030}')),
    (0x8C, Some('\u{201E}')),
    (0x8D, Some('\u{201C}')),
    (0x8E, Some('\u{201D}')),
    (0x8F, Some('\u{2018}')),
    (0x90, Some('\u{2019}')),
    (0x91, Some('\u{201A}')),
    (0x92, Some('\u{2122}')),
    (0x93, Some('\u{FB01}')),
    (0x94, Some('\u{FB02}')),
    (0x95, Some('\u{0141}')),
    (0x96, Some('\u{0152}')),
    (0x97, Some('\u{0160}')),
    (0x98, Some('\u{0178}')),
    (0x99, Some('\u{017D}')),
    (0x9A, Some('\u{0131}')),
    (0x9B, Some('\u{0142}')),
    (0x9C, Some('\u{0153}')),
    (0x9D, Some('\u{0161}')),
    (0x9E, Some('\u{017E}')),
    (0x9F, None),
    (0xA0, Some('\u{20AC}')),
    (0xAD, None),
];

/// Byte to character table of PDFDocEncoding, built on first use.
static PDF_DOC_TO_CHAR: LazyLock<[Option<char>; 256]> = LazyLock::new(|| {
    let mut table = [None; 256];
    for (byte, slot) in table.iter_mut().enumerate() {
        *slot = char::from_u32(byte as u32);
    }
    for (byte, ch) in PDF_DOC_DIFFERENCES {
        table[byte as usize] = ch;
    }
    table
});

static CHAR_TO_PDF_DOC: LazyLock<HashMap<char, u8>> = LazyLock::new(|| {
    PDF_DOC_TO_CHAR
        .iter()
        .enumerate()
        .filter_map(|(byte, ch)| ch.map(|ch| (ch, byte as u8)))
        .collect()
});

/// PDFDocEncoding of `text`, or `None` if some character has no code.
pub fn try_encode_pdf_doc(text: &str) -> Option<Vec<u8>> {
    text.chars().map(|ch| CHAR_TO_PDF_DOC.get(&ch).copied()).collect()
}

/// PDFDocEncoding of `text`. Characters without a code are dropped.
pub fn encode_pdf_doc(text: &str) -> Vec<u8> {
    text.chars().filter_map(|ch| CHAR_TO_PDF_DOC.get(&ch).copied()).collect()
}

pub fn decode_pdf_doc(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&byte| PDF_DOC_TO_CHAR[byte as usize].unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// UTF-16BE with a leading byte order mark.
pub fn encode_utf16_be(text: &str) -> Vec<u8> {
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    bytes
}

/// A text string object: PDFDocEncoding where possible, UTF-16BE otherwise.
pub fn text_string(text: &str) -> Object {
    match try_encode_pdf_doc(text) {
        Some(bytes) => Object::String(bytes, StringFormat::Literal),
        None => Object::String(encode_utf16_be(text), StringFormat::Hexadecimal),
    }
}

/// Reads a text string in any of the encodings a PDF may use for one.
pub fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else if let Some(utf8) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        String::from_utf8_lossy(utf8).into_owned()
    } else {
        decode_pdf_doc(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin_text_stays_single_byte() {
        assert_eq!(
            text_string("caf\u{e9} \u{20ac}5"),
            Object::String(vec![b'c', b'a', b'f', 0xE9, b' ', 0xA0, b'5'], StringFormat::Literal)
        );
        assert_eq!(encode_pdf_doc("\u{2022}\u{fb01}"), vec![0x80, 0x93]);
    }

    #[test]
    fn other_scripts_use_utf16() {
        let Object::String(bytes, StringFormat::Hexadecimal) = text_string("\u{4e2d}a") else {
            panic!("expected a hexadecimal string");
        };
        assert_eq!(bytes, vec![0xFE, 0xFF, 0x4E, 0x2D, 0x00, 0x61]);
        assert_eq!(decode_text_string(&bytes), "\u{4e2d}a");
    }

    #[test]
    fn undefined_codes_are_not_encodable() {
        assert_eq!(try_encode_pdf_doc("\u{ad}"), None);
        assert_eq!(encode_pdf_doc("a\u{ad}b"), b"ab".to_vec());
        assert_eq!(decode_pdf_doc(&[0x7F]), "\u{fffd}");
    }

    #[test]
    fn decodes_every_flavour() {
        assert_eq!(decode_text_string(b"plain"), "plain");
        assert_eq!(decode_text_string(&[0xEF, 0xBB, 0xBF, 0xC3, 0xA9]), "\u{e9}");
        assert_eq!(decode_text_string(&[0x84, 0x8A]), "\u{2014}\u{2212}");
    }
}
