use log::warn;
use weezl::{BitOrder, decode::Decoder};

use crate::error::DecompressError;

/// Decodes LZWDecode data. `early_change` is the `/EarlyChange` parameter, on by default.
pub fn decode(data: &[u8], early_change: bool) -> Result<Vec<u8>, DecompressError> {
    let mut decoder = if early_change {
        Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
    } else {
        Decoder::new(BitOrder::Msb, 8)
    };

    let mut output = Vec::new();
    // `decode` stops at the end of the input; `decode_all` would reject a missing EOD.
    let status = decoder.into_vec(&mut output).decode(data).status;
    match status {
        Ok(_) if decoder.has_ended() => {}
        Ok(_) => warn!("LZW data ended without an end-of-data code"),
        Err(err) => return Err(DecompressError::Lzw(err.to_string())),
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weezl::encode::Encoder;

    #[test]
    fn decodes_tiff_style_codes() {
        let text = b"-----A---B-----A---B-----A---B";
        let encoded = Encoder::with_tiff_size_switch(BitOrder::Msb, 8)
            .encode(text)
            .unwrap();
        assert_eq!(decode(&encoded, true).unwrap(), text.to_vec());
    }

    #[test]
    fn decodes_without_early_change() {
        let text = b"abababababababab";
        let encoded = Encoder::new(BitOrder::Msb, 8).encode(text).unwrap();
        assert_eq!(decode(&encoded, false).unwrap(), text.to_vec());
    }

    #[test]
    fn missing_end_of_data_keeps_the_output() {
        // Clear table, 'A', 'B' as 9-bit codes, then padding and no EOD.
        let data = [0x80, 0x10, 0x48, 0x40];
        assert_eq!(decode(&data, true).unwrap(), b"AB".to_vec());
        assert_eq!(decode(&data, false).unwrap(), b"AB".to_vec());
    }

    #[test]
    fn truncated_stream_yields_a_prefix() {
        let text: Vec<u8> = (0..60u8).map(|i| b'a' + i % 7).collect();
        let encoded = Encoder::with_tiff_size_switch(BitOrder::Msb, 8)
            .encode(&text)
            .unwrap();
        for cut in 1..=3 {
            let decoded = decode(&encoded[..encoded.len() - cut], true).unwrap();
            assert!(text.starts_with(&decoded), "cut {cut}");
        }
    }

    #[test]
    fn code_beyond_the_table_is_an_error() {
        // Clear table, then code 300 while only 258 entries exist.
        let data = [0x80, 0x4B, 0x00];
        assert!(decode(&data, true).is_err());
    }
}
