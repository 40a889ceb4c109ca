//! Stream filters: decoding the standard PDF filters and encoding streams for output.

use std::io::Read;

use flate2::read::ZlibDecoder;
use log::warn;

use crate::encryption::EncryptionState;
use crate::error::DecompressError;
use crate::{Dictionary, Error, Object, ObjectId, Result, Stream};

mod lzw;
pub mod png;
mod stream;

pub use self::stream::{FilteredStreamWriter, StreamEncoder, compression_for_level};

/// Undoes every filter listed in `/Filter`, applying `/DecodeParms` where given.
///
/// `/Crypt` entries are skipped: decryption happens before decoding.
pub fn decode(dict: &Dictionary, data: &[u8]) -> Result<Vec<u8>> {
    let filters: Vec<&[u8]> = match dict.get(b"Filter") {
        Err(_) | Ok(Object::Null) => return Ok(data.to_vec()),
        Ok(Object::Name(name)) => vec![name.as_slice()],
        Ok(Object::Array(names)) => names.iter().map(Object::as_name).collect::<Result<_>>()?,
        Ok(other) => {
            return Err(Error::ObjectType {
                expected: "Name or Array",
                found: other.enum_variant(),
            });
        }
    };

    let params: Vec<Option<&Dictionary>> = match dict.get(b"DecodeParms") {
        Ok(Object::Dictionary(params)) => vec![Some(params)],
        Ok(Object::Array(params)) => params.iter().map(|params| params.as_dict().ok()).collect(),
        _ => Vec::new(),
    };

    let mut output = data.to_vec();
    for (index, filter) in filters.iter().enumerate() {
        let params = params.get(index).copied().flatten();
        output = decode_filter(filter, params, &output)?;
    }
    Ok(output)
}

/// Applies a single decoding filter.
pub fn decode_filter(filter: &[u8], params: Option<&Dictionary>, data: &[u8]) -> Result<Vec<u8>> {
    let decoded = match filter {
        b"FlateDecode" | b"Fl" => apply_predictor(flate_decode(data)?, params)?,
        b"LZWDecode" | b"LZW" => {
            let early_change = params
                .and_then(|params| params.get(b"EarlyChange").and_then(Object::as_i64).ok())
                .unwrap_or(1)
                != 0;
            apply_predictor(lzw::decode(data, early_change)?, params)?
        }
        b"ASCIIHexDecode" | b"AHx" => ascii_hex_decode(data)?,
        b"ASCII85Decode" | b"A85" => ascii85_decode(data)?,
        b"RunLengthDecode" | b"RL" => run_length_decode(data),
        b"Crypt" => data.to_vec(),
        other => return Err(Error::UnsupportedFilter(String::from_utf8_lossy(other).into_owned())),
    };
    Ok(decoded)
}

fn flate_decode(data: &[u8]) -> std::result::Result<Vec<u8>, DecompressError> {
    let mut output = Vec::with_capacity(data.len() * 2);
    ZlibDecoder::new(data)
        .read_to_end(&mut output)
        .map_err(|err| DecompressError::Flate(err.to_string()))?;
    Ok(output)
}

fn param(params: Option<&Dictionary>, key: &[u8], default: i64) -> i64 {
    params
        .and_then(|params| params.get(key).and_then(Object::as_i64).ok())
        .unwrap_or(default)
}

fn apply_predictor(data: Vec<u8>, params: Option<&Dictionary>) -> std::result::Result<Vec<u8>, DecompressError> {
    let predictor = param(params, b"Predictor", 1);
    if predictor == 1 {
        return Ok(data);
    }

    let columns = param(params, b"Columns", 1);
    let colors = param(params, b"Colors", 1);
    let bits = param(params, b"BitsPerComponent", 8);
    if !(1..=1 << 20).contains(&columns) || !(1..=32).contains(&colors) || ![1, 2, 4, 8, 16].contains(&bits) {
        return Err(DecompressError::Predictor(format!(
            "unusable parameters: {columns} columns, {colors} colors, {bits} bits"
        )));
    }
    let (columns, colors, bits) = (columns as usize, colors as usize, bits as usize);
    let bytes_per_pixel = (colors * bits).div_ceil(8);
    let bytes_per_row = (columns * colors * bits).div_ceil(8);

    match predictor {
        2 => tiff_predictor(data, colors, bits, bytes_per_row),
        10..=15 => png::decode_frame(&data, bytes_per_pixel, bytes_per_row),
        other => Err(DecompressError::Predictor(format!("unknown predictor {other}"))),
    }
}

fn tiff_predictor(
    mut data: Vec<u8>, colors: usize, bits: usize, bytes_per_row: usize,
) -> std::result::Result<Vec<u8>, DecompressError> {
    match bits {
        8 => {
            for row in data.chunks_mut(bytes_per_row) {
                for i in colors..row.len() {
                    row[i] = row[i].wrapping_add(row[i - colors]);
                }
            }
        }
        16 => {
            let stride = colors * 2;
            for row in data.chunks_mut(bytes_per_row) {
                let mut i = stride;
                while i + 1 < row.len() {
                    let left = u16::from_be_bytes([row[i - stride], row[i - stride + 1]]);
                    let value = u16::from_be_bytes([row[i], row[i + 1]]).wrapping_add(left);
                    row[i..i + 2].copy_from_slice(&value.to_be_bytes());
                    i += 2;
                }
            }
        }
        other => {
            return Err(DecompressError::Predictor(format!(
                "TIFF predictor with {other} bits per component"
            )));
        }
    }
    Ok(data)
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\r' | b'\n' | b'\x0C' | b'\0')
}

fn ascii_hex_decode(data: &[u8]) -> std::result::Result<Vec<u8>, DecompressError> {
    let mut output = Vec::with_capacity(data.len() / 2);
    let mut high: Option<u8> = None;
    for &byte in data {
        if byte == b'>' {
            break;
        }
        if is_whitespace(byte) {
            continue;
        }
        let value = hex_value(byte).ok_or(DecompressError::AsciiHex(byte))?;
        match high.take() {
            Some(high) => output.push(high << 4 | value),
            None => high = Some(value),
        }
    }
    if let Some(high) = high {
        output.push(high << 4);
    }
    Ok(output)
}

fn ascii85_decode(data: &[u8]) -> std::result::Result<Vec<u8>, DecompressError> {
    let mut output = Vec::with_capacity(data.len() * 4 / 5);
    let mut group = [0u8; 5];
    let mut count = 0;

    let data = data.strip_prefix(b"<~").unwrap_or(data);
    for &byte in data {
        match byte {
            b'~' => break,
            b'z' if count == 0 => output.extend_from_slice(&[0; 4]),
            b'z' => return Err(DecompressError::Ascii85("'z' inside a group")),
            b'!'..=b'u' => {
                group[count] = byte - b'!';
                count += 1;
                if count == 5 {
                    output.extend_from_slice(&ascii85_group(&group)?);
                    count = 0;
                }
            }
            byte if is_whitespace(byte) => {}
            _ => return Err(DecompressError::Ascii85("character outside the alphabet")),
        }
    }

    match count {
        0 => {}
        1 => return Err(DecompressError::Ascii85("final group has a single character")),
        _ => {
            group[count..].fill(b'u' - b'!');
            let bytes = ascii85_group(&group)?;
            output.extend_from_slice(&bytes[..count - 1]);
        }
    }
    Ok(output)
}

fn ascii85_group(group: &[u8; 5]) -> std::result::Result<[u8; 4], DecompressError> {
    let value = group
        .iter()
        .try_fold(0u32, |acc, &digit| acc.checked_mul(85)?.checked_add(u32::from(digit)))
        .ok_or(DecompressError::Ascii85("group value overflows"))?;
    Ok(value.to_be_bytes())
}

fn run_length_decode(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() * 2);
    let mut i = 0;
    while i < data.len() {
        let length = data[i];
        i += 1;
        match length {
            128 => break,
            0..=127 => {
                let end = (i + length as usize + 1).min(data.len());
                output.extend_from_slice(&data[i..end]);
                i = end;
            }
            _ => {
                if let Some(&byte) = data.get(i) {
                    output.extend(std::iter::repeat_n(byte, 257 - length as usize));
                }
                i += 1;
            }
        }
    }
    if i > data.len() {
        warn!("run-length data ended inside a run");
    }
    output
}

/// Encodes streams for output: compression first, then the document's crypt filter.
#[derive(Clone, Copy)]
pub struct StreamPipeline<'a> {
    pub compression_level: i32,
    pub encryption: Option<&'a EncryptionState>,
}

impl StreamPipeline<'_> {
    /// Chooses the filters for a stream about to be written. Returns the updated
    /// dictionary and the encoder to push the raw content through. `/Length` is
    /// left for the caller to set.
    pub fn encoder_for(&self, id: ObjectId, stream: &Stream) -> Result<(Dictionary, StreamEncoder)> {
        let mut dict = stream.dict.clone();
        let level = stream.compression_level.unwrap_or(self.compression_level);

        let compression = if stream.allows_compression && !dict.has(b"Filter") {
            compression_for_level(level)
        } else {
            None
        };
        if compression.is_some() {
            dict.set("Filter", "FlateDecode");
        }

        let cipher = match self.encryption {
            Some(state) => match state.stream_filter_for_write(&mut dict)? {
                Some(filter) => {
                    let key = state.object_key(filter.as_ref(), id)?;
                    Some(filter.encryptor(&key)?)
                }
                None => None,
            },
            None => None,
        };
        Ok((dict, StreamEncoder::new(compression, cipher)))
    }

    /// Encodes a whole stream at once; the returned dictionary carries the final `/Length`.
    pub fn encode(&self, id: ObjectId, stream: &Stream) -> Result<(Dictionary, Vec<u8>)> {
        let (mut dict, mut encoder) = self.encoder_for(id, stream)?;
        let raw = stream.raw_content()?;
        let mut data = encoder.push(&raw)?;
        data.extend(encoder.finish()?);
        dict.set("Length", data.len());
        Ok((dict, data))
    }
}
