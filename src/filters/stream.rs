use std::io::{self, Write};
use std::mem;

use flate2::Compression;
use flate2::write::ZlibEncoder;

use crate::Result;
use crate::encryption::crypt_filters::StreamEncryptor;

/// Push-style encoder combining Flate compression and encryption, in that order.
///
/// Bytes go in through [`StreamEncoder::push`]; whatever is ready to be written
/// comes back out. [`StreamEncoder::finish`] returns the tail.
pub struct StreamEncoder {
    deflate: Option<ZlibEncoder<Vec<u8>>>,
    cipher: Option<Box<dyn StreamEncryptor>>,
}

impl StreamEncoder {
    pub fn new(compression: Option<Compression>, cipher: Option<Box<dyn StreamEncryptor>>) -> Self {
        StreamEncoder {
            deflate: compression.map(|level| ZlibEncoder::new(Vec::new(), level)),
            cipher,
        }
    }

    pub fn is_compressing(&self) -> bool {
        self.deflate.is_some()
    }

    pub fn push(&mut self, data: &[u8]) -> io::Result<Vec<u8>> {
        let compressed = match &mut self.deflate {
            Some(encoder) => {
                encoder.write_all(data)?;
                mem::take(encoder.get_mut())
            }
            None => data.to_vec(),
        };
        Ok(match &mut self.cipher {
            Some(cipher) => cipher.update(&compressed),
            None => compressed,
        })
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        let tail = match self.deflate {
            Some(encoder) => encoder.finish()?,
            None => Vec::new(),
        };
        match self.cipher {
            Some(mut cipher) => {
                let mut out = cipher.update(&tail);
                out.extend(cipher.finish()?);
                Ok(out)
            }
            None => Ok(tail),
        }
    }
}

/// Maps the writer's level setting to a Flate level; `None` means no compression.
pub fn compression_for_level(level: i32) -> Option<Compression> {
    match level {
        0 => None,
        1..=9 => Some(Compression::new(level as u32)),
        _ => Some(Compression::default()),
    }
}

/// A sink that encodes everything written to it and counts the encoded bytes.
pub struct FilteredStreamWriter<W: Write> {
    inner: W,
    encoder: StreamEncoder,
    written: u64,
}

impl<W: Write> FilteredStreamWriter<W> {
    pub fn new(inner: W, encoder: StreamEncoder) -> Self {
        FilteredStreamWriter {
            inner,
            encoder,
            written: 0,
        }
    }

    /// Encoded bytes passed to the inner writer so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Flushes the encoders and returns the inner writer with the total encoded length.
    pub fn finish(mut self) -> Result<(W, u64)> {
        let tail = self.encoder.finish()?;
        self.inner.write_all(&tail)?;
        self.inner.flush()?;
        Ok((self.inner, self.written + tail.len() as u64))
    }
}

impl<W: Write> Write for FilteredStreamWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let out = self.encoder.push(buf)?;
        self.inner.write_all(&out)?;
        self.written += out.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::crypt_filters::{Aes128CryptFilter, CryptFilter};
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    #[test]
    fn compressed_output_inflates() {
        let encoder = StreamEncoder::new(compression_for_level(6), None);
        let mut writer = FilteredStreamWriter::new(Vec::new(), encoder);
        for _ in 0..100 {
            writer.write_all(b"0 0 m 100 100 l S\n").unwrap();
        }
        let (bytes, length) = writer.finish().unwrap();
        assert_eq!(bytes.len() as u64, length);

        let mut inflated = String::new();
        ZlibDecoder::new(&bytes[..]).read_to_string(&mut inflated).unwrap();
        assert_eq!(inflated, "0 0 m 100 100 l S\n".repeat(100));
    }

    #[test]
    fn encrypted_length_counts_iv_and_padding() {
        let key = [7u8; 16];
        let cipher = Aes128CryptFilter.encryptor(&key).unwrap();
        let mut writer = FilteredStreamWriter::new(Vec::new(), StreamEncoder::new(None, Some(cipher)));
        writer.write_all(&[1u8; 20]).unwrap();
        let (bytes, length) = writer.finish().unwrap();
        assert_eq!(length, 48);
        assert_eq!(Aes128CryptFilter.decrypt(&key, &bytes).unwrap(), vec![1u8; 20]);
    }

    #[test]
    fn level_zero_disables_compression() {
        assert!(compression_for_level(0).is_none());
        assert_eq!(compression_for_level(-1), Some(Compression::default()));
    }
}
