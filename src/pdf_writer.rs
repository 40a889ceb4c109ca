use std::io::{self, Read, Write};

use log::{debug, trace};
use rand::Rng;

use crate::encryption::{EncryptionState, StandardSecurityHandler};
use crate::error::UsageError;
use crate::filters::{StreamEncoder, StreamPipeline};
use crate::object_stream::ObjectStreamBuilder;
use crate::reader::PdfReader;
use crate::reference_table::{IndirectReferenceTable, Location};
use crate::save_options::{EncryptionConfig, SaveOptions};
use crate::writer::{CountingWrite, Writer};
use crate::{Dictionary, Object, ObjectId, Result, Stream, StringFormat};

/// Where indirect objects go. Implemented by [`PdfWriter`]; the page tree and the
/// copy engine only need this much of it.
pub trait IndirectObjectSink {
    /// Reserves the next object number.
    fn allocate(&mut self) -> Result<ObjectId>;

    /// Writes `object` under a previously allocated `id`.
    fn add_to_body_with_id(&mut self, object: Object, id: ObjectId) -> Result<()>;

    fn add_to_body(&mut self, object: Object) -> Result<ObjectId> {
        let id = self.allocate()?;
        self.add_to_body_with_id(object, id)?;
        Ok(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Nothing written yet; settings can still change.
    Open,
    Writing,
    /// A [`StreamWriter`] is pushing content.
    StreamOpen,
    Closed,
}

struct WriterEncryption {
    state: EncryptionState,
    /// The trailer's `/Encrypt` value.
    reference: Object,
}

struct IncrementalBase {
    prev: u64,
}

/// Writes a PDF file front to back: header, body objects as they are added, then
/// the cross-reference section and trailer on [`PdfWriter::close`].
pub struct PdfWriter<W: Write> {
    target: CountingWrite<W>,
    options: SaveOptions,
    state: WriterState,
    table: IndirectReferenceTable,
    object_stream: Option<ObjectStreamBuilder>,
    encryption: Option<WriterEncryption>,
    file_id: Option<[Vec<u8>; 2]>,
    incremental: Option<IncrementalBase>,
}

impl<W: Write> PdfWriter<W> {
    pub fn new(target: W, options: SaveOptions) -> PdfWriter<W> {
        PdfWriter {
            target: CountingWrite::new(target),
            file_id: options.file_id.clone(),
            options,
            state: WriterState::Open,
            table: IndirectReferenceTable::new(),
            object_stream: None,
            encryption: None,
            incremental: None,
        }
    }

    /// Starts an incremental update of `reader`'s document. The original bytes are
    /// copied to `target` first; object numbering continues after the source's
    /// `/Size` and a replaced object keeps its number. Encrypted sources stay
    /// encrypted with their existing key.
    pub fn incremental(target: W, reader: &PdfReader, options: SaveOptions) -> Result<PdfWriter<W>> {
        let source = reader.source();
        let mut target = CountingWrite::new(target);
        target.write_all(source)?;
        if !source.ends_with(b"\n") {
            target.write_all(b"\n")?;
        }

        let encryption = match (reader.encryption_state(), reader.trailer.get(b"Encrypt")) {
            (Some(state), Ok(reference)) => Some(WriterEncryption {
                state: state.clone(),
                reference: reference.clone(),
            }),
            _ => None,
        };
        let file_id = reader
            .trailer
            .get(b"ID")
            .and_then(Object::as_array)
            .ok()
            .and_then(|ids| match ids.as_slice() {
                [first, second] => Some([first.as_str().ok()?.to_vec(), second.as_str().ok()?.to_vec()]),
                _ => None,
            })
            .or_else(|| options.file_id.clone());

        debug!("incremental update after {} source bytes", source.len());
        Ok(PdfWriter {
            target,
            options,
            state: WriterState::Writing,
            table: IndirectReferenceTable::starting_at(reader.size()),
            object_stream: None,
            encryption,
            file_id,
            incremental: Some(IncrementalBase {
                prev: reader.xref_start() as u64,
            }),
        })
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn options(&self) -> &SaveOptions {
        &self.options
    }

    pub fn bytes_written(&self) -> u64 {
        self.target.bytes_written()
    }

    pub fn is_written(&self, id: ObjectId) -> bool {
        self.table.is_written(id)
    }

    pub fn set_full_compression(&mut self, full_compression: bool) -> Result<()> {
        self.check_settings_open()?;
        self.options.full_compression = full_compression;
        Ok(())
    }

    pub fn set_compression_level(&mut self, level: i32) -> Result<()> {
        self.check_settings_open()?;
        self.options.compression_level = level.clamp(-1, 9);
        Ok(())
    }

    pub fn set_encryption(&mut self, config: Option<EncryptionConfig>) -> Result<()> {
        self.check_settings_open()?;
        self.options.encryption = config;
        Ok(())
    }

    fn check_settings_open(&self) -> Result<()> {
        match self.state {
            WriterState::Open => Ok(()),
            WriterState::Closed => Err(UsageError::WriterClosed.into()),
            _ => Err(UsageError::SettingsLocked.into()),
        }
    }

    pub fn allocate_number(&mut self) -> Result<ObjectId> {
        if self.state == WriterState::Closed {
            return Err(UsageError::WriterClosed.into());
        }
        Ok(self.table.allocate())
    }

    pub fn add_to_body(&mut self, object: Object) -> Result<ObjectId> {
        let id = self.allocate_number()?;
        self.add_to_body_with_id(object, id)
    }

    pub fn add_to_body_with_id(&mut self, object: Object, id: ObjectId) -> Result<ObjectId> {
        self.ensure_writing()?;
        if self.table.is_written(id) {
            return Err(UsageError::ObjectAlreadyWritten(id).into());
        }
        self.write_body_object(object, id)?;
        Ok(id)
    }

    /// Opens a stream whose content is pushed through the returned writer.
    /// Its `/Length` becomes an indirect object written after the stream.
    pub fn begin_stream(&mut self, dict: Dictionary) -> Result<StreamWriter<'_, W>> {
        let id = self.allocate_number()?;
        self.begin_stream_with_id(dict, id)
    }

    pub fn begin_stream_with_id(&mut self, dict: Dictionary, id: ObjectId) -> Result<StreamWriter<'_, W>> {
        self.ensure_writing()?;
        if self.table.is_written(id) {
            return Err(UsageError::ObjectAlreadyWritten(id).into());
        }

        let mut template = Object::Stream(Stream::new(dict, Vec::new()));
        if let Some(encryption) = &self.encryption {
            encryption.state.encrypt_strings(id, &mut template)?;
        }
        let template = template.as_stream()?;
        let (mut dict, encoder) = self.pipeline().encoder_for(id, template)?;
        let length_id = self.table.allocate();
        dict.set("Length", length_id);

        let offset = self.target.bytes_written();
        writeln!(self.target, "{} {} obj", id.0, id.1)?;
        Writer::write_dictionary(&mut self.target, &dict)?;
        self.target.write_all(b"\nstream\n")?;
        self.table.record(id, Location::Offset(offset))?;
        self.state = WriterState::StreamOpen;
        trace!("stream {} {} opened at {offset}", id.0, id.1);

        Ok(StreamWriter {
            writer: self,
            id,
            length_id,
            encoder: Some(encoder),
            length: 0,
        })
    }

    /// Copies everything `source` yields into a new stream.
    pub fn add_stream_from_reader<R: Read>(&mut self, dict: Dictionary, mut source: R) -> Result<ObjectId> {
        let mut stream = self.begin_stream(dict)?;
        io::copy(&mut source, &mut stream)?;
        stream.finish()
    }

    /// Finishes the file: pending object stream, cross-reference section and trailer.
    pub fn close(&mut self, root: ObjectId, info: Option<ObjectId>) -> Result<()> {
        self.ensure_writing()?;
        self.flush_object_stream()?;

        // Size is filled in once the section is known.
        let mut trailer = dictionary! { "Size" => 0, "Root" => root };
        if let Some(info) = info {
            trailer.set("Info", info);
        }
        if let Some([first, second]) = &self.file_id {
            trailer.set(
                "ID",
                vec![
                    Object::String(first.clone(), StringFormat::Hexadecimal),
                    Object::String(second.clone(), StringFormat::Hexadecimal),
                ],
            );
        }
        if let Some(encryption) = &self.encryption {
            trailer.set("Encrypt", encryption.reference.clone());
        }
        if let Some(base) = &self.incremental {
            trailer.set("Prev", base.prev as i64);
        }

        let xref_start = self.target.bytes_written();
        if self.options.full_compression {
            self.write_xref_stream(trailer, xref_start)?;
        } else {
            let xref = self.section_xref();
            trailer.set("Size", i64::from(xref.size));
            xref.write_table(&mut self.target)?;
            self.target.write_all(b"trailer\n")?;
            Writer::write_dictionary(&mut self.target, &trailer)?;
            self.target.write_all(b"\n")?;
            debug!("xref table with {} entries written at {xref_start}", xref.len());
        }
        write!(self.target, "startxref\n{xref_start}\n%%EOF\n")?;
        self.target.flush()?;
        self.state = WriterState::Closed;
        Ok(())
    }

    /// The target, once the writer is no longer needed.
    pub fn into_inner(self) -> W {
        self.target.into_inner()
    }

    fn pipeline(&self) -> StreamPipeline<'_> {
        StreamPipeline {
            compression_level: self.options.compression_level,
            encryption: self.encryption.as_ref().map(|encryption| &encryption.state),
        }
    }

    fn section_xref(&self) -> crate::xref::Xref {
        if self.incremental.is_some() {
            self.table.update_xref()
        } else {
            self.table.full_xref()
        }
    }

    /// Writes the header and the encryption dictionary on first use.
    fn ensure_writing(&mut self) -> Result<()> {
        match self.state {
            WriterState::Writing => Ok(()),
            WriterState::Closed => Err(UsageError::WriterClosed.into()),
            WriterState::StreamOpen => Err(UsageError::StreamInProgress.into()),
            WriterState::Open => {
                let version = self.options.effective_version();
                writeln!(self.target, "%PDF-{version}")?;
                self.target.write_all(b"%\xE2\xE3\xCF\xD3\n")?;
                self.state = WriterState::Writing;

                let file_id = match &self.file_id {
                    Some(file_id) => file_id.clone(),
                    None => {
                        let mut id = [0u8; 16];
                        rand::rng().fill(&mut id);
                        [id.to_vec(), id.to_vec()]
                    }
                };
                if let Some(config) = self.options.encryption.clone() {
                    self.start_encryption(&config, &file_id[0])?;
                }
                self.file_id = Some(file_id);
                Ok(())
            }
        }
    }

    fn start_encryption(&mut self, config: &EncryptionConfig, file_id: &[u8]) -> Result<()> {
        let (handler, key) = StandardSecurityHandler::create(config, file_id)?;
        let dict = handler.to_dict();
        let state = EncryptionState::from_dict(&dict, key)?;

        let id = self.table.allocate();
        self.write_indirect(id, &Object::Dictionary(dict))?;
        debug!("encryption dictionary written as object {}", id.0);
        self.encryption = Some(WriterEncryption {
            state,
            reference: Object::Reference(id),
        });
        Ok(())
    }

    fn write_body_object(&mut self, object: Object, id: ObjectId) -> Result<()> {
        let packable = self.options.full_compression && id.1 == 0 && !matches!(object, Object::Stream(_));
        if packable {
            let table = &mut self.table;
            let builder = self
                .object_stream
                .get_or_insert_with(|| ObjectStreamBuilder::new(table.allocate()));
            let container = builder.id().0;
            let index = builder.add(id.0, &object)?;
            let full = builder.len() >= self.options.max_objects_per_stream;
            self.table.record(id, Location::InStream { container, index })?;
            if full {
                self.flush_object_stream()?;
            }
            return Ok(());
        }

        match object {
            Object::Stream(stream) => self.write_stream_object(stream, id),
            mut object => {
                if let Some(encryption) = &self.encryption {
                    encryption.state.encrypt_strings(id, &mut object)?;
                }
                self.write_indirect(id, &object)
            }
        }
    }

    fn write_indirect(&mut self, id: ObjectId, object: &Object) -> Result<()> {
        let offset = self.target.bytes_written();
        writeln!(self.target, "{} {} obj", id.0, id.1)?;
        Writer::write_object(&mut self.target, object)?;
        self.target.write_all(b"\nendobj\n")?;
        self.table.record(id, Location::Offset(offset))?;
        trace!("object {} {} written at {offset}", id.0, id.1);
        Ok(())
    }

    fn write_stream_object(&mut self, stream: Stream, id: ObjectId) -> Result<()> {
        let mut object = Object::Stream(stream);
        if let Some(encryption) = &self.encryption {
            encryption.state.encrypt_strings(id, &mut object)?;
        }
        let (dict, content) = self.pipeline().encode(id, object.as_stream()?)?;

        let offset = self.target.bytes_written();
        writeln!(self.target, "{} {} obj", id.0, id.1)?;
        Writer::write_stream(&mut self.target, &dict, &content)?;
        self.target.write_all(b"\nendobj\n")?;
        self.table.record(id, Location::Offset(offset))?;
        trace!("stream {} {} written at {offset}, {} bytes", id.0, id.1, content.len());
        Ok(())
    }

    fn flush_object_stream(&mut self) -> Result<()> {
        let Some(builder) = self.object_stream.take() else {
            return Ok(());
        };
        let id = builder.id();
        let count = builder.len();
        self.write_stream_object(builder.into_stream(), id)?;
        debug!("object stream {} flushed with {count} objects", id.0);
        Ok(())
    }

    fn write_xref_stream(&mut self, mut dict: Dictionary, offset: u64) -> Result<()> {
        let id = self.table.allocate();
        self.table.record(id, Location::Offset(offset))?;
        let xref = self.section_xref();

        let widths = xref.stream_widths();
        let index: Vec<Object> = xref
            .stream_index()
            .into_iter()
            .flat_map(|(first, count)| [Object::Integer(i64::from(first)), Object::Integer(i64::from(count))])
            .collect();
        dict.set("Type", "XRef");
        dict.set("Size", i64::from(xref.size));
        dict.set("W", widths.iter().map(|&width| Object::from(width)).collect::<Vec<_>>());
        dict.set("Index", index);

        let stream = Stream::new(dict, xref.encode_stream_rows(widths));
        // Compressed even when the body is not.
        let compression_level = match self.options.compression_level {
            0 => -1,
            level => level,
        };
        let pipeline = StreamPipeline {
            compression_level,
            encryption: None,
        };
        let (dict, content) = pipeline.encode(id, &stream)?;
        writeln!(self.target, "{} {} obj", id.0, id.1)?;
        Writer::write_stream(&mut self.target, &dict, &content)?;
        self.target.write_all(b"\nendobj\n")?;
        debug!("xref stream with {} entries written at {offset}", xref.len());
        Ok(())
    }
}

impl<W: Write> IndirectObjectSink for PdfWriter<W> {
    fn allocate(&mut self) -> Result<ObjectId> {
        self.allocate_number()
    }

    fn add_to_body_with_id(&mut self, object: Object, id: ObjectId) -> Result<()> {
        PdfWriter::add_to_body_with_id(self, object, id).map(|_| ())
    }
}

/// Pushes content into a stream opened by [`PdfWriter::begin_stream`].
///
/// Call [`StreamWriter::finish`] when done. Dropping it unfinished leaves the
/// writer unusable.
pub struct StreamWriter<'a, W: Write> {
    writer: &'a mut PdfWriter<W>,
    id: ObjectId,
    length_id: ObjectId,
    encoder: Option<StreamEncoder>,
    length: u64,
}

impl<W: Write> StreamWriter<'_, W> {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Flushes the filters, closes the stream and writes its `/Length`.
    pub fn finish(mut self) -> Result<ObjectId> {
        if let Some(encoder) = self.encoder.take() {
            let tail = encoder.finish()?;
            self.writer.target.write_all(&tail)?;
            self.length += tail.len() as u64;
        }
        self.writer.target.write_all(b"\nendstream\nendobj\n")?;
        self.writer.state = WriterState::Writing;

        let length = i64::try_from(self.length).map_err(|err| crate::Error::NumericCast(err.to_string()))?;
        // Kept out of object streams so a reader can resolve it while parsing the stream.
        self.writer.write_indirect(self.length_id, &Object::Integer(length))?;
        trace!("stream {} {} closed, {} bytes", self.id.0, self.id.1, self.length);
        Ok(self.id)
    }
}

impl<W: Write> Write for StreamWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| io::Error::other("stream already finished"))?;
        let out = encoder.push(buf)?;
        self.writer.target.write_all(&out)?;
        self.length += out.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.target.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn catalog_writer() -> (PdfWriter<Vec<u8>>, ObjectId) {
        let mut writer = PdfWriter::new(Vec::new(), SaveOptions::default());
        let root = writer.allocate_number().unwrap();
        let pages = writer.allocate_number().unwrap();
        writer
            .add_to_body_with_id(Object::Dictionary(dictionary! { "Type" => "Catalog", "Pages" => pages }), root)
            .unwrap();
        writer
            .add_to_body_with_id(
                Object::Dictionary(dictionary! { "Type" => "Pages", "Kids" => Vec::<Object>::new(), "Count" => 0 }),
                pages,
            )
            .unwrap();
        (writer, root)
    }

    #[test]
    fn catalog_and_trailer() {
        let (mut writer, root) = catalog_writer();
        writer.close(root, None).unwrap();
        let output = String::from_utf8_lossy(&writer.into_inner()).into_owned();

        assert!(output.starts_with("%PDF-1.4\n"));
        assert!(output.contains("1 0 obj\n<</Type/Catalog/Pages 2 0 R>>\nendobj\n"));
        assert!(output.contains("trailer\n<</Size 3/Root 1 0 R/ID[<"));
        assert!(output.ends_with("%%EOF\n"));
    }

    #[test]
    fn uncompressed_stream_length_is_exact() {
        let mut writer = PdfWriter::new(Vec::new(), SaveOptions::builder().compression_level(0).build());
        writer.add_to_body(Object::Stream(Stream::new(Dictionary::new(), b"hello".to_vec()))).unwrap();
        let output = String::from_utf8_lossy(&writer.into_inner()).into_owned();
        assert!(output.contains("<</Length 5>>\nstream\nhello\nendstream"));
    }

    #[test]
    fn duplicate_and_late_writes_are_rejected() {
        let (mut writer, root) = catalog_writer();
        let err = writer.add_to_body_with_id(Object::Null, root).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(writer.set_full_compression(true).is_err());

        writer.close(root, None).unwrap();
        let err = writer.add_to_body(Object::Integer(1)).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidOperation(UsageError::WriterClosed)));
        assert!(writer.close(root, None).is_err());
    }

    #[test]
    fn pushed_stream_has_indirect_length() {
        let mut writer = PdfWriter::new(Vec::new(), SaveOptions::builder().compression_level(0).build());
        let mut stream = writer.begin_stream(Dictionary::new()).unwrap();
        stream.write_all(b"0 0 m ").unwrap();
        stream.write_all(b"10 10 l S").unwrap();
        let id = stream.finish().unwrap();
        assert_eq!(id, (1, 0));
        assert_eq!(writer.state(), WriterState::Writing);

        let output = String::from_utf8_lossy(&writer.into_inner()).into_owned();
        assert!(output.contains("1 0 obj\n<</Length 2 0 R>>\nstream\n0 0 m 10 10 l S\nendstream\nendobj\n"));
        assert!(output.contains("2 0 obj\n15\nendobj\n"));
    }

    #[test]
    fn unfinished_stream_blocks_the_writer() {
        let mut writer = PdfWriter::new(Vec::new(), SaveOptions::default());
        let stream = writer.begin_stream(Dictionary::new()).unwrap();
        drop(stream);
        let err = writer.add_to_body(Object::Null).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidOperation(UsageError::StreamInProgress)));
    }

    #[test]
    fn full_compression_packs_objects() {
        let options = SaveOptions::builder().full_compression(true).max_objects_per_stream(2).build();
        let mut writer = PdfWriter::new(Vec::new(), options);
        let root = writer.allocate_number().unwrap();
        writer.add_to_body(Object::Integer(1)).unwrap();
        writer.add_to_body(Object::Integer(2)).unwrap();
        writer.add_to_body_with_id(Object::Dictionary(dictionary! { "Type" => "Catalog" }), root).unwrap();
        writer.close(root, None).unwrap();

        let output = writer.into_inner();
        let text = String::from_utf8_lossy(&output);
        assert!(text.starts_with("%PDF-1.5\n"));
        assert_eq!(text.matches("/Type/ObjStm").count(), 2);
        assert!(text.contains("/Type/XRef"));
        assert!(!text.contains("trailer"));
    }

    #[test]
    fn pushed_stream_length_stays_outside_object_streams() {
        let options = SaveOptions::builder().full_compression(true).compression_level(0).build();
        let mut writer = PdfWriter::new(Vec::new(), options);
        let mut stream = writer.begin_stream(Dictionary::new()).unwrap();
        stream.write_all(b"pushed bytes").unwrap();
        let id = stream.finish().unwrap();
        let root = writer.add_to_body(Object::Dictionary(dictionary! { "Type" => "Catalog", "Data" => id })).unwrap();
        writer.close(root, None).unwrap();

        let text = String::from_utf8_lossy(&writer.into_inner()).into_owned();
        assert!(text.contains("<</Length 2 0 R>>"));
        assert!(text.contains("2 0 obj\n12\nendobj\n"));
    }

    #[test]
    fn xref_stream_is_compressed_at_level_zero() {
        let options = SaveOptions::builder().full_compression(true).compression_level(0).build();
        let mut writer = PdfWriter::new(Vec::new(), options);
        let root = writer.add_to_body(Object::Dictionary(dictionary! { "Type" => "Catalog" })).unwrap();
        writer.close(root, None).unwrap();

        let output = writer.into_inner();
        let text = String::from_utf8_lossy(&output);
        // The object stream holding the catalog stays plain; only the xref stream is filtered.
        assert_eq!(text.matches("/FlateDecode").count(), 1);
        assert!(text.contains("/Type/Catalog"));
        assert!(PdfReader::load_mem(&output).unwrap().catalog().is_ok());
    }
}
