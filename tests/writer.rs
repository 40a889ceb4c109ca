use std::collections::HashSet;

use pdfwright::{
    Dictionary, EncryptionConfig, EncryptionMethod, Error, ErrorKind, Object, PdfReader, PdfWriter, Result,
    SaveOptions, Stream, UsageError, WriterState, dictionary,
};

mod utils;

fn catalog_with_pages<W: std::io::Write>(writer: &mut PdfWriter<W>, count: usize) -> Result<pdfwright::ObjectId> {
    let pages_id = writer.allocate_number()?;
    let mut kids = Vec::new();
    for _ in 0..count {
        let page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(100), Object::Integer(100)],
        };
        kids.push(Object::Reference(writer.add_to_body(Object::Dictionary(page))?));
    }
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
    };
    writer.add_to_body_with_id(Object::Dictionary(pages), pages_id)?;
    writer.add_to_body(Object::Dictionary(dictionary! { "Type" => "Catalog", "Pages" => pages_id }))
}

#[test]
fn minimal_document_reads_back() -> Result<()> {
    let mut writer = PdfWriter::new(Vec::new(), SaveOptions::default());
    let root = catalog_with_pages(&mut writer, 1)?;
    writer.close(root, None)?;
    assert_eq!(writer.state(), WriterState::Closed);
    let bytes = writer.into_inner();

    let text = String::from_utf8_lossy(&bytes);
    assert!(text.starts_with("%PDF-1.4\n"));
    assert!(text.ends_with("%%EOF\n"));
    utils::assert_offsets_point_at_objects(&bytes);

    let reader = PdfReader::load_mem(&bytes)?;
    assert_eq!(reader.version, "1.4");
    assert_eq!(reader.page_count(), 1);
    assert_eq!(reader.catalog()?.get(b"Pages")?.as_reference()?, (1, 0));
    Ok(())
}

#[test]
fn xref_numbers_are_unique_and_dense() -> Result<()> {
    let bytes = utils::sample_pdf(12, SaveOptions::default())?;
    let entries = utils::xref_entries(&bytes);
    let numbers: HashSet<u32> = entries.iter().map(|entry| entry.0).collect();
    assert_eq!(numbers.len(), entries.len());
    assert_eq!(entries[0], (0, 0, 65535, false));
    assert!(entries[1..].iter().all(|entry| entry.3));
    utils::assert_offsets_point_at_objects(&bytes);
    Ok(())
}

#[test]
fn length_matches_compressed_bytes() -> Result<()> {
    let content: Vec<u8> = (0..2000).flat_map(|i| format!("{i} 0 m {i} 10 l S\n").into_bytes()).collect();
    let mut writer = PdfWriter::new(Vec::new(), SaveOptions::default());
    let stream_id = writer.add_to_body(Object::Stream(Stream::new(Dictionary::new(), content.clone())))?;
    let root = writer.add_to_body(Object::Dictionary(dictionary! { "Type" => "Catalog", "Extra" => stream_id }))?;
    writer.close(root, None)?;

    let reader = PdfReader::load_mem(&writer.into_inner())?;
    let stream = reader.get_object(stream_id)?.as_stream()?;
    let length = stream.dict.get(b"Length")?.as_i64()? as usize;
    assert_eq!(length, stream.content_len());
    assert!(length < content.len());
    assert_eq!(stream.decoded_content()?, content);
    Ok(())
}

#[test]
fn streamed_content_gets_indirect_length() -> Result<()> {
    let mut writer = PdfWriter::new(Vec::new(), SaveOptions::builder().compression_level(6).build());
    let data = vec![b'x'; 10_000];
    let stream_id = writer.add_stream_from_reader(Dictionary::new(), data.as_slice())?;
    let root = writer.add_to_body(Object::Dictionary(dictionary! { "Type" => "Catalog", "Data" => stream_id }))?;
    writer.close(root, None)?;

    let reader = PdfReader::load_mem(&writer.into_inner())?;
    let stream = reader.get_object(stream_id)?.as_stream()?;
    let length_ref = stream.dict.get(b"Length")?.as_reference()?;
    assert_eq!(reader.get_object(length_ref)?.as_i64()? as usize, stream.content_len());
    assert_eq!(stream.decoded_content()?, data);
    Ok(())
}

#[test]
fn full_compression_round_trip() -> Result<()> {
    let options = SaveOptions::builder()
        .full_compression(true)
        .max_objects_per_stream(4)
        .build();
    let bytes = utils::sample_pdf(9, options)?;
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.starts_with("%PDF-1.5"));
    assert!(text.contains("/Type/XRef"));
    assert!(!text.contains("trailer"));

    let reader = PdfReader::load_mem(&bytes)?;
    assert_eq!(reader.page_count(), 9);
    let info = reader.trailer.get(b"Info")?.as_reference()?;
    assert_eq!(reader.get_dictionary(info)?.get(b"Title")?.as_str()?, b"Sample");
    for (_, id) in reader.get_pages() {
        assert!(reader.get_dictionary(id)?.type_is(b"Page"));
    }
    Ok(())
}

#[test]
fn writer_rejects_writes_after_close() -> Result<()> {
    let mut writer = PdfWriter::new(Vec::new(), SaveOptions::default());
    let root = catalog_with_pages(&mut writer, 1)?;
    writer.close(root, None)?;

    let err = writer.add_to_body(Object::Null).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(UsageError::WriterClosed)));
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert!(writer.close(root, None).is_err());
    Ok(())
}

#[test]
fn settings_lock_on_first_write() -> Result<()> {
    let mut writer = PdfWriter::new(Vec::new(), SaveOptions::default());
    writer.set_full_compression(true)?;
    writer.set_compression_level(0)?;
    writer.add_to_body(Object::Integer(1))?;

    let err = writer.set_full_compression(false).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(UsageError::SettingsLocked)));
    assert!(writer.set_encryption(None).is_err());
    Ok(())
}

#[test]
fn object_written_twice_is_rejected() -> Result<()> {
    let mut writer = PdfWriter::new(Vec::new(), SaveOptions::default());
    let id = writer.add_to_body(Object::Integer(1))?;
    let err = writer.add_to_body_with_id(Object::Integer(2), id).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(UsageError::ObjectAlreadyWritten(found)) if found == id));
    Ok(())
}

#[test]
fn incremental_update_appends_a_section() -> Result<()> {
    let original = utils::sample_pdf(2, SaveOptions::default())?;
    let reader = PdfReader::load_mem(&original)?;
    let page_id = reader.page_id(2)?;
    let mut page = reader.get_dictionary(page_id)?.clone();
    page.set("Rotate", 90);

    let mut writer = PdfWriter::incremental(Vec::new(), &reader, SaveOptions::default())?;
    writer.add_to_body_with_id(Object::Dictionary(page), page_id)?;
    let note = writer.add_to_body(Object::string_literal("appended"))?;
    assert_eq!(note.0, reader.size());
    let root = reader.trailer.get(b"Root")?.as_reference()?;
    let info = reader.trailer.get(b"Info")?.as_reference()?;
    writer.close(root, Some(info))?;
    let updated = writer.into_inner();

    assert!(updated.starts_with(&original));
    let tail = String::from_utf8_lossy(&updated[original.len()..]);
    assert!(tail.contains(&format!("/Prev {}", reader.xref_start())));
    assert_eq!(tail.matches(" obj").count(), 2);

    let reader = PdfReader::load_mem(&updated)?;
    assert_eq!(reader.page_count(), 2);
    assert_eq!(reader.get_dictionary(page_id)?.get(b"Rotate")?.as_i64()?, 90);
    assert!(!reader.get_dictionary(reader.page_id(1)?)?.has(b"Rotate"));
    assert_eq!(reader.get_object(note)?.as_str()?, b"appended");
    assert_eq!(reader.size(), note.0 + 1);
    Ok(())
}

#[test]
fn fixed_file_id_is_written() -> Result<()> {
    let options = SaveOptions::builder().file_id(vec![1; 16], vec![2; 16]).build();
    let reader = PdfReader::load_mem(&utils::sample_pdf(1, options)?)?;
    let ids = reader.trailer.get(b"ID")?.as_array()?;
    assert_eq!(ids[0].as_str()?, &[1; 16]);
    assert_eq!(ids[1].as_str()?, &[2; 16]);
    Ok(())
}

#[test]
fn reads_from_a_file() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    let mut writer = PdfWriter::new(file.as_file_mut(), SaveOptions::default());
    let root = catalog_with_pages(&mut writer, 3)?;
    writer.close(root, None)?;

    let reader = PdfReader::load(file.path())?;
    assert_eq!(reader.page_count(), 3);
    assert!(!reader.is_encrypted());
    Ok(())
}

#[test]
fn huge_reals_read_back() -> Result<()> {
    let mut writer = PdfWriter::new(Vec::new(), SaveOptions::default());
    let value = writer.add_to_body(Object::Real(1.0e20))?;
    let root = writer.add_to_body(Object::Dictionary(dictionary! { "Type" => "Catalog", "Big" => value }))?;
    writer.close(root, None)?;

    let reader = PdfReader::load_mem(&writer.into_inner())?;
    assert_eq!(reader.get_object(value)?.as_f64()?, 1.0e20);
    Ok(())
}

fn pushed_streams_with(options: SaveOptions) -> Result<()> {
    let pushed: Vec<u8> = (0..500).flat_map(|i| format!("{i} {i} m\n").into_bytes()).collect();
    let read: Vec<u8> = b"read from a source ".repeat(200);

    let mut writer = PdfWriter::new(Vec::new(), options);
    let mut stream = writer.begin_stream(Dictionary::new())?;
    for chunk in pushed.chunks(100) {
        std::io::Write::write_all(&mut stream, chunk)?;
    }
    let pushed_id = stream.finish()?;
    let read_id = writer.add_stream_from_reader(Dictionary::new(), read.as_slice())?;
    let root = catalog_with_pages(&mut writer, 2)?;
    writer.close(root, None)?;
    let bytes = writer.into_inner();

    let reader = PdfReader::load_mem_with_password(&bytes, Some("user"))?;
    assert_eq!(reader.page_count(), 2);
    assert_eq!(reader.get_object(pushed_id)?.as_stream()?.decoded_content()?, pushed);
    assert_eq!(reader.get_object(read_id)?.as_stream()?.decoded_content()?, read);
    Ok(())
}

#[test]
fn pushed_streams_with_full_compression() -> Result<()> {
    pushed_streams_with(SaveOptions::builder().full_compression(true).build())
}

#[test]
fn pushed_streams_with_full_compression_and_encryption() -> Result<()> {
    for method in [EncryptionMethod::Rc4_128, EncryptionMethod::Aes128, EncryptionMethod::Aes256] {
        let encryption = EncryptionConfig::new(method).user_password("user").owner_password("owner");
        pushed_streams_with(SaveOptions::builder().full_compression(true).encryption(encryption).build())?;
    }
    Ok(())
}
