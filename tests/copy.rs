use pdfwright::{
    Dictionary, EncryptionConfig, EncryptionMethod, Error, Object, PdfCopy, PdfReader, PdfWriter, Permissions, Result,
    SaveOptions, SecurityError, Stream, UsageError, dictionary,
};

mod utils;

/// A document whose pages all use one embedded font and carry one form field each.
fn source_with_font(pages: usize, options: SaveOptions) -> Result<Vec<u8>> {
    let mut writer = PdfWriter::new(Vec::new(), options);
    let font_file = writer.add_to_body(Object::Stream(
        Stream::new(dictionary! { "Length1" => 4096 }, vec![7; 4096]).with_compression(false),
    ))?;
    let descriptor = writer.add_to_body(Object::Dictionary(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => "ABCDEF+Sample",
        "FontFile2" => font_file,
    }))?;
    let font = writer.add_to_body(Object::Dictionary(dictionary! {
        "Type" => "Font",
        "Subtype" => "TrueType",
        "BaseFont" => "ABCDEF+Sample",
        "FontDescriptor" => descriptor,
    }))?;

    let pages_id = writer.allocate_number()?;
    let mut kids = Vec::new();
    let mut fields = Vec::new();
    for number in 0..pages {
        let content = writer.add_to_body(Object::Stream(Stream::new(
            Dictionary::new(),
            format!("BT /F1 10 Tf ({number}) Tj ET").into_bytes(),
        )))?;
        let page_id = writer.allocate_number()?;
        let widget = writer.add_to_body(Object::Dictionary(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "FT" => "Tx",
            "T" => Object::string_literal(format!("field{number}")),
            "P" => page_id,
            "Rect" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(50), Object::Integer(20)],
        }))?;
        fields.push(Object::Reference(widget));
        let page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content,
            "Annots" => vec![Object::Reference(widget)],
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font } },
        };
        writer.add_to_body_with_id(Object::Dictionary(page), page_id)?;
        kids.push(Object::Reference(page_id));
    }
    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => pages,
        "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(300), Object::Integer(300)],
    };
    writer.add_to_body_with_id(Object::Dictionary(pages_dict), pages_id)?;
    let root = writer.add_to_body(Object::Dictionary(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
        "AcroForm" => dictionary! { "Fields" => fields, "DA" => Object::string_literal("/Helv 0 Tf 0 g") },
    }))?;
    writer.close(root, None)?;
    Ok(writer.into_inner())
}

fn font_files(reader: &PdfReader) -> usize {
    reader
        .objects
        .values()
        .filter(|object| matches!(object, Object::Stream(stream) if stream.dict.has(b"Length1")))
        .count()
}

#[test]
fn merged_documents_keep_every_page() -> Result<()> {
    let mut first = PdfReader::load_mem(&source_with_font(2, SaveOptions::default())?)?;
    let mut second = PdfReader::load_mem(&utils::sample_pdf(3, SaveOptions::default())?)?;

    let mut copy = PdfCopy::new(Vec::new(), SaveOptions::default());
    copy.add_document(&mut first)?;
    copy.add_document(&mut second)?;
    assert_eq!(copy.page_count(), 5);
    let bytes = copy.close()?;
    utils::assert_offsets_point_at_objects(&bytes);

    let merged = PdfReader::load_mem(&bytes)?;
    assert_eq!(merged.page_count(), 5);
    // The inherited MediaBox of the first source is carried onto its pages.
    let page = merged.get_dictionary(merged.page_id(1)?)?;
    assert_eq!(page.get(b"MediaBox")?.as_array()?[2].as_i64()?, 300);
    assert_eq!(font_files(&merged), 1);
    Ok(())
}

#[test]
fn smart_copy_writes_identical_fonts_once() -> Result<()> {
    let source = source_with_font(1, SaveOptions::default())?;

    let mut plain = PdfCopy::new(Vec::new(), SaveOptions::default());
    for _ in 0..3 {
        plain.add_page(&mut PdfReader::load_mem(&source)?, 1)?;
    }
    let plain = PdfReader::load_mem(&plain.close()?)?;
    assert_eq!(font_files(&plain), 3);

    let mut smart = PdfCopy::smart(Vec::new(), SaveOptions::default());
    for _ in 0..3 {
        smart.add_page(&mut PdfReader::load_mem(&source)?, 1)?;
    }
    let smart = PdfReader::load_mem(&smart.close()?)?;
    assert_eq!(smart.page_count(), 3);
    assert_eq!(font_files(&smart), 1);
    Ok(())
}

#[test]
fn one_reader_for_several_pages() -> Result<()> {
    let mut reader = PdfReader::load_mem(&source_with_font(3, SaveOptions::default())?)?;
    let mut copy = PdfCopy::new(Vec::new(), SaveOptions::default());
    copy.add_page(&mut reader, 3)?;
    copy.add_page(&mut reader, 1)?;
    copy.add_page(&mut reader, 3)?;
    let merged = PdfReader::load_mem(&copy.close()?)?;

    assert_eq!(merged.page_count(), 3);
    let pages: Vec<_> = merged.get_pages().into_values().collect();
    assert_ne!(pages[0], pages[2]);
    let contents = |id: pdfwright::ObjectId| -> Result<_> { merged.get_dictionary(id)?.get(b"Contents")?.as_reference() };
    assert_eq!(contents(pages[0])?, contents(pages[2])?);
    assert_eq!(font_files(&merged), 1);
    Ok(())
}

#[test]
fn reader_reuse_across_engines_is_rejected() -> Result<()> {
    let mut reader = PdfReader::load_mem(&utils::sample_pdf(2, SaveOptions::default())?)?;
    let mut first = PdfCopy::new(Vec::new(), SaveOptions::default());
    first.add_document(&mut reader)?;

    let err = first.add_document(&mut reader).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(UsageError::DocumentAlreadyAdded)));

    let mut second = PdfCopy::new(Vec::new(), SaveOptions::default());
    let err = second.add_page(&mut reader, 1).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(UsageError::ReaderConsumed)));
    Ok(())
}

#[test]
fn form_fields_are_merged() -> Result<()> {
    let mut reader = PdfReader::load_mem(&source_with_font(2, SaveOptions::default())?)?;
    let mut copy = PdfCopy::new(Vec::new(), SaveOptions::default());
    copy.add_document(&mut reader)?;
    copy.merge_fields(&mut reader)?;
    let merged = PdfReader::load_mem(&copy.close()?)?;

    let form = merged.catalog()?.get(b"AcroForm")?.as_dict()?;
    assert_eq!(form.get(b"DA")?.as_str()?, b"/Helv 0 Tf 0 g");
    let fields = form.get(b"Fields")?.as_array()?;
    assert_eq!(fields.len(), 2);

    // Each field is the widget already copied with its page.
    let first_page = merged.get_dictionary(merged.page_id(1)?)?;
    let widget = first_page.get(b"Annots")?.as_array()?[0].as_reference()?;
    assert_eq!(fields[0].as_reference()?, widget);
    assert_eq!(merged.get_dictionary(widget)?.get(b"P")?.as_reference()?, merged.page_id(1)?);
    Ok(())
}

#[test]
fn fields_need_the_owner_password() -> Result<()> {
    let config = EncryptionConfig::new(EncryptionMethod::Aes128)
        .owner_password("owner")
        .permissions(Permissions::PRINTABLE);
    let source = source_with_font(1, SaveOptions::builder().encryption(config).build())?;

    let mut reader = PdfReader::load_mem(&source)?;
    assert!(!reader.is_opened_with_full_permissions());
    let mut copy = PdfCopy::new(Vec::new(), SaveOptions::default());
    let err = copy.merge_fields(&mut reader).unwrap_err();
    assert!(matches!(err, Error::Security(SecurityError::OwnerPasswordRequired)));

    let mut owner = PdfReader::load_mem_with_password(&source, Some("owner"))?;
    assert!(owner.is_opened_with_full_permissions());
    copy.add_document(&mut owner)?;
    copy.merge_fields(&mut owner)?;
    let merged = PdfReader::load_mem(&copy.close()?)?;
    assert!(!merged.is_encrypted());
    assert_eq!(font_files(&merged), 1);
    Ok(())
}
