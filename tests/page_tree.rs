use pdfwright::{Error, PageContent, PageTree, PdfDocument, PdfReader, Result, SaveOptions, UsageError};

mod utils;

#[test]
fn twenty_five_pages_are_grouped_by_ten() -> Result<()> {
    let reader = PdfReader::load_mem(&utils::sample_pdf(25, SaveOptions::default())?)?;
    assert_eq!(reader.page_count(), 25);

    let root = reader.catalog()?.get(b"Pages")?.as_reference()?;
    let root = reader.get_dictionary(root)?;
    assert_eq!(root.get(b"Count")?.as_i64()?, 25);
    let leaves = root.get(b"Kids")?.as_array()?;
    let counts = leaves
        .iter()
        .map(|leaf| reader.get_dictionary(leaf.as_reference()?)?.get(b"Count")?.as_i64())
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(counts, vec![10, 10, 5]);

    // Pages come back in insertion order.
    for (number, id) in reader.get_pages() {
        let contents = reader.get_dictionary(id)?.get(b"Contents")?.as_reference()?;
        let text = reader.get_object(contents)?.as_stream()?.decoded_content()?;
        assert!(String::from_utf8_lossy(&text).contains(&format!("(Page {number})")));
    }
    Ok(())
}

#[test]
fn custom_leaf_size() -> Result<()> {
    let mut document = PdfDocument::new(Vec::new(), SaveOptions::default()).with_page_tree(PageTree::with_leaf_size(3));
    for _ in 0..7 {
        document.add_page(PageContent::new(100.0, 100.0))?;
    }
    let reader = PdfReader::load_mem(&document.close()?)?;
    let root = reader.get_dictionary(reader.catalog()?.get(b"Pages")?.as_reference()?)?;
    assert_eq!(root.get(b"Kids")?.as_array()?.len(), 3);
    assert_eq!(reader.page_count(), 7);
    Ok(())
}

#[test]
fn reordered_pages_keep_their_content() -> Result<()> {
    let mut document = PdfDocument::new(Vec::new(), SaveOptions::default());
    document.page_tree_mut().set_linear_mode(None)?;
    for width in [100.0, 200.0, 300.0, 400.0] {
        document.add_page(PageContent::new(width, 100.0))?;
    }
    document.page_tree_mut().reorder_pages(&[4, 1, 3, 2])?;
    let reader = PdfReader::load_mem(&document.close()?)?;

    let widths = reader
        .get_pages()
        .values()
        .map(|&id| reader.get_dictionary(id)?.get(b"MediaBox")?.as_array()?[2].as_float())
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(widths, vec![400.0, 100.0, 300.0, 200.0]);
    Ok(())
}

#[test]
fn empty_document_cannot_close() {
    let document = PdfDocument::new(Vec::new(), SaveOptions::default());
    let err = document.close().unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(UsageError::NoPages)));
}
