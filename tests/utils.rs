use pdfwright::{DocumentInfo, PageContent, PdfDocument, Result, SaveOptions};

/// A document with `pages` pages, each drawing its own number.
#[allow(dead_code)]
pub fn sample_pdf(pages: usize, options: SaveOptions) -> Result<Vec<u8>> {
    let mut document = PdfDocument::new(Vec::new(), options);
    document.set_info(DocumentInfo::default().title("Sample").author("pdfwright tests"));
    for number in 1..=pages {
        let content = format!("BT /F1 12 Tf 72 720 Td (Page {number}) Tj ET");
        document.add_page(PageContent::new(612.0, 792.0).content(content.as_bytes()))?;
    }
    document.close()
}

/// Entries of every classic xref table in `bytes`: (object number, offset, generation, in use).
#[allow(dead_code)]
pub fn xref_entries(bytes: &[u8]) -> Vec<(u32, u64, u16, bool)> {
    let text = String::from_utf8_lossy(bytes);
    let mut entries = Vec::new();
    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        if line != "xref" {
            continue;
        }
        while let Some(header) = lines.peek() {
            let mut parts = header.split_whitespace();
            let (Some(Ok(first)), Some(Ok(count)), None) = (
                parts.next().map(str::parse::<u32>),
                parts.next().map(str::parse::<u32>),
                parts.next(),
            ) else {
                break;
            };
            lines.next();
            for number in first..first + count {
                let Some(entry) = lines.next() else { break };
                let mut fields = entry.split_whitespace();
                let offset = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
                let generation = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
                let in_use = fields.next() == Some("n");
                entries.push((number, offset, generation, in_use));
            }
        }
    }
    entries
}

/// Checks that every in-use xref entry points at the matching `N G obj` header.
#[allow(dead_code)]
pub fn assert_offsets_point_at_objects(bytes: &[u8]) {
    for (number, offset, generation, in_use) in xref_entries(bytes) {
        if !in_use {
            continue;
        }
        let header = format!("{number} {generation} obj");
        let at = &bytes[offset as usize..];
        assert!(
            at.starts_with(header.as_bytes()),
            "offset {offset} of object {number} does not start with {header:?}"
        );
    }
}
