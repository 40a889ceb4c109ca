use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, warn};

use crate::document::DocumentInfo;
use crate::error::{SecurityError, UsageError};
use crate::fingerprint::Fingerprinter;
use crate::page_tree::PageTree;
use crate::pdf_writer::PdfWriter;
use crate::reader::{PdfReader, ReaderId};
use crate::save_options::SaveOptions;
use crate::{Dictionary, Object, ObjectId, Result, Stream};

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// Decides where transitive copying stops. Objects it accepts are only given a
/// target reference; their bodies are written when the caller imports them.
pub type PageBoundary = Box<dyn Fn(&Dictionary) -> bool>;

#[derive(Debug, Clone, Copy)]
struct ImportedRef {
    target: ObjectId,
    copied: bool,
}

struct SmartCopy {
    fingerprinter: Fingerprinter,
    seen: HashMap<Vec<u8>, ObjectId>,
}

/// Builds a new document out of pages, and optionally form fields, of existing ones.
///
/// Objects are copied on demand: a source object is written to the output the
/// first time something imported refers to it, and only once per source reader.
pub struct PdfCopy<W: Write> {
    engine: u64,
    writer: PdfWriter<W>,
    pages: PageTree,
    imported: HashMap<ReaderId, HashMap<ObjectId, ImportedRef>>,
    documents: HashSet<ReaderId>,
    boundary: PageBoundary,
    smart: Option<SmartCopy>,
    shuffle_subset_names: bool,
    fields: Vec<Object>,
    form: Option<Dictionary>,
    info: DocumentInfo,
}

impl<W: Write> PdfCopy<W> {
    pub fn new(target: W, options: SaveOptions) -> PdfCopy<W> {
        PdfCopy {
            engine: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
            writer: PdfWriter::new(target, options),
            pages: PageTree::new(),
            imported: HashMap::new(),
            documents: HashSet::new(),
            boundary: Box::new(|dict: &Dictionary| dict.type_is(b"Page")),
            smart: None,
            shuffle_subset_names: false,
            fields: Vec::new(),
            form: None,
            info: DocumentInfo::default(),
        }
    }

    /// A copy engine that writes identical streams only once, even when they come
    /// from different source documents.
    pub fn smart(target: W, options: SaveOptions) -> PdfCopy<W> {
        let mut copy = PdfCopy::new(target, options);
        copy.smart = Some(SmartCopy {
            fingerprinter: Fingerprinter::new(),
            seen: HashMap::new(),
        });
        copy
    }

    pub fn with_page_boundary(mut self, boundary: impl Fn(&Dictionary) -> bool + 'static) -> PdfCopy<W> {
        self.boundary = Box::new(boundary);
        self
    }

    /// Renames subset fonts of every source on first use, so equally named subsets
    /// of different documents cannot clash.
    pub fn set_shuffle_subset_names(&mut self, shuffle: bool) {
        self.shuffle_subset_names = shuffle;
    }

    pub fn set_info(&mut self, info: DocumentInfo) {
        self.info = info;
    }

    pub fn writer_mut(&mut self) -> &mut PdfWriter<W> {
        &mut self.writer
    }

    pub fn page_tree_mut(&mut self) -> &mut PageTree {
        &mut self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.page_count()
    }

    /// Imports page `page_number` (starting at 1) of `reader` as the next page.
    pub fn add_page(&mut self, reader: &mut PdfReader, page_number: u32) -> Result<ObjectId> {
        self.prepare(reader)?;
        let reader = &*reader;
        let source = reader.page_id(page_number)?;
        let mut page = reader.page_dictionary(source)?;
        page.remove(b"Parent");

        let target = match self.table(reader.id()).get(&source).copied() {
            Some(ImportedRef { target, copied: false }) => target,
            // The same page imported again becomes a second page sharing resources.
            Some(ImportedRef { copied: true, .. }) => self.writer.allocate_number()?,
            None => {
                let target = self.writer.allocate_number()?;
                self.table(reader.id()).insert(source, ImportedRef { target, copied: false });
                target
            }
        };

        let mut copy = self.copy_dictionary(reader, &page)?;
        let parent = self.pages.add_page_reference(&mut self.writer, target)?;
        copy.set("Parent", parent);
        self.writer.add_to_body_with_id(Object::Dictionary(copy), target)?;
        if let Some(entry) = self.table(reader.id()).get_mut(&source) {
            if entry.target == target {
                entry.copied = true;
            }
        }
        debug!("page {page_number} of reader {:?} imported as {} {}", reader.id(), target.0, target.1);
        Ok(target)
    }

    /// Imports every page of `reader`. A reader can only be added once.
    pub fn add_document(&mut self, reader: &mut PdfReader) -> Result<()> {
        if self.documents.contains(&reader.id()) {
            return Err(UsageError::DocumentAlreadyAdded.into());
        }
        self.prepare(reader)?;
        self.documents.insert(reader.id());
        let count = reader.page_count() as u32;
        for page_number in 1..=count {
            self.add_page(reader, page_number)?;
        }
        Ok(())
    }

    /// Copies the form fields of `reader` into the output's `/AcroForm`.
    pub fn merge_fields(&mut self, reader: &mut PdfReader) -> Result<()> {
        if !reader.is_opened_with_full_permissions() {
            return Err(SecurityError::OwnerPasswordRequired.into());
        }
        self.prepare(reader)?;
        let reader = &*reader;

        let form = match reader.catalog()?.get(b"AcroForm") {
            Ok(form) => reader.dereference(form)?.1.as_dict()?,
            Err(_) => return Ok(()),
        };
        if self.form.is_none() {
            let mut merged = Dictionary::new();
            let keys: [&[u8]; 4] = [b"DA", b"DR", b"Q", b"NeedAppearances"];
            for key in keys {
                if let Ok(value) = form.get(key) {
                    let value = self.copy_object(reader, value)?;
                    merged.set(key, value);
                }
            }
            self.form = Some(merged);
        }

        let fields = match form.get(b"Fields") {
            Ok(fields) => reader.dereference(fields)?.1.as_array()?,
            Err(_) => return Ok(()),
        };
        for field in fields {
            let copy = self.copy_object(reader, field)?;
            self.fields.push(copy);
        }
        debug!("{} form fields merged", fields.len());
        Ok(())
    }

    /// Writes the page tree, catalog and Info dictionary, then closes the file.
    pub fn close(mut self) -> Result<W> {
        let pages = self.pages.write_page_tree(&mut self.writer)?;
        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => pages,
        };
        if !self.fields.is_empty() {
            let mut form = self.form.take().unwrap_or_default();
            form.set("Fields", std::mem::take(&mut self.fields));
            catalog.set("AcroForm", form);
        }
        let root = self.writer.add_to_body(Object::Dictionary(catalog))?;
        let info = self.writer.add_to_body(Object::Dictionary(self.info.to_dict()))?;
        self.writer.close(root, Some(info))?;
        Ok(self.writer.into_inner())
    }

    /// First use of a reader by this engine claims it and rewrites named
    /// destinations; later uses by the same engine are free.
    fn prepare(&mut self, reader: &mut PdfReader) -> Result<()> {
        let first_use = !reader.is_consumed();
        reader.consume(self.engine)?;
        if first_use {
            reader.consolidate_named_destinations()?;
            if self.shuffle_subset_names {
                reader.shuffle_subset_names();
            }
        }
        Ok(())
    }

    fn table(&mut self, reader: ReaderId) -> &mut HashMap<ObjectId, ImportedRef> {
        self.imported.entry(reader).or_default()
    }

    /// Target reference for `source`, copying the object first if needed.
    pub fn copy_indirect(&mut self, reader: &PdfReader, source: ObjectId) -> Result<Object> {
        if let Some(entry) = self.table(reader.id()).get(&source) {
            return Ok(Object::Reference(entry.target));
        }
        let Ok(object) = reader.get_object(source) else {
            return Ok(Object::Null);
        };

        if let Object::Dictionary(dict) = object {
            if dict.type_is(b"Catalog") {
                warn!("catalog {} {} reached while copying; replaced by null", source.0, source.1);
                return Ok(Object::Null);
            }
            if (self.boundary)(dict) {
                let target = self.writer.allocate_number()?;
                self.table(reader.id()).insert(source, ImportedRef { target, copied: false });
                return Ok(Object::Reference(target));
            }
        }

        let fingerprint = match (&mut self.smart, object) {
            (Some(smart), Object::Stream(_)) => {
                let fingerprint = smart.fingerprinter.fingerprint(reader, source)?;
                if let Some(&target) = smart.seen.get(&fingerprint) {
                    debug!("stream {} {} matches {} {}", source.0, source.1, target.0, target.1);
                    self.table(reader.id()).insert(source, ImportedRef { target, copied: true });
                    return Ok(Object::Reference(target));
                }
                Some(fingerprint)
            }
            _ => None,
        };

        let target = self.writer.allocate_number()?;
        self.table(reader.id()).insert(source, ImportedRef { target, copied: false });
        let copy = self.copy_object(reader, object)?;
        self.writer.add_to_body_with_id(copy, target)?;
        if let Some(entry) = self.table(reader.id()).get_mut(&source) {
            entry.copied = true;
        }
        if let (Some(smart), Some(fingerprint)) = (&mut self.smart, fingerprint) {
            smart.seen.insert(fingerprint, target);
        }
        Ok(Object::Reference(target))
    }

    /// A copy of `object` with every nested reference remapped into the output.
    pub fn copy_object(&mut self, reader: &PdfReader, object: &Object) -> Result<Object> {
        match object {
            Object::Reference(id) => self.copy_indirect(reader, *id),
            Object::Array(items) => items
                .iter()
                .map(|item| self.copy_object(reader, item))
                .collect::<Result<Vec<_>>>()
                .map(Object::Array),
            Object::Dictionary(dict) => self.copy_dictionary(reader, dict).map(Object::Dictionary),
            Object::Stream(stream) => {
                let mut dict = stream.dict.clone();
                dict.remove(b"Length");
                Ok(Object::Stream(Stream {
                    dict: self.copy_dictionary(reader, &dict)?,
                    content: stream.content.clone(),
                    allows_compression: stream.allows_compression,
                    compression_level: stream.compression_level,
                }))
            }
            other => Ok(other.clone()),
        }
    }

    fn copy_dictionary(&mut self, reader: &PdfReader, dict: &Dictionary) -> Result<Dictionary> {
        let mut copy = Dictionary::new();
        for (key, value) in dict {
            copy.set(key.clone(), self.copy_object(reader, value)?);
        }
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::build_test_pdf;

    fn source() -> PdfReader {
        PdfReader::load_mem(&build_test_pdf(&[
            "<</Type/Catalog/Pages 2 0 R>>",
            "<</Type/Pages/Kids[3 0 R 4 0 R]/Count 2/MediaBox[0 0 612 792]>>",
            "<</Type/Page/Parent 2 0 R/Contents 5 0 R/Annots[6 0 R]>>",
            "<</Type/Page/Parent 2 0 R/Contents 5 0 R>>",
            "<</Length 9>>stream\n0 0 m S Q\nendstream",
            "<</Type/Annot/Subtype/Link/Dest[4 0 R/Fit]/Back 1 0 R>>",
        ]))
        .unwrap()
    }

    fn output_of(copy: PdfCopy<Vec<u8>>) -> PdfReader {
        PdfReader::load_mem(&copy.close().unwrap()).unwrap()
    }

    #[test]
    fn page_boundary_stops_transitive_copy() {
        let mut reader = source();
        let mut copy = PdfCopy::new(Vec::new(), SaveOptions::default());
        copy.add_page(&mut reader, 1).unwrap();
        let output = output_of(copy);

        assert_eq!(output.page_count(), 1);
        let pages: Vec<_> = output.objects.values().filter(|o| o.dict().is_some_and(|d| d.type_is(b"Page"))).collect();
        assert_eq!(pages.len(), 1);

        let page = output.page_dictionary(output.page_id(1).unwrap()).unwrap();
        assert!(page.has(b"MediaBox"));
        let annot = page.get(b"Annots").unwrap().as_array().unwrap()[0].as_reference().unwrap();
        let annot = output.get_dictionary(annot).unwrap();
        assert_eq!(annot.get(b"Back").unwrap(), &Object::Null);
    }

    #[test]
    fn shared_objects_are_copied_once() {
        let mut reader = source();
        let mut copy = PdfCopy::new(Vec::new(), SaveOptions::default());
        copy.add_document(&mut reader).unwrap();
        let output = output_of(copy);

        assert_eq!(output.page_count(), 2);
        let contents: Vec<_> = output
            .get_pages()
            .values()
            .map(|&id| output.get_dictionary(id).unwrap().get(b"Contents").unwrap().as_reference().unwrap())
            .collect();
        assert_eq!(contents[0], contents[1]);

        // The link on page 1 points at the imported page 2.
        let first = output.get_dictionary(output.page_id(1).unwrap()).unwrap();
        let annot = first.get(b"Annots").unwrap().as_array().unwrap()[0].as_reference().unwrap();
        let dest = output.get_dictionary(annot).unwrap().get(b"Dest").unwrap().as_array().unwrap();
        assert_eq!(dest[0].as_reference().unwrap(), output.page_id(2).unwrap());
    }

    #[test]
    fn document_cannot_be_added_twice() {
        let mut reader = source();
        let mut copy = PdfCopy::new(Vec::new(), SaveOptions::default());
        copy.add_document(&mut reader).unwrap();
        let err = copy.add_document(&mut reader).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidOperation(UsageError::DocumentAlreadyAdded)));
    }

    #[test]
    fn reader_belongs_to_one_engine() {
        let mut reader = source();
        let mut first = PdfCopy::new(Vec::new(), SaveOptions::default());
        first.add_page(&mut reader, 1).unwrap();
        let mut second = PdfCopy::new(Vec::new(), SaveOptions::default());
        let err = second.add_page(&mut reader, 2).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidOperation(UsageError::ReaderConsumed)));
    }

    #[test]
    fn missing_page_number_is_reported() {
        let mut reader = source();
        let mut copy = PdfCopy::new(Vec::new(), SaveOptions::default());
        let err = copy.add_page(&mut reader, 7).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidOperation(UsageError::PageNumberNotFound(7))));
    }
}
