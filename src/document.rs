use std::io::Write;

use crate::encodings::text_string;
use crate::page_tree::PageTree;
use crate::pdf_writer::PdfWriter;
use crate::resources::{ResourceEmitter, ResourceHandle, ResourceKind, ResourceRegistry};
use crate::save_options::SaveOptions;
use crate::{Dictionary, Object, ObjectId, Result, Stream};

/// Entries of the document Info dictionary.
#[derive(Debug, Clone, Default)]
pub struct DocumentInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub creator: Option<String>,
    /// Defaults to this library's name and version.
    pub producer: Option<String>,
    pub creation_date: Option<Object>,
    pub mod_date: Option<Object>,
}

impl DocumentInfo {
    /// Info with creation and modification date set to the current local time.
    #[cfg(feature = "chrono")]
    pub fn now() -> DocumentInfo {
        let now: Object = chrono::Local::now().into();
        DocumentInfo {
            creation_date: Some(now.clone()),
            mod_date: Some(now),
            ..DocumentInfo::default()
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn author(mut self, author: &str) -> Self {
        self.author = Some(author.to_string());
        self
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = Some(subject.to_string());
        self
    }

    pub fn keywords(mut self, keywords: &str) -> Self {
        self.keywords = Some(keywords.to_string());
        self
    }

    pub fn creator(mut self, creator: &str) -> Self {
        self.creator = Some(creator.to_string());
        self
    }

    pub fn producer(mut self, producer: &str) -> Self {
        self.producer = Some(producer.to_string());
        self
    }

    pub fn creation_date(mut self, date: impl Into<Object>) -> Self {
        self.creation_date = Some(date.into());
        self
    }

    pub fn mod_date(mut self, date: impl Into<Object>) -> Self {
        self.mod_date = Some(date.into());
        self
    }

    pub fn to_dict(&self) -> Dictionary {
        let mut dict = Dictionary::new();
        let texts = [
            ("Title", &self.title),
            ("Author", &self.author),
            ("Subject", &self.subject),
            ("Keywords", &self.keywords),
            ("Creator", &self.creator),
        ];
        for (key, value) in texts {
            if let Some(value) = value {
                dict.set(key, text_string(value));
            }
        }
        let producer = match &self.producer {
            Some(producer) => text_string(producer),
            None => text_string(concat!("pdfwright ", env!("CARGO_PKG_VERSION"))),
        };
        dict.set("Producer", producer);
        if let Some(date) = &self.creation_date {
            dict.set("CreationDate", date.clone());
        }
        if let Some(date) = &self.mod_date {
            dict.set("ModDate", date.clone());
        }
        dict
    }
}

/// One page to be added with [`PdfDocument::add_page`].
#[derive(Debug, Clone)]
pub struct PageContent {
    media_box: [f32; 4],
    content: Vec<u8>,
    resources: Vec<ResourceHandle>,
    extra: Dictionary,
}

impl PageContent {
    pub fn new(width: f32, height: f32) -> PageContent {
        PageContent {
            media_box: [0.0, 0.0, width, height],
            content: Vec::new(),
            resources: Vec::new(),
            extra: Dictionary::new(),
        }
    }

    /// Appends content stream operators.
    pub fn content(mut self, operators: &[u8]) -> Self {
        self.content.extend_from_slice(operators);
        self
    }

    pub fn resource(mut self, handle: ResourceHandle) -> Self {
        self.resources.push(handle);
        self
    }

    /// Any other page dictionary entry, `/Rotate` for instance.
    pub fn set<K: Into<Vec<u8>>, V: Into<Object>>(mut self, key: K, value: V) -> Self {
        self.extra.set(key, value);
        self
    }
}

/// A new document written front to back: pages go out as they are added,
/// resources and the page tree when the document is closed.
pub struct PdfDocument<W: Write> {
    writer: PdfWriter<W>,
    pages: PageTree,
    resources: ResourceRegistry,
    info: DocumentInfo,
}

impl<W: Write> PdfDocument<W> {
    pub fn new(target: W, options: SaveOptions) -> PdfDocument<W> {
        PdfDocument {
            writer: PdfWriter::new(target, options),
            pages: PageTree::new(),
            resources: ResourceRegistry::new(),
            info: DocumentInfo::default(),
        }
    }

    pub fn with_page_tree(mut self, pages: PageTree) -> Self {
        self.pages = pages;
        self
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

    pub fn register_resource(
        &mut self, kind: ResourceKind, emitter: impl ResourceEmitter + 'static,
    ) -> Result<ResourceHandle> {
        self.resources.register(kind, emitter, &mut self.writer)
    }

    pub fn resource_name(&self, handle: ResourceHandle) -> Result<&str> {
        self.resources.name(handle)
    }

    pub fn mark_used(&mut self, handle: ResourceHandle, ids: impl IntoIterator<Item = u32>) -> Result<()> {
        self.resources.mark_used(handle, ids)
    }

    /// Writes the page's content stream and the page itself.
    pub fn add_page(&mut self, page: PageContent) -> Result<ObjectId> {
        let content = self
            .writer
            .add_to_body(Object::Stream(Stream::new(Dictionary::new(), page.content)))?;
        let mut dict = page.extra;
        dict.set("Type", "Page");
        dict.set(
            "MediaBox",
            page.media_box.iter().copied().map(Object::from).collect::<Vec<_>>(),
        );
        dict.set("Contents", content);
        dict.set("Resources", self.resources.resource_dictionary(&page.resources)?);
        self.pages.add_page(&mut self.writer, dict)
    }

    /// Emits resources, the page tree, catalog and Info, then the cross-reference section.
    pub fn close(mut self) -> Result<W> {
        self.resources.emit_all(&mut self.writer)?;
        let pages = self.pages.write_page_tree(&mut self.writer)?;
        let catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => pages,
        };
        let root = self.writer.add_to_body(Object::Dictionary(catalog))?;
        let info = self.writer.add_to_body(Object::Dictionary(self.info.to_dict()))?;
        self.writer.close(root, Some(info))?;
        Ok(self.writer.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icc::{IccColorSpace, IccProfile, test_profile};
    use crate::reader::PdfReader;
    use crate::resources::StaticResource;

    #[test]
    fn info_dictionary() {
        let dict = DocumentInfo::default().title("Report").author("\u{4e2d}").to_dict();
        assert_eq!(dict.get(b"Title").unwrap().as_str().unwrap(), b"Report");
        assert_eq!(&dict.get(b"Author").unwrap().as_str().unwrap()[..2], &[0xFE, 0xFF]);
        assert!(dict.get(b"Producer").unwrap().as_str().unwrap().starts_with(b"pdfwright "));
        assert!(!dict.has(b"Subject"));
    }

    #[test]
    fn pages_with_resources() {
        let mut document = PdfDocument::new(Vec::new(), SaveOptions::default());
        let gs = document
            .register_resource(
                ResourceKind::ExtGState,
                StaticResource(Object::Dictionary(dictionary! { "CA" => 0.5 })),
            )
            .unwrap();
        let profile = IccProfile::from_bytes(&test_profile(b"RGB ", 128)).unwrap();
        let cs = document
            .register_resource(ResourceKind::ColorSpace, IccColorSpace { profile, alternate: None })
            .unwrap();
        let name = document.resource_name(gs).unwrap().to_string();
        let operators = format!("/{name} gs 0 0 m 10 10 l S");
        document
            .add_page(PageContent::new(200.0, 100.0).content(operators.as_bytes()).resource(gs).resource(cs))
            .unwrap();
        document.add_page(PageContent::new(200.0, 100.0).set("Rotate", 90)).unwrap();

        let reader = PdfReader::load_mem(&document.close().unwrap()).unwrap();
        assert_eq!(reader.page_count(), 2);

        let first = reader.page_dictionary(reader.page_id(1).unwrap()).unwrap();
        let resources = first.get(b"Resources").unwrap().as_dict().unwrap();
        let color_space = resources.get(b"ColorSpace").unwrap().as_dict().unwrap().get(b"CS1").unwrap();
        let color_space = reader.dereference(color_space).unwrap().1.as_array().unwrap();
        assert_eq!(color_space[0].as_name().unwrap(), b"ICCBased");
        let stream = reader.get_object(color_space[1].as_reference().unwrap()).unwrap().as_stream().unwrap();
        assert_eq!(stream.dict.get(b"N").unwrap().as_i64().unwrap(), 3);

        let second = reader.page_dictionary(reader.page_id(2).unwrap()).unwrap();
        assert_eq!(second.get(b"Rotate").unwrap().as_i64().unwrap(), 90);
    }
}
