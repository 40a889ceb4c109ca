use std::cmp;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, error, warn};
use nom::Input;
use rand::Rng;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::encryption::{EncryptionState, Permissions, StandardSecurityHandler};
use crate::error::{ParseError, SecurityError, UsageError, XrefError};
use crate::object::LazyContent;
use crate::object_stream::ObjectStream;
use crate::parser::{self, ParserInput};
use crate::xref::{Xref, XrefEntry};
use crate::{Dictionary, Error, Object, ObjectId, Result};

/// Keys a page inherits from its ancestors in the page tree.
const INHERITABLE_PAGE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

static NEXT_READER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one [`PdfReader`] instance for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReaderId(u64);

impl ReaderId {
    fn next() -> ReaderId {
        ReaderId(NEXT_READER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Consumption {
    Fresh,
    Consumed(u64),
}

#[derive(Debug)]
struct ReaderSecurity {
    state: EncryptionState,
    handler: StandardSecurityHandler,
    owner: bool,
}

/// Resolves objects straight from the source bytes while the document is being loaded.
pub(crate) struct Loader {
    source: Arc<Vec<u8>>,
    xref: Xref,
    /// Set once the password is authenticated.
    encryption: Option<EncryptionState>,
}

impl Loader {
    fn new(source: Arc<Vec<u8>>) -> Loader {
        Loader {
            source,
            xref: Xref::new(0),
            encryption: None,
        }
    }

    /// Value of an indirect `/Length`.
    pub(crate) fn resolve_length(&self, id: ObjectId, already_seen: &mut HashSet<ObjectId>) -> Result<i64> {
        match self.xref.get(id.0) {
            Some(&XrefEntry::Compressed { container, .. }) => {
                self.compressed_object(id, container, already_seen)?.as_i64()
            }
            _ => self.get_object(id, already_seen)?.as_i64(),
        }
    }

    /// An object stored inside the object stream `container`.
    fn compressed_object(
        &self, id: ObjectId, container: u32, already_seen: &mut HashSet<ObjectId>,
    ) -> Result<Object> {
        let container_id = (container, 0);
        let mut object = self.get_object(container_id, already_seen)?;
        if let Some(state) = &self.encryption {
            state.decrypt_object(container_id, &mut object)?;
        }
        let mut objects = ObjectStream::new(object.as_stream()?)?.objects;
        objects.remove(&id).ok_or(Error::ObjectNotFound(id))
    }

    pub(crate) fn lazy_content(&self, offset: usize, length: usize) -> LazyContent {
        LazyContent::new(self.source.clone(), offset, length)
    }

    fn get_offset(&self, id: ObjectId) -> Result<usize> {
        match self.xref.get(id.0) {
            Some(&XrefEntry::Normal { offset, generation }) if generation == id.1 => {
                usize::try_from(offset).map_err(|_| Error::InvalidOffset(usize::MAX))
            }
            _ => Err(Error::MissingXrefEntry),
        }
    }

    fn get_object(&self, id: ObjectId, already_seen: &mut HashSet<ObjectId>) -> Result<Object> {
        if !already_seen.insert(id) {
            warn!("reference cycle detected resolving object {} {}", id.0, id.1);
            return Err(Error::ReferenceCycle(id));
        }
        let offset = self.get_offset(id)?;
        let (_, object) = self.read_object(offset, Some(id), already_seen)?;
        Ok(object)
    }

    fn read_object(
        &self, offset: usize, expected_id: Option<ObjectId>, already_seen: &mut HashSet<ObjectId>,
    ) -> Result<(ObjectId, Object)> {
        if offset > self.source.len() {
            return Err(Error::InvalidOffset(offset));
        }
        parser::indirect_object(
            ParserInput::new_extra(&self.source, "indirect object"),
            offset,
            expected_id,
            self,
            already_seen,
        )
    }

    fn xref_section(&self, offset: usize, error: XrefError) -> Result<(Xref, Dictionary)> {
        if offset > self.source.len() {
            return Err(error.into());
        }
        parser::xref_and_trailer(ParserInput::new_extra(&self.source, "xref").take_from(offset), self)
    }
}

/// A parsed source document.
///
/// Stream contents stay in the shared source buffer until they are asked for.
/// Strings of encrypted documents are decrypted at load time, streams on access.
#[derive(Debug)]
pub struct PdfReader {
    id: ReaderId,
    source: Arc<Vec<u8>>,
    /// The version from the file header.
    pub version: String,
    /// The trailer of the newest cross-reference section.
    pub trailer: Dictionary,
    /// The merged cross-reference of every section.
    pub xref: Xref,
    pub objects: BTreeMap<ObjectId, Object>,
    xref_start: usize,
    security: Option<ReaderSecurity>,
    consumption: Consumption,
}

impl PdfReader {
    /// Load a PDF document from a specified file path.
    #[inline]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<PdfReader> {
        Self::load_with_password(path, None)
    }

    pub fn load_with_password<P: AsRef<Path>>(path: P, password: Option<&str>) -> Result<PdfReader> {
        let file = File::open(path)?;
        let capacity = file.metadata()?.len() as usize;
        Self::load_internal(file, Some(capacity), password)
    }

    /// Load a PDF document from an arbitrary source.
    #[inline]
    pub fn load_from<R: Read>(source: R) -> Result<PdfReader> {
        Self::load_internal(source, None, None)
    }

    /// Load a PDF document from a memory slice.
    pub fn load_mem(buffer: &[u8]) -> Result<PdfReader> {
        Self::load_mem_with_password(buffer, None)
    }

    pub fn load_mem_with_password(buffer: &[u8], password: Option<&str>) -> Result<PdfReader> {
        Self::read(buffer.to_vec(), password)
    }

    fn load_internal<R: Read>(mut source: R, capacity: Option<usize>, password: Option<&str>) -> Result<PdfReader> {
        let mut buffer = capacity.map(Vec::with_capacity).unwrap_or_default();
        source.read_to_end(&mut buffer)?;
        Self::read(buffer, password)
    }

    fn read(mut buffer: Vec<u8>, password: Option<&str>) -> Result<PdfReader> {
        let offset = buffer.windows(5).position(|w| w == b"%PDF-").unwrap_or(0);
        if offset > 0 {
            debug!("skipping {offset} bytes before the file header");
            buffer.drain(..offset);
        }

        let version = parser::header(ParserInput::new_extra(&buffer, "header")).ok_or(ParseError::InvalidFileHeader)?;
        let xref_start = get_xref_start(&buffer)?;
        if xref_start > buffer.len() {
            return Err(Error::Xref(XrefError::Start));
        }

        let mut loader = Loader::new(Arc::new(buffer));
        let (xref, trailer) = read_xref_chain(&loader, xref_start)?;
        loader.xref = xref;

        let security = match trailer.get(b"Encrypt") {
            Ok(encrypt) => Some(authenticate(&loader, &trailer, encrypt, password.unwrap_or(""))?),
            Err(_) => None,
        };
        let encrypt_id = trailer.get(b"Encrypt").and_then(Object::as_reference).ok();
        loader.encryption = security.as_ref().map(|security| security.state.clone());
        let objects = load_objects(&loader, loader.encryption.as_ref(), encrypt_id)?;

        let Loader { source, xref, .. } = loader;
        Ok(PdfReader {
            id: ReaderId::next(),
            source,
            version,
            trailer,
            xref,
            objects,
            xref_start,
            security,
            consumption: Consumption::Fresh,
        })
    }

    pub fn id(&self) -> ReaderId {
        self.id
    }

    /// The bytes the document was loaded from, starting at `%PDF-`.
    pub fn source(&self) -> &[u8] {
        &self.source
    }

    /// Offset of the newest cross-reference section.
    pub fn xref_start(&self) -> usize {
        self.xref_start
    }

    /// The `/Size` of the document: one more than the highest object number.
    pub fn size(&self) -> u32 {
        self.xref.size
    }

    pub fn is_encrypted(&self) -> bool {
        self.security.is_some()
    }

    /// True for unencrypted documents and for documents opened with the owner password.
    pub fn is_opened_with_full_permissions(&self) -> bool {
        self.security.as_ref().is_none_or(|security| security.owner)
    }

    pub fn permissions(&self) -> Permissions {
        match &self.security {
            Some(security) if !security.owner => security.handler.permissions(),
            _ => Permissions::all(),
        }
    }

    pub fn encryption_state(&self) -> Option<&EncryptionState> {
        self.security.as_ref().map(|security| &security.state)
    }

    /// Marks the reader as taken by one copy engine. Another engine gets a usage error.
    pub(crate) fn consume(&mut self, engine: u64) -> Result<()> {
        match self.consumption {
            Consumption::Fresh => {
                self.consumption = Consumption::Consumed(engine);
                Ok(())
            }
            Consumption::Consumed(owner) if owner == engine => Ok(()),
            Consumption::Consumed(_) => Err(UsageError::ReaderConsumed.into()),
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.consumption != Consumption::Fresh
    }

    pub fn get_object(&self, id: ObjectId) -> Result<&Object> {
        self.objects.get(&id).ok_or(Error::ObjectNotFound(id))
    }

    pub fn get_object_mut(&mut self, id: ObjectId) -> Result<&mut Object> {
        self.objects.get_mut(&id).ok_or(Error::ObjectNotFound(id))
    }

    /// Follows references until a direct object is reached. Returns the id of the
    /// last object dereferenced, if any.
    pub fn dereference<'a>(&'a self, mut object: &'a Object) -> Result<(Option<ObjectId>, &'a Object)> {
        let mut id = None;
        let mut seen = HashSet::new();
        while let Object::Reference(reference) = *object {
            if !seen.insert(reference) {
                return Err(Error::ReferenceCycle(reference));
            }
            id = Some(reference);
            object = self.get_object(reference)?;
        }
        Ok((id, object))
    }

    pub fn get_dictionary(&self, id: ObjectId) -> Result<&Dictionary> {
        let (_, object) = self.dereference(self.get_object(id)?)?;
        object.as_dict()
    }

    pub fn catalog(&self) -> Result<&Dictionary> {
        let (_, root) = self.dereference(self.trailer.get(b"Root")?)?;
        root.as_dict()
    }

    /// Page number (starting at 1) to page object id, in page tree order.
    pub fn get_pages(&self) -> BTreeMap<u32, ObjectId> {
        let mut pages = BTreeMap::new();
        let Ok(root) = self.catalog().and_then(|catalog| catalog.get(b"Pages")).and_then(Object::as_reference) else {
            return pages;
        };

        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                warn!("page tree node {} {} is reachable twice", id.0, id.1);
                continue;
            }
            let Ok(node) = self.get_dictionary(id) else {
                continue;
            };
            match node.get(b"Kids").and_then(Object::as_array) {
                Ok(kids) if !node.type_is(b"Page") => {
                    stack.extend(kids.iter().rev().filter_map(|kid| kid.as_reference().ok()));
                }
                _ => {
                    let number = pages.len() as u32 + 1;
                    pages.insert(number, id);
                }
            }
        }
        pages
    }

    pub fn page_count(&self) -> usize {
        self.get_pages().len()
    }

    pub fn page_id(&self, page_number: u32) -> Result<ObjectId> {
        self.get_pages()
            .get(&page_number)
            .copied()
            .ok_or_else(|| UsageError::PageNumberNotFound(page_number).into())
    }

    /// The page dictionary with `/Resources`, `/MediaBox`, `/CropBox` and `/Rotate`
    /// filled in from its ancestors where the page itself lacks them.
    pub fn page_dictionary(&self, page_id: ObjectId) -> Result<Dictionary> {
        let mut page = self.get_dictionary(page_id)?.clone();
        let mut seen = HashSet::from([page_id]);
        let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
        while let Some(id) = parent {
            if !seen.insert(id) {
                return Err(Error::ReferenceCycle(id));
            }
            let node = self.get_dictionary(id)?;
            for key in INHERITABLE_PAGE_KEYS {
                if !page.has(key) {
                    if let Ok(value) = node.get(key) {
                        page.set(key, value.clone());
                    }
                }
            }
            parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        }
        Ok(page)
    }

    /// Replaces named destinations of link annotations with the explicit
    /// destinations from `/Dests` and the `/Names /Dests` tree. Returns the
    /// number of links rewritten.
    pub fn consolidate_named_destinations(&mut self) -> Result<usize> {
        let names = self.named_destinations()?;
        if names.is_empty() {
            return Ok(0);
        }

        let mut slots = Vec::new();
        for page_id in self.get_pages().into_values() {
            let Ok(annots) = self.get_dictionary(page_id).and_then(|page| page.get(b"Annots")) else {
                continue;
            };
            let (holder, annots) = match annots {
                Object::Reference(id) => (*id, self.get_object(*id)?),
                direct => (page_id, direct),
            };
            let Ok(annots) = annots.as_array() else {
                continue;
            };
            for (index, annot) in annots.iter().enumerate() {
                match annot {
                    Object::Reference(id) => slots.push(AnnotationSlot::Indirect(*id)),
                    Object::Dictionary(_) => slots.push(AnnotationSlot::Inline { holder, index }),
                    _ => {}
                }
            }
        }

        let mut rewritten = 0;
        for slot in slots {
            let annot = match slot {
                AnnotationSlot::Indirect(id) => self.get_object_mut(id).and_then(Object::as_dict_mut).ok(),
                AnnotationSlot::Inline { holder, index } => match self.get_object_mut(holder)? {
                    Object::Array(annots) => annots.get_mut(index),
                    Object::Dictionary(page) => page
                        .get_mut(b"Annots")
                        .and_then(Object::as_array_mut)
                        .ok()
                        .and_then(|annots| annots.get_mut(index)),
                    _ => None,
                }
                .and_then(|annot| annot.as_dict_mut().ok()),
            };
            if let Some(annot) = annot {
                if resolve_link_destination(annot, &names) {
                    rewritten += 1;
                }
            }
        }
        debug!("rewrote {rewritten} named destinations");
        Ok(rewritten)
    }

    fn named_destinations(&self) -> Result<BTreeMap<Vec<u8>, Object>> {
        let mut names = BTreeMap::new();
        let catalog = self.catalog()?;

        if let Ok((_, Object::Dictionary(dests))) = catalog.get(b"Dests").and_then(|dests| self.dereference(dests)) {
            for (name, destination) in dests {
                if let Some(destination) = self.explicit_destination(destination) {
                    names.insert(name.clone(), destination);
                }
            }
        }

        let tree = catalog
            .get(b"Names")
            .and_then(|names| self.dereference(names))
            .and_then(|(_, names)| names.as_dict())
            .and_then(|names| names.get(b"Dests"))
            .and_then(|tree| self.dereference(tree));
        if let Ok((id, Object::Dictionary(tree))) = tree {
            let mut seen = HashSet::new();
            seen.extend(id);
            self.collect_name_tree(tree, &mut names, &mut seen);
        }
        Ok(names)
    }

    fn collect_name_tree(
        &self, node: &Dictionary, names: &mut BTreeMap<Vec<u8>, Object>, seen: &mut HashSet<ObjectId>,
    ) {
        if let Ok(kids) = node.get(b"Kids").and_then(Object::as_array) {
            for kid in kids {
                let Ok(id) = kid.as_reference() else {
                    continue;
                };
                if !seen.insert(id) {
                    continue;
                }
                if let Ok(kid) = self.get_dictionary(id) {
                    self.collect_name_tree(kid, names, seen);
                }
            }
        }
        if let Ok(entries) = node.get(b"Names").and_then(Object::as_array) {
            for pair in entries.chunks_exact(2) {
                let (Ok(name), Some(destination)) = (pair[0].as_str(), self.explicit_destination(&pair[1])) else {
                    continue;
                };
                names.insert(name.to_vec(), destination);
            }
        }
    }

    /// An explicit destination array, given either directly or as the `/D` of a dictionary.
    fn explicit_destination(&self, value: &Object) -> Option<Object> {
        match self.dereference(value).ok()?.1 {
            array @ Object::Array(_) => Some(array.clone()),
            Object::Dictionary(dict) => match self.dereference(dict.get(b"D").ok()?).ok()?.1 {
                array @ Object::Array(_) => Some(array.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Gives every subset font (`ABCDEF+Name`) a fresh random prefix. A font and its
    /// descriptor sharing a prefix keep sharing the new one. Returns the number of
    /// names changed.
    pub fn shuffle_subset_names(&mut self) -> usize {
        let mut prefixes: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
        let mut rng = rand::rng();
        let mut renamed = 0;

        for object in self.objects.values_mut() {
            let dict = match object {
                Object::Dictionary(dict) => dict,
                Object::Stream(stream) => &mut stream.dict,
                _ => continue,
            };
            let key: &[u8] = if dict.type_is(b"Font") {
                b"BaseFont"
            } else if dict.type_is(b"FontDescriptor") {
                b"FontName"
            } else {
                continue;
            };
            let Ok(Object::Name(name)) = dict.get_mut(key) else {
                continue;
            };
            if !is_subset_name(name) {
                continue;
            }
            let prefix = prefixes
                .entry(name[..6].to_vec())
                .or_insert_with(|| (0..6).map(|_| rng.random_range(b'A'..=b'Z')).collect());
            name[..6].copy_from_slice(prefix);
            renamed += 1;
        }
        renamed
    }
}

#[derive(Debug, Clone, Copy)]
enum AnnotationSlot {
    Indirect(ObjectId),
    /// Index into the `/Annots` array held by `holder`, which is the page itself or
    /// an indirect array.
    Inline { holder: ObjectId, index: usize },
}

fn is_subset_name(name: &[u8]) -> bool {
    name.len() > 7 && name[6] == b'+' && name[..6].iter().all(u8::is_ascii_uppercase)
}

/// Rewrites `/Dest` or a GoTo action's `/D` on a link annotation when it names a
/// destination found in `names`.
fn resolve_link_destination(annot: &mut Dictionary, names: &BTreeMap<Vec<u8>, Object>) -> bool {
    if annot.get(b"Subtype").and_then(Object::as_name).ok() != Some(b"Link") {
        return false;
    }
    let lookup = |value: &Object| match value {
        Object::Name(name) | Object::String(name, _) => names.get(name).cloned(),
        _ => None,
    };

    if let Some(destination) = annot.get(b"Dest").ok().and_then(lookup) {
        annot.set("Dest", destination);
        return true;
    }
    if let Ok(action) = annot.get_mut(b"A").and_then(Object::as_dict_mut) {
        if action.get(b"S").and_then(Object::as_name).ok() == Some(b"GoTo") {
            if let Some(destination) = action.get(b"D").ok().and_then(lookup) {
                action.set("D", destination);
                return true;
            }
        }
    }
    false
}

/// Reads the newest cross-reference section and every older one reachable
/// through `/Prev` and `/XRefStm`.
fn read_xref_chain(loader: &Loader, xref_start: usize) -> Result<(Xref, Dictionary)> {
    let (mut xref, mut trailer) = loader.xref_section(xref_start, XrefError::Start)?;
    merge_hybrid_stream(loader, &mut xref, &mut trailer)?;

    let mut seen = HashSet::from([xref_start]);
    let mut prev_start = trailer.remove(b"Prev");
    while let Some(prev) = prev_start.and_then(|offset| offset.as_i64().ok()) {
        let prev = usize::try_from(prev).map_err(|_| XrefError::PrevStart)?;
        if !seen.insert(prev) {
            warn!("cross-reference section at {prev} is referenced twice");
            break;
        }
        let (prev_xref, mut prev_trailer) = loader.xref_section(prev, XrefError::PrevStart)?;
        xref.merge(prev_xref);
        merge_hybrid_stream(loader, &mut xref, &mut prev_trailer)?;
        prev_start = prev_trailer.remove(b"Prev");
    }

    let entry_count = xref.max_id().checked_add(1).ok_or(ParseError::InvalidXref)?;
    if xref.size != entry_count {
        warn!("Size entry of trailer dictionary is {}, correct value is {}.", xref.size, entry_count);
        xref.size = entry_count;
    }
    trailer.set("Size", i64::from(xref.size));
    Ok((xref, trailer))
}

fn merge_hybrid_stream(loader: &Loader, xref: &mut Xref, trailer: &mut Dictionary) -> Result<()> {
    if let Some(start) = trailer.remove(b"XRefStm").and_then(|offset| offset.as_i64().ok()) {
        let start = usize::try_from(start).map_err(|_| XrefError::StreamStart)?;
        let (stream_xref, _) = loader.xref_section(start, XrefError::StreamStart)?;
        xref.merge(stream_xref);
    }
    Ok(())
}

fn authenticate(loader: &Loader, trailer: &Dictionary, encrypt: &Object, password: &str) -> Result<ReaderSecurity> {
    let encrypt = match encrypt {
        Object::Reference(id) => loader.get_object(*id, &mut HashSet::new())?,
        direct => direct.clone(),
    };
    let encrypt = encrypt.as_dict()?;
    if encrypt.get(b"Filter").and_then(Object::as_name).ok() != Some(b"Standard") {
        let filter = encrypt.get(b"Filter").and_then(Object::as_name).unwrap_or(b"");
        return Err(SecurityError::UnsupportedSecurityHandler(filter.to_vec()).into());
    }

    let file_id = trailer
        .get(b"ID")
        .and_then(Object::as_array)
        .ok()
        .and_then(|ids| ids.first())
        .and_then(|id| id.as_str().ok())
        .unwrap_or_default();
    let handler = StandardSecurityHandler::from_dict(encrypt)?;
    let authentication = handler.authenticate(password, file_id)?;
    debug!(
        "authenticated revision {} handler as {}",
        handler.revision(),
        if authentication.owner { "owner" } else { "user" }
    );
    let state = EncryptionState::from_dict(encrypt, authentication.file_encryption_key)?;
    Ok(ReaderSecurity {
        state,
        handler,
        owner: authentication.owner,
    })
}

fn load_objects(
    loader: &Loader, encryption: Option<&EncryptionState>, encrypt_id: Option<ObjectId>,
) -> Result<BTreeMap<ObjectId, Object>> {
    let parse_entry = |(&number, entry): (&u32, &XrefEntry)| -> Option<Result<(ObjectId, Object)>> {
        let XrefEntry::Normal { offset, generation } = *entry else {
            return None;
        };
        let result = usize::try_from(offset)
            .map_err(|_| Error::InvalidOffset(usize::MAX))
            .and_then(|offset| loader.read_object(offset, Some((number, generation)), &mut HashSet::new()))
            .and_then(|(id, mut object)| {
                if let Some(state) = encryption {
                    if Some(id) != encrypt_id {
                        state.decrypt_object(id, &mut object)?;
                    }
                }
                Ok((id, object))
            });
        if let Err(err) = &result {
            error!("object {number} {generation} at offset {offset} could not be loaded: {err}");
        }
        Some(result)
    };

    #[cfg(feature = "rayon")]
    let mut objects: BTreeMap<ObjectId, Object> = loader
        .xref
        .entries
        .par_iter()
        .filter_map(parse_entry)
        .collect::<Result<_>>()?;
    #[cfg(not(feature = "rayon"))]
    let mut objects: BTreeMap<ObjectId, Object> = loader
        .xref
        .entries
        .iter()
        .filter_map(parse_entry)
        .collect::<Result<_>>()?;

    let containers: HashSet<u32> = loader
        .xref
        .entries
        .values()
        .filter_map(|entry| match entry {
            XrefEntry::Compressed { container, .. } => Some(*container),
            _ => None,
        })
        .collect();
    for container in containers {
        let Some(Object::Stream(stream)) = objects.get(&(container, 0)) else {
            return Err(ParseError::InvalidObjectStream.into());
        };
        let object_stream = ObjectStream::new(stream)?;
        for (id, object) in object_stream.objects {
            let listed_here = matches!(
                loader.xref.get(id.0),
                Some(XrefEntry::Compressed { container: listed, .. }) if *listed == container
            );
            if listed_here {
                objects.entry(id).or_insert(object);
            }
        }
    }

    objects.retain(|_, object| match object {
        Object::Stream(stream) => !stream.dict.type_is(b"ObjStm") && !stream.dict.type_is(b"XRef"),
        _ => true,
    });
    debug!("loaded {} objects", objects.len());
    Ok(objects)
}

fn get_xref_start(buffer: &[u8]) -> Result<usize> {
    let seek_pos = buffer.len() - cmp::min(buffer.len(), 512);
    search_substring(buffer, b"%%EOF", seek_pos)
        .and_then(|eof_pos| if eof_pos > 25 { Some(eof_pos) } else { None })
        .and_then(|eof_pos| search_substring(buffer, b"startxref", eof_pos - 25))
        .and_then(|xref_pos| parser::xref_start(ParserInput::new_extra(buffer.get(xref_pos..)?, "startxref")))
        .and_then(|start| usize::try_from(start).ok())
        .ok_or(Error::Xref(XrefError::Start))
}

/// Position of the last occurrence of `pattern` at or after `start_pos`.
fn search_substring(buffer: &[u8], pattern: &[u8], start_pos: usize) -> Option<usize> {
    buffer
        .get(start_pos..)?
        .windows(pattern.len())
        .rposition(|window| window == pattern)
        .map(|position| start_pos + position)
}

#[cfg(test)]
/// A classic-xref file with `objects` numbered from 1; object 1 is the catalog.
pub(crate) fn build_test_pdf(objects: &[&str]) -> Vec<u8> {
    let mut out = b"%PDF-1.5\n".to_vec();
    let mut offsets = Vec::new();
    for (index, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend(format!("{} 0 obj\n{}\nendobj\n", index + 1, body).as_bytes());
    }
    let start = out.len();
    out.extend(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in offsets {
        out.extend(format!("{offset:010} 00000 n \n").as_bytes());
    }
    out.extend(
        format!("trailer\n<</Size {}/Root 1 0 R>>\nstartxref\n{start}\n%%EOF\n", objects.len() + 1).as_bytes(),
    );
    out
}
