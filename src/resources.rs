use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::error::UsageError;
use crate::pdf_writer::IndirectObjectSink;
use crate::{Dictionary, Object, ObjectId, Result};

/// The resource categories of a page's `/Resources` dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Font,
    ColorSpace,
    XObject,
    ExtGState,
    Pattern,
    Shading,
}

impl ResourceKind {
    /// Prefix of generated resource names, `F1`, `CS1` and so on.
    pub fn prefix(self) -> &'static str {
        match self {
            ResourceKind::Font => "F",
            ResourceKind::ColorSpace => "CS",
            ResourceKind::XObject => "X",
            ResourceKind::ExtGState => "GS",
            ResourceKind::Pattern => "P",
            ResourceKind::Shading => "Sh",
        }
    }

    /// Key of the category inside `/Resources`.
    pub fn category(self) -> &'static str {
        match self {
            ResourceKind::Font => "Font",
            ResourceKind::ColorSpace => "ColorSpace",
            ResourceKind::XObject => "XObject",
            ResourceKind::ExtGState => "ExtGState",
            ResourceKind::Pattern => "Pattern",
            ResourceKind::Shading => "Shading",
        }
    }
}

/// Writes the final object of a resource once the document is complete.
///
/// `used` holds the glyph or component ids content streams reported through
/// [`ResourceRegistry::mark_used`], so a font can be subset before it is emitted.
pub trait ResourceEmitter {
    fn emit(self: Box<Self>, reference: ObjectId, used: &BTreeSet<u32>, sink: &mut dyn IndirectObjectSink) -> Result<()>;
}

/// A resource whose object is known up front.
#[derive(Debug, Clone)]
pub struct StaticResource(pub Object);

impl ResourceEmitter for StaticResource {
    fn emit(self: Box<Self>, reference: ObjectId, _used: &BTreeSet<u32>, sink: &mut dyn IndirectObjectSink) -> Result<()> {
        sink.add_to_body_with_id(self.0, reference)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle(usize);

struct ResourceRecord {
    kind: ResourceKind,
    name: String,
    reference: ObjectId,
    used: BTreeSet<u32>,
    emitter: Box<dyn ResourceEmitter>,
}

/// Resources of one output document, each emitted exactly once at close.
#[derive(Default)]
pub struct ResourceRegistry {
    records: Vec<ResourceRecord>,
    counters: HashMap<ResourceKind, u32>,
}

impl ResourceRegistry {
    pub fn new() -> ResourceRegistry {
        ResourceRegistry::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Reserves a reference and a name for a resource written later by `emitter`.
    pub fn register(
        &mut self, kind: ResourceKind, emitter: impl ResourceEmitter + 'static, sink: &mut dyn IndirectObjectSink,
    ) -> Result<ResourceHandle> {
        let counter = self.counters.entry(kind).or_insert(0);
        *counter += 1;
        let name = format!("{}{}", kind.prefix(), counter);
        let reference = sink.allocate()?;
        self.records.push(ResourceRecord {
            kind,
            name,
            reference,
            used: BTreeSet::new(),
            emitter: Box::new(emitter),
        });
        Ok(ResourceHandle(self.records.len() - 1))
    }

    fn record(&self, handle: ResourceHandle) -> Result<&ResourceRecord> {
        self.records.get(handle.0).ok_or_else(|| UsageError::UnknownResource.into())
    }

    pub fn name(&self, handle: ResourceHandle) -> Result<&str> {
        Ok(&self.record(handle)?.name)
    }

    pub fn reference(&self, handle: ResourceHandle) -> Result<ObjectId> {
        Ok(self.record(handle)?.reference)
    }

    pub fn kind(&self, handle: ResourceHandle) -> Result<ResourceKind> {
        Ok(self.record(handle)?.kind)
    }

    /// Adds glyph or component ids used by content written so far.
    pub fn mark_used(&mut self, handle: ResourceHandle, ids: impl IntoIterator<Item = u32>) -> Result<()> {
        let record = self.records.get_mut(handle.0).ok_or(UsageError::UnknownResource)?;
        record.used.extend(ids);
        Ok(())
    }

    pub fn used(&self, handle: ResourceHandle) -> Result<&BTreeSet<u32>> {
        Ok(&self.record(handle)?.used)
    }

    /// A `/Resources` dictionary naming the given resources.
    pub fn resource_dictionary(&self, handles: &[ResourceHandle]) -> Result<Dictionary> {
        let mut resources = Dictionary::new();
        for &handle in handles {
            let record = self.record(handle)?;
            let category = record.kind.category().as_bytes();
            if !resources.has(category) {
                resources.set(category, Dictionary::new());
            }
            resources
                .get_mut(category)?
                .as_dict_mut()?
                .set(record.name.as_str(), record.reference);
        }
        Ok(resources)
    }

    /// Emits every record. The registry is consumed.
    pub fn emit_all(self, sink: &mut dyn IndirectObjectSink) -> Result<usize> {
        let count = self.records.len();
        for record in self.records {
            debug!("emitting resource {} as {} {}", record.name, record.reference.0, record.reference.1);
            record.emitter.emit(record.reference, &record.used, sink)?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        next: u32,
        objects: BTreeMap<ObjectId, Object>,
    }

    impl IndirectObjectSink for Recorder {
        fn allocate(&mut self) -> Result<ObjectId> {
            self.next += 1;
            Ok((self.next, 0))
        }

        fn add_to_body_with_id(&mut self, object: Object, id: ObjectId) -> Result<()> {
            self.objects.insert(id, object);
            Ok(())
        }
    }

    struct SubsetFont(Rc<RefCell<Vec<u32>>>);

    impl ResourceEmitter for SubsetFont {
        fn emit(self: Box<Self>, reference: ObjectId, used: &BTreeSet<u32>, sink: &mut dyn IndirectObjectSink) -> Result<()> {
            self.0.borrow_mut().extend(used.iter().copied());
            sink.add_to_body_with_id(Object::Dictionary(dictionary! { "Type" => "Font" }), reference)
        }
    }

    #[test]
    fn names_are_numbered_per_kind() {
        let mut sink = Recorder::default();
        let mut registry = ResourceRegistry::new();
        let f1 = registry.register(ResourceKind::Font, StaticResource(Object::Null), &mut sink).unwrap();
        let gs = registry.register(ResourceKind::ExtGState, StaticResource(Object::Null), &mut sink).unwrap();
        let f2 = registry.register(ResourceKind::Font, StaticResource(Object::Null), &mut sink).unwrap();
        assert_eq!(registry.name(f1).unwrap(), "F1");
        assert_eq!(registry.name(gs).unwrap(), "GS1");
        assert_eq!(registry.name(f2).unwrap(), "F2");

        let resources = registry.resource_dictionary(&[f1, gs, f2]).unwrap();
        let fonts = resources.get(b"Font").unwrap().as_dict().unwrap();
        assert_eq!(fonts.len(), 2);
        assert_eq!(fonts.get(b"F2").unwrap().as_reference().unwrap(), registry.reference(f2).unwrap());
    }

    #[test]
    fn used_ids_reach_the_emitter_once() {
        let mut sink = Recorder::default();
        let mut registry = ResourceRegistry::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let font = registry.register(ResourceKind::Font, SubsetFont(seen.clone()), &mut sink).unwrap();
        registry.mark_used(font, [7, 3]).unwrap();
        registry.mark_used(font, [3, 12]).unwrap();
        let reference = registry.reference(font).unwrap();

        assert_eq!(registry.emit_all(&mut sink).unwrap(), 1);
        assert_eq!(*seen.borrow(), vec![3, 7, 12]);
        assert!(sink.objects.contains_key(&reference));
    }

    #[test]
    fn foreign_handles_are_rejected() {
        let mut registry = ResourceRegistry::new();
        let err = registry.mark_used(ResourceHandle(4), [1]).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidOperation(UsageError::UnknownResource)));
    }
}
