use std::collections::BTreeMap;

use crate::error::UsageError;
use crate::xref::{Xref, XrefEntry};
use crate::{ObjectId, Result};

/// Where a written object ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Offset(u64),
    InStream { container: u32, index: u16 },
}

/// Object numbers handed out for one output document, and what became of them.
#[derive(Debug)]
pub struct IndirectReferenceTable {
    next_number: u32,
    first_number: u32,
    written: BTreeMap<u32, (u16, Location)>,
}

impl Default for IndirectReferenceTable {
    fn default() -> Self {
        IndirectReferenceTable::new()
    }
}

impl IndirectReferenceTable {
    pub fn new() -> IndirectReferenceTable {
        IndirectReferenceTable::starting_at(1)
    }

    /// Numbering for an incremental update of a file whose `/Size` is `size`.
    pub fn starting_at(size: u32) -> IndirectReferenceTable {
        let first = size.max(1);
        IndirectReferenceTable {
            next_number: first,
            first_number: first,
            written: BTreeMap::new(),
        }
    }

    pub fn allocate(&mut self) -> ObjectId {
        let id = (self.next_number, 0);
        self.next_number += 1;
        id
    }

    /// Makes sure numbers up to `id` are never handed out again.
    pub fn reserve(&mut self, id: ObjectId) {
        if id.0 >= self.next_number {
            self.next_number = id.0 + 1;
        }
    }

    pub fn is_written(&self, id: ObjectId) -> bool {
        self.written.get(&id.0).is_some_and(|(generation, _)| *generation == id.1)
    }

    pub fn record(&mut self, id: ObjectId, location: Location) -> Result<()> {
        if self.written.contains_key(&id.0) {
            return Err(UsageError::ObjectAlreadyWritten(id).into());
        }
        self.reserve(id);
        self.written.insert(id.0, (id.1, location));
        Ok(())
    }

    /// One greater than the highest number handed out.
    pub fn size(&self) -> u32 {
        self.next_number
    }

    pub fn written_count(&self) -> usize {
        self.written.len()
    }

    /// Every number from 0 up to `size() - 1`: written objects as in-use entries,
    /// everything else as free entries chained from entry 0.
    pub fn full_xref(&self) -> Xref {
        let size = self.size();
        let mut xref = Xref::new(size);
        let free: Vec<u32> = (1..size).filter(|number| !self.written.contains_key(number)).collect();

        let mut next_free = free.iter().copied().chain(std::iter::once(0));
        xref.insert(
            0,
            XrefEntry::Free {
                next: next_free.next().unwrap_or(0),
                generation: 65535,
            },
        );
        for &number in &free {
            xref.insert(
                number,
                XrefEntry::Free {
                    next: next_free.next().unwrap_or(0),
                    generation: 65535,
                },
            );
        }
        for (&number, &(generation, location)) in &self.written {
            xref.insert(number, entry_for(generation, location));
        }
        xref
    }

    /// Only the objects written in this pass, for an incremental update section.
    pub fn update_xref(&self) -> Xref {
        if self.first_number <= 1 {
            return self.full_xref();
        }
        let mut xref = Xref::new(self.size());
        for (&number, &(generation, location)) in &self.written {
            xref.insert(number, entry_for(generation, location));
        }
        // Numbers allocated in this pass but never written still need an entry.
        for number in self.first_number..self.size() {
            if !self.written.contains_key(&number) {
                xref.insert(number, XrefEntry::Free { next: 0, generation: 65535 });
            }
        }
        xref
    }
}

fn entry_for(generation: u16, location: Location) -> XrefEntry {
    match location {
        Location::Offset(offset) => XrefEntry::Normal { offset, generation },
        Location::InStream { container, index } => XrefEntry::Compressed { container, index },
    }
}
