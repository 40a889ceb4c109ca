use log::debug;

use crate::error::UsageError;
use crate::pdf_writer::IndirectObjectSink;
use crate::{Dictionary, Object, ObjectId, Result};

/// Leaf size used once the tree is switched to a single flat parent.
const LINEAR_LEAF_SIZE: usize = 10_000_000;

/// Collects pages in order and writes a balanced `/Pages` tree at the end.
///
/// Every `leaf_size` pages share a parent whose reference is allocated as soon as
/// the first of them is added, so pages can be written with their `/Parent` right
/// away. The intermediate nodes are only written by [`PageTree::write_page_tree`].
#[derive(Debug)]
pub struct PageTree {
    leaf_size: usize,
    pages: Vec<ObjectId>,
    parents: Vec<ObjectId>,
}

impl Default for PageTree {
    fn default() -> Self {
        PageTree::new()
    }
}

impl PageTree {
    pub fn new() -> PageTree {
        PageTree::with_leaf_size(10)
    }

    pub fn with_leaf_size(leaf_size: usize) -> PageTree {
        PageTree {
            leaf_size: leaf_size.max(2),
            pages: Vec::new(),
            parents: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[ObjectId] {
        &self.pages
    }

    pub fn is_linear(&self) -> bool {
        self.leaf_size == LINEAR_LEAF_SIZE
    }

    /// Writes `page` as the next page and returns its reference.
    pub fn add_page(&mut self, sink: &mut dyn IndirectObjectSink, mut page: Dictionary) -> Result<ObjectId> {
        let id = sink.allocate()?;
        let parent = self.add_page_reference(sink, id)?;
        if !page.has(b"Type") {
            page.set("Type", "Page");
        }
        page.set("Parent", parent);
        sink.add_to_body_with_id(Object::Dictionary(page), id)?;
        Ok(id)
    }

    /// Appends a page whose body the caller writes. Returns the parent the page's
    /// `/Parent` must point to.
    pub fn add_page_reference(&mut self, sink: &mut dyn IndirectObjectSink, page: ObjectId) -> Result<ObjectId> {
        if self.pages.len() % self.leaf_size == 0 && (self.parents.is_empty() || !self.is_linear()) {
            self.parents.push(sink.allocate()?);
        }
        self.pages.push(page);
        let parent = self.parents[(self.pages.len() - 1) / self.leaf_size];
        Ok(parent)
    }

    /// Keeps every page under one parent from now on, `top_parent` if given.
    pub fn set_linear_mode(&mut self, top_parent: Option<ObjectId>) -> Result<()> {
        if self.parents.len() > 1 {
            return Err(UsageError::MultipleParents(self.parents.len()).into());
        }
        if let Some(top_parent) = top_parent {
            match self.parents.first() {
                None => self.parents.push(top_parent),
                Some(&parent) if parent == top_parent => {}
                Some(_) => return Err(UsageError::PageTreeStarted.into()),
            }
        }
        self.leaf_size = LINEAR_LEAF_SIZE;
        Ok(())
    }

    /// Rearranges the pages by a 1-based permutation. Only valid with a single parent.
    /// On error the order is left untouched.
    pub fn reorder_pages(&mut self, order: &[u32]) -> Result<()> {
        if self.parents.len() > 1 {
            return Err(UsageError::MultipleParents(self.parents.len()).into());
        }
        let max = self.pages.len();
        if order.len() != max {
            return Err(UsageError::ReorderLengthMismatch {
                expected: max,
                found: order.len(),
            }
            .into());
        }

        let mut seen = vec![false; max];
        for &page in order {
            let index = (page as usize).checked_sub(1).filter(|index| *index < max);
            let Some(index) = index else {
                return Err(UsageError::ReorderOutOfRange { page, max }.into());
            };
            if seen[index] {
                return Err(UsageError::ReorderDuplicate(page).into());
            }
            seen[index] = true;
        }

        self.pages = order.iter().map(|&page| self.pages[page as usize - 1]).collect();
        Ok(())
    }

    /// Writes the intermediate `/Pages` nodes, one level at a time, and returns the root.
    pub fn write_page_tree(&self, sink: &mut dyn IndirectObjectSink) -> Result<ObjectId> {
        if self.pages.is_empty() {
            return Err(UsageError::NoPages.into());
        }

        let mut level: Vec<PagesNode> = self
            .pages
            .chunks(self.leaf_size)
            .zip(&self.parents)
            .map(|(kids, &id)| PagesNode {
                id,
                kids: kids.to_vec(),
                count: kids.len(),
            })
            .collect();
        let mut depth = 1;

        loop {
            if let [root] = level.as_slice() {
                sink.add_to_body_with_id(Object::Dictionary(root.to_dict(None)), root.id)?;
                debug!("page tree with {} pages written, depth {depth}", root.count);
                return Ok(root.id);
            }

            let mut next = Vec::new();
            for group in level.chunks(self.leaf_size) {
                let parent = sink.allocate()?;
                for node in group {
                    sink.add_to_body_with_id(Object::Dictionary(node.to_dict(Some(parent))), node.id)?;
                }
                next.push(PagesNode {
                    id: parent,
                    kids: group.iter().map(|node| node.id).collect(),
                    count: group.iter().map(|node| node.count).sum(),
                });
            }
            level = next;
            depth += 1;
        }
    }
}

struct PagesNode {
    id: ObjectId,
    kids: Vec<ObjectId>,
    count: usize,
}

impl PagesNode {
    fn to_dict(&self, parent: Option<ObjectId>) -> Dictionary {
        let mut dict = dictionary! {
            "Type" => "Pages",
            "Kids" => self.kids.iter().copied().map(Object::Reference).collect::<Vec<_>>(),
            "Count" => self.count,
        };
        if let Some(parent) = parent {
            dict.set("Parent", parent);
        }
        dict
    }
}
