use std::collections::{HashMap, HashSet};

use md5::{Digest as _, Md5};

use crate::reader::{PdfReader, ReaderId};
use crate::writer::Writer;
use crate::{Object, ObjectId, Result};

/// How deep the canonical walk follows the object graph.
pub const DEFAULT_DEPTH_BUDGET: usize = 100;

/// Canonical serialization of source objects, used to recognize identical
/// streams (fonts, images) across merged documents.
///
/// Dictionaries are written with sorted keys, nested streams as the MD5 of their
/// raw bytes. An object already on the current path becomes a cycle marker.
#[derive(Debug)]
pub struct Fingerprinter {
    depth_budget: usize,
    cache: HashMap<ReaderId, HashMap<ObjectId, Vec<u8>>>,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Fingerprinter::new()
    }
}

impl Fingerprinter {
    pub fn new() -> Fingerprinter {
        Fingerprinter::with_depth_budget(DEFAULT_DEPTH_BUDGET)
    }

    pub fn with_depth_budget(depth_budget: usize) -> Fingerprinter {
        Fingerprinter {
            depth_budget,
            cache: HashMap::new(),
        }
    }

    /// The canonical bytes of object `id` of `reader`.
    pub fn fingerprint(&mut self, reader: &PdfReader, id: ObjectId) -> Result<Vec<u8>> {
        let mut path = HashSet::new();
        let (bytes, _) = self.indirect(reader, id, self.depth_budget, &mut path)?;
        Ok(bytes)
    }

    /// Also returns whether the walk was complete. Walks that hit a cycle marker or
    /// the depth limit depend on where they started and are not cached.
    fn indirect(
        &mut self, reader: &PdfReader, id: ObjectId, depth: usize, path: &mut HashSet<ObjectId>,
    ) -> Result<(Vec<u8>, bool)> {
        if let Some(cached) = self.cache.get(&reader.id()).and_then(|cache| cache.get(&id)) {
            return Ok((cached.clone(), true));
        }

        let mut out = Vec::new();
        let complete = match reader.get_object(id) {
            Ok(object) => {
                path.insert(id);
                let complete = self.serialize(reader, object, depth, path, &mut out)?;
                path.remove(&id);
                complete
            }
            Err(_) => {
                out.extend_from_slice(b"null");
                true
            }
        };
        if complete {
            self.cache.entry(reader.id()).or_default().insert(id, out.clone());
        }
        Ok((out, complete))
    }

    fn serialize(
        &mut self, reader: &PdfReader, object: &Object, depth: usize, path: &mut HashSet<ObjectId>,
        out: &mut Vec<u8>,
    ) -> Result<bool> {
        if depth == 0 {
            return Ok(false);
        }
        let mut complete = true;
        match object {
            Object::Reference(id) if path.contains(id) => {
                out.extend_from_slice(b"$L");
                complete = false;
            }
            Object::Reference(id) => {
                let (bytes, nested) = self.indirect(reader, *id, depth - 1, path)?;
                out.extend(bytes);
                complete = nested;
            }
            Object::Dictionary(dict) => {
                out.extend_from_slice(b"$D");
                let mut keys: Vec<&Vec<u8>> = dict.keys().collect();
                keys.sort();
                for key in keys {
                    out.extend_from_slice(b"$N");
                    out.extend_from_slice(key);
                    complete &= self.serialize(reader, dict.get(key)?, depth - 1, path, out)?;
                }
                out.extend_from_slice(b"$d");
            }
            Object::Stream(stream) => {
                out.extend_from_slice(b"$B");
                complete = self.serialize(reader, &Object::Dictionary(stream.dict.clone()), depth - 1, path, out)?;
                out.extend_from_slice(&Md5::digest(stream.raw_content()?));
            }
            Object::Array(array) => {
                out.extend_from_slice(b"$A");
                for item in array {
                    complete &= self.serialize(reader, item, depth - 1, path, out)?;
                }
                out.extend_from_slice(b"$a");
            }
            Object::String(text, _) => {
                out.extend_from_slice(b"$S");
                out.extend_from_slice(text);
            }
            Object::Name(name) => {
                out.extend_from_slice(b"$N");
                out.extend_from_slice(name);
            }
            scalar => {
                out.extend_from_slice(b"$V");
                out.extend(Writer::to_bytes(scalar)?);
            }
        }
        Ok(complete)
    }
}
