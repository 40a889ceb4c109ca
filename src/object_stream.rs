use std::collections::BTreeMap;

use log::{trace, warn};

use crate::error::ParseError;
use crate::parser::{self, ParserInput};
use crate::writer::Writer;
use crate::{Error, Object, ObjectId, Result, Stream};

/// The objects packed into an object stream read from a source document.
#[derive(Debug)]
pub struct ObjectStream {
    pub objects: BTreeMap<ObjectId, Object>,
}

impl ObjectStream {
    pub fn new(stream: &Stream) -> Result<ObjectStream> {
        let content = stream.decoded_content()?;
        if content.is_empty() {
            return Ok(ObjectStream {
                objects: BTreeMap::new(),
            });
        }

        let first_offset = stream
            .dict
            .get(b"First")
            .and_then(Object::as_i64)
            .ok()
            .and_then(|first| usize::try_from(first).ok())
            .ok_or(ParseError::InvalidObjectStream)?;
        let index_block = content.get(..first_offset).ok_or(Error::InvalidOffset(first_offset))?;

        let numbers: Vec<Option<usize>> = std::str::from_utf8(index_block)?
            .split_whitespace()
            .map(|number| number.parse().ok())
            .collect();

        let n = stream.dict.get(b"N").and_then(Object::as_i64)?;
        if i64::try_from(numbers.len()).ok() != n.checked_mul(2) {
            warn!("object stream: the object stream dictionary specifies a wrong number of objects");
        }

        let mut objects = BTreeMap::new();
        for pair in numbers.chunks_exact(2) {
            let (Some(number), Some(offset)) = (pair[0], pair[1]) else {
                return Err(ParseError::InvalidObjectStream.into());
            };
            let offset = first_offset + offset;
            let object = content
                .get(offset..)
                .and_then(|object| parser::direct_object(ParserInput::new_extra(object, "object stream")))
                .ok_or(ParseError::InvalidObjectStream)?;
            let number = u32::try_from(number).map_err(|_| ParseError::InvalidObjectStream)?;
            objects.insert((number, 0), object);
        }

        Ok(ObjectStream { objects })
    }
}

/// Collects serialized objects for one output object stream.
#[derive(Debug)]
pub struct ObjectStreamBuilder {
    id: ObjectId,
    offsets: Vec<(u32, usize)>,
    body: Vec<u8>,
}

impl ObjectStreamBuilder {
    pub fn new(id: ObjectId) -> Self {
        ObjectStreamBuilder {
            id,
            offsets: Vec::new(),
            body: Vec::new(),
        }
    }

    /// The id the object stream itself will be written under.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Appends `object` and returns its index inside the stream.
    pub fn add(&mut self, number: u32, object: &Object) -> Result<u16> {
        let index = u16::try_from(self.offsets.len()).map_err(|_| Error::NumericCast("object stream index".into()))?;
        self.offsets.push((number, self.body.len()));
        Writer::write_object(&mut self.body, object)?;
        self.body.push(b'\n');
        trace!("object {number} packed at index {index} of object stream {}", self.id.0);
        Ok(index)
    }

    /// The finished `/Type /ObjStm` stream, unfiltered.
    pub fn into_stream(self) -> Stream {
        let mut header = String::new();
        for (number, offset) in &self.offsets {
            header.push_str(&format!("{number} {offset} "));
        }
        header.pop();
        header.push('\n');

        let dict = dictionary! {
            "Type" => "ObjStm",
            "N" => self.offsets.len(),
            "First" => header.len(),
        };
        let mut content = header.into_bytes();
        content.extend(self.body);
        Stream::new(dict, content)
    }
}
