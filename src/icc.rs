use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use crate::pdf_writer::IndirectObjectSink;
use crate::resources::ResourceEmitter;
use crate::{Dictionary, Error, Object, ObjectId, Result, Stream};

const HEADER_LEN: usize = 128;

/// Colour space signatures of the profile header and their component counts.
static COLOR_SPACE_COMPONENTS: LazyLock<HashMap<&'static [u8; 4], u8>> = LazyLock::new(|| {
    let mut table: HashMap<&'static [u8; 4], u8> = HashMap::from([
        (b"XYZ ", 3),
        (b"Lab ", 3),
        (b"Luv ", 3),
        (b"YCbr", 3),
        (b"Yxy ", 3),
        (b"RGB ", 3),
        (b"GRAY", 1),
        (b"HSV ", 3),
        (b"HLS ", 3),
        (b"CMYK", 4),
        (b"CMY ", 3),
    ]);
    const MULTI: [&[u8; 4]; 14] = [
        b"2CLR", b"3CLR", b"4CLR", b"5CLR", b"6CLR", b"7CLR", b"8CLR", b"9CLR", b"ACLR", b"BCLR", b"CCLR", b"DCLR",
        b"ECLR", b"FCLR",
    ];
    for (index, signature) in MULTI.into_iter().enumerate() {
        table.insert(signature, index as u8 + 2);
    }
    table
});

/// An embedded ICC colour profile.
#[derive(Debug, Clone, PartialEq)]
pub struct IccProfile {
    data: Vec<u8>,
    components: u8,
}

impl IccProfile {
    /// Validates the profile header. Bytes past the declared profile size are dropped.
    pub fn from_bytes(data: &[u8]) -> Result<IccProfile> {
        if data.len() < HEADER_LEN {
            return Err(Error::InvalidIccProfile(format!("{} bytes is shorter than the header", data.len())));
        }
        let declared = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if declared < HEADER_LEN || declared > data.len() {
            return Err(Error::InvalidIccProfile(format!(
                "declared size {declared} does not fit {} bytes",
                data.len()
            )));
        }
        if &data[36..40] != b"acsp" {
            return Err(Error::InvalidIccProfile("missing acsp signature".to_string()));
        }
        let signature: &[u8; 4] = data[16..20]
            .try_into()
            .map_err(|_| Error::InvalidIccProfile("truncated colour space".to_string()))?;
        let components = *COLOR_SPACE_COMPONENTS.get(signature).ok_or_else(|| {
            Error::InvalidIccProfile(format!("unknown colour space {}", String::from_utf8_lossy(signature)))
        })?;
        Ok(IccProfile {
            data: data[..declared].to_vec(),
            components,
        })
    }

    pub fn components(&self) -> u8 {
        self.components
    }

    pub fn color_space(&self) -> &[u8] {
        &self.data[16..20]
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The device space readers fall back to when they ignore the profile.
    pub fn default_alternate(&self) -> Option<&'static str> {
        match self.components {
            1 => Some("DeviceGray"),
            3 => Some("DeviceRGB"),
            4 => Some("DeviceCMYK"),
            _ => None,
        }
    }

    pub fn to_stream(&self, alternate: Option<Object>) -> Stream {
        let mut dict = Dictionary::new();
        dict.set("N", i64::from(self.components));
        let alternate = alternate.or_else(|| {
            self.default_alternate()
                .map(|name| Object::Name(name.as_bytes().to_vec()))
        });
        if let Some(alternate) = alternate {
            dict.set("Alternate", alternate);
        }
        Stream::new(dict, self.data.clone())
    }
}

/// A `[/ICCBased stream]` colour space resource.
#[derive(Debug, Clone)]
pub struct IccColorSpace {
    pub profile: IccProfile,
    pub alternate: Option<Object>,
}

impl ResourceEmitter for IccColorSpace {
    fn emit(self: Box<Self>, reference: ObjectId, _used: &BTreeSet<u32>, sink: &mut dyn IndirectObjectSink) -> Result<()> {
        let stream = sink.add_to_body(Object::Stream(self.profile.to_stream(self.alternate)))?;
        sink.add_to_body_with_id(
            Object::Array(vec![Object::Name(b"ICCBased".to_vec()), Object::Reference(stream)]),
            reference,
        )
    }
}

#[cfg(test)]
pub(crate) fn test_profile(color_space: &[u8; 4], size: usize) -> Vec<u8> {
    let mut data = vec![0; size.max(HEADER_LEN)];
    data[0..4].copy_from_slice(&(size as u32).to_be_bytes());
    data[12..16].copy_from_slice(b"mntr");
    data[16..20].copy_from_slice(color_space);
    data[36..40].copy_from_slice(b"acsp");
    data
}
