mod algorithms;
pub mod crypt_filters;
mod rc4;

use std::collections::BTreeMap;
use std::sync::Arc;

use bitflags::bitflags;
use thiserror::Error;

use crate::object::StreamContent;
use crate::{Dictionary, Object, ObjectId, Result};
use crypt_filters::*;

pub use algorithms::StandardSecurityHandler;

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("missing encryption version (/V)")]
    MissingVersion,
    #[error("missing encryption revision (/R)")]
    MissingRevision,
    #[error("missing the owner password hash (/O)")]
    MissingOwnerValue,
    #[error("missing the user password hash (/U)")]
    MissingUserValue,
    #[error("missing the permissions field (/P)")]
    MissingPermissions,
    #[error("missing the file /ID elements")]
    MissingFileID,

    #[error("invalid key length")]
    InvalidKeyLength,
    #[error("invalid ciphertext length")]
    InvalidCipherTextLength,
    #[error("invalid password hash length")]
    InvalidHashLength,
    #[error("invalid padding in decrypted data")]
    Padding,
    // Used generically when an entry of the encryption dictionary has the wrong type.
    #[error("unexpected type in the encryption dictionary")]
    InvalidType,

    #[error("the encryption version {0} is not supported")]
    UnsupportedVersion(i64),
    #[error("the encryption revision {0} is not supported")]
    UnsupportedRevision(i64),
    #[error("crypt filter /{0} is not defined")]
    UnknownCryptFilter(String),

    #[error(transparent)]
    StringPrep(#[from] stringprep::Error),
}

// Bits 7-8 and 13-32 must be set, bits 1-2 must be clear.
const RESERVED_PERMISSION_BITS: u32 = 0xFFFF_F0C0;

bitflags! {
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    pub struct Permissions: u32 {
        /// Print the document. Without [`Permissions::PRINTABLE_IN_HIGH_QUALITY`] printing may
        /// be limited to a degraded representation (revision 3 and later).
        const PRINTABLE = 1 << 2;

        /// Modify the contents of the document by operations other than those controlled by
        /// [`Permissions::ANNOTABLE`], [`Permissions::FILLABLE`] and [`Permissions::ASSEMBLABLE`].
        const MODIFIABLE = 1 << 3;

        /// Copy or otherwise extract text and graphics from the document.
        const COPYABLE = 1 << 4;

        /// Add or modify text annotations and fill in interactive form fields.
        const ANNOTABLE = 1 << 5;

        /// Fill in existing interactive fields, even if [`Permissions::ANNOTABLE`] is clear.
        const FILLABLE = 1 << 8;

        /// Extract text and graphics for accessibility purposes.
        const COPYABLE_FOR_ACCESSIBILITY = 1 << 9;

        /// Insert, rotate or delete pages and create outline items or thumbnails.
        const ASSEMBLABLE = 1 << 10;

        /// Print at full fidelity.
        const PRINTABLE_IN_HIGH_QUALITY = 1 << 11;
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Permissions::all()
    }
}

impl Permissions {
    /// The signed `/P` value, reserved bits included.
    pub fn p_value(&self) -> i32 {
        (self.bits() | RESERVED_PERMISSION_BITS) as i32
    }

    pub fn from_p_value(p: i32) -> Permissions {
        Permissions::from_bits_truncate(p as u32)
    }
}

/// Encryption algorithm of the standard security handler.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMethod {
    /// RC4 with a 40-bit key (`/V 1 /R 2`).
    Rc4_40,
    /// RC4 with a 128-bit key (`/V 2 /R 3`).
    Rc4_128,
    /// AES-128 through the `AESV2` crypt filter (`/V 4 /R 4`).
    Aes128,
    /// AES-256 through the `AESV3` crypt filter (`/V 5 /R 6`).
    Aes256,
}

impl EncryptionMethod {
    pub fn version(&self) -> i64 {
        match self {
            EncryptionMethod::Rc4_40 => 1,
            EncryptionMethod::Rc4_128 => 2,
            EncryptionMethod::Aes128 => 4,
            EncryptionMethod::Aes256 => 5,
        }
    }

    pub fn revision(&self) -> i64 {
        match self {
            EncryptionMethod::Rc4_40 => 2,
            EncryptionMethod::Rc4_128 => 3,
            EncryptionMethod::Aes128 => 4,
            EncryptionMethod::Aes256 => 6,
        }
    }

    /// File key length in bytes.
    pub fn key_length(&self) -> usize {
        match self {
            EncryptionMethod::Rc4_40 => 5,
            EncryptionMethod::Rc4_128 | EncryptionMethod::Aes128 => 16,
            EncryptionMethod::Aes256 => 32,
        }
    }

    /// The lowest PDF version that knows this method.
    pub fn min_pdf_version(&self) -> (u8, u8) {
        match self {
            EncryptionMethod::Rc4_40 | EncryptionMethod::Rc4_128 => (1, 4),
            EncryptionMethod::Aes128 => (1, 6),
            EncryptionMethod::Aes256 => (1, 7),
        }
    }

    pub fn uses_crypt_filters(&self) -> bool {
        self.version() >= 4
    }

    pub(crate) fn crypt_filter_method(&self) -> &'static [u8] {
        match self {
            EncryptionMethod::Rc4_40 | EncryptionMethod::Rc4_128 => b"V2",
            EncryptionMethod::Aes128 => b"AESV2",
            EncryptionMethod::Aes256 => b"AESV3",
        }
    }
}

/// Name of the crypt filter used for everything in documents without `/CF`.
const DEFAULT_FILTER: &[u8] = b"StdCF";

/// Everything needed to encrypt or decrypt the objects of one document.
#[derive(Clone, Debug)]
pub struct EncryptionState {
    crypt_filters: BTreeMap<Vec<u8>, Arc<dyn CryptFilter>>,
    file_encryption_key: Vec<u8>,
    stream_filter: Vec<u8>,
    string_filter: Vec<u8>,
    embedded_file_filter: Vec<u8>,
    encrypt_metadata: bool,
}

/// Decrypts the content of one stream read from a source document.
#[derive(Clone, Debug)]
pub struct StreamDecryption {
    filter: Arc<dyn CryptFilter>,
    key: Vec<u8>,
}

impl StreamDecryption {
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(self.filter.decrypt(&self.key, ciphertext)?)
    }
}

impl EncryptionState {
    /// Builds the state from an `/Encrypt` dictionary and an authenticated file key.
    pub fn from_dict(encrypt: &Dictionary, file_encryption_key: Vec<u8>) -> Result<Self> {
        let version = encrypt
            .get(b"V")
            .and_then(Object::as_i64)
            .map_err(|_| EncryptionError::MissingVersion)?;
        let encrypt_metadata = encrypt
            .get(b"EncryptMetadata")
            .and_then(Object::as_bool)
            .unwrap_or(true);

        let mut crypt_filters: BTreeMap<Vec<u8>, Arc<dyn CryptFilter>> = BTreeMap::new();
        if version < 4 {
            crypt_filters.insert(DEFAULT_FILTER.to_vec(), Arc::new(Rc4CryptFilter));
            return Ok(EncryptionState {
                crypt_filters,
                file_encryption_key,
                stream_filter: DEFAULT_FILTER.to_vec(),
                string_filter: DEFAULT_FILTER.to_vec(),
                embedded_file_filter: DEFAULT_FILTER.to_vec(),
                encrypt_metadata,
            });
        }

        if let Ok(filters) = encrypt.get(b"CF").and_then(Object::as_dict) {
            for (name, filter) in filters {
                let Ok(filter) = filter.as_dict() else {
                    continue;
                };
                let method = filter.get(b"CFM").and_then(Object::as_name).unwrap_or(b"None");
                let crypt_filter: Arc<dyn CryptFilter> = match method {
                    b"V2" => Arc::new(Rc4CryptFilter),
                    b"AESV2" => Arc::new(Aes128CryptFilter),
                    b"AESV3" => Arc::new(Aes256CryptFilter),
                    _ => Arc::new(IdentityCryptFilter),
                };
                crypt_filters.insert(name.clone(), crypt_filter);
            }
        }

        let name_of = |key: &[u8], default: &[u8]| {
            encrypt
                .get(key)
                .and_then(Object::as_name)
                .map(<[u8]>::to_vec)
                .unwrap_or_else(|_| default.to_vec())
        };
        let stream_filter = name_of(b"StmF", b"Identity");
        let string_filter = name_of(b"StrF", b"Identity");
        let embedded_file_filter = name_of(b"EFF", &stream_filter);

        Ok(EncryptionState {
            crypt_filters,
            file_encryption_key,
            stream_filter,
            string_filter,
            embedded_file_filter,
            encrypt_metadata,
        })
    }

    pub fn file_encryption_key(&self) -> &[u8] {
        &self.file_encryption_key
    }

    pub fn encrypts_strings(&self) -> bool {
        self.string_filter != b"Identity"
    }

    fn named(&self, name: &[u8]) -> Result<Option<Arc<dyn CryptFilter>>> {
        if name == b"Identity" {
            return Ok(None);
        }
        match self.crypt_filters.get(name) {
            Some(filter) if filter.is_identity() => Ok(None),
            Some(filter) => Ok(Some(filter.clone())),
            None => Err(EncryptionError::UnknownCryptFilter(String::from_utf8_lossy(name).into_owned()).into()),
        }
    }

    fn classify(&self, dict: &Dictionary) -> StreamClass {
        if dict.type_is(b"XRef") {
            StreamClass::Never
        } else if let Some(name) = crypt_filter_name(dict) {
            StreamClass::Tagged(name)
        } else if dict.type_is(b"EmbeddedFile") {
            StreamClass::EmbeddedFile
        } else if dict.type_is(b"Metadata") && !self.encrypt_metadata {
            StreamClass::ClearMetadata
        } else {
            StreamClass::Ordinary
        }
    }

    /// Picks the crypt filter for a stream that is about to be written and records the
    /// choice in its dictionary where a reader could not infer it.
    pub fn stream_filter_for_write(&self, dict: &mut Dictionary) -> Result<Option<Arc<dyn CryptFilter>>> {
        match self.classify(dict) {
            StreamClass::Never => Ok(None),
            StreamClass::Tagged(name) => self.named(&name),
            StreamClass::EmbeddedFile if self.embedded_file_filter != self.stream_filter => {
                let name = self.embedded_file_filter.clone();
                tag_crypt_filter(dict, &name);
                self.named(&name)
            }
            StreamClass::EmbeddedFile => self.named(&self.embedded_file_filter),
            StreamClass::ClearMetadata => {
                tag_crypt_filter(dict, b"Identity");
                Ok(None)
            }
            StreamClass::Ordinary => self.named(&self.stream_filter),
        }
    }

    pub fn stream_filter_for_read(&self, dict: &Dictionary) -> Result<Option<Arc<dyn CryptFilter>>> {
        match self.classify(dict) {
            StreamClass::Never | StreamClass::ClearMetadata => Ok(None),
            StreamClass::Tagged(name) => self.named(&name),
            StreamClass::EmbeddedFile => self.named(&self.embedded_file_filter),
            StreamClass::Ordinary => self.named(&self.stream_filter),
        }
    }

    pub fn object_key(&self, filter: &dyn CryptFilter, obj_id: ObjectId) -> Result<Vec<u8>> {
        Ok(filter.compute_key(&self.file_encryption_key, obj_id)?)
    }

    /// Encrypts every string reachable from `obj`, stream dictionaries included.
    /// Stream contents are left to the filter pipeline.
    pub fn encrypt_strings(&self, obj_id: ObjectId, obj: &mut Object) -> Result<()> {
        let Some(filter) = self.named(&self.string_filter)? else {
            return Ok(());
        };
        let key = self.object_key(filter.as_ref(), obj_id)?;
        transform_strings(obj, &mut |text| Ok(filter.encrypt(&key, text)?))
    }

    /// Decrypts the strings of an object read from an encrypted file and attaches
    /// decryption to its stream content.
    pub fn decrypt_object(&self, obj_id: ObjectId, obj: &mut Object) -> Result<()> {
        if let Object::Stream(stream) = obj {
            if stream.dict.type_is(b"XRef") {
                return Ok(());
            }
            if let Some(filter) = self.stream_filter_for_read(&stream.dict)? {
                let key = self.object_key(filter.as_ref(), obj_id)?;
                match &mut stream.content {
                    StreamContent::Lazy(lazy) => lazy.set_decryption(Some(StreamDecryption { filter, key })),
                    StreamContent::Inline(bytes) => *bytes = filter.decrypt(&key, bytes)?,
                }
            }
        }

        if let Some(filter) = self.named(&self.string_filter)? {
            let key = self.object_key(filter.as_ref(), obj_id)?;
            transform_strings(obj, &mut |text| Ok(filter.decrypt(&key, text)?))?;
        }
        Ok(())
    }
}

enum StreamClass {
    Never,
    Tagged(Vec<u8>),
    EmbeddedFile,
    ClearMetadata,
    Ordinary,
}

fn transform_strings(obj: &mut Object, transform: &mut dyn FnMut(&[u8]) -> Result<Vec<u8>>) -> Result<()> {
    match obj {
        Object::String(content, _) => *content = transform(content)?,
        Object::Array(objects) => {
            for obj in objects {
                transform_strings(obj, transform)?;
            }
        }
        Object::Dictionary(dict) => {
            for (_, obj) in dict.iter_mut() {
                transform_strings(obj, transform)?;
            }
        }
        Object::Stream(stream) => {
            for (_, obj) in stream.dict.iter_mut() {
                transform_strings(obj, transform)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// The `/Name` from the decode parameters of a `/Crypt` filter, Identity when absent.
fn crypt_filter_name(dict: &Dictionary) -> Option<Vec<u8>> {
    let filters = dict.get(b"Filter").ok()?;
    let index = match filters {
        Object::Name(name) => (name == b"Crypt").then_some(0)?,
        Object::Array(names) => names.iter().position(|name| name.as_name().ok() == Some(&b"Crypt"[..]))?,
        _ => return None,
    };
    let params = match dict.get(b"DecodeParms") {
        Ok(Object::Dictionary(params)) if index == 0 => Some(params),
        Ok(Object::Array(params)) => params.get(index).and_then(|params| params.as_dict().ok()),
        _ => None,
    };
    let name = params
        .and_then(|params| params.get(b"Name").and_then(Object::as_name).ok())
        .unwrap_or(b"Identity");
    Some(name.to_vec())
}

/// Puts a `/Crypt` filter in front of the existing filters of `dict`.
fn tag_crypt_filter(dict: &mut Dictionary, name: &[u8]) {
    let params = Object::Dictionary(dictionary! {
        "Type" => "CryptFilterDecodeParms",
        "Name" => Object::Name(name.to_vec()),
    });
    let crypt = Object::Name(b"Crypt".to_vec());

    match dict.remove(b"Filter") {
        None => {
            dict.set("Filter", crypt);
            dict.set("DecodeParms", params);
        }
        Some(existing) => {
            let mut filters = match existing {
                Object::Array(filters) => filters,
                other => vec![other],
            };
            let mut decode_params = match dict.remove(b"DecodeParms") {
                Some(Object::Array(decode_params)) => decode_params,
                Some(other) => vec![other],
                None => Vec::new(),
            };
            decode_params.resize(filters.len(), Object::Null);
            filters.insert(0, crypt);
            decode_params.insert(0, params);
            dict.set("Filter", filters);
            dict.set("DecodeParms", decode_params);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Stream;

    fn v4_state(embedded_only: bool, encrypt_metadata: bool) -> EncryptionState {
        let general = if embedded_only { "Identity" } else { "StdCF" };
        let encrypt = dictionary! {
            "Filter" => "Standard",
            "V" => 4,
            "R" => 4,
            "CF" => dictionary! {
                "StdCF" => dictionary! { "CFM" => "AESV2", "Length" => 16 },
            },
            "StmF" => general,
            "StrF" => general,
            "EFF" => "StdCF",
            "EncryptMetadata" => encrypt_metadata,
        };
        EncryptionState::from_dict(&encrypt, vec![9u8; 16]).unwrap()
    }

    #[test]
    fn permissions_keep_reserved_bits() {
        let p = (Permissions::PRINTABLE | Permissions::COPYABLE).p_value();
        assert_eq!(p, -3884);
        assert_eq!(Permissions::from_p_value(p), Permissions::PRINTABLE | Permissions::COPYABLE);
        assert_eq!(Permissions::all().p_value(), -4);
    }

    #[test]
    fn embedded_files_are_tagged_when_only_they_are_encrypted() {
        let state = v4_state(true, true);

        let mut ordinary = dictionary! {};
        assert!(state.stream_filter_for_write(&mut ordinary).unwrap().is_none());
        assert!(!ordinary.has(b"Filter"));

        let mut embedded = dictionary! { "Type" => "EmbeddedFile", "Filter" => "FlateDecode" };
        let filter = state.stream_filter_for_write(&mut embedded).unwrap().unwrap();
        assert_eq!(filter.method(), b"AESV2");
        let filters = embedded.get(b"Filter").unwrap().as_array().unwrap();
        assert_eq!(filters[0], Object::from("Crypt"));
        assert_eq!(filters[1], Object::from("FlateDecode"));
        assert_eq!(crypt_filter_name(&embedded), Some(b"StdCF".to_vec()));

        // The tag alone decides on reading.
        assert!(state.stream_filter_for_read(&embedded).unwrap().is_some());
        assert!(!state.encrypts_strings());
    }

    #[test]
    fn clear_metadata_is_tagged_identity() {
        let state = v4_state(false, false);
        let mut metadata = dictionary! { "Type" => "Metadata", "Subtype" => "XML" };
        assert!(state.stream_filter_for_write(&mut metadata).unwrap().is_none());
        assert_eq!(metadata.get(b"Filter").unwrap(), &Object::from("Crypt"));
        assert_eq!(crypt_filter_name(&metadata), Some(b"Identity".to_vec()));
    }

    #[test]
    fn xref_streams_are_never_encrypted() {
        let state = v4_state(false, true);
        let mut xref = dictionary! { "Type" => "XRef" };
        assert!(state.stream_filter_for_write(&mut xref).unwrap().is_none());
    }

    #[test]
    fn strings_round_trip() {
        let state = v4_state(false, true);
        let original = Object::Array(vec![Object::string_literal("secret"), 12.into()]);
        let mut object = original.clone();
        state.encrypt_strings((4, 0), &mut object).unwrap();
        assert_ne!(object, original);
        state.decrypt_object((4, 0), &mut object).unwrap();
        assert_eq!(object, original);
    }

    #[test]
    fn inline_stream_is_decrypted_in_place() {
        let state = v4_state(false, true);
        let mut dict = dictionary! {};
        let filter = state.stream_filter_for_write(&mut dict).unwrap().unwrap();
        let key = state.object_key(filter.as_ref(), (6, 0)).unwrap();
        let ciphertext = filter.encrypt(&key, b"content").unwrap();
        let mut object = Object::Stream(Stream::new(dict, ciphertext));
        state.decrypt_object((6, 0), &mut object).unwrap();
        assert_eq!(&*object.as_stream().unwrap().raw_content().unwrap(), b"content");
    }

    #[test]
    fn unknown_filter_is_an_error() {
        let state = v4_state(false, true);
        let mut dict = dictionary! {
            "Filter" => "Crypt",
            "DecodeParms" => dictionary! { "Name" => "Missing" },
        };
        assert!(state.stream_filter_for_write(&mut dict).is_err());
    }
}
