use aes::cipher::{BlockDecryptMut as _, BlockEncryptMut as _, KeyInit as _, KeyIvInit as _};
use md5::{Digest as _, Md5};
use rand::Rng as _;
use sha2::{Sha256, Sha384, Sha512};

use super::rc4::Rc4;
use super::{EncryptionError, EncryptionMethod, Permissions};
use crate::error::{SecurityError, UsageError};
use crate::save_options::EncryptionConfig;
use crate::{Dictionary, Object, Result, encodings};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256EcbEnc = ecb::Encryptor<aes::Aes256>;
type Aes256EcbDec = ecb::Decryptor<aes::Aes256>;

// Short passwords are padded with the start of this string.
const PAD_BYTES: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08, 0x2E, 0x2E, 0x00,
    0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// The password-based `/Standard` security handler, revisions 2 to 6.
#[derive(Clone, Debug)]
pub struct StandardSecurityHandler {
    version: i64,
    revision: i64,
    /// File key length in bytes.
    key_length: usize,
    encrypt_metadata: bool,
    owner_value: Vec<u8>,
    owner_encrypted: Vec<u8>,
    user_value: Vec<u8>,
    user_encrypted: Vec<u8>,
    /// The raw `/P` value; reserved bits take part in key derivation.
    permissions: i32,
    permission_encrypted: Vec<u8>,
    embedded_files_only: bool,
}

/// Outcome of a successful password check.
#[derive(Debug, Clone)]
pub struct Authentication {
    pub file_encryption_key: Vec<u8>,
    /// The owner password was supplied, so every operation is allowed.
    pub owner: bool,
}

fn string_entry(dict: &Dictionary, key: &[u8]) -> Option<Vec<u8>> {
    dict.get(key).and_then(Object::as_str).map(<[u8]>::to_vec).ok()
}

fn padded(password: &[u8]) -> [u8; 32] {
    let len = password.len().min(32);
    let mut bytes = [0u8; 32];
    bytes[..len].copy_from_slice(&password[..len]);
    bytes[len..].copy_from_slice(&PAD_BYTES[..32 - len]);
    bytes
}

fn aes256_cbc_no_padding(key: &[u8; 32], data: &mut [u8], encrypt: bool) {
    let iv = [0u8; 16];
    if encrypt {
        let mut cipher = Aes256CbcEnc::new(key.as_slice().into(), &iv.into());
        for block in data.chunks_exact_mut(16) {
            cipher.encrypt_block_mut(block.into());
        }
    } else {
        let mut cipher = Aes256CbcDec::new(key.as_slice().into(), &iv.into());
        for block in data.chunks_exact_mut(16) {
            cipher.decrypt_block_mut(block.into());
        }
    }
}

impl StandardSecurityHandler {
    /// Reads the handler parameters from an `/Encrypt` dictionary.
    pub fn from_dict(encrypt: &Dictionary) -> Result<Self> {
        let filter = encrypt.get(b"Filter").and_then(Object::as_name)?;
        if filter != b"Standard" {
            return Err(SecurityError::UnsupportedSecurityHandler(filter.to_vec()).into());
        }

        let version = encrypt
            .get(b"V")
            .and_then(Object::as_i64)
            .map_err(|_| EncryptionError::MissingVersion)?;
        let revision = encrypt
            .get(b"R")
            .and_then(Object::as_i64)
            .map_err(|_| EncryptionError::MissingRevision)?;
        if !matches!(version, 1 | 2 | 4 | 5) {
            return Err(EncryptionError::UnsupportedVersion(version).into());
        }
        if !(2..=6).contains(&revision) {
            return Err(EncryptionError::UnsupportedRevision(revision).into());
        }

        // /Length is in bits and only meaningful for V2 and V3; V4 and V5 fix the size.
        let key_length = match version {
            1 => 5,
            2 => {
                let bits = encrypt.get(b"Length").and_then(Object::as_i64).unwrap_or(40);
                if bits % 8 != 0 || !(40..=128).contains(&bits) {
                    return Err(EncryptionError::InvalidKeyLength.into());
                }
                bits as usize / 8
            }
            4 => 16,
            _ => 32,
        };

        let hash_len = if revision <= 4 { 32 } else { 48 };
        let owner_value = string_entry(encrypt, b"O").ok_or(EncryptionError::MissingOwnerValue)?;
        let user_value = string_entry(encrypt, b"U").ok_or(EncryptionError::MissingUserValue)?;
        // Some producers append zero bytes to /O and /U.
        if owner_value.len() < hash_len || user_value.len() < hash_len {
            return Err(EncryptionError::InvalidHashLength.into());
        }
        let owner_value = owner_value[..hash_len].to_vec();
        let user_value = user_value[..hash_len].to_vec();

        let owner_encrypted = string_entry(encrypt, b"OE").unwrap_or_default();
        let user_encrypted = string_entry(encrypt, b"UE").unwrap_or_default();
        let permission_encrypted = string_entry(encrypt, b"Perms").unwrap_or_default();
        if revision >= 5
            && (owner_encrypted.len() != 32 || user_encrypted.len() != 32 || permission_encrypted.len() != 16)
        {
            return Err(EncryptionError::InvalidCipherTextLength.into());
        }

        let permissions = encrypt
            .get(b"P")
            .and_then(Object::as_i64)
            .map_err(|_| EncryptionError::MissingPermissions)? as i32;

        let encrypt_metadata = encrypt
            .get(b"EncryptMetadata")
            .and_then(Object::as_bool)
            .unwrap_or(true);

        let stream_filter = encrypt.get(b"StmF").and_then(Object::as_name).unwrap_or(b"Identity");
        let embedded_filter = encrypt.get(b"EFF").and_then(Object::as_name).unwrap_or(stream_filter);
        let embedded_files_only = version >= 4 && stream_filter == b"Identity" && embedded_filter != b"Identity";

        Ok(StandardSecurityHandler {
            version,
            revision,
            key_length,
            encrypt_metadata,
            owner_value,
            owner_encrypted,
            user_value,
            user_encrypted,
            permissions,
            permission_encrypted,
            embedded_files_only,
        })
    }

    /// Sets up encryption for a new document. Returns the handler and the file key.
    pub fn create(config: &EncryptionConfig, file_id: &[u8]) -> Result<(Self, Vec<u8>)> {
        let method = config.method;
        if config.embedded_files_only && !method.uses_crypt_filters() {
            return Err(UsageError::InvalidEncryptionConfig("embedded-files-only encryption requires AES").into());
        }

        let mut handler = StandardSecurityHandler {
            version: method.version(),
            revision: method.revision(),
            key_length: method.key_length(),
            encrypt_metadata: config.encrypt_metadata,
            owner_value: Vec::new(),
            owner_encrypted: Vec::new(),
            user_value: Vec::new(),
            user_encrypted: Vec::new(),
            permissions: config.permissions.p_value(),
            permission_encrypted: Vec::new(),
            embedded_files_only: config.embedded_files_only,
        };

        let user = handler.sanitize_password(&config.user_password)?;
        let owner = if config.owner_password.is_empty() {
            // An empty owner password is replaced by a random one the caller never sees.
            let mut random = [0u8; 16];
            rand::rng().fill(&mut random);
            random.to_vec()
        } else {
            handler.sanitize_password(&config.owner_password)?
        };

        let key = if handler.revision <= 4 {
            handler.owner_value = handler.owner_value_r4(&owner, &user)?;
            let key = handler.file_key_r4(&user, file_id)?;
            handler.user_value = handler.user_value_r4(&key, file_id)?;
            key
        } else {
            let mut key = [0u8; 32];
            rand::rng().fill(&mut key);
            handler.create_values_r6(&key, &user, &owner)?;
            key.to_vec()
        };

        Ok((handler, key))
    }

    pub fn revision(&self) -> i64 {
        self.revision
    }

    pub fn permissions(&self) -> Permissions {
        Permissions::from_p_value(self.permissions)
    }

    pub fn encrypts_metadata(&self) -> bool {
        self.encrypt_metadata
    }

    /// The `/Encrypt` dictionary describing this handler.
    pub fn to_dict(&self) -> Dictionary {
        let mut dict = dictionary! {
            "Filter" => "Standard",
            "V" => self.version,
            "R" => self.revision,
            "O" => Object::string_hex(self.owner_value.clone()),
            "U" => Object::string_hex(self.user_value.clone()),
            "P" => self.permissions,
        };
        if self.version == 2 {
            dict.set("Length", (self.key_length * 8) as i64);
        }
        if self.version >= 4 {
            let method: &[u8] = if self.version == 4 {
                EncryptionMethod::Aes128.crypt_filter_method()
            } else {
                EncryptionMethod::Aes256.crypt_filter_method()
            };
            let auth_event = if self.embedded_files_only { "EFOpen" } else { "DocOpen" };
            dict.set(
                "CF",
                dictionary! {
                    "StdCF" => dictionary! {
                        "Type" => "CryptFilter",
                        "CFM" => Object::Name(method.to_vec()),
                        "AuthEvent" => auth_event,
                        "Length" => self.key_length as i64,
                    },
                },
            );
            let general = if self.embedded_files_only { "Identity" } else { "StdCF" };
            dict.set("StmF", general);
            dict.set("StrF", general);
            dict.set("EFF", "StdCF");
            if !self.encrypt_metadata {
                dict.set("EncryptMetadata", false);
            }
        }
        if self.revision >= 5 {
            dict.set("OE", Object::string_hex(self.owner_encrypted.clone()));
            dict.set("UE", Object::string_hex(self.user_encrypted.clone()));
            dict.set("Perms", Object::string_hex(self.permission_encrypted.clone()));
        }
        dict
    }

    /// Checks `password` as owner password first, then as user password.
    pub fn authenticate(&self, password: &str, file_id: &[u8]) -> Result<Authentication> {
        let password = self.sanitize_password(password)?;
        let (owner_key, user_key) = if self.revision <= 4 {
            match self.authenticate_owner_r4(&password, file_id)? {
                Some(key) => (Some(key), None),
                None => (None, self.authenticate_user_r4(&password, file_id)?),
            }
        } else {
            match self.authenticate_owner_r6(&password)? {
                Some(key) => (Some(key), None),
                None => (None, self.authenticate_user_r6(&password)?),
            }
        };

        match (owner_key, user_key) {
            (Some(file_encryption_key), _) => Ok(Authentication {
                file_encryption_key,
                owner: true,
            }),
            (None, Some(file_encryption_key)) => Ok(Authentication {
                file_encryption_key,
                owner: false,
            }),
            (None, None) => Err(SecurityError::IncorrectPassword.into()),
        }
    }

    /// PDFDocEncoding for revisions 2 to 4, SASLprep'd UTF-8 (at most 127 bytes) for 5 and 6.
    fn sanitize_password(&self, password: &str) -> Result<Vec<u8>> {
        if self.revision <= 4 {
            Ok(encodings::encode_pdf_doc(password))
        } else {
            let prepared = stringprep::saslprep(password).map_err(EncryptionError::from)?;
            let mut bytes = prepared.as_bytes().to_vec();
            bytes.truncate(127);
            Ok(bytes)
        }
    }

    fn rc4_passes(&self) -> bool {
        self.revision >= 3
    }

    /// Key derivation for revisions 2 to 4 (algorithm 2).
    fn file_key_r4(&self, password: &[u8], file_id: &[u8]) -> Result<Vec<u8>> {
        let n = self.key_length;
        if n > 16 {
            return Err(EncryptionError::InvalidKeyLength.into());
        }

        let mut hasher = Md5::new();
        hasher.update(padded(password));
        hasher.update(&self.owner_value);
        hasher.update(self.permissions.to_le_bytes());
        hasher.update(file_id);
        if self.revision >= 4 && !self.encrypt_metadata {
            hasher.update([0xff; 4]);
        }
        let mut hash = hasher.finalize();

        if self.rc4_passes() {
            for _ in 0..50 {
                hash = Md5::digest(&hash[..n]);
            }
        }
        Ok(hash[..n].to_vec())
    }

    /// RC4 key protecting the `/O` value (first steps of algorithm 3).
    fn owner_key_r4(&self, owner: &[u8]) -> Vec<u8> {
        let mut hash = Md5::digest(padded(owner));
        if self.rc4_passes() {
            for _ in 0..50 {
                hash = Md5::digest(hash);
            }
        }
        hash[..self.key_length.min(16)].to_vec()
    }

    /// The `/O` value (algorithm 3).
    fn owner_value_r4(&self, owner: &[u8], user: &[u8]) -> Result<Vec<u8>> {
        let key = self.owner_key_r4(owner);
        let mut result = Rc4::process(&key, &padded(user))?;
        if self.rc4_passes() {
            for round in 1..=19u8 {
                let round_key: Vec<u8> = key.iter().map(|byte| byte ^ round).collect();
                result = Rc4::process(&round_key, &result)?;
            }
        }
        Ok(result)
    }

    /// The `/U` value for a file key (algorithms 4 and 5).
    fn user_value_r4(&self, key: &[u8], file_id: &[u8]) -> Result<Vec<u8>> {
        if !self.rc4_passes() {
            return Ok(Rc4::process(key, &PAD_BYTES)?);
        }

        let mut hasher = Md5::new();
        hasher.update(PAD_BYTES);
        hasher.update(file_id);
        let mut result = Rc4::process(key, &hasher.finalize())?;
        for round in 1..=19u8 {
            let round_key: Vec<u8> = key.iter().map(|byte| byte ^ round).collect();
            result = Rc4::process(&round_key, &result)?;
        }
        // Only the first 16 bytes are checked; the rest is arbitrary padding.
        result.resize(32, 0);
        rand::rng().fill(&mut result[16..]);
        Ok(result)
    }

    /// Algorithm 6: the password is the user password if it reproduces `/U`.
    fn authenticate_user_r4(&self, password: &[u8], file_id: &[u8]) -> Result<Option<Vec<u8>>> {
        let key = self.file_key_r4(password, file_id)?;
        let expected = self.user_value_r4(&key, file_id)?;
        let len = if self.rc4_passes() { 16 } else { 32 };
        Ok((expected[..len] == self.user_value[..len]).then_some(key))
    }

    /// Algorithm 7: decrypting `/O` with the owner password yields the user password.
    fn authenticate_owner_r4(&self, password: &[u8], file_id: &[u8]) -> Result<Option<Vec<u8>>> {
        let key = self.owner_key_r4(password);
        let mut user = self.owner_value.clone();
        if self.rc4_passes() {
            for round in (1..=19u8).rev() {
                let round_key: Vec<u8> = key.iter().map(|byte| byte ^ round).collect();
                user = Rc4::process(&round_key, &user)?;
            }
        }
        user = Rc4::process(&key, &user)?;
        self.authenticate_user_r4(&user, file_id)
    }

    /// Hash for revisions 5 and 6 (algorithm 2.B; revision 5 uses plain SHA-256).
    fn hash_r6(&self, password: &[u8], salt: &[u8], user_value: Option<&[u8]>) -> Vec<u8> {
        let user_value = user_value.unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(password);
        hasher.update(salt);
        hasher.update(user_value);
        let mut k = hasher.finalize().to_vec();

        if self.revision == 5 {
            return k;
        }

        let repeat = password.len() + 64 + user_value.len();
        let mut k1 = Vec::with_capacity(64 * repeat);
        for round in 1u32.. {
            k1.clear();
            for _ in 0..64 {
                k1.extend_from_slice(password);
                k1.extend_from_slice(&k);
                k1.extend_from_slice(user_value);
            }

            let mut cipher = Aes128CbcEnc::new(k[..16].into(), k[16..32].into());
            for block in k1.chunks_exact_mut(16) {
                cipher.encrypt_block_mut(block.into());
            }

            // The first 16 bytes as a big-endian number, modulo 3; 256 is 1 modulo 3,
            // so the byte sum has the same remainder.
            k = match k1[..16].iter().map(|&byte| u32::from(byte)).sum::<u32>() % 3 {
                0 => Sha256::digest(&k1).to_vec(),
                1 => Sha384::digest(&k1).to_vec(),
                _ => Sha512::digest(&k1).to_vec(),
            };

            let last = u32::from(k1.last().copied().unwrap_or(0));
            if round >= 64 && last + 32 <= round {
                break;
            }
        }

        k.truncate(32);
        k
    }

    /// Fills `/U`, `/UE`, `/O`, `/OE` and `/Perms` (algorithms 8, 9 and 10).
    fn create_values_r6(&mut self, key: &[u8; 32], user: &[u8], owner: &[u8]) -> Result<()> {
        let mut rng = rand::rng();

        let mut user_value = vec![0u8; 48];
        rng.fill(&mut user_value[32..]);
        let hash = self.hash_r6(user, &user_value[32..40], None);
        user_value[..32].copy_from_slice(&hash);
        let intermediate = self.hash_r6(user, &user_value[40..48], None);
        let mut user_encrypted = key.to_vec();
        aes256_cbc_no_padding(&to_key(&intermediate)?, &mut user_encrypted, true);
        self.user_value = user_value;
        self.user_encrypted = user_encrypted;

        let mut owner_value = vec![0u8; 48];
        rng.fill(&mut owner_value[32..]);
        let hash = self.hash_r6(owner, &owner_value[32..40], Some(&self.user_value));
        owner_value[..32].copy_from_slice(&hash);
        let intermediate = self.hash_r6(owner, &owner_value[40..48], Some(&self.user_value));
        let mut owner_encrypted = key.to_vec();
        aes256_cbc_no_padding(&to_key(&intermediate)?, &mut owner_encrypted, true);
        self.owner_value = owner_value;
        self.owner_encrypted = owner_encrypted;

        let mut perms = [0u8; 16];
        perms[..8].copy_from_slice(&i64::from(self.permissions).to_le_bytes());
        perms[8] = if self.encrypt_metadata { b'T' } else { b'F' };
        perms[9..12].copy_from_slice(b"adb");
        rng.fill(&mut perms[12..]);
        Aes256EcbEnc::new(key.as_slice().into()).encrypt_block_mut(perms.as_mut_slice().into());
        self.permission_encrypted = perms.to_vec();
        Ok(())
    }

    fn authenticate_owner_r6(&self, password: &[u8]) -> Result<Option<Vec<u8>>> {
        let user_value = Some(self.user_value.as_slice());
        if self.hash_r6(password, &self.owner_value[32..40], user_value) != self.owner_value[..32] {
            return Ok(None);
        }
        let intermediate = self.hash_r6(password, &self.owner_value[40..48], user_value);
        let mut key = self.owner_encrypted.clone();
        aes256_cbc_no_padding(&to_key(&intermediate)?, &mut key, false);
        self.validate_permissions(&key)?;
        Ok(Some(key))
    }

    fn authenticate_user_r6(&self, password: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.hash_r6(password, &self.user_value[32..40], None) != self.user_value[..32] {
            return Ok(None);
        }
        let intermediate = self.hash_r6(password, &self.user_value[40..48], None);
        let mut key = self.user_encrypted.clone();
        aes256_cbc_no_padding(&to_key(&intermediate)?, &mut key, false);
        self.validate_permissions(&key)?;
        Ok(Some(key))
    }

    /// Algorithm 13: `/Perms` must decrypt to the same `/P` and metadata flag.
    fn validate_permissions(&self, key: &[u8]) -> Result<()> {
        let key = to_key(key)?;
        let mut perms = [0u8; 16];
        perms.copy_from_slice(&self.permission_encrypted);
        Aes256EcbDec::new(key.as_slice().into()).decrypt_block_mut(perms.as_mut_slice().into());

        let flag = if self.encrypt_metadata { b'T' } else { b'F' };
        if &perms[9..12] != b"adb" || perms[..4] != self.permissions.to_le_bytes() || perms[8] != flag {
            return Err(SecurityError::IncorrectPassword.into());
        }
        Ok(())
    }
}

fn to_key(bytes: &[u8]) -> Result<[u8; 32]> {
    bytes
        .get(..32)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| EncryptionError::InvalidKeyLength.into())
}
