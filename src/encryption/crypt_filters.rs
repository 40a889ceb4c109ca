use aes::cipher::block_padding::{Padding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::{Digest as _, Md5};
use rand::Rng as _;

use super::EncryptionError;
use super::rc4::Rc4;
use crate::ObjectId;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// A named way of encrypting strings and streams (`/CFM` of a crypt filter).
pub trait CryptFilter: std::fmt::Debug + Send + Sync {
    fn method(&self) -> &[u8];

    /// Derives the key used for the object `obj_id` from the file key.
    fn compute_key(&self, key: &[u8], obj_id: ObjectId) -> Result<Vec<u8>, EncryptionError>;

    /// Starts encrypting a stream whose total size is not known yet.
    fn encryptor(&self, key: &[u8]) -> Result<Box<dyn StreamEncryptor>, EncryptionError>;

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError>;

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let mut encryptor = self.encryptor(key)?;
        let mut ciphertext = encryptor.update(plaintext);
        ciphertext.extend(encryptor.finish()?);
        Ok(ciphertext)
    }

    fn is_identity(&self) -> bool {
        false
    }
}

/// Incremental encryption of a byte stream.
pub trait StreamEncryptor: Send {
    /// Encrypts the next chunk, returning whatever output is ready.
    fn update(&mut self, data: &[u8]) -> Vec<u8>;

    /// Emits the remaining output, including any padding.
    fn finish(self: Box<Self>) -> Result<Vec<u8>, EncryptionError>;
}

#[derive(Clone, Copy, Debug)]
pub struct IdentityCryptFilter;

impl CryptFilter for IdentityCryptFilter {
    fn method(&self) -> &[u8] {
        b"Identity"
    }

    fn compute_key(&self, key: &[u8], _obj_id: ObjectId) -> Result<Vec<u8>, EncryptionError> {
        Ok(key.to_vec())
    }

    fn encryptor(&self, _key: &[u8]) -> Result<Box<dyn StreamEncryptor>, EncryptionError> {
        Ok(Box::new(PassThrough))
    }

    fn decrypt(&self, _key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        Ok(ciphertext.to_vec())
    }

    fn is_identity(&self) -> bool {
        true
    }
}

struct PassThrough;

impl StreamEncryptor for PassThrough {
    fn update(&mut self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, EncryptionError> {
        Ok(Vec::new())
    }
}

/// Extends the file key with the low bytes of the object number and generation
/// (plus the AES salt) and hashes it, keeping at most 16 bytes.
fn object_key(key: &[u8], obj_id: ObjectId, salt: &[u8]) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(key);
    hasher.update(&obj_id.0.to_le_bytes()[..3]);
    hasher.update(obj_id.1.to_le_bytes());
    hasher.update(salt);
    let len = std::cmp::min(key.len() + 5, 16);
    hasher.finalize()[..len].to_vec()
}

#[derive(Clone, Copy, Debug)]
pub struct Rc4CryptFilter;

impl CryptFilter for Rc4CryptFilter {
    fn method(&self) -> &[u8] {
        b"V2"
    }

    fn compute_key(&self, key: &[u8], obj_id: ObjectId) -> Result<Vec<u8>, EncryptionError> {
        Ok(object_key(key, obj_id, b""))
    }

    fn encryptor(&self, key: &[u8]) -> Result<Box<dyn StreamEncryptor>, EncryptionError> {
        Ok(Box::new(Rc4Encryptor(Rc4::new(key)?)))
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        Rc4::process(key, ciphertext)
    }
}

struct Rc4Encryptor(Rc4);

impl StreamEncryptor for Rc4Encryptor {
    fn update(&mut self, data: &[u8]) -> Vec<u8> {
        let mut output = data.to_vec();
        self.0.apply(&mut output);
        output
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, EncryptionError> {
        Ok(Vec::new())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Aes128CryptFilter;

impl CryptFilter for Aes128CryptFilter {
    fn method(&self) -> &[u8] {
        b"AESV2"
    }

    fn compute_key(&self, key: &[u8], obj_id: ObjectId) -> Result<Vec<u8>, EncryptionError> {
        Ok(object_key(key, obj_id, b"sAlT"))
    }

    fn encryptor(&self, key: &[u8]) -> Result<Box<dyn StreamEncryptor>, EncryptionError> {
        let key: [u8; 16] = key.try_into().map_err(|_| EncryptionError::InvalidKeyLength)?;
        let iv = random_iv();
        let cipher = CbcCipher::Aes128(Aes128CbcEnc::new(&key.into(), &iv.into()));
        Ok(Box::new(AesEncryptor::new(cipher, iv)))
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let key: [u8; 16] = key.try_into().map_err(|_| EncryptionError::InvalidKeyLength)?;
        let Some((iv, data)) = split_iv(ciphertext)? else {
            return Ok(Vec::new());
        };
        let mut data = data.to_vec();
        let plaintext = Aes128CbcDec::new(&key.into(), &iv.into())
            .decrypt_padded_mut::<Pkcs7>(&mut data)
            .map_err(|_| EncryptionError::Padding)?;
        Ok(plaintext.to_vec())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Aes256CryptFilter;

impl CryptFilter for Aes256CryptFilter {
    fn method(&self) -> &[u8] {
        b"AESV3"
    }

    // AESV3 uses the 32-byte file key for every object.
    fn compute_key(&self, key: &[u8], _obj_id: ObjectId) -> Result<Vec<u8>, EncryptionError> {
        Ok(key.to_vec())
    }

    fn encryptor(&self, key: &[u8]) -> Result<Box<dyn StreamEncryptor>, EncryptionError> {
        let key: [u8; 32] = key.try_into().map_err(|_| EncryptionError::InvalidKeyLength)?;
        let iv = random_iv();
        let cipher = CbcCipher::Aes256(Aes256CbcEnc::new(&key.into(), &iv.into()));
        Ok(Box::new(AesEncryptor::new(cipher, iv)))
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let key: [u8; 32] = key.try_into().map_err(|_| EncryptionError::InvalidKeyLength)?;
        let Some((iv, data)) = split_iv(ciphertext)? else {
            return Ok(Vec::new());
        };
        let mut data = data.to_vec();
        let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
            .decrypt_padded_mut::<Pkcs7>(&mut data)
            .map_err(|_| EncryptionError::Padding)?;
        Ok(plaintext.to_vec())
    }
}

fn random_iv() -> [u8; 16] {
    let mut iv = [0u8; 16];
    rand::rng().fill(&mut iv);
    iv
}

/// Separates the leading IV. `None` when there is nothing after it.
fn split_iv(ciphertext: &[u8]) -> Result<Option<([u8; 16], &[u8])>, EncryptionError> {
    if ciphertext.len() % 16 != 0 {
        return Err(EncryptionError::InvalidCipherTextLength);
    }
    if ciphertext.len() <= 16 {
        return Ok(None);
    }
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&ciphertext[..16]);
    Ok(Some((iv, &ciphertext[16..])))
}

enum CbcCipher {
    Aes128(Aes128CbcEnc),
    Aes256(Aes256CbcEnc),
}

impl CbcCipher {
    fn encrypt_block(&mut self, block: &mut aes::Block) {
        match self {
            CbcCipher::Aes128(cipher) => cipher.encrypt_block_mut(block),
            CbcCipher::Aes256(cipher) => cipher.encrypt_block_mut(block),
        }
    }
}

/// AES-CBC over a byte stream: the IV goes out first, whole blocks are
/// encrypted as they fill up and the last block is padded with PKCS#7.
struct AesEncryptor {
    cipher: CbcCipher,
    iv: Option<[u8; 16]>,
    pending: Vec<u8>,
}

impl AesEncryptor {
    fn new(cipher: CbcCipher, iv: [u8; 16]) -> Self {
        AesEncryptor {
            cipher,
            iv: Some(iv),
            pending: Vec::with_capacity(16),
        }
    }
}

impl StreamEncryptor for AesEncryptor {
    fn update(&mut self, data: &[u8]) -> Vec<u8> {
        let mut output = Vec::with_capacity(data.len() + 32);
        if let Some(iv) = self.iv.take() {
            output.extend_from_slice(&iv);
        }
        self.pending.extend_from_slice(data);
        let whole = self.pending.len() / 16 * 16;
        for chunk in self.pending[..whole].chunks_exact(16) {
            let mut block = aes::Block::clone_from_slice(chunk);
            self.cipher.encrypt_block(&mut block);
            output.extend_from_slice(&block);
        }
        self.pending.drain(..whole);
        output
    }

    fn finish(mut self: Box<Self>) -> Result<Vec<u8>, EncryptionError> {
        let mut output = Vec::with_capacity(32);
        if let Some(iv) = self.iv.take() {
            output.extend_from_slice(&iv);
        }
        let mut block = aes::Block::default();
        let used = self.pending.len();
        block[..used].copy_from_slice(&self.pending);
        Pkcs7::pad(&mut block, used);
        self.cipher.encrypt_block(&mut block);
        output.extend_from_slice(&block);
        Ok(output)
    }
}
