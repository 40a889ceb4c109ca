use crate::encryption::{EncryptionMethod, Permissions};

/// Options for writing a PDF document.
#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Pack simple objects into object streams and write a cross-reference stream.
    pub full_compression: bool,

    /// Flate level for streams: -1 for the zlib default, 0 for none, 1 to 9 otherwise.
    pub compression_level: i32,

    /// Objects collected into one object stream before it is flushed.
    pub max_objects_per_stream: usize,

    /// Minimum header version. Raised automatically when a feature requires it.
    pub version: String,

    /// Encrypt the output with the standard security handler.
    pub encryption: Option<EncryptionConfig>,

    /// Fixed document ID. A random one is generated otherwise.
    pub file_id: Option<[Vec<u8>; 2]>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            full_compression: false,
            compression_level: -1,
            max_objects_per_stream: 100,
            version: "1.4".to_string(),
            encryption: None,
            file_id: None,
        }
    }
}

impl SaveOptions {
    /// Create a builder for SaveOptions
    pub fn builder() -> SaveOptionsBuilder {
        SaveOptionsBuilder::default()
    }

    /// The header version: the requested one, raised to what compression and
    /// encryption need.
    pub fn effective_version(&self) -> String {
        let mut version = parse_version(&self.version).unwrap_or((1, 4));
        if self.full_compression {
            version = version.max((1, 5));
        }
        if let Some(encryption) = &self.encryption {
            version = version.max(encryption.method.min_pdf_version());
        }
        format!("{}.{}", version.0, version.1)
    }
}

fn parse_version(text: &str) -> Option<(u8, u8)> {
    let (major, minor) = text.split_once('.')?;
    Some((major.trim().parse().ok()?, minor.trim().parse().ok()?))
}

/// Builder for SaveOptions
#[derive(Default)]
pub struct SaveOptionsBuilder {
    options: SaveOptions,
}

impl SaveOptionsBuilder {
    /// Enable or disable object streams and the cross-reference stream
    pub fn full_compression(mut self, value: bool) -> Self {
        self.options.full_compression = value;
        self
    }

    /// Set the Flate level; values outside -1..=9 are clamped
    pub fn compression_level(mut self, value: i32) -> Self {
        self.options.compression_level = value.clamp(-1, 9);
        self
    }

    /// Set maximum objects per stream
    pub fn max_objects_per_stream(mut self, value: usize) -> Self {
        self.options.max_objects_per_stream = value.max(1);
        self
    }

    pub fn version(mut self, value: &str) -> Self {
        self.options.version = value.to_string();
        self
    }

    pub fn encryption(mut self, value: EncryptionConfig) -> Self {
        self.options.encryption = Some(value);
        self
    }

    pub fn file_id(mut self, first: Vec<u8>, second: Vec<u8>) -> Self {
        self.options.file_id = Some([first, second]);
        self
    }

    /// Build the SaveOptions
    pub fn build(self) -> SaveOptions {
        self.options
    }
}

/// Password encryption settings.
#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    pub user_password: String,
    /// Empty means a random owner password.
    pub owner_password: String,
    pub permissions: Permissions,
    pub method: EncryptionMethod,
    /// Encrypt XML metadata streams (revision 4 and later only).
    pub encrypt_metadata: bool,
    /// Encrypt embedded file streams and nothing else (AES only).
    pub embedded_files_only: bool,
}

impl EncryptionConfig {
    pub fn new(method: EncryptionMethod) -> Self {
        EncryptionConfig {
            user_password: String::new(),
            owner_password: String::new(),
            permissions: Permissions::default(),
            method,
            encrypt_metadata: true,
            embedded_files_only: false,
        }
    }

    pub fn user_password(mut self, password: &str) -> Self {
        self.user_password = password.to_string();
        self
    }

    pub fn owner_password(mut self, password: &str) -> Self {
        self.owner_password = password.to_string();
        self
    }

    pub fn permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn encrypt_metadata(mut self, value: bool) -> Self {
        self.encrypt_metadata = value;
        self
    }

    pub fn embedded_files_only(mut self, value: bool) -> Self {
        self.embedded_files_only = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_clamps_level() {
        let options = SaveOptions::builder().compression_level(42).build();
        assert_eq!(options.compression_level, 9);
        let options = SaveOptions::builder().compression_level(-7).build();
        assert_eq!(options.compression_level, -1);
        assert_eq!(options.max_objects_per_stream, 100);
    }

    #[test]
    fn version_follows_features() {
        assert_eq!(SaveOptions::default().effective_version(), "1.4");
        let options = SaveOptions::builder().full_compression(true).build();
        assert_eq!(options.effective_version(), "1.5");
        let options = SaveOptions::builder()
            .encryption(EncryptionConfig::new(EncryptionMethod::Aes256))
            .build();
        assert_eq!(options.effective_version(), "1.7");
        let options = SaveOptions::builder()
            .version("2.0")
            .encryption(EncryptionConfig::new(EncryptionMethod::Aes128))
            .build();
        assert_eq!(options.effective_version(), "2.0");
    }
}
