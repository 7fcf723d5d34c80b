//! Chunk encryption and metadata (de)serialization
//!
//! The container never touches key material or wire formats directly. It
//! asks a [`Processor`] for the chunk size policy, for the serialized header
//! and descriptor, and to pack (encrypt) and unpack (decrypt) chunks.
//! [`ContainerProcessor`] is the implementation shipped with the crate.

use strongbox_crypto::aead::CHUNK_OVERHEAD;
use strongbox_crypto::kdf::{CHUNK_KEY_INFO, DERIVED_KEY_SIZE, MAC_KEY_INFO, STREAM_KEY_INFO};
use strongbox_crypto::stream::{STREAM_NONCE_SIZE, open_stream_chunk};
use strongbox_crypto::{
    ChunkCipher, CipherSuite, CryptoError, KdfType, KeyDeriver, MasterKey, StampHasher, StampKind,
    StreamEncryptor,
};
use strongbox_formats::header::{CIPHERTEXT_SIZE_OFFSET, PLAINTEXT_SIZE_OFFSET};
use strongbox_formats::{ContainerDescriptor, ContainerHeader, HEADER_SIZE};
use tracing::debug;

use crate::config::ProcessorConfig;
use crate::{CryptFileError, Result};

/// Fields of the fixed header the container needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    /// Logical plaintext length
    pub plaintext_size: u64,
    /// Length of the descriptor following the header
    pub descriptor_size: u16,
    /// Bytes of chunk ciphertext
    pub ciphertext_size: u64,
}

/// Cryptographic and format services used by a container.
pub trait Processor {
    /// Size of the fixed header.
    fn header_size(&self) -> usize;

    /// Maximum plaintext size of chunk 0 (0 = same as every other chunk).
    fn first_chunk_max_size(&self) -> u32;

    /// Maximum plaintext size of chunks after the first (0 = unbounded).
    fn chunk_max_size(&self) -> u32;

    /// Maximum plaintext size of chunk `seqnum`.
    fn max_plain_chunk_size(&self, seqnum: u32) -> u32 {
        let first = self.first_chunk_max_size();
        if seqnum == 0 && first != 0 {
            first
        } else {
            self.chunk_max_size()
        }
    }

    /// Maximum size of chunk `seqnum` once packed.
    ///
    /// An unbounded chunk has no fixed size; `ciphertext_hint` is returned.
    fn max_packed_chunk_size(&self, seqnum: u32, ciphertext_hint: u64) -> u64;

    /// Offset of the plaintext size field within the header.
    fn plaintext_size_offset(&self) -> u64;

    /// Offset of the ciphertext size field within the header.
    fn ciphertext_size_offset(&self) -> u64;

    /// Append a fresh header and descriptor to `out`, installing new keys.
    fn pack_header_and_descriptor(&mut self, out: &mut Vec<u8>, initial_size: u64) -> Result<()>;

    /// Parse the fixed header.
    fn unpack_header(&self, data: &[u8]) -> Result<HeaderInfo>;

    /// Parse the descriptor and derive the working keys.
    fn unpack_descriptor(&mut self, data: &[u8]) -> Result<()>;

    /// Encrypt one chunk. Streaming processors return nothing.
    fn pack_chunk(&mut self, plain: &[u8], seqnum: u32) -> Result<Vec<u8>>;

    /// Decrypt one chunk.
    fn unpack_chunk(&self, packed: &[u8], seqnum: u32) -> Result<Vec<u8>>;

    /// Whether chunks are produced by the stream cipher.
    fn is_streaming_mode(&self) -> bool;

    /// Size of the per-chunk stream prefix.
    fn stream_prefix_size(&self) -> usize;

    /// Start the keystream of chunk `seqnum`, appending its prefix to `prefix`.
    fn init_stream_encryptor(&mut self, prefix: &mut Vec<u8>, seqnum: u32) -> Result<()>;

    /// Continue the keystream of chunk `seqnum` from an existing `prefix`,
    /// positioned after `offset` already encrypted bytes.
    fn resume_stream_encryptor(&mut self, prefix: &[u8], seqnum: u32, offset: u64) -> Result<()>;

    /// Chunk the active keystream belongs to.
    fn stream_encryptor_seqnum(&self) -> Option<u32>;

    /// Encrypt `plain` with the active keystream, appending to `out`.
    fn encrypt_stream(&mut self, plain: &[u8], out: &mut Vec<u8>) -> Result<()>;

    /// Hasher producing a stamp value of the given kind.
    fn stamp_hasher(&self, kind: StampKind) -> Result<StampHasher>;

    /// Forget keys and keystream state.
    fn reset(&mut self);
}

/// Working keys derived for one open container
struct WorkingKeys {
    deriver: KeyDeriver,
    chunk: ChunkCipher,
    stream: Option<[u8; DERIVED_KEY_SIZE]>,
}

impl WorkingKeys {
    fn derive(
        master: &MasterKey,
        kdf: KdfType,
        suite: CipherSuite,
        salt: &[u8],
        rounds: u32,
    ) -> Result<Self> {
        let deriver = KeyDeriver::new(master, kdf, salt, rounds)?;
        let chunk = ChunkCipher::new(&deriver.derive(CHUNK_KEY_INFO)?);
        let stream = if suite.supports_streaming() {
            Some(deriver.derive(STREAM_KEY_INFO)?)
        } else {
            None
        };
        Ok(Self {
            deriver,
            chunk,
            stream,
        })
    }
}

impl Drop for WorkingKeys {
    fn drop(&mut self) {
        if let Some(key) = self.stream.as_mut() {
            key.fill(0);
        }
    }
}

/// [`Processor`] backed by AES-256-GCM chunks and an optional Salsa20 stream.
pub struct ContainerProcessor {
    master: MasterKey,
    config: ProcessorConfig,
    suite: CipherSuite,
    kdf: KdfType,
    first_chunk_max_size: u32,
    chunk_max_size: u32,
    keys: Option<WorkingKeys>,
    stream: Option<StreamEncryptor>,
}

impl ContainerProcessor {
    /// Create a processor for `master`, using `config` for new containers.
    pub fn new(master: MasterKey, config: ProcessorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            master,
            suite: config.cipher_suite,
            kdf: config.kdf_type,
            first_chunk_max_size: config.first_chunk_max_size,
            chunk_max_size: config.chunk_max_size,
            config,
            keys: None,
            stream: None,
        })
    }

    /// Suite of the open container (or the configured one).
    pub const fn cipher_suite(&self) -> CipherSuite {
        self.suite
    }

    /// Key derivation of the open container (or the configured one).
    pub const fn kdf_type(&self) -> KdfType {
        self.kdf
    }

    /// Configuration used for new containers.
    pub const fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    fn keys(&self) -> Result<&WorkingKeys> {
        self.keys
            .as_ref()
            .ok_or(CryptFileError::Crypto(CryptoError::NoWorkingKey))
    }

    fn stream_key(&self) -> Result<&[u8; DERIVED_KEY_SIZE]> {
        self.keys()?.stream.as_ref().ok_or_else(|| {
            CryptFileError::NotSupportedByCipherSuite(format!(
                "{} has no stream cipher",
                self.suite.name()
            ))
        })
    }

    const fn overhead(&self) -> u64 {
        if self.config.streaming {
            STREAM_NONCE_SIZE as u64
        } else {
            CHUNK_OVERHEAD as u64
        }
    }
}

impl std::fmt::Debug for ContainerProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerProcessor")
            .field("suite", &self.suite)
            .field("kdf", &self.kdf)
            .field("first_chunk_max_size", &self.first_chunk_max_size)
            .field("chunk_max_size", &self.chunk_max_size)
            .field("streaming", &self.config.streaming)
            .field("keyed", &self.keys.is_some())
            .finish_non_exhaustive()
    }
}

impl Processor for ContainerProcessor {
    fn header_size(&self) -> usize {
        HEADER_SIZE
    }

    fn first_chunk_max_size(&self) -> u32 {
        self.first_chunk_max_size
    }

    fn chunk_max_size(&self) -> u32 {
        self.chunk_max_size
    }

    fn max_packed_chunk_size(&self, seqnum: u32, ciphertext_hint: u64) -> u64 {
        match self.max_plain_chunk_size(seqnum) {
            0 => ciphertext_hint,
            plain => u64::from(plain) + self.overhead(),
        }
    }

    fn plaintext_size_offset(&self) -> u64 {
        PLAINTEXT_SIZE_OFFSET
    }

    fn ciphertext_size_offset(&self) -> u64 {
        CIPHERTEXT_SIZE_OFFSET
    }

    fn pack_header_and_descriptor(&mut self, out: &mut Vec<u8>, initial_size: u64) -> Result<()> {
        let config = &self.config;
        let salt = KeyDeriver::generate_salt();
        let descriptor = ContainerDescriptor::new(
            config.kdf_type.as_byte(),
            config.cipher_suite.as_byte(),
            config.kdf_rounds,
            config.first_chunk_max_size,
            config.chunk_max_size,
            salt.to_vec(),
        )?;
        let descriptor = descriptor.build()?;
        let descriptor_size = u16::try_from(descriptor.len()).map_err(|_| {
            CryptFileError::InvalidCryptfileFormat(format!(
                "descriptor of {} bytes",
                descriptor.len()
            ))
        })?;

        let header = ContainerHeader::new(config.streaming, descriptor_size, initial_size);
        out.extend_from_slice(&header.build()?);
        out.extend_from_slice(&descriptor);

        self.suite = config.cipher_suite;
        self.kdf = config.kdf_type;
        self.first_chunk_max_size = config.first_chunk_max_size;
        self.chunk_max_size = config.chunk_max_size;
        self.stream = None;
        self.keys = Some(WorkingKeys::derive(
            &self.master,
            self.kdf,
            self.suite,
            &salt,
            config.kdf_rounds,
        )?);
        debug!(
            "packed new {} header, {} descriptor bytes",
            self.suite.name(),
            descriptor_size
        );
        Ok(())
    }

    fn unpack_header(&self, data: &[u8]) -> Result<HeaderInfo> {
        let header = ContainerHeader::parse(data)
            .map_err(|e| CryptFileError::InvalidCryptfileFormat(format!("header: {e}")))?;
        if header.streaming != self.config.streaming {
            return Err(CryptFileError::InvalidStreamFileMode);
        }
        Ok(HeaderInfo {
            plaintext_size: header.plaintext_size,
            descriptor_size: header.descriptor_size,
            ciphertext_size: header.ciphertext_size,
        })
    }

    fn unpack_descriptor(&mut self, data: &[u8]) -> Result<()> {
        let descriptor = ContainerDescriptor::parse(data)
            .map_err(|e| CryptFileError::InvalidCryptfileFormat(format!("descriptor: {e}")))?;
        let kdf = KdfType::from_byte(descriptor.kdf_type)
            .map_err(|e| CryptFileError::InvalidCryptfileFormat(e.to_string()))?;
        let suite = CipherSuite::from_byte(descriptor.cipher_suite)
            .map_err(|e| CryptFileError::NotSupportedByCipherSuite(e.to_string()))?;
        if self.config.streaming && !suite.supports_streaming() {
            return Err(CryptFileError::NotSupportedByCipherSuite(format!(
                "{} has no stream cipher",
                suite.name()
            )));
        }

        self.keys = Some(WorkingKeys::derive(
            &self.master,
            kdf,
            suite,
            &descriptor.salt,
            descriptor.kdf_rounds,
        )?);
        self.suite = suite;
        self.kdf = kdf;
        self.first_chunk_max_size = descriptor.first_chunk_max_size;
        self.chunk_max_size = descriptor.chunk_max_size;
        self.stream = None;
        Ok(())
    }

    fn pack_chunk(&mut self, plain: &[u8], seqnum: u32) -> Result<Vec<u8>> {
        if self.config.streaming {
            return Ok(Vec::new());
        }
        Ok(self.keys()?.chunk.seal(plain, seqnum)?)
    }

    fn unpack_chunk(&self, packed: &[u8], seqnum: u32) -> Result<Vec<u8>> {
        if self.config.streaming {
            return Ok(open_stream_chunk(self.stream_key()?, packed)?);
        }
        Ok(self.keys()?.chunk.open(packed, seqnum)?)
    }

    fn is_streaming_mode(&self) -> bool {
        self.config.streaming
    }

    fn stream_prefix_size(&self) -> usize {
        if self.config.streaming {
            STREAM_NONCE_SIZE
        } else {
            0
        }
    }

    fn init_stream_encryptor(&mut self, prefix: &mut Vec<u8>, seqnum: u32) -> Result<()> {
        let nonce = StreamEncryptor::generate_nonce();
        let encryptor = StreamEncryptor::new(self.stream_key()?, &nonce, seqnum)?;
        prefix.extend_from_slice(&nonce);
        self.stream = Some(encryptor);
        Ok(())
    }

    fn resume_stream_encryptor(&mut self, prefix: &[u8], seqnum: u32, offset: u64) -> Result<()> {
        let mut encryptor = StreamEncryptor::new(self.stream_key()?, prefix, seqnum)?;
        encryptor.seek(offset)?;
        self.stream = Some(encryptor);
        Ok(())
    }

    fn stream_encryptor_seqnum(&self) -> Option<u32> {
        self.stream.as_ref().map(StreamEncryptor::seqnum)
    }

    fn encrypt_stream(&mut self, plain: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let encryptor = self
            .stream
            .as_mut()
            .ok_or(CryptFileError::Crypto(CryptoError::StreamNotInitialized))?;
        let start = out.len();
        out.extend_from_slice(plain);
        encryptor.apply_keystream(&mut out[start..])?;
        Ok(())
    }

    fn stamp_hasher(&self, kind: StampKind) -> Result<StampHasher> {
        match kind {
            StampKind::Digest => Ok(StampHasher::digest()),
            StampKind::Mac => {
                let mut key = self.keys()?.deriver.derive(MAC_KEY_INFO)?;
                let hasher = StampHasher::mac(&key);
                key.fill(0);
                Ok(hasher?)
            }
        }
    }

    fn reset(&mut self) {
        self.keys = None;
        self.stream = None;
        self.suite = self.config.cipher_suite;
        self.kdf = self.config.kdf_type;
        self.first_chunk_max_size = self.config.first_chunk_max_size;
        self.chunk_max_size = self.config.chunk_max_size;
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn processor(config: ProcessorConfig) -> ContainerProcessor {
        ContainerProcessor::new(MasterKey::new([7; 32]), config).unwrap()
    }

    #[test]
    fn test_packed_sizes() {
        let block = processor(ProcessorConfig::default().with_chunk_sizes(64, 32));
        assert_eq!(block.max_plain_chunk_size(0), 64);
        assert_eq!(block.max_plain_chunk_size(5), 32);
        assert_eq!(block.max_packed_chunk_size(0, 0), 92);
        assert_eq!(block.max_packed_chunk_size(1, 0), 60);

        let stream = processor(
            ProcessorConfig::default()
                .with_chunk_sizes(0, 0)
                .with_streaming(true),
        );
        assert_eq!(stream.max_packed_chunk_size(0, 1234), 1234);
        assert_eq!(stream.stream_prefix_size(), 8);
    }

    #[test]
    fn test_header_descriptor_roundtrip() {
        let config = ProcessorConfig::default()
            .with_kdf(KdfType::Pbkdf2Hkdf, 50)
            .with_chunk_sizes(100, 40);
        let mut writer = processor(config);
        let mut meta = Vec::new();
        writer.pack_header_and_descriptor(&mut meta, 0).unwrap();
        let packed = writer.pack_chunk(b"payload", 3).unwrap();

        // a reader configured differently still follows the descriptor
        let mut reader = processor(ProcessorConfig::default());
        let info = reader.unpack_header(&meta).unwrap();
        assert_eq!(info.plaintext_size, 0);
        assert_eq!(meta.len(), HEADER_SIZE + usize::from(info.descriptor_size));
        reader.unpack_descriptor(&meta[HEADER_SIZE..]).unwrap();
        assert_eq!(reader.first_chunk_max_size(), 100);
        assert_eq!(reader.chunk_max_size(), 40);
        assert_eq!(reader.kdf_type(), KdfType::Pbkdf2Hkdf);
        assert_eq!(reader.unpack_chunk(&packed, 3).unwrap(), b"payload");
        assert!(reader.unpack_chunk(&packed, 4).is_err());

        reader.reset();
        assert_eq!(reader.chunk_max_size(), ProcessorConfig::default().chunk_max_size);
        assert!(matches!(
            reader.unpack_chunk(&packed, 3),
            Err(CryptFileError::Crypto(CryptoError::NoWorkingKey))
        ));
    }

    #[test]
    fn test_wrong_master_key() {
        let mut writer = processor(ProcessorConfig::default());
        let mut meta = Vec::new();
        writer.pack_header_and_descriptor(&mut meta, 0).unwrap();
        let packed = writer.pack_chunk(b"secret", 0).unwrap();

        let mut reader =
            ContainerProcessor::new(MasterKey::new([8; 32]), ProcessorConfig::default()).unwrap();
        reader.unpack_descriptor(&meta[HEADER_SIZE..]).unwrap();
        assert!(matches!(
            reader.unpack_chunk(&packed, 0),
            Err(CryptFileError::Crypto(CryptoError::AuthenticationFailed { seqnum: 0 }))
        ));
    }

    #[test]
    fn test_stream_mode_mismatch() {
        let mut writer = processor(ProcessorConfig::default().with_streaming(true));
        let mut meta = Vec::new();
        writer.pack_header_and_descriptor(&mut meta, 0).unwrap();
        assert!(matches!(
            processor(ProcessorConfig::default()).unpack_header(&meta),
            Err(CryptFileError::InvalidStreamFileMode)
        ));
        assert!(matches!(
            processor(ProcessorConfig::default()).unpack_header(&meta[..10]),
            Err(CryptFileError::InvalidCryptfileFormat(_))
        ));
    }

    #[test]
    fn test_block_descriptor_rejects_streaming_reader() {
        let mut writer = processor(
            ProcessorConfig::default().with_cipher_suite(CipherSuite::Aes256Gcm),
        );
        let mut meta = Vec::new();
        writer.pack_header_and_descriptor(&mut meta, 0).unwrap();

        let mut reader = processor(ProcessorConfig::default().with_streaming(true));
        assert!(matches!(
            reader.unpack_descriptor(&meta[HEADER_SIZE..]),
            Err(CryptFileError::NotSupportedByCipherSuite(_))
        ));
    }

    #[test]
    fn test_stream_resume() {
        let mut writer = processor(ProcessorConfig::default().with_streaming(true));
        let mut meta = Vec::new();
        writer.pack_header_and_descriptor(&mut meta, 0).unwrap();
        assert!(writer.pack_chunk(b"ignored", 0).unwrap().is_empty());

        let mut packed = Vec::new();
        writer.init_stream_encryptor(&mut packed, 0).unwrap();
        assert_eq!(writer.stream_encryptor_seqnum(), Some(0));
        writer.encrypt_stream(b"hello ", &mut packed).unwrap();

        // a second session picks the keystream up where the first stopped
        let mut resumed = processor(ProcessorConfig::default().with_streaming(true));
        resumed.unpack_descriptor(&meta[HEADER_SIZE..]).unwrap();
        resumed
            .resume_stream_encryptor(&packed[..STREAM_NONCE_SIZE], 0, 6)
            .unwrap();
        resumed.encrypt_stream(b"world", &mut packed).unwrap();

        assert_eq!(resumed.unpack_chunk(&packed, 0).unwrap(), b"hello world");
    }

    #[test]
    fn test_mac_needs_keys() {
        let mut processor = processor(ProcessorConfig::default());
        assert!(processor.stamp_hasher(StampKind::Digest).is_ok());
        assert!(processor.stamp_hasher(StampKind::Mac).is_err());
        processor
            .pack_header_and_descriptor(&mut Vec::new(), 0)
            .unwrap();
        assert_eq!(
            processor.stamp_hasher(StampKind::Mac).unwrap().kind(),
            StampKind::Mac
        );
    }
}
