//! Shared helpers for container integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use strongbox::{
    BackingFile, ContainerConfig, ContainerProcessor, CryptFile, CryptFileError, HeaderInfo,
    OpenMode, PlainFile, Processor, ProcessorConfig, Result, StampKind,
};
use strongbox_crypto::{MasterKey, StampHasher};
use tempfile::TempDir;

/// Master key used by every test container
pub fn master_key() -> MasterKey {
    MasterKey::new([0x42; 32])
}

/// 64 byte first chunk, 32 byte chunks after it
pub fn small_chunks() -> ProcessorConfig {
    ProcessorConfig::default().with_chunk_sizes(64, 32)
}

/// Deterministic test payload
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

/// Path of a container inside `dir`
pub fn container_path(dir: &TempDir) -> PathBuf {
    dir.path().join("container.sbx")
}

/// Closed container with the default backing file
pub fn container(path: &Path, config: ProcessorConfig) -> CryptFile {
    CryptFile::new(path, master_key(), config).unwrap()
}

/// Read the whole content from the start
pub fn read_all<P: Processor, F: BackingFile>(file: &mut CryptFile<P, F>) -> Vec<u8> {
    file.seek(0).unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 37];
    loop {
        let n = file.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

/// Backing file that fails selected operations on request
#[derive(Debug, Default)]
pub struct FailingFile {
    inner: PlainFile,
    pub fail_truncate: Arc<AtomicBool>,
    pub fail_write: Arc<AtomicBool>,
}

impl FailingFile {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackingFile for FailingFile {
    fn open(&mut self, path: &Path, mode: OpenMode) -> Result<()> {
        self.inner.open(path, mode)
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.inner.seek(pos)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.fail_write.swap(false, Ordering::SeqCst) {
            return Err(CryptFileError::FileWriteFailed);
        }
        self.inner.write(buf)
    }

    fn truncate(&mut self, size: u64, backup_copy: bool) -> Result<()> {
        if self.fail_truncate.swap(false, Ordering::SeqCst) {
            return Err(CryptFileError::FileWriteFailed);
        }
        self.inner.truncate(size, backup_copy)
    }

    fn flush(&mut self, deep: bool) -> Result<()> {
        self.inner.flush(deep)
    }

    fn sync(&mut self) -> Result<()> {
        self.inner.sync()
    }

    fn fsync(&mut self) -> Result<()> {
        self.inner.fsync()
    }

    fn size(&self) -> Result<u64> {
        self.inner.size()
    }
}

/// Container over a [`FailingFile`], with handles to arm its failures
pub fn failing_container(
    path: &Path,
    config: ProcessorConfig,
) -> (CryptFile<ContainerProcessor, FailingFile>, Arc<AtomicBool>, Arc<AtomicBool>) {
    let file = FailingFile::new();
    let fail_truncate = Arc::clone(&file.fail_truncate);
    let fail_write = Arc::clone(&file.fail_write);
    let processor = ContainerProcessor::new(master_key(), config).unwrap();
    let container =
        CryptFile::with_parts(path, processor, file, ContainerConfig::default()).unwrap();
    (container, fail_truncate, fail_write)
}

/// Processor that counts the plaintext bytes passed to the stream cipher
#[derive(Debug)]
pub struct CountingProcessor {
    inner: ContainerProcessor,
    pub streamed: Arc<AtomicUsize>,
}

impl CountingProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            inner: ContainerProcessor::new(master_key(), config).unwrap(),
            streamed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Processor for CountingProcessor {
    fn header_size(&self) -> usize {
        self.inner.header_size()
    }

    fn first_chunk_max_size(&self) -> u32 {
        self.inner.first_chunk_max_size()
    }

    fn chunk_max_size(&self) -> u32 {
        self.inner.chunk_max_size()
    }

    fn max_packed_chunk_size(&self, seqnum: u32, ciphertext_hint: u64) -> u64 {
        self.inner.max_packed_chunk_size(seqnum, ciphertext_hint)
    }

    fn plaintext_size_offset(&self) -> u64 {
        self.inner.plaintext_size_offset()
    }

    fn ciphertext_size_offset(&self) -> u64 {
        self.inner.ciphertext_size_offset()
    }

    fn pack_header_and_descriptor(&mut self, out: &mut Vec<u8>, initial_size: u64) -> Result<()> {
        self.inner.pack_header_and_descriptor(out, initial_size)
    }

    fn unpack_header(&self, data: &[u8]) -> Result<HeaderInfo> {
        self.inner.unpack_header(data)
    }

    fn unpack_descriptor(&mut self, data: &[u8]) -> Result<()> {
        self.inner.unpack_descriptor(data)
    }

    fn pack_chunk(&mut self, plain: &[u8], seqnum: u32) -> Result<Vec<u8>> {
        self.inner.pack_chunk(plain, seqnum)
    }

    fn unpack_chunk(&self, packed: &[u8], seqnum: u32) -> Result<Vec<u8>> {
        self.inner.unpack_chunk(packed, seqnum)
    }

    fn is_streaming_mode(&self) -> bool {
        self.inner.is_streaming_mode()
    }

    fn stream_prefix_size(&self) -> usize {
        self.inner.stream_prefix_size()
    }

    fn init_stream_encryptor(&mut self, prefix: &mut Vec<u8>, seqnum: u32) -> Result<()> {
        self.inner.init_stream_encryptor(prefix, seqnum)
    }

    fn resume_stream_encryptor(&mut self, prefix: &[u8], seqnum: u32, offset: u64) -> Result<()> {
        self.inner.resume_stream_encryptor(prefix, seqnum, offset)
    }

    fn stream_encryptor_seqnum(&self) -> Option<u32> {
        self.inner.stream_encryptor_seqnum()
    }

    fn encrypt_stream(&mut self, plain: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.streamed.fetch_add(plain.len(), Ordering::SeqCst);
        self.inner.encrypt_stream(plain, out)
    }

    fn stamp_hasher(&self, kind: StampKind) -> Result<StampHasher> {
        self.inner.stamp_hasher(kind)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Streaming container whose stream cipher input is counted
pub fn counting_container(
    path: &Path,
    config: ProcessorConfig,
) -> (CryptFile<CountingProcessor, PlainFile>, Arc<AtomicUsize>) {
    let processor = CountingProcessor::new(config);
    let streamed = Arc::clone(&processor.streamed);
    let container =
        CryptFile::with_parts(path, processor, PlainFile::new(), ContainerConfig::default())
            .unwrap();
    (container, streamed)
}
