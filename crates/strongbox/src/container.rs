//! The container file
//!
//! [`CryptFile`] presents an encrypted container as a seekable byte stream.
//! Exactly one chunk is active at a time; it covers the cursor. Moving the
//! cursor into another chunk retires the active one, either into the LRU
//! pool or (when caching does not apply) straight back to disk.
//!
//! Only the chunk holding the end of the file can change the logical size,
//! so it is flushed whenever it stops being active. Every chunk before it is
//! full, which keeps raw chunk offsets a pure function of the sequence number.

use std::fs;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use strongbox_crypto::MasterKey;
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::backing::{BackingFile, PlainFile};
use crate::cache::ChunkCache;
use crate::chunk::Chunk;
use crate::config::{ContainerConfig, ProcessorConfig};
use crate::layout::ChunkLayout;
use crate::mode::OpenMode;
use crate::processor::{ContainerProcessor, Processor};
use crate::{CryptFileError, Result};

/// Prefix of backup copies taken by [`CryptFile::truncate`]
const BACKUP_PREFIX: &str = "sbx_";

/// Suffix of backup copies taken by [`CryptFile::truncate`]
const BACKUP_SUFFIX: &str = ".bak";

/// Encrypted, randomly seekable container file.
///
/// The container is single-threaded: callers serialize access to one
/// instance. Dropping an open container closes it, flushing pending chunks.
pub struct CryptFile<P: Processor = ContainerProcessor, F: BackingFile = PlainFile> {
    path: PathBuf,
    processor: P,
    file: F,
    config: ContainerConfig,
    mode: OpenMode,
    use_cache: bool,
    layout: ChunkLayout,
    /// Position of the active chunk's cursor
    cursor: u64,
    /// Position requested by the caller, may lie past `size`
    seek_cursor: u64,
    size: u64,
    ciphertext_size: u64,
    /// Chunk holding the end of the file
    eof_seqnum: u32,
    size_dirty: bool,
    /// Set once the bytes past `eof_pos` were cut in this session
    tail_cut: bool,
    current: Option<Chunk>,
    cache: ChunkCache,
}

impl CryptFile {
    /// Create a closed container at `path` using the built-in processor.
    pub fn new(
        path: impl AsRef<Path>,
        master: MasterKey,
        config: ProcessorConfig,
    ) -> Result<Self> {
        let processor = ContainerProcessor::new(master, config)?;
        Self::with_parts(path, processor, PlainFile::new(), ContainerConfig::default())
    }
}

impl<P: Processor, F: BackingFile> CryptFile<P, F> {
    /// Create a closed container from explicit collaborators.
    pub fn with_parts(
        path: impl AsRef<Path>,
        processor: P,
        file: F,
        config: ContainerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            processor,
            file,
            cache: ChunkCache::new(config.max_cached_chunks),
            config,
            mode: OpenMode::default(),
            use_cache: false,
            layout: ChunkLayout::default(),
            cursor: 0,
            seek_cursor: 0,
            size: 0,
            ciphertext_size: 0,
            eof_seqnum: 0,
            size_dirty: false,
            tail_cut: false,
            current: None,
        })
    }

    /// Path of the container file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runtime configuration.
    pub const fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// The processor.
    pub const fn processor(&self) -> &P {
        &self.processor
    }

    /// Mutable access to the processor.
    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.processor
    }

    /// The backing file.
    pub const fn backing(&self) -> &F {
        &self.file
    }

    /// Mutable access to the backing file.
    pub fn backing_mut(&mut self) -> &mut F {
        &mut self.file
    }

    /// Open the container.
    ///
    /// A streaming processor only accepts `Scan`, `Append` and
    /// `AppendExisting`.
    pub fn open(&mut self, mode: OpenMode) -> Result<()> {
        if self.file.is_open() {
            return Err(CryptFileError::FileAlreadyOpen);
        }
        if self.processor.is_streaming_mode() && !mode.allows_streaming() {
            return Err(CryptFileError::InvalidStreamFileMode);
        }

        self.do_open(mode, false)?;
        info!(
            "opened {} as {:?}: size={}, ciphertext={}, data_offset={}",
            self.path.display(),
            mode,
            self.size,
            self.ciphertext_size,
            self.layout.data_offset()
        );
        Ok(())
    }

    /// Flush and close. Closing a closed container is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if !self.file.is_open() {
            return Ok(());
        }
        let size = self.size;
        self.do_close(true)?;
        info!("closed {} at size {}", self.path.display(), size);
        Ok(())
    }

    /// Check if the container is open.
    pub fn is_open(&self) -> bool {
        self.file.is_open()
    }

    /// Mode of the open container.
    pub const fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Move the read/write position.
    ///
    /// A position past the end is remembered and materialized with zeros by
    /// the next [`write`](Self::write). In append modes only the current size
    /// is accepted.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.ensure_open()?;
        if self.mode.is_append() && pos != self.size {
            return Err(CryptFileError::InvalidSeek {
                pos,
                size: self.size,
            });
        }

        self.seek_cursor = pos;
        if pos == self.cursor || pos > self.size {
            return Ok(());
        }
        self.do_seek(pos, 0)
    }

    /// Position used by the next read or write.
    pub const fn pos(&self) -> u64 {
        self.seek_cursor
    }

    /// Read into `buf`, returning the number of bytes read (0 at the end).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.ensure_open()?;
        if self.mode.is_append() {
            return Err(CryptFileError::FileReadFailed);
        }
        if self.seek_cursor >= self.size {
            return Ok(0);
        }
        self.sync_cursor()?;

        let mut done = 0;
        while done < buf.len() && self.cursor < self.size {
            if self.active()?.remaining() == 0 {
                self.do_seek(self.cursor, 0)?;
                if self.active()?.remaining() == 0 {
                    break;
                }
            }

            let left = usize::try_from(self.size - self.cursor).unwrap_or(usize::MAX);
            let end = buf.len().min(done.saturating_add(left));
            let n = self.active()?.read_at_cursor(&mut buf[done..end]);
            done += n;
            self.cursor += n as u64;
        }

        self.seek_cursor = self.cursor;
        Ok(done)
    }

    /// Write `data` at the current position, returning its length.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        self.ensure_open()?;
        if !self.mode.is_write() {
            return Err(CryptFileError::FileWriteFailed);
        }

        if self.seek_cursor > self.size {
            let target = self.seek_cursor;
            self.truncate_impl(target, false)?;
            self.do_seek(target, 0)?;
        }
        self.sync_cursor()?;

        let written = self.write_impl(data)?;
        self.seek_cursor = self.cursor;
        Ok(written)
    }

    /// Write dirty chunks and the size fields, then flush the raw file,
    /// syncing it to disk when `deep` is set.
    pub fn flush(&mut self, deep: bool) -> Result<()> {
        self.do_flush(Some(deep))
    }

    /// Flush and sync file data.
    pub fn sync(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.do_flush(None)?;
        self.file.sync()
    }

    /// Flush and sync file data and metadata.
    pub fn fsync(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.do_flush(None)?;
        self.file.fsync()
    }

    /// Resize the content to `new_size`.
    ///
    /// Growing appends zeros. Shrinking is all-or-nothing: with
    /// `backup_copy` the file is copied first and restored if any step
    /// fails. The position is left as it was, so it may end up past the
    /// end. A closed container is opened for the duration of the call;
    /// a streaming one can only grow.
    pub fn truncate(&mut self, new_size: u64, backup_copy: bool) -> Result<()> {
        if !self.file.is_open() {
            let mode = if self.processor.is_streaming_mode() {
                OpenMode::AppendExisting
            } else {
                OpenMode::WriteExisting
            };
            self.do_open(mode, false)?;
            let result = self.truncate_impl(new_size, backup_copy);
            let closed = self.do_close(true);
            return result.and(closed);
        }
        if !self.mode.is_write() {
            return Err(CryptFileError::FileWriteFailed);
        }
        self.truncate_impl(new_size, backup_copy)
    }

    /// Logical content size. A closed container reads it from the header.
    pub fn content_size(&mut self) -> Result<u64> {
        if self.file.is_open() {
            return Ok(self.size);
        }
        self.open_metadata(OpenMode::Scan)?;
        let size = self.size;
        self.close_metadata()?;
        Ok(size)
    }

    /// Bytes of header, descriptor and chunk ciphertext as stored on disk.
    ///
    /// On an open container the last chunk is written out first.
    pub fn used_size(&mut self) -> Result<u64> {
        if self.file.is_open() {
            self.flush_last_chunk()?;
            return Ok(self.eof_pos());
        }
        self.open_metadata(OpenMode::Scan)?;
        let used = self.eof_pos();
        self.close_metadata()?;
        Ok(used)
    }

    /// Length of the raw file, stamps included.
    pub fn storage_size(&self) -> Result<u64> {
        self.file.storage_size(&self.path)
    }

    /// Write back and drop all cached chunks, then reload the active one.
    pub fn invalidate_cache(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.mode.is_write() {
            self.do_flush(None)?;
        }
        self.cache.clear();
        if !self.mode.is_append() {
            self.current = None;
            self.do_seek(self.cursor, 0)?;
        }
        Ok(())
    }

    /// Change how many chunks may be held in memory (at least 1).
    pub fn set_max_cached_chunks(&mut self, count: usize) -> Result<()> {
        let count = count.max(1);
        self.config.max_cached_chunks = count;
        let evicted = self.cache.set_capacity(count);
        self.flush_evicted(evicted)
    }

    /// Maximum number of chunks held in memory.
    pub const fn max_cached_chunks(&self) -> usize {
        self.cache.capacity()
    }

    /// Enable or disable the chunk cache.
    pub fn set_cache_enabled(&mut self, enable: bool) -> Result<()> {
        self.config.cache_enabled = enable;
        if !self.file.is_open() {
            return Ok(());
        }
        self.use_cache = self.cache_policy();
        if self.use_cache {
            Ok(())
        } else {
            let pooled = self.cache.drain();
            self.flush_evicted(pooled)
        }
    }

    /// Change the block size for zero-filling and hashing (at least 1).
    pub fn set_max_processing_size(&mut self, size: usize) {
        self.config.max_processing_size = size.max(1);
    }

    /// Number of decrypted chunks currently in memory.
    pub fn chunks_in_memory(&self) -> usize {
        self.cache.len() + usize::from(self.current.is_some())
    }

    // -- crate helpers used by integrity stamps --

    /// Open only the header and descriptor.
    pub(crate) fn open_metadata(&mut self, mode: OpenMode) -> Result<()> {
        if self.file.is_open() {
            return Err(CryptFileError::FileAlreadyOpen);
        }
        self.do_open(mode, true)
    }

    /// Close after [`open_metadata`](Self::open_metadata).
    pub(crate) fn close_metadata(&mut self) -> Result<()> {
        self.do_close(false)
    }

    /// Raw offset just past the last chunk.
    pub(crate) const fn eof_pos(&self) -> u64 {
        self.layout.data_offset() + self.ciphertext_size
    }

    // -- internals --

    fn ensure_open(&self) -> Result<()> {
        if self.file.is_open() {
            Ok(())
        } else {
            Err(CryptFileError::FileNotOpen)
        }
    }

    /// Bring the active chunk to the requested position.
    fn sync_cursor(&mut self) -> Result<()> {
        if self.current.is_none() || self.seek_cursor != self.cursor {
            self.do_seek(self.seek_cursor, 0)?;
        }
        Ok(())
    }

    fn active(&mut self) -> Result<&mut Chunk> {
        self.current.as_mut().ok_or(CryptFileError::FileNotOpen)
    }

    fn cache_policy(&self) -> bool {
        self.config.cache_enabled
            && self.mode.allows_cache()
            && !self.processor.is_streaming_mode()
    }

    fn reset_state(&mut self) {
        self.cache.clear();
        self.current = None;
        self.mode = OpenMode::default();
        self.use_cache = false;
        self.layout = ChunkLayout::default();
        self.cursor = 0;
        self.seek_cursor = 0;
        self.size = 0;
        self.ciphertext_size = 0;
        self.eof_seqnum = 0;
        self.size_dirty = false;
        self.tail_cut = false;
    }

    fn do_open(&mut self, mode: OpenMode, header_only: bool) -> Result<()> {
        let exists = self.path.exists();
        self.reset_state();
        self.mode = mode;
        self.use_cache = self.cache_policy();

        self.file.open(&self.path, mode.raw_mode(exists))?;
        let result = if mode.creates_file(exists) {
            self.create_layout()
        } else {
            self.load_layout(header_only)
        };

        if let Err(e) = result {
            if let Err(close_err) = self.do_close(false) {
                warn!(
                    "failed to close {} after open error: {close_err}",
                    self.path.display()
                );
            }
            return Err(e);
        }
        Ok(())
    }

    fn create_layout(&mut self) -> Result<()> {
        let mut meta = Vec::new();
        self.processor.pack_header_and_descriptor(&mut meta, 0)?;
        self.file.seek(0)?;
        if self.file.write(&meta)? != meta.len() {
            return Err(CryptFileError::FileWriteFailed);
        }
        self.layout = ChunkLayout::from_processor(&self.processor, meta.len() as u64);
        debug!("created {} with {} metadata bytes", self.path.display(), meta.len());

        // anchor the layout with an empty first chunk
        self.do_seek(0, 0)?;
        self.with_active(|this, chunk| this.flush_chunk(chunk, true))
    }

    fn load_layout(&mut self, header_only: bool) -> Result<()> {
        let mut header = vec![0u8; self.processor.header_size()];
        self.file.seek(0)?;
        let read = self.file.read(&mut header)?;
        if read != header.len() {
            return Err(CryptFileError::InvalidCryptfileFormat(format!(
                "header needs {} bytes, file has {read}",
                header.len()
            )));
        }
        let info = self.processor.unpack_header(&header)?;

        let mut descriptor = vec![0u8; usize::from(info.descriptor_size)];
        let read = self.file.read(&mut descriptor)?;
        if read != descriptor.len() {
            return Err(CryptFileError::InvalidCryptfileFormat(format!(
                "descriptor needs {} bytes, file has {read}",
                descriptor.len()
            )));
        }
        self.processor.unpack_descriptor(&descriptor)?;

        let data_offset = (header.len() + descriptor.len()) as u64;
        self.layout = ChunkLayout::from_processor(&self.processor, data_offset);
        self.ciphertext_size = info.ciphertext_size;
        self.size = if self.processor.is_streaming_mode() {
            self.layout
                .streamed_plaintext_size(info.ciphertext_size, self.processor.stream_prefix_size() as u64)
        } else {
            info.plaintext_size
        };

        let data_size = self.file.size()?.saturating_sub(data_offset);
        if data_size < self.ciphertext_size {
            return Err(CryptFileError::InvalidCryptfileFormat(format!(
                "{data_size} bytes of chunk data, header claims {}",
                self.ciphertext_size
            )));
        }
        self.eof_seqnum = self.layout.pos_to_seqnum(self.size).ok_or_else(|| {
            CryptFileError::InvalidCryptfileFormat(format!(
                "plaintext size {} exceeds the chunk sequence",
                self.size
            ))
        })?;

        // every chunk before the eof chunk is full
        let full_chunks = self.layout.packed_before(self.eof_seqnum);
        if full_chunks.is_none_or(|needed| needed > self.ciphertext_size) {
            return Err(CryptFileError::InvalidCryptfileFormat(format!(
                "plaintext size {} does not fit {} bytes of chunk data",
                self.size, self.ciphertext_size
            )));
        }

        if header_only {
            return Ok(());
        }
        let start = if self.mode.is_append() { self.size } else { 0 };
        self.do_seek(start, 0)?;
        self.seek_cursor = start;
        Ok(())
    }

    /// Make the chunk covering `pos` active.
    ///
    /// `overwrite_hint` is the number of bytes about to be written from
    /// `pos`; a chunk that will be overwritten completely is not decrypted.
    fn do_seek(&mut self, pos: u64, overwrite_hint: usize) -> Result<()> {
        self.ensure_open()?;
        let out_of_range = if self.mode.is_append() {
            pos != self.size
        } else {
            pos > self.size
        };
        if out_of_range {
            return Err(CryptFileError::InvalidSeek {
                pos,
                size: self.size,
            });
        }

        let seqnum = self
            .layout
            .pos_to_seqnum(pos)
            .ok_or(CryptFileError::InvalidSize)?;
        let offset = self
            .layout
            .chunk_offset_for_pos(pos)
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or(CryptFileError::InvalidSeek {
                pos,
                size: self.size,
            })?;

        if let Some(chunk) = self.current.as_mut() {
            if chunk.seqnum == seqnum {
                chunk.offset = offset;
                self.cursor = pos;
                return Ok(());
            }
        }

        self.flush_last_chunk()?;
        if let Some(previous) = self.current.take() {
            self.retire(previous)?;
        }

        let cached = if self.use_cache {
            self.cache.take(seqnum)
        } else {
            None
        };
        let mut chunk = match cached {
            Some(chunk) => chunk,
            None => self.load_chunk(seqnum, offset, overwrite_hint)?,
        };
        chunk.offset = offset;

        self.current = Some(chunk);
        self.cursor = pos;
        self.eof_seqnum = self.eof_seqnum.max(seqnum);
        Ok(())
    }

    /// Move a chunk out of the active slot.
    fn retire(&mut self, mut chunk: Chunk) -> Result<()> {
        if self.use_cache {
            if let Some(mut evicted) = self.cache.insert(chunk) {
                if evicted.dirty {
                    debug!("evicting dirty chunk {}", evicted.seqnum);
                    self.flush_chunk(&mut evicted, false)?;
                }
            }
            return Ok(());
        }
        if chunk.dirty {
            self.flush_chunk(&mut chunk, false)?;
        }
        Ok(())
    }

    fn flush_evicted(&mut self, chunks: Vec<Chunk>) -> Result<()> {
        for mut chunk in chunks {
            if chunk.dirty {
                debug!("evicting dirty chunk {}", chunk.seqnum);
                self.flush_chunk(&mut chunk, false)?;
            }
        }
        Ok(())
    }

    fn load_chunk(&mut self, seqnum: u32, offset: usize, overwrite_hint: usize) -> Result<Chunk> {
        let max_size = self.processor.max_plain_chunk_size(seqnum) as usize;
        let mut chunk = Chunk::new(seqnum, max_size);

        // only full chunks can be skipped, the last one may be partial
        let overwrite = offset == 0
            && max_size != 0
            && overwrite_hint >= max_size
            && seqnum < self.eof_seqnum;

        let raw = self.chunk_raw_pos(seqnum)?;
        let eof = self.eof_pos();
        let len = self
            .processor
            .max_packed_chunk_size(seqnum, self.ciphertext_size)
            .min(eof - raw);
        if len == 0 {
            return Ok(chunk);
        }

        if overwrite {
            chunk.content.clear();
        } else {
            let len = usize::try_from(len).map_err(|_| CryptFileError::InvalidSize)?;
            let mut packed = vec![0u8; len];
            self.file.seek(raw)?;
            if self.file.read(&mut packed)? != len {
                return Err(CryptFileError::FileReadFailed);
            }
            chunk.content = self.processor.unpack_chunk(&packed, seqnum)?;
            chunk.stream_write_cursor = chunk.content.len();
        }
        chunk.ciphertext_size = len;
        Ok(chunk)
    }

    /// Raw offset of chunk `seqnum`, which must not lie past the last chunk.
    fn chunk_raw_pos(&self, seqnum: u32) -> Result<u64> {
        let eof = self.eof_pos();
        if self.file.size()? < eof {
            return Err(CryptFileError::InvalidSize);
        }
        let raw = self.layout.seqnum_to_raw_pos(seqnum);
        if raw > eof {
            return Err(CryptFileError::InvalidSeek {
                pos: raw,
                size: eof,
            });
        }
        Ok(raw)
    }

    /// Run `f` on the active chunk, putting it back afterwards.
    fn with_active<T>(&mut self, f: impl FnOnce(&mut Self, &mut Chunk) -> Result<T>) -> Result<T> {
        let mut chunk = self.current.take().ok_or(CryptFileError::FileNotOpen)?;
        let result = f(self, &mut chunk);
        self.current = Some(chunk);
        result
    }

    fn flush_last_chunk(&mut self) -> Result<()> {
        let pending = self
            .current
            .as_ref()
            .is_some_and(|c| c.dirty && c.seqnum == self.eof_seqnum);
        if pending {
            self.with_active(|this, chunk| this.flush_chunk(chunk, false))?;
        }
        Ok(())
    }

    fn flush_chunk(&mut self, chunk: &mut Chunk, with_size: bool) -> Result<()> {
        let packed = self.processor.pack_chunk(&chunk.content, chunk.seqnum)?;
        if !packed.is_empty() {
            let raw = self.chunk_raw_pos(chunk.seqnum)?;
            self.cut_tail(raw + packed.len() as u64)?;
            self.file.seek(raw)?;
            if self.file.write(&packed)? != packed.len() {
                return Err(CryptFileError::FileWriteFailed);
            }

            let len = packed.len() as u64;
            if len != chunk.ciphertext_size {
                self.ciphertext_size = self.ciphertext_size - chunk.ciphertext_size + len;
                self.size_dirty = true;
            }
            chunk.ciphertext_size = len;
        }
        chunk.dirty = false;

        if with_size {
            self.write_size()?;
        }
        Ok(())
    }

    /// Store both size fields in the header.
    /// Drop a stamp or other trailing bytes before chunk data first grows
    /// past `eof_pos`, so no stale record survives behind the new end.
    fn cut_tail(&mut self, raw_end: u64) -> Result<()> {
        let eof = self.eof_pos();
        if self.tail_cut || raw_end <= eof {
            return Ok(());
        }
        if self.file.size()? > eof {
            debug!("dropping trailing bytes of {} past {eof}", self.path.display());
            self.file.truncate(eof, false)?;
        }
        self.tail_cut = true;
        Ok(())
    }

    fn write_size(&mut self) -> Result<()> {
        if !self.size_dirty {
            return Ok(());
        }
        for (offset, value) in [
            (self.processor.plaintext_size_offset(), self.size),
            (self.processor.ciphertext_size_offset(), self.ciphertext_size),
        ] {
            self.file.seek(offset)?;
            if self.file.write(&value.to_le_bytes())? != 8 {
                return Err(CryptFileError::FileWriteFailed);
            }
        }
        self.size_dirty = false;
        Ok(())
    }

    /// Write back every dirty chunk and the header. `raw_flush` also
    /// flushes the backing file, deeply when `Some(true)`.
    fn do_flush(&mut self, raw_flush: Option<bool>) -> Result<()> {
        if !self.file.is_open() || !self.mode.is_write() {
            return Ok(());
        }

        let mut pooled = self.cache.drain();
        let mut result = Ok(());
        for chunk in pooled.iter_mut().filter(|c| c.dirty) {
            result = self.flush_chunk(chunk, false);
            if result.is_err() {
                break;
            }
        }
        self.cache.restore(pooled);
        result?;

        if self.current.as_ref().is_some_and(|c| c.dirty) {
            self.with_active(|this, chunk| this.flush_chunk(chunk, false))?;
        }
        self.write_size()?;

        if let Some(deep) = raw_flush {
            self.file.flush(deep)?;
        }
        Ok(())
    }

    fn do_close(&mut self, flush: bool) -> Result<()> {
        let mut result = Ok(());
        if self.file.is_open() {
            if flush {
                result = self.do_flush(Some(false));
            }
            let closed = self.file.close();
            if result.is_ok() {
                result = closed;
            } else if let Err(e) = closed {
                warn!("failed to close {}: {e}", self.path.display());
            }
        }
        self.reset_state();
        self.processor.reset();
        result
    }

    fn write_impl(&mut self, data: &[u8]) -> Result<usize> {
        let mut done = 0;
        while done < data.len() {
            let remaining = data.len() - done;
            let (seqnum, available) = {
                let chunk = self.active()?;
                (chunk.seqnum, chunk.available())
            };

            let len = match available {
                None => remaining,
                Some(0) => {
                    let next = seqnum.checked_add(1).ok_or(CryptFileError::InvalidSize)?;
                    let pos = self.layout.seqnum_to_pos(next);
                    self.do_seek(pos, remaining)?;
                    match self.active()?.available() {
                        None => remaining,
                        Some(0) => return Err(CryptFileError::FileWriteFailed),
                        Some(space) => space.min(remaining),
                    }
                }
                Some(space) => space.min(remaining),
            };

            let eof_seqnum = self.eof_seqnum;
            let chunk = self.active()?;
            let grown = chunk.write_at_cursor(&data[done..done + len]);
            chunk.dirty = true;
            if chunk.seqnum == eof_seqnum && grown > 0 {
                self.size += grown as u64;
                self.size_dirty = true;
            }
            self.cursor += len as u64;
            done += len;

            if self.processor.is_streaming_mode() {
                self.with_active(|this, chunk| this.stream_out(chunk))?;
            }
        }

        debug_assert!(self.cursor <= self.size);
        Ok(done)
    }

    /// Encrypt and append the part of `chunk` not yet on disk.
    fn stream_out(&mut self, chunk: &mut Chunk) -> Result<()> {
        let raw = self.chunk_raw_pos(chunk.seqnum)?;
        let mut out = Vec::new();
        if chunk.ciphertext_size == 0 {
            self.processor.init_stream_encryptor(&mut out, chunk.seqnum)?;
        } else if self.processor.stream_encryptor_seqnum() != Some(chunk.seqnum) {
            let mut prefix = vec![0u8; self.processor.stream_prefix_size()];
            self.file.seek(raw)?;
            if self.file.read(&mut prefix)? != prefix.len() {
                return Err(CryptFileError::FileReadFailed);
            }
            self.processor.resume_stream_encryptor(
                &prefix,
                chunk.seqnum,
                chunk.stream_write_cursor as u64,
            )?;
        }

        self.processor
            .encrypt_stream(&chunk.content[chunk.stream_write_cursor..], &mut out)?;
        self.cut_tail(raw + chunk.ciphertext_size + out.len() as u64)?;
        self.file.seek(raw + chunk.ciphertext_size)?;
        if self.file.write(&out)? != out.len() {
            return Err(CryptFileError::FileWriteFailed);
        }

        let len = out.len() as u64;
        chunk.ciphertext_size += len;
        chunk.stream_write_cursor = chunk.content.len();
        self.ciphertext_size += len;
        self.size_dirty = true;
        Ok(())
    }

    fn truncate_impl(&mut self, new_size: u64, backup_copy: bool) -> Result<()> {
        if new_size == self.size {
            return Ok(());
        }
        if new_size > self.size {
            return self.grow(new_size);
        }
        if self.mode.is_append() {
            return Err(CryptFileError::InvalidSeek {
                pos: new_size,
                size: self.size,
            });
        }

        let prev_pos = self.cursor;
        let prev_seek = self.seek_cursor;
        let backup = if backup_copy {
            Some(self.take_backup()?)
        } else {
            None
        };

        let result = self.shrink(new_size, prev_pos.min(new_size), backup_copy);
        let Some(backup) = backup else {
            return result;
        };

        match result {
            Ok(()) => {
                if let Err(e) = backup.close() {
                    warn!("failed to remove backup copy: {e}");
                }
                Ok(())
            }
            Err(e) => {
                warn!(
                    "truncating {} to {new_size} failed, restoring backup: {e}",
                    self.path.display()
                );
                if let Err(rollback_err) = self.rollback(&backup, prev_pos, prev_seek) {
                    let kept = backup.keep().map_err(|k| k.error)?;
                    warn!(
                        "failed to restore {} from backup {}: {rollback_err}",
                        self.path.display(),
                        kept.display()
                    );
                    return Err(rollback_err);
                }
                if let Err(close_err) = backup.close() {
                    warn!("failed to remove backup copy: {close_err}");
                }
                Err(e)
            }
        }
    }

    fn grow(&mut self, new_size: u64) -> Result<()> {
        let prev_pos = self.cursor;
        let block = usize::try_from(new_size - self.size)
            .unwrap_or(usize::MAX)
            .min(self.config.max_processing_size.max(1));
        let zeros = vec![0u8; block];

        self.do_seek(self.size, 0)?;
        while self.size < new_size {
            let len = usize::try_from(new_size - self.size)
                .unwrap_or(usize::MAX)
                .min(zeros.len());
            let before = self.size;
            self.write_impl(&zeros[..len])?;
            if self.size <= before {
                return Err(CryptFileError::Aborted {
                    expected: new_size,
                    actual: self.size,
                });
            }
        }
        debug!("grew {} to {new_size}", self.path.display());

        if self.mode.is_append() {
            self.seek_cursor = self.size;
            return self.do_seek(self.size, 0);
        }
        self.do_seek(prev_pos, 0)
    }

    /// Copy the file aside, reopening it afterwards.
    fn take_backup(&mut self) -> Result<TempPath> {
        let mode = self.mode;
        let prev_seek = self.seek_cursor;
        self.do_close(true)?;

        let copied = tempfile::Builder::new()
            .prefix(BACKUP_PREFIX)
            .suffix(BACKUP_SUFFIX)
            .tempfile()
            .map(tempfile::NamedTempFile::into_temp_path)
            .map_err(CryptFileError::from)
            .and_then(|backup| {
                fs::copy(&self.path, &backup)?;
                Ok(backup)
            });

        self.do_open(OpenMode::WriteExisting, false)?;
        self.mode = mode;
        self.seek_cursor = prev_seek;

        let backup = copied?;
        debug!("backed up {} to {}", self.path.display(), backup.display());
        Ok(backup)
    }

    fn rollback(&mut self, backup: &Path, prev_pos: u64, prev_seek: u64) -> Result<()> {
        let mode = self.mode;
        self.do_close(false)?;
        fs::remove_file(&self.path)?;
        fs::copy(backup, &self.path)?;

        self.do_open(OpenMode::WriteExisting, false)?;
        self.mode = mode;
        self.do_seek(prev_pos, 0)?;
        self.seek_cursor = prev_seek;
        info!("restored {} from backup", self.path.display());
        Ok(())
    }

    fn shrink(&mut self, new_size: u64, new_pos: u64, backup_copy: bool) -> Result<()> {
        self.do_flush(None)?;
        self.cache.clear();
        self.current = None;

        if new_size == 0 {
            self.size = 0;
            self.ciphertext_size = 0;
            self.eof_seqnum = 0;
            self.size_dirty = true;
            self.write_size()?;
            self.file.truncate(self.layout.data_offset(), backup_copy)?;
            return self.do_seek(0, 0);
        }

        // drops any stamp past the last chunk
        let mut raw_size = self.file.size()?.min(self.eof_pos());

        let boundary = self
            .layout
            .pos_to_seqnum(new_size)
            .ok_or(CryptFileError::InvalidSize)?;
        let keep = self
            .layout
            .chunk_offset_for_pos(new_size)
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or(CryptFileError::InvalidSize)?;
        let mut chunk = self.load_chunk(boundary, 0, 0)?;
        let tail = chunk.content[..keep.min(chunk.content.len())].to_vec();

        let mut plain = self.size;
        let mut cipher = self.ciphertext_size;
        loop {
            plain = plain
                .checked_sub(chunk.content.len() as u64)
                .ok_or(CryptFileError::InvalidSize)?;
            cipher = cipher
                .checked_sub(chunk.ciphertext_size)
                .ok_or(CryptFileError::InvalidSize)?;
            raw_size = raw_size
                .checked_sub(chunk.ciphertext_size)
                .ok_or(CryptFileError::InvalidSize)?;
            if chunk.seqnum >= self.eof_seqnum {
                break;
            }
            let next = chunk.seqnum + 1;
            chunk = self.load_chunk(next, 0, 0)?;
        }

        self.size = plain;
        self.ciphertext_size = cipher;
        self.eof_seqnum = boundary;
        self.size_dirty = true;
        self.write_size()?;
        self.file.truncate(raw_size, backup_copy)?;

        self.do_seek(self.size, 0)?;
        if !tail.is_empty() {
            self.write_impl(&tail)?;
        }
        if self.size != new_size {
            warn!(
                "wrong size after truncating {}: {} != {new_size}",
                self.path.display(),
                self.size
            );
            return Err(CryptFileError::Aborted {
                expected: new_size,
                actual: self.size,
            });
        }
        debug!("shrank {} to {new_size}", self.path.display());
        self.do_seek(new_pos, 0)
    }
}

impl<P: Processor, F: BackingFile> Drop for CryptFile<P, F> {
    fn drop(&mut self) {
        if self.file.is_open() {
            if let Err(e) = self.do_close(true) {
                warn!("failed to close {} on drop: {e}", self.path.display());
            }
        }
    }
}

impl<P: Processor, F: BackingFile> std::fmt::Debug for CryptFile<P, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptFile")
            .field("path", &self.path)
            .field("open", &self.file.is_open())
            .field("mode", &self.mode)
            .field("size", &self.size)
            .field("pos", &self.seek_cursor)
            .finish_non_exhaustive()
    }
}

impl<P: Processor, F: BackingFile> io::Read for CryptFile<P, F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(Self::read(self, buf)?)
    }
}

impl<P: Processor, F: BackingFile> io::Write for CryptFile<P, F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(Self::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(Self::flush(self, false)?)
    }
}

impl<P: Processor, F: BackingFile> io::Seek for CryptFile<P, F> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.seek_cursor.checked_add_signed(delta),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start"))?;

        Self::seek(self, target)?;
        Ok(self.seek_cursor)
    }
}
