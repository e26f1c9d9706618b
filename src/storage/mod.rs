//! Persistent storage with a write-behind cache.
//!
//! Store workers hand finished sequences to [`StorageManager::enqueue`], which
//! only renders the files into memory and appends them to the cache. A
//! background flush task writes the cache out whenever it grows past the
//! configured size or the flush interval elapses. The cache mutex is the only
//! lock on the data path and is never held across file I/O.
//!
//! Directory layout under the base path:
//!
//! ```text
//! encoded/0000000001.ich    header + packed payload
//! original/0000000001.fasta container text as received
//! decoded/0000000001.txt    unpacked nucleotides
//! raw/0000000001.bin        packed payload only
//! index.jsonl               one JSON line per sequence
//! ```

mod record;

pub use record::{EncodedRecord, RecordHeader};

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::StorageConfig;
use crate::constants::storage::{ENCODED_EXTENSION, INDEX_FILE, WRITE_PROBE_FILE};
use crate::error::{ErrorContext, ProcessorError, Result};
use crate::stats::PipelineStats;
use crate::types::{SequenceMetadata, SourceFormat};

const ENCODED_DIR: &str = "encoded";
const ORIGINAL_DIR: &str = "original";
const DECODED_DIR: &str = "decoded";
const RAW_DIR: &str = "raw";

/// One line of `index.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Encoded file, relative to the base path.
    pub file: String,
    /// Channel the sequence arrived on.
    pub client: String,
    #[serde(flatten)]
    pub metadata: SequenceMetadata,
}

/// Everything Store needs to persist one sequence.
pub struct StoreRequest<'a> {
    pub metadata: &'a SequenceMetadata,
    /// Device id of the source channel.
    pub client: &'a str,
    pub packed: &'a [u8],
    /// Container text, when it was kept.
    pub original: Option<&'a [u8]>,
}

#[derive(Debug)]
struct PendingWrite {
    path: PathBuf,
    bytes: Vec<u8>,
    append: bool,
}

#[derive(Debug, Default)]
struct WriteCache {
    pending: Vec<PendingWrite>,
    bytes: usize,
}

/// Storage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    pub bytes_written: u64,
    pub files_written: u64,
    pub flushes: u64,
    pub cached_bytes: usize,
}

/// Owner of the on-disk layout and the write-behind cache.
pub struct StorageManager {
    config: StorageConfig,
    stats: Arc<PipelineStats>,
    cache: Mutex<WriteCache>,
    flush_signal: Condvar,
    last_sequence: u64,
    bytes_written: AtomicU64,
    files_written: AtomicU64,
    flushes: AtomicU64,
}

impl StorageManager {
    /// Create the directory structure and check that it is writable.
    pub fn open(config: StorageConfig, stats: Arc<PipelineStats>) -> Result<Arc<Self>> {
        let base = &config.base_path;
        let mut dirs = vec![base.join(ENCODED_DIR)];
        if config.store_original {
            dirs.push(base.join(ORIGINAL_DIR));
        }
        if config.store_decoded {
            dirs.push(base.join(DECODED_DIR));
        }
        if config.store_raw {
            dirs.push(base.join(RAW_DIR));
        }
        for dir in &dirs {
            fs::create_dir_all(dir).map_err(|e| {
                ProcessorError::Configuration(format!("cannot create {}: {}", dir.display(), e))
            })?;
        }

        let probe = base.join(WRITE_PROBE_FILE);
        fs::write(&probe, b"ok")
            .and_then(|_| fs::remove_file(&probe))
            .map_err(|e| {
                ProcessorError::Configuration(format!("{} is not writable: {}", base.display(), e))
            })?;

        let last_sequence = Self::scan_last_sequence(&base.join(ENCODED_DIR))?;

        info!(
            "Storage ready at {} (original={}, decoded={}, raw={}, index={}, last sequence {})",
            base.display(),
            config.store_original,
            config.store_decoded,
            config.store_raw,
            config.enable_indexing,
            last_sequence
        );

        Ok(Arc::new(Self {
            config,
            stats,
            cache: Mutex::new(WriteCache::default()),
            flush_signal: Condvar::new(),
            last_sequence,
            bytes_written: AtomicU64::new(0),
            files_written: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }))
    }

    /// Root directory.
    pub fn base_path(&self) -> &Path {
        &self.config.base_path
    }

    /// Highest sequence number already on disk, 0 for an empty store.
    ///
    /// New sequences must be numbered above this so earlier runs are never
    /// overwritten.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    fn scan_last_sequence(encoded_dir: &Path) -> Result<u64> {
        let mut last = 0;
        let entries = fs::read_dir(encoded_dir)
            .with_context(|| format!("scanning {}", encoded_dir.display()))?;
        for entry in entries {
            let path = entry.with_static_context("reading encoded entry")?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENCODED_EXTENSION) {
                continue;
            }
            if let Some(n) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                last = last.max(n);
            }
        }
        Ok(last)
    }

    fn file_stem(sequence_number: u64) -> String {
        format!("{:010}", sequence_number)
    }

    fn original_extension(format: SourceFormat) -> &'static str {
        match format {
            SourceFormat::Fasta => "fasta",
            SourceFormat::Fastq => "fastq",
            SourceFormat::GenBank => "gb",
            SourceFormat::Raw | SourceFormat::Unknown => "txt",
        }
    }

    fn original_path(&self, sequence_number: u64, format: SourceFormat) -> PathBuf {
        self.config.base_path.join(ORIGINAL_DIR).join(format!(
            "{}.{}",
            Self::file_stem(sequence_number),
            Self::original_extension(format)
        ))
    }

    /// Path of the encoded file for `sequence_number`.
    pub fn encoded_path(&self, sequence_number: u64) -> PathBuf {
        self.config
            .base_path
            .join(ENCODED_DIR)
            .join(format!("{}.{}", Self::file_stem(sequence_number), ENCODED_EXTENSION))
    }

    /// Render every configured representation of one sequence into the cache.
    pub fn enqueue(&self, request: StoreRequest<'_>) -> Result<()> {
        let meta = request.metadata;
        let stem = Self::file_stem(meta.sequence_number);
        let base = &self.config.base_path;
        let mut writes = Vec::with_capacity(5);

        let header = RecordHeader::from_metadata(meta, request.client);
        writes.push(PendingWrite {
            path: self.encoded_path(meta.sequence_number),
            bytes: EncodedRecord::render(&header, request.packed),
            append: false,
        });

        if self.config.store_original {
            if let Some(original) = request.original {
                writes.push(PendingWrite {
                    path: self.original_path(meta.sequence_number, meta.source_format),
                    bytes: original.to_vec(),
                    append: false,
                });
            }
        }

        if self.config.store_decoded {
            let mut decoded = codec::unpack(request.packed, meta.original_length as usize);
            decoded.push(b'\n');
            writes.push(PendingWrite {
                path: base.join(DECODED_DIR).join(format!("{}.txt", stem)),
                bytes: decoded,
                append: false,
            });
        }

        if self.config.store_raw {
            writes.push(PendingWrite {
                path: base.join(RAW_DIR).join(format!("{}.bin", stem)),
                bytes: request.packed.to_vec(),
                append: false,
            });
        }

        if self.config.enable_indexing {
            let entry = IndexEntry {
                file: format!("{}/{}.{}", ENCODED_DIR, stem, ENCODED_EXTENSION),
                client: request.client.to_string(),
                metadata: meta.clone(),
            };
            let mut line = serde_json::to_vec(&entry)?;
            line.push(b'\n');
            writes.push(PendingWrite {
                path: base.join(INDEX_FILE),
                bytes: line,
                append: true,
            });
        }

        let added: usize = writes.iter().map(|w| w.bytes.len()).sum();
        let full = {
            let mut cache = self.cache.lock();
            cache.pending.extend(writes);
            cache.bytes += added;
            cache.bytes >= self.config.write_cache_size
        };
        if full {
            self.flush_signal.notify_one();
        }
        Ok(())
    }

    /// Write out everything cached so far and return the number of files written.
    ///
    /// Failures are counted as storage errors; the failed data is dropped. A
    /// sequence file that already exists is a failure and is left untouched.
    pub fn flush(&self) -> usize {
        let pending = {
            let mut cache = self.cache.lock();
            cache.bytes = 0;
            std::mem::take(&mut cache.pending)
        };
        if pending.is_empty() {
            return 0;
        }

        let start = Instant::now();
        let mut written = 0;
        let mut bytes = 0u64;
        for write in pending {
            match self.write_one(&write) {
                Ok(()) => {
                    written += 1;
                    bytes += write.bytes.len() as u64;
                }
                Err(e) => {
                    self.stats.record_storage_error();
                    warn!("Storage write to {} failed: {}", write.path.display(), e);
                }
            }
        }

        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        self.files_written.fetch_add(written as u64, Ordering::Relaxed);
        self.flushes.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Flushed {} writes ({} bytes) in {:?}",
            written,
            bytes,
            start.elapsed()
        );
        written
    }

    fn write_one(&self, write: &PendingWrite) -> std::io::Result<()> {
        let file = if write.append {
            OpenOptions::new().create(true).append(true).open(&write.path)?
        } else {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&write.path)?
        };
        let mut writer = BufWriter::with_capacity(self.config.optimal_block_size, file);
        writer.write_all(&write.bytes)?;
        writer.flush()
    }

    /// Flush loop run by the background flush task until `stop` is set.
    ///
    /// Wakes on the flush interval or when [`StorageManager::enqueue`] fills
    /// the cache. The caller performs the final flush after joining.
    pub fn run_flush_loop(&self, stop: &AtomicBool) {
        while !stop.load(Ordering::Acquire) {
            {
                let mut cache = self.cache.lock();
                if cache.bytes < self.config.write_cache_size && !stop.load(Ordering::Acquire) {
                    self.flush_signal
                        .wait_for(&mut cache, self.config.flush_interval);
                }
            }
            self.flush();
        }
    }

    /// Wake the flush loop, e.g. after setting its stop flag.
    pub fn wake(&self) {
        let _cache = self.cache.lock();
        self.flush_signal.notify_all();
    }

    /// Read back and parse an encoded file.
    pub fn retrieve_encoded(&self, sequence_number: u64) -> Result<EncodedRecord> {
        let path = self.encoded_path(sequence_number);
        let bytes = Self::read_sequence_file(&path, sequence_number)?;
        EncodedRecord::parse(&bytes)
    }

    /// Read back the container text kept for `sequence_number`.
    ///
    /// Only available when `store_original` was set for the run that stored it.
    pub fn retrieve_original(&self, sequence_number: u64) -> Result<Vec<u8>> {
        [
            SourceFormat::Fasta,
            SourceFormat::Fastq,
            SourceFormat::GenBank,
            SourceFormat::Raw,
        ]
        .into_iter()
        .map(|format| self.original_path(sequence_number, format))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            ProcessorError::Storage(format!("no original kept for sequence {}", sequence_number))
        })
        .and_then(|path| Self::read_sequence_file(&path, sequence_number))
    }

    fn read_sequence_file(path: &Path, sequence_number: u64) -> Result<Vec<u8>> {
        match fs::read(path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ProcessorError::Storage(
                format!("sequence {} not found at {}", sequence_number, path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Read back an encoded file and unpack its nucleotides.
    pub fn retrieve_decoded(&self, sequence_number: u64) -> Result<Vec<u8>> {
        let record = self.retrieve_encoded(sequence_number)?;
        let length = record.header.length as usize;
        if codec::packed_len(length) > record.payload.len() {
            return Err(ProcessorError::Storage(format!(
                "sequence {} is truncated: {} nucleotides need {} bytes, found {}",
                sequence_number,
                length,
                codec::packed_len(length),
                record.payload.len()
            )));
        }
        Ok(codec::unpack(&record.payload, length))
    }

    /// Read every line of the index file.
    pub fn read_index(&self) -> Result<Vec<IndexEntry>> {
        let path = self.config.base_path.join(INDEX_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(ProcessorError::from))
            .collect()
    }

    /// Current statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            files_written: self.files_written.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            cached_bytes: self.cache.lock().bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SequenceId, Description};
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> StorageConfig {
        StorageConfig {
            base_path: dir.path().join("store"),
            store_original: true,
            store_decoded: true,
            store_raw: true,
            write_cache_size: 1 << 20,
            optimal_block_size: 4096,
            enable_indexing: true,
            flush_interval: Duration::from_millis(20),
        }
    }

    fn metadata(n: u64) -> SequenceMetadata {
        SequenceMetadata {
            sequence_number: n,
            sequence_id: SequenceId::new("seq1"),
            description: Description::new("test"),
            source_format: SourceFormat::Fasta,
            original_length: 8,
            encoded_length: 2,
            timestamp: 42,
            crc32: 0xDEAD_BEEF,
            sha256: None,
        }
    }

    fn request<'a>(meta: &'a SequenceMetadata, packed: &'a [u8]) -> StoreRequest<'a> {
        StoreRequest {
            metadata: meta,
            client: "mem0",
            packed,
            original: Some(&b">seq1 test\nATCGATCG\n"[..]),
        }
    }

    #[test]
    fn test_open_creates_layout() {
        let dir = TempDir::new().unwrap();
        let storage = StorageManager::open(config(&dir), Arc::new(PipelineStats::new())).unwrap();
        for sub in ["encoded", "original", "decoded", "raw"] {
            assert!(storage.base_path().join(sub).is_dir());
        }
        assert!(!storage.base_path().join(WRITE_PROBE_FILE).exists());
    }

    #[test]
    fn test_open_unwritable_path() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let mut cfg = config(&dir);
        cfg.base_path = blocker.join("nested");
        assert!(matches!(
            StorageManager::open(cfg, Arc::new(PipelineStats::new())),
            Err(ProcessorError::Configuration(_))
        ));
    }

    #[test]
    fn test_enqueue_is_cached_until_flush() {
        let dir = TempDir::new().unwrap();
        let storage = StorageManager::open(config(&dir), Arc::new(PipelineStats::new())).unwrap();
        let meta = metadata(1);
        storage.enqueue(request(&meta, &[0x1E, 0x1E])).unwrap();

        assert!(!storage.encoded_path(1).exists());
        assert!(storage.stats().cached_bytes > 0);

        assert_eq!(storage.flush(), 5);
        assert_eq!(storage.stats().cached_bytes, 0);

        let record = storage.retrieve_encoded(1).unwrap();
        assert_eq!(record.header.id, "seq1");
        assert_eq!(record.header.client, "mem0");
        assert_eq!(record.header.checksum, 0xDEAD_BEEF);
        assert_eq!(record.payload, vec![0x1E, 0x1E]);
        assert_eq!(storage.retrieve_decoded(1).unwrap(), b"ATCGATCG");

        let base = storage.base_path();
        assert_eq!(
            fs::read(base.join("original/0000000001.fasta")).unwrap(),
            b">seq1 test\nATCGATCG\n"
        );
        assert_eq!(fs::read(base.join("decoded/0000000001.txt")).unwrap(), b"ATCGATCG\n");
        assert_eq!(fs::read(base.join("raw/0000000001.bin")).unwrap(), vec![0x1E, 0x1E]);

        let index = storage.read_index().unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].file, "encoded/0000000001.ich");
        assert_eq!(index[0].metadata, meta);
    }

    #[test]
    fn test_flush_loop_writes_on_interval() {
        let dir = TempDir::new().unwrap();
        let storage = StorageManager::open(config(&dir), Arc::new(PipelineStats::new())).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let loop_storage = Arc::clone(&storage);
        let loop_stop = Arc::clone(&stop);
        let handle = std::thread::spawn(move || loop_storage.run_flush_loop(&loop_stop));

        let meta = metadata(7);
        storage.enqueue(request(&meta, &[0x1E, 0x1E])).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !storage.encoded_path(7).exists() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        stop.store(true, Ordering::Release);
        storage.wake();
        handle.join().unwrap();

        assert!(storage.encoded_path(7).exists());
    }

    #[test]
    fn test_size_threshold_wakes_flush() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.write_cache_size = 1;
        cfg.flush_interval = Duration::from_secs(3600);
        let storage = StorageManager::open(cfg, Arc::new(PipelineStats::new())).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let loop_storage = Arc::clone(&storage);
        let loop_stop = Arc::clone(&stop);
        let handle = std::thread::spawn(move || loop_storage.run_flush_loop(&loop_stop));

        let meta = metadata(3);
        storage.enqueue(request(&meta, &[0x1E, 0x1E])).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !storage.encoded_path(3).exists() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        stop.store(true, Ordering::Release);
        storage.wake();
        handle.join().unwrap();

        assert!(storage.encoded_path(3).exists());
    }

    #[test]
    fn test_write_failure_is_counted() {
        let dir = TempDir::new().unwrap();
        let stats = Arc::new(PipelineStats::new());
        let storage = StorageManager::open(config(&dir), Arc::clone(&stats)).unwrap();
        let meta = metadata(9);
        storage.enqueue(request(&meta, &[0x1E, 0x1E])).unwrap();

        fs::remove_dir_all(storage.base_path().join("raw")).unwrap();
        assert_eq!(storage.flush(), 4);
        assert_eq!(stats.snapshot().storage_errors, 1);
    }

    #[test]
    fn test_retrieve_missing_sequence() {
        let dir = TempDir::new().unwrap();
        let storage = StorageManager::open(config(&dir), Arc::new(PipelineStats::new())).unwrap();
        assert!(matches!(
            storage.retrieve_encoded(99),
            Err(ProcessorError::Storage(_))
        ));
        assert!(matches!(
            storage.retrieve_decoded(99),
            Err(ProcessorError::Storage(_))
        ));
        assert!(matches!(
            storage.retrieve_original(99),
            Err(ProcessorError::Storage(_))
        ));
        assert!(storage.read_index().unwrap().is_empty());
    }

    #[test]
    fn test_retrieve_original_finds_format_extension() {
        let dir = TempDir::new().unwrap();
        let storage = StorageManager::open(config(&dir), Arc::new(PipelineStats::new())).unwrap();

        let fasta = metadata(1);
        storage.enqueue(request(&fasta, &[0x1E, 0x1E])).unwrap();

        let mut fastq = metadata(2);
        fastq.source_format = SourceFormat::Fastq;
        fastq.original_length = 4;
        fastq.encoded_length = 1;
        let text = b"@r1\nACGT\n+\nIIII\n";
        storage
            .enqueue(StoreRequest {
                metadata: &fastq,
                client: "mem0",
                packed: &[0x39],
                original: Some(&text[..]),
            })
            .unwrap();
        storage.flush();

        assert_eq!(storage.retrieve_original(1).unwrap(), b">seq1 test\nATCGATCG\n");
        assert_eq!(storage.retrieve_original(2).unwrap(), text.to_vec());
        assert!(storage.base_path().join("original/0000000002.fastq").is_file());
    }

    #[test]
    fn test_reopen_reports_last_sequence() {
        let dir = TempDir::new().unwrap();
        let storage = StorageManager::open(config(&dir), Arc::new(PipelineStats::new())).unwrap();
        assert_eq!(storage.last_sequence(), 0);

        for n in [1, 2, 12] {
            let meta = metadata(n);
            storage.enqueue(request(&meta, &[0x1E, 0x1E])).unwrap();
        }
        storage.flush();
        fs::write(storage.base_path().join("encoded/notes.txt"), b"x").unwrap();
        drop(storage);

        let reopened = StorageManager::open(config(&dir), Arc::new(PipelineStats::new())).unwrap();
        assert_eq!(reopened.last_sequence(), 12);
    }

    #[test]
    fn test_existing_sequence_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let stats = Arc::new(PipelineStats::new());
        let storage = StorageManager::open(config(&dir), Arc::clone(&stats)).unwrap();

        let meta = metadata(4);
        storage.enqueue(request(&meta, &[0x1E, 0x1E])).unwrap();
        assert_eq!(storage.flush(), 5);

        let mut other = metadata(4);
        other.sequence_id = SequenceId::new("other");
        storage.enqueue(request(&other, &[0xFF, 0xFF])).unwrap();
        // Only the index append goes through
        assert_eq!(storage.flush(), 1);
        assert_eq!(stats.snapshot().storage_errors, 4);

        let record = storage.retrieve_encoded(4).unwrap();
        assert_eq!(record.header.id, "seq1");
        assert_eq!(record.payload, vec![0x1E, 0x1E]);
    }
}
