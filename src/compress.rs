//! Compression streams with SHA-256 checksums over the stored bytes.
//!
//! [`CompressWriter`] compresses everything written to it and hashes the bytes
//! as they land on disk, so the recorded checksum always describes the stored
//! (compressed) file. [`CompressReader`] is the matching decompressor; it does
//! not verify anything itself, callers check [`calculate_sha256`] first.

use crate::error::SnapshotError;
use crate::types::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Size of the chunks moved between exec streams and compressors.
pub const CHUNK_SIZE: usize = 64 * 1024;

const ZSTD_LEVEL: i32 = 3;

/// Checksum and size of a finished stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub sha256: String,
    pub size: u64,
}

/// Hashes and counts every byte that reaches the inner writer.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

type Sink = HashingWriter<BufWriter<File>>;

enum Encoder {
    Zstd(zstd::stream::write::Encoder<'static, Sink>),
    Gzip(GzEncoder<Sink>),
    None(Sink),
}

/// Writer that compresses into a file while checksumming the stored bytes.
///
/// The writer never renames its file; pair it with [`TempFile`] to commit.
pub struct CompressWriter {
    encoder: Encoder,
    path: PathBuf,
}

impl CompressWriter {
    /// Creates (truncating) `path` and wraps it in the chosen compressor.
    pub fn create(path: &Path, compression: Compression) -> Result<Self, SnapshotError> {
        let file = File::create(path)?;
        let sink = HashingWriter {
            inner: BufWriter::with_capacity(CHUNK_SIZE, file),
            hasher: Sha256::new(),
            written: 0,
        };

        let encoder = match compression {
            Compression::Zstd => Encoder::Zstd(
                zstd::stream::write::Encoder::new(sink, ZSTD_LEVEL)
                    .map_err(|e| SnapshotError::CompressionError(e.to_string()))?,
            ),
            Compression::Gzip => {
                Encoder::Gzip(GzEncoder::new(sink, flate2::Compression::default()))
            }
            Compression::None => Encoder::None(sink),
        };

        Ok(Self {
            encoder,
            path: path.to_path_buf(),
        })
    }

    /// Flushes the compressor, syncs the file to disk and returns its digest.
    pub fn finish(self) -> Result<FileDigest, SnapshotError> {
        let sink = match self.encoder {
            Encoder::Zstd(e) => e
                .finish()
                .map_err(|e| SnapshotError::CompressionError(e.to_string()))?,
            Encoder::Gzip(e) => e
                .finish()
                .map_err(|e| SnapshotError::CompressionError(e.to_string()))?,
            Encoder::None(sink) => sink,
        };

        let HashingWriter {
            inner,
            hasher,
            written,
        } = sink;
        let file = inner.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        let digest = FileDigest {
            sha256: format!("{:x}", hasher.finalize()),
            size: written,
        };
        debug!(
            "Finished {} ({} bytes, sha256 {})",
            self.path.display(),
            digest.size,
            digest.sha256
        );
        Ok(digest)
    }
}

impl Write for CompressWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.encoder {
            Encoder::Zstd(e) => e.write(buf),
            Encoder::Gzip(e) => e.write(buf),
            Encoder::None(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.encoder {
            Encoder::Zstd(e) => e.flush(),
            Encoder::Gzip(e) => e.flush(),
            Encoder::None(e) => e.flush(),
        }
    }
}

/// Reader yielding the decompressed content of a stored file.
pub enum CompressReader {
    Zstd(zstd::stream::read::Decoder<'static, BufReader<File>>),
    Gzip(MultiGzDecoder<BufReader<File>>),
    None(BufReader<File>),
}

impl CompressReader {
    pub fn open(path: &Path, compression: Compression) -> Result<Self, SnapshotError> {
        let file = File::open(path)?;
        Ok(match compression {
            Compression::Zstd => CompressReader::Zstd(
                zstd::stream::read::Decoder::new(file)
                    .map_err(|e| SnapshotError::CompressionError(e.to_string()))?,
            ),
            Compression::Gzip => CompressReader::Gzip(MultiGzDecoder::new(BufReader::with_capacity(
                CHUNK_SIZE, file,
            ))),
            Compression::None => CompressReader::None(BufReader::with_capacity(CHUNK_SIZE, file)),
        })
    }
}

impl Read for CompressReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            CompressReader::Zstd(r) => r.read(buf),
            CompressReader::Gzip(r) => r.read(buf),
            CompressReader::None(r) => r.read(buf),
        }
    }
}

/// Computes the SHA-256 of a file's stored bytes without blocking the runtime.
pub async fn calculate_sha256(path: &Path) -> Result<String, SnapshotError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || sha256_file(&path))
        .await
        .map_err(SnapshotError::task_join)?
}

pub(crate) fn sha256_file(path: &Path) -> Result<String, SnapshotError> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(1024 * 1024, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Fails with [`SnapshotError::ChecksumMismatch`] unless `path` hashes to `expected`.
pub async fn verify_sha256(path: &Path, expected: &str) -> Result<(), SnapshotError> {
    let path = path.to_path_buf();
    let expected = expected.to_string();
    tokio::task::spawn_blocking(move || verify_file_sha256(&path, &expected))
        .await
        .map_err(SnapshotError::task_join)?
}

pub(crate) fn verify_file_sha256(path: &Path, expected: &str) -> Result<(), SnapshotError> {
    let actual = sha256_file(path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(SnapshotError::ChecksumMismatch {
            file: path.display().to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// A file under a temporary name that is removed unless committed.
///
/// Dropping the guard (including when the owning future is cancelled) deletes
/// the temporary file, so a final name only ever appears through [`TempFile::commit`].
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    committed: bool,
}

impl TempFile {
    /// Guards `<final_path>.tmp`.
    pub fn for_target(final_path: &Path) -> Self {
        let mut name = final_path.as_os_str().to_os_string();
        name.push(".tmp");
        Self {
            path: PathBuf::from(name),
            committed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically renames the temporary file to `final_path`.
    pub fn commit(mut self, final_path: &Path) -> Result<(), SnapshotError> {
        std::fs::rename(&self.path, final_path)?;
        self.committed = true;
        debug!("Committed {}", final_path.display());
        Ok(())
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed temporary file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove temporary file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Writes `content` to `path` through a temporary file and rename.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> Result<(), SnapshotError> {
    let temp = TempFile::for_target(path);
    let mut file = File::create(temp.path())?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);
    temp.commit(path)
}

/// Copies `src` to `dst` through a temporary file and rename.
pub(crate) fn atomic_copy(src: &Path, dst: &Path) -> Result<u64, SnapshotError> {
    let temp = TempFile::for_target(dst);
    let copied = std::fs::copy(src, temp.path())?;
    File::open(temp.path())?.sync_all()?;
    temp.commit(dst)?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_and_read(
        compression: Compression,
        payload: &[u8],
    ) -> (FileDigest, Vec<u8>, PathBuf, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(format!("data{}", compression.extension()));

        let mut writer = CompressWriter::create(&path, compression).unwrap();
        for chunk in payload.chunks(1000) {
            writer.write_all(chunk).unwrap();
        }
        let digest = writer.finish().unwrap();

        let mut reader = CompressReader::open(&path, compression).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        (digest, out, path, dir)
    }

    #[test]
    fn test_roundtrip_all_algorithms() {
        let payload: Vec<u8> = (0..50_000u32).flat_map(|i| (i % 251).to_le_bytes()).collect();
        for compression in [Compression::Zstd, Compression::Gzip, Compression::None] {
            let (digest, out, path, _dir) = write_and_read(compression, &payload);
            assert_eq!(out, payload, "{} roundtrip", compression);
            assert_eq!(digest.size, std::fs::metadata(&path).unwrap().len());
        }
    }

    #[test]
    fn test_checksum_covers_stored_bytes() {
        let payload = b"SELECT 1;\n".repeat(500);
        let (digest, _, path, _dir) = write_and_read(Compression::Gzip, &payload);

        let stored = std::fs::read(&path).unwrap();
        assert_eq!(digest.sha256, format!("{:x}", Sha256::digest(&stored)));
        assert_ne!(digest.sha256, format!("{:x}", Sha256::digest(&payload)));
        assert!(digest.size < payload.len() as u64);
    }

    #[test]
    fn test_none_is_passthrough() {
        let (digest, _, path, _dir) = write_and_read(Compression::None, b"raw bytes");
        assert_eq!(std::fs::read(&path).unwrap(), b"raw bytes");
        assert_eq!(digest.size, 9);
    }

    #[tokio::test]
    async fn test_verify_detects_flipped_byte() {
        let (digest, _, path, _dir) = write_and_read(Compression::Zstd, &b"abc".repeat(1000));
        verify_sha256(&path, &digest.sha256).await.unwrap();

        let mut stored = std::fs::read(&path).unwrap();
        let last = stored.len() - 1;
        stored[last] ^= 0xff;
        std::fs::write(&path, stored).unwrap();

        let err = verify_sha256(&path, &digest.sha256).await.unwrap_err();
        assert!(matches!(err, SnapshotError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_temp_file_removed_unless_committed() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("dump.sql");

        let temp = TempFile::for_target(&target);
        std::fs::write(temp.path(), b"partial").unwrap();
        assert!(dir.path().join("dump.sql.tmp").exists());
        drop(temp);
        assert!(!dir.path().join("dump.sql.tmp").exists());
        assert!(!target.exists());

        let temp = TempFile::for_target(&target);
        std::fs::write(temp.path(), b"complete").unwrap();
        temp.commit(&target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"complete");
        assert!(!dir.path().join("dump.sql.tmp").exists());
    }

    #[test]
    fn test_atomic_write_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("manifest.json");
        atomic_write(&target, b"{}").unwrap();

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
        assert_eq!(std::fs::read(&target).unwrap(), b"{}");
    }
}
