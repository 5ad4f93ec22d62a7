//! Uniform read/write over local files, HTTPS, and cloud object stores.
//!
//! Reads recognize the URI scheme, spool remote objects to local temp
//! files, and transparently decode gzip, bzip2, and tar inputs. The
//! decoder is chosen by content sniffing (magic bytes), not by catching
//! errors; a suffix that contradicts the bytes is a malformed-input error.
//!
//! Writes are staged in a local temp directory keyed by destination URI
//! and uploaded in one deferred `copy_to_bucket` call, so a failed submit
//! never leaves partial batch listings behind.

pub mod object_store;

use crate::config::ElasticBlastConfig;
use crate::constants::{ELB_META_CONFIG_FILE, ELB_METADATA_DIR};
use crate::error::Error;
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use object_store::{scheme_of, ObjectStoreRouter, Scheme};
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BZIP2_MAGIC: [u8; 3] = *b"BZh";
const TAR_MAGIC: [u8; 5] = *b"ustar";
const TAR_MAGIC_OFFSET: usize = 257;
const SNIFF_LEN: usize = 512;

/// Container format detected from a stream's leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Gzip,
    Bzip2,
    Tar,
    Plain,
}

/// Read up to `SNIFF_LEN` bytes, classify them, and hand back a stream
/// that replays the consumed prefix.
fn sniff(mut stream: Box<dyn Read + Send>) -> Result<(Format, Box<dyn Read + Send>), Error> {
    let mut head = [0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < SNIFF_LEN {
        let n = stream.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    let format = if head[..filled].starts_with(&GZIP_MAGIC) {
        Format::Gzip
    } else if head[..filled].starts_with(&BZIP2_MAGIC) {
        Format::Bzip2
    } else if filled >= TAR_MAGIC_OFFSET + TAR_MAGIC.len()
        && head[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()] == TAR_MAGIC
    {
        Format::Tar
    } else {
        Format::Plain
    };

    let replay = Cursor::new(head[..filled].to_vec()).chain(stream);
    Ok((format, Box::new(replay)))
}

/// Compression/archive expectations carried by a file name.
fn expected_formats(uri: &str) -> (Option<Format>, bool) {
    let lower = uri.to_lowercase();
    let compression = if lower.ends_with(".gz") || lower.ends_with(".tgz") {
        Some(Format::Gzip)
    } else if lower.ends_with(".bz2") {
        Some(Format::Bzip2)
    } else {
        None
    };
    let tar = lower.ends_with(".tar")
        || lower.ends_with(".tar.gz")
        || lower.ends_with(".tgz")
        || lower.ends_with(".tar.bz2");
    (compression, tar)
}

/// A readable query stream; keeps any spooled temp files alive for as
/// long as the reader is in use.
pub struct QueryStream {
    reader: BufReader<Box<dyn Read + Send>>,
    _spool: Vec<tempfile::TempPath>,
}

impl Read for QueryStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl std::fmt::Debug for QueryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryStream").finish_non_exhaustive()
    }
}

impl BufRead for QueryStream {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        self.reader.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.reader.consume(amt);
    }
}

/// A write staged for deferred upload.
#[derive(Debug, Clone)]
pub struct StagedUpload {
    pub path: PathBuf,
    pub uri: String,
}

/// The URI of `name` inside the metadata directory of a results bucket.
#[must_use]
pub fn metadata_uri(results: &str, name: &str) -> String {
    format!(
        "{}/{}/{}",
        results.trim_end_matches('/'),
        ELB_METADATA_DIR,
        name
    )
}

/// Storage front-end used by the driver for all query, job, and metadata
/// I/O.
pub struct FileHelper {
    router: ObjectStoreRouter,
    staging: TempDir,
    staged: Vec<StagedUpload>,
}

impl FileHelper {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            router: ObjectStoreRouter::new(),
            staging: tempfile::tempdir()?,
            staged: Vec::new(),
        })
    }

    /// The local staging directory for deferred uploads.
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }

    /// Open `uri` for streamed reading with transparent decoding.
    ///
    /// Remote objects are spooled to a temp file first; decompression and
    /// archive flattening stay streamed on top of that, so the sequence
    /// data is never held in memory as a whole.
    pub async fn open_for_read(&self, uri: &str) -> Result<QueryStream, Error> {
        let mut spool = Vec::new();
        let local_path = match scheme_of(uri) {
            Scheme::Local => PathBuf::from(uri),
            _ => {
                let temp = tempfile::NamedTempFile::new_in(self.staging.path())?;
                let store = self.router.store_for(uri).await?;
                store.download(uri, temp.path()).await?;
                let path = temp.path().to_path_buf();
                spool.push(temp.into_temp_path());
                path
            }
        };

        let file = File::open(&local_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_found(uri)
            } else {
                Error::Io(e)
            }
        })?;

        let (expected_compression, expect_tar) = expected_formats(uri);
        let (format, stream) = sniff(Box::new(file))?;

        // A compression suffix must match the bytes; the reverse is fine
        // (compressed content under a plain name is still decoded).
        if let Some(expected) = expected_compression {
            if format != expected {
                return Err(Error::malformed_input(format!(
                    "{uri} does not contain {} data",
                    match expected {
                        Format::Gzip => "gzip",
                        Format::Bzip2 => "bzip2",
                        _ => "compressed",
                    }
                )));
            }
        }

        let decoded: Box<dyn Read + Send> = match format {
            Format::Gzip => Box::new(GzDecoder::new(stream)),
            Format::Bzip2 => Box::new(BzDecoder::new(stream)),
            Format::Tar | Format::Plain => stream,
        };

        // The archive layer sits under the compression layer
        let (inner_format, decoded) = sniff(decoded)?;
        let reader: Box<dyn Read + Send> = if inner_format == Format::Tar {
            let spooled = self.spool_tar(decoded)?;
            let file = File::open(&spooled)?;
            spool.push(tempfile::TempPath::from_path(spooled));
            Box::new(file)
        } else if expect_tar {
            return Err(Error::malformed_input(format!(
                "{uri} does not contain a tar archive"
            )));
        } else {
            decoded
        };

        Ok(QueryStream {
            reader: BufReader::new(reader),
            _spool: spool,
        })
    }

    /// Open all query inputs as one logically concatenated stream.
    pub async fn open_queries(&self, uris: &[String]) -> Result<Vec<QueryStream>, Error> {
        let mut streams = Vec::with_capacity(uris.len());
        for uri in uris {
            streams.push(self.open_for_read(uri).await?);
        }
        Ok(streams)
    }

    /// Flatten a tar archive into one spooled file, members concatenated
    /// in archive order.
    fn spool_tar(&self, stream: Box<dyn Read + Send>) -> Result<PathBuf, Error> {
        let spool_path = self
            .staging
            .path()
            .join(format!(".tar-spool.{:016x}", fastrand::u64(..)));
        let mut out = File::create(&spool_path)?;
        let mut archive = tar::Archive::new(stream);
        for entry in archive
            .entries()
            .map_err(|e| Error::malformed_input(format!("unreadable tar archive: {e}")))?
        {
            let mut entry =
                entry.map_err(|e| Error::malformed_input(format!("corrupt tar entry: {e}")))?;
            if entry.header().entry_type().is_file() {
                std::io::copy(&mut entry, &mut out)?;
            }
        }
        Ok(spool_path)
    }

    /// Allocate a staging file for `uri` and register it for the next
    /// `copy_to_bucket`. The caller writes the returned path directly.
    pub fn open_for_write(&mut self, uri: &str) -> Result<PathBuf, Error> {
        let local = self
            .staging
            .path()
            .join(format!("staged.{:016x}", fastrand::u64(..)));
        self.staged.push(StagedUpload {
            path: local.clone(),
            uri: uri.to_string(),
        });
        Ok(local)
    }

    /// Number of writes staged and not yet uploaded.
    #[must_use]
    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    /// The writes staged and not yet uploaded, in staging order.
    #[must_use]
    pub fn staged_uploads(&self) -> &[StagedUpload] {
        &self.staged
    }

    /// Upload every staged file to its destination URI, several at a
    /// time. With `dry_run` the planned uploads are logged and the
    /// staging list is drained without contacting any store.
    pub async fn copy_to_bucket(&mut self, dry_run: bool) -> Result<(), Error> {
        use futures_util::{StreamExt, TryStreamExt};

        const UPLOAD_CONCURRENCY: usize = 8;

        let staged = std::mem::take(&mut self.staged);
        if dry_run {
            for upload in &staged {
                info!("dry-run: would upload {}", upload.uri);
            }
            return Ok(());
        }
        let router = &self.router;
        futures_util::stream::iter(staged.iter().map(|upload| async move {
            debug!("uploading {}", upload.uri);
            let store = router.store_for(&upload.uri).await?;
            store.upload(&upload.path, &upload.uri).await
        }))
        .buffer_unordered(UPLOAD_CONCURRENCY)
        .try_collect::<Vec<()>>()
        .await?;
        Ok(())
    }

    /// Existence check without reading the object body.
    pub async fn check_for_read(&self, uri: &str) -> Result<(), Error> {
        let store = self.router.store_for(uri).await?;
        if store.exists(uri).await? {
            Ok(())
        } else {
            Err(Error::not_found(uri))
        }
    }

    pub async fn exists(&self, uri: &str) -> Result<bool, Error> {
        let store = self.router.store_for(uri).await?;
        store.exists(uri).await
    }

    /// Write a small object directly, bypassing staging.
    pub async fn put_bytes(&self, uri: &str, bytes: &[u8]) -> Result<(), Error> {
        let store = self.router.store_for(uri).await?;
        store.put_bytes(uri, bytes).await
    }

    /// Read a small object in one shot.
    pub async fn get_bytes(&self, uri: &str) -> Result<Vec<u8>, Error> {
        let store = self.router.store_for(uri).await?;
        store.get_bytes(uri).await
    }

    /// Pin the canonical JSON copy of the configuration into the results
    /// bucket.
    pub async fn freeze_config(&self, cfg: &ElasticBlastConfig) -> Result<(), Error> {
        let uri = metadata_uri(cfg.results(), ELB_META_CONFIG_FILE);
        debug!("freezing configuration to {uri}");
        self.put_bytes(&uri, cfg.to_json()?.as_bytes()).await
    }

    /// Load the authoritative configuration frozen at submit time.
    pub async fn thaw_config(&self, results: &str) -> Result<ElasticBlastConfig, Error> {
        let uri = metadata_uri(results, ELB_META_CONFIG_FILE);
        let bytes = self.get_bytes(&uri).await.map_err(|e| {
            e.with_context(&format!(
                "results {results} do not hold an ElasticBLAST search"
            ))
        })?;
        let text = String::from_utf8(bytes)
            .map_err(|e| Error::malformed_input(format!("frozen config at {uri}: {e}")))?;
        ElasticBlastConfig::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn write_gz(path: &Path, content: &[u8]) {
        let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        encoder.write_all(content).unwrap();
        encoder.finish().unwrap();
    }

    #[tokio::test]
    async fn test_plain_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queries.fa");
        std::fs::write(&path, ">s1\nACGT\n").unwrap();

        let fh = FileHelper::new().unwrap();
        let mut stream = fh.open_for_read(path.to_str().unwrap()).await.unwrap();
        let mut text = String::new();
        stream.read_to_string(&mut text).unwrap();
        assert_eq!(text, ">s1\nACGT\n");
    }

    #[tokio::test]
    async fn test_gzip_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queries.fa.gz");
        write_gz(&path, b">s1\nACGT\n");

        let fh = FileHelper::new().unwrap();
        let mut stream = fh.open_for_read(path.to_str().unwrap()).await.unwrap();
        let mut text = String::new();
        stream.read_to_string(&mut text).unwrap();
        assert_eq!(text, ">s1\nACGT\n");
    }

    #[tokio::test]
    async fn test_gz_suffix_on_plain_bytes_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queries.fa.gz");
        std::fs::write(&path, ">s1\nACGT\n").unwrap();

        let fh = FileHelper::new().unwrap();
        let err = fh
            .open_for_read(path.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Malformed input"), "{err}");
    }

    #[tokio::test]
    async fn test_tar_suffix_on_plain_bytes_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queries.tar");
        std::fs::write(&path, vec![b'x'; 1024]).unwrap();

        let fh = FileHelper::new().unwrap();
        let err = fh
            .open_for_read(path.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("tar"), "{err}");
    }

    #[tokio::test]
    async fn test_tar_members_are_concatenated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queries.tar");
        {
            let mut builder = tar::Builder::new(File::create(&path).unwrap());
            for (name, body) in [("a.fa", ">s1\nAA\n"), ("b.fa", ">s2\nCC\n")] {
                let mut header = tar::Header::new_ustar();
                header.set_size(body.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder
                    .append_data(&mut header, name, body.as_bytes())
                    .unwrap();
            }
            builder.finish().unwrap();
        }

        let fh = FileHelper::new().unwrap();
        let mut stream = fh.open_for_read(path.to_str().unwrap()).await.unwrap();
        let mut text = String::new();
        stream.read_to_string(&mut text).unwrap();
        assert_eq!(text, ">s1\nAA\n>s2\nCC\n");
    }

    #[tokio::test]
    async fn test_staged_writes_upload_on_copy_to_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out/batch_000.fa").display().to_string();

        let mut fh = FileHelper::new().unwrap();
        let staged = fh.open_for_write(&dest).unwrap();
        std::fs::write(&staged, ">s1\nACGT\n").unwrap();
        assert_eq!(fh.staged_count(), 1);

        // Nothing lands before the deferred upload
        assert!(!PathBuf::from(&dest).exists());
        fh.copy_to_bucket(false).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), ">s1\nACGT\n");
        assert_eq!(fh.staged_count(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_uploads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out/batch_000.fa").display().to_string();

        let mut fh = FileHelper::new().unwrap();
        let staged = fh.open_for_write(&dest).unwrap();
        std::fs::write(&staged, "data").unwrap();
        fh.copy_to_bucket(true).await.unwrap();
        assert!(!PathBuf::from(&dest).exists());
    }

    #[tokio::test]
    async fn test_metadata_uri_layout() {
        assert_eq!(
            metadata_uri("s3://bucket/results/", "SUCCESS"),
            "s3://bucket/results/metadata/SUCCESS"
        );
    }

    #[tokio::test]
    async fn test_check_for_read_missing() {
        let dir = tempfile::tempdir().unwrap();
        let fh = FileHelper::new().unwrap();
        let missing = dir.path().join("absent.fa").display().to_string();
        assert!(fh.check_for_read(&missing).await.is_err());

        let present = dir.path().join("here.fa");
        std::fs::write(&present, "x").unwrap();
        fh.check_for_read(present.to_str().unwrap()).await.unwrap();
    }
}
