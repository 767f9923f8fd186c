use std::fs::File;
use std::io::{self, Write};

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha512};
use tar::{Builder, EntryType, Header};

use turbine_core::{AbsoluteSystemPathBuf, AnchoredSystemPathBuf, Error, Result};

/// Streams `tar -> gzip -> (file, digest)` simultaneously. The digest covers
/// the compressed bytes and is finalized on `finish`.
pub struct CacheWriter {
    builder: Builder<GzEncoder<DigestWriter<File>>>,
}

/// Tees written bytes into a SHA-512 hasher on their way to the inner
/// writer.
struct DigestWriter<W: Write> {
    inner: W,
    hasher: Sha512,
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl CacheWriter {
    /// Open a new artifact for writing at `path`.
    pub fn create(path: &AbsoluteSystemPathBuf) -> Result<Self> {
        let file = File::create(path.as_path())
            .map_err(|e| Error::file_system(path.as_path(), "create cache artifact", e))?;
        let digest = DigestWriter {
            inner: file,
            hasher: Sha512::new(),
        };
        let encoder = GzEncoder::new(digest, Compression::default());
        Ok(Self {
            builder: Builder::new(encoder),
        })
    }

    /// Append one file, directory, or symlink found at `anchor`/`file_path`.
    /// Other entry types are rejected.
    pub fn add_file(
        &mut self,
        anchor: &AbsoluteSystemPathBuf,
        file_path: &AnchoredSystemPathBuf,
    ) -> Result<()> {
        let source = file_path.restore_anchor(anchor);
        let metadata = source
            .as_path()
            .symlink_metadata()
            .map_err(|e| Error::file_system(source.as_path(), "stat cache entry", e))?;

        // Entry names inside the archive are anchored-unix.
        let name = file_path.to_unix()?;
        let file_type = metadata.file_type();

        let mut header = Header::new_gnu();
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_mode(entry_mode(&metadata));

        if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            self.builder
                .append_data(&mut header, name.as_str(), io::empty())
                .map_err(|e| Error::file_system(source.as_path(), "append directory entry", e))?;
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(source.as_path())
                .map_err(|e| Error::file_system(source.as_path(), "read symlink target", e))?;
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            header
                .set_link_name(&target)
                .map_err(|e| Error::file_system(source.as_path(), "record symlink target", e))?;
            self.builder
                .append_data(&mut header, name.as_str(), io::empty())
                .map_err(|e| Error::file_system(source.as_path(), "append symlink entry", e))?;
        } else if file_type.is_file() {
            header.set_entry_type(EntryType::Regular);
            header.set_size(metadata.len());
            let reader = File::open(source.as_path())
                .map_err(|e| Error::file_system(source.as_path(), "open cache entry", e))?;
            self.builder
                .append_data(&mut header, name.as_str(), reader)
                .map_err(|e| Error::file_system(source.as_path(), "append file entry", e))?;
        } else {
            return Err(Error::UnsupportedFileType {
                name: name.as_str().to_string(),
            });
        }

        Ok(())
    }

    /// Close the tar and gzip streams, flush the file, and return the hex
    /// SHA-512 of the compressed bytes.
    pub fn finish(self) -> Result<String> {
        let encoder = self
            .builder
            .into_inner()
            .map_err(|e| Error::file_system("<artifact>", "finalize tar stream", e))?;
        let mut digest = encoder
            .finish()
            .map_err(|e| Error::file_system("<artifact>", "finalize gzip stream", e))?;
        digest
            .flush()
            .map_err(|e| Error::file_system("<artifact>", "flush cache artifact", e))?;
        Ok(hex::encode(digest.hasher.finalize()))
    }
}

#[cfg(unix)]
fn entry_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn entry_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else {
        0o644
    }
}
