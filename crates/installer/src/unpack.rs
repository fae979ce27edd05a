use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Extracts product archives.
///
/// Methods are blocking; the installer calls them from blocking tasks.
pub trait Unpacker: Send + Sync + 'static {
    /// Lists the regular files contained in `archive`, relative to its root.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be read.
    fn entries(&self, archive: &Path) -> io::Result<Vec<PathBuf>>;

    /// Extracts `archive` into `destination`, overwriting existing files.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive is corrupt or cannot be written out.
    fn unpack(&self, archive: &Path, destination: &Path) -> io::Result<()>;
}

/// Unpacker for tar archives, gzip-compressed or not.
#[derive(Clone, Copy, Debug, Default)]
pub struct TarUnpacker;

impl TarUnpacker {
    fn open(archive: &Path) -> io::Result<Archive<Box<dyn Read>>> {
        let mut file = File::open(archive)?;

        let mut magic = [0u8; 2];
        let read = file.read(&mut magic)?;
        file.seek(SeekFrom::Start(0))?;

        let reader: Box<dyn Read> = if read == magic.len() && magic == GZIP_MAGIC {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        Ok(Archive::new(reader))
    }
}

impl Unpacker for TarUnpacker {
    fn entries(&self, archive: &Path) -> io::Result<Vec<PathBuf>> {
        let mut archive = Self::open(archive)?;
        let mut paths = Vec::new();

        for entry in archive.entries()? {
            let entry = entry?;
            if entry.header().entry_type().is_file() {
                paths.push(entry.path()?.into_owned());
            }
        }

        Ok(paths)
    }

    fn unpack(&self, archive: &Path, destination: &Path) -> io::Result<()> {
        let mut archive = Self::open(archive)?;
        archive.set_preserve_permissions(true);
        archive.set_overwrite(true);

        archive.unpack(destination)
    }
}
