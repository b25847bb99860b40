// instancetool/src/backup/archive.rs
use bzip2::read::MultiBzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tar::Builder;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::errors::ArchiveError;

/// Dump written by the SQL client tools.
pub const SQL_DUMP_NAME: &str = "database_dump.sql";
/// Base64 dump produced through the application's RPC `db.dump`.
pub const LEGACY_DUMP_NAME: &str = "database_dump.b64";
/// Archived name of the attachments directory.
pub const FILESTORE_NAME: &str = "filestore";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveFormat {
    #[default]
    Bzip2,
    Gzip,
}

impl ArchiveFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Bzip2 => "tar.bz2",
            Self::Gzip => "tar.gz",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if name.ends_with(".tar.bz2") {
            Some(Self::Bzip2)
        } else if name.ends_with(".tar.gz") {
            Some(Self::Gzip)
        } else {
            None
        }
    }
}

/// One input of [`pack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEntry {
    /// Archived under its own base name.
    Path(PathBuf),
    /// Archived under the given name.
    Renamed(PathBuf, String),
}

impl ArchiveEntry {
    fn source(&self) -> &Path {
        match self {
            Self::Path(path) | Self::Renamed(path, _) => path,
        }
    }

    fn archived_name(&self) -> Result<OsString, ArchiveError> {
        match self {
            Self::Path(path) => path
                .file_name()
                .map(|n| n.to_os_string())
                .ok_or_else(|| ArchiveError::MissingEntry(path.clone())),
            Self::Renamed(_, name) => Ok(OsString::from(name)),
        }
    }
}

/// Which dump marker an archive carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFlavor {
    /// `database_dump.sql`, plain SQL from `pg_dump`.
    Direct,
    /// `database_dump.b64`, a base64 encoded zip from the RPC dump.
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedArchive {
    /// Folder holding the dump marker.
    pub root: PathBuf,
    pub flavor: ArchiveFlavor,
}

/// Creates `destination_dir/name.<ext>` with every entry stored under the
/// top-level folder `name/`. Directory entries are added recursively.
pub fn pack(
    name: &str,
    entries: &[ArchiveEntry],
    destination_dir: &Path,
    format: ArchiveFormat,
) -> Result<PathBuf, ArchiveError> {
    for entry in entries {
        if !entry.source().exists() {
            return Err(ArchiveError::MissingEntry(entry.source().to_path_buf()));
        }
    }
    fs::create_dir_all(destination_dir)?;

    let archive_path = destination_dir.join(format!("{}.{}", name, format.extension()));
    info!(
        "Generating compressed file: {} in {} folder",
        name,
        destination_dir.display()
    );

    let result = write_archive(&archive_path, name, entries, format);
    if result.is_err() {
        let _ = fs::remove_file(&archive_path);
    }
    result?;

    info!("✓ Archive created successfully at {}", archive_path.display());
    Ok(archive_path)
}

fn write_archive(
    archive_path: &Path,
    name: &str,
    entries: &[ArchiveEntry],
    format: ArchiveFormat,
) -> Result<(), ArchiveError> {
    let archive_file = File::create(archive_path)?;
    match format {
        ArchiveFormat::Bzip2 => {
            let enc = BzEncoder::new(archive_file, bzip2::Compression::default());
            append_entries(Builder::new(enc), name, entries)?.finish()?;
        }
        ArchiveFormat::Gzip => {
            let enc = GzEncoder::new(archive_file, flate2::Compression::default());
            append_entries(Builder::new(enc), name, entries)?.finish()?;
        }
    }
    Ok(())
}

fn append_entries<W: Write>(
    mut tar_builder: Builder<W>,
    name: &str,
    entries: &[ArchiveEntry],
) -> Result<W, ArchiveError> {
    for entry in entries {
        let source = entry.source();
        let archived = Path::new(name).join(entry.archived_name()?);
        debug!("Adding {} as {}", source.display(), archived.display());
        if source.is_dir() {
            tar_builder.append_dir_all(&archived, source)?;
        } else {
            tar_builder.append_path_with_name(source, &archived)?;
        }
    }
    Ok(tar_builder.into_inner()?)
}

/// Extracts an archive into `destination_dir` and returns the folder that
/// holds its dump marker.
///
/// Extraction happens in a private staging directory first; an archive
/// without a recognizable dump leaves nothing behind.
pub fn unpack(archive_path: &Path, destination_dir: &Path) -> Result<UnpackedArchive, ArchiveError> {
    if !archive_path.is_file() {
        return Err(ArchiveError::NotAFile(archive_path.to_path_buf()));
    }
    let format = ArchiveFormat::from_path(archive_path)
        .ok_or_else(|| ArchiveError::UnknownFormat(archive_path.to_path_buf()))?;
    fs::create_dir_all(destination_dir)?;

    info!(
        "Decompressing file {} into {}",
        archive_path.display(),
        destination_dir.display()
    );
    let staging = tempfile::Builder::new()
        .prefix(".unpack_")
        .tempdir_in(destination_dir)?;

    let archive_file = File::open(archive_path)?;
    match format {
        ArchiveFormat::Bzip2 => extract(MultiBzDecoder::new(archive_file), staging.path())?,
        ArchiveFormat::Gzip => extract(GzDecoder::new(archive_file), staging.path())?,
    }

    let (marker_dir, flavor) = find_dump_marker(staging.path())?
        .ok_or_else(|| ArchiveError::MissingDumpMarker(archive_path.to_path_buf()))?;
    let relative = marker_dir
        .strip_prefix(staging.path())
        .map(Path::to_path_buf)
        .unwrap_or_default();

    // The top-level component is what moves out of staging; a dump stored at
    // the archive root takes the archive's own name.
    let (moved_from, moved_to, root) = match relative.components().next() {
        Some(top) => {
            let top = PathBuf::from(top.as_os_str());
            (
                staging.path().join(&top),
                destination_dir.join(&top),
                destination_dir.join(&relative),
            )
        }
        None => {
            let stem = archive_stem(archive_path);
            (
                staging.path().to_path_buf(),
                destination_dir.join(&stem),
                destination_dir.join(&stem),
            )
        }
    };
    if moved_to.exists() {
        return Err(ArchiveError::DestinationExists(moved_to));
    }
    fs::rename(&moved_from, &moved_to)?;

    debug!("Backup folder: {}", root.display());
    Ok(UnpackedArchive { root, flavor })
}

fn extract<R: Read>(reader: R, target: &Path) -> Result<(), ArchiveError> {
    let mut archive = tar::Archive::new(reader);
    archive.unpack(target)?;
    Ok(())
}

fn find_dump_marker(root: &Path) -> Result<Option<(PathBuf, ArchiveFlavor)>, ArchiveError> {
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let flavor = match entry.file_name().to_str() {
            Some(SQL_DUMP_NAME) => ArchiveFlavor::Direct,
            Some(LEGACY_DUMP_NAME) => ArchiveFlavor::Legacy,
            _ => continue,
        };
        let parent = entry.path().parent().unwrap_or(root).to_path_buf();
        return Ok(Some((parent, flavor)));
    }
    Ok(None)
}

fn archive_stem(archive_path: &Path) -> String {
    let name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.trim_end_matches(".tar.bz2")
        .trim_end_matches(".tar.gz")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn pack_then_unpack_keeps_layout_and_content() -> anyhow::Result<()> {
        let src = tempfile::tempdir()?;
        let dump = src.path().join(SQL_DUMP_NAME);
        write(&dump, b"CREATE TABLE t (id int);\n");
        let attachments = src.path().join("data/filestore/acme");
        write(&attachments.join("logo.png"), &[0x89, b'P', b'N', b'G', 0, 1, 2]);
        write(&attachments.join("ab/abcdef"), b"nested");

        let out = tempfile::tempdir()?;
        let archive = pack(
            "acme_pre-migration_20240115_093000",
            &[
                ArchiveEntry::Path(dump.clone()),
                ArchiveEntry::Renamed(attachments.clone(), FILESTORE_NAME.to_string()),
            ],
            out.path(),
            ArchiveFormat::Bzip2,
        )?;
        assert_eq!(
            archive,
            out.path().join("acme_pre-migration_20240115_093000.tar.bz2")
        );

        let work = tempfile::tempdir()?;
        let unpacked = unpack(&archive, work.path())?;
        let root = work.path().join("acme_pre-migration_20240115_093000");
        assert_eq!(unpacked, UnpackedArchive { root: root.clone(), flavor: ArchiveFlavor::Direct });
        assert_eq!(fs::read(root.join(SQL_DUMP_NAME))?, fs::read(&dump)?);
        assert_eq!(
            fs::read(root.join("filestore/logo.png"))?,
            [0x89, b'P', b'N', b'G', 0, 1, 2]
        );
        assert_eq!(fs::read(root.join("filestore/ab/abcdef"))?, b"nested");

        // only the backup folder is left, the staging directory is gone
        let names: Vec<_> = fs::read_dir(work.path())?
            .map(|e| e.map(|e| e.file_name()))
            .collect::<Result<_, _>>()?;
        assert_eq!(names, [OsString::from("acme_pre-migration_20240115_093000")]);
        Ok(())
    }

    #[test]
    fn unpack_detects_legacy_flavor_in_gzip() -> anyhow::Result<()> {
        let src = tempfile::tempdir()?;
        let dump = src.path().join(LEGACY_DUMP_NAME);
        write(&dump, b"UEsDBA==\n");

        let out = tempfile::tempdir()?;
        let archive = pack("old_20200101_000000", &[ArchiveEntry::Path(dump)], out.path(), ArchiveFormat::Gzip)?;
        assert!(archive.to_string_lossy().ends_with(".tar.gz"));

        let unpacked = unpack(&archive, &out.path().join("work"))?;
        assert_eq!(unpacked.flavor, ArchiveFlavor::Legacy);
        assert!(unpacked.root.join(LEGACY_DUMP_NAME).is_file());
        Ok(())
    }

    #[test]
    fn unpack_without_marker_leaves_no_debris() -> anyhow::Result<()> {
        let src = tempfile::tempdir()?;
        let stray = src.path().join("notes.txt");
        write(&stray, b"not a dump");

        let out = tempfile::tempdir()?;
        let archive = pack("broken", &[ArchiveEntry::Path(stray)], out.path(), ArchiveFormat::Bzip2)?;

        let work = tempfile::tempdir()?;
        let err = unpack(&archive, work.path()).unwrap_err();
        assert!(matches!(err, ArchiveError::MissingDumpMarker(_)));
        assert_eq!(fs::read_dir(work.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn unpack_rejects_unknown_suffix() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("backup.zip");
        write(&file, b"PK");
        assert!(matches!(
            unpack(&file, dir.path()),
            Err(ArchiveError::UnknownFormat(_))
        ));
        assert!(matches!(
            unpack(&dir.path().join("missing.tar.bz2"), dir.path()),
            Err(ArchiveError::NotAFile(_))
        ));
        Ok(())
    }

    #[test]
    fn pack_fails_on_missing_entry_without_creating_archive() -> anyhow::Result<()> {
        let out = tempfile::tempdir()?;
        let err = pack(
            "x",
            &[ArchiveEntry::Path(out.path().join("nope.sql"))],
            out.path(),
            ArchiveFormat::Bzip2,
        )
        .unwrap_err();
        assert!(matches!(err, ArchiveError::MissingEntry(_)));
        assert!(!out.path().join("x.tar.bz2").exists());
        Ok(())
    }

    #[test]
    fn format_from_path() {
        assert_eq!(ArchiveFormat::from_path(Path::new("/b/a_1.tar.bz2")), Some(ArchiveFormat::Bzip2));
        assert_eq!(ArchiveFormat::from_path(Path::new("a.tar.gz")), Some(ArchiveFormat::Gzip));
        assert_eq!(ArchiveFormat::from_path(Path::new("a.tar")), None);
    }
}
