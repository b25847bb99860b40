// instancetool/src/restore/legacy.rs
//! Archives whose dump came from the application's `db.dump` RPC: a base64
//! encoded zip holding `dump.sql` and a `filestore/` folder. Both land next
//! to the encoded dump, where the attachments step picks the folder up.

use anyhow::{Context, Result, bail};
use base64::Engine;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::backup::archive::LEGACY_DUMP_NAME;

const DECODED_ZIP_NAME: &str = "backup.zip";
const ZIPPED_DUMP_NAME: &str = "dump.sql";

/// Decodes a base64 file into `destination`. Line breaks inside the
/// encoded text are ignored.
pub fn decode_b64_file(source: &Path, destination: &Path) -> Result<()> {
    debug!("Decoding {} into {}", source.display(), destination.display());
    let encoded = fs::read(source).with_context(|| format!("Failed to read {}", source.display()))?;
    let compact: Vec<u8> = encoded
        .into_iter()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .with_context(|| format!("{} is not valid base64", source.display()))?;
    fs::write(destination, bytes)
        .with_context(|| format!("Failed to write {}", destination.display()))?;
    Ok(())
}

/// Turns `root/database_dump.b64` into `root/dump.sql` and returns its path.
pub fn extract_legacy_dump(root: &Path) -> Result<PathBuf> {
    let zip_path = root.join(DECODED_ZIP_NAME);
    decode_b64_file(&root.join(LEGACY_DUMP_NAME), &zip_path)?;

    info!("Unzipping backup");
    let zip_file = File::open(&zip_path)
        .with_context(|| format!("Failed to open {}", zip_path.display()))?;
    let mut zip = zip::ZipArchive::new(zip_file)
        .with_context(|| format!("Could not extract {LEGACY_DUMP_NAME}: not a zip archive"))?;
    zip.extract(root)
        .with_context(|| format!("Could not extract {LEGACY_DUMP_NAME}"))?;

    let dump = root.join(ZIPPED_DUMP_NAME);
    if !dump.is_file() {
        bail!("{LEGACY_DUMP_NAME} does not contain {ZIPPED_DUMP_NAME}");
    }
    Ok(dump)
}
