use super::{archive_error, safe_join, write_entry, ExtractStats, ExtractedFile};
use crate::error::Error;
use flate2::bufread::GzDecoder;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tar::Archive;
use tracing::{error, trace, warn};

pub(super) fn extract(
    archive: &Path,
    dest: &Path,
    on_file: &mut dyn FnMut(ExtractedFile),
) -> Result<ExtractStats, Error> {
    let file = File::open(archive)?;
    let mut tar = Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut stats = ExtractStats::default();

    let entries = tar.entries().map_err(|e| archive_error(archive, e))?;
    for entry in entries {
        // A broken tar stream cannot be resynchronised.
        let mut entry = entry.map_err(|e| archive_error(archive, e))?;

        if !entry.header().entry_type().is_file() {
            trace!("Skipping non-regular tar entry");
            continue;
        }

        let name = match entry.path() {
            Ok(p) => p.into_owned(),
            Err(e) => {
                warn!("Unreadable entry name in {}: {}", archive.display(), e);
                stats.skipped += 1;
                continue;
            }
        };
        let Some(target) = safe_join(dest, &name) else {
            warn!("Refusing entry outside destination: {}", name.display());
            stats.skipped += 1;
            continue;
        };

        match write_entry(&mut entry, &target) {
            Ok(extracted) => {
                stats.files += 1;
                stats.bytes += extracted.size;
                on_file(extracted);
            }
            Err(e) => {
                error!("Failed to extract {} from tgz: {}", name.display(), e);
                stats.skipped += 1;
            }
        }
    }

    Ok(stats)
}
