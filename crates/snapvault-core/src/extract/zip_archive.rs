use super::{archive_error, safe_join, write_entry, ExtractStats, ExtractedFile};
use crate::error::Error;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use tracing::{error, warn};
use zip::ZipArchive;

pub(super) fn extract(
    archive: &Path,
    dest: &Path,
    on_file: &mut dyn FnMut(ExtractedFile),
) -> Result<ExtractStats, Error> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|e| archive_error(archive, e))?;
    let mut stats = ExtractStats::default();

    for i in 0..zip.len() {
        let mut entry = match zip.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                error!("Failed to read entry {} of {}: {}", i, archive.display(), e);
                stats.skipped += 1;
                continue;
            }
        };

        let name = entry.name().to_string();
        let Some(target) = safe_join(dest, Path::new(&name)) else {
            warn!("Refusing entry outside destination: {}", name);
            stats.skipped += 1;
            continue;
        };

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        match write_entry(&mut entry, &target) {
            Ok(extracted) => {
                stats.files += 1;
                stats.bytes += extracted.size;
                on_file(extracted);
            }
            Err(e) => {
                error!("Failed to extract {} from zip: {}", name, e);
                stats.skipped += 1;
            }
        }
    }

    Ok(stats)
}
