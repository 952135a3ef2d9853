use std::io::BufWriter;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::archive::{ArchiveWriter, PageEntry, RunMetadata, VolumeIdentity, version_tag};
use crate::error::{ArchiveWriteError, PageError, RunError};
use crate::ocr::PageOcr;
use crate::volume::{PageSource, Volume, VolumeReader};

/// Outcome of one volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSummary {
    pub pages_written: usize,
    pub pages_skipped: usize,
    pub output_path: PathBuf,
}

/// Runs the page pipeline over whole volumes and writes one archive each.
pub struct MokuroGenerator {
    page_ocr: PageOcr,
    ignore_errors: bool,
    compression_level: i32,
}

impl MokuroGenerator {
    pub fn new(page_ocr: PageOcr, ignore_errors: bool, compression_level: i32) -> Self {
        Self {
            page_ocr,
            ignore_errors,
            compression_level,
        }
    }

    pub fn page_ocr(&self) -> &PageOcr {
        &self.page_ocr
    }

    pub fn process_volume(&self, volume: &Volume) -> Result<VolumeSummary, RunError> {
        self.process_volume_at(volume, OffsetDateTime::now_utc())
    }

    /// Same as [`process_volume`](Self::process_volume) with a fixed creation
    /// time.
    ///
    /// The archive is built in a temporary file beside the output path and
    /// only moved into place once complete. When a page fails and errors are
    /// not ignored, nothing is written.
    pub fn process_volume_at(
        &self,
        volume: &Volume,
        created_at: OffsetDateTime,
    ) -> Result<VolumeSummary, RunError> {
        let mut reader = volume.open().map_err(RunError::Source)?;
        let (detector, recognizer) = self.page_ocr.model_versions();
        let metadata = RunMetadata::new(
            version_tag(&detector, &recognizer),
            created_at,
            VolumeIdentity {
                series: volume.title.name.clone(),
                series_uuid: volume.title.resolve_uuid(),
                volume: volume.name.clone(),
                volume_uuid: Uuid::new_v4().to_string(),
            },
        );

        let output_dir = output_dir(&volume.output_path);
        let temp = tempfile::Builder::new()
            .prefix(".mokuro-")
            .suffix(".part")
            .tempfile_in(output_dir)
            .map_err(ArchiveWriteError::from)?;
        let mut writer = ArchiveWriter::new(
            BufWriter::new(temp),
            metadata,
            created_at,
            self.compression_level,
        );

        let pages = reader.pages().to_vec();
        let mut skipped = 0;
        for page in &pages {
            match self.process_page(&mut reader, page) {
                Ok((bytes, result)) => {
                    writer.write_page(&PageEntry {
                        stem: &page.stem,
                        image_name: &page.image_name,
                        image_bytes: &bytes,
                        result: &result,
                    })?;
                    debug!("{}: {} blocks", page.image_name, result.blocks.len());
                }
                Err(err) if self.ignore_errors => {
                    error!("{}: {err}", page.image_name);
                    skipped += 1;
                }
                Err(source) => {
                    return Err(RunError::Page {
                        page: page.image_name.clone(),
                        source,
                    });
                }
            }
        }

        let (buffered, metadata) = writer.finish()?;
        let temp = buffered
            .into_inner()
            .map_err(|err| ArchiveWriteError::from(err.into_error()))?;
        temp.persist(&volume.output_path)
            .map_err(ArchiveWriteError::from)?;

        info!(
            "wrote {} ({} pages, {} skipped)",
            volume.output_path.display(),
            metadata.pages.len(),
            skipped
        );
        Ok(VolumeSummary {
            pages_written: metadata.pages.len(),
            pages_skipped: skipped,
            output_path: volume.output_path.clone(),
        })
    }

    fn process_page(
        &self,
        reader: &mut VolumeReader,
        page: &PageSource,
    ) -> Result<(Vec<u8>, crate::page::PageResult), PageError> {
        let bytes = reader
            .read(page)
            .map_err(|source| PageError::Read { source })?;
        let result = self.page_ocr.process(&bytes)?;
        Ok((bytes, result))
    }
}

fn output_dir(output_path: &Path) -> &Path {
    match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
