//! Volume archive: per-page result documents, the source images and the run
//! metadata, in one deflate-compressed zip.

use serde::{Deserialize, Serialize};
use std::io::{Seek, Write};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ArchiveWriteError;
use crate::page::PageResult;

pub const METADATA_ENTRY: &str = "mokuro-metadata.json";
pub const OCR_DIR: &str = "_ocr";
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 9;

/// Written once as the archive's last entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub created_at: String,
    pub modified_at: String,
    pub series: String,
    pub series_uuid: String,
    pub title: String,
    pub volume: String,
    pub volume_uuid: String,
    /// `(image entry, result entry)` in the order pages were written.
    pub pages: Vec<(String, String)>,
}

/// Names and ids of the volume a run belongs to.
#[derive(Debug, Clone)]
pub struct VolumeIdentity {
    pub series: String,
    pub series_uuid: String,
    pub volume: String,
    pub volume_uuid: String,
}

impl RunMetadata {
    pub fn new(version: String, created_at: OffsetDateTime, identity: VolumeIdentity) -> Self {
        let timestamp = created_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            version,
            created_at: timestamp.clone(),
            modified_at: timestamp,
            series: identity.series,
            series_uuid: identity.series_uuid,
            title: identity.volume.clone(),
            volume: identity.volume,
            volume_uuid: identity.volume_uuid,
            pages: Vec::new(),
        }
    }
}

pub fn version_tag(detector: &str, recognizer: &str) -> String {
    format!(
        "mokuro-rust:{};detector:{};recognizer:{};",
        env!("CARGO_PKG_VERSION"),
        detector,
        recognizer
    )
}

/// One processed page, borrowed for the duration of a write.
#[derive(Debug, Clone, Copy)]
pub struct PageEntry<'a> {
    /// Page name without extension; names the result entry.
    pub stem: &'a str,
    /// Entry name of the verbatim image, e.g. `001.jpg`.
    pub image_name: &'a str,
    pub image_bytes: &'a [u8],
    pub result: &'a PageResult,
}

impl PageEntry<'_> {
    pub fn result_path(&self) -> String {
        format!("{OCR_DIR}/{}.json", self.stem)
    }
}

/// Streams pages into a zip container, one page at a time.
pub struct ArchiveWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    options: FileOptions,
    metadata: RunMetadata,
}

impl<W: Write + Seek> ArchiveWriter<W> {
    /// Entry timestamps come from `created_at` so that a fixed timestamp
    /// gives byte-identical output.
    pub fn new(
        inner: W,
        metadata: RunMetadata,
        created_at: OffsetDateTime,
        compression_level: i32,
    ) -> Self {
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(compression_level.clamp(0, 9)))
            .last_modified_time(zip_time(created_at));
        Self {
            zip: ZipWriter::new(inner),
            options,
            metadata,
        }
    }

    pub fn pages_written(&self) -> usize {
        self.metadata.pages.len()
    }

    /// Adds the result document and the image of one page.
    ///
    /// The page is only recorded in the metadata once both entries are in.
    pub fn write_page(&mut self, page: &PageEntry<'_>) -> Result<(), ArchiveWriteError> {
        let result_path = page.result_path();
        let json = page
            .result
            .to_json()
            .map_err(|source| ArchiveWriteError::Encode {
                entry: result_path.clone(),
                source,
            })?;
        self.write_entry(&result_path, &json)?;
        self.write_entry(page.image_name, page.image_bytes)?;
        self.metadata
            .pages
            .push((page.image_name.to_string(), result_path));
        Ok(())
    }

    /// Writes the metadata entry and closes the container.
    pub fn finish(mut self) -> Result<(W, RunMetadata), ArchiveWriteError> {
        let json =
            serde_json::to_vec(&self.metadata).map_err(|source| ArchiveWriteError::Encode {
                entry: METADATA_ENTRY.to_string(),
                source,
            })?;
        self.write_entry(METADATA_ENTRY, &json)?;
        let inner = self.zip.finish()?;
        Ok((inner, self.metadata))
    }

    fn write_entry(&mut self, name: &str, bytes: &[u8]) -> Result<(), ArchiveWriteError> {
        self.zip.start_file(name, self.options)?;
        self.zip.write_all(bytes)?;
        Ok(())
    }
}

/// Writes a whole volume in input order.
pub fn write_volume<'a, W, I>(
    inner: W,
    metadata: RunMetadata,
    created_at: OffsetDateTime,
    compression_level: i32,
    pages: I,
) -> Result<(W, RunMetadata), ArchiveWriteError>
where
    W: Write + Seek,
    I: IntoIterator<Item = PageEntry<'a>>,
{
    let mut writer = ArchiveWriter::new(inner, metadata, created_at, compression_level);
    for page in pages {
        writer.write_page(&page)?;
    }
    writer.finish()
}

fn zip_time(at: OffsetDateTime) -> zip::DateTime {
    let year = u16::try_from(at.year()).unwrap_or(1980);
    zip::DateTime::from_date_and_time(
        year,
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second(),
    )
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Block;
    use std::io::{Cursor, Read};
    use time::macros::datetime;
    use zip::ZipArchive;

    fn identity() -> VolumeIdentity {
        VolumeIdentity {
            series: "Series".to_string(),
            series_uuid: "9a3c1b2e-0000-4000-8000-000000000001".to_string(),
            volume: "Volume 01".to_string(),
            volume_uuid: "9a3c1b2e-0000-4000-8000-000000000002".to_string(),
        }
    }

    fn pages() -> Vec<(String, String, Vec<u8>, PageResult)> {
        let mut block = Block::new("0190c1f2a3b47c4d8e9f0000000000aa".to_string(), [1, 2, 3, 4], false, 20);
        block.push_line([[1.0, 2.0], [3.0, 2.0], [3.0, 4.0], [1.0, 4.0]], "テスト".to_string());
        vec![
            (
                "002".to_string(),
                "002.png".to_string(),
                vec![0x89, b'P', b'N', b'G', 1, 2, 3],
                PageResult {
                    img_width: 100,
                    img_height: 200,
                    blocks: vec![block],
                },
            ),
            (
                "010".to_string(),
                "010.jpg".to_string(),
                vec![0xFF, 0xD8, 0xFF, 9, 9],
                PageResult::empty(640, 480),
            ),
        ]
    }

    fn write(at: OffsetDateTime) -> Vec<u8> {
        let pages = pages();
        let metadata = RunMetadata::new(version_tag("det", "rec"), at, identity());
        let entries = pages.iter().map(|(stem, name, bytes, result)| PageEntry {
            stem,
            image_name: name,
            image_bytes: bytes,
            result,
        });
        let (cursor, _) = write_volume(Cursor::new(Vec::new()), metadata, at, 9, entries)
            .expect("write volume");
        cursor.into_inner()
    }

    fn read_entry(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> Vec<u8> {
        let mut file = archive.by_name(name).expect("entry");
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).expect("read");
        bytes
    }

    #[test]
    fn same_input_gives_identical_archives() {
        let at = datetime!(2024-05-01 12:30:00 UTC);
        assert_eq!(write(at), write(at));
    }

    #[test]
    fn entries_follow_page_order_with_metadata_last() {
        let bytes = write(datetime!(2024-05-01 12:30:00 UTC));
        let mut archive = ZipArchive::new(Cursor::new(bytes)).expect("archive");
        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        assert_eq!(names.len(), 5);
        let mut ordered = Vec::new();
        for i in 0..archive.len() {
            let file = archive.by_index(i).expect("entry");
            assert_eq!(file.compression(), CompressionMethod::Deflated);
            ordered.push(file.name().to_string());
        }
        assert_eq!(
            ordered,
            vec![
                "_ocr/002.json",
                "002.png",
                "_ocr/010.json",
                "010.jpg",
                METADATA_ENTRY
            ]
        );

        assert_eq!(read_entry(&mut archive, "010.jpg"), vec![0xFF, 0xD8, 0xFF, 9, 9]);
        let page = PageResult::from_json(&read_entry(&mut archive, "_ocr/002.json")).expect("page");
        assert_eq!(page, pages()[0].3);

        let metadata: RunMetadata =
            serde_json::from_slice(&read_entry(&mut archive, METADATA_ENTRY)).expect("metadata");
        assert_eq!(metadata.created_at, "2024-05-01T12:30:00Z");
        assert_eq!(metadata.modified_at, metadata.created_at);
        assert_eq!(metadata.title, "Volume 01");
        assert_eq!(
            metadata.pages,
            vec![
                ("002.png".to_string(), "_ocr/002.json".to_string()),
                ("010.jpg".to_string(), "_ocr/010.json".to_string()),
            ]
        );
        assert!(metadata.version.starts_with("mokuro-rust:"));
        assert!(metadata.version.ends_with(";detector:det;recognizer:rec;"));
    }

    #[test]
    fn metadata_pages_serialize_as_pairs() {
        let mut metadata = RunMetadata::new(
            "v".to_string(),
            datetime!(2024-05-01 00:00:00 UTC),
            identity(),
        );
        metadata.pages.push(("1.png".to_string(), "_ocr/1.json".to_string()));
        let value = serde_json::to_value(&metadata).expect("json");
        assert_eq!(value["pages"], serde_json::json!([["1.png", "_ocr/1.json"]]));
        assert_eq!(value["series_uuid"], "9a3c1b2e-0000-4000-8000-000000000001");
    }

    #[test]
    fn zip_time_falls_back_outside_dos_range() {
        let old = zip_time(datetime!(1970-01-01 00:00:00 UTC));
        assert_eq!(old.year(), zip::DateTime::default().year());
        let now = zip_time(datetime!(2024-05-01 12:30:58 UTC));
        assert_eq!((now.year(), now.month(), now.day()), (2024, 5, 1));
    }
}
