use anyhow::{Context, Result, anyhow};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;
use zip::ZipArchive;

use crate::archive::{METADATA_ENTRY, RunMetadata};

/// Page types the bundled decoder can read.
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];
pub const ARCHIVE_EXTENSIONS: [&str; 2] = ["zip", "cbz"];
pub const OUTPUT_SUFFIX: &str = ".mbz.zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Directory,
    Archive,
}

/// The directory holding a series' volumes.
#[derive(Debug, Clone)]
pub struct Title {
    pub path: PathBuf,
    pub name: String,
}

impl Title {
    fn new(path: PathBuf) -> Self {
        let name = file_name(&path);
        Self { path, name }
    }

    /// Reuses the series id already stored in sibling archives when they agree
    /// on one; otherwise starts a new one.
    pub fn resolve_uuid(&self) -> String {
        let existing = self.existing_uuids();
        match existing.len() {
            0 => Uuid::new_v4().to_string(),
            1 => existing.into_iter().next().unwrap_or_default(),
            _ => {
                warn!(
                    "inconsistent series ids in {}; generating a new one",
                    self.path.display()
                );
                Uuid::new_v4().to_string()
            }
        }
    }

    fn existing_uuids(&self) -> BTreeSet<String> {
        let Ok(entries) = fs::read_dir(&self.path) else {
            return BTreeSet::new();
        };
        entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file() && is_output_archive(path))
            .filter_map(|path| read_series_uuid(&path))
            .collect()
    }
}

fn read_series_uuid(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut archive = ZipArchive::new(BufReader::new(file)).ok()?;
    let mut entry = archive.by_name(METADATA_ENTRY).ok()?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).ok()?;
    let metadata: RunMetadata = serde_json::from_slice(&bytes).ok()?;
    Some(metadata.series_uuid).filter(|id| !id.is_empty())
}

/// One volume to process: a directory of images or a zip/cbz of them.
#[derive(Debug, Clone)]
pub struct Volume {
    pub path: PathBuf,
    pub kind: SourceKind,
    pub name: String,
    pub output_path: PathBuf,
    pub title: Title,
}

impl Volume {
    pub fn from_path(path: &Path) -> Result<Self> {
        let (kind, name) = if path.is_dir() {
            (SourceKind::Directory, file_name(path))
        } else if path.is_file() && has_extension(path, &ARCHIVE_EXTENSIONS) {
            let stem = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_default();
            (SourceKind::Archive, stem)
        } else {
            return Err(anyhow!(
                "expected directory or zip file -- found: {}",
                path.display()
            ));
        };
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            kind,
            output_path: parent.join(format!("{name}{OUTPUT_SUFFIX}")),
            name,
            title: Title::new(parent),
        })
    }

    pub fn open(&self) -> Result<VolumeReader> {
        match self.kind {
            SourceKind::Directory => {
                let mut files = Vec::new();
                collect_files(&self.path, &mut files)
                    .with_context(|| format!("failed to list {}", self.path.display()))?;
                let names: Vec<String> = files
                    .iter()
                    .map(|path| path.to_string_lossy().to_string())
                    .collect();
                let pages = page_index(names.iter().map(String::as_str))
                    .into_iter()
                    .map(|(idx, page)| PageSource {
                        location: PageLocation::File(files[idx].clone()),
                        ..page
                    })
                    .collect();
                Ok(VolumeReader {
                    pages,
                    archive: None,
                })
            }
            SourceKind::Archive => {
                let file = File::open(&self.path)
                    .with_context(|| format!("failed to open {}", self.path.display()))?;
                let archive = ZipArchive::new(BufReader::new(file))
                    .with_context(|| format!("failed to read zip archive {}", self.path.display()))?;
                let names: Vec<String> = archive
                    .file_names()
                    .filter(|name| !name.ends_with('/'))
                    .map(str::to_string)
                    .collect();
                let pages = page_index(names.iter().map(String::as_str))
                    .into_iter()
                    .map(|(idx, page)| PageSource {
                        location: PageLocation::Entry(names[idx].clone()),
                        ..page
                    })
                    .collect();
                Ok(VolumeReader {
                    pages,
                    archive: Some(archive),
                })
            }
        }
    }
}

impl std::fmt::Display for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PageLocation {
    File(PathBuf),
    Entry(String),
}

/// One page of a volume, in processing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSource {
    /// File name without extension; keys the page.
    pub stem: String,
    /// File name as stored in the output archive.
    pub image_name: String,
    location: PageLocation,
}

/// An opened volume, yielding page bytes in order.
pub struct VolumeReader {
    pages: Vec<PageSource>,
    archive: Option<ZipArchive<BufReader<File>>>,
}

impl VolumeReader {
    pub fn pages(&self) -> &[PageSource] {
        &self.pages
    }

    pub fn read(&mut self, page: &PageSource) -> std::io::Result<Vec<u8>> {
        match (&page.location, self.archive.as_mut()) {
            (PageLocation::File(path), _) => fs::read(path),
            (PageLocation::Entry(name), Some(archive)) => {
                let mut entry = archive.by_name(name).map_err(std::io::Error::other)?;
                let mut bytes = Vec::new();
                entry.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
            (PageLocation::Entry(name), None) => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no archive open for entry {name}"),
            )),
        }
    }
}

/// Picks image paths, sorts them naturally and keys them by stem.
///
/// A later path with an already seen stem replaces the earlier page in place.
/// Returns the index of the chosen path alongside each page.
fn page_index<'a>(paths: impl Iterator<Item = &'a str>) -> Vec<(usize, PageSource)> {
    let mut candidates: Vec<(usize, &str)> = paths
        .enumerate()
        .filter(|(_, path)| has_extension(Path::new(path), &IMAGE_EXTENSIONS))
        .collect();
    candidates.sort_by(|a, b| natural_cmp(a.1, b.1));

    let mut pages: Vec<(usize, PageSource)> = Vec::new();
    let mut by_stem: HashMap<String, usize> = HashMap::new();
    for (idx, path) in candidates {
        let path = Path::new(path);
        let image_name = file_name(path);
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        let page = PageSource {
            stem: stem.clone(),
            image_name,
            location: PageLocation::Entry(String::new()),
        };
        match by_stem.get(&stem) {
            Some(&slot) => pages[slot] = (idx, page),
            None => {
                by_stem.insert(stem, pages.len());
                pages.push((idx, page));
            }
        }
    }
    pages
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// Compares strings with digit runs ordered by value, so `2.png < 10.png`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();
    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let lhs = take_digits(&mut left);
                let rhs = take_digits(&mut right);
                let order = compare_numbers(&lhs, &rhs);
                if order != Ordering::Equal {
                    return order;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(ch) = chars.next_if(|ch| ch.is_ascii_digit()) {
        digits.push(ch);
    }
    digits
}

fn compare_numbers(a: &str, b: &str) -> Ordering {
    let a_trimmed = a.trim_start_matches('0');
    let b_trimmed = b.trim_start_matches('0');
    a_trimmed
        .len()
        .cmp(&b_trimmed.len())
        .then_with(|| a_trimmed.cmp(b_trimmed))
        .then_with(|| a.len().cmp(&b.len()))
}

pub(crate) fn is_output_archive(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().to_lowercase().ends_with(OUTPUT_SUFFIX))
        .unwrap_or(false)
}

pub(crate) fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            extensions.iter().any(|candidate| *candidate == ext)
        })
        .unwrap_or(false)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
