//! Archive library: CBZ assembly, atomic persistence, and reading archived pages back.

use std::cmp::Ordering;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use zip::write::FileOptions;

use crate::error::{DownloadError, Error, Result};
use crate::reader::ContentResolver;
use crate::types::{LocalRef, PageLocator};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

/// Directory of chapter archives addressed by [`LocalRef`]
///
/// The archive's file name is its local reference.
#[derive(Clone, Debug)]
pub struct ArchiveLibrary {
    root: PathBuf,
    persist_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ArchiveLibrary {
    /// Library rooted at `root` (created on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            persist_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Library directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of an archive, rejecting references that escape the library
    pub fn path_of(&self, local_ref: &LocalRef) -> Result<PathBuf> {
        let name = local_ref.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(Error::ContractViolation(format!(
                "invalid archive reference: {:?}",
                name
            )));
        }
        Ok(self.root.join(name))
    }

    /// Write an assembled archive under a collision-free name.
    ///
    /// Bytes go to a `.part` file first and are renamed into place, so the final name
    /// only ever holds a complete archive.
    pub async fn write_archive(&self, file_name: &str, bytes: Vec<u8>) -> Result<LocalRef> {
        let _guard = self.persist_lock.lock().await;

        tokio::fs::create_dir_all(&self.root).await.map_err(|e| persist_error(&self.root, &e))?;

        let target = get_unique_path(&self.root.join(file_name))?;
        let partial = target.with_extension("cbz.part");

        if let Err(e) = tokio::fs::write(&partial, &bytes).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(persist_error(&target, &e));
        }
        if let Err(e) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(persist_error(&target, &e));
        }

        let name = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Other(format!("non UTF-8 archive name: {}", target.display())))?;
        tracing::debug!(path = %target.display(), size = bytes.len(), "Archive written");
        Ok(LocalRef(name.to_string()))
    }

    /// Image entries of an archive in natural order
    pub async fn list_pages(&self, local_ref: &LocalRef) -> Result<Vec<PageLocator>> {
        let path = self.path_of(local_ref)?;
        let entries = tokio::task::spawn_blocking(move || list_image_entries(&path))
            .await
            .map_err(|e| Error::Other(format!("archive listing task failed: {}", e)))??;

        Ok(entries
            .into_iter()
            .map(|entry| PageLocator::Archived {
                local_ref: local_ref.clone(),
                entry,
            })
            .collect())
    }

    /// Bytes of one archived page
    pub async fn read_page(&self, local_ref: &LocalRef, entry: &str) -> Result<Vec<u8>> {
        let path = self.path_of(local_ref)?;
        let entry = entry.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let file = std::fs::File::open(&path)?;
            let mut archive = zip::ZipArchive::new(file)?;
            let mut page = archive.by_name(&entry)?;
            let mut bytes = Vec::with_capacity(page.size() as usize);
            page.read_to_end(&mut bytes)?;
            Ok(bytes)
        })
        .await
        .map_err(|e| Error::Other(format!("archive read task failed: {}", e)))?
    }

    /// Remove an archive
    pub async fn delete(&self, local_ref: &LocalRef) -> Result<()> {
        let path = self.path_of(local_ref)?;
        tokio::fs::remove_file(&path).await?;
        tracing::info!(local_ref = %local_ref, "Archive deleted");
        Ok(())
    }
}

#[async_trait]
impl ContentResolver for ArchiveLibrary {
    async fn chapter_pages(&self, local_ref: &LocalRef) -> Result<Vec<PageLocator>> {
        self.list_pages(local_ref).await
    }
}

fn persist_error(path: &Path, error: &std::io::Error) -> Error {
    Error::Download(DownloadError::PersistFailed {
        path: path.to_path_buf(),
        reason: error.to_string(),
    })
}

fn list_image_entries(path: &Path) -> Result<Vec<String>> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let is_image = Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if is_image {
            names.push(name);
        }
    }
    names.sort_by(|a, b| natural_cmp(a, b));
    Ok(names)
}

/// Compare strings treating digit runs as numbers (`2.jpg` < `10.jpg`)
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a_chars = a.chars().peekable();
    let mut b_chars = b.chars().peekable();

    loop {
        match (a_chars.peek().copied(), b_chars.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let mut x_run = String::new();
                while let Some(c) = a_chars.peek().copied().filter(char::is_ascii_digit) {
                    x_run.push(c);
                    a_chars.next();
                }
                let mut y_run = String::new();
                while let Some(c) = b_chars.peek().copied().filter(char::is_ascii_digit) {
                    y_run.push(c);
                    b_chars.next();
                }
                let x_trim = x_run.trim_start_matches('0');
                let y_trim = y_run.trim_start_matches('0');
                let ordering = x_trim
                    .len()
                    .cmp(&y_trim.len())
                    .then_with(|| x_trim.cmp(y_trim))
                    .then_with(|| x_run.len().cmp(&y_run.len()));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(x), Some(y)) => {
                let ordering = x.to_ascii_lowercase().cmp(&y.to_ascii_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
                a_chars.next();
                b_chars.next();
            }
        }
    }
}

/// Entry name for page `index` (0-based) of `total`: zero-padded, at least three digits
///
/// ```
/// use chapterflow::acquisition::entry_name;
///
/// assert_eq!(entry_name(0, 12, "jpg"), "001.jpg");
/// assert_eq!(entry_name(999, 1500, "png"), "1000.png");
/// ```
pub fn entry_name(index: usize, total: usize, extension: &str) -> String {
    let width = total.to_string().len().max(3);
    format!("{:0width$}.{}", index + 1, extension, width = width)
}

/// Image extension inferred from a page URL (`jpg` when unknown)
pub fn page_extension(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".png") {
        "png"
    } else if path.ends_with(".webp") {
        "webp"
    } else if path.ends_with(".gif") {
        "gif"
    } else {
        "jpg"
    }
}

/// Lowercase a title and replace everything but `[a-z0-9]` with `_`
pub fn sanitize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '_' })
        .collect()
}

/// Archive file name: `{unix_millis}_{series}_{chapter}.cbz`
pub fn archive_file_name(series_title: &str, chapter_title: &str, unix_millis: i64) -> String {
    format!(
        "{}_{}_{}.cbz",
        unix_millis,
        sanitize_title(series_title),
        sanitize_title(chapter_title)
    )
}

/// Pack pages into an uncompressed CBZ, in the order given
pub fn pack_cbz(pages: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);

    for (name, bytes) in pages {
        writer.start_file(name.as_str(), options)?;
        writer.write_all(bytes)?;
    }

    Ok(writer.finish()?.into_inner())
}

/// Get a collision-free path by appending ` (n)` to the file stem
fn get_unique_path(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| invalid_path(path, "cannot extract file stem"))?;
    let extension = path.extension().and_then(|e| e.to_str());
    let parent = path
        .parent()
        .ok_or_else(|| invalid_path(path, "cannot extract parent directory"))?;

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let new_name = match extension {
            Some(ext) => format!("{} ({}).{}", stem, i, ext),
            None => format!("{} ({})", stem, i),
        };
        let new_path = parent.join(new_name);
        if !new_path.exists() {
            return Ok(new_path);
        }
    }

    Err(invalid_path(
        path,
        "could not find unique filename after 9999 attempts",
    ))
}

fn invalid_path(path: &Path, reason: &str) -> Error {
    Error::Download(DownloadError::PersistFailed {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pages(n: usize) -> Vec<(String, Vec<u8>)> {
        (0..n)
            .map(|i| (entry_name(i, n, "jpg"), vec![i as u8; 4]))
            .collect()
    }

    #[test]
    fn entry_names_keep_fetch_order_when_sorted() {
        let names: Vec<_> = (0..12).map(|i| entry_name(i, 12, "jpg")).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert_eq!(names[11], "012.jpg");
    }

    #[test]
    fn extension_ignores_query_string() {
        assert_eq!(page_extension("https://cdn/x/01.PNG?type=q90"), "png");
        assert_eq!(page_extension("https://cdn/x/01.webp"), "webp");
        assert_eq!(page_extension("https://cdn/x/image"), "jpg");
    }

    #[test]
    fn file_name_is_sanitized() {
        assert_eq!(
            archive_file_name("Tower of God", "Ep. 12: Rise!", 1700000000000),
            "1700000000000_tower_of_god_ep__12__rise_.cbz"
        );
    }

    #[test]
    fn natural_order_compares_digit_runs_numerically() {
        let mut names = vec!["10.jpg", "2.jpg", "1.jpg", "page_011.png", "page_9.png"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["1.jpg", "2.jpg", "10.jpg", "page_9.png", "page_011.png"]);
    }

    #[tokio::test]
    async fn written_archive_lists_pages_in_order() {
        let dir = TempDir::new().unwrap();
        let library = ArchiveLibrary::new(dir.path());

        let bytes = pack_cbz(&pages(3)).unwrap();
        let local_ref = library.write_archive("1_s_c.cbz", bytes).await.unwrap();
        assert_eq!(local_ref.as_str(), "1_s_c.cbz");

        let listed = library.list_pages(&local_ref).await.unwrap();
        let entries: Vec<_> = listed
            .iter()
            .map(|p| match p {
                PageLocator::Archived { entry, .. } => entry.clone(),
                other => panic!("unexpected locator {other:?}"),
            })
            .collect();
        assert_eq!(entries, vec!["001.jpg", "002.jpg", "003.jpg"]);

        let page = library.read_page(&local_ref, "002.jpg").await.unwrap();
        assert_eq!(page, vec![1u8; 4]);
    }

    #[tokio::test]
    async fn colliding_names_get_a_suffix_and_no_part_file_remains() {
        let dir = TempDir::new().unwrap();
        let library = ArchiveLibrary::new(dir.path());

        let first = library
            .write_archive("1_s_c.cbz", pack_cbz(&pages(1)).unwrap())
            .await
            .unwrap();
        let second = library
            .write_archive("1_s_c.cbz", pack_cbz(&pages(1)).unwrap())
            .await
            .unwrap();

        assert_eq!(first.as_str(), "1_s_c.cbz");
        assert_eq!(second.as_str(), "1_s_c (1).cbz");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn references_cannot_escape_the_library() {
        let dir = TempDir::new().unwrap();
        let library = ArchiveLibrary::new(dir.path());
        let result = library.list_pages(&LocalRef("../etc/passwd".into())).await;
        assert!(matches!(result, Err(Error::ContractViolation(_))));
    }

    #[tokio::test]
    async fn delete_removes_the_archive() {
        let dir = TempDir::new().unwrap();
        let library = ArchiveLibrary::new(dir.path());
        let local_ref = library
            .write_archive("x.cbz", pack_cbz(&pages(1)).unwrap())
            .await
            .unwrap();

        library.delete(&local_ref).await.unwrap();
        assert!(!dir.path().join("x.cbz").exists());
    }
}
