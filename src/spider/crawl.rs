//! Crawl collaborator
//!
//! A [`Crawler`] turns a leased server name into the list of files found on
//! it. [`MountCrawler`] walks shares that are already mounted locally under
//! `<root>/<server>`.
//!
//! Entries that could not be read are listed in [`CrawlOutput::skipped`]; a
//! walk with skipped entries must not be used to decide which files are gone.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;

use crate::storage::FileRecord;

/// Number of header bytes read to sniff a MIME type
pub const HEADER_SIZE: usize = 16;

/// Default maximum directory depth
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Files found on one server
#[derive(Debug, Clone, Default)]
pub struct CrawlOutput {
    /// One record per regular file that was read
    pub records: Vec<FileRecord>,

    /// Share-relative paths of directories or files that could not be read
    pub skipped: Vec<String>,
}

impl CrawlOutput {
    /// Output of a walk that saw everything
    pub fn complete(records: Vec<FileRecord>) -> Self {
        Self {
            records,
            skipped: Vec::new(),
        }
    }

    /// Check whether every entry was read
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Scans one server and reports the files found
#[async_trait]
pub trait Crawler: Send + Sync {
    /// Crawl `server`, returning one record per regular file
    async fn crawl(&self, server: &str) -> Result<CrawlOutput>;
}

// ============================================================================
// Mount Crawler
// ============================================================================

/// Crawler over locally mounted shares
#[derive(Debug, Clone)]
pub struct MountCrawler {
    root: PathBuf,
    max_depth: usize,
    sniff_mime: bool,
}

impl MountCrawler {
    /// Create a crawler rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_depth: DEFAULT_MAX_DEPTH,
            sniff_mime: true,
        }
    }

    /// Limit how deep below the share root the walk goes
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Enable/disable MIME sniffing
    pub fn with_mime_sniffing(mut self, enabled: bool) -> Self {
        self.sniff_mime = enabled;
        self
    }

    /// Directory a server's share is expected under
    pub fn server_root(&self, server: &str) -> PathBuf {
        self.root.join(server)
    }
}

#[async_trait]
impl Crawler for MountCrawler {
    async fn crawl(&self, server: &str) -> Result<CrawlOutput> {
        if server.contains('/') || server.contains('\\') || server == ".." || server == "." {
            bail!("Refusing to crawl server name with path components: {server}");
        }

        let base = self.server_root(server);
        let meta = tokio::fs::metadata(&base)
            .await
            .with_context(|| format!("Share for {server} is not mounted at {}", base.display()))?;
        if !meta.is_dir() {
            bail!("{} is not a directory", base.display());
        }

        let mut output = CrawlOutput::default();
        let mut pending = vec![(base.clone(), 0usize)];

        while let Some((dir, depth)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if dir == base => {
                    return Err(e)
                        .with_context(|| format!("Cannot list share root {}", base.display()));
                }
                Err(e) => {
                    tracing::warn!(path = %dir.display(), error = %e, "Cannot read directory");
                    output.skipped.push(display_relative(&base, &dir));
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(path = %dir.display(), error = %e, "Directory listing interrupted");
                        output.skipped.push(display_relative(&base, &dir));
                        break;
                    }
                };

                let path = entry.path();
                let file_type = match entry.file_type().await {
                    Ok(file_type) => file_type,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Cannot stat entry");
                        output.skipped.push(display_relative(&base, &path));
                        continue;
                    }
                };

                if file_type.is_symlink() {
                    tracing::trace!(path = %path.display(), "Skipping symlink");
                } else if file_type.is_dir() {
                    if depth < self.max_depth {
                        pending.push((path, depth + 1));
                    } else {
                        tracing::debug!(path = %path.display(), "Depth limit reached");
                    }
                } else if file_type.is_file() {
                    match self.file_record(server, &base, &path, &entry).await {
                        Ok(record) => output.records.push(record),
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "Skipping file");
                            output.skipped.push(display_relative(&base, &path));
                        }
                    }
                }
            }
        }

        tracing::debug!(
            server = %server,
            files = output.records.len(),
            skipped = output.skipped.len(),
            "Crawl finished"
        );
        Ok(output)
    }
}

impl MountCrawler {
    async fn file_record(
        &self,
        server: &str,
        base: &Path,
        path: &Path,
        entry: &tokio::fs::DirEntry,
    ) -> Result<FileRecord> {
        let meta = entry.metadata().await.context("Failed to stat file")?;
        let relative = relative_path(base, path)?;

        let mut record = FileRecord::new(server, relative, meta.len());
        if let Ok(modified) = meta.modified() {
            record = record.with_modified(DateTime::<Utc>::from(modified));
        }

        if self.sniff_mime {
            if let Some(mime) = sniff_file(path).await {
                record = record.with_mime_type(mime);
            }
        }

        Ok(record)
    }
}

fn relative_path(base: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(base)
        .with_context(|| format!("{} is outside {}", path.display(), base.display()))?;

    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

fn display_relative(base: &Path, path: &Path) -> String {
    relative_path(base, path).unwrap_or_else(|_| path.display().to_string())
}

// ============================================================================
// MIME Sniffing
// ============================================================================

async fn sniff_file(path: &Path) -> Option<&'static str> {
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let mut header = [0u8; HEADER_SIZE];
    let len = file.read(&mut header).await.ok()?;
    Some(sniff_mime(&header[..len]))
}

/// Guess a MIME type from the first bytes of a file
pub fn sniff_mime(header: &[u8]) -> &'static str {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"%PDF-", "application/pdf"),
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1f\x8b", "application/gzip"),
        (b"Rar!\x1a\x07", "application/x-rar"),
        (b"7z\xbc\xaf\x27\x1c", "application/x-7z-compressed"),
        (b"\x7fELF", "application/x-executable"),
        (b"MZ", "application/x-dosexec"),
        (b"ID3", "audio/mpeg"),
        (b"OggS", "audio/ogg"),
        (b"fLaC", "audio/flac"),
        (b"\x1a\x45\xdf\xa3", "video/x-matroska"),
        (b"\xd0\xcf\x11\xe0\xa1\xb1\x1a\xe1", "application/x-ole-storage"),
    ];

    if header.is_empty() {
        return "application/x-empty";
    }

    if let Some(&(_, mime)) = SIGNATURES.iter().find(|(magic, _)| header.starts_with(magic)) {
        return mime;
    }

    if header.len() >= 12 && &header[4..8] == b"ftyp" {
        return "video/mp4";
    }

    if header.len() >= 12 && header.starts_with(b"RIFF") {
        match &header[8..12] {
            b"AVI " => return "video/x-msvideo",
            b"WAVE" => return "audio/x-wav",
            _ => {}
        }
    }

    let looks_textual = header
        .iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..0x7f).contains(&b) || b >= 0x80);

    if looks_textual {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_file(path: &Path, contents: &[u8]) {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, contents).await.unwrap();
    }

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(b"%PDF-1.7\n"), "application/pdf");
        assert_eq!(sniff_mime(b"\x89PNG\r\n\x1a\n\0\0"), "image/png");
        assert_eq!(sniff_mime(b"hello world\n"), "text/plain");
        assert_eq!(sniff_mime(b"\0\x01\x02\x03"), "application/octet-stream");
        assert_eq!(sniff_mime(b""), "application/x-empty");
        assert_eq!(sniff_mime(b"RIFF\0\0\0\0WAVEfmt "), "audio/x-wav");
    }

    #[tokio::test]
    async fn test_crawl_mounted_share() {
        let root = tempfile::tempdir().unwrap();
        let share = root.path().join("fileserver");

        write_file(&share.join("readme.txt"), b"plain text").await;
        write_file(&share.join("docs/report.pdf"), b"%PDF-1.4 body").await;
        write_file(&share.join("docs/deep/a/b/c.bin"), b"\0\0\0").await;

        let crawler = MountCrawler::new(root.path());
        let output = crawler.crawl("fileserver").await.unwrap();
        assert!(output.is_complete());
        let mut records = output.records;
        records.sort_by(|a, b| a.path.cmp(&b.path));

        let paths: Vec<&str> = records.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["docs/deep/a/b/c.bin", "docs/report.pdf", "readme.txt"]);

        let pdf = &records[1];
        assert_eq!(pdf.server, "fileserver");
        assert_eq!(pdf.name, "report.pdf");
        assert_eq!(pdf.size, 13);
        assert_eq!(pdf.mime_type.as_deref(), Some("application/pdf"));
        assert!(pdf.modified.is_some());
    }

    #[tokio::test]
    async fn test_crawl_depth_limit() {
        let root = tempfile::tempdir().unwrap();
        let share = root.path().join("srv");

        write_file(&share.join("top.txt"), b"x").await;
        write_file(&share.join("one/mid.txt"), b"x").await;
        write_file(&share.join("one/two/deep.txt"), b"x").await;

        let crawler = MountCrawler::new(root.path()).with_max_depth(1);
        let output = crawler.crawl("srv").await.unwrap();
        assert!(output.is_complete());

        let mut paths: Vec<String> = output.records.into_iter().map(|r| r.path).collect();
        paths.sort();
        assert_eq!(paths, vec!["one/mid.txt", "top.txt"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crawl_skips_symlinks() {
        let root = tempfile::tempdir().unwrap();
        let share = root.path().join("srv");
        write_file(&share.join("real.txt"), b"x").await;
        std::os::unix::fs::symlink(share.join("real.txt"), share.join("link.txt")).unwrap();
        std::os::unix::fs::symlink(&share, share.join("loop")).unwrap();

        let crawler = MountCrawler::new(root.path()).with_mime_sniffing(false);
        let records = crawler.crawl("srv").await.unwrap().records;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "real.txt");
        assert!(records[0].mime_type.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crawl_reports_unreadable_directory() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let share = root.path().join("srv");
        write_file(&share.join("top.txt"), b"x").await;
        write_file(&share.join("locked/inner.txt"), b"x").await;

        let locked = share.join("locked");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        let readable_anyway = std::fs::read_dir(&locked).is_ok();

        let output = MountCrawler::new(root.path()).crawl("srv").await;
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        // Privileged users can list the directory regardless of its mode
        if readable_anyway {
            return;
        }

        let output = output.unwrap();
        assert!(!output.is_complete());
        assert_eq!(output.skipped, vec!["locked".to_string()]);
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].path, "top.txt");
    }

    #[tokio::test]
    async fn test_crawl_unmounted_share_fails() {
        let root = tempfile::tempdir().unwrap();
        let crawler = MountCrawler::new(root.path());

        assert!(crawler.crawl("missing").await.is_err());
        assert!(crawler.crawl("../etc").await.is_err());
    }
}
