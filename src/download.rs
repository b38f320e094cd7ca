// ============================================
// winmaint - download.rs
// ============================================
// Getting the HP Image Assistant installer onto disk:
//
// 1. GET the vendor page (plain HTML)
// 2. Walk its href="..." attributes and pick the first link to an .exe
// 3. Stream that file to <workspace>\hp-hpia.exe
//
// The link scan is deliberately dumb: it is not an HTML parser, it just
// finds href attributes in document order.
// ============================================

use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;

const USER_AGENT: &str = concat!("winmaint/", env!("CARGO_PKG_VERSION"));

// ============================================
// ERRORS
// ============================================

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { url: String, status: StatusCode },

    #[error("invalid URL {0}")]
    InvalidUrl(String),

    #[error("no .exe download link found on {0}")]
    NoExeLink(String),

    #[error("could not write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ============================================
// HTTP CLIENT
// ============================================

/// Build a blocking client with our user agent and the given timeout.
pub fn build_client(timeout: Duration) -> Result<Client, DownloadError> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(10)) // Follow up to 10 redirects
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// Fetch a page as text. Non-2xx responses are errors.
pub fn fetch_page(client: &Client, url: &str) -> Result<String, DownloadError> {
    tracing::debug!("Fetching page: {}", url);
    let response = client.get(url).send()?;
    if !response.status().is_success() {
        return Err(DownloadError::Status {
            url: url.to_string(),
            status: response.status(),
        });
    }
    Ok(response.text()?)
}

// ============================================
// LINK SCANNING
// ============================================

/// Return the first outbound link whose path ends in `.exe`,
/// resolved against `base_url` (so relative links work too).
pub fn extract_exe_link(html: &str, base_url: &str) -> Result<Url, DownloadError> {
    let base = Url::parse(base_url).map_err(|_| DownloadError::InvalidUrl(base_url.to_string()))?;

    for href in hrefs(html) {
        let Ok(resolved) = base.join(&href) else {
            continue;
        };
        if resolved.path().to_ascii_lowercase().ends_with(".exe") {
            return Ok(resolved);
        }
    }

    Err(DownloadError::NoExeLink(base_url.to_string()))
}

/// Every href attribute value in document order.
/// Handles double quotes, single quotes and unquoted values.
fn hrefs(html: &str) -> Vec<String> {
    let lower = html.to_ascii_lowercase();
    let mut found = Vec::new();
    let mut pos = 0;

    while let Some(offset) = lower[pos..].find("href") {
        let mut i = pos + offset + "href".len();
        pos = i;

        // Skip whitespace, expect '='
        i += count_leading_ws(&html[i..]);
        if !html[i..].starts_with('=') {
            continue;
        }
        i += 1;
        i += count_leading_ws(&html[i..]);

        let rest = &html[i..];
        let value = match rest.chars().next() {
            Some(quote @ ('"' | '\'')) => match rest[1..].find(quote) {
                Some(end) => &rest[1..1 + end],
                None => continue,
            },
            Some(_) => {
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == '>')
                    .unwrap_or(rest.len());
                &rest[..end]
            }
            None => break,
        };

        let value = value.trim();
        if !value.is_empty() {
            found.push(value.to_string());
        }
        pos = i;
    }

    found
}

fn count_leading_ws(s: &str) -> usize {
    s.len() - s.trim_start().len()
}

// ============================================
// FILE DOWNLOAD
// ============================================

/// Stream `url` into `dest`.
///
/// The data goes to a uniquely named `.part` file first and is renamed
/// into place only after the last byte is flushed, so a broken download
/// never leaves a truncated installer at `dest`.
///
/// The progress_callback receives values 0-100 (only when the server
/// reports a Content-Length).
pub fn download_file(
    client: &Client,
    url: &str,
    dest: &Path,
    progress_callback: impl Fn(u32),
) -> Result<u64, DownloadError> {
    tracing::info!("Downloading {}", url);
    progress_callback(0);

    let response = client.get(url).send()?;
    if !response.status().is_success() {
        return Err(DownloadError::Status {
            url: url.to_string(),
            status: response.status(),
        });
    }

    let total_size = response.content_length().unwrap_or(0);

    let part_path = dest.with_file_name(format!("download_{}.part", uuid::Uuid::new_v4().simple()));
    let mut file = File::create(&part_path).map_err(io_err(&part_path))?;
    let mut reader = response;

    let downloaded = match copy_with_progress(&mut reader, &mut file, total_size, &progress_callback) {
        Ok(n) => n,
        Err(source) => {
            drop(file);
            let _ = fs::remove_file(&part_path);
            return Err(DownloadError::Io { path: part_path, source });
        }
    };
    drop(file); // Close the handle before renaming

    let _ = fs::remove_file(dest);
    fs::rename(&part_path, dest).map_err(io_err(dest))?;

    progress_callback(100);
    tracing::info!("Saved {} ({})", dest.display(), format_size(downloaded));
    Ok(downloaded)
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> DownloadError {
    let path = path.to_path_buf();
    move |source| DownloadError::Io { path, source }
}

/// Copy in 8KB chunks, reporting 0-100 progress when the size is known.
fn copy_with_progress(
    reader: &mut impl Read,
    file: &mut File,
    total_size: u64,
    progress_callback: &impl Fn(u32),
) -> std::io::Result<u64> {
    let mut buffer = [0u8; 8192];
    let mut downloaded: u64 = 0;

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        file.write_all(&buffer[..bytes_read])?;
        downloaded += bytes_read as u64;

        if total_size > 0 {
            let percent = ((downloaded * 100) / total_size) as u32;
            progress_callback(percent.min(100));
        }
    }

    // Make sure everything is written to disk
    file.flush()?;
    Ok(downloaded)
}

/// Scrape the vendor page and download the installer it links to.
/// Returns the path of the saved installer.
pub fn fetch_installer(config: &Config) -> Result<PathBuf, DownloadError> {
    let page_client = build_client(Duration::from_secs(config.page_timeout_secs))?;
    let html = fetch_page(&page_client, &config.vendor_page_url)?;
    let link = extract_exe_link(&html, &config.vendor_page_url)?;
    tracing::info!("Found installer link: {}", link);

    let download_client = build_client(Duration::from_secs(config.download_timeout_secs))?;
    let dest = config.installer_path();
    download_file(&download_client, link.as_str(), &dest, |percent| {
        if percent % 25 == 0 {
            tracing::debug!("Installer download: {}%", percent);
        }
    })?;
    Ok(dest)
}

// ============================================
// FILE SIZE FORMATTING
// ============================================

/// Format a byte count as a human-readable size string.
///
/// Examples:
///   format_size(9_000_000) => "8.6 MB"
///   format_size(512_000)   => "500 KB"
pub fn format_size(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.1} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.0} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} bytes", bytes)
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://ftp.ext.hp.com/pub/caps-softpaq/cmit/HPIA.html";

    #[test]
    fn test_first_exe_link_wins() {
        let html = r#"
            <a href="release-notes.html">Notes</a>
            <a class="btn" HREF = "https://hpia.hpcloud.hp.com/downloads/hpia/hp-hpia-5.3.1.exe">Download</a>
            <a href="https://example.com/other.exe">Other</a>
        "#;
        let link = extract_exe_link(html, PAGE).unwrap();
        assert_eq!(
            link.as_str(),
            "https://hpia.hpcloud.hp.com/downloads/hpia/hp-hpia-5.3.1.exe"
        );
    }

    #[test]
    fn test_relative_and_single_quoted_links() {
        let html = "<a href='files/hp-hpia-5.2.0.EXE'>x</a>";
        let link = extract_exe_link(html, PAGE).unwrap();
        assert_eq!(
            link.as_str(),
            "https://ftp.ext.hp.com/pub/caps-softpaq/cmit/files/hp-hpia-5.2.0.EXE"
        );
    }

    #[test]
    fn test_unquoted_link_and_query_string() {
        let html = "<a href=/dl/hpia.exe?v=2>x</a>";
        let link = extract_exe_link(html, PAGE).unwrap();
        assert_eq!(link.path(), "/dl/hpia.exe");
    }

    #[test]
    fn test_no_exe_link() {
        let html = r#"<a href="hpia.zip">zip</a><p>href without equals</p>"#;
        let err = extract_exe_link(html, PAGE).unwrap_err();
        assert!(matches!(err, DownloadError::NoExeLink(_)));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 bytes");
        assert_eq!(format_size(1024), "1 KB");
        assert_eq!(format_size(1_048_576), "1.0 MB");
        assert_eq!(format_size(9_000_000), "8.6 MB");
        assert_eq!(format_size(1_073_741_824), "1.0 GB");
    }
}
