//! PDF acquisition from a local path or a URL.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use billdigest_core::{Error, Result};

/// PDF magic bytes.
pub(crate) const PDF_MAGIC: &[u8] = b"%PDF";

/// Where a bill PDF comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdfSource {
    Path(PathBuf),
    Url(String),
}

impl PdfSource {
    /// Interpret `http://` and `https://` inputs as URLs, anything else as a path.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Self::Url(trimmed.to_string())
        } else {
            Self::Path(PathBuf::from(trimmed))
        }
    }

    /// Make the PDF available on the local filesystem.
    ///
    /// Downloads land in a temp file that is removed when the returned
    /// [`FetchedPdf`] is dropped.
    pub async fn fetch(&self, client: &reqwest::Client) -> Result<FetchedPdf> {
        match self {
            Self::Path(path) => {
                if !path.is_file() {
                    return Err(Error::Pdf(format!("PDF not found: {}", path.display())));
                }
                Ok(FetchedPdf {
                    path: path.clone(),
                    _temp: None,
                })
            }
            Self::Url(url) => download(client, url).await,
        }
    }
}

impl fmt::Display for PdfSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url),
        }
    }
}

impl From<&str> for PdfSource {
    fn from(input: &str) -> Self {
        Self::parse(input)
    }
}

/// A PDF on disk, possibly backed by a temp file.
#[derive(Debug)]
pub struct FetchedPdf {
    path: PathBuf,
    _temp: Option<NamedTempFile>,
}

impl FetchedPdf {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self._temp.is_some()
    }
}

/// HTTP client for PDF downloads with a whole-request timeout.
pub fn download_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

async fn download(client: &reqwest::Client, url: &str) -> Result<FetchedPdf> {
    debug!(
        subsystem = "jobs",
        component = "fetch",
        op = "download",
        url,
        "Downloading PDF"
    );
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Request(format!(
            "PDF download failed ({}): {}",
            status, url
        )));
    }

    // Streamed to disk; only the magic header is held for the check.
    let mut tmpfile = NamedTempFile::new()?;
    let mut header: Vec<u8> = Vec::with_capacity(PDF_MAGIC.len());
    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if header.len() < PDF_MAGIC.len() {
            let take = (PDF_MAGIC.len() - header.len()).min(chunk.len());
            header.extend_from_slice(&chunk[..take]);
            if header.len() == PDF_MAGIC.len() && header != PDF_MAGIC {
                return Err(not_a_pdf(url));
            }
        }
        tmpfile.write_all(&chunk)?;
        written += chunk.len() as u64;
    }
    if header != PDF_MAGIC {
        return Err(not_a_pdf(url));
    }
    tmpfile.flush()?;

    info!(
        subsystem = "jobs",
        component = "fetch",
        op = "download",
        url,
        bytes = written,
        "PDF downloaded"
    );

    Ok(FetchedPdf {
        path: tmpfile.path().to_path_buf(),
        _temp: Some(tmpfile),
    })
}

fn not_a_pdf(url: &str) -> Error {
    Error::Pdf(format!(
        "Downloaded file is not a valid PDF (missing %PDF header): {}",
        url
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source() {
        assert_eq!(
            PdfSource::parse("https://www.congress.gov/bill.pdf"),
            PdfSource::Url("https://www.congress.gov/bill.pdf".to_string())
        );
        assert_eq!(
            PdfSource::parse(" ./bills/hr1.pdf "),
            PdfSource::Path(PathBuf::from("./bills/hr1.pdf"))
        );
    }

    #[tokio::test]
    async fn test_fetch_missing_path_is_pdf_error() {
        let source = PdfSource::Path(PathBuf::from("/nonexistent/bill.pdf"));
        let err = source.fetch(&reqwest::Client::new()).await.unwrap_err();
        assert!(matches!(err, Error::Pdf(_)));
    }

    #[tokio::test]
    async fn test_fetch_local_path_is_not_temporary() {
        let file = NamedTempFile::new().unwrap();
        let source = PdfSource::Path(file.path().to_path_buf());
        let fetched = source.fetch(&reqwest::Client::new()).await.unwrap();
        assert_eq!(fetched.path(), file.path());
        assert!(!fetched.is_temporary());
    }
}
