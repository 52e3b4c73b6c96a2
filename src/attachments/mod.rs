//! Attachment content extraction.
//!
//! Plain-text attachments are decoded directly. Paginated documents
//! (PDF) are written to a scoped temp file and handed to an external
//! [`DocumentExtractor`]; the temp file is removed on every exit path
//! via `NamedTempFile`'s drop. Every other content type is reported as
//! unsupported — a value, not an error, so the caller can surface a note
//! in the prompt instead of failing the compilation.

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

use crate::chat::{Attachment, ChatClient};

/// Extracts text from a paginated document on disk, one string per page.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract_pages(&self, path: &Path) -> anyhow::Result<Vec<String>>;
}

/// Default extractor for deployments without a document pipeline:
/// reports extraction as unavailable, which degrades into the standard
/// unreadable-attachment note upstream.
pub struct NoExtractor;

#[async_trait]
impl DocumentExtractor for NoExtractor {
    async fn extract_pages(&self, _path: &Path) -> anyhow::Result<Vec<String>> {
        anyhow::bail!("document extraction is not configured")
    }
}

/// Outcome of reading one attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    /// Text successfully pulled out of the attachment.
    Text(String),
    /// Content type the reader does not handle.
    Unsupported,
}

/// Read an attachment and extract its text.
///
/// Byte-download and decode failures are returned as errors; the caller
/// degrades them to an inline note rather than propagating further.
pub async fn read_attachment(
    client: &dyn ChatClient,
    extractor: &dyn DocumentExtractor,
    attachment: &Attachment,
) -> anyhow::Result<Extracted> {
    let content_type = attachment.content_type.as_deref();

    // Unsupported formats short-circuit before the byte download.
    let is_text = content_type.is_none() || content_type.is_some_and(|t| t.starts_with("text/"));
    let is_pdf = content_type.is_some_and(|t| t.contains("application/pdf"));
    if !is_text && !is_pdf {
        debug!(
            filename = %attachment.filename,
            content_type = content_type.unwrap_or("<none>"),
            "skipping unsupported attachment"
        );
        return Ok(Extracted::Unsupported);
    }

    let bytes = client
        .read_attachment(attachment)
        .await
        .with_context(|| format!("failed to download attachment {}", attachment.filename))?;

    if is_text {
        let text = String::from_utf8(bytes)
            .with_context(|| format!("attachment {} is not valid UTF-8", attachment.filename))?;
        return Ok(Extracted::Text(text));
    }

    // Paginated document: persist to a scoped temp file for the external
    // extractor. The file is deleted when `tmp` drops, including on the
    // error paths below.
    let mut tmp = tempfile::Builder::new()
        .prefix("replyline-attachment-")
        .suffix(".pdf")
        .tempfile()
        .context("failed to create temp file for attachment")?;
    tmp.write_all(&bytes)
        .context("failed to write attachment to temp file")?;
    tmp.flush().context("failed to flush attachment temp file")?;

    let pages = extractor.extract_pages(tmp.path()).await?;
    debug!(
        filename = %attachment.filename,
        pages = pages.len(),
        "extracted document attachment"
    );

    Ok(Extracted::Text(pages.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatMessage, FetchError};

    struct StubClient {
        bytes: Vec<u8>,
    }

    #[async_trait]
    impl ChatClient for StubClient {
        async fn fetch_message(
            &self,
            _channel_id: u64,
            _message_id: u64,
        ) -> Result<ChatMessage, FetchError> {
            Err(FetchError::NotFound)
        }

        async fn read_attachment(&self, _attachment: &Attachment) -> anyhow::Result<Vec<u8>> {
            Ok(self.bytes.clone())
        }
    }

    struct PageExtractor;

    #[async_trait]
    impl DocumentExtractor for PageExtractor {
        async fn extract_pages(&self, path: &Path) -> anyhow::Result<Vec<String>> {
            // The temp file must exist and hold the payload at this point.
            let on_disk = std::fs::read(path)?;
            assert_eq!(on_disk, b"%PDF-fake");
            Ok(vec!["page one".to_string(), "page two".to_string()])
        }
    }

    fn attachment(content_type: Option<&str>) -> Attachment {
        Attachment {
            filename: "file.bin".to_string(),
            content_type: content_type.map(String::from),
            url: String::new(),
        }
    }

    #[tokio::test]
    async fn text_attachment_is_decoded() {
        let client = StubClient {
            bytes: b"hello attachment".to_vec(),
        };
        let got = read_attachment(&client, &NoExtractor, &attachment(Some("text/plain")))
            .await
            .unwrap();
        assert_eq!(got, Extracted::Text("hello attachment".to_string()));
    }

    #[tokio::test]
    async fn missing_content_type_is_treated_as_text() {
        let client = StubClient {
            bytes: b"raw".to_vec(),
        };
        let got = read_attachment(&client, &NoExtractor, &attachment(None))
            .await
            .unwrap();
        assert_eq!(got, Extracted::Text("raw".to_string()));
    }

    #[tokio::test]
    async fn pdf_pages_are_joined_with_newlines() {
        let client = StubClient {
            bytes: b"%PDF-fake".to_vec(),
        };
        let got = read_attachment(&client, &PageExtractor, &attachment(Some("application/pdf")))
            .await
            .unwrap();
        assert_eq!(got, Extracted::Text("page one\npage two".to_string()));
    }

    #[tokio::test]
    async fn unsupported_type_is_not_an_error() {
        let client = StubClient {
            bytes: vec![0xFF, 0xFE],
        };
        let got = read_attachment(&client, &NoExtractor, &attachment(Some("image/png")))
            .await
            .unwrap();
        assert_eq!(got, Extracted::Unsupported);
    }

    #[tokio::test]
    async fn invalid_utf8_text_is_an_error() {
        let client = StubClient {
            bytes: vec![0xFF, 0xFE, 0x00],
        };
        let got = read_attachment(&client, &NoExtractor, &attachment(Some("text/plain"))).await;
        assert!(got.is_err());
    }

    #[tokio::test]
    async fn failed_extraction_still_removes_temp_file() {
        struct FailingExtractor(std::sync::Mutex<Option<std::path::PathBuf>>);

        #[async_trait]
        impl DocumentExtractor for FailingExtractor {
            async fn extract_pages(&self, path: &Path) -> anyhow::Result<Vec<String>> {
                *self.0.lock().unwrap() = Some(path.to_path_buf());
                anyhow::bail!("corrupt document")
            }
        }

        let client = StubClient {
            bytes: b"%PDF-broken".to_vec(),
        };
        let extractor = FailingExtractor(std::sync::Mutex::new(None));
        let got =
            read_attachment(&client, &extractor, &attachment(Some("application/pdf"))).await;
        assert!(got.is_err());

        let seen = extractor.0.lock().unwrap().take().expect("extractor ran");
        assert!(!seen.exists(), "temp file should be removed after failure");
    }
}
