//! Multi-format document loaders.
//!
//! A [`Loader`] converts a stored file's bytes into ordered [`Segment`]s
//! with positional metadata. Variants are selected by file extension
//! through a [`LoaderRegistry`] lookup table, so new formats extend the
//! table without changing callers.
//!
//! | Extension | Loader | Segments |
//! |-----------|--------|----------|
//! | `txt`, `md`, `text` | [`PlainTextLoader`] | one, whole content |
//! | `pdf` | [`PdfLoader`] | one per page, tagged with the page number |
//! | `docx` | [`DocxLoader`] | one, collected `<w:t>` text runs |
//!
//! Loading is read-only and synchronous CPU work; the pipeline runs it
//! on the blocking worker pool. Whitespace-only segments are filtered
//! out by [`LoadOutcome`] and counted as skipped rather than failing
//! the document.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::Segment;

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Capability interface for format-specific loading.
pub trait Loader: Send + Sync {
    /// Produce ordered segments from raw file bytes.
    ///
    /// `source_name` is the original filename, propagated into each
    /// segment's metadata for citation display.
    fn load(&self, bytes: &[u8], source_name: &str) -> Result<Vec<Segment>>;
}

/// Result of loading a file: non-empty segments plus a count of
/// segments that were skipped (empty, whitespace-only, or malformed).
#[derive(Debug)]
pub struct LoadOutcome {
    pub segments: Vec<Segment>,
    pub skipped: usize,
}

/// Extension → loader lookup table.
pub struct LoaderRegistry {
    loaders: HashMap<String, Arc<dyn Loader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self {
            loaders: HashMap::new(),
        }
    }

    /// Registry with all built-in variants.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let plain: Arc<dyn Loader> = Arc::new(PlainTextLoader);
        registry.register("txt", plain.clone());
        registry.register("text", plain.clone());
        registry.register("md", plain);
        registry.register("pdf", Arc::new(PdfLoader));
        registry.register("docx", Arc::new(DocxLoader));
        registry
    }

    pub fn register(&mut self, extension: &str, loader: Arc<dyn Loader>) {
        self.loaders.insert(extension.to_lowercase(), loader);
    }

    /// Load a file through the variant registered for `extension`.
    ///
    /// Fails with [`Error::UnsupportedFormat`] when no variant is
    /// registered. Empty and whitespace-only segments are filtered and
    /// counted in [`LoadOutcome::skipped`]; an all-empty load yields
    /// zero segments, which the caller surfaces as "no content".
    pub fn load(&self, extension: &str, bytes: &[u8], source_name: &str) -> Result<LoadOutcome> {
        let ext = extension.trim_start_matches('.').to_lowercase();
        let loader = self
            .loaders
            .get(&ext)
            .ok_or_else(|| Error::UnsupportedFormat(ext.clone()))?;

        let raw = loader.load(bytes, source_name)?;
        let total = raw.len();
        let segments: Vec<Segment> = raw
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .collect();
        let skipped = total - segments.len();
        if skipped > 0 {
            tracing::debug!(source = source_name, skipped, "filtered empty segments");
        }
        Ok(LoadOutcome { segments, skipped })
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Whole content as a single segment.
pub struct PlainTextLoader;

impl Loader for PlainTextLoader {
    fn load(&self, bytes: &[u8], source_name: &str) -> Result<Vec<Segment>> {
        let text = String::from_utf8_lossy(bytes).into_owned();
        Ok(vec![Segment {
            text,
            page: None,
            source_name: source_name.to_string(),
        }])
    }
}

/// One segment per PDF page, tagged with its 1-based page number.
pub struct PdfLoader;

impl Loader for PdfLoader {
    fn load(&self, bytes: &[u8], source_name: &str) -> Result<Vec<Segment>> {
        let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
            .map_err(|e| Error::Load(format!("PDF extraction failed: {}", e)))?;

        Ok(pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| Segment {
                text,
                page: Some(i as u32 + 1),
                source_name: source_name.to_string(),
            })
            .collect())
    }
}

/// Text runs from `word/document.xml` in a DOCX container.
pub struct DocxLoader;

impl Loader for DocxLoader {
    fn load(&self, bytes: &[u8], source_name: &str) -> Result<Vec<Segment>> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| Error::Load(format!("DOCX is not a valid ZIP archive: {}", e)))?;

        let mut doc_xml = Vec::new();
        {
            let entry = archive
                .by_name("word/document.xml")
                .map_err(|_| Error::Load("word/document.xml not found".to_string()))?;
            entry
                .take(MAX_XML_ENTRY_BYTES)
                .read_to_end(&mut doc_xml)
                .map_err(|e| Error::Load(e.to_string()))?;
            if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
                return Err(Error::Load(
                    "word/document.xml exceeds size limit".to_string(),
                ));
            }
        }

        let text = extract_text_runs(&doc_xml)?;
        Ok(vec![Segment {
            text,
            page: None,
            source_name: source_name.to_string(),
        }])
    }
}

/// Collect `<w:t>` element text, separating paragraphs with newlines.
fn extract_text_runs(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(Error::Load(format!("DOCX XML parse failed: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
