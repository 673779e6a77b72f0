//! Structural inspection of PDF files.
//!
//! A compressed candidate is only trusted when it opens and has as many pages
//! as its source. Parsing happens on the blocking pool.

use crate::constants::LARGE_IMAGE_DOCUMENT_BYTES;
use crate::error::ValidationFailure;
use lopdf::{Document, Object};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// What the pipeline needs to know about one PDF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PdfInfo {
    pub pages: usize,
    pub size_bytes: u64,
    pub encrypted: bool,
    pub has_forms: bool,
    pub has_annotations: bool,
    pub has_images: bool,
}

impl PdfInfo {
    /// Big scanned or photo-heavy documents, where re-rendering images pays off.
    pub fn is_large_image_document(&self) -> bool {
        self.has_images && self.size_bytes > LARGE_IMAGE_DOCUMENT_BYTES
    }

    /// Forms, annotations and encryption are better served by a backend that
    /// rewrites structure instead of re-rendering content. Large image
    /// documents still go to the default order unless encrypted.
    pub fn prefers_structure_preserving(&self) -> bool {
        if self.encrypted {
            return true;
        }
        !self.is_large_image_document() && (self.has_forms || self.has_annotations)
    }
}

/// Opens a PDF and collects its page count and content flags.
pub fn inspect_blocking(path: &Path) -> Result<PdfInfo, ValidationFailure> {
    let size_bytes = std::fs::metadata(path)
        .map_err(|_| ValidationFailure::Missing)?
        .len();
    if size_bytes == 0 {
        return Err(ValidationFailure::Missing);
    }

    let doc = Document::load(path).map_err(|e| ValidationFailure::Unreadable(e.to_string()))?;
    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(ValidationFailure::Unreadable("document has no pages".to_string()));
    }

    let encrypted = doc.trailer.get(b"Encrypt").is_ok();
    let has_forms = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .and_then(|id| doc.get_dictionary(id))
        .map(|catalog| catalog.has(b"AcroForm"))
        .unwrap_or(false);
    let has_annotations = pages.values().any(|id| {
        doc.get_dictionary(*id)
            .map(|page| page.has(b"Annots"))
            .unwrap_or(false)
    });
    let has_images = doc.objects.values().any(|object| match object {
        Object::Stream(stream) => stream
            .dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .map(|name| name == b"Image")
            .unwrap_or(false),
        _ => false,
    });

    Ok(PdfInfo {
        pages: pages.len(),
        size_bytes,
        encrypted,
        has_forms,
        has_annotations,
        has_images,
    })
}

/// Async wrapper around [`inspect_blocking`].
pub async fn inspect(path: &Path) -> Result<PdfInfo, ValidationFailure> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || inspect_blocking(&path))
        .await
        .map_err(|e| ValidationFailure::Unreadable(format!("inspection task failed: {}", e)))?
}

/// Test fixture: writes a PDF with `pages` pages and an uncompressed content
/// stream padded with `padding` bytes, so its size is easy to steer.
#[cfg(test)]
pub(crate) fn write_sample_pdf(path: &Path, pages: usize, padding: usize) {
    use lopdf::{dictionary, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut content = b"BT /F1 12 Tf 72 712 Td (sample) Tj ET\n".to_vec();
    content.extend(std::iter::repeat(b' ').take(padding));
    let mut stream = Stream::new(dictionary! {}, content);
    stream.allows_compression = true;
    let content_id = doc.add_object(stream);

    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            })
            .into()
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}
