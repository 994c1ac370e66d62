//! Test fixtures for PDF-driven tests.
//!
//! Always compiled so integration tests (in tests/) and the CLI smoke tests
//! can generate small PDFs without checking binaries into the repository.

use std::path::Path;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use billdigest_core::{Error, Result};

fn pdf_err(e: lopdf::Error) -> Error {
    Error::Pdf(e.to_string())
}

/// Write a PDF with one page per entry of `pages`, each holding its text.
///
/// An empty string produces a page with no text operators.
pub fn write_pdf(path: &Path, pages: &[&str]) -> Result<()> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for text in pages {
        let operations = if text.is_empty() {
            Vec::new()
        } else {
            vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ]
        };
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().map_err(pdf_err)?,
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    doc.save(path)?;
    Ok(())
}

/// Write a file that passes the `%PDF` magic check but cannot be parsed.
pub fn write_corrupt_pdf(path: &Path) -> Result<()> {
    std::fs::write(path, b"%PDF-1.5\nthis is not a pdf body\n")?;
    Ok(())
}

/// Deterministic page text of roughly `len` bytes made of numbered sentences.
pub fn sentence_text(page: u32, len: usize) -> String {
    let mut text = String::with_capacity(len + 64);
    let mut n = 0;
    while text.len() < len {
        n += 1;
        text.push_str(&format!(
            "Section {page}.{n} of this Act amends the applicable provision. "
        ));
    }
    text.trim_end().to_string()
}
