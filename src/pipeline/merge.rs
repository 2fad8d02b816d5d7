//! PDF merge: concatenate the pages of several documents into one.
//!
//! Pages are copied at the object level: every input is renumbered into a
//! disjoint id range, its objects are moved into the output document and its
//! page dictionaries are re-parented under a single new `Pages` node. Content
//! streams, fonts and images are never decoded or re-encoded.
//!
//! Page order is upload order, then each document's own page-tree order.
//! Attributes a page inherits from an intermediate `Pages` node
//! (`Resources`, `MediaBox`, `CropBox`, `Rotate`) are copied onto the page
//! itself, because those intermediate nodes are dropped.
//!
//! Unlike recode, a merge is all-or-nothing: any input that fails to parse
//! aborts the whole operation.

use crate::error::RockitError;
use crate::progress::ProgressCallback;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use tracing::{debug, info};

const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// A merged document ready to be materialised.
#[derive(Debug)]
pub struct MergedPdf {
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

/// Merge `(name, bytes)` inputs in the given order.
pub fn merge_pdfs(
    inputs: &[(&str, &[u8])],
    progress: Option<&ProgressCallback>,
) -> Result<MergedPdf, RockitError> {
    let total = inputs.len();
    let mut merged = Document::with_version("1.5");
    let pages_id = merged.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    if let Some(cb) = progress {
        cb.on_batch_start(total);
    }

    for (index, (name, bytes)) in inputs.iter().enumerate() {
        if let Some(cb) = progress {
            cb.on_item_start(index, total, name);
        }
        let appended = load_pdf(name, bytes)
            .and_then(|doc| append_document(&mut merged, doc, pages_id, name));
        match appended {
            Ok(page_ids) => {
                debug!("Appended {} pages from {}", page_ids.len(), name);
                if let Some(cb) = progress {
                    cb.on_item_complete(index, total, name, page_ids.len());
                }
                kids.extend(page_ids.into_iter().map(Object::Reference));
            }
            Err(e) => {
                if let Some(cb) = progress {
                    cb.on_item_error(index, total, name, &e.to_string());
                    cb.on_batch_complete(total, index);
                }
                return Err(e);
            }
        }
    }

    let page_count = kids.len();
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    merged
        .save_to(&mut bytes)
        .map_err(|e| RockitError::io("<merged pdf>", std::io::Error::other(e.to_string())))?;

    info!(
        "Merged {} documents → {} pages ({} bytes)",
        total,
        page_count,
        bytes.len()
    );
    if let Some(cb) = progress {
        cb.on_batch_complete(total, total);
    }
    Ok(MergedPdf { bytes, page_count })
}

/// Count the pages of a PDF.
pub fn page_count(name: &str, bytes: &[u8]) -> Result<usize, RockitError> {
    Ok(load_pdf(name, bytes)?.get_pages().len())
}

fn load_pdf(name: &str, bytes: &[u8]) -> Result<Document, RockitError> {
    if !bytes.starts_with(b"%PDF") {
        let magic: Vec<u8> = bytes.iter().take(4).copied().collect();
        return Err(RockitError::Decode {
            name: name.to_string(),
            detail: format!("not a PDF (first bytes: {magic:?})"),
        });
    }
    let doc = Document::load_mem(bytes).map_err(|e| RockitError::Decode {
        name: name.to_string(),
        detail: format!("corrupt PDF: {e}"),
    })?;
    if doc.is_encrypted() {
        return Err(RockitError::Decode {
            name: name.to_string(),
            detail: "PDF is encrypted".into(),
        });
    }
    Ok(doc)
}

/// Move `doc`'s objects into `merged` and return its page ids in order.
fn append_document(
    merged: &mut Document,
    mut doc: Document,
    pages_id: ObjectId,
    name: &str,
) -> Result<Vec<ObjectId>, RockitError> {
    doc.renumber_objects_with(merged.max_id + 1);
    merged.max_id = merged.max_id.max(doc.max_id);

    // get_pages walks the page tree, so its BTreeMap is keyed by page number.
    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();

    let mut pages = Vec::with_capacity(page_ids.len());
    for &id in &page_ids {
        let mut page = doc
            .get_dictionary(id)
            .map_err(|e| RockitError::Decode {
                name: name.to_string(),
                detail: format!("page object {id:?}: {e}"),
            })?
            .clone();
        inherit_attributes(&doc, &mut page);
        page.set("Parent", pages_id);
        pages.push((id, page));
    }

    for (id, object) in std::mem::take(&mut doc.objects) {
        match object.type_name().unwrap_or_default() {
            "Catalog" | "Pages" | "Page" | "Outlines" | "Outline" => {}
            _ => {
                merged.objects.insert(id, object);
            }
        }
    }
    for (id, page) in pages {
        merged.objects.insert(id, Object::Dictionary(page));
    }

    Ok(page_ids)
}

/// Copy inheritable attributes from ancestor `Pages` nodes onto `page`.
fn inherit_attributes(doc: &Document, page: &mut Dictionary) {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    // Bounded walk; a malformed tree can contain a Parent cycle.
    let mut depth = 0;
    while let Some(parent_id) = parent {
        if depth > 64 {
            break;
        }
        depth += 1;
        let Ok(node) = doc.get_dictionary(parent_id) else {
            break;
        };
        for key in INHERITABLE_KEYS {
            if !page.has(key) {
                if let Ok(value) = node.get(key) {
                    page.set(key.to_vec(), value.clone());
                }
            }
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::Stream;

    /// Build a PDF whose pages each draw `"<label> p<n>"`.
    fn labelled_pdf(label: &str, pages: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let mut kids: Vec<Object> = Vec::new();
        for n in 1..=pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![50.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(format!("{label} p{n}"))]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    fn page_labels(bytes: &[u8]) -> Vec<String> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .into_values()
            .map(|id| String::from_utf8_lossy(&doc.get_page_content(id).unwrap()).into_owned())
            .collect()
    }

    #[test]
    fn merge_preserves_upload_and_page_order() {
        let a = labelled_pdf("alpha", 2);
        let b = labelled_pdf("beta", 3);
        let merged = merge_pdfs(&[("a.pdf", &a), ("b.pdf", &b)], None).unwrap();
        assert_eq!(merged.page_count, 5);

        let labels = page_labels(&merged.bytes);
        let expected = ["alpha p1", "alpha p2", "beta p1", "beta p2", "beta p3"];
        assert_eq!(labels.len(), expected.len());
        for (content, want) in labels.iter().zip(expected) {
            assert!(content.contains(want), "{content:?} should contain {want:?}");
        }
    }

    #[test]
    fn merged_pages_keep_inherited_media_box_and_resources() {
        let a = labelled_pdf("alpha", 1);
        let merged = merge_pdfs(&[("a.pdf", &a)], None).unwrap();
        let doc = Document::load_mem(&merged.bytes).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        let page = doc.get_dictionary(page_id).unwrap();
        assert!(page.has(b"MediaBox"));
        assert!(page.has(b"Resources"));
    }

    #[test]
    fn source_page_trees_are_not_copied() {
        let a = labelled_pdf("alpha", 1);
        let b = labelled_pdf("beta", 2);
        let merged = merge_pdfs(&[("a.pdf", &a), ("b.pdf", &b)], None).unwrap();
        let doc = Document::load_mem(&merged.bytes).unwrap();
        let count = |kind: &str| {
            doc.objects
                .values()
                .filter(|o| o.type_name().map(|t| t == kind).unwrap_or(false))
                .count()
        };
        assert_eq!(count("Catalog"), 1);
        assert_eq!(count("Pages"), 1);
        assert_eq!(count("Page"), 3);
        assert_eq!(count("Font"), 2);
    }

    #[test]
    fn non_pdf_aborts_merge() {
        let a = labelled_pdf("alpha", 1);
        let err = merge_pdfs(&[("a.pdf", &a), ("notes.txt", b"hello")], None).unwrap_err();
        match err {
            RockitError::Decode { name, .. } => assert_eq!(name, "notes.txt"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn corrupt_pdf_aborts_merge() {
        let err = merge_pdfs(&[("bad.pdf", b"%PDF-1.5\ngarbage")], None).unwrap_err();
        assert!(matches!(err, RockitError::Decode { .. }));
    }

    #[test]
    fn page_count_reads_page_tree() {
        assert_eq!(page_count("x.pdf", &labelled_pdf("x", 4)).unwrap(), 4);
    }
}
