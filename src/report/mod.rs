//! Printable dispatch and purchase-order reports.
//!
//! Photos that cannot be read or embedded never fail a report; they are
//! replaced with a one-line placeholder.

pub mod pdf;

use std::fs;

use chrono::NaiveDateTime;
use log::debug;

use crate::model::{DispatchBatch, DispatchPhoto, OrderDetail, OrderStatus, PhotoStage, TIMESTAMP_FORMAT};
use crate::photos::PhotoStore;
use pdf::{Font, PdfDocument, PdfImage};

const BODY: f32 = 10.0;
const PHOTO_WIDTH: f32 = 425.0;

fn display_time(stamp: &str) -> String {
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .map(|t| t.format("%d/%m/%Y %H:%M").to_string())
        .unwrap_or_else(|_| stamp.to_string())
}

fn status_label(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Complete => "Complete",
        OrderStatus::Partial => "Partial",
        OrderStatus::Pending => "Pending",
    }
}

fn stage_title(stage: PhotoStage) -> &'static str {
    match stage {
        PhotoStage::Exit => "Exit photos",
        PhotoStage::Delivery => "Delivery photos",
    }
}

fn add_photos(doc: &mut PdfDocument, store: &PhotoStore, photos: &[DispatchPhoto]) {
    if photos.is_empty() {
        doc.text(Font::Regular, BODY, "No photos attached.");
        doc.gap(BODY);
        return;
    }
    for stage in PhotoStage::ALL {
        let in_stage: Vec<&DispatchPhoto> = photos.iter().filter(|p| p.stage == stage).collect();
        if in_stage.is_empty() {
            continue;
        }
        doc.heading(12.0, stage_title(stage));
        for photo in in_stage {
            let bytes = store.path_of(&photo.path).and_then(|p| fs::read(p).ok());
            let Some(bytes) = bytes else {
                doc.text(Font::Regular, BODY, &format!("[Missing file: {}]", photo.path));
                continue;
            };
            match PdfImage::from_bytes(bytes) {
                Some(image) => {
                    doc.text(Font::Regular, BODY, &display_time(&photo.created_at));
                    doc.image(image, PHOTO_WIDTH);
                    doc.gap(6.0);
                }
                None => {
                    debug!("photo {} is not an embeddable image", photo.path);
                    doc.text(Font::Regular, BODY, &format!("[Image not embedded: {}]", photo.path));
                }
            }
        }
        doc.gap(BODY);
    }
}

fn dispatch_section(doc: &mut PdfDocument, store: &PhotoStore, batch: &DispatchBatch, with_order: bool) {
    let mut pairs = vec![
        ("Client", batch.client.clone()),
        ("Operator", batch.operator.clone().unwrap_or_default()),
        ("Date", display_time(&batch.created_at)),
    ];
    if with_order {
        pairs.push(("Order #", batch.order_number.clone().unwrap_or_default()));
    }
    doc.key_values(BODY, &pairs);

    let rows: Vec<Vec<String>> = batch
        .items
        .iter()
        .map(|l| {
            vec![
                l.product.name.clone(),
                l.product.brand.clone(),
                l.requested.to_string(),
                l.dispatched.to_string(),
            ]
        })
        .collect();
    doc.table(
        BODY,
        &["Product", "Brand", "Requested", "Dispatched"],
        &[0.4, 0.3, 0.15, 0.15],
        &rows,
    );
    add_photos(doc, store, &batch.photos);
}

pub fn dispatch_pdf(batch: &DispatchBatch, store: &PhotoStore) -> Vec<u8> {
    let mut doc = PdfDocument::new();
    doc.heading(16.0, &format!("Dispatch #{}", batch.id));
    dispatch_section(&mut doc, store, batch, true);
    doc.finish()
}

/// Order header and lines, then every linked dispatch with its photos.
pub fn order_pdf(order: &OrderDetail, store: &PhotoStore) -> Vec<u8> {
    let mut doc = PdfDocument::new();
    doc.heading(16.0, &format!("Purchase order #{}", order.number));
    doc.key_values(
        BODY,
        &[
            ("Client", order.client.clone()),
            ("Created", display_time(&order.created_at)),
            ("Status", status_label(order.status).to_string()),
        ],
    );
    let rows: Vec<Vec<String>> = order
        .items
        .iter()
        .map(|l| {
            vec![
                l.product.name.clone(),
                l.product.brand.clone(),
                l.requested.to_string(),
                l.dispatched.to_string(),
                l.pending.to_string(),
            ]
        })
        .collect();
    doc.table(
        BODY,
        &["Product", "Brand", "Requested", "Dispatched", "Pending"],
        &[0.34, 0.24, 0.14, 0.14, 0.14],
        &rows,
    );

    if order.dispatches.is_empty() {
        doc.text(Font::Regular, BODY, "No linked dispatches.");
    }
    for batch in &order.dispatches {
        doc.heading(13.0, &format!("Dispatch #{}", batch.id));
        dispatch_section(&mut doc, store, batch, false);
    }
    doc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DispatchLine, DispatchStatus, OrderLine, ProductRef};
    use tempfile::tempdir;

    fn contains(haystack: &[u8], needle: &str) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle.as_bytes())
    }

    fn photo(id: i64, stage: PhotoStage, path: &str) -> DispatchPhoto {
        DispatchPhoto {
            id,
            batch_id: 1,
            stage,
            path: path.to_string(),
            url: format!("/uploads/{path}"),
            created_at: "2024-05-01 10:30:00".into(),
        }
    }

    fn batch(photos: Vec<DispatchPhoto>) -> DispatchBatch {
        DispatchBatch {
            id: 1,
            client_id: 1,
            client: "Acme".into(),
            operator: Some("Ana".into()),
            order_number: Some("PO-1".into()),
            created_at: "2024-05-01 10:00:00".into(),
            status: DispatchStatus::Complete,
            items: vec![DispatchLine {
                entry_id: 1,
                product: ProductRef { id: 1, name: "Drill".into(), brand: "Bosch".into() },
                requested: 2,
                dispatched: 2,
                short: false,
            }],
            photos,
        }
    }

    #[test]
    fn unreadable_photos_become_placeholders() {
        let dir = tempdir().unwrap();
        let store = PhotoStore::new(dir.path(), &["jpg".to_string(), "png".to_string()]).unwrap();
        fs::write(dir.path().join("ok.jpg"), pdf::tests::tiny_jpeg(40, 30)).unwrap();
        fs::write(dir.path().join("shot.png"), b"\x89PNG\r\n\x1a\n").unwrap();
        fs::write(dir.path().join("real.png"), pdf::tests::tiny_png()).unwrap();

        let bytes = dispatch_pdf(
            &batch(vec![
                photo(1, PhotoStage::Exit, "ok.jpg"),
                photo(2, PhotoStage::Exit, "gone.jpg"),
                photo(3, PhotoStage::Delivery, "shot.png"),
                photo(4, PhotoStage::Delivery, "real.png"),
            ]),
            &store,
        );
        assert!(bytes.starts_with(b"%PDF-1.4"));
        assert!(contains(&bytes, "(Dispatch #1)"));
        assert!(contains(&bytes, "(01/05/2024 10:00)"));
        assert!(contains(&bytes, "[Missing file: gone.jpg]"));
        assert!(contains(&bytes, "[Image not embedded: shot.png]"));
        assert!(contains(&bytes, "(Exit photos)"));
        assert!(contains(&bytes, "(Delivery photos)"));
        assert!(contains(&bytes, "/DCTDecode"));
        assert!(contains(&bytes, "/FlateDecode"));
        assert!(!contains(&bytes, "[Image not embedded: real.png]"));
    }

    #[test]
    fn order_report_lists_lines_and_dispatches() {
        let dir = tempdir().unwrap();
        let store = PhotoStore::new(dir.path(), &["jpg".to_string()]).unwrap();
        let order = OrderDetail {
            id: 1,
            number: "PO-1".into(),
            client_id: 1,
            client: "Acme".into(),
            created_at: "2024-05-01 09:00:00".into(),
            status: OrderStatus::Partial,
            items: vec![OrderLine {
                item_id: 1,
                product: ProductRef { id: 1, name: "Drill".into(), brand: "Bosch".into() },
                requested: 5,
                dispatched: 2,
                pending: 3,
            }],
            dispatches: vec![batch(vec![])],
        };
        let bytes = order_pdf(&order, &store);
        assert!(contains(&bytes, "(Purchase order #PO-1)"));
        assert!(contains(&bytes, "(Partial)"));
        assert!(contains(&bytes, "(Dispatch #1)"));
        assert!(contains(&bytes, "(No photos attached.)"));
    }
}
