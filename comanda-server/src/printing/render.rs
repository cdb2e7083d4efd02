//! Rendering seam and blob store.
//!
//! The core does not render PDFs itself: a `ComandaRenderer` turns a
//! selected line set into printable bytes, and the `PdfStore` writes them
//! under the configured directory, yielding the `pdf_ref` recorded on the
//! job. The default renderer emits plain text suitable for thermal slips
//! and A4 collection sheets alike.

use super::selector::PrintLine;
use super::PrintKind;
use comanda_common::{Error, Result};
use std::fmt::Write as _;
use std::path::PathBuf;
use uuid::Uuid;

/// Everything a renderer needs for one comanda
#[derive(Debug, Clone)]
pub struct ComandaDocument {
    pub kind: PrintKind,
    pub route_norm: String,
    /// Set for operator slips, absent on collection sheets
    pub operator: Option<String>,
    pub lines: Vec<PrintLine>,
}

pub trait ComandaRenderer: Send + Sync {
    fn render(&self, doc: &ComandaDocument) -> Result<Vec<u8>>;
}

/// Plain-text renderer grouping lines per client
pub struct PlainTextRenderer;

impl ComandaRenderer for PlainTextRenderer {
    fn render(&self, doc: &ComandaDocument) -> Result<Vec<u8>> {
        let mut out = String::new();
        let _ = writeln!(out, "COMANDA {} / {}", doc.kind.as_str(), doc.route_norm);
        if let Some(operator) = &doc.operator {
            let _ = writeln!(out, "Operario: {}", operator);
        }
        let _ = writeln!(out);

        let mut current_client: Option<Uuid> = None;
        for line in &doc.lines {
            if current_client != Some(line.client_order_id) {
                current_client = Some(line.client_order_id);
                let _ = writeln!(out, "Cliente: {}", line.client_name);
                if let Some(obs) = &line.observations {
                    let _ = writeln!(out, "  Observaciones: {}", obs);
                }
            }
            let _ = writeln!(
                out,
                "  {} {} - {}{}",
                line.quantity,
                line.unit_raw,
                line.product_raw,
                line.price
                    .map(|p| format!(" - {:.2}", p))
                    .unwrap_or_default(),
            );
        }

        Ok(out.into_bytes())
    }
}

/// File-system store for rendered comanda blobs
#[derive(Clone)]
pub struct PdfStore {
    dir: PathBuf,
}

impl PdfStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write the rendered bytes and return the job's `pdf_ref`
    pub fn store(&self, job_id: Uuid, bytes: &[u8]) -> Result<String> {
        std::fs::create_dir_all(&self.dir)?;
        let name = format!("{}.txt", job_id);
        let path = self.dir.join(&name);
        std::fs::write(&path, bytes)
            .map_err(|e| Error::Internal(format!("store comanda {}: {}", path.display(), e)))?;
        Ok(name)
    }
}
