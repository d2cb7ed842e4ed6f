//! PDF report assembly with printpdf.
//!
//! Page layout: report text on the first page(s), the chart image on the
//! last page.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use printpdf::image_crate::{DynamicImage, RgbImage};
use printpdf::{
    BuiltinFont, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerReference,
};
use tracing::info;

use super::chart::render_rgb;
use super::{ExportRequest, Exporter};
use crate::aggregate::chart_points;
use crate::report::{Report, compose};

pub const PDF_FILE_NAME: &str = "relatorio-produtividade.pdf";

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const LEFT: f32 = 15.0;
const BOTTOM: f32 = 20.0;
const LINE_STEP: f32 = 10.0;
const CHART_WIDTH_MM: f32 = 180.0;

/// Distance from the top edge, in mm, turned into printpdf's bottom-up y.
fn from_top(mm: f32) -> Mm {
    Mm(PAGE_HEIGHT - mm)
}

struct Pages {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    font: IndirectFontRef,
    page_count: usize,
}

impl Pages {
    fn add_page(&mut self) {
        self.page_count += 1;
        let (page, layer) = self.doc.add_page(
            Mm(PAGE_WIDTH),
            Mm(PAGE_HEIGHT),
            format!("Página {}", self.page_count),
        );
        self.layer = self.doc.get_page(page).get_layer(layer);
    }

    fn text(&self, text: &str, size: f32, top: f32) {
        self.layer.use_text(text, size, Mm(LEFT), from_top(top), &self.font);
    }
}

/// Writes the report and the chart image (raw RGB8, `chart_size` pixels) to `path`.
pub fn write_pdf(
    path: &Path,
    report: &Report,
    chart_rgb: Vec<u8>,
    chart_size: (u32, u32),
) -> anyhow::Result<()> {
    let (doc, page, layer) = PdfDocument::new(
        report.title.as_str(),
        Mm(PAGE_WIDTH),
        Mm(PAGE_HEIGHT),
        "Página 1",
    );
    let font = doc.add_builtin_font(BuiltinFont::Helvetica)?;
    let layer = doc.get_page(page).get_layer(layer);
    let mut pages = Pages {
        doc,
        layer,
        font,
        page_count: 1,
    };

    pages.text(&report.title, 18.0, 20.0);
    pages.text(&report.total_line, 12.0, 35.0);
    pages.text(&report.best_line, 12.0, 45.0);
    pages.text(&report.section_heading, 12.0, 60.0);

    let mut top = 70.0;
    for line in &report.lines {
        if top > PAGE_HEIGHT - BOTTOM {
            pages.add_page();
            top = 20.0;
        }
        pages.text(line, 12.0, top);
        top += LINE_STEP;
    }

    pages.add_page();
    pages.text(&report.chart_title, 14.0, 20.0);

    let (width, height) = chart_size;
    let image = RgbImage::from_raw(width, height, chart_rgb)
        .ok_or_else(|| anyhow!("chart buffer does not match {width}x{height}"))?;
    let image = Image::from_dynamic_image(&DynamicImage::ImageRgb8(image));

    // scale the image to CHART_WIDTH_MM
    let dpi = width as f32 / (CHART_WIDTH_MM / 25.4);
    let height_mm = height as f32 / dpi * 25.4;
    image.add_to_layer(
        pages.layer.clone(),
        ImageTransform {
            translate_x: Some(Mm(LEFT)),
            translate_y: Some(from_top(30.0 + height_mm)),
            dpi: Some(dpi),
            ..Default::default()
        },
    );

    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    pages.doc.save(&mut BufWriter::new(file))?;
    Ok(())
}

/// Writes `relatorio-produtividade.pdf` into the request's output directory.
#[derive(Debug, Clone)]
pub struct PdfExporter {
    pub chart_size: (u32, u32),
}

impl Default for PdfExporter {
    fn default() -> Self {
        Self {
            chart_size: (1200, 600),
        }
    }
}

#[async_trait]
impl Exporter for PdfExporter {
    fn kind(&self) -> &'static str {
        "pdf"
    }

    async fn export(&self, request: ExportRequest) -> anyhow::Result<PathBuf> {
        let report = compose(&request.records)?;
        tokio::fs::create_dir_all(&request.output_dir).await?;
        let path = request.output_dir.join(PDF_FILE_NAME);
        let points = chart_points(&request.records, request.mode);
        let size = self.chart_size;

        let target = path.clone();
        let cancel = request.cancel.clone();
        let kind = self.kind();
        let handle = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            cancel.check(kind)?;
            let rgb = render_rgb(&points, request.mode, size)?;
            cancel.check(kind)?;
            write_pdf(&target, &report, rgb, size)?;
            cancel.check_written(kind, &target)
        });
        handle
            .await
            .context("pdf assembly task join failed (panic/cancelled)")?
            .context("pdf assembly failed")?;

        info!(path = %path.display(), "Report written");
        Ok(path)
    }
}
