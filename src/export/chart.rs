//! Bar chart rendering with plotters.

use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::info;

use super::{ExportRequest, Exporter};
use crate::aggregate::{ChartPoint, ViewMode, chart_points};

pub const CHART_FILE_NAME: &str = "grafico-produtividade.png";
pub const CHART_CAPTION: &str = "Histórico de Produtividade";

const BAR_COLOR: RGBColor = RGBColor(0x22, 0xc5, 0x5e);
const GRID_COLOR: RGBColor = RGBColor(220, 220, 220);
const TEXT_COLOR: RGBColor = RGBColor(60, 60, 60);

/// Upper bound of the y axis: the tallest bar plus 10% headroom.
pub fn y_axis_max(points: &[ChartPoint]) -> f64 {
    let max = points
        .iter()
        .map(|p| p.productivity)
        .filter(|v| v.is_finite())
        .fold(0.0, f64::max);
    if max <= 0.0 { 1.0 } else { max * 1.1 }
}

/// Draws one bar per point onto `root` and presents it.
pub fn draw_bar_chart<DB>(
    root: DrawingArea<DB, Shift>,
    points: &[ChartPoint],
    mode: ViewMode,
) -> anyhow::Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    if points.is_empty() {
        return Err(anyhow!("cannot draw a chart without data"));
    }

    root.fill(&WHITE)?;

    let caption = match mode {
        ViewMode::ByPlot => CHART_CAPTION.to_string(),
        ViewMode::ByCultivar => format!("{CHART_CAPTION} (Média por cultivar)"),
    };
    let labels: Vec<String> = points.iter().map(|p| p.key.clone()).collect();
    let last = points.len() - 1;

    let mut chart = ChartBuilder::on(&root)
        .caption(&caption, ("sans-serif", 30).into_font().color(&TEXT_COLOR))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d((0usize..last).into_segmented(), 0f64..y_axis_max(points))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .y_desc("sacas/ha")
        .x_labels(points.len())
        .y_labels(8)
        .light_line_style(ShapeStyle::from(&GRID_COLOR).stroke_width(1))
        .bold_line_style(ShapeStyle::from(&GRID_COLOR).stroke_width(1))
        .x_label_style(("sans-serif", 16).into_font().color(&TEXT_COLOR))
        .y_label_style(("sans-serif", 16).into_font().color(&TEXT_COLOR))
        .x_label_formatter(&|v| match v {
            SegmentValue::CenterOf(i) => labels.get(*i).cloned().unwrap_or_default(),
            _ => String::new(),
        })
        .y_label_formatter(&|y| format!("{y:.0}"))
        .draw()?;

    chart.draw_series(
        Histogram::vertical(&chart)
            .style(BAR_COLOR.filled())
            .margin(12)
            .data(points.iter().enumerate().map(|(i, p)| (i, p.productivity))),
    )?;

    chart.draw_series(points.iter().enumerate().map(|(i, p)| {
        Text::new(
            format!("{:.2}", p.productivity),
            (SegmentValue::CenterOf(i), p.productivity),
            ("sans-serif", 14).into_font().color(&TEXT_COLOR),
        )
    }))?;

    root.present()?;
    Ok(())
}

/// Renders the chart to a PNG file.
pub fn render_png(
    path: &Path,
    points: &[ChartPoint],
    mode: ViewMode,
    size: (u32, u32),
) -> anyhow::Result<()> {
    let root = BitMapBackend::new(path, size).into_drawing_area();
    draw_bar_chart(root, points, mode)
}

/// Renders the chart into a raw RGB8 buffer of `size.0 * size.1 * 3` bytes.
pub fn render_rgb(points: &[ChartPoint], mode: ViewMode, size: (u32, u32)) -> anyhow::Result<Vec<u8>> {
    let mut buffer = vec![0u8; size.0 as usize * size.1 as usize * 3];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, size).into_drawing_area();
        draw_bar_chart(root, points, mode)?;
    }
    Ok(buffer)
}

/// Writes `grafico-produtividade.png` into the request's output directory.
#[derive(Debug, Clone)]
pub struct ChartExporter {
    pub size: (u32, u32),
}

impl Default for ChartExporter {
    fn default() -> Self {
        Self { size: (1200, 600) }
    }
}

#[async_trait]
impl Exporter for ChartExporter {
    fn kind(&self) -> &'static str {
        "chart"
    }

    async fn export(&self, request: ExportRequest) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(&request.output_dir).await?;
        let path = request.output_dir.join(CHART_FILE_NAME);
        let points = chart_points(&request.records, request.mode);
        let size = self.size;

        let target = path.clone();
        let cancel = request.cancel.clone();
        let kind = self.kind();
        let handle = tokio::task::spawn_blocking(move || {
            cancel.check(kind)?;
            render_png(&target, &points, request.mode, size)?;
            cancel.check_written(kind, &target)
        });
        handle
            .await
            .context("chart rendering task join failed (panic/cancelled)")?
            .context("chart drawing failed")?;

        info!(path = %path.display(), "Chart written");
        Ok(path)
    }
}
