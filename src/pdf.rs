use printpdf::path::{PaintMode, WindingOrder};
use printpdf::{
    BuiltinFont, Color, IndirectFontRef, Line, Mm, PdfDocument, PdfLayerReference, Point, Polygon,
    Rgb as PdfRgb,
};

use crate::error::ReportError;
use crate::report::{PanelBody, ReportDocument, Rgb, SummaryTable, TrendChart, TrendPanel};

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 20.0;
const ROW_HEIGHT: f32 = 7.0;
const PANEL_HEIGHT: f32 = 50.0;
const PT_TO_MM: f32 = 0.3528;

const INK: Rgb = Rgb(0x1F, 0x29, 0x37);
const MUTED: Rgb = Rgb(0x6B, 0x72, 0x80);
const RULE: Rgb = Rgb(0xD1, 0xD5, 0xDB);
const HEADER_FILL: Rgb = Rgb(0xE5, 0xE7, 0xEB);
const TOTAL_FILL: Rgb = Rgb(0xF3, 0xF4, 0xF6);

/// Lays the report out on two A4 pages and returns the encoded file.
pub fn write_pdf(document: &ReportDocument) -> Result<Vec<u8>, ReportError> {
    let title = format!(
        "Consolidated {} Report {}",
        document.period.title(),
        document.reference_date
    );
    let (doc, summary_page, summary_layer) =
        PdfDocument::new(&title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Summary");
    let regular = doc.add_builtin_font(BuiltinFont::Helvetica)?;
    let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold)?;

    let summary = Canvas {
        layer: doc.get_page(summary_page).get_layer(summary_layer),
        regular: &regular,
        bold: &bold,
    };
    draw_summary_page(&summary, document);
    summary.footer(1, 2);

    let (trend_page, trend_layer) = doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Trends");
    let trends = Canvas {
        layer: doc.get_page(trend_page).get_layer(trend_layer),
        regular: &regular,
        bold: &bold,
    };
    draw_trend_page(&trends, document);
    trends.footer(2, 2);

    Ok(doc.save_to_bytes()?)
}

fn draw_summary_page(canvas: &Canvas<'_>, document: &ReportDocument) {
    let mut y = PAGE_HEIGHT - MARGIN - 4.0;
    canvas.text(&document.title, 20.0, MARGIN, y, true, INK);
    y -= 9.0;
    canvas.text(&document.subtitle, 12.0, MARGIN, y, false, INK);
    y -= 7.0;
    let stamp = format!(
        "Reference date: {}    Generated: {}",
        document.reference_date,
        document.generated_at.format("%Y-%m-%d %H:%M:%S")
    );
    canvas.text(&stamp, 9.0, MARGIN, y, false, MUTED);
    y -= 12.0;

    for table in &document.summary {
        y = draw_table(canvas, table, y) - 8.0;
    }

    for note in &document.notes {
        canvas.text(note, 8.0, MARGIN, y, false, MUTED);
        y -= 5.0;
    }
}

/// Draws `table` with its heading baseline at `top` and returns the y
/// coordinate just below the last row.
fn draw_table(canvas: &Canvas<'_>, table: &SummaryTable, top: f32) -> f32 {
    let left = MARGIN;
    let right = PAGE_WIDTH - MARGIN;
    let value_edge = right - 4.0;

    canvas.text(&table.heading, 13.0, left, top, true, INK);
    let mut y = top - 4.0;

    canvas.fill_rect(left, y - ROW_HEIGHT, right, y, HEADER_FILL);
    canvas.text(&table.columns[0], 10.0, left + 3.0, y - 5.0, true, INK);
    canvas.text_right(&table.columns[1], 10.0, value_edge, y - 5.0, true, INK);
    y -= ROW_HEIGHT;

    for row in &table.rows {
        canvas.text(&row.label, 10.0, left + 3.0, y - 5.0, false, INK);
        canvas.text_right(&row.value, 10.0, value_edge, y - 5.0, false, INK);
        y -= ROW_HEIGHT;
        canvas.rule(left, y, right, y, RULE, 0.3);
    }

    canvas.fill_rect(left, y - ROW_HEIGHT, right, y, TOTAL_FILL);
    canvas.text(&table.total.label, 10.0, left + 3.0, y - 5.0, true, INK);
    canvas.text_right(&table.total.value, 10.0, value_edge, y - 5.0, true, INK);
    y - ROW_HEIGHT
}

fn draw_trend_page(canvas: &Canvas<'_>, document: &ReportDocument) {
    let mut top = PAGE_HEIGHT - MARGIN - 4.0;
    canvas.text(&document.trends_title, 16.0, MARGIN, top, true, INK);
    top -= 8.0;

    for panel in &document.trends {
        draw_panel(canvas, panel, top);
        top -= PANEL_HEIGHT;
    }
}

fn draw_panel(canvas: &Canvas<'_>, panel: &TrendPanel, top: f32) {
    canvas.text(&panel.title, 10.0, MARGIN, top - 4.0, true, INK);

    let plot = PlotArea {
        left: MARGIN + 12.0,
        right: PAGE_WIDTH - MARGIN,
        bottom: top - PANEL_HEIGHT + 10.0,
        top: top - 8.0,
    };

    match &panel.body {
        PanelBody::Chart(chart) => draw_chart(canvas, chart, &plot),
        PanelBody::Placeholder(message) => {
            canvas.stroke_rect(plot.left, plot.bottom, plot.right, plot.top, RULE);
            let middle = (plot.left + plot.right) / 2.0;
            let width = text_width(message, 10.0);
            canvas.text(
                message,
                10.0,
                middle - width / 2.0,
                (plot.bottom + plot.top) / 2.0 - 1.5,
                false,
                MUTED,
            );
        }
    }
}

struct PlotArea {
    left: f32,
    right: f32,
    bottom: f32,
    top: f32,
}

impl PlotArea {
    fn x(&self, index: usize, count: usize) -> f32 {
        if count <= 1 {
            return (self.left + self.right) / 2.0;
        }
        self.left + (self.right - self.left) * index as f32 / (count - 1) as f32
    }

    fn y(&self, fraction: f64) -> f32 {
        self.bottom + (self.top - self.bottom) * fraction as f32
    }
}

fn draw_chart(canvas: &Canvas<'_>, chart: &TrendChart, plot: &PlotArea) {
    let axis = chart.axis;

    let mut tick = axis.min;
    while tick <= axis.max {
        let y = plot.y(axis.fraction(tick));
        canvas.rule(plot.left, y, plot.right, y, RULE, 0.2);
        let label = format!("{tick:.0}");
        canvas.text_right(&label, 6.0, plot.left - 1.5, y - 1.0, false, MUTED);
        tick += axis.step;
    }
    canvas.rule(plot.left, plot.bottom, plot.left, plot.top, MUTED, 0.4);
    canvas.rule(plot.left, plot.bottom, plot.right, plot.bottom, MUTED, 0.4);

    let count = chart.values.len();
    for (index, label) in chart.x_labels.iter().enumerate() {
        if let Some(label) = label {
            let x = plot.x(index, count);
            canvas.text(label, 6.0, x - text_width(label, 6.0) / 2.0, plot.bottom - 4.0, false, MUTED);
        }
    }

    let points: Vec<(f32, f32)> = chart
        .values
        .iter()
        .enumerate()
        .map(|(index, value)| (plot.x(index, count), plot.y(axis.fraction(*value as f64))))
        .collect();

    if points.len() > 1 {
        canvas.polyline(&points, chart.color, 0.8);
    }
    for (x, y) in &points {
        canvas.fill_rect(x - 0.6, y - 0.6, x + 0.6, y + 0.6, chart.color);
    }
}

/// Builtin fonts carry no metrics here; half an em per glyph is close
/// enough for Helvetica digits and labels.
fn text_width(text: &str, size: f32) -> f32 {
    text.chars().count() as f32 * size * 0.5 * PT_TO_MM
}

fn color(rgb: Rgb) -> Color {
    Color::Rgb(PdfRgb::new(
        f32::from(rgb.0) / 255.0,
        f32::from(rgb.1) / 255.0,
        f32::from(rgb.2) / 255.0,
        None,
    ))
}

fn point(x: f32, y: f32) -> (Point, bool) {
    (Point::new(Mm(x), Mm(y)), false)
}

struct Canvas<'a> {
    layer: PdfLayerReference,
    regular: &'a IndirectFontRef,
    bold: &'a IndirectFontRef,
}

impl Canvas<'_> {
    fn text(&self, text: &str, size: f32, x: f32, y: f32, bold: bool, ink: Rgb) {
        let font = if bold { self.bold } else { self.regular };
        self.layer.set_fill_color(color(ink));
        self.layer.use_text(text, size, Mm(x), Mm(y), font);
    }

    fn text_right(&self, text: &str, size: f32, right: f32, y: f32, bold: bool, ink: Rgb) {
        self.text(text, size, right - text_width(text, size), y, bold, ink);
    }

    fn rule(&self, x1: f32, y1: f32, x2: f32, y2: f32, ink: Rgb, thickness: f32) {
        self.layer.set_outline_color(color(ink));
        self.layer.set_outline_thickness(thickness);
        self.layer.add_line(Line {
            points: vec![point(x1, y1), point(x2, y2)],
            is_closed: false,
        });
    }

    fn polyline(&self, points: &[(f32, f32)], ink: Rgb, thickness: f32) {
        self.layer.set_outline_color(color(ink));
        self.layer.set_outline_thickness(thickness);
        self.layer.add_line(Line {
            points: points.iter().map(|(x, y)| point(*x, *y)).collect(),
            is_closed: false,
        });
    }

    fn fill_rect(&self, x1: f32, y1: f32, x2: f32, y2: f32, fill: Rgb) {
        self.layer.set_fill_color(color(fill));
        self.layer.add_polygon(Polygon {
            rings: vec![vec![point(x1, y1), point(x2, y1), point(x2, y2), point(x1, y2)]],
            mode: PaintMode::Fill,
            winding_order: WindingOrder::NonZero,
        });
    }

    fn stroke_rect(&self, x1: f32, y1: f32, x2: f32, y2: f32, ink: Rgb) {
        self.layer.set_outline_color(color(ink));
        self.layer.set_outline_thickness(0.3);
        self.layer.add_line(Line {
            points: vec![point(x1, y1), point(x2, y1), point(x2, y2), point(x1, y2)],
            is_closed: true,
        });
    }

    fn footer(&self, page: usize, pages: usize) {
        let label = format!("Page {page} of {pages}");
        self.text_right(&label, 8.0, PAGE_WIDTH - MARGIN, 10.0, false, MUTED);
    }
}
