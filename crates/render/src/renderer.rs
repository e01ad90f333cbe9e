//! Page layout.
//!
//! Coordinates are millimetres from the bottom-left corner of an A4 page. A vertical cursor
//! (`y`) moves down as blocks are placed; every block measures its height first and starts a new
//! page when it would cross the footer area.

use crate::document::format_metric;
use crate::fonts::{self, Face};
use crate::{parse_metric, qr, RenderError, RenderResult, ReportDocument};
use printpdf::path::{PaintMode, WindingOrder};
use printpdf::{
    BuiltinFont, Color, IndirectFontRef, Line, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerReference, Point, Polygon, Rgb,
};
use std::io::BufWriter;

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 20.0;
const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;
/// First baseline below the header rule.
const CONTENT_TOP: f32 = 258.0;
/// Lowest baseline content may use; the footer lives below it.
const CONTENT_BOTTOM: f32 = 28.0;

const BODY_SIZE: f32 = 10.0;
const LABEL_SIZE: f32 = 9.0;
const HEADING_SIZE: f32 = 10.5;
const PARAGRAPH_GAP: f32 = 2.5;
const SECTION_GAP: f32 = 6.0;

const SIGNATURE_BLOCK_HEIGHT: f32 = 42.0;
const QR_SIZE: f32 = 24.0;
const SEAL_WIDTH: f32 = 92.0;
const SEAL_HEIGHT: f32 = 30.0;

/// Renders [`ReportDocument`]s to PDF bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportRenderer;

impl ReportRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Renders the report to a complete PDF byte buffer.
    ///
    /// Optional fields that are missing or malformed are left out of the document. The only
    /// failures are from the PDF backend itself.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Font`] if a built-in font cannot be registered and
    /// [`RenderError::Pdf`] if serialisation fails.
    pub fn render(&self, report: &ReportDocument) -> RenderResult<Vec<u8>> {
        let title = format!("Laudo {}", report.verification_code);
        let (pdf, page, layer) =
            PdfDocument::new(title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        let regular = pdf
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| RenderError::Font(e.to_string()))?;
        let bold = pdf
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| RenderError::Font(e.to_string()))?;
        let layer = pdf.get_page(page).get_layer(layer);

        let mut canvas = Canvas {
            pdf,
            regular,
            bold,
            layer,
            report,
            page_number: 1,
            y: CONTENT_TOP,
        };
        canvas.decorate_page();

        canvas.title();
        canvas.patient_section();
        canvas.exam_section();
        canvas.conclusion_section();
        canvas.signature_section();

        tracing::debug!(pages = canvas.page_number, "report rendered");
        canvas.finish()
    }
}

struct Canvas<'a> {
    pdf: PdfDocumentReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    layer: PdfLayerReference,
    report: &'a ReportDocument,
    page_number: u32,
    y: f32,
}

impl Canvas<'_> {
    fn finish(self) -> RenderResult<Vec<u8>> {
        let mut buf = BufWriter::new(Vec::new());
        self.pdf
            .save(&mut buf)
            .map_err(|e| RenderError::Pdf(e.to_string()))?;
        buf.into_inner()
            .map_err(|e| RenderError::Pdf(format!("buffer: {e}")))
    }

    fn new_page(&mut self) {
        let (page, layer) = self
            .pdf
            .add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        self.layer = self.pdf.get_page(page).get_layer(layer);
        self.page_number += 1;
        self.y = CONTENT_TOP;
        self.decorate_page();
    }

    /// Starts a new page unless `height` fits above the footer.
    fn ensure_space(&mut self, height: f32) {
        if self.y - height < CONTENT_BOTTOM && self.y < CONTENT_TOP {
            self.new_page();
        }
    }

    fn decorate_page(&mut self) {
        self.header();
        self.footer();
    }

    fn header(&self) {
        let clinic = &self.report.clinic;
        let name = if clinic.name.trim().is_empty() {
            "Laudo médico"
        } else {
            clinic.name.trim()
        };

        self.set_fill(0.09, 0.27, 0.45);
        let name = fonts::fit(name, Face::Bold, 15.0, CONTENT_WIDTH - 50.0);
        self.text(&name, 15.0, MARGIN, 280.0, Face::Bold);
        self.set_fill(0.0, 0.0, 0.0);

        let contact: Vec<&str> = [clinic.address.as_deref(), clinic.phone.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if !contact.is_empty() {
            let contact = fonts::fit(&contact.join(" - "), Face::Regular, 8.0, CONTENT_WIDTH);
            self.text(&contact, 8.0, MARGIN, 274.5, Face::Regular);
        }

        let label = "LAUDO MÉDICO";
        let width = fonts::text_width(label, Face::Bold, 11.0);
        self.text(label, 11.0, PAGE_WIDTH - MARGIN - width, 280.0, Face::Bold);

        self.rule(MARGIN, PAGE_WIDTH - MARGIN, 269.0, 0.8);
    }

    fn footer(&self) {
        self.rule(MARGIN, PAGE_WIDTH - MARGIN, 20.0, 0.4);

        let generated = self.report.generated_at.format("%d/%m/%Y %H:%M");
        let left = format!(
            "Código de verificação: {} - Gerado em {} (UTC)",
            self.report.verification_code, generated
        );
        let left = fonts::fit(&left, Face::Regular, 7.5, CONTENT_WIDTH - 25.0);
        self.text(&left, 7.5, MARGIN, 15.0, Face::Regular);

        let page = format!("Página {}", self.page_number);
        let width = fonts::text_width(&page, Face::Regular, 7.5);
        self.text(&page, 7.5, PAGE_WIDTH - MARGIN - width, 15.0, Face::Regular);
    }

    fn title(&mut self) {
        let exam_type = self.report.exam.exam_type.trim();
        let title = if exam_type.is_empty() {
            "Laudo".to_owned()
        } else {
            exam_type.to_uppercase()
        };
        for line in fonts::wrap(&title, Face::Bold, 13.0, CONTENT_WIDTH) {
            let width = fonts::text_width(&line, Face::Bold, 13.0);
            self.text(&line, 13.0, (PAGE_WIDTH - width) / 2.0, self.y, Face::Bold);
            self.y -= fonts::line_height(13.0);
        }
        self.y -= SECTION_GAP / 2.0;
    }

    fn patient_section(&mut self) {
        let patient = &self.report.patient;
        let mut fields: Vec<(&str, String)> = Vec::new();

        let name = patient.name.trim();
        fields.push((
            "Paciente:",
            if name.is_empty() { "-".to_owned() } else { name.to_owned() },
        ));
        if let Some(age) = self.report.patient_age() {
            let unit = if age == 1 { "ano" } else { "anos" };
            fields.push(("Idade:", format!("{age} {unit}")));
        }
        if let Some(birth) = patient.birth_date {
            fields.push(("Nascimento:", birth.format("%d/%m/%Y").to_string()));
        }
        if let Some(sex) = patient.sex.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            fields.push(("Sexo:", sex.to_owned()));
        }

        self.section("DADOS DO PACIENTE", &fields);
    }

    fn exam_section(&mut self) {
        let exam = &self.report.exam;
        let mut fields: Vec<(&str, String)> = Vec::new();

        if let Some(at) = exam.performed_at {
            fields.push(("Data do exame:", at.format("%d/%m/%Y").to_string()));
        }
        if let Some(requester) = exam
            .requesting_physician
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            fields.push(("Solicitante:", requester.to_owned()));
        }

        let metrics = [
            ("Altura:", exam.height_cm.as_deref(), "cm"),
            ("Peso:", exam.weight_kg.as_deref(), "kg"),
            ("FC:", exam.heart_rate_bpm.as_deref(), "bpm"),
            ("PR:", exam.pr_interval_ms.as_deref(), "ms"),
            ("QRS:", exam.qrs_duration_ms.as_deref(), "ms"),
        ];
        for (label, raw, unit) in metrics {
            if let Some(value) = raw.and_then(parse_metric) {
                fields.push((label, format!("{} {unit}", format_metric(value))));
            }
        }

        if !fields.is_empty() {
            self.section("DADOS DO EXAME", &fields);
        }
    }

    /// Section heading followed by label/value pairs laid out in two columns.
    fn section(&mut self, heading: &str, fields: &[(&str, String)]) {
        let row_height = fonts::line_height(BODY_SIZE) + 0.8;
        let rows = fields.len().div_ceil(2) as f32;
        self.ensure_space(fonts::line_height(HEADING_SIZE) + 2.0 + rows * row_height);

        self.heading(heading);

        let column_width = CONTENT_WIDTH / 2.0;
        for pair in fields.chunks(2) {
            for (index, (label, value)) in pair.iter().enumerate() {
                let x = MARGIN + index as f32 * column_width;
                self.text(label, LABEL_SIZE, x, self.y, Face::Bold);
                let label_width = fonts::text_width(label, Face::Bold, LABEL_SIZE) + 1.5;
                let value = fonts::fit(
                    value,
                    Face::Regular,
                    BODY_SIZE,
                    column_width - label_width - 3.0,
                );
                self.text(&value, BODY_SIZE, x + label_width, self.y, Face::Regular);
            }
            self.y -= row_height;
        }
        self.y -= SECTION_GAP;
    }

    fn heading(&mut self, heading: &str) {
        self.set_fill(0.09, 0.27, 0.45);
        self.text(heading, HEADING_SIZE, MARGIN, self.y, Face::Bold);
        self.set_fill(0.0, 0.0, 0.0);
        self.y -= 1.8;
        self.rule(MARGIN, PAGE_WIDTH - MARGIN, self.y, 0.3);
        self.y -= fonts::line_height(BODY_SIZE);
    }

    fn conclusion_section(&mut self) {
        let line_height = fonts::line_height(BODY_SIZE);
        let paragraphs: Vec<Vec<String>> = self
            .report
            .paragraphs()
            .map(|p| fonts::wrap(p, Face::Regular, BODY_SIZE, CONTENT_WIDTH))
            .collect();

        let first_height = paragraphs.first().map_or(0.0, |l| l.len() as f32 * line_height);
        self.ensure_space(fonts::line_height(HEADING_SIZE) + 2.0 + first_height);
        self.heading("CONCLUSÃO");

        for lines in paragraphs {
            let height = lines.len() as f32 * line_height;
            self.ensure_space(height);

            let last = lines.len().saturating_sub(1);
            for (index, line) in lines.iter().enumerate() {
                // Paragraphs taller than a page continue on the next one.
                if self.y < CONTENT_BOTTOM {
                    self.new_page();
                }
                let justified = (index < last)
                    .then(|| fonts::justify(line, Face::Regular, BODY_SIZE, CONTENT_WIDTH))
                    .flatten();
                match justified {
                    Some(words) => {
                        for (offset, word) in words {
                            self.text(word, BODY_SIZE, MARGIN + offset, self.y, Face::Regular);
                        }
                    }
                    None => self.text(line, BODY_SIZE, MARGIN, self.y, Face::Regular),
                }
                self.y -= line_height;
            }
            self.y -= PARAGRAPH_GAP;
        }
        self.y -= SECTION_GAP;
    }

    fn signature_section(&mut self) {
        self.ensure_space(SIGNATURE_BLOCK_HEIGHT);
        let top = self.y;

        if let Some(url) = self.report.public_url.as_deref() {
            self.verification_link(url, top);
        }

        let right_x = PAGE_WIDTH - MARGIN - SEAL_WIDTH;
        if self.report.digitally_signed {
            self.digital_seal(right_x, top);
        } else {
            self.manual_signature_line(right_x, top);
        }
        self.y = top - SIGNATURE_BLOCK_HEIGHT;
    }

    /// QR code with the link printed under it, or the link alone when encoding fails.
    fn verification_link(&self, url: &str, top: f32) {
        let caption = "Verifique a autenticidade:";
        let link_width = CONTENT_WIDTH - SEAL_WIDTH - 6.0;
        match qr::encode(url) {
            Some(matrix) => {
                self.qr_code(&matrix, MARGIN, top - QR_SIZE);
                self.text(caption, 6.5, MARGIN, top - QR_SIZE - 3.5, Face::Bold);
                let mut y = top - QR_SIZE - 6.5;
                for line in fonts::wrap(url, Face::Regular, 6.0, link_width).iter().take(3) {
                    self.text(line, 6.0, MARGIN, y, Face::Regular);
                    y -= fonts::line_height(6.0);
                }
            }
            None => {
                self.text(caption, 7.5, MARGIN, top - 4.0, Face::Bold);
                let mut y = top - 8.0;
                for line in fonts::wrap(url, Face::Regular, 7.0, link_width).iter().take(4) {
                    self.text(line, 7.0, MARGIN, y, Face::Regular);
                    y -= fonts::line_height(7.0);
                }
            }
        }
    }

    fn qr_code(&self, matrix: &qr::QrMatrix, x: f32, y: f32) {
        // Four module quiet zone on every side.
        let modules = matrix.width as f32 + 8.0;
        let module = QR_SIZE / modules;
        let rings: Vec<Vec<(Point, bool)>> = matrix
            .dark_runs()
            .into_iter()
            .map(|(row, col, len)| {
                let left = x + (col as f32 + 4.0) * module;
                let right = left + len as f32 * module;
                let upper = y + QR_SIZE - (row as f32 + 4.0) * module;
                let lower = upper - module;
                rect_ring(left, lower, right, upper)
            })
            .collect();
        if rings.is_empty() {
            return;
        }
        self.set_fill(0.0, 0.0, 0.0);
        self.layer.add_polygon(Polygon {
            rings,
            mode: PaintMode::Fill,
            winding_order: WindingOrder::NonZero,
        });
    }

    fn digital_seal(&self, x: f32, top: f32) {
        let lower = top - SEAL_HEIGHT;
        self.layer
            .set_outline_color(Color::Rgb(Rgb::new(0.09, 0.27, 0.45, None)));
        self.layer.set_outline_thickness(0.8);
        self.layer.add_polygon(Polygon {
            rings: vec![rect_ring(x, lower, x + SEAL_WIDTH, top)],
            mode: PaintMode::Stroke,
            winding_order: WindingOrder::NonZero,
        });

        let inner = x + 3.0;
        let width = SEAL_WIDTH - 6.0;
        self.set_fill(0.09, 0.27, 0.45);
        self.text("DOCUMENTO ASSINADO DIGITALMENTE", 8.5, inner, top - 5.0, Face::Bold);
        self.set_fill(0.0, 0.0, 0.0);

        let physician = &self.report.physician;
        let name = fonts::fit(physician.name.trim(), Face::Bold, 9.0, width);
        self.text(&name, 9.0, inner, top - 10.5, Face::Bold);
        if let Some(crm) = physician.crm.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            self.text(crm, 8.0, inner, top - 14.5, Face::Regular);
        }

        let signed_at = self.report.signed_at.unwrap_or(self.report.generated_at);
        let when = format!("Data: {} (UTC)", signed_at.format("%d/%m/%Y %H:%M:%S"));
        self.text(&when, 7.5, inner, top - 19.0, Face::Regular);
        self.text(
            "Certificado digital padrão ICP-Brasil",
            7.5,
            inner,
            top - 23.0,
            Face::Regular,
        );
        self.text("MP 2.200-2/2001", 6.5, inner, top - 27.0, Face::Regular);
    }

    fn manual_signature_line(&self, x: f32, top: f32) {
        let line_y = top - 18.0;
        self.layer.set_outline_color(Color::Rgb(Rgb::new(0.0, 0.0, 0.0, None)));
        self.rule(x + 6.0, x + SEAL_WIDTH - 6.0, line_y, 0.5);

        let center = x + SEAL_WIDTH / 2.0;
        let physician = &self.report.physician;
        let name = fonts::fit(physician.name.trim(), Face::Bold, 9.0, SEAL_WIDTH - 6.0);
        let width = fonts::text_width(&name, Face::Bold, 9.0);
        self.text(&name, 9.0, center - width / 2.0, line_y - 4.5, Face::Bold);

        if let Some(crm) = physician.crm.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let width = fonts::text_width(crm, Face::Regular, 8.0);
            self.text(crm, 8.0, center - width / 2.0, line_y - 8.5, Face::Regular);
        }
    }

    fn text(&self, text: &str, size: f32, x: f32, y: f32, face: Face) {
        let font = match face {
            Face::Regular => &self.regular,
            Face::Bold => &self.bold,
        };
        self.layer.use_text(sanitize(text), size, Mm(x), Mm(y), font);
    }

    fn rule(&self, from_x: f32, to_x: f32, y: f32, thickness: f32) {
        self.layer.set_outline_thickness(thickness);
        self.layer.add_line(Line {
            points: vec![
                (Point::new(Mm(from_x), Mm(y)), false),
                (Point::new(Mm(to_x), Mm(y)), false),
            ],
            is_closed: false,
        });
    }

    fn set_fill(&self, r: f32, g: f32, b: f32) {
        self.layer.set_fill_color(Color::Rgb(Rgb::new(r, g, b, None)));
    }
}

fn rect_ring(left: f32, lower: f32, right: f32, upper: f32) -> Vec<(Point, bool)> {
    vec![
        (Point::new(Mm(left), Mm(lower)), false),
        (Point::new(Mm(right), Mm(lower)), false),
        (Point::new(Mm(right), Mm(upper)), false),
        (Point::new(Mm(left), Mm(upper)), false),
    ]
}

/// Drops control characters that would corrupt the content stream.
fn sanitize(text: &str) -> String {
    text.chars().filter(|c| !c.is_control()).collect()
}
