//! PDF rendering of medical reports.
//!
//! [`ReportRenderer::render`] turns a fully decrypted [`ReportDocument`] into PDF bytes:
//! branded header on every page, patient and exam sections, the conclusion as justified
//! paragraphs, a signature area and a verification footer. The renderer never signs anything;
//! whether the signature area shows a digital seal or a blank line is decided only by
//! [`ReportDocument::digitally_signed`].

mod document;
mod fonts;
mod qr;
mod renderer;

pub use document::{
    age_on, parse_metric, ClinicHeader, ExamSection, PatientSection, PhysicianSection,
    ReportDocument,
};
pub use renderer::ReportRenderer;

/// Errors raised while building a PDF.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to load font: {0}")]
    Font(String),

    #[error("failed to write PDF: {0}")]
    Pdf(String),
}

pub type RenderResult<T> = Result<T, RenderError>;
