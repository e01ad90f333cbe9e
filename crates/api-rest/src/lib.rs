//! # API REST
//!
//! REST API for the laudo backend.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON bodies, CORS, status codes, streaming downloads)
//!
//! All report semantics live in `laudo-core`; handlers only parse input and map results.

#![warn(rust_2018_idioms)]

pub mod actor;
pub mod backend;
pub mod demo;
pub mod dto;
pub mod error;

use actor::CurrentActor;
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::Engine;
use dto::*;
use error::{ApiError, ErrorBody};
use laudo_core::{DocumentDownload, LaudoError, ReportService, SignMode};
use laudo_ids::{CertificateId, ExamId, ReportId};
use laudo_storage::{ArtifactStream, HmacUrlSigner, StorageError};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Largest accepted signed-document upload.
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Application state shared by the handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: ReportService,
    /// Verifies `/arquivos` links when the primary store is served by this application.
    pub link_verifier: Option<Arc<HmacUrlSigner>>,
}

impl AppState {
    fn fail(&self, error: LaudoError) -> ApiError {
        ApiError::from_core(error, self.service.config().expose_error_detail())
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        create_report,
        get_report,
        report_url,
        report_pdf,
        sign_automatically,
        sign_manually,
        upload_signed,
        redo_report,
        invalidate_report,
        exam_reports,
        public_report,
        public_report_pdf,
        list_certificates,
        register_certificate,
        deactivate_certificate,
        confirm_certificate_password,
    ),
    components(schemas(
        HealthRes,
        ErrorBody,
        CreateReportReq,
        CreateReportRes,
        SignReportRes,
        RedoReportReq,
        RedoReportRes,
        HistoryEntryRes,
        ReportRes,
        AccessUrlRes,
        PublicReportRes,
        RegisterCertificateReq,
        RegisterCertificateRes,
        ConfirmPasswordReq,
        ConfirmPasswordRes,
        CertificateRes,
    ))
)]
pub struct ApiDoc;

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/laudos", post(create_report))
        .route("/laudos/:id", get(get_report))
        .route("/laudos/:id/url", get(report_url))
        .route("/laudos/:id/pdf", get(report_pdf))
        .route("/laudos/:id/assinar-automaticamente", post(sign_automatically))
        .route("/laudos/:id/assinar", post(sign_manually))
        .route(
            "/laudos/:id/upload",
            post(upload_signed).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/laudos/:id/refazer", post(redo_report))
        .route("/laudos/:id/invalidar", post(invalidate_report))
        .route("/exames/:id/laudos", get(exam_reports))
        .route("/publico/laudos/:id", get(public_report))
        .route("/publico/laudos/:id/pdf", get(public_report_pdf))
        .route("/certificados", get(list_certificates).post(register_certificate))
        .route("/certificados/:id", delete(deactivate_certificate))
        .route(
            "/certificados/:id/confirmar-senha",
            post(confirm_certificate_password),
        )
        .route("/arquivos/*key", get(signed_file))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn report_id(state: &AppState, raw: &str) -> Result<ReportId, ApiError> {
    ReportId::parse(raw).map_err(|e| state.fail(e.into()))
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "laudo REST API is alive".into(),
    })
}

#[utoipa::path(
    post,
    path = "/laudos",
    request_body = CreateReportReq,
    responses(
        (status = 200, description = "Report created", body = CreateReportRes),
        (status = 400, description = "Blank conclusion or invalid exam id", body = ErrorBody),
        (status = 404, description = "Exam not found", body = ErrorBody),
        (status = 409, description = "Exam already has a valid report", body = ErrorBody)
    )
)]
/// Creates the report of an exam
///
/// The report starts pending signature. The response tells whether the responsible physician
/// can sign it automatically.
async fn create_report(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(req): Json<CreateReportReq>,
) -> Result<Json<CreateReportRes>, ApiError> {
    let exam_id = ExamId::parse(&req.exam_id).map_err(|e| state.fail(e.into()))?;
    let created = state
        .service
        .create(&actor, exam_id, &req.conclusion)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(created.into()))
}

#[utoipa::path(
    get,
    path = "/laudos/{id}",
    params(("id" = String, Path, description = "Report id")),
    responses(
        (status = 200, description = "Report", body = ReportRes),
        (status = 404, description = "Report not found", body = ErrorBody)
    )
)]
async fn get_report(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Json<ReportRes>, ApiError> {
    let id = report_id(&state, &id)?;
    let report = state.service.get(&actor, id).await.map_err(|e| state.fail(e))?;
    Ok(Json(report.into()))
}

#[utoipa::path(
    get,
    path = "/laudos/{id}/url",
    params(("id" = String, Path, description = "Report id")),
    responses(
        (status = 200, description = "Time-boxed URL of the current document", body = AccessUrlRes),
        (status = 404, description = "Report or document not found", body = ErrorBody)
    )
)]
async fn report_url(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Json<AccessUrlRes>, ApiError> {
    let id = report_id(&state, &id)?;
    let url = state
        .service
        .access_url(&actor, id)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(AccessUrlRes { url }))
}

#[utoipa::path(
    get,
    path = "/laudos/{id}/pdf",
    params(("id" = String, Path, description = "Report id")),
    responses(
        (status = 200, description = "PDF document", content_type = "application/pdf"),
        (status = 307, description = "Redirect to a legacy document"),
        (status = 404, description = "Report or document not found", body = ErrorBody)
    )
)]
async fn report_pdf(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = report_id(&state, &id)?;
    let download = state
        .service
        .download(&actor, id)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(download_response(download))
}

async fn sign(
    state: AppState,
    actor: laudo_core::Actor,
    id: String,
    mode: SignMode,
) -> Result<Json<SignReportRes>, ApiError> {
    let id = report_id(&state, &id)?;
    let signed = state
        .service
        .sign(&actor, id, mode)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(signed.into()))
}

#[utoipa::path(
    post,
    path = "/laudos/{id}/assinar-automaticamente",
    params(("id" = String, Path, description = "Report id")),
    responses(
        (status = 200, description = "Report signed", body = SignReportRes),
        (status = 403, description = "Caller is not the responsible physician", body = ErrorBody),
        (status = 409, description = "Report is not pending signature", body = ErrorBody),
        (status = 422, description = "No usable certificate or signature failed", body = ErrorBody),
        (status = 502, description = "No store accepted the document", body = ErrorBody)
    )
)]
/// Signs a report with the physician's certificate right after it was written
async fn sign_automatically(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Json<SignReportRes>, ApiError> {
    sign(state, actor, id, SignMode::Automatic).await
}

#[utoipa::path(
    post,
    path = "/laudos/{id}/assinar",
    params(("id" = String, Path, description = "Report id")),
    responses(
        (status = 200, description = "Report signed", body = SignReportRes),
        (status = 403, description = "Caller is not the responsible physician", body = ErrorBody),
        (status = 409, description = "Report is not pending signature", body = ErrorBody),
        (status = 422, description = "No usable certificate or signature failed", body = ErrorBody)
    )
)]
/// Signs a report with the physician's certificate from the signing queue
async fn sign_manually(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Json<SignReportRes>, ApiError> {
    sign(state, actor, id, SignMode::Manual).await
}

#[utoipa::path(
    post,
    path = "/laudos/{id}/upload",
    params(("id" = String, Path, description = "Report id")),
    request_body(content = Vec<u8>, content_type = "application/pdf"),
    responses(
        (status = 200, description = "Signed document stored", body = SignReportRes),
        (status = 400, description = "Not a PDF document", body = ErrorBody),
        (status = 403, description = "Caller is not the responsible physician", body = ErrorBody)
    )
)]
/// Uploads a document signed outside the system
async fn upload_signed(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SignReportRes>, ApiError> {
    let id = report_id(&state, &id)?;
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let signed = state
        .service
        .upload_signed(&actor, id, body.to_vec(), mime_type)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(signed.into()))
}

#[utoipa::path(
    post,
    path = "/laudos/{id}/refazer",
    params(("id" = String, Path, description = "Report id")),
    request_body = RedoReportReq,
    responses(
        (status = 200, description = "New report version", body = RedoReportRes),
        (status = 409, description = "Report is invalidated or no longer active", body = ErrorBody)
    )
)]
/// Creates a new version of a report
async fn redo_report(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    body: Option<Json<RedoReportReq>>,
) -> Result<Json<RedoReportRes>, ApiError> {
    let id = report_id(&state, &id)?;
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let redone = state
        .service
        .redo(&actor, id, req.conclusion.as_deref())
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(redone.into()))
}

#[utoipa::path(
    post,
    path = "/laudos/{id}/invalidar",
    params(("id" = String, Path, description = "Report id")),
    responses(
        (status = 200, description = "Invalidated report", body = ReportRes),
        (status = 404, description = "Report not found", body = ErrorBody)
    )
)]
async fn invalidate_report(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Json<ReportRes>, ApiError> {
    let id = report_id(&state, &id)?;
    let report = state
        .service
        .invalidate(&actor, id)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(report.into()))
}

#[utoipa::path(
    get,
    path = "/exames/{id}/laudos",
    params(("id" = String, Path, description = "Exam id")),
    responses(
        (status = 200, description = "Every report version of the exam", body = Vec<ReportRes>),
        (status = 404, description = "Exam not found", body = ErrorBody)
    )
)]
async fn exam_reports(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Json<Vec<ReportRes>>, ApiError> {
    let exam_id = ExamId::parse(&id).map_err(|e| state.fail(e.into()))?;
    let reports = state
        .service
        .versions(&actor, exam_id)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(reports.into_iter().map(ReportRes::from).collect()))
}

#[utoipa::path(
    get,
    path = "/publico/laudos/{id}",
    params(("id" = String, Path, description = "Report id")),
    responses(
        (status = 200, description = "Public verification data", body = PublicReportRes),
        (status = 404, description = "Report not found", body = ErrorBody)
    )
)]
/// Public verification page data, reached from the QR code
async fn public_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PublicReportRes>, ApiError> {
    let id = report_id(&state, &id)?;
    let view = state
        .service
        .public_view(id)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(view.into()))
}

#[utoipa::path(
    get,
    path = "/publico/laudos/{id}/pdf",
    params(("id" = String, Path, description = "Report id")),
    responses(
        (status = 200, description = "PDF document", content_type = "application/pdf"),
        (status = 404, description = "Report invalidated or without document", body = ErrorBody)
    )
)]
async fn public_report_pdf(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = report_id(&state, &id)?;
    let download = state
        .service
        .public_download(id)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(download_response(download))
}

#[utoipa::path(
    get,
    path = "/certificados",
    responses(
        (status = 200, description = "Certificates of the calling physician", body = Vec<CertificateRes>)
    )
)]
async fn list_certificates(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Vec<CertificateRes>>, ApiError> {
    let certificates = state
        .service
        .certificates()
        .list_for_physician(actor.id)
        .await
        .map_err(|e| state.fail(e.into()))?;
    Ok(Json(certificates.into_iter().map(CertificateRes::from).collect()))
}

#[utoipa::path(
    post,
    path = "/certificados",
    request_body = RegisterCertificateReq,
    responses(
        (status = 200, description = "Certificate registered", body = RegisterCertificateRes),
        (status = 400, description = "Unreadable container or wrong password", body = ErrorBody),
        (status = 409, description = "Already active or already registered", body = ErrorBody),
        (status = 422, description = "Certificate expired", body = ErrorBody)
    )
)]
/// Registers the calling physician's PKCS#12 certificate
async fn register_certificate(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(req): Json<RegisterCertificateReq>,
) -> Result<Json<RegisterCertificateRes>, ApiError> {
    let pkcs12 = base64::engine::general_purpose::STANDARD
        .decode(req.pkcs12_base64.trim())
        .map_err(|e| state.fail(LaudoError::Validation(format!("pkcs12_base64: {e}"))))?;
    let certificate_id = state
        .service
        .certificates()
        .register(actor.id, &pkcs12, &req.filename, &req.password)
        .await
        .map_err(|e| state.fail(e.into()))?;
    Ok(Json(RegisterCertificateRes {
        certificate_id: certificate_id.to_string(),
    }))
}

#[utoipa::path(
    delete,
    path = "/certificados/{id}",
    params(("id" = String, Path, description = "Certificate id")),
    responses(
        (status = 204, description = "Certificate deactivated"),
        (status = 404, description = "Certificate not found", body = ErrorBody)
    )
)]
async fn deactivate_certificate(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = CertificateId::parse(&id).map_err(|e| state.fail(e.into()))?;
    state
        .service
        .certificates()
        .deactivate(id, actor.id)
        .await
        .map_err(|e| state.fail(e.into()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/certificados/{id}/confirmar-senha",
    params(("id" = String, Path, description = "Certificate id")),
    request_body = ConfirmPasswordReq,
    responses(
        (status = 200, description = "Whether the password matches", body = ConfirmPasswordRes),
        (status = 404, description = "Certificate not found", body = ErrorBody)
    )
)]
async fn confirm_certificate_password(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    Json(req): Json<ConfirmPasswordReq>,
) -> Result<Json<ConfirmPasswordRes>, ApiError> {
    let id = CertificateId::parse(&id).map_err(|e| state.fail(e.into()))?;
    let valid = state
        .service
        .certificates()
        .confirm_password(id, actor.id, &req.password)
        .await
        .map_err(|e| state.fail(e.into()))?;
    Ok(Json(ConfirmPasswordRes { valid }))
}

/// Serves primary-store objects behind HMAC-signed links.
async fn signed_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(link): Query<SignedLinkQuery>,
) -> Result<Response, ApiError> {
    let verifier = state
        .link_verifier
        .as_ref()
        .ok_or_else(|| state.fail(LaudoError::NotFound("file".into())))?;
    verifier
        .verify(&key, link.expires, &link.signature)
        .map_err(|e| match e {
            StorageError::Signature(_) => state.fail(LaudoError::Permission(e.to_string())),
            other => state.fail(other.into()),
        })?;

    let artifact = state
        .service
        .storage()
        .open_stream(&key)
        .await
        .map_err(|e| state.fail(e.into()))?;
    let filename = key.rsplit('/').next().unwrap_or("laudo.pdf").to_owned();
    Ok(stream_response(filename, artifact))
}

fn download_response(download: DocumentDownload) -> Response {
    match download {
        DocumentDownload::Stream { filename, artifact } => stream_response(filename, artifact),
        DocumentDownload::Redirect(url) => Redirect::temporary(&url).into_response(),
    }
}

fn stream_response(filename: String, artifact: ArtifactStream) -> Response {
    let headers = [
        (header::CONTENT_TYPE, "application/pdf".to_owned()),
        (header::CONTENT_LENGTH, artifact.size_bytes.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{filename}\""),
        ),
    ];
    (headers, Body::from_stream(artifact.stream)).into_response()
}
