use std::net::IpAddr;
use std::path::Path as FsPath;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    documents::{self, is_sha256_hex, pdf, qr, sha256_hex},
    error::{
        validation::{validate_email, validate_length, validate_pagination},
        AppError, AppResult, OptionExt,
    },
    extract::{Json, Path, Query},
    metrics::Metrics,
    middleware::ip::ClientIp,
    routes::cases::load_visible_case,
    state::AppState,
    tiers::Feature,
    types::{
        AccessAction, AccessLogEntry, BlockchainStatus, DocumentDto, DocumentListQuery, DocumentRow,
        DocumentShare, GenerateDocumentRequest, PageQuery, ShareDocumentRequest, SharePermission,
        VerifyResponse,
    },
};

/// Longest share lifetime: one year.
const MAX_SHARE_HOURS: i64 = 24 * 365;

/// How the caller reaches a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Owner,
    Admin,
    Shared(SharePermission),
}

impl Access {
    fn manages(self) -> bool {
        matches!(self, Access::Owner | Access::Admin)
    }

    fn can_download(self) -> bool {
        !matches!(self, Access::Shared(SharePermission::View))
    }
}

async fn load_document(db: &PgPool, id: Uuid) -> AppResult<DocumentRow> {
    sqlx::query_as::<_, DocumentRow>("SELECT * FROM documents WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_not_found("Document")
}

/// Resolves the caller's access. Callers without any access see a 404.
async fn access_for(db: &PgPool, user: &AuthUser, doc: &DocumentRow) -> AppResult<Access> {
    if doc.user_id == user.id {
        return Ok(Access::Owner);
    }
    if user.is_admin() {
        return Ok(Access::Admin);
    }

    let shares = sqlx::query_as::<_, DocumentShare>(
        "SELECT * FROM document_shares
         WHERE document_id = $1 AND shared_with_email = $2 AND revoked_at IS NULL",
    )
    .bind(doc.id)
    .bind(user.email.to_lowercase())
    .fetch_all(db)
    .await?;

    let now = Utc::now();
    let mut best = None;
    for share in shares.iter().filter(|s| s.is_active_at(now)) {
        best = match (best, share.permission) {
            (_, SharePermission::Download) => Some(SharePermission::Download),
            (None, SharePermission::View) => Some(SharePermission::View),
            (current, SharePermission::View) => current,
        };
    }
    best.map(Access::Shared).ok_or_else(|| AppError::NotFound("Document not found".to_string()))
}

async fn managed_document(state: &AppState, user: &AuthUser, id: Uuid) -> AppResult<DocumentRow> {
    let doc = load_document(&state.db, id).await?;
    if !access_for(&state.db, user, &doc).await?.manages() {
        return Err(AppError::Forbidden("Only the document owner can do this".to_string()));
    }
    Ok(doc)
}

/// Access logging never fails the request it describes.
async fn log_access(
    db: &PgPool,
    document_id: Uuid,
    user_id: Option<Uuid>,
    action: AccessAction,
    ip: Option<IpAddr>,
) {
    let result = sqlx::query(
        "INSERT INTO document_access_logs (document_id, user_id, action, ip_address) VALUES ($1, $2, $3, $4)",
    )
    .bind(document_id)
    .bind(user_id)
    .bind(action.as_str())
    .bind(ip.map(|ip| ip.to_string()))
    .execute(db)
    .await;
    if let Err(e) = result {
        tracing::warn!(%document_id, action = action.as_str(), "Failed to write access log: {}", e);
    }
}

async fn remove_quietly(paths: &[&FsPath]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/documents/generate",
    tag = "documents",
    security(("bearer" = [])),
    request_body = GenerateDocumentRequest,
    responses(
        (status = 201, description = "Report generated", body = DocumentDto),
        (status = 403, description = "Tier does not allow document generation"),
        (status = 404, description = "Unknown case")
    )
)]
pub async fn generate_document(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<GenerateDocumentRequest>,
) -> AppResult<(StatusCode, Json<DocumentDto>)> {
    state.permissions.require(&state.db, &user, Feature::GenerateDocument).await?;
    let case = load_visible_case(&state, &user, req.case_id).await?;
    let title = match req.title.as_deref() {
        Some(t) => validate_length(t, "title", 1, 200)?,
        None => format!("Case report {}", case.case_number),
    };

    let report = pdf::CaseReport {
        case_number: case.case_number.clone(),
        title: case.title.clone(),
        category: case.category.to_string(),
        status: case.status.to_string(),
        escalation_level: case.escalation_level,
        location: case.location.clone(),
        incident_date: case.incident_date,
        accused_party: case.accused_party.clone(),
        submitted_at: case.created_at,
        description: case.description.clone(),
        generated_at: Utc::now(),
    };
    let bytes = tokio::task::spawn_blocking(move || pdf::render_case_report(&report))
        .await
        .map_err(anyhow::Error::from)??;
    let file_hash = sha256_hex(&bytes);

    let uploads = &state.config.uploads;
    let verify_url = format!("{}/api/documents/verify/{}", state.config.server.public_base_url, file_hash);
    let svg = qr::render_svg(&verify_url)?;

    let pdf_path = documents::store_file(&uploads.documents_dir(), "pdf", &bytes).await?;
    let qr_path = match documents::store_file(&uploads.qrcodes_dir(), "svg", svg.as_bytes()).await {
        Ok(path) => path,
        Err(e) => {
            remove_quietly(&[pdf_path.as_path()]).await;
            return Err(e.into());
        }
    };

    let inserted = sqlx::query_as::<_, DocumentRow>(
        "INSERT INTO documents (id, case_id, user_id, title, file_path, file_hash, file_size, qr_code_path)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(case.id)
    .bind(case.user_id)
    .bind(&title)
    .bind(pdf_path.to_string_lossy().into_owned())
    .bind(&file_hash)
    .bind(bytes.len() as i64)
    .bind(qr_path.to_string_lossy().into_owned())
    .fetch_one(&state.db)
    .await;
    let doc = match inserted {
        Ok(doc) => doc,
        Err(e) => {
            remove_quietly(&[pdf_path.as_path(), qr_path.as_path()]).await;
            return Err(e.into());
        }
    };

    Metrics::inc(&state.metrics.documents_generated);
    tracing::info!(document_id = %doc.id, case_id = %case.id, hash = %file_hash, "Case report generated");
    Ok((StatusCode::CREATED, Json(doc.to_dto(&uploads.dir))))
}

#[utoipa::path(
    get,
    path = "/api/documents",
    tag = "documents",
    security(("bearer" = [])),
    params(DocumentListQuery),
    responses((status = 200, description = "Documents owned by the caller (all for admins)", body = [DocumentDto]))
)]
pub async fn list_documents(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<DocumentListQuery>,
) -> AppResult<Json<Vec<DocumentDto>>> {
    let owner = if user.is_admin() { None } else { Some(user.id) };
    let rows = sqlx::query_as::<_, DocumentRow>(
        "SELECT * FROM documents
         WHERE ($1::uuid IS NULL OR user_id = $1)
           AND ($2::uuid IS NULL OR case_id = $2)
         ORDER BY created_at DESC, id",
    )
    .bind(owner)
    .bind(q.case_id)
    .fetch_all(&state.db)
    .await?;
    let root = &state.config.uploads.dir;
    Ok(Json(rows.iter().map(|d| d.to_dto(root)).collect()))
}

#[utoipa::path(
    get,
    path = "/api/documents/{id}",
    tag = "documents",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "Document metadata", body = DocumentDto),
        (status = 404, description = "Unknown or not accessible")
    )
)]
pub async fn get_document(
    State(state): State<AppState>,
    user: AuthUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DocumentDto>> {
    let doc = load_document(&state.db, id).await?;
    access_for(&state.db, &user, &doc).await?;
    log_access(&state.db, doc.id, Some(user.id), AccessAction::View, Some(ip)).await;
    Ok(Json(doc.to_dto(&state.config.uploads.dir)))
}

#[utoipa::path(
    get,
    path = "/api/documents/{id}/download",
    tag = "documents",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "The PDF", content_type = "application/pdf"),
        (status = 403, description = "Share only allows viewing"),
        (status = 404, description = "Unknown or not accessible")
    )
)]
pub async fn download_document(
    State(state): State<AppState>,
    user: AuthUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let doc = load_document(&state.db, id).await?;
    if !access_for(&state.db, &user, &doc).await?.can_download() {
        return Err(AppError::Forbidden("This share does not allow downloads".to_string()));
    }

    let bytes = match tokio::fs::read(&doc.file_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::error!(document_id = %doc.id, path = %doc.file_path, "Document file is missing");
            return Err(AppError::NotFound("Document file not found".to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    log_access(&state.db, doc.id, Some(user.id), AccessAction::Download, Some(ip)).await;

    let disposition = format!("attachment; filename=\"{}.pdf\"", doc.id);
    Ok((
        [(header::CONTENT_TYPE, "application/pdf".to_string()), (header::CONTENT_DISPOSITION, disposition)],
        bytes,
    )
        .into_response())
}

#[utoipa::path(
    post,
    path = "/api/documents/{id}/register",
    tag = "documents",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "Hash anchored on chain", body = DocumentDto),
        (status = 403, description = "Tier does not allow registration"),
        (status = 409, description = "Already registered"),
        (status = 502, description = "RPC node rejected or failed the transaction"),
        (status = 503, description = "Blockchain integration disabled")
    )
)]
pub async fn register_document(
    State(state): State<AppState>,
    user: AuthUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DocumentDto>> {
    state.permissions.require(&state.db, &user, Feature::BlockchainRegistration).await?;
    managed_document(&state, &user, id).await?;

    // Row lock held across the RPC call; a concurrent register waits and then gets 409.
    let mut tx = state.db.begin().await?;
    let doc = sqlx::query_as::<_, DocumentRow>("SELECT * FROM documents WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_not_found("Document")?;
    if doc.blockchain_status == BlockchainStatus::Registered {
        return Err(AppError::Conflict("Document is already registered".to_string()));
    }

    let tx_hash = match state.chain.register_hash(&doc.file_hash).await {
        Ok(tx_hash) => tx_hash,
        Err(err @ AppError::Blockchain(_)) => {
            sqlx::query("UPDATE documents SET blockchain_status = 'failed' WHERE id = $1")
                .bind(doc.id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Err(err);
        }
        Err(err) => return Err(err),
    };

    let doc = sqlx::query_as::<_, DocumentRow>(
        "UPDATE documents
         SET blockchain_status = 'registered', blockchain_tx_hash = $2, registered_at = NOW()
         WHERE id = $1
         RETURNING *",
    )
    .bind(doc.id)
    .bind(&tx_hash)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    Metrics::inc(&state.metrics.hashes_registered);
    log_access(&state.db, doc.id, Some(user.id), AccessAction::Register, Some(ip)).await;
    Ok(Json(doc.to_dto(&state.config.uploads.dir)))
}

#[utoipa::path(
    get,
    path = "/api/documents/verify/{hash}",
    tag = "documents",
    params(("hash" = String, Path, description = "Hex SHA-256 of the PDF")),
    responses(
        (status = 200, description = "The hash belongs to an issued report", body = VerifyResponse),
        (status = 400, description = "Not a SHA-256 hex digest"),
        (status = 404, description = "No report with this hash")
    )
)]
pub async fn verify_document(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Path(hash): Path<String>,
) -> AppResult<Json<VerifyResponse>> {
    if !is_sha256_hex(&hash) {
        return Err(AppError::validation("hash", "Expected 64 hex digits"));
    }
    let hash = hash.to_lowercase();

    let doc = sqlx::query_as::<_, DocumentRow>("SELECT * FROM documents WHERE file_hash = $1")
        .bind(&hash)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("Document")?;
    let case_number: String = sqlx::query_scalar("SELECT case_number FROM cases WHERE id = $1")
        .bind(doc.case_id)
        .fetch_one(&state.db)
        .await?;

    let on_chain_confirmed = match doc.blockchain_tx_hash.as_deref() {
        Some(tx) if state.chain.is_enabled() => match state.chain.receipt_status(tx).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(document_id = %doc.id, "Receipt lookup failed: {}", e);
                None
            }
        },
        _ => None,
    };

    log_access(&state.db, doc.id, None, AccessAction::Verify, Some(ip)).await;
    Ok(Json(VerifyResponse {
        verified: true,
        case_number,
        document: doc.to_dto(&state.config.uploads.dir),
        on_chain_confirmed,
    }))
}

#[utoipa::path(
    post,
    path = "/api/documents/{id}/share",
    tag = "documents",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Document id")),
    request_body = ShareDocumentRequest,
    responses(
        (status = 201, description = "Share created", body = DocumentShare),
        (status = 403, description = "Not the owner, or tier does not allow sharing")
    )
)]
pub async fn share_document(
    State(state): State<AppState>,
    user: AuthUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
    Json(req): Json<ShareDocumentRequest>,
) -> AppResult<(StatusCode, Json<DocumentShare>)> {
    state.permissions.require(&state.db, &user, Feature::ShareDocument).await?;
    let doc = load_document(&state.db, id).await?;
    match access_for(&state.db, &user, &doc).await? {
        Access::Owner => {}
        _ => return Err(AppError::Forbidden("Only the document owner can share it".to_string())),
    }

    let email = validate_email(&req.email)?;
    if email == user.email.to_lowercase() {
        return Err(AppError::validation("email", "Cannot share a document with yourself"));
    }
    let expires_at = match req.expires_in_hours {
        Some(h) if !(1..=MAX_SHARE_HOURS).contains(&h) => {
            return Err(AppError::validation(
                "expires_in_hours",
                format!("Must be between 1 and {}", MAX_SHARE_HOURS),
            ));
        }
        Some(h) => Some(Utc::now() + Duration::hours(h)),
        None => None,
    };

    let share = sqlx::query_as::<_, DocumentShare>(
        "INSERT INTO document_shares (id, document_id, shared_by, shared_with_email, permission, expires_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(doc.id)
    .bind(user.id)
    .bind(&email)
    .bind(req.permission.as_str())
    .bind(expires_at)
    .fetch_one(&state.db)
    .await?;

    log_access(&state.db, doc.id, Some(user.id), AccessAction::Share, Some(ip)).await;
    tracing::info!(document_id = %doc.id, share_id = %share.id, "Document shared");
    Ok((StatusCode::CREATED, Json(share)))
}

#[utoipa::path(
    get,
    path = "/api/documents/{id}/shares",
    tag = "documents",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Document id")),
    responses((status = 200, description = "All shares, including revoked ones", body = [DocumentShare]))
)]
pub async fn list_shares(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<DocumentShare>>> {
    let doc = managed_document(&state, &user, id).await?;
    let shares = sqlx::query_as::<_, DocumentShare>(
        "SELECT * FROM document_shares WHERE document_id = $1 ORDER BY created_at DESC",
    )
    .bind(doc.id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(shares))
}

#[utoipa::path(
    delete,
    path = "/api/documents/{id}/shares/{share_id}",
    tag = "documents",
    security(("bearer" = [])),
    params(
        ("id" = Uuid, Path, description = "Document id"),
        ("share_id" = Uuid, Path, description = "Share id")
    ),
    responses(
        (status = 204, description = "Share revoked"),
        (status = 404, description = "Unknown or already revoked share")
    )
)]
pub async fn revoke_share(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, share_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let doc = managed_document(&state, &user, id).await?;
    let revoked = sqlx::query(
        "UPDATE document_shares SET revoked_at = NOW()
         WHERE id = $1 AND document_id = $2 AND revoked_at IS NULL",
    )
    .bind(share_id)
    .bind(doc.id)
    .execute(&state.db)
    .await?
    .rows_affected();
    if revoked == 0 {
        return Err(AppError::NotFound("Share not found".to_string()));
    }
    tracing::info!(document_id = %doc.id, %share_id, "Share revoked");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/documents/{id}/access-logs",
    tag = "documents",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Document id"), PageQuery),
    responses((status = 200, description = "Access log, newest first", body = [AccessLogEntry]))
)]
pub async fn list_access_logs(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Query(q): Query<PageQuery>,
) -> AppResult<Json<Vec<AccessLogEntry>>> {
    let doc = managed_document(&state, &user, id).await?;
    let (page, limit) = validate_pagination(q.page, q.limit)?;
    let entries = sqlx::query_as::<_, AccessLogEntry>(
        "SELECT * FROM document_access_logs WHERE document_id = $1
         ORDER BY accessed_at DESC, id DESC
         LIMIT $2 OFFSET $3",
    )
    .bind(doc.id)
    .bind(limit)
    .bind((page - 1) * limit)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_capabilities() {
        assert!(Access::Owner.manages());
        assert!(Access::Admin.manages());
        assert!(!Access::Shared(SharePermission::Download).manages());
        assert!(Access::Shared(SharePermission::Download).can_download());
        assert!(!Access::Shared(SharePermission::View).can_download());
        assert!(Access::Owner.can_download());
    }
}
