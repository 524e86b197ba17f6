//! Anonymous submissions.
//!
//! Nothing that identifies the submitter is persisted: the client address is only
//! used for rate limiting and never logged alongside the reference code.

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use rand::Rng;
use uuid::Uuid;

use crate::{
    documents::{self, extension_for, public_url, qr, sanitize_filename, sha256_hex},
    error::{
        validation::{validate_length, validate_pagination},
        AppError, AppResult, OptionExt,
    },
    extract::{Json, Path, Query},
    metrics::Metrics,
    middleware::ip::ClientIp,
    state::AppState,
    types::{
        PageQuery, SecureEntry, SecureEntryForm, SecureEntryList, SecureEntryReceipt, SecureEntryStatusView,
        UpdateSecureEntryStatusRequest,
    },
};

/// No 0/O or 1/I so codes survive being read aloud or copied by hand.
const REFERENCE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_ATTEMPTS: usize = 5;

pub const MIN_DESCRIPTION: usize = 10;
pub const MAX_DESCRIPTION: usize = 5000;

/// `SE-XXXX-XXXX`.
pub fn generate_reference_code() -> String {
    let mut rng = rand::thread_rng();
    let mut block = || -> String {
        (0..4)
            .map(|_| REFERENCE_ALPHABET[rng.gen_range(0..REFERENCE_ALPHABET.len())] as char)
            .collect()
    };
    let first = block();
    let second = block();
    format!("SE-{}-{}", first, second)
}

/// Accepts any casing; returns the canonical uppercase code.
pub fn normalize_reference_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_uppercase();
    let bytes = code.as_bytes();
    let shape_ok = bytes.len() == 12
        && code.starts_with("SE-")
        && bytes[7] == b'-'
        && bytes[3..7].iter().chain(&bytes[8..]).all(|b| REFERENCE_ALPHABET.contains(b));
    shape_ok.then_some(code)
}

struct Upload {
    bytes: Vec<u8>,
    content_type: String,
    filename: String,
}

fn base_content_type(raw: &str) -> String {
    raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

#[utoipa::path(
    post,
    path = "/api/secure-entry",
    tag = "secure-entry",
    request_body(content = SecureEntryForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Entry stored", body = SecureEntryReceipt),
        (status = 400, description = "Description or file rejected"),
        (status = 413, description = "File too large"),
        (status = 429, description = "Too many submissions")
    )
)]
pub async fn submit_entry(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<(StatusCode, Json<SecureEntryReceipt>)> {
    state.rate_limiter.check("/api/secure-entry", ip).await?;
    let mut multipart = multipart?;

    let uploads = &state.config.uploads;
    let mut description = None;
    let mut upload = None;

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("description") => description = Some(field.text().await?),
            Some("file") => {
                let content_type = base_content_type(field.content_type().unwrap_or("application/octet-stream"));
                let filename = sanitize_filename(field.file_name().unwrap_or("upload"));
                let mut bytes = Vec::new();
                while let Some(chunk) = field.chunk().await? {
                    if bytes.len() + chunk.len() > uploads.max_file_size {
                        return Err(AppError::PayloadTooLarge(format!(
                            "File exceeds the maximum size of {} bytes",
                            uploads.max_file_size
                        )));
                    }
                    bytes.extend_from_slice(&chunk);
                }
                upload = Some(Upload { bytes, content_type, filename });
            }
            _ => {}
        }
    }

    let description = description.ok_or_else(|| AppError::validation("description", "Description is required"))?;
    let description = validate_length(&description, "description", MIN_DESCRIPTION, MAX_DESCRIPTION)?;
    if let Some(file) = &upload {
        if file.bytes.is_empty() {
            return Err(AppError::validation("file", "Uploaded file is empty"));
        }
        if !uploads.allowed_types.iter().any(|t| t.eq_ignore_ascii_case(&file.content_type)) {
            return Err(AppError::validation(
                "file",
                format!("Content type '{}' is not accepted", file.content_type),
            ));
        }
    }

    let mut reference_code = None;
    for _ in 0..CODE_ATTEMPTS {
        let candidate = generate_reference_code();
        let taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM secure_entries WHERE reference_code = $1)")
            .bind(&candidate)
            .fetch_one(&state.db)
            .await?;
        if !taken {
            reference_code = Some(candidate);
            break;
        }
    }
    let reference_code = reference_code
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("could not allocate a free reference code")))?;

    let status_url = format!("{}/api/secure-entry/{}", state.config.server.public_base_url, reference_code);
    let svg = qr::render_svg(&status_url)?;
    let qr_path = documents::store_file(&uploads.qrcodes_dir(), "svg", svg.as_bytes()).await?;

    let stored = match &upload {
        Some(file) => {
            let path = documents::store_file(&uploads.secure_dir(), extension_for(&file.content_type), &file.bytes)
                .await;
            match path {
                Ok(path) => Some((path, sha256_hex(&file.bytes))),
                Err(e) => {
                    let _ = tokio::fs::remove_file(&qr_path).await;
                    return Err(e.into());
                }
            }
        }
        None => None,
    };

    let inserted = sqlx::query_as::<_, SecureEntry>(
        "INSERT INTO secure_entries
            (id, reference_code, description, file_path, original_filename, content_type, file_size, file_hash, qr_code_path)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(&reference_code)
    .bind(&description)
    .bind(stored.as_ref().map(|(p, _)| p.to_string_lossy().into_owned()))
    .bind(upload.as_ref().map(|f| f.filename.clone()))
    .bind(upload.as_ref().map(|f| f.content_type.clone()))
    .bind(upload.as_ref().map(|f| f.bytes.len() as i64))
    .bind(stored.as_ref().map(|(_, hash)| hash.clone()))
    .bind(qr_path.to_string_lossy().into_owned())
    .fetch_one(&state.db)
    .await;
    let entry = match inserted {
        Ok(entry) => entry,
        Err(e) => {
            let _ = tokio::fs::remove_file(&qr_path).await;
            if let Some((path, _)) = &stored {
                let _ = tokio::fs::remove_file(path).await;
            }
            return Err(e.into());
        }
    };

    Metrics::inc(&state.metrics.secure_entries);
    tracing::info!(reference_code = %entry.reference_code, has_file = stored.is_some(), "Secure entry received");

    Ok((
        StatusCode::CREATED,
        Json(SecureEntryReceipt {
            reference_code: entry.reference_code,
            qr_code_url: public_url(&uploads.dir, &qr_path),
            status_url,
            created_at: entry.created_at,
        }),
    ))
}

async fn load_entry(state: &AppState, raw_code: &str) -> AppResult<SecureEntry> {
    let code = normalize_reference_code(raw_code)
        .ok_or_else(|| AppError::validation("reference_code", "Expected a code like SE-ABCD-EFGH"))?;
    sqlx::query_as::<_, SecureEntry>("SELECT * FROM secure_entries WHERE reference_code = $1")
        .bind(&code)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("Secure entry")
}

#[utoipa::path(
    get,
    path = "/api/secure-entry/{reference_code}",
    tag = "secure-entry",
    params(("reference_code" = String, Path, description = "Code handed out on submission")),
    responses(
        (status = 200, description = "Processing status", body = SecureEntryStatusView),
        (status = 404, description = "Unknown code")
    )
)]
pub async fn entry_status(
    State(state): State<AppState>,
    Path(reference_code): Path<String>,
) -> AppResult<Json<SecureEntryStatusView>> {
    Ok(Json(load_entry(&state, &reference_code).await?.into()))
}

#[utoipa::path(
    get,
    path = "/api/secure-entry",
    tag = "secure-entry",
    security(("bearer" = [])),
    params(PageQuery),
    responses(
        (status = 200, description = "All entries, newest first", body = SecureEntryList),
        (status = 403, description = "Administrator role required")
    )
)]
pub async fn list_entries(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> AppResult<Json<SecureEntryList>> {
    let (page, limit) = validate_pagination(q.page, q.limit)?;
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM secure_entries")
        .fetch_one(&state.db)
        .await?;
    let items = sqlx::query_as::<_, SecureEntry>(
        "SELECT * FROM secure_entries ORDER BY created_at DESC, id LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind((page - 1) * limit)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(SecureEntryList { items, total, page, limit }))
}

#[utoipa::path(
    put,
    path = "/api/secure-entry/{reference_code}/status",
    tag = "secure-entry",
    security(("bearer" = [])),
    params(("reference_code" = String, Path, description = "Entry code")),
    request_body = UpdateSecureEntryStatusRequest,
    responses(
        (status = 200, description = "Updated entry", body = SecureEntry),
        (status = 404, description = "Unknown code")
    )
)]
pub async fn update_entry_status(
    State(state): State<AppState>,
    Path(reference_code): Path<String>,
    Json(req): Json<UpdateSecureEntryStatusRequest>,
) -> AppResult<Json<SecureEntry>> {
    let entry = load_entry(&state, &reference_code).await?;
    let updated = sqlx::query_as::<_, SecureEntry>(
        "UPDATE secure_entries SET status = $1 WHERE id = $2 RETURNING *",
    )
    .bind(req.status.as_str())
    .bind(entry.id)
    .fetch_one(&state.db)
    .await?;
    tracing::info!(reference_code = %updated.reference_code, status = %updated.status, "Secure entry status updated");
    Ok(Json(updated))
}

#[utoipa::path(
    get,
    path = "/api/secure-entry/{reference_code}/file",
    tag = "secure-entry",
    security(("bearer" = [])),
    params(("reference_code" = String, Path, description = "Entry code")),
    responses(
        (status = 200, description = "The attached file"),
        (status = 404, description = "Unknown code or no attachment")
    )
)]
pub async fn download_entry_file(
    State(state): State<AppState>,
    Path(reference_code): Path<String>,
) -> AppResult<Response> {
    let entry = load_entry(&state, &reference_code).await?;
    let path = entry.file_path.as_deref().ok_or_not_found("Attachment")?;
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::error!(reference_code = %entry.reference_code, "Attachment file is missing");
            return Err(AppError::NotFound("Attachment file not found".to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let content_type = entry.content_type.unwrap_or_else(|| "application/octet-stream".to_string());
    let filename = entry
        .original_filename
        .map(|n| sanitize_filename(&n).replace('"', ""))
        .unwrap_or_else(|| format!("{}.bin", entry.reference_code));
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename)),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_code_shape() {
        for _ in 0..200 {
            let code = generate_reference_code();
            assert_eq!(code.len(), 12);
            assert_eq!(normalize_reference_code(&code).as_deref(), Some(code.as_str()));
            assert!(!code[3..].contains(&['0', 'O', '1', 'I'][..]));
        }
    }

    #[test]
    fn test_normalize_reference_code() {
        assert_eq!(normalize_reference_code(" se-abcd-efgh ").as_deref(), Some("SE-ABCD-EFGH"));
        assert_eq!(normalize_reference_code("SE-ABCD-EFG0"), None);
        assert_eq!(normalize_reference_code("SE-ABCDEFGH"), None);
        assert_eq!(normalize_reference_code("XX-ABCD-EFGH"), None);
        assert_eq!(normalize_reference_code("SE-ABCD-EFGHJ"), None);
    }

    #[test]
    fn test_base_content_type() {
        assert_eq!(base_content_type("text/plain; charset=utf-8"), "text/plain");
        assert_eq!(base_content_type("Application/PDF"), "application/pdf");
    }

    #[test]
    fn test_status_view_hides_storage_details() {
        let now = chrono::Utc::now();
        let entry = SecureEntry {
            id: Uuid::new_v4(),
            reference_code: "SE-ABCD-EFGH".into(),
            description: "Payments routed through a shell company".into(),
            file_path: Some("uploads/secure/x.pdf".into()),
            original_filename: Some("ledger.pdf".into()),
            content_type: Some("application/pdf".into()),
            file_size: Some(10),
            file_hash: None,
            qr_code_path: "uploads/qrcodes/x.svg".into(),
            status: crate::types::SecureEntryStatus::Received,
            created_at: now,
            updated_at: now,
        };
        let admin_json = serde_json::to_value(&entry).unwrap();
        assert!(admin_json.get("file_path").is_none());
        assert!(admin_json.get("qr_code_path").is_none());

        let view = serde_json::to_value(SecureEntryStatusView::from(entry)).unwrap();
        assert_eq!(view["has_attachment"], true);
        assert!(view.get("description").is_none());
    }
}
