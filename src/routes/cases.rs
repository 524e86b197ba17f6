use axum::{extract::State, http::StatusCode};
use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    db::set_actor,
    error::{
        validation::{validate_length, validate_optional, validate_pagination},
        AppError, AppResult, OptionExt,
    },
    extract::{Json, Path, Query},
    metrics::Metrics,
    state::AppState,
    tiers::Feature,
    types::{
        Case, CaseActivity, CaseList, CaseListQuery, CaseStatus, CreateCaseRequest, UpdateCaseRequest,
        MAX_ESCALATION_LEVEL,
    },
};

const CASE_NUMBER_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// `CASE-YYYYMMDD-XXXXXX` using the current UTC date.
pub fn generate_case_number() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| CASE_NUMBER_ALPHABET[rng.gen_range(0..CASE_NUMBER_ALPHABET.len())] as char)
        .collect();
    format!("CASE-{}-{}", Utc::now().format("%Y%m%d"), suffix)
}

/// Loads a case the caller may see. Other users' cases are reported as missing.
pub(crate) async fn load_visible_case(state: &AppState, user: &AuthUser, id: Uuid) -> AppResult<Case> {
    let case = sqlx::query_as::<_, Case>("SELECT * FROM cases WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("Case")?;
    if case.user_id != user.id && !user.is_admin() {
        return Err(AppError::NotFound("Case not found".to_string()));
    }
    Ok(case)
}

struct CaseFields {
    title: Option<String>,
    description: Option<String>,
    location: Option<String>,
    accused_party: Option<String>,
}

fn validate_title(title: &str) -> AppResult<String> {
    validate_length(title, "title", 3, 200)
}

fn validate_description(description: &str) -> AppResult<String> {
    validate_length(description, "description", 10, 10_000)
}

fn validate_incident_date(date: Option<chrono::NaiveDate>) -> AppResult<()> {
    match date {
        Some(d) if d > Utc::now().date_naive() => {
            Err(AppError::validation("incident_date", "Incident date cannot be in the future"))
        }
        _ => Ok(()),
    }
}

fn validate_update(req: &UpdateCaseRequest) -> AppResult<CaseFields> {
    validate_incident_date(req.incident_date)?;
    Ok(CaseFields {
        title: req.title.as_deref().map(validate_title).transpose()?,
        description: req.description.as_deref().map(validate_description).transpose()?,
        location: validate_optional(req.location.as_deref(), "location", 200)?,
        accused_party: validate_optional(req.accused_party.as_deref(), "accused_party", 200)?,
    })
}

#[utoipa::path(
    post,
    path = "/api/cases",
    tag = "cases",
    security(("bearer" = [])),
    request_body = CreateCaseRequest,
    responses(
        (status = 201, description = "Case filed", body = Case),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Active case limit of the tier reached")
    )
)]
pub async fn create_case(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateCaseRequest>,
) -> AppResult<(StatusCode, Json<Case>)> {
    let perms = state.permissions.require(&state.db, &user, Feature::CreateCase).await?;

    let title = validate_title(&req.title)?;
    let description = validate_description(&req.description)?;
    let location = validate_optional(req.location.as_deref(), "location", 200)?;
    let accused_party = validate_optional(req.accused_party.as_deref(), "accused_party", 200)?;
    validate_incident_date(req.incident_date)?;

    let mut tx = state.db.begin().await?;

    if let Some(limit) = perms.limit(Feature::CreateCase).filter(|_| !user.is_admin()) {
        // Serializes concurrent filings by the same user so the quota holds.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
            .bind(user.id.to_string())
            .execute(&mut *tx)
            .await?;
        let open: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM cases WHERE user_id = $1 AND status NOT IN ('closed', 'rejected')",
        )
        .bind(user.id)
        .fetch_one(&mut *tx)
        .await?;
        if open >= limit {
            return Err(AppError::TierRestricted {
                feature: Feature::CreateCase,
                current: perms.tier,
                required: None,
                limit: Some(limit),
            });
        }
    }

    set_actor(&mut tx, user.id).await?;
    let case = sqlx::query_as::<_, Case>(
        "INSERT INTO cases
            (id, user_id, case_number, title, description, category, location, incident_date, accused_party)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(user.id)
    .bind(generate_case_number())
    .bind(&title)
    .bind(&description)
    .bind(req.category.as_str())
    .bind(location.as_deref())
    .bind(req.incident_date)
    .bind(accused_party.as_deref())
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    Metrics::inc(&state.metrics.cases_created);
    tracing::info!(case_id = %case.id, case_number = %case.case_number, user_id = %user.id, "Case created");
    Ok((StatusCode::CREATED, Json(case)))
}

#[utoipa::path(
    get,
    path = "/api/cases",
    tag = "cases",
    security(("bearer" = [])),
    params(CaseListQuery),
    responses((status = 200, description = "Cases visible to the caller", body = CaseList))
)]
pub async fn list_cases(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<CaseListQuery>,
) -> AppResult<Json<CaseList>> {
    let (page, limit) = validate_pagination(q.page, q.limit)?;
    let owner = if user.is_admin() { None } else { Some(user.id) };
    let status = q.status.map(|s| s.as_str());
    let category = q.category.map(|c| c.as_str());

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM cases
         WHERE ($1::uuid IS NULL OR user_id = $1)
           AND ($2::text IS NULL OR status = $2)
           AND ($3::text IS NULL OR category = $3)",
    )
    .bind(owner)
    .bind(status)
    .bind(category)
    .fetch_one(&state.db)
    .await?;

    let items = sqlx::query_as::<_, Case>(
        "SELECT * FROM cases
         WHERE ($1::uuid IS NULL OR user_id = $1)
           AND ($2::text IS NULL OR status = $2)
           AND ($3::text IS NULL OR category = $3)
         ORDER BY created_at DESC, id
         LIMIT $4 OFFSET $5",
    )
    .bind(owner)
    .bind(status)
    .bind(category)
    .bind(limit)
    .bind((page - 1) * limit)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(CaseList { items, total, page, limit }))
}

#[utoipa::path(
    get,
    path = "/api/cases/{id}",
    tag = "cases",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Case id")),
    responses(
        (status = 200, description = "The case", body = Case),
        (status = 404, description = "Unknown case or not visible to the caller")
    )
)]
pub async fn get_case(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Case>> {
    Ok(Json(load_visible_case(&state, &user, id).await?))
}

#[utoipa::path(
    put,
    path = "/api/cases/{id}",
    tag = "cases",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Case id")),
    request_body = UpdateCaseRequest,
    responses(
        (status = 200, description = "Updated case", body = Case),
        (status = 400, description = "Invalid change or status transition"),
        (status = 403, description = "Status changes require an administrator")
    )
)]
pub async fn update_case(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCaseRequest>,
) -> AppResult<Json<Case>> {
    let case = load_visible_case(&state, &user, id).await?;

    if req.status.is_none() && !req.touches_content() {
        return Err(AppError::BadRequest("No changes supplied".to_string()));
    }
    if let Some(next) = req.status {
        if !user.is_admin() {
            return Err(AppError::Forbidden("Only administrators can change case status".to_string()));
        }
        if !case.status.can_transition_to(next) {
            return Err(AppError::BadRequest(format!(
                "Cannot move case from '{}' to '{}'",
                case.status, next
            )));
        }
    }
    if req.touches_content() {
        let editable = if user.is_admin() { case.status != CaseStatus::Closed } else { case.status.is_editable() };
        if !editable {
            return Err(AppError::BadRequest(format!(
                "Case content cannot be edited while it is '{}'",
                case.status
            )));
        }
    }
    let fields = validate_update(&req)?;

    let mut tx = state.db.begin().await?;
    set_actor(&mut tx, user.id).await?;
    // The status guard turns a concurrent change into a conflict instead of a lost update.
    let updated = sqlx::query_as::<_, Case>(
        "UPDATE cases SET
            title = COALESCE($2, title),
            description = COALESCE($3, description),
            category = COALESCE($4, category),
            location = COALESCE($5, location),
            incident_date = COALESCE($6, incident_date),
            accused_party = COALESCE($7, accused_party),
            status = COALESCE($8, status)
         WHERE id = $1 AND status = $9
         RETURNING *",
    )
    .bind(id)
    .bind(fields.title.as_deref())
    .bind(fields.description.as_deref())
    .bind(req.category.map(|c| c.as_str()))
    .bind(fields.location.as_deref())
    .bind(req.incident_date)
    .bind(fields.accused_party.as_deref())
    .bind(req.status.map(|s| s.as_str()))
    .bind(case.status.as_str())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::Conflict("Case was modified concurrently".to_string()))?;
    tx.commit().await?;

    if updated.status != case.status {
        tracing::info!(case_id = %id, from = %case.status, to = %updated.status, "Case status changed");
    }
    Ok(Json(updated))
}

#[utoipa::path(
    delete,
    path = "/api/cases/{id}",
    tag = "cases",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Case id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Only submitted cases can be withdrawn by their reporter")
    )
)]
pub async fn delete_case(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let case = load_visible_case(&state, &user, id).await?;
    if !user.is_admin() && case.status != CaseStatus::Submitted {
        return Err(AppError::Forbidden(
            "Cases can only be withdrawn while they are still submitted".to_string(),
        ));
    }

    let files: Vec<(String, String)> =
        sqlx::query_as("SELECT file_path, qr_code_path FROM documents WHERE case_id = $1")
            .bind(id)
            .fetch_all(&state.db)
            .await?;

    sqlx::query("DELETE FROM cases WHERE id = $1").bind(id).execute(&state.db).await?;

    for path in files.into_iter().flat_map(|(pdf, qr)| [pdf, qr]) {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!("Failed to remove {} after case deletion: {}", path, e);
        }
    }
    tracing::info!(case_id = %id, user_id = %user.id, "Case deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/cases/{id}/escalate",
    tag = "cases",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Case id")),
    responses(
        (status = 200, description = "Escalated case", body = Case),
        (status = 400, description = "Already at the highest level or case is finished"),
        (status = 403, description = "Tier does not allow escalation")
    )
)]
pub async fn escalate_case(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Case>> {
    state.permissions.require(&state.db, &user, Feature::CaseEscalation).await?;
    let case = load_visible_case(&state, &user, id).await?;

    if !case.status.is_open() {
        return Err(AppError::BadRequest(format!("A '{}' case cannot be escalated", case.status)));
    }
    if case.escalation_level >= MAX_ESCALATION_LEVEL {
        return Err(AppError::BadRequest("Case is already at the highest escalation level".to_string()));
    }

    let mut tx = state.db.begin().await?;
    set_actor(&mut tx, user.id).await?;
    let escalated = sqlx::query_as::<_, Case>(
        "UPDATE cases SET escalation_level = escalation_level + 1
         WHERE id = $1 AND escalation_level < $2 AND status NOT IN ('closed', 'rejected')
         RETURNING *",
    )
    .bind(id)
    .bind(MAX_ESCALATION_LEVEL)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::BadRequest("Case can no longer be escalated".to_string()))?;
    tx.commit().await?;

    tracing::info!(case_id = %id, level = escalated.escalation_level, "Case escalated");
    Ok(Json(escalated))
}

#[utoipa::path(
    get,
    path = "/api/cases/{id}/activities",
    tag = "cases",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Case id")),
    responses((status = 200, description = "Audit trail, oldest first", body = [CaseActivity]))
)]
pub async fn list_activities(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<CaseActivity>>> {
    load_visible_case(&state, &user, id).await?;
    let activities = sqlx::query_as::<_, CaseActivity>(
        "SELECT id, case_id, user_id, action, details, created_at
         FROM case_activities WHERE case_id = $1 ORDER BY id",
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(activities))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_number_format() {
        let number = generate_case_number();
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "CASE");
        assert_eq!(parts[1], Utc::now().format("%Y%m%d").to_string());
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].bytes().all(|b| CASE_NUMBER_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_validate_update_rejects_future_date() {
        let req = UpdateCaseRequest {
            incident_date: Some(Utc::now().date_naive() + chrono::Duration::days(2)),
            ..Default::default()
        };
        assert!(matches!(validate_update(&req), Err(AppError::ValidationError { ref field, .. }) if field == "incident_date"));
    }

    #[test]
    fn test_validate_update_trims() {
        let req = UpdateCaseRequest { title: Some("  Tender fraud  ".into()), ..Default::default() };
        let fields = validate_update(&req).unwrap();
        assert_eq!(fields.title.as_deref(), Some("Tender fraud"));
        assert!(fields.description.is_none());
    }
}
