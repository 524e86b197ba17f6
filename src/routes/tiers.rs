use axum::extract::State;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{
        validation::{validate_length, validate_pagination},
        AppError, AppResult,
    },
    extract::{Json, Path, Query},
    routes::auth::load_user,
    state::AppState,
    tiers::{active_tier, assign_tier, format_eth, lock_active_tier, tier_for_balance, TierPermissions},
    types::{PageQuery, SetTierRequest, TierHistoryEntry, TierInfo, TierRefreshResponse},
};

async fn tier_info(state: &AppState, user_id: Uuid) -> AppResult<TierInfo> {
    let user = load_user(state, user_id).await?;
    let tier = active_tier(&state.db, user_id).await?;
    let row: Option<(Option<String>, DateTime<Utc>)> = sqlx::query_as(
        "SELECT balance_wei, assigned_at FROM user_tiers WHERE user_id = $1 AND is_active",
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await?;
    let (balance_wei, assigned_at) = match row {
        Some((balance, at)) => (balance, Some(at)),
        None => (None, None),
    };

    Ok(TierInfo {
        tier,
        label: tier.label().to_string(),
        wallet_address: user.wallet_address,
        balance_wei,
        assigned_at,
        permissions: state.permissions.for_tier(&state.db, tier).await?,
    })
}

#[utoipa::path(
    get,
    path = "/api/tiers/current",
    tag = "tiers",
    security(("bearer" = [])),
    responses((status = 200, description = "Active tier and what it grants", body = TierInfo))
)]
pub async fn current_tier(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<TierInfo>> {
    Ok(Json(tier_info(&state, user.id).await?))
}

#[utoipa::path(
    post,
    path = "/api/tiers/refresh",
    tag = "tiers",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Tier recomputed from the wallet balance", body = TierRefreshResponse),
        (status = 400, description = "No wallet linked"),
        (status = 502, description = "RPC node failure"),
        (status = 503, description = "Blockchain integration disabled")
    )
)]
pub async fn refresh_tier(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<TierRefreshResponse>> {
    let row = load_user(&state, user.id).await?;
    let wallet = row
        .wallet_address
        .ok_or_else(|| AppError::BadRequest("Link a wallet address before refreshing the tier".to_string()))?;

    let balance = state.chain.balance_of(&wallet).await?;
    let computed = tier_for_balance(balance);

    let mut tx = state.db.begin().await?;
    let previous = lock_active_tier(&mut tx, user.id).await?;
    if computed != previous {
        assign_tier(&mut tx, user.id, computed, Some(balance), "balance_refresh").await?;
    } else {
        sqlx::query("UPDATE user_tiers SET balance_wei = $1 WHERE user_id = $2 AND is_active")
            .bind(balance.to_string())
            .bind(user.id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    Ok(Json(TierRefreshResponse {
        previous_tier: previous,
        tier: computed,
        changed: computed != previous,
        balance_wei: balance.to_string(),
        balance_eth: format_eth(balance),
    }))
}

#[utoipa::path(
    get,
    path = "/api/tiers/history",
    tag = "tiers",
    security(("bearer" = [])),
    params(PageQuery),
    responses((status = 200, description = "Tier changes, newest first", body = [TierHistoryEntry]))
)]
pub async fn tier_history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<PageQuery>,
) -> AppResult<Json<Vec<TierHistoryEntry>>> {
    let (page, limit) = validate_pagination(q.page, q.limit)?;
    let entries = sqlx::query_as::<_, TierHistoryEntry>(
        "SELECT id, old_tier, new_tier, reason, balance_wei, changed_at
         FROM tier_history WHERE user_id = $1
         ORDER BY changed_at DESC, id
         LIMIT $2 OFFSET $3",
    )
    .bind(user.id)
    .bind(limit)
    .bind((page - 1) * limit)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(entries))
}

#[utoipa::path(
    get,
    path = "/api/tiers/permissions",
    tag = "tiers",
    security(("bearer" = [])),
    responses((status = 200, description = "Permission matrix for every tier", body = [TierPermissions]))
)]
pub async fn permission_matrix(State(state): State<AppState>) -> AppResult<Json<Vec<TierPermissions>>> {
    Ok(Json(state.permissions.all(&state.db).await?))
}

#[utoipa::path(
    put,
    path = "/api/tiers/users/{id}",
    tag = "tiers",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "User id")),
    request_body = SetTierRequest,
    responses(
        (status = 200, description = "Tier overridden", body = TierInfo),
        (status = 403, description = "Administrator role required"),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn set_user_tier(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<SetTierRequest>,
) -> AppResult<Json<TierInfo>> {
    let reason = validate_length(&req.reason, "reason", 1, 500)?;
    load_user(&state, id).await?;

    let mut tx = state.db.begin().await?;
    assign_tier(&mut tx, id, req.tier, None, &format!("admin_override: {}", reason)).await?;
    tx.commit().await?;

    tracing::info!(admin_id = %admin.id, user_id = %id, tier = %req.tier, "Tier overridden by administrator");
    Ok(Json(tier_info(&state, id).await?))
}
