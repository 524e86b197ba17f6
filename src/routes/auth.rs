use axum::{extract::State, http::StatusCode};
use uuid::Uuid;

use crate::{
    auth::{hash_password, issue_token, verify_password, verify_unknown_account, AuthUser, Role},
    error::{
        validation::{validate_email, validate_length, validate_password, validate_wallet_address},
        AppError, AppResult, OptionExt,
    },
    extract::Json,
    metrics::Metrics,
    middleware::ip::ClientIp,
    state::AppState,
    tiers::{active_tier, assign_tier, Tier},
    types::{
        AuthResponse, ChangePasswordRequest, LoginRequest, RegisterRequest, UpdateWalletRequest, UserDto,
        UserRow,
    },
};

const INVALID_CREDENTIALS: &str = "Invalid email or password";

pub(crate) async fn load_user(state: &AppState, id: Uuid) -> AppResult<UserRow> {
    sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("User")
}

fn token_for(state: &AppState, user: &UserRow) -> AppResult<String> {
    issue_token(
        user.id,
        &user.email,
        user.role(),
        &state.config.auth.jwt_secret,
        state.config.auth.token_ttl_hours,
    )
}

/// Argon2 is deliberately slow; keep it off the async workers.
async fn hash_blocking(password: String) -> AppResult<String> {
    let hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(anyhow::Error::from)??;
    Ok(hash)
}

/// Verifies off the async runtime. `None` checks against the unknown-account hash.
async fn verify_blocking(password: String, hash: Option<String>) -> AppResult<bool> {
    let ok = tokio::task::spawn_blocking(move || match hash {
        Some(hash) => verify_password(&password, &hash),
        None => verify_unknown_account(&password),
    })
    .await
    .map_err(anyhow::Error::from)?;
    Ok(ok)
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Email already registered"),
        (status = 429, description = "Too many registrations from this address")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    state.rate_limiter.check("/api/auth/register", ip).await?;

    let email = validate_email(&req.email)?;
    validate_password(&req.password, state.config.auth.min_password_length)?;
    let full_name = validate_length(&req.full_name, "full_name", 1, 120)?;
    let wallet = req.wallet_address.as_deref().map(validate_wallet_address).transpose()?;

    let password_hash = hash_blocking(req.password).await?;

    let mut tx = state.db.begin().await?;
    let user = sqlx::query_as::<_, UserRow>(
        "INSERT INTO users (id, email, password_hash, full_name, wallet_address, role)
         VALUES ($1, $2, $3, $4, $5, 'user')
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(&email)
    .bind(&password_hash)
    .bind(&full_name)
    .bind(wallet.as_deref())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::Conflict("Email is already registered".to_string()),
        other => other,
    })?;
    assign_tier(&mut tx, user.id, Tier::Tier1, None, "registration").await?;
    tx.commit().await?;

    Metrics::inc(&state.metrics.users_registered);
    tracing::info!(user_id = %user.id, "User registered");

    let token = token_for(&state, &user)?;
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user: user.into_dto(Tier::Tier1) })))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 429, description = "Too many attempts")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    state.rate_limiter.check("/api/auth/login", ip).await?;

    let email = req.email.trim().to_lowercase();
    let user = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    let verified = verify_blocking(req.password, user.as_ref().map(|u| u.password_hash.clone())).await?;
    let user = match user {
        Some(user) if verified => user,
        _ => {
            Metrics::inc(&state.metrics.failed_logins);
            tracing::warn!(%ip, "Failed login attempt");
            return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        }
    };

    Metrics::inc(&state.metrics.logins);
    let tier = active_tier(&state.db, user.id).await?;
    let token = token_for(&state, &user)?;
    Ok(Json(AuthResponse { token, user: user.into_dto(tier) }))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Current user", body = UserDto),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn me(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<UserDto>> {
    let row = load_user(&state, user.id).await?;
    let tier = active_tier(&state.db, user.id).await?;
    Ok(Json(row.into_dto(tier)))
}

#[utoipa::path(
    put,
    path = "/api/auth/wallet",
    tag = "auth",
    security(("bearer" = [])),
    request_body = UpdateWalletRequest,
    responses(
        (status = 200, description = "Wallet linked", body = UserDto),
        (status = 400, description = "Malformed address")
    )
)]
pub async fn update_wallet(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<UpdateWalletRequest>,
) -> AppResult<Json<UserDto>> {
    let wallet = validate_wallet_address(&req.wallet_address)?;
    let row = sqlx::query_as::<_, UserRow>(
        "UPDATE users SET wallet_address = $1 WHERE id = $2 RETURNING *",
    )
    .bind(&wallet)
    .bind(user.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_not_found("User")?;

    tracing::info!(user_id = %user.id, "Wallet address updated");
    let tier = active_tier(&state.db, user.id).await?;
    Ok(Json(row.into_dto(tier)))
}

#[utoipa::path(
    put,
    path = "/api/auth/password",
    tag = "auth",
    security(("bearer" = [])),
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "Current password wrong or new password invalid")
    )
)]
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<ChangePasswordRequest>,
) -> AppResult<StatusCode> {
    let row = load_user(&state, user.id).await?;
    if !verify_blocking(req.current_password, Some(row.password_hash)).await? {
        return Err(AppError::validation("current_password", "Current password is incorrect"));
    }
    validate_password(&req.new_password, state.config.auth.min_password_length)?;

    let hash = hash_blocking(req.new_password).await?;
    sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
        .bind(&hash)
        .bind(user.id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %user.id, "Password changed");
    Ok(StatusCode::NO_CONTENT)
}

/// Grants the administrator role to the account registered under `email`.
pub async fn grant_admin(db: &sqlx::PgPool, email: &str) -> AppResult<Uuid> {
    let email = validate_email(email)?;
    sqlx::query_scalar::<_, Uuid>("UPDATE users SET role = $1 WHERE email = $2 RETURNING id")
        .bind(Role::Admin.as_str())
        .bind(&email)
        .fetch_optional(db)
        .await?
        .ok_or_not_found("User")
}
