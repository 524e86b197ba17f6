//! OpenAPI description of the `/api` surface, served at `/api-docs/openapi.json`.

use axum::{response::IntoResponse, Json};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::routes::{auth, cases, documents, secure_entry, tiers};
use crate::types::*;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "Casewatch API", description = "Case reporting, tiers, documents and anonymous secure entries"),
    modifiers(&BearerAuth),
    paths(
        auth::register,
        auth::login,
        auth::me,
        auth::update_wallet,
        auth::change_password,
        cases::create_case,
        cases::list_cases,
        cases::get_case,
        cases::update_case,
        cases::delete_case,
        cases::escalate_case,
        cases::list_activities,
        documents::generate_document,
        documents::list_documents,
        documents::get_document,
        documents::download_document,
        documents::register_document,
        documents::verify_document,
        documents::share_document,
        documents::list_shares,
        documents::revoke_share,
        documents::list_access_logs,
        tiers::current_tier,
        tiers::refresh_tier,
        tiers::tier_history,
        tiers::permission_matrix,
        tiers::set_user_tier,
        secure_entry::submit_entry,
        secure_entry::entry_status,
        secure_entry::list_entries,
        secure_entry::update_entry_status,
        secure_entry::download_entry_file
    ),
    components(schemas(
        UserDto,
        AuthResponse,
        RegisterRequest,
        LoginRequest,
        UpdateWalletRequest,
        ChangePasswordRequest,
        CaseCategory,
        CaseStatus,
        Case,
        CaseList,
        CreateCaseRequest,
        UpdateCaseRequest,
        CaseActivity,
        BlockchainStatus,
        DocumentDto,
        GenerateDocumentRequest,
        VerifyResponse,
        SharePermission,
        ShareDocumentRequest,
        DocumentShare,
        AccessLogEntry,
        TierInfo,
        TierRefreshResponse,
        TierHistoryEntry,
        SetTierRequest,
        SecureEntryStatus,
        SecureEntry,
        SecureEntryForm,
        SecureEntryReceipt,
        SecureEntryStatusView,
        SecureEntryList,
        UpdateSecureEntryStatusRequest,
        crate::tiers::Tier,
        crate::tiers::Feature,
        crate::tiers::Permission,
        crate::tiers::TierPermissions,
        crate::auth::Role
    )),
    tags(
        (name = "auth", description = "Accounts and sessions"),
        (name = "cases", description = "Case filing and lifecycle"),
        (name = "documents", description = "Case reports, verification and sharing"),
        (name = "tiers", description = "Balance-derived service tiers"),
        (name = "secure-entry", description = "Anonymous submissions")
    )
)]
pub struct ApiDoc;

pub async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
