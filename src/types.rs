//! Request/response bodies and database row types.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::Role;
use crate::documents::public_url;
use crate::tiers::{Tier, TierPermissions};

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Snake-case string enums stored as TEXT columns.
macro_rules! text_enum {
    ($name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = UnknownVariant;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Users and auth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub wallet_address: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn role(&self) -> Role {
        Role::parse(&self.role).unwrap_or(Role::User)
    }

    pub fn into_dto(self, tier: Tier) -> UserDto {
        let role = self.role();
        UserDto {
            id: self.id,
            email: self.email,
            full_name: self.full_name,
            wallet_address: self.wallet_address,
            role,
            tier,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserDto {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub wallet_address: Option<String>,
    pub role: Role,
    pub tier: Tier,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub wallet_address: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserDto,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateWalletRequest {
    pub wallet_address: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

// ---------------------------------------------------------------------------
// Cases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CaseCategory {
    Bribery,
    Embezzlement,
    Fraud,
    AbuseOfPower,
    Nepotism,
    Other,
}

text_enum!(CaseCategory, "case category" {
    Bribery => "bribery",
    Embezzlement => "embezzlement",
    Fraud => "fraud",
    AbuseOfPower => "abuse_of_power",
    Nepotism => "nepotism",
    Other => "other",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Submitted,
    UnderReview,
    Investigating,
    Resolved,
    Closed,
    Rejected,
}

text_enum!(CaseStatus, "case status" {
    Submitted => "submitted",
    UnderReview => "under_review",
    Investigating => "investigating",
    Resolved => "resolved",
    Closed => "closed",
    Rejected => "rejected",
});

impl CaseStatus {
    /// Allowed lifecycle edges.
    pub fn can_transition_to(self, next: CaseStatus) -> bool {
        use CaseStatus::*;
        matches!(
            (self, next),
            (Submitted, UnderReview)
                | (Submitted, Rejected)
                | (UnderReview, Investigating)
                | (UnderReview, Resolved)
                | (UnderReview, Rejected)
                | (Investigating, Resolved)
                | (Investigating, Rejected)
                | (Resolved, Closed)
                | (Rejected, Closed)
        )
    }

    /// Content may still be edited by the reporter.
    pub fn is_editable(self) -> bool {
        matches!(self, CaseStatus::Submitted | CaseStatus::UnderReview)
    }

    /// Counts against the tier's case quota.
    pub fn is_open(self) -> bool {
        !matches!(self, CaseStatus::Closed | CaseStatus::Rejected)
    }
}

pub const MAX_ESCALATION_LEVEL: i32 = 3;

#[derive(Debug, Clone, Serialize, ToSchema, sqlx::FromRow)]
pub struct Case {
    pub id: Uuid,
    pub user_id: Uuid,
    pub case_number: String,
    pub title: String,
    pub description: String,
    #[sqlx(try_from = "String")]
    pub category: CaseCategory,
    pub location: Option<String>,
    pub incident_date: Option<NaiveDate>,
    pub accused_party: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: CaseStatus,
    pub escalation_level: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCaseRequest {
    pub title: String,
    pub description: String,
    pub category: CaseCategory,
    pub location: Option<String>,
    pub incident_date: Option<NaiveDate>,
    pub accused_party: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateCaseRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<CaseCategory>,
    pub location: Option<String>,
    pub incident_date: Option<NaiveDate>,
    pub accused_party: Option<String>,
    /// Administrators only.
    pub status: Option<CaseStatus>,
}

impl UpdateCaseRequest {
    pub fn touches_content(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.category.is_some()
            || self.location.is_some()
            || self.incident_date.is_some()
            || self.accused_party.is_some()
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct CaseListQuery {
    pub status: Option<CaseStatus>,
    pub category: Option<CaseCategory>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CaseList {
    pub items: Vec<Case>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Serialize, ToSchema, sqlx::FromRow)]
pub struct CaseActivity {
    pub id: i64,
    pub case_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BlockchainStatus {
    NotRegistered,
    Registered,
    Failed,
}

text_enum!(BlockchainStatus, "blockchain status" {
    NotRegistered => "not_registered",
    Registered => "registered",
    Failed => "failed",
});

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentRow {
    pub id: Uuid,
    pub case_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub file_path: String,
    pub file_hash: String,
    pub file_size: i64,
    pub qr_code_path: String,
    #[sqlx(try_from = "String")]
    pub blockchain_status: BlockchainStatus,
    pub blockchain_tx_hash: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DocumentRow {
    pub fn to_dto(&self, uploads_root: &Path) -> DocumentDto {
        DocumentDto {
            id: self.id,
            case_id: self.case_id,
            user_id: self.user_id,
            title: self.title.clone(),
            file_hash: self.file_hash.clone(),
            file_size: self.file_size,
            qr_code_url: public_url(uploads_root, Path::new(&self.qr_code_path)),
            download_url: format!("/api/documents/{}/download", self.id),
            blockchain_status: self.blockchain_status,
            blockchain_tx_hash: self.blockchain_tx_hash.clone(),
            registered_at: self.registered_at,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DocumentDto {
    pub id: Uuid,
    pub case_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    /// Lowercase hex SHA-256 of the PDF bytes.
    pub file_hash: String,
    pub file_size: i64,
    pub qr_code_url: String,
    pub download_url: String,
    pub blockchain_status: BlockchainStatus,
    pub blockchain_tx_hash: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GenerateDocumentRequest {
    pub case_id: Uuid,
    pub title: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct DocumentListQuery {
    pub case_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyResponse {
    /// `true` when the hash belongs to a document issued by this service.
    pub verified: bool,
    pub case_number: String,
    pub document: DocumentDto,
    /// Receipt status read from the chain: `None` when unknown or pending.
    pub on_chain_confirmed: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SharePermission {
    View,
    Download,
}

text_enum!(SharePermission, "share permission" {
    View => "view",
    Download => "download",
});

#[derive(Debug, Deserialize, ToSchema)]
pub struct ShareDocumentRequest {
    pub email: String,
    pub permission: SharePermission,
    /// Omit for a share that never expires.
    pub expires_in_hours: Option<i64>,
}

#[derive(Debug, Clone, Serialize, ToSchema, sqlx::FromRow)]
pub struct DocumentShare {
    pub id: Uuid,
    pub document_id: Uuid,
    pub shared_by: Uuid,
    pub shared_with_email: String,
    #[sqlx(try_from = "String")]
    pub permission: SharePermission,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DocumentShare {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.map(|e| e > now).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessAction {
    View,
    Download,
    Share,
    Register,
    Verify,
}

impl AccessAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessAction::View => "view",
            AccessAction::Download => "download",
            AccessAction::Share => "share",
            AccessAction::Register => "register",
            AccessAction::Verify => "verify",
        }
    }
}

#[derive(Debug, Serialize, ToSchema, sqlx::FromRow)]
pub struct AccessLogEntry {
    pub id: i64,
    pub document_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub ip_address: Option<String>,
    pub accessed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct TierInfo {
    pub tier: Tier,
    pub label: String,
    pub wallet_address: Option<String>,
    /// Balance recorded at the last assignment, in wei.
    pub balance_wei: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub permissions: TierPermissions,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TierRefreshResponse {
    pub previous_tier: Tier,
    pub tier: Tier,
    pub changed: bool,
    pub balance_wei: String,
    pub balance_eth: String,
}

#[derive(Debug, Serialize, ToSchema, sqlx::FromRow)]
pub struct TierHistoryEntry {
    pub id: Uuid,
    pub old_tier: Option<String>,
    pub new_tier: String,
    pub reason: String,
    pub balance_wei: Option<String>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetTierRequest {
    pub tier: Tier,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Secure entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecureEntryStatus {
    Received,
    Reviewing,
    Closed,
}

text_enum!(SecureEntryStatus, "secure entry status" {
    Received => "received",
    Reviewing => "reviewing",
    Closed => "closed",
});

#[derive(Debug, Clone, Serialize, ToSchema, sqlx::FromRow)]
pub struct SecureEntry {
    pub id: Uuid,
    pub reference_code: String,
    pub description: String,
    #[serde(skip)]
    pub file_path: Option<String>,
    pub original_filename: Option<String>,
    pub content_type: Option<String>,
    pub file_size: Option<i64>,
    pub file_hash: Option<String>,
    #[serde(skip)]
    pub qr_code_path: String,
    #[sqlx(try_from = "String")]
    pub status: SecureEntryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Multipart form accepted by `POST /api/secure-entry` (documentation only).
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct SecureEntryForm {
    pub description: String,
    #[schema(value_type = Option<String>, format = Binary)]
    pub file: Option<Vec<u8>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SecureEntryReceipt {
    pub reference_code: String,
    pub qr_code_url: String,
    pub status_url: String,
    pub created_at: DateTime<Utc>,
}

/// What an anonymous submitter can see about their entry.
#[derive(Debug, Serialize, ToSchema)]
pub struct SecureEntryStatusView {
    pub reference_code: String,
    pub status: SecureEntryStatus,
    pub has_attachment: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SecureEntry> for SecureEntryStatusView {
    fn from(e: SecureEntry) -> Self {
        Self {
            reference_code: e.reference_code,
            status: e.status,
            has_attachment: e.file_path.is_some(),
            created_at: e.created_at,
            updated_at: e.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SecureEntryList {
    pub items: Vec<SecureEntry>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateSecureEntryStatusRequest {
    pub status: SecureEntryStatus,
}
