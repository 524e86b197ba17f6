//! Account tiers and the feature permissions they grant.
//!
//! A user's tier is derived from the Ethereum balance of the wallet linked to the
//! account. Each tier maps to a row set in `tier_permissions`; lookups go through a
//! small LRU cache because every gated request needs one.

use std::{fmt, num::NonZeroUsize, str::FromStr, sync::Arc};

use lru::LruCache;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::Mutex;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{AuthUser, Role};
use crate::error::{AppError, AppResult, OptionExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
pub enum Tier {
    #[serde(rename = "tier_1")]
    Tier1,
    #[serde(rename = "tier_2")]
    Tier2,
    #[serde(rename = "tier_3")]
    Tier3,
    #[serde(rename = "tier_4")]
    Tier4,
}

pub const ALL_TIERS: [Tier; 4] = [Tier::Tier1, Tier::Tier2, Tier::Tier3, Tier::Tier4];

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Tier1 => "tier_1",
            Tier::Tier2 => "tier_2",
            Tier::Tier3 => "tier_3",
            Tier::Tier4 => "tier_4",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::Tier1 => "Tier 1",
            Tier::Tier2 => "Tier 2",
            Tier::Tier3 => "Tier 3",
            Tier::Tier4 => "Tier 4",
        }
    }

    /// Minimum balance in wei that qualifies for this tier.
    pub fn threshold_wei(&self) -> U256 {
        match self {
            Tier::Tier1 => U256::zero(),
            // 0.1 ETH
            Tier::Tier2 => U256::exp10(17),
            // 1 ETH
            Tier::Tier3 => U256::exp10(18),
            // 10 ETH
            Tier::Tier4 => U256::exp10(19),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown tier '{0}'")]
pub struct UnknownTier(pub String);

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tier_1" => Ok(Tier::Tier1),
            "tier_2" => Ok(Tier::Tier2),
            "tier_3" => Ok(Tier::Tier3),
            "tier_4" => Ok(Tier::Tier4),
            other => Err(UnknownTier(other.to_string())),
        }
    }
}

impl TryFrom<String> for Tier {
    type Error = UnknownTier;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Highest tier whose threshold the balance reaches.
pub fn tier_for_balance(balance_wei: U256) -> Tier {
    ALL_TIERS
        .iter()
        .rev()
        .copied()
        .find(|tier| balance_wei >= tier.threshold_wei())
        .unwrap_or(Tier::Tier1)
}

/// Renders a wei amount as a decimal ETH string with up to 6 fractional digits.
pub fn format_eth(balance_wei: U256) -> String {
    let unit = U256::exp10(18);
    let whole = balance_wei / unit;
    let frac = (balance_wei % unit) / U256::exp10(12);
    let frac = format!("{:06}", frac.low_u64());
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, frac)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    CreateCase,
    GenerateDocument,
    BlockchainRegistration,
    ShareDocument,
    CaseEscalation,
}

pub const ALL_FEATURES: [Feature; 5] = [
    Feature::CreateCase,
    Feature::GenerateDocument,
    Feature::BlockchainRegistration,
    Feature::ShareDocument,
    Feature::CaseEscalation,
];

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::CreateCase => "create_case",
            Feature::GenerateDocument => "generate_document",
            Feature::BlockchainRegistration => "blockchain_registration",
            Feature::ShareDocument => "share_document",
            Feature::CaseEscalation => "case_escalation",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_FEATURES
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown feature '{}'", s))
    }
}

/// A single feature grant. `limit` is a quota where one applies; `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct Permission {
    pub feature: Feature,
    pub enabled: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TierPermissions {
    pub tier: Tier,
    pub permissions: Vec<Permission>,
}

impl TierPermissions {
    /// The built-in matrix, also seeded into `tier_permissions` by the migrations.
    pub fn defaults(tier: Tier) -> Self {
        let at_least = |min: Tier| tier >= min;
        let case_limit = match tier {
            Tier::Tier1 => Some(3),
            Tier::Tier2 => Some(10),
            Tier::Tier3 => Some(50),
            Tier::Tier4 => None,
        };
        let permissions = ALL_FEATURES
            .iter()
            .map(|&feature| match feature {
                Feature::CreateCase => Permission { feature, enabled: true, limit: case_limit },
                Feature::GenerateDocument => {
                    Permission { feature, enabled: at_least(Tier::Tier2), limit: None }
                }
                Feature::BlockchainRegistration | Feature::ShareDocument | Feature::CaseEscalation => {
                    Permission { feature, enabled: at_least(Tier::Tier3), limit: None }
                }
            })
            .collect();
        Self { tier, permissions }
    }

    pub fn get(&self, feature: Feature) -> Option<&Permission> {
        self.permissions.iter().find(|p| p.feature == feature)
    }

    pub fn allows(&self, feature: Feature) -> bool {
        self.get(feature).map(|p| p.enabled).unwrap_or(false)
    }

    pub fn limit(&self, feature: Feature) -> Option<i64> {
        self.get(feature).and_then(|p| p.limit)
    }
}

/// Resolves tier permissions from the database with an in-process LRU cache.
#[derive(Clone)]
pub struct PermissionStore {
    cache: Arc<Mutex<LruCache<Tier, TierPermissions>>>,
}

impl Default for PermissionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionStore {
    pub fn new() -> Self {
        let cap = NonZeroUsize::new(ALL_TIERS.len()).unwrap_or(NonZeroUsize::MIN);
        Self { cache: Arc::new(Mutex::new(LruCache::new(cap))) }
    }

    /// Permissions for `tier`. Rows missing in the table fall back to the defaults.
    pub async fn for_tier(&self, db: &PgPool, tier: Tier) -> AppResult<TierPermissions> {
        if let Some(hit) = self.cache.lock().await.get(&tier) {
            return Ok(hit.clone());
        }

        let rows: Vec<(String, bool, Option<i64>)> = sqlx::query_as(
            "SELECT feature, enabled, limit_value FROM tier_permissions WHERE tier = $1",
        )
        .bind(tier.as_str())
        .fetch_all(db)
        .await?;

        let mut resolved = TierPermissions::defaults(tier);
        for (feature, enabled, limit) in rows {
            match feature.parse::<Feature>() {
                Ok(feature) => {
                    if let Some(p) = resolved.permissions.iter_mut().find(|p| p.feature == feature) {
                        p.enabled = enabled;
                        p.limit = limit;
                    }
                }
                Err(e) => tracing::warn!("Ignoring tier_permissions row: {}", e),
            }
        }

        self.cache.lock().await.put(tier, resolved.clone());
        Ok(resolved)
    }

    pub async fn all(&self, db: &PgPool) -> AppResult<Vec<TierPermissions>> {
        let mut out = Vec::with_capacity(ALL_TIERS.len());
        for tier in ALL_TIERS {
            out.push(self.for_tier(db, tier).await?);
        }
        Ok(out)
    }

    /// Fails with `TierRestricted` unless the caller's active tier enables `feature`.
    /// Admins pass every gate. Returns the caller's tier permissions.
    pub async fn require(
        &self,
        db: &PgPool,
        user: &AuthUser,
        feature: Feature,
    ) -> AppResult<TierPermissions> {
        let tier = active_tier(db, user.id).await?;
        let perms = self.for_tier(db, tier).await?;
        if user.role == Role::Admin || perms.allows(feature) {
            return Ok(perms);
        }

        let mut required = None;
        for candidate in ALL_TIERS.iter().copied().filter(|t| *t > tier) {
            if self.for_tier(db, candidate).await?.allows(feature) {
                required = Some(candidate);
                break;
            }
        }
        Err(AppError::TierRestricted { feature, current: tier, required, limit: None })
    }
}

/// The user's active tier. Users without a tier row are treated as Tier 1.
pub async fn active_tier(db: &PgPool, user_id: Uuid) -> AppResult<Tier> {
    let tier: Option<String> =
        sqlx::query_scalar("SELECT tier FROM user_tiers WHERE user_id = $1 AND is_active")
            .bind(user_id)
            .fetch_optional(db)
            .await?;
    match tier {
        Some(t) => t.parse().map_err(|e: UnknownTier| AppError::Internal(anyhow::anyhow!(e))),
        None => Ok(Tier::Tier1),
    }
}

/// Locks the user row for the rest of `tx` and returns the active tier.
///
/// Tier changes for one user serialize on this lock, so the active row a change
/// reads is still the active row when it swaps it out.
pub async fn lock_active_tier(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> AppResult<Tier> {
    sqlx::query_scalar::<_, i32>("SELECT 1 FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_not_found("User")?;
    let tier: Option<String> =
        sqlx::query_scalar("SELECT tier FROM user_tiers WHERE user_id = $1 AND is_active")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?;
    match tier {
        Some(t) => t.parse().map_err(|e: UnknownTier| AppError::Internal(anyhow::anyhow!(e))),
        None => Ok(Tier::Tier1),
    }
}

/// Replaces the active tier of `user_id` and appends a history row.
///
/// Runs inside the caller's transaction so the swap and the history entry commit together.
pub async fn assign_tier(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    new_tier: Tier,
    balance_wei: Option<U256>,
    reason: &str,
) -> AppResult<Option<Tier>> {
    lock_active_tier(tx, user_id).await?;
    let old: Option<String> = sqlx::query_scalar(
        "UPDATE user_tiers SET is_active = FALSE WHERE user_id = $1 AND is_active RETURNING tier",
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?;
    let old_tier = old.and_then(|t| t.parse::<Tier>().ok());
    let balance = balance_wei.map(|b| b.to_string());

    sqlx::query(
        "INSERT INTO user_tiers (id, user_id, tier, balance_wei, is_active) VALUES ($1, $2, $3, $4, TRUE)",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(new_tier.as_str())
    .bind(balance.as_deref())
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "INSERT INTO tier_history (id, user_id, old_tier, new_tier, reason, balance_wei)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(old_tier.map(|t| t.as_str()))
    .bind(new_tier.as_str())
    .bind(reason)
    .bind(balance.as_deref())
    .execute(&mut **tx)
    .await?;

    tracing::info!(%user_id, from = ?old_tier, to = %new_tier, reason, "Tier assigned");
    Ok(old_tier)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth(n: u64) -> U256 {
        U256::from(n) * U256::exp10(18)
    }

    #[test]
    fn test_tier_thresholds() {
        assert_eq!(tier_for_balance(U256::zero()), Tier::Tier1);
        assert_eq!(tier_for_balance(U256::exp10(17) - U256::one()), Tier::Tier1);
        assert_eq!(tier_for_balance(U256::exp10(17)), Tier::Tier2);
        assert_eq!(tier_for_balance(eth(1)), Tier::Tier3);
        assert_eq!(tier_for_balance(eth(9)), Tier::Tier3);
        assert_eq!(tier_for_balance(eth(10)), Tier::Tier4);
        assert_eq!(tier_for_balance(eth(5000)), Tier::Tier4);
    }

    #[test]
    fn test_tier_string_forms() {
        for tier in ALL_TIERS {
            assert_eq!(tier.as_str().parse::<Tier>().unwrap(), tier);
        }
        assert!("tier_5".parse::<Tier>().is_err());
        assert_eq!(serde_json::to_string(&Tier::Tier3).unwrap(), "\"tier_3\"");
        assert_eq!(Tier::Tier2.label(), "Tier 2");
    }

    #[test]
    fn test_default_matrix() {
        let t1 = TierPermissions::defaults(Tier::Tier1);
        assert!(t1.allows(Feature::CreateCase));
        assert_eq!(t1.limit(Feature::CreateCase), Some(3));
        assert!(!t1.allows(Feature::GenerateDocument));

        let t2 = TierPermissions::defaults(Tier::Tier2);
        assert!(t2.allows(Feature::GenerateDocument));
        assert!(!t2.allows(Feature::BlockchainRegistration));

        let t3 = TierPermissions::defaults(Tier::Tier3);
        assert!(t3.allows(Feature::BlockchainRegistration));
        assert!(t3.allows(Feature::ShareDocument));
        assert!(t3.allows(Feature::CaseEscalation));

        let t4 = TierPermissions::defaults(Tier::Tier4);
        assert_eq!(t4.limit(Feature::CreateCase), None);
    }

    #[test]
    fn test_format_eth() {
        assert_eq!(format_eth(U256::zero()), "0");
        assert_eq!(format_eth(eth(2)), "2");
        assert_eq!(format_eth(U256::exp10(17) * U256::from(15u64)), "1.5");
        assert_eq!(format_eth(U256::from(1_234_567_000_000_000_000u64)), "1.234567");
    }
}
