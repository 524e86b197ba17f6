//! Schema migrations.
//!
//! Each step runs inside its own transaction and is recorded in `schema_migrations`;
//! a failing step rolls back and aborts startup. Steps are append-only.

use sqlx::{Connection, Executor, PgConnection, PgPool};

pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "users",
        sql: r#"
            CREATE OR REPLACE FUNCTION touch_updated_at() RETURNS TRIGGER AS $$
            BEGIN
                NEW.updated_at = NOW();
                RETURN NEW;
            END;
            $$ LANGUAGE plpgsql;

            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                full_name TEXT NOT NULL,
                wallet_address TEXT NULL CHECK (wallet_address ~ '^0x[0-9a-f]{40}$'),
                role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE TRIGGER users_touch_updated_at
                BEFORE UPDATE ON users
                FOR EACH ROW EXECUTE FUNCTION touch_updated_at();
        "#,
    },
    Migration {
        version: 2,
        name: "tiers",
        sql: r#"
            CREATE TABLE IF NOT EXISTS user_tiers (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                tier TEXT NOT NULL CHECK (tier IN ('tier_1', 'tier_2', 'tier_3', 'tier_4')),
                balance_wei TEXT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                assigned_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE UNIQUE INDEX IF NOT EXISTS uq_user_tiers_one_active
                ON user_tiers(user_id) WHERE is_active;

            CREATE TABLE IF NOT EXISTS tier_permissions (
                tier TEXT NOT NULL CHECK (tier IN ('tier_1', 'tier_2', 'tier_3', 'tier_4')),
                feature TEXT NOT NULL,
                enabled BOOLEAN NOT NULL,
                limit_value BIGINT NULL CHECK (limit_value IS NULL OR limit_value >= 0),
                PRIMARY KEY (tier, feature)
            );

            INSERT INTO tier_permissions (tier, feature, enabled, limit_value) VALUES
                ('tier_1', 'create_case', TRUE, 3),
                ('tier_1', 'generate_document', FALSE, NULL),
                ('tier_1', 'blockchain_registration', FALSE, NULL),
                ('tier_1', 'share_document', FALSE, NULL),
                ('tier_1', 'case_escalation', FALSE, NULL),
                ('tier_2', 'create_case', TRUE, 10),
                ('tier_2', 'generate_document', TRUE, NULL),
                ('tier_2', 'blockchain_registration', FALSE, NULL),
                ('tier_2', 'share_document', FALSE, NULL),
                ('tier_2', 'case_escalation', FALSE, NULL),
                ('tier_3', 'create_case', TRUE, 50),
                ('tier_3', 'generate_document', TRUE, NULL),
                ('tier_3', 'blockchain_registration', TRUE, NULL),
                ('tier_3', 'share_document', TRUE, NULL),
                ('tier_3', 'case_escalation', TRUE, NULL),
                ('tier_4', 'create_case', TRUE, NULL),
                ('tier_4', 'generate_document', TRUE, NULL),
                ('tier_4', 'blockchain_registration', TRUE, NULL),
                ('tier_4', 'share_document', TRUE, NULL),
                ('tier_4', 'case_escalation', TRUE, NULL)
            ON CONFLICT (tier, feature) DO NOTHING;

            CREATE TABLE IF NOT EXISTS tier_history (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                old_tier TEXT NULL,
                new_tier TEXT NOT NULL CHECK (new_tier IN ('tier_1', 'tier_2', 'tier_3', 'tier_4')),
                reason TEXT NOT NULL,
                balance_wei TEXT NULL,
                changed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS idx_tier_history_user ON tier_history(user_id, changed_at DESC);
        "#,
    },
    Migration {
        version: 3,
        name: "cases",
        sql: r#"
            CREATE TABLE IF NOT EXISTS cases (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                case_number TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                category TEXT NOT NULL CHECK (category IN
                    ('bribery', 'embezzlement', 'fraud', 'abuse_of_power', 'nepotism', 'other')),
                location TEXT NULL,
                incident_date DATE NULL,
                accused_party TEXT NULL,
                status TEXT NOT NULL DEFAULT 'submitted' CHECK (status IN
                    ('submitted', 'under_review', 'investigating', 'resolved', 'closed', 'rejected')),
                escalation_level INTEGER NOT NULL DEFAULT 0
                    CHECK (escalation_level BETWEEN 0 AND 3),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS idx_cases_user ON cases(user_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_cases_status ON cases(status);

            CREATE TRIGGER cases_touch_updated_at
                BEFORE UPDATE ON cases
                FOR EACH ROW EXECUTE FUNCTION touch_updated_at();

            CREATE TABLE IF NOT EXISTS case_activities (
                id BIGSERIAL PRIMARY KEY,
                case_id UUID NOT NULL REFERENCES cases(id) ON DELETE CASCADE,
                user_id UUID NULL,
                action TEXT NOT NULL,
                details JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS idx_case_activities_case ON case_activities(case_id, id);

            -- The acting user is passed through the transaction-local setting casewatch.actor.
            CREATE OR REPLACE FUNCTION log_case_activity() RETURNS TRIGGER AS $$
            DECLARE
                actor UUID := NULLIF(current_setting('casewatch.actor', TRUE), '')::UUID;
            BEGIN
                IF TG_OP = 'INSERT' THEN
                    INSERT INTO case_activities (case_id, user_id, action, details)
                    VALUES (NEW.id, COALESCE(actor, NEW.user_id), 'created',
                            jsonb_build_object('status', NEW.status, 'category', NEW.category));
                    RETURN NEW;
                END IF;

                IF NEW.status IS DISTINCT FROM OLD.status THEN
                    INSERT INTO case_activities (case_id, user_id, action, details)
                    VALUES (NEW.id, actor, 'status_changed',
                            jsonb_build_object('from', OLD.status, 'to', NEW.status));
                END IF;
                IF NEW.escalation_level IS DISTINCT FROM OLD.escalation_level THEN
                    INSERT INTO case_activities (case_id, user_id, action, details)
                    VALUES (NEW.id, actor, 'escalated',
                            jsonb_build_object('from', OLD.escalation_level, 'to', NEW.escalation_level));
                END IF;
                IF (NEW.title, NEW.description, NEW.category, NEW.location, NEW.incident_date, NEW.accused_party)
                   IS DISTINCT FROM
                   (OLD.title, OLD.description, OLD.category, OLD.location, OLD.incident_date, OLD.accused_party) THEN
                    INSERT INTO case_activities (case_id, user_id, action, details)
                    VALUES (NEW.id, actor, 'updated', '{}'::jsonb);
                END IF;
                RETURN NEW;
            END;
            $$ LANGUAGE plpgsql;

            CREATE TRIGGER cases_activity_log
                AFTER INSERT OR UPDATE ON cases
                FOR EACH ROW EXECUTE FUNCTION log_case_activity();
        "#,
    },
    Migration {
        version: 4,
        name: "documents",
        sql: r#"
            CREATE TABLE IF NOT EXISTS documents (
                id UUID PRIMARY KEY,
                case_id UUID NOT NULL REFERENCES cases(id) ON DELETE CASCADE,
                user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_hash TEXT NOT NULL UNIQUE,
                file_size BIGINT NOT NULL,
                qr_code_path TEXT NOT NULL,
                blockchain_status TEXT NOT NULL DEFAULT 'not_registered'
                    CHECK (blockchain_status IN ('not_registered', 'registered', 'failed')),
                blockchain_tx_hash TEXT NULL,
                registered_at TIMESTAMPTZ NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS idx_documents_user ON documents(user_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_documents_case ON documents(case_id);

            CREATE TABLE IF NOT EXISTS document_shares (
                id UUID PRIMARY KEY,
                document_id UUID NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                shared_by UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                shared_with_email TEXT NOT NULL,
                permission TEXT NOT NULL CHECK (permission IN ('view', 'download')),
                expires_at TIMESTAMPTZ NULL,
                revoked_at TIMESTAMPTZ NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS idx_document_shares_email ON document_shares(shared_with_email);

            CREATE TABLE IF NOT EXISTS document_access_logs (
                id BIGSERIAL PRIMARY KEY,
                document_id UUID NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                user_id UUID NULL,
                action TEXT NOT NULL CHECK (action IN ('view', 'download', 'share', 'register', 'verify')),
                ip_address TEXT NULL,
                accessed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS idx_document_access_logs_doc
                ON document_access_logs(document_id, accessed_at DESC);
        "#,
    },
    Migration {
        version: 5,
        name: "secure_entries",
        sql: r#"
            CREATE TABLE IF NOT EXISTS secure_entries (
                id UUID PRIMARY KEY,
                reference_code TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL,
                file_path TEXT NULL,
                original_filename TEXT NULL,
                content_type TEXT NULL,
                file_size BIGINT NULL,
                file_hash TEXT NULL,
                qr_code_path TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'received'
                    CHECK (status IN ('received', 'reviewing', 'closed')),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS idx_secure_entries_created ON secure_entries(created_at DESC);

            CREATE TRIGGER secure_entries_touch_updated_at
                BEFORE UPDATE ON secure_entries
                FOR EACH ROW EXECUTE FUNCTION touch_updated_at();
        "#,
    },
];

/// Key for the session advisory lock that serializes concurrent migrators.
const MIGRATION_LOCK_KEY: i64 = 0x6361_7365_7761_7463;

/// Applies all pending migrations in version order.
pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    let mut conn = pool.acquire().await?;
    sqlx::query("SELECT pg_advisory_lock($1)").bind(MIGRATION_LOCK_KEY).execute(&mut *conn).await?;
    let result = apply_pending(&mut conn).await;
    if let Err(e) = sqlx::query("SELECT pg_advisory_unlock($1)").bind(MIGRATION_LOCK_KEY).execute(&mut *conn).await {
        tracing::warn!("Failed to release migration lock: {}", e);
    }
    result
}

async fn apply_pending(conn: &mut PgConnection) -> anyhow::Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS schema_migrations (
            version BIGINT PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
    )
    .execute(&mut *conn)
    .await?;

    let applied: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version")
        .fetch_all(&mut *conn)
        .await?;

    for migration in MIGRATIONS.iter().filter(|m| !applied.contains(&m.version)) {
        let mut tx = conn.begin().await?;
        // Dropping `tx` on error rolls the step back.
        if let Err(e) = (&mut *tx).execute(migration.sql).await {
            tracing::error!("Migration {} ({}) failed: {}", migration.version, migration.name, e);
            return Err(anyhow::anyhow!("Migration {} failed: {}", migration.name, e));
        }
        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!("Applied migration {} ({})", migration.version, migration.name);
    }

    Ok(())
}

/// Sets the acting user for the audit triggers for the rest of the transaction.
pub async fn set_actor(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: uuid::Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT set_config('casewatch.actor', $1, TRUE)")
        .bind(user_id.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered_and_unique() {
        let versions: Vec<i64> = MIGRATIONS.iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
    }

    #[test]
    fn test_seeded_matrix_matches_defaults() {
        use crate::tiers::{TierPermissions, ALL_TIERS};
        let seed = MIGRATIONS.iter().find(|m| m.name == "tiers").unwrap().sql;
        for tier in ALL_TIERS {
            for p in TierPermissions::defaults(tier).permissions {
                let limit = p.limit.map(|l| l.to_string()).unwrap_or_else(|| "NULL".into());
                let row = format!(
                    "('{}', '{}', {}, {})",
                    tier.as_str(),
                    p.feature.as_str(),
                    if p.enabled { "TRUE" } else { "FALSE" },
                    limit
                );
                assert!(seed.contains(&row), "missing seed row {}", row);
            }
        }
    }
}
