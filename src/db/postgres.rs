use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use super::Store;
use crate::errors::StoreError;
use crate::model::{
    CatalogItem, ChatStatus, Identity, IdentityId, ItemImage, ItemStatus, NotificationKind,
    NotificationPrefs, Role, SenderRole, SupportChat, TranscriptEntry,
};

const IDENTITY_COLUMNS: &str = "id, display_name, language_code, role, online, \
     notify_price, notify_status, notify_offers, favorites";

const CHAT_COLUMNS: &str = "chat_id, user_id, manager_id, user_name, question, status";

const ITEM_COLUMNS: &str = "id, vin, name, price, status_id, listing_id";

/// Initialize the database schema
pub async fn init_database_schema(pool: &PgPool) -> Result<(), StoreError> {
    info!("Initializing database schema...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS identities (
            id BIGINT PRIMARY KEY,
            display_name TEXT,
            language_code TEXT,
            role TEXT NOT NULL DEFAULT 'guest',
            online BOOLEAN NOT NULL DEFAULT FALSE,
            notify_price BOOLEAN NOT NULL DEFAULT FALSE,
            notify_status BOOLEAN NOT NULL DEFAULT FALSE,
            notify_offers BOOLEAN NOT NULL DEFAULT FALSE,
            favorites TEXT[] NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS sessions (
            identity_id BIGINT PRIMARY KEY,
            state JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS item_statuses (
            id INTEGER PRIMARY KEY,
            code TEXT NOT NULL,
            name TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS catalog_items (
            id BIGSERIAL PRIMARY KEY,
            vin TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            price BIGINT NOT NULL,
            status_id INTEGER NOT NULL REFERENCES item_statuses(id),
            listing_id TEXT
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS item_images (
            id BIGSERIAL PRIMARY KEY,
            item_id BIGINT NOT NULL REFERENCES catalog_items(id) ON DELETE CASCADE,
            url TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS support_chats (
            chat_id TEXT PRIMARY KEY,
            user_id BIGINT NOT NULL,
            manager_id BIGINT,
            user_name TEXT NOT NULL,
            question TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'open',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS chat_transcript (
            seq BIGSERIAL PRIMARY KEY,
            chat_id TEXT NOT NULL REFERENCES support_chats(chat_id),
            sender_role TEXT NOT NULL,
            sender_id BIGINT NOT NULL,
            body TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS support_chats_status_idx ON support_chats (status)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS chat_transcript_chat_idx ON chat_transcript (chat_id, seq)",
    )
    .execute(pool)
    .await?;

    info!("Database schema initialized successfully");
    Ok(())
}

fn corrupt(table: &'static str, detail: String) -> StoreError {
    StoreError::Corrupt { table, detail }
}

fn identity_from_row(row: &PgRow) -> Result<Identity, StoreError> {
    let role: String = row.try_get("role")?;
    Ok(Identity {
        id: row.try_get("id")?,
        display_name: row.try_get("display_name")?,
        language_code: row.try_get("language_code")?,
        role: role.parse().map_err(|e| corrupt("identities", e))?,
        online: row.try_get("online")?,
        notifications: NotificationPrefs {
            price: row.try_get("notify_price")?,
            status: row.try_get("notify_status")?,
            offers: row.try_get("notify_offers")?,
        },
        favorites: row.try_get("favorites")?,
    })
}

fn chat_from_row(row: &PgRow) -> Result<SupportChat, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(SupportChat {
        chat_id: row.try_get("chat_id")?,
        user_id: row.try_get("user_id")?,
        manager_id: row.try_get("manager_id")?,
        user_name: row.try_get("user_name")?,
        question: row.try_get("question")?,
        status: status.parse().map_err(|e| corrupt("support_chats", e))?,
    })
}

fn item_from_row(row: &PgRow) -> Result<CatalogItem, StoreError> {
    Ok(CatalogItem {
        id: row.try_get("id")?,
        vin: row.try_get("vin")?,
        name: row.try_get("name")?,
        price: row.try_get("price")?,
        status_id: row.try_get("status_id")?,
        listing_id: row.try_get("listing_id")?,
    })
}

/// sqlx-backed store
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        init_database_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(identity_from_row).transpose()
    }

    async fn insert_identity_if_absent(&self, identity: &Identity) -> Result<Identity, StoreError> {
        let inserted = sqlx::query(
            "INSERT INTO identities (id, display_name, language_code, role)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(identity.id)
        .bind(&identity.display_name)
        .bind(&identity.language_code)
        .bind(identity.role.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted > 0 {
            info!(user_id = %identity.id, "Registered new identity");
        }

        self.get_identity(identity.id)
            .await?
            .ok_or_else(|| corrupt("identities", format!("row {} vanished after insert", identity.id)))
    }

    async fn set_role(&self, id: IdentityId, role: Role) -> Result<bool, StoreError> {
        // Losing the manager role also takes the identity off the line
        let rows = sqlx::query(
            "UPDATE identities
             SET role = $2, online = CASE WHEN $2 = 'manager' THEN online ELSE FALSE END
             WHERE id = $1",
        )
        .bind(id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }

    async fn set_online(&self, id: IdentityId, online: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE identities SET online = $2 WHERE id = $1")
            .bind(id)
            .bind(online)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_notification(
        &self,
        id: IdentityId,
        kind: NotificationKind,
        enabled: bool,
    ) -> Result<(), StoreError> {
        let column = match kind {
            NotificationKind::Price => "notify_price",
            NotificationKind::Status => "notify_status",
            NotificationKind::Offers => "notify_offers",
        };
        sqlx::query(&format!("UPDATE identities SET {column} = $2 WHERE id = $1"))
            .bind(id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn toggle_favorite(&self, id: IdentityId, vin: &str) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "UPDATE identities
             SET favorites = CASE
                 WHEN $2 = ANY(favorites) THEN array_remove(favorites, $2)
                 ELSE array_append(favorites, $2)
             END
             WHERE id = $1
             RETURNING $2 = ANY(favorites) AS favorite",
        )
        .bind(id)
        .bind(vin)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.try_get("favorite")?),
            None => Ok(false),
        }
    }

    async fn clear_favorites(&self, id: IdentityId) -> Result<(), StoreError> {
        sqlx::query("UPDATE identities SET favorites = '{}' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn online_managers(&self) -> Result<Vec<Identity>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities
             WHERE role = 'manager' AND online = TRUE ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(identity_from_row).collect()
    }

    async fn load_session(&self, id: IdentityId) -> Result<Option<serde_json::Value>, StoreError> {
        let row = sqlx::query("SELECT state FROM sessions WHERE identity_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: sqlx::types::Json<serde_json::Value> = row.try_get("state")?;
                Ok(Some(raw.0))
            }
            None => Ok(None),
        }
    }

    async fn save_session(
        &self,
        id: IdentityId,
        state: &serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sessions (identity_id, state, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (identity_id) DO UPDATE SET state = EXCLUDED.state, updated_at = NOW()",
        )
        .bind(id)
        .bind(sqlx::types::Json(state))
        .execute(&self.pool)
        .await?;

        debug!(user_id = %id, "Session saved");
        Ok(())
    }

    async fn list_items(&self) -> Result<Vec<CatalogItem>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM catalog_items ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(item_from_row).collect()
    }

    async fn get_item(&self, item_id: i64) -> Result<Option<CatalogItem>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM catalog_items WHERE id = $1"))
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn list_statuses(&self) -> Result<Vec<ItemStatus>, StoreError> {
        let rows = sqlx::query("SELECT id, code, name FROM item_statuses ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(ItemStatus {
                    id: row.try_get("id")?,
                    code: row.try_get("code")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    async fn item_images(&self, item_id: i64) -> Result<Vec<ItemImage>, StoreError> {
        let rows = sqlx::query("SELECT id, item_id, url FROM item_images WHERE item_id = $1 ORDER BY id")
            .bind(item_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(ItemImage {
                    id: row.try_get("id")?,
                    item_id: row.try_get("item_id")?,
                    url: row.try_get("url")?,
                })
            })
            .collect()
    }

    async fn set_item_price(&self, item_id: i64, price: i64) -> Result<bool, StoreError> {
        let rows = sqlx::query("UPDATE catalog_items SET price = $2 WHERE id = $1")
            .bind(item_id)
            .bind(price)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows > 0)
    }

    async fn set_item_status(&self, item_id: i64, status_id: i32) -> Result<bool, StoreError> {
        let rows = sqlx::query(
            "UPDATE catalog_items SET status_id = $2
             WHERE id = $1 AND EXISTS (SELECT 1 FROM item_statuses WHERE id = $2)",
        )
        .bind(item_id)
        .bind(status_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    async fn set_item_listing(&self, item_id: i64, listing_id: &str) -> Result<bool, StoreError> {
        let rows = sqlx::query("UPDATE catalog_items SET listing_id = $2 WHERE id = $1")
            .bind(item_id)
            .bind(listing_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows > 0)
    }

    async fn create_chat(
        &self,
        chat: &SupportChat,
        first_entry: &TranscriptEntry,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO support_chats (chat_id, user_id, manager_id, user_name, question, status)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&chat.chat_id)
        .bind(chat.user_id)
        .bind(chat.manager_id)
        .bind(&chat.user_name)
        .bind(&chat.question)
        .bind(chat.status.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO chat_transcript (chat_id, sender_role, sender_id, body, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&chat.chat_id)
        .bind(first_entry.sender_role.as_str())
        .bind(first_entry.sender_id)
        .bind(&first_entry.text)
        .bind(first_entry.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Option<SupportChat>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CHAT_COLUMNS} FROM support_chats WHERE chat_id = $1"
        ))
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(chat_from_row).transpose()
    }

    async fn list_chats(&self, status: ChatStatus) -> Result<Vec<SupportChat>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CHAT_COLUMNS} FROM support_chats WHERE status = $1 ORDER BY created_at, chat_id"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(chat_from_row).collect()
    }

    async fn claim_chat(
        &self,
        chat_id: &str,
        manager_id: IdentityId,
    ) -> Result<Option<SupportChat>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE support_chats
             SET status = 'assigned', manager_id = $2, updated_at = NOW()
             WHERE chat_id = $1 AND status = 'open'
             RETURNING {CHAT_COLUMNS}"
        ))
        .bind(chat_id)
        .bind(manager_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(chat_from_row).transpose()
    }

    async fn release_chat(
        &self,
        chat_id: &str,
        manager_id: IdentityId,
    ) -> Result<Option<SupportChat>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE support_chats
             SET status = 'open', manager_id = NULL, updated_at = NOW()
             WHERE chat_id = $1 AND status = 'assigned' AND manager_id = $2
             RETURNING {CHAT_COLUMNS}"
        ))
        .bind(chat_id)
        .bind(manager_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(chat_from_row).transpose()
    }

    async fn close_chat(&self, chat_id: &str) -> Result<Option<SupportChat>, StoreError> {
        // The CTE snapshot is the row as it was before the update
        let row = sqlx::query(&format!(
            "WITH prev AS (
                 SELECT {CHAT_COLUMNS} FROM support_chats
                 WHERE chat_id = $1 AND status <> 'closed'
                 FOR UPDATE
             )
             UPDATE support_chats AS c
             SET status = 'closed', updated_at = NOW()
             FROM prev
             WHERE c.chat_id = prev.chat_id
             RETURNING prev.*"
        ))
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(chat_from_row).transpose()
    }

    async fn append_if_active(
        &self,
        chat_id: &str,
        entry: &TranscriptEntry,
    ) -> Result<Option<SupportChat>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes this append against a concurrent close
        let row = sqlx::query(&format!(
            "SELECT {CHAT_COLUMNS} FROM support_chats WHERE chat_id = $1 FOR UPDATE"
        ))
        .bind(chat_id)
        .fetch_optional(&mut *tx)
        .await?;

        let chat = match row.as_ref().map(chat_from_row).transpose()? {
            Some(chat) if chat.status != ChatStatus::Closed => chat,
            _ => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        sqlx::query(
            "INSERT INTO chat_transcript (chat_id, sender_role, sender_id, body, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(chat_id)
        .bind(entry.sender_role.as_str())
        .bind(entry.sender_id)
        .bind(&entry.text)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(chat))
    }

    async fn transcript(&self, chat_id: &str) -> Result<Vec<TranscriptEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT sender_role, sender_id, body, created_at
             FROM chat_transcript WHERE chat_id = $1 ORDER BY seq",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let role: String = row.try_get("sender_role")?;
                Ok(TranscriptEntry {
                    sender_role: role
                        .parse::<SenderRole>()
                        .map_err(|e| corrupt("chat_transcript", e))?,
                    sender_id: row.try_get("sender_id")?,
                    text: row.try_get("body")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
