//! Third-party API key management
//!
//! Key values are sealed with [`KeyCipher`] before they reach the database;
//! listings only ever expose a mask. Testing a key checks its format for the
//! known providers and never errors on a bad value: malformed, missing or
//! undecryptable keys come back as `{ valid: false, message }`.

pub mod crypto;

pub use crypto::{KeyCipher, SealedValue};

use chrono::{DateTime, Utc};
use empire_common::db::{ColumnDefinition, TableDefinition};
use empire_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};

const MASK: &str = "••••••••••••••••";

pub fn tables() -> Vec<TableDefinition> {
    vec![TableDefinition::new("api_keys")
        .column(ColumnDefinition::new("id", "TEXT").primary_key())
        .column(ColumnDefinition::new("name", "TEXT").not_null())
        .column(ColumnDefinition::new("category", "TEXT").not_null().default("'general'"))
        .column(ColumnDefinition::new("description", "TEXT").not_null().default("''"))
        .column(ColumnDefinition::new("encrypted_key", "TEXT"))
        .column(ColumnDefinition::new("encryption_nonce", "TEXT"))
        .column(ColumnDefinition::new("is_active", "BOOLEAN").not_null().default("0"))
        .column(ColumnDefinition::new("required", "BOOLEAN").not_null().default("0"))
        .column(ColumnDefinition::new("last_used", "TIMESTAMP"))
        .column(ColumnDefinition::new("usage_count", "INTEGER").not_null().default("0"))
        .column(ColumnDefinition::new("created_at", "TIMESTAMP").not_null())
        .column(ColumnDefinition::new("updated_at", "TIMESTAMP").not_null())]
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ApiKeyRow {
    id: String,
    name: String,
    category: String,
    description: String,
    encrypted_key: Option<String>,
    encryption_nonce: Option<String>,
    is_active: bool,
    required: bool,
    last_used: Option<DateTime<Utc>>,
    usage_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ApiKeyRow {
    fn sealed(&self) -> Option<SealedValue> {
        match (&self.encrypted_key, &self.encryption_nonce) {
            (Some(ciphertext), Some(nonce)) => Some(SealedValue {
                ciphertext: ciphertext.clone(),
                nonce: nonce.clone(),
            }),
            _ => None,
        }
    }
}

/// Listing entry; the key value is always masked
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyView {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub key: &'static str,
    pub has_value: bool,
    pub is_active: bool,
    pub required: bool,
    pub encrypted: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ApiKeyRow> for ApiKeyView {
    fn from(row: ApiKeyRow) -> Self {
        let has_value = row.encrypted_key.is_some();
        Self {
            id: row.id,
            name: row.name,
            category: row.category,
            description: row.description,
            key: if has_value { MASK } else { "" },
            has_value,
            is_active: row.is_active,
            required: row.required,
            encrypted: has_value,
            last_used: row.last_used,
            usage_count: row.usage_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveApiKey {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// New value; omitted keeps the stored one
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveOutcome {
    pub success: bool,
    pub message: &'static str,
    pub encrypted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyTestResult {
    pub valid: bool,
    pub message: String,
}

impl KeyTestResult {
    fn valid(message: impl Into<String>) -> Self {
        Self {
            valid: true,
            message: message.into(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

/// Offline format check for a key value, by provider id
pub fn check_key_format(id: &str, value: &str) -> KeyTestResult {
    let value = value.trim();
    if value.is_empty() {
        return KeyTestResult::invalid("API key value is empty");
    }

    match id {
        "openai" => {
            if value.starts_with("sk-") && value.len() > 20 {
                KeyTestResult::valid("OpenAI API key format is valid")
            } else {
                KeyTestResult::invalid("OpenAI API key must start with 'sk-'")
            }
        }
        "anthropic" => {
            if value.starts_with("sk-ant-") && value.len() > 20 {
                KeyTestResult::valid("Anthropic API key format is valid")
            } else {
                KeyTestResult::invalid("Anthropic API key must start with 'sk-ant-'")
            }
        }
        "stripe_secret" => {
            if value.starts_with("sk_live_") || value.starts_with("sk_test_") {
                KeyTestResult::valid("Stripe API key format is valid")
            } else {
                KeyTestResult::invalid("Stripe secret key must start with 'sk_live_' or 'sk_test_'")
            }
        }
        "database_url" => {
            let known = ["postgres://", "postgresql://", "sqlite:"];
            if known.iter().any(|scheme| value.starts_with(scheme)) {
                KeyTestResult::valid("Database URL format is valid")
            } else {
                KeyTestResult::invalid("Invalid database URL format")
            }
        }
        _ => KeyTestResult::valid("Basic validation passed"),
    }
}

/// Encrypted API key store
pub struct ApiKeyStore {
    db: SqlitePool,
    cipher: KeyCipher,
}

impl ApiKeyStore {
    pub fn new(db: SqlitePool, cipher: KeyCipher) -> Self {
        Self { db, cipher }
    }

    pub async fn list(&self) -> Result<Vec<ApiKeyView>> {
        let rows = sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys ORDER BY category, id")
            .fetch_all(&self.db)
            .await?;
        Ok(rows.into_iter().map(ApiKeyView::from).collect())
    }

    /// Insert or update a key; usage statistics survive updates
    pub async fn save(&self, req: SaveApiKey) -> Result<SaveOutcome> {
        if req.id.trim().is_empty() || req.name.trim().is_empty() {
            return Err(Error::InvalidInput("ID and name are required".to_string()));
        }

        let sealed = match req.key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            Some(value) => Some(self.cipher.seal(value)?),
            None => None,
        };
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO api_keys
                (id, name, category, description, encrypted_key, encryption_nonce,
                 is_active, required, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                category = excluded.category,
                description = excluded.description,
                encrypted_key = COALESCE(excluded.encrypted_key, api_keys.encrypted_key),
                encryption_nonce = COALESCE(excluded.encryption_nonce, api_keys.encryption_nonce),
                is_active = excluded.is_active,
                required = excluded.required,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&req.id)
        .bind(&req.name)
        .bind(req.category.as_deref().unwrap_or("general"))
        .bind(req.description.as_deref().unwrap_or(""))
        .bind(sealed.as_ref().map(|s| s.ciphertext.as_str()))
        .bind(sealed.as_ref().map(|s| s.nonce.as_str()))
        .bind(req.is_active)
        .bind(req.required)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await?;

        info!(key_id = %req.id, with_value = sealed.is_some(), "API key saved");

        Ok(SaveOutcome {
            success: true,
            message: "API key saved successfully",
            encrypted: sealed.is_some(),
        })
    }

    /// Required keys cannot be deleted
    pub async fn delete(&self, id: &str) -> Result<()> {
        let row = self.find(id).await?;
        if row.required {
            return Err(Error::InvalidInput("Cannot delete required API key".to_string()));
        }

        sqlx::query("DELETE FROM api_keys WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        info!(key_id = %id, "API key deleted");
        Ok(())
    }

    /// Validate the stored value; a passing test records usage
    pub async fn test(&self, id: &str) -> Result<KeyTestResult> {
        let row = self.find(id).await?;

        let Some(sealed) = row.sealed() else {
            return Ok(KeyTestResult::invalid("No key value stored"));
        };

        let value = match self.cipher.open(&sealed) {
            Ok(value) => value,
            Err(e) => {
                warn!(key_id = %id, "API key could not be decrypted: {}", e);
                return Ok(KeyTestResult::invalid("Failed to decrypt API key"));
            }
        };

        let result = check_key_format(id, &value);
        if result.valid {
            sqlx::query("UPDATE api_keys SET usage_count = usage_count + 1, last_used = ? WHERE id = ?")
                .bind(Utc::now())
                .bind(id)
                .execute(&self.db)
                .await?;
        }
        Ok(result)
    }

    async fn find(&self, id: &str) -> Result<ApiKeyRow> {
        sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| Error::NotFound(format!("API key {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use empire_common::db::{connect, SchemaSync};

    async fn store_with(cipher: KeyCipher) -> ApiKeyStore {
        let pool = connect("sqlite::memory:").await.unwrap();
        SchemaSync::ensure_all(&pool, &tables()).await.unwrap();
        ApiKeyStore::new(pool, cipher)
    }

    fn save(id: &str, key: Option<&str>) -> SaveApiKey {
        SaveApiKey {
            id: id.to_string(),
            name: id.to_uppercase(),
            key: key.map(str::to_string),
            category: None,
            description: None,
            is_active: true,
            required: false,
        }
    }

    #[test]
    fn test_format_checks() {
        assert!(check_key_format("openai", "sk-abcdefghijklmnopqrstuvwxyz").valid);
        assert!(!check_key_format("openai", "pk-abcdefghijklmnopqrstuvwxyz").valid);
        assert!(check_key_format("anthropic", "sk-ant-REDACTED").valid);
        assert!(check_key_format("stripe_secret", "sk_test_123").valid);
        assert!(!check_key_format("stripe_secret", "pk_test_123").valid);
        assert!(check_key_format("database_url", "sqlite://empire.db").valid);
        assert!(!check_key_format("database_url", "mysql://db").valid);
        assert!(check_key_format("mailchimp", "anything").valid);
        assert!(!check_key_format("mailchimp", "   ").valid);
    }

    #[tokio::test]
    async fn test_list_masks_values() {
        let store = store_with(KeyCipher::from_secret("s")).await;
        store.save(save("openai", Some("sk-secret-value-1234567890"))).await.unwrap();
        store.save(save("webhook", None)).await.unwrap();

        let keys = store.list().await.unwrap();
        let openai = keys.iter().find(|k| k.id == "openai").unwrap();
        assert_eq!(openai.key, MASK);
        assert!(openai.has_value);

        let json = serde_json::to_string(&keys).unwrap();
        assert!(!json.contains("sk-secret-value"));

        let webhook = keys.iter().find(|k| k.id == "webhook").unwrap();
        assert_eq!(webhook.key, "");
        assert!(!webhook.has_value);
    }

    #[tokio::test]
    async fn test_save_requires_id_and_name() {
        let store = store_with(KeyCipher::ephemeral()).await;
        let mut req = save("openai", None);
        req.name = String::new();
        assert!(matches!(store.save(req).await, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_malformed_key_is_invalid_not_error() {
        let store = store_with(KeyCipher::from_secret("s")).await;
        store.save(save("openai", Some("not-a-real-key"))).await.unwrap();

        let result = store.test("openai").await.unwrap();
        assert!(!result.valid);

        let keys = store.list().await.unwrap();
        assert_eq!(keys[0].usage_count, 0);
    }

    #[tokio::test]
    async fn test_valid_key_records_usage_and_survives_update() {
        let store = store_with(KeyCipher::from_secret("s")).await;
        store.save(save("openai", Some("sk-abcdefghijklmnopqrstuvwxyz"))).await.unwrap();

        assert!(store.test("openai").await.unwrap().valid);
        assert!(store.test("openai").await.unwrap().valid);

        // Metadata-only update keeps the sealed value and usage count
        store.save(save("openai", None)).await.unwrap();
        assert!(store.test("openai").await.unwrap().valid);

        let keys = store.list().await.unwrap();
        assert_eq!(keys[0].usage_count, 3);
        assert!(keys[0].last_used.is_some());
    }

    #[tokio::test]
    async fn test_undecryptable_key_is_invalid() {
        let pool = connect("sqlite::memory:").await.unwrap();
        SchemaSync::ensure_all(&pool, &tables()).await.unwrap();

        let before = ApiKeyStore::new(pool.clone(), KeyCipher::from_secret("old"));
        before.save(save("openai", Some("sk-abcdefghijklmnopqrstuvwxyz"))).await.unwrap();

        let after = ApiKeyStore::new(pool, KeyCipher::from_secret("rotated"));
        let result = after.test("openai").await.unwrap();
        assert_eq!(result, KeyTestResult::invalid("Failed to decrypt API key"));
    }

    #[tokio::test]
    async fn test_missing_value_and_missing_key() {
        let store = store_with(KeyCipher::ephemeral()).await;
        store.save(save("webhook", None)).await.unwrap();
        assert!(!store.test("webhook").await.unwrap().valid);
        assert!(matches!(store.test("nope").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_required_keys_cannot_be_deleted() {
        let store = store_with(KeyCipher::ephemeral()).await;
        let mut req = save("database_url", Some("sqlite://empire.db"));
        req.required = true;
        store.save(req).await.unwrap();
        store.save(save("webhook", None)).await.unwrap();

        assert!(matches!(store.delete("database_url").await, Err(Error::InvalidInput(_))));
        store.delete("webhook").await.unwrap();
        assert!(matches!(store.delete("webhook").await, Err(Error::NotFound(_))));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
