//! SQLite-backed credential store.
//!
//! One async-safe handle owns everything the bridge persists: refresh
//! tokens, the registered OAuth client, in-flight flow sessions, app
//! passwords, webhook registrations, and the audit log. The database is
//! opened lazily by the lifecycle owner, migrated through the embedded
//! migration chain, and treated as single-writer (the pool holds one
//! connection).
//!
//! Failure contract: transient SQLite errors propagate; writing an
//! encrypted column without a configured key is a `ConfigError`; an
//! unreadable ciphertext on read logs and comes back as `None`; deleting a
//! missing row returns `false`.

pub mod records;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use ncmcp_core::{BridgeError, BridgeResult, Settings};

use crate::crypto::FieldCipher;
use records::{
    scopes_from_column, scopes_to_column, FlowKind, FlowSession, NewFlowSession,
    OAuthClientRecord, RefreshTokenRecord, WebhookRegistration,
};

/// Default flow-session lifetime.
pub const SESSION_TTL_SECONDS: i64 = 600;

/// Handle to the bridge's persistent state.
#[derive(Debug, Clone)]
pub struct TokenStorage {
    pool: SqlitePool,
    cipher: Option<FieldCipher>,
    path: PathBuf,
}

/// Fields persisted for the bridge's registered OAuth client.
#[derive(Debug, Clone)]
pub struct NewOAuthClient<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub client_id_issued_at: Option<i64>,
    pub client_secret_expires_at: Option<i64>,
    pub redirect_uris: &'a [String],
    pub registration_access_token: Option<&'a str>,
    pub registration_client_uri: Option<&'a str>,
}

/// Partial update applied to a flow session as a flow progresses.
#[derive(Debug, Clone, Default)]
pub struct FlowSessionUpdate<'a> {
    pub user_id: Option<&'a str>,
    pub idp_access_token: Option<&'a str>,
    pub idp_refresh_token: Option<&'a str>,
    pub mcp_authorization_code: Option<&'a str>,
    pub granted_scopes: Option<&'a [String]>,
}

fn observe(op: &'static str, start: Instant, ok: bool) {
    metrics::histogram!("ncmcp_db_operation_duration_seconds", "op" => op)
        .record(start.elapsed().as_secs_f64());
    metrics::counter!(
        "ncmcp_db_operations_total",
        "op" => op,
        "outcome" => if ok { "ok" } else { "error" }
    )
    .increment(1);
}

async fn timed<T, F>(op: &'static str, fut: F) -> BridgeResult<T>
where
    F: Future<Output = BridgeResult<T>>,
{
    let start = Instant::now();
    let res = fut.await;
    observe(op, start, res.is_ok());
    res
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

impl TokenStorage {
    /// Open (creating and migrating if necessary) the store configured in
    /// `settings`.
    pub async fn open(settings: &Settings) -> BridgeResult<Self> {
        Self::open_at(
            Path::new(&settings.token_storage_db),
            settings.token_encryption_key.as_deref(),
        )
        .await
    }

    /// Open a store at an explicit path with an optional encryption key.
    pub async fn open_at(path: &Path, encryption_key: Option<&str>) -> BridgeResult<Self> {
        let cipher = encryption_key.map(FieldCipher::from_base64).transpose()?;

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::migrate!()
            .run(&pool)
            .await
            .map_err(|e| BridgeError::config(format!("database migration failed: {e}")))?;

        restrict_permissions(path);

        info!(path = %path.display(), encrypted = cipher.is_some(), "credential store ready");
        Ok(Self {
            pool,
            cipher,
            path: path.to_path_buf(),
        })
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether encrypted-column writes are possible.
    pub fn has_cipher(&self) -> bool {
        self.cipher.is_some()
    }

    fn cipher(&self) -> BridgeResult<&FieldCipher> {
        self.cipher.as_ref().ok_or_else(|| {
            BridgeError::config(
                "token_encryption_key is required for encrypted credential storage",
            )
        })
    }

    // ------------------------------------------------------------------
    // Refresh tokens
    // ------------------------------------------------------------------

    /// Upsert the refresh token for a user, preserving the original
    /// `created_at` on replacement.
    #[allow(clippy::too_many_arguments)]
    pub async fn store_refresh_token(
        &self,
        user_id: &str,
        refresh_token: &str,
        expires_at: Option<i64>,
        flow: FlowKind,
        token_audience: Option<&str>,
        provisioning_client_id: Option<&str>,
        scopes: &[String],
    ) -> BridgeResult<()> {
        timed("store_refresh_token", async {
            let sealed = self.cipher()?.seal(refresh_token);
            let now = Utc::now().timestamp();
            let provisioned_at =
                matches!(flow, FlowKind::ServerMediated | FlowKind::Hybrid).then_some(now);

            sqlx::query(
                "INSERT INTO refresh_tokens \
                 (user_id, encrypted_token, expires_at, created_at, updated_at, flow_type, \
                  token_audience, provisioned_at, provisioning_client_id, scopes) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(user_id) DO UPDATE SET \
                   encrypted_token = excluded.encrypted_token, \
                   expires_at = excluded.expires_at, \
                   updated_at = excluded.updated_at, \
                   flow_type = excluded.flow_type, \
                   token_audience = excluded.token_audience, \
                   provisioned_at = excluded.provisioned_at, \
                   provisioning_client_id = excluded.provisioning_client_id, \
                   scopes = excluded.scopes",
            )
            .bind(user_id)
            .bind(sealed)
            .bind(expires_at)
            .bind(now)
            .bind(now)
            .bind(flow.as_str())
            .bind(token_audience)
            .bind(provisioned_at)
            .bind(provisioning_client_id)
            .bind(scopes_to_column(scopes))
            .execute(&self.pool)
            .await?;

            debug!(user_id, flow = flow.as_str(), "stored refresh token");
            Ok(())
        })
        .await
    }

    /// Fetch and decrypt a user's refresh token. Expired rows are deleted
    /// on read.
    pub async fn get_refresh_token(
        &self,
        user_id: &str,
    ) -> BridgeResult<Option<RefreshTokenRecord>> {
        timed("get_refresh_token", async {
            let row = sqlx::query(
                "SELECT user_id, encrypted_token, expires_at, created_at, updated_at, \
                        flow_type, token_audience, provisioned_at, provisioning_client_id, scopes \
                 FROM refresh_tokens WHERE user_id = ?",
            )
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else { return Ok(None) };
            self.decode_refresh_row(row).await
        })
        .await
    }

    /// Look a refresh token up by the client that initiated provisioning.
    pub async fn get_refresh_token_by_provisioning_client_id(
        &self,
        provisioning_client_id: &str,
    ) -> BridgeResult<Option<RefreshTokenRecord>> {
        timed("get_refresh_token_by_provisioning_client_id", async {
            let row = sqlx::query(
                "SELECT user_id, encrypted_token, expires_at, created_at, updated_at, \
                        flow_type, token_audience, provisioned_at, provisioning_client_id, scopes \
                 FROM refresh_tokens WHERE provisioning_client_id = ?",
            )
            .bind(provisioning_client_id)
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else { return Ok(None) };
            self.decode_refresh_row(row).await
        })
        .await
    }

    async fn decode_refresh_row(&self, row: SqliteRow) -> BridgeResult<Option<RefreshTokenRecord>> {
        let user_id: String = row.try_get("user_id")?;
        let expires_at: Option<i64> = row.try_get("expires_at")?;

        if let Some(expiry) = expires_at {
            if expiry <= Utc::now().timestamp() {
                sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ?")
                    .bind(&user_id)
                    .execute(&self.pool)
                    .await?;
                debug!(user_id, "refresh token expired, row removed");
                return Ok(None);
            }
        }

        let sealed: Vec<u8> = row.try_get("encrypted_token")?;
        let Some(refresh_token) = self.cipher()?.open(&sealed) else {
            warn!(user_id, "undecryptable refresh token, treating as missing");
            return Ok(None);
        };

        Ok(Some(RefreshTokenRecord {
            user_id,
            refresh_token,
            expires_at,
            flow: FlowKind::from_column(&row.try_get::<String, _>("flow_type")?),
            token_audience: row.try_get("token_audience")?,
            provisioned_at: row.try_get("provisioned_at")?,
            provisioning_client_id: row.try_get("provisioning_client_id")?,
            scopes: scopes_from_column(row.try_get("scopes")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    /// Delete a user's refresh token. `false` when no row existed.
    pub async fn delete_refresh_token(&self, user_id: &str) -> BridgeResult<bool> {
        timed("delete_refresh_token", async {
            let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ?")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    /// All users with a stored refresh token.
    pub async fn get_all_user_ids(&self) -> BridgeResult<Vec<String>> {
        timed("get_all_user_ids", async {
            let rows = sqlx::query("SELECT user_id FROM refresh_tokens ORDER BY user_id")
                .fetch_all(&self.pool)
                .await?;
            rows.into_iter()
                .map(|r| r.try_get("user_id").map_err(BridgeError::from))
                .collect()
        })
        .await
    }

    /// Remove refresh tokens past their expiry.
    pub async fn cleanup_expired_tokens(&self) -> BridgeResult<u64> {
        timed("cleanup_expired_tokens", async {
            let result = sqlx::query(
                "DELETE FROM refresh_tokens WHERE expires_at IS NOT NULL AND expires_at <= ?",
            )
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    /// Cache a user-profile document on the user's refresh-token row.
    pub async fn store_user_profile(
        &self,
        user_id: &str,
        profile: &serde_json::Value,
    ) -> BridgeResult<()> {
        timed("store_user_profile", async {
            let result = sqlx::query(
                "UPDATE refresh_tokens SET user_profile = ?, profile_cached_at = ? \
                 WHERE user_id = ?",
            )
            .bind(profile.to_string())
            .bind(Utc::now().timestamp())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                debug!(user_id, "no refresh-token row to attach profile to");
            }
            Ok(())
        })
        .await
    }

    /// Fetch the cached user profile, if any.
    pub async fn get_user_profile(&self, user_id: &str) -> BridgeResult<Option<serde_json::Value>> {
        timed("get_user_profile", async {
            let row = sqlx::query("SELECT user_profile FROM refresh_tokens WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            let Some(row) = row else { return Ok(None) };
            let raw: Option<String> = row.try_get("user_profile")?;
            Ok(raw.and_then(|p| serde_json::from_str(&p).ok()))
        })
        .await
    }

    // ------------------------------------------------------------------
    // OAuth client credentials (single row, id = 1)
    // ------------------------------------------------------------------

    /// Persist the bridge's registered OAuth client, preserving
    /// `created_at` on replacement.
    pub async fn store_oauth_client(&self, client: &NewOAuthClient<'_>) -> BridgeResult<()> {
        timed("store_oauth_client", async {
            let sealed_secret = self.cipher()?.seal(client.client_secret);
            let sealed_reg_token = client
                .registration_access_token
                .map(|t| self.cipher().map(|c| c.seal(t)))
                .transpose()?;
            let now = Utc::now().timestamp();

            sqlx::query(
                "INSERT INTO oauth_clients \
                 (id, client_id, encrypted_client_secret, client_id_issued_at, \
                  client_secret_expires_at, redirect_uris, encrypted_registration_access_token, \
                  registration_client_uri, created_at, updated_at) \
                 VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(id) DO UPDATE SET \
                   client_id = excluded.client_id, \
                   encrypted_client_secret = excluded.encrypted_client_secret, \
                   client_id_issued_at = excluded.client_id_issued_at, \
                   client_secret_expires_at = excluded.client_secret_expires_at, \
                   redirect_uris = excluded.redirect_uris, \
                   encrypted_registration_access_token = excluded.encrypted_registration_access_token, \
                   registration_client_uri = excluded.registration_client_uri, \
                   updated_at = excluded.updated_at",
            )
            .bind(client.client_id)
            .bind(sealed_secret)
            .bind(client.client_id_issued_at)
            .bind(client.client_secret_expires_at)
            .bind(serde_json::to_string(client.redirect_uris).unwrap_or_default())
            .bind(sealed_reg_token)
            .bind(client.registration_client_uri)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

            info!(client_id = client.client_id, "persisted OAuth client credentials");
            Ok(())
        })
        .await
    }

    /// Fetch the registered client. An expired secret deletes the row and
    /// returns `None`.
    pub async fn get_oauth_client(&self) -> BridgeResult<Option<OAuthClientRecord>> {
        timed("get_oauth_client", async {
            let row = sqlx::query(
                "SELECT client_id, encrypted_client_secret, client_id_issued_at, \
                        client_secret_expires_at, redirect_uris, \
                        encrypted_registration_access_token, registration_client_uri, \
                        created_at, updated_at \
                 FROM oauth_clients WHERE id = 1",
            )
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else { return Ok(None) };

            let expires_at: Option<i64> = row.try_get("client_secret_expires_at")?;
            if let Some(expiry) = expires_at {
                if expiry != 0 && expiry <= Utc::now().timestamp() {
                    sqlx::query("DELETE FROM oauth_clients WHERE id = 1")
                        .execute(&self.pool)
                        .await?;
                    info!("registered OAuth client expired, row removed");
                    return Ok(None);
                }
            }

            let sealed: Vec<u8> = row.try_get("encrypted_client_secret")?;
            let Some(client_secret) = self.cipher()?.open(&sealed) else {
                warn!("undecryptable OAuth client secret, treating as missing");
                return Ok(None);
            };

            let registration_access_token = match row
                .try_get::<Option<Vec<u8>>, _>("encrypted_registration_access_token")?
            {
                Some(blob) => self.cipher()?.open(&blob),
                None => None,
            };

            let redirect_uris: Option<String> = row.try_get("redirect_uris")?;
            Ok(Some(OAuthClientRecord {
                client_id: row.try_get("client_id")?,
                client_secret,
                client_id_issued_at: row.try_get("client_id_issued_at")?,
                client_secret_expires_at: expires_at,
                redirect_uris: redirect_uris
                    .and_then(|v| serde_json::from_str(&v).ok())
                    .unwrap_or_default(),
                registration_access_token,
                registration_client_uri: row.try_get("registration_client_uri")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            }))
        })
        .await
    }

    /// Whether an unexpired client row exists (no decryption performed).
    pub async fn has_oauth_client(&self) -> BridgeResult<bool> {
        timed("has_oauth_client", async {
            let row = sqlx::query(
                "SELECT 1 FROM oauth_clients WHERE id = 1 AND \
                 (client_secret_expires_at IS NULL OR client_secret_expires_at = 0 \
                  OR client_secret_expires_at > ?)",
            )
            .bind(Utc::now().timestamp())
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.is_some())
        })
        .await
    }

    /// Remove the registered client row.
    pub async fn delete_oauth_client(&self) -> BridgeResult<bool> {
        timed("delete_oauth_client", async {
            let result = sqlx::query("DELETE FROM oauth_clients WHERE id = 1")
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Flow sessions
    // ------------------------------------------------------------------

    /// Open a flow session with the given (or default 600 s) TTL.
    pub async fn store_flow_session(
        &self,
        session: &NewFlowSession,
        ttl_seconds: Option<i64>,
    ) -> BridgeResult<()> {
        timed("store_flow_session", async {
            let now = Utc::now().timestamp();
            let expires_at = now + ttl_seconds.unwrap_or(SESSION_TTL_SECONDS);
            let flow = session.flow.unwrap_or(FlowKind::Direct);

            sqlx::query(
                "INSERT INTO oauth_sessions \
                 (session_id, client_id, client_redirect_uri, state, code_challenge, \
                  code_challenge_method, created_at, expires_at, flow_type, \
                  requested_scopes, is_provisioning) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&session.session_id)
            .bind(&session.client_id)
            .bind(&session.client_redirect_uri)
            .bind(&session.state)
            .bind(&session.code_challenge)
            .bind(&session.code_challenge_method)
            .bind(now)
            .bind(expires_at)
            .bind(flow.as_str())
            .bind(scopes_to_column(&session.requested_scopes))
            .bind(session.is_provisioning)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Fetch a session by id; expired sessions are deleted on read.
    pub async fn get_flow_session(&self, session_id: &str) -> BridgeResult<Option<FlowSession>> {
        timed("get_flow_session", async {
            let row = sqlx::query("SELECT * FROM oauth_sessions WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
            let Some(row) = row else { return Ok(None) };
            self.decode_session_row(row).await
        })
        .await
    }

    /// Fetch a session by the server-issued authorization code.
    pub async fn get_flow_session_by_code(&self, code: &str) -> BridgeResult<Option<FlowSession>> {
        timed("get_flow_session_by_code", async {
            let row = sqlx::query("SELECT * FROM oauth_sessions WHERE mcp_authorization_code = ?")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;
            let Some(row) = row else { return Ok(None) };
            self.decode_session_row(row).await
        })
        .await
    }

    async fn decode_session_row(&self, row: SqliteRow) -> BridgeResult<Option<FlowSession>> {
        let session_id: String = row.try_get("session_id")?;
        let expires_at: i64 = row.try_get("expires_at")?;

        if expires_at <= Utc::now().timestamp() {
            sqlx::query("DELETE FROM oauth_sessions WHERE session_id = ?")
                .bind(&session_id)
                .execute(&self.pool)
                .await?;
            debug!(session_id, "flow session expired, row removed");
            return Ok(None);
        }

        Ok(Some(FlowSession {
            session_id,
            client_id: row.try_get("client_id")?,
            client_redirect_uri: row.try_get("client_redirect_uri")?,
            state: row.try_get("state")?,
            code_challenge: row.try_get("code_challenge")?,
            code_challenge_method: row.try_get("code_challenge_method")?,
            mcp_authorization_code: row.try_get("mcp_authorization_code")?,
            idp_access_token: row.try_get("idp_access_token")?,
            idp_refresh_token: row.try_get("idp_refresh_token")?,
            user_id: row.try_get("user_id")?,
            created_at: row.try_get("created_at")?,
            expires_at,
            flow: FlowKind::from_column(&row.try_get::<String, _>("flow_type")?),
            requested_scopes: scopes_from_column(row.try_get("requested_scopes")?),
            granted_scopes: scopes_from_column(row.try_get("granted_scopes")?),
            is_provisioning: row.try_get("is_provisioning")?,
        }))
    }

    /// Apply a partial update to a session.
    pub async fn update_flow_session(
        &self,
        session_id: &str,
        update: &FlowSessionUpdate<'_>,
    ) -> BridgeResult<()> {
        timed("update_flow_session", async {
            sqlx::query(
                "UPDATE oauth_sessions SET \
                   user_id = COALESCE(?, user_id), \
                   idp_access_token = COALESCE(?, idp_access_token), \
                   idp_refresh_token = COALESCE(?, idp_refresh_token), \
                   mcp_authorization_code = COALESCE(?, mcp_authorization_code), \
                   granted_scopes = COALESCE(?, granted_scopes) \
                 WHERE session_id = ?",
            )
            .bind(update.user_id)
            .bind(update.idp_access_token)
            .bind(update.idp_refresh_token)
            .bind(update.mcp_authorization_code)
            .bind(update.granted_scopes.and_then(scopes_to_column))
            .bind(session_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Delete a session. `false` when no row existed.
    pub async fn delete_flow_session(&self, session_id: &str) -> BridgeResult<bool> {
        timed("delete_flow_session", async {
            let result = sqlx::query("DELETE FROM oauth_sessions WHERE session_id = ?")
                .bind(session_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    /// Background sweep of expired sessions. Idempotent.
    pub async fn cleanup_expired_sessions(&self) -> BridgeResult<u64> {
        timed("cleanup_expired_sessions", async {
            let result = sqlx::query("DELETE FROM oauth_sessions WHERE expires_at <= ?")
                .bind(Utc::now().timestamp())
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    // ------------------------------------------------------------------
    // App passwords (multi-user Basic mode)
    // ------------------------------------------------------------------

    /// Store an upstream app password for a user.
    pub async fn store_app_password(&self, user_id: &str, password: &str) -> BridgeResult<()> {
        timed("store_app_password", async {
            let sealed = self.cipher()?.seal(password);
            let now = Utc::now().timestamp();
            sqlx::query(
                "INSERT INTO app_passwords (user_id, encrypted_password, created_at, updated_at) \
                 VALUES (?, ?, ?, ?) \
                 ON CONFLICT(user_id) DO UPDATE SET \
                   encrypted_password = excluded.encrypted_password, \
                   updated_at = excluded.updated_at",
            )
            .bind(user_id)
            .bind(sealed)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Fetch a user's app password.
    pub async fn get_app_password(&self, user_id: &str) -> BridgeResult<Option<String>> {
        timed("get_app_password", async {
            let row = sqlx::query("SELECT encrypted_password FROM app_passwords WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            let Some(row) = row else { return Ok(None) };
            let sealed: Vec<u8> = row.try_get("encrypted_password")?;
            Ok(self.cipher()?.open(&sealed))
        })
        .await
    }

    /// Revoke a user's app password.
    pub async fn delete_app_password(&self, user_id: &str) -> BridgeResult<bool> {
        timed("delete_app_password", async {
            let result = sqlx::query("DELETE FROM app_passwords WHERE user_id = ?")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Webhook registrations
    // ------------------------------------------------------------------

    /// Record an upstream-assigned webhook id. Re-storing the same id is
    /// the identity on the row count.
    pub async fn store_webhook(&self, webhook_id: i64, preset_id: &str) -> BridgeResult<()> {
        timed("store_webhook", async {
            sqlx::query(
                "INSERT INTO registered_webhooks (webhook_id, preset_id, created_at) \
                 VALUES (?, ?, ?) \
                 ON CONFLICT(webhook_id) DO UPDATE SET preset_id = excluded.preset_id",
            )
            .bind(webhook_id)
            .bind(preset_id)
            .bind(Utc::now().timestamp() as f64)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// All registrations for a preset.
    pub async fn get_webhooks_by_preset(
        &self,
        preset_id: &str,
    ) -> BridgeResult<Vec<WebhookRegistration>> {
        timed("get_webhooks_by_preset", async {
            let rows = sqlx::query(
                "SELECT webhook_id, preset_id, created_at FROM registered_webhooks \
                 WHERE preset_id = ? ORDER BY created_at",
            )
            .bind(preset_id)
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter().map(decode_webhook_row).collect()
        })
        .await
    }

    /// Every registration the bridge knows about.
    pub async fn list_webhooks(&self) -> BridgeResult<Vec<WebhookRegistration>> {
        timed("list_webhooks", async {
            let rows = sqlx::query(
                "SELECT webhook_id, preset_id, created_at FROM registered_webhooks \
                 ORDER BY created_at",
            )
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter().map(decode_webhook_row).collect()
        })
        .await
    }

    /// Forget one registration. `false` when no row existed.
    pub async fn delete_webhook(&self, webhook_id: i64) -> BridgeResult<bool> {
        timed("delete_webhook", async {
            let result = sqlx::query("DELETE FROM registered_webhooks WHERE webhook_id = ?")
                .bind(webhook_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    /// Forget every registration for a preset, returning the count removed.
    pub async fn clear_preset(&self, preset_id: &str) -> BridgeResult<u64> {
        timed("clear_preset", async {
            let result = sqlx::query("DELETE FROM registered_webhooks WHERE preset_id = ?")
                .bind(preset_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Audit log
    // ------------------------------------------------------------------

    /// Append an audit row for a sensitive credential operation.
    pub async fn audit(
        &self,
        event: &str,
        user_id: &str,
        resource_type: Option<&str>,
        resource_id: Option<&str>,
        auth_method: &str,
    ) -> BridgeResult<()> {
        timed("audit", async {
            sqlx::query(
                "INSERT INTO audit_logs \
                 (timestamp, event, user_id, resource_type, resource_id, auth_method, hostname) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(Utc::now().timestamp())
            .bind(event)
            .bind(user_id)
            .bind(resource_type)
            .bind(resource_id)
            .bind(auth_method)
            .bind(hostname())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }
}

fn decode_webhook_row(row: SqliteRow) -> BridgeResult<WebhookRegistration> {
    Ok(WebhookRegistration {
        webhook_id: row.try_get("webhook_id")?,
        preset_id: row.try_get("preset_id")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        warn!(path = %path.display(), error = %e, "could not tighten database permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}
