//! Embedded identity engine backed by the service's own Postgres instance.
//!
//! Access tokens are HS256 JWTs carrying the session handle and custom
//! claims; refresh tokens are opaque and stored only as SHA-256 digests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{password, token};
use crate::config::Config;
use crate::identity::{
    CustomClaims, FrontInfo, IdentityError, IdentityProvider, IssuedSession, SessionClaims,
    VerifyMode,
};

/// Refresh tokens outlive access tokens by a wide margin.
const REFRESH_VALIDITY_DAYS: i64 = 30;

#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    sub: Uuid,
    sid: Uuid,
    iat: i64,
    exp: i64,
    #[serde(flatten)]
    custom: CustomClaims,
}

pub struct LocalIdentity {
    pool: PgPool,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    human_validity_secs: i64,
    system_validity_secs: i64,
}

impl LocalIdentity {
    pub fn new(pool: PgPool, config: &Config) -> Self {
        let secret = config.identity_api_key.as_bytes();
        Self {
            pool,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            human_validity_secs: config.access_token_validity_human_seconds,
            system_validity_secs: config.access_token_validity_system_seconds,
        }
    }

    fn access_validity_secs(&self, claims: &CustomClaims) -> i64 {
        if claims.is_system_user {
            self.system_validity_secs
        } else {
            self.human_validity_secs
        }
    }

    fn sign_access_token(
        &self,
        user_id: Uuid,
        session_handle: Uuid,
        claims: &CustomClaims,
    ) -> Result<(String, DateTime<Utc>), IdentityError> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.access_validity_secs(claims));
        let jwt = JwtClaims {
            sub: user_id,
            sid: session_handle,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            custom: claims.clone(),
        };
        let token = jsonwebtoken::encode(&Header::default(), &jwt, &self.encoding_key)
            .map_err(|e| IdentityError::Unavailable(anyhow::anyhow!("token signing failed: {e}")))?;
        Ok((token, expires_at))
    }

    /// Create a session row and mint the token pair.
    async fn mint(
        &self,
        user_id: Uuid,
        claims: &CustomClaims,
    ) -> Result<IssuedSession, IdentityError> {
        let (refresh_raw, refresh_hash) = token::generate_refresh_token();
        let refresh_expires = Utc::now() + Duration::days(REFRESH_VALIDITY_DAYS);

        let (session_handle,): (Uuid,) = sqlx::query_as(
            r"
            INSERT INTO identity_sessions (user_id, refresh_token_hash, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id
            ",
        )
        .bind(user_id)
        .bind(&refresh_hash)
        .bind(refresh_expires)
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        let (access_token, access_expires_at) =
            self.sign_access_token(user_id, session_handle, claims)?;

        Ok(IssuedSession {
            access_token,
            refresh_token: refresh_raw,
            session_handle,
            front: FrontInfo {
                user_id,
                access_expires_at,
            },
        })
    }

    async fn stored_claims(&self, user_id: Uuid) -> Result<CustomClaims, IdentityError> {
        let (value,): (serde_json::Value,) =
            sqlx::query_as("SELECT custom_claims FROM identity_users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(unavailable)?
                .ok_or(IdentityError::Invalid)?;
        serde_json::from_value(value)
            .map_err(|e| IdentityError::Unavailable(anyhow::anyhow!("malformed claims: {e}")))
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    #[tracing::instrument(skip(self, password, claims), fields(%email))]
    async fn create_email_password_user(
        &self,
        email: &str,
        password: &str,
        claims: CustomClaims,
    ) -> Result<Uuid, IdentityError> {
        let hash = password::hash_password(password).map_err(IdentityError::Unavailable)?;
        let claims_value = serde_json::to_value(&claims)
            .map_err(|e| IdentityError::Unavailable(anyhow::anyhow!("claims encoding: {e}")))?;

        let result: Result<(Uuid,), sqlx::Error> = sqlx::query_as(
            r"
            INSERT INTO identity_users (email, password_hash, custom_claims)
            VALUES (lower($1), $2, $3)
            RETURNING id
            ",
        )
        .bind(email)
        .bind(&hash)
        .bind(&claims_value)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok((id,)) => Ok(id),
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                Err(IdentityError::EmailExists)
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    #[tracing::instrument(skip(self, password), fields(%email))]
    async fn verify_email_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<IssuedSession, IdentityError> {
        let row: Option<(Uuid, String, serde_json::Value)> = sqlx::query_as(
            "SELECT id, password_hash, custom_claims FROM identity_users WHERE email = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        let Some((user_id, hash, claims_value)) = row else {
            return Err(IdentityError::InvalidCredentials);
        };

        let valid =
            password::verify_password(password, &hash).map_err(IdentityError::Unavailable)?;
        if !valid {
            return Err(IdentityError::InvalidCredentials);
        }

        let claims: CustomClaims = serde_json::from_value(claims_value)
            .map_err(|e| IdentityError::Unavailable(anyhow::anyhow!("malformed claims: {e}")))?;
        self.mint(user_id, &claims).await
    }

    async fn email_exists(&self, email: &str) -> Result<bool, IdentityError> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM identity_users WHERE email = lower($1))")
                .bind(email)
                .fetch_one(&self.pool)
                .await
                .map_err(unavailable)?;
        Ok(exists)
    }

    async fn issue_session(
        &self,
        user_id: Uuid,
        claims: CustomClaims,
    ) -> Result<IssuedSession, IdentityError> {
        self.mint(user_id, &claims).await
    }

    async fn verify_access_token(
        &self,
        token: &str,
        mode: VerifyMode,
    ) -> Result<SessionClaims, IdentityError> {
        let decoded = jsonwebtoken::decode::<JwtClaims>(
            token,
            &self.decoding_key,
            &Validation::default(),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => IdentityError::Expired,
            _ => IdentityError::Invalid,
        })?;

        let jwt = decoded.claims;

        if mode == VerifyMode::Stateful {
            let live: Option<(bool,)> = sqlx::query_as(
                r"
                SELECT (revoked_at IS NULL AND expires_at > now())
                FROM identity_sessions WHERE id = $1
                ",
            )
            .bind(jwt.sid)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

            if !matches!(live, Some((true,))) {
                return Err(IdentityError::Invalid);
            }
        }

        let issued_at = DateTime::from_timestamp(jwt.iat, 0).ok_or(IdentityError::Invalid)?;
        let expires_at = DateTime::from_timestamp(jwt.exp, 0).ok_or(IdentityError::Invalid)?;

        Ok(SessionClaims {
            user_id: jwt.sub,
            session_handle: jwt.sid,
            issued_at,
            expires_at,
            custom: jwt.custom,
        })
    }

    #[tracing::instrument(skip(self, refresh_token))]
    async fn refresh_session(&self, refresh_token: &str) -> Result<IssuedSession, IdentityError> {
        let hash = token::hash_token(refresh_token);

        let row: Option<(Uuid, Uuid, bool)> = sqlx::query_as(
            r"
            SELECT id, user_id, (revoked_at IS NULL AND expires_at > now())
            FROM identity_sessions WHERE refresh_token_hash = $1
            ",
        )
        .bind(&hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        let Some((session_handle, user_id, live)) = row else {
            return Err(IdentityError::Invalid);
        };
        if !live {
            return Err(IdentityError::Expired);
        }

        // Rotate the refresh token in place; the session handle is stable.
        let (new_refresh_raw, new_refresh_hash) = token::generate_refresh_token();
        sqlx::query(
            "UPDATE identity_sessions SET refresh_token_hash = $2 WHERE id = $1",
        )
        .bind(session_handle)
        .bind(&new_refresh_hash)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        let claims = self.stored_claims(user_id).await?;
        let (access_token, access_expires_at) =
            self.sign_access_token(user_id, session_handle, &claims)?;

        Ok(IssuedSession {
            access_token,
            refresh_token: new_refresh_raw,
            session_handle,
            front: FrontInfo {
                user_id,
                access_expires_at,
            },
        })
    }

    async fn revoke_session(&self, session_handle: Uuid) -> Result<(), IdentityError> {
        sqlx::query(
            "UPDATE identity_sessions SET revoked_at = now() WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(session_handle)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn revoke_all_sessions_for_user(&self, user_id: Uuid) -> Result<(), IdentityError> {
        sqlx::query(
            r"
            UPDATE identity_sessions SET revoked_at = now()
            WHERE user_id = $1 AND revoked_at IS NULL
            ",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn user_email(&self, user_id: Uuid) -> Result<Option<String>, IdentityError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT email FROM identity_users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(unavailable)?;
        Ok(row.map(|(email,)| email))
    }

    async fn update_password(
        &self,
        user_id: Uuid,
        new_password: &str,
    ) -> Result<(), IdentityError> {
        let hash = password::hash_password(new_password).map_err(IdentityError::Unavailable)?;
        let result = sqlx::query("UPDATE identity_users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(&hash)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        if result.rows_affected() == 0 {
            return Err(IdentityError::Invalid);
        }
        Ok(())
    }
}

fn unavailable(err: sqlx::Error) -> IdentityError {
    IdentityError::Unavailable(anyhow::anyhow!("identity store error: {err}"))
}
