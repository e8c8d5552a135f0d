use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::core::config::Settings;
use crate::db::types::UserRole;

#[derive(Debug, Error)]
pub(crate) enum SecurityError {
    #[error("jwt encoding failed")]
    JwtEncoding,
    #[error("jwt decoding failed")]
    JwtDecoding,
    #[error("invalid subject claim")]
    InvalidSubject,
    #[error("unsupported jwt algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// Tokens are issued elsewhere; the claims are trusted verbatim once the signature checks out.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Claims {
    pub(crate) sub: String,
    pub(crate) role: UserRole,
    pub(crate) exp: i64,
}

impl Claims {
    pub(crate) fn user_id(&self) -> Result<Uuid, SecurityError> {
        Uuid::parse_str(&self.sub).map_err(|_| SecurityError::InvalidSubject)
    }
}

#[cfg_attr(not(test), allow(dead_code))]
pub(crate) fn create_access_token(
    user_id: Uuid,
    role: UserRole,
    settings: &Settings,
    expires_in: time::Duration,
) -> Result<String, SecurityError> {
    let algorithm = algorithm_from_settings(settings)?;
    let expire = OffsetDateTime::now_utc() + expires_in;

    let claims = Claims { sub: user_id.to_string(), role, exp: expire.unix_timestamp() };

    encode(
        &jsonwebtoken::Header::new(algorithm),
        &claims,
        &EncodingKey::from_secret(settings.security().secret_key.as_bytes()),
    )
    .map_err(|_| SecurityError::JwtEncoding)
}

pub(crate) fn verify_token(token: &str, settings: &Settings) -> Result<Claims, SecurityError> {
    let algorithm = algorithm_from_settings(settings)?;
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = true;
    validation.required_spec_claims.insert("exp".to_string());
    validation.required_spec_claims.insert("sub".to_string());

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(settings.security().secret_key.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| SecurityError::JwtDecoding)
}

fn algorithm_from_settings(settings: &Settings) -> Result<Algorithm, SecurityError> {
    match settings.security().algorithm.as_str() {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        other => Err(SecurityError::UnsupportedAlgorithm(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[tokio::test]
    async fn jwt_roundtrip_keeps_role() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        let settings = Settings::load().expect("settings");
        let user_id = Uuid::new_v4();

        let token =
            create_access_token(user_id, UserRole::Admin, &settings, time::Duration::minutes(1))
                .expect("token");
        let claims = verify_token(&token, &settings).expect("claims");

        assert_eq!(claims.user_id().expect("uuid"), user_id);
        assert_eq!(claims.role, UserRole::Admin);
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        let settings = Settings::load().expect("settings");

        let token = create_access_token(
            Uuid::new_v4(),
            UserRole::Student,
            &settings,
            time::Duration::minutes(-10),
        )
        .expect("token");

        assert!(matches!(verify_token(&token, &settings), Err(SecurityError::JwtDecoding)));
    }

    #[tokio::test]
    async fn token_signed_with_other_key_is_rejected() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        let settings = Settings::load().expect("settings");
        let token = create_access_token(
            Uuid::new_v4(),
            UserRole::Student,
            &settings,
            time::Duration::minutes(5),
        )
        .expect("token");

        std::env::set_var("SECRET_KEY", "a-different-secret");
        let other = Settings::load().expect("settings");
        test_support::set_test_env();

        assert!(verify_token(&token, &other).is_err());
    }

    #[test]
    fn non_uuid_subject_is_invalid() {
        let claims = Claims { sub: "user-123".to_string(), role: UserRole::Student, exp: 0 };
        assert!(matches!(claims.user_id(), Err(SecurityError::InvalidSubject)));
    }
}
