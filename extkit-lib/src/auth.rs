//! Bearer token issuance.
//!
//! Tokens are HS256-signed JWTs carrying the user's name, email and roles.

use crate::error::ExtensionsError;
use crate::utils::ensure_not_blank;
use jsonwebtoken::{encode, get_current_timestamp, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Settings shared by every token this service issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BearerOptions {
    /// Symmetric signing secret (UTF-8 bytes are used as the HMAC key)
    pub secret_key: String,

    /// Authority URL advertised to clients; not written into tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,

    /// Value of the `aud` claim
    pub audience: String,

    /// Value of the `iss` claim
    pub valid_issuer: String,

    /// Token lifetime in days
    pub expires: i64,
}

/// The user a token is issued for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAuthProfile {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Claims written into issued tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BearerClaims {
    pub unique_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub role: Vec<String>,
    pub iss: String,
    pub aud: String,
    pub nbf: u64,
    pub exp: u64,
}

impl BearerClaims {
    /// Build the claims for `profile`, valid from `now` (seconds since the
    /// Unix epoch) for `options.expires` days.
    fn new(options: &BearerOptions, profile: &UserAuthProfile, now: u64) -> Self {
        let lifetime = u64::try_from(options.expires).unwrap_or(0) * SECONDS_PER_DAY;

        Self {
            unique_name: profile.name.clone(),
            email: profile.email.clone(),
            role: profile.roles.clone(),
            iss: options.valid_issuer.clone(),
            aud: options.audience.clone(),
            nbf: now,
            exp: now.saturating_add(lifetime),
        }
    }
}

impl BearerOptions {
    /// Issue a signed token for `profile`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a blank secret or a negative lifetime, `Token`
    /// if signing fails.
    pub fn issue_token(&self, profile: &UserAuthProfile) -> Result<String, ExtensionsError> {
        issue_token(self, profile)
    }
}

/// Issue an HS256 bearer token for `profile` signed with `options.secret_key`.
pub fn issue_token(
    options: &BearerOptions,
    profile: &UserAuthProfile,
) -> Result<String, ExtensionsError> {
    ensure_not_blank("secret_key", &options.secret_key)?;
    if options.expires < 0 {
        return Err(ExtensionsError::invalid_argument(
            "expires",
            "token lifetime cannot be negative",
        ));
    }

    let claims = BearerClaims::new(options, profile, get_current_timestamp());
    let key = EncodingKey::from_secret(options.secret_key.as_bytes());
    let token = encode(&Header::new(Algorithm::HS256), &claims, &key)?;

    debug!(
        issuer = %claims.iss,
        audience = %claims.aud,
        roles = claims.role.len(),
        "issued bearer token"
    );
    Ok(token)
}
