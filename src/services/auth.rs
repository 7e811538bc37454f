use std::sync::{Arc, OnceLock};

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::{CreateUser, User, UserRepository, UserRole};
use crate::error::{AppError, AppResult};
use crate::AppState;

const PASSWORD_RESET_PURPOSE: &str = "password_reset";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
    /// Set on special-purpose tokens. Session tokens carry none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

/// Claims of a password reset token. `pwd` fingerprints the password hash the
/// token was issued against, so the token stops working once it is used.
#[derive(Debug, Serialize, Deserialize)]
struct PasswordResetClaims {
    sub: String,
    exp: usize,
    iat: usize,
    purpose: String,
    pwd: String,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: Option<UserRole>,
}

pub struct AuthService;

impl AuthService {
    /// Create a signed JWT for a user id
    pub fn create_jwt(state: &Arc<AppState>, user_id: &str) -> AppResult<String> {
        let now = Utc::now();
        let exp = now + Duration::hours(state.config.jwt.expiration_hours);
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
            purpose: None,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(state.config.jwt.secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Decode and validate a JWT, returning the claims
    pub fn decode_jwt(state: &Arc<AppState>, token: &str) -> AppResult<Claims> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.config.jwt.secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    /// Resolve the user behind a session token. Special-purpose tokens are rejected.
    pub async fn get_user_from_token(state: &Arc<AppState>, token: &str) -> AppResult<User> {
        let claims = Self::decode_jwt(state, token)?;
        if claims.purpose.is_some() {
            return Err(AppError::Unauthorized);
        }
        let user = UserRepository::find_by_id(&state.db, &claims.sub)
            .await?
            .ok_or(AppError::Unauthorized)?;
        Ok(user)
    }

    pub fn hash_password(state: &Arc<AppState>, password: &str) -> AppResult<String> {
        Ok(bcrypt::hash(password, state.config.password.bcrypt_cost)?)
    }

    pub fn verify_password(password: &str, password_hash: &str) -> AppResult<bool> {
        Ok(bcrypt::verify(password, password_hash)?)
    }

    fn dummy_password_hash(cost: u32) -> &'static str {
        static DUMMY: OnceLock<String> = OnceLock::new();
        DUMMY.get_or_init(|| bcrypt::hash("emdr-academy-unknown-account", cost).unwrap_or_default())
    }

    fn check_password_strength(state: &Arc<AppState>, password: &str) -> AppResult<()> {
        let min = state.config.password.min_length;
        if password.chars().count() < min {
            return Err(AppError::Validation(format!(
                "password must be at least {} characters",
                min
            )));
        }
        Ok(())
    }

    fn check_email(email: &str) -> AppResult<String> {
        let email = email.trim().to_lowercase();
        let valid = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
            }
            None => false,
        };
        if !valid {
            return Err(AppError::Validation(format!("invalid email: '{}'", email)));
        }
        Ok(email)
    }

    /// Register an account and return it with a session token.
    ///
    /// Self-registration always yields a student; only an administrator
    /// (`registered_by`) may create consultant or admin accounts.
    pub async fn register(
        state: &Arc<AppState>,
        registration: Registration,
        registered_by: Option<&User>,
    ) -> AppResult<(User, String)> {
        let email = Self::check_email(&registration.email)?;
        Self::check_password_strength(state, &registration.password)?;

        let first_name = registration.first_name.trim();
        let last_name = registration.last_name.trim();
        if first_name.is_empty() || last_name.is_empty() {
            return Err(AppError::Validation(
                "firstName and lastName are required".to_string(),
            ));
        }

        let role = match registration.role {
            None | Some(UserRole::Student) => UserRole::Student,
            Some(role) if registered_by.is_some_and(User::is_admin) => role,
            Some(_) => return Err(AppError::Forbidden),
        };

        if UserRepository::find_by_email(&state.db, &email)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(format!(
                "An account with email {} already exists",
                email
            )));
        }

        let password_hash = Self::hash_password(state, &registration.password)?;
        let user = UserRepository::create(
            &state.db,
            CreateUser {
                email,
                password_hash,
                role,
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                phone: registration.phone.filter(|p| !p.trim().is_empty()),
            },
        )
        .await?;

        tracing::info!("Registered user {} with role {}", user.id, user.role);
        let token = Self::create_jwt(state, &user.id)?;
        Ok((user, token))
    }

    /// Check credentials. Unknown email and wrong password fail identically.
    pub async fn login(
        state: &Arc<AppState>,
        email: &str,
        password: &str,
    ) -> AppResult<(User, String)> {
        let Some(user) = UserRepository::find_by_email(&state.db, email).await? else {
            // Spend the same bcrypt work as a wrong password would.
            let dummy = Self::dummy_password_hash(state.config.password.bcrypt_cost);
            let _ = bcrypt::verify(password, dummy);
            tracing::debug!("Failed login attempt for unknown email");
            return Err(AppError::Unauthorized);
        };

        if !Self::verify_password(password, &user.password_hash)? {
            tracing::debug!("Failed login attempt for user {}", user.id);
            return Err(AppError::Unauthorized);
        }

        let token = Self::create_jwt(state, &user.id)?;
        Ok((user, token))
    }

    fn password_fingerprint(password_hash: &str) -> String {
        let digest = Sha256::digest(password_hash.as_bytes());
        hex::encode(digest)[..16].to_string()
    }

    /// Issue a reset token for the account with this email, if any.
    ///
    /// Returns `None` for unknown emails so callers can respond identically
    /// either way.
    pub async fn request_password_reset(
        state: &Arc<AppState>,
        email: &str,
    ) -> AppResult<Option<String>> {
        let Some(user) = UserRepository::find_by_email(&state.db, email).await? else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(None);
        };

        let now = Utc::now();
        let exp = now + Duration::minutes(state.config.jwt.password_reset_ttl_minutes);
        let claims = PasswordResetClaims {
            sub: user.id.clone(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
            purpose: PASSWORD_RESET_PURPOSE.to_string(),
            pwd: Self::password_fingerprint(&user.password_hash),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(state.config.jwt.secret.as_bytes()),
        )?;
        tracing::info!("Issued password reset token for user {}", user.id);
        Ok(Some(token))
    }

    /// Set a new password using a reset token.
    pub async fn confirm_password_reset(
        state: &Arc<AppState>,
        token: &str,
        new_password: &str,
    ) -> AppResult<()> {
        let claims = decode::<PasswordResetClaims>(
            token,
            &DecodingKey::from_secret(state.config.jwt.secret.as_bytes()),
            &Validation::default(),
        )?
        .claims;

        if claims.purpose != PASSWORD_RESET_PURPOSE {
            return Err(AppError::Unauthorized);
        }

        let user = UserRepository::find_by_id(&state.db, &claims.sub)
            .await?
            .ok_or(AppError::Unauthorized)?;
        if Self::password_fingerprint(&user.password_hash) != claims.pwd {
            return Err(AppError::BadRequest(
                "Reset token has already been used".to_string(),
            ));
        }

        Self::check_password_strength(state, new_password)?;
        let password_hash = Self::hash_password(state, new_password)?;
        UserRepository::update_password(&state.db, &user.id, &password_hash).await?;

        tracing::info!("Password reset completed for user {}", user.id);
        Ok(())
    }

    /// Generate random string
    pub fn generate_random_string(length: usize) -> String {
        use rand::Rng;
        const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::thread_rng();
        (0..length)
            .map(|_| {
                let idx = rng.gen_range(0..CHARSET.len());
                CHARSET[idx] as char
            })
            .collect()
    }
}
