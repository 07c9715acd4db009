use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::web::{
    ApiError, AppState, json_error,
    data::{StoreError, UserStore},
    models::{NewUser, UserSummary},
    token::TokenSigner,
};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("User already exists")]
    Conflict,
    #[error("User not found")]
    NotFound,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Server(#[from] anyhow::Error),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail(_) => AuthError::Conflict,
            StoreError::Database(err) => AuthError::Server(err.into()),
        }
    }
}

impl AuthError {
    fn into_api_error(self) -> ApiError {
        match self {
            AuthError::Conflict | AuthError::InvalidCredentials | AuthError::Validation(_) => {
                json_error(StatusCode::BAD_REQUEST, self.to_string())
            }
            AuthError::NotFound => json_error(StatusCode::NOT_FOUND, self.to_string()),
            AuthError::Server(err) => {
                error!(?err, "authentication request failed");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong")
            }
        }
    }
}

/// Caller identity resolved from a verified bearer token.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: Uuid,
}

pub struct JsonAuthError {
    pub status: StatusCode,
    pub message: &'static str,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub user: UserSummary,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub result: UserSummary,
    pub token: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let user = register_user(state.users(), body)
        .await
        .map_err(AuthError::into_api_error)?;

    info!(user_id = %user.id, "registered user");
    Ok((StatusCode::CREATED, Json(RegisterResponse { user })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    login_user(state.users(), state.tokens(), body)
        .await
        .map(Json)
        .map_err(AuthError::into_api_error)
}

pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserSummary>, ApiError> {
    let user = current_user_or_json_error(&state, &headers)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    match state.users().find_by_id(user.id).await {
        Ok(Some(row)) => Ok(Json(UserSummary::from(&row))),
        Ok(None) => Err(json_error(StatusCode::NOT_FOUND, "User not found")),
        Err(err) => Err(AuthError::from(err).into_api_error()),
    }
}

pub async fn register_user(
    store: &dyn UserStore,
    request: RegisterRequest,
) -> Result<UserSummary, AuthError> {
    let email = normalize_email(&request.email)?;
    if request.password.trim().is_empty() {
        return Err(AuthError::Validation("Password is required".to_string()));
    }

    if store.find_by_email(&email).await?.is_some() {
        return Err(AuthError::Conflict);
    }

    let username = match request.username.trim() {
        "" => email.split('@').next().unwrap_or_default().to_string(),
        name => name.to_string(),
    };

    let password_hash = hash_password(&request.password)
        .map_err(|err| anyhow::anyhow!("failed to hash password: {err}"))?;

    let row = store
        .insert(NewUser {
            username,
            email,
            password_hash,
        })
        .await?;

    Ok(UserSummary::from(&row))
}

pub async fn login_user(
    store: &dyn UserStore,
    tokens: &TokenSigner,
    request: LoginRequest,
) -> Result<LoginResponse, AuthError> {
    let email = normalize_email(&request.email)?;

    let user = store
        .find_by_email(&email)
        .await?
        .ok_or(AuthError::NotFound)?;

    if !verify_password(&request.password, &user.password_hash) {
        return Err(AuthError::InvalidCredentials);
    }

    let token = tokens
        .issue(&user.email, user.id)
        .map_err(|err| anyhow::anyhow!("failed to sign token: {err}"))?;

    Ok(LoginResponse {
        result: UserSummary::from(&user),
        token,
    })
}

/// Resolve the bearer token on a request into the calling user.
pub async fn current_user_or_json_error(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AuthUser, JsonAuthError> {
    let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() else {
        return Err(unauthorized("Missing bearer token"));
    };

    let claims = state.tokens().verify(bearer.token()).map_err(|err| {
        warn!(%err, "rejected bearer token");
        unauthorized("Invalid or expired token")
    })?;

    match state.users().find_by_id(claims.id).await {
        Ok(Some(user)) if user.email == claims.email => Ok(AuthUser { id: user.id }),
        Ok(_) => Err(unauthorized("Unknown user")),
        Err(err) => {
            error!(?err, "failed to resolve token subject");
            Err(JsonAuthError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "Something went wrong",
            })
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed = PasswordHash::new(password_hash);
    match parsed {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

fn normalize_email(raw: &str) -> Result<String, AuthError> {
    let email = raw.trim().to_ascii_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AuthError::Validation("A valid email is required".to_string()));
    }
    Ok(email)
}

fn unauthorized(message: &'static str) -> JsonAuthError {
    JsonAuthError {
        status: StatusCode::UNAUTHORIZED,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::data::MemoryUserStore;

    fn register_request(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: String::new(),
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    fn login_request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn password_hash_is_salted_and_verifiable() {
        let first = hash_password("hunter2").expect("hash");
        let second = hash_password("hunter2").expect("hash");

        assert_ne!(first, second);
        assert!(!first.contains("hunter2"));
        assert!(verify_password("hunter2", &first));
        assert!(!verify_password("hunter3", &first));
        assert!(!verify_password("hunter2", "not-a-phc-string"));
    }

    #[tokio::test]
    async fn registering_same_email_twice_conflicts() {
        let store = MemoryUserStore::new();
        let user = register_user(&store, register_request("ana@example.com", "pw"))
            .await
            .expect("first registration");
        assert_eq!(user.username, "ana");

        let err = register_user(&store, register_request(" Ana@Example.com ", "other"))
            .await
            .expect_err("second registration");
        assert!(matches!(err, AuthError::Conflict));
    }

    #[tokio::test]
    async fn stored_user_keeps_only_the_hash() {
        let store = MemoryUserStore::new();
        register_user(&store, register_request("ana@example.com", "s3cret"))
            .await
            .expect("register");

        let row = store
            .find_by_email("ana@example.com")
            .await
            .expect("lookup")
            .expect("present");
        assert_ne!(row.password_hash, "s3cret");
        assert!(row.password_hash.starts_with("$argon2"));
    }

    #[tokio::test]
    async fn wrong_password_never_yields_token() {
        let store = MemoryUserStore::new();
        let tokens = TokenSigner::new("test-secret-0123456789", 60);
        register_user(&store, register_request("ana@example.com", "right"))
            .await
            .expect("register");

        let err = login_user(&store, &tokens, login_request("ana@example.com", "wrong"))
            .await
            .err()
            .expect("login must fail");
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn unknown_email_is_not_found() {
        let store = MemoryUserStore::new();
        let tokens = TokenSigner::new("test-secret-0123456789", 60);

        let err = login_user(&store, &tokens, login_request("ghost@example.com", "pw"))
            .await
            .err()
            .expect("login must fail");
        assert!(matches!(err, AuthError::NotFound));
    }

    #[tokio::test]
    async fn login_token_carries_email_and_subject() {
        let store = MemoryUserStore::new();
        let tokens = TokenSigner::new("test-secret-0123456789", 60);
        let user = register_user(&store, register_request("ana@example.com", "pw"))
            .await
            .expect("register");

        let response = login_user(&store, &tokens, login_request("ana@example.com", "pw"))
            .await
            .expect("login");
        let claims = tokens.verify(&response.token).expect("valid token");

        assert_eq!(claims.email, "ana@example.com");
        assert_eq!(claims.id, user.id);
        assert_eq!(response.result.id, user.id);
    }

    #[tokio::test]
    async fn blank_inputs_are_rejected() {
        let store = MemoryUserStore::new();
        assert!(matches!(
            register_user(&store, register_request("  ", "pw")).await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            register_user(&store, register_request("ana@example.com", " ")).await,
            Err(AuthError::Validation(_))
        ));
    }
}
