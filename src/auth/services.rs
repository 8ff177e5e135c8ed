use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

use super::{
    dto::{AuthResponse, LoginRequest, MeResponse, PublicUser, RegisterRequest, UserProfile},
    password::{hash_password_blocking, verify_password_blocking},
};
use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

pub const MIN_PASSWORD_LEN: usize = 6;
const INVALID_CREDENTIALS: &str = "Invalid email or password";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex compiles");
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn validate_registration(email: &str, password: &str) -> AppResult<()> {
    if !is_valid_email(email) {
        return Err(AppError::validation("Invalid email format"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub(crate) fn validate_login(email: &str, password: &str) -> AppResult<()> {
    if !is_valid_email(email) {
        return Err(AppError::validation("Invalid email format"));
    }
    if password.is_empty() {
        return Err(AppError::validation("Password is required"));
    }
    Ok(())
}

pub async fn register(state: &AppState, req: RegisterRequest) -> AppResult<AuthResponse> {
    let email = normalize_email(&req.email);
    validate_registration(&email, &req.password)?;

    if state.users.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::Conflict("User with this email already exists".into()));
    }

    let hash = hash_password_blocking(req.password).await?;
    let Some(user) = state.users.create(&email, &hash).await? else {
        // lost a race against a concurrent registration
        warn!(email = %email, "email registered concurrently");
        return Err(AppError::Conflict("User with this email already exists".into()));
    };

    let token = state.jwt.sign(user.id, &user.email)?;
    info!(user_id = user.id, email = %user.email, "user registered");
    Ok(AuthResponse {
        message: "User registered successfully",
        user: PublicUser {
            id: user.id,
            email: user.email,
        },
        token,
    })
}

pub async fn login(state: &AppState, req: LoginRequest) -> AppResult<AuthResponse> {
    let email = normalize_email(&req.email);
    validate_login(&email, &req.password)?;

    let Some(user) = state.users.find_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
    };

    if !verify_password_blocking(req.password, user.password_hash.clone()).await? {
        warn!(user_id = user.id, "login invalid password");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
    }

    let token = state.jwt.sign(user.id, &user.email)?;
    info!(user_id = user.id, "user logged in");
    Ok(AuthResponse {
        message: "Login successful",
        user: PublicUser {
            id: user.id,
            email: user.email,
        },
        token,
    })
}

pub async fn me(state: &AppState, user_id: i64) -> AppResult<MeResponse> {
    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    Ok(MeResponse {
        user: UserProfile {
            id: user.id,
            email: user.email,
            created_at: user.created_at,
        },
    })
}
