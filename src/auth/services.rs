use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{LoginData, LoginRequest, PublicUser, RegisterForm},
        jwt::TokenPair,
        password::{hash_password_async, verify_password_async},
        repo_types::NewUser,
    },
    error::AppError,
    images::services::upload_image,
    state::AppState,
};

const AVATAR_FOLDER: &str = "avatars";
const COVER_FOLDER: &str = "covers";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn required(field: Option<String>) -> Result<String, AppError> {
    field
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Validation("All fields are required".into()))
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

#[instrument(skip_all)]
pub async fn register_user(state: &AppState, form: RegisterForm) -> Result<PublicUser, AppError> {
    let username = required(form.username)?.trim().to_lowercase();
    let full_name = required(form.full_name)?.trim().to_string();
    let email = required(form.email)?.trim().to_lowercase();
    let password = required(form.password)?;

    if !is_valid_email(&email) {
        warn!(%username, "invalid email");
        return Err(AppError::Validation("Invalid email".into()));
    }

    if state
        .users
        .find_by_username_or_email(Some(&username), Some(&email))
        .await?
        .is_some()
    {
        warn!(%username, "username or email already registered");
        return Err(AppError::Conflict(
            "User with username or email already exists".into(),
        ));
    }

    let avatar = form
        .avatar
        .ok_or_else(|| AppError::Validation("Avatar file is required".into()))?;

    let avatar_url = upload_image(state.storage.as_ref(), AVATAR_FOLDER, avatar)
        .await
        .map_err(|e| AppError::internal_with("Avatar file could not be uploaded", e))?;

    let cover_image_url = match form.cover_image {
        Some(cover) => Some(
            upload_image(state.storage.as_ref(), COVER_FOLDER, cover)
                .await
                .map_err(|e| AppError::internal_with("Cover image could not be uploaded", e))?,
        ),
        None => None,
    };

    let password_hash = hash_password_async(password)
        .await
        .map_err(|e| AppError::internal_with("Something went wrong while registering the user", e))?;

    let created = state
        .users
        .create(NewUser {
            username,
            email,
            full_name,
            password_hash,
            avatar_url,
            cover_image_url,
        })
        .await?;

    let user = state
        .users
        .find_by_id(created.id)
        .await?
        .ok_or_else(|| AppError::internal("Something went wrong while registering the user"))?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(user.into())
}

#[instrument(skip_all)]
pub async fn login_user(state: &AppState, req: LoginRequest) -> Result<LoginData, AppError> {
    let username = normalize(req.username);
    let email = normalize(req.email);
    if username.is_none() && email.is_none() {
        return Err(AppError::Validation("username or email is required".into()));
    }
    let password = req
        .password
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Password is required".into()))?;

    let user = state
        .users
        .find_by_username_or_email(username.as_deref(), email.as_deref())
        .await?
        .ok_or_else(|| {
            warn!(?username, by_email = email.is_some(), "login for unknown user");
            AppError::NotFound("User does not exist".into())
        })?;

    let ok = verify_password_async(password, user.password_hash.clone())
        .await
        .map_err(|e| AppError::internal_with("Could not verify password", e))?;
    if !ok {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::Unauthorized("Invalid user credentials".into()));
    }

    let tokens = state.tokens.issue(user.id).await?;
    info!(user_id = %user.id, "user logged in");
    Ok(LoginData {
        user: user.into(),
        tokens,
    })
}

#[instrument(skip(state))]
pub async fn logout_user(state: &AppState, user_id: Uuid) -> Result<(), AppError> {
    state.tokens.revoke(user_id).await?;
    info!(%user_id, "user logged out");
    Ok(())
}

#[instrument(skip_all)]
pub async fn refresh_session(
    state: &AppState,
    presented: Option<String>,
) -> Result<TokenPair, AppError> {
    let token = presented
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Unauthorized request".into()))?;
    state.tokens.rotate(&token).await
}
