pub mod models;
mod utils;

use self::models::{NewUser, User};
use self::utils::*;
use crate::cache::PageCache;
use crate::config::AppConfig;
use crate::db::schema::users;
use crate::db::DbConnection;
use crate::types::{ApiError, ApiResult, Validate, ValidationError};
use diesel::prelude::*;
use diesel::{delete as diesel_delete, insert_into, update as diesel_update};
use log::{info, warn};
use rocket::http::Status;
use rocket::outcome::Outcome;
use rocket::request::{self, FromRequest, Request};
use rocket::serde::json::Json;
use rocket::State;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type CurrentUser = Result<User, ApiError>;

#[derive(Debug, Deserialize)]
struct RegistrationDetails {
    username: String,
    email: String,
    password: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
}

#[derive(Debug, Deserialize)]
pub struct Registration {
    user: RegistrationDetails,
}

impl Validate for Registration {
    type Error = ApiError;
    fn validate(self, connection: &mut SqliteConnection) -> Result<Self, Self::Error> {
        let mut errors = ValidationError::default();

        collect(validate_email(&self.user.email, None, connection), &mut errors)?;
        collect(validate_username(&self.user.username, None, connection), &mut errors)?;
        if let Err(e) = validate_password(&self.user.password) {
            errors.merge(e);
        }

        errors.or_ok(self).map_err(|e| e.into())
    }
}

#[derive(Serialize)]
struct AuthenticatedUser<'a> {
    #[serde(flatten)]
    user: &'a User,
    token: String,
}

fn with_token(user: &User, config: &AppConfig) -> ApiResult<Value> {
    let token = user.token(config.token_ttl_hours)?;
    Ok(Json(json!({ "user": AuthenticatedUser { user, token } })))
}

#[post("/users", format = "application/json", data = "<registration>")]
pub fn register(
    mut connection: DbConnection,
    config: &State<AppConfig>,
    registration: Json<Registration>,
) -> ApiResult<Value> {
    let registration = registration.into_inner().validate(&mut connection)?;
    let details = registration.user;
    let new_user = NewUser {
        username: details.username,
        email: details.email,
        first_name: details.first_name,
        last_name: details.last_name,
        password_hash: User::make_password(&details.password)?,
        date_joined: crate::utils::now(),
    };

    let user = insert_into(users::table)
        .values(&new_user)
        .get_result::<User>(&mut *connection)?;
    info!("registered user {}", user.username);
    with_token(&user, config)
}

#[derive(Debug, Deserialize)]
struct LoginDetails {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct Login {
    user: LoginDetails,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let token = match request.headers().get_one("Authorization") {
            Some(header) => header.trim_start_matches("Token ").trim().to_string(),
            None => return Outcome::Error((Status::Unauthorized, ApiError::Unauthorized)),
        };
        let mut connection = match DbConnection::from_request(request).await {
            Outcome::Success(connection) => connection,
            _ => return Outcome::Error((Status::ServiceUnavailable, ApiError::Internal)),
        };
        match User::load_from_token(&token, &mut connection) {
            Ok(user) => Outcome::Success(user),
            Err(ApiError::Validation(_)) => {
                Outcome::Error((Status::Unauthorized, ApiError::Unauthorized))
            }
            Err(e) => Outcome::Error((Status::ServiceUnavailable, e)),
        }
    }
}

#[post("/users/login", format = "application/json", data = "<login>")]
pub fn login(
    mut connection: DbConnection,
    config: &State<AppConfig>,
    login: Json<Login>,
) -> ApiResult<Value> {
    use crate::db::schema::users::dsl::*;
    let user = users
        .filter(username.eq(&login.user.username))
        .first::<User>(&mut *connection)
        .optional()?;
    match user {
        Some(ref user) if user.verify_password(&login.user.password) => with_token(user, config),
        _ => {
            warn!("failed login for {}", login.user.username);
            let mut error = ValidationError::default();
            error.add_error("password", "Invalid username or password");
            Err(error.into())
        }
    }
}

#[get("/user")]
pub fn current(user: CurrentUser, config: &State<AppConfig>) -> ApiResult<Value> {
    with_token(&user?, config)
}

#[derive(Debug, Deserialize)]
pub struct UpdateUser {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub user: UpdateUser,
}

#[put("/user", format = "application/json", data = "<update>")]
pub fn update(
    current_user: CurrentUser,
    mut connection: DbConnection,
    config: &State<AppConfig>,
    cache: &State<PageCache>,
    update: Json<Update>,
) -> ApiResult<Value> {
    let mut user = current_user?;
    let mut error = ValidationError::default();
    let update = update.into_inner().user;

    if let Some(first_name) = update.first_name {
        user.first_name = first_name;
    }
    if let Some(last_name) = update.last_name {
        user.last_name = last_name;
    }

    if let Some(new_email) = update.email {
        collect(validate_email(&new_email, Some(user.id), &mut connection), &mut error)?;
        user.email = new_email;
    }

    if let Some(new_username) = update.username {
        collect(
            validate_username(&new_username, Some(user.id), &mut connection),
            &mut error,
        )?;
        user.username = new_username;
    }

    if let Some(new_password) = update.password {
        match validate_password(&new_password) {
            Err(e) => error.merge(e),
            Ok(_) => user.new_password(&new_password)?,
        }
    }

    if !error.empty() {
        Err(error.into())
    } else {
        diesel_update(&user).set(&user).execute(&mut *connection)?;
        info!("updated user {}", user.username);
        // cached index pages embed author names
        cache.invalidate();
        with_token(&user, config)
    }
}

#[delete("/users/<name>")]
pub fn remove(
    current_user: CurrentUser,
    mut connection: DbConnection,
    config: &State<AppConfig>,
    cache: &State<PageCache>,
    name: &str,
) -> ApiResult<Value> {
    let current = current_user?;
    if !config.is_admin(&current.username) {
        warn!("{} tried to delete user {}", current.username, name);
        return Err(ApiError::Forbidden);
    }
    let user = User::load_by_name(name, &mut connection)?;
    diesel_delete(&user).execute(&mut *connection)?;
    info!("user {} deleted by {}", user.username, current.username);
    cache.invalidate();
    Ok(Json(json!({ "deleted": user.username })))
}
