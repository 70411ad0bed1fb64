use crate::types::{ApiError, ValidationError};
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::select;
use regex::Regex;

lazy_static! {
    static ref EMAIL_RE: Regex = {
        let pattern = r"\A[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\z";
        Regex::new(pattern).unwrap()
    };
    static ref USERNAME_RE: Regex = Regex::new(r"\A[\w.@+-]+\z").unwrap();
}

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn validate_email_re(email: &str) -> Result<(), ValidationError> {
    if !EMAIL_RE.is_match(&email.to_lowercase()) {
        Err(ValidationError::from(
            "email",
            format!("Invalid email: {}", email),
        ))
    } else {
        Ok(())
    }
}

pub fn validate_username_re(username: &str) -> Result<(), ValidationError> {
    let mut errors = ValidationError::default();
    if username.chars().count() < 3 {
        errors.add_error("username", format!("username too short: {}", username));
    }
    if !USERNAME_RE.is_match(username) {
        errors.add_error(
            "username",
            "Letters, digits and @/./+/-/_ only.",
        );
    }
    errors.or_ok(())
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        Err(ValidationError::from("password", "Password too short"))
    } else {
        Ok(())
    }
}

/// Checks the format of `email` and that no user other than `except` owns it.
pub fn validate_email(
    email_to_validate: &str,
    except: Option<i32>,
    connection: &mut SqliteConnection,
) -> Result<(), ApiError> {
    use crate::db::schema::users::dsl::*;
    let mut errors = ValidationError::default();
    if let Err(e) = validate_email_re(email_to_validate) {
        errors.merge(e);
    }

    let email_exists = select(exists(
        users
            .filter(email.eq(email_to_validate))
            .filter(id.ne(except.unwrap_or(0))),
    ))
    .get_result::<bool>(connection)?;
    if email_exists {
        errors.add_error("email", "Email already exists");
    }
    errors.or_ok(()).map_err(|e| e.into())
}

pub fn validate_username(
    username_to_validate: &str,
    except: Option<i32>,
    connection: &mut SqliteConnection,
) -> Result<(), ApiError> {
    use crate::db::schema::users::dsl::*;
    let mut errors = ValidationError::default();
    if let Err(e) = validate_username_re(username_to_validate) {
        errors.merge(e);
    }

    let username_exists = select(exists(
        users
            .filter(username.eq(username_to_validate))
            .filter(id.ne(except.unwrap_or(0))),
    ))
    .get_result::<bool>(connection)?;
    if username_exists {
        errors.add_error("username", "username already exists");
    }
    errors.or_ok(()).map_err(|e| e.into())
}

/// Splits a validation failure off from other errors so field messages can
/// be merged; anything else is passed up.
pub fn collect(result: Result<(), ApiError>, errors: &mut ValidationError) -> Result<(), ApiError> {
    match result {
        Ok(()) => Ok(()),
        Err(ApiError::Validation(e)) => {
            errors.merge(e);
            Ok(())
        }
        Err(other) => Err(other),
    }
}
