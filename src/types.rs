use crate::utils::try_respond;
use diesel::result::Error as DieselError;
use diesel::SqliteConnection;
use log::error;
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Error as IoError;

pub trait Validate
where
    Self: Sized,
{
    type Error;
    fn validate(self, connection: &mut SqliteConnection) -> Result<Self, Self::Error>;
}

#[derive(Debug)]
pub enum ApiError {
    Diesel(DieselError),
    Validation(ValidationError),
    Internal,
    Unauthorized,
    Forbidden,
}

impl From<DieselError> for ApiError {
    fn from(err: DieselError) -> ApiError {
        ApiError::Diesel(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> ApiError {
        ApiError::Validation(err)
    }
}

impl From<IoError> for ApiError {
    fn from(err: IoError) -> ApiError {
        error!("io error: {}", err);
        ApiError::Internal
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize, Default)]
pub struct ValidationError(HashMap<String, Vec<String>>);

impl ValidationError {
    pub fn add_error<K: Into<String>, V: Into<String>>(&mut self, key: K, val: V) {
        let entry = self.0.entry(key.into()).or_default();
        entry.push(val.into());
    }

    pub fn from<K: Into<String>, V: Into<String>>(key: K, val: V) -> Self {
        let mut error = ValidationError::default();
        error.add_error(key, val);
        error
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn merge(&mut self, other: ValidationError) {
        for (key, errors) in other.0.into_iter() {
            let entry = self.0.entry(key).or_default();
            entry.extend(errors);
        }
    }

    pub fn empty(&self) -> bool {
        self.len() == 0
    }

    /// `Ok(value)` when nothing was collected, the errors otherwise.
    pub fn or_ok<T>(self, value: T) -> Result<T, ValidationError> {
        if self.empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        match self {
            ApiError::Diesel(error) => match error {
                DieselError::NotFound => Err(Status::NotFound),
                other => {
                    error!("database error: {}", other);
                    Err(Status::InternalServerError)
                }
            },

            ApiError::Validation(error) => {
                let body = json!({ "errors": error });
                try_respond(req, body, Status::UnprocessableEntity)
            }

            ApiError::Unauthorized => {
                let body = json!({ "errors": {
                    "status": "401 Unauthorized"
                }});
                try_respond(req, body, Status::Unauthorized)
            }

            ApiError::Forbidden => {
                let body = json!({ "errors": {
                    "status": "403 Forbidden"
                }});
                try_respond(req, body, Status::Forbidden)
            }
            ApiError::Internal => Err(Status::InternalServerError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_messages_of_both_sides() {
        let mut errors = ValidationError::from("text", "This field is required.");
        let mut other = ValidationError::from("text", "Too long.");
        other.add_error("group", "Select a valid choice.");
        errors.merge(other);

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.0["text"].len(), 2);
        assert!(errors.0.contains_key("group"));
    }

    #[test]
    fn or_ok_passes_value_through_when_empty() {
        assert_eq!(ValidationError::default().or_ok(5).ok(), Some(5));
        assert!(ValidationError::from("slug", "taken").or_ok(5).is_err());
    }
}
