use crate::db::schema::users;
use crate::profile::{Author, Profile};
use crate::types::{ApiError, ValidationError};
use crate::utils::serialize_date;
use chrono::{Duration, NaiveDateTime, Utc};
use diesel::prelude::*;
use hmac::{Hmac, Mac};
use jwt::{Header, RegisteredClaims, SignWithKey, Token, VerifyWithKey};
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::{Params, Pbkdf2};
use serde::Serialize;
use sha2::Sha256;
use std::borrow::Cow;

const PASSWORD_ROUNDS: u32 = 10_000;
const TOKEN_ISSUER: &str = "yatube";

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Serialize, AsChangeset)]
#[diesel(table_name = users)]
pub struct User {
    #[serde(skip_serializing)]
    pub id: i32,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(serialize_with = "serialize_date")]
    pub date_joined: NaiveDateTime,
}

fn invalid_token() -> ApiError {
    ValidationError::from("token", "Invalid jwt token").into()
}

impl User {
    pub fn make_password(password: &str) -> Result<String, ApiError> {
        let salt: [u8; 16] = rand::random();
        let salt = SaltString::encode_b64(&salt).map_err(|_| ApiError::Internal)?;
        let params = Params {
            rounds: PASSWORD_ROUNDS,
            output_length: 32,
        };
        let hash = Pbkdf2
            .hash_password_customized(password.as_bytes(), None, None, params, &salt)
            .map_err(|_| ApiError::Internal)?;
        Ok(hash.to_string())
    }

    pub fn new_password(&mut self, password: &str) -> Result<(), ApiError> {
        self.password_hash = User::make_password(password)?;
        Ok(())
    }

    pub fn verify_password(&self, password_to_verify: &str) -> bool {
        match PasswordHash::new(&self.password_hash) {
            Ok(parsed) => Pbkdf2
                .verify_password(password_to_verify.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    // Tokens are signed with the password hash, changing the password
    // revokes every token issued before.
    fn signing_key(&self) -> Result<Hmac<Sha256>, ApiError> {
        Hmac::new_from_slice(self.password_hash.as_bytes()).map_err(|_| ApiError::Internal)
    }

    pub fn token(&self, ttl_hours: i64) -> Result<String, ApiError> {
        let expires = Utc::now() + Duration::hours(ttl_hours);
        let claims = RegisteredClaims {
            issuer: Some(TOKEN_ISSUER.to_string()),
            subject: Some(self.id.to_string()),
            expiration: Some(expires.timestamp().max(0) as u64),
            ..Default::default()
        };
        claims
            .sign_with_key(&self.signing_key()?)
            .map_err(|_| ApiError::Internal)
    }

    pub fn load_from_token(
        jwt_token: &str,
        connection: &mut SqliteConnection,
    ) -> Result<User, ApiError> {
        use crate::db::schema::users::dsl::*;

        let unverified: Token<Header, RegisteredClaims, _> =
            Token::parse_unverified(jwt_token).map_err(|_| invalid_token())?;
        let user_id = unverified
            .claims()
            .subject
            .as_ref()
            .and_then(|sub| sub.parse::<i32>().ok())
            .ok_or_else(invalid_token)?;

        let user = users
            .find(user_id)
            .first::<User>(connection)
            .optional()?
            .ok_or_else(invalid_token)?;

        let claims: RegisteredClaims = jwt_token
            .verify_with_key(&user.signing_key()?)
            .map_err(|_| invalid_token())?;
        match claims.expiration {
            Some(expires) if expires as i64 > Utc::now().timestamp() => Ok(user),
            _ => Err(invalid_token()),
        }
    }

    pub fn load_by_name(name: &str, connection: &mut SqliteConnection) -> Result<User, ApiError> {
        use crate::db::schema::users::dsl::*;
        users
            .filter(username.eq(name))
            .get_result::<User>(connection)
            .map_err(|e| e.into())
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn author(&self) -> Author {
        Author {
            username: self.username.clone(),
            full_name: self.full_name(),
        }
    }

    pub fn profile(&self, following: bool) -> Profile<'_> {
        Profile {
            username: Cow::Borrowed(&self.username),
            full_name: Cow::Owned(self.full_name()),
            following,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub date_joined: NaiveDateTime,
}
