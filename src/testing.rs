use crate::comment::{Comment, NewComment};
use crate::db::schema::{comments, follows, groups, posts};
use crate::db::Pool;
use crate::group::Group;
use crate::post::{NewPost, Post};
use crate::users::models::User;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, PooledConnection};
use diesel::{delete, insert_into};
use rocket::http::{ContentType, Header};
use rocket::local::blocking::Client;
use serde_json::Value;
use std::path::PathBuf;
use tempfile::TempDir;

pub const PASSWORD: &str = "password123";

/// A two by one pixel GIF.
pub const GIF: &[u8] = b"\x47\x49\x46\x38\x39\x61\x02\x00\
\x01\x00\x80\x00\x00\x00\x00\x00\
\xFF\xFF\xFF\x21\xF9\x04\x00\x00\
\x00\x00\x00\x2C\x00\x00\x00\x00\
\x02\x00\x01\x00\x00\x02\x02\x0C\
\x0A\x00\x3B";

const BOUNDARY: &str = "X-YATUBE-BOUNDARY";

/// A rocket instance over its own SQLite file and media directory.
pub struct TestApp {
    pub client: Client,
    dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        TestApp::with_cache_ttl(0)
    }

    pub fn with_cache_ttl(ttl: u64) -> Self {
        let dir = tempfile::tempdir().expect("temporary directory");
        let database_url = dir.path().join("yatube.sqlite3").display().to_string();
        let figment = rocket::Config::figment()
            .merge(("database_url", database_url))
            .merge(("media_dir", dir.path().join("media")))
            .merge(("index_cache_ttl", ttl))
            .merge(("posts_per_page", 10))
            .merge(("admins", vec!["admin"]))
            .merge(("log_level", "off"));
        let client = Client::tracked(crate::build(figment)).expect("valid rocket instance");
        TestApp { client, dir }
    }

    pub fn media_dir(&self) -> PathBuf {
        self.dir.path().join("media")
    }

    pub fn conn(&self) -> PooledConnection<ConnectionManager<SqliteConnection>> {
        self.client
            .rocket()
            .state::<Pool>()
            .expect("managed pool")
            .get()
            .expect("pooled connection")
    }

    pub fn auth(token: &str) -> Header<'static> {
        Header::new("Authorization", format!("Token {}", token))
    }

    /// Registers `username` and returns a token for it.
    pub fn register(&self, username: &str) -> String {
        let body = json!({"user": {
            "username": username,
            "email": format!("{}@example.com", username),
            "password": PASSWORD,
        }});
        let response = self
            .client
            .post("/api/users")
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch();
        let body = response.into_json::<Value>().expect("registration response");
        body["user"]["token"].as_str().expect("token").to_string()
    }

    pub fn user(&self, username: &str) -> User {
        let mut connection = self.conn();
        User::load_by_name(username, &mut connection).expect("registered user")
    }

    pub fn create_group(&self, title: &str, slug: &str) -> Group {
        let mut connection = self.conn();
        insert_into(groups::table)
            .values((
                groups::title.eq(title),
                groups::slug.eq(slug),
                groups::description.eq("Test group description"),
            ))
            .get_result::<Group>(&mut *connection)
            .expect("group")
    }

    pub fn create_post(&self, author_id: i32, text: &str, group_id: Option<i32>) -> Post {
        let mut connection = self.conn();
        let new_post = NewPost {
            title: String::new(),
            text: text.to_string(),
            pub_date: crate::utils::now(),
            author_id,
            group_id,
            image: None,
        };
        insert_into(posts::table)
            .values(&new_post)
            .get_result::<Post>(&mut *connection)
            .expect("post")
    }

    pub fn create_comment(&self, post_id: i32, author_id: i32, text: &str) -> Comment {
        let mut connection = self.conn();
        let new_comment = NewComment {
            post_id,
            author_id,
            text: text.to_string(),
            created: crate::utils::now(),
        };
        insert_into(comments::table)
            .values(&new_comment)
            .get_result::<Comment>(&mut *connection)
            .expect("comment")
    }

    pub fn delete_post(&self, post_id: i32) {
        let mut connection = self.conn();
        delete(posts::table.find(post_id))
            .execute(&mut *connection)
            .expect("deleted post");
    }

    pub fn count_posts(&self) -> i64 {
        let mut connection = self.conn();
        posts::table.count().get_result(&mut *connection).expect("count")
    }

    pub fn count_comments(&self) -> i64 {
        let mut connection = self.conn();
        comments::table.count().get_result(&mut *connection).expect("count")
    }

    pub fn count_follows(&self) -> i64 {
        let mut connection = self.conn();
        follows::table.count().get_result(&mut *connection).expect("count")
    }
}

pub fn form_body(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(name, value)| {
            format!("{}={}", urlencoding::encode(name), urlencoding::encode(value))
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// A `multipart/form-data` body with text fields and an optional file given
/// as (field, file name, content type, bytes).
pub fn multipart_body(
    fields: &[(&str, &str)],
    file: Option<(&str, &str, &str, &[u8])>,
) -> (ContentType, Vec<u8>) {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((name, file_name, content_type, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                BOUNDARY, name, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    let content_type =
        ContentType::new("multipart", "form-data").with_params(("boundary", BOUNDARY));
    (content_type, body)
}
