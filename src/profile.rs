use crate::config::AppConfig;
use crate::db::schema::{follows, posts};
use crate::db::DbConnection;
use crate::post::PostFilter;
use crate::types::*;
use crate::users::models::User;
use crate::users::CurrentUser;
use diesel::prelude::*;
use diesel::{delete, insert_into};
use log::info;
use rocket::serde::json::Json;
use rocket::State;
use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;

#[derive(Debug, Serialize)]
pub struct ProfileResponse<'a> {
    profile: Profile<'a>,
}

#[derive(Debug, Serialize)]
pub struct Profile<'a> {
    pub username: Cow<'a, str>,
    pub full_name: Cow<'a, str>,
    pub following: bool,
}

/// How a post or comment names its author.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Author {
    pub username: String,
    pub full_name: String,
}

/// Ids of the authors `user_id` follows.
pub fn following_list(user_id: i32, connection: &mut SqliteConnection) -> QueryResult<Vec<i32>> {
    follows::table
        .filter(follows::user_id.eq(user_id))
        .select(follows::author_id)
        .load::<i32>(connection)
}

#[get("/profiles/<name>?<page>")]
pub fn profile(
    mut connection: DbConnection,
    current_user: Option<User>,
    config: &State<AppConfig>,
    name: &str,
    page: Option<&str>,
) -> ApiResult<Value> {
    let author = User::load_by_name(name, &mut connection)?;
    let count = posts::table
        .filter(posts::author_id.eq(author.id))
        .count()
        .get_result::<i64>(&mut *connection)?;
    let following = match current_user {
        Some(current) => following_list(current.id, &mut connection)?.contains(&author.id),
        None => false,
    };
    let page = PostFilter::Author(author.id).page(page, config.posts_per_page, &mut connection)?;

    Ok(Json(json!({
        "author": author.profile(following),
        "count": count,
        "following": following,
        "page": page,
    })))
}

#[get("/follow?<page>")]
pub fn follow_index(
    mut connection: DbConnection,
    current_user: CurrentUser,
    config: &State<AppConfig>,
    page: Option<&str>,
) -> ApiResult<Value> {
    let current = current_user?;
    let authors = following_list(current.id, &mut connection)?;
    let page = PostFilter::Authors(authors).page(page, config.posts_per_page, &mut connection)?;
    Ok(Json(json!({ "title": "Following", "page": page })))
}

#[delete("/profiles/<name>/follow")]
pub fn unfollow(
    mut connection: DbConnection,
    current_user: CurrentUser,
    name: &str,
) -> ApiResult<ProfileResponse<'static>> {
    let current = current_user?;
    let author = User::load_by_name(name, &mut connection)?;
    let followed = following_list(current.id, &mut connection)?;
    if author.id != current.id && followed.contains(&author.id) {
        delete(
            follows::table
                .filter(follows::user_id.eq(current.id))
                .filter(follows::author_id.eq(author.id)),
        )
        .execute(&mut *connection)?;
        info!("{} unfollowed {}", current.username, author.username);
    }
    let profile = Profile {
        full_name: Cow::Owned(author.full_name()),
        username: Cow::Owned(author.username),
        following: false,
    };

    Ok(Json(ProfileResponse { profile }))
}

#[post("/profiles/<name>/follow")]
pub fn follow(
    mut connection: DbConnection,
    current_user: CurrentUser,
    name: &str,
) -> ApiResult<ProfileResponse<'static>> {
    let current = current_user?;
    let author = User::load_by_name(name, &mut connection)?;
    let following = if author.id == current.id {
        false
    } else {
        if !following_list(current.id, &mut connection)?.contains(&author.id) {
            insert_into(follows::table)
                .values((follows::user_id.eq(current.id), follows::author_id.eq(author.id)))
                .on_conflict_do_nothing()
                .execute(&mut *connection)?;
            info!("{} followed {}", current.username, author.username);
        }
        true
    };
    let profile = Profile {
        full_name: Cow::Owned(author.full_name()),
        username: Cow::Owned(author.username),
        following,
    };

    Ok(Json(ProfileResponse { profile }))
}

#[cfg(test)]
mod tests {
    use crate::testing::TestApp;
    use rocket::http::Status;
    use serde_json::Value;

    #[test]
    fn profile_counts_and_pages_author_posts() {
        let app = TestApp::new();
        app.register("auth");
        let author = app.user("auth");
        for n in 0..13 {
            app.create_post(author.id, &format!("post {}", n), None);
        }

        let body = app.client.get("/api/profiles/auth").dispatch().into_json::<Value>().unwrap();
        assert_eq!(body["count"], 13);
        assert_eq!(body["following"], false);
        assert_eq!(body["page"]["items"].as_array().unwrap().len(), 10);
        assert_eq!(body["page"]["items"][0]["text"], "post 12");

        let second = app
            .client
            .get("/api/profiles/auth?page=2")
            .dispatch()
            .into_json::<Value>()
            .unwrap();
        assert_eq!(second["page"]["items"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn unknown_profile_is_404() {
        let app = TestApp::new();
        let response = app.client.get("/api/profiles/nobody").dispatch();
        assert_eq!(response.status(), Status::NotFound);
    }

    #[test]
    fn follow_and_unfollow() {
        let app = TestApp::new();
        let token = app.register("auth");
        app.register("not_author");

        let response = app
            .client
            .post("/api/profiles/not_author/follow")
            .header(TestApp::auth(&token))
            .dispatch();
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.into_json::<Value>().unwrap()["profile"]["following"], true);
        assert_eq!(app.count_follows(), 1);

        // a second follow does not duplicate the edge
        app.client
            .post("/api/profiles/not_author/follow")
            .header(TestApp::auth(&token))
            .dispatch();
        assert_eq!(app.count_follows(), 1);

        let profile = app
            .client
            .get("/api/profiles/not_author")
            .header(TestApp::auth(&token))
            .dispatch()
            .into_json::<Value>()
            .unwrap();
        assert_eq!(profile["following"], true);

        let response = app
            .client
            .delete("/api/profiles/not_author/follow")
            .header(TestApp::auth(&token))
            .dispatch();
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(app.count_follows(), 0);
    }

    #[test]
    fn follow_requires_login() {
        let app = TestApp::new();
        app.register("auth");
        let response = app.client.post("/api/profiles/auth/follow").dispatch();
        assert_eq!(response.status(), Status::Unauthorized);
        let response = app.client.delete("/api/profiles/auth/follow").dispatch();
        assert_eq!(response.status(), Status::Unauthorized);
        let response = app.client.get("/api/follow").dispatch();
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[test]
    fn cannot_follow_yourself() {
        let app = TestApp::new();
        let token = app.register("auth");
        let me = app.user("auth");
        app.create_post(me.id, "my own post", None);

        let response = app
            .client
            .post("/api/profiles/auth/follow")
            .header(TestApp::auth(&token))
            .dispatch();
        assert_eq!(response.into_json::<Value>().unwrap()["profile"]["following"], false);
        assert_eq!(app.count_follows(), 0);

        let feed = app
            .client
            .get("/api/follow")
            .header(TestApp::auth(&token))
            .dispatch()
            .into_json::<Value>()
            .unwrap();
        assert_eq!(feed["page"]["count"], 0);
    }

    #[test]
    fn feed_shows_only_followed_authors() {
        let app = TestApp::new();
        let token = app.register("auth");
        app.register("author1");
        app.register("author2");
        let first = app.create_post(app.user("author1").id, "first author post", None);
        let second = app.create_post(app.user("author2").id, "second author post", None);

        app.client
            .post("/api/profiles/author1/follow")
            .header(TestApp::auth(&token))
            .dispatch();
        let feed = app
            .client
            .get("/api/follow")
            .header(TestApp::auth(&token))
            .dispatch()
            .into_json::<Value>()
            .unwrap();
        let ids: Vec<i64> = feed["page"]["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|post| post["id"].as_i64().unwrap())
            .collect();
        assert!(ids.contains(&(first.id as i64)));
        assert!(!ids.contains(&(second.id as i64)));
    }

    #[test]
    fn feed_is_paginated() {
        let app = TestApp::new();
        let token = app.register("auth");
        app.register("writer");
        let writer = app.user("writer");
        for n in 0..13 {
            app.create_post(writer.id, &format!("post {}", n), None);
        }
        app.client
            .post("/api/profiles/writer/follow")
            .header(TestApp::auth(&token))
            .dispatch();

        let first = app
            .client
            .get("/api/follow")
            .header(TestApp::auth(&token))
            .dispatch()
            .into_json::<Value>()
            .unwrap();
        assert_eq!(first["title"], "Following");
        assert_eq!(first["page"]["count"], 13);
        assert_eq!(first["page"]["items"].as_array().unwrap().len(), 10);
        assert_eq!(first["page"]["items"][0]["text"], "post 12");

        let second = app
            .client
            .get("/api/follow?page=2")
            .header(TestApp::auth(&token))
            .dispatch()
            .into_json::<Value>()
            .unwrap();
        assert_eq!(second["page"]["items"].as_array().unwrap().len(), 3);
        assert_eq!(second["page"]["has_next"], false);
    }

    #[test]
    fn unfollowing_a_stranger_changes_nothing() {
        let app = TestApp::new();
        let token = app.register("auth");
        let other = app.register("other");
        app.register("stranger");
        app.client
            .post("/api/profiles/auth/follow")
            .header(TestApp::auth(&other))
            .dispatch();

        let response = app
            .client
            .delete("/api/profiles/stranger/follow")
            .header(TestApp::auth(&token))
            .dispatch();
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.into_json::<Value>().unwrap()["profile"]["following"], false);
        assert_eq!(app.count_follows(), 1);
    }
}
