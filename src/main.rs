#[macro_use]
extern crate diesel;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate rocket;
#[macro_use]
extern crate serde_json;

mod cache;
mod comment;
mod config;
mod db;
mod group;
mod media;
mod post;
mod profile;
mod tag;
mod types;
mod users;
mod utils;

#[cfg(test)]
mod testing;

use crate::cache::PageCache;
use crate::config::AppConfig;
use dotenv::dotenv;
use log::error;
use rocket::fairing::AdHoc;
use rocket::figment::Figment;
use rocket::fs::FileServer;
use rocket::{Build, Rocket};
use serde_json::Value;
use std::env;
use std::path::PathBuf;

#[catch(401)]
fn unauthorized() -> Value {
    json!({
        "errors": {
            "status": "401 Unauthorized"
        }
    })
}

#[catch(404)]
fn not_found() -> Value {
    json!({
        "errors": [
            "entity not found"
        ]
    })
}

#[catch(422)]
fn unprocessable() -> Value {
    json!({
        "errors": [
            "unprocessable entity"
        ]
    })
}

#[catch(500)]
fn internal_error() -> Value {
    json!({
        "errors": [
            "internal server error"
        ]
    })
}

pub fn build(figment: Figment) -> Rocket<Build> {
    let media_dir: PathBuf = figment
        .extract_inner("media_dir")
        .unwrap_or_else(|_| AppConfig::default().media_dir);
    if let Err(e) = std::fs::create_dir_all(&media_dir) {
        error!("cannot create media directory {}: {}", media_dir.display(), e);
    }

    rocket::custom(figment)
        .attach(AdHoc::config::<AppConfig>())
        .attach(AdHoc::try_on_ignite("Database pool", |rocket| async move {
            let database_url = match rocket.state::<AppConfig>() {
                Some(config) => config.database_url.clone(),
                None => return Err(rocket),
            };
            match db::init_pool(&database_url) {
                Ok(pool) => Ok(rocket.manage(pool)),
                Err(e) => {
                    error!("failed to create database pool: {}", e);
                    Err(rocket)
                }
            }
        }))
        .attach(AdHoc::on_ignite("Index cache", |rocket| async move {
            let ttl = rocket
                .state::<AppConfig>()
                .map(|config| config.index_cache_ttl)
                .unwrap_or_else(|| AppConfig::default().index_cache_ttl);
            rocket.manage(PageCache::new(ttl))
        }))
        .mount(
            "/api",
            routes![
                users::register,
                users::login,
                users::current,
                users::update,
                users::remove,
            ],
        )
        .mount(
            "/api",
            routes![
                profile::profile,
                profile::follow,
                profile::unfollow,
                profile::follow_index,
            ],
        )
        .mount(
            "/api",
            routes![
                post::index,
                post::detail,
                post::create,
                post::edit,
                post::remove,
                comment::add,
                comment::remove,
            ],
        )
        .mount(
            "/api",
            routes![
                group::list,
                group::group_posts,
                group::create,
                group::remove,
                tag::list,
                tag::tag_posts,
            ],
        )
        .mount("/media", FileServer::from(media_dir))
        .register(
            "/",
            catchers![unauthorized, not_found, unprocessable, internal_error],
        )
}

#[launch]
fn rocket() -> _ {
    dotenv().ok();
    let mut figment = rocket::Config::figment();
    if let Ok(database_url) = env::var("DATABASE_URL") {
        figment = figment.merge(("database_url", database_url));
    }
    build(figment)
}
