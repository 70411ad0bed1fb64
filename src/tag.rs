use crate::config::AppConfig;
use crate::db::schema::{post_tags, tags};
use crate::db::DbConnection;
use crate::post::{Post, PostFilter};
use crate::types::*;
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::{delete, insert_into, select};
use rocket::serde::json::Json;
use rocket::State;
use serde::Serialize;
use serde_json::Value;
use slug::slugify;
use std::collections::BTreeSet;
use std::fmt;

pub const NAME_MAX_LEN: usize = 100;
pub const SLUG_MAX_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = tags)]
pub struct Tag {
    #[serde(skip_serializing)]
    pub id: i32,
    pub name: String,
    pub slug: String,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Associations)]
#[diesel(belongs_to(Post))]
#[diesel(belongs_to(Tag))]
#[diesel(table_name = post_tags)]
pub struct PostTag {
    pub id: i32,
    pub post_id: i32,
    pub tag_id: i32,
}

#[derive(Insertable)]
#[diesel(table_name = tags)]
struct NewTag<'a> {
    name: &'a str,
    slug: &'a str,
}

/// URL-safe slug for a tag name. Non-latin names (Cyrillic in particular)
/// are transliterated before slugifying; the result is cut to 128 chars.
pub fn tag_slug(name: &str) -> String {
    let slug: String = slugify(name).chars().take(SLUG_MAX_LEN).collect();
    if slug.is_empty() {
        "tag".to_string()
    } else {
        slug
    }
}

/// Slug for the `i`-th collision of `name`, still within 128 chars.
fn numbered_slug(name: &str, i: usize) -> String {
    let suffix = format!("_{}", i);
    let base: String = tag_slug(name)
        .chars()
        .take(SLUG_MAX_LEN - suffix.len())
        .collect();
    base + &suffix
}

fn unique_slug(name: &str, connection: &mut SqliteConnection) -> QueryResult<String> {
    let mut slug = tag_slug(name);
    let mut i = 1;
    while select(exists(tags::table.filter(tags::slug.eq(&slug)))).get_result::<bool>(connection)? {
        slug = numbered_slug(name, i);
        i += 1;
    }
    Ok(slug)
}

/// Splits user input into tag names: on commas when there are any, on
/// whitespace otherwise. Names are trimmed, de-duplicated and sorted.
pub fn parse_tags(input: &str) -> Vec<String> {
    let names: BTreeSet<String> = if input.contains(',') {
        input.split(',').map(|name| name.trim().to_string()).collect()
    } else {
        input.split_whitespace().map(str::to_string).collect()
    };
    names.into_iter().filter(|name| !name.is_empty()).collect()
}

impl Tag {
    pub fn get_or_create(name: &str, connection: &mut SqliteConnection) -> QueryResult<Tag> {
        if let Some(tag) = tags::table
            .filter(tags::name.eq(name))
            .first::<Tag>(connection)
            .optional()?
        {
            return Ok(tag);
        }
        let slug = unique_slug(name, connection)?;
        insert_into(tags::table)
            .values(&NewTag { name, slug: &slug })
            .get_result::<Tag>(connection)
    }

    /// Replaces the tag set of a post.
    pub fn set_for_post(
        post_id: i32,
        names: &[String],
        connection: &mut SqliteConnection,
    ) -> QueryResult<Vec<Tag>> {
        delete(post_tags::table.filter(post_tags::post_id.eq(post_id))).execute(connection)?;
        let mut tags = Vec::with_capacity(names.len());
        for name in names {
            let tag = Tag::get_or_create(name, connection)?;
            insert_into(post_tags::table)
                .values((post_tags::post_id.eq(post_id), post_tags::tag_id.eq(tag.id)))
                .execute(connection)?;
            tags.push(tag);
        }
        Ok(tags)
    }

    pub fn load_by_slug(slug_: &str, connection: &mut SqliteConnection) -> Result<Tag, ApiError> {
        use crate::db::schema::tags::dsl::*;
        tags.filter(slug.eq(slug_))
            .get_result::<Tag>(connection)
            .map_err(|e| e.into())
    }
}

#[get("/tags")]
pub fn list(mut connection: DbConnection) -> ApiResult<Value> {
    let tags = tags::table.order(tags::name.asc()).load::<Tag>(&mut *connection)?;
    Ok(Json(json!({ "tags": tags })))
}

#[get("/tags/<slug>?<page>")]
pub fn tag_posts(
    mut connection: DbConnection,
    config: &State<AppConfig>,
    slug: &str,
    page: Option<&str>,
) -> ApiResult<Value> {
    let tag = Tag::load_by_slug(slug, &mut connection)?;
    let page = PostFilter::Tag(tag.id).page(page, config.posts_per_page, &mut connection)?;
    Ok(Json(json!({ "tag": tag, "page": page })))
}
