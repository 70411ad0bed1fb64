use crate::cache::PageCache;
use crate::config::AppConfig;
use crate::db::schema::groups;
use crate::db::DbConnection;
use crate::post::PostFilter;
use crate::types::*;
use crate::users::CurrentUser;
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::{delete, insert_into, select};
use log::{info, warn};
use regex::Regex;
use rocket::form::Form;
use rocket::serde::json::Json;
use rocket::State;
use serde::Serialize;
use serde_json::Value;
use slug::slugify;
use std::fmt;

pub const TITLE_MAX_LEN: usize = 200;
const SLUG_MAX_LEN: usize = 50;

lazy_static! {
    static ref SLUG_RE: Regex = Regex::new(r"\A[-a-zA-Z0-9_]+\z").unwrap();
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = groups)]
pub struct Group {
    pub id: i32,
    pub title: String,
    pub slug: String,
    pub description: String,
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.title)
    }
}

impl Group {
    pub fn load_by_slug(slug_: &str, connection: &mut SqliteConnection) -> Result<Group, ApiError> {
        use crate::db::schema::groups::dsl::*;
        groups
            .filter(slug.eq(slug_))
            .get_result::<Group>(connection)
            .map_err(|e| e.into())
    }
}

#[derive(Insertable)]
#[diesel(table_name = groups)]
struct NewGroup {
    title: String,
    slug: String,
    description: String,
}

#[derive(Debug, FromForm)]
pub struct GroupForm {
    title: Option<String>,
    slug: Option<String>,
    description: Option<String>,
}

impl GroupForm {
    fn title(&self) -> &str {
        self.title.as_deref().unwrap_or("").trim()
    }

    /// The submitted slug, or one derived from the title.
    fn slug(&self) -> String {
        match self.slug.as_deref().map(str::trim) {
            Some(slug) if !slug.is_empty() => slug.to_string(),
            _ => slugify(self.title()).chars().take(SLUG_MAX_LEN).collect(),
        }
    }

    fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("").trim()
    }
}

impl Validate for GroupForm {
    type Error = ApiError;
    fn validate(self, connection: &mut SqliteConnection) -> Result<Self, ApiError> {
        let mut errors = ValidationError::default();
        let title = self.title();
        let slug = self.slug();

        if title.is_empty() {
            errors.add_error("title", "This field is required.");
        } else if title.chars().count() > TITLE_MAX_LEN {
            errors.add_error("title", format!("At most {} characters.", TITLE_MAX_LEN));
        } else if select(exists(groups::table.filter(groups::title.eq(title))))
            .get_result::<bool>(connection)?
        {
            errors.add_error("title", "Group with this title already exists.");
        }

        if !SLUG_RE.is_match(&slug) || slug.chars().count() > SLUG_MAX_LEN {
            errors.add_error(
                "slug",
                "Enter a valid slug of letters, numbers, underscores or hyphens.",
            );
        } else if select(exists(groups::table.filter(groups::slug.eq(&slug))))
            .get_result::<bool>(connection)?
        {
            errors.add_error("slug", "Group with this slug already exists.");
        }

        if self.description().is_empty() {
            errors.add_error("description", "This field is required.");
        }

        errors.or_ok(self).map_err(|e| e.into())
    }
}

#[get("/groups")]
pub fn list(mut connection: DbConnection) -> ApiResult<Value> {
    let groups = groups::table
        .order(groups::title.asc())
        .load::<Group>(&mut *connection)?;
    Ok(Json(json!({ "groups": groups })))
}

#[get("/groups/<slug>?<page>")]
pub fn group_posts(
    mut connection: DbConnection,
    config: &State<AppConfig>,
    slug: &str,
    page: Option<&str>,
) -> ApiResult<Value> {
    let group = Group::load_by_slug(slug, &mut connection)?;
    let page = PostFilter::Group(group.id).page(page, config.posts_per_page, &mut connection)?;
    Ok(Json(json!({ "group": group, "page": page })))
}

#[post("/groups", data = "<form>")]
pub fn create(
    mut connection: DbConnection,
    current_user: CurrentUser,
    config: &State<AppConfig>,
    form: Form<GroupForm>,
) -> ApiResult<Value> {
    let current = current_user?;
    if !config.is_admin(&current.username) {
        warn!("{} tried to create a group", current.username);
        return Err(ApiError::Forbidden);
    }
    let form = form.into_inner().validate(&mut connection)?;
    let new_group = NewGroup {
        title: form.title().to_string(),
        slug: form.slug(),
        description: form.description().to_string(),
    };
    let group = insert_into(groups::table)
        .values(&new_group)
        .get_result::<Group>(&mut *connection)?;
    info!("group {} created by {}", group, current.username);
    Ok(Json(json!({ "group": group })))
}

#[delete("/groups/<slug>")]
pub fn remove(
    mut connection: DbConnection,
    current_user: CurrentUser,
    config: &State<AppConfig>,
    cache: &State<PageCache>,
    slug: &str,
) -> ApiResult<Value> {
    let current = current_user?;
    if !config.is_admin(&current.username) {
        warn!("{} tried to delete group {}", current.username, slug);
        return Err(ApiError::Forbidden);
    }
    let group = Group::load_by_slug(slug, &mut connection)?;
    delete(&group).execute(&mut *connection)?;
    info!("group {} deleted by {}", group, current.username);
    cache.invalidate();
    Ok(Json(json!({ "deleted": group.slug })))
}
