use crate::cache::PageCache;
use crate::comment::CommentView;
use crate::config::AppConfig;
use crate::db::schema::{groups, post_tags, posts, users};
use crate::db::DbConnection;
use crate::group::{Group, TITLE_MAX_LEN};
use crate::media;
use crate::profile::Author;
use crate::tag::{self, PostTag, Tag};
use crate::types::*;
use crate::users::models::User;
use crate::users::CurrentUser;
use crate::utils::{serialize_date, Page, Paginator};
use chrono::NaiveDateTime;
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel::sqlite::Sqlite;
use diesel::{delete, insert_into, select, update};
use log::{info, warn};
use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::serde::json::Json;
use rocket::State;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

const PREVIEW_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Associations)]
#[diesel(belongs_to(User, foreign_key = author_id))]
#[diesel(belongs_to(Group))]
#[diesel(table_name = posts)]
pub struct Post {
    pub id: i32,
    pub title: String,
    pub text: String,
    pub pub_date: NaiveDateTime,
    pub author_id: i32,
    pub group_id: Option<i32>,
    pub image: Option<String>,
}

impl fmt::Display for Post {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = self.text.chars().take(PREVIEW_LEN).collect();
        f.write_str(&preview)
    }
}

impl Post {
    pub fn load(post_id: i32, connection: &mut SqliteConnection) -> Result<Post, ApiError> {
        posts::table
            .find(post_id)
            .first::<Post>(connection)
            .map_err(|e| e.into())
    }
}

#[derive(Insertable)]
#[diesel(table_name = posts)]
pub struct NewPost {
    pub title: String,
    pub text: String,
    pub pub_date: NaiveDateTime,
    pub author_id: i32,
    pub group_id: Option<i32>,
    pub image: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = posts, treat_none_as_null = true)]
struct PostChanges {
    title: String,
    text: String,
    group_id: Option<i32>,
    image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PostView {
    pub id: i32,
    pub title: String,
    pub text: String,
    #[serde(serialize_with = "serialize_date")]
    pub pub_date: NaiveDateTime,
    pub author: Author,
    pub group: Option<Group>,
    pub image: Option<String>,
    pub tags: Vec<Tag>,
}

impl PostView {
    /// Loads authors, groups and tags of `posts` in one query each, keeping
    /// the order of `posts`.
    pub fn assemble(
        posts: Vec<Post>,
        connection: &mut SqliteConnection,
    ) -> QueryResult<Vec<PostView>> {
        let author_ids: Vec<i32> = posts.iter().map(|post| post.author_id).collect();
        let authors: HashMap<i32, User> = users::table
            .filter(users::id.eq_any(author_ids))
            .load::<User>(connection)?
            .into_iter()
            .map(|user| (user.id, user))
            .collect();

        let group_ids: Vec<i32> = posts.iter().filter_map(|post| post.group_id).collect();
        let groups: HashMap<i32, Group> = groups::table
            .filter(groups::id.eq_any(group_ids))
            .load::<Group>(connection)?
            .into_iter()
            .map(|group| (group.id, group))
            .collect();

        let tags = PostTag::belonging_to(&posts)
            .inner_join(crate::db::schema::tags::table)
            .select((PostTag::as_select(), Tag::as_select()))
            .order(crate::db::schema::tags::name.asc())
            .load::<(PostTag, Tag)>(connection)?
            .grouped_by(&posts);

        posts
            .into_iter()
            .zip(tags)
            .map(|(post, tags)| {
                let author = authors.get(&post.author_id).ok_or(DieselError::NotFound)?;
                Ok(PostView {
                    id: post.id,
                    title: post.title,
                    text: post.text,
                    pub_date: post.pub_date,
                    author: author.author(),
                    group: post.group_id.and_then(|id| groups.get(&id).cloned()),
                    image: post.image.map(|path| media::url(&path)),
                    tags: tags.into_iter().map(|(_, tag)| tag).collect(),
                })
            })
            .collect()
    }

    pub fn load(post: Post, connection: &mut SqliteConnection) -> QueryResult<PostView> {
        PostView::assemble(vec![post], connection)?
            .pop()
            .ok_or(DieselError::NotFound)
    }
}

/// Which posts a listing shows.
#[derive(Debug, Clone)]
pub enum PostFilter {
    All,
    Group(i32),
    Author(i32),
    Authors(Vec<i32>),
    Tag(i32),
}

impl PostFilter {
    fn query(&self) -> posts::BoxedQuery<'static, Sqlite> {
        let query = posts::table.into_boxed();
        match self {
            PostFilter::All => query,
            PostFilter::Group(group_id) => query.filter(posts::group_id.eq(*group_id)),
            PostFilter::Author(author_id) => query.filter(posts::author_id.eq(*author_id)),
            PostFilter::Authors(author_ids) => {
                query.filter(posts::author_id.eq_any(author_ids.clone()))
            }
            PostFilter::Tag(tag_id) => query.filter(
                posts::id.eq_any(
                    post_tags::table
                        .filter(post_tags::tag_id.eq(*tag_id))
                        .select(post_tags::post_id),
                ),
            ),
        }
    }

    /// One page of matching posts, newest first.
    pub fn page(
        &self,
        raw_page: Option<&str>,
        per_page: i64,
        connection: &mut SqliteConnection,
    ) -> QueryResult<Page<PostView>> {
        let count = self.query().count().get_result::<i64>(connection)?;
        let paginator = Paginator::new(count, per_page);
        let number = paginator.page_number(raw_page);
        let posts = self
            .query()
            .order((posts::pub_date.desc(), posts::id.desc()))
            .limit(paginator.limit())
            .offset(paginator.offset(number))
            .load::<Post>(connection)?;
        Ok(paginator.page(number, PostView::assemble(posts, connection)?))
    }
}

#[derive(Debug, FromForm)]
pub struct PostForm<'r> {
    title: Option<String>,
    text: Option<String>,
    group: Option<String>,
    image: Option<TempFile<'r>>,
    tags: Option<String>,
}

impl<'r> PostForm<'r> {
    fn title(&self) -> String {
        self.title.as_deref().unwrap_or("").trim().to_string()
    }

    fn text(&self) -> String {
        self.text.as_deref().unwrap_or("").trim().to_string()
    }

    /// The raw group choice, `None` when left blank.
    fn group(&self) -> Option<&str> {
        self.group.as_deref().map(str::trim).filter(|raw| !raw.is_empty())
    }

    fn group_id(&self) -> Option<i32> {
        self.group().and_then(|raw| raw.parse().ok())
    }

    fn tags(&self) -> Vec<String> {
        self.tags.as_deref().map(tag::parse_tags).unwrap_or_default()
    }
}

impl<'r> Validate for PostForm<'r> {
    type Error = ApiError;
    fn validate(self, connection: &mut SqliteConnection) -> Result<Self, ApiError> {
        let mut errors = ValidationError::default();

        if self.text().is_empty() {
            errors.add_error("text", "This field is required.");
        }
        if self.title().chars().count() > TITLE_MAX_LEN {
            errors.add_error("title", format!("At most {} characters.", TITLE_MAX_LEN));
        }
        if let Some(raw) = self.group() {
            let group_exists = match raw.parse::<i32>() {
                Ok(group_id) => {
                    select(exists(groups::table.find(group_id))).get_result::<bool>(connection)?
                }
                Err(_) => false,
            };
            if !group_exists {
                errors.add_error(
                    "group",
                    "Select a valid choice. That choice is not one of the available choices.",
                );
            }
        }
        for name in self.tags() {
            if name.chars().count() > tag::NAME_MAX_LEN {
                errors.add_error("tags", format!("Tag too long: {}", name));
            }
        }

        errors.or_ok(self).map_err(|e| e.into())
    }
}

/// Validates a submitted post form together with its image upload.
async fn clean<'r>(
    form: PostForm<'r>,
    connection: &mut SqliteConnection,
) -> Result<PostForm<'r>, ApiError> {
    let image_errors = media::validate_image(form.image.as_ref()).await?;
    match form.validate(connection) {
        Ok(form) => Ok(image_errors.or_ok(form)?),
        Err(ApiError::Validation(mut errors)) => {
            errors.merge(image_errors);
            Err(errors.into())
        }
        Err(e) => Err(e),
    }
}

#[get("/posts?<page>")]
pub fn index(
    mut connection: DbConnection,
    config: &State<AppConfig>,
    cache: &State<PageCache>,
    page: Option<&str>,
) -> ApiResult<Value> {
    let key = page.unwrap_or("");
    let body = cache.get_or_insert_with(key, || -> Result<Value, ApiError> {
        let page = PostFilter::All.page(page, config.posts_per_page, &mut connection)?;
        Ok(json!({ "title": "Latest updates", "page": page }))
    })?;
    Ok(Json(body))
}

#[get("/posts/<id>")]
pub fn detail(mut connection: DbConnection, id: i32) -> ApiResult<Value> {
    let post = Post::load(id, &mut connection)?;
    let count = posts::table
        .filter(posts::author_id.eq(post.author_id))
        .count()
        .get_result::<i64>(&mut *connection)?;
    let comments = CommentView::for_post(&post, &mut connection)?;
    let post = PostView::load(post, &mut connection)?;
    Ok(Json(json!({
        "post": post,
        "comments": comments,
        "count": count,
    })))
}

#[post("/posts", data = "<form>")]
pub async fn create(
    mut connection: DbConnection,
    current_user: CurrentUser,
    config: &State<AppConfig>,
    cache: &State<PageCache>,
    form: Form<PostForm<'_>>,
) -> ApiResult<Value> {
    let user = current_user?;
    let mut form = clean(form.into_inner(), &mut connection).await?;
    let image = media::store_image(&config.media_dir, form.image.as_mut()).await?;

    let new_post = NewPost {
        title: form.title(),
        text: form.text(),
        pub_date: crate::utils::now(),
        author_id: user.id,
        group_id: form.group_id(),
        image: image.clone(),
    };
    let tags = form.tags();
    let saved = connection.transaction::<_, DieselError, _>(|conn| {
        let post = insert_into(posts::table)
            .values(&new_post)
            .get_result::<Post>(conn)?;
        Tag::set_for_post(post.id, &tags, conn)?;
        Ok(post)
    });
    let post = match saved {
        Ok(post) => post,
        Err(e) => {
            if let Some(relative) = image {
                media::discard(&config.media_dir, &relative).await;
            }
            return Err(e.into());
        }
    };
    info!("post {} created by {}: {}", post.id, user.username, post);
    cache.invalidate();

    let view = PostView::load(post, &mut connection)?;
    Ok(Json(json!({ "post": view })))
}

#[put("/posts/<id>", data = "<form>")]
pub async fn edit(
    mut connection: DbConnection,
    current_user: CurrentUser,
    config: &State<AppConfig>,
    cache: &State<PageCache>,
    id: i32,
    form: Form<PostForm<'_>>,
) -> ApiResult<Value> {
    let user = current_user?;
    let post = Post::load(id, &mut connection)?;
    if post.author_id != user.id {
        warn!("{} tried to edit post {} of another author", user.username, post.id);
        return Err(ApiError::Forbidden);
    }
    let mut form = clean(form.into_inner(), &mut connection).await?;
    let image = media::store_image(&config.media_dir, form.image.as_mut()).await?;

    let changes = PostChanges {
        title: form.title(),
        text: form.text(),
        group_id: form.group_id(),
        image: image.clone().or_else(|| post.image.clone()),
    };
    let tags = form.tags();
    let saved = connection.transaction::<_, DieselError, _>(|conn| {
        let post = update(&post).set(&changes).get_result::<Post>(conn)?;
        Tag::set_for_post(post.id, &tags, conn)?;
        Ok(post)
    });
    let post = match saved {
        Ok(post) => post,
        Err(e) => {
            if let Some(relative) = image {
                media::discard(&config.media_dir, &relative).await;
            }
            return Err(e.into());
        }
    };
    info!("post {} edited by {}", post.id, user.username);
    cache.invalidate();

    let view = PostView::load(post, &mut connection)?;
    Ok(Json(json!({ "post": view })))
}

#[delete("/posts/<id>")]
pub fn remove(
    mut connection: DbConnection,
    current_user: CurrentUser,
    config: &State<AppConfig>,
    cache: &State<PageCache>,
    id: i32,
) -> ApiResult<Value> {
    let user = current_user?;
    let post = Post::load(id, &mut connection)?;
    if post.author_id != user.id && !config.is_admin(&user.username) {
        warn!("{} tried to delete post {} of another author", user.username, post.id);
        return Err(ApiError::Forbidden);
    }
    delete(&post).execute(&mut *connection)?;
    info!("post {} deleted by {}", post.id, user.username);
    cache.invalidate();
    Ok(Json(json!({ "deleted": post.id })))
}
