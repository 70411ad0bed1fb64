use crate::config::AppConfig;
use crate::db::schema::{comments, users};
use crate::db::DbConnection;
use crate::post::Post;
use crate::profile::Author;
use crate::types::{ApiError, ApiResult, Validate, ValidationError};
use crate::users::models::User;
use crate::users::CurrentUser;
use crate::utils::serialize_date;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::{delete as diesel_delete, insert_into};
use log::{info, warn};
use rocket::form::Form;
use rocket::serde::json::Json;
use rocket::State;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Associations)]
#[diesel(belongs_to(Post))]
#[diesel(table_name = comments)]
pub struct Comment {
    pub id: i32,
    pub post_id: i32,
    pub author_id: i32,
    pub text: String,
    pub created: NaiveDateTime,
}

#[derive(Serialize, Debug)]
pub struct CommentView {
    id: i32,
    author: Author,
    text: String,
    #[serde(serialize_with = "serialize_date")]
    created: NaiveDateTime,
}

impl From<(Comment, User)> for CommentView {
    fn from(comment_and_author: (Comment, User)) -> Self {
        let (comment, author) = comment_and_author;
        CommentView {
            id: comment.id,
            author: author.author(),
            text: comment.text,
            created: comment.created,
        }
    }
}

impl CommentView {
    /// Comments of `post`, newest first.
    pub fn for_post(
        post: &Post,
        connection: &mut SqliteConnection,
    ) -> QueryResult<Vec<CommentView>> {
        let data = Comment::belonging_to(post)
            .inner_join(users::table)
            .order((comments::created.desc(), comments::id.desc()))
            .select((Comment::as_select(), User::as_select()))
            .load::<(Comment, User)>(connection)?;
        Ok(data.into_iter().map(CommentView::from).collect())
    }
}

#[derive(Insertable)]
#[diesel(table_name = comments)]
pub struct NewComment {
    pub post_id: i32,
    pub author_id: i32,
    pub text: String,
    pub created: NaiveDateTime,
}

#[derive(Debug, FromForm)]
pub struct CommentForm {
    text: Option<String>,
}

impl CommentForm {
    fn text(&self) -> String {
        self.text.as_deref().unwrap_or("").trim().to_string()
    }
}

impl Validate for CommentForm {
    type Error = ValidationError;
    fn validate(self, _connection: &mut SqliteConnection) -> Result<Self, ValidationError> {
        let mut error = ValidationError::default();
        if self.text().is_empty() {
            error.add_error("text", "This field is required.");
        }
        error.or_ok(self)
    }
}

#[derive(Debug, Serialize)]
pub struct CommentContainer<T> {
    comment: T,
}

#[post("/posts/<id>/comments", data = "<form>")]
pub fn add(
    mut connection: DbConnection,
    current_user: CurrentUser,
    id: i32,
    form: Form<CommentForm>,
) -> ApiResult<CommentContainer<CommentView>> {
    let user = current_user?;
    let post = Post::load(id, &mut connection)?;
    let form = form.into_inner().validate(&mut connection)?;
    let new_comment = NewComment {
        post_id: post.id,
        author_id: user.id,
        text: form.text(),
        created: crate::utils::now(),
    };

    let comment = insert_into(comments::table)
        .values(&new_comment)
        .get_result::<Comment>(&mut *connection)?;
    info!("comment {} on post {} by {}", comment.id, post.id, user.username);

    Ok(Json(CommentContainer {
        comment: (comment, user).into(),
    }))
}

#[delete("/posts/<post_id>/comments/<id>")]
pub fn remove(
    mut connection: DbConnection,
    current_user: CurrentUser,
    config: &State<AppConfig>,
    post_id: i32,
    id: i32,
) -> ApiResult<CommentContainer<i32>> {
    let user = current_user?;
    let comment = comments::table
        .find(id)
        .filter(comments::post_id.eq(post_id))
        .first::<Comment>(&mut *connection)?;
    if comment.author_id != user.id && !config.is_admin(&user.username) {
        warn!("{} tried to delete comment {} of another author", user.username, comment.id);
        return Err(ApiError::Forbidden);
    }
    diesel_delete(&comment).execute(&mut *connection)?;
    Ok(Json(CommentContainer { comment: comment.id }))
}
