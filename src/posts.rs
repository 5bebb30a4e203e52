//! Content store: posts, their ownership, and category lookups.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, FromQueryResult, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait, sea_query::Expr,
};
use serde::Serialize;
use tracing::Span;
use uuid::Uuid;
use validator::Validate;

use crate::entities::user::Role;
use crate::entities::{comment, post, user};
use crate::error::{BlogError, Result};
use crate::identity::{Identity, resolve_scoped};
use crate::storage::Storage;

#[derive(Debug, Clone, Validate)]
pub struct NewPost {
    #[validate(length(min = 1, max = 64, message = "category is required"))]
    pub category: String,
    #[validate(length(min = 1, max = 190, message = "title is required"))]
    pub title: String,
    pub description: String,
}

/// Fields an owner may change on an existing post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostField {
    Title(String),
    Category(String),
    Description(String),
}

impl PostField {
    pub fn name(&self) -> &'static str {
        match self {
            PostField::Title(_) => "title",
            PostField::Category(_) => "category",
            PostField::Description(_) => "description",
        }
    }
}

/// Row shape returned by listing endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromQueryResult)]
pub struct PostSummary {
    pub id: Uuid,
    pub author_id: Option<Uuid>,
    pub category: String,
    pub title: String,
    pub description: String,
    pub created_at: chrono::DateTime<chrono::FixedOffset>,
    pub comment_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total_posts: u64,
    pub total_comments: u64,
}

#[derive(Clone, Debug)]
pub struct PostStore {
    storage: Storage,
    log: Span,
}

impl PostStore {
    pub fn new(storage: Storage, log: Span) -> Self {
        Self { storage, log }
    }

    pub async fn create(&self, author: &Identity, input: NewPost) -> Result<post::Model> {
        input.validate()?;
        if input.title.trim().is_empty() {
            return Err(BlogError::validation("title must not be blank"));
        }
        if input.category.trim().is_empty() {
            return Err(BlogError::validation("category must not be blank"));
        }

        self.storage
            .bounded(&self.log, "create_post", async {
                let txn = self.storage.conn().begin().await?;

                let author = user::Entity::find_by_id(author.id)
                    .filter(user::Column::Role.eq(Role::Admin))
                    .one(&txn)
                    .await?
                    .ok_or(BlogError::InvalidAuthor)?;

                ensure_title_free(&txn, &input.title, None).await?;

                let created = post::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    author_id: Set(Some(author.id)),
                    category: Set(input.category.clone()),
                    title: Set(input.title.clone()),
                    description: Set(input.description.clone()),
                    created_at: Set(Utc::now().fixed_offset()),
                    comment_count: Set(0),
                    view_count: Set(0),
                }
                .insert(&txn)
                .await?;
                txn.commit().await?;

                tracing::info!(post_id = %created.id, author_id = %author.id, "post created");
                Ok(created)
            })
            .await
    }

    pub async fn get_by_id(&self, post_id: Uuid) -> Result<post::Model> {
        self.storage
            .bounded(&self.log, "get_post", async {
                post::Entity::find_by_id(post_id)
                    .one(self.storage.conn())
                    .await?
                    .ok_or_else(|| BlogError::NotFound("post".to_string()))
            })
            .await
    }

    pub async fn get_by_title(&self, title: &str) -> Result<post::Model> {
        self.storage
            .bounded(&self.log, "get_post_by_title", async {
                post::Entity::find()
                    .filter(post::Column::Title.eq(title))
                    .one(self.storage.conn())
                    .await?
                    .ok_or_else(|| BlogError::NotFound("post".to_string()))
            })
            .await
    }

    /// Bump the view counter and return the post as it now stands.
    pub async fn record_view(&self, post_id: Uuid) -> Result<post::Model> {
        self.storage
            .bounded(&self.log, "record_view", async {
                let txn = self.storage.conn().begin().await?;
                let res = post::Entity::update_many()
                    .col_expr(post::Column::ViewCount, Expr::col(post::Column::ViewCount).add(1))
                    .filter(post::Column::Id.eq(post_id))
                    .exec(&txn)
                    .await?;
                if res.rows_affected == 0 {
                    return Err(BlogError::NotFound("post".to_string()));
                }
                let viewed = post::Entity::find_by_id(post_id)
                    .one(&txn)
                    .await?
                    .ok_or_else(|| BlogError::NotFound("post".to_string()))?;
                txn.commit().await?;
                Ok(viewed)
            })
            .await
    }

    pub async fn list_all(&self) -> Result<Vec<PostSummary>> {
        self.storage
            .bounded(&self.log, "list_posts", async {
                Ok(summaries()
                    .order_by_desc(post::Column::CreatedAt)
                    .into_model::<PostSummary>()
                    .all(self.storage.conn())
                    .await?)
            })
            .await
    }

    pub async fn list_by_category(&self, category: &str) -> Result<Vec<PostSummary>> {
        self.storage
            .bounded(&self.log, "list_posts_by_category", async {
                Ok(summaries()
                    .filter(post::Column::Category.eq(category))
                    .order_by_desc(post::Column::CreatedAt)
                    .into_model::<PostSummary>()
                    .all(self.storage.conn())
                    .await?)
            })
            .await
    }

    pub async fn list_by_owner(&self, caller: &Identity) -> Result<Vec<post::Model>> {
        self.storage
            .bounded(&self.log, "list_posts_by_owner", async {
                let conn = self.storage.conn();
                let owner = resolve_scoped(conn, caller, Role::Admin).await?;
                Ok(post::Entity::find()
                    .filter(post::Column::AuthorId.eq(owner.id))
                    .order_by_desc(post::Column::CreatedAt)
                    .all(conn)
                    .await?)
            })
            .await
    }

    /// Apply `fields` to a post the caller owns. Either every field is applied
    /// or none is.
    pub async fn update_partial(
        &self,
        post_id: Uuid,
        caller: &Identity,
        fields: Vec<PostField>,
    ) -> Result<post::Model> {
        if fields.is_empty() {
            return Err(BlogError::validation("no fields to update"));
        }
        for field in &fields {
            match field {
                PostField::Title(v) | PostField::Category(v) if v.trim().is_empty() => {
                    return Err(BlogError::validation(format!(
                        "{} must not be blank",
                        field.name()
                    )));
                }
                _ => {}
            }
        }

        self.storage
            .bounded(&self.log, "update_post", async {
                let txn = self.storage.conn().begin().await?;
                let owned = find_owned(&txn, post_id, caller).await?;

                let mut active: post::ActiveModel = owned.into();
                for field in fields {
                    match field {
                        PostField::Title(title) => {
                            ensure_title_free(&txn, &title, Some(post_id)).await?;
                            active.title = Set(title);
                        }
                        PostField::Category(category) => active.category = Set(category),
                        PostField::Description(description) => {
                            active.description = Set(description)
                        }
                    }
                }

                let updated = active.update(&txn).await?;
                txn.commit().await?;

                tracing::info!(post_id = %post_id, "post updated");
                Ok(updated)
            })
            .await
    }

    pub async fn delete(&self, post_id: Uuid, caller: &Identity) -> Result<()> {
        self.storage
            .bounded(&self.log, "delete_post", async {
                let txn = self.storage.conn().begin().await?;
                let owned = find_owned(&txn, post_id, caller).await?;

                post::Entity::delete_by_id(owned.id).exec(&txn).await?;
                txn.commit().await?;

                tracing::info!(post_id = %post_id, "post deleted");
                Ok(())
            })
            .await
    }

    pub async fn statistics(&self) -> Result<Statistics> {
        self.storage
            .bounded(&self.log, "statistics", async {
                let conn = self.storage.conn();
                let total_posts = post::Entity::find().count(conn).await?;
                let total_comments = comment::Entity::find().count(conn).await?;
                Ok(Statistics {
                    total_posts,
                    total_comments,
                })
            })
            .await
    }

    pub async fn all_categories(&self) -> Result<Vec<String>> {
        self.storage
            .bounded(&self.log, "all_categories", async {
                Ok(post::Entity::find()
                    .select_only()
                    .column(post::Column::Category)
                    .distinct()
                    .order_by_asc(post::Column::Category)
                    .into_tuple::<String>()
                    .all(self.storage.conn())
                    .await?)
            })
            .await
    }
}

fn summaries() -> sea_orm::Select<post::Entity> {
    post::Entity::find().select_only().columns([
        post::Column::Id,
        post::Column::AuthorId,
        post::Column::Category,
        post::Column::Title,
        post::Column::Description,
        post::Column::CreatedAt,
        post::Column::CommentCount,
    ])
}

/// Resolve the caller as an admin, lock the post, and check it belongs to
/// them. Re-run on every mutation.
async fn find_owned<C: ConnectionTrait>(
    conn: &C,
    post_id: Uuid,
    caller: &Identity,
) -> Result<post::Model> {
    let admin = resolve_scoped(conn, caller, Role::Admin).await?;

    let found = post::Entity::find_by_id(post_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| BlogError::NotFound("post".to_string()))?;

    if found.author_id != Some(admin.id) {
        tracing::debug!(post_id = %post_id, caller = %admin.id, "ownership check failed");
        return Err(BlogError::unauthorized("caller does not own this post"));
    }
    Ok(found)
}

async fn ensure_title_free<C: ConnectionTrait>(
    conn: &C,
    title: &str,
    except: Option<Uuid>,
) -> Result<()> {
    let mut query = post::Entity::find().filter(post::Column::Title.eq(title));
    if let Some(id) = except {
        query = query.filter(post::Column::Id.ne(id));
    }
    if query.one(conn).await?.is_some() {
        return Err(BlogError::DuplicateKey("title".to_string()));
    }
    Ok(())
}
