//! Comment store. Owns comments and keeps `post.comment_count` equal to the
//! number of comment rows pointing at the post.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait, sea_query::Expr,
};
use tracing::Span;
use uuid::Uuid;

use crate::entities::user::Role;
use crate::entities::{comment, post};
use crate::error::{BlogError, Result};
use crate::identity::{Identity, resolve_scoped};
use crate::storage::Storage;

/// Fields an author may change on an existing comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentField {
    Feedback(String),
}

#[derive(Clone, Debug)]
pub struct CommentStore {
    storage: Storage,
    log: Span,
}

impl CommentStore {
    pub fn new(storage: Storage, log: Span) -> Self {
        Self { storage, log }
    }

    pub async fn create(
        &self,
        caller: &Identity,
        post_id: Uuid,
        feedback: String,
    ) -> Result<comment::Model> {
        if feedback.trim().is_empty() {
            return Err(BlogError::validation("feedback is required"));
        }

        self.storage
            .bounded(&self.log, "create_comment", async {
                let txn = self.storage.conn().begin().await?;
                let member = resolve_scoped(&txn, caller, Role::Member).await?;
                lock_post(&txn, post_id).await?;

                let created = comment::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    post_id: Set(Some(post_id)),
                    author_id: Set(Some(member.id)),
                    feedback: Set(feedback),
                }
                .insert(&txn)
                .await?;

                let count = recount(&txn, post_id).await?;
                txn.commit().await?;

                tracing::info!(comment_id = %created.id, post_id = %post_id, comment_count = count, "comment added");
                Ok(created)
            })
            .await
    }

    pub async fn update_partial(
        &self,
        comment_id: Uuid,
        caller: &Identity,
        fields: Vec<CommentField>,
    ) -> Result<comment::Model> {
        if fields.is_empty() {
            return Err(BlogError::validation("no fields to update"));
        }
        if fields
            .iter()
            .any(|CommentField::Feedback(text)| text.trim().is_empty())
        {
            return Err(BlogError::validation("feedback must not be blank"));
        }

        self.storage
            .bounded(&self.log, "update_comment", async {
                let txn = self.storage.conn().begin().await?;
                let owned = find_owned(&txn, comment_id, caller).await?;

                let mut active: comment::ActiveModel = owned.into();
                for field in fields {
                    match field {
                        CommentField::Feedback(text) => active.feedback = Set(text),
                    }
                }
                let updated = active.update(&txn).await?;
                txn.commit().await?;

                tracing::info!(comment_id = %comment_id, "comment updated");
                Ok(updated)
            })
            .await
    }

    pub async fn delete(&self, comment_id: Uuid, caller: &Identity) -> Result<()> {
        self.storage
            .bounded(&self.log, "delete_comment", async {
                let txn = self.storage.conn().begin().await?;
                let owned = find_owned(&txn, comment_id, caller).await?;

                // Lock the parent before removing the row so the recount below
                // serializes with concurrent creates on the same post.
                if let Some(post_id) = owned.post_id {
                    lock_post(&txn, post_id).await?;
                }

                comment::Entity::delete_by_id(owned.id).exec(&txn).await?;

                if let Some(post_id) = owned.post_id {
                    let count = recount(&txn, post_id).await?;
                    tracing::info!(comment_id = %comment_id, post_id = %post_id, comment_count = count, "comment deleted");
                } else {
                    tracing::info!(comment_id = %comment_id, "orphaned comment deleted");
                }
                txn.commit().await?;
                Ok(())
            })
            .await
    }

    pub async fn list_by_post(&self, post_id: Uuid) -> Result<Vec<comment::Model>> {
        self.storage
            .bounded(&self.log, "list_comments_by_post", async {
                Ok(comment::Entity::find()
                    .filter(comment::Column::PostId.eq(post_id))
                    .all(self.storage.conn())
                    .await?)
            })
            .await
    }

    pub async fn list_by_owner(&self, caller: &Identity) -> Result<Vec<comment::Model>> {
        self.storage
            .bounded(&self.log, "list_comments_by_owner", async {
                let conn = self.storage.conn();
                let member = resolve_scoped(conn, caller, Role::Member).await?;
                Ok(comment::Entity::find()
                    .filter(comment::Column::AuthorId.eq(member.id))
                    .all(conn)
                    .await?)
            })
            .await
    }
}

/// `SELECT … FOR UPDATE` on the parent post. Backends without row locks
/// (SQLite) already serialize writers at the database level.
async fn lock_post<C: ConnectionTrait>(conn: &C, post_id: Uuid) -> Result<post::Model> {
    post::Entity::find_by_id(post_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| BlogError::NotFound("post".to_string()))
}

/// Count the post's comments and store the result. Caller must hold the post
/// row lock.
async fn recount<C: ConnectionTrait>(conn: &C, post_id: Uuid) -> Result<i64> {
    let count = comment::Entity::find()
        .filter(comment::Column::PostId.eq(post_id))
        .count(conn)
        .await?;
    let count = i64::try_from(count)
        .map_err(|_| BlogError::Internal("comment count overflow".to_string()))?;

    post::Entity::update_many()
        .col_expr(post::Column::CommentCount, Expr::value(count))
        .filter(post::Column::Id.eq(post_id))
        .exec(conn)
        .await?;
    Ok(count)
}

/// Resolve the caller as a member and check they wrote the comment. A comment
/// that does not exist and one written by someone else are reported the same
/// way.
async fn find_owned<C: ConnectionTrait>(
    conn: &C,
    comment_id: Uuid,
    caller: &Identity,
) -> Result<comment::Model> {
    let member = resolve_scoped(conn, caller, Role::Member).await?;
    comment::Entity::find_by_id(comment_id)
        .filter(comment::Column::AuthorId.eq(member.id))
        .one(conn)
        .await?
        .ok_or_else(|| BlogError::unauthorized("caller does not own this comment"))
}
