#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sea_orm::{ConnectOptions, Database};
use tracing::Span;

use blogpost_api::comments::CommentStore;
use blogpost_api::config::AuthConfig;
use blogpost_api::entities::post;
use blogpost_api::identity::{Identity, IdentityStore, NewUser};
use blogpost_api::posts::{NewPost, PostStore};
use blogpost_api::storage::{self, Storage};
use blogpost_api::AppState;

pub const PASSWORD: &str = "hunter2-but-longer";

/// Fresh in-memory database with the schema applied. A single pooled
/// connection keeps every query on the same in-memory database.
pub async fn storage() -> Storage {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(false);
    let conn = Database::connect(opts).await.expect("connect sqlite");
    let storage = Storage::new(conn, Duration::from_secs(30));
    storage::sync_schema(&storage).await.expect("sync schema");
    storage
}

/// Shared Postgres database named by `BLOGPOST_TEST_POSTGRES_URL`, or `None`
/// when the variable is unset. The pool holds several connections, so
/// concurrent transactions overlap and the post row lock is contended.
/// Tables persist between runs; callers use unique emails and titles.
pub async fn postgres() -> Option<Storage> {
    let url = std::env::var("BLOGPOST_TEST_POSTGRES_URL").ok()?;
    let mut opts = ConnectOptions::new(url);
    opts.max_connections(8)
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(false);
    let conn = Database::connect(opts).await.expect("connect postgres");
    let storage = Storage::new(conn, Duration::from_secs(30));
    storage::sync_schema(&storage).await.expect("sync schema");
    Some(storage)
}

pub fn auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: "test-secret".to_string(),
        member_token_ttl: Duration::from_secs(630),
        admin_token_ttl: Duration::from_secs(60 * 60 * 24 * 30),
    }
}

pub struct Fixture {
    pub storage: Storage,
    pub identities: IdentityStore,
    pub posts: PostStore,
    pub comments: CommentStore,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::on(storage().await)
    }

    pub fn on(storage: Storage) -> Self {
        Self {
            identities: IdentityStore::new(storage.clone(), Span::none()),
            posts: PostStore::new(storage.clone(), Span::none()),
            comments: CommentStore::new(storage.clone(), Span::none()),
            storage,
        }
    }

    pub async fn user(&self, email: &str, role: &str) -> Identity {
        self.identities
            .create_user(NewUser {
                email: email.to_string(),
                password: PASSWORD.to_string(),
                role: role.to_string(),
            })
            .await
            .expect("create user")
    }

    pub async fn post(&self, author: &Identity, title: &str) -> post::Model {
        self.posts
            .create(
                author,
                NewPost {
                    category: "general".to_string(),
                    title: title.to_string(),
                    description: format!("about {title}"),
                },
            )
            .await
            .expect("create post")
    }
}

pub async fn app_state() -> Arc<AppState> {
    Arc::new(AppState::new(storage().await, &auth_config()))
}
