//! HTTP surface. Parses requests, runs the gate, and hands off to the stores.

use std::sync::Arc;

use poem::{
    Request,
    web::cookie::{Cookie, CookieJar},
};
use poem_openapi::{Object, OpenApi, param::Query, payload::Json};
use tracing::info_span;
use uuid::Uuid;

use crate::comments::{CommentField, CommentStore};
use crate::config::AuthConfig;
use crate::entities::user::Role;
use crate::entities::{comment, post};
use crate::gate::{ACCESS_TOKEN_COOKIE, Gate, Presented};
use crate::identity::{Identity, IdentityStore, NewUser};
use crate::posts::{NewPost, PostField, PostStore, PostSummary};
use crate::storage::Storage;
use crate::token::TokenIssuer;

/// Everything a request handler needs. Built once at startup.
#[derive(Clone, Debug)]
pub struct AppState {
    pub identities: IdentityStore,
    pub tokens: TokenIssuer,
    pub gate: Gate,
    pub posts: PostStore,
    pub comments: CommentStore,
}

impl AppState {
    pub fn new(storage: Storage, auth: &AuthConfig) -> Self {
        let tokens = TokenIssuer::new(auth);
        Self {
            identities: IdentityStore::new(storage.clone(), info_span!("identity_store")),
            gate: Gate::new(tokens.clone()),
            tokens,
            posts: PostStore::new(storage.clone(), info_span!("post_store")),
            comments: CommentStore::new(storage, info_span!("comment_store")),
        }
    }
}

#[derive(Object)]
struct SignupRequest {
    email: String,
    password: String,
    role: String,
}

#[derive(Object)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Object)]
struct UserView {
    id: Uuid,
    email: String,
    role: String,
}

impl From<Identity> for UserView {
    fn from(identity: Identity) -> Self {
        Self {
            id: identity.id,
            email: identity.email,
            role: identity.role.to_string(),
        }
    }
}

#[derive(Object)]
struct LoginResponse {
    message: String,
    token: String,
    role: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Object)]
struct RoleIdResponse {
    role_id: Uuid,
}

#[derive(Object)]
struct PostCreate {
    category: String,
    title: String,
    #[oai(default)]
    description: String,
}

#[derive(Object)]
#[oai(deny_unknown_fields)]
struct PostUpdate {
    title: Option<String>,
    category: Option<String>,
    description: Option<String>,
}

impl PostUpdate {
    fn into_fields(self) -> Vec<PostField> {
        let mut fields = Vec::new();
        if let Some(title) = self.title {
            fields.push(PostField::Title(title));
        }
        if let Some(category) = self.category {
            fields.push(PostField::Category(category));
        }
        if let Some(description) = self.description {
            fields.push(PostField::Description(description));
        }
        fields
    }
}

#[derive(Object)]
struct PostView {
    id: Uuid,
    author_id: Option<Uuid>,
    category: String,
    title: String,
    description: String,
    created_at: chrono::DateTime<chrono::FixedOffset>,
    comment_count: i64,
    view_count: i64,
}

impl From<post::Model> for PostView {
    fn from(model: post::Model) -> Self {
        Self {
            id: model.id,
            author_id: model.author_id,
            category: model.category,
            title: model.title,
            description: model.description,
            created_at: model.created_at,
            comment_count: model.comment_count,
            view_count: model.view_count,
        }
    }
}

#[derive(Object)]
struct PostSummaryView {
    id: Uuid,
    author_id: Option<Uuid>,
    category: String,
    title: String,
    description: String,
    created_at: chrono::DateTime<chrono::FixedOffset>,
    comment_count: i64,
}

impl From<PostSummary> for PostSummaryView {
    fn from(row: PostSummary) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            category: row.category,
            title: row.title,
            description: row.description,
            created_at: row.created_at,
            comment_count: row.comment_count,
        }
    }
}

#[derive(Object)]
struct PostIdResponse {
    post_id: Uuid,
}

#[derive(Object)]
struct CategoriesResponse {
    categories: Vec<String>,
}

#[derive(Object)]
struct StatisticsResponse {
    total_posts: u64,
    total_comments: u64,
}

#[derive(Object)]
struct CommentCreate {
    feedback: String,
}

#[derive(Object)]
#[oai(deny_unknown_fields)]
struct CommentUpdate {
    feedback: Option<String>,
}

#[derive(Object)]
struct CommentView {
    id: Uuid,
    post_id: Option<Uuid>,
    author_id: Option<Uuid>,
    feedback: String,
}

impl From<comment::Model> for CommentView {
    fn from(model: comment::Model) -> Self {
        Self {
            id: model.id,
            post_id: model.post_id,
            author_id: model.author_id,
            feedback: model.feedback,
        }
    }
}

#[derive(Object)]
struct MessageResponse {
    message: String,
}

fn message(text: &str) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: text.to_string(),
    })
}

pub struct Api {
    state: Arc<AppState>,
}

impl Api {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    fn caller(&self, req: &Request, required: Role) -> poem::Result<Identity> {
        let cookie = req.cookie().get(ACCESS_TOKEN_COOKIE);
        let presented = Presented {
            authorization: req.header("Authorization"),
            cookie: cookie.as_ref().map(|c| c.value_str()),
        };
        Ok(self.state.gate.authorize(required, presented)?)
    }
}

#[OpenApi]
impl Api {
    /// Create an account
    #[oai(path = "/signup", method = "post")]
    async fn signup(&self, Json(input): Json<SignupRequest>) -> poem::Result<Json<UserView>> {
        let created = self
            .state
            .identities
            .create_user(NewUser {
                email: input.email,
                password: input.password,
                role: input.role,
            })
            .await?;
        Ok(Json(created.into()))
    }

    /// Exchange credentials for a token; also set as the `access_token` cookie
    #[oai(path = "/login", method = "post")]
    async fn login(
        &self,
        jar: &CookieJar,
        Json(input): Json<LoginRequest>,
    ) -> poem::Result<Json<LoginResponse>> {
        let identity = self
            .state
            .identities
            .authenticate(&input.email, &input.password)
            .await?;
        let issued = self.state.tokens.issue(&identity)?;

        let mut cookie = Cookie::new_with_str(ACCESS_TOKEN_COOKIE, &issued.token);
        cookie.set_http_only(true);
        cookie.set_path("/");
        jar.add(cookie);

        Ok(Json(LoginResponse {
            message: "logged in".to_string(),
            token: issued.token,
            role: issued.role.to_string(),
            expires_at: issued.expires_at,
        }))
    }

    /// Look up an account id by email
    #[oai(path = "/get-role-id", method = "get")]
    async fn get_role_id(&self, Query(email): Query<String>) -> poem::Result<Json<RoleIdResponse>> {
        let identity = self.state.identities.resolve_by_email(&email).await?;
        Ok(Json(RoleIdResponse {
            role_id: identity.id,
        }))
    }

    /// Publish a post as the calling admin
    #[oai(path = "/admin/add-post", method = "post")]
    async fn add_post(
        &self,
        req: &Request,
        Json(input): Json<PostCreate>,
    ) -> poem::Result<Json<PostView>> {
        let caller = self.caller(req, Role::Admin)?;
        let created = self
            .state
            .posts
            .create(
                &caller,
                NewPost {
                    category: input.category,
                    title: input.title,
                    description: input.description,
                },
            )
            .await?;
        Ok(Json(created.into()))
    }

    /// Look up a post id by its title
    #[oai(path = "/admin/get-post-id", method = "get")]
    async fn get_post_id(
        &self,
        req: &Request,
        Query(title): Query<String>,
    ) -> poem::Result<Json<PostIdResponse>> {
        self.caller(req, Role::Admin)?;
        let found = self.state.posts.get_by_title(&title).await?;
        Ok(Json(PostIdResponse { post_id: found.id }))
    }

    #[oai(path = "/search-all-posts", method = "get")]
    async fn search_all_posts(&self) -> poem::Result<Json<Vec<PostSummaryView>>> {
        let rows = self.state.posts.list_all().await?;
        Ok(Json(rows.into_iter().map(Into::into).collect()))
    }

    #[oai(path = "/get-all-category", method = "get")]
    async fn get_all_category(&self) -> poem::Result<Json<CategoriesResponse>> {
        let categories = self.state.posts.all_categories().await?;
        Ok(Json(CategoriesResponse { categories }))
    }

    /// Posts written by the calling admin
    #[oai(path = "/admin/get-posts-by-role-id", method = "get")]
    async fn get_posts_by_role_id(&self, req: &Request) -> poem::Result<Json<Vec<PostView>>> {
        let caller = self.caller(req, Role::Admin)?;
        let rows = self.state.posts.list_by_owner(&caller).await?;
        Ok(Json(rows.into_iter().map(Into::into).collect()))
    }

    #[oai(path = "/admin/update-post-by-id", method = "put")]
    async fn update_post_by_id(
        &self,
        req: &Request,
        Query(post_id): Query<Uuid>,
        Json(input): Json<PostUpdate>,
    ) -> poem::Result<Json<PostView>> {
        let caller = self.caller(req, Role::Admin)?;
        let updated = self
            .state
            .posts
            .update_partial(post_id, &caller, input.into_fields())
            .await?;
        Ok(Json(updated.into()))
    }

    #[oai(path = "/admin/delete-post-by-id", method = "delete")]
    async fn delete_post_by_id(
        &self,
        req: &Request,
        Query(post_id): Query<Uuid>,
    ) -> poem::Result<Json<MessageResponse>> {
        let caller = self.caller(req, Role::Admin)?;
        self.state.posts.delete(post_id, &caller).await?;
        Ok(message("post deleted"))
    }

    /// Read a single post; counts as a view
    #[oai(path = "/member/get-post-by-id", method = "get")]
    async fn get_post_by_id(
        &self,
        req: &Request,
        Query(post_id): Query<Uuid>,
    ) -> poem::Result<Json<PostView>> {
        self.caller(req, Role::Member)?;
        let viewed = self.state.posts.record_view(post_id).await?;
        Ok(Json(viewed.into()))
    }

    #[oai(path = "/get-post-by-category", method = "get")]
    async fn get_post_by_category(
        &self,
        Query(category): Query<String>,
    ) -> poem::Result<Json<Vec<PostSummaryView>>> {
        let rows = self.state.posts.list_by_category(&category).await?;
        Ok(Json(rows.into_iter().map(Into::into).collect()))
    }

    #[oai(path = "/get-post-statistics", method = "get")]
    async fn get_post_statistics(&self) -> poem::Result<Json<StatisticsResponse>> {
        let stats = self.state.posts.statistics().await?;
        Ok(Json(StatisticsResponse {
            total_posts: stats.total_posts,
            total_comments: stats.total_comments,
        }))
    }

    #[oai(path = "/member/add-comment", method = "post")]
    async fn add_comment(
        &self,
        req: &Request,
        Query(post_id): Query<Uuid>,
        Json(input): Json<CommentCreate>,
    ) -> poem::Result<Json<CommentView>> {
        let caller = self.caller(req, Role::Member)?;
        let created = self
            .state
            .comments
            .create(&caller, post_id, input.feedback)
            .await?;
        Ok(Json(created.into()))
    }

    #[oai(path = "/member/update-comment", method = "put")]
    async fn update_comment(
        &self,
        req: &Request,
        Query(comment_id): Query<Uuid>,
        Json(input): Json<CommentUpdate>,
    ) -> poem::Result<Json<CommentView>> {
        let caller = self.caller(req, Role::Member)?;
        let fields = input
            .feedback
            .map(CommentField::Feedback)
            .into_iter()
            .collect();
        let updated = self
            .state
            .comments
            .update_partial(comment_id, &caller, fields)
            .await?;
        Ok(Json(updated.into()))
    }

    #[oai(path = "/member/delete-comment", method = "delete")]
    async fn delete_comment(
        &self,
        req: &Request,
        Query(comment_id): Query<Uuid>,
    ) -> poem::Result<Json<MessageResponse>> {
        let caller = self.caller(req, Role::Member)?;
        self.state.comments.delete(comment_id, &caller).await?;
        Ok(message("comment deleted"))
    }

    /// Comments written by the calling member
    #[oai(path = "/member/get-comment-based-on-user", method = "get")]
    async fn get_comment_based_on_user(
        &self,
        req: &Request,
    ) -> poem::Result<Json<Vec<CommentView>>> {
        let caller = self.caller(req, Role::Member)?;
        let rows = self.state.comments.list_by_owner(&caller).await?;
        Ok(Json(rows.into_iter().map(Into::into).collect()))
    }

    #[oai(path = "/get-comment-based-on-post", method = "get")]
    async fn get_comment_based_on_post(
        &self,
        Query(post_id): Query<Uuid>,
    ) -> poem::Result<Json<Vec<CommentView>>> {
        let rows = self.state.comments.list_by_post(post_id).await?;
        Ok(Json(rows.into_iter().map(Into::into).collect()))
    }
}
