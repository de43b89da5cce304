//! Q&A forum engine
//!
//! Categories, posts (questions), answers, votes and a points ledger.
//! Posts are optionally "AI enhanced" (simulated), unanswered posts get a
//! generated answer, curated external Q&As are imported daily, and posts
//! held for review are moderated on a timer.
//!
//! Multi-row writes (post + category counter + points, answer + post counter
//! + points, vote + points) run inside one transaction.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use empire_common::db::{ColumnDefinition, TableDefinition};
use empire_common::engine::{Engine, EngineMetrics, PeriodicJob};
use empire_common::events::{EmpireEvent, EventBus};
use empire_common::text::{create_slug, excerpt, meta_description, parse_timeframe};
use empire_common::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::types::Json;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const ENGINE_NAME: &str = "forum";

const REQUIRED_TABLES: &[&str] = &["forum_categories", "forum_posts", "forum_answers", "forum_points"];

const AI_ENHANCEMENT_NOTE: &str = "\n\n*Enhanced with AI suggestions for better clarity and SEO.*";
const AI_AUTHOR: &str = "AI Assistant";
const CURATOR_AUTHOR: &str = "Content Curator";

const POINTS_POST_CREATED: i64 = 10;
const POINTS_ANSWER_CREATED: i64 = 5;
const POINTS_UPVOTED: i64 = 2;
const POINTS_DOWNVOTED: i64 = -1;
const POINTS_ANSWER_ACCEPTED: i64 = 15;

/// Posts older than this with no answers get an AI answer
const UNANSWERED_AGE_HOURS: i64 = 2;
const AI_ANSWER_BATCH: i64 = 5;
const MODERATION_BATCH: i64 = 10;
const CURATION_ITEMS_PER_SOURCE: usize = 3;
const LEADERBOARD_SIZE: i64 = 25;

const DEFAULT_CATEGORIES: &[(&str, &str, &str)] = &[
    ("General Discussion", "general", "General topics and discussions"),
    ("Technical Questions", "saas", "Technical questions and troubleshooting"),
    ("Financial Planning", "finance", "Personal finance and investment discussions"),
    ("Health & Wellness", "health", "Health, fitness, and wellness topics"),
    ("AI & Tools", "ai-tools", "AI tools and automation discussions"),
];

const CURATION_VERTICALS: &[&str] = &["saas", "finance", "health", "ai-tools"];

/// Table definitions owned by the forum
pub fn tables() -> Vec<TableDefinition> {
    vec![
        TableDefinition::new("forum_categories")
            .column(ColumnDefinition::id())
            .column(ColumnDefinition::new("name", "TEXT").not_null().unique())
            .column(ColumnDefinition::new("slug", "TEXT").not_null())
            .column(ColumnDefinition::new("description", "TEXT"))
            .column(ColumnDefinition::new("vertical", "TEXT").not_null())
            .column(ColumnDefinition::new("icon", "TEXT"))
            .column(ColumnDefinition::new("color", "TEXT"))
            .column(ColumnDefinition::new("is_active", "BOOLEAN").not_null().default("1"))
            .column(ColumnDefinition::new("seo_optimized", "BOOLEAN").not_null().default("1"))
            .column(ColumnDefinition::new("meta_description", "TEXT"))
            .column(ColumnDefinition::new("post_count", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("created_at", "TIMESTAMP").not_null()),
        TableDefinition::new("forum_posts")
            .column(ColumnDefinition::id())
            .column(
                ColumnDefinition::new("category_id", "INTEGER")
                    .not_null()
                    .references("forum_categories"),
            )
            .column(ColumnDefinition::new("title", "TEXT").not_null())
            .column(ColumnDefinition::new("slug", "TEXT").not_null())
            .column(ColumnDefinition::new("content", "TEXT").not_null())
            .column(ColumnDefinition::new("excerpt", "TEXT").not_null())
            .column(ColumnDefinition::new("author_name", "TEXT").not_null())
            .column(ColumnDefinition::new("author_email", "TEXT"))
            .column(ColumnDefinition::new("status", "TEXT").not_null().default("'published'"))
            .column(ColumnDefinition::new("post_type", "TEXT").not_null().default("'question'"))
            .column(ColumnDefinition::new("tags", "TEXT").not_null().default("'[]'"))
            .column(ColumnDefinition::new("seo_score", "REAL").not_null().default("0"))
            .column(ColumnDefinition::new("meta_description", "TEXT").not_null())
            .column(ColumnDefinition::new("schema_markup", "TEXT").not_null().default("'{}'"))
            .column(ColumnDefinition::new("ai_generated", "BOOLEAN").not_null().default("0"))
            .column(ColumnDefinition::new("view_count", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("answer_count", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("upvotes", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("downvotes", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("has_accepted_answer", "BOOLEAN").not_null().default("0"))
            .column(ColumnDefinition::new("moderation_flags", "TEXT").not_null().default("'[]'"))
            .column(ColumnDefinition::new("last_activity_at", "TIMESTAMP"))
            .column(ColumnDefinition::new("created_at", "TIMESTAMP").not_null()),
        TableDefinition::new("forum_answers")
            .column(ColumnDefinition::id())
            .column(ColumnDefinition::new("post_id", "INTEGER").not_null().references("forum_posts"))
            .column(ColumnDefinition::new("content", "TEXT").not_null())
            .column(ColumnDefinition::new("author_name", "TEXT").not_null())
            .column(ColumnDefinition::new("author_email", "TEXT"))
            .column(ColumnDefinition::new("ai_generated", "BOOLEAN").not_null().default("0"))
            .column(ColumnDefinition::new("upvotes", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("downvotes", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("is_accepted", "BOOLEAN").not_null().default("0"))
            .column(ColumnDefinition::new("created_at", "TIMESTAMP").not_null()),
        TableDefinition::new("forum_points")
            .column(ColumnDefinition::id())
            .column(ColumnDefinition::new("username", "TEXT").not_null())
            .column(ColumnDefinition::new("action", "TEXT").not_null())
            .column(ColumnDefinition::new("points", "INTEGER").not_null())
            .column(ColumnDefinition::new("created_at", "TIMESTAMP").not_null()),
    ]
}

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ForumCategory {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub vertical: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub is_active: bool,
    pub seo_optimized: bool,
    pub meta_description: Option<String>,
    pub post_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ForumPost {
    pub id: i64,
    pub category_id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: String,
    pub author_name: String,
    pub author_email: Option<String>,
    pub status: String,
    #[serde(rename = "type")]
    pub post_type: String,
    pub tags: Json<Vec<String>>,
    pub seo_score: f64,
    pub meta_description: String,
    pub schema_markup: Json<serde_json::Value>,
    pub ai_generated: bool,
    pub view_count: i64,
    pub answer_count: i64,
    pub upvotes: i64,
    pub downvotes: i64,
    pub has_accepted_answer: bool,
    pub moderation_flags: Json<Vec<String>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ForumAnswer {
    pub id: i64,
    pub post_id: i64,
    pub content: String,
    pub author_name: String,
    pub author_email: Option<String>,
    pub ai_generated: bool,
    pub upvotes: i64,
    pub downvotes: i64,
    pub is_accepted: bool,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCategory {
    pub name: String,
    pub vertical: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    #[default]
    Question,
    Discussion,
    Announcement,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Question => "question",
            PostType::Discussion => "discussion",
            PostType::Announcement => "announcement",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    pub category_id: i64,
    pub title: String,
    pub content: String,
    pub author_name: String,
    #[serde(default)]
    pub author_email: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, rename = "type")]
    pub post_type: PostType,
    #[serde(default)]
    pub ai_enhanced: bool,
    /// Hold the post as `pending` until the moderation job reviews it
    #[serde(default)]
    pub require_moderation: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAnswer {
    pub content: String,
    pub author_name: String,
    #[serde(default)]
    pub author_email: Option<String>,
    #[serde(default)]
    pub ai_generated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteTarget {
    Post,
    Answer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Upvote,
    Downvote,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub target_type: VoteTarget,
    pub target_id: i64,
    pub user_id: String,
    pub vote_type: VoteType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Reddit,
    Quora,
    Stackoverflow,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Reddit, Platform::Quora, Platform::Stackoverflow];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Reddit => "reddit",
            Platform::Quora => "quora",
            Platform::Stackoverflow => "stackoverflow",
        }
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome {
    pub target_type: VoteTarget,
    pub target_id: i64,
    pub upvotes: i64,
    pub downvotes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModerationResult {
    pub approved: bool,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CurationReport {
    pub imported: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CategoryMetrics {
    pub total_categories: i64,
    pub active_categories: i64,
    pub total_posts: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PostMetrics {
    pub total_posts: i64,
    pub total_views: i64,
    pub total_upvotes: i64,
    pub answered_posts: i64,
    pub avg_seo_score: f64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TopPost {
    pub id: i64,
    pub title: String,
    pub view_count: i64,
    pub answer_count: i64,
    pub upvotes: i64,
    pub has_accepted_answer: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsOverview {
    pub timeframe: String,
    pub categories: CategoryMetrics,
    pub posts: PostMetrics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Engagement {
    pub top_posts: Vec<TopPost>,
    pub leaderboard: Leaderboards,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForumAnalytics {
    pub overview: AnalyticsOverview,
    pub engagement: Engagement,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PostCreator {
    pub author_name: String,
    pub post_count: i64,
    pub total_views: i64,
    pub total_upvotes: i64,
    pub answered_count: i64,
    #[sqlx(skip)]
    pub badges: Vec<String>,
    #[sqlx(skip)]
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AnswerContributor {
    pub author_name: String,
    pub answer_count: i64,
    pub total_upvotes: i64,
    pub accepted_answers: i64,
    #[sqlx(skip)]
    pub badges: Vec<String>,
    #[sqlx(skip)]
    pub score: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaderboards {
    pub post_creators: Vec<PostCreator>,
    pub answer_contributors: Vec<AnswerContributor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForumLeaderboard {
    pub timeframe: String,
    pub leaderboards: Leaderboards,
}

// ============================================================================
// Scoring and simulated intelligence
// ============================================================================

impl PostCreator {
    fn finish(mut self) -> Self {
        self.score = self.post_count * 10 + self.total_upvotes * 2 + self.answered_count * 15;
        if self.post_count >= 1 {
            self.badges.push("First Post".to_string());
        }
        if self.post_count >= 10 {
            self.badges.push("Active Contributor".to_string());
        }
        if self.post_count >= 50 {
            self.badges.push("Expert".to_string());
        }
        if self.total_upvotes >= 100 {
            self.badges.push("Community Leader".to_string());
        }
        self
    }
}

impl AnswerContributor {
    fn finish(mut self) -> Self {
        self.score = self.answer_count * 5 + self.total_upvotes * 2 + self.accepted_answers * 15;
        if self.answer_count >= 5 {
            self.badges.push("Helpful".to_string());
        }
        if self.accepted_answers >= 3 {
            self.badges.push("Solution Provider".to_string());
        }
        self
    }
}

/// Keyword and length screening
pub fn moderate_content(content: &str) -> ModerationResult {
    let lower = content.to_lowercase();
    let mut flags = Vec::new();

    if lower.contains("spam") || lower.contains("buy now") {
        flags.push("potential_spam".to_string());
    }
    if lower.chars().count() < 20 {
        flags.push("too_short".to_string());
    }

    ModerationResult {
        approved: flags.is_empty(),
        flags,
    }
}

/// Templated stand-in for a generated answer
fn ai_answer_text(title: &str, content: &str) -> String {
    let opening: Vec<&str> = content.split(' ').take(10).collect();
    format!(
        "Based on your question about \"{}\", here's a comprehensive answer:\n\n{}... [AI-generated response would continue here with detailed, helpful information]",
        title,
        opening.join(" ")
    )
}

fn question_schema(title: &str, content: &str, created_at: DateTime<Utc>) -> serde_json::Value {
    json!({
        "@context": "https://schema.org",
        "@type": "Question",
        "name": title,
        "text": content,
        "answerCount": 0,
        "upvoteCount": 0,
        "dateCreated": created_at.to_rfc3339(),
    })
}

/// Start of the reporting window; windows reaching past the epoch start at the epoch
fn timeframe_cutoff(now: DateTime<Utc>, timeframe: &str) -> DateTime<Utc> {
    ChronoDuration::try_days(i64::from(parse_timeframe(timeframe)))
        .and_then(|window| now.checked_sub_signed(window))
        .map_or(DateTime::<Utc>::UNIX_EPOCH, |cutoff| cutoff.max(DateTime::<Utc>::UNIX_EPOCH))
}

fn recommendations(posts: &PostMetrics) -> Vec<String> {
    let mut list = Vec::new();
    if posts.total_posts > 0 {
        let total = posts.total_posts as f64;
        if (posts.answered_posts as f64) / total < 0.7 {
            list.push("Increase AI auto-answering to improve response rates".to_string());
        }
        if (posts.total_views as f64) / total < 100.0 {
            list.push("Improve post titles and meta descriptions for better visibility".to_string());
        }
    }
    if posts.avg_seo_score < 70.0 {
        list.push("Enable AI enhancement for all new posts to improve SEO".to_string());
    }
    list
}

struct CuratedItem {
    title: String,
    content: String,
    tags: Vec<String>,
    answer: (String, String),
}

/// Simulated platform fetch
fn curated_items(platform: Platform, vertical: &str, max_items: usize) -> Vec<CuratedItem> {
    let p = platform.as_str();
    (1..=max_items.min(CURATION_ITEMS_PER_SOURCE))
        .map(|i| CuratedItem {
            title: format!("{} Question {} about {}", p, i, vertical),
            content: format!("This is a curated question from {} about {}...", p, vertical),
            tags: vec![p.to_string(), vertical.to_string(), "curated".to_string()],
            answer: (
                format!("This is a helpful answer from {}...", p),
                format!("{}_user_{}", p, i),
            ),
        })
        .collect()
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{} is required", field)));
    }
    Ok(())
}

async fn award_points(conn: &mut SqliteConnection, username: &str, action: &str, points: i64) -> Result<()> {
    sqlx::query("INSERT INTO forum_points (username, action, points, created_at) VALUES (?, ?, ?, ?)")
        .bind(username)
        .bind(action)
        .bind(points)
        .bind(Utc::now())
        .execute(conn)
        .await?;
    debug!("Awarded {} points to {} for {}", points, username, action);
    Ok(())
}

// ============================================================================
// Engine
// ============================================================================

pub struct ForumEngine {
    db: SqlitePool,
    events: EventBus,
    metrics: EngineMetrics,
}

impl ForumEngine {
    pub fn new(db: SqlitePool, events: EventBus) -> Self {
        Self {
            db,
            events,
            metrics: EngineMetrics::new(),
        }
    }

    pub async fn create_category(&self, new: NewCategory) -> Result<ForumCategory> {
        require("name", &new.name)?;
        require("vertical", &new.vertical)?;

        let slug = create_slug(&new.name);
        let meta = format!(
            "Join the discussion about {} in our {} community forum.",
            new.name.to_lowercase(),
            new.vertical
        );

        let result = sqlx::query(
            r#"
            INSERT INTO forum_categories
                (name, slug, description, vertical, icon, color, meta_description, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.name)
        .bind(&slug)
        .bind(&new.description)
        .bind(&new.vertical)
        .bind(&new.icon)
        .bind(&new.color)
        .bind(&meta)
        .bind(Utc::now())
        .execute(&self.db)
        .await
        .map_err(|e| Error::from_unique_violation(e, format!("category '{}' already exists", new.name)))?;

        info!("Created forum category: {} ({})", new.name, slug);
        self.get_category(result.last_insert_rowid()).await
    }

    pub async fn list_categories(&self) -> Result<Vec<ForumCategory>> {
        let categories = sqlx::query_as::<_, ForumCategory>("SELECT * FROM forum_categories ORDER BY id")
            .fetch_all(&self.db)
            .await?;
        Ok(categories)
    }

    pub async fn get_category(&self, id: i64) -> Result<ForumCategory> {
        sqlx::query_as::<_, ForumCategory>("SELECT * FROM forum_categories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| Error::NotFound(format!("forum category {}", id)))
    }

    /// Create a post; the category counter and author points move with it
    pub async fn create_post(&self, new: NewPost) -> Result<ForumPost> {
        require("title", &new.title)?;
        require("content", &new.content)?;
        require("authorName", &new.author_name)?;

        let mut content = new.content;
        let mut tags = new.tags;
        let mut seo_score = 0.0;

        if new.ai_enhanced {
            content.push_str(AI_ENHANCEMENT_NOTE);
            seo_score = rand::thread_rng().gen_range(0.0..100.0);
            tags.extend(["enhanced".to_string(), "ai-optimized".to_string()]);
        }

        let now = Utc::now();
        let status = if new.require_moderation { "pending" } else { "published" };

        let mut tx = self.db.begin().await?;

        let category: Option<i64> = sqlx::query_scalar("SELECT id FROM forum_categories WHERE id = ?")
            .bind(new.category_id)
            .fetch_optional(&mut *tx)
            .await?;
        if category.is_none() {
            return Err(Error::NotFound(format!("forum category {}", new.category_id)));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO forum_posts
                (category_id, title, slug, content, excerpt, author_name, author_email,
                 status, post_type, tags, seo_score, meta_description, schema_markup,
                 ai_generated, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(new.category_id)
        .bind(&new.title)
        .bind(create_slug(&new.title))
        .bind(&content)
        .bind(excerpt(&content))
        .bind(&new.author_name)
        .bind(&new.author_email)
        .bind(status)
        .bind(new.post_type.as_str())
        .bind(Json(&tags))
        .bind(seo_score)
        .bind(meta_description(&new.title, &content))
        .bind(Json(question_schema(&new.title, &content, now)))
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let post_id = result.last_insert_rowid();

        sqlx::query("UPDATE forum_categories SET post_count = post_count + 1 WHERE id = ?")
            .bind(new.category_id)
            .execute(&mut *tx)
            .await?;

        award_points(&mut tx, &new.author_name, "post_created", POINTS_POST_CREATED).await?;

        tx.commit().await?;

        self.metrics.incr("posts_created");
        self.events.emit_lossy(EmpireEvent::content_created(ENGINE_NAME, "post", post_id));
        info!("Created forum post {}: {}", post_id, new.title);

        self.fetch_post(post_id).await
    }

    /// Read a post, counting the view
    pub async fn get_post(&self, id: i64) -> Result<ForumPost> {
        let updated = sqlx::query("UPDATE forum_posts SET view_count = view_count + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(format!("forum post {}", id)));
        }
        self.fetch_post(id).await
    }

    async fn fetch_post(&self, id: i64) -> Result<ForumPost> {
        sqlx::query_as::<_, ForumPost>("SELECT * FROM forum_posts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| Error::NotFound(format!("forum post {}", id)))
    }

    async fn fetch_answer(&self, id: i64) -> Result<ForumAnswer> {
        sqlx::query_as::<_, ForumAnswer>("SELECT * FROM forum_answers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| Error::NotFound(format!("forum answer {}", id)))
    }

    pub async fn list_answers(&self, post_id: i64) -> Result<Vec<ForumAnswer>> {
        let answers = sqlx::query_as::<_, ForumAnswer>(
            "SELECT * FROM forum_answers WHERE post_id = ? ORDER BY is_accepted DESC, upvotes DESC, id",
        )
        .bind(post_id)
        .fetch_all(&self.db)
        .await?;
        Ok(answers)
    }

    pub async fn add_answer(&self, post_id: i64, new: NewAnswer) -> Result<ForumAnswer> {
        require("content", &new.content)?;
        require("authorName", &new.author_name)?;

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let post: Option<i64> = sqlx::query_scalar("SELECT id FROM forum_posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(&mut *tx)
            .await?;
        if post.is_none() {
            return Err(Error::NotFound(format!("forum post {}", post_id)));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO forum_answers (post_id, content, author_name, author_email, ai_generated, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(post_id)
        .bind(&new.content)
        .bind(&new.author_name)
        .bind(&new.author_email)
        .bind(new.ai_generated)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let answer_id = result.last_insert_rowid();

        sqlx::query(
            "UPDATE forum_posts SET answer_count = answer_count + 1, last_activity_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(post_id)
        .execute(&mut *tx)
        .await?;

        if !new.ai_generated {
            award_points(&mut tx, &new.author_name, "answer_created", POINTS_ANSWER_CREATED).await?;
        }

        tx.commit().await?;

        self.metrics.incr("answers_created");
        self.events.emit_lossy(EmpireEvent::content_created(ENGINE_NAME, "answer", answer_id));
        info!("Added answer {} to post {}", answer_id, post_id);

        self.fetch_answer(answer_id).await
    }

    /// Count a vote and adjust the author's points
    ///
    /// Votes are not deduplicated per user; counters only grow.
    pub async fn vote(&self, request: VoteRequest) -> Result<VoteOutcome> {
        let (table, action) = match request.target_type {
            VoteTarget::Post => ("forum_posts", "post_voted"),
            VoteTarget::Answer => ("forum_answers", "answer_voted"),
        };
        let (column, points) = match request.vote_type {
            VoteType::Upvote => ("upvotes", POINTS_UPVOTED),
            VoteType::Downvote => ("downvotes", POINTS_DOWNVOTED),
        };

        let mut tx = self.db.begin().await?;

        let updated = sqlx::query(&format!("UPDATE {table} SET {column} = {column} + 1 WHERE id = ?"))
            .bind(request.target_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(format!("{:?} {}", request.target_type, request.target_id)));
        }

        let (author, upvotes, downvotes): (String, i64, i64) = sqlx::query_as(&format!(
            "SELECT author_name, upvotes, downvotes FROM {table} WHERE id = ?"
        ))
        .bind(request.target_id)
        .fetch_one(&mut *tx)
        .await?;

        award_points(&mut tx, &author, action, points).await?;
        tx.commit().await?;

        self.metrics.incr("votes_cast");
        debug!(
            "{:?} by {} on {:?} {}",
            request.vote_type, request.user_id, request.target_type, request.target_id
        );

        Ok(VoteOutcome {
            target_type: request.target_type,
            target_id: request.target_id,
            upvotes,
            downvotes,
        })
    }

    /// Mark an answer accepted; repeated acceptance is a no-op
    pub async fn accept_answer(&self, post_id: i64, answer_id: i64) -> Result<ForumAnswer> {
        let mut tx = self.db.begin().await?;

        let answer: Option<(i64, String, bool)> =
            sqlx::query_as("SELECT post_id, author_name, is_accepted FROM forum_answers WHERE id = ?")
                .bind(answer_id)
                .fetch_optional(&mut *tx)
                .await?;
        let (owner_post, author, already_accepted) =
            answer.ok_or_else(|| Error::NotFound(format!("forum answer {}", answer_id)))?;

        if owner_post != post_id {
            return Err(Error::NotFound(format!(
                "forum answer {} on post {}",
                answer_id, post_id
            )));
        }

        if !already_accepted {
            sqlx::query("UPDATE forum_answers SET is_accepted = 1 WHERE id = ?")
                .bind(answer_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("UPDATE forum_posts SET has_accepted_answer = 1 WHERE id = ?")
                .bind(post_id)
                .execute(&mut *tx)
                .await?;
            award_points(&mut tx, &author, "answer_accepted", POINTS_ANSWER_ACCEPTED).await?;
        }

        tx.commit().await?;
        info!("Marked answer {} as accepted for post {}", answer_id, post_id);

        self.fetch_answer(answer_id).await
    }

    /// Answer a post that has no answers yet; `None` when it already has some
    pub async fn generate_ai_answer(&self, post_id: i64) -> Result<Option<ForumAnswer>> {
        let post = self.fetch_post(post_id).await?;

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM forum_answers WHERE post_id = ?")
            .bind(post_id)
            .fetch_one(&self.db)
            .await?;
        if existing > 0 {
            return Ok(None);
        }

        let answer = self
            .add_answer(
                post_id,
                NewAnswer {
                    content: ai_answer_text(&post.title, &post.content),
                    author_name: AI_AUTHOR.to_string(),
                    author_email: None,
                    ai_generated: true,
                },
            )
            .await?;

        self.metrics.incr("ai_answers_generated");
        info!("Generated AI answer for post: {}", post.title);
        Ok(Some(answer))
    }

    /// Import simulated Q&As from an external platform into the vertical's category
    pub async fn curate_external_content(
        &self,
        platform: Platform,
        vertical: &str,
        max_items: usize,
    ) -> Result<CurationReport> {
        let category: Option<i64> =
            sqlx::query_scalar("SELECT id FROM forum_categories WHERE vertical = ? ORDER BY id LIMIT 1")
                .bind(vertical)
                .fetch_optional(&self.db)
                .await?;
        let category_id =
            category.ok_or_else(|| Error::NotFound(format!("no category for vertical {}", vertical)))?;

        let mut report = CurationReport::default();
        for item in curated_items(platform, vertical, max_items) {
            let imported = self.import_item(category_id, item).await;
            match imported {
                Ok(()) => report.imported += 1,
                Err(e) => {
                    warn!("Failed to import content from {}: {}", platform.as_str(), e);
                    report.failed += 1;
                }
            }
        }

        self.metrics.add("external_content_imported", u64::from(report.imported));
        info!(
            "Content curation complete: {} imported, {} failed from {}",
            report.imported,
            report.failed,
            platform.as_str()
        );
        Ok(report)
    }

    async fn import_item(&self, category_id: i64, item: CuratedItem) -> Result<()> {
        let post = self
            .create_post(NewPost {
                category_id,
                title: item.title,
                content: item.content,
                author_name: CURATOR_AUTHOR.to_string(),
                author_email: None,
                tags: item.tags,
                post_type: PostType::Question,
                ai_enhanced: true,
                require_moderation: false,
            })
            .await?;

        let (content, author) = item.answer;
        self.add_answer(
            post.id,
            NewAnswer {
                content,
                author_name: author,
                author_email: None,
                ai_generated: false,
            },
        )
        .await?;
        Ok(())
    }

    pub async fn analytics(&self, timeframe: &str) -> Result<ForumAnalytics> {
        let cutoff = timeframe_cutoff(Utc::now(), timeframe);

        let categories = sqlx::query_as::<_, CategoryMetrics>(
            r#"
            SELECT COUNT(*) AS total_categories,
                   COALESCE(SUM(CASE WHEN is_active THEN 1 ELSE 0 END), 0) AS active_categories,
                   COALESCE(SUM(post_count), 0) AS total_posts
            FROM forum_categories
            "#,
        )
        .fetch_one(&self.db)
        .await?;

        let posts = sqlx::query_as::<_, PostMetrics>(
            r#"
            SELECT COUNT(*) AS total_posts,
                   COALESCE(SUM(view_count), 0) AS total_views,
                   COALESCE(SUM(upvotes), 0) AS total_upvotes,
                   COALESCE(SUM(CASE WHEN has_accepted_answer THEN 1 ELSE 0 END), 0) AS answered_posts,
                   COALESCE(AVG(seo_score), 0.0) AS avg_seo_score
            FROM forum_posts
            WHERE created_at >= ?
            "#,
        )
        .bind(cutoff)
        .fetch_one(&self.db)
        .await?;

        let top_posts = sqlx::query_as::<_, TopPost>(
            r#"
            SELECT id, title, view_count, answer_count, upvotes, has_accepted_answer
            FROM forum_posts
            ORDER BY view_count + answer_count * 2 + upvotes * 3 DESC, id
            LIMIT 10
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let leaderboard = self.leaderboard(timeframe).await?;
        let recommendations = recommendations(&posts);

        Ok(ForumAnalytics {
            overview: AnalyticsOverview {
                timeframe: timeframe.to_string(),
                categories,
                posts,
            },
            engagement: Engagement {
                top_posts,
                leaderboard: leaderboard.leaderboards,
            },
            recommendations,
        })
    }

    pub async fn leaderboard(&self, timeframe: &str) -> Result<ForumLeaderboard> {
        let cutoff = timeframe_cutoff(Utc::now(), timeframe);

        let post_creators = sqlx::query_as::<_, PostCreator>(
            r#"
            SELECT author_name,
                   COUNT(*) AS post_count,
                   COALESCE(SUM(view_count), 0) AS total_views,
                   COALESCE(SUM(upvotes), 0) AS total_upvotes,
                   COALESCE(SUM(CASE WHEN has_accepted_answer THEN 1 ELSE 0 END), 0) AS answered_count
            FROM forum_posts
            WHERE created_at >= ?
            GROUP BY author_name
            ORDER BY post_count DESC, author_name
            LIMIT ?
            "#,
        )
        .bind(cutoff)
        .bind(LEADERBOARD_SIZE)
        .fetch_all(&self.db)
        .await?;

        let answer_contributors = sqlx::query_as::<_, AnswerContributor>(
            r#"
            SELECT author_name,
                   COUNT(*) AS answer_count,
                   COALESCE(SUM(upvotes), 0) AS total_upvotes,
                   COALESCE(SUM(CASE WHEN is_accepted THEN 1 ELSE 0 END), 0) AS accepted_answers
            FROM forum_answers
            WHERE created_at >= ?
            GROUP BY author_name
            ORDER BY answer_count DESC, author_name
            LIMIT ?
            "#,
        )
        .bind(cutoff)
        .bind(LEADERBOARD_SIZE)
        .fetch_all(&self.db)
        .await?;

        Ok(ForumLeaderboard {
            timeframe: timeframe.to_string(),
            leaderboards: Leaderboards {
                post_creators: post_creators.into_iter().map(PostCreator::finish).collect(),
                answer_contributors: answer_contributors
                    .into_iter()
                    .map(AnswerContributor::finish)
                    .collect(),
            },
        })
    }

    /// Total points in the ledger for one user
    pub async fn user_points(&self, username: &str) -> Result<i64> {
        let total: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(points), 0) FROM forum_points WHERE username = ?")
                .bind(username)
                .fetch_one(&self.db)
                .await?;
        Ok(total)
    }

    // ------------------------------------------------------------------------
    // Job cycles
    // ------------------------------------------------------------------------

    /// Answer published posts left unanswered for more than two hours
    pub async fn run_ai_answering_cycle(&self) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::hours(UNANSWERED_AGE_HOURS);
        let unanswered: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM forum_posts
            WHERE answer_count = 0 AND status = 'published' AND created_at < ?
            ORDER BY id
            LIMIT ?
            "#,
        )
        .bind(cutoff)
        .bind(AI_ANSWER_BATCH)
        .fetch_all(&self.db)
        .await?;

        let mut answered = 0;
        for post_id in unanswered {
            if self.generate_ai_answer(post_id).await?.is_some() {
                answered += 1;
            }
        }
        Ok(answered)
    }

    /// Publish or reject posts waiting for review
    pub async fn run_moderation_cycle(&self) -> Result<usize> {
        let pending: Vec<(i64, String)> = sqlx::query_as(
            "SELECT id, content FROM forum_posts WHERE status = 'pending' ORDER BY id LIMIT ?",
        )
        .bind(MODERATION_BATCH)
        .fetch_all(&self.db)
        .await?;

        let count = pending.len();
        for (id, content) in pending {
            let result = moderate_content(&content);
            let status = if result.approved { "published" } else { "rejected" };

            sqlx::query("UPDATE forum_posts SET status = ?, moderation_flags = ? WHERE id = ?")
                .bind(status)
                .bind(Json(&result.flags))
                .bind(id)
                .execute(&self.db)
                .await?;

            self.metrics.incr("posts_moderated");
            self.events.emit_lossy(EmpireEvent::ModerationDecision {
                engine: ENGINE_NAME.to_string(),
                id,
                status: status.to_string(),
                flags: result.flags,
                timestamp: Utc::now(),
            });
        }

        if count > 0 {
            info!("Moderated {} pending forum posts", count);
        }
        Ok(count)
    }

    pub async fn run_curation_cycle(&self) -> Result<CurationReport> {
        let mut total = CurationReport::default();
        for vertical in CURATION_VERTICALS {
            for platform in Platform::ALL {
                let report = self
                    .curate_external_content(platform, vertical, CURATION_ITEMS_PER_SOURCE)
                    .await?;
                total.imported += report.imported;
                total.failed += report.failed;
            }
        }
        Ok(total)
    }
}

#[async_trait::async_trait]
impl Engine for ForumEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn required_tables(&self) -> &'static [&'static str] {
        REQUIRED_TABLES
    }

    async fn seed(&self) -> Result<()> {
        let now = Utc::now();
        for &(name, vertical, description) in DEFAULT_CATEGORIES {
            let meta = format!(
                "Join the discussion about {} in our {} community forum.",
                name.to_lowercase(),
                vertical
            );
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO forum_categories
                    (name, slug, description, vertical, meta_description, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(name)
            .bind(create_slug(name))
            .bind(description)
            .bind(vertical)
            .bind(meta)
            .bind(now)
            .execute(&self.db)
            .await?;
        }
        Ok(())
    }

    fn jobs(self: Arc<Self>) -> Vec<PeriodicJob> {
        let answering = Arc::clone(&self);
        let moderation = Arc::clone(&self);
        let curation = self;

        vec![
            PeriodicJob::new("forum.ai_answering", Duration::from_secs(2 * 60 * 60), move || {
                let engine = Arc::clone(&answering);
                async move { engine.run_ai_answering_cycle().await.map(|_| ()) }
            }),
            PeriodicJob::new("forum.moderation", Duration::from_secs(30 * 60), move || {
                let engine = Arc::clone(&moderation);
                async move { engine.run_moderation_cycle().await.map(|_| ()) }
            }),
            PeriodicJob::new("forum.curation", Duration::from_secs(24 * 60 * 60), move || {
                let engine = Arc::clone(&curation);
                async move { engine.run_curation_cycle().await.map(|_| ()) }
            }),
        ]
    }

    fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use empire_common::db::{connect, SchemaSync};

    async fn engine() -> ForumEngine {
        let pool = connect("sqlite::memory:").await.unwrap();
        SchemaSync::ensure_all(&pool, &tables()).await.unwrap();
        let engine = ForumEngine::new(pool, EventBus::new(16));
        engine.seed().await.unwrap();
        engine
    }

    fn post(category_id: i64, title: &str) -> NewPost {
        NewPost {
            category_id,
            title: title.to_string(),
            content: "How do I configure the connection pool for production traffic?".to_string(),
            author_name: "alice".to_string(),
            author_email: None,
            tags: vec!["db".to_string()],
            post_type: PostType::Question,
            ai_enhanced: false,
            require_moderation: false,
        }
    }

    fn answer(author: &str) -> NewAnswer {
        NewAnswer {
            content: "Set max_connections based on your core count.".to_string(),
            author_name: author.to_string(),
            author_email: None,
            ai_generated: false,
        }
    }

    #[test]
    fn test_moderate_content_flags() {
        assert_eq!(
            moderate_content("spam"),
            ModerationResult {
                approved: false,
                flags: vec!["potential_spam".to_string(), "too_short".to_string()],
            }
        );
        assert!(!moderate_content("Great deal, BUY NOW before it is gone forever!").approved);
        assert!(moderate_content("A perfectly reasonable question about pools").approved);
    }

    #[test]
    fn test_user_scores_and_badges() {
        let creator = PostCreator {
            author_name: "a".into(),
            post_count: 10,
            total_views: 0,
            total_upvotes: 100,
            answered_count: 2,
            badges: vec![],
            score: 0,
        }
        .finish();
        assert_eq!(creator.score, 10 * 10 + 100 * 2 + 2 * 15);
        assert_eq!(creator.badges, vec!["First Post", "Active Contributor", "Community Leader"]);

        let contributor = AnswerContributor {
            author_name: "b".into(),
            answer_count: 5,
            total_upvotes: 1,
            accepted_answers: 3,
            badges: vec![],
            score: 0,
        }
        .finish();
        assert_eq!(contributor.score, 5 * 5 + 2 + 3 * 15);
        assert_eq!(contributor.badges, vec!["Helpful", "Solution Provider"]);
    }

    #[tokio::test]
    async fn test_seed_is_repeatable() {
        let engine = engine().await;
        engine.seed().await.unwrap();
        assert_eq!(engine.list_categories().await.unwrap().len(), DEFAULT_CATEGORIES.len());
    }

    #[tokio::test]
    async fn test_duplicate_category_conflicts() {
        let engine = engine().await;
        let err = engine
            .create_category(NewCategory {
                name: "General Discussion".into(),
                vertical: "general".into(),
                description: None,
                icon: None,
                color: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_create_post_updates_category_and_points() {
        let engine = engine().await;
        let mut new = post(1, "Pool Sizing?");
        new.ai_enhanced = true;

        let created = engine.create_post(new).await.unwrap();
        assert_eq!(created.slug, "pool-sizing");
        assert!(created.content.ends_with(AI_ENHANCEMENT_NOTE));
        assert!(created.tags.0.contains(&"ai-optimized".to_string()));
        assert!((0.0..100.0).contains(&created.seo_score));
        assert_eq!(created.status, "published");

        assert_eq!(engine.get_category(1).await.unwrap().post_count, 1);
        assert_eq!(engine.user_points("alice").await.unwrap(), POINTS_POST_CREATED);
    }

    #[tokio::test]
    async fn test_create_post_unknown_category_rolls_back() {
        let engine = engine().await;
        let err = engine.create_post(post(999, "Orphan")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(engine.user_points("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_get_post_counts_views() {
        let engine = engine().await;
        let created = engine.create_post(post(1, "Views")).await.unwrap();

        engine.get_post(created.id).await.unwrap();
        let read = engine.get_post(created.id).await.unwrap();
        assert_eq!(read.view_count, 2);
        assert!(matches!(engine.get_post(4242).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_answers_votes_and_acceptance() {
        let engine = engine().await;
        let created = engine.create_post(post(1, "Answers")).await.unwrap();

        let a = engine.add_answer(created.id, answer("bob")).await.unwrap();
        let post_after = engine.fetch_post(created.id).await.unwrap();
        assert_eq!(post_after.answer_count, 1);
        assert!(post_after.last_activity_at.is_some());

        for _ in 0..3 {
            engine
                .vote(VoteRequest {
                    target_type: VoteTarget::Answer,
                    target_id: a.id,
                    user_id: "carol".into(),
                    vote_type: VoteType::Upvote,
                })
                .await
                .unwrap();
        }
        let outcome = engine
            .vote(VoteRequest {
                target_type: VoteTarget::Answer,
                target_id: a.id,
                user_id: "dave".into(),
                vote_type: VoteType::Downvote,
            })
            .await
            .unwrap();
        assert_eq!((outcome.upvotes, outcome.downvotes), (3, 1));

        let accepted = engine.accept_answer(created.id, a.id).await.unwrap();
        assert!(accepted.is_accepted);
        engine.accept_answer(created.id, a.id).await.unwrap();

        // 5 (answer) + 3 * 2 (upvotes) - 1 (downvote) + 15 (accepted once)
        assert_eq!(engine.user_points("bob").await.unwrap(), 25);
        assert!(engine.fetch_post(created.id).await.unwrap().has_accepted_answer);
    }

    #[tokio::test]
    async fn test_accept_answer_from_other_post_rejected() {
        let engine = engine().await;
        let first = engine.create_post(post(1, "First")).await.unwrap();
        let second = engine.create_post(post(1, "Second")).await.unwrap();
        let a = engine.add_answer(first.id, answer("bob")).await.unwrap();

        let err = engine.accept_answer(second.id, a.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let untouched = engine.fetch_answer(a.id).await.unwrap();
        assert!(!untouched.is_accepted);
        assert_eq!(engine.user_points("bob").await.unwrap(), POINTS_ANSWER_CREATED);
    }

    #[tokio::test]
    async fn test_ai_answer_only_for_unanswered() {
        let engine = engine().await;
        let created = engine.create_post(post(1, "Lonely")).await.unwrap();

        let generated = engine.generate_ai_answer(created.id).await.unwrap().unwrap();
        assert!(generated.ai_generated);
        assert_eq!(generated.author_name, AI_AUTHOR);
        assert!(generated.content.starts_with("Based on your question about \"Lonely\""));
        assert_eq!(engine.user_points(AI_AUTHOR).await.unwrap(), 0);

        assert!(engine.generate_ai_answer(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_moderation_cycle() {
        let engine = engine().await;
        let mut spam = post(1, "Deal");
        spam.content = "buy now, limited offer on everything".into();
        spam.require_moderation = true;
        let mut fine = post(1, "Fine");
        fine.require_moderation = true;

        let spam = engine.create_post(spam).await.unwrap();
        let fine = engine.create_post(fine).await.unwrap();
        assert_eq!(spam.status, "pending");

        assert_eq!(engine.run_moderation_cycle().await.unwrap(), 2);

        let spam = engine.fetch_post(spam.id).await.unwrap();
        assert_eq!(spam.status, "rejected");
        assert_eq!(spam.moderation_flags.0, vec!["potential_spam".to_string()]);
        assert_eq!(engine.fetch_post(fine.id).await.unwrap().status, "published");
        assert_eq!(engine.run_moderation_cycle().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_curation_imports_into_vertical() {
        let engine = engine().await;
        let report = engine
            .curate_external_content(Platform::Reddit, "finance", 5)
            .await
            .unwrap();
        assert_eq!(report, CurationReport { imported: 3, failed: 0 });

        let finance = engine
            .list_categories()
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.vertical == "finance")
            .unwrap();
        assert_eq!(finance.post_count, 3);

        let err = engine
            .curate_external_content(Platform::Quora, "gardening", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_timeframe_cutoff_bounds() {
        let now = Utc::now();
        assert_eq!(timeframe_cutoff(now, "7d"), now - ChronoDuration::days(7));
        assert_eq!(timeframe_cutoff(now, "1y"), now - ChronoDuration::days(365));
        assert_eq!(timeframe_cutoff(now, "garbage"), now - ChronoDuration::days(30));
        assert_eq!(timeframe_cutoff(now, "100000000d"), DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(timeframe_cutoff(now, "4294967295y"), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn test_huge_timeframe_covers_all_posts() {
        let engine = engine().await;
        engine.create_post(post(1, "Old news")).await.unwrap();

        let analytics = engine.analytics("100000000d").await.unwrap();
        assert_eq!(analytics.overview.posts.total_posts, 1);
        assert_eq!(analytics.overview.timeframe, "100000000d");

        let board = engine.leaderboard("99999y").await.unwrap();
        assert_eq!(board.leaderboards.post_creators.len(), 1);
    }

    #[tokio::test]
    async fn test_analytics_and_leaderboard() {
        let engine = engine().await;
        let p = engine.create_post(post(1, "Stats")).await.unwrap();
        engine.add_answer(p.id, answer("bob")).await.unwrap();

        let analytics = engine.analytics("7d").await.unwrap();
        assert_eq!(analytics.overview.posts.total_posts, 1);
        assert_eq!(analytics.overview.categories.total_categories, 5);
        assert_eq!(analytics.engagement.top_posts.len(), 1);
        assert!(!analytics.recommendations.is_empty());

        let board = engine.leaderboard("bogus").await.unwrap();
        assert_eq!(board.leaderboards.post_creators[0].author_name, "alice");
        assert_eq!(board.leaderboards.post_creators[0].score, 10);
        assert_eq!(board.leaderboards.answer_contributors[0].score, 5);
    }
}
