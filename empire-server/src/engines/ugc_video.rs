//! User-generated video submissions
//!
//! Submissions get an optimized title, description and tag set plus a viral
//! score, then wait in `pending` until a moderator (or the auto-moderation
//! job) approves or rejects them. Approved videos are rescored from their
//! engagement by the hourly tracking job.
//!
//! Contests group submissions: an entry must name an open contest with room
//! left, and the contest leaderboard ranks its approved entries.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use empire_common::db::{ColumnDefinition, TableDefinition};
use empire_common::engine::{Engine, EngineMetrics, PeriodicJob};
use empire_common::events::{EmpireEvent, EventBus};
use empire_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::types::Json;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const ENGINE_NAME: &str = "ugc_video";

const REQUIRED_TABLES: &[&str] = &["ugc_video_submissions", "ugc_video_contests"];

const SUPPORTED_PLATFORMS: &[&str] = &["youtube_shorts", "tiktok", "instagram_reels", "twitter"];
const VIRAL_TRIGGERS: &[&str] = &["Ultimate", "Secret", "Proven", "Shocking", "Incredible"];
const VIRAL_WORDS: &[&str] = &["secret", "shocking", "ultimate", "incredible", "amazing"];
const HOOKS: &[&str] = &[
    "You won't believe what happened next...",
    "This changed everything I knew about...",
    "The results will shock you...",
    "Here's the secret that experts don't want you to know...",
];

const MAX_TAGS: usize = 15;
const MODERATION_ETA: &str = "24-48 hours";
const AUTO_APPROVE_SCORE: f64 = 0.7;
const AUTO_APPROVE_MAX_SECONDS: i64 = 120;
const AUTO_MODERATION_BATCH: i64 = 10;
const PUBLISH_DELAY_MINUTES: i64 = 30;
const TRACKING_BATCH: i64 = 50;
const MAX_ENGAGEMENT_BOOST: f64 = 0.3;
const CONTEST_LEADERBOARD_SIZE: i64 = 20;

pub fn tables() -> Vec<TableDefinition> {
    vec![
        TableDefinition::new("ugc_video_contests")
            .column(ColumnDefinition::id())
            .column(ColumnDefinition::new("title", "TEXT").not_null())
            .column(ColumnDefinition::new("description", "TEXT").not_null().default("''"))
            .column(ColumnDefinition::new("vertical", "TEXT").not_null())
            .column(ColumnDefinition::new("contest_type", "TEXT").not_null())
            .column(ColumnDefinition::new("prize", "TEXT").not_null())
            .column(ColumnDefinition::new("prize_value", "REAL").not_null().default("0"))
            .column(ColumnDefinition::new("guidelines", "TEXT").not_null())
            .column(ColumnDefinition::new("judgement_criteria", "TEXT").not_null().default("'[]'"))
            .column(ColumnDefinition::new("start_date", "TIMESTAMP").not_null())
            .column(ColumnDefinition::new("end_date", "TIMESTAMP").not_null())
            .column(ColumnDefinition::new("voting_end_date", "TIMESTAMP"))
            .column(ColumnDefinition::new("max_submissions", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("submission_count", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("is_active", "BOOLEAN").not_null().default("1"))
            .column(ColumnDefinition::new("created_at", "TIMESTAMP").not_null()),
        TableDefinition::new("ugc_video_submissions")
            .column(ColumnDefinition::id())
            .column(ColumnDefinition::new("title", "TEXT").not_null())
            .column(ColumnDefinition::new("description", "TEXT"))
            .column(ColumnDefinition::new("vertical", "TEXT").not_null())
            .column(ColumnDefinition::new("video_type", "TEXT").not_null())
            .column(ColumnDefinition::new("video_url", "TEXT").not_null())
            .column(ColumnDefinition::new("thumbnail_url", "TEXT"))
            .column(ColumnDefinition::new("duration", "INTEGER"))
            .column(ColumnDefinition::new("submitter_name", "TEXT").not_null())
            .column(ColumnDefinition::new("submitter_email", "TEXT").not_null())
            .column(ColumnDefinition::new("submitter_social", "TEXT").not_null().default("'{}'"))
            .column(ColumnDefinition::new("tags", "TEXT").not_null().default("'[]'"))
            .column(ColumnDefinition::new("ai_optimized_title", "TEXT").not_null())
            .column(ColumnDefinition::new("ai_optimized_description", "TEXT").not_null())
            .column(ColumnDefinition::new("ai_generated_tags", "TEXT").not_null().default("'[]'"))
            .column(ColumnDefinition::new("platforms", "TEXT").not_null().default("'[]'"))
            .column(ColumnDefinition::new("contest_entry", "BOOLEAN").not_null().default("0"))
            .column(ColumnDefinition::new("contest_id", "INTEGER").references("ugc_video_contests"))
            .column(ColumnDefinition::new("moderation_status", "TEXT").not_null().default("'pending'"))
            .column(ColumnDefinition::new("is_approved", "BOOLEAN").not_null().default("0"))
            .column(ColumnDefinition::new("reject_reason", "TEXT"))
            .column(ColumnDefinition::new("moderator_notes", "TEXT"))
            .column(ColumnDefinition::new("views", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("likes", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("shares", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("viral_score", "REAL").not_null().default("0"))
            .column(ColumnDefinition::new("published_at", "TIMESTAMP"))
            .column(ColumnDefinition::new("last_tracked_at", "TIMESTAMP"))
            .column(ColumnDefinition::new("created_at", "TIMESTAMP").not_null()),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoType {
    Review,
    Tip,
    Guide,
    Testimonial,
}

impl VideoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoType::Review => "review",
            VideoType::Tip => "tip",
            VideoType::Guide => "guide",
            VideoType::Testimonial => "testimonial",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "review" => Some(VideoType::Review),
            "tip" => Some(VideoType::Tip),
            "guide" => Some(VideoType::Guide),
            "testimonial" => Some(VideoType::Testimonial),
            _ => None,
        }
    }

    fn viral_weight(&self) -> f64 {
        match self {
            VideoType::Testimonial => 0.8,
            VideoType::Review => 0.7,
            VideoType::Tip => 0.6,
            VideoType::Guide => 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VideoSubmission {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub vertical: String,
    pub video_type: String,
    pub video_url: String,
    pub thumbnail_url: Option<String>,
    pub duration: Option<i64>,
    pub submitter_name: String,
    pub submitter_email: String,
    pub submitter_social: Json<Value>,
    pub tags: Json<Vec<String>>,
    pub ai_optimized_title: String,
    pub ai_optimized_description: String,
    pub ai_generated_tags: Json<Vec<String>>,
    pub platforms: Json<Vec<String>>,
    pub contest_entry: bool,
    pub contest_id: Option<i64>,
    pub moderation_status: String,
    pub is_approved: bool,
    pub reject_reason: Option<String>,
    pub moderator_notes: Option<String>,
    pub views: i64,
    pub likes: i64,
    pub shares: i64,
    pub viral_score: f64,
    pub published_at: Option<DateTime<Utc>>,
    pub last_tracked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl VideoSubmission {
    pub fn estimated_reach(&self) -> i64 {
        self.platforms
            .0
            .iter()
            .map(|p| platform_reach(p, &self.vertical))
            .sum()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVideo {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub vertical: String,
    pub video_type: VideoType,
    pub video_url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    /// Seconds
    #[serde(default)]
    pub duration: Option<i64>,
    pub submitter_name: String,
    pub submitter_email: String,
    #[serde(default)]
    pub submitter_social: Option<Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub platforms: Option<Vec<String>>,
    #[serde(default)]
    pub contest_entry: bool,
    /// Enter this contest; implies `contest_entry`
    #[serde(default)]
    pub contest_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContestType {
    BestReview,
    MostCreative,
    ViralChallenge,
}

impl ContestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContestType::BestReview => "best_review",
            ContestType::MostCreative => "most_creative",
            ContestType::ViralChallenge => "viral_challenge",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub vertical: String,
    pub contest_type: ContestType,
    pub prize: String,
    #[serde(default)]
    pub prize_value: Option<f64>,
    pub guidelines: String,
    #[serde(default)]
    pub judgement_criteria: Vec<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub voting_end_date: Option<DateTime<Utc>>,
    /// 0 means unlimited
    #[serde(default)]
    pub max_submissions: Option<i64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VideoContest {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub vertical: String,
    pub contest_type: String,
    pub prize: String,
    pub prize_value: f64,
    pub guidelines: String,
    pub judgement_criteria: Json<Vec<String>>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub voting_end_date: Option<DateTime<Utc>>,
    pub max_submissions: i64,
    pub submission_count: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl VideoContest {
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now >= self.start_date && now <= self.end_date
    }

    pub fn is_full(&self) -> bool {
        self.max_submissions > 0 && self.submission_count >= self.max_submissions
    }

    fn submission_url(&self, base_url: &str) -> String {
        format!("{}/contests/{}/submit", base_url, self.id)
    }

    fn promo_content(&self, base_url: &str) -> Value {
        json!({
            "socialMediaPosts": {
                "twitter": format!(
                    "🏆 NEW CONTEST ALERT! {}\n\nPrize: {}\n\nSubmit your {} videos now!\n\n#Contest #{} #VideoContest",
                    self.title, self.prize, self.vertical, self.vertical
                ),
                "instagram": format!(
                    "🎥 Video Contest: {}\n\n💰 Prize: {}\n\n📝 Guidelines: {}\n\n🎯 Submit your best {} content!",
                    self.title, self.prize, self.guidelines, self.vertical
                ),
                "linkedin": format!(
                    "Professional {} Video Contest\n\nWe're looking for the best {} content creators!\n\nPrize: {}",
                    self.vertical, self.vertical, self.prize
                ),
            },
            "emailTemplate": format!(
                "<h2>🏆 {}</h2>\n<p><strong>Prize:</strong> {}</p>\n<p><strong>Theme:</strong> {}</p>\n<p><strong>Deadline:</strong> {}</p>\n<a href=\"{}\">Submit Your Video</a>",
                self.title,
                self.prize,
                self.vertical,
                self.end_date.format("%a %b %d %Y"),
                self.submission_url(base_url)
            ),
            "landingPageContent": {
                "hero": format!("Win {} with Your {} Video!", self.prize, self.vertical),
                "description": self.description,
                "guidelines": self.guidelines,
                "cta": "Submit Your Entry Now",
            },
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedContest {
    pub contest: VideoContest,
    pub promo_content: Value,
    pub submission_url: String,
    pub leaderboard_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestLeaderboard {
    pub contest: VideoContest,
    pub entries: Vec<VideoSummary>,
}

/// Engagement counters a viewer can bump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interaction {
    View,
    Like,
    Share,
}

impl Interaction {
    fn column(&self) -> &'static str {
        match self {
            Interaction::View => "views",
            Interaction::Like => "likes",
            Interaction::Share => "shares",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationDecision {
    pub action: ModerationAction,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub moderator_notes: Option<String>,
    #[serde(default)]
    pub publish_platforms: Option<Vec<String>>,
}

impl ModerationDecision {
    pub fn approve() -> Self {
        Self {
            action: ModerationAction::Approve,
            reason: None,
            moderator_notes: None,
            publish_platforms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Optimizations {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub viral_score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub submission: VideoSubmission,
    pub estimated_viral_score: f64,
    #[serde(rename = "moderationETA")]
    pub moderation_eta: &'static str,
    pub optimizations: Optimizations,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledPublish {
    pub platform: String,
    pub scheduled_for: DateTime<Utc>,
    pub estimated_reach: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ModerationOutcome {
    #[serde(rename_all = "camelCase")]
    Approved {
        video: VideoSubmission,
        publish_results: Vec<ScheduledPublish>,
        estimated_reach: i64,
    },
    Rejected {
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VideoSummary {
    pub id: i64,
    pub title: String,
    pub vertical: String,
    pub video_type: String,
    pub views: i64,
    pub likes: i64,
    pub shares: i64,
    pub viral_score: f64,
    pub moderation_status: String,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetrics {
    pub total_videos: i64,
    pub total_views: i64,
    pub total_likes: i64,
    pub total_shares: i64,
    pub avg_viral_score: f64,
    pub approval_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoAnalytics {
    pub videos: Vec<VideoSummary>,
    pub metrics: VideoMetrics,
    pub top_performing: Vec<VideoSummary>,
}

// ============================================================================
// Optimization heuristics
// ============================================================================

fn vertical_emoji(vertical: &str) -> &'static str {
    match vertical {
        "tech" => "💻",
        "business" => "💼",
        "health" => "🏥",
        "finance" => "💰",
        "education" => "📚",
        "entertainment" => "🎬",
        _ => "🎥",
    }
}

fn vertical_hashtags(vertical: &str) -> &'static str {
    match vertical {
        "tech" => "#tech #technology #innovation #digital",
        "business" => "#business #entrepreneur #startup #success",
        "health" => "#health #wellness #fitness #lifestyle",
        "finance" => "#finance #money #investing #wealth",
        "education" => "#education #learning #knowledge #tips",
        "entertainment" => "#entertainment #fun #viral #trending",
        _ => "#viral #trending #amazing",
    }
}

fn vertical_tags(vertical: &str) -> &'static [&'static str] {
    match vertical {
        "tech" => &["technology", "innovation", "digital", "ai", "software"],
        "business" => &["entrepreneurship", "startup", "business", "success", "marketing"],
        "health" => &["health", "wellness", "fitness", "nutrition", "lifestyle"],
        "finance" => &["finance", "investing", "money", "wealth", "financial"],
        "education" => &["education", "learning", "tutorial", "howto", "knowledge"],
        "entertainment" => &["entertainment", "fun", "comedy", "music", "movies"],
        _ => &["general", "content", "video"],
    }
}

/// Per-platform audience estimate scaled by vertical
pub fn platform_reach(platform: &str, vertical: &str) -> i64 {
    let base = match platform {
        "youtube_shorts" => 10_000.0,
        "tiktok" => 15_000.0,
        "instagram_reels" => 8_000.0,
        _ => 5_000.0,
    };
    let multiplier = match vertical {
        "tech" => 1.2,
        "business" => 1.1,
        "entertainment" => 1.5,
        "education" => 0.9,
        _ => 1.0,
    };
    (base * multiplier) as i64
}

/// Trigger word is picked from the title so the same submission always optimizes the same way
pub fn optimize_title(title: &str, vertical: &str) -> String {
    let trigger = VIRAL_TRIGGERS[title.chars().count() % VIRAL_TRIGGERS.len()];
    format!("{} {} {}", vertical_emoji(vertical), trigger, title)
}

pub fn optimize_description(description: &str, vertical: &str) -> String {
    let hook = HOOKS[description.chars().count() % HOOKS.len()];
    format!(
        "{}\n\n{}\n\n🔥 Want more {} content like this? Subscribe and hit the bell!\n\n{}",
        hook,
        description,
        vertical,
        vertical_hashtags(vertical)
    )
}

pub fn optimal_tags(title: &str, vertical: &str, video_type: VideoType) -> Vec<String> {
    let base = [vertical, video_type.as_str(), "viral", "trending"];
    let lower = title.to_lowercase();
    let keywords = lower.split(' ').filter(|w| w.chars().count() > 3);

    base.into_iter()
        .chain(vertical_tags(vertical).iter().copied())
        .chain(keywords)
        .take(MAX_TAGS)
        .map(str::to_string)
        .collect()
}

/// Scored in [0, 1]; type weight contributes at most 0.4
pub fn viral_score(title: &str, video_type: VideoType, duration: Option<i64>) -> f64 {
    let mut score = 0.5 * video_type.viral_weight();

    score += match duration {
        Some(d) if d <= 30 => 0.3,
        Some(d) if d <= 60 => 0.2,
        Some(d) if d <= 120 => 0.1,
        _ => 0.0,
    };

    let lower = title.to_lowercase();
    score += VIRAL_WORDS.iter().filter(|w| lower.contains(*w)).count() as f64 * 0.1;

    score.min(1.0)
}

/// Content score plus a bounded boost from likes and shares per view
pub fn tracked_viral_score(video: &VideoSubmission) -> f64 {
    let base = VideoType::parse(&video.video_type)
        .map(|kind| viral_score(&video.title, kind, video.duration))
        .unwrap_or(video.viral_score);

    if video.views <= 0 {
        return base;
    }
    let rate = (video.likes + 2 * video.shares) as f64 / video.views as f64;
    (base + (rate * 0.5).min(MAX_ENGAGEMENT_BOOST)).min(1.0)
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{} is required", field)));
    }
    Ok(())
}

// ============================================================================
// Engine
// ============================================================================

pub struct UgcVideoEngine {
    db: SqlitePool,
    events: EventBus,
    metrics: EngineMetrics,
    base_url: String,
}

async fn find_contest(conn: &mut SqliteConnection, id: i64) -> Result<VideoContest> {
    sqlx::query_as::<_, VideoContest>("SELECT * FROM ugc_video_contests WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("video contest {}", id)))
}

impl UgcVideoEngine {
    pub fn new(db: SqlitePool, events: EventBus, base_url: impl Into<String>) -> Self {
        Self {
            db,
            events,
            metrics: EngineMetrics::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn submit_video(&self, new: NewVideo) -> Result<SubmitOutcome> {
        require("title", &new.title)?;
        require("vertical", &new.vertical)?;
        require("videoUrl", &new.video_url)?;
        require("submitterName", &new.submitter_name)?;
        require("submitterEmail", &new.submitter_email)?;
        if new.duration.is_some_and(|d| d < 0) {
            return Err(Error::InvalidInput("duration must not be negative".to_string()));
        }

        let optimizations = Optimizations {
            title: optimize_title(&new.title, &new.vertical),
            description: optimize_description(new.description.as_deref().unwrap_or(""), &new.vertical),
            tags: optimal_tags(&new.title, &new.vertical, new.video_type),
            viral_score: viral_score(&new.title, new.video_type, new.duration),
        };
        let platforms = new
            .platforms
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| SUPPORTED_PLATFORMS.iter().map(|p| p.to_string()).collect());

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        if let Some(contest_id) = new.contest_id {
            let contest = find_contest(&mut tx, contest_id).await?;
            if !contest.is_open_at(now) {
                return Err(Error::Conflict(format!("video contest {} is not accepting entries", contest_id)));
            }
            if contest.is_full() {
                return Err(Error::Conflict(format!(
                    "video contest {} has reached maximum submissions",
                    contest_id
                )));
            }
            sqlx::query("UPDATE ugc_video_contests SET submission_count = submission_count + 1 WHERE id = ?")
                .bind(contest_id)
                .execute(&mut *tx)
                .await?;
        }

        let result = sqlx::query(
            r#"
            INSERT INTO ugc_video_submissions
                (title, description, vertical, video_type, video_url, thumbnail_url, duration,
                 submitter_name, submitter_email, submitter_social, tags, ai_optimized_title,
                 ai_optimized_description, ai_generated_tags, platforms, contest_entry, contest_id,
                 viral_score, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.vertical)
        .bind(new.video_type.as_str())
        .bind(&new.video_url)
        .bind(&new.thumbnail_url)
        .bind(new.duration)
        .bind(&new.submitter_name)
        .bind(&new.submitter_email)
        .bind(Json(new.submitter_social.unwrap_or_else(|| json!({}))))
        .bind(Json(&new.tags))
        .bind(&optimizations.title)
        .bind(&optimizations.description)
        .bind(Json(&optimizations.tags))
        .bind(Json(&platforms))
        .bind(new.contest_entry || new.contest_id.is_some())
        .bind(new.contest_id)
        .bind(optimizations.viral_score)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let submission = self.get_video(result.last_insert_rowid()).await?;

        self.metrics.incr("videos_submitted");
        self.events
            .emit_lossy(EmpireEvent::content_created(ENGINE_NAME, "video", submission.id));
        info!("Video submission {} queued for moderation: {}", submission.id, submission.title);

        Ok(SubmitOutcome {
            estimated_viral_score: optimizations.viral_score,
            moderation_eta: MODERATION_ETA,
            optimizations,
            submission,
        })
    }

    pub async fn get_video(&self, id: i64) -> Result<VideoSubmission> {
        sqlx::query_as::<_, VideoSubmission>("SELECT * FROM ugc_video_submissions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| Error::NotFound(format!("video submission {}", id)))
    }

    /// Approve or reject a pending submission
    pub async fn moderate_video(&self, id: i64, decision: ModerationDecision) -> Result<ModerationOutcome> {
        let video = self.get_video(id).await?;
        let now = Utc::now();

        let updated = match decision.action {
            ModerationAction::Approve => {
                let platforms = decision
                    .publish_platforms
                    .filter(|p| !p.is_empty())
                    .unwrap_or(video.platforms.0);
                sqlx::query(
                    r#"
                    UPDATE ugc_video_submissions
                    SET moderation_status = 'approved', is_approved = 1, platforms = ?,
                        moderator_notes = ?, published_at = ?
                    WHERE id = ? AND moderation_status = 'pending'
                    "#,
                )
                .bind(Json(&platforms))
                .bind(&decision.moderator_notes)
                .bind(now)
                .bind(id)
                .execute(&self.db)
                .await?
            }
            ModerationAction::Reject => {
                sqlx::query(
                    r#"
                    UPDATE ugc_video_submissions
                    SET moderation_status = 'rejected', is_approved = 0, reject_reason = ?,
                        moderator_notes = ?
                    WHERE id = ? AND moderation_status = 'pending'
                    "#,
                )
                .bind(&decision.reason)
                .bind(&decision.moderator_notes)
                .bind(id)
                .execute(&self.db)
                .await?
            }
        };

        if updated.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "video submission {} is already {}",
                id, video.moderation_status
            )));
        }

        let status = match decision.action {
            ModerationAction::Approve => "approved",
            ModerationAction::Reject => "rejected",
        };
        self.metrics.incr(&format!("videos_{}", status));
        self.events.emit_lossy(EmpireEvent::ModerationDecision {
            engine: ENGINE_NAME.to_string(),
            id,
            status: status.to_string(),
            flags: decision.reason.iter().cloned().collect(),
            timestamp: now,
        });

        match decision.action {
            ModerationAction::Approve => {
                let video = self.get_video(id).await?;
                let publish_at = now + ChronoDuration::minutes(PUBLISH_DELAY_MINUTES);
                let publish_results = video
                    .platforms
                    .0
                    .iter()
                    .map(|platform| ScheduledPublish {
                        platform: platform.clone(),
                        scheduled_for: publish_at,
                        estimated_reach: platform_reach(platform, &video.vertical),
                    })
                    .collect();
                info!("Approved video {}: {}", id, video.title);

                Ok(ModerationOutcome::Approved {
                    estimated_reach: video.estimated_reach(),
                    publish_results,
                    video,
                })
            }
            ModerationAction::Reject => {
                info!("Rejected video {} ({})", id, video.submitter_email);
                Ok(ModerationOutcome::Rejected {
                    reason: decision.reason,
                })
            }
        }
    }

    pub async fn record_view(&self, id: i64) -> Result<i64> {
        self.record_interaction(id, Interaction::View).await
    }

    /// Bump one engagement counter and return its new value
    pub async fn record_interaction(&self, id: i64, interaction: Interaction) -> Result<i64> {
        let column = interaction.column();
        let total: Option<i64> = sqlx::query_scalar(&format!(
            "UPDATE ugc_video_submissions SET {column} = {column} + 1 WHERE id = ? RETURNING {column}"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        total.ok_or_else(|| Error::NotFound(format!("video submission {}", id)))
    }

    pub async fn create_contest(&self, new: NewContest) -> Result<CreatedContest> {
        require("title", &new.title)?;
        require("vertical", &new.vertical)?;
        require("prize", &new.prize)?;
        require("guidelines", &new.guidelines)?;
        if new.end_date <= new.start_date {
            return Err(Error::InvalidInput("endDate must be after startDate".to_string()));
        }
        if new.voting_end_date.is_some_and(|voting| voting < new.end_date) {
            return Err(Error::InvalidInput("votingEndDate must not be before endDate".to_string()));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO ugc_video_contests
                (title, description, vertical, contest_type, prize, prize_value, guidelines,
                 judgement_criteria, start_date, end_date, voting_end_date, max_submissions, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.vertical)
        .bind(new.contest_type.as_str())
        .bind(&new.prize)
        .bind(new.prize_value.unwrap_or(0.0))
        .bind(&new.guidelines)
        .bind(Json(&new.judgement_criteria))
        .bind(new.start_date)
        .bind(new.end_date)
        .bind(new.voting_end_date)
        .bind(new.max_submissions.unwrap_or(0).max(0))
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        let contest = self.get_contest(result.last_insert_rowid()).await?;

        self.metrics.incr("contests_created");
        self.events
            .emit_lossy(EmpireEvent::content_created(ENGINE_NAME, "contest", contest.id));
        info!("Created video contest {}: {}", contest.id, contest.title);

        Ok(CreatedContest {
            promo_content: contest.promo_content(&self.base_url),
            submission_url: contest.submission_url(&self.base_url),
            leaderboard_url: format!("{}/contests/{}/leaderboard", self.base_url, contest.id),
            contest,
        })
    }

    pub async fn get_contest(&self, id: i64) -> Result<VideoContest> {
        let mut conn = self.db.acquire().await?;
        find_contest(&mut conn, id).await
    }

    /// Approved entries ranked by viral score, then views
    pub async fn contest_leaderboard(&self, contest_id: i64) -> Result<ContestLeaderboard> {
        let contest = self.get_contest(contest_id).await?;
        let entries = sqlx::query_as::<_, VideoSummary>(
            r#"
            SELECT id, title, vertical, video_type, views, likes, shares, viral_score,
                   moderation_status, published_at
            FROM ugc_video_submissions
            WHERE contest_id = ? AND is_approved = 1
            ORDER BY viral_score DESC, views DESC, id
            LIMIT ?
            "#,
        )
        .bind(contest_id)
        .bind(CONTEST_LEADERBOARD_SIZE)
        .fetch_all(&self.db)
        .await?;

        Ok(ContestLeaderboard { contest, entries })
    }

    pub async fn analytics(&self, vertical: Option<&str>) -> Result<VideoAnalytics> {
        let videos = sqlx::query_as::<_, VideoSummary>(
            r#"
            SELECT id, title, vertical, video_type, views, likes, shares, viral_score,
                   moderation_status, published_at
            FROM ugc_video_submissions
            WHERE (?1 IS NULL OR vertical = ?1)
            ORDER BY published_at IS NULL, published_at DESC, id DESC
            "#,
        )
        .bind(vertical)
        .fetch_all(&self.db)
        .await?;

        let metrics = sqlx::query_as::<_, VideoMetrics>(
            r#"
            SELECT COUNT(*) AS total_videos,
                   COALESCE(SUM(views), 0) AS total_views,
                   COALESCE(SUM(likes), 0) AS total_likes,
                   COALESCE(SUM(shares), 0) AS total_shares,
                   COALESCE(AVG(viral_score), 0.0) AS avg_viral_score,
                   CASE WHEN COUNT(*) = 0 THEN 0.0
                        ELSE SUM(CASE WHEN moderation_status = 'approved' THEN 1 ELSE 0 END) * 100.0 / COUNT(*)
                   END AS approval_rate
            FROM ugc_video_submissions
            WHERE (?1 IS NULL OR vertical = ?1)
            "#,
        )
        .bind(vertical)
        .fetch_one(&self.db)
        .await?;

        let top_performing = sqlx::query_as::<_, VideoSummary>(
            r#"
            SELECT id, title, vertical, video_type, views, likes, shares, viral_score,
                   moderation_status, published_at
            FROM ugc_video_submissions
            WHERE is_approved = 1 AND (?1 IS NULL OR vertical = ?1)
            ORDER BY viral_score DESC, views DESC, id
            LIMIT 10
            "#,
        )
        .bind(vertical)
        .fetch_all(&self.db)
        .await?;

        Ok(VideoAnalytics {
            videos,
            metrics,
            top_performing,
        })
    }

    /// Approve pending submissions that score well and are short enough
    pub async fn run_auto_moderation_cycle(&self) -> Result<usize> {
        let qualifying = sqlx::query_as::<_, VideoSubmission>(
            r#"
            SELECT * FROM ugc_video_submissions
            WHERE moderation_status = 'pending'
              AND viral_score > ?
              AND duration IS NOT NULL AND duration <= ?
            ORDER BY id
            LIMIT ?
            "#,
        )
        .bind(AUTO_APPROVE_SCORE)
        .bind(AUTO_APPROVE_MAX_SECONDS)
        .bind(AUTO_MODERATION_BATCH)
        .fetch_all(&self.db)
        .await?;

        debug!("Auto-approving {} pending videos", qualifying.len());

        let mut approved = 0;
        for video in &qualifying {
            match self.moderate_video(video.id, ModerationDecision::approve()).await {
                Ok(_) => approved += 1,
                Err(Error::Conflict(_)) => debug!("Video {} moderated concurrently", video.id),
                Err(e) => return Err(e),
            }
        }
        Ok(approved)
    }

    /// Rescore approved videos from engagement, least recently tracked first
    pub async fn run_viral_tracking_cycle(&self) -> Result<usize> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let approved = sqlx::query_as::<_, VideoSubmission>(
            r#"
            SELECT * FROM ugc_video_submissions
            WHERE is_approved = 1
            ORDER BY last_tracked_at IS NOT NULL, last_tracked_at, id
            LIMIT ?
            "#,
        )
        .bind(TRACKING_BATCH)
        .fetch_all(&mut *tx)
        .await?;

        for video in &approved {
            sqlx::query("UPDATE ugc_video_submissions SET viral_score = ?, last_tracked_at = ? WHERE id = ?")
                .bind(tracked_viral_score(video))
                .bind(now)
                .bind(video.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        self.metrics.add("viral_scores_tracked", approved.len() as u64);
        debug!("Tracked viral performance of {} videos", approved.len());
        Ok(approved.len())
    }
}

#[async_trait::async_trait]
impl Engine for UgcVideoEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn required_tables(&self) -> &'static [&'static str] {
        REQUIRED_TABLES
    }

    fn jobs(self: Arc<Self>) -> Vec<PeriodicJob> {
        let moderation = Arc::clone(&self);
        let tracking = self;

        vec![
            PeriodicJob::new("ugc_video.auto_moderation", Duration::from_secs(30 * 60), move || {
                let engine = Arc::clone(&moderation);
                async move { engine.run_auto_moderation_cycle().await.map(|_| ()) }
            }),
            PeriodicJob::new("ugc_video.viral_tracking", Duration::from_secs(60 * 60), move || {
                let engine = Arc::clone(&tracking);
                async move { engine.run_viral_tracking_cycle().await.map(|_| ()) }
            }),
        ]
    }

    fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }
}
