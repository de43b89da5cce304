//! Gamified viral challenges
//!
//! Quiz, checklist, score, photo and video challenges with per-type
//! progress merging, scoring, completion checks, share rewards, invite
//! counters and a ranked leaderboard.

use chrono::{DateTime, Utc};
use empire_common::db::{ColumnDefinition, TableDefinition};
use empire_common::engine::{Engine, EngineMetrics, PeriodicJob};
use empire_common::events::{EmpireEvent, EventBus};
use empire_common::text::referral_code;
use empire_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::types::Json;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const ENGINE_NAME: &str = "challenges";

const REQUIRED_TABLES: &[&str] = &["viral_challenges", "challenge_participants"];

const DEFAULT_DURATION_DAYS: i64 = 30;
const DEFAULT_TOTAL_QUESTIONS: u64 = 10;
const DEFAULT_SHARE_POINTS: i64 = 10;
const DEFAULT_LEADERBOARD_LIMIT: i64 = 50;
const VIRAL_FACTOR_PER_SHARE: f64 = 0.01;

pub fn tables() -> Vec<TableDefinition> {
    vec![
        TableDefinition::new("viral_challenges")
            .column(ColumnDefinition::id())
            .column(ColumnDefinition::new("title", "TEXT").not_null())
            .column(ColumnDefinition::new("description", "TEXT").not_null())
            .column(ColumnDefinition::new("vertical", "TEXT").not_null())
            .column(ColumnDefinition::new("challenge_type", "TEXT").not_null())
            .column(ColumnDefinition::new("rules", "TEXT").not_null().default("''"))
            .column(ColumnDefinition::new("instructions", "TEXT").not_null().default("''"))
            .column(ColumnDefinition::new("duration", "INTEGER").not_null().default("30"))
            .column(ColumnDefinition::new("max_participants", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("current_participants", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("challenge_data", "TEXT").not_null().default("'{}'"))
            .column(ColumnDefinition::new("scoring", "TEXT").not_null().default("'{}'"))
            .column(ColumnDefinition::new("rewards", "TEXT").not_null().default("'[]'"))
            .column(ColumnDefinition::new("badges", "TEXT").not_null().default("'[]'"))
            .column(ColumnDefinition::new("sharing_rewards", "TEXT").not_null().default("'{}'"))
            .column(ColumnDefinition::new("invite_rewards", "TEXT").not_null().default("'{}'"))
            .column(ColumnDefinition::new("start_date", "TIMESTAMP").not_null())
            .column(ColumnDefinition::new("end_date", "TIMESTAMP").not_null())
            .column(ColumnDefinition::new("is_active", "BOOLEAN").not_null().default("1"))
            .column(ColumnDefinition::new("total_shares", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("viral_factor", "REAL").not_null().default("0"))
            .column(ColumnDefinition::new("created_at", "TIMESTAMP").not_null()),
        TableDefinition::new("challenge_participants")
            .column(ColumnDefinition::id())
            .column(
                ColumnDefinition::new("challenge_id", "INTEGER")
                    .not_null()
                    .references("viral_challenges"),
            )
            .column(ColumnDefinition::new("user_id", "TEXT").not_null())
            .column(ColumnDefinition::new("user_name", "TEXT").not_null())
            .column(ColumnDefinition::new("user_email", "TEXT"))
            .column(ColumnDefinition::new("invited_by", "TEXT"))
            .column(ColumnDefinition::new("referral_code", "TEXT").not_null())
            .column(ColumnDefinition::new("progress", "TEXT").not_null().default("'{}'"))
            .column(ColumnDefinition::new("score", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("is_completed", "BOOLEAN").not_null().default("0"))
            .column(ColumnDefinition::new("completed_at", "TIMESTAMP"))
            .column(ColumnDefinition::new("completion_data", "TEXT"))
            .column(ColumnDefinition::new("rank", "INTEGER"))
            .column(ColumnDefinition::new("badges_earned", "TEXT").not_null().default("'[]'"))
            .column(ColumnDefinition::new("shares_count", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("invites_count", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("joined_at", "TIMESTAMP").not_null())
            .constraint("UNIQUE (challenge_id, user_id)"),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeType {
    Quiz,
    Checklist,
    Score,
    Photo,
    Video,
}

impl ChallengeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::Quiz => "quiz",
            ChallengeType::Checklist => "checklist",
            ChallengeType::Score => "score",
            ChallengeType::Photo => "photo",
            ChallengeType::Video => "video",
        }
    }

    /// Stored type names; unknown values behave like quizzes
    pub fn parse(value: &str) -> Self {
        match value {
            "checklist" => ChallengeType::Checklist,
            "score" => ChallengeType::Score,
            "photo" => ChallengeType::Photo,
            "video" => ChallengeType::Video,
            _ => ChallengeType::Quiz,
        }
    }

    fn viral_weight(&self) -> f64 {
        match self {
            ChallengeType::Video => 0.8,
            ChallengeType::Photo => 0.7,
            ChallengeType::Quiz | ChallengeType::Score => 0.6,
            ChallengeType::Checklist => 0.5,
        }
    }

    pub fn default_scoring(&self) -> Value {
        match self {
            ChallengeType::Quiz => json!({ "correctAnswer": 10, "timeBonus": 5, "streakBonus": 2 }),
            ChallengeType::Checklist => json!({ "itemCompleted": 15, "allCompleted": 50, "speedBonus": 10 }),
            ChallengeType::Score => json!({ "basePoints": 1, "milestone": 100, "perfectScore": 500 }),
            ChallengeType::Photo => json!({ "submission": 25, "likes": 2, "shares": 5 }),
            ChallengeType::Video => json!({ "submission": 50, "views": 1, "engagement": 3 }),
        }
    }

    pub fn default_badges(&self) -> Value {
        match self {
            ChallengeType::Quiz | ChallengeType::Score => json!([
                { "name": "Quiz Master", "condition": "score >= 100", "icon": "🧠" },
                { "name": "Speed Demon", "condition": "completed_fast", "icon": "⚡" },
                { "name": "Perfect Score", "condition": "all_correct", "icon": "🎯" }
            ]),
            ChallengeType::Checklist => json!([
                { "name": "Completionist", "condition": "all_items_done", "icon": "✅" },
                { "name": "Fast Finisher", "condition": "completed_early", "icon": "🏃" }
            ]),
            ChallengeType::Photo => json!([
                { "name": "Photographer", "condition": "photo_submitted", "icon": "📸" },
                { "name": "Viral Shot", "condition": "high_engagement", "icon": "🔥" }
            ]),
            ChallengeType::Video => json!([
                { "name": "Video Creator", "condition": "video_submitted", "icon": "🎥" },
                { "name": "Viral Video", "condition": "high_views", "icon": "🌟" }
            ]),
        }
    }

    pub fn initial_progress(&self) -> Value {
        match self {
            ChallengeType::Quiz => json!({ "questionsAnswered": 0, "correctAnswers": 0, "currentQuestion": 0 }),
            ChallengeType::Checklist => json!({ "itemsCompleted": [], "totalItems": 0, "completionRate": 0 }),
            ChallengeType::Score => json!({ "currentScore": 0, "highScore": 0, "attempts": 0 }),
            ChallengeType::Photo => json!({ "submitted": false, "likes": 0, "shares": 0 }),
            ChallengeType::Video => json!({ "submitted": false, "views": 0, "engagement": 0 }),
        }
    }

    fn next_steps(&self, progress: &Value) -> Vec<String> {
        match self {
            ChallengeType::Checklist => vec![
                "Complete the next item on your checklist".to_string(),
                "Track your progress in real-time".to_string(),
                "Invite friends to join the challenge".to_string(),
            ],
            _ => {
                let current = progress.get("currentQuestion").and_then(Value::as_u64).unwrap_or(0);
                vec![
                    format!("Answer question {}", current + 1),
                    "Complete the quiz to earn points".to_string(),
                    "Share your progress to unlock bonuses".to_string(),
                ]
            }
        }
    }
}

pub fn default_sharing_rewards() -> Value {
    json!({ "points": DEFAULT_SHARE_POINTS, "bonusMultiplier": 1.1, "unlockThreshold": 5 })
}

pub fn default_invite_rewards() -> Value {
    json!({ "pointsPerInvite": 25, "bonusAtMilestones": [5, 10, 25, 50], "specialBadges": true })
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub vertical: String,
    pub challenge_type: String,
    pub rules: String,
    pub instructions: String,
    pub duration: i64,
    pub max_participants: i64,
    pub current_participants: i64,
    pub challenge_data: Json<Value>,
    pub scoring: Json<Value>,
    pub rewards: Json<Value>,
    pub badges: Json<Value>,
    pub sharing_rewards: Json<Value>,
    pub invite_rewards: Json<Value>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub total_shares: i64,
    pub viral_factor: f64,
    pub created_at: DateTime<Utc>,
}

impl Challenge {
    pub fn kind(&self) -> ChallengeType {
        ChallengeType::parse(&self.challenge_type)
    }

    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now >= self.start_date && now <= self.end_date
    }

    pub fn is_full(&self) -> bool {
        self.max_participants > 0 && self.current_participants >= self.max_participants
    }

    /// Heuristic reach estimate, capped at 1.0
    pub fn expected_viral_factor(&self) -> f64 {
        let mut factor = 0.5 + self.kind().viral_weight();

        if self.rewards.0.as_array().is_some_and(|r| !r.is_empty()) {
            factor += 0.2;
        }
        if number(&self.sharing_rewards.0, "points") > 0.0 {
            factor += 0.1;
        }
        if number(&self.invite_rewards.0, "pointsPerInvite") > 0.0 {
            factor += 0.1;
        }

        factor.min(1.0)
    }

    fn share_points(&self) -> i64 {
        match self.sharing_rewards.0.get("points").and_then(Value::as_i64) {
            Some(points) if points > 0 => points,
            _ => DEFAULT_SHARE_POINTS,
        }
    }

    fn social_assets(&self) -> Value {
        json!({
            "twitter": {
                "text": format!("🎯 Join the {} challenge! {}", self.title, self.description),
                "hashtags": ["challenge", self.vertical, "viral"],
                "url": format!("/challenges/{}", self.id),
            },
            "facebook": {
                "title": self.title,
                "description": self.description,
                "image": format!("/api/challenges/{}/image", self.id),
            },
            "instagram": {
                "caption": format!("🎯 {}\n\n{}\n\nJoin now!", self.title, self.description),
                "hashtags": ["#challenge", format!("#{}", self.vertical), "#viral"],
            },
        })
    }

    fn share_content(&self, base_url: &str, referral: &str, platform: &str) -> Value {
        let url = format!("{}/challenges/{}?ref={}", base_url, self.id, referral);
        match platform {
            "facebook" => json!({
                "title": format!("Join me in the {} challenge!", self.title),
                "description": "I'm participating in this amazing challenge. Can you beat my score?",
                "url": url,
            }),
            "instagram" => json!({
                "caption": format!(
                    "🎯 Challenging myself with {}! Who's brave enough to join? Link in bio! 💪 #challenge #{}",
                    self.title, self.vertical
                ),
                "url": url,
            }),
            _ => json!({
                "text": format!(
                    "🎯 I'm crushing the {} challenge! Join me and let's see who wins! 💪",
                    self.title
                ),
                "url": url,
                "hashtags": ["challenge", self.vertical, "compete"],
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: i64,
    pub challenge_id: i64,
    pub user_id: String,
    pub user_name: String,
    pub user_email: Option<String>,
    pub invited_by: Option<String>,
    pub referral_code: String,
    pub progress: Json<Value>,
    pub score: i64,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub completion_data: Option<Json<Value>>,
    pub rank: Option<i64>,
    pub badges_earned: Json<Vec<String>>,
    pub shares_count: i64,
    pub invites_count: i64,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChallenge {
    pub title: String,
    pub description: String,
    pub vertical: String,
    pub challenge_type: ChallengeType,
    #[serde(default)]
    pub rules: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub max_participants: Option<i64>,
    #[serde(default)]
    pub challenge_data: Option<Value>,
    #[serde(default)]
    pub scoring: Option<Value>,
    #[serde(default)]
    pub rewards: Option<Value>,
    #[serde(default)]
    pub badges: Option<Value>,
    #[serde(default)]
    pub sharing_rewards: Option<Value>,
    #[serde(default)]
    pub invite_rewards: Option<Value>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub invited_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedChallenge {
    pub challenge: Challenge,
    pub challenge_url: String,
    pub social_assets: Value,
    pub expected_viral_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStatus {
    Joined,
    AlreadyJoined,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOutcome {
    pub status: JoinStatus,
    pub participant: Participant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<Challenge>,
    pub next_steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressOutcome {
    pub participant: Participant,
    pub earned_badges: Vec<String>,
    pub leaderboard_position: i64,
    pub next_steps: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SharingReward {
    pub points: i64,
    pub platform: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareOutcome {
    pub share_content: Value,
    pub sharing_reward: SharingReward,
    pub viral_bonus: i64,
    pub share_url: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: Option<i64>,
    pub user_id: String,
    pub user_name: String,
    pub score: i64,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub badges_earned: Json<Vec<String>>,
    pub shares_count: i64,
    pub invites_count: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardStats {
    pub total_participants: i64,
    pub completed_count: i64,
    pub avg_score: f64,
    pub total_shares: i64,
    pub total_invites: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeLeaderboard {
    pub leaderboard: Vec<LeaderboardEntry>,
    pub stats: LeaderboardStats,
    pub last_updated: DateTime<Utc>,
}

// ============================================================================
// Progress, scoring and completion
// ============================================================================

fn number(value: &Value, key: &str) -> f64 {
    value.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn max_field(current: &Value, update: &Value, key: &str) -> Value {
    let a = current.get(key).and_then(Value::as_u64).unwrap_or(0);
    let b = update.get(key).and_then(Value::as_u64).unwrap_or(0);
    json!(a.max(b))
}

/// Take `key` from the update when it is present and truthy, else keep the current value
fn prefer_update(current: &Value, update: &Value, key: &str) -> Value {
    match update.get(key) {
        Some(v) if v.as_f64().is_some_and(|n| n != 0.0) => v.clone(),
        _ => current.get(key).cloned().unwrap_or(json!(0)),
    }
}

/// Merge a progress report into the stored progress
///
/// Quiz counters only move forward; checklist items accumulate without
/// duplicates; other types take the reported fields as-is.
pub fn merge_progress(kind: ChallengeType, current: &Value, update: &Value) -> Value {
    let mut merged = match current {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };

    match kind {
        ChallengeType::Quiz => {
            merged.insert("questionsAnswered".into(), max_field(current, update, "questionsAnswered"));
            merged.insert("correctAnswers".into(), max_field(current, update, "correctAnswers"));
            merged.insert("currentQuestion".into(), prefer_update(current, update, "currentQuestion"));
            if let Some(bonus) = update.get("timeBonus") {
                merged.insert("timeBonus".into(), bonus.clone());
            }
        }
        ChallengeType::Checklist => {
            let mut items: Vec<Value> = current
                .get("itemsCompleted")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for item in update.get("itemsCompleted").and_then(Value::as_array).into_iter().flatten() {
                if !items.contains(item) {
                    items.push(item.clone());
                }
            }
            merged.insert("itemsCompleted".into(), Value::Array(items));
            merged.insert("completionRate".into(), prefer_update(current, update, "completionRate"));
        }
        _ => {
            if let Value::Object(fields) = update {
                for (k, v) in fields {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
    }

    Value::Object(merged)
}

pub fn calculate_score(kind: ChallengeType, progress: &Value, scoring: &Value) -> i64 {
    let score = match kind {
        ChallengeType::Quiz => {
            number(progress, "correctAnswers") * number(scoring, "correctAnswer")
                + number(progress, "timeBonus") * number(scoring, "timeBonus")
        }
        ChallengeType::Checklist => {
            let items = progress
                .get("itemsCompleted")
                .and_then(Value::as_array)
                .map_or(0, Vec::len) as f64;
            let all_done = if number(progress, "completionRate") == 1.0 {
                number(scoring, "allCompleted")
            } else {
                0.0
            };
            items * number(scoring, "itemCompleted") + all_done
        }
        _ => number(progress, "score"),
    };
    score.round() as i64
}

pub fn is_complete(kind: ChallengeType, progress: &Value, challenge_data: &Value) -> bool {
    match kind {
        ChallengeType::Quiz => {
            let total = challenge_data
                .get("totalQuestions")
                .and_then(Value::as_u64)
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_TOTAL_QUESTIONS);
            progress.get("questionsAnswered").and_then(Value::as_u64).unwrap_or(0) >= total
        }
        ChallengeType::Checklist => number(progress, "completionRate") >= 1.0,
        ChallengeType::Photo | ChallengeType::Video => {
            progress.get("submitted").and_then(Value::as_bool).unwrap_or(false)
        }
        ChallengeType::Score => false,
    }
}

/// Badge names whose condition the participant now meets
///
/// Only conditions that can be read off progress and score are evaluated;
/// time-based ones (`completed_fast`, `completed_early`) and engagement
/// thresholds are left for manual award.
fn earned_badges(badges: &Value, progress: &Value, score: i64, completed: bool) -> Vec<String> {
    let Some(list) = badges.as_array() else {
        return Vec::new();
    };

    list.iter()
        .filter_map(|badge| {
            let name = badge.get("name")?.as_str()?;
            let condition = badge.get("condition")?.as_str()?;
            let met = match condition {
                "score >= 100" => score >= 100,
                "all_correct" => {
                    completed && number(progress, "correctAnswers") == number(progress, "questionsAnswered")
                }
                "all_items_done" => completed,
                "photo_submitted" | "video_submitted" => {
                    progress.get("submitted").and_then(Value::as_bool).unwrap_or(false)
                }
                _ => false,
            };
            met.then(|| name.to_string())
        })
        .collect()
}

pub fn viral_bonus(shares: i64) -> i64 {
    (shares / 5) * 10
}

/// Recompute `rank` for every participant of a challenge
///
/// Higher score ranks first; ties go to whoever completed earlier, then to
/// whoever joined first.
async fn rerank(conn: &mut SqliteConnection, challenge_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE challenge_participants
        SET rank = ranked.new_rank
        FROM (
            SELECT id,
                   ROW_NUMBER() OVER (
                       ORDER BY score DESC, completed_at IS NULL, completed_at ASC, id ASC
                   ) AS new_rank
            FROM challenge_participants
            WHERE challenge_id = ?
        ) AS ranked
        WHERE challenge_participants.id = ranked.id
        "#,
    )
    .bind(challenge_id)
    .execute(conn)
    .await?;
    Ok(())
}

async fn find_challenge(conn: &mut SqliteConnection, id: i64) -> Result<Challenge> {
    sqlx::query_as::<_, Challenge>("SELECT * FROM viral_challenges WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("challenge {}", id)))
}

async fn find_participant(conn: &mut SqliteConnection, challenge_id: i64, user_id: &str) -> Result<Option<Participant>> {
    let participant = sqlx::query_as::<_, Participant>(
        "SELECT * FROM challenge_participants WHERE challenge_id = ? AND user_id = ?",
    )
    .bind(challenge_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    Ok(participant)
}

// ============================================================================
// Engine
// ============================================================================

pub struct ChallengeEngine {
    db: SqlitePool,
    events: EventBus,
    base_url: String,
    metrics: EngineMetrics,
}

impl ChallengeEngine {
    pub fn new(db: SqlitePool, events: EventBus, base_url: impl Into<String>) -> Self {
        Self {
            db,
            events,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            metrics: EngineMetrics::new(),
        }
    }

    pub async fn create_challenge(&self, new: NewChallenge) -> Result<CreatedChallenge> {
        if new.title.trim().is_empty() {
            return Err(Error::InvalidInput("title is required".to_string()));
        }
        if new.end_date <= new.start_date {
            return Err(Error::InvalidInput("endDate must be after startDate".to_string()));
        }

        let kind = new.challenge_type;
        let result = sqlx::query(
            r#"
            INSERT INTO viral_challenges
                (title, description, vertical, challenge_type, rules, instructions, duration,
                 max_participants, challenge_data, scoring, rewards, badges, sharing_rewards,
                 invite_rewards, start_date, end_date, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.vertical)
        .bind(kind.as_str())
        .bind(&new.rules)
        .bind(&new.instructions)
        .bind(new.duration.unwrap_or(DEFAULT_DURATION_DAYS))
        .bind(new.max_participants.unwrap_or(0).max(0))
        .bind(Json(new.challenge_data.unwrap_or_else(|| json!({}))))
        .bind(Json(new.scoring.unwrap_or_else(|| kind.default_scoring())))
        .bind(Json(new.rewards.unwrap_or_else(|| json!([]))))
        .bind(Json(new.badges.unwrap_or_else(|| kind.default_badges())))
        .bind(Json(new.sharing_rewards.unwrap_or_else(default_sharing_rewards)))
        .bind(Json(new.invite_rewards.unwrap_or_else(default_invite_rewards)))
        .bind(new.start_date)
        .bind(new.end_date)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        let challenge = self.get_challenge(result.last_insert_rowid()).await?;

        self.metrics.incr("challenges_created");
        self.events
            .emit_lossy(EmpireEvent::content_created(ENGINE_NAME, "challenge", challenge.id));
        info!("Created viral challenge {}: {}", challenge.id, challenge.title);

        Ok(CreatedChallenge {
            challenge_url: format!("/challenges/{}", challenge.id),
            social_assets: challenge.social_assets(),
            expected_viral_factor: challenge.expected_viral_factor(),
            challenge,
        })
    }

    pub async fn get_challenge(&self, id: i64) -> Result<Challenge> {
        let mut conn = self.db.acquire().await?;
        find_challenge(&mut conn, id).await
    }

    /// Join a challenge; joining twice returns the existing participant
    pub async fn join_challenge(&self, challenge_id: i64, request: JoinRequest) -> Result<JoinOutcome> {
        if request.user_id.trim().is_empty() {
            return Err(Error::InvalidInput("userId is required".to_string()));
        }

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let challenge = find_challenge(&mut tx, challenge_id).await?;
        if !challenge.is_open_at(now) {
            return Err(Error::Conflict(format!("challenge {} is not currently active", challenge_id)));
        }

        if let Some(existing) = find_participant(&mut tx, challenge_id, &request.user_id).await? {
            let next_steps = challenge.kind().next_steps(&existing.progress.0);
            return Ok(JoinOutcome {
                status: JoinStatus::AlreadyJoined,
                participant: existing,
                challenge: None,
                next_steps,
            });
        }

        if challenge.is_full() {
            return Err(Error::Conflict(format!(
                "challenge {} has reached maximum participants",
                challenge_id
            )));
        }

        let kind = challenge.kind();
        let code = referral_code(&request.user_id, challenge_id, &now.to_rfc3339());

        let result = sqlx::query(
            r#"
            INSERT INTO challenge_participants
                (challenge_id, user_id, user_name, user_email, invited_by, referral_code, progress, joined_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(challenge_id)
        .bind(&request.user_id)
        .bind(&request.user_name)
        .bind(&request.user_email)
        .bind(&request.invited_by)
        .bind(&code)
        .bind(Json(kind.initial_progress()))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            Error::from_unique_violation(e, format!("{} already joined challenge {}", request.user_id, challenge_id))
        })?;
        let participant_id = result.last_insert_rowid();

        sqlx::query("UPDATE viral_challenges SET current_participants = current_participants + 1 WHERE id = ?")
            .bind(challenge_id)
            .execute(&mut *tx)
            .await?;

        if let Some(inviter) = &request.invited_by {
            let credited = sqlx::query(
                "UPDATE challenge_participants SET invites_count = invites_count + 1 WHERE challenge_id = ? AND user_id = ?",
            )
            .bind(challenge_id)
            .bind(inviter)
            .execute(&mut *tx)
            .await?;
            if credited.rows_affected() == 0 {
                debug!("Inviter {} is not part of challenge {}", inviter, challenge_id);
            }
        }

        rerank(&mut tx, challenge_id).await?;

        let participant = sqlx::query_as::<_, Participant>("SELECT * FROM challenge_participants WHERE id = ?")
            .bind(participant_id)
            .fetch_one(&mut *tx)
            .await?;
        let challenge = find_challenge(&mut tx, challenge_id).await?;

        tx.commit().await?;

        self.metrics.incr("participants_joined");
        info!("User {} joined challenge {}", request.user_id, challenge_id);

        Ok(JoinOutcome {
            status: JoinStatus::Joined,
            next_steps: kind.next_steps(&participant.progress.0),
            participant,
            challenge: Some(challenge),
        })
    }

    pub async fn update_progress(&self, challenge_id: i64, user_id: &str, update: Value) -> Result<ProgressOutcome> {
        let mut tx = self.db.begin().await?;

        let challenge = find_challenge(&mut tx, challenge_id).await?;
        let participant = find_participant(&mut tx, challenge_id, user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("participant {} in challenge {}", user_id, challenge_id)))?;

        let kind = challenge.kind();
        let progress = merge_progress(kind, &participant.progress.0, &update);
        let score = calculate_score(kind, &progress, &challenge.scoring.0);
        let completed = is_complete(kind, &progress, &challenge.challenge_data.0);

        let newly_completed = completed && !participant.is_completed;
        let completed_at = if completed {
            participant.completed_at.or_else(|| Some(Utc::now()))
        } else {
            None
        };
        let completion_data = if newly_completed {
            Some(Json(update))
        } else {
            participant.completion_data.clone()
        };

        let mut badges = participant.badges_earned.0.clone();
        let new_badges: Vec<String> = earned_badges(&challenge.badges.0, &progress, score, completed)
            .into_iter()
            .filter(|b| !badges.contains(b))
            .collect();
        badges.extend(new_badges.iter().cloned());

        sqlx::query(
            r#"
            UPDATE challenge_participants
            SET progress = ?, score = ?, is_completed = ?, completed_at = ?,
                completion_data = ?, badges_earned = ?
            WHERE id = ?
            "#,
        )
        .bind(Json(&progress))
        .bind(score)
        .bind(completed)
        .bind(completed_at)
        .bind(completion_data)
        .bind(Json(&badges))
        .bind(participant.id)
        .execute(&mut *tx)
        .await?;

        rerank(&mut tx, challenge_id).await?;

        let updated = sqlx::query_as::<_, Participant>("SELECT * FROM challenge_participants WHERE id = ?")
            .bind(participant.id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        if newly_completed {
            self.metrics.incr("challenges_completed");
            info!("User {} completed challenge {}", user_id, challenge_id);
        }

        Ok(ProgressOutcome {
            leaderboard_position: updated.rank.unwrap_or(0),
            next_steps: (!completed).then(|| kind.next_steps(&progress)),
            earned_badges: new_badges,
            participant: updated,
        })
    }

    pub async fn share_challenge(&self, challenge_id: i64, user_id: &str, platform: &str) -> Result<ShareOutcome> {
        let mut tx = self.db.begin().await?;

        let challenge = find_challenge(&mut tx, challenge_id).await?;
        let participant = find_participant(&mut tx, challenge_id, user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("participant {} in challenge {}", user_id, challenge_id)))?;

        let points = challenge.share_points();

        sqlx::query(
            "UPDATE challenge_participants SET shares_count = shares_count + 1, score = score + ? WHERE id = ?",
        )
        .bind(points)
        .bind(participant.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE viral_challenges SET total_shares = total_shares + 1, viral_factor = viral_factor + ? WHERE id = ?",
        )
        .bind(VIRAL_FACTOR_PER_SHARE)
        .bind(challenge_id)
        .execute(&mut *tx)
        .await?;

        rerank(&mut tx, challenge_id).await?;
        tx.commit().await?;

        self.metrics.incr("challenges_shared");

        let shares = participant.shares_count + 1;
        let share_content = challenge.share_content(&self.base_url, &participant.referral_code, platform);
        let share_url = share_content
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default();

        Ok(ShareOutcome {
            share_content,
            sharing_reward: SharingReward {
                points,
                platform: platform.to_string(),
                message: format!("+{} points for sharing on {}!", points, platform),
            },
            viral_bonus: viral_bonus(shares),
            share_url,
        })
    }

    pub async fn leaderboard(&self, challenge_id: i64, limit: Option<i64>) -> Result<ChallengeLeaderboard> {
        let mut conn = self.db.acquire().await?;
        find_challenge(&mut conn, challenge_id).await?;

        let limit = limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LEADERBOARD_LIMIT);
        let leaderboard = sqlx::query_as::<_, LeaderboardEntry>(
            r#"
            SELECT rank, user_id, user_name, score, is_completed, completed_at,
                   badges_earned, shares_count, invites_count
            FROM challenge_participants
            WHERE challenge_id = ?
            ORDER BY score DESC, completed_at IS NULL, completed_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(challenge_id)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        let stats = sqlx::query_as::<_, LeaderboardStats>(
            r#"
            SELECT COUNT(*) AS total_participants,
                   COALESCE(SUM(CASE WHEN is_completed THEN 1 ELSE 0 END), 0) AS completed_count,
                   COALESCE(AVG(score), 0.0) AS avg_score,
                   COALESCE(SUM(shares_count), 0) AS total_shares,
                   COALESCE(SUM(invites_count), 0) AS total_invites
            FROM challenge_participants
            WHERE challenge_id = ?
            "#,
        )
        .bind(challenge_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(ChallengeLeaderboard {
            leaderboard,
            stats,
            last_updated: Utc::now(),
        })
    }

    /// Deactivate challenges whose end date has passed
    pub async fn run_monitor_cycle(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE viral_challenges SET is_active = 0 WHERE is_active = 1 AND end_date < ?")
            .bind(Utc::now())
            .execute(&self.db)
            .await?;

        let ended = result.rows_affected();
        if ended > 0 {
            info!("Ended {} expired challenges", ended);
        }
        Ok(ended)
    }

    /// Re-rank every active challenge
    pub async fn run_leaderboard_cycle(&self) -> Result<usize> {
        let active: Vec<i64> = sqlx::query_scalar("SELECT id FROM viral_challenges WHERE is_active = 1")
            .fetch_all(&self.db)
            .await?;

        let mut conn = self.db.acquire().await?;
        for id in &active {
            rerank(&mut conn, *id).await?;
        }
        Ok(active.len())
    }
}

#[async_trait::async_trait]
impl Engine for ChallengeEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn required_tables(&self) -> &'static [&'static str] {
        REQUIRED_TABLES
    }

    fn jobs(self: Arc<Self>) -> Vec<PeriodicJob> {
        let monitor = Arc::clone(&self);
        let leaderboards = self;

        vec![
            PeriodicJob::new("challenges.monitor", Duration::from_secs(5 * 60), move || {
                let engine = Arc::clone(&monitor);
                async move { engine.run_monitor_cycle().await.map(|_| ()) }
            }),
            PeriodicJob::new("challenges.leaderboards", Duration::from_secs(60), move || {
                let engine = Arc::clone(&leaderboards);
                async move { engine.run_leaderboard_cycle().await.map(|_| ()) }
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
    use chrono::Duration as ChronoDuration;
    use empire_common::db::{connect, SchemaSync};

    async fn engine() -> ChallengeEngine {
        let pool = connect("sqlite::memory:").await.unwrap();
        SchemaSync::ensure_all(&pool, &tables()).await.unwrap();
        ChallengeEngine::new(pool, EventBus::new(16), "https://empire.test/")
    }

    fn new_challenge(kind: ChallengeType) -> NewChallenge {
        let now = Utc::now();
        NewChallenge {
            title: "Budget Sprint".to_string(),
            description: "Track every expense for a week".to_string(),
            vertical: "finance".to_string(),
            challenge_type: kind,
            rules: String::new(),
            instructions: String::new(),
            duration: None,
            max_participants: None,
            challenge_data: Some(json!({ "totalQuestions": 3 })),
            scoring: None,
            rewards: None,
            badges: None,
            sharing_rewards: None,
            invite_rewards: None,
            start_date: now - ChronoDuration::hours(1),
            end_date: now + ChronoDuration::days(7),
        }
    }

    fn join(user: &str) -> JoinRequest {
        JoinRequest {
            user_id: user.to_string(),
            user_name: user.to_uppercase(),
            user_email: None,
            invited_by: None,
        }
    }

    #[test]
    fn test_quiz_merge_only_moves_forward() {
        let current = json!({ "questionsAnswered": 5, "correctAnswers": 4, "currentQuestion": 5 });
        let merged = merge_progress(
            ChallengeType::Quiz,
            &current,
            &json!({ "questionsAnswered": 3, "correctAnswers": 6, "currentQuestion": 0 }),
        );
        assert_eq!(merged["questionsAnswered"], 5);
        assert_eq!(merged["correctAnswers"], 6);
        assert_eq!(merged["currentQuestion"], 5);
    }

    #[test]
    fn test_checklist_merge_dedups_items() {
        let current = json!({ "itemsCompleted": ["a", "b"], "totalItems": 4, "completionRate": 0.5 });
        let merged = merge_progress(
            ChallengeType::Checklist,
            &current,
            &json!({ "itemsCompleted": ["b", "c"] }),
        );
        assert_eq!(merged["itemsCompleted"], json!(["a", "b", "c"]));
        assert_eq!(merged["completionRate"], 0.5);
        assert_eq!(merged["totalItems"], 4);
    }

    #[test]
    fn test_scores() {
        let quiz = ChallengeType::Quiz;
        let scoring = quiz.default_scoring();
        assert_eq!(calculate_score(quiz, &json!({ "correctAnswers": 3 }), &scoring), 30);
        assert_eq!(
            calculate_score(quiz, &json!({ "correctAnswers": 3, "timeBonus": 2 }), &scoring),
            40
        );

        let checklist = ChallengeType::Checklist;
        let progress = json!({ "itemsCompleted": [1, 2, 3, 4], "completionRate": 1 });
        assert_eq!(
            calculate_score(checklist, &progress, &checklist.default_scoring()),
            4 * 15 + 50
        );

        assert_eq!(calculate_score(ChallengeType::Photo, &json!({ "score": 12 }), &json!({})), 12);
    }

    #[test]
    fn test_completion_rules() {
        let data = json!({ "totalQuestions": 3 });
        assert!(is_complete(ChallengeType::Quiz, &json!({ "questionsAnswered": 3 }), &data));
        assert!(!is_complete(ChallengeType::Quiz, &json!({ "questionsAnswered": 3 }), &json!({})));
        assert!(is_complete(ChallengeType::Video, &json!({ "submitted": true }), &json!({})));
        assert!(!is_complete(ChallengeType::Score, &json!({ "score": 1000 }), &json!({})));
    }

    #[test]
    fn test_viral_bonus() {
        assert_eq!(viral_bonus(4), 0);
        assert_eq!(viral_bonus(5), 10);
        assert_eq!(viral_bonus(12), 20);
    }

    #[tokio::test]
    async fn test_create_challenge_defaults() {
        let engine = engine().await;
        let created = engine.create_challenge(new_challenge(ChallengeType::Video)).await.unwrap();

        assert_eq!(created.challenge_url, format!("/challenges/{}", created.challenge.id));
        assert_eq!(created.challenge.scoring.0["submission"], 50);
        assert_eq!(created.challenge.sharing_rewards.0["points"], 10);
        // 0.5 + 0.8 + share + invite rewards, capped
        assert_eq!(created.expected_viral_factor, 1.0);
        assert_eq!(created.social_assets["twitter"]["hashtags"][1], "finance");
    }

    #[tokio::test]
    async fn test_create_challenge_rejects_bad_window() {
        let engine = engine().await;
        let mut new = new_challenge(ChallengeType::Quiz);
        new.end_date = new.start_date;
        assert!(matches!(engine.create_challenge(new).await, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_join_twice_and_invites() {
        let engine = engine().await;
        let id = engine.create_challenge(new_challenge(ChallengeType::Quiz)).await.unwrap().challenge.id;

        let first = engine.join_challenge(id, join("ann")).await.unwrap();
        assert_eq!(first.status, JoinStatus::Joined);
        assert_eq!(first.participant.referral_code.len(), 8);
        assert_eq!(first.next_steps[0], "Answer question 1");

        let again = engine.join_challenge(id, join("ann")).await.unwrap();
        assert_eq!(again.status, JoinStatus::AlreadyJoined);
        assert_eq!(again.participant.id, first.participant.id);

        let mut invited = join("ben");
        invited.invited_by = Some("ann".to_string());
        engine.join_challenge(id, invited).await.unwrap();

        let challenge = engine.get_challenge(id).await.unwrap();
        assert_eq!(challenge.current_participants, 2);
        let board = engine.leaderboard(id, None).await.unwrap();
        assert_eq!(board.stats.total_invites, 1);
    }

    #[tokio::test]
    async fn test_join_closed_or_full_challenge() {
        let engine = engine().await;

        let mut future = new_challenge(ChallengeType::Quiz);
        future.start_date = Utc::now() + ChronoDuration::days(1);
        future.end_date = Utc::now() + ChronoDuration::days(2);
        let id = engine.create_challenge(future).await.unwrap().challenge.id;
        assert!(matches!(engine.join_challenge(id, join("ann")).await, Err(Error::Conflict(_))));

        let mut small = new_challenge(ChallengeType::Quiz);
        small.max_participants = Some(1);
        let id = engine.create_challenge(small).await.unwrap().challenge.id;
        engine.join_challenge(id, join("ann")).await.unwrap();
        assert!(matches!(engine.join_challenge(id, join("ben")).await, Err(Error::Conflict(_))));

        assert!(matches!(engine.join_challenge(999, join("ann")).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_progress_completion_and_ranking() {
        let engine = engine().await;
        let id = engine.create_challenge(new_challenge(ChallengeType::Quiz)).await.unwrap().challenge.id;
        engine.join_challenge(id, join("ann")).await.unwrap();
        engine.join_challenge(id, join("ben")).await.unwrap();

        let ann = engine
            .update_progress(id, "ann", json!({ "questionsAnswered": 2, "correctAnswers": 2 }))
            .await
            .unwrap();
        assert_eq!(ann.participant.score, 20);
        assert!(!ann.participant.is_completed);
        assert_eq!(ann.leaderboard_position, 1);
        assert!(ann.next_steps.is_some());

        let ben = engine
            .update_progress(id, "ben", json!({ "questionsAnswered": 3, "correctAnswers": 3 }))
            .await
            .unwrap();
        assert!(ben.participant.is_completed);
        assert!(ben.participant.completed_at.is_some());
        assert_eq!(ben.earned_badges, vec!["Perfect Score".to_string()]);
        assert_eq!(ben.leaderboard_position, 1);
        assert!(ben.next_steps.is_none());

        let board = engine.leaderboard(id, Some(10)).await.unwrap();
        assert_eq!(board.leaderboard[0].user_id, "ben");
        assert_eq!(board.leaderboard[1].rank, Some(2));
        assert_eq!(board.stats.completed_count, 1);

        assert!(matches!(
            engine.update_progress(id, "zed", json!({})).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_share_rewards_and_url() {
        let engine = engine().await;
        let id = engine.create_challenge(new_challenge(ChallengeType::Photo)).await.unwrap().challenge.id;
        let joined = engine.join_challenge(id, join("ann")).await.unwrap();
        let code = joined.participant.referral_code;

        let mut last = None;
        for _ in 0..5 {
            last = Some(engine.share_challenge(id, "ann", "facebook").await.unwrap());
        }
        let outcome = last.unwrap();

        assert_eq!(outcome.share_url, format!("https://empire.test/challenges/{}?ref={}", id, code));
        assert_eq!(outcome.sharing_reward.points, 10);
        assert_eq!(outcome.viral_bonus, 10);

        let challenge = engine.get_challenge(id).await.unwrap();
        assert_eq!(challenge.total_shares, 5);
        assert!((challenge.viral_factor - 0.05).abs() < 1e-9);

        let board = engine.leaderboard(id, None).await.unwrap();
        assert_eq!(board.leaderboard[0].score, 50);
    }

    #[tokio::test]
    async fn test_monitor_ends_expired() {
        let engine = engine().await;
        let mut expired = new_challenge(ChallengeType::Checklist);
        expired.start_date = Utc::now() - ChronoDuration::days(3);
        expired.end_date = Utc::now() - ChronoDuration::days(1);
        let id = engine.create_challenge(expired).await.unwrap().challenge.id;
        engine.create_challenge(new_challenge(ChallengeType::Quiz)).await.unwrap();

        assert_eq!(engine.run_monitor_cycle().await.unwrap(), 1);
        assert!(!engine.get_challenge(id).await.unwrap().is_active);
        assert_eq!(engine.run_leaderboard_cycle().await.unwrap(), 1);
    }
}
