//! Newsletter editions and subscribers
//!
//! Editions move through `draft -> scheduled -> sending -> sent` (or
//! straight from `draft` to `sending`). Every status change is a
//! compare-and-set on the current status, so two dispatchers cannot both
//! send the same edition. A send that reaches no recipient, or fails before
//! the edition is marked `sent`, hands the edition back to its previous
//! status so it can be sent again.

use crate::mailer::{Mailer, OutgoingEmail};
use chrono::{DateTime, Utc};
use empire_common::db::{ColumnDefinition, TableDefinition};
use empire_common::engine::{Engine, EngineMetrics, PeriodicJob};
use empire_common::events::{EmpireEvent, EventBus};
use empire_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::types::Json;
use sqlx::SqlitePool;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const ENGINE_NAME: &str = "newsletter";

const REQUIRED_TABLES: &[&str] = &["newsletter_editions", "newsletter_subscribers"];

const TREND_SOURCES: &[&str] = &["google_news", "reddit", "twitter"];

pub fn tables() -> Vec<TableDefinition> {
    vec![
        TableDefinition::new("newsletter_editions")
            .column(ColumnDefinition::id())
            .column(ColumnDefinition::new("title", "TEXT").not_null())
            .column(ColumnDefinition::new("vertical", "TEXT").not_null())
            .column(ColumnDefinition::new("edition_type", "TEXT").not_null())
            .column(ColumnDefinition::new("subject", "TEXT").not_null())
            .column(ColumnDefinition::new("preheader", "TEXT").not_null())
            .column(ColumnDefinition::new("content", "TEXT").not_null())
            .column(ColumnDefinition::new("content_summary", "TEXT").not_null())
            .column(ColumnDefinition::new("trending_sources", "TEXT").not_null().default("'[]'"))
            .column(ColumnDefinition::new("ai_generated_sections", "TEXT").not_null().default("'[]'"))
            .column(ColumnDefinition::new("embedded_offers", "TEXT").not_null().default("'[]'"))
            .column(ColumnDefinition::new("cta", "TEXT").not_null().default("'{}'"))
            .column(ColumnDefinition::new("status", "TEXT").not_null().default("'draft'"))
            .column(ColumnDefinition::new("scheduled_for", "TIMESTAMP"))
            .column(ColumnDefinition::new("sent_at", "TIMESTAMP"))
            .column(ColumnDefinition::new("recipient_count", "INTEGER").not_null().default("0"))
            .column(ColumnDefinition::new("open_rate", "REAL").not_null().default("0"))
            .column(ColumnDefinition::new("click_rate", "REAL").not_null().default("0"))
            .column(ColumnDefinition::new("conversion_rate", "REAL").not_null().default("0"))
            .column(ColumnDefinition::new("revenue", "REAL").not_null().default("0"))
            .column(ColumnDefinition::new("created_at", "TIMESTAMP").not_null()),
        TableDefinition::new("newsletter_subscribers")
            .column(ColumnDefinition::id())
            .column(ColumnDefinition::new("email", "TEXT").not_null().unique())
            .column(ColumnDefinition::new("first_name", "TEXT"))
            .column(ColumnDefinition::new("last_name", "TEXT"))
            .column(ColumnDefinition::new("vertical", "TEXT"))
            .column(ColumnDefinition::new("subscription_source", "TEXT"))
            .column(ColumnDefinition::new("lead_magnet", "TEXT"))
            .column(ColumnDefinition::new("preferences", "TEXT").not_null().default("'{}'"))
            .column(ColumnDefinition::new("segments", "TEXT").not_null().default("'[]'"))
            .column(ColumnDefinition::new("is_active", "BOOLEAN").not_null().default("1"))
            .column(ColumnDefinition::new("engagement_score", "REAL").not_null().default("0"))
            .column(ColumnDefinition::new("subscribed_at", "TIMESTAMP").not_null())
            .column(ColumnDefinition::new("unsubscribed_at", "TIMESTAMP")),
    ]
}

/// Edition lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditionStatus {
    Draft,
    Scheduled,
    Sending,
    Sent,
}

impl EditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditionStatus::Draft => "draft",
            EditionStatus::Scheduled => "scheduled",
            EditionStatus::Sending => "sending",
            EditionStatus::Sent => "sent",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "draft" => Ok(EditionStatus::Draft),
            "scheduled" => Ok(EditionStatus::Scheduled),
            "sending" => Ok(EditionStatus::Sending),
            "sent" => Ok(EditionStatus::Sent),
            other => Err(Error::Internal(format!("unknown edition status '{}'", other))),
        }
    }

    pub fn can_transition_to(&self, next: EditionStatus) -> bool {
        matches!(
            (self, next),
            (EditionStatus::Draft, EditionStatus::Scheduled)
                | (EditionStatus::Draft, EditionStatus::Sending)
                | (EditionStatus::Scheduled, EditionStatus::Sending)
                | (EditionStatus::Sending, EditionStatus::Sent)
        )
    }
}

impl fmt::Display for EditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditionType {
    Daily,
    #[default]
    Weekly,
    Special,
}

impl EditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditionType::Daily => "daily",
            EditionType::Weekly => "weekly",
            EditionType::Special => "special",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Edition {
    pub id: i64,
    pub title: String,
    pub vertical: String,
    pub edition_type: String,
    pub subject: String,
    pub preheader: String,
    pub content: String,
    pub content_summary: String,
    pub trending_sources: Json<Vec<String>>,
    pub ai_generated_sections: Json<Vec<Section>>,
    pub embedded_offers: Json<Value>,
    pub cta: Json<CallToAction>,
    pub status: String,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub recipient_count: i64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub conversion_rate: f64,
    pub revenue: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub id: i64,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub vertical: Option<String>,
    pub subscription_source: Option<String>,
    pub lead_magnet: Option<String>,
    pub preferences: Json<Value>,
    pub segments: Json<Vec<String>>,
    pub is_active: bool,
    pub engagement_score: f64,
    pub subscribed_at: DateTime<Utc>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub content: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToAction {
    pub text: String,
    pub url: String,
    pub button_color: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEdition {
    pub vertical: String,
    #[serde(default)]
    pub edition_type: EditionType,
    #[serde(default)]
    pub embedded_offers: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub vertical: Option<String>,
    #[serde(default)]
    pub lead_magnet: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub gdpr_consent: bool,
    #[serde(default)]
    pub preferences: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOptions {
    #[serde(default)]
    pub test_send: bool,
    #[serde(default)]
    pub test_emails: Vec<String>,
    /// Only subscribers carrying every listed segment
    #[serde(default)]
    pub segments: Vec<String>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendingRecommendation {
    pub day: &'static str,
    pub time: &'static str,
    pub timezone: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedEdition {
    pub edition: Edition,
    pub preview_url: String,
    pub sending_recommendations: SendingRecommendation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscribeStatus {
    Subscribed,
    Resubscribed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeOutcome {
    pub subscriber: Subscriber,
    pub status: SubscribeStatus,
    pub welcome_email_sent: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub sent: u32,
    pub successful: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SendOutcome {
    #[serde(rename_all = "camelCase")]
    Test {
        results: DeliveryReport,
        estimated_reach: usize,
    },
    #[serde(rename_all = "camelCase")]
    Scheduled {
        scheduled_for: DateTime<Utc>,
        estimated_reach: usize,
    },
    #[serde(rename_all = "camelCase")]
    Sent {
        recipient_count: usize,
        results: DeliveryReport,
    },
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EditionSummary {
    pub id: i64,
    pub title: String,
    pub vertical: String,
    pub status: String,
    pub recipient_count: i64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub conversion_rate: f64,
    pub revenue: f64,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberStats {
    pub total_subscribers: i64,
    pub active_subscribers: i64,
    pub avg_engagement: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    pub total_sent: i64,
    pub avg_open_rate: f64,
    pub avg_click_rate: f64,
    pub total_revenue: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsletterAnalytics {
    pub editions: Vec<EditionSummary>,
    pub subscriber_stats: SubscriberStats,
    pub performance: Performance,
}

// ============================================================================
// Content templates
// ============================================================================

pub fn sending_recommendation(vertical: &str) -> SendingRecommendation {
    let (day, time) = match vertical {
        "tech" => ("Tuesday", "10:00 AM"),
        "health" => ("Sunday", "7:00 PM"),
        "finance" => ("Monday", "8:00 AM"),
        _ => ("Wednesday", "9:00 AM"),
    };
    SendingRecommendation {
        day,
        time,
        timezone: "UTC",
    }
}

pub fn segments_for(vertical: Option<&str>, lead_magnet: Option<&str>, source: Option<&str>) -> Vec<String> {
    let mut segments = Vec::new();
    if let Some(v) = vertical {
        segments.push(format!("vertical_{}", v));
    }
    if let Some(m) = lead_magnet {
        segments.push(format!("lead_magnet_{}", m));
    }
    if let Some(s) = source {
        segments.push(format!("source_{}", s));
    }
    segments
}

fn trending_sections(vertical: &str) -> Vec<Section> {
    vec![
        Section {
            title: "Trending Now".to_string(),
            content: format!("Latest developments in {}...", vertical),
            source: "google_news".to_string(),
        },
        Section {
            title: "Community Insights".to_string(),
            content: format!("What the {} community is discussing...", vertical),
            source: "reddit".to_string(),
        },
        Section {
            title: "Expert Takes".to_string(),
            content: format!("Industry experts weigh in on {} trends...", vertical),
            source: "twitter".to_string(),
        },
    ]
}

fn render_html(title: &str, vertical: &str, sections: &[Section], cta: &CallToAction) -> String {
    let body: String = sections
        .iter()
        .map(|s| {
            format!(
                "<div class=\"section\"><h2>{}</h2><p>{}</p><small>Source: {}</small></div>\n",
                s.title, s.content, s.source
            )
        })
        .collect();

    format!(
        r#"<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{title}</title>
<style>
body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
.container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
.section {{ margin: 20px 0; padding: 15px; border-left: 3px solid #007bff; }}
.cta-button {{ display: inline-block; background: {color}; color: white; padding: 12px 24px; text-decoration: none; border-radius: 4px; }}
</style>
</head>
<body>
<div class="container">
<div class="header"><h1>{vertical} Weekly Digest</h1><p>Your source for the latest {vertical} insights</p></div>
{body}<div style="text-align: center; margin: 30px 0;"><a href="{url}" class="cta-button">{text}</a></div>
<div style="text-align: center; color: #666; font-size: 12px; margin-top: 40px;">
<p>You received this email because you subscribed to our {vertical} newsletter.</p>
<p><a href="{{{{unsubscribe_url}}}}">Unsubscribe</a></p>
</div>
</div>
</body>
</html>
"#,
        title = title,
        vertical = vertical,
        body = body,
        color = cta.button_color,
        url = cta.url,
        text = cta.text,
    )
}

fn has_segments(subscriber: &Subscriber, required: &[String]) -> bool {
    required.iter().all(|s| subscriber.segments.0.contains(s))
}

fn validate_email(email: &str) -> Result<()> {
    let trimmed = email.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(Error::InvalidInput(format!("invalid email address: {}", email))),
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct NewsletterEngine {
    db: SqlitePool,
    events: EventBus,
    mailer: Arc<dyn Mailer>,
    base_url: String,
    metrics: EngineMetrics,
}

impl NewsletterEngine {
    pub fn new(db: SqlitePool, events: EventBus, mailer: Arc<dyn Mailer>, base_url: impl Into<String>) -> Self {
        Self {
            db,
            events,
            mailer,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            metrics: EngineMetrics::new(),
        }
    }

    pub async fn create_edition(&self, new: NewEdition) -> Result<CreatedEdition> {
        let vertical = new.vertical.trim();
        if vertical.is_empty() {
            return Err(Error::InvalidInput("vertical is required".to_string()));
        }

        let now = Utc::now();
        let title = format!("{} Weekly Digest - {}", vertical, now.format("%Y-%m-%d"));
        let sections = trending_sections(vertical);
        let cta = CallToAction {
            text: format!("Explore {} Tools", vertical),
            url: format!("/tools/{}", vertical.to_lowercase()),
            button_color: "#007bff".to_string(),
        };
        let html = render_html(&title, vertical, &sections, &cta);
        let sources: Vec<&str> = TREND_SOURCES.to_vec();

        let result = sqlx::query(
            r#"
            INSERT INTO newsletter_editions
                (title, vertical, edition_type, subject, preheader, content, content_summary,
                 trending_sources, ai_generated_sections, embedded_offers, cta, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'draft', ?)
            "#,
        )
        .bind(&title)
        .bind(vertical)
        .bind(new.edition_type.as_str())
        .bind(format!("📈 This Week in {}: Top Trends & Insights", vertical))
        .bind(format!("Don't miss out on the latest {} developments...", vertical))
        .bind(&html)
        .bind(format!("Weekly roundup of trending topics in {}", vertical))
        .bind(Json(&sources))
        .bind(Json(&sections))
        .bind(Json(&new.embedded_offers))
        .bind(Json(&cta))
        .bind(now)
        .execute(&self.db)
        .await?;

        let edition = self.get_edition(result.last_insert_rowid()).await?;

        self.metrics.incr("editions_created");
        self.events
            .emit_lossy(EmpireEvent::content_created(ENGINE_NAME, "edition", edition.id));
        info!("Newsletter edition created: {}", edition.title);

        Ok(CreatedEdition {
            preview_url: format!("/newsletter/preview/{}", edition.id),
            sending_recommendations: sending_recommendation(vertical),
            edition,
        })
    }

    pub async fn get_edition(&self, id: i64) -> Result<Edition> {
        sqlx::query_as::<_, Edition>("SELECT * FROM newsletter_editions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| Error::NotFound(format!("newsletter edition {}", id)))
    }

    async fn get_subscriber(&self, email: &str) -> Result<Option<Subscriber>> {
        let subscriber = sqlx::query_as::<_, Subscriber>("SELECT * FROM newsletter_subscribers WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(subscriber)
    }

    /// Opt a reader in; a known address is reactivated and its profile merged
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<SubscribeOutcome> {
        if !request.gdpr_consent {
            return Err(Error::InvalidInput("GDPR consent is required for subscription".to_string()));
        }
        let email = request.email.trim().to_lowercase();
        validate_email(&email)?;

        let now = Utc::now();

        if let Some(existing) = self.get_subscriber(&email).await? {
            let vertical = request.vertical.or(existing.vertical);
            let lead_magnet = request.lead_magnet.or(existing.lead_magnet);
            let source = request.source.or(existing.subscription_source);
            let preferences = request.preferences.unwrap_or(existing.preferences.0);
            let segments = segments_for(vertical.as_deref(), lead_magnet.as_deref(), source.as_deref());

            sqlx::query(
                r#"
                UPDATE newsletter_subscribers
                SET is_active = 1, vertical = ?, lead_magnet = ?, subscription_source = ?,
                    preferences = ?, segments = ?, subscribed_at = ?, unsubscribed_at = NULL
                WHERE id = ?
                "#,
            )
            .bind(&vertical)
            .bind(&lead_magnet)
            .bind(&source)
            .bind(Json(&preferences))
            .bind(Json(&segments))
            .bind(now)
            .bind(existing.id)
            .execute(&self.db)
            .await?;

            let subscriber = self
                .get_subscriber(&email)
                .await?
                .ok_or_else(|| Error::NotFound(format!("subscriber {}", email)))?;
            info!("Resubscribed {}", email);

            return Ok(SubscribeOutcome {
                subscriber,
                status: SubscribeStatus::Resubscribed,
                welcome_email_sent: false,
            });
        }

        let segments = segments_for(
            request.vertical.as_deref(),
            request.lead_magnet.as_deref(),
            request.source.as_deref(),
        );

        sqlx::query(
            r#"
            INSERT INTO newsletter_subscribers
                (email, first_name, last_name, vertical, subscription_source, lead_magnet,
                 preferences, segments, subscribed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&email)
        .bind(&request.first_name)
        .bind(&request.last_name)
        .bind(&request.vertical)
        .bind(&request.source)
        .bind(&request.lead_magnet)
        .bind(Json(request.preferences.unwrap_or_else(|| json!({}))))
        .bind(Json(&segments))
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(|e| Error::from_unique_violation(e, format!("{} is already subscribed", email)))?;

        let subscriber = self
            .get_subscriber(&email)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subscriber {}", email)))?;

        let welcome = OutgoingEmail {
            to: email.clone(),
            subject: "Welcome aboard!".to_string(),
            html: format!(
                "<p>Thanks for subscribing{}! Your first digest is on its way.</p>",
                subscriber
                    .first_name
                    .as_deref()
                    .map(|n| format!(", {}", n))
                    .unwrap_or_default()
            ),
        };
        let welcome_email_sent = match self.mailer.send(&welcome).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Welcome email to {} failed: {}", email, e);
                false
            }
        };

        self.metrics.incr("subscribers_added");
        info!("New subscriber {}", email);

        Ok(SubscribeOutcome {
            subscriber,
            status: SubscribeStatus::Subscribed,
            welcome_email_sent,
        })
    }

    pub async fn unsubscribe(&self, email: &str) -> Result<Subscriber> {
        let email = email.trim().to_lowercase();
        let updated = sqlx::query(
            "UPDATE newsletter_subscribers SET is_active = 0, unsubscribed_at = ? WHERE email = ?",
        )
        .bind(Utc::now())
        .bind(&email)
        .execute(&self.db)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(format!("subscriber {}", email)));
        }
        info!("Unsubscribed {}", email);

        self.get_subscriber(&email)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subscriber {}", email)))
    }

    async fn target_subscribers(&self, vertical: &str, segments: &[String]) -> Result<Vec<Subscriber>> {
        let subscribers = sqlx::query_as::<_, Subscriber>(
            "SELECT * FROM newsletter_subscribers WHERE is_active = 1 AND vertical = ? ORDER BY id",
        )
        .bind(vertical)
        .fetch_all(&self.db)
        .await?;

        Ok(subscribers
            .into_iter()
            .filter(|s| has_segments(s, segments))
            .collect())
    }

    /// Move an edition from `from` to `to`, failing if someone else moved it first
    async fn transition(&self, id: i64, from: EditionStatus, to: EditionStatus) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(Error::Conflict(format!(
                "edition {} cannot move from {} to {}",
                id, from, to
            )));
        }

        let updated = sqlx::query("UPDATE newsletter_editions SET status = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(id)
            .bind(from.as_str())
            .execute(&self.db)
            .await?;

        if updated.rows_affected() == 0 {
            return Err(Error::Conflict(format!("edition {} is no longer {}", id, from)));
        }
        Ok(())
    }

    /// `sending -> sent` together with the delivery bookkeeping
    async fn mark_sent(&self, id: i64, recipient_count: usize) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE newsletter_editions
            SET status = 'sent', sent_at = ?, recipient_count = ?
            WHERE id = ? AND status = 'sending'
            "#,
        )
        .bind(Utc::now())
        .bind(recipient_count as i64)
        .bind(id)
        .execute(&self.db)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(Error::Conflict(format!("edition {} is no longer sending", id)));
        }
        Ok(())
    }

    /// Hand a `sending` edition back to the status it was sent from
    async fn release(&self, id: i64, previous: EditionStatus) {
        let released = sqlx::query("UPDATE newsletter_editions SET status = ? WHERE id = ? AND status = 'sending'")
            .bind(previous.as_str())
            .bind(id)
            .execute(&self.db)
            .await;

        match released {
            Ok(done) if done.rows_affected() > 0 => info!("Edition {} returned to {}", id, previous),
            Ok(_) => debug!("Edition {} was not sending any more", id),
            Err(e) => warn!("Failed to return edition {} to {}: {}", id, previous, e),
        }
    }

    async fn deliver(&self, edition: &Edition, recipients: &[String]) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for to in recipients {
            let unsubscribe_url = format!(
                "{}/newsletter/unsubscribe?email={}",
                self.base_url,
                urlencoding::encode(to)
            );
            let email = OutgoingEmail {
                to: to.clone(),
                subject: edition.subject.clone(),
                html: edition.content.replace("{{unsubscribe_url}}", &unsubscribe_url),
            };

            report.sent += 1;
            match self.mailer.send(&email).await {
                Ok(()) => report.successful += 1,
                Err(e) => {
                    warn!("Delivery of edition {} to {} failed: {}", edition.id, to, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Test-send, schedule, or send an edition right away
    pub async fn send_edition(&self, id: i64, options: SendOptions) -> Result<SendOutcome> {
        let edition = self.get_edition(id).await?;
        let status = EditionStatus::parse(&edition.status)?;
        let audience = self.target_subscribers(&edition.vertical, &options.segments).await?;

        if options.test_send {
            let results = self.deliver(&edition, &options.test_emails).await;
            info!("Test send of edition {} to {} addresses", id, results.sent);
            return Ok(SendOutcome::Test {
                results,
                estimated_reach: audience.len(),
            });
        }

        if let Some(when) = options.scheduled_for {
            self.transition(id, status, EditionStatus::Scheduled).await?;
            sqlx::query("UPDATE newsletter_editions SET scheduled_for = ? WHERE id = ?")
                .bind(when)
                .bind(id)
                .execute(&self.db)
                .await?;
            info!("Edition {} scheduled for {}", id, when);
            return Ok(SendOutcome::Scheduled {
                scheduled_for: when,
                estimated_reach: audience.len(),
            });
        }

        self.transition(id, status, EditionStatus::Sending).await?;
        let recipients: Vec<String> = audience.into_iter().map(|s| s.email).collect();
        let results = self.deliver(&edition, &recipients).await;

        let finished = if results.sent > 0 && results.successful == 0 {
            Err(Error::Internal(format!(
                "edition {} could not be delivered to any of {} recipients",
                id, results.sent
            )))
        } else {
            self.mark_sent(id, recipients.len()).await
        };
        if let Err(e) = finished {
            self.release(id, status).await;
            return Err(e);
        }

        self.metrics.add("emails_sent", u64::from(results.successful));
        info!(
            "Edition {} sent: {} successful, {} failed",
            id, results.successful, results.failed
        );

        Ok(SendOutcome::Sent {
            recipient_count: recipients.len(),
            results,
        })
    }

    pub async fn analytics(&self, edition_id: Option<i64>) -> Result<NewsletterAnalytics> {
        let editions = match edition_id {
            Some(id) => {
                sqlx::query_as::<_, EditionSummary>(
                    r#"
                    SELECT id, title, vertical, status, recipient_count, open_rate, click_rate,
                           conversion_rate, revenue, sent_at
                    FROM newsletter_editions WHERE id = ?
                    "#,
                )
                .bind(id)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, EditionSummary>(
                    r#"
                    SELECT id, title, vertical, status, recipient_count, open_rate, click_rate,
                           conversion_rate, revenue, sent_at
                    FROM newsletter_editions
                    ORDER BY sent_at IS NULL, sent_at DESC, id DESC
                    LIMIT 50
                    "#,
                )
                .fetch_all(&self.db)
                .await?
            }
        };

        if let (Some(id), true) = (edition_id, editions.is_empty()) {
            return Err(Error::NotFound(format!("newsletter edition {}", id)));
        }

        let subscriber_stats = sqlx::query_as::<_, SubscriberStats>(
            r#"
            SELECT COUNT(*) AS total_subscribers,
                   COALESCE(SUM(CASE WHEN is_active THEN 1 ELSE 0 END), 0) AS active_subscribers,
                   COALESCE(AVG(engagement_score), 0.0) AS avg_engagement
            FROM newsletter_subscribers
            "#,
        )
        .fetch_one(&self.db)
        .await?;

        let count = editions.len().max(1) as f64;
        let performance = Performance {
            total_sent: editions.iter().map(|e| e.recipient_count).sum(),
            avg_open_rate: editions.iter().map(|e| e.open_rate).sum::<f64>() / count,
            avg_click_rate: editions.iter().map(|e| e.click_rate).sum::<f64>() / count,
            total_revenue: editions.iter().map(|e| e.revenue).sum(),
        };

        Ok(NewsletterAnalytics {
            editions,
            subscriber_stats,
            performance,
        })
    }

    /// Send every scheduled edition whose time has come
    pub async fn run_dispatch_cycle(&self) -> Result<usize> {
        let due: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM newsletter_editions WHERE status = 'scheduled' AND scheduled_for <= ? ORDER BY scheduled_for",
        )
        .bind(Utc::now())
        .fetch_all(&self.db)
        .await?;

        let mut sent = 0;
        let mut failure = None;
        for id in due {
            match self.send_edition(id, SendOptions::default()).await {
                Ok(_) => sent += 1,
                // Another dispatcher claimed it
                Err(Error::Conflict(msg)) => warn!("Skipping edition {}: {}", id, msg),
                Err(e) => {
                    warn!("Dispatch of edition {} failed: {}", id, e);
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(sent),
        }
    }
}

#[async_trait::async_trait]
impl Engine for NewsletterEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn required_tables(&self) -> &'static [&'static str] {
        REQUIRED_TABLES
    }

    fn jobs(self: Arc<Self>) -> Vec<PeriodicJob> {
        vec![PeriodicJob::new("newsletter.dispatch", Duration::from_secs(60), move || {
            let engine = Arc::clone(&self);
            async move { engine.run_dispatch_cycle().await.map(|_| ()) }
        })]
    }

    fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use empire_common::db::{connect, SchemaSync};
    use std::sync::Mutex;

    /// Records deliveries; addresses containing "bounce" fail
    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<OutgoingEmail>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &OutgoingEmail) -> Result<()> {
            if email.to.contains("bounce") {
                return Err(Error::Internal("mailbox unavailable".to_string()));
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    async fn engine() -> (NewsletterEngine, Arc<RecordingMailer>) {
        let pool = connect("sqlite::memory:").await.unwrap();
        SchemaSync::ensure_all(&pool, &tables()).await.unwrap();
        let mailer = Arc::new(RecordingMailer::default());
        let engine = NewsletterEngine::new(pool, EventBus::new(16), mailer.clone(), "https://empire.test");
        (engine, mailer)
    }

    fn subscribe(email: &str, vertical: &str) -> SubscribeRequest {
        SubscribeRequest {
            email: email.to_string(),
            first_name: Some("Sam".to_string()),
            last_name: None,
            vertical: Some(vertical.to_string()),
            lead_magnet: Some("checklist".to_string()),
            source: None,
            gdpr_consent: true,
            preferences: None,
        }
    }

    async fn edition(engine: &NewsletterEngine, vertical: &str) -> Edition {
        engine
            .create_edition(NewEdition {
                vertical: vertical.to_string(),
                edition_type: EditionType::Weekly,
                embedded_offers: vec![],
            })
            .await
            .unwrap()
            .edition
    }

    #[test]
    fn test_status_transitions() {
        use EditionStatus::*;
        assert!(Draft.can_transition_to(Scheduled));
        assert!(Draft.can_transition_to(Sending));
        assert!(Scheduled.can_transition_to(Sending));
        assert!(Sending.can_transition_to(Sent));

        assert!(!Sent.can_transition_to(Sending));
        assert!(!Sent.can_transition_to(Draft));
        assert!(!Scheduled.can_transition_to(Scheduled));
        assert!(!Draft.can_transition_to(Sent));
    }

    #[test]
    fn test_segments() {
        assert_eq!(
            segments_for(Some("finance"), Some("ebook"), Some("blog")),
            vec!["vertical_finance", "lead_magnet_ebook", "source_blog"]
        );
        assert!(segments_for(None, None, None).is_empty());
    }

    #[test]
    fn test_sending_recommendation_fallback() {
        assert_eq!(sending_recommendation("finance").day, "Monday");
        assert_eq!(sending_recommendation("gardening").day, "Wednesday");
    }

    #[tokio::test]
    async fn test_create_edition_templates() {
        let (engine, _) = engine().await;
        let created = engine
            .create_edition(NewEdition {
                vertical: "Finance".to_string(),
                edition_type: EditionType::Daily,
                embedded_offers: vec![],
            })
            .await
            .unwrap();

        let e = &created.edition;
        assert!(e.title.starts_with("Finance Weekly Digest - "));
        assert_eq!(e.subject, "📈 This Week in Finance: Top Trends & Insights");
        assert_eq!(e.cta.0.url, "/tools/finance");
        assert_eq!(e.ai_generated_sections.0.len(), 3);
        assert_eq!(e.status, "draft");
        assert!(e.content.contains("Expert Takes"));
        assert_eq!(created.preview_url, format!("/newsletter/preview/{}", e.id));
    }

    #[tokio::test]
    async fn test_subscribe_requires_consent_and_valid_email() {
        let (engine, _) = engine().await;
        let mut request = subscribe("a@example.com", "finance");
        request.gdpr_consent = false;
        assert!(matches!(engine.subscribe(request).await, Err(Error::InvalidInput(_))));
        assert!(matches!(
            engine.subscribe(subscribe("not-an-email", "finance")).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_then_resubscribe() {
        let (engine, mailer) = engine().await;
        let first = engine.subscribe(subscribe("Reader@Example.com", "finance")).await.unwrap();
        assert_eq!(first.status, SubscribeStatus::Subscribed);
        assert!(first.welcome_email_sent);
        assert_eq!(first.subscriber.email, "reader@example.com");
        assert_eq!(
            first.subscriber.segments.0,
            vec!["vertical_finance".to_string(), "lead_magnet_checklist".to_string()]
        );
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);

        engine.unsubscribe("reader@example.com").await.unwrap();

        let mut again = subscribe("reader@example.com", "health");
        again.lead_magnet = None;
        let second = engine.subscribe(again).await.unwrap();
        assert_eq!(second.status, SubscribeStatus::Resubscribed);
        assert!(second.subscriber.is_active);
        assert_eq!(second.subscriber.vertical.as_deref(), Some("health"));
        assert_eq!(second.subscriber.lead_magnet.as_deref(), Some("checklist"));
        assert!(second.subscriber.unsubscribed_at.is_none());

        assert!(matches!(engine.unsubscribe("ghost@example.com").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_send_now_counts_failures() {
        let (engine, mailer) = engine().await;
        engine.subscribe(subscribe("one@example.com", "finance")).await.unwrap();
        engine.subscribe(subscribe("bounce@example.com", "finance")).await.unwrap();
        engine.subscribe(subscribe("other@example.com", "health")).await.unwrap();
        let e = edition(&engine, "finance").await;

        let outcome = engine.send_edition(e.id, SendOptions::default()).await.unwrap();
        match outcome {
            SendOutcome::Sent { recipient_count, results } => {
                assert_eq!(recipient_count, 2);
                assert_eq!(results, DeliveryReport { sent: 2, successful: 1, failed: 1 });
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let sent = engine.get_edition(e.id).await.unwrap();
        assert_eq!(sent.status, "sent");
        assert_eq!(sent.recipient_count, 2);
        assert!(sent.sent_at.is_some());

        let delivered = mailer.sent.lock().unwrap();
        let newsletter = delivered.iter().find(|m| m.subject == sent.subject).unwrap();
        assert!(newsletter
            .html
            .contains("https://empire.test/newsletter/unsubscribe?email=one%40example.com"));
        drop(delivered);

        let again = engine.send_edition(e.id, SendOptions::default()).await;
        assert!(matches!(again, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_undeliverable_send_can_be_retried() {
        let (engine, mailer) = engine().await;
        engine.subscribe(subscribe("bounce@example.com", "finance")).await.unwrap();
        let e = edition(&engine, "finance").await;

        let failed = engine.send_edition(e.id, SendOptions::default()).await;
        assert!(matches!(failed, Err(Error::Internal(_))));
        let stored = engine.get_edition(e.id).await.unwrap();
        assert_eq!(stored.status, "draft");
        assert!(stored.sent_at.is_none());

        engine.subscribe(subscribe("reader@example.com", "finance")).await.unwrap();
        let retried = engine.send_edition(e.id, SendOptions::default()).await.unwrap();
        assert!(matches!(
            retried,
            SendOutcome::Sent {
                recipient_count: 2,
                results: DeliveryReport { sent: 2, successful: 1, failed: 1 },
            }
        ));
        assert_eq!(engine.get_edition(e.id).await.unwrap().status, "sent");
        assert!(mailer.sent.lock().unwrap().iter().any(|m| m.to == "reader@example.com"));
    }

    #[tokio::test]
    async fn test_undeliverable_scheduled_edition_stays_scheduled() {
        let (engine, _) = engine().await;
        engine.subscribe(subscribe("bounce@example.com", "finance")).await.unwrap();
        engine.subscribe(subscribe("reader@example.com", "health")).await.unwrap();
        let stuck = edition(&engine, "finance").await;
        let fine = edition(&engine, "health").await;
        for id in [stuck.id, fine.id] {
            engine
                .send_edition(
                    id,
                    SendOptions {
                        scheduled_for: Some(Utc::now() - ChronoDuration::minutes(1)),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        assert!(matches!(engine.run_dispatch_cycle().await, Err(Error::Internal(_))));
        assert_eq!(engine.get_edition(stuck.id).await.unwrap().status, "scheduled");
        assert_eq!(engine.get_edition(fine.id).await.unwrap().status, "sent");
    }

    #[tokio::test]
    async fn test_unsubscribe_link_encodes_address() {
        let (engine, mailer) = engine().await;
        engine.subscribe(subscribe("first+news&more@example.com", "finance")).await.unwrap();
        let e = edition(&engine, "finance").await;
        engine.send_edition(e.id, SendOptions::default()).await.unwrap();

        let delivered = mailer.sent.lock().unwrap();
        let newsletter = delivered.iter().find(|m| m.subject == e.subject).unwrap();
        assert!(newsletter
            .html
            .contains("https://empire.test/newsletter/unsubscribe?email=first%2Bnews%26more%40example.com"));
        assert!(!newsletter.html.contains("email=first+news"));
    }

    #[tokio::test]
    async fn test_test_send_keeps_draft() {
        let (engine, _) = engine().await;
        let e = edition(&engine, "finance").await;
        let outcome = engine
            .send_edition(
                e.id,
                SendOptions {
                    test_send: true,
                    test_emails: vec!["qa@example.com".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, SendOutcome::Test { results: DeliveryReport { sent: 1, .. }, .. }));
        assert_eq!(engine.get_edition(e.id).await.unwrap().status, "draft");
    }

    #[tokio::test]
    async fn test_segment_filter() {
        let (engine, _) = engine().await;
        engine.subscribe(subscribe("a@example.com", "finance")).await.unwrap();
        let mut no_magnet = subscribe("b@example.com", "finance");
        no_magnet.lead_magnet = None;
        engine.subscribe(no_magnet).await.unwrap();
        let e = edition(&engine, "finance").await;

        let outcome = engine
            .send_edition(
                e.id,
                SendOptions {
                    segments: vec!["lead_magnet_checklist".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, SendOutcome::Sent { recipient_count: 1, .. }));
    }

    #[tokio::test]
    async fn test_schedule_then_dispatch() {
        let (engine, _) = engine().await;
        engine.subscribe(subscribe("a@example.com", "finance")).await.unwrap();
        let due = edition(&engine, "finance").await;
        let later = edition(&engine, "finance").await;

        let past = Utc::now() - ChronoDuration::minutes(1);
        let future = Utc::now() + ChronoDuration::days(1);
        for (id, when) in [(due.id, past), (later.id, future)] {
            let outcome = engine
                .send_edition(
                    id,
                    SendOptions {
                        scheduled_for: Some(when),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            assert!(matches!(outcome, SendOutcome::Scheduled { estimated_reach: 1, .. }));
        }

        // Rescheduling a scheduled edition is not a legal transition
        let reschedule = engine
            .send_edition(
                later.id,
                SendOptions {
                    scheduled_for: Some(future),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(reschedule, Err(Error::Conflict(_))));

        assert_eq!(engine.run_dispatch_cycle().await.unwrap(), 1);
        assert_eq!(engine.get_edition(due.id).await.unwrap().status, "sent");
        assert_eq!(engine.get_edition(later.id).await.unwrap().status, "scheduled");
        assert_eq!(engine.run_dispatch_cycle().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_analytics() {
        let (engine, _) = engine().await;
        engine.subscribe(subscribe("a@example.com", "finance")).await.unwrap();
        let e = edition(&engine, "finance").await;
        engine.send_edition(e.id, SendOptions::default()).await.unwrap();

        let all = engine.analytics(None).await.unwrap();
        assert_eq!(all.editions.len(), 1);
        assert_eq!(all.performance.total_sent, 1);
        assert_eq!(all.subscriber_stats.active_subscribers, 1);

        assert!(matches!(engine.analytics(Some(999)).await, Err(Error::NotFound(_))));
    }
}
