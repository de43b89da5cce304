//! Growth engines
//!
//! Each engine owns its tables, request/response types and recurring jobs.

pub mod challenges;
pub mod forum;
pub mod newsletter;
pub mod ugc_video;

pub use challenges::ChallengeEngine;
pub use forum::ForumEngine;
pub use newsletter::NewsletterEngine;
pub use ugc_video::UgcVideoEngine;
