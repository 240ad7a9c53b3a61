pub mod appeals;
pub mod breaker;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod decay;
pub mod escalation;
pub mod gateway;
pub mod moderation;
pub mod mutes;
pub mod prefilter;
pub mod punishment;
pub mod stats;
pub mod store;
pub mod text;

pub use appeals::{AppealError, AppealService};
pub use cache::{CachedClassification, MessageCache};
pub use classifier::{ClassifierClient, ModerationResult};
pub use config::Config;
pub use gateway::{ChatGateway, NullGateway};
pub use moderation::{Disposition, ModerationService};
pub use prefilter::{FilterVerdict, PreFilter};
pub use punishment::{PunishmentKind, PunishmentSpec};
pub use store::Database;
