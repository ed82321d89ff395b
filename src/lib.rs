pub mod config;
pub mod db;
pub mod dispatch;
pub mod email;
pub mod error;
pub mod newsletter;
pub mod normalize;
pub mod security;
pub mod store;
pub mod template;
pub mod tracking;
pub mod unsubscribe;

pub use config::{AppConfig, RenderConfig, SiteConfig};
pub use error::{AppError, StoreError};
pub use newsletter::{NewsletterRenderer, RenderStage, RenderedEmail};
