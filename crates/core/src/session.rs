use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Boundary to the headless-browser automation engine.
///
/// The queue and heal layers never look inside a session: they only start and
/// stop jobs that drive one. Exactly one job may hold the session at a time
/// (the queue's default concurrency of 1 enforces this).
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn wait_for_element(&self, selector: &str, timeout_ms: u64) -> Result<()>;
    async fn click(&self, selector: &str) -> Result<()>;
    async fn type_text(&self, selector: &str, text: &str) -> Result<()>;
    async fn evaluate(&self, script: &str) -> Result<Value>;
    async fn screenshot(&self, path: &str) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Placeholder session used when no automation engine is attached.
///
/// Every operation fails with a session error so a misconfigured deployment
/// surfaces immediately instead of silently doing nothing.
pub struct DetachedSession;

#[async_trait]
impl BrowserSession for DetachedSession {
    async fn initialize(&self) -> Result<()> {
        Err(crate::Error::Session(
            "no automation engine attached".to_string(),
        ))
    }

    async fn navigate(&self, _url: &str) -> Result<()> {
        Err(crate::Error::Session(
            "no automation engine attached".to_string(),
        ))
    }

    async fn wait_for_element(&self, _selector: &str, _timeout_ms: u64) -> Result<()> {
        Err(crate::Error::Session(
            "no automation engine attached".to_string(),
        ))
    }

    async fn click(&self, _selector: &str) -> Result<()> {
        Err(crate::Error::Session(
            "no automation engine attached".to_string(),
        ))
    }

    async fn type_text(&self, _selector: &str, _text: &str) -> Result<()> {
        Err(crate::Error::Session(
            "no automation engine attached".to_string(),
        ))
    }

    async fn evaluate(&self, _script: &str) -> Result<Value> {
        Err(crate::Error::Session(
            "no automation engine attached".to_string(),
        ))
    }

    async fn screenshot(&self, _path: &str) -> Result<()> {
        Err(crate::Error::Session(
            "no automation engine attached".to_string(),
        ))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
