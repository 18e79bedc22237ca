use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use outreach_core::paths::Paths;
use outreach_core::{Error, Result};

use crate::detach::spawn_detached;
use crate::sealer::CredentialSealer;
use crate::state::HealRequest;

const SECRET_FIELDS: [&str; 2] = ["searchPassword", "jwtToken"];

/// Converts an unrecoverable job failure into a durable checkpoint plus a
/// fresh-process resumption. The browser session in this process is assumed
/// corrupted, so recovery always goes through a successor process.
pub struct HealManager {
    paths: Paths,
    sealer: Arc<dyn CredentialSealer>,
}

impl HealManager {
    pub fn new(paths: Paths, sealer: Arc<dyn CredentialSealer>) -> Self {
        Self { paths, sealer }
    }

    /// Checkpoint the payload and hand off to a detached successor running
    /// `outreachd resume <path>`. Fire-and-forget: this process keeps running
    /// and the in-flight job resolves normally after the handoff.
    pub fn heal_and_restart(&self, payload: &Value) -> Result<PathBuf> {
        let path = self.checkpoint(payload)?;
        let exe = std::env::current_exe()?;
        spawn_detached(&exe, [OsStr::new("resume"), path.as_os_str()])?;
        Ok(path)
    }

    /// Classify, seal credentials, and write the checkpoint file. Split out
    /// from the spawn so the resume path is testable without forking.
    pub fn checkpoint(&self, payload: &Value) -> Result<PathBuf> {
        let mut request = HealRequest::from_payload(payload);
        info!(
            phase = request.heal_phase(),
            recursion_count = request.common().recursion_count,
            reason = %request.common().heal_reason,
            "Writing heal checkpoint"
        );

        self.seal_secrets(&mut request)?;

        let dir = self.paths.heal_state_dir();
        std::fs::create_dir_all(&dir)?;
        let file_name = format!(
            "{}-{}.json",
            request.file_prefix(),
            chrono::Utc::now().timestamp_millis()
        );
        let path = dir.join(file_name);
        let json = serde_json::to_string_pretty(&request.to_value()?)?;
        std::fs::write(&path, json)?;
        info!(path = %path.display(), "Heal checkpoint written");
        Ok(path)
    }

    /// Persist profile links collected before a failure so the successor can
    /// fold them into its own results instead of re-scraping those pages. The
    /// returned path goes into the checkpoint as `lastPartialLinksFile`.
    pub fn write_partial_links(&self, links: &[Value]) -> Result<PathBuf> {
        let dir = self.paths.heal_state_dir();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!(
            "partial-links-{}.json",
            chrono::Utc::now().timestamp_millis()
        ));
        std::fs::write(&path, serde_json::to_string_pretty(links)?)?;
        info!(path = %path.display(), count = links.len(), "Partial links saved");
        Ok(path)
    }

    /// Read back a partial-links file and delete it; like the checkpoint
    /// itself, the file is consumed exactly once. A missing or unreadable
    /// file yields an empty list, never a failed resume.
    pub fn take_partial_links(&self, path: &Path) -> Vec<Value> {
        let links = std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str::<Vec<Value>>(&raw).ok())
            .unwrap_or_else(|| {
                warn!(path = %path.display(), "Partial links file missing or unreadable");
                Vec::new()
            });
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to delete consumed partial links file");
        }
        links
    }

    /// Load a checkpoint in the successor process. The file is deleted as
    /// soon as it parses, so a record is consumed exactly once and a crashed
    /// resume cannot loop on the same checkpoint.
    pub fn load_record(&self, path: &Path) -> Result<HealRequest> {
        let raw = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&raw)?;
        let mut request = HealRequest::from_value(&value)?;

        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to delete consumed checkpoint");
        }

        self.open_secrets(&mut request)?;
        info!(
            phase = request.heal_phase(),
            recursion_count = request.common().recursion_count,
            "Heal checkpoint loaded"
        );
        Ok(request)
    }

    fn seal_secrets(&self, request: &mut HealRequest) -> Result<()> {
        let common = request.common();
        let mut secrets = HashMap::new();
        if let Some(password) = &common.search_password {
            secrets.insert(SECRET_FIELDS[0].to_string(), password.clone());
        }
        if let Some(token) = &common.jwt_token {
            secrets.insert(SECRET_FIELDS[1].to_string(), token.clone());
        }
        if secrets.is_empty() {
            return Ok(());
        }

        // A checkpoint must never persist plaintext credentials nor silently
        // drop them, so a seal failure aborts the whole write.
        let Some(sealed) = self.sealer.seal(&secrets) else {
            error!("Credential sealing failed, aborting heal checkpoint");
            return Err(Error::Heal(
                "Failed to seal checkpoint credentials".to_string(),
            ));
        };

        let common = request.common_mut();
        if common.search_password.is_some() {
            common.search_password = sealed.get(SECRET_FIELDS[0]).cloned();
        }
        if common.jwt_token.is_some() {
            common.jwt_token = sealed.get(SECRET_FIELDS[1]).cloned();
        }
        Ok(())
    }

    fn open_secrets(&self, request: &mut HealRequest) -> Result<()> {
        let common = request.common();
        let mut sealed = HashMap::new();
        if let Some(password) = &common.search_password {
            sealed.insert(SECRET_FIELDS[0].to_string(), password.clone());
        }
        if let Some(token) = &common.jwt_token {
            sealed.insert(SECRET_FIELDS[1].to_string(), token.clone());
        }
        if sealed.is_empty() {
            return Ok(());
        }

        let Some(opened) = self.sealer.open(&sealed) else {
            return Err(Error::Heal(
                "Failed to open checkpoint credentials".to_string(),
            ));
        };

        let common = request.common_mut();
        if common.search_password.is_some() {
            common.search_password = opened.get(SECRET_FIELDS[0]).cloned();
        }
        if common.jwt_token.is_some() {
            common.jwt_token = opened.get(SECRET_FIELDS[1]).cloned();
        }
        Ok(())
    }
}
