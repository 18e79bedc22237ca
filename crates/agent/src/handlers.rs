use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use outreach_core::session::BrowserSession;
use outreach_core::{Error, Result};
use outreach_control::ControlPlaneClient;
use outreach_heal::HealManager;
use outreach_queue::InteractionQueue;
use outreach_transport::{CommandHandler, ProgressReporter};

/// A job that has already healed this many times is not healed again; the
/// error surfaces to the dispatcher instead of looping through successor
/// processes forever.
const MAX_HEAL_RECURSION: u32 = 3;

const ELEMENT_TIMEOUT_MS: u64 = 10_000;

/// Batch ceiling for accounts without the bulk-operations feature flag.
const NON_BULK_BATCH_LIMIT: usize = 10;

const PROFILE_LINKS_SCRIPT: &str =
    "Array.from(document.querySelectorAll('a[href*=\"/in/\"]')).map(a => a.href)";

/// Shared collaborators for every command handler.
#[derive(Clone)]
pub struct HandlerDeps {
    pub queue: InteractionQueue,
    pub control: Arc<ControlPlaneClient>,
    pub heal: Arc<HealManager>,
    pub session: Arc<dyn BrowserSession>,
}

fn require_str(payload: &Value, key: &str) -> Result<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::Validation(format!("Missing required field: {}", key)))
}

fn opt_str(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_string)
}

fn recursion_count(payload: &Value) -> u32 {
    payload
        .get("recursionCount")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32
}

/// Session errors mean the browser is in an unknown state; everything else
/// (validation, quota, control-plane) is deterministic and not worth a
/// fresh process.
fn is_unrecoverable(error: &Error) -> bool {
    matches!(error, Error::Session(_))
}

/// Route an unrecoverable failure to the heal manager, unless this job has
/// already exhausted its heal budget.
fn heal_handoff(deps: &HandlerDeps, heal_payload: Value, error: &Error) {
    let count = recursion_count(&heal_payload);
    if count >= MAX_HEAL_RECURSION {
        warn!(
            recursion_count = count,
            error = %error,
            "Heal budget exhausted, surfacing failure without restart"
        );
        return;
    }
    match deps.heal.heal_and_restart(&heal_payload) {
        Ok(path) => info!(path = %path.display(), "Job handed off to successor"),
        Err(e) => error!(error = %e, "Heal handoff failed"),
    }
}

/// `scrape-profiles`: page through a people search and collect profile
/// links. Multi-page, so an unrecoverable failure checkpoints the current
/// page for a search heal.
pub struct ScrapeProfilesHandler {
    deps: HandlerDeps,
}

impl ScrapeProfilesHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    fn search_url(company: &str, role: Option<&str>, location: Option<&str>, page: u32) -> String {
        let mut url = format!(
            "https://www.linkedin.com/search/results/people/?company={}&page={}",
            urlencode(company),
            page + 1
        );
        if let Some(role) = role {
            url.push_str(&format!("&title={}", urlencode(role)));
        }
        if let Some(location) = location {
            url.push_str(&format!("&location={}", urlencode(location)));
        }
        url
    }
}

#[async_trait]
impl CommandHandler for ScrapeProfilesHandler {
    async fn execute(&self, payload: Value, progress: ProgressReporter) -> Result<Value> {
        let company = require_str(&payload, "companyName")?;
        let role = opt_str(&payload, "companyRole");
        let location = opt_str(&payload, "location");

        let quota = self.deps.control.get_quota_status("scrape-profiles").await;
        if !quota["allowed"].as_bool().unwrap_or(true) {
            return Err(Error::QuotaExceeded {
                operation: "scrape-profiles".to_string(),
                message: "Profile scraping quota exhausted".to_string(),
            });
        }

        let start = payload
            .get("resumeIndex")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        let pages = payload
            .get("pageCount")
            .and_then(Value::as_u64)
            .unwrap_or(1)
            .max(1) as u32;

        // Tracks how far the task got, for the heal checkpoint.
        let current_page = Arc::new(AtomicU32::new(start));
        // Collected links live outside the task so a mid-run failure can hand
        // them to the successor instead of losing them.
        let profiles = Arc::new(Mutex::new(Vec::<Value>::new()));
        if let Some(partial) = opt_str(&payload, "lastPartialLinksFile") {
            let seeded = self.deps.heal.take_partial_links(Path::new(&partial));
            info!(count = seeded.len(), "Seeded profiles from a prior run");
            profiles.lock().unwrap().extend(seeded);
        }

        let session = self.deps.session.clone();
        let task = {
            let company = company.clone();
            let role = role.clone();
            let location = location.clone();
            let current_page = current_page.clone();
            let profiles = profiles.clone();
            async move {
                for offset in 0..pages {
                    let page = start + offset;
                    current_page.store(page, Ordering::SeqCst);
                    let url =
                        Self::search_url(&company, role.as_deref(), location.as_deref(), page);
                    session.navigate(&url).await?;
                    session
                        .wait_for_element(".search-results-container", ELEMENT_TIMEOUT_MS)
                        .await?;
                    let links = session.evaluate(PROFILE_LINKS_SCRIPT).await?;
                    if let Some(batch) = links.as_array() {
                        profiles.lock().unwrap().extend(batch.iter().cloned());
                    }
                    progress.report(
                        offset + 1,
                        pages,
                        &format!("Scraped search page {}", page + 1),
                    );
                }
                let collected = profiles.lock().unwrap().clone();
                Ok(json!({
                    "profiles": collected,
                    "pagesScraped": pages,
                }))
            }
        };

        let outcome = self
            .deps
            .queue
            .enqueue("scrape-profiles", payload.clone(), task)
            .await;

        match outcome {
            Ok(result) => {
                self.deps
                    .control
                    .report_interaction(
                        "scrape-profiles",
                        json!({"companyName": company, "pages": pages}),
                    )
                    .await;
                Ok(result)
            }
            Err(e) => {
                if is_unrecoverable(&e) {
                    let current = current_page.load(Ordering::SeqCst);
                    // Pages still owed from the failed one.
                    let remaining = (start + pages).saturating_sub(current);
                    let collected = profiles.lock().unwrap();
                    let partial_file = if collected.is_empty() {
                        None
                    } else {
                        self.deps
                            .heal
                            .write_partial_links(&collected)
                            .map_err(|we| warn!(error = %we, "Failed to save partial links"))
                            .ok()
                            .map(|p| p.display().to_string())
                    };
                    let heal_payload = json!({
                        "companyName": company,
                        "companyRole": role,
                        "location": location,
                        "searchName": payload.get("searchName"),
                        "searchPassword": payload.get("searchPassword"),
                        "jwtToken": payload.get("jwtToken"),
                        "pageNumber": current,
                        "pageCount": remaining,
                        "lastPartialLinksFile": partial_file,
                        "recursionCount": recursion_count(&payload),
                        "healReason": e.to_string(),
                    });
                    heal_handoff(&self.deps, heal_payload, &e);
                }
                Err(e)
            }
        }
    }
}

/// `send-message`: open a profile and send one message. Single-step, so a
/// failure surfaces directly; there is no partial progress worth healing.
pub struct SendMessageHandler {
    deps: HandlerDeps,
}

impl SendMessageHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl CommandHandler for SendMessageHandler {
    async fn execute(&self, payload: Value, progress: ProgressReporter) -> Result<Value> {
        let profile_url = require_str(&payload, "profileUrl")?;
        let message = require_str(&payload, "message")?;

        // 429 surfaces here as a quota error before any browser work starts.
        self.deps
            .control
            .report_usage("send-message", 1, json!({"profileUrl": profile_url}))
            .await?;

        let session = self.deps.session.clone();
        let task = {
            let profile_url = profile_url.clone();
            async move {
                session.navigate(&profile_url).await?;
                session
                    .wait_for_element("button[aria-label*='Message']", ELEMENT_TIMEOUT_MS)
                    .await?;
                session.click("button[aria-label*='Message']").await?;
                progress.report(1, 2, "Message composer open");
                session
                    .type_text("div.msg-form__contenteditable", &message)
                    .await?;
                session.click("button.msg-form__send-button").await?;
                progress.report(2, 2, "Message sent");
                Ok(json!({"sent": true, "profileUrl": profile_url}))
            }
        };

        let result = self
            .deps
            .queue
            .enqueue("send-message", payload.clone(), task)
            .await?;
        self.deps
            .control
            .report_interaction("send-message", json!({"profileUrl": profile_url}))
            .await;
        Ok(result)
    }
}

/// `send-connection-requests`: work through a list of profiles sending
/// connection requests. Bulk list processing, so an unrecoverable failure
/// checkpoints the list position for a profile-init heal.
pub struct SendConnectionRequestsHandler {
    deps: HandlerDeps,
}

impl SendConnectionRequestsHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl CommandHandler for SendConnectionRequestsHandler {
    async fn execute(&self, payload: Value, progress: ProgressReporter) -> Result<Value> {
        let urls: Vec<String> = payload
            .get("profileUrls")
            .or_else(|| payload.get("currentProcessingList"))
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if urls.is_empty() {
            return Err(Error::Validation(
                "Missing required field: profileUrls".to_string(),
            ));
        }

        let flags = self.deps.control.get_feature_flags(false).await;
        let bulk_enabled = flags["features"]["bulkOperations"].as_bool().unwrap_or(false);
        let mut urls = urls;
        if !bulk_enabled && urls.len() > NON_BULK_BATCH_LIMIT {
            warn!(
                requested = urls.len(),
                limit = NON_BULK_BATCH_LIMIT,
                "Bulk operations not enabled, truncating batch"
            );
            urls.truncate(NON_BULK_BATCH_LIMIT);
        }
        let total = urls.len();

        self.deps
            .control
            .report_usage(
                "send-connection-requests",
                total as u64,
                json!({"batch": total}),
            )
            .await?;

        let start = payload
            .get("currentIndex")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        let note = opt_str(&payload, "note");
        let current_index = Arc::new(AtomicU32::new(start as u32));

        let session = self.deps.session.clone();
        let task = {
            let urls = urls.clone();
            let current_index = current_index.clone();
            async move {
                let mut sent = 0usize;
                for (i, url) in urls.iter().enumerate().skip(start) {
                    current_index.store(i as u32, Ordering::SeqCst);
                    session.navigate(url).await?;
                    session
                        .wait_for_element("button[aria-label*='Connect']", ELEMENT_TIMEOUT_MS)
                        .await?;
                    session.click("button[aria-label*='Connect']").await?;
                    if let Some(note) = &note {
                        session.click("button[aria-label='Add a note']").await?;
                        session.type_text("textarea#custom-message", note).await?;
                    }
                    session.click("button[aria-label='Send now']").await?;
                    sent += 1;
                    progress.report((i + 1) as u32, total as u32, &format!("Invited {}", url));
                }
                Ok(json!({"sent": sent, "total": total}))
            }
        };

        let outcome = self
            .deps
            .queue
            .enqueue("send-connection-requests", payload.clone(), task)
            .await;

        match outcome {
            Ok(result) => {
                self.deps
                    .control
                    .report_interaction("send-connection-requests", json!({"sent": total}))
                    .await;
                Ok(result)
            }
            Err(e) => {
                if is_unrecoverable(&e) {
                    let heal_payload = json!({
                        "healPhase": "profile-init",
                        "currentProcessingList": urls,
                        "currentIndex": current_index.load(Ordering::SeqCst),
                        "batchSize": payload.get("batchSize"),
                        "totalConnections": total,
                        "searchName": payload.get("searchName"),
                        "searchPassword": payload.get("searchPassword"),
                        "jwtToken": payload.get("jwtToken"),
                        "recursionCount": recursion_count(&payload),
                        "healReason": e.to_string(),
                    });
                    heal_handoff(&self.deps, heal_payload, &e);
                }
                Err(e)
            }
        }
    }
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
