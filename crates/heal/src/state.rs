use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fields every checkpoint carries regardless of phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealCommon {
    pub search_name: Option<String>,
    pub search_password: Option<String>,
    pub jwt_token: Option<String>,
    pub recursion_count: u32,
    pub heal_phase: String,
    pub heal_reason: String,
    pub timestamp: String,
}

/// Checkpoint for the bulk indexed-processing phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInitHeal {
    #[serde(flatten)]
    pub common: HealCommon,
    pub current_batch: u32,
    pub current_index: u32,
    pub completed_batches: Vec<Value>,
    pub current_processing_list: Option<Value>,
    pub master_index_file: Option<String>,
    pub batch_size: u32,
    pub total_connections: u32,
}

/// Checkpoint for a filtered search scrape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHeal {
    #[serde(flatten)]
    pub common: HealCommon,
    pub company_name: Option<String>,
    pub company_role: Option<String>,
    pub location: Option<String>,
    pub resume_index: u32,
    /// Pages still owed when the job checkpointed. Absent in records written
    /// before pagination carry-over existed; the handler defaults to one page.
    pub page_count: Option<u32>,
    pub last_partial_links_file: Option<String>,
}

/// A heal request, recovered from an untyped payload at the boundary.
///
/// Classification is a presence predicate over the payload and lives only
/// here; everything downstream works with the typed variants.
#[derive(Debug, Clone, PartialEq)]
pub enum HealRequest {
    ProfileInit(ProfileInitHeal),
    Search(SearchHeal),
}

pub const PHASE_PROFILE_INIT: &str = "profile-init";
pub const PHASE_SEARCH: &str = "search";

const DEFAULT_BATCH_SIZE: u32 = 100;
const DEFAULT_HEAL_REASON: &str = "Unknown error";
// Resume 3 pages back: one page per consecutive failure the caller allows
// before declaring the job unrecoverable.
const SEARCH_RESUME_OFFSET: u32 = 3;

fn opt_str(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_string)
}

fn u32_or(payload: &Value, key: &str, default: u32) -> u32 {
    payload
        .get(key)
        .and_then(Value::as_u64)
        .map(|n| n as u32)
        .unwrap_or(default)
}

impl HealRequest {
    /// Classify and decode an untyped heal payload, filling in defaults for
    /// every unset field. Anything that is not recognizably a profile-init
    /// checkpoint is treated as a search checkpoint.
    pub fn from_payload(payload: &Value) -> Self {
        // Presence means a real value; an explicit JSON null is the same as
        // the key being absent.
        let has = |key: &str| payload.get(key).map(|v| !v.is_null()).unwrap_or(false);
        let is_profile_init = payload
            .get("healPhase")
            .and_then(Value::as_str)
            .map(|p| p == PHASE_PROFILE_INIT)
            .unwrap_or(false)
            || has("currentProcessingList")
            || has("masterIndexFile")
            || has("batchSize");

        let common = |phase: &str| HealCommon {
            search_name: opt_str(payload, "searchName"),
            search_password: opt_str(payload, "searchPassword"),
            jwt_token: opt_str(payload, "jwtToken"),
            recursion_count: u32_or(payload, "recursionCount", 0),
            heal_phase: phase.to_string(),
            heal_reason: opt_str(payload, "healReason")
                .unwrap_or_else(|| DEFAULT_HEAL_REASON.to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        if is_profile_init {
            HealRequest::ProfileInit(ProfileInitHeal {
                common: common(PHASE_PROFILE_INIT),
                current_batch: u32_or(payload, "currentBatch", 0),
                current_index: u32_or(payload, "currentIndex", 0),
                completed_batches: payload
                    .get("completedBatches")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
                current_processing_list: payload.get("currentProcessingList").cloned(),
                master_index_file: opt_str(payload, "masterIndexFile"),
                batch_size: u32_or(payload, "batchSize", DEFAULT_BATCH_SIZE),
                total_connections: u32_or(payload, "totalConnections", 0),
            })
        } else {
            // `pageCount` arrives as pages still owed from `pageNumber`; the
            // back-off re-scrapes a few completed pages, so those are owed
            // again from the earlier resume point.
            let (resume_index, backed_off) =
                match payload.get("resumeIndex").and_then(Value::as_u64) {
                    Some(n) => (n as u32, 0),
                    None => {
                        let page = u32_or(payload, "pageNumber", 0);
                        let index = page.saturating_sub(SEARCH_RESUME_OFFSET);
                        (index, page - index)
                    }
                };
            HealRequest::Search(SearchHeal {
                common: common(PHASE_SEARCH),
                company_name: opt_str(payload, "companyName"),
                company_role: opt_str(payload, "companyRole"),
                location: opt_str(payload, "location"),
                resume_index,
                page_count: payload
                    .get("pageCount")
                    .and_then(Value::as_u64)
                    .map(|n| n as u32 + backed_off),
                last_partial_links_file: opt_str(payload, "lastPartialLinksFile"),
            })
        }
    }

    /// Re-type a record that was previously written to disk. The `healPhase`
    /// field written by us is authoritative here.
    pub fn from_value(value: &Value) -> serde_json::Result<Self> {
        let profile_init = value
            .get("healPhase")
            .and_then(Value::as_str)
            .map(|p| p == PHASE_PROFILE_INIT)
            .unwrap_or(false);
        if profile_init {
            Ok(HealRequest::ProfileInit(serde_json::from_value(
                value.clone(),
            )?))
        } else {
            Ok(HealRequest::Search(serde_json::from_value(value.clone())?))
        }
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            HealRequest::ProfileInit(r) => serde_json::to_value(r),
            HealRequest::Search(r) => serde_json::to_value(r),
        }
    }

    pub fn file_prefix(&self) -> &'static str {
        match self {
            HealRequest::ProfileInit(_) => "profile-init-heal",
            HealRequest::Search(_) => "search-heal",
        }
    }

    pub fn heal_phase(&self) -> &str {
        &self.common().heal_phase
    }

    pub fn common(&self) -> &HealCommon {
        match self {
            HealRequest::ProfileInit(r) => &r.common,
            HealRequest::Search(r) => &r.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut HealCommon {
        match self {
            HealRequest::ProfileInit(r) => &mut r.common,
            HealRequest::Search(r) => &mut r.common,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_batch_size_routes_to_profile_init() {
        let req = HealRequest::from_payload(&json!({"batchSize": 50}));
        match req {
            HealRequest::ProfileInit(r) => {
                assert_eq!(r.batch_size, 50);
                assert_eq!(r.common.heal_phase, "profile-init");
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_null_marker_fields_do_not_route_to_profile_init() {
        let req = HealRequest::from_payload(&json!({
            "companyName": "Acme",
            "batchSize": null,
            "currentProcessingList": null,
            "masterIndexFile": null
        }));
        assert!(matches!(req, HealRequest::Search(_)));
    }

    #[test]
    fn test_search_checkpoint_carries_remaining_page_count() {
        // 10 pages still owed from page 5; resuming at page 2 owes the three
        // backed-off pages again.
        let req = HealRequest::from_payload(&json!({
            "companyName": "Acme",
            "pageNumber": 5,
            "pageCount": 10
        }));
        match req {
            HealRequest::Search(r) => {
                assert_eq!(r.resume_index, 2);
                assert_eq!(r.page_count, Some(13));
            }
            other => panic!("unexpected classification: {other:?}"),
        }

        // An explicit resume index is taken as-is.
        let req = HealRequest::from_payload(&json!({"resumeIndex": 4, "pageCount": 7}));
        match req {
            HealRequest::Search(r) => {
                assert_eq!(r.resume_index, 4);
                assert_eq!(r.page_count, Some(7));
            }
            other => panic!("unexpected classification: {other:?}"),
        }

        // absent in older records
        let req = HealRequest::from_payload(&json!({"companyName": "Acme"}));
        match req {
            HealRequest::Search(r) => assert_eq!(r.page_count, None),
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_explicit_phase_routes_to_profile_init() {
        let req = HealRequest::from_payload(&json!({"healPhase": "profile-init"}));
        assert!(matches!(req, HealRequest::ProfileInit(_)));
    }

    #[test]
    fn test_company_fields_route_to_search() {
        let req = HealRequest::from_payload(&json!({
            "companyName": "Acme",
            "companyRole": "Engineer"
        }));
        match req {
            HealRequest::Search(r) => {
                assert_eq!(r.company_name.as_deref(), Some("Acme"));
                assert_eq!(r.company_role.as_deref(), Some("Engineer"));
                assert_eq!(r.common.heal_phase, "search");
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_empty_payload_routes_to_search_with_defaults() {
        let req = HealRequest::from_payload(&json!({}));
        match req {
            HealRequest::Search(r) => {
                assert_eq!(r.common.recursion_count, 0);
                assert_eq!(r.common.heal_reason, "Unknown error");
                assert_eq!(r.resume_index, 0);
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_profile_init_defaults() {
        let req = HealRequest::from_payload(&json!({"masterIndexFile": "index.json"}));
        match req {
            HealRequest::ProfileInit(r) => {
                assert_eq!(r.batch_size, 100);
                assert_eq!(r.current_batch, 0);
                assert!(r.completed_batches.is_empty());
                assert_eq!(r.master_index_file.as_deref(), Some("index.json"));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_resume_index_backs_off_three_pages() {
        let req = HealRequest::from_payload(&json!({"companyName": "Acme", "pageNumber": 12}));
        match req {
            HealRequest::Search(r) => assert_eq!(r.resume_index, 9),
            other => panic!("unexpected classification: {other:?}"),
        }

        // saturates at zero instead of wrapping
        let req = HealRequest::from_payload(&json!({"pageNumber": 1}));
        match req {
            HealRequest::Search(r) => assert_eq!(r.resume_index, 0),
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_explicit_resume_index_wins_over_page_number() {
        let req = HealRequest::from_payload(&json!({"resumeIndex": 4, "pageNumber": 12}));
        match req {
            HealRequest::Search(r) => assert_eq!(r.resume_index, 4),
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_record_round_trip_preserves_fields() {
        let req = HealRequest::from_payload(&json!({
            "searchName": "alice@example.com",
            "recursionCount": 2,
            "companyName": "Acme",
            "healReason": "stale DOM"
        }));
        let value = req.to_value().unwrap();
        assert_eq!(value["searchName"], "alice@example.com");
        assert_eq!(value["recursionCount"], 2);
        assert_eq!(value["healPhase"], "search");
        assert_eq!(value["healReason"], "stale DOM");
        assert!(value["timestamp"].as_str().is_some());

        let reparsed = HealRequest::from_value(&value).unwrap();
        assert_eq!(reparsed, req);
    }
}
