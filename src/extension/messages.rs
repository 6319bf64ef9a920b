//! The extension's background message protocol.
//!
//! Messages arrive as JSON tagged by `type`. Every reply carries `success`;
//! failures add `error` and, for plan denials, `reason`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::applier::CookieApplier;
use super::client::ClientError;
use super::store::CookieStore;
use crate::cookies::normalize_domain;
use crate::models::cookie::CookieRecord;

/// Domains cleared when a clear request names none.
pub const EXTENSION_DOMAINS: &[&str] = &["chatgpt.com", "openai.com"];

const TEST_COOKIE_NAME: &str = "cookie_relay_probe";

/// A message sent to the background worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ExtensionMessage {
    /// Applies cookies after a plan check.
    SetCookies {
        cookies: Vec<CookieRecord>,
        #[serde(default)]
        website: Option<String>,
    },
    /// Writes, reads back and removes a throwaway cookie.
    TestCookie {
        #[serde(default)]
        website: Option<String>,
    },
    /// Removes every cookie under the given domains.
    ClearExtensionCookies {
        #[serde(default)]
        domains: Option<Vec<String>>,
    },
    /// Reloads a tab, the active one when no id is given.
    ReloadTab {
        #[serde(default)]
        tab_id: Option<i64>,
    },
    /// Forwards a payload to a tab's content script.
    CommunicateWithTab { tab_id: i64, payload: Value },
}

/// What the server said about the user's plan.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanStatus {
    Valid,
    /// The plan lapsed; the extension must drop its cookies.
    Expired,
    /// The server rejected the session (401); cookies are dropped too.
    SignedOut,
    /// Any other refusal.
    Denied {
        reason: Option<String>,
        message: String,
    },
}

/// Checks the plan before cookies are applied.
#[async_trait]
pub trait PlanChecker: Send + Sync {
    async fn check_plan(&self, website: Option<&str>) -> Result<PlanStatus, ClientError>;
}

/// Errors from the tab controller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TabError {
    #[error("no tab with id {0}")]
    NoSuchTab(i64),
    #[error("no active tab")]
    NoActiveTab,
    #[error("tab call failed: {0}")]
    Failed(String),
}

/// The browser's tab API.
#[async_trait]
pub trait TabController: Send + Sync {
    async fn reload(&self, tab_id: Option<i64>) -> Result<(), TabError>;
    async fn send(&self, tab_id: i64, payload: Value) -> Result<Value, TabError>;
}

fn failure(error: impl std::fmt::Display) -> Value {
    json!({ "success": false, "error": error.to_string() })
}

/// Dispatches [`ExtensionMessage`]s onto the applier, the cookie store and
/// the tab controller.
pub struct BackgroundWorker {
    applier: CookieApplier,
    store: Arc<dyn CookieStore>,
    plan: Arc<dyn PlanChecker>,
    tabs: Arc<dyn TabController>,
}

impl BackgroundWorker {
    pub fn new(store: Arc<dyn CookieStore>, plan: Arc<dyn PlanChecker>, tabs: Arc<dyn TabController>) -> Self {
        Self {
            applier: CookieApplier::new(store.clone()),
            store,
            plan,
            tabs,
        }
    }

    /// Parses and handles a raw JSON message.
    pub async fn handle_raw(&self, raw: &str) -> Value {
        match serde_json::from_str::<ExtensionMessage>(raw) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                warn!(error = %e, "unreadable extension message");
                failure(format!("invalid message: {}", e))
            }
        }
    }

    /// Handles one message and builds its reply.
    pub async fn handle(&self, message: ExtensionMessage) -> Value {
        match message {
            ExtensionMessage::SetCookies { cookies, website } => self.set_cookies(cookies, website).await,
            ExtensionMessage::TestCookie { website } => self.test_cookie(website).await,
            ExtensionMessage::ClearExtensionCookies { domains } => {
                let domains = domains
                    .unwrap_or_else(|| EXTENSION_DOMAINS.iter().map(|d| d.to_string()).collect());
                match self.clear(&domains).await {
                    Ok(removed) => json!({ "success": true, "removed": removed }),
                    Err(e) => failure(e),
                }
            }
            ExtensionMessage::ReloadTab { tab_id } => match self.tabs.reload(tab_id).await {
                Ok(()) => json!({ "success": true }),
                Err(e) => failure(e),
            },
            ExtensionMessage::CommunicateWithTab { tab_id, payload } => {
                match self.tabs.send(tab_id, payload).await {
                    Ok(response) => json!({ "success": true, "response": response }),
                    Err(e) => failure(e),
                }
            }
        }
    }

    async fn set_cookies(&self, cookies: Vec<CookieRecord>, website: Option<String>) -> Value {
        match self.plan.check_plan(website.as_deref()).await {
            Ok(PlanStatus::Valid) => {}
            Ok(PlanStatus::Expired) => {
                warn!("plan expired; clearing extension cookies");
                self.clear_extension_domains().await;
                return json!({
                    "success": false,
                    "error": "Your plan has expired",
                    "reason": "plan_expired",
                });
            }
            Ok(PlanStatus::SignedOut) => {
                warn!("session rejected by the server; clearing extension cookies");
                self.clear_extension_domains().await;
                return json!({
                    "success": false,
                    "error": "Your session has ended, please log in again",
                    "reason": "session_ended",
                });
            }
            Ok(PlanStatus::Denied { reason, message }) => {
                warn!(reason = ?reason, "plan check refused cookie application");
                return json!({ "success": false, "error": message, "reason": reason });
            }
            Err(e) => {
                warn!(error = %e, "plan check failed; applying cookies anyway");
            }
        }

        let report = self.applier.apply_batch(&cookies, website.as_deref()).await;
        match serde_json::to_value(&report) {
            Ok(value) => value,
            Err(e) => failure(e),
        }
    }

    async fn clear_extension_domains(&self) {
        let domains: Vec<String> = EXTENSION_DOMAINS.iter().map(|d| d.to_string()).collect();
        if let Err(e) = self.clear(&domains).await {
            warn!(error = %e, "could not clear extension cookies");
        }
    }

    async fn test_cookie(&self, website: Option<String>) -> Value {
        let website = website
            .map(|w| normalize_domain(&w))
            .filter(|w| !w.is_empty())
            .unwrap_or_else(|| EXTENSION_DOMAINS[0].to_string());
        let value = format!("probe-{}", Utc::now().timestamp_millis());

        let mut probe = CookieRecord::new(TEST_COOKIE_NAME, value.clone(), website.clone());
        probe.http_only = Some(false);

        let written = match self.applier.apply(&probe, Some(&website)).await {
            Ok(cookie) => cookie,
            Err(e) => return failure(e),
        };

        let url = written.url();
        let read_back = match self.store.get(&url, TEST_COOKIE_NAME).await {
            Ok(found) => found.is_some_and(|c| c.value == value),
            Err(e) => return failure(e),
        };
        if let Err(e) = self.store.remove(&url, TEST_COOKIE_NAME).await {
            warn!(error = %e, "could not remove probe cookie");
        }

        info!(website = %website, read_back, "cookie store probe finished");
        json!({ "success": read_back, "readBack": read_back, "website": website })
    }

    async fn clear(&self, domains: &[String]) -> Result<usize, super::store::StoreError> {
        let mut removed = 0;
        for domain in domains {
            for cookie in self.store.get_all(domain).await? {
                if self.store.remove(&cookie.url(), &cookie.name).await? {
                    removed += 1;
                }
            }
        }
        info!(removed, "extension cookies cleared");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::store::{HostPolicy, JarCookieStore};
    use tokio::sync::Mutex;

    struct FixedPlan(Result<PlanStatus, ()>);

    #[async_trait]
    impl PlanChecker for FixedPlan {
        async fn check_plan(&self, _website: Option<&str>) -> Result<PlanStatus, ClientError> {
            match &self.0 {
                Ok(status) => Ok(status.clone()),
                Err(()) => Err(ClientError::Status {
                    status: 502,
                    message: "bad gateway".into(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct RecordingTabs {
        reloads: Mutex<Vec<Option<i64>>>,
    }

    #[async_trait]
    impl TabController for RecordingTabs {
        async fn reload(&self, tab_id: Option<i64>) -> Result<(), TabError> {
            self.reloads.lock().await.push(tab_id);
            Ok(())
        }

        async fn send(&self, tab_id: i64, payload: Value) -> Result<Value, TabError> {
            if tab_id < 0 {
                return Err(TabError::NoSuchTab(tab_id));
            }
            Ok(json!({ "echo": payload }))
        }
    }

    fn worker(plan: Result<PlanStatus, ()>) -> (BackgroundWorker, Arc<JarCookieStore>, Arc<RecordingTabs>) {
        let store = Arc::new(JarCookieStore::new(HostPolicy::AllowAll));
        let tabs = Arc::new(RecordingTabs::default());
        let worker = BackgroundWorker::new(store.clone(), Arc::new(FixedPlan(plan)), tabs.clone());
        (worker, store, tabs)
    }

    fn set_cookies_message() -> ExtensionMessage {
        ExtensionMessage::SetCookies {
            cookies: vec![CookieRecord::new("session", "s", ".chatgpt.com")],
            website: Some("chatgpt.com".into()),
        }
    }

    #[test]
    fn messages_use_screaming_type_tags() {
        let raw = r#"{"type":"RELOAD_TAB","tabId":7}"#;
        let message: ExtensionMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(message, ExtensionMessage::ReloadTab { tab_id: Some(7) });

        let raw = r#"{"type":"CLEAR_EXTENSION_COOKIES"}"#;
        let message: ExtensionMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(message, ExtensionMessage::ClearExtensionCookies { domains: None });
    }

    #[tokio::test]
    async fn valid_plan_applies_cookies() {
        let (worker, store, _) = worker(Ok(PlanStatus::Valid));
        let reply = worker.handle(set_cookies_message()).await;
        assert_eq!(reply["success"], true);
        assert_eq!(reply["successCount"], 1);
        assert_eq!(store.cookies().await.len(), 1);
    }

    #[tokio::test]
    async fn network_failure_fails_open() {
        let (worker, store, _) = worker(Err(()));
        let reply = worker.handle(set_cookies_message()).await;
        assert_eq!(reply["success"], true);
        assert_eq!(store.cookies().await.len(), 1);
    }

    #[tokio::test]
    async fn expired_plan_fails_closed_and_clears() {
        let (worker, store, _) = worker(Ok(PlanStatus::Valid));
        worker.handle(set_cookies_message()).await;
        assert_eq!(store.cookies().await.len(), 1);

        let expired = BackgroundWorker::new(
            store.clone(),
            Arc::new(FixedPlan(Ok(PlanStatus::Expired))),
            Arc::new(RecordingTabs::default()),
        );
        let reply = expired.handle(set_cookies_message()).await;
        assert_eq!(reply["success"], false);
        assert_eq!(reply["reason"], "plan_expired");
        assert!(store.cookies().await.is_empty());
    }

    #[tokio::test]
    async fn rejected_session_fails_closed_and_clears() {
        let (worker, store, _) = worker(Ok(PlanStatus::Valid));
        worker.handle(set_cookies_message()).await;

        let signed_out = BackgroundWorker::new(
            store.clone(),
            Arc::new(FixedPlan(Ok(PlanStatus::SignedOut))),
            Arc::new(RecordingTabs::default()),
        );
        let reply = signed_out.handle(set_cookies_message()).await;
        assert_eq!(reply["success"], false);
        assert_eq!(reply["reason"], "session_ended");
        assert!(store.cookies().await.is_empty());
    }

    #[tokio::test]
    async fn denied_plan_applies_nothing() {
        let (worker, store, _) = worker(Ok(PlanStatus::Denied {
            reason: Some("not_logged_in".into()),
            message: "not logged in".into(),
        }));
        let reply = worker.handle(set_cookies_message()).await;
        assert_eq!(reply["success"], false);
        assert_eq!(reply["reason"], "not_logged_in");
        assert!(store.cookies().await.is_empty());
    }

    #[tokio::test]
    async fn test_cookie_round_trips_and_cleans_up() {
        let (worker, store, _) = worker(Ok(PlanStatus::Valid));
        let reply = worker.handle_raw(r#"{"type":"TEST_COOKIE"}"#).await;
        assert_eq!(reply["success"], true);
        assert_eq!(reply["readBack"], true);
        assert!(store.cookies().await.is_empty());
    }

    #[tokio::test]
    async fn clear_counts_removed_cookies() {
        let (worker, _, _) = worker(Ok(PlanStatus::Valid));
        worker
            .handle(ExtensionMessage::SetCookies {
                cookies: vec![
                    CookieRecord::new("a", "1", ".chatgpt.com"),
                    CookieRecord::new("b", "2", ".openai.com"),
                ],
                website: None,
            })
            .await;
        let reply = worker
            .handle(ExtensionMessage::ClearExtensionCookies { domains: None })
            .await;
        assert_eq!(reply["removed"], 2);
    }

    #[tokio::test]
    async fn tab_messages_reach_the_controller() {
        let (worker, _, tabs) = worker(Ok(PlanStatus::Valid));
        let reply = worker.handle(ExtensionMessage::ReloadTab { tab_id: None }).await;
        assert_eq!(reply["success"], true);
        assert_eq!(*tabs.reloads.lock().await, vec![None]);

        let reply = worker
            .handle(ExtensionMessage::CommunicateWithTab {
                tab_id: 3,
                payload: json!({ "ping": 1 }),
            })
            .await;
        assert_eq!(reply["response"]["echo"]["ping"], 1);

        let reply = worker
            .handle(ExtensionMessage::CommunicateWithTab {
                tab_id: -1,
                payload: Value::Null,
            })
            .await;
        assert_eq!(reply["success"], false);
    }

    #[tokio::test]
    async fn garbage_is_a_failure_reply() {
        let (worker, _, _) = worker(Ok(PlanStatus::Valid));
        let reply = worker.handle_raw(r#"{"type":"NOPE"}"#).await;
        assert_eq!(reply["success"], false);
    }
}
