//! Security domain audit helpers
//!
//! [`SecurityAuditor`] never fails the operation it audits: append errors are
//! logged and counted, and the caller gets `None` instead of a hash.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;

use crate::entry::AuditRecord;
use crate::trail::AuditTrail;

/// Security-relevant actions recorded on the audit chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Login,
    Logout,
    Authenticate,
    Authorize,
    PermissionGranted,
    PermissionRevoked,
    SetPolicy,
    IssueSecret,
    ReportIncident,
    QueryEvents,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Authenticate => "authenticate",
            Self::Authorize => "authorize",
            Self::PermissionGranted => "permission_granted",
            Self::PermissionRevoked => "permission_revoked",
            Self::SetPolicy => "set_policy",
            Self::IssueSecret => "issue_secret",
            Self::ReportIncident => "report_incident",
            Self::QueryEvents => "query_events",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
    Denied,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Denied => "denied",
        }
    }

    pub fn from_bool(ok: bool) -> Self {
        if ok {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

#[derive(Clone)]
pub struct SecurityAuditor {
    trail: Arc<AuditTrail>,
}

impl SecurityAuditor {
    pub fn new(trail: Arc<AuditTrail>) -> Self {
        Self { trail }
    }

    pub async fn record(
        &self,
        action: AuditAction,
        actor: &str,
        result: AuditResult,
        details: Value,
    ) -> Option<String> {
        let record = AuditRecord::new(action.as_str(), actor, result.as_str(), details);
        match self.trail.append(record).await {
            Ok(hash) => Some(hash),
            Err(e) => {
                error!(action = %action, actor = %actor, error = %e, "Failed to append audit entry");
                metrics::counter!("orca_audit_append_failures_total").increment(1);
                None
            }
        }
    }

    pub async fn log_login(&self, user_id: &str, success: bool, source_ip: Option<&str>) -> Option<String> {
        self.record(
            AuditAction::Login,
            user_id,
            AuditResult::from_bool(success),
            json!({ "source_ip": source_ip }),
        )
        .await
    }

    pub async fn log_logout(&self, user_id: &str, session_id: &str) -> Option<String> {
        self.record(AuditAction::Logout, user_id, AuditResult::Success, json!({ "session_id": session_id }))
            .await
    }

    pub async fn log_authorization(&self, actor: &str, resource: &str, allowed: bool) -> Option<String> {
        let result = if allowed { AuditResult::Success } else { AuditResult::Denied };
        self.record(AuditAction::Authorize, actor, result, json!({ "resource": resource }))
            .await
    }

    pub async fn log_permission_granted(&self, granted_by: &str, subject: &str, permission: &str) -> Option<String> {
        self.record(
            AuditAction::PermissionGranted,
            granted_by,
            AuditResult::Success,
            json!({ "subject": subject, "permission": permission }),
        )
        .await
    }

    pub async fn log_permission_revoked(&self, revoked_by: &str, subject: &str, permission: &str) -> Option<String> {
        self.record(
            AuditAction::PermissionRevoked,
            revoked_by,
            AuditResult::Success,
            json!({ "subject": subject, "permission": permission }),
        )
        .await
    }

    pub async fn log_policy_change(&self, actor: &str, policy_id: &str, changes: Value) -> Option<String> {
        self.record(
            AuditAction::SetPolicy,
            actor,
            AuditResult::Success,
            json!({ "policy_id": policy_id, "changes": changes }),
        )
        .await
    }

    pub async fn log_secret_issued(&self, actor: &str, secret_name: &str) -> Option<String> {
        self.record(AuditAction::IssueSecret, actor, AuditResult::Success, json!({ "secret": secret_name }))
            .await
    }

    pub async fn log_incident(&self, reporter: &str, incident_id: &str, severity: &str) -> Option<String> {
        self.record(
            AuditAction::ReportIncident,
            reporter,
            AuditResult::Success,
            json!({ "incident_id": incident_id, "severity": severity }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AuditStore, InMemoryAuditStore};

    #[tokio::test]
    async fn test_helpers_write_catalogue_actions() {
        let store = Arc::new(InMemoryAuditStore::new());
        let auditor = SecurityAuditor::new(Arc::new(AuditTrail::new(store.clone())));

        assert!(auditor.log_login("u1", false, Some("10.1.1.1")).await.is_some());
        assert!(auditor.log_authorization("u1", "reports", false).await.is_some());
        assert!(auditor.log_permission_granted("admin", "u1", "reports:read").await.is_some());

        let entries = store.list_all().await.unwrap();
        let actions: Vec<&str> = entries.iter().map(|e| e.record.action.as_str()).collect();
        assert_eq!(actions, vec!["login", "authorize", "permission_granted"]);
        assert_eq!(entries[0].record.result, "failure");
        assert_eq!(entries[1].record.result, "denied");
        assert_eq!(entries[2].record.details["permission"], "reports:read");
    }

    #[tokio::test]
    async fn test_append_failure_is_swallowed() {
        let auditor = SecurityAuditor::new(Arc::new(AuditTrail::new(Arc::new(InMemoryAuditStore::new()))));
        // An empty actor is rejected by the trail; the helper reports None.
        assert!(auditor.log_logout("", "s-1").await.is_none());
    }

    #[test]
    fn test_action_serialization_matches_as_str() {
        for action in [AuditAction::PermissionGranted, AuditAction::SetPolicy, AuditAction::QueryEvents] {
            assert_eq!(serde_json::to_value(action).unwrap(), Value::String(action.as_str().to_string()));
        }
    }
}
