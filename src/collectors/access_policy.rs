//! Identity access-policy collector.
//!
//! Checks performed:
//! 1. Users with console access but no MFA
//! 2. Active access keys older than the configured maximum age
//! 3. Users with administrator-named attached policies
//! 4. Customer roles that have never been used
//! 5. Weak or missing account password policy

use super::{decode_records, fetch_document, finish, has_id, Collector, CollectorOutcome, Record};
use crate::models::{Finding, Severity, Source};
use crate::source::{DataSource, QueryContext};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

const WELL_ARCHITECTED: &str = "AWS Well-Architected";
const MIN_PASSWORD_LENGTH: u32 = 14;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Document {
    #[serde(default)]
    users: Vec<Value>,
    #[serde(default)]
    roles: Vec<Value>,
    #[serde(default)]
    password_policy: Option<PasswordPolicy>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct User {
    user_name: String,
    #[serde(default)]
    has_login_profile: bool,
    #[serde(default, rename = "MFADevices")]
    mfa_devices: Vec<Value>,
    #[serde(default)]
    access_keys: Vec<AccessKey>,
    #[serde(default)]
    attached_policies: Vec<AttachedPolicy>,
}

impl Record for User {
    fn is_identified(&self) -> bool {
        has_id(&self.user_name) && self.access_keys.iter().all(|k| has_id(&k.access_key_id))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccessKey {
    access_key_id: String,
    #[serde(default = "default_key_status")]
    status: String,
    create_date: DateTime<Utc>,
}

fn default_key_status() -> String {
    "Active".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AttachedPolicy {
    policy_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Role {
    role_name: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    role_last_used: Option<RoleLastUsed>,
}

impl Record for Role {
    fn is_identified(&self) -> bool {
        has_id(&self.role_name)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RoleLastUsed {
    #[serde(default)]
    last_used_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PasswordPolicy {
    #[serde(default)]
    minimum_password_length: u32,
    #[serde(default)]
    require_symbols: bool,
    #[serde(default)]
    require_numbers: bool,
    #[serde(default)]
    require_uppercase_characters: bool,
    #[serde(default)]
    require_lowercase_characters: bool,
}

impl PasswordPolicy {
    fn is_strong(&self) -> bool {
        self.require_symbols
            && self.require_numbers
            && self.require_uppercase_characters
            && self.require_lowercase_characters
            && self.minimum_password_length >= MIN_PASSWORD_LENGTH
    }
}

/// Collects findings about users, roles, keys and the password policy.
pub struct AccessPolicyCollector {
    api: Arc<dyn DataSource>,
}

impl AccessPolicyCollector {
    pub fn new(api: Arc<dyn DataSource>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Collector for AccessPolicyCollector {
    fn source(&self) -> Source {
        Source::AccessPolicy
    }

    async fn collect(&self, query: &QueryContext) -> CollectorOutcome {
        let document: Document =
            match fetch_document(self.api.as_ref(), Source::AccessPolicy, query).await {
                Ok(document) => document,
                Err(e) => return CollectorOutcome::Failed(e),
            };

        let (users, bad_users) = decode_records::<User>(&document.users);
        let (roles, bad_roles) = decode_records::<Role>(&document.roles);
        info!("Found {} users and {} roles", users.len(), roles.len());

        let mut findings = Vec::new();
        for user in &users {
            check_user(user, query, &mut findings);
        }
        for role in &roles {
            check_role(role, query, &mut findings);
        }
        check_password_policy(document.password_policy.as_ref(), query, &mut findings);

        finish(Source::AccessPolicy, findings, bad_users + bad_roles)
    }
}

fn check_user(user: &User, query: &QueryContext, findings: &mut Vec<Finding>) {
    let now = query.now();
    let name = &user.user_name;

    if user.has_login_profile && user.mfa_devices.is_empty() {
        debug!("User {} has console access without MFA", name);
        findings.push(
            Finding::new(
                Source::AccessPolicy,
                name.as_str(),
                Severity::High,
                format!("User {} has console access but no MFA enabled", name),
                now,
            )
            .with_controls(["CIS 1.2", WELL_ARCHITECTED])
            .with_recommendation("Enable MFA for all users with console access"),
        );
    }

    for key in user.access_keys.iter().filter(|k| k.status == "Active") {
        let age_days = (now - key.create_date).num_days();
        if age_days > query.max_key_age_days {
            findings.push(
                Finding::new(
                    Source::AccessPolicy,
                    key.access_key_id.as_str(),
                    Severity::Medium,
                    format!(
                        "Access key {} for user {} is {} days old",
                        key.access_key_id, name, age_days
                    ),
                    now,
                )
                .with_controls(["CIS 1.4", WELL_ARCHITECTED])
                .with_recommendation(format!(
                    "Rotate access keys at least every {} days",
                    query.max_key_age_days
                )),
            );
        }
    }

    for policy in &user.attached_policies {
        if policy.policy_name.to_lowercase().contains("admin") {
            findings.push(
                Finding::new(
                    Source::AccessPolicy,
                    name.as_str(),
                    Severity::Medium,
                    format!(
                        "User {} has potentially wide privileges via policy {}",
                        name, policy.policy_name
                    ),
                    now,
                )
                .with_controls(["CIS 1.16", WELL_ARCHITECTED])
                .with_recommendation("Apply least privilege principle to IAM users"),
            );
        }
    }
}

fn check_role(role: &Role, query: &QueryContext, findings: &mut Vec<Finding>) {
    if role.path.contains("service-role/") || role.role_name.starts_with("AWSServiceRole") {
        return;
    }

    let used = role
        .role_last_used
        .as_ref()
        .and_then(|r| r.last_used_date)
        .is_some();

    if !used {
        findings.push(
            Finding::new(
                Source::AccessPolicy,
                role.role_name.as_str(),
                Severity::Low,
                format!("Role {} appears to be unused", role.role_name),
                query.now(),
            )
            .with_controls([WELL_ARCHITECTED])
            .with_recommendation("Consider removing unused roles to reduce attack surface"),
        );
    }
}

fn check_password_policy(
    policy: Option<&PasswordPolicy>,
    query: &QueryContext,
    findings: &mut Vec<Finding>,
) {
    let finding = match policy {
        None => Finding::new(
            Source::AccessPolicy,
            "account-password-policy",
            Severity::High,
            "No IAM password policy is set for the account",
            query.now(),
        )
        .with_recommendation("Configure a strong password policy"),
        Some(policy) if !policy.is_strong() => Finding::new(
            Source::AccessPolicy,
            "account-password-policy",
            Severity::Medium,
            "IAM password policy does not meet security best practices",
            query.now(),
        )
        .with_recommendation(format!(
            "Require at least {} characters with a mix of character types",
            MIN_PASSWORD_LENGTH
        )),
        Some(_) => return,
    };

    findings.push(finding.with_controls(["CIS 1.5-1.11", WELL_ARCHITECTED]));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CollectionErrorKind;
    use crate::source::testing::{query, StaticSource};
    use serde_json::json;

    fn collector(value: Value) -> AccessPolicyCollector {
        AccessPolicyCollector::new(Arc::new(StaticSource::new().with(Source::AccessPolicy, value)))
    }

    fn strong_policy() -> Value {
        json!({
            "MinimumPasswordLength": 14,
            "RequireSymbols": true,
            "RequireNumbers": true,
            "RequireUppercaseCharacters": true,
            "RequireLowercaseCharacters": true
        })
    }

    #[tokio::test]
    async fn test_console_user_without_mfa() {
        let outcome = collector(json!({
            "Users": [
                {"UserName": "alice", "HasLoginProfile": true, "MFADevices": []},
                {"UserName": "bob", "HasLoginProfile": true, "MFADevices": [{"SerialNumber": "x"}]}
            ],
            "PasswordPolicy": strong_policy()
        }))
        .collect(&query())
        .await;

        let findings = outcome.findings();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].resource_id, "alice");
        assert_eq!(findings[0].severity, Severity::High);
        assert!(findings[0].control_mapping.contains("CIS 1.2"));
    }

    #[tokio::test]
    async fn test_old_access_key_and_admin_policy() {
        let outcome = collector(json!({
            "Users": [{
                "UserName": "ci",
                "AccessKeys": [
                    {"AccessKeyId": "AKIAOLD", "CreateDate": "2024-01-01T00:00:00Z"},
                    {"AccessKeyId": "AKIAINACTIVE", "Status": "Inactive", "CreateDate": "2020-01-01T00:00:00Z"},
                    {"AccessKeyId": "AKIANEW", "CreateDate": "2025-03-20T00:00:00Z"}
                ],
                "AttachedPolicies": [{"PolicyName": "AdministratorAccess"}, {"PolicyName": "ReadOnly"}]
            }],
            "PasswordPolicy": strong_policy()
        }))
        .collect(&query())
        .await;

        let findings = outcome.findings();
        assert_eq!(findings.len(), 2);
        assert!(findings
            .iter()
            .any(|f| f.resource_id == "AKIAOLD" && f.severity == Severity::Medium));
        assert!(findings
            .iter()
            .any(|f| f.description.contains("AdministratorAccess")));
    }

    #[tokio::test]
    async fn test_unused_roles_skip_service_roles() {
        let outcome = collector(json!({
            "Roles": [
                {"RoleName": "legacy-deploy", "Path": "/"},
                {"RoleName": "AWSServiceRoleForSupport", "Path": "/aws-service-role/"},
                {"RoleName": "lambda-exec", "Path": "/service-role/"},
                {"RoleName": "active", "Path": "/", "RoleLastUsed": {"LastUsedDate": "2025-03-30T00:00:00Z"}}
            ],
            "PasswordPolicy": strong_policy()
        }))
        .collect(&query())
        .await;

        let findings = outcome.findings();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].resource_id, "legacy-deploy");
        assert_eq!(findings[0].severity, Severity::Low);
    }

    #[tokio::test]
    async fn test_password_policy_missing_and_weak() {
        let missing = collector(json!({})).collect(&query()).await;
        assert_eq!(missing.findings()[0].severity, Severity::High);

        let weak = collector(json!({"PasswordPolicy": {"MinimumPasswordLength": 8}}))
            .collect(&query())
            .await;
        assert_eq!(weak.findings()[0].severity, Severity::Medium);
        assert_eq!(weak.findings()[0].resource_id, "account-password-policy");
    }

    #[tokio::test]
    async fn test_malformed_user_record_fails_source() {
        let outcome = collector(json!({
            "Users": [
                {"HasLoginProfile": true},
                {"UserName": "alice", "HasLoginProfile": true, "MFADevices": []}
            ],
            "PasswordPolicy": strong_policy()
        }))
        .collect(&query())
        .await;

        match outcome {
            CollectorOutcome::Failed(error) => {
                assert_eq!(error.kind, CollectionErrorKind::Partial);
                assert_eq!(error.detail, "1 malformed record(s) skipped");
            }
            other => panic!("expected failed outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_user_name_fails_source() {
        let outcome = collector(json!({
            "Users": [{"UserName": "", "HasLoginProfile": true, "MFADevices": []}],
            "PasswordPolicy": strong_policy()
        }))
        .collect(&query())
        .await;

        assert!(outcome.findings().is_empty());
        assert_eq!(
            outcome.error().map(|e| e.kind),
            Some(CollectionErrorKind::Partial)
        );
    }

    #[tokio::test]
    async fn test_empty_access_key_id_fails_source() {
        let outcome = collector(json!({
            "Users": [{
                "UserName": "ci",
                "AccessKeys": [{"AccessKeyId": "", "CreateDate": "2024-01-01T00:00:00Z"}]
            }],
            "PasswordPolicy": strong_policy()
        }))
        .collect(&query())
        .await;

        assert!(outcome.findings().is_empty());
        assert!(outcome.error().is_some());
    }

    #[tokio::test]
    async fn test_unreachable_source_fails_without_findings() {
        let collector = AccessPolicyCollector::new(Arc::new(
            StaticSource::new().failing(Source::AccessPolicy, "connection refused"),
        ));
        let outcome = collector.collect(&query()).await;

        assert!(outcome.findings().is_empty());
        assert_eq!(
            outcome.error().map(|e| e.kind),
            Some(CollectionErrorKind::Unavailable)
        );
    }
}
