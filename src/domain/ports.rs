use crate::domain::model::{IssueMap, Sponsors};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};

/// 組織名稱 -> 成員登入名稱
pub type OrgMembers = HashMap<String, Vec<String>>;

#[async_trait]
pub trait SponsorSource: Send + Sync {
    fn platform_name(&self) -> &str;

    async fn get_sponsors(&self, org_members: &OrgMembers, exclude_private: bool)
        -> Result<Sponsors>;
}

#[async_trait]
pub trait IssueSource: Send + Sync {
    fn platform_name(&self) -> &str;

    async fn get_issues(
        &self,
        namespaces: &[String],
        allow_labels: &BTreeSet<String>,
    ) -> Result<IssueMap>;
}

#[async_trait]
pub trait TeamManager: Send + Sync {
    async fn team_members(&self, org: &str, team: &str) -> Result<BTreeSet<String>>;

    async fn team_invitations(&self, org: &str, team: &str) -> Result<BTreeSet<String>>;

    /// 失敗時只記錄日誌，回傳是否成功
    async fn grant_access(&self, user: &str, org: &str, team: &str) -> bool;

    async fn revoke_access(&self, user: &str, org: &str, team: &str) -> bool;
}
