//! Sponsor eligibility, team synchronization and sponsor exports.

use crate::domain::model::{Account, Sponsors};
use crate::domain::ports::TeamManager;
use crate::utils::error::Result;
use crate::utils::table::Table;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

/// 贊助金額達門檻的受益者，加上 include、扣掉 exclude
pub fn eligible_users(
    sponsors: &Sponsors,
    minimum_amount: u64,
    include_users: &BTreeSet<String>,
    exclude_users: &BTreeSet<String>,
) -> BTreeSet<String> {
    sponsors
        .beneficiaries(minimum_amount)
        .into_iter()
        .filter(|(_, b)| b.grant)
        .map(|(login, _)| login)
        .chain(include_users.iter().cloned())
        .filter(|login| !exclude_users.contains(login))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeamSyncPlan {
    pub grant: Vec<String>,
    pub revoke: Vec<String>,
}

impl TeamSyncPlan {
    /// 目前成員（含待接受的邀請）與合格名單的差集
    pub fn compute(current: &BTreeSet<String>, eligible: &BTreeSet<String>) -> Self {
        Self {
            grant: eligible.difference(current).cloned().collect(),
            revoke: current.difference(eligible).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.grant.is_empty() && self.revoke.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TeamSyncReport {
    pub granted: Vec<String>,
    pub revoked: Vec<String>,
    pub failed: Vec<String>,
}

pub async fn team_members_and_invitations(
    teams: &dyn TeamManager,
    org: &str,
    team: &str,
) -> Result<(BTreeSet<String>, BTreeSet<String>)> {
    let members = teams.team_members(org, team).await?;
    let invitations = teams.team_invitations(org, team).await?;
    Ok((members, invitations))
}

pub async fn sync_team(
    teams: &dyn TeamManager,
    org: &str,
    team: &str,
    eligible: &BTreeSet<String>,
) -> Result<TeamSyncReport> {
    let (members, invitations) = team_members_and_invitations(teams, org, team).await?;
    let current: BTreeSet<String> = members.union(&invitations).cloned().collect();
    let plan = TeamSyncPlan::compute(&current, eligible);
    tracing::info!(
        "🔄 Syncing {}/{}: {} to grant, {} to revoke",
        org,
        team,
        plan.grant.len(),
        plan.revoke.len()
    );

    let mut report = TeamSyncReport::default();
    for user in &plan.revoke {
        if teams.revoke_access(user, org, team).await {
            report.revoked.push(user.clone());
        } else {
            report.failed.push(user.clone());
        }
    }
    for user in &plan.grant {
        if teams.grant_access(user, org, team).await {
            report.granted.push(user.clone());
        } else {
            report.failed.push(user.clone());
        }
    }
    Ok(report)
}

#[derive(Debug, Serialize)]
struct Numbers {
    total: u64,
    count: usize,
}

pub fn numbers_json(sponsors: &Sponsors) -> Result<String> {
    Ok(serde_json::to_string_pretty(&Numbers {
        total: sponsors.total(),
        count: sponsors.count(),
    })?)
}

/// 贊助者帳號清單；私人贊助預設不輸出
pub fn sponsors_json(sponsors: &Sponsors, include_private: bool) -> Result<String> {
    let accounts: BTreeSet<&Account> = if include_private {
        sponsors.accounts()
    } else {
        sponsors
            .sponsorships
            .iter()
            .filter(|s| !s.private)
            .map(|s| &s.account)
            .collect()
    };
    Ok(serde_json::to_string_pretty(&accounts)?)
}

pub fn write_numbers(sponsors: &Sponsors, path: &Path) -> Result<()> {
    std::fs::write(path, numbers_json(sponsors)?)?;
    tracing::info!("Wrote {}", path.display());
    Ok(())
}

pub fn write_sponsors(sponsors: &Sponsors, path: &Path, include_private: bool) -> Result<()> {
    std::fs::write(path, sponsors_json(sponsors, include_private)?)?;
    tracing::info!("Wrote {}", path.display());
    Ok(())
}

pub fn render_sponsors(sponsors: &Sponsors) -> String {
    let mut sorted: Vec<_> = sponsors.sponsorships.iter().collect();
    sorted.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.account.cmp(&b.account)));

    let mut table = Table::new(["Sponsor", "Platform", "Kind", "Amount", "Created", "Private"])
        .with_title(format!(
            "Sponsors ({} sponsorships, ${}/month)",
            sponsors.count(),
            sponsors.total()
        ));
    for sponsorship in sorted {
        table.add_row([
            sponsorship.account.name.clone(),
            sponsorship.account.platform.to_string(),
            if sponsorship.account.is_org { "org" } else { "user" }.to_string(),
            format!("${}", sponsorship.amount),
            sponsorship.created.format("%Y-%m-%d").to_string(),
            if sponsorship.private { "🔒" } else { "" }.to_string(),
        ]);
    }
    table.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::fixtures::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_eligible_users() {
        let sponsors = Sponsors::new(vec![
            user_sponsorship("alice", 50),
            user_sponsorship("cheap", 5),
            org_sponsorship("acme", 100, &["bob", "carol"]),
        ]);
        let eligible = eligible_users(&sponsors, 10, &set(&["friend"]), &set(&["carol"]));
        assert_eq!(eligible, set(&["alice", "bob", "friend"]));
    }

    #[test]
    fn test_plan_is_sorted_difference() {
        let plan = TeamSyncPlan::compute(&set(&["zed", "alice", "old"]), &set(&["alice", "new", "bob"]));
        assert_eq!(plan.grant, vec!["bob", "new"]);
        assert_eq!(plan.revoke, vec!["old", "zed"]);
        assert!(!plan.is_empty());
    }

    #[test]
    fn test_exports() {
        let mut hidden = user_sponsorship("hidden", 20);
        hidden.private = true;
        let sponsors = Sponsors::new(vec![hidden, user_sponsorship("shown", 5)]);

        let numbers: serde_json::Value = serde_json::from_str(&numbers_json(&sponsors).unwrap()).unwrap();
        assert_eq!(numbers["total"], 25);
        assert_eq!(numbers["count"], 2);

        let public: serde_json::Value =
            serde_json::from_str(&sponsors_json(&sponsors, false).unwrap()).unwrap();
        assert_eq!(public.as_array().unwrap().len(), 1);
        assert_eq!(public[0]["name"], "shown");
        assert_eq!(public[0]["org"], false);
        assert_eq!(public[0]["platform"], "github");

        let all: serde_json::Value = serde_json::from_str(&sponsors_json(&sponsors, true).unwrap()).unwrap();
        assert_eq!(all.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_render_sponsors_orders_by_amount() {
        let sponsors = Sponsors::new(vec![user_sponsorship("small", 5), user_sponsorship("big", 100)]);
        let rendered = render_sponsors(&sponsors);
        let big = rendered.find("big").unwrap();
        let small = rendered.find("small").unwrap();
        assert!(big < small);
        assert!(rendered.contains("$105/month"));
    }

    #[derive(Default)]
    struct FakeTeams {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TeamManager for FakeTeams {
        async fn team_members(&self, _org: &str, _team: &str) -> Result<BTreeSet<String>> {
            Ok(set(&["alice", "leaver"]))
        }

        async fn team_invitations(&self, _org: &str, _team: &str) -> Result<BTreeSet<String>> {
            Ok(set(&["pending"]))
        }

        async fn grant_access(&self, user: &str, _org: &str, _team: &str) -> bool {
            self.calls.lock().unwrap().push(format!("+{user}"));
            user != "blocked"
        }

        async fn revoke_access(&self, user: &str, _org: &str, _team: &str) -> bool {
            self.calls.lock().unwrap().push(format!("-{user}"));
            true
        }
    }

    #[tokio::test]
    async fn test_sync_team() {
        let teams = FakeTeams::default();
        let eligible = set(&["alice", "pending", "newbie", "blocked"]);
        let report = sync_team(&teams, "org", "insiders", &eligible).await.unwrap();
        assert_eq!(report.revoked, vec!["leaver"]);
        assert_eq!(report.granted, vec!["newbie"]);
        assert_eq!(report.failed, vec!["blocked"]);
        assert_eq!(
            *teams.calls.lock().unwrap(),
            vec!["-leaver", "+blocked", "+newbie"]
        );
    }
}
