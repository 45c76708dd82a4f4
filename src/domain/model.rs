use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SponsorshipPlatform {
    Github,
    Polar,
    Kofi,
}

impl fmt::Display for SponsorshipPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SponsorshipPlatform::Github => "github",
            SponsorshipPlatform::Polar => "polar",
            SponsorshipPlatform::Kofi => "kofi",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuePlatform {
    Github,
    Polar,
}

/// 帳號以 (platform, name) 識別
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub image: Option<String>,
    pub url: Option<String>,
    pub platform: SponsorshipPlatform,
    #[serde(rename = "org")]
    pub is_org: bool,
}

impl Account {
    pub fn new(name: impl Into<String>, platform: SponsorshipPlatform) -> Self {
        Self::with_details(name, platform, false, None, None)
    }

    pub fn with_details(
        name: impl Into<String>,
        platform: SponsorshipPlatform,
        is_org: bool,
        image: Option<String>,
        url: Option<String>,
    ) -> Self {
        let name = name.into();
        let image = image.filter(|s| !s.is_empty()).or_else(|| match platform {
            SponsorshipPlatform::Github => {
                Some(format!("https://avatars.githubusercontent.com/{}", name))
            }
            _ => None,
        });
        let url = url.filter(|s| !s.is_empty()).or_else(|| match platform {
            SponsorshipPlatform::Github => Some(format!("https://github.com/{}", name)),
            SponsorshipPlatform::Polar => Some(format!("https://polar.sh/{}", name)),
            SponsorshipPlatform::Kofi => None,
        });
        Self {
            name,
            image,
            url,
            platform,
            is_org,
        }
    }

    pub fn is_user(&self) -> bool {
        !self.is_org
    }

    pub fn key(&self) -> (SponsorshipPlatform, &str) {
        (self.platform, self.name.as_str())
    }
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Account {}

impl std::hash::Hash for Account {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.platform.hash(state);
        self.name.hash(state);
    }
}

impl PartialOrd for Account {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Account {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// 受益者：使用者本人，或是贊助組織的成員
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Beneficiary {
    pub user: Account,
    pub org: Option<Account>,
    pub grant: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Sponsorship {
    pub private: bool,
    pub created: DateTime<Utc>,
    pub amount: u64,
    pub account: Account,
    pub beneficiaries: BTreeMap<String, Beneficiary>,
}

impl Sponsorship {
    /// 依照組織成員對照表建立受益者
    pub fn new(
        account: Account,
        amount: u64,
        created: DateTime<Utc>,
        private: bool,
        org_members: &std::collections::HashMap<String, Vec<String>>,
    ) -> Self {
        let mut beneficiaries = BTreeMap::new();
        if account.is_org {
            for member in org_members.get(&account.name).into_iter().flatten() {
                beneficiaries.insert(
                    member.clone(),
                    Beneficiary {
                        user: Account::new(member.clone(), account.platform),
                        org: Some(account.clone()),
                        grant: false,
                    },
                );
            }
        } else {
            beneficiaries.insert(
                account.name.clone(),
                Beneficiary {
                    user: account.clone(),
                    org: None,
                    grant: false,
                },
            );
        }
        Self {
            private,
            created,
            amount,
            account,
            beneficiaries,
        }
    }

    pub fn benefits(&self, login: &str) -> bool {
        self.account.name == login || self.beneficiaries.contains_key(login)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Sponsors {
    pub sponsorships: Vec<Sponsorship>,
}

impl Sponsors {
    pub fn new(sponsorships: Vec<Sponsorship>) -> Self {
        Self { sponsorships }
    }

    pub fn merge(&mut self, other: Sponsors) -> &mut Self {
        self.sponsorships.extend(other.sponsorships);
        self
    }

    /// 建立贊助的帳號（去重、排序）
    pub fn accounts(&self) -> BTreeSet<&Account> {
        self.sponsorships.iter().map(|s| &s.account).collect()
    }

    /// 所有受益者；若同一使用者出現多次，以 `grant` 為真的那筆為準
    pub fn beneficiaries(&self, minimum_amount: u64) -> BTreeMap<String, Beneficiary> {
        let mut result: BTreeMap<String, Beneficiary> = BTreeMap::new();
        for sponsorship in &self.sponsorships {
            let grant = sponsorship.amount >= minimum_amount;
            for (name, beneficiary) in &sponsorship.beneficiaries {
                if !result.contains_key(name) || grant {
                    let mut beneficiary = beneficiary.clone();
                    beneficiary.grant = grant;
                    result.insert(name.clone(), beneficiary);
                }
            }
        }
        result
    }

    pub fn sponsorships_of<'a>(&'a self, login: &'a str) -> impl Iterator<Item = &'a Sponsorship> {
        self.sponsorships.iter().filter(move |s| s.benefits(login))
    }

    pub fn tier_sum(&self, login: &str) -> u64 {
        self.sponsorships_of(login).map(|s| s.amount).sum()
    }

    /// 一組使用者所連結的贊助總額，每筆贊助只算一次
    pub fn funding<'a, I>(&self, logins: I) -> u64
    where
        I: IntoIterator<Item = &'a str>,
    {
        let logins: HashSet<&str> = logins.into_iter().collect();
        self.sponsorships
            .iter()
            .filter(|s| logins.iter().any(|login| s.benefits(login)))
            .map(|s| s.amount)
            .sum()
    }

    pub fn total(&self) -> u64 {
        self.sponsorships.iter().map(|s| s.amount).sum()
    }

    pub fn count(&self) -> usize {
        self.sponsorships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sponsorships.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub repository: String,
    pub number: u64,
    pub title: String,
    pub created: DateTime<Utc>,
    pub author: Account,
    pub upvotes: BTreeSet<Account>,
    pub labels: BTreeSet<String>,
    pub pledged: u64,
    pub platform: IssuePlatform,
}

impl Issue {
    pub fn key(&self) -> IssueKey {
        (self.repository.clone(), self.number)
    }

    pub fn interested_users(&self) -> BTreeSet<&Account> {
        std::iter::once(&self.author).chain(self.upvotes.iter()).collect()
    }

    pub fn funding(&self, sponsors: &Sponsors) -> u64 {
        sponsors.funding(self.interested_users().into_iter().map(|a| a.name.as_str()))
    }

    pub fn url(&self) -> String {
        format!("https://github.com/{}/issues/{}", self.repository, self.number)
    }
}

pub type IssueKey = (String, u64);
pub type IssueMap = BTreeMap<IssueKey, Issue>;

#[derive(Debug, Clone, Default)]
pub struct Backlog {
    pub issues: Vec<Issue>,
}

impl Backlog {
    pub fn new(issues: Vec<Issue>) -> Self {
        Self { issues }
    }

    /// 依策略的鍵值組合做穩定排序
    pub fn sort(&mut self, strategies: &[crate::domain::sort::SortStrategy], sponsors: &Sponsors) {
        if strategies.is_empty() {
            return;
        }
        let mut keyed: Vec<(Vec<i64>, Issue)> = self
            .issues
            .drain(..)
            .map(|issue| {
                let key = strategies.iter().map(|s| s.key(&issue, sponsors)).collect();
                (key, issue)
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        self.issues = keyed.into_iter().map(|(_, issue)| issue).collect();
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    pub fn date(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    pub fn user_sponsorship(name: &str, amount: u64) -> Sponsorship {
        Sponsorship::new(
            Account::new(name, SponsorshipPlatform::Github),
            amount,
            date(1),
            false,
            &HashMap::new(),
        )
    }

    pub fn org_sponsorship(name: &str, amount: u64, members: &[&str]) -> Sponsorship {
        let mut map = HashMap::new();
        map.insert(
            name.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
        Sponsorship::new(
            Account::with_details(name, SponsorshipPlatform::Github, true, None, None),
            amount,
            date(1),
            false,
            &map,
        )
    }

    pub fn issue(repo: &str, number: u64, author: &str, upvoters: &[&str], day: u32) -> Issue {
        Issue {
            repository: repo.to_string(),
            number,
            title: format!("Issue {}", number),
            created: date(day),
            author: Account::new(author, SponsorshipPlatform::Github),
            upvotes: upvoters
                .iter()
                .map(|u| Account::new(*u, SponsorshipPlatform::Github))
                .collect(),
            labels: BTreeSet::new(),
            pledged: 0,
            platform: IssuePlatform::Github,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_account_defaults() {
        let account = Account::new("pawamoy", SponsorshipPlatform::Github);
        assert_eq!(
            account.image.as_deref(),
            Some("https://avatars.githubusercontent.com/pawamoy")
        );
        assert_eq!(account.url.as_deref(), Some("https://github.com/pawamoy"));

        let polar = Account::new("someone", SponsorshipPlatform::Polar);
        assert_eq!(polar.image, None);
        assert_eq!(polar.url.as_deref(), Some("https://polar.sh/someone"));
        assert_ne!(account, Account::new("pawamoy", SponsorshipPlatform::Polar));
    }

    #[test]
    fn test_org_members_benefit() {
        let sponsors = Sponsors::new(vec![
            user_sponsorship("alice", 10),
            org_sponsorship("acme", 100, &["bob", "carol"]),
        ]);
        assert_eq!(sponsors.tier_sum("bob"), 100);
        assert_eq!(sponsors.tier_sum("alice"), 10);
        assert_eq!(sponsors.tier_sum("acme"), 100);
        assert_eq!(sponsors.total(), 110);
        assert_eq!(sponsors.accounts().len(), 2);
    }

    #[test]
    fn test_beneficiaries_grant_wins() {
        let sponsors = Sponsors::new(vec![
            org_sponsorship("big", 100, &["bob"]),
            org_sponsorship("small", 5, &["bob", "dave"]),
        ]);
        let beneficiaries = sponsors.beneficiaries(50);
        assert!(beneficiaries["bob"].grant);
        assert_eq!(beneficiaries["bob"].org.as_ref().unwrap().name, "big");
        assert!(!beneficiaries["dave"].grant);
    }

    #[test]
    fn test_issue_funding_counts_each_sponsorship_once() {
        let sponsors = Sponsors::new(vec![
            org_sponsorship("acme", 100, &["bob", "carol"]),
            user_sponsorship("alice", 10),
        ]);
        let issue = issue("o/r", 1, "bob", &["carol", "alice", "nobody"], 1);
        assert_eq!(issue.funding(&sponsors), 110);
        assert_eq!(issue.interested_users().len(), 4);
    }
}
