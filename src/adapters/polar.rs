use crate::adapters::http::{bearer_client, check_response};
use crate::domain::model::{Account, Issue, IssueMap, IssuePlatform, Sponsors, SponsorshipPlatform};
use crate::domain::ports::{IssueSource, OrgMembers, SponsorSource};
use crate::utils::error::{InsidersError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeSet;

pub const POLAR_API_URL: &str = "https://api.polar.sh";
const PAGE_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct IssuesPage {
    items: Vec<PolarIssue>,
}

#[derive(Debug, Deserialize)]
struct PolarIssue {
    number: u64,
    title: String,
    state: String,
    issue_created_at: DateTime<Utc>,
    author: Option<PolarAuthor>,
    repository: PolarRepository,
    funding: Option<Funding>,
}

#[derive(Debug, Deserialize)]
struct PolarAuthor {
    login: String,
}

#[derive(Debug, Deserialize)]
struct PolarRepository {
    name: String,
    organization: PolarOrganization,
}

#[derive(Debug, Deserialize)]
struct PolarOrganization {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Funding {
    pledges_sum: Option<Amount>,
}

#[derive(Debug, Deserialize)]
struct Amount {
    amount: u64,
}

pub struct Polar {
    client: Client,
    api_url: String,
}

impl Polar {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_base_url(token, POLAR_API_URL)
    }

    pub fn with_base_url(token: &str, api_url: &str) -> Result<Self> {
        Ok(Self {
            client: bearer_client(token, "application/json")?,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SponsorSource for Polar {
    fn platform_name(&self) -> &str {
        "Polar"
    }

    async fn get_sponsors(
        &self,
        _org_members: &OrgMembers,
        _exclude_private: bool,
    ) -> Result<Sponsors> {
        Err(InsidersError::Unsupported {
            feature: "fetching sponsorships from Polar".to_string(),
        })
    }
}

#[async_trait]
impl IssueSource for Polar {
    fn platform_name(&self) -> &str {
        "Polar"
    }

    /// Polar 目前只追蹤 GitHub 上的 issue，標籤由 GitHub 提供
    async fn get_issues(
        &self,
        namespaces: &[String],
        _allow_labels: &BTreeSet<String>,
    ) -> Result<IssueMap> {
        let mut items = Vec::new();
        let mut page = 1usize;
        loop {
            tracing::debug!("Fetching page {} of issues from Polar", page);
            // 不篩選 is_badged，才能同時拿到有無徽章的 issue
            let mut params: Vec<(&str, String)> = namespaces
                .iter()
                .map(|ns| ("external_organization_name", ns.clone()))
                .collect();
            params.push(("sorting", "-created_at".to_string()));
            params.push(("limit", PAGE_LIMIT.to_string()));
            params.push(("page", page.to_string()));

            let response = self
                .client
                .get(format!("{}/v1/issues/", self.api_url))
                .query(&params)
                .send()
                .await?;
            let data: IssuesPage = check_response("Polar", response).await?.json().await?;
            let count = data.items.len();
            items.extend(data.items);
            if count < PAGE_LIMIT {
                break;
            }
            page += 1;
        }

        tracing::debug!("Processing {} issues from Polar", items.len());
        let mut issues = IssueMap::new();
        for item in items.into_iter().filter(|i| i.state == "open") {
            let author = item
                .author
                .map(|a| a.login.strip_suffix("[bot]").unwrap_or(&a.login).to_string())
                .unwrap_or_else(|| "ghost".to_string());
            let repository = format!(
                "{}/{}",
                item.repository.organization.name, item.repository.name
            );
            let pledged = item
                .funding
                .and_then(|f| f.pledges_sum)
                .map(|p| p.amount / 100)
                .unwrap_or(0);
            let issue = Issue {
                repository,
                number: item.number,
                title: item.title,
                created: item.issue_created_at,
                author: Account::new(author, SponsorshipPlatform::Github),
                upvotes: BTreeSet::new(),
                labels: BTreeSet::new(),
                pledged,
                platform: IssuePlatform::Polar,
            };
            issues.insert(issue.key(), issue);
        }
        Ok(issues)
    }
}
