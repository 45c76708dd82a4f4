use crate::adapters::http::{bearer_client, check_response};
use crate::domain::model::{
    Account, Issue, IssueMap, IssuePlatform, Sponsors, Sponsorship, SponsorshipPlatform,
};
use crate::domain::ports::{IssueSource, OrgMembers, SponsorSource, TeamManager};
use crate::utils::error::{InsidersError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;

pub const GITHUB_API_URL: &str = "https://api.github.com";
const PER_PAGE: usize = 100;

const SPONSORS_QUERY: &str = r#"
query($after: String) {
  viewer {
    sponsorshipsAsMaintainer(
      first: 100,
      after: $after,
      includePrivate: true,
      orderBy: {field: CREATED_AT, direction: DESC}
    ) {
      pageInfo { hasNextPage endCursor }
      nodes {
        createdAt
        isOneTimePayment
        privacyLevel
        sponsorEntity {
          ... on Actor { __typename login avatarUrl url }
        }
        tier { monthlyPriceInDollars }
      }
    }
  }
}
"#;

const ISSUES_QUERY: &str = r#"
query($query: String!, $after: String) {
  search(query: $query, type: ISSUE, first: 100, after: $after) {
    pageInfo { hasNextPage endCursor }
    nodes {
      ... on Issue {
        number
        title
        createdAt
        author { login }
        repository { nameWithOwner }
        labels(first: 20) { nodes { name } }
        reactions(content: THUMBS_UP, first: 100) { nodes { user { login } } }
      }
    }
  }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Connection<T> {
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SponsorsData {
    viewer: Viewer,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Viewer {
    sponsorships_as_maintainer: Connection<SponsorshipNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SponsorshipNode {
    created_at: DateTime<Utc>,
    is_one_time_payment: bool,
    privacy_level: String,
    sponsor_entity: Option<SponsorEntity>,
    tier: Option<Tier>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SponsorEntity {
    #[serde(rename = "__typename")]
    typename: String,
    login: String,
    avatar_url: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Tier {
    monthly_price_in_dollars: u64,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    search: Connection<IssueNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueNode {
    number: Option<u64>,
    title: Option<String>,
    created_at: Option<DateTime<Utc>>,
    author: Option<Login>,
    repository: Option<Repository>,
    labels: Option<Nodes<Label>>,
    reactions: Option<Nodes<Reaction>>,
}

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Login {
    login: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Repository {
    name_with_owner: String,
}

#[derive(Debug, Deserialize)]
struct Label {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Reaction {
    user: Option<Login>,
}

#[derive(Debug, Deserialize)]
struct Invitation {
    login: Option<String>,
}

fn normalize_login(login: &str) -> String {
    login.strip_suffix("[bot]").unwrap_or(login).to_string()
}

pub struct GitHub {
    client: Client,
    api_url: String,
}

impl GitHub {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_base_url(token, GITHUB_API_URL)
    }

    pub fn with_base_url(token: &str, api_url: &str) -> Result<Self> {
        Ok(Self {
            client: bearer_client(token, "application/vnd.github+json")?,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T> {
        let response = self
            .client
            .post(format!("{}/graphql", self.api_url))
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;
        let response: GraphQlResponse<T> = check_response("GitHub", response).await?.json().await?;
        if !response.errors.is_empty() {
            let messages: Vec<String> = response.errors.into_iter().map(|e| e.message).collect();
            return Err(InsidersError::api("GitHub", messages.join("; ")));
        }
        response
            .data
            .ok_or_else(|| InsidersError::api("GitHub", "GraphQL response has no data"))
    }

    /// 以 per_page/page 分頁取得 REST 清單
    async fn paginate<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut page = 1;
        let mut items = Vec::new();
        loop {
            let response = self
                .client
                .get(format!("{}{}", self.api_url, path))
                .query(&[("per_page", PER_PAGE), ("page", page)])
                .send()
                .await?;
            let batch: Vec<T> = check_response("GitHub", response).await?.json().await?;
            let count = batch.len();
            items.extend(batch);
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    async fn log_membership_failure(
        action: &str,
        user: &str,
        org: &str,
        team: &str,
        response: reqwest::Response,
    ) {
        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        tracing::error!(
            "Couldn't {} @{} {} {}/{} team: HTTP {}",
            action,
            user,
            if action == "add" { "to" } else { "from" },
            org,
            team,
            status
        );
        if let (Some(message), Some(docs)) = (
            body.get("message").and_then(|v| v.as_str()),
            body.get("documentation_url").and_then(|v| v.as_str()),
        ) {
            tracing::error!("{} See {}", message, docs);
        }
    }

    pub async fn authenticated_user(&self) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/user", self.api_url))
            .send()
            .await?;
        let user: Login = check_response("GitHub", response).await?.json().await?;
        Ok(user.login)
    }

    pub async fn repository_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/repos/{}/{}", self.api_url, namespace, name))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_response("GitHub", response).await?;
        Ok(true)
    }

    /// 在使用者或組織底下建立儲存庫
    pub async fn create_repository(
        &self,
        namespace: &str,
        name: &str,
        description: &str,
        private: bool,
    ) -> Result<()> {
        let path = if self.authenticated_user().await? == namespace {
            "/user/repos".to_string()
        } else {
            format!("/orgs/{}/repos", namespace)
        };
        let response = self
            .client
            .post(format!("{}{}", self.api_url, path))
            .json(&json!({
                "name": name,
                "description": description,
                "private": private,
            }))
            .send()
            .await?;
        check_response("GitHub", response).await?;
        tracing::info!("Created repository {}/{} (private: {})", namespace, name, private);
        Ok(())
    }
}

#[async_trait]
impl SponsorSource for GitHub {
    fn platform_name(&self) -> &str {
        "GitHub"
    }

    async fn get_sponsors(
        &self,
        org_members: &OrgMembers,
        exclude_private: bool,
    ) -> Result<Sponsors> {
        let mut sponsorships = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let data: SponsorsData = self
                .graphql(SPONSORS_QUERY, json!({ "after": cursor }))
                .await?;
            let connection = data.viewer.sponsorships_as_maintainer;
            tracing::debug!("Fetched {} sponsorships from GitHub", connection.nodes.len());

            for node in connection.nodes {
                if node.is_one_time_payment {
                    continue;
                }
                let Some(entity) = node.sponsor_entity else {
                    continue;
                };
                let private = node.privacy_level.eq_ignore_ascii_case("private");
                if private && exclude_private {
                    continue;
                }
                let account = Account::with_details(
                    entity.login,
                    SponsorshipPlatform::Github,
                    entity.typename.eq_ignore_ascii_case("organization"),
                    entity.avatar_url,
                    entity.url,
                );
                let amount = node.tier.map(|t| t.monthly_price_in_dollars).unwrap_or(0);
                sponsorships.push(Sponsorship::new(
                    account,
                    amount,
                    node.created_at,
                    private,
                    org_members,
                ));
            }

            match connection.page_info {
                PageInfo {
                    has_next_page: true,
                    end_cursor: Some(end),
                } => cursor = Some(end),
                _ => break,
            }
        }
        Ok(Sponsors::new(sponsorships))
    }
}

#[async_trait]
impl IssueSource for GitHub {
    fn platform_name(&self) -> &str {
        "GitHub"
    }

    async fn get_issues(
        &self,
        namespaces: &[String],
        allow_labels: &BTreeSet<String>,
    ) -> Result<IssueMap> {
        let users: Vec<String> = namespaces.iter().map(|ns| format!("user:{}", ns)).collect();
        let query = format!("{} is:issue is:open sort:created-desc", users.join(" "));

        let mut issues = IssueMap::new();
        let mut cursor: Option<String> = None;
        loop {
            let data: SearchData = self
                .graphql(ISSUES_QUERY, json!({ "query": query, "after": cursor }))
                .await?;
            let connection = data.search;

            for node in connection.nodes {
                let (Some(number), Some(title), Some(created), Some(repository)) =
                    (node.number, node.title, node.created_at, node.repository)
                else {
                    continue;
                };
                let author = node
                    .author
                    .map(|a| normalize_login(&a.login))
                    .unwrap_or_else(|| "ghost".to_string());
                let labels = node
                    .labels
                    .map(|l| l.nodes)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|l| l.name)
                    .filter(|name| allow_labels.is_empty() || allow_labels.contains(name))
                    .collect();
                let upvotes = node
                    .reactions
                    .map(|r| r.nodes)
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|r| r.user)
                    .map(|u| Account::new(normalize_login(&u.login), SponsorshipPlatform::Github))
                    .collect();

                let issue = Issue {
                    repository: repository.name_with_owner,
                    number,
                    title,
                    created,
                    author: Account::new(author, SponsorshipPlatform::Github),
                    upvotes,
                    labels,
                    pledged: 0,
                    platform: IssuePlatform::Github,
                };
                issues.insert(issue.key(), issue);
            }

            match connection.page_info {
                PageInfo {
                    has_next_page: true,
                    end_cursor: Some(end),
                } => cursor = Some(end),
                _ => break,
            }
        }
        Ok(issues)
    }
}

#[async_trait]
impl TeamManager for GitHub {
    async fn team_members(&self, org: &str, team: &str) -> Result<BTreeSet<String>> {
        let members: Vec<Login> = self
            .paginate(&format!("/orgs/{}/teams/{}/members", org, team))
            .await?;
        Ok(members.into_iter().map(|m| m.login).collect())
    }

    async fn team_invitations(&self, org: &str, team: &str) -> Result<BTreeSet<String>> {
        let invitations: Vec<Invitation> = self
            .paginate(&format!("/orgs/{}/teams/{}/invitations", org, team))
            .await?;
        Ok(invitations.into_iter().filter_map(|i| i.login).collect())
    }

    async fn grant_access(&self, user: &str, org: &str, team: &str) -> bool {
        let url = format!(
            "{}/orgs/{}/teams/{}/memberships/{}",
            self.api_url, org, team, user
        );
        match self.client.put(url).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!("@{} added to {}/{} team", user, org, team);
                true
            }
            Ok(response) => {
                Self::log_membership_failure("add", user, org, team, response).await;
                false
            }
            Err(e) => {
                tracing::error!("Couldn't add @{} to {}/{} team: {}", user, org, team, e);
                false
            }
        }
    }

    async fn revoke_access(&self, user: &str, org: &str, team: &str) -> bool {
        let url = format!(
            "{}/orgs/{}/teams/{}/memberships/{}",
            self.api_url, org, team, user
        );
        match self.client.delete(url).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!("@{} removed from {}/{} team", user, org, team);
                true
            }
            Ok(response) => {
                Self::log_membership_failure("remove", user, org, team, response).await;
                false
            }
            Err(e) => {
                tracing::error!("Couldn't remove @{} from {}/{} team: {}", user, org, team, e);
                false
            }
        }
    }
}
