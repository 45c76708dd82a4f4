//! Backlog collection and rendering.

use crate::domain::model::{Backlog, Sponsors};
use crate::domain::ports::IssueSource;
use crate::utils::error::Result;
use crate::utils::table::Table;
use std::collections::{BTreeMap, BTreeSet};

/// 取得 GitHub 的 issue，若有 Polar 則帶入其承諾金額
pub async fn get_backlog(
    namespaces: &[String],
    github: &dyn IssueSource,
    polar: Option<&dyn IssueSource>,
    issue_labels: &BTreeSet<String>,
) -> Result<Backlog> {
    let mut issues = github.get_issues(namespaces, issue_labels).await?;
    tracing::debug!("Got {} issues from {}", issues.len(), github.platform_name());

    if let Some(polar) = polar {
        let polar_issues = polar.get_issues(namespaces, issue_labels).await?;
        tracing::debug!("Got {} issues from {}", polar_issues.len(), polar.platform_name());
        for (key, issue) in issues.iter_mut() {
            if let Some(polar_issue) = polar_issues.get(key) {
                if !polar_issue.upvotes.is_empty() || polar_issue.pledged > 0 {
                    issue.pledged = polar_issue.pledged;
                }
            }
        }
    }

    Ok(Backlog::new(issues.into_values().collect()))
}

/// 標籤依 `issue-labels` 對照表顯示，沒有對照的標籤不顯示
pub fn render_backlog(
    backlog: &Backlog,
    sponsors: &Sponsors,
    issue_labels: &BTreeMap<String, String>,
    limit: usize,
    pledges: bool,
) -> String {
    let mut headers = vec!["Issue", "Author", "Labels", "Funding"];
    if pledges {
        headers.push("Pledged");
    }
    headers.extend(["Upvotes", "Title"]);
    let mut table = Table::new(headers).with_title("Backlog");

    let count = if limit == 0 { backlog.issues.len() } else { limit };
    for issue in backlog.issues.iter().take(count) {
        let labels: String = issue
            .labels
            .iter()
            .filter_map(|label| issue_labels.get(label))
            .map(String::as_str)
            .collect();
        let mut row = vec![
            format!("{}#{}", issue.repository, issue.number),
            issue.author.name.clone(),
            labels,
            format!("💖{}", issue.funding(sponsors)),
        ];
        if pledges {
            row.push(format!("💲{}", issue.pledged));
        }
        row.push(format!("👍{}", issue.upvotes.len()));
        row.push(issue.title.clone());
        table.add_row(row);
    }
    table.render()
}
