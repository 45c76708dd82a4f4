use httpmock::prelude::*;
use insiders::core::backlog::{get_backlog, render_backlog};
use insiders::domain::ports::{IssueSource, OrgMembers, SponsorSource};
use insiders::domain::sort::SortStrategy;
use insiders::{GitHub, InsidersError, Polar};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

fn github_issue(repo: &str, number: u64, author: &str, upvoters: &[&str], created: &str) -> serde_json::Value {
    json!({
        "number": number,
        "title": format!("Issue {}", number),
        "createdAt": created,
        "author": { "login": author },
        "repository": { "nameWithOwner": repo },
        "labels": { "nodes": [{ "name": "bug" }] },
        "reactions": {
            "nodes": upvoters.iter().map(|u| json!({ "user": { "login": u } })).collect::<Vec<_>>()
        }
    })
}

fn mock_github(server: &MockServer) {
    server.mock(|when, then| {
        when.method(POST)
            .path("/graphql")
            .body_contains("sponsorshipsAsMaintainer");
        then.status(200).json_body(json!({
            "data": { "viewer": { "sponsorshipsAsMaintainer": {
                "pageInfo": { "hasNextPage": false, "endCursor": null },
                "nodes": [{
                    "createdAt": "2024-01-01T00:00:00Z",
                    "isOneTimePayment": false,
                    "privacyLevel": "PUBLIC",
                    "sponsorEntity": { "__typename": "User", "login": "rich" },
                    "tier": { "monthlyPriceInDollars": 100 }
                }, {
                    "createdAt": "2024-01-01T00:00:00Z",
                    "isOneTimePayment": true,
                    "privacyLevel": "PUBLIC",
                    "sponsorEntity": { "__typename": "User", "login": "once" },
                    "tier": { "monthlyPriceInDollars": 1000 }
                }]
            }}}
        }));
    });
    server.mock(|when, then| {
        when.method(POST).path("/graphql").body_contains("search(");
        then.status(200).json_body(json!({
            "data": { "search": {
                "pageInfo": { "hasNextPage": false, "endCursor": null },
                "nodes": [
                    github_issue("pawamoy/griffe", 1, "someone", &[], "2024-03-01T00:00:00Z"),
                    github_issue("pawamoy/griffe", 2, "other", &["rich"], "2024-03-02T00:00:00Z"),
                    github_issue("pawamoy/mkdocstrings", 3, "once", &[], "2024-03-03T00:00:00Z"),
                ]
            }}
        }));
    });
}

fn mock_polar(server: &MockServer) -> httpmock::Mock<'_> {
    server.mock(|when, then| {
        when.method(GET)
            .path("/v1/issues/")
            .query_param("external_organization_name", "pawamoy")
            .query_param("page", "1");
        then.status(200).json_body(json!({
            "items": [{
                "number": 3,
                "title": "Issue 3",
                "state": "open",
                "issue_created_at": "2024-03-03T00:00:00Z",
                "author": { "login": "once" },
                "repository": { "name": "mkdocstrings", "organization": { "name": "pawamoy" } },
                "funding": { "pledges_sum": { "amount": 5000, "currency": "USD" } }
            }, {
                "number": 4,
                "title": "Closed issue",
                "state": "closed",
                "issue_created_at": "2024-03-04T00:00:00Z",
                "author": null,
                "repository": { "name": "griffe", "organization": { "name": "pawamoy" } },
                "funding": null
            }]
        }));
    })
}

#[tokio::test]
async fn test_backlog_ranks_funded_issues_first() {
    let github_server = MockServer::start();
    let polar_server = MockServer::start();
    mock_github(&github_server);
    let polar_mock = mock_polar(&polar_server);

    let github = GitHub::with_base_url("gh-token", &github_server.base_url()).unwrap();
    let polar = Polar::with_base_url("polar-token", &polar_server.base_url()).unwrap();

    let sponsors = github.get_sponsors(&OrgMembers::new(), false).await.unwrap();
    assert_eq!(sponsors.count(), 1);

    let namespaces = vec!["pawamoy".to_string()];
    let mut backlog = get_backlog(
        &namespaces,
        &github,
        Some(&polar as &dyn IssueSource),
        &BTreeSet::new(),
    )
    .await
    .unwrap();
    polar_mock.assert();
    assert_eq!(backlog.issues.len(), 3);

    let strategies = SortStrategy::parse_list("pledge,sponsorships,created").unwrap();
    backlog.sort(&strategies, &sponsors);
    let order: Vec<u64> = backlog.issues.iter().map(|i| i.number).collect();
    assert_eq!(order, vec![3, 2, 1]);
    assert_eq!(backlog.issues[0].pledged, 50);

    let labels = BTreeMap::from([("bug".to_string(), "🐞".to_string())]);
    let rendered = render_backlog(&backlog, &sponsors, &labels, 2, true);
    assert!(rendered.contains("pawamoy/mkdocstrings#3"));
    assert!(rendered.contains("💲50"));
    assert!(rendered.contains("💖100"));
    assert!(rendered.contains("🐞"));
    assert!(!rendered.contains("pawamoy/griffe#1"));
}

#[tokio::test]
async fn test_polar_sponsors_are_unsupported() {
    let polar = Polar::with_base_url("polar-token", "http://127.0.0.1:9").unwrap();
    let error = polar.get_sponsors(&OrgMembers::new(), false).await.unwrap_err();
    assert!(matches!(error, InsidersError::Unsupported { .. }));
}

#[tokio::test]
async fn test_polar_errors_surface_as_api_errors() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/issues/");
        then.status(401).json_body(json!({ "detail": "Invalid token" }));
    });

    let polar = Polar::with_base_url("bad", &server.base_url()).unwrap();
    let error = polar
        .get_issues(&["pawamoy".to_string()], &BTreeSet::new())
        .await
        .unwrap_err();
    assert!(error.to_string().contains("Invalid token"));
}
