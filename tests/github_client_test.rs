use httpmock::prelude::*;
use insiders::core::sponsors::{eligible_users, sync_team};
use insiders::domain::ports::{IssueSource, OrgMembers, SponsorSource, TeamManager};
use insiders::GitHub;
use serde_json::json;
use std::collections::BTreeSet;

fn sponsorship(login: &str, typename: &str, amount: u64, privacy: &str) -> serde_json::Value {
    json!({
        "createdAt": "2024-01-15T10:00:00Z",
        "isOneTimePayment": false,
        "privacyLevel": privacy,
        "sponsorEntity": {
            "__typename": typename,
            "login": login,
            "avatarUrl": format!("https://avatars.example.com/{}", login),
            "url": format!("https://github.com/{}", login),
        },
        "tier": { "monthlyPriceInDollars": amount },
    })
}

fn sponsors_page(nodes: Vec<serde_json::Value>, next: Option<&str>) -> serde_json::Value {
    json!({
        "data": {
            "viewer": {
                "sponsorshipsAsMaintainer": {
                    "pageInfo": { "hasNextPage": next.is_some(), "endCursor": next },
                    "nodes": nodes,
                }
            }
        }
    })
}

#[tokio::test]
async fn test_sponsors_are_paginated() {
    let server = MockServer::start();
    let first = server.mock(|when, then| {
        when.method(POST)
            .path("/graphql")
            .header("authorization", "Bearer secret")
            .body_contains("sponsorshipsAsMaintainer")
            .body_contains("\"after\":null");
        then.status(200).json_body(sponsors_page(
            vec![
                sponsorship("alice", "User", 50, "PUBLIC"),
                sponsorship("acme", "Organization", 200, "PRIVATE"),
            ],
            Some("cursor1"),
        ));
    });
    let second = server.mock(|when, then| {
        when.method(POST)
            .path("/graphql")
            .body_contains("\"after\":\"cursor1\"");
        then.status(200).json_body(sponsors_page(
            vec![sponsorship("bob", "User", 5, "PUBLIC")],
            None,
        ));
    });

    let github = GitHub::with_base_url("secret", &server.base_url()).unwrap();
    let org_members = OrgMembers::from([(
        "acme".to_string(),
        vec!["carol".to_string(), "dave".to_string()],
    )]);
    let sponsors = github.get_sponsors(&org_members, false).await.unwrap();

    first.assert();
    second.assert();
    assert_eq!(sponsors.count(), 3);
    assert_eq!(sponsors.total(), 255);

    let eligible = eligible_users(&sponsors, 10, &BTreeSet::new(), &BTreeSet::new());
    let expected: BTreeSet<String> = ["alice", "carol", "dave"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(eligible, expected);
}

#[tokio::test]
async fn test_private_sponsors_can_be_excluded() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/graphql");
        then.status(200).json_body(sponsors_page(
            vec![
                sponsorship("alice", "User", 50, "PUBLIC"),
                sponsorship("hidden", "User", 100, "PRIVATE"),
            ],
            None,
        ));
    });

    let github = GitHub::with_base_url("secret", &server.base_url()).unwrap();
    let sponsors = github.get_sponsors(&OrgMembers::new(), true).await.unwrap();
    assert_eq!(sponsors.count(), 1);
    assert_eq!(sponsors.sponsorships[0].account.name, "alice");
}

#[tokio::test]
async fn test_graphql_errors_are_reported() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/graphql");
        then.status(200)
            .json_body(json!({ "data": null, "errors": [{ "message": "Bad credentials" }] }));
    });

    let github = GitHub::with_base_url("secret", &server.base_url()).unwrap();
    let error = github.get_sponsors(&OrgMembers::new(), false).await.unwrap_err();
    assert!(error.to_string().contains("Bad credentials"));
}

#[tokio::test]
async fn test_issues_are_fetched_with_allowed_labels() {
    let server = MockServer::start();
    let search = server.mock(|when, then| {
        when.method(POST)
            .path("/graphql")
            .body_contains("user:pawamoy is:issue is:open");
        then.status(200).json_body(json!({
            "data": {
                "search": {
                    "pageInfo": { "hasNextPage": false, "endCursor": null },
                    "nodes": [
                        {
                            "number": 12,
                            "title": "Support Python 3.13",
                            "createdAt": "2024-02-01T00:00:00Z",
                            "author": { "login": "renovate[bot]" },
                            "repository": { "nameWithOwner": "pawamoy/griffe" },
                            "labels": { "nodes": [{ "name": "feature" }, { "name": "triage" }] },
                            "reactions": { "nodes": [{ "user": { "login": "alice" } }, { "user": null }] }
                        },
                        {}
                    ]
                }
            }
        }));
    });

    let github = GitHub::with_base_url("secret", &server.base_url()).unwrap();
    let labels = BTreeSet::from(["feature".to_string()]);
    let issues = github
        .get_issues(&["pawamoy".to_string()], &labels)
        .await
        .unwrap();

    search.assert();
    assert_eq!(issues.len(), 1);
    let issue = &issues[&("pawamoy/griffe".to_string(), 12)];
    assert_eq!(issue.author.name, "renovate");
    assert_eq!(issue.labels, BTreeSet::from(["feature".to_string()]));
    assert_eq!(issue.upvotes.len(), 1);
}

#[tokio::test]
async fn test_team_members_and_invitations() {
    let server = MockServer::start();
    let members = server.mock(|when, then| {
        when.method(GET)
            .path("/orgs/acme/teams/insiders/members")
            .query_param("per_page", "100")
            .query_param("page", "1");
        then.status(200)
            .json_body(json!([{ "login": "alice" }, { "login": "bob" }]));
    });
    let invitations = server.mock(|when, then| {
        when.method(GET).path("/orgs/acme/teams/insiders/invitations");
        then.status(200)
            .json_body(json!([{ "login": "carol" }, { "login": null, "email": "x@example.com" }]));
    });

    let github = GitHub::with_base_url("secret", &server.base_url()).unwrap();
    let found = github.team_members("acme", "insiders").await.unwrap();
    let invited = github.team_invitations("acme", "insiders").await.unwrap();

    members.assert();
    invitations.assert();
    assert_eq!(found.len(), 2);
    assert_eq!(invited, BTreeSet::from(["carol".to_string()]));
}

#[tokio::test]
async fn test_sync_team_grants_and_revokes() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/orgs/acme/teams/insiders/members");
        then.status(200)
            .json_body(json!([{ "login": "alice" }, { "login": "former" }, { "login": "stuck" }]));
    });
    server.mock(|when, then| {
        when.method(GET).path("/orgs/acme/teams/insiders/invitations");
        then.status(200).json_body(json!([]));
    });
    let grant = server.mock(|when, then| {
        when.method(PUT).path("/orgs/acme/teams/insiders/memberships/newcomer");
        then.status(200).json_body(json!({ "state": "pending" }));
    });
    let revoke = server.mock(|when, then| {
        when.method(DELETE).path("/orgs/acme/teams/insiders/memberships/former");
        then.status(204);
    });
    let failing = server.mock(|when, then| {
        when.method(DELETE).path("/orgs/acme/teams/insiders/memberships/stuck");
        then.status(403).json_body(json!({
            "message": "Must have admin rights",
            "documentation_url": "https://docs.github.com/rest"
        }));
    });

    let github = GitHub::with_base_url("secret", &server.base_url()).unwrap();
    let eligible: BTreeSet<String> = ["alice", "newcomer"].into_iter().map(String::from).collect();
    let report = sync_team(&github, "acme", "insiders", &eligible).await.unwrap();

    grant.assert();
    revoke.assert();
    failing.assert();
    assert_eq!(report.granted, vec!["newcomer"]);
    assert_eq!(report.revoked, vec!["former"]);
    assert_eq!(report.failed, vec!["stuck"]);
}

#[tokio::test]
async fn test_repository_exists() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/repos/pawamoy/griffe");
        then.status(200).json_body(json!({ "full_name": "pawamoy/griffe" }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/repos/pawamoy/missing");
        then.status(404).json_body(json!({ "message": "Not Found" }));
    });

    let github = GitHub::with_base_url("secret", &server.base_url()).unwrap();
    assert!(github.repository_exists("pawamoy", "griffe").await.unwrap());
    assert!(!github.repository_exists("pawamoy", "missing").await.unwrap());
}
