//! Backlog sort strategies.
//!
//! A strategy turns an issue into an integer key. Keys are compared in
//! ascending order, so "reverse" strategies negate their value to put the
//! biggest numbers first.

use crate::domain::model::{Issue, Sponsors};
use crate::utils::error::{InsidersError, Result};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq)]
pub enum SortKind {
    MinAuthorSponsorships(u64),
    AuthorSponsorships,
    MinUpvotersSponsorships(u64),
    UpvotersSponsorships,
    MinSponsorships(u64),
    Sponsorships,
    MinPledge(u64),
    Pledge,
    MinUpvotes(u64),
    Upvotes,
    Created,
    Label(String),
    Repository(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortStrategy {
    pub kind: SortKind,
    pub reverse: bool,
}

fn threshold(value: u64, minimum: u64) -> u64 {
    if value >= minimum {
        value
    } else {
        0
    }
}

impl SortStrategy {
    pub fn new(kind: SortKind) -> Self {
        // 只有 created 預設為遞增（舊的在前）
        let reverse = !matches!(kind, SortKind::Created);
        Self { kind, reverse }
    }

    pub fn reversed(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    fn raw_value(&self, issue: &Issue, sponsors: &Sponsors) -> i64 {
        let upvoters_sum = || -> u64 {
            issue
                .upvotes
                .iter()
                .map(|u| sponsors.tier_sum(&u.name))
                .sum()
        };
        let value = match &self.kind {
            SortKind::MinAuthorSponsorships(min) => {
                threshold(sponsors.tier_sum(&issue.author.name), *min)
            }
            SortKind::AuthorSponsorships => sponsors.tier_sum(&issue.author.name),
            SortKind::MinUpvotersSponsorships(min) => threshold(upvoters_sum(), *min),
            SortKind::UpvotersSponsorships => upvoters_sum(),
            SortKind::MinSponsorships(min) => threshold(issue.funding(sponsors), *min),
            SortKind::Sponsorships => issue.funding(sponsors),
            SortKind::MinPledge(min) => threshold(issue.pledged, *min),
            SortKind::Pledge => issue.pledged,
            SortKind::MinUpvotes(min) => threshold(issue.upvotes.len() as u64, *min),
            SortKind::Upvotes => issue.upvotes.len() as u64,
            SortKind::Created => return issue.created.timestamp(),
            SortKind::Label(name) => issue.labels.contains(name) as u64,
            SortKind::Repository(pattern) => fnmatch(&issue.repository, pattern) as u64,
        };
        i64::try_from(value).unwrap_or(i64::MAX)
    }

    pub fn key(&self, issue: &Issue, sponsors: &Sponsors) -> i64 {
        let value = self.raw_value(issue, sponsors);
        if self.reverse {
            -value
        } else {
            value
        }
    }

    /// 解析逗號分隔的策略清單，括號內的逗號不切割
    pub fn parse_list(input: &str) -> Result<Vec<SortStrategy>> {
        let mut items = Vec::new();
        let mut depth = 0usize;
        let mut current = String::new();
        for c in input.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    items.push(std::mem::take(&mut current));
                    continue;
                }
                _ => {}
            }
            current.push(c);
        }
        items.push(current);
        items
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

fn strategy_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([a-z_]+)\s*(?:\((.*)\))?\s*$").expect("valid strategy regex")
    })
}

fn invalid(value: &str, reason: impl Into<String>) -> InsidersError {
    InsidersError::InvalidConfigValueError {
        field: "backlog.sort".to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

impl FromStr for SortStrategy {
    type Err = InsidersError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = strategy_regex()
            .captures(s)
            .ok_or_else(|| invalid(s, "Expected NAME or NAME(ARGS)"))?;
        let name = &caps[1];

        let mut positional: Vec<String> = Vec::new();
        let mut reverse: Option<bool> = None;
        if let Some(args) = caps.get(2) {
            for arg in args.as_str().split(',').map(str::trim).filter(|a| !a.is_empty()) {
                match arg.split_once('=') {
                    Some((key, value)) if key.trim() == "reverse" => {
                        let value = value.trim().to_ascii_lowercase();
                        reverse = Some(match value.as_str() {
                            "true" => true,
                            "false" => false,
                            _ => return Err(invalid(s, "reverse must be true or false")),
                        });
                    }
                    Some((key, _)) => {
                        return Err(invalid(s, format!("Unknown argument '{}'", key.trim())))
                    }
                    None => positional.push(arg.trim_matches(|c| c == '"' || c == '\'').to_string()),
                }
            }
        }

        let amount = |positional: &[String]| -> Result<u64> {
            match positional {
                [value] => value
                    .parse()
                    .map_err(|_| invalid(s, format!("'{}' is not a valid amount", value))),
                _ => Err(invalid(s, format!("{} expects exactly one amount", name))),
            }
        };
        let text = |positional: &[String]| -> Result<String> {
            match positional {
                [value] => Ok(value.clone()),
                _ => Err(invalid(s, format!("{} expects exactly one argument", name))),
            }
        };
        let none = |positional: &[String]| -> Result<()> {
            if positional.is_empty() {
                Ok(())
            } else {
                Err(invalid(s, format!("{} takes no argument", name)))
            }
        };

        let kind = match name {
            "min_author_sponsorships" => SortKind::MinAuthorSponsorships(amount(&positional)?),
            "author_sponsorships" => none(&positional).map(|_| SortKind::AuthorSponsorships)?,
            "min_upvoters_sponsorships" => {
                SortKind::MinUpvotersSponsorships(amount(&positional)?)
            }
            "upvoters_sponsorships" => {
                none(&positional).map(|_| SortKind::UpvotersSponsorships)?
            }
            "min_sponsorships" => SortKind::MinSponsorships(amount(&positional)?),
            "sponsorships" => none(&positional).map(|_| SortKind::Sponsorships)?,
            "min_pledge" => SortKind::MinPledge(amount(&positional)?),
            "pledge" => none(&positional).map(|_| SortKind::Pledge)?,
            "min_upvotes" => SortKind::MinUpvotes(amount(&positional)?),
            "upvotes" => none(&positional).map(|_| SortKind::Upvotes)?,
            "created" => none(&positional).map(|_| SortKind::Created)?,
            "label" => SortKind::Label(text(&positional)?),
            "repository" => SortKind::Repository(text(&positional)?),
            other => return Err(invalid(s, format!("Unknown sort strategy '{}'", other))),
        };

        let strategy = SortStrategy::new(kind);
        Ok(match reverse {
            Some(reverse) => strategy.reversed(reverse),
            None => strategy,
        })
    }
}

impl fmt::Display for SortStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, arg) = match &self.kind {
            SortKind::MinAuthorSponsorships(v) => ("min_author_sponsorships", Some(v.to_string())),
            SortKind::AuthorSponsorships => ("author_sponsorships", None),
            SortKind::MinUpvotersSponsorships(v) => {
                ("min_upvoters_sponsorships", Some(v.to_string()))
            }
            SortKind::UpvotersSponsorships => ("upvoters_sponsorships", None),
            SortKind::MinSponsorships(v) => ("min_sponsorships", Some(v.to_string())),
            SortKind::Sponsorships => ("sponsorships", None),
            SortKind::MinPledge(v) => ("min_pledge", Some(v.to_string())),
            SortKind::Pledge => ("pledge", None),
            SortKind::MinUpvotes(v) => ("min_upvotes", Some(v.to_string())),
            SortKind::Upvotes => ("upvotes", None),
            SortKind::Created => ("created", None),
            SortKind::Label(v) => ("label", Some(v.clone())),
            SortKind::Repository(v) => ("repository", Some(v.clone())),
        };
        let default_reverse = SortStrategy::new(self.kind.clone()).reverse;
        let mut args: Vec<String> = arg.into_iter().collect();
        if self.reverse != default_reverse {
            args.push(format!("reverse={}", self.reverse));
        }
        if args.is_empty() {
            write!(f, "{}", name)
        } else {
            write!(f, "{}({})", name, args.join(", "))
        }
    }
}

/// Shell 風格的萬用字元比對（`*`、`?`、`[...]`）
pub fn fnmatch(text: &str, pattern: &str) -> bool {
    let mut regex = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == ']' {
                        closed = true;
                        break;
                    }
                    class.push(next);
                }
                if closed {
                    regex.push('[');
                    if let Some(rest) = class.strip_prefix('!') {
                        regex.push('^');
                        regex.push_str(&rest.replace('\\', "\\\\"));
                    } else {
                        regex.push_str(&class.replace('\\', "\\\\"));
                    }
                    regex.push(']');
                } else {
                    regex.push_str(&regex::escape(&format!("[{}", class)));
                }
            }
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    Regex::new(&regex).map(|re| re.is_match(text)).unwrap_or(false)
}
