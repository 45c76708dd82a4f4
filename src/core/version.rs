//! Python package versions, ordered the way installers order them.

use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PreKind {
    Alpha,
    Beta,
    Rc,
}

/// 本地版本標籤的一段：數字段一律大於文字段
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum LocalSegment {
    Text(String),
    Number(u64),
}

fn parse_local(label: &str) -> Vec<LocalSegment> {
    label
        .split(['-', '_', '.'])
        .map(|part| match part.parse::<u64>() {
            Ok(n) => LocalSegment::Number(n),
            Err(_) => LocalSegment::Text(part.to_ascii_lowercase()),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct PyVersion {
    epoch: u64,
    release: Vec<u64>,
    pre: Option<(PreKind, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
    local: Option<Vec<LocalSegment>>,
    original: String,
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?ix)^\s*v?
            (?:(?P<epoch>\d+)!)?
            (?P<release>\d+(?:\.\d+)*)
            (?:[-_.]?(?P<pre_l>a|alpha|b|beta|c|rc|pre|preview)[-_.]?(?P<pre_n>\d+)?)?
            (?P<post>(?:-(?P<post_n1>\d+))|(?:[-_.]?(?:post|rev|r)[-_.]?(?P<post_n2>\d+)?))?
            (?P<dev>[-_.]?dev[-_.]?(?P<dev_n>\d+)?)?
            (?:\+(?P<local>[a-z0-9]+(?:[-_.][a-z0-9]+)*))?
            \s*$",
        )
        .expect("valid version regex")
    })
}

impl PyVersion {
    pub fn parse(input: &str) -> Option<Self> {
        let caps = version_regex().captures(input)?;
        let number = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<u64>().ok());

        let release = caps
            .name("release")?
            .as_str()
            .split('.')
            .map(|p| p.parse::<u64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .ok()?;

        let pre = caps.name("pre_l").map(|l| {
            let kind = match l.as_str().to_ascii_lowercase().as_str() {
                "a" | "alpha" => PreKind::Alpha,
                "b" | "beta" => PreKind::Beta,
                _ => PreKind::Rc,
            };
            (kind, number("pre_n").unwrap_or(0))
        });

        let post = caps
            .name("post")
            .map(|_| number("post_n1").or_else(|| number("post_n2")).unwrap_or(0));
        let dev = caps.name("dev").map(|_| number("dev_n").unwrap_or(0));

        Some(Self {
            epoch: number("epoch").unwrap_or(0),
            release,
            pre,
            post,
            dev,
            local: caps.name("local").map(|m| parse_local(m.as_str())),
            original: input.trim().to_string(),
        })
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    fn release_cmp(&self, other: &Self) -> Ordering {
        // 尾端的 0 不影響比較：1.0 == 1.0.0
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            let a = self.release.get(i).copied().unwrap_or(0);
            let b = other.release.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }

    /// dev-only 版本排在 pre-release 之前
    fn pre_key(&self) -> (i8, Option<(PreKind, u64)>) {
        match (self.pre, self.post, self.dev) {
            (None, None, Some(_)) => (-1, None),
            (Some(pre), _, _) => (0, Some(pre)),
            (None, _, _) => (1, None),
        }
    }

    fn post_key(&self) -> i128 {
        self.post.map(|p| p as i128).unwrap_or(-1)
    }

    fn dev_key(&self) -> i128 {
        self.dev.map(|d| d as i128).unwrap_or(i128::MAX)
    }
}

impl PartialEq for PyVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PyVersion {}

impl PartialOrd for PyVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PyVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| self.release_cmp(other))
            .then_with(|| self.pre_key().cmp(&other.pre_key()))
            .then_with(|| self.post_key().cmp(&other.post_key()))
            .then_with(|| self.dev_key().cmp(&other.dev_key()))
            .then_with(|| self.local.cmp(&other.local))
    }
}

impl fmt::Display for PyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

/// 去掉開頭的 `v`，並把 `+`、`-` 換成 `.`，方便比對 tag 與索引上的版本
pub fn normalize_tag(version: &str) -> String {
    let version = version.strip_prefix('v').unwrap_or(version);
    version.replace(['+', '-'], ".")
}
