use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistKind {
    Sdist,
    Wheel,
}

/// 從檔名解析出的發行檔資訊
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistFile {
    pub filename: String,
    pub project: String,
    pub version: String,
    pub kind: DistKind,
}

fn separator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-_.]+").expect("valid separator regex"))
}

/// PEP 503 名稱正規化：小寫，連續的 `-_.` 換成 `-`
pub fn normalize_name(name: &str) -> String {
    separator_regex()
        .replace_all(name.trim(), "-")
        .to_ascii_lowercase()
}

impl DistFile {
    pub fn parse(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.starts_with('.') {
            return None;
        }

        if let Some(stem) = filename.strip_suffix(".whl") {
            let mut parts = stem.split('-');
            let name = parts.next()?;
            let version = parts.next()?;
            // 至少還要有 python/abi/platform 三段
            if parts.count() < 3 || name.is_empty() || version.is_empty() {
                return None;
            }
            return Some(Self {
                filename: filename.to_string(),
                project: normalize_name(name),
                version: version.to_string(),
                kind: DistKind::Wheel,
            });
        }

        let stem = filename
            .strip_suffix(".tar.gz")
            .or_else(|| filename.strip_suffix(".zip"))?;
        let (name, version) = stem.rsplit_once('-')?;
        if name.is_empty() || version.is_empty() {
            return None;
        }
        Some(Self {
            filename: filename.to_string(),
            project: normalize_name(name),
            version: version.to_string(),
            kind: DistKind::Sdist,
        })
    }
}
