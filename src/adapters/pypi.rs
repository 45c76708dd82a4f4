use crate::adapters::git::build_distributions;
use crate::utils::error::{InsidersError, Result};
use crate::utils::process::run;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct BuildSystem<'a> {
    requires: [&'a str; 1],
    build_backend: &'a str,
}

#[derive(Serialize)]
struct Author<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct Project<'a> {
    name: &'a str,
    version: &'a str,
    description: &'a str,
    readme: &'a str,
    authors: [Author<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct PyProject<'a> {
    build_system: BuildSystem<'a>,
    project: Project<'a>,
}

fn pyproject(username: &str, name: &str, description: &str) -> Result<String> {
    let document = PyProject {
        build_system: BuildSystem {
            requires: ["setuptools>=61"],
            build_backend: "setuptools.build_meta",
        },
        project: Project {
            name,
            version: "0.0.0",
            description,
            readme: "README.md",
            authors: [Author { name: username }],
        },
    };
    toml::to_string(&document)
        .map_err(|e| InsidersError::processing(format!("Failed to write pyproject.toml: {}", e)))
}

/// 在暫存目錄產生 0.0.0 版的空專案
pub fn write_placeholder_project(
    dir: &Path,
    username: &str,
    name: &str,
    description: &str,
) -> Result<()> {
    let module = name.replace(['-', '.'], "_").to_lowercase();
    std::fs::write(dir.join("pyproject.toml"), pyproject(username, name, description)?)?;
    std::fs::write(dir.join("README.md"), format!("# {}\n\n{}\n", name, description))?;
    let package = dir.join("src").join(module);
    std::fs::create_dir_all(&package)?;
    std::fs::write(package.join("__init__.py"), "")?;
    Ok(())
}

/// 建置 0.0.0 版並用 twine 上傳到 PyPI 以保留名稱
pub async fn reserve_pypi(
    username: &str,
    name: &str,
    description: &str,
    build_command: &[String],
) -> Result<()> {
    let temp = tempfile::Builder::new().prefix("insiders-pypi-").tempdir()?;
    write_placeholder_project(temp.path(), username, name, description)?;
    let dists = build_distributions(temp.path(), build_command).await?;

    let mut args = vec!["upload".to_string()];
    args.extend(dists.iter().map(|d| d.to_string_lossy().into_owned()));
    run("twine", &args, Some(temp.path())).await?;
    tracing::info!("✅ Reserved {} on PyPI", name);
    Ok(())
}
