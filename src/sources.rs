use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A token document read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSource {
    pub path: PathBuf,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SourceError {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverOptions {
    pub respect_gitignore: bool,
    pub include_node_modules: bool,
    pub include_lock_files: bool,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_node_modules: false,
            include_lock_files: false,
        }
    }
}

pub fn discover(
    patterns: &[String],
    ignore_patterns: &[String],
) -> Result<Vec<PathBuf>, SourceError> {
    discover_with_options(patterns, ignore_patterns, &DiscoverOptions::default())
}

/// Resolves paths, directories and glob patterns to token files.
///
/// Plain file paths are taken as given. Directories expand to the JSON files
/// beneath them. The result is sorted by path and free of duplicates so that
/// merging several documents is deterministic.
pub fn discover_with_options(
    patterns: &[String],
    ignore_patterns: &[String],
    options: &DiscoverOptions,
) -> Result<Vec<PathBuf>, SourceError> {
    if patterns.is_empty() {
        return Err(SourceError {
            message: "at least one token file or glob pattern is required".to_string(),
        });
    }

    let ignore_set = build_globset(ignore_patterns)?;
    let mut paths = BTreeSet::new();

    for pattern in patterns {
        if !has_glob_meta(pattern) && Path::new(pattern).is_file() {
            let path = PathBuf::from(pattern);
            if !is_ignored(&path, &ignore_set) {
                paths.insert(path);
            }
            continue;
        }

        let expanded = if !has_glob_meta(pattern) && Path::new(pattern).is_dir() {
            format!("{}/**/*.json", pattern.trim_end_matches(['/', '\\']))
        } else {
            pattern.clone()
        };
        let matcher = build_globset(std::slice::from_ref(&expanded))?;
        let root = glob_root(&expanded);

        let mut builder = WalkBuilder::new(&root);
        builder
            .hidden(false)
            .git_ignore(options.respect_gitignore)
            .git_global(options.respect_gitignore)
            .git_exclude(options.respect_gitignore);

        for entry in builder.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(_) => continue,
            };
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            let relative_path = path.strip_prefix(".").unwrap_or(path);
            if !matcher.is_match(path) && !matcher.is_match(relative_path) {
                continue;
            }
            if is_ignored(path, &ignore_set) || should_skip_file(path, options) {
                continue;
            }
            paths.insert(relative_path.to_path_buf());
        }
    }

    if paths.is_empty() {
        return Err(SourceError {
            message: format!("no token files matched: {}", patterns.join(", ")),
        });
    }

    Ok(paths.into_iter().collect())
}

pub fn read_sources(paths: &[PathBuf]) -> Result<Vec<TokenSource>, SourceError> {
    paths
        .iter()
        .map(|path| {
            let text = fs::read_to_string(path).map_err(|err| SourceError {
                message: format!("failed to read token file {}: {}", path.display(), err),
            })?;
            Ok(TokenSource {
                path: path.clone(),
                text,
            })
        })
        .collect()
}

/// Directory that contains every match of `pattern`.
pub fn glob_root(pattern: &str) -> PathBuf {
    let Some(first_meta) = pattern.find(['*', '?', '[', '{']) else {
        if pattern.ends_with('/') || pattern.ends_with('\\') {
            return PathBuf::from(pattern);
        }
        let path = Path::new(pattern);
        if path.extension().is_some() {
            return match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
        }
        return path.to_path_buf();
    };

    let trimmed = pattern[..first_meta].trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        return if pattern.starts_with('/') {
            PathBuf::from("/")
        } else {
            PathBuf::from(".")
        };
    }
    if pattern[..first_meta].ends_with(['/', '\\']) {
        return PathBuf::from(trimmed);
    }
    match trimmed.rfind(['/', '\\']) {
        Some(0) => PathBuf::from("/"),
        Some(idx) => PathBuf::from(&trimmed[..idx]),
        None => PathBuf::from("."),
    }
}

pub(crate) fn build_globset(patterns: &[String]) -> Result<GlobSet, SourceError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|err| SourceError {
            message: format!("invalid glob pattern '{}': {}", pattern, err),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|err| SourceError {
        message: format!("failed to build glob set: {}", err),
    })
}

fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

fn is_ignored(path: &Path, ignore_set: &GlobSet) -> bool {
    let relative_path = path.strip_prefix(".").unwrap_or(path);
    ignore_set.is_match(path) || ignore_set.is_match(relative_path)
}

fn should_skip_file(path: &Path, options: &DiscoverOptions) -> bool {
    if !options.include_node_modules
        && path
            .components()
            .any(|component| component.as_os_str() == "node_modules")
    {
        return true;
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("");
    !options.include_lock_files && is_json_lock_file(file_name)
}

fn is_json_lock_file(file_name: &str) -> bool {
    matches!(file_name, "package-lock.json" | "npm-shrinkwrap.json")
}
