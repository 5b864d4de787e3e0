//! Per-module migration tool resolution.
//!
//! Each module may ship a migration list file: one `<version> <url-template>`
//! entry per line, `#` comments, malformed lines skipped with a warning
//! (best-effort parsing, never a hard failure). A module is migrated only
//! when the target version outranks the installed one, and then every tool
//! whose version falls inside the inclusive `[installed, target]` window is
//! selected in ascending order: the sequence of incremental data/schema
//! migrations that bridge the gap.
//!
//! Two legacy rewrite passes run before mirror/arch substitution: a bare
//! version entry expands into the canonical tool-archive URL pattern, and
//! the retired single-domain placeholder is rewritten to the generic mirror
//! placeholder.

use crate::constants::{ARCH_PLACEHOLDER, LEGACY_DOMAIN_PLACEHOLDER, MIRROR_PLACEHOLDER};
use crate::core::OtaError;
use crate::download::DownloadManager;
use crate::release::{Module, Release};
use crate::utils::{expand_url, file_name_from_url};
use crate::version::{self, Version, is_newer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A (version, tool-URL-template) pair scoped to one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationTool {
    /// Version this tool migrates up to.
    pub version: Version,
    /// URL template with `${MIRROR}`/`${ARCH}` placeholders.
    pub url: String,
}

/// Loads migration list files and plans which tools must run.
pub struct MigrationToolResolver {
    list_dir: PathBuf,
}

impl MigrationToolResolver {
    /// Create a resolver reading list files from `list_dir`
    /// (`<list_dir>/<module-short>.list`).
    #[must_use]
    pub const fn new(list_dir: PathBuf) -> Self {
        Self { list_dir }
    }

    /// Load every module's tool chain for a release.
    ///
    /// Modules without a list file get an empty chain; carrying a migration
    /// chain is optional per module.
    pub async fn resolve(
        &self,
        release: &Release,
    ) -> Result<HashMap<String, Vec<MigrationTool>>, OtaError> {
        let mut map = HashMap::new();
        for module in &release.modules {
            map.insert(module.short.clone(), self.load_list(module).await?);
        }
        Ok(map)
    }

    /// Load and parse one module's migration list, sorted ascending.
    ///
    /// A missing file yields an empty chain. Malformed lines (wrong field
    /// count, unparseable version) are logged and skipped.
    pub async fn load_list(&self, module: &Module) -> Result<Vec<MigrationTool>, OtaError> {
        let path = self.list_dir.join(format!("{}.list", module.short));
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(module = module.short, "no migration list for module");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(OtaError::FileSystemError {
                    operation: format!("reading {}", path.display()),
                    source: e,
                });
            }
        };
        Ok(parse_list(&text, module))
    }

    /// Plan the tool sequence bridging `installed` to `target` for one
    /// module.
    ///
    /// Empty unless `target` outranks `installed`; both window endpoints are
    /// inclusive.
    pub async fn plan(
        &self,
        module: &Module,
        installed: &Version,
        target: &Version,
    ) -> Result<Vec<MigrationTool>, OtaError> {
        let tools = self.load_list(module).await?;
        Ok(select_window(&tools, installed, target))
    }

    /// Download every planned tool, trying each of the release's mirrors
    /// per tool until one succeeds.
    ///
    /// Returns the downloaded file paths under `<dest>/<module-short>/`.
    ///
    /// # Errors
    ///
    /// Per-mirror failures are transient and logged; a tool no mirror can
    /// serve fails the operation.
    pub async fn download_all(
        &self,
        manager: &DownloadManager,
        release: &Release,
        plans: &HashMap<String, Vec<MigrationTool>>,
        dest: &Path,
    ) -> Result<Vec<PathBuf>, OtaError> {
        let mut downloaded = Vec::new();
        for (module, tools) in plans {
            let module_dir = dest.join(module);
            tokio::fs::create_dir_all(&module_dir).await?;
            for tool in tools {
                let path = download_tool(manager, release, tool, &module_dir).await?;
                downloaded.push(path);
            }
        }
        info!(count = downloaded.len(), "migration tools downloaded");
        Ok(downloaded)
    }
}

/// Fetch one tool across the release's mirrors, first success wins.
async fn download_tool(
    manager: &DownloadManager,
    release: &Release,
    tool: &MigrationTool,
    module_dir: &Path,
) -> Result<PathBuf, OtaError> {
    for mirror in &release.mirrors {
        let url = expand_url(&tool.url, mirror, manager.arch());
        let file_name = file_name_from_url(&url)?;
        let target = module_dir.join(file_name);
        match manager.download_to(&url, &target).await {
            Ok(()) => return Ok(target),
            Err(e) => {
                warn!(url, error = %e, "migration tool download failed, trying next mirror");
            }
        }
    }
    Err(OtaError::Other(format!(
        "migration tool {} could not be downloaded from any mirror",
        tool.version
    )))
}

/// Parse list text into sorted tools, applying the legacy rewrite passes.
fn parse_list(text: &str, module: &Module) -> Vec<MigrationTool> {
    let mut tools = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        // Old-format lists carry only the version; the URL field defaults to
        // it and pass 1 below expands it to the canonical pattern.
        let (raw_version, raw_url) = match fields.as_slice() {
            [v] => (*v, *v),
            [v, u] => (*v, *u),
            _ => {
                warn!(module = module.short, line, "skipping malformed migration list line");
                continue;
            }
        };
        let Ok(tool_version) = version::normalize(raw_version) else {
            warn!(module = module.short, line, "skipping migration entry with invalid version");
            continue;
        };
        let url = rewrite_url(raw_url, &tool_version, module);
        tools.push(MigrationTool { version: tool_version, url });
    }
    tools.sort_by(|a, b| a.version.cmp(&b.version));
    tools
}

/// The two legacy rewrite passes.
///
/// Pass 1: a bare version string (old lists stored only the version and
/// relied on a hardcoded layout) expands into the canonical tool-archive
/// pattern. Pass 2: the retired download-domain placeholder becomes the
/// generic mirror placeholder.
fn rewrite_url(raw: &str, tool_version: &Version, module: &Module) -> String {
    let expanded = if version::normalize(raw).is_ok() {
        format!(
            "{MIRROR_PLACEHOLDER}/get/{tool_version}/linux-{ARCH_PLACEHOLDER}-{}-migration-{tool_version}.tar.gz",
            module.short
        )
    } else {
        raw.to_string()
    };
    expanded.replace(LEGACY_DOMAIN_PLACEHOLDER, MIRROR_PLACEHOLDER)
}

/// Select the inclusive `[installed, target]` window, ascending.
///
/// Returns an empty plan when `target` does not outrank `installed`.
#[must_use]
pub fn select_window(
    tools: &[MigrationTool],
    installed: &Version,
    target: &Version,
) -> Vec<MigrationTool> {
    if !is_newer(installed, target) {
        return Vec::new();
    }
    tools
        .iter()
        .filter(|t| t.version >= *installed && t.version <= *target)
        .cloned()
        .collect()
}
