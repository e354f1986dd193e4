// anvil-server/src/templates.rs
// ============================================================================
// Module: File Template Store
// Description: File-backed template rendering and installer file lookup.
// Purpose: Implement the renderer and file-lookup contracts over disk roots.
// Dependencies: anvil-core
// ============================================================================

//! ## Overview
//! Templates live under `<templates_root>/<installer>/<name>.tmpl` and are
//! rendered by substituting `{{var}}` placeholders; this is deliberately a
//! boundary implementation of the render contract, not a template engine.
//! Repo content lookup is case-insensitive per path component because
//! ISO9660 only guarantees upper-case names while installers commonly
//! request lower-case paths.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use anvil_core::FileLookup;
use anvil_core::FileLookupError;
use anvil_core::InstallerName;
use anvil_core::RenderError;
use anvil_core::RenderVars;
use anvil_core::RepoName;
use anvil_core::TemplateRenderer;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Extension marking template sources; raw fetch refuses these.
pub const TEMPLATE_EXTENSION: &str = "tmpl";

// ============================================================================
// SECTION: File Template Store
// ============================================================================

/// Template renderer and file lookup rooted in configured directories.
pub struct FileTemplateStore {
    /// Root directory for installer and broker templates.
    templates_root: PathBuf,
    /// Root directory for repo content.
    repo_root: PathBuf,
}

impl FileTemplateStore {
    /// Creates a store over the configured roots.
    #[must_use]
    pub const fn new(templates_root: PathBuf, repo_root: PathBuf) -> Self {
        Self {
            templates_root,
            repo_root,
        }
    }

    /// Returns the directory holding an installer's templates.
    fn installer_dir(&self, installer: &InstallerName) -> PathBuf {
        self.templates_root.join(installer.as_str())
    }
}

impl TemplateRenderer for FileTemplateStore {
    fn render(
        &self,
        installer: &InstallerName,
        template: &str,
        vars: &RenderVars,
    ) -> Result<Vec<u8>, RenderError> {
        if !is_plain_name(template) {
            return Err(RenderError::TemplateNotFound {
                installer: installer.clone(),
                template: template.to_string(),
            });
        }
        let path = self.installer_dir(installer).join(format!("{template}.{TEMPLATE_EXTENSION}"));
        let text = fs::read_to_string(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                RenderError::TemplateNotFound {
                    installer: installer.clone(),
                    template: template.to_string(),
                }
            } else {
                RenderError::Render(err.to_string())
            }
        })?;
        Ok(substitute(&text, vars).into_bytes())
    }
}

impl FileLookup for FileTemplateStore {
    fn find_file(
        &self,
        installer: &InstallerName,
        name: &str,
    ) -> Result<PathBuf, FileLookupError> {
        let relative = safe_relative_path(name)?;
        let path = self.installer_dir(installer).join(relative);
        if path.is_file() {
            Ok(path)
        } else {
            Err(FileLookupError::NotFound {
                name: name.to_string(),
            })
        }
    }

    fn find_repo_file(&self, repo: &RepoName, path: &str) -> Result<PathBuf, FileLookupError> {
        let relative = safe_relative_path(path)?;
        let mut current = find_component_ignoring_case(&self.repo_root, repo.as_str())?;
        for component in relative.components() {
            let name = component.as_os_str().to_string_lossy();
            current = find_component_ignoring_case(&current, &name)?;
        }
        if current.is_file() {
            Ok(current)
        } else {
            Err(FileLookupError::NotFound {
                name: path.to_string(),
            })
        }
    }
}

// ============================================================================
// SECTION: Substitution
// ============================================================================

/// Substitutes `{{var}}` placeholders from the variable map.
///
/// Unknown placeholders are left intact so boot-script syntax that happens
/// to use braces passes through unchanged.
#[must_use]
pub fn substitute(text: &str, vars: &RenderVars) -> String {
    let mut out = text.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

// ============================================================================
// SECTION: Path Safety
// ============================================================================

/// Returns true for single-component names without separators.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains('\\') && name != "." && name != ".."
}

/// Validates a relative path: no traversal, no absolute components.
fn safe_relative_path(path: &str) -> Result<PathBuf, FileLookupError> {
    if path.is_empty() {
        return Err(FileLookupError::Invalid("empty path".to_string()));
    }
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return Err(FileLookupError::Invalid("absolute paths are rejected".to_string()));
    }
    for component in candidate.components() {
        match component {
            std::path::Component::Normal(_) => {}
            _ => {
                return Err(FileLookupError::Invalid(format!(
                    "path {path:?} contains a rejected component"
                )));
            }
        }
    }
    Ok(candidate.to_path_buf())
}

/// Finds a directory entry matching a name case-insensitively.
///
/// An exact match wins without scanning; otherwise the directory is read
/// and the first case-insensitive match is returned.
fn find_component_ignoring_case(dir: &Path, name: &str) -> Result<PathBuf, FileLookupError> {
    let exact = dir.join(name);
    if exact.exists() {
        return Ok(exact);
    }
    let entries = fs::read_dir(dir).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            FileLookupError::NotFound {
                name: name.to_string(),
            }
        } else {
            FileLookupError::Io(err.to_string())
        }
    })?;
    for entry in entries {
        let entry = entry.map_err(|err| FileLookupError::Io(err.to_string()))?;
        if entry.file_name().to_string_lossy().eq_ignore_ascii_case(name) {
            return Ok(entry.path());
        }
    }
    Err(FileLookupError::NotFound {
        name: name.to_string(),
    })
}
