// anvil-server/tests/templates.rs
// ============================================================================
// Module: File Template Store Tests
// Description: Tests for rendering, lookup safety, and repo case folding.
// ============================================================================
//! ## Overview
//! Validates placeholder substitution, template-not-found mapping, path
//! traversal rejection, and case-insensitive repo content lookup.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic filesystem fixtures.")]

use std::fs;

use anvil_core::FileLookup;
use anvil_core::FileLookupError;
use anvil_core::InstallerName;
use anvil_core::RenderError;
use anvil_core::RenderVars;
use anvil_core::RepoName;
use anvil_core::TemplateRenderer;
use anvil_server::FileTemplateStore;
use tempfile::TempDir;

/// Builds a store with separate template and repo roots.
fn store(dir: &TempDir) -> FileTemplateStore {
    FileTemplateStore::new(dir.path().join("templates"), dir.path().join("repo"))
}

#[test]
fn test_render_substitutes_placeholders_and_keeps_unknown_braces() {
    let dir = TempDir::new().unwrap();
    let installer_dir = dir.path().join("templates").join("centos");
    fs::create_dir_all(&installer_dir).unwrap();
    fs::write(
        installer_dir.join("boot.tmpl"),
        "#!ipxe\nkernel {{repo_url}}/vmlinuz {{kernel_args}}\nset x ${net0/mac}\n",
    )
    .unwrap();

    let mut vars = RenderVars::new();
    vars.insert("repo_url".to_string(), "http://anvil/svc/repo/r1".to_string());
    vars.insert("kernel_args".to_string(), "quiet".to_string());

    let bytes =
        store(&dir).render(&InstallerName::new("centos"), "boot", &vars).unwrap();
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("kernel http://anvil/svc/repo/r1/vmlinuz quiet"));
    // iPXE's own variable syntax passes through untouched.
    assert!(text.contains("${net0/mac}"));
}

#[test]
fn test_missing_template_maps_to_not_found() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("templates").join("centos")).unwrap();
    let result = store(&dir).render(&InstallerName::new("centos"), "absent", &RenderVars::new());
    assert!(matches!(result, Err(RenderError::TemplateNotFound { .. })));
}

#[test]
fn test_template_names_with_separators_are_refused() {
    let dir = TempDir::new().unwrap();
    let result =
        store(&dir).render(&InstallerName::new("centos"), "../secrets", &RenderVars::new());
    assert!(matches!(result, Err(RenderError::TemplateNotFound { .. })));
}

#[test]
fn test_find_file_rejects_traversal() {
    let dir = TempDir::new().unwrap();
    let result = store(&dir).find_file(&InstallerName::new("centos"), "../../etc/passwd");
    assert!(matches!(result, Err(FileLookupError::Invalid(_))));
    let result = store(&dir).find_file(&InstallerName::new("centos"), "/etc/passwd");
    assert!(matches!(result, Err(FileLookupError::Invalid(_))));
}

#[test]
fn test_find_file_locates_nested_assets() {
    let dir = TempDir::new().unwrap();
    let asset_dir = dir.path().join("templates").join("centos").join("pxelinux");
    fs::create_dir_all(&asset_dir).unwrap();
    fs::write(asset_dir.join("ldlinux.c32"), b"binary").unwrap();

    let found =
        store(&dir).find_file(&InstallerName::new("centos"), "pxelinux/ldlinux.c32").unwrap();
    assert!(found.ends_with("pxelinux/ldlinux.c32"));
}

#[test]
fn test_repo_lookup_ignores_case_per_component() {
    let dir = TempDir::new().unwrap();
    // ISO9660 content commonly lands upper-case on disk.
    let content_dir = dir.path().join("repo").join("centos9").join("LIVEOS");
    fs::create_dir_all(&content_dir).unwrap();
    fs::write(content_dir.join("SQUASHFS.IMG"), b"image").unwrap();

    let found = store(&dir)
        .find_repo_file(&RepoName::new("centos9"), "liveos/squashfs.img")
        .unwrap();
    assert!(found.ends_with("LIVEOS/SQUASHFS.IMG"));
}

#[test]
fn test_repo_lookup_misses_map_to_not_found() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("repo")).unwrap();
    let result = store(&dir).find_repo_file(&RepoName::new("ghost"), "vmlinuz");
    assert!(matches!(result, Err(FileLookupError::NotFound { .. })));
}
