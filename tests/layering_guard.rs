//! Layering guardrails for the policy core.
//!
//! `hvharness_core` holds the marker vocabulary, verdict precedence and quorum rule shared by the coordinator
//! and the listeners. It must stay dependency-free so that policy never picks up IO or runtime concerns.
//! These tests scan the manifests and fail if that changes.

fn table_entries<'a>(manifest: &'a str, table: &str) -> Vec<&'a str> {
    let mut in_table = false;
    let mut entries = Vec::new();

    for raw_line in manifest.lines() {
        let line = raw_line.trim();
        // Track when we enter/exit the table.
        if line.starts_with('[') {
            in_table = line == table;
            continue;
        }
        if !in_table || line.is_empty() || line.starts_with('#') {
            continue;
        }
        // Strip inline comments for robustness.
        let line_no_comment = line.split('#').next().unwrap_or("").trim();
        if let Some((name, _)) = line_no_comment.split_once('=') {
            entries.push(name.trim());
        }
    }
    entries
}

#[test]
fn core_crate_has_no_dependencies() {
    let manifest = include_str!("../crates/hvharness_core/Cargo.toml");
    for table in ["[dependencies]", "[dev-dependencies]", "[build-dependencies]"] {
        let entries = table_entries(manifest, table);
        assert!(entries.is_empty(), "hvharness_core must not declare {table}: {entries:?}");
    }
}

#[test]
fn harness_depends_on_core_by_path() {
    let manifest = include_str!("../Cargo.toml");
    let deps = table_entries(manifest, "[dependencies]");
    assert!(deps.contains(&"hvharness_core"), "root crate must depend on hvharness_core");
    assert!(manifest.contains("hvharness_core = { path = \"crates/hvharness_core\" }"));
}
