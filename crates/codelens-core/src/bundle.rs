//! Bundle manager.
//!
//! Resolves manual glob bundles and smart semantic bundles against the
//! store's current chunk set, and materializes a bundle into a structured,
//! byte-stable XML-ish artifact.

use std::io::Cursor;

use globset::{Glob, GlobSetBuilder};
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;

use crate::error::{OmniError, OmniResult};
use crate::index::MetadataIndex;
use crate::types::{Chunk, ChunkKind};

/// A resolved bundle: its name and the files it currently contains.
#[derive(Debug, Clone)]
pub struct ResolvedBundle {
    pub name: String,
    pub files: Vec<String>,
}

/// Turn a purpose or syntax-kind label into the lowercase, hyphenated form
/// used in smart bundle names.
fn slugify(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

/// List every bundle currently worth advertising: all manual bundles plus
/// every non-empty smart bundle derived from distinct purposes and syntax
/// kinds observed in the store. `all_files` is the walker's current file
/// list, the candidate set manual bundles resolve against.
pub fn list_bundles(index: &MetadataIndex, all_files: &[String]) -> OmniResult<Vec<ResolvedBundle>> {
    let mut resolved = Vec::new();

    for manual in index.manual_bundles()? {
        if let crate::types::Bundle::Manual { name, .. } = &manual {
            let files = resolve_manual(&manual, all_files, &[])?;
            resolved.push(ResolvedBundle { name: name.clone(), files });
        }
    }

    for purpose in index.distinct_purposes()? {
        if purpose.is_empty() {
            continue;
        }
        let files = index.files_by_purpose(&purpose)?;
        if files.is_empty() {
            continue;
        }
        resolved.push(ResolvedBundle {
            name: format!("smart:{}", slugify(&purpose)),
            files,
        });
    }

    for kind in index.distinct_syntax_kinds()? {
        let files = index.files_by_syntax_kind(kind)?;
        if files.is_empty() {
            continue;
        }
        resolved.push(ResolvedBundle {
            name: format!("smart:type-{}", slugify(kind.as_str())),
            files,
        });
    }

    Ok(resolved)
}

/// Resolve a manual bundle: files in `all_files` (the walker's current
/// file list) matching any of its patterns, minus `hidden`. `all_files` is
/// the full candidate set regardless of whether a file produced chunks,
/// so a `master`/`**/*` bundle still picks up READMEs, configs, and other
/// non-parseable assets.
pub fn resolve_manual(
    bundle: &crate::types::Bundle,
    all_files: &[String],
    hidden: &[String],
) -> OmniResult<Vec<String>> {
    let crate::types::Bundle::Manual { patterns, .. } = bundle else {
        return Err(OmniError::Internal("resolve_manual called on a smart bundle".to_string()));
    };

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| OmniError::Config {
            details: format!("invalid bundle pattern `{pattern}`: {e}"),
        })?;
        builder.add(glob);
    }
    let globset = builder.build().map_err(|e| OmniError::Config {
        details: format!("failed to compile bundle pattern set: {e}"),
    })?;

    let mut seen = std::collections::BTreeSet::new();
    for file in all_files {
        if globset.is_match(file) && !hidden.iter().any(|h| h == file) {
            seen.insert(file.clone());
        }
    }
    Ok(seen.into_iter().collect())
}

/// Resolve a smart bundle named `smart:<purpose>` or `smart:type-<kind>`.
pub fn resolve_smart(index: &MetadataIndex, name: &str) -> OmniResult<Vec<String>> {
    let Some(rest) = name.strip_prefix("smart:") else {
        return Err(OmniError::NotFound {
            entity: format!("bundle `{name}`"),
        });
    };
    if let Some(kind_slug) = rest.strip_prefix("type-") {
        for kind in ChunkKind::ALL {
            if slugify(kind.as_str()) == kind_slug {
                return index.files_by_syntax_kind(kind);
            }
        }
        return Ok(Vec::new());
    }
    for purpose in index.distinct_purposes()? {
        if slugify(&purpose) == rest {
            return index.files_by_purpose(&purpose);
        }
    }
    Ok(Vec::new())
}

/// True if any of `bundle`'s patterns matches `path` (used for dirty
/// tracking when a file is created, modified, or deleted).
pub fn matches_any_pattern(patterns: &[String], path: &str) -> bool {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        }
    }
    match builder.build() {
        Ok(set) => set.is_match(path),
        Err(_) => false,
    }
}

/// Materialize a bundle into a structured XML-ish artifact: a root element
/// carrying `name`/`generated`, a `project` descriptor, an `overview` of
/// file-type counts, and a `files` tree of `group`/`file` elements. Bytes are
/// stable given identical inputs — no wall-clock or random data is written
/// by the caller, who supplies `generated_ms`.
pub fn materialize(
    bundle_name: &str,
    project_name: &str,
    project_version: &str,
    files: &[(String, String)],
    chunks_by_file: &std::collections::BTreeMap<String, Vec<Chunk>>,
    generated_ms: i64,
) -> OmniResult<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(xml_err)?;

    let mut root = BytesStart::new("bundle");
    root.push_attribute(("name", bundle_name));
    let generated = generated_ms.to_string();
    root.push_attribute(("generated", generated.as_str()));
    writer.write_event(Event::Start(root)).map_err(xml_err)?;

    let mut project = BytesStart::new("project");
    project.push_attribute(("name", project_name));
    project.push_attribute(("version", project_version));
    writer.write_event(Event::Empty(project)).map_err(xml_err)?;

    write_overview(&mut writer, files)?;

    writer.write_event(Event::Start(BytesStart::new("files"))).map_err(xml_err)?;

    let groups = group_by_category(files);
    for (category, grouped_files) in &groups {
        let mut group_el = BytesStart::new("group");
        group_el.push_attribute(("category", category.as_str()));
        writer.write_event(Event::Start(group_el)).map_err(xml_err)?;

        for (path, content) in grouped_files {
            write_file(&mut writer, path, content, chunks_by_file.get(path.as_str()))?;
        }

        writer.write_event(Event::End(BytesEnd::new("group"))).map_err(xml_err)?;
    }
    writer.write_event(Event::End(BytesEnd::new("files"))).map_err(xml_err)?;

    writer.write_event(Event::End(BytesEnd::new("bundle"))).map_err(xml_err)?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| OmniError::Internal(format!("non-UTF-8 bundle artifact: {e}")))
}

fn write_overview(writer: &mut Writer<Cursor<Vec<u8>>>, files: &[(String, String)]) -> OmniResult<()> {
    let mut counts: std::collections::BTreeMap<String, u32> = std::collections::BTreeMap::new();
    for (path, _) in files {
        let ext = std::path::Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("none")
            .to_string();
        *counts.entry(ext).or_insert(0) += 1;
    }

    let overview = BytesStart::new("overview");
    writer.write_event(Event::Start(overview)).map_err(xml_err)?;
    for (ext, count) in &counts {
        let mut type_el = BytesStart::new("file_type");
        type_el.push_attribute(("ext", ext.as_str()));
        let count_str = count.to_string();
        type_el.push_attribute(("count", count_str.as_str()));
        writer.write_event(Event::Empty(type_el)).map_err(xml_err)?;
    }
    writer.write_event(Event::End(BytesEnd::new("overview"))).map_err(xml_err)?;
    Ok(())
}

fn write_file(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    path: &str,
    content: &str,
    chunks: Option<&Vec<Chunk>>,
) -> OmniResult<()> {
    let ext = std::path::Path::new(path).extension().and_then(|e| e.to_str()).unwrap_or("");
    let mut file_el = BytesStart::new("file");
    file_el.push_attribute(("path", path));
    file_el.push_attribute(("ext", ext));
    writer.write_event(Event::Start(file_el)).map_err(xml_err)?;

    let mut meta = BytesStart::new("meta");
    let size = content.len().to_string();
    let line_count = content.lines().count().to_string();
    meta.push_attribute(("size", size.as_str()));
    meta.push_attribute(("lines", line_count.as_str()));
    writer.write_event(Event::Empty(meta)).map_err(xml_err)?;

    if let Some(chunks) = chunks {
        for chunk in chunks {
            let mut summary = BytesStart::new("chunk");
            summary.push_attribute(("name", chunk.name.as_str()));
            summary.push_attribute(("purpose", chunk.purpose.as_str()));
            let complexity = chunk.complexity_score.to_string();
            summary.push_attribute(("complexity", complexity.as_str()));
            writer.write_event(Event::Empty(summary)).map_err(xml_err)?;
        }
    }

    let content_el = BytesStart::new("content");
    writer.write_event(Event::Start(content_el)).map_err(xml_err)?;
    writer.write_event(Event::CData(BytesCData::new(content))).map_err(xml_err)?;
    writer.write_event(Event::End(BytesEnd::new("content"))).map_err(xml_err)?;

    writer.write_event(Event::End(BytesEnd::new("file"))).map_err(xml_err)?;
    Ok(())
}

fn group_by_category(files: &[(String, String)]) -> std::collections::BTreeMap<String, Vec<(String, String)>> {
    let mut groups: std::collections::BTreeMap<String, Vec<(String, String)>> = std::collections::BTreeMap::new();
    for (path, content) in files {
        let category = categorize(path);
        groups.entry(category).or_default().push((path.clone(), content.clone()));
    }
    groups
}

fn categorize(path: &str) -> String {
    if path.contains("/test") || path.contains("_test.") || path.ends_with(".test.ts") {
        "tests".to_string()
    } else if path.contains("/components") {
        "components".to_string()
    } else if path.contains("/api") || path.contains("/routes") {
        "api".to_string()
    } else {
        "source".to_string()
    }
}

fn xml_err(e: quick_xml::Error) -> OmniError {
    OmniError::Internal(format!("xml write error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_lowercases_and_hyphenates() {
        assert_eq!(slugify("React Hook"), "react-hook");
        assert_eq!(slugify("api_handler"), "api-handler");
    }

    #[test]
    fn test_resolve_manual_includes_non_chunked_files() {
        let bundle = crate::types::Bundle::Manual {
            name: "master".to_string(),
            patterns: vec!["**/*".to_string()],
            files: Vec::new(),
            last_generated_ms: None,
            size_bytes: 0,
            dirty: true,
        };
        let all_files = vec!["src/main.rs".to_string(), "README.md".to_string(), "logo.png".to_string()];

        let resolved = resolve_manual(&bundle, &all_files, &[]).expect("resolve");

        assert_eq!(resolved, vec!["README.md".to_string(), "logo.png".to_string(), "src/main.rs".to_string()]);
    }

    #[test]
    fn test_resolve_manual_subtracts_hidden() {
        let bundle = crate::types::Bundle::Manual {
            name: "docs".to_string(),
            patterns: vec!["docs/**".to_string()],
            files: Vec::new(),
            last_generated_ms: None,
            size_bytes: 0,
            dirty: true,
        };
        let all_files = vec!["docs/a.md".to_string(), "docs/b.md".to_string()];

        let resolved =
            resolve_manual(&bundle, &all_files, &["docs/b.md".to_string()]).expect("resolve");

        assert_eq!(resolved, vec!["docs/a.md".to_string()]);
    }

    #[test]
    fn test_matches_any_pattern() {
        let patterns = vec!["src/components/**".to_string()];
        assert!(matches_any_pattern(&patterns, "src/components/A.tsx"));
        assert!(!matches_any_pattern(&patterns, "src/lib/util.ts"));
    }

    #[test]
    fn test_materialize_is_byte_stable() {
        let files = vec![("src/a.rs".to_string(), "fn a() {}".to_string())];
        let chunks = std::collections::BTreeMap::new();
        let first = materialize("master", "demo", "0.1.0", &files, &chunks, 1000).expect("materialize");
        let second = materialize("master", "demo", "0.1.0", &files, &chunks, 1000).expect("materialize");
        assert_eq!(first, second);
        assert!(first.contains("<content><![CDATA[fn a() {}]]></content>"));
    }

    #[test]
    fn test_categorize_buckets_by_path() {
        assert_eq!(categorize("src/components/A.tsx"), "components");
        assert_eq!(categorize("src/api/users.ts"), "api");
        assert_eq!(categorize("src/lib/util.ts"), "source");
    }
}
