//! Syntax chunker.
//!
//! Turns the AST-independent `StructuralElement`s produced by a language
//! analyzer into the `Chunk`s the rest of the engine stores, classifies, and
//! embeds. The chunker does not persist anything; it is a pure
//! transformation over one file's elements.

use crate::config::Config;
use crate::parser::StructuralElement;
use crate::patterns;
use crate::types::{Chunk, ComplexityLevel, ImportStatement, Visibility};

/// Turn one file's structural elements into chunks.
///
/// `file` is the path relative to the project root, POSIX-separated.
/// `imports` are the file's import/use statements, used to populate each
/// chunk's `imports_referenced` in source order.
pub fn chunk_elements(
    elements: &[StructuralElement],
    file: &str,
    imports: &[ImportStatement],
    config: &Config,
) -> Vec<Chunk> {
    let min_span = config.indexing.min_chunk_lines;

    elements
        .iter()
        .filter(|elem| elem.line_end.saturating_sub(elem.line_start) + 1 >= min_span)
        .map(|elem| build_chunk(elem, file, imports))
        .collect()
}

fn build_chunk(elem: &StructuralElement, file: &str, imports: &[ImportStatement]) -> Chunk {
    let id = Chunk::build_id(file, &elem.name, elem.line_start);
    let exported = elem.visibility == Visibility::Public;
    let imports_referenced = imports_referenced_by(elem, imports);
    let complexity_score = patterns::complexity_score(&elem.content);
    let complexity_level = ComplexityLevel::from_score(complexity_score);

    let mut chunk = Chunk {
        id,
        name: elem.name.clone(),
        file: file.to_string(),
        start_line: elem.line_start,
        end_line: elem.line_end,
        syntax_kind: elem.kind,
        code: elem.content.clone(),
        exported,
        is_async: elem.is_async,
        imports_referenced,
        purpose: String::new(),
        domain_tags: Default::default(),
        pattern_tags: Default::default(),
        complexity_score,
        complexity_level,
        embedding: None,
        bundles: Default::default(),
    };

    let classification = patterns::classify(&chunk);
    chunk.purpose = classification.purpose;
    chunk.domain_tags = classification.domain_tags;
    chunk.pattern_tags = classification.pattern_tags;
    chunk
}

/// Imports whose imported names (or import path, for star/namespace imports)
/// appear as an identifier inside the chunk body, preserving source order.
fn imports_referenced_by(elem: &StructuralElement, imports: &[ImportStatement]) -> Vec<String> {
    let mut referenced = Vec::new();
    for import in imports {
        let names_to_check: Vec<&str> = if import.imported_names.is_empty() {
            vec![import.import_path.as_str()]
        } else {
            import.imported_names.iter().map(String::as_str).collect()
        };

        let matches = names_to_check.iter().any(|name| {
            if *name == "*" {
                false
            } else {
                contains_identifier(&elem.content, name)
            }
        });

        if matches {
            referenced.push(import.import_path.clone());
        }
    }
    referenced
}

/// True if `identifier` occurs in `code` as a whole identifier token.
fn contains_identifier(code: &str, identifier: &str) -> bool {
    if identifier.is_empty() {
        return false;
    }
    let bytes = code.as_bytes();
    let ilen = identifier.len();
    let mut start = 0;
    while let Some(pos) = code[start..].find(identifier) {
        let idx = start + pos;
        let before_ok = idx == 0 || !is_ident_byte(bytes[idx - 1]);
        let after_idx = idx + ilen;
        let after_ok = after_idx >= bytes.len() || !is_ident_byte(bytes[after_idx]);
        if before_ok && after_ok {
            return true;
        }
        start = idx + ilen;
        if start >= code.len() {
            break;
        }
    }
    false
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkKind, Visibility};

    fn element(name: &str, kind: ChunkKind, lines: (u32, u32), content: &str) -> StructuralElement {
        StructuralElement {
            symbol_path: name.to_string(),
            name: name.to_string(),
            kind,
            visibility: Visibility::Public,
            line_start: lines.0,
            line_end: lines.1,
            content: content.to_string(),
            doc_comment: None,
            references: Vec::new(),
            is_async: false,
        }
    }

    #[test]
    fn test_short_spans_are_dropped() {
        let config = Config::defaults(std::path::Path::new("."));
        let elements = vec![element("tiny", ChunkKind::Function, (1, 1), "fn tiny() {}")];
        let chunks = chunk_elements(&elements, "src/lib.rs", &[], &config);
        assert!(chunks.is_empty(), "single-line chunk should be below the minimum span");
    }

    #[test]
    fn test_chunk_carries_classification() {
        let config = Config::defaults(std::path::Path::new("."));
        let elements = vec![element(
            "fetchUser",
            ChunkKind::Function,
            (1, 5),
            "function fetchUser(id) {\n  return api.get(id);\n}\n",
        )];
        let chunks = chunk_elements(&elements, "src/api/user.ts", &[], &config);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].purpose, "data-retrieval");
        assert!(chunks[0].exported);
    }

    #[test]
    fn test_imports_referenced_preserves_order() {
        let config = Config::defaults(std::path::Path::new("."));
        let elements = vec![element(
            "handler",
            ChunkKind::Function,
            (1, 6),
            "function handler() {\n  validate(x);\n  save(x);\n}\n",
        )];
        let imports = vec![
            ImportStatement {
                import_path: "./validate".to_string(),
                imported_names: vec!["validate".to_string()],
                line: 1,
            },
            ImportStatement {
                import_path: "./unused".to_string(),
                imported_names: vec!["unused".to_string()],
                line: 2,
            },
            ImportStatement {
                import_path: "./save".to_string(),
                imported_names: vec!["save".to_string()],
                line: 3,
            },
        ];
        let chunks = chunk_elements(&elements, "src/handler.ts", &imports, &config);
        assert_eq!(chunks[0].imports_referenced, vec!["./validate", "./save"]);
    }

    #[test]
    fn test_complexity_bucketed_into_level() {
        let config = Config::defaults(std::path::Path::new("."));
        let body = "if a {}\n".repeat(20);
        let elements = vec![element("busy", ChunkKind::Function, (1, 21), &body)];
        let chunks = chunk_elements(&elements, "src/lib.rs", &[], &config);
        assert_eq!(chunks[0].complexity_level, ComplexityLevel::High);
    }
}
