//! Document retrieval by path (§4.4 `get` tool, CLI `qmd get`).
//!
//! Generalises the teacher's `get_document`/`run_get` from a row lookup by
//! numeric document ID over a fixed `documents`/`chunks` schema to a
//! `Store`-trait lookup by path (or `#<hash>` prefix), with the `path:line`
//! sugar and optional line-numbering the CLI and MCP surfaces share.

use anyhow::{bail, Result};

use crate::retrieval::snippet::add_line_numbers;
use crate::store::{FindResult, Store};

/// A resolved document body, ready to print or hand back over MCP.
#[derive(Debug, Clone)]
pub struct DocumentView {
    pub display_path: String,
    pub title: String,
    pub content_hash: String,
    pub text: String,
}

/// Split a `get` target's `path:line` sugar into `(path, Some(line))`.
pub fn split_path_line_sugar(input: &str) -> (&str, Option<usize>) {
    if let Some(idx) = input.rfind(':') {
        let (path, suffix) = input.split_at(idx);
        if let Ok(line) = suffix[1..].parse::<usize>() {
            return (path, Some(line));
        }
    }
    (input, None)
}

/// Resolve a document by path (or `path:line` sugar), slice it to
/// `from_line`/`max_lines`, and prepend any matching `path_contexts` entry.
pub async fn get_document(
    store: &dyn Store,
    target: &str,
    from_line: Option<usize>,
    max_lines: Option<usize>,
    line_numbers: bool,
) -> Result<DocumentView> {
    let (path, sugar_line) = split_path_line_sugar(target);
    let from_line = from_line.or(sugar_line);

    let doc = match store.find_document(path, true).await? {
        FindResult::Found(doc) => doc,
        FindResult::NotFound { similar_paths } => {
            if similar_paths.is_empty() {
                bail!("no document matches '{}'", path);
            }
            bail!("no document matches '{}'; did you mean: {}", path, similar_paths.join(", "));
        }
    };

    let body = store.get_body(&doc.content_hash, from_line, max_lines).await?.unwrap_or_default();
    let text = if line_numbers { add_line_numbers(&body, from_line.unwrap_or(1)) } else { body };

    let context = store.get_context(&doc.filepath).await?;
    let text = match context {
        Some(c) => format!("<!-- Context: {} -->\n{}", c, text),
        None => text,
    };

    Ok(DocumentView {
        display_path: doc.display_path.unwrap_or(doc.filepath),
        title: doc.title,
        content_hash: doc.content_hash,
        text,
    })
}

/// CLI entry point for `qmd get` (§6.1): prints the resolved document to stdout.
pub async fn run_get(store: &dyn Store, target: &str, line_numbers: bool) -> Result<()> {
    let doc = get_document(store, target, None, None, line_numbers).await?;

    println!("--- {} ---", doc.display_path);
    println!("title: {}", doc.title);
    println!("hash:  {}", &doc.content_hash[..doc.content_hash.len().min(12)]);
    println!();
    println!("{}", doc.text);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn resolves_document_by_path() {
        let store = InMemoryStore::new();
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        store.upsert_document(cid, "/r/a.md", "A", "hash-a", "line one\nline two").await.unwrap();

        let view = get_document(&store, "/r/a.md", None, None, false).await.unwrap();
        assert_eq!(view.title, "A");
        assert_eq!(view.text, "line one\nline two");
    }

    #[tokio::test]
    async fn accepts_path_line_sugar() {
        let store = InMemoryStore::new();
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        store.upsert_document(cid, "/r/a.md", "A", "hash-a", "one\ntwo\nthree").await.unwrap();

        let view = get_document(&store, "/r/a.md:2", None, Some(1), false).await.unwrap();
        assert_eq!(view.text, "two");
    }

    #[tokio::test]
    async fn line_numbers_are_prefixed_when_requested() {
        let store = InMemoryStore::new();
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        store.upsert_document(cid, "/r/a.md", "A", "hash-a", "one\ntwo").await.unwrap();

        let view = get_document(&store, "/r/a.md", Some(1), None, true).await.unwrap();
        assert!(view.text.starts_with("1: one"));
    }

    #[tokio::test]
    async fn missing_document_reports_similar_paths() {
        let store = InMemoryStore::new();
        let cid = store.put_collection("/r", "**/*.md").await.unwrap();
        store.upsert_document(cid, "/r/alpha.md", "A", "hash-a", "body").await.unwrap();

        let err = get_document(&store, "/r/alphaa.md", None, None, false).await.unwrap_err();
        assert!(err.to_string().contains("did you mean"));
    }

    #[test]
    fn sugar_splits_trailing_line_number() {
        assert_eq!(split_path_line_sugar("notes/a.md:42"), ("notes/a.md", Some(42)));
        assert_eq!(split_path_line_sugar("notes/a.md"), ("notes/a.md", None));
    }
}
