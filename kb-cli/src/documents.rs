use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use kb_rag::Document;

/// Load documents from files.
///
/// A `.json` file holds an array of documents; any other file becomes one
/// document whose id is the file stem and whose `source` metadata is the path.
///
/// Ingest upserts by document id, so two inputs sharing an id (for example
/// `a/notes.txt` and `b/notes.txt`) would silently overwrite each other.
/// Such a load is rejected before anything is ingested.
pub fn load(paths: &[PathBuf]) -> Result<Vec<Document>> {
    let mut docs = Vec::new();
    let mut origins: HashMap<String, String> = HashMap::new();
    for path in paths {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) {
            let parsed: Vec<Document> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON document array", path.display()))?;
            for (i, doc) in parsed.into_iter().enumerate() {
                claim(&mut origins, &doc.id, format!("{}[{i}]", path.display()))?;
                docs.push(doc);
            }
        } else {
            let doc = Document::new(stem(path)?, raw)
                .with_metadata("source", path.display().to_string());
            claim(&mut origins, &doc.id, path.display().to_string())?;
            docs.push(doc);
        }
    }
    Ok(docs)
}

fn claim(origins: &mut HashMap<String, String>, id: &str, origin: String) -> Result<()> {
    if let Some(first) = origins.get(id) {
        bail!("document id '{id}' is used by both {first} and {origin}; rename one of them");
    }
    origins.insert(id.to_string(), origin);
    Ok(())
}

fn stem(path: &Path) -> Result<String> {
    match path.file_stem().and_then(|s| s.to_str()) {
        Some(stem) if !stem.is_empty() => Ok(stem.to_string()),
        _ => bail!("cannot derive a document id from {}", path.display()),
    }
}
