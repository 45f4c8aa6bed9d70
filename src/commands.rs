use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::Config;
use crate::document::Record;
use crate::indexer::Indexer;
use crate::search::SearchRequest;

/// Load the configuration from the base directory and open the pipeline
#[inline]
pub async fn open_indexer() -> Result<Indexer> {
    let config = Config::load_default().context("Failed to load configuration")?;
    Indexer::new(config)
        .await
        .context("Failed to initialize indexer")
}

/// Records read from `process` input, and whether the input was a JSON array
#[derive(Debug)]
pub struct LoadedRecords {
    pub records: Vec<Record>,
    pub is_array: bool,
}

/// Records from a JSON file path or a JSON literal; an array yields one record per element
#[inline]
pub fn load_records(input: &str) -> Result<LoadedRecords> {
    let path = Path::new(input);
    let text = if path.is_file() {
        eprintln!("Loaded JSON from file: {}", style(path.display()).cyan());
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        debug!("Treating input as a JSON string");
        input.to_string()
    };

    let value: Value = serde_json::from_str(&text).context("Input is not valid JSON")?;
    match value {
        Value::Array(items) => {
            let records = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    Record::from_value(item)
                        .with_context(|| format!("Invalid record at index {}", i))
                })
                .collect::<Result<_>>()?;
            Ok(LoadedRecords {
                records,
                is_array: true,
            })
        }
        other => Ok(LoadedRecords {
            records: vec![Record::from_value(other)?],
            is_array: false,
        }),
    }
}

/// An array input prints an array, even of one; a single record prints as an object
#[inline]
pub fn render_output(results: Vec<Value>, is_array: bool) -> Option<Value> {
    if is_array {
        return Some(Value::Array(results));
    }
    results.into_iter().next()
}

#[inline]
pub async fn process(
    input: &str,
    collection: Option<String>,
    store: bool,
    full: bool,
) -> Result<()> {
    let indexer = open_indexer().await?;
    let collection =
        collection.unwrap_or_else(|| indexer.config().search.default_collection.clone());
    let LoadedRecords { records, is_array } = load_records(input)?;

    let bar = if is_array {
        ProgressBar::new(records.len() as u64).with_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] Processing {msg}")
                .context("Invalid progress template")?,
        )
    } else {
        ProgressBar::hidden()
    };

    let mut results = Vec::with_capacity(records.len());
    let mut failures = 0_usize;
    for record in records {
        bar.set_message(record.title().unwrap_or("untitled").to_string());

        match indexer.process_record(record, &collection, store).await {
            Ok(processed) => {
                for (field, vector) in processed.embeddings.iter() {
                    debug!("{}: {}-dimensional vector", field, vector.len());
                }
                if let Some(id) = &processed.id {
                    bar.suspend(|| {
                        eprintln!(
                            "{} Stored in '{}' with ID: {}",
                            style("✓").green(),
                            collection,
                            style(id).cyan()
                        );
                    });
                }
                results.push(if full {
                    processed.to_enhanced_json()
                } else {
                    processed.to_summary_json()
                });
            }
            Err(e) => {
                failures += 1;
                warn!("Failed to process record: {}", e);
                bar.suspend(|| eprintln!("{} {}", style("✗").red(), e));
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    if let Some(output) = render_output(results, is_array) {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    if failures > 0 {
        anyhow::bail!("{} record(s) failed to process", failures);
    }
    Ok(())
}

#[inline]
pub async fn query(
    text: &str,
    collection: Option<String>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let indexer = open_indexer().await?;
    let search = &indexer.config().search;
    let request = SearchRequest::new(text)
        .with_limit(limit.unwrap_or(search.default_limit))
        .with_collection(collection.unwrap_or_else(|| search.default_collection.clone()));

    let hits = indexer.search(&request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    eprintln!("Searching for: '{}'", style(text).cyan());
    if hits.is_empty() {
        println!("No similar documents found");
        return Ok(());
    }

    println!("Found {} similar document(s):", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        println!();
        println!("{}. {}", i + 1, style(&hit.title).bold());
        println!("   ID: {}", hit.id);
        if !hit.url.is_empty() {
            println!("   URL: {}", style(&hit.url).cyan());
        }
        println!("   Similarity score: {:.4}", hit.score);
        if !hit.snippet.is_empty() {
            println!("   {}", style(&hit.snippet).dim());
        }
    }

    Ok(())
}

#[inline]
pub async fn list_collections() -> Result<()> {
    let indexer = open_indexer().await?;
    let collections = indexer.list_collections().await?;

    if collections.is_empty() {
        println!("No collections found in database");
        return Ok(());
    }

    println!("Available collections:");
    for name in collections {
        println!("  - {}", name);
    }
    Ok(())
}

#[inline]
pub async fn get_document(id: &str, collection: Option<String>) -> Result<()> {
    let indexer = open_indexer().await?;
    let collection =
        collection.unwrap_or_else(|| indexer.config().search.default_collection.clone());

    let document = indexer.get_document(id, &collection).await?;

    eprintln!(
        "Document {} in '{}' (indexed on {}, stored {})",
        style(&document.id).cyan(),
        document.collection,
        document.indexed_field,
        document.stored_at.to_rfc3339()
    );
    println!("{}", serde_json::to_string_pretty(&document.record)?);
    Ok(())
}

#[inline]
pub async fn delete_document(id: &str, collection: Option<String>) -> Result<()> {
    let indexer = open_indexer().await?;
    let collection =
        collection.unwrap_or_else(|| indexer.config().search.default_collection.clone());

    indexer.delete_document(id, &collection).await?;
    println!("{} Deleted {} from '{}'", style("✓").green(), id, collection);
    Ok(())
}

#[inline]
pub async fn drop_collection(collection: &str) -> Result<()> {
    let indexer = open_indexer().await?;

    indexer.drop_collection(collection).await?;
    println!("{} Dropped collection '{}'", style("✓").green(), collection);
    Ok(())
}

#[inline]
pub async fn show_status() -> Result<()> {
    let indexer = open_indexer().await?;
    let config = indexer.config();

    println!("{}", style("📊 Scrape-Index Status Report").bold().cyan());
    println!("{}", "=".repeat(50));
    println!();

    println!("{}", style("🤖 Embeddings:").bold().yellow());
    println!("   Mode: {}", config.embedding.mode);
    match config.ollama_url() {
        Ok(url) => println!("   Ollama URL: {}", style(url).cyan()),
        Err(e) => println!("   Ollama URL: {} ({})", style("Invalid").red(), e),
    }
    println!("   Model: {}", config.embedding.model);

    let status = indexer.status().await?;
    let backend = if indexer.embedder().is_mock() {
        style(status.backend.as_str()).yellow()
    } else {
        style(status.backend.as_str()).green()
    };
    println!("   Active backend: {} ({} dimensions)", backend, status.dimension);
    println!();

    println!("{}", style("🔍 Vector Database:").bold().yellow());
    println!("   Path: {}", style(indexer.store().path().display()).dim());
    if indexer.store().validate_integrity().await? {
        println!("   {} Integrity check passed", style("✅").green());
    } else {
        println!("   {} Integrity check failed, see logs", style("❌").red());
    }

    if status.collections.is_empty() {
        println!("   No collections yet");
    }
    for collection in &status.collections {
        println!(
            "   - {}: {} document(s), {} dimensions",
            collection.name, collection.documents, collection.dimension
        );
    }

    Ok(())
}

#[inline]
pub fn show_config() -> Result<()> {
    let config = Config::load_default().context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding Settings:").bold().yellow());
    eprintln!("  Mode: {}", style(&config.embedding.mode).cyan());
    eprintln!("  Host: {}", style(&config.embedding.host).cyan());
    eprintln!("  Port: {}", style(config.embedding.port).cyan());
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());
    eprintln!("  Dimension: {}", style(config.embedding.dimension).cyan());
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Search Settings:").bold().yellow());
    eprintln!(
        "  Default collection: {}",
        style(&config.search.default_collection).cyan()
    );
    eprintln!("  Default limit: {}", style(config.search.default_limit).cyan());
    eprintln!("  Snippet length: {}", style(config.search.snippet_length).cyan());

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_single_record_from_string() {
        let loaded =
            load_records(r#"{"title": "Hello", "content": "World"}"#).expect("should load");

        assert!(!loaded.is_array);
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].title(), Some("Hello"));
    }

    #[test]
    fn load_one_element_array_keeps_array_shape() {
        let loaded = load_records(r#"[{"title": "Only"}]"#).expect("should load");

        assert!(loaded.is_array);
        assert_eq!(loaded.records.len(), 1);
    }

    #[test]
    fn output_shape_follows_input_shape() {
        let one = json!({"title": "Only"});

        assert_eq!(
            render_output(vec![one.clone()], true),
            Some(json!([{"title": "Only"}]))
        );
        assert_eq!(render_output(vec![one.clone()], false), Some(one));
        assert_eq!(render_output(Vec::new(), true), Some(json!([])));
        assert_eq!(render_output(Vec::new(), false), None);
        assert_eq!(
            render_output(vec![json!({"a": 1}), json!({"b": 2})], true),
            Some(json!([{"a": 1}, {"b": 2}]))
        );
    }

    #[test]
    fn load_array_from_file() {
        let mut file = NamedTempFile::new().expect("should create temp file");
        write!(file, r#"[{{"title": "One"}}, {{"title": "Two"}}]"#).expect("should write");

        let loaded = load_records(&file.path().display().to_string()).expect("should load");

        assert!(loaded.is_array);
        let titles: Vec<_> = loaded.records.iter().filter_map(Record::title).collect();
        assert_eq!(titles, vec!["One", "Two"]);
    }

    #[test]
    fn load_rejects_invalid_input() {
        assert!(load_records("not json").is_err());
        assert!(load_records("42").is_err());
        assert!(load_records(r#"[{"title": "ok"}, 3]"#).is_err());
    }
}
