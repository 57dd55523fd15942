use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing::Level;

use folio_core::{
    search_documents, Document, DocumentStorage, FileStorage, IngestConfig, IngestionService,
    InMemoryStorage, OutputFormat, ProcessingStatus, SearchOptions,
};

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Ingest EPUB and PDF files into a hierarchical chapter model")]
struct Args {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process one or more EPUB/PDF files
    Process {
        /// Input files
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Path to custom config file (YAML format)
        #[arg(short, long)]
        config: Option<String>,

        /// Output format: document, hierarchy, or flat
        #[arg(short = 'f', long, default_value = "document")]
        output_format: String,

        /// Output file path, single input only (auto-generated if not specified)
        #[arg(short, long)]
        output: Option<String>,

        /// Also persist completed documents into this store directory
        #[arg(long)]
        store: Option<String>,

        /// Enable detailed profiling of all pipeline steps
        #[arg(long)]
        profile: bool,
    },
    /// Print a stored document
    Show {
        id: String,

        #[arg(long, default_value = "folio_store")]
        store: String,

        /// Output format: document, hierarchy, or flat
        #[arg(short = 'f', long, default_value = "hierarchy")]
        output_format: String,
    },
    /// List stored documents
    List {
        #[arg(long, default_value = "folio_store")]
        store: String,
    },
    /// Substring search over stored chapter text
    Search {
        query: String,

        #[arg(long, default_value = "folio_store")]
        store: String,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Characters of context on each side of a match
        #[arg(long, default_value_t = 60)]
        radius: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Process {
            inputs,
            config,
            output_format,
            output,
            store,
            profile,
        } => process(&inputs, config.as_deref(), &output_format, output, store, profile),
        Command::Show {
            id,
            store,
            output_format,
        } => show(&id, &store, &output_format),
        Command::List { store } => list(&store),
        Command::Search {
            query,
            store,
            limit,
            radius,
        } => search(&query, &store, limit, radius),
    }
}

fn process(
    inputs: &[String],
    config_path: Option<&str>,
    output_format: &str,
    output: Option<String>,
    store: Option<String>,
    profile: bool,
) -> Result<()> {
    let format: OutputFormat = output_format.parse()?;
    if output.is_some() && inputs.len() > 1 {
        return Err(anyhow!("--output only applies to a single input"));
    }

    let config = IngestConfig::load_with_fallback(config_path);
    if let Some(path) = config_path {
        println!("📋 Loaded config from: {}", path);
    } else {
        println!("📋 Using default config");
    }

    let storage: Arc<dyn DocumentStorage> = match &store {
        Some(dir) => Arc::new(FileStorage::new(dir)?),
        None => Arc::new(InMemoryStorage::new()),
    };
    let service = IngestionService::with_profiling(config, storage, profile)?;

    // Submit everything first so documents run side by side
    let mut jobs = Vec::new();
    for input in inputs {
        let bytes = std::fs::read(input).map_err(|e| anyhow!("Failed to read {}: {}", input, e))?;
        let file_name = Path::new(input).file_name().and_then(|n| n.to_str());
        println!("📄 Processing: {}", input);
        jobs.push((input, service.process_document(bytes, file_name)));
    }

    let mut failures = 0;
    for (input, id) in jobs {
        let Some(result) = service.wait_for(&id, None) else {
            return Err(anyhow!("Lost track of {}", id));
        };
        match (result.status, result.document) {
            (ProcessingStatus::Completed, Some(document)) => {
                print_summary(input, &document);
                let path = output.clone().unwrap_or_else(|| default_output_path(input, format));
                document.save_with_format(&path, format)?;
            }
            _ => {
                failures += 1;
                let message = result
                    .error
                    .map(|e| format!("{:?}: {}", e.kind, e.message))
                    .unwrap_or_else(|| "unknown error".to_string());
                eprintln!("❌ {} failed: {}", input, message);
            }
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(input: &str, document: &Document) {
    println!("✅ {} -> {}", input, document.id);
    println!("   - Title: {}", document.title);
    println!("   - Format: {}", document.format.as_str());
    println!("   - Chapters: {}", document.chapters.len());
    println!("   - Images: {}", document.images.len());
    for warning in document.warnings() {
        match &warning.unit {
            Some(unit) => println!("   ⚠️  {:?} ({}): {}", warning.kind, unit, warning.message),
            None => println!("   ⚠️  {:?}: {}", warning.kind, warning.message),
        }
    }
}

fn default_output_path(input: &str, format: OutputFormat) -> String {
    let input_name = Path::new(input)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let suffix = match format {
        OutputFormat::Document => "document",
        OutputFormat::Hierarchy => "hierarchy",
        OutputFormat::Flat => "flat",
    };
    format!("{input_name}_folio_{suffix}.json")
}

fn show(id: &str, store: &str, output_format: &str) -> Result<()> {
    let format: OutputFormat = output_format.parse()?;
    let storage = FileStorage::new(store)?;
    let document = storage
        .get_document(id)?
        .ok_or_else(|| anyhow!("No document {} in {}", id, store))?;
    println!("{}", document.to_json(format)?);
    Ok(())
}

fn list(store: &str) -> Result<()> {
    let storage = FileStorage::new(store)?;
    for id in storage.list_documents()? {
        match storage.get_document(&id)? {
            Some(document) => println!(
                "{}  {}  {} chapters",
                id,
                document.title,
                document.chapters.len()
            ),
            None => println!("{}", id),
        }
    }
    Ok(())
}

fn search(query: &str, store: &str, limit: usize, radius: usize) -> Result<()> {
    let storage = FileStorage::new(store)?;
    let mut documents = Vec::new();
    for id in storage.list_documents()? {
        if let Some(document) = storage.get_document(&id)? {
            documents.push(document);
        }
    }

    let options = SearchOptions {
        limit,
        snippet_radius: radius,
    };
    let hits = search_documents(&documents, query, &options);
    if hits.is_empty() {
        println!("No matches for {:?}", query);
        return Ok(());
    }
    for hit in hits {
        println!(
            "🔎 {} / {} [{}] {}",
            hit.document_title,
            hit.chapter_title,
            hit.chapter_order,
            hit.chapter_id
        );
        println!("   {}", hit.snippet);
    }
    Ok(())
}
