use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use papersmith_backend::{fake_embeddings_requested, BackendKind};
use papersmith_cli::documents::load_documents;
use papersmith_core::config::{expand_path, Config, Settings, StoreKind};
use papersmith_core::types::DocumentFilter;
use papersmith_rag::RagEngine;
use papersmith_vector::LanceStore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage:
  papersmith index <dir> [--rebuild]
  papersmith ask \"<question>\" [--doc ID]... [--top-k N]
  papersmith remove <document_id>
  papersmith status";

fn usage_exit() -> ! {
    eprintln!("{}", USAGE);
    std::process::exit(2);
}

fn settings() -> anyhow::Result<Settings> {
    let config = Config::load()?;
    let mut settings = config.settings()?;
    if fake_embeddings_requested() {
        info!("APP_USE_FAKE_EMBEDDINGS set; using the hashing embedder");
        settings.backend.embedding = BackendKind::Fake.as_str().to_string();
    }
    Ok(settings)
}

/// Serve the last committed index, if the configured store keeps one.
async fn load_persisted(engine: &RagEngine, settings: &Settings) -> anyhow::Result<bool> {
    if settings.store.kind != StoreKind::Lance {
        return Ok(false);
    }
    let uri = expand_path(&settings.store.uri).to_string_lossy().to_string();
    match LanceStore::open_active(&uri, &settings.store.table).await? {
        Some(store) => {
            engine.load_index(Arc::new(store)).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

async fn index(engine: &RagEngine, settings: &Settings, args: &[String]) -> anyhow::Result<()> {
    let mut dir = None;
    let mut rebuild = false;
    for arg in args {
        match arg.as_str() {
            "--rebuild" => rebuild = true,
            a if !a.starts_with('-') => dir = Some(PathBuf::from(a)),
            _ => usage_exit(),
        }
    }
    let Some(dir) = dir else { usage_exit() };
    let documents = load_documents(&dir);
    println!("Found {} papers in {}", documents.len(), dir.display());

    let loaded = load_persisted(engine, settings).await?;
    if rebuild || !loaded {
        let spinner = ProgressBar::new_spinner();
        spinner.set_message(format!("rebuilding index from {} papers", documents.len()));
        spinner.enable_steady_tick(std::time::Duration::from_millis(120));
        let reports = engine.rebuild_index(&documents).await;
        spinner.finish_and_clear();
        let chunks: usize = reports?.iter().map(|r| r.chunk_count).sum();
        println!("Rebuilt index: {} papers, {} chunks", documents.len(), chunks);
        return Ok(());
    }

    let pb = ProgressBar::new(documents.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} papers {msg}")?
            .progress_chars("#>-"),
    );
    let mut failed = 0usize;
    for doc in &documents {
        pb.set_message(doc.metadata.document_id.clone());
        if let Err(e) = engine.index_document(&doc.text, &doc.metadata).await {
            failed += 1;
            pb.suspend(|| error!(document_id = %doc.metadata.document_id, error = %e, "indexing failed"));
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");
    let status = engine.status().await;
    println!("Indexed {} papers ({} failed); index holds {} chunks", documents.len() - failed, failed, status.chunk_count);
    Ok(())
}

async fn ask(engine: &RagEngine, args: &[String]) -> anyhow::Result<()> {
    let mut question = None;
    let mut docs = Vec::new();
    let mut top_k = engine.default_top_k();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--doc" => {
                let Some(id) = args.get(i + 1) else { usage_exit() };
                docs.push(id.clone());
                i += 1;
            }
            "--top-k" => {
                let Some(n) = args.get(i + 1).and_then(|v| v.parse().ok()) else { usage_exit() };
                top_k = n;
                i += 1;
            }
            a if !a.starts_with('-') => question = Some(a.to_string()),
            _ => usage_exit(),
        }
        i += 1;
    }
    let Some(question) = question else { usage_exit() };
    let filter: DocumentFilter = docs.into_iter().collect();

    match engine.answer_question(&question, Some(&filter), top_k).await {
        Ok(answer) => {
            println!("{}\n", answer.answer_text);
            println!(
                "support={:.2} attempts={}{}",
                answer.support_score,
                answer.attempts,
                if answer.degraded { " (degraded)" } else { "" }
            );
            for (n, source) in answer.sources.iter().enumerate() {
                println!(
                    "  [{}] score={:.4} {} ({}, {})",
                    n + 1,
                    source.score,
                    source.metadata.title,
                    source.metadata.document_id,
                    source.metadata.section_label
                );
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "question failed");
            eprintln!("{}", e.user_message());
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else { usage_exit() };
    let settings = settings()?;
    let engine = RagEngine::from_settings(&settings)?;
    info!(embedder = engine.embedder_id(), store = ?settings.store.kind, "engine ready");

    match command.as_str() {
        "index" => index(&engine, &settings, &args[1..]).await,
        "ask" => {
            load_persisted(&engine, &settings).await?;
            ask(&engine, &args[1..]).await
        }
        "remove" => {
            let Some(id) = args.get(1) else { usage_exit() };
            load_persisted(&engine, &settings).await?;
            let removed = engine.remove_document(id).await?;
            println!("Removed {} chunks of {}", removed, id);
            Ok(())
        }
        "status" => {
            load_persisted(&engine, &settings).await?;
            let status = engine.status().await;
            println!("state={} chunks={}", status.state, status.chunk_count);
            Ok(())
        }
        _ => usage_exit(),
    }
}
