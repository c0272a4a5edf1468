//! PropMatch CLI
//!
//! Demonstration harness for the hybrid property search engine. Wires
//! the in-memory reference adapters up to a small fixture listing set
//! so the full retrieval -> BM25 -> LLM -> fusion -> constraint pipeline
//! runs end to end without any network dependency.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

mod app;
mod fixtures;
mod output;

use app::{Cli, Commands};
use propmatch_core::adapters::{Embedder, InMemoryCache, InMemoryListingStore, InMemoryVectorIndex, LlmClient, VectorIndex};
use propmatch_core::config::Config;
use propmatch_core::domain::Query;
use propmatch_core::explanation::{ExplanationEngine, ExplanationEvent};
use propmatch_core::orchestrator::RequestOrchestrator;
use propmatch_core::ranker::HybridRanker;
use propmatch_core::security::SecurityGate;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let cli = Cli::parse();
    let config = Config::default();

    let listings = fixtures::seed_listings();
    let store = Arc::new(InMemoryListingStore::new(listings.clone()));

    let embedder: Arc<dyn Embedder> = Arc::new(fixtures::FixtureEmbedder { dims: 64 });
    let vector_index = Arc::new(InMemoryVectorIndex::default());
    for listing in &listings {
        let vector = embedder.embed(&fixtures::listing_text(listing)).await?;
        let metadata = serde_json::json!({
            "price": listing.price,
            "property_type": listing.property_type.to_string(),
            "bedrooms": listing.bedrooms,
            "city": listing.location.city,
        });
        vector_index.upsert(listing.listing_key, vector, metadata).await?;
    }

    let llm: Arc<dyn LlmClient> = if cli.simulate_llm_down {
        Arc::new(fixtures::FailingLlmClient)
    } else {
        Arc::new(fixtures::FixtureLlmClient)
    };

    let ranker = Arc::new(HybridRanker::new(store.clone(), embedder, vector_index, llm.clone(), config.clone()));
    ranker.rebuild_corpus().await?;

    let cache: Arc<dyn propmatch_core::adapters::Cache> = Arc::new(InMemoryCache::default());
    let explanation_engine = Arc::new(ExplanationEngine::new(
        store,
        llm,
        cache.clone(),
        config.explanation_ttl_seconds,
        config.llm_primary.clone(),
    ));
    let gate = Arc::new(SecurityGate::new(cache, config.clone()));
    let orchestrator = RequestOrchestrator::new(ranker, explanation_engine, gate, config.query_max_chars);

    match cli.command {
        Commands::Search(args) => {
            let text = args.query.join(" ");
            let mut query = Query::new(text);
            query.page = args.page;
            query.page_size = args.page_size;
            let response = orchestrator.search(&args.ip, "propmatch-cli", query).await?;
            print!("{}", output::format_search_results(&response.results, cli.format));
        }
        Commands::Explain(args) => {
            let text = args.query.join(" ");
            let record = orchestrator.explain(&args.ip, "propmatch-cli", &text, args.listing).await?;
            print!("{}", output::format_explanation(&record, cli.format));
        }
        Commands::ExplainStream(args) => {
            let text = args.query.join(" ");
            let events = orchestrator.explain_stream(&args.ip, "propmatch-cli", &text, args.listing).await;
            for event in events {
                match event {
                    ExplanationEvent::Cached => println!("[cached]"),
                    ExplanationEvent::Start => println!("[start]"),
                    ExplanationEvent::Chunk { content } => print!("{content}"),
                    ExplanationEvent::Complete { explanation } => {
                        println!();
                        print!("{}", output::format_explanation(&explanation, cli.format));
                    }
                    ExplanationEvent::Error { message } => eprintln!("[error] {message}"),
                }
            }
        }
        Commands::Reindex => {
            println!("bm25 corpus rebuilt from {} fixture listings", listings.len());
        }
    }

    Ok(())
}
