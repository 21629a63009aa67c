//! End-to-end engine test over the in-memory store and deterministic
//! mocks: seed → crawl → ingest → query.

use std::sync::Arc;
use std::time::Duration;

use docrag::config::{ProcessorConfig, SearchConfig};
use docrag::store::FrontierStore;
use docrag::testing::{MockEmbedder, MockFetcher};
use docrag::{
    ContentExtractor, CrawlScheduler, Embedder, ExtractorConfig, IngestProcessor, MemoryStore,
    RetrievalEngine, SchedulerConfig,
};

const ROOT: &str = "https://docs.example.com/documentation/framework";

fn doc_page(title: &str, topic: &str) -> String {
    let mut body = format!("<h1>{title}</h1>");
    for i in 0..5 {
        body.push_str(&format!(
            "<p>Section {i}: {topic} explained in enough depth that the extraction \
             clears the minimum content threshold with room to spare.</p>"
        ));
    }
    format!("<html><body><div id=\"app-main\">{body}</div></body></html>")
}

fn build_engine(
    fetcher: MockFetcher,
    store: Arc<MemoryStore>,
    mock_embedder: MockEmbedder,
) -> (CrawlScheduler<MemoryStore>, RetrievalEngine<MemoryStore>) {
    let embedder = Arc::new(Embedder::new(Arc::new(mock_embedder)));

    let processor = Arc::new(IngestProcessor::new(
        Arc::new(fetcher),
        ContentExtractor::new(ExtractorConfig::default()),
        embedder.clone(),
        store.clone(),
        ProcessorConfig {
            batch_size: 5,
            chunk_size: 5000,
            contextual_chunks: false,
            min_content_chars: 100,
        },
    ));

    let scheduler = CrawlScheduler::new(
        store.clone(),
        processor,
        SchedulerConfig {
            batch_size: 30,
            max_concurrent: 30,
            wave_size: 5,
            crawl_interval: Duration::from_millis(10),
        },
    );

    let retrieval = RetrievalEngine::new(
        store,
        embedder,
        None,
        SearchConfig {
            use_hybrid: true,
            use_reranking: false,
            oversample: 1,
        },
    );

    (scheduler, retrieval)
}

#[tokio::test]
async fn test_crawl_ingest_query_loop() {
    let store = Arc::new(MemoryStore::new());

    let child_a = format!("{ROOT}/navigation");
    let child_b = format!("{ROOT}/animation");
    let fetcher = MockFetcher::new()
        .with_page_and_links(ROOT, doc_page("Framework", "the framework overview"), [
            child_a.clone(),
            child_b.clone(),
        ])
        .with_page(&child_a, doc_page("Navigation", "navigation stacks and split views"))
        .with_page(&child_b, doc_page("Animation", "spring animations and transitions"));

    // Pin every text mentioning the navigation topic (the query and the
    // navigation page's chunks) to the same vector, so the expected winner
    // is unambiguous.
    let mut pinned = vec![0.0; 16];
    pinned[0] = 1.0;
    let mock_embedder = MockEmbedder::new(16).with_override("navigation stacks", pinned);
    let (scheduler, retrieval) = build_engine(fetcher, store.clone(), mock_embedder);

    scheduler.seed(ROOT).await.unwrap();

    // Tick 1 crawls the root and discovers the two children; tick 2 crawls
    // the children (they lease first at crawl_count 0).
    assert_eq!(scheduler.tick().await.unwrap(), 1);
    assert_eq!(store.page_count(), 3);
    assert_eq!(scheduler.tick().await.unwrap(), 3);

    // Every processed page owns a contiguous, zero-based chunk set.
    for url in [ROOT, child_a.as_str(), child_b.as_str()] {
        assert!(store.is_processed(url), "{url} not processed");
        let ordinals = store.ordinals(url);
        assert!(!ordinals.is_empty());
        assert_eq!(ordinals, (0..ordinals.len() as i32).collect::<Vec<_>>());
    }

    // Retrieval finds the navigation page for a navigation question, and
    // repeated queries return identical orderings.
    let outcome = retrieval
        .query("navigation stacks and split views", 3)
        .await
        .unwrap();
    assert!(!outcome.results.is_empty());
    assert!(outcome.results[0].url.contains("navigation"));

    let again = retrieval
        .query("navigation stacks and split views", 3)
        .await
        .unwrap();
    let urls: Vec<_> = outcome.results.iter().map(|r| &r.url).collect();
    let urls_again: Vec<_> = again.results.iter().map(|r| &r.url).collect();
    assert_eq!(urls, urls_again);
}

#[tokio::test]
async fn test_failed_fetch_does_not_block_siblings() {
    let store = Arc::new(MemoryStore::new());
    let healthy = format!("{ROOT}/healthy");

    let fetcher = MockFetcher::new()
        .with_transient_failure(ROOT)
        .with_page(&healthy, doc_page("Healthy", "a page that fetches fine"));

    let (scheduler, _) = build_engine(fetcher, store.clone(), MockEmbedder::new(16));
    store.insert_url(ROOT).await.unwrap();
    store.insert_url(&healthy).await.unwrap();

    assert_eq!(scheduler.tick().await.unwrap(), 2);

    assert!(!store.is_processed(ROOT));
    assert!(store.is_processed(&healthy));
    // Both leases advanced regardless of outcome.
    assert_eq!(store.crawl_count(ROOT), Some(1));
    assert_eq!(store.crawl_count(&healthy), Some(1));
}
