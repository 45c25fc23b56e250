//! Document ingestion through the orchestrator.

use super::*;
use crate::blob::{document_key, BlobStore};
use crate::rag::QueryOptions;
use crate::types::{DocumentMetadata, IngestionStage, IngestionState};
use std::collections::BTreeMap;

fn meta(title: &str) -> DocumentMetadata {
    DocumentMetadata::new(title, format!("{}.txt", title))
}

/// Three 30-char windows; the middle one fails to embed.
fn mixed_text() -> String {
    format!("{}{}{}", "alpha ".repeat(5), "FAIL! ".repeat(5), "alpha ".repeat(5))
}

#[tokio::test]
async fn test_ingestion_walks_every_state() {
    let h = harness();
    let kb = h
        .orchestrator
        .create_knowledge_base("Docs", "product docs", BTreeMap::new())
        .await
        .unwrap();

    let content = "alpha release notes. Everything you need to know.";
    let report = h
        .orchestrator
        .add_document(&kb.id, content, meta("Notes"), None)
        .await
        .unwrap();

    assert_eq!(report.state, IngestionState::Completed);
    assert_eq!(
        report.history,
        vec![
            IngestionState::Pending,
            IngestionState::Chunking,
            IngestionState::Embedding,
            IngestionState::Storing,
            IngestionState::Completed,
        ]
    );
    assert_eq!(report.chunks_total, 1);
    assert_eq!(report.chunks_stored, 1);
    assert!(report.completed_at.is_some());

    let status = h.orchestrator.document_status(&kb.id, &report.document_id).await.unwrap();
    assert_eq!(status.state, IngestionState::Completed);

    let blob = h
        .blobs
        .get(&document_key(&kb.id, &report.document_id))
        .await
        .unwrap();
    assert_eq!(blob.as_deref(), Some(content.as_bytes()));

    let stored = h.orchestrator.get_knowledge_base(&kb.id).await.unwrap();
    assert_eq!(stored.document_count, 1);
    assert_eq!(stored.total_chunks, 1);
    assert!(stored.updated_at >= kb.updated_at);
}

#[tokio::test]
async fn test_empty_document_fails_at_chunking() {
    let h = harness();
    let kb = h
        .orchestrator
        .create_knowledge_base("Docs", "", BTreeMap::new())
        .await
        .unwrap();

    let err = h
        .orchestrator
        .add_document(&kb.id, "   \n  ", meta("Empty"), Some("empty"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let status = h.orchestrator.document_status(&kb.id, "empty").await.unwrap();
    match status.state {
        IngestionState::Failed { stage, .. } => assert_eq!(stage, IngestionStage::Chunking),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(h.orchestrator.get_knowledge_base(&kb.id).await.unwrap().document_count, 0);
}

#[tokio::test]
async fn test_embedding_failure_degrades_only_that_chunk() {
    let h = harness_with(
        DocumentProcessor::new(30, 0),
        RagSettings::default(),
        None,
        Arc::new(InMemoryVectorStore::new()),
    );
    let kb = h
        .orchestrator
        .create_knowledge_base("Docs", "", BTreeMap::new())
        .await
        .unwrap();

    let report = h
        .orchestrator
        .add_document(&kb.id, &mixed_text(), meta("Mixed"), Some("doc"))
        .await
        .unwrap();
    assert_eq!(report.state, IngestionState::Completed);
    assert_eq!(report.chunks_total, 3);
    assert_eq!(report.chunks_degraded, 1);
    assert_eq!(report.chunks_stored, 3);

    let stored = h.store.get_document_chunks(&kb.id, "doc").await.unwrap();
    assert!(stored[1].degraded);
    assert_eq!(stored[1].embedding, vec![0.0; 3]);

    // A zero threshold would admit the zero vector if degraded chunks were ranked.
    let answer = h
        .orchestrator
        .query(&kb.id, "alpha?", &QueryOptions::new(10, 0.0).without_cache())
        .await
        .unwrap();
    let ids: Vec<&str> = answer.sources.iter().map(|s| s.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["doc_chunk_0", "doc_chunk_2"]);
}

#[tokio::test]
async fn test_all_chunks_degraded_fails_at_embedding() {
    let h = harness();
    let kb = h
        .orchestrator
        .create_knowledge_base("Docs", "", BTreeMap::new())
        .await
        .unwrap();

    let err = h
        .orchestrator
        .add_document(&kb.id, "FAIL on every chunk", meta("Bad"), Some("bad"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Provider(_)));

    let status = h.orchestrator.document_status(&kb.id, "bad").await.unwrap();
    assert_eq!(
        status.history.last().map(|s| s.name()),
        Some("failed")
    );
    assert!(matches!(
        status.state,
        IngestionState::Failed { stage: IngestionStage::Embedding, .. }
    ));
    assert_eq!(h.store.stats(&kb.id).await.unwrap().total_chunks, 0);
}

#[tokio::test]
async fn test_reingesting_replaces_chunks() {
    let h = harness_with(
        DocumentProcessor::new(30, 0),
        RagSettings::default(),
        None,
        Arc::new(InMemoryVectorStore::new()),
    );
    let kb = h
        .orchestrator
        .create_knowledge_base("Docs", "", BTreeMap::new())
        .await
        .unwrap();

    let long = format!("{}{}", "alpha ".repeat(5), "beta ".repeat(12));
    let first = h
        .orchestrator
        .add_document(&kb.id, &long, meta("Doc"), Some("d1"))
        .await
        .unwrap();
    assert!(first.chunks_total > 1);

    h.orchestrator
        .add_document(&kb.id, "beta only", meta("Doc"), Some("d1"))
        .await
        .unwrap();

    let chunks = h.store.get_document_chunks(&kb.id, "d1").await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, "beta only");

    let stored = h.orchestrator.get_knowledge_base(&kb.id).await.unwrap();
    assert_eq!(stored.document_count, 1);
    assert_eq!(stored.total_chunks, 1);
}

#[tokio::test]
async fn test_failed_reingest_keeps_previous_version() {
    let store = Arc::new(FlakyStore::default());
    let h = harness_with(
        DocumentProcessor::default(),
        RagSettings::default(),
        None,
        store.clone(),
    );
    let kb = h
        .orchestrator
        .create_knowledge_base("Docs", "", BTreeMap::new())
        .await
        .unwrap();
    h.orchestrator
        .add_document(&kb.id, "alpha one", meta("Doc"), Some("d1"))
        .await
        .unwrap();

    store.fail_upserts.store(true, Ordering::SeqCst);
    let err = h
        .orchestrator
        .add_document(&kb.id, "beta two", meta("Doc"), Some("d1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Storage(_)));

    let chunks = h.store.get_document_chunks(&kb.id, "d1").await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, "alpha one");

    let stored = h.orchestrator.get_knowledge_base(&kb.id).await.unwrap();
    assert_eq!(stored.document_count, 1);
    assert_eq!(stored.total_chunks, 1);

    let blob = h.blobs.get(&document_key(&kb.id, "d1")).await.unwrap();
    assert_eq!(blob.as_deref(), Some("alpha one".as_bytes()));

    let status = h.orchestrator.document_status(&kb.id, "d1").await.unwrap();
    assert!(matches!(
        status.state,
        IngestionState::Failed { stage: IngestionStage::Storing, .. }
    ));

    store.fail_upserts.store(false, Ordering::SeqCst);
    h.orchestrator
        .add_document(&kb.id, "beta two", meta("Doc"), Some("d1"))
        .await
        .unwrap();
    let chunks = h.store.get_document_chunks(&kb.id, "d1").await.unwrap();
    assert_eq!(chunks[0].content, "beta two");
    assert_eq!(h.orchestrator.get_knowledge_base(&kb.id).await.unwrap().document_count, 1);
}

#[tokio::test]
async fn test_same_document_id_in_two_bases_has_separate_status() {
    let h = harness();
    let first = h
        .orchestrator
        .create_knowledge_base("First", "", BTreeMap::new())
        .await
        .unwrap();
    let second = h
        .orchestrator
        .create_knowledge_base("Second", "", BTreeMap::new())
        .await
        .unwrap();

    h.orchestrator
        .add_document(&first.id, "alpha text", meta("A"), Some("shared"))
        .await
        .unwrap();
    h.orchestrator
        .add_document(&second.id, "   ", meta("A"), Some("shared"))
        .await
        .unwrap_err();

    let ok = h.orchestrator.document_status(&first.id, "shared").await.unwrap();
    assert_eq!(ok.state, IngestionState::Completed);
    let failed = h.orchestrator.document_status(&second.id, "shared").await.unwrap();
    assert!(matches!(
        failed.state,
        IngestionState::Failed { stage: IngestionStage::Chunking, .. }
    ));

    h.orchestrator.delete_knowledge_base(&second.id).await.unwrap();
    assert_eq!(
        h.orchestrator
            .document_status(&first.id, "shared")
            .await
            .unwrap()
            .state,
        IngestionState::Completed
    );
}

#[tokio::test]
async fn test_delete_document() {
    let h = harness();
    let kb = h
        .orchestrator
        .create_knowledge_base("Docs", "", BTreeMap::new())
        .await
        .unwrap();
    h.orchestrator
        .add_document(&kb.id, "alpha text", meta("A"), Some("a"))
        .await
        .unwrap();
    h.orchestrator
        .add_document(&kb.id, "beta text", meta("B"), Some("b"))
        .await
        .unwrap();

    assert_eq!(h.orchestrator.delete_document(&kb.id, "a").await.unwrap(), 1);
    assert_eq!(h.blobs.get(&document_key(&kb.id, "a")).await.unwrap(), None);
    assert!(h.orchestrator.document_status(&kb.id, "a").await.unwrap_err().is_not_found());

    let stats = h.orchestrator.stats(&kb.id).await.unwrap();
    assert_eq!(stats.document_count, 1);
    assert_eq!(stats.total_chunks, 1);
    assert_eq!(stats.unique_documents, 1);

    assert!(h
        .orchestrator
        .delete_document(&kb.id, "a")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_unknown_knowledge_base_is_not_found() {
    let h = harness();
    let err = h
        .orchestrator
        .add_document("missing", "alpha", meta("A"), None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(h.orchestrator.stats("missing").await.unwrap_err().is_not_found());
    assert!(h
        .orchestrator
        .delete_knowledge_base("missing")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_delete_knowledge_base_removes_collection_and_blobs() {
    let h = harness();
    let kb = h
        .orchestrator
        .create_knowledge_base("Docs", "", BTreeMap::new())
        .await
        .unwrap();
    h.orchestrator
        .add_document(&kb.id, "alpha text", meta("A"), Some("a"))
        .await
        .unwrap();

    h.orchestrator.delete_knowledge_base(&kb.id).await.unwrap();

    assert!(!h.store.collection_exists(&kb.id).await.unwrap());
    assert!(h.blobs.list("").await.unwrap().is_empty());
    assert!(h.orchestrator.list_knowledge_bases().await.is_empty());
    assert!(h.orchestrator.document_status(&kb.id, "a").await.is_err());
}

#[tokio::test]
async fn test_blank_name_is_rejected() {
    let h = harness();
    let err = h
        .orchestrator
        .create_knowledge_base("  ", "", BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}
