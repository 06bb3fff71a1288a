use async_trait::async_trait;

/// A single retrieved passage scored against a query.
#[derive(Debug, Clone)]
pub struct RetrievedPassage {
    pub source: String,
    pub content: String,
    pub score: f32,
}

/// Opaque retrieval seam. The engine depends only on this trait; vector
/// store and embedding internals live entirely outside it.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn name(&self) -> &str;

    async fn retrieve(&self, query: &str, top_k: usize) -> Vec<RetrievedPassage>;
}

/// Stand-in used when a mode wants retrieval but no retriever was
/// configured. Always returns no passages, making the Retriever node a
/// pure no-op rather than requiring the builder to special-case `None`.
pub struct NullRetriever;

#[async_trait]
impl Retriever for NullRetriever {
    fn name(&self) -> &str {
        "null"
    }

    async fn retrieve(&self, _query: &str, _top_k: usize) -> Vec<RetrievedPassage> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_retriever_returns_nothing() {
        let retriever = NullRetriever;
        let passages = retriever.retrieve("anything", 5).await;
        assert!(passages.is_empty());
    }
}
