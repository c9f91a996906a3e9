//! Worker Selector: returns the base endpoint for an upstream generation
//! worker. A single-operation interface so round-robin, health-filtered,
//! or resource-weighted strategies are drop-in replacements.

use async_trait::async_trait;

#[async_trait]
pub trait WorkerSelector: Send + Sync {
    async fn select(&self) -> String;
}

/// Default strategy: always returns a fixed configured URL.
pub struct StaticWorkerSelector {
    base_url: String,
}

impl StaticWorkerSelector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl WorkerSelector for StaticWorkerSelector {
    async fn select(&self) -> String {
        self.base_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_selector_always_returns_the_same_url() {
        let selector = StaticWorkerSelector::new("http://localhost:8001");
        assert_eq!(selector.select().await, "http://localhost:8001");
        assert_eq!(selector.select().await, "http://localhost:8001");
    }
}
