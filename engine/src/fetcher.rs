//! # Recommendation fetching
//!
//! Absence of recommendations is a normal outcome, not an error: transport
//! failures, non-success envelopes, and missing payloads all map to the
//! empty set. Nothing here surfaces to the UI.

use api::models::{ProductView, RecommendationResponse};
use api::{ApiError, StoreApi};
use async_trait::async_trait;
use tracing::debug;

/// The backend surface the engine consumes. Object-safe so tests can
/// substitute a scripted double.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn recommendations(&self, limit: u32) -> Result<RecommendationResponse, ApiError>;

    async fn track_product_view(&self, view: ProductView) -> Result<(), ApiError>;
}

#[async_trait]
impl Backend for StoreApi {
    async fn recommendations(&self, limit: u32) -> Result<RecommendationResponse, ApiError> {
        StoreApi::recommendations(self, limit).await
    }

    async fn track_product_view(&self, view: ProductView) -> Result<(), ApiError> {
        StoreApi::track_product_view(self, &view).await
    }
}

/// The current recommendation state, replaced wholesale on every commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecommendationSet {
    pub has_tracking_data: bool,
    pub products: Vec<api::models::Product>,
}

impl RecommendationSet {
    /// A non-empty list without tracking data is a server fallback and must
    /// not be shown.
    pub fn displayable(&self) -> bool {
        self.has_tracking_data && !self.products.is_empty()
    }

    pub fn from_response(res: RecommendationResponse) -> Self {
        if !res.success {
            return Self::default();
        }
        match res.data {
            Some(data) => Self {
                has_tracking_data: data.has_tracking_data,
                products: data.products,
            },
            None => Self::default(),
        }
    }
}

/// Fetch up to `limit` recommendations, degrading every failure mode to the
/// empty set.
pub async fn fetch(backend: &dyn Backend, limit: u32) -> RecommendationSet {
    match backend.recommendations(limit).await {
        Ok(res) => RecommendationSet::from_response(res),
        Err(e) => {
            debug!("Recommendation fetch failed, treating as no data: {e}");
            RecommendationSet::default()
        }
    }
}
