//! # Storefront API client
//!
//! HTTP client for the two backend surfaces the home-view engagement
//! pipeline consumes.
//!
//! ## Endpoints
//!
//! - `GET /recommendations?limit=N`: personalized product list plus a
//!   `hasTrackingData` flag saying whether the list is backed by real
//!   behavioral history or is a generic fallback.
//! - `POST /tracking/product-view`: impression/view telemetry.
//! - `POST /tracking/cart`: cart mutation telemetry (used by the cart UI,
//!   exposed here because it shares the session/user correlation fields).
//!
//! ## Notes
//!
//! - Tracking calls are best-effort by contract. The client reports
//!   transport and status failures to its caller, but callers are expected
//!   to log and drop them rather than retry.
//! - Every tracking payload carries a persisted client session id
//!   ([`SessionId`]) so the backend can stitch events from one browsing
//!   session together even for anonymous users.
pub mod error;
pub mod models;
pub mod session;

pub use error::ApiError;
pub use session::SessionId;

use models::{
    CartEvent, ProductView, RecommendationResponse, TrackCartPayload, TrackViewPayload,
};
use reqwest::Client;

pub struct StoreApi {
    client: Client,
    base_url: String,
    session: SessionId,
}

impl StoreApi {
    pub fn new(base_url: impl Into<String>, session: SessionId) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            session,
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub async fn recommendations(&self, limit: u32) -> Result<RecommendationResponse, ApiError> {
        let res = self
            .client
            .get(format!("{}/recommendations", self.base_url))
            .query(&[("limit", limit)])
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(ApiError::Status(res.status()));
        }

        Ok(res.json().await?)
    }

    pub async fn track_product_view(&self, view: &ProductView) -> Result<(), ApiError> {
        let payload = TrackViewPayload {
            product_id: &view.product_id,
            product_name: &view.product_name,
            view_duration: view.view_duration_ms,
            session_id: self.session.as_str(),
            user_id: view.user_id,
        };

        self.post_tracking("product-view", &payload).await
    }

    pub async fn track_cart_action(&self, event: &CartEvent) -> Result<(), ApiError> {
        let payload = TrackCartPayload {
            product_id: &event.product_id,
            product_name: &event.product_name,
            action: event.action,
            quantity: event.quantity,
            session_id: self.session.as_str(),
            user_id: event.user_id,
        };

        self.post_tracking("cart", &payload).await
    }

    async fn post_tracking<T: serde::Serialize>(
        &self,
        route: &str,
        payload: &T,
    ) -> Result<(), ApiError> {
        let res = self
            .client
            .post(format!("{}/tracking/{route}", self.base_url))
            .json(payload)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(ApiError::Status(res.status()));
        }

        Ok(())
    }
}
