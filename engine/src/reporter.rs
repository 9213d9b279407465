//! # Engagement reporting
//!
//! Telemetry, not transactions: reports are spawned and forgotten, a lost
//! event is cheaper than a blocked or erroring storefront. Failures are
//! logged at debug and dropped; nothing is retried.

use std::sync::Arc;

use api::models::ProductView;
use tracing::debug;

use crate::fetcher::Backend;
use crate::identity::{IdentityStore, read_stored_user};

#[derive(Clone)]
pub struct Reporter {
    backend: Arc<dyn Backend>,
    store: Arc<dyn IdentityStore>,
}

impl Reporter {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<dyn IdentityStore>) -> Self {
        Self { backend, store }
    }

    /// Fire-and-forget product view report. Returns before the request is
    /// sent; admin sessions are never reported.
    pub fn report_view(&self, product_id: &str, title: &str, view_duration_ms: u64) {
        let user = read_stored_user(&*self.store);
        if user.as_ref().is_some_and(|u| u.is_admin()) {
            debug!("Skipping view report for admin session");
            return;
        }

        let view = ProductView {
            product_id: product_id.to_string(),
            product_name: title.to_string(),
            view_duration_ms,
            user_id: user.and_then(|u| u.user_id),
        };

        let backend = self.backend.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.track_product_view(view).await {
                debug!("View report dropped: {e}");
            }
        });
    }
}
