use serde::{Deserialize, Serialize};

/// Envelope for `GET /recommendations`.
///
/// Every field defaults: a response missing the success flag or the data
/// payload deserializes to "no recommendations" instead of failing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecommendationResponse {
    pub success: bool,
    pub data: Option<RecommendationData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecommendationData {
    pub has_tracking_data: bool,
    pub products: Vec<Product>,
}

/// A product card as the backend serves it. Product records come out of the
/// store database in snake_case, unlike the camelCase envelope around them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Product {
    pub book_id: u64,
    pub title: String,
    pub author_name: Option<String>,
    pub price: Option<f64>,
    pub cover_image: Option<String>,
    pub rating: Option<f32>,
    pub review_count: Option<u32>,
    pub stock: Option<i64>,
}

/// A product-view event as the engagement pipeline produces it. The client
/// session id is attached at the transport layer, not by the producer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductView {
    pub product_id: String,
    pub product_name: String,
    pub view_duration_ms: u64,
    pub user_id: Option<i64>,
}

/// A cart mutation event for `POST /tracking/cart`.
#[derive(Debug, Clone, PartialEq)]
pub struct CartEvent {
    pub product_id: String,
    pub product_name: String,
    pub action: CartAction,
    pub quantity: u32,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CartAction {
    Add,
    Remove,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TrackViewPayload<'a> {
    pub product_id: &'a str,
    pub product_name: &'a str,
    pub view_duration: u64,
    pub session_id: &'a str,
    pub user_id: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TrackCartPayload<'a> {
    pub product_id: &'a str,
    pub product_name: &'a str,
    pub action: CartAction,
    pub quantity: u32,
    pub session_id: &'a str,
    pub user_id: Option<i64>,
}
