//! Request extractors whose rejections use the API error body.

use axum::extract::{FromRequest, FromRequestParts, Query};

use super::error::ApiError;

/// Query string extractor rejecting with [`ApiError`].
#[derive(Debug, FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// JSON body extractor rejecting with [`ApiError`].
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);
