pub mod anthropic;
pub mod models;
pub mod openai;
pub mod passthrough;
pub mod responses;
pub mod spend;

use axum::http::Method;
use bytes::Bytes;
use gateway_core::token_manager::bearer_header;
use gateway_core::{GatewayError, TokenManager};
use std::sync::Arc;

/// Shared non-streaming unary call: attach the bearer token and send.
/// Every handler that needs a plain upstream request (models list, model
/// info) goes through this rather than reaching into `TokenManager`
/// directly, so the `Authorization` header wiring lives in one place.
pub(crate) async fn authorized_get(
    token_manager: &Arc<TokenManager>,
    url: &str,
) -> Result<Bytes, GatewayError> {
    let token = token_manager.get_access_token().await?;
    let header = bearer_header(&token)?;
    let resp = token_manager
        .request(
            Method::GET,
            url,
            move |b| b.header(http::header::AUTHORIZATION, header.clone()),
            true,
        )
        .await?;
    Ok(resp.body)
}
