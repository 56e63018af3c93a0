//! `POST /v1/spend/calculate` (spec.md §6): pricing lookup is explicitly
//! out of scope (spec.md Non-goals), so this always reports zero cost
//! rather than omitting the endpoint clients may already call.

use axum::Json;
use serde_json::{json, Value};

pub async fn calculate(Json(_body): Json<Value>) -> Json<Value> {
    Json(json!({ "cost": 0.0, "currency": "USD" }))
}
