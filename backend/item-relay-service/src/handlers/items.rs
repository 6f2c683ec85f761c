/// Item CRUD handlers
///
/// Reads, updates and deletes go straight to the store. Creation is
/// asynchronous: the payload is enqueued as an operation message and picked
/// up by the create worker.
use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{iso_timestamp, Item, OperationMessage, UPDATED_AT_FIELD};
use crate::state::AppState;

const DEFAULT_SCAN_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct CreateParams {
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScanParams {
    pub limit: Option<String>,
    #[serde(rename = "startKey")]
    pub start_key: Option<String>,
}

fn parse_object(body: &[u8]) -> Result<Item> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::BadRequest("Request body is required".to_string()));
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AppError::BadRequest(
            "Request body must be a JSON object".to_string(),
        )),
        Err(_) => Err(AppError::BadRequest(
            "Invalid JSON in request body".to_string(),
        )),
    }
}

/// Queue an item for creation
///
/// POST /items
pub async fn create_item(
    state: web::Data<AppState>,
    query: web::Query<CreateParams>,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let payload = parse_object(&body)?;
    let request_id = query
        .into_inner()
        .request_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let message = OperationMessage::create(request_id.clone(), payload);
    let encoded = serde_json::to_string(&message)
        .map_err(|e| AppError::Internal(format!("failed to encode operation: {}", e)))?;
    state.operations.send(encoded).await?;

    info!(request_id = %request_id, queue = %state.operations.name(), "Create operation queued");

    Ok(HttpResponse::Accepted().json(json!({
        "requestId": request_id,
        "status": "queued"
    })))
}

/// Get a single item
///
/// GET /items/{id}
pub async fn get_item(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
    let id = path.into_inner();

    match state.store.get(&id).await? {
        Some(item) => Ok(HttpResponse::Ok().json(item)),
        None => Err(AppError::item_not_found()),
    }
}

/// Scan items in id order
///
/// GET /items?limit=N&startKey=K
pub async fn list_items(
    state: web::Data<AppState>,
    query: web::Query<ScanParams>,
) -> Result<HttpResponse> {
    let params = query.into_inner();
    let limit = match params.limit.as_deref() {
        None | Some("") => DEFAULT_SCAN_LIMIT,
        Some(raw) => match raw.parse::<usize>() {
            Ok(0) | Err(_) => {
                return Err(AppError::BadRequest(
                    "limit must be a positive integer".to_string(),
                ))
            }
            Ok(n) => n,
        },
    };

    let page = state
        .store
        .scan(limit, params.start_key.as_deref().filter(|k| !k.is_empty()))
        .await?;

    let mut result = json!({
        "items": page.items,
        "count": page.items.len(),
    });
    if let Some(last_key) = page.last_key {
        result["lastKey"] = Value::String(last_key);
    }

    Ok(HttpResponse::Ok().json(result))
}

/// Merge fields into an existing item
///
/// PUT /items/{id}
pub async fn update_item(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    let mut changes = parse_object(&body)?;
    changes.insert(
        UPDATED_AT_FIELD.to_string(),
        Value::String(iso_timestamp(Utc::now())),
    );

    match state.store.merge(&id, &changes).await? {
        Some(item) => {
            info!(item_id = %id, "Item updated");
            Ok(HttpResponse::Ok().json(item))
        }
        None => Err(AppError::item_not_found()),
    }
}

/// Delete an item
///
/// DELETE /items/{id}
pub async fn delete_item(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let id = path.into_inner();

    match state.store.delete(&id).await? {
        Some(_) => {
            info!(item_id = %id, "Item deleted");
            Ok(HttpResponse::Ok().json(json!({
                "message": "Item deleted successfully",
                "id": id
            })))
        }
        None => Err(AppError::item_not_found()),
    }
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/items")
            .route("", web::post().to(create_item))
            .route("", web::get().to(list_items))
            .route("/{id}", web::get().to(get_item))
            .route("/{id}", web::put().to(update_item))
            .route("/{id}", web::delete().to(delete_item)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object() {
        let item = parse_object(br#"{"name": "x"}"#).unwrap();
        assert_eq!(item["name"], "x");

        assert!(matches!(parse_object(b""), Err(AppError::BadRequest(m)) if m == "Request body is required"));
        assert!(matches!(parse_object(b"[1]"), Err(AppError::BadRequest(_))));
        assert!(matches!(
            parse_object(b"{oops"),
            Err(AppError::BadRequest(m)) if m == "Invalid JSON in request body"
        ));
    }
}
