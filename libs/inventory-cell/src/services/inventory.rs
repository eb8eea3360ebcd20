// libs/inventory-cell/src/services/inventory.rs
use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{DbError, SupabaseClient};

use crate::models::{
    AddInventoryItemRequest, InventoryError, InventoryItem, UpdateInventoryItemRequest,
};

/// Pharmacy inventory management for a doctor's hospital.
pub struct InventoryService {
    supabase: Arc<SupabaseClient>,
}

impl InventoryService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Resolve the hospital a doctor belongs to from their directory profile.
    pub async fn doctor_hospital(
        &self,
        doctor_user_id: &str,
        auth_token: &str,
    ) -> Result<Uuid, InventoryError> {
        let path = format!("/rest/v1/doctors?user_id=eq.{}&limit=1", doctor_user_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| InventoryError::DatabaseError(e.to_string()))?;

        result
            .first()
            .and_then(|profile| profile["hospital_id"].as_str())
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or(InventoryError::NoHospital)
    }

    pub async fn hospital_inventory(
        &self,
        doctor_user_id: &str,
        search: Option<&str>,
        low_stock_only: bool,
        auth_token: &str,
    ) -> Result<Vec<InventoryItem>, InventoryError> {
        let hospital_id = self.doctor_hospital(doctor_user_id, auth_token).await?;

        let mut path = format!(
            "/rest/v1/inventory?hospital_id=eq.{}&is_active=eq.true&order=medicine_name.asc",
            hospital_id
        );
        if let Some(term) = search {
            let pattern = urlencoding::encode(&format!("*{}*", term)).into_owned();
            path.push_str(&format!(
                "&or=(medicine_name.ilike.{pattern},generic_name.ilike.{pattern})"
            ));
        }

        let mut items: Vec<InventoryItem> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| InventoryError::DatabaseError(e.to_string()))?;

        if low_stock_only {
            items.retain(|item| item.is_low_stock());
        }

        Ok(items)
    }

    pub async fn add_item(
        &self,
        doctor_user_id: &str,
        request: AddInventoryItemRequest,
        auth_token: &str,
    ) -> Result<InventoryItem, InventoryError> {
        if request.medicine_name.trim().is_empty() {
            return Err(InventoryError::ValidationError(
                "Medicine name is required".to_string(),
            ));
        }
        if request.stock_quantity < 0 {
            return Err(InventoryError::ValidationError(
                "Stock quantity cannot be negative".to_string(),
            ));
        }
        if request.price < 0 {
            return Err(InventoryError::ValidationError(
                "Price cannot be negative".to_string(),
            ));
        }

        let hospital_id = self.doctor_hospital(doctor_user_id, auth_token).await?;
        let now = Utc::now();

        let body = json!({
            "hospital_id": hospital_id,
            "medicine_name": request.medicine_name.trim(),
            "generic_name": request.generic_name,
            "stock_quantity": request.stock_quantity,
            "price": request.price,
            "unit": request.unit.unwrap_or_else(|| "tablet".to_string()),
            "min_stock_level": request.min_stock_level.unwrap_or(10),
            "is_active": true,
            "last_restocked": now.to_rfc3339(),
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339(),
        });

        // The per-hospital unique index on medicine_name is the authority on
        // duplicates; a 409 from the insert means the medicine exists.
        let result: Vec<InventoryItem> = match self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/inventory",
                Some(auth_token),
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await
        {
            Ok(rows) => rows,
            Err(DbError::Conflict(_)) => return Err(InventoryError::DuplicateMedicine),
            Err(e) => return Err(InventoryError::DatabaseError(e.to_string())),
        };

        let item = result
            .into_iter()
            .next()
            .ok_or_else(|| InventoryError::DatabaseError("Failed to create item".to_string()))?;

        info!(
            "Added \"{}\" to hospital {} inventory ({} units)",
            item.medicine_name, hospital_id, item.stock_quantity
        );
        Ok(item)
    }

    pub async fn update_item(
        &self,
        doctor_user_id: &str,
        item_id: Uuid,
        request: UpdateInventoryItemRequest,
        auth_token: &str,
    ) -> Result<InventoryItem, InventoryError> {
        let hospital_id = self.doctor_hospital(doctor_user_id, auth_token).await?;
        let current = self.get_item(item_id, auth_token).await?;

        if current.hospital_id != hospital_id {
            return Err(InventoryError::Unauthorized);
        }

        let mut update = serde_json::Map::new();
        if let Some(stock) = request.stock_quantity {
            if stock < 0 {
                return Err(InventoryError::ValidationError(
                    "Stock quantity cannot be negative".to_string(),
                ));
            }
            update.insert("stock_quantity".to_string(), json!(stock));
            if stock > current.stock_quantity {
                update.insert("last_restocked".to_string(), json!(Utc::now().to_rfc3339()));
            }
        }
        if let Some(price) = request.price {
            if price < 0 {
                return Err(InventoryError::ValidationError(
                    "Price cannot be negative".to_string(),
                ));
            }
            update.insert("price".to_string(), json!(price));
        }
        if let Some(level) = request.min_stock_level {
            update.insert("min_stock_level".to_string(), json!(level));
        }
        if let Some(active) = request.is_active {
            update.insert("is_active".to_string(), json!(active));
        }
        if let Some(generic) = request.generic_name {
            update.insert("generic_name".to_string(), json!(generic));
        }

        if update.is_empty() {
            return Err(InventoryError::ValidationError(
                "No fields to update".to_string(),
            ));
        }
        update.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/inventory?id=eq.{}", item_id);
        let result: Vec<InventoryItem> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(Value::Object(update)),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(|e| InventoryError::DatabaseError(e.to_string()))?;

        result.into_iter().next().ok_or(InventoryError::NotFound)
    }

    pub async fn low_stock_report(
        &self,
        doctor_user_id: &str,
        auth_token: &str,
    ) -> Result<Vec<InventoryItem>, InventoryError> {
        let mut items = self
            .hospital_inventory(doctor_user_id, None, true, auth_token)
            .await?;
        items.sort_by_key(|item| item.stock_quantity);

        debug!("{} items at or below reorder threshold", items.len());
        Ok(items)
    }

    pub async fn get_item(
        &self,
        item_id: Uuid,
        auth_token: &str,
    ) -> Result<InventoryItem, InventoryError> {
        let path = format!("/rest/v1/inventory?id=eq.{}&limit=1", item_id);
        let result: Vec<InventoryItem> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| InventoryError::DatabaseError(e.to_string()))?;

        result.into_iter().next().ok_or(InventoryError::NotFound)
    }
}
