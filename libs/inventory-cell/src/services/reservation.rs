// libs/inventory-cell/src/services/reservation.rs
use std::sync::Arc;

use reqwest::Method;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{DbError, SupabaseClient};

use crate::models::{InventoryError, InventoryItem, StockLine};

/// Check-and-reserve, then commit-or-release.
///
/// Bill creation only *checks* availability; the physical decrement happens
/// at payment settlement through the `decrement_stock` stored function,
/// whose "decrement by N where stock >= N" condition is evaluated atomically
/// per row in storage. Two bills racing for the same batch can therefore
/// never drive stock negative, no matter how the requests interleave.
pub struct InventoryReservationService {
    supabase: Arc<SupabaseClient>,
}

impl InventoryReservationService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Resolve a prescribed medicine to the hospital's inventory row by
    /// case-insensitive exact name match.
    pub async fn resolve_item(
        &self,
        hospital_id: Uuid,
        medicine_name: &str,
        auth_token: &str,
    ) -> Result<InventoryItem, InventoryError> {
        let path = format!(
            "/rest/v1/inventory?hospital_id=eq.{}&medicine_name=ilike.{}&is_active=eq.true&limit=1",
            hospital_id,
            urlencoding::encode(medicine_name),
        );

        let result: Vec<InventoryItem> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| InventoryError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .next()
            .ok_or_else(|| InventoryError::MedicineNotFound(medicine_name.to_string()))
    }

    /// Read-only availability check used at bill-creation time.
    pub fn check_availability(&self, item: &InventoryItem, quantity: i32) -> bool {
        item.is_active && item.stock_quantity >= quantity
    }

    /// Commit the stock decrement for every line of a bill, at the moment
    /// its payment completes.
    ///
    /// Stock is re-verified at commit time: other bills may have consumed it
    /// since creation. Each line is a conditional update in storage; when a
    /// line fails, the lines already taken are released again and the
    /// shortfall is reported so the caller can compensate.
    pub async fn commit_decrement(
        &self,
        lines: &[StockLine],
        auth_token: &str,
    ) -> Result<(), InventoryError> {
        let mut taken: Vec<&StockLine> = Vec::with_capacity(lines.len());

        for line in lines {
            match self.decrement_line(line, auth_token).await {
                Ok(()) => taken.push(line),
                Err(e) => {
                    warn!(
                        "Stock commit failed on \"{}\" after {} of {} lines: {}",
                        line.medicine_name,
                        taken.len(),
                        lines.len(),
                        e
                    );
                    self.release_taken(&taken, auth_token).await;
                    return Err(e);
                }
            }
        }

        info!("Committed stock decrement for {} lines", lines.len());
        Ok(())
    }

    /// Compensating increments for lines that were already decremented.
    /// Best-effort: a failure here is logged for manual reconciliation, it
    /// must not mask the original error.
    pub async fn release(&self, lines: &[StockLine], auth_token: &str) {
        let refs: Vec<&StockLine> = lines.iter().collect();
        self.release_taken(&refs, auth_token).await;
    }

    async fn release_taken(&self, taken: &[&StockLine], auth_token: &str) {
        for line in taken {
            let result: Result<Vec<InventoryItem>, DbError> = self
                .supabase
                .rpc(
                    "increment_stock",
                    json!({
                        "p_item_id": line.inventory_item_id,
                        "p_quantity": line.quantity,
                    }),
                    Some(auth_token),
                )
                .await;

            if let Err(e) = result {
                warn!(
                    "MANUAL RECONCILIATION NEEDED: failed to release {} x \"{}\" (item {}): {}",
                    line.quantity, line.medicine_name, line.inventory_item_id, e
                );
            } else {
                debug!(
                    "Released {} x \"{}\" back to stock",
                    line.quantity, line.medicine_name
                );
            }
        }
    }

    async fn decrement_line(
        &self,
        line: &StockLine,
        auth_token: &str,
    ) -> Result<(), InventoryError> {
        let updated: Vec<InventoryItem> = self
            .supabase
            .rpc(
                "decrement_stock",
                json!({
                    "p_item_id": line.inventory_item_id,
                    "p_quantity": line.quantity,
                }),
                Some(auth_token),
            )
            .await
            .map_err(|e| InventoryError::DatabaseError(e.to_string()))?;

        if updated.is_empty() {
            // The conditional update matched nothing: stock ran out (or the
            // item was deactivated) between bill creation and settlement.
            let available = self
                .current_stock(line.inventory_item_id, auth_token)
                .await
                .unwrap_or(0);
            return Err(InventoryError::InsufficientStock {
                medicine: line.medicine_name.clone(),
                available,
                requested: line.quantity,
            });
        }

        debug!(
            "Decremented {} x \"{}\" (item {})",
            line.quantity, line.medicine_name, line.inventory_item_id
        );
        Ok(())
    }

    async fn current_stock(&self, item_id: Uuid, auth_token: &str) -> Option<i32> {
        let path = format!("/rest/v1/inventory?id=eq.{}&limit=1", item_id);
        let result: Vec<InventoryItem> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .ok()?;
        result.first().map(|item| item.stock_quantity)
    }
}
