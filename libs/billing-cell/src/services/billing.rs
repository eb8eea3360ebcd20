// libs/billing-cell/src/services/billing.rs
use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use inventory_cell::services::{InventoryReservationService, InventoryService};
use notification_cell::{NewNotification, NotificationDispatcherService};
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;

use crate::models::{
    compute_total, Bill, BillItem, BillQueryParams, BillStatus, BillingError, CreateBillRequest,
    PrescribedMedicine, UpdateBillRequest,
};
use crate::services::prescriptions::PrescriptionStore;

/// Converts a completed visit plus its prescription into an immutable bill.
///
/// Stock is only *checked* here; the decrement happens at payment settlement
/// (a bill may go unpaid or be cancelled, and unpaid bills must not consume
/// real stock). The one-bill-per-appointment rule is enforced by claiming the
/// appointment's one-time flag with a guarded update before the bill row is
/// written.
pub struct BillingEngineService {
    supabase: Arc<SupabaseClient>,
    reservation: InventoryReservationService,
    directory: InventoryService,
    prescriptions: PrescriptionStore,
    notifier: NotificationDispatcherService,
}

impl BillingEngineService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            reservation: InventoryReservationService::with_client(Arc::clone(&supabase)),
            directory: InventoryService::with_client(Arc::clone(&supabase)),
            prescriptions: PrescriptionStore::with_client(Arc::clone(&supabase)),
            notifier: NotificationDispatcherService::with_client(Arc::clone(&supabase)),
            supabase,
        }
    }

    pub async fn generate_bill(
        &self,
        doctor: &User,
        request: CreateBillRequest,
        auth_token: &str,
    ) -> Result<Bill, BillingError> {
        info!(
            "Generating bill for appointment {} by doctor {}",
            request.appointment_id, doctor.id
        );

        let appointment = self
            .fetch_appointment(request.appointment_id, auth_token)
            .await?;

        if appointment["doctor_id"].as_str() != Some(doctor.id.as_str()) {
            return Err(BillingError::Unauthorized);
        }
        if appointment["status"].as_str() != Some("completed") {
            return Err(BillingError::AppointmentNotCompleted);
        }
        if appointment["final_bill_generated"].as_bool() == Some(true) {
            return Err(BillingError::AlreadyBilled);
        }

        let patient_id = appointment["patient_id"]
            .as_str()
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| BillingError::DatabaseError("Malformed appointment row".to_string()))?;

        // Build and validate every line item before anything is written: a
        // bill is created with all of its items or not at all.
        let items = if request.use_inventory {
            self.build_inventory_items(&doctor.id, request.appointment_id, auth_token)
                .await?
        } else {
            Self::build_manual_items(request.items.unwrap_or_default())?
        };
        let total_amount = compute_total(&items);

        // Claim the one-time flag. Of two concurrent generate calls for the
        // same appointment only one guarded update matches.
        self.claim_bill_flag(request.appointment_id, auth_token)
            .await?;

        let bill = match self
            .insert_bill(
                request.appointment_id,
                patient_id,
                doctor,
                items,
                total_amount,
                request.notes,
                auth_token,
            )
            .await
        {
            Ok(bill) => bill,
            Err(e) => {
                // The flag was claimed but the bill was not written; undo the
                // claim so the appointment can be billed again.
                self.rollback_bill_flag(request.appointment_id, auth_token)
                    .await;
                return Err(e);
            }
        };

        self.notifier
            .notify(
                NewNotification::new(patient_id, "A new bill has been generated for you", "new_bill")
                    .with_link("/patient/bills")
                    .with_metadata(json!({ "bill_id": bill.id })),
                auth_token,
            )
            .await;

        info!(
            "Bill {} generated for appointment {} (total {} paise, {} items)",
            bill.id,
            bill.appointment_id,
            bill.total_amount,
            bill.items.len()
        );
        Ok(bill)
    }

    /// Doctor-initiated mutation. Only unpaid bills can be cancelled; a paid
    /// bill is immutable.
    pub async fn update_bill(
        &self,
        doctor: &User,
        bill_id: Uuid,
        request: UpdateBillRequest,
        auth_token: &str,
    ) -> Result<Bill, BillingError> {
        let current = self.get_bill(bill_id, auth_token).await?;

        if !doctor.is_self(&current.doctor_id) {
            return Err(BillingError::Unauthorized);
        }
        if current.status == BillStatus::Paid {
            return Err(BillingError::BillImmutable);
        }
        if let Some(status) = request.status {
            if status != BillStatus::Cancelled {
                return Err(BillingError::InvalidItem(
                    "Can only cancel unpaid bills".to_string(),
                ));
            }
        }

        let mut update = serde_json::Map::new();
        if request.status.is_some() {
            update.insert("status".to_string(), json!(BillStatus::Cancelled));
        }
        if let Some(notes) = request.notes {
            update.insert("notes".to_string(), json!(notes));
        }
        if update.is_empty() {
            return Err(BillingError::InvalidItem("No fields to update".to_string()));
        }
        update.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        // Guarded on unpaid so a settlement racing with the cancel cannot be
        // overwritten.
        let path = format!("/rest/v1/bills?id=eq.{}&status=eq.unpaid", bill_id);
        let result: Vec<Bill> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(Value::Object(update)),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(|e| BillingError::DatabaseError(e.to_string()))?;

        result.into_iter().next().ok_or(BillingError::BillImmutable)
    }

    /// Flip an unpaid bill to paid, linking the settling payment. Invoked
    /// only by the payment coordinator after the stock commit succeeded.
    pub async fn mark_paid(
        &self,
        bill_id: Uuid,
        payment_id: Uuid,
        auth_token: &str,
    ) -> Result<Bill, BillingError> {
        let now = Utc::now();
        let update = json!({
            "status": BillStatus::Paid,
            "paid_at": now.to_rfc3339(),
            "payment_id": payment_id,
            "updated_at": now.to_rfc3339(),
        });

        let path = format!("/rest/v1/bills?id=eq.{}&status=eq.unpaid", bill_id);
        let result: Vec<Bill> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(update),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(|e| BillingError::DatabaseError(e.to_string()))?;

        match result.into_iter().next() {
            Some(bill) => Ok(bill),
            None => {
                // Guard matched nothing: the bill left the unpaid state
                // concurrently. Report which way it went.
                let current = self.get_bill(bill_id, auth_token).await?;
                match current.status {
                    BillStatus::Paid => Err(BillingError::AlreadyPaid),
                    BillStatus::Cancelled => Err(BillingError::BillCancelled),
                    BillStatus::Unpaid => {
                        Err(BillingError::DatabaseError("Failed to mark bill paid".to_string()))
                    }
                }
            }
        }
    }

    pub async fn get_bill(&self, bill_id: Uuid, auth_token: &str) -> Result<Bill, BillingError> {
        let path = format!("/rest/v1/bills?id=eq.{}&limit=1", bill_id);
        let result: Vec<Bill> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BillingError::DatabaseError(e.to_string()))?;

        result.into_iter().next().ok_or(BillingError::NotFound)
    }

    pub async fn list_for_user(
        &self,
        user: &User,
        params: &BillQueryParams,
        auth_token: &str,
    ) -> Result<Vec<Bill>, BillingError> {
        let side = if user.is_role("doctor") {
            "doctor_id"
        } else {
            "patient_id"
        };

        let mut path = format!(
            "/rest/v1/bills?{}=eq.{}&order=created_at.desc",
            side, user.id
        );
        if let Some(status) = params.status {
            path.push_str(&format!("&status=eq.{}", status));
        }
        if let Some(appointment_id) = params.appointment_id {
            path.push_str(&format!("&appointment_id=eq.{}", appointment_id));
        }

        self.supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BillingError::DatabaseError(e.to_string()))
    }

    pub async fn count_unpaid_for_patient(
        &self,
        patient_id: &str,
        auth_token: &str,
    ) -> Result<usize, BillingError> {
        let path = format!(
            "/rest/v1/bills?patient_id=eq.{}&status=eq.unpaid",
            patient_id
        );
        let bills: Vec<Bill> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BillingError::DatabaseError(e.to_string()))?;

        Ok(bills.len())
    }

    // ==============================================================================
    // PRIVATE HELPERS
    // ==============================================================================

    async fn fetch_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Value, BillingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}&limit=1", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BillingError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .next()
            .ok_or(BillingError::AppointmentNotFound)
    }

    async fn build_inventory_items(
        &self,
        doctor_user_id: &str,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<BillItem>, BillingError> {
        let hospital_id = self
            .directory
            .doctor_hospital(doctor_user_id, auth_token)
            .await?;

        let prescription = self
            .prescriptions
            .fetch_for_appointment(appointment_id, auth_token)
            .await?
            .ok_or(BillingError::PrescriptionNotFound)?;

        let hospital_medicines: Vec<&PrescribedMedicine> = prescription
            .medicines
            .iter()
            .filter(|m| m.purchase_from_hospital)
            .collect();

        if hospital_medicines.is_empty() {
            return Err(BillingError::NoHospitalItems);
        }

        let mut items = Vec::with_capacity(hospital_medicines.len());
        for medicine in hospital_medicines {
            let inventory_item = self
                .reservation
                .resolve_item(hospital_id, &medicine.medicine_name, auth_token)
                .await?;

            if !self
                .reservation
                .check_availability(&inventory_item, medicine.quantity)
            {
                return Err(inventory_cell::models::InventoryError::InsufficientStock {
                    medicine: medicine.medicine_name.clone(),
                    available: inventory_item.stock_quantity,
                    requested: medicine.quantity,
                }
                .into());
            }

            items.push(BillItem {
                description: format!(
                    "{} - {} ({} for {})",
                    medicine.medicine_name, medicine.dosage, medicine.frequency, medicine.duration
                ),
                quantity: medicine.quantity,
                amount: inventory_item.price,
                inventory_item_id: Some(inventory_item.id),
            });
        }

        Ok(items)
    }

    fn build_manual_items(items: Vec<crate::models::ManualBillItem>) -> Result<Vec<BillItem>, BillingError> {
        if items.is_empty() {
            return Err(BillingError::InvalidItem(
                "At least one bill item is required".to_string(),
            ));
        }

        items
            .into_iter()
            .map(|item| {
                if item.description.trim().is_empty() {
                    return Err(BillingError::InvalidItem(
                        "Item description is required".to_string(),
                    ));
                }
                if item.amount < 0 {
                    return Err(BillingError::InvalidItem(
                        "Item amount cannot be negative".to_string(),
                    ));
                }
                let quantity = item.quantity.unwrap_or(1);
                if quantity < 1 {
                    return Err(BillingError::InvalidItem(
                        "Item quantity must be at least 1".to_string(),
                    ));
                }
                Ok(BillItem {
                    description: item.description,
                    quantity,
                    amount: item.amount,
                    inventory_item_id: None,
                })
            })
            .collect()
    }

    async fn claim_bill_flag(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), BillingError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&final_bill_generated=eq.false",
            appointment_id
        );
        let update = json!({
            "final_bill_generated": true,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let claimed: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(update),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(|e| BillingError::DatabaseError(e.to_string()))?;

        if claimed.is_empty() {
            return Err(BillingError::AlreadyBilled);
        }

        debug!("Claimed bill flag for appointment {}", appointment_id);
        Ok(())
    }

    async fn rollback_bill_flag(&self, appointment_id: Uuid, auth_token: &str) {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let update = json!({
            "final_bill_generated": false,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let result: Result<Vec<Value>, _> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(update),
                Some(SupabaseClient::representation_headers()),
            )
            .await;

        if let Err(e) = result {
            warn!(
                "MANUAL RECONCILIATION NEEDED: bill flag stuck on appointment {}: {}",
                appointment_id, e
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_bill(
        &self,
        appointment_id: Uuid,
        patient_id: Uuid,
        doctor: &User,
        items: Vec<BillItem>,
        total_amount: i64,
        notes: Option<String>,
        auth_token: &str,
    ) -> Result<Bill, BillingError> {
        let now = Utc::now();
        let body = json!({
            "appointment_id": appointment_id,
            "patient_id": patient_id,
            "doctor_id": doctor.id,
            "items": items,
            "total_amount": total_amount,
            "status": BillStatus::Unpaid,
            "notes": notes.unwrap_or_default(),
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339(),
        });

        let result: Vec<Bill> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/bills",
                Some(auth_token),
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(|e| BillingError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .next()
            .ok_or_else(|| BillingError::DatabaseError("Failed to create bill".to_string()))
    }
}
