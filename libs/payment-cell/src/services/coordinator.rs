// libs/payment-cell/src/services/coordinator.rs
use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use appointment_cell::models::{parse_time_slot, Appointment, AppointmentError, SlotReservation};
use appointment_cell::services::SlotLedgerService;
use billing_cell::models::BillStatus;
use billing_cell::services::BillingEngineService;
use inventory_cell::services::InventoryReservationService;
use notification_cell::{NewNotification, NotificationDispatcherService};
use shared_config::AppConfig;
use shared_database::supabase::{DbError, SupabaseClient};
use shared_models::auth::User;

use crate::models::{
    BookingSlotMetadata, ConfirmPaymentRequest, CreateBillOrderRequest, CreateBookingOrderRequest,
    FinalizeOutcome, Payment, PaymentError, PaymentStatus, PaymentType,
};
use crate::services::provider::{
    provider_from_config, PaymentProvider, ProviderConfirmation, ProviderSession,
};

/// Orchestrates orders, provider confirmations and their side effects.
///
/// The flow is pay-first: order creation holds nothing, neither an
/// appointment row nor stock. Everything is re-validated inside `finalize`,
/// whose idempotency key is the provider session id. Where the store cannot
/// give us a multi-entity transaction, the partial-failure window is closed
/// with an explicit compensation: complete the payment, attempt the side
/// effect, and on failure void/refund the payment (or flag it for manual
/// refund).
pub struct PaymentCoordinatorService {
    supabase: Arc<SupabaseClient>,
    provider: Arc<dyn PaymentProvider>,
    slot_ledger: SlotLedgerService,
    billing: BillingEngineService,
    reservation: InventoryReservationService,
    notifier: NotificationDispatcherService,
    currency: String,
    default_consultation_fee: i64,
    unpaid_bill_limit: usize,
}

impl PaymentCoordinatorService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_provider(config, provider_from_config(config))
    }

    pub fn with_provider(config: &AppConfig, provider: Arc<dyn PaymentProvider>) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            provider,
            slot_ledger: SlotLedgerService::with_client(Arc::clone(&supabase)),
            billing: BillingEngineService::new(config),
            reservation: InventoryReservationService::with_client(Arc::clone(&supabase)),
            notifier: NotificationDispatcherService::with_client(Arc::clone(&supabase)),
            supabase,
            currency: config.currency.clone(),
            default_consultation_fee: config.default_consultation_fee,
            unpaid_bill_limit: config.unpaid_bill_limit.max(0) as usize,
        }
    }

    // ==============================================================================
    // ORDER CREATION
    // ==============================================================================

    /// Open a booking-fee order. Validates the doctor, the pending-dues gate
    /// and (advisorily) the slot, then creates the provider session and a
    /// pending payment carrying the slot details. The slot itself is not
    /// held: it is re-checked by the conditional insert at finalize time,
    /// so an abandoned order can never keep a slot hostage.
    pub async fn create_booking_order(
        &self,
        patient: &User,
        request: CreateBookingOrderRequest,
        auth_token: &str,
    ) -> Result<(Payment, ProviderSession), PaymentError> {
        let patient_id = Self::parse_user_id(patient)?;

        if parse_time_slot(&request.time_slot).is_none() {
            return Err(PaymentError::ValidationError(format!(
                "Invalid time slot: {}",
                request.time_slot
            )));
        }

        let doctor = self.doctor_profile(request.doctor_id, auth_token).await?;
        if doctor["is_active"].as_bool() != Some(true) {
            return Err(PaymentError::DoctorNotAvailable);
        }
        let fee = doctor["consultation_fee"]
            .as_i64()
            .unwrap_or(self.default_consultation_fee);

        let unpaid = self
            .billing
            .count_unpaid_for_patient(&patient.id, auth_token)
            .await?;
        if unpaid >= self.unpaid_bill_limit {
            return Err(PaymentError::PendingDues(unpaid));
        }

        let free = self
            .slot_ledger
            .check_slot_available(request.doctor_id, request.date, &request.time_slot, auth_token)
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;
        if !free {
            return Err(PaymentError::SlotTaken);
        }

        let session = self
            .provider
            .create_session(
                fee,
                &self.currency,
                json!({
                    "payment_type": PaymentType::BookingFee,
                    "patient_id": patient_id,
                    "doctor_id": request.doctor_id,
                    "date": request.date,
                    "time_slot": request.time_slot,
                }),
            )
            .await?;

        let metadata = BookingSlotMetadata {
            doctor_id: request.doctor_id,
            date: request.date,
            time_slot: request.time_slot,
        };

        let payment = self
            .insert_pending_payment(
                patient_id,
                request.doctor_id,
                None,
                None,
                fee,
                PaymentType::BookingFee,
                &session.session_id,
                Some(serde_json::to_value(&metadata).unwrap_or(Value::Null)),
                auth_token,
            )
            .await?;

        info!(
            "Booking order {} opened for patient {} (doctor {}, {} {})",
            session.session_id, patient_id, metadata.doctor_id, metadata.date, metadata.time_slot
        );
        Ok((payment, session))
    }

    /// Open a bill-payment order for an existing unpaid bill.
    pub async fn create_bill_order(
        &self,
        patient: &User,
        request: CreateBillOrderRequest,
        auth_token: &str,
    ) -> Result<(Payment, ProviderSession), PaymentError> {
        let patient_id = Self::parse_user_id(patient)?;

        let bill = self.billing.get_bill(request.bill_id, auth_token).await?;

        if !patient.is_self(&bill.patient_id) {
            return Err(PaymentError::Unauthorized);
        }
        match bill.status {
            BillStatus::Paid => return Err(PaymentError::BillAlreadyPaid),
            BillStatus::Cancelled => return Err(PaymentError::BillCancelled),
            BillStatus::Unpaid => {}
        }

        let session = self
            .provider
            .create_session(
                bill.total_amount,
                &self.currency,
                json!({
                    "payment_type": PaymentType::BillPayment,
                    "patient_id": patient_id,
                    "bill_id": bill.id,
                }),
            )
            .await?;

        let payment = self
            .insert_pending_payment(
                patient_id,
                bill.doctor_id,
                Some(bill.appointment_id),
                Some(bill.id),
                bill.total_amount,
                PaymentType::BillPayment,
                &session.session_id,
                None,
                auth_token,
            )
            .await?;

        info!(
            "Bill order {} opened for bill {} ({} paise)",
            session.session_id, bill.id, bill.total_amount
        );
        Ok((payment, session))
    }

    // ==============================================================================
    // FINALIZATION
    // ==============================================================================

    /// Client-driven confirmation: verify with the provider, then finalize.
    pub async fn verify_and_finalize(
        &self,
        user: &User,
        request: ConfirmPaymentRequest,
        auth_token: &str,
    ) -> Result<FinalizeOutcome, PaymentError> {
        let payment = self
            .fetch_payment_by_session(&request.order_id, auth_token)
            .await?
            .ok_or(PaymentError::NotFound)?;

        if !user.is_self(&payment.patient_id) {
            return Err(PaymentError::Unauthorized);
        }

        let confirmation = self.provider.verify(&request.order_id).await?;
        let confirmation = ProviderConfirmation {
            provider_payment_id: confirmation
                .provider_payment_id
                .or(request.provider_payment_id),
            ..confirmation
        };

        self.finalize(confirmation, auth_token).await
    }

    /// The single idempotent finalization entry point, fed by both the
    /// webhook push and the verify pull.
    ///
    /// Replays of an already-processed session return the stored outcome
    /// without re-applying any side effect. Concurrent finalizations are
    /// decided by the status-guarded completion update: exactly one caller
    /// claims the pending payment.
    pub async fn finalize(
        &self,
        confirmation: ProviderConfirmation,
        auth_token: &str,
    ) -> Result<FinalizeOutcome, PaymentError> {
        let existing = self
            .fetch_payment_by_session(&confirmation.session_id, auth_token)
            .await?
            .ok_or(PaymentError::NotFound)?;

        if existing.status != PaymentStatus::Pending {
            info!(
                "Replayed confirmation for session {} (status {})",
                confirmation.session_id, existing.status
            );
            return self.replay_outcome(existing, auth_token).await;
        }

        // An unpaid verification leaves the order pending: the patient may
        // still complete the checkout, and pending orders hold nothing.
        if !confirmation.paid {
            return Err(PaymentError::NotCompletedByProvider);
        }

        let payment = match self
            .claim_completion(
                &confirmation.session_id,
                confirmation.provider_payment_id.as_deref(),
                auth_token,
            )
            .await?
        {
            Some(payment) => payment,
            None => {
                // A concurrent finalize won the guard; return its outcome.
                let current = self
                    .fetch_payment_by_session(&confirmation.session_id, auth_token)
                    .await?
                    .ok_or(PaymentError::NotFound)?;
                return self.replay_outcome(current, auth_token).await;
            }
        };

        match payment.payment_type {
            PaymentType::BookingFee => self.finalize_booking(payment, auth_token).await,
            PaymentType::BillPayment => self.settle_bill(payment, auth_token).await,
            PaymentType::Refund => Ok(FinalizeOutcome {
                payment,
                appointment: None,
                bill: None,
                replayed: false,
            }),
        }
    }

    /// Pay-first booking: the payment is complete, now atomically claim the
    /// slot. The conditional insert is the authority; losing it means the
    /// slot was sold in the window since order creation, and the captured
    /// fee is voided/refunded.
    async fn finalize_booking(
        &self,
        mut payment: Payment,
        auth_token: &str,
    ) -> Result<FinalizeOutcome, PaymentError> {
        let metadata: BookingSlotMetadata = payment
            .metadata
            .clone()
            .and_then(|m| serde_json::from_value(m).ok())
            .ok_or_else(|| {
                PaymentError::DatabaseError("Payment is missing booking slot metadata".to_string())
            })?;

        let reservation = SlotReservation {
            patient_id: payment.patient_id,
            doctor_id: metadata.doctor_id,
            date: metadata.date,
            time_slot: metadata.time_slot.clone(),
        };

        let appointment = match self.slot_ledger.reserve_slot(reservation, auth_token).await {
            Ok(appointment) => appointment,
            Err(AppointmentError::SlotTaken) => {
                self.compensate_refund(&payment, "slot no longer available", auth_token)
                    .await;
                return Err(PaymentError::SlotTaken);
            }
            Err(e) => {
                self.compensate_refund(&payment, "appointment creation failed", auth_token)
                    .await;
                return Err(PaymentError::DatabaseError(e.to_string()));
            }
        };

        if let Some(linked) = self
            .link_appointment(payment.id, appointment.id, auth_token)
            .await
        {
            payment = linked;
        } else {
            payment.appointment_id = Some(appointment.id);
        }

        self.notifier
            .notify(
                NewNotification::new(
                    payment.patient_id,
                    "Payment successful! Your appointment is confirmed",
                    "payment_success",
                )
                .with_link("/patient/appointments")
                .with_metadata(json!({ "appointment_id": appointment.id })),
                auth_token,
            )
            .await;

        info!(
            "Booking finalized: payment {} -> appointment {} ({} {})",
            payment.id, appointment.id, appointment.date, appointment.time_slot
        );
        Ok(FinalizeOutcome {
            payment,
            appointment: Some(appointment),
            bill: None,
            replayed: false,
        })
    }

    /// Bill settlement saga, in the order that keeps money and stock
    /// consistent: re-check the bill, commit the stock decrement, and only
    /// then flip the bill to paid. A bill that cannot have its stock
    /// committed is never marked paid; stock taken for a bill that cannot
    /// be marked paid is released again.
    async fn settle_bill(
        &self,
        payment: Payment,
        auth_token: &str,
    ) -> Result<FinalizeOutcome, PaymentError> {
        let bill_id = payment.bill_id.ok_or_else(|| {
            PaymentError::DatabaseError("Payment is missing bill reference".to_string())
        })?;

        let bill = self.billing.get_bill(bill_id, auth_token).await?;
        match bill.status {
            BillStatus::Paid => {
                self.compensate_refund(&payment, "bill already paid", auth_token)
                    .await;
                return Err(PaymentError::BillAlreadyPaid);
            }
            BillStatus::Cancelled => {
                self.compensate_refund(&payment, "bill was cancelled", auth_token)
                    .await;
                return Err(PaymentError::BillCancelled);
            }
            BillStatus::Unpaid => {}
        }

        let lines = bill.stock_lines();
        if let Err(e) = self.reservation.commit_decrement(&lines, auth_token).await {
            // Fulfillment failure: the money is captured but the stock is
            // gone. Distinct from a billing error; the compensation voids
            // the charge and the bill stays unpaid.
            self.compensate_refund(&payment, "stock commit failed", auth_token)
                .await;
            return Err(e.into());
        }

        let paid_bill = match self.billing.mark_paid(bill_id, payment.id, auth_token).await {
            Ok(bill) => bill,
            Err(e) => {
                self.reservation.release(&lines, auth_token).await;
                self.compensate_refund(&payment, "bill could not be marked paid", auth_token)
                    .await;
                return Err(e.into());
            }
        };

        self.notifier
            .notify(
                NewNotification::new(
                    payment.patient_id,
                    "Bill payment successful",
                    "payment_success",
                )
                .with_link("/patient/bills")
                .with_metadata(json!({ "bill_id": bill_id })),
                auth_token,
            )
            .await;
        self.notifier
            .notify(
                NewNotification::new(payment.doctor_id, "Patient has paid the bill", "bill_paid")
                    .with_metadata(json!({ "bill_id": bill_id })),
                auth_token,
            )
            .await;

        info!(
            "Bill {} settled by payment {} ({} stock lines committed)",
            bill_id,
            payment.id,
            lines.len()
        );
        Ok(FinalizeOutcome {
            payment,
            appointment: None,
            bill: Some(paid_bill),
            replayed: false,
        })
    }

    // ==============================================================================
    // READS
    // ==============================================================================

    pub async fn list_for_patient(
        &self,
        user: &User,
        payment_type: Option<PaymentType>,
        auth_token: &str,
    ) -> Result<Vec<Payment>, PaymentError> {
        let mut path = format!(
            "/rest/v1/payments?patient_id=eq.{}&order=created_at.desc",
            user.id
        );
        if let Some(payment_type) = payment_type {
            path.push_str(&format!("&payment_type=eq.{}", payment_type));
        }

        self.supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))
    }

    pub async fn get_payment_for_user(
        &self,
        user: &User,
        session_id: &str,
        auth_token: &str,
    ) -> Result<Payment, PaymentError> {
        let payment = self
            .fetch_payment_by_session(session_id, auth_token)
            .await?
            .ok_or(PaymentError::NotFound)?;

        if !user.is_self(&payment.patient_id) {
            return Err(PaymentError::Unauthorized);
        }

        Ok(payment)
    }

    // ==============================================================================
    // PRIVATE HELPERS
    // ==============================================================================

    fn parse_user_id(user: &User) -> Result<Uuid, PaymentError> {
        Uuid::parse_str(&user.id)
            .map_err(|_| PaymentError::ValidationError("Invalid caller id".to_string()))
    }

    async fn doctor_profile(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<Value, PaymentError> {
        let path = format!("/rest/v1/doctors?user_id=eq.{}&limit=1", doctor_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;

        result.into_iter().next().ok_or(PaymentError::DoctorNotFound)
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_pending_payment(
        &self,
        patient_id: Uuid,
        doctor_id: Uuid,
        appointment_id: Option<Uuid>,
        bill_id: Option<Uuid>,
        amount: i64,
        payment_type: PaymentType,
        session_id: &str,
        metadata: Option<Value>,
        auth_token: &str,
    ) -> Result<Payment, PaymentError> {
        let now = Utc::now();
        let body = json!({
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "appointment_id": appointment_id,
            "bill_id": bill_id,
            "amount": amount,
            "currency": self.currency,
            "payment_type": payment_type,
            "provider_session_id": session_id,
            "status": PaymentStatus::Pending,
            "metadata": metadata,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339(),
        });

        let result: Vec<Payment> = match self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/payments",
                Some(auth_token),
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await
        {
            Ok(rows) => rows,
            // The unique index on provider_session_id rejected the insert.
            Err(DbError::Conflict(msg)) => {
                return Err(PaymentError::DatabaseError(format!(
                    "Duplicate provider session id: {}",
                    msg
                )))
            }
            Err(e) => return Err(PaymentError::DatabaseError(e.to_string())),
        };

        result
            .into_iter()
            .next()
            .ok_or_else(|| PaymentError::DatabaseError("Failed to create payment".to_string()))
    }

    async fn fetch_payment_by_session(
        &self,
        session_id: &str,
        auth_token: &str,
    ) -> Result<Option<Payment>, PaymentError> {
        let path = format!(
            "/rest/v1/payments?provider_session_id=eq.{}&limit=1",
            session_id
        );
        let result: Vec<Payment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;

        Ok(result.into_iter().next())
    }

    /// "Complete only if currently pending": the guarded update that makes
    /// finalization idempotent. Returns None when the guard matched nothing.
    async fn claim_completion(
        &self,
        session_id: &str,
        provider_payment_id: Option<&str>,
        auth_token: &str,
    ) -> Result<Option<Payment>, PaymentError> {
        let now = Utc::now();
        let update = json!({
            "status": PaymentStatus::Completed,
            "provider_payment_id": provider_payment_id,
            "payment_date": now.to_rfc3339(),
            "updated_at": now.to_rfc3339(),
        });

        let path = format!(
            "/rest/v1/payments?provider_session_id=eq.{}&status=eq.pending",
            session_id
        );
        let result: Vec<Payment> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(update),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;

        Ok(result.into_iter().next())
    }

    async fn link_appointment(
        &self,
        payment_id: Uuid,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Option<Payment> {
        let path = format!("/rest/v1/payments?id=eq.{}", payment_id);
        let update = json!({
            "appointment_id": appointment_id,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let result: Result<Vec<Payment>, _> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(update),
                Some(SupabaseClient::representation_headers()),
            )
            .await;

        match result {
            Ok(rows) => rows.into_iter().next(),
            Err(e) => {
                warn!(
                    "Failed to link payment {} to appointment {}: {}",
                    payment_id, appointment_id, e
                );
                None
            }
        }
    }

    /// A confirmation arrived for a session that already left the pending
    /// state. Rebuild the outcome from the stored records; no side effects.
    async fn replay_outcome(
        &self,
        payment: Payment,
        auth_token: &str,
    ) -> Result<FinalizeOutcome, PaymentError> {
        let appointment = match (payment.payment_type, payment.appointment_id) {
            (PaymentType::BookingFee, Some(id)) => {
                self.fetch_appointment(id, auth_token).await
            }
            _ => None,
        };
        let bill = match payment.bill_id {
            Some(id) => self.billing.get_bill(id, auth_token).await.ok(),
            None => None,
        };

        Ok(FinalizeOutcome {
            payment,
            appointment,
            bill,
            replayed: true,
        })
    }

    async fn fetch_appointment(&self, appointment_id: Uuid, auth_token: &str) -> Option<Appointment> {
        let path = format!("/rest/v1/appointments?id=eq.{}&limit=1", appointment_id);
        let result: Result<Vec<Appointment>, _> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await;

        result.ok().and_then(|rows| rows.into_iter().next())
    }

    /// Compensation for a completed payment whose side effect failed: void
    /// the provider session and mark the payment refunded. If the void
    /// itself fails the payment is flagged for manual refund, explicitly,
    /// never silently.
    async fn compensate_refund(&self, payment: &Payment, reason: &str, auth_token: &str) {
        warn!(
            "Compensating payment {} (session {}): {}",
            payment.id, payment.provider_session_id, reason
        );

        let mut metadata = payment.metadata.clone().unwrap_or_else(|| json!({}));

        let voided = match self.provider.void_session(&payment.provider_session_id).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "MANUAL REFUND NEEDED for payment {}: provider void failed: {}",
                    payment.id, e
                );
                false
            }
        };

        if let Some(map) = metadata.as_object_mut() {
            map.insert("refund_reason".to_string(), json!(reason));
            if !voided {
                map.insert("requires_manual_refund".to_string(), json!(true));
            }
        }

        let mut update = serde_json::Map::new();
        update.insert("metadata".to_string(), metadata);
        if voided {
            update.insert("status".to_string(), json!(PaymentStatus::Refunded));
        }
        update.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!(
            "/rest/v1/payments?id=eq.{}&status=eq.completed",
            payment.id
        );
        let result: Result<Vec<Payment>, _> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(Value::Object(update)),
                Some(SupabaseClient::representation_headers()),
            )
            .await;

        if let Err(e) = result {
            error!(
                "MANUAL RECONCILIATION NEEDED: could not record compensation for payment {}: {}",
                payment.id, e
            );
        }
    }
}
