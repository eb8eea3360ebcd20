use assert_matches::assert_matches;
use chrono::NaiveDate;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use inventory_cell::models::InventoryError;
use payment_cell::models::{
    CreateBookingOrderRequest, PaymentError, PaymentStatus, PaymentType,
};
use payment_cell::services::coordinator::PaymentCoordinatorService;
use payment_cell::services::provider::ProviderConfirmation;
use shared_utils::test_utils::{MockStoreResponses, TestConfig, TestUser};

fn coordinator_for(server: &MockServer) -> PaymentCoordinatorService {
    let config = TestConfig::with_supabase_url(&server.uri()).to_app_config();
    PaymentCoordinatorService::new(&config)
}

#[allow(clippy::too_many_arguments)]
fn payment_row(
    id: Uuid,
    patient_id: &str,
    doctor_id: Uuid,
    session_id: &str,
    payment_type: &str,
    status: &str,
    amount: i64,
    metadata: serde_json::Value,
    appointment_id: Option<Uuid>,
    bill_id: Option<Uuid>,
) -> serde_json::Value {
    json!({
        "id": id,
        "patient_id": patient_id,
        "doctor_id": doctor_id,
        "appointment_id": appointment_id,
        "bill_id": bill_id,
        "amount": amount,
        "currency": "INR",
        "payment_type": payment_type,
        "provider_session_id": session_id,
        "provider_payment_id": null,
        "status": status,
        "payment_date": null,
        "metadata": metadata,
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z"
    })
}

fn booking_metadata(doctor_id: Uuid) -> serde_json::Value {
    json!({
        "doctor_id": doctor_id,
        "date": "2024-05-01",
        "time_slot": "10:00-10:30"
    })
}

// ==============================================================================
// ORDER CREATION
// ==============================================================================

#[tokio::test]
async fn booking_order_opens_a_session_and_a_pending_payment() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("order@example.com");
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .and(query_param("user_id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::doctor_profile(&doctor_id.to_string(), &Uuid::new_v4().to_string(), 25000)
        ])))
        .mount(&mock_server)
        .await;

    // No pending dues.
    Mock::given(method("GET"))
        .and(path("/rest/v1/bills"))
        .and(query_param("status", "eq.unpaid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    // Slot precheck: free.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([payment_row(
            Uuid::new_v4(),
            &patient.id,
            doctor_id,
            "order_abc123def",
            "booking_fee",
            "pending",
            25000,
            booking_metadata(doctor_id),
            None,
            None,
        )])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let coordinator = coordinator_for(&mock_server);
    let (payment, session) = coordinator
        .create_booking_order(
            &patient.to_user(),
            CreateBookingOrderRequest {
                doctor_id,
                date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                time_slot: "10:00-10:30".to_string(),
            },
            "token",
        )
        .await
        .expect("order should open");

    assert!(session.session_id.starts_with("order_"));
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.amount, 25000);
    assert_eq!(payment.payment_type, PaymentType::BookingFee);
}

#[tokio::test]
async fn pending_dues_block_new_booking_orders() {
    let mock_server = MockServer::start().await;
    let patient = TestUser::patient("dues@example.com");
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::doctor_profile(&doctor_id.to_string(), &Uuid::new_v4().to_string(), 25000)
        ])))
        .mount(&mock_server)
        .await;

    // Two unpaid bills: at the limit.
    Mock::given(method("GET"))
        .and(path("/rest/v1/bills"))
        .and(query_param("status", "eq.unpaid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::bill(
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                &patient.id,
                &doctor_id.to_string(),
                1500,
                "unpaid",
            ),
            MockStoreResponses::bill(
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                &patient.id,
                &doctor_id.to_string(),
                2500,
                "unpaid",
            )
        ])))
        .mount(&mock_server)
        .await;

    // Neither a provider session nor a payment row may be created.
    Mock::given(method("POST"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let coordinator = coordinator_for(&mock_server);
    let result = coordinator
        .create_booking_order(
            &patient.to_user(),
            CreateBookingOrderRequest {
                doctor_id,
                date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                time_slot: "10:00-10:30".to_string(),
            },
            "token",
        )
        .await;

    assert_matches!(result, Err(PaymentError::PendingDues(2)));
}

// ==============================================================================
// BOOKING FINALIZATION
// ==============================================================================

#[tokio::test]
async fn finalize_creates_the_appointment_after_payment() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let payment_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();
    let session = "order_pay_first";

    Mock::given(method("GET"))
        .and(path("/rest/v1/payments"))
        .and(query_param("provider_session_id", format!("eq.{}", session)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([payment_row(
            payment_id,
            &patient_id.to_string(),
            doctor_id,
            session,
            "booking_fee",
            "pending",
            25000,
            booking_metadata(doctor_id),
            None,
            None,
        )])))
        .mount(&mock_server)
        .await;

    // The status-guarded completion claim.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/payments"))
        .and(query_param("provider_session_id", format!("eq.{}", session)))
        .and(query_param("status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([payment_row(
            payment_id,
            &patient_id.to_string(),
            doctor_id,
            session,
            "booking_fee",
            "completed",
            25000,
            booking_metadata(doctor_id),
            None,
            None,
        )])))
        .expect(1)
        .mount(&mock_server)
        .await;

    // The conditional insert that claims the slot.
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockStoreResponses::appointment(
                &appointment_id.to_string(),
                &patient_id.to_string(),
                &doctor_id.to_string(),
                "2024-05-01",
                "10:00-10:30",
                "scheduled",
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    // Linking the payment to its appointment.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/payments"))
        .and(query_param("id", format!("eq.{}", payment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([payment_row(
            payment_id,
            &patient_id.to_string(),
            doctor_id,
            session,
            "booking_fee",
            "completed",
            25000,
            booking_metadata(doctor_id),
            Some(appointment_id),
            None,
        )])))
        .mount(&mock_server)
        .await;

    let coordinator = coordinator_for(&mock_server);
    let outcome = coordinator
        .finalize(
            ProviderConfirmation {
                session_id: session.to_string(),
                provider_payment_id: Some("pay_abc".to_string()),
                paid: true,
            },
            "token",
        )
        .await
        .expect("finalize should succeed");

    assert!(!outcome.replayed);
    let appointment = outcome.appointment.expect("appointment should be created");
    assert_eq!(appointment.id, appointment_id);
    assert_eq!(outcome.payment.appointment_id, Some(appointment_id));
}

#[tokio::test]
async fn replaying_a_completed_session_applies_no_side_effects() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();
    let session = "order_replay";

    Mock::given(method("GET"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([payment_row(
            Uuid::new_v4(),
            &patient_id.to_string(),
            doctor_id,
            session,
            "booking_fee",
            "completed",
            25000,
            booking_metadata(doctor_id),
            Some(appointment_id),
            None,
        )])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::appointment(
                &appointment_id.to_string(),
                &patient_id.to_string(),
                &doctor_id.to_string(),
                "2024-05-01",
                "10:00-10:30",
                "scheduled",
            )
        ])))
        .mount(&mock_server)
        .await;

    // Replays must not write anything.
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let coordinator = coordinator_for(&mock_server);

    // Replay the same confirmation twice more; the outcome stays identical.
    for _ in 0..2 {
        let outcome = coordinator
            .finalize(
                ProviderConfirmation {
                    session_id: session.to_string(),
                    provider_payment_id: Some("pay_abc".to_string()),
                    paid: true,
                },
                "token",
            )
            .await
            .expect("replay should succeed");

        assert!(outcome.replayed);
        assert_eq!(outcome.payment.status, PaymentStatus::Completed);
        assert_eq!(
            outcome.appointment.as_ref().map(|a| a.id),
            Some(appointment_id)
        );
    }
}

#[tokio::test]
async fn a_stolen_slot_fails_finalize_with_conflict_and_refunds_the_payment() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let payment_id = Uuid::new_v4();
    let session = "order_stolen_slot";

    Mock::given(method("GET"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([payment_row(
            payment_id,
            &patient_id.to_string(),
            doctor_id,
            session,
            "booking_fee",
            "pending",
            25000,
            booking_metadata(doctor_id),
            None,
            None,
        )])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/payments"))
        .and(query_param("status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([payment_row(
            payment_id,
            &patient_id.to_string(),
            doctor_id,
            session,
            "booking_fee",
            "completed",
            25000,
            booking_metadata(doctor_id),
            None,
            None,
        )])))
        .mount(&mock_server)
        .await;

    // Patient B won the slot between order creation and finalize.
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    // Compensation: the completed payment is marked refunded.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/payments"))
        .and(query_param("id", format!("eq.{}", payment_id)))
        .and(query_param("status", "eq.completed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([payment_row(
            payment_id,
            &patient_id.to_string(),
            doctor_id,
            session,
            "booking_fee",
            "refunded",
            25000,
            booking_metadata(doctor_id),
            None,
            None,
        )])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let coordinator = coordinator_for(&mock_server);
    let result = coordinator
        .finalize(
            ProviderConfirmation {
                session_id: session.to_string(),
                provider_payment_id: None,
                paid: true,
            },
            "token",
        )
        .await;

    assert_matches!(result, Err(PaymentError::SlotTaken));
}

// ==============================================================================
// BILL SETTLEMENT
// ==============================================================================

fn bill_row_with_stock(
    bill_id: Uuid,
    appointment_id: Uuid,
    patient_id: &str,
    doctor_id: Uuid,
    item_id: Uuid,
    quantity: i32,
    status: &str,
) -> serde_json::Value {
    let mut bill = MockStoreResponses::bill(
        &bill_id.to_string(),
        &appointment_id.to_string(),
        patient_id,
        &doctor_id.to_string(),
        1500 * quantity as i64,
        status,
    );
    bill["items"] = json!([{
        "description": "Paracetamol 500mg - 500mg (3x daily for 2 days)",
        "quantity": quantity,
        "amount": 1500,
        "inventory_item_id": item_id
    }]);
    bill
}

#[tokio::test]
async fn settlement_commits_stock_before_marking_the_bill_paid() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let payment_id = Uuid::new_v4();
    let bill_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();
    let item_id = Uuid::new_v4();
    let session = "order_settle";

    Mock::given(method("GET"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([payment_row(
            payment_id,
            &patient_id.to_string(),
            doctor_id,
            session,
            "bill_payment",
            "pending",
            9000,
            json!(null),
            Some(appointment_id),
            Some(bill_id),
        )])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/payments"))
        .and(query_param("status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([payment_row(
            payment_id,
            &patient_id.to_string(),
            doctor_id,
            session,
            "bill_payment",
            "completed",
            9000,
            json!(null),
            Some(appointment_id),
            Some(bill_id),
        )])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/bills"))
        .and(query_param("id", format!("eq.{}", bill_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([bill_row_with_stock(
            bill_id,
            appointment_id,
            &patient_id.to_string(),
            doctor_id,
            item_id,
            6,
            "unpaid",
        )])))
        .mount(&mock_server)
        .await;

    // Conditional stock decrement for the single line.
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/decrement_stock"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::inventory_item(
                &item_id.to_string(),
                &Uuid::new_v4().to_string(),
                "Paracetamol 500mg",
                4,
                1500,
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    // Guarded flip to paid, only after the stock committed.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/bills"))
        .and(query_param("id", format!("eq.{}", bill_id)))
        .and(query_param("status", "eq.unpaid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([bill_row_with_stock(
            bill_id,
            appointment_id,
            &patient_id.to_string(),
            doctor_id,
            item_id,
            6,
            "paid",
        )])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let coordinator = coordinator_for(&mock_server);
    let outcome = coordinator
        .finalize(
            ProviderConfirmation {
                session_id: session.to_string(),
                provider_payment_id: Some("pay_settle".to_string()),
                paid: true,
            },
            "token",
        )
        .await
        .expect("settlement should succeed");

    assert!(!outcome.replayed);
    let bill = outcome.bill.expect("bill should be settled");
    assert_eq!(bill.total_amount, 9000);
}

#[tokio::test]
async fn settlement_fails_with_insufficient_stock_and_leaves_the_bill_unpaid() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let payment_id = Uuid::new_v4();
    let bill_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();
    let item_id = Uuid::new_v4();
    let session = "order_shortage";

    Mock::given(method("GET"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([payment_row(
            payment_id,
            &patient_id.to_string(),
            doctor_id,
            session,
            "bill_payment",
            "pending",
            9000,
            json!(null),
            Some(appointment_id),
            Some(bill_id),
        )])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/payments"))
        .and(query_param("status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([payment_row(
            payment_id,
            &patient_id.to_string(),
            doctor_id,
            session,
            "bill_payment",
            "completed",
            9000,
            json!(null),
            Some(appointment_id),
            Some(bill_id),
        )])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/bills"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([bill_row_with_stock(
            bill_id,
            appointment_id,
            &patient_id.to_string(),
            doctor_id,
            item_id,
            6,
            "unpaid",
        )])))
        .mount(&mock_server)
        .await;

    // Another bill consumed the stock first: the conditional update misses.
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/decrement_stock"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/inventory"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::inventory_item(
                &item_id.to_string(),
                &Uuid::new_v4().to_string(),
                "Paracetamol 500mg",
                4,
                1500,
            )
        ])))
        .mount(&mock_server)
        .await;

    // The bill must never be flipped to paid.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/bills"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    // Compensation refund for the captured amount.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/payments"))
        .and(query_param("id", format!("eq.{}", payment_id)))
        .and(query_param("status", "eq.completed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([payment_row(
            payment_id,
            &patient_id.to_string(),
            doctor_id,
            session,
            "bill_payment",
            "refunded",
            9000,
            json!(null),
            Some(appointment_id),
            Some(bill_id),
        )])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let coordinator = coordinator_for(&mock_server);
    let result = coordinator
        .finalize(
            ProviderConfirmation {
                session_id: session.to_string(),
                provider_payment_id: None,
                paid: true,
            },
            "token",
        )
        .await;

    assert_matches!(
        result,
        Err(PaymentError::Inventory(InventoryError::InsufficientStock {
            available: 4,
            requested: 6,
            ..
        }))
    );
}
