use assert_matches::assert_matches;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use inventory_cell::models::{InventoryError, InventoryItem, StockLine};
use inventory_cell::services::InventoryReservationService;
use shared_utils::test_utils::{MockStoreResponses, TestConfig};

fn service_for(server: &MockServer) -> InventoryReservationService {
    let config = TestConfig::with_supabase_url(&server.uri()).to_app_config();
    InventoryReservationService::new(&config)
}

fn item_from_json(value: serde_json::Value) -> InventoryItem {
    serde_json::from_value(value).expect("inventory item should deserialize")
}

#[tokio::test]
async fn resolve_item_matches_name_case_insensitively() {
    let mock_server = MockServer::start().await;
    let hospital_id = Uuid::new_v4();
    let item_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/inventory"))
        .and(query_param("hospital_id", format!("eq.{}", hospital_id)))
        .and(query_param("medicine_name", "ilike.paracetamol 500mg"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::inventory_item(
                &item_id,
                &hospital_id.to_string(),
                "Paracetamol 500mg",
                10,
                1500,
            )
        ])))
        .mount(&mock_server)
        .await;

    let service = service_for(&mock_server);
    let item = service
        .resolve_item(hospital_id, "paracetamol 500mg", "token")
        .await
        .expect("item should resolve");

    assert_eq!(item.medicine_name, "Paracetamol 500mg");
    assert_eq!(item.stock_quantity, 10);
}

#[tokio::test]
async fn resolve_item_reports_missing_medicine_by_name() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/inventory"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let service = service_for(&mock_server);
    let result = service
        .resolve_item(Uuid::new_v4(), "Ghost Pill", "token")
        .await;

    assert_matches!(result, Err(InventoryError::MedicineNotFound(name)) => {
        assert_eq!(name, "Ghost Pill");
    });
}

#[test]
fn check_availability_requires_active_item_with_enough_stock() {
    let config = TestConfig::default().to_app_config();
    let service = InventoryReservationService::new(&config);

    let hospital = Uuid::new_v4().to_string();
    let mut item = item_from_json(MockStoreResponses::inventory_item(
        &Uuid::new_v4().to_string(),
        &hospital,
        "Paracetamol 500mg",
        10,
        1500,
    ));

    assert!(service.check_availability(&item, 10));
    assert!(!service.check_availability(&item, 11));

    item.is_active = false;
    assert!(!service.check_availability(&item, 1));
}

#[tokio::test]
async fn commit_decrement_takes_every_line_once() {
    let mock_server = MockServer::start().await;
    let hospital = Uuid::new_v4().to_string();
    let item_a = Uuid::new_v4();
    let item_b = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/decrement_stock"))
        .and(body_json(json!({"p_item_id": item_a, "p_quantity": 6})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::inventory_item(
                &item_a.to_string(), &hospital, "Paracetamol 500mg", 4, 1500,
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/decrement_stock"))
        .and(body_json(json!({"p_item_id": item_b, "p_quantity": 2})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::inventory_item(
                &item_b.to_string(), &hospital, "Amoxicillin 250mg", 8, 3200,
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = service_for(&mock_server);
    let lines = vec![
        StockLine {
            inventory_item_id: item_a,
            medicine_name: "Paracetamol 500mg".to_string(),
            quantity: 6,
        },
        StockLine {
            inventory_item_id: item_b,
            medicine_name: "Amoxicillin 250mg".to_string(),
            quantity: 2,
        },
    ];

    service
        .commit_decrement(&lines, "token")
        .await
        .expect("commit should succeed");
}

#[tokio::test]
async fn failed_commit_releases_lines_already_taken() {
    let mock_server = MockServer::start().await;
    let hospital = Uuid::new_v4().to_string();
    let item_a = Uuid::new_v4();
    let item_b = Uuid::new_v4();

    // First line succeeds.
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/decrement_stock"))
        .and(body_json(json!({"p_item_id": item_a, "p_quantity": 6})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::inventory_item(
                &item_a.to_string(), &hospital, "Paracetamol 500mg", 4, 1500,
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    // Second line finds the stock gone: the conditional update matches no row.
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/decrement_stock"))
        .and(body_json(json!({"p_item_id": item_b, "p_quantity": 6})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    // Shortfall re-read for the error message.
    Mock::given(method("GET"))
        .and(path("/rest/v1/inventory"))
        .and(query_param("id", format!("eq.{}", item_b)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::inventory_item(
                &item_b.to_string(), &hospital, "Amoxicillin 250mg", 4, 3200,
            )
        ])))
        .mount(&mock_server)
        .await;

    // The already-taken first line must be released exactly once.
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/increment_stock"))
        .and(body_json(json!({"p_item_id": item_a, "p_quantity": 6})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::inventory_item(
                &item_a.to_string(), &hospital, "Paracetamol 500mg", 10, 1500,
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = service_for(&mock_server);
    let lines = vec![
        StockLine {
            inventory_item_id: item_a,
            medicine_name: "Paracetamol 500mg".to_string(),
            quantity: 6,
        },
        StockLine {
            inventory_item_id: item_b,
            medicine_name: "Amoxicillin 250mg".to_string(),
            quantity: 6,
        },
    ];

    let result = service.commit_decrement(&lines, "token").await;

    assert_matches!(
        result,
        Err(InventoryError::InsufficientStock { medicine, available, requested }) => {
            assert_eq!(medicine, "Amoxicillin 250mg");
            assert_eq!(available, 4);
            assert_eq!(requested, 6);
        }
    );
}
