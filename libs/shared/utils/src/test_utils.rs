use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub webhook_secret: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            webhook_secret: "test-webhook-secret".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            payment_provider: "mock".to_string(),
            payment_gateway_url: String::new(),
            payment_gateway_api_key: String::new(),
            payment_webhook_secret: self.webhook_secret.clone(),
            currency: "INR".to_string(),
            default_consultation_fee: 25000,
            cancellation_lead_minutes: 60,
            unpaid_bill_limit: 2,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }
}

/// Canned PostgREST row payloads for wiremock-backed tests.
pub struct MockStoreResponses;

impl MockStoreResponses {
    pub fn doctor_profile(user_id: &str, hospital_id: &str, consultation_fee: i64) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "user_id": user_id,
            "hospital_id": hospital_id,
            "consultation_fee": consultation_fee,
            "is_active": true,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn appointment(
        id: &str,
        patient_id: &str,
        doctor_id: &str,
        date: &str,
        time_slot: &str,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": id,
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "date": date,
            "time_slot": time_slot,
            "status": status,
            "booking_fee_status": "paid",
            "final_bill_generated": false,
            "is_rated": false,
            "rating": null,
            "notes": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn payment(
        id: &str,
        patient_id: &str,
        doctor_id: &str,
        session_id: &str,
        payment_type: &str,
        status: &str,
        amount: i64,
    ) -> serde_json::Value {
        json!({
            "id": id,
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "appointment_id": null,
            "bill_id": null,
            "amount": amount,
            "currency": "INR",
            "payment_type": payment_type,
            "provider_session_id": session_id,
            "provider_payment_id": null,
            "status": status,
            "payment_date": null,
            "metadata": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn inventory_item(
        id: &str,
        hospital_id: &str,
        medicine_name: &str,
        stock_quantity: i32,
        price: i64,
    ) -> serde_json::Value {
        json!({
            "id": id,
            "hospital_id": hospital_id,
            "medicine_name": medicine_name,
            "generic_name": null,
            "stock_quantity": stock_quantity,
            "price": price,
            "unit": "tablet",
            "min_stock_level": 10,
            "is_active": true,
            "last_restocked": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn bill(
        id: &str,
        appointment_id: &str,
        patient_id: &str,
        doctor_id: &str,
        total_amount: i64,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": id,
            "appointment_id": appointment_id,
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "items": [],
            "total_amount": total_amount,
            "status": status,
            "notes": "",
            "paid_at": null,
            "payment_id": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn prescription(
        id: &str,
        appointment_id: &str,
        patient_id: &str,
        doctor_id: &str,
        medicines: serde_json::Value,
    ) -> serde_json::Value {
        json!({
            "id": id,
            "appointment_id": appointment_id,
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "medicines": medicines,
            "diagnosis": null,
            "notes": null,
            "date_issued": "2024-01-01T00:00:00Z",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }
}
