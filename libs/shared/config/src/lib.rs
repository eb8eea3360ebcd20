use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub payment_provider: String,
    pub payment_gateway_url: String,
    pub payment_gateway_api_key: String,
    pub payment_webhook_secret: String,
    pub currency: String,
    pub default_consultation_fee: i64,
    pub cancellation_lead_minutes: i64,
    pub unpaid_bill_limit: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            payment_provider: env::var("PAYMENT_PROVIDER")
                .unwrap_or_else(|_| {
                    warn!("PAYMENT_PROVIDER not set, using mock provider");
                    "mock".to_string()
                }),
            payment_gateway_url: env::var("PAYMENT_GATEWAY_URL")
                .unwrap_or_else(|_| String::new()),
            payment_gateway_api_key: env::var("PAYMENT_GATEWAY_API_KEY")
                .unwrap_or_else(|_| String::new()),
            payment_webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET")
                .unwrap_or_else(|_| {
                    warn!("PAYMENT_WEBHOOK_SECRET not set, webhook verification disabled");
                    String::new()
                }),
            currency: env::var("PAYMENT_CURRENCY")
                .unwrap_or_else(|_| "INR".to_string()),
            default_consultation_fee: env::var("CONSULTATION_FEE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(25000),
            cancellation_lead_minutes: env::var("CANCELLATION_LEAD_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            unpaid_bill_limit: env::var("UNPAID_BILL_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_gateway_configured(&self) -> bool {
        !self.payment_gateway_url.is_empty() && !self.payment_gateway_api_key.is_empty()
    }
}
