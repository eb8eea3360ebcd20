pub mod billing;
pub mod prescriptions;

pub use billing::BillingEngineService;
pub use prescriptions::PrescriptionStore;
