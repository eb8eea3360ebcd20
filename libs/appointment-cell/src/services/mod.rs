pub mod appointments;
pub mod lifecycle;
pub mod slots;

pub use appointments::AppointmentService;
pub use lifecycle::LifecycleService;
pub use slots::SlotLedgerService;
