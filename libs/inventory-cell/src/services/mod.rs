pub mod inventory;
pub mod reservation;

pub use inventory::InventoryService;
pub use reservation::InventoryReservationService;
