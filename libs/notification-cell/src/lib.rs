pub mod dispatch;
pub mod models;

pub use dispatch::NotificationDispatcherService;
pub use models::*;
