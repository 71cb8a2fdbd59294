//! Notification delivery: persistence first, then push or offline queue.

mod service;
pub mod sweeper;

pub use service::{
    Created, DeliveryOutcome, DeliveryReport, ListQuery, NotificationService, DEFAULT_PAGE_SIZE,
    MAX_PAGE_SIZE,
};
