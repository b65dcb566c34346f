pub mod alert;
pub mod event;

pub use alert::{AlertRecord, AlertStatus};
pub use event::RawEvent;
