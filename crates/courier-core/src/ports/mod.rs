//! Ports - 抽象化レイヤー
//!
//! Each trait here is a seam to something outside the delivery core: the
//! broker, the ledger database, the HTTP worker, time and id generation.

pub mod clock;
pub mod id_generator;
pub mod ledger;
pub mod processor;
pub mod queue_backend;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::ledger::DeliveryLedger;
pub use self::processor::{DeliveryReport, JobProcessor};
pub use self::queue_backend::{QueueBackend, QueueKind, QueueStats};
