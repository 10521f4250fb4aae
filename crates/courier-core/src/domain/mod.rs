//! Domain model: jobs, auth configuration, ledger records, ids, errors.

pub mod auth;
pub mod errors;
pub mod ids;
pub mod job;
pub mod record;

pub use self::auth::AuthConfig;
pub use self::errors::{
    AuthError, DeliveryError, ErrorKind, LedgerError, QueueError, StartupError,
    TransportErrorKind,
};
pub use self::ids::{Id, IdMarker, JobId};
pub use self::job::{DEFAULT_CONTENT_TYPE, WebhookJob};
pub use self::record::{
    DeliveryRecord, DeliveryStatus, LedgerSummary, RESPONSE_SNIPPET_LIMIT, RecordAttempt,
    ResponseSummary, truncate_snippet,
};
