//! Partner authentication: parsing, resolution, merging and probing.
//!
//! - **scheme**: raw config -> validated `AuthScheme`
//! - **resolver**: `AuthScheme` -> headers + URL
//! - **classify** / **probe**: what a partner test endpoint says about the credentials
//! - **merge**: partial updates that never erase stored secrets

pub mod classify;
pub mod merge;
pub mod probe;
pub mod resolver;
pub mod scheme;

pub use self::classify::{AuthTestVerdict, classify_auth_test};
pub use self::merge::merge_secrets;
pub use self::probe::{AuthProbe, AuthTestResult};
pub use self::resolver::{
    AuthResolution, ResolvedAuth, resolve, try_resolve, try_resolve_optional,
};
pub use self::scheme::{AuthKind, AuthScheme, ParsedAuth};
