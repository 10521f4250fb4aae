//! Classifying partner "test endpoint" responses.
//!
//! Partner test endpoints mix transport success with application validation:
//! a 422 means the credentials were accepted but the sample payload was not.
//! Wrong credentials (401/403) must never be reported as a payload problem.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthTestVerdict {
    /// 2xx: credentials accepted and request succeeded.
    Valid,
    /// 400/422: credentials accepted, payload rejected.
    PayloadRejected,
    /// 401/403.
    InvalidCredentials,
    /// Anything else, including transport failures.
    Inconclusive,
}

impl AuthTestVerdict {
    /// `Some(true)` if the credentials are known good, `Some(false)` if known
    /// bad, `None` if the response does not tell.
    pub fn auth_valid(self) -> Option<bool> {
        match self {
            AuthTestVerdict::Valid | AuthTestVerdict::PayloadRejected => Some(true),
            AuthTestVerdict::InvalidCredentials => Some(false),
            AuthTestVerdict::Inconclusive => None,
        }
    }

    pub fn request_succeeded(self) -> bool {
        self == AuthTestVerdict::Valid
    }

    pub fn message(self, status_code: u16) -> String {
        match self {
            AuthTestVerdict::Valid => "authentication successful".to_string(),
            AuthTestVerdict::PayloadRejected => format!(
                "authentication accepted, but the endpoint rejected the test payload (HTTP {status_code})"
            ),
            AuthTestVerdict::InvalidCredentials => {
                format!("authentication failed: credentials rejected (HTTP {status_code})")
            }
            AuthTestVerdict::Inconclusive => {
                format!("request failed with HTTP {status_code}")
            }
        }
    }
}

pub fn classify_auth_test(status_code: u16) -> AuthTestVerdict {
    match status_code {
        200..=299 => AuthTestVerdict::Valid,
        400 | 422 => AuthTestVerdict::PayloadRejected,
        401 | 403 => AuthTestVerdict::InvalidCredentials,
        _ => AuthTestVerdict::Inconclusive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(200, AuthTestVerdict::Valid)]
    #[case(204, AuthTestVerdict::Valid)]
    #[case(299, AuthTestVerdict::Valid)]
    #[case(400, AuthTestVerdict::PayloadRejected)]
    #[case(422, AuthTestVerdict::PayloadRejected)]
    #[case(401, AuthTestVerdict::InvalidCredentials)]
    #[case(403, AuthTestVerdict::InvalidCredentials)]
    #[case(404, AuthTestVerdict::Inconclusive)]
    #[case(302, AuthTestVerdict::Inconclusive)]
    #[case(500, AuthTestVerdict::Inconclusive)]
    fn status_codes_map_to_verdicts(#[case] status: u16, #[case] expected: AuthTestVerdict) {
        assert_eq!(classify_auth_test(status), expected);
    }

    #[test]
    fn payload_rejection_still_counts_as_valid_auth() {
        assert_eq!(AuthTestVerdict::PayloadRejected.auth_valid(), Some(true));
        assert!(!AuthTestVerdict::PayloadRejected.request_succeeded());
        assert_eq!(AuthTestVerdict::InvalidCredentials.auth_valid(), Some(false));
        assert_eq!(AuthTestVerdict::Inconclusive.auth_valid(), None);
    }
}
