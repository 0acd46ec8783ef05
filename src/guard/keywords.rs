//! Raw-text keyword ban.
//!
//! Independent of the grammar parse: text the parser would choke on is still
//! scanned, so a parser bug cannot remove this check.

use crate::error::ValidationError;
use crate::policy::Policy;

/// Reject `text` if any banned keyword appears as a whole word, in any case.
pub fn scan(text: &str, policy: &Policy) -> Result<(), ValidationError> {
    match policy.find_banned_keyword(text) {
        Some(keyword) => Err(ValidationError::ForbiddenOperation(keyword)),
        None => Ok(()),
    }
}
