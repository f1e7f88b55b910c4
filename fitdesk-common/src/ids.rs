//! Identifier helpers
//!
//! Account ids are opaque strings owned by the account subsystem. Fresh ids
//! minted here are hyphenated UUIDv4 text, which is what the signup flow
//! writes as well.

use uuid::Uuid;

/// Generate an id for a batch run (used to correlate log lines)
pub fn new_run_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new opaque account id
pub fn new_account_id() -> String {
    Uuid::new_v4().to_string()
}
