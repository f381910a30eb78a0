//! Membership wire codec for the HTTP-form admin UI.
//!
//! The members form carries the whole vector in a hidden `hiddenMem`
//! field: one character per port, ordered by port index. Encode and
//! decode are inverse functions over any well-formed code string.

use vlansync_common::{SyncError, SyncResult};
use vlansync_core::MembershipState;

/// Wire code for an untagged member.
pub const UNTAGGED_CODE: char = '1';
/// Wire code for a tagged member.
pub const TAGGED_CODE: char = '2';
/// Wire code for a non-member.
pub const EXCLUDED_CODE: char = '3';

/// Encodes a membership vector as a `hiddenMem` code string.
pub fn encode_membership(states: &[MembershipState]) -> String {
    states
        .iter()
        .map(|state| match state {
            MembershipState::Untagged => UNTAGGED_CODE,
            MembershipState::Tagged => TAGGED_CODE,
            MembershipState::Excluded => EXCLUDED_CODE,
        })
        .collect()
}

/// Decodes a `hiddenMem` code string into a membership vector.
pub fn decode_membership(code: &str) -> SyncResult<Vec<MembershipState>> {
    code.chars()
        .map(|c| match c {
            UNTAGGED_CODE => Ok(MembershipState::Untagged),
            TAGGED_CODE => Ok(MembershipState::Tagged),
            EXCLUDED_CODE => Ok(MembershipState::Excluded),
            other => Err(SyncError::protocol(
                "decoding membership code",
                format!("unexpected character {other:?} in {code:?}"),
            )),
        })
        .collect()
}
