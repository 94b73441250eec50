//! Resource ownership check
//!
//! Every mutation of a user or entry, and every entry read, goes through
//! [`require_owner`]. A non-positive subject never passes, so an unset or
//! zero user ID cannot skip the comparison.

use super::middleware::AuthError;
use super::token::TokenError;
use diary_core::UserId;

/// Allow `user_id` to act on a resource owned by `owner_id`
pub fn require_owner(user_id: UserId, owner_id: UserId) -> Result<(), AuthError> {
    if user_id <= 0 {
        return Err(AuthError::InvalidToken(TokenError::InvalidSubject));
    }
    if user_id != owner_id {
        return Err(AuthError::Forbidden);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_owner_allowed() {
        assert!(require_owner(7, 7).is_ok());
    }

    #[test]
    fn test_other_user_forbidden() {
        assert!(matches!(require_owner(7, 8), Err(AuthError::Forbidden)));
    }

    #[test]
    fn test_zero_subject_rejected() {
        assert!(matches!(
            require_owner(0, 0),
            Err(AuthError::InvalidToken(TokenError::InvalidSubject))
        ));
        assert!(matches!(
            require_owner(-1, 5),
            Err(AuthError::InvalidToken(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_only_matching_positive_ids_pass(user in -5i64..50, owner in -5i64..50) {
            let allowed = require_owner(user, owner).is_ok();
            prop_assert_eq!(allowed, user > 0 && user == owner);
        }
    }
}
