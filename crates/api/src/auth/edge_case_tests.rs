//! Edge Case Tests for Authentication
//!
//! Tests critical boundary conditions in:
//! - Verification code consumption (single-use, expiry)
//! - Recovery code format and at-rest hashing
//! - Token claims and invitation redemption rules
//! - Session ceilings and lifecycle schedules

#[cfg(test)]
mod verification_tests {
    use super::super::verification::*;
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    fn pending_row(expires_in: Duration) -> VerificationRow {
        VerificationRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            email: "new@example.com".into(),
            code: "483920".into(),
            verification_type: "signup".into(),
            expires_at: OffsetDateTime::now_utc() + expires_in,
            verified_at: None,
        }
    }

    // =========================================================================
    // A consumed verification must reject resubmission of the same code
    // =========================================================================
    #[test]
    fn consumed_verification_reads_as_verified() {
        let mut row = pending_row(Duration::minutes(15));
        assert!(!row.is_verified());

        // First redemption sets verified_at; the same row presented again
        // must be reported as already verified, not invalid.
        row.verified_at = Some(OffsetDateTime::now_utc());
        assert!(row.is_verified());
    }

    // =========================================================================
    // An expired record is rejected even when the code value matches
    // =========================================================================
    #[test]
    fn expired_verification_is_rejected_before_code_comparison() {
        let row = pending_row(Duration::minutes(-1));
        assert!(row.is_expired());
        // The handler branches on expiry before consuming; the exact code
        // match is irrelevant once past expires_at.
    }

    #[test]
    fn verification_ttl_is_fifteen_minutes() {
        assert_eq!(VERIFICATION_TTL_MINUTES, 15);
    }

    // =========================================================================
    // Concurrent redemption: the conditional-UPDATE claim admits one winner
    // =========================================================================
    #[test]
    fn claim_is_single_winner_by_construction() {
        // claim() matches only rows with verified_at IS NULL, so of two
        // concurrent redemptions exactly one UPDATE affects a row.
        // Simulated here - the actual race requires a test database.
        let row = pending_row(Duration::minutes(15));
        assert!(row.verified_at.is_none(), "claim precondition");
    }
}

#[cfg(test)]
mod recovery_code_tests {
    use super::super::codes::*;

    // =========================================================================
    // Response-payload format: ^[A-Z0-9]{5}-[A-Z0-9]{5}$
    // =========================================================================
    #[test]
    fn recovery_code_matches_response_contract() {
        for _ in 0..100 {
            let code = generate_recovery_code();
            let bytes = code.as_bytes();
            assert_eq!(bytes.len(), 11);
            assert_eq!(bytes[5], b'-');
            for (i, c) in code.chars().enumerate() {
                if i == 5 {
                    continue;
                }
                assert!(
                    c.is_ascii_uppercase() || c.is_ascii_digit(),
                    "unexpected character {c} in {code}"
                );
            }
        }
    }

    // =========================================================================
    // Plaintext never persists: only the argon2 hash and the 3-char hint
    // =========================================================================
    #[test]
    fn stored_forms_never_contain_the_plaintext() {
        let code = generate_recovery_code();
        let hash = hash_recovery_code(&code).expect("hashing should succeed");
        let hint = recovery_code_hint(&code);

        assert!(!hash.contains(&code));
        assert_eq!(hint.len(), 3);
        assert!(code.ends_with(&hint));
        assert!(verify_recovery_code(&code, &hash));
    }

    #[test]
    fn wrong_code_fails_verification() {
        let hash = hash_recovery_code("ABCDE-12345").expect("hashing should succeed");
        assert!(!verify_recovery_code("ABCDE-12346", &hash));
        assert!(!verify_recovery_code("", &hash));
    }

    #[test]
    fn garbage_stored_hash_fails_closed() {
        assert!(!verify_recovery_code("ABCDE-12345", "not-a-phc-string"));
    }
}

#[cfg(test)]
mod session_ceiling_tests {
    use super::super::jwt::*;
    use super::super::lifecycle::*;
    use std::time::Duration;

    const HOUR: u64 = 60 * 60;

    #[test]
    fn ceilings_match_product_rules() {
        assert_eq!(REFRESH_CEILING_HOURS, 48);
        assert_eq!(REMEMBER_ME_CEILING_DAYS, 7);
    }

    // =========================================================================
    // Refresh timer always precedes logout when there is room for both
    // =========================================================================
    #[test]
    fn refresh_fires_before_logout() {
        let s = compute_schedule(Duration::ZERO, Duration::from_secs(HOUR), false);
        let refresh_in = s.refresh_in.expect("refresh should be scheduled");
        assert!(s.warning_in < refresh_in);
        assert!(refresh_in < s.logout_in);
    }

    // =========================================================================
    // The warning leads logout by 10 minutes, refresh by 5
    // =========================================================================
    #[test]
    fn lead_times_are_ten_and_five_minutes() {
        assert_eq!(EXPIRY_WARNING_LEAD, Duration::from_secs(10 * 60));
        assert_eq!(REFRESH_LEAD, Duration::from_secs(5 * 60));
    }

    // =========================================================================
    // Remember-Me changes the ceiling, not the lead times
    // =========================================================================
    #[test]
    fn remember_me_only_moves_the_ceiling() {
        let without = compute_schedule(Duration::ZERO, Duration::from_secs(400 * HOUR), false);
        let with = compute_schedule(Duration::ZERO, Duration::from_secs(400 * HOUR), true);
        assert_eq!(without.logout_in, Duration::from_secs(48 * HOUR));
        assert_eq!(with.logout_in, Duration::from_secs(7 * 24 * HOUR));
    }
}
