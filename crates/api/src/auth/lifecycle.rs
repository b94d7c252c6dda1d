//! Client-side session lifecycle management
//!
//! Schedules the timers a signed-in client runs against its session:
//! an expiry warning 10 minutes out (offering re-verification with a
//! fresh one-time code instead of a hard logout), a silent-refresh
//! prompt 5 minutes out, and a forced logout at the effective end of the
//! session. The effective end is the earlier of the token expiry and the
//! session-age ceiling: 48 hours without Remember-Me, 7 days with it.
//!
//! State is explicit: every call to [`SessionLifecycle::schedule`]
//! returns a handle that cancels the pending timers, and the caller
//! re-schedules after a successful refresh. Nothing here is a global.

use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::jwt::{REFRESH_CEILING_HOURS, REMEMBER_ME_CEILING_DAYS};

/// Warning surfaces this long before the effective end.
pub const EXPIRY_WARNING_LEAD: Duration = Duration::from_secs(10 * 60);
/// Silent refresh is prompted this long before token expiry.
pub const REFRESH_LEAD: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Surface the expiry warning UI.
    ExpiryWarning,
    /// Silently refresh the access token now.
    RefreshDue,
    /// The session is over; drop local state.
    LoggedOut,
}

/// Computed timer offsets for one scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSchedule {
    pub warning_in: Duration,
    /// None when a refresh would land at or after the forced logout.
    pub refresh_in: Option<Duration>,
    pub logout_in: Duration,
}

/// Pure schedule computation, separated from the timers for testability.
///
/// `session_age` is how long ago the session was created; `to_expiry` is
/// the remaining access-token lifetime.
pub fn compute_schedule(
    session_age: Duration,
    to_expiry: Duration,
    remember_me: bool,
) -> SessionSchedule {
    let ceiling = if remember_me {
        Duration::from_secs(REMEMBER_ME_CEILING_DAYS as u64 * 24 * 60 * 60)
    } else {
        Duration::from_secs(REFRESH_CEILING_HOURS as u64 * 60 * 60)
    };

    let to_ceiling = ceiling.saturating_sub(session_age);
    let logout_in = to_expiry.min(to_ceiling);
    let warning_in = logout_in.saturating_sub(EXPIRY_WARNING_LEAD);

    let refresh_in = to_expiry.saturating_sub(REFRESH_LEAD);
    let refresh_in = (refresh_in < logout_in).then_some(refresh_in);

    SessionSchedule {
        warning_in,
        refresh_in,
        logout_in,
    }
}

/// Cancellation handle for one scheduling pass.
pub struct LifecycleHandle {
    task: JoinHandle<()>,
}

impl LifecycleHandle {
    /// Cancel all pending timers. The event channel closes.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for LifecycleHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Timer driver for the session lifecycle.
pub struct SessionLifecycle;

impl SessionLifecycle {
    /// Schedule timers from session metadata as the server reports it.
    pub fn schedule(
        created_at: OffsetDateTime,
        expires_at: OffsetDateTime,
        remember_me: bool,
    ) -> (LifecycleHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let now = OffsetDateTime::now_utc();
        let session_age = (now - created_at).try_into().unwrap_or(Duration::ZERO);
        let to_expiry = (expires_at - now).try_into().unwrap_or(Duration::ZERO);
        Self::schedule_from(compute_schedule(session_age, to_expiry, remember_me))
    }

    /// Schedule timers from a precomputed schedule.
    pub fn schedule_from(
        schedule: SessionSchedule,
    ) -> (LifecycleHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut elapsed = Duration::ZERO;
            let mut events: Vec<(Duration, SessionEvent)> = Vec::with_capacity(3);
            events.push((schedule.warning_in, SessionEvent::ExpiryWarning));
            if let Some(refresh_in) = schedule.refresh_in {
                events.push((refresh_in, SessionEvent::RefreshDue));
            }
            events.push((schedule.logout_in, SessionEvent::LoggedOut));
            events.sort_by_key(|(at, _)| *at);

            for (at, event) in events {
                tokio::time::sleep(at.saturating_sub(elapsed)).await;
                elapsed = at;
                if tx.send(event).is_err() {
                    return;
                }
            }
        });

        (LifecycleHandle { task }, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: u64 = 60;
    const HOUR: u64 = 60 * 60;

    #[test]
    fn schedule_leads_for_a_one_hour_token() {
        let s = compute_schedule(
            Duration::ZERO,
            Duration::from_secs(HOUR),
            false,
        );
        assert_eq!(s.warning_in, Duration::from_secs(50 * MIN));
        assert_eq!(s.refresh_in, Some(Duration::from_secs(55 * MIN)));
        assert_eq!(s.logout_in, Duration::from_secs(HOUR));
    }

    #[test]
    fn ceiling_forces_logout_before_token_expiry() {
        // 100h of token left but no Remember-Me: the 48h ceiling wins and
        // the refresh timer is suppressed.
        let s = compute_schedule(
            Duration::ZERO,
            Duration::from_secs(100 * HOUR),
            false,
        );
        assert_eq!(s.logout_in, Duration::from_secs(48 * HOUR));
        assert_eq!(s.refresh_in, None);
    }

    #[test]
    fn remember_me_raises_ceiling_to_seven_days() {
        let s = compute_schedule(
            Duration::ZERO,
            Duration::from_secs(100 * HOUR),
            true,
        );
        assert_eq!(s.logout_in, Duration::from_secs(100 * HOUR));
        assert!(s.refresh_in.is_some());
    }

    #[test]
    fn aged_session_logs_out_at_remaining_ceiling() {
        // 47h old session without Remember-Me: one hour of ceiling left.
        let s = compute_schedule(
            Duration::from_secs(47 * HOUR),
            Duration::from_secs(2 * HOUR),
            false,
        );
        assert_eq!(s.logout_in, Duration::from_secs(HOUR));
    }

    #[test]
    fn expired_session_fires_everything_immediately() {
        let s = compute_schedule(Duration::ZERO, Duration::ZERO, false);
        assert_eq!(s.logout_in, Duration::ZERO);
        assert_eq!(s.warning_in, Duration::ZERO);
        assert_eq!(s.refresh_in, None);
    }

    #[tokio::test(start_paused = true)]
    async fn events_fire_in_order() {
        let (_handle, mut rx) = SessionLifecycle::schedule_from(compute_schedule(
            Duration::ZERO,
            Duration::from_secs(HOUR),
            false,
        ));

        // Paused tokio time auto-advances through the sleeps.
        assert_eq!(rx.recv().await, Some(SessionEvent::ExpiryWarning));
        assert_eq!(rx.recv().await, Some(SessionEvent::RefreshDue));
        assert_eq!(rx.recv().await, Some(SessionEvent::LoggedOut));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_pending_events() {
        let (handle, mut rx) = SessionLifecycle::schedule_from(compute_schedule(
            Duration::ZERO,
            Duration::from_secs(HOUR),
            false,
        ));

        handle.cancel();
        // The sender is dropped by the aborted task; the channel closes
        // without delivering anything.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn short_session_skips_refresh() {
        // Logout and warning coincide at zero lead; refresh is suppressed
        // because it would land at the logout instant.
        let (_handle, mut rx) = SessionLifecycle::schedule_from(compute_schedule(
            Duration::from_secs(48 * HOUR),
            Duration::from_secs(HOUR),
            false,
        ));

        assert_eq!(rx.recv().await, Some(SessionEvent::ExpiryWarning));
        assert_eq!(rx.recv().await, Some(SessionEvent::LoggedOut));
        assert_eq!(rx.recv().await, None);
    }
}
