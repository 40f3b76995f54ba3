//! Failed-attempt tracking
//!
//! Per-user sliding window of authentication outcomes with a cooldown-gated
//! security alert. All window and cooldown state lives behind one coarse
//! lock owned by this service object; the lock is held across the alert
//! send so that state mutation and delivery stay mutually exclusive per
//! process.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::models::Credential;
use crate::notify::Notifier;

pub struct AttemptTracker {
    state: Mutex<TrackerState>,
    window: Duration,
    min_failed: usize,
    cooldown: Duration,
}

#[derive(Default)]
struct TrackerState {
    /// user -> (timestamp, matched) pairs inside the trailing window
    attempts: HashMap<i64, Vec<(DateTime<Utc>, bool)>>,
    /// user -> last successfully delivered alert
    last_alert: HashMap<i64, DateTime<Utc>>,
}

impl AttemptTracker {
    pub fn new(window_secs: i64, min_failed: usize, cooldown_secs: i64) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            window: Duration::seconds(window_secs),
            min_failed,
            cooldown: Duration::seconds(cooldown_secs),
        }
    }

    /// Record one authentication outcome. Returns true when a security
    /// alert was fired (and delivered) for this attempt.
    pub async fn record_attempt(
        &self,
        pool: &SqlitePool,
        notifier: &Notifier,
        user_id: i64,
        matched: bool,
    ) -> bool {
        self.record_attempt_at(pool, notifier, user_id, matched, Utc::now())
            .await
    }

    async fn record_attempt_at(
        &self,
        pool: &SqlitePool,
        notifier: &Notifier,
        user_id: i64,
        matched: bool,
        now: DateTime<Utc>,
    ) -> bool {
        let mut state = self.state.lock().await;

        let entries = state.attempts.entry(user_id).or_default();
        entries.push((now, matched));

        // Strictly-older-than-window entries fall out on every read
        let cutoff = now - self.window;
        entries.retain(|(timestamp, _)| *timestamp > cutoff);

        let failed_count = entries.iter().filter(|(_, ok)| !ok).count();
        let total = entries.len();
        tracing::debug!(
            "User {}: {} failed out of {} attempts in last {}s",
            user_id,
            failed_count,
            total,
            self.window.num_seconds()
        );

        if failed_count < self.min_failed {
            return false;
        }

        if let Some(last) = state.last_alert.get(&user_id) {
            if now - *last <= self.cooldown {
                tracing::debug!("User {}: alert suppressed by cooldown", user_id);
                return false;
            }
        }

        let email = match Credential::email_for_user(pool, user_id).await {
            Ok(Some(email)) => email,
            Ok(None) => {
                tracing::warn!("No email on file for user {}; skipping alert", user_id);
                return false;
            }
            Err(e) => {
                tracing::error!("Email lookup failed for user {}: {}", user_id, e);
                return false;
            }
        };

        let time_s = now.format("%Y-%m-%d %H:%M:%S");
        let subject =
            format!("TouchAlytics Security Alert - Failed Biometric Swipes - {time_s}");
        let body = format!(
            "Hello,\n\n\
             We detected multiple failed biometric swipes associated with \
             your TouchAlytics account.\n\n\
             Failed attempts (last {} seconds): {}\n\
             Time of last attempt: {}\n\n\
             If this wasn't you, we recommend changing your password.\n\
             — TouchAlytics Security",
            self.window.num_seconds(),
            failed_count,
            time_s
        );

        match notifier.send(&email, &subject, &body).await {
            Ok(()) => {
                // The burst is consumed only once delivery succeeded
                state.last_alert.insert(user_id, now);
                state.attempts.insert(user_id, Vec::new());
                tracing::info!(
                    "Sent failed-attempt security alert to {} for user {}",
                    email,
                    user_id
                );
                true
            }
            Err(e) => {
                tracing::error!("Failed to send security alert for user {}: {}", user_id, e);
                false
            }
        }
    }

    #[cfg(test)]
    async fn window_len(&self, user_id: i64) -> usize {
        self.state
            .lock()
            .await
            .attempts
            .get(&user_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    #[cfg(test)]
    async fn last_alert_at(&self, user_id: i64) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_alert.get(&user_id).copied()
    }
}
