use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::coupon::UserType;

/// Accounts at most this many days old count as new members.
pub const NEW_MEMBER_MAX_DAYS: i64 = 30;
/// Accounts at least this many days old count as long-term members.
pub const LOYAL_MEMBER_MIN_DAYS: i64 = 90;

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the auth/session collaborator knows about an account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub email: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    /// Whole days since registration, floored.
    pub fn days_since_registration(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds().div_euclid(SECONDS_PER_DAY)
    }

    pub fn is_new_member(&self, now: DateTime<Utc>) -> bool {
        self.days_since_registration(now) <= NEW_MEMBER_MAX_DAYS
    }

    pub fn is_loyal_member(&self, now: DateTime<Utc>) -> bool {
        self.days_since_registration(now) >= LOYAL_MEMBER_MIN_DAYS
    }

    pub fn qualifies_for(&self, user_type: UserType, now: DateTime<Utc>) -> bool {
        match user_type {
            UserType::All => true,
            UserType::New => self.is_new_member(now),
            UserType::Loyal => self.is_loyal_member(now),
        }
    }
}
