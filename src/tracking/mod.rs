use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::tracking::TrackingToken;
use crate::store::Store;

const TOKEN_LENGTH: usize = 32;
const TOKEN_TTL_DAYS: i64 = 7;

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Four-digit pickup/dropoff verification code.
pub fn generate_verification_code() -> String {
    format!("{:04}", rand::thread_rng().gen_range(0..10_000))
}

/// Issues the recipient and sender tokens for a new delivery. Tokens are
/// never reissued; revocation is row deletion.
pub fn issue_pair(store: &Store, delivery_id: Uuid) -> (TrackingToken, TrackingToken) {
    let recipient = issue(store, delivery_id, true);
    let sender = issue(store, delivery_id, false);
    (recipient, sender)
}

fn issue(store: &Store, delivery_id: Uuid, is_recipient: bool) -> TrackingToken {
    let token = TrackingToken {
        token: generate_token(),
        delivery_id,
        is_recipient,
        expires_at: Utc::now() + Duration::days(TOKEN_TTL_DAYS),
        access_count: 0,
        last_accessed_at: None,
        created_at: Utc::now(),
    };
    store
        .tracking_tokens
        .insert(token.token.clone(), token.clone());
    token
}

/// Resolves a token string, bumping the access counters. Expired tokens
/// are rejected, never renewed.
pub fn validate(store: &Store, token: &str) -> Result<TrackingToken, AppError> {
    let mut entry = store
        .tracking_tokens
        .get_mut(token)
        .ok_or_else(|| AppError::Auth("unknown tracking token".to_string()))?;

    if entry.expires_at < Utc::now() {
        return Err(AppError::Auth("tracking token expired".to_string()));
    }

    entry.access_count += 1;
    entry.last_accessed_at = Some(Utc::now());
    Ok(entry.value().clone())
}

pub fn tracking_url(token: &TrackingToken) -> String {
    format!("/track/{}", token.token)
}

#[cfg(test)]
mod tests {
    use super::{issue_pair, validate};
    use crate::store::Store;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    #[test]
    fn issues_distinct_opaque_tokens() {
        let store = Store::new();
        let delivery = Uuid::new_v4();
        let (recipient, sender) = issue_pair(&store, delivery);

        assert_ne!(recipient.token, sender.token);
        assert!(recipient.is_recipient);
        assert!(!sender.is_recipient);
        assert_eq!(recipient.token.len(), 32);
    }

    #[test]
    fn validation_touches_access_counters() {
        let store = Store::new();
        let (token, _) = issue_pair(&store, Uuid::new_v4());

        let first = validate(&store, &token.token).unwrap();
        assert_eq!(first.access_count, 1);
        let second = validate(&store, &token.token).unwrap();
        assert_eq!(second.access_count, 2);
        assert!(second.last_accessed_at.is_some());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let store = Store::new();
        let (token, _) = issue_pair(&store, Uuid::new_v4());
        store
            .tracking_tokens
            .get_mut(&token.token)
            .unwrap()
            .expires_at = Utc::now() - Duration::seconds(1);

        let err = validate(&store, &token.token).unwrap_err();
        assert_eq!(err.code(), "auth_error");
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        let store = Store::new();
        assert!(validate(&store, "nope").is_err());
    }
}
