//! Classification of session changes.

use backend_gateway::{AuthChangeKind, Session};
use serde::Serialize;

/// How the session moved between two auth events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionTransition {
    /// No session before, one now.
    SignedIn,
    /// No session now.
    SignedOut,
    /// A different user is signed in than before.
    SubjectChanged,
    /// Same user; token refreshed or user record updated.
    Refreshed,
}

impl SessionTransition {
    pub fn classify(previous: Option<&Session>, next: Option<&Session>) -> Self {
        match (previous, next) {
            (None, Some(_)) => SessionTransition::SignedIn,
            (_, None) => SessionTransition::SignedOut,
            (Some(prev), Some(next)) if prev.subject_id != next.subject_id => {
                SessionTransition::SubjectChanged
            }
            (Some(_), Some(_)) => SessionTransition::Refreshed,
        }
    }
}

/// Delivered to change handlers once per applied auth event.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionChange {
    pub transition: SessionTransition,
    /// What the backend said happened.
    pub kind: AuthChangeKind,
    /// The session now current.
    pub session: Option<Session>,
    /// Subject of the session that was replaced.
    pub previous_subject: Option<String>,
}

impl SessionChange {
    pub fn new(kind: AuthChangeKind, previous: Option<&Session>, session: Option<Session>) -> Self {
        Self {
            transition: SessionTransition::classify(previous, session.as_ref()),
            kind,
            previous_subject: previous.map(|s| s.subject_id.clone()),
            session,
        }
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.subject_id.as_str())
    }

    /// Whether consumers keyed by user need to reload.
    pub fn subject_changed(&self) -> bool {
        self.previous_subject.as_deref() != self.subject_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn session(subject: &str, token: &str) -> Session {
        Session {
            subject_id: subject.to_string(),
            credentials_token: token.to_string(),
            expiry: Utc::now() + Duration::hours(1),
            raw_user_record: json!({ "id": subject }),
        }
    }

    #[test]
    fn classify_all_transitions() {
        let a1 = session("a", "t1");
        let a2 = session("a", "t2");
        let b = session("b", "t3");

        assert_eq!(
            SessionTransition::classify(None, Some(&a1)),
            SessionTransition::SignedIn
        );
        assert_eq!(
            SessionTransition::classify(Some(&a1), None),
            SessionTransition::SignedOut
        );
        assert_eq!(
            SessionTransition::classify(None, None),
            SessionTransition::SignedOut
        );
        assert_eq!(
            SessionTransition::classify(Some(&a1), Some(&b)),
            SessionTransition::SubjectChanged
        );
        assert_eq!(
            SessionTransition::classify(Some(&a1), Some(&a2)),
            SessionTransition::Refreshed
        );
    }

    #[test]
    fn change_carries_previous_subject() {
        let a = session("a", "t1");
        let b = session("b", "t2");

        let change = SessionChange::new(AuthChangeKind::SignedIn, Some(&a), Some(b));
        assert_eq!(change.transition, SessionTransition::SubjectChanged);
        assert_eq!(change.previous_subject.as_deref(), Some("a"));
        assert_eq!(change.subject_id(), Some("b"));
        assert!(change.subject_changed());

        let refresh = SessionChange::new(
            AuthChangeKind::TokenRefreshed,
            Some(&a),
            Some(session("a", "t9")),
        );
        assert!(!refresh.subject_changed());
    }
}
