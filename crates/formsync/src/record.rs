//! Core submission types for formsync.
//!
//! A [`Submission`] is the form payload the user fills in. Once it has to wait
//! for connectivity it becomes a [`SubmissionRecord`] in the local queue; the
//! remote endpoint hands back [`RemoteSubmission`]s and [`Delivery`] receipts.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Loose shape check for email addresses: something@something.tld
const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

/// The email shape check, compiled on first use.
fn email_regex() -> Result<&'static Regex> {
    static EMAIL: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(EMAIL_PATTERN))
        .as_ref()
        .map_err(|e| Error::internal(e.to_string()))
}

/// The fields of one disclaimer form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Donor name.
    pub name: String,
    /// Contact email.
    pub email: String,
    /// Mobile or other contact number.
    #[serde(default)]
    pub mobile: String,
    /// The product being collected.
    pub product: String,
    /// Submission date.
    pub date: NaiveDate,
}

impl Submission {
    /// Create a submission dated today.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        mobile: impl Into<String>,
        product: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            mobile: mobile.into(),
            product: product.into(),
            date: Utc::now().date_naive(),
        }
    }

    /// Set the submission date.
    #[must_use]
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    /// Check the required fields.
    ///
    /// Name, email and product are required; the email must look like an
    /// address. Every problem is reported, not just the first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSubmission`] listing each failed field.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("name is required".to_string());
        }
        if self.email.trim().is_empty() {
            problems.push("email is required".to_string());
        } else {
            if !email_regex()?.is_match(self.email.trim()) {
                problems.push(format!("email '{}' is not a valid address", self.email));
            }
        }
        if self.product.trim().is_empty() {
            problems.push("product is required".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidSubmission { problems })
        }
    }
}

/// A submission waiting in the local queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    /// Local key (assigned by the queue store).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<i64>,

    /// The form fields.
    #[serde(flatten)]
    pub submission: Submission,

    /// Remote identifier, only known once delivered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<i64>,

    /// Remote submission timestamp, only known once delivered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,

    /// When the record first entered the queue.
    pub queued_at: DateTime<Utc>,

    /// Number of passes in which the remote endpoint rejected this record.
    pub attempts: u32,

    /// The last delivery error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Token sent with every delivery attempt of this record.
    pub idempotency_key: String,
}

impl SubmissionRecord {
    /// Wrap a submission for queueing.
    #[must_use]
    pub fn new(submission: Submission) -> Self {
        let queued_at = Utc::now();
        let idempotency_key = Self::compute_idempotency_key(&submission, queued_at);
        Self {
            key: None,
            submission,
            remote_id: None,
            submitted_at: None,
            queued_at,
            attempts: 0,
            last_error: None,
            idempotency_key,
        }
    }

    /// Wrap a submission that replaces the pending record stored under `key`.
    #[must_use]
    pub fn with_key(key: i64, submission: Submission) -> Self {
        Self {
            key: Some(key),
            ..Self::new(submission)
        }
    }

    /// BLAKE3 over the fields and the enqueue time.
    #[must_use]
    pub fn compute_idempotency_key(submission: &Submission, queued_at: DateTime<Utc>) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in [
            submission.name.as_str(),
            submission.email.as_str(),
            submission.mobile.as_str(),
            submission.product.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update(&[0]);
        }
        hasher.update(submission.date.to_string().as_bytes());
        hasher.update(&[0]);
        hasher.update(queued_at.to_rfc3339().as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// A record moved out of the queue after too many remote rejections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The record as it was when it was given up on.
    #[serde(flatten)]
    pub record: SubmissionRecord,
    /// When it was moved out of the queue.
    pub failed_at: DateTime<Utc>,
}

/// A submission as listed by the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSubmission {
    /// Remote identifier.
    pub id: i64,
    /// Donor name.
    #[serde(default)]
    pub name: String,
    /// Contact email.
    #[serde(default)]
    pub email: String,
    /// Mobile or other contact number.
    #[serde(default)]
    pub mobile: String,
    /// The product being collected.
    #[serde(default)]
    pub product: String,
    /// Submission date, when the endpoint reports one.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    /// When the endpoint accepted the submission.
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl RemoteSubmission {
    /// Check whether this remote entry carries exactly the given fields.
    #[must_use]
    pub fn matches(&self, submission: &Submission) -> bool {
        self.name == submission.name
            && self.email == submission.email
            && self.mobile == submission.mobile
            && self.product == submission.product
            && self.date == Some(submission.date)
    }
}

/// What the endpoint confirms after accepting a creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    /// Remote identifier, when the endpoint returns one.
    #[serde(default, rename = "id")]
    pub remote_id: Option<i64>,
    /// Remote submission timestamp, when the endpoint returns one.
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Submission {
        Submission::new("A", "a@x.com", "123", "cot")
            .with_date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    #[test]
    fn test_validate_ok() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_reports_every_missing_field() {
        let submission = Submission::new("", "", "", " ");
        let err = submission.validate().unwrap_err();
        match err {
            Error::InvalidSubmission { problems } => {
                assert_eq!(problems.len(), 3);
                assert!(problems[0].contains("name"));
                assert!(problems[1].contains("email"));
                assert!(problems[2].contains("product"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_rejects_malformed_email() {
        let mut submission = sample();
        submission.email = "not-an-address".to_string();
        let err = submission.validate().unwrap_err();
        assert!(err.to_string().contains("not-an-address"));
    }

    #[test]
    fn test_email_check_is_compiled_once() {
        let first = email_regex().unwrap();
        assert!(std::ptr::eq(first, email_regex().unwrap()));

        let mut bad = sample();
        bad.email = "nope".to_string();
        for _ in 0..3 {
            assert!(sample().validate().is_ok());
            assert!(bad.validate().is_err());
        }
    }

    #[test]
    fn test_mobile_is_optional() {
        let mut submission = sample();
        submission.mobile.clear();
        assert!(submission.validate().is_ok());
    }

    #[test]
    fn test_submission_json_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "A",
                "email": "a@x.com",
                "mobile": "123",
                "product": "cot",
                "date": "2024-01-01"
            })
        );
    }

    #[test]
    fn test_new_record_has_no_key_yet() {
        let record = SubmissionRecord::new(sample());
        assert!(record.key.is_none());
        assert!(record.remote_id.is_none());
        assert_eq!(record.attempts, 0);
        assert_eq!(record.idempotency_key.len(), 64);
    }

    #[test]
    fn test_idempotency_key_depends_on_fields() {
        let at = Utc::now();
        let key1 = SubmissionRecord::compute_idempotency_key(&sample(), at);
        let key2 = SubmissionRecord::compute_idempotency_key(&sample(), at);
        assert_eq!(key1, key2);

        let mut other = sample();
        other.product = "pram".to_string();
        assert_ne!(key1, SubmissionRecord::compute_idempotency_key(&other, at));
    }

    #[test]
    fn test_with_key() {
        let record = SubmissionRecord::with_key(7, sample());
        assert_eq!(record.key, Some(7));
    }

    #[test]
    fn test_remote_submission_matches() {
        let remote: RemoteSubmission = serde_json::from_value(serde_json::json!({
            "id": 12,
            "name": "A",
            "email": "a@x.com",
            "mobile": "123",
            "product": "cot",
            "date": "2024-01-01",
            "submitted_at": "2024-01-01T10:00:00Z"
        }))
        .unwrap();
        assert!(remote.matches(&sample()));

        let mut other = sample();
        other.mobile = "999".to_string();
        assert!(!remote.matches(&other));
    }

    #[test]
    fn test_remote_submission_tolerates_missing_fields() {
        let remote: RemoteSubmission =
            serde_json::from_value(serde_json::json!({"id": 3, "name": "B"})).unwrap();
        assert_eq!(remote.id, 3);
        assert!(remote.mobile.is_empty());
        assert!(remote.date.is_none());
    }

    #[test]
    fn test_delivery_from_endpoint_body() {
        let delivery: Delivery = serde_json::from_value(serde_json::json!({
            "id": 41,
            "name": "A",
            "submitted_at": "2024-01-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(delivery.remote_id, Some(41));
        assert!(delivery.submitted_at.is_some());
    }
}
