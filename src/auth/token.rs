//! Token set issued by an exchange or refresh, plus the caller-side freshness policy.

// self
use crate::{_prelude::*, auth::secret::TokenSecret};

/// Safety margin subtracted from the expiry instant when judging freshness.
pub const REFRESH_MARGIN: Duration = Duration::seconds(60);

/// Tokens obtained from the provider for one session.
///
/// A `TokenSet` is superseded wholesale on every refresh; the session slot is
/// updated in place but individual fields are never mutated piecemeal.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenSet {
	/// Bearer access token presented to the FHIR server.
	pub access_token: TokenSecret,
	/// Refresh token, when the provider issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Expiry instant; `None` means the provider did not report a lifetime and the
	/// token is treated as non-expiring until a request fails.
	pub expires_at: Option<OffsetDateTime>,
	/// Token type reported by the provider (typically `Bearer`).
	pub token_type: String,
	/// Patient id the provider echoed in the token response, when present.
	pub patient_id: Option<String>,
	/// Encounter id the provider echoed in the token response, when present.
	pub encounter_id: Option<String>,
}
impl TokenSet {
	/// Judges whether the access token is due for refresh at `instant`.
	///
	/// True iff an expiry is known and `instant` is past `expires_at` minus the
	/// 60-second margin. An unknown lifetime is never due.
	pub fn is_due_for_refresh_at(&self, instant: OffsetDateTime) -> bool {
		match self.expires_at {
			Some(expires_at) => instant > expires_at - REFRESH_MARGIN,
			None => false,
		}
	}

	/// Convenience helper that judges freshness against the current UTC instant.
	pub fn is_due_for_refresh(&self) -> bool {
		self.is_due_for_refresh_at(OffsetDateTime::now_utc())
	}

	/// Expiry as epoch seconds, with `0` standing for "lifetime unknown".
	///
	/// This is the wire convention downstream collaborators expect; new code should
	/// prefer [`Self::expires_at`].
	pub fn expires_at_epoch_seconds(&self) -> i64 {
		self.expires_at.map(OffsetDateTime::unix_timestamp).unwrap_or(0)
	}
}
impl Debug for TokenSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenSet")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_at", &self.expires_at)
			.field("token_type", &self.token_type)
			.field("patient_id", &self.patient_id)
			.field("encounter_id", &self.encounter_id)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn token_set(expires_at: Option<OffsetDateTime>) -> TokenSet {
		TokenSet {
			access_token: TokenSecret::new("access-secret-value"),
			refresh_token: Some(TokenSecret::new("refresh-secret-value")),
			expires_at,
			token_type: "Bearer".into(),
			patient_id: None,
			encounter_id: None,
		}
	}

	#[test]
	fn unknown_lifetime_is_never_due_for_refresh() {
		let tokens = token_set(None);
		let far_future = OffsetDateTime::now_utc() + Duration::days(365);

		assert!(!tokens.is_due_for_refresh_at(far_future));
		assert_eq!(tokens.expires_at_epoch_seconds(), 0);
	}

	#[test]
	fn expired_token_is_due_for_refresh() {
		let now = OffsetDateTime::now_utc();
		let tokens = token_set(Some(now - Duration::seconds(120)));

		assert!(tokens.is_due_for_refresh_at(now));
	}

	#[test]
	fn margin_triggers_refresh_before_actual_expiry() {
		let now = OffsetDateTime::now_utc();
		let inside_margin = token_set(Some(now + Duration::seconds(30)));
		let outside_margin = token_set(Some(now + Duration::seconds(3_600)));

		assert!(inside_margin.is_due_for_refresh_at(now));
		assert!(!outside_margin.is_due_for_refresh_at(now));
	}

	#[test]
	fn debug_output_redacts_secrets() {
		let tokens = token_set(None);
		let rendered = format!("{tokens:?}");

		assert!(rendered.contains("<redacted>"));
		assert!(!rendered.contains("access-secret-value"));
		assert!(!rendered.contains("refresh-secret-value"));
	}
}
