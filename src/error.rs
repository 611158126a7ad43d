//! Broker-level error types shared across discovery, authorization flows, and sessions.

// self
use crate::_prelude::*;

/// Broker-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical broker error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// SMART endpoint discovery exhausted both mechanisms.
	#[error(transparent)]
	Discovery(#[from] DiscoveryError),
	/// Callback state validation failed; possible CSRF or expired session.
	#[error(transparent)]
	StateMismatch(#[from] StateMismatchError),
	/// The authorization server redirected back with an error instead of a code.
	#[error("Authorization server denied the request: {error}{}.", .description.as_deref().map(|d| format!(" - {d}")).unwrap_or_default())]
	AuthorizationDenied {
		/// OAuth error code from the redirect (e.g. `access_denied`).
		error: String,
		/// Optional `error_description` from the redirect.
		description: Option<String>,
	},
	/// Authorization-code exchange was rejected or unreachable.
	#[error("Token exchange failed: {0}")]
	TokenExchange(#[source] TokenEndpointError),
	/// Refresh-token rotation was rejected or unreachable; re-authorization is required.
	#[error("Token refresh failed: {0}")]
	TokenRefresh(#[source] TokenEndpointError),
	/// Local configuration or session-phase problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
}

/// Failure modes of the two-step SMART endpoint discovery.
///
/// Problems during the `.well-known/smart-configuration` attempt never appear here;
/// they fall through to the CapabilityStatement path. Only the final fallback is fatal.
#[derive(Debug, ThisError)]
pub enum DiscoveryError {
	/// The CapabilityStatement could not be fetched at all.
	#[error("CapabilityStatement could not be fetched from the FHIR base.")]
	MetadataUnreachable {
		/// Underlying transport failure.
		#[source]
		source: BoxError,
	},
	/// The CapabilityStatement request returned a non-success status.
	#[error("No SMART discovery document and /metadata failed with HTTP {status}.")]
	MetadataStatus {
		/// HTTP status code returned by `/metadata`.
		status: u16,
	},
	/// The CapabilityStatement body was not valid JSON.
	#[error("CapabilityStatement is not valid JSON.")]
	MetadataParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Neither discovery mechanism yielded both endpoints.
	#[error("SMART endpoints not found.")]
	EndpointsNotFound,
	/// A discovered endpoint value could not be parsed as a URL.
	#[error("Discovered `{field}` value is not a valid URL.")]
	InvalidEndpointUrl {
		/// Name of the offending discovery field.
		field: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
}

/// Fail-closed callback validation failures.
///
/// Any ambiguity—no stored pending context, a blank returned state, or a value that
/// differs from the stored one—lands here, and the flow must be restarted.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum StateMismatchError {
	/// The session holds no pending authorization to match against.
	#[error("No pending authorization is stored for this session.")]
	NoPendingAuthorization,
	/// The returned state parameter is blank or differs from the stored value.
	#[error("Returned state parameter does not match the stored value.")]
	StateDiffers,
}

/// Provider- or transport-level failure of a token endpoint call.
///
/// A timeout and a non-success response from the same call surface as the same
/// error kind; the caller only learns which token operation failed via the outer
/// [`Error::TokenExchange`] / [`Error::TokenRefresh`] wrapper.
#[derive(Debug, ThisError)]
pub enum TokenEndpointError {
	/// The provider returned a structured OAuth error object.
	#[error("provider returned {error}{}{}.", .description.as_deref().map(|d| format!(" - {d}")).unwrap_or_default(), .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
	Provider {
		/// OAuth `error` code (e.g. `invalid_grant`).
		error: String,
		/// Optional `error_description` supplied by the provider.
		description: Option<String>,
		/// HTTP status code, when captured.
		status: Option<u16>,
	},
	/// The network call to the token endpoint failed (including timeouts).
	#[error("token endpoint was unreachable.")]
	Transport {
		/// Transport-specific failure.
		#[source]
		source: BoxError,
	},
	/// The token endpoint responded with JSON the broker could not parse.
	#[error("token endpoint returned a malformed response{}.", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
	Parse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when captured.
		status: Option<u16>,
	},
	/// The token endpoint reported an unexpected non-OAuth failure.
	#[error("token endpoint returned an unexpected response: {message}{}.", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
	Unexpected {
		/// Broker-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when captured.
		status: Option<u16>,
	},
}

/// Configuration and session-phase failures raised by the broker.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Redirect URI cannot be parsed by the token client.
	#[error("Redirect URI is invalid.")]
	InvalidRedirect {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Token endpoint URL stored for the session cannot be parsed by the token client.
	#[error("Token endpoint URL is invalid.")]
	InvalidTokenEndpoint {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Refresh was requested but the session holds no token set.
	#[error("Session is not authorized; there is nothing to refresh.")]
	SessionNotAuthorized,
	/// Refresh was requested but the provider never issued a refresh token.
	#[error("Stored token set is missing a refresh token.")]
	MissingRefreshToken,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

impl TokenEndpointError {
	/// Wraps a transport-specific network error.
	pub fn transport(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Transport { source: Box::new(src) }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn provider_error_renders_description_and_status() {
		let err = Error::TokenExchange(TokenEndpointError::Provider {
			error: "invalid_grant".into(),
			description: Some("code already used".into()),
			status: Some(400),
		});

		assert_eq!(
			err.to_string(),
			"Token exchange failed: provider returned invalid_grant - code already used (HTTP 400)."
		);
	}

	#[test]
	fn state_mismatch_converts_into_broker_error() {
		let err: Error = StateMismatchError::StateDiffers.into();

		assert!(matches!(err, Error::StateMismatch(StateMismatchError::StateDiffers)));
	}
}
