//! Authorization start: PKCE material, opaque state, and the authorize redirect.

// crates.io
use rand::{Rng, distr::Alphanumeric};
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	discovery::DiscoveryResult,
	error::StateMismatchError,
	flows::Broker,
	obs::{FlowKind, FlowSpan},
	pkce::{PkceCodeChallengeMethod, PkceMaterial},
	session::{AuthSessionState, PendingAuthContext},
};

const STATE_LEN: usize = 32;

impl Broker {
	/// Starts a standalone launch against the configured FHIR base.
	///
	/// Discovers endpoints, generates fresh PKCE material plus the `state` and
	/// `nonce` opaques, stores the pending context on `session`, and returns the
	/// authorize URL to redirect the browser to.
	pub async fn start_authorization(&self, session: &mut AuthSessionState) -> Result<Url> {
		let fhir_base = self.config().fhir_base.clone();
		let launch = self.config().launch.clone();

		self.begin(session, fhir_base, launch).await
	}

	/// Starts an EHR-initiated launch: `iss` overrides the configured FHIR base
	/// (and becomes the `aud` parameter), `launch` is forwarded opaquely.
	pub async fn start_ehr_launch(
		&self,
		session: &mut AuthSessionState,
		iss: &str,
		launch: &str,
	) -> Result<Url> {
		self.begin(session, iss.to_owned(), Some(launch.to_owned())).await
	}

	async fn begin(
		&self,
		session: &mut AuthSessionState,
		fhir_base: String,
		launch: Option<String>,
	) -> Result<Url> {
		let span = FlowSpan::new(FlowKind::Authorize, "start_authorization");

		span.instrument(async move {
			let fhir_base = fhir_base.trim_end_matches('/').to_owned();
			let discovery = self.discoverer().discover(&fhir_base).await?;
			let pkce = PkceMaterial::generate();
			let state = random_opaque(STATE_LEN);
			let nonce = random_opaque(STATE_LEN);
			let launch = launch.filter(|value| !value.trim().is_empty());
			let authorize_url = build_authorize_url(&AuthorizeUrlParams {
				discovery: &discovery,
				client_id: &self.config().client_id,
				redirect_uri: &self.config().redirect_uri,
				scopes: &self.config().scopes,
				audience: &fhir_base,
				launch: launch.as_deref(),
				code_challenge: &pkce.challenge,
				code_challenge_method: pkce.method(),
				state: &state,
				nonce: &nonce,
			});

			session.begin_pending(PendingAuthContext {
				state,
				code_verifier: TokenSecret::new(pkce.verifier()),
				nonce,
				token_endpoint: discovery.token_endpoint.clone(),
				fhir_base,
				launch,
				userinfo_endpoint: discovery.userinfo_endpoint.clone(),
			});

			Ok(authorize_url)
		})
		.await
	}
}

/// Inputs to one authorize-URL construction.
#[derive(Clone, Copy, Debug)]
pub struct AuthorizeUrlParams<'a> {
	/// Discovered endpoints; the authorization endpoint is the URL base.
	pub discovery: &'a DiscoveryResult,
	/// OAuth client identifier.
	pub client_id: &'a str,
	/// Registered redirect URI.
	pub redirect_uri: &'a Url,
	/// Space-separated scope string.
	pub scopes: &'a str,
	/// FHIR base the flow authorizes against; sent as `aud`.
	pub audience: &'a str,
	/// Launch context string; omitted from the query when absent or blank.
	pub launch: Option<&'a str>,
	/// PKCE code challenge.
	pub code_challenge: &'a str,
	/// PKCE challenge method label.
	pub code_challenge_method: PkceCodeChallengeMethod,
	/// Anti-forgery state opaque.
	pub state: &'a str,
	/// OpenID Connect nonce opaque.
	pub nonce: &'a str,
}

/// Builds the authorize redirect URL. Pure; every call with the same inputs
/// yields the same URL, with existing query parameters on the endpoint preserved.
pub fn build_authorize_url(params: &AuthorizeUrlParams) -> Url {
	let mut url = params.discovery.authorization_endpoint.clone();
	let mut pairs = url.query_pairs_mut();

	pairs
		.append_pair("response_type", "code")
		.append_pair("client_id", params.client_id)
		.append_pair("redirect_uri", params.redirect_uri.as_str())
		.append_pair("scope", params.scopes)
		.append_pair("state", params.state)
		.append_pair("nonce", params.nonce)
		.append_pair("aud", params.audience)
		.append_pair("code_challenge", params.code_challenge)
		.append_pair("code_challenge_method", params.code_challenge_method.as_str());

	if let Some(launch) = params.launch.map(str::trim).filter(|value| !value.is_empty()) {
		pairs.append_pair("launch", launch);
	}

	drop(pairs);

	url
}

/// Validates the callback's `state` against the session's pending context.
///
/// Fail-closed: no pending context, a blank received state, and a differing
/// state are all rejections.
pub fn validate_callback_state(
	session: &AuthSessionState,
	received_state: Option<&str>,
) -> Result<(), StateMismatchError> {
	let pending = session.pending().ok_or(StateMismatchError::NoPendingAuthorization)?;
	let received = received_state.map(str::trim).unwrap_or_default();

	if received.is_empty() || received != pending.state {
		return Err(StateMismatchError::StateDiffers);
	}

	Ok(())
}

fn random_opaque(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

#[cfg(test)]
mod tests {
	// std
	use std::collections::HashMap;
	// self
	use super::*;

	fn discovery() -> DiscoveryResult {
		DiscoveryResult {
			authorization_endpoint: Url::parse("https://ehr.example.com/authorize?tenant=t1")
				.expect("Authorize endpoint fixture should parse successfully."),
			token_endpoint: Url::parse("https://ehr.example.com/token")
				.expect("Token endpoint fixture should parse successfully."),
			userinfo_endpoint: None,
		}
	}

	fn params<'a>(
		discovery: &'a DiscoveryResult,
		redirect: &'a Url,
		launch: Option<&'a str>,
	) -> AuthorizeUrlParams<'a> {
		AuthorizeUrlParams {
			discovery,
			client_id: "viewer-client",
			redirect_uri: redirect,
			scopes: "launch/patient openid",
			audience: "https://ehr.example.com/fhir",
			launch,
			code_challenge: "challenge-value",
			code_challenge_method: PkceCodeChallengeMethod::S256,
			state: "state-opaque",
			nonce: "nonce-opaque",
		}
	}

	fn query_map(url: &Url) -> HashMap<String, String> {
		url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect()
	}

	#[test]
	fn authorize_url_carries_every_required_parameter() {
		let discovery = discovery();
		let redirect = Url::parse("http://127.0.0.1:8080/callback")
			.expect("Redirect fixture should parse successfully.");
		let url = build_authorize_url(&params(&discovery, &redirect, Some("launch-ctx")));
		let query = query_map(&url);

		assert_eq!(url.host_str(), Some("ehr.example.com"));
		assert_eq!(query.get("tenant").map(String::as_str), Some("t1"));
		assert_eq!(query.get("response_type").map(String::as_str), Some("code"));
		assert_eq!(query.get("client_id").map(String::as_str), Some("viewer-client"));
		assert_eq!(
			query.get("redirect_uri").map(String::as_str),
			Some("http://127.0.0.1:8080/callback")
		);
		assert_eq!(query.get("scope").map(String::as_str), Some("launch/patient openid"));
		assert_eq!(query.get("state").map(String::as_str), Some("state-opaque"));
		assert_eq!(query.get("nonce").map(String::as_str), Some("nonce-opaque"));
		assert_eq!(query.get("aud").map(String::as_str), Some("https://ehr.example.com/fhir"));
		assert_eq!(query.get("code_challenge").map(String::as_str), Some("challenge-value"));
		assert_eq!(query.get("code_challenge_method").map(String::as_str), Some("S256"));
		assert_eq!(query.get("launch").map(String::as_str), Some("launch-ctx"));
	}

	#[test]
	fn blank_launch_is_omitted_from_the_query() {
		let discovery = discovery();
		let redirect = Url::parse("http://127.0.0.1:8080/callback")
			.expect("Redirect fixture should parse successfully.");

		for launch in [None, Some(""), Some("   ")] {
			let url = build_authorize_url(&params(&discovery, &redirect, launch));

			assert!(!query_map(&url).contains_key("launch"));
		}
	}

	#[test]
	fn state_validation_fails_closed() {
		let mut session = AuthSessionState::new("https://ehr.example.com/fhir");

		// No flow started at all.
		assert_eq!(
			validate_callback_state(&session, Some("anything")),
			Err(StateMismatchError::NoPendingAuthorization)
		);

		session.begin_pending(PendingAuthContext {
			state: "expected".into(),
			code_verifier: TokenSecret::new("verifier"),
			nonce: "nonce".into(),
			token_endpoint: discovery().token_endpoint,
			fhir_base: "https://ehr.example.com/fhir".into(),
			launch: None,
			userinfo_endpoint: None,
		});

		assert_eq!(
			validate_callback_state(&session, None),
			Err(StateMismatchError::StateDiffers)
		);
		assert_eq!(
			validate_callback_state(&session, Some("  ")),
			Err(StateMismatchError::StateDiffers)
		);
		assert_eq!(
			validate_callback_state(&session, Some("forged")),
			Err(StateMismatchError::StateDiffers)
		);
		assert_eq!(validate_callback_state(&session, Some("expected")), Ok(()));
	}

	#[test]
	fn opaques_are_unique_and_sized() {
		let first = random_opaque(STATE_LEN);
		let second = random_opaque(STATE_LEN);

		assert_eq!(first.len(), STATE_LEN);
		assert_ne!(first, second);
		assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
	}
}
