//! Internal OAuth client facade abstractions.
//!
//! Token endpoint calls go through the `oauth2` crate configured with a custom
//! token response type: SMART providers attach nonstandard fields (`patient`,
//! `encounter`, `id_token`, `context`, ...) to the token response, and the
//! patient-context resolver needs all of them. [`SmartTokenFields`] captures every
//! field the standard response does not claim into one flattened map.

pub use oauth2;

// crates.io
use oauth2::{
	AuthorizationCode, Client, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
	ExtraTokenFields, HttpClientError, PkceCodeVerifier, RedirectUrl, RefreshToken,
	RequestTokenError, StandardErrorResponse, StandardRevocableToken,
	StandardTokenIntrospectionResponse, StandardTokenResponse, TokenResponse, TokenUrl,
	basic::{BasicErrorResponseType, BasicTokenType},
};
// self
use crate::{
	_prelude::*,
	auth::{TokenSecret, TokenSet},
	error::{ConfigError, TokenEndpointError},
	http::{HttpConnector, ResponseStatusSlot},
};

/// Nonstandard token-response fields SMART providers attach next to the tokens.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SmartTokenFields {
	/// Every field the standard token response did not claim.
	#[serde(flatten)]
	pub context: serde_json::Map<String, Json>,
}
impl SmartTokenFields {
	/// Top-level `patient` field, when the provider echoed one (SMART v2).
	pub fn patient(&self) -> Option<&str> {
		self.str_field("patient")
	}

	/// Top-level `encounter` field, when the provider echoed one.
	pub fn encounter(&self) -> Option<&str> {
		self.str_field("encounter")
	}

	/// Raw ID token JWT, when `openid` was granted.
	pub fn id_token(&self) -> Option<&str> {
		self.str_field("id_token")
	}

	/// The captured fields as a JSON tree for the patient-context deep search.
	pub fn as_json(&self) -> Json {
		Json::Object(self.context.clone())
	}

	fn str_field(&self, key: &str) -> Option<&str> {
		self.context.get(key).and_then(Json::as_str).map(str::trim).filter(|v| !v.is_empty())
	}
}
impl ExtraTokenFields for SmartTokenFields {}

/// Token response shape returned by SMART-aware providers.
pub type SmartTokenResponse = StandardTokenResponse<SmartTokenFields, BasicTokenType>;
/// Error response shape shared by the token endpoints this broker talks to.
pub type SmartErrorResponse = StandardErrorResponse<BasicErrorResponseType>;

type ConfiguredSmartClient = Client<
	SmartErrorResponse,
	SmartTokenResponse,
	StandardTokenIntrospectionResponse<SmartTokenFields, BasicTokenType>,
	StandardRevocableToken,
	SmartErrorResponse,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointSet,
>;

/// Everything a token endpoint call produced, beyond the tokens themselves.
#[derive(Clone, Debug)]
pub(crate) struct ExchangeOutcome {
	/// Mapped token set ready to store on the session.
	pub tokens: TokenSet,
	/// Raw ID token JWT for the patient-context resolver.
	pub id_token: Option<String>,
	/// Nonstandard response fields as a JSON tree for the deep search.
	pub raw_context: Json,
}

/// Facade wiring one token endpoint + client identity to the `oauth2` crate.
///
/// The client-auth mode is decided by whether a secret is supplied: with one, the
/// `oauth2` crate sends HTTP Basic authentication; without one, `client_id` goes in
/// the form body and PKCE is the only proof of possession. The two are never
/// combined in a single request.
pub(crate) struct SmartFacade {
	oauth_client: ConfiguredSmartClient,
	connector: HttpConnector,
}
impl SmartFacade {
	pub(crate) fn new(
		connector: HttpConnector,
		token_endpoint: &Url,
		client_id: &str,
		client_secret: Option<&str>,
		redirect_uri: Option<&Url>,
	) -> Result<Self, ConfigError> {
		let token_url = TokenUrl::new(token_endpoint.to_string())
			.map_err(|source| ConfigError::InvalidTokenEndpoint { source })?;
		let mut oauth_client =
			Client::new(ClientId::new(client_id.to_owned())).set_token_uri(token_url);

		if let Some(secret) = client_secret {
			oauth_client = oauth_client.set_client_secret(ClientSecret::new(secret.to_owned()));
		}
		if let Some(redirect) = redirect_uri {
			let redirect_url = RedirectUrl::new(redirect.to_string())
				.map_err(|source| ConfigError::InvalidRedirect { source })?;

			oauth_client = oauth_client.set_redirect_uri(redirect_url);
		}

		Ok(Self { oauth_client, connector })
	}

	/// Exchanges an authorization code, presenting the PKCE verifier.
	pub(crate) async fn exchange_code(
		&self,
		code: &str,
		code_verifier: &str,
	) -> Result<ExchangeOutcome, TokenEndpointError> {
		let slot = ResponseStatusSlot::default();
		let instrumented = self.connector.instrumented(slot.clone());
		let response = self
			.oauth_client
			.exchange_code(AuthorizationCode::new(code.to_owned()))
			.set_pkce_verifier(PkceCodeVerifier::new(code_verifier.to_owned()))
			.request_async(&instrumented)
			.await
			.map_err(|err| map_request_error(slot.take(), err))?;

		Ok(outcome_from_response(response))
	}

	/// Rotates an access token via `grant_type=refresh_token`.
	pub(crate) async fn refresh_token(
		&self,
		refresh_token: &str,
	) -> Result<ExchangeOutcome, TokenEndpointError> {
		let slot = ResponseStatusSlot::default();
		let instrumented = self.connector.instrumented(slot.clone());
		let refresh_secret = RefreshToken::new(refresh_token.to_owned());
		let response = self
			.oauth_client
			.exchange_refresh_token(&refresh_secret)
			.request_async(&instrumented)
			.await
			.map_err(|err| map_request_error(slot.take(), err))?;

		Ok(outcome_from_response(response))
	}
}

fn outcome_from_response(response: SmartTokenResponse) -> ExchangeOutcome {
	let now = OffsetDateTime::now_utc();
	// Absent expires_in means "lifetime unknown": treat as non-expiring until a
	// request fails, never as already expired. A lifetime too large to represent
	// as an instant gets the same treatment.
	let expires_at = response.expires_in().and_then(|lifetime| {
		now.checked_add(Duration::seconds(i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX)))
	});
	let fields = response.extra_fields();
	let tokens = TokenSet {
		access_token: TokenSecret::new(response.access_token().secret().to_owned()),
		refresh_token: response
			.refresh_token()
			.map(|token| TokenSecret::new(token.secret().to_owned())),
		expires_at,
		token_type: token_type_label(response.token_type()),
		patient_id: fields.patient().map(ToOwned::to_owned),
		encounter_id: fields.encounter().map(ToOwned::to_owned),
	};

	ExchangeOutcome {
		tokens,
		id_token: fields.id_token().map(ToOwned::to_owned),
		raw_context: fields.as_json(),
	}
}

fn token_type_label(token_type: &BasicTokenType) -> String {
	match token_type {
		BasicTokenType::Bearer => "Bearer".into(),
		BasicTokenType::Mac => "MAC".into(),
		BasicTokenType::Extension(value) => value.clone(),
	}
}

fn map_request_error(
	status: Option<u16>,
	err: RequestTokenError<HttpClientError<ReqwestError>, SmartErrorResponse>,
) -> TokenEndpointError {
	match err {
		RequestTokenError::ServerResponse(response) => TokenEndpointError::Provider {
			error: response.error().as_ref().to_owned(),
			description: response.error_description().cloned(),
			status,
		},
		RequestTokenError::Request(error) => match error {
			HttpClientError::Reqwest(inner) => TokenEndpointError::Transport { source: inner },
			HttpClientError::Io(inner) => TokenEndpointError::Transport { source: Box::new(inner) },
			other => TokenEndpointError::Unexpected { message: other.to_string(), status },
		},
		RequestTokenError::Parse(source, _body) => TokenEndpointError::Parse { source, status },
		RequestTokenError::Other(message) => TokenEndpointError::Unexpected { message, status },
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn parse_response(body: &str) -> SmartTokenResponse {
		serde_json::from_str(body).expect("Token response fixture should deserialize.")
	}

	#[test]
	fn facade_builds_for_public_and_confidential_clients() {
		let connector = HttpConnector::new().expect("Connector should build for tests.");
		let token_endpoint = Url::parse("https://ehr.example.com/token")
			.expect("Token endpoint fixture should parse successfully.");
		let redirect = Url::parse("http://127.0.0.1:8080/callback")
			.expect("Redirect fixture should parse successfully.");

		assert!(
			SmartFacade::new(connector.clone(), &token_endpoint, "viewer", None, Some(&redirect))
				.is_ok()
		);
		assert!(
			SmartFacade::new(connector, &token_endpoint, "viewer", Some("secret"), None).is_ok()
		);
	}

	#[test]
	fn smart_fields_capture_nonstandard_context() {
		let response = parse_response(
			"{\"access_token\":\"abc\",\"token_type\":\"bearer\",\"expires_in\":3600,\
			 \"patient\":\"Patient/123\",\"encounter\":\"enc-9\",\"id_token\":\"a.b.c\",\
			 \"context\":{\"patientId\":\"77\"}}",
		);
		let outcome = outcome_from_response(response);

		assert_eq!(outcome.tokens.patient_id.as_deref(), Some("Patient/123"));
		assert_eq!(outcome.tokens.encounter_id.as_deref(), Some("enc-9"));
		assert_eq!(outcome.id_token.as_deref(), Some("a.b.c"));
		assert_eq!(outcome.raw_context["context"]["patientId"], "77");
		assert!(outcome.tokens.expires_at.is_some());
	}

	#[test]
	fn absurd_expires_in_degrades_to_unknown_lifetime() {
		let response = parse_response(
			"{\"access_token\":\"abc\",\"token_type\":\"bearer\",\
			 \"expires_in\":99999999999999}",
		);
		let outcome = outcome_from_response(response);

		assert_eq!(outcome.tokens.expires_at, None);
		assert!(!outcome.tokens.is_due_for_refresh());
	}

	#[test]
	fn missing_expires_in_means_unknown_lifetime() {
		let response = parse_response("{\"access_token\":\"abc\",\"token_type\":\"bearer\"}");
		let outcome = outcome_from_response(response);

		assert_eq!(outcome.tokens.expires_at, None);
		assert_eq!(outcome.tokens.expires_at_epoch_seconds(), 0);
		assert_eq!(outcome.tokens.token_type, "Bearer");
		assert!(outcome.tokens.refresh_token.is_none());
	}

	#[test]
	fn reported_lifetime_maps_to_an_absolute_expiry() {
		let response = parse_response(
			"{\"access_token\":\"abc\",\"token_type\":\"bearer\",\"expires_in\":3600,\
			 \"refresh_token\":\"next\"}",
		);
		let before = OffsetDateTime::now_utc();
		let outcome = outcome_from_response(response);
		let expires_at =
			outcome.tokens.expires_at.expect("Reported lifetime should yield an expiry.");

		assert!(expires_at >= before + Duration::seconds(3_599));
		assert!(expires_at <= OffsetDateTime::now_utc() + Duration::seconds(3_601));
		assert!(outcome.tokens.refresh_token.is_some());
	}
}
