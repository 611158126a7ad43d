//! High-level SMART launch flows, orchestrated by the [`Broker`].
//!
//! Each submodule owns one stage of the launch sequence: building the authorize
//! redirect, handling the callback + code exchange, and refresh rotation. The
//! broker itself is cheap to clone and safe to share; per-session mutable state
//! lives in [`AuthSessionState`](crate::session::AuthSessionState), not here.

pub mod authorize;
pub mod exchange;
pub mod refresh;

pub use authorize::{AuthorizeUrlParams, build_authorize_url, validate_callback_state};
pub use exchange::CallbackParams;

// self
use crate::{
	_prelude::*,
	discovery::EndpointDiscoverer,
	error::ConfigError,
	http::HttpConnector,
	oauth::SmartFacade,
	patient::PatientContextResolver,
	session::AuthSessionState,
};

/// Client authentication mode, fixed per deployment.
///
/// A confidential client authenticates with HTTP Basic at the token endpoint; a
/// public client sends `client_id` in the form body and relies on PKCE alone.
/// The two modes are never mixed in one request.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuth {
	/// No client secret; PKCE is the only proof of possession.
	Public,
	/// Client secret registered with the authorization server.
	Confidential {
		/// Secret presented via HTTP Basic authentication.
		client_secret: String,
	},
}
impl ClientAuth {
	pub(crate) fn secret(&self) -> Option<&str> {
		match self {
			Self::Public => None,
			Self::Confidential { client_secret } => Some(client_secret),
		}
	}
}
impl Debug for ClientAuth {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Public => f.write_str("Public"),
			Self::Confidential { .. } =>
				f.debug_struct("Confidential").field("client_secret", &"<redacted>").finish(),
		}
	}
}

/// Static client registration and launch defaults for one deployment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SmartClientConfig {
	/// Default FHIR base URL; an EHR launch's `iss` overrides it per flow.
	pub fhir_base: String,
	/// OAuth client identifier registered with the authorization server.
	pub client_id: String,
	/// Whether this deployment holds a client secret.
	pub client_auth: ClientAuth,
	/// Redirect URI registered for the authorization-code callback.
	pub redirect_uri: Url,
	/// Space-separated scope string requested at authorization.
	pub scopes: String,
	/// Static launch context string, when configured for a standalone launch.
	pub launch: Option<String>,
}

/// Entry point tying discovery, the token-endpoint facade, and patient-context
/// resolution together over one shared HTTP connector.
#[derive(Clone)]
pub struct Broker {
	config: SmartClientConfig,
	connector: HttpConnector,
	discoverer: EndpointDiscoverer,
	resolver: PatientContextResolver,
}
impl Broker {
	/// Creates a broker with a freshly built HTTP connector.
	pub fn new(config: SmartClientConfig) -> Result<Self> {
		let connector = HttpConnector::new()?;

		Ok(Self::with_connector(config, connector))
	}

	/// Creates a broker on top of an existing connector (shared pools, tests).
	pub fn with_connector(config: SmartClientConfig, connector: HttpConnector) -> Self {
		let discoverer = EndpointDiscoverer::new(connector.clone());
		let resolver = PatientContextResolver::new(connector.clone());

		Self { config, connector, discoverer, resolver }
	}

	/// The static client configuration this broker was built with.
	pub fn config(&self) -> &SmartClientConfig {
		&self.config
	}

	/// The endpoint discoverer, exposed for cache warm-up.
	pub fn discoverer(&self) -> &EndpointDiscoverer {
		&self.discoverer
	}

	/// Creates a fresh anonymous session bound to the configured FHIR base.
	pub fn new_session(&self) -> AuthSessionState {
		AuthSessionState::new(&self.config.fhir_base)
	}

	pub(crate) fn facade(
		&self,
		token_endpoint: &Url,
		with_redirect: bool,
	) -> Result<SmartFacade, ConfigError> {
		SmartFacade::new(
			self.connector.clone(),
			token_endpoint,
			&self.config.client_id,
			self.config.client_auth.secret(),
			with_redirect.then_some(&self.config.redirect_uri),
		)
	}

	pub(crate) fn resolver(&self) -> &PatientContextResolver {
		&self.resolver
	}
}
impl Debug for Broker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Broker")
			.field("client_id", &self.config.client_id)
			.field("fhir_base", &self.config.fhir_base)
			.field("client_auth", &self.config.client_auth)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::*;

	#[test]
	fn debug_never_exposes_the_client_secret() {
		let broker =
			build_confidential_test_broker("https://ehr.example.com/fhir", "super-secret");
		let rendered = format!("{broker:?}");

		assert!(!rendered.contains("super-secret"));
		assert!(rendered.contains("<redacted>"));
	}

	#[test]
	fn new_session_binds_the_configured_base() {
		let broker = build_test_broker("https://ehr.example.com/fhir");
		let session = broker.new_session();

		assert_eq!(session.fhir_base, "https://ehr.example.com/fhir");
		assert!(session.fhir_access().is_none());
	}
}
