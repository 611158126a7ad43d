//! SMART endpoint discovery: well-known document first, CapabilityStatement fallback.
//!
//! Many FHIR servers implement only one of the two standard discovery mechanisms,
//! so the discoverer tries the lighter purpose-built document first and treats any
//! failure there as fallthrough rather than as fatal. Only the CapabilityStatement
//! path surfaces errors.

// self
use crate::{
	_prelude::*,
	error::DiscoveryError,
	http::HttpConnector,
	obs::{FlowKind, FlowSpan},
};

/// Endpoints resolved for one FHIR base URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResult {
	/// Authorization endpoint for the authorize redirect.
	pub authorization_endpoint: Url,
	/// Token endpoint for exchanges and refreshes.
	pub token_endpoint: Url,
	/// Userinfo endpoint, when the discovery document advertises one.
	pub userinfo_endpoint: Option<Url>,
}

/// Resolves a FHIR server's SMART endpoints, caching results per base URL.
///
/// The cache is read-mostly and safe to share across sessions; it holds endpoint
/// URLs only, never token material.
#[derive(Clone)]
pub struct EndpointDiscoverer {
	connector: HttpConnector,
	cache: Arc<RwLock<HashMap<String, DiscoveryResult>>>,
}
impl EndpointDiscoverer {
	/// Creates a discoverer on top of the shared connector.
	pub fn new(connector: HttpConnector) -> Self {
		Self { connector, cache: Default::default() }
	}

	/// Resolves the SMART endpoints for `fhir_base`.
	///
	/// Order: `{base}/.well-known/smart-configuration` (failures swallowed), then
	/// the `{base}/metadata` CapabilityStatement `oauth-uris` extension. Fails with
	/// [`DiscoveryError`] only when the final fallback cannot produce both the
	/// authorize and token endpoints.
	pub async fn discover(&self, fhir_base: &str) -> Result<DiscoveryResult, DiscoveryError> {
		let span = FlowSpan::new(FlowKind::Discovery, "discover");

		span.instrument(async move {
			let base = fhir_base.trim_end_matches('/');

			if let Some(hit) = self.cache.read().get(base) {
				return Ok(hit.clone());
			}

			let result = match self.try_well_known(base).await {
				Some(found) => found,
				None => self.from_capability_statement(base).await?,
			};

			self.cache.write().insert(base.to_owned(), result.clone());

			Ok(result)
		})
		.await
	}

	/// Intentional best-effort attempt: every failure here means "try the
	/// CapabilityStatement instead", never an error.
	async fn try_well_known(&self, base: &str) -> Option<DiscoveryResult> {
		let url = Url::parse(&format!("{base}/.well-known/smart-configuration")).ok()?;
		let response = self.connector.get_json(url).await.ok()?;

		if !response.is_success() {
			return None;
		}

		let json = response.parse_json().ok()?;
		let authorization = non_blank_str(&json["authorization_endpoint"])?;
		let token = non_blank_str(&json["token_endpoint"])?;
		let userinfo =
			non_blank_str(&json["userinfo_endpoint"]).and_then(|value| Url::parse(value).ok());

		Some(DiscoveryResult {
			authorization_endpoint: Url::parse(authorization).ok()?,
			token_endpoint: Url::parse(token).ok()?,
			userinfo_endpoint: userinfo,
		})
	}

	async fn from_capability_statement(
		&self,
		base: &str,
	) -> Result<DiscoveryResult, DiscoveryError> {
		let url = Url::parse(&format!("{base}/metadata"))
			.map_err(|source| DiscoveryError::InvalidEndpointUrl { field: "fhir_base", source })?;
		let response = self
			.connector
			.get_json(url)
			.await
			.map_err(|e| DiscoveryError::MetadataUnreachable { source: Box::new(e) })?;

		if !response.is_success() {
			return Err(DiscoveryError::MetadataStatus { status: response.status });
		}

		let json = response.parse_json().map_err(|source| DiscoveryError::MetadataParse { source })?;
		let (authorization, token) =
			oauth_uris_from_capability(&json).ok_or(DiscoveryError::EndpointsNotFound)?;

		Ok(DiscoveryResult {
			authorization_endpoint: Url::parse(authorization).map_err(|source| {
				DiscoveryError::InvalidEndpointUrl { field: "authorize", source }
			})?,
			token_endpoint: Url::parse(token)
				.map_err(|source| DiscoveryError::InvalidEndpointUrl { field: "token", source })?,
			userinfo_endpoint: None,
		})
	}
}
impl Debug for EndpointDiscoverer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("EndpointDiscoverer")
			.field("cached_bases", &self.cache.read().len())
			.finish()
	}
}

/// Walks `rest[0].security.extension[]` for the `oauth-uris` entry and reads the
/// nested `authorize`/`token` `valueUri` pair.
fn oauth_uris_from_capability(root: &Json) -> Option<(&str, &str)> {
	let extensions =
		root.get("rest")?.get(0)?.get("security")?.get("extension")?.as_array()?;
	let oauth_uris = extensions.iter().find(|ext| {
		ext.get("url").and_then(Json::as_str).is_some_and(|url| url.contains("oauth-uris"))
	})?;
	let mut authorization = None;
	let mut token = None;

	for entry in oauth_uris.get("extension")?.as_array()? {
		let key = entry.get("url").and_then(Json::as_str).unwrap_or_default();
		let value = entry.get("valueUri").and_then(Json::as_str);

		if key.ends_with("authorize") {
			authorization = value;
		} else if key.ends_with("token") {
			token = value;
		}
	}

	Some((authorization?, token?))
}

fn non_blank_str(value: &Json) -> Option<&str> {
	value.as_str().map(str::trim).filter(|view| !view.is_empty())
}
