//! Patient-context resolution: an ordered fallback chain over token material.
//!
//! Sources are tried strictly in order—ID token claim, the token response's
//! `patient` field, a deep search of the raw token-response JSON, then the
//! userinfo endpoint—and the first non-blank candidate wins. Every source is
//! best-effort: failures mean "try the next one", and exhausting the chain is a
//! legitimate `None`, never an error. Callers must treat "no patient context" as
//! a displayable outcome (relaunch from within a patient chart).

// crates.io
use base64::{
	Engine as _,
	engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
};
// self
use crate::{
	_prelude::*,
	http::HttpConnector,
	obs::{FlowKind, FlowSpan},
};

/// Ordered JSON paths searched for a patient id, evaluated left-to-right.
///
/// Providers scatter the SMART context across these shapes; appending a new
/// variant here is the only change needed to support another one.
const CONTEXT_PATHS: &[&[&str]] = &[
	&["patient"],
	&["context", "patient"],
	&["context", "patientId"],
	&["context", "patient_id"],
	&["launch_response", "patient"],
	&["patient_id"],
];

/// Inputs available to one resolution attempt, in precedence order.
#[derive(Clone, Copy, Debug, Default)]
pub struct PatientContextSources<'a> {
	/// Raw ID token JWT from the token response, if any.
	pub id_token: Option<&'a str>,
	/// The token response's top-level `patient` field, if the provider echoed it.
	pub token_response_patient: Option<&'a str>,
	/// The raw token-response JSON for the deep path search.
	pub raw_token_response: Option<&'a Json>,
	/// Userinfo endpoint from discovery, enabling the final fallback.
	pub userinfo_endpoint: Option<&'a Url>,
	/// Access token presented as a bearer credential to the userinfo endpoint.
	pub access_token: Option<&'a str>,
}

/// Runs the fallback chain that determines the in-context patient identifier.
#[derive(Clone, Debug)]
pub struct PatientContextResolver {
	connector: HttpConnector,
}
impl PatientContextResolver {
	/// Creates a resolver on top of the shared connector.
	pub fn new(connector: HttpConnector) -> Self {
		Self { connector }
	}

	/// Resolves the scoped patient id, or `None` when every source is exhausted.
	pub async fn resolve(&self, sources: PatientContextSources<'_>) -> Option<String> {
		let span = FlowSpan::new(FlowKind::PatientContext, "resolve");

		span.instrument(async move {
			if let Some(found) = sources.id_token.and_then(patient_from_id_token) {
				return Some(found);
			}
			if let Some(found) = sources.token_response_patient.and_then(patient_from_value) {
				return Some(found);
			}
			if let Some(found) = sources.raw_token_response.and_then(search_context_paths) {
				return Some(found);
			}
			if let (Some(endpoint), Some(token)) = (sources.userinfo_endpoint, sources.access_token)
			{
				return self.patient_from_userinfo(endpoint.clone(), token).await;
			}

			None
		})
		.await
	}

	/// Final fallback: fetch the userinfo document and run the same path search.
	async fn patient_from_userinfo(&self, endpoint: Url, access_token: &str) -> Option<String> {
		let response = self.connector.get_json_with_bearer(endpoint, access_token).await.ok()?;

		if !response.is_success() {
			return None;
		}

		search_context_paths(&response.parse_json().ok()?)
	}
}

/// Reads the `patient` claim from an ID token payload.
///
/// Decodes the second JWT segment as base64url JSON. No signature verification
/// happens here; that is a separate concern outside this resolver.
pub fn patient_from_id_token(id_token: &str) -> Option<String> {
	let mut segments = id_token.split('.');
	let _header = segments.next()?;
	let payload = segments.next()?;
	let bytes = URL_SAFE_NO_PAD.decode(payload).or_else(|_| URL_SAFE.decode(payload)).ok()?;
	let claims: Json = serde_json::from_slice(&bytes).ok()?;

	claims.get("patient").and_then(Json::as_str).and_then(patient_from_value)
}

/// Deep-searches a JSON tree over [`CONTEXT_PATHS`], first non-blank string wins.
pub fn search_context_paths(root: &Json) -> Option<String> {
	CONTEXT_PATHS.iter().find_map(|path| {
		let node = path.iter().try_fold(root, |node, key| node.get(key))?;

		node.as_str().and_then(patient_from_value)
	})
}

/// Normalizes a candidate: blank means absent, a leading `Patient/` is stripped.
fn patient_from_value(candidate: &str) -> Option<String> {
	let trimmed = candidate.trim();
	let stripped = trimmed.strip_prefix("Patient/").unwrap_or(trimmed);

	if stripped.is_empty() {
		return None;
	}

	Some(stripped.to_owned())
}
