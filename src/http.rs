//! Transport primitives shared by discovery, token, and userinfo calls.
//!
//! The module exposes [`HttpConnector`], a thin wrapper around a shared reqwest
//! client configured with the broker's timeout and with redirect following
//! disabled (token endpoints must answer directly, and the timeout is the only
//! temporal control a flow has). Token endpoint calls additionally go through
//! [`InstrumentedHandle`], an `oauth2` [`AsyncHttpClient`] adapter that records
//! the HTTP status of the most recent response in a [`ResponseStatusSlot`] so
//! error mapping can report it.

// std
#[cfg(feature = "reqwest")] use std::{ops::Deref, time::Duration as StdDuration};
// crates.io
#[cfg(feature = "reqwest")]
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
#[cfg(feature = "reqwest")] use reqwest::redirect::Policy;
// self
use crate::_prelude::*;
#[cfg(feature = "reqwest")] use crate::error::ConfigError;

#[cfg(feature = "reqwest")]
const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(10);

/// Thread-safe slot publishing the HTTP status of the most recent token response.
///
/// The broker creates a fresh slot for each token request and reads the captured
/// status immediately after `oauth2` resolves; the transport borrows the slot just
/// long enough to call [`store`](ResponseStatusSlot::store).
#[derive(Clone, Debug, Default)]
pub struct ResponseStatusSlot(Arc<Mutex<Option<u16>>>);
impl ResponseStatusSlot {
	/// Stores the status observed for the current request.
	pub fn store(&self, status: u16) {
		*self.0.lock() = Some(status);
	}

	/// Returns the captured status, if any, consuming it from the slot.
	pub fn take(&self) -> Option<u16> {
		self.0.lock().take()
	}
}

/// A fetched JSON-bearing response, body still unparsed.
#[derive(Clone, Debug)]
pub struct JsonResponse {
	/// HTTP status code of the response.
	pub status: u16,
	/// Raw response body.
	pub body: String,
}
impl JsonResponse {
	/// Whether the status is in the 2xx range.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Parses the body as a JSON tree, reporting the failing path on error.
	pub fn parse_json(&self) -> Result<Json, serde_path_to_error::Error<serde_json::Error>> {
		let mut deserializer = serde_json::Deserializer::from_str(&self.body);

		serde_path_to_error::deserialize(&mut deserializer)
	}
}

/// Shared HTTP client used for every outbound broker request.
#[cfg(feature = "reqwest")]
#[derive(Clone)]
pub struct HttpConnector(ReqwestClient);
#[cfg(feature = "reqwest")]
impl HttpConnector {
	/// Builds the broker's default connector: request timeout applied, redirect
	/// following disabled.
	pub fn new() -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder()
			.timeout(REQUEST_TIMEOUT)
			.redirect(Policy::none())
			.build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`]. Callers should configure their
	/// own timeout and disable redirect following.
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Performs a plain unauthenticated GET (discovery documents).
	pub async fn get_json(&self, url: Url) -> Result<JsonResponse, ReqwestError> {
		let response = self.0.get(url).send().await?;
		let status = response.status().as_u16();
		let body = response.text().await?;

		Ok(JsonResponse { status, body })
	}

	/// Performs a GET with `Authorization: Bearer {token}` (userinfo endpoint).
	pub async fn get_json_with_bearer(
		&self,
		url: Url,
		token: &str,
	) -> Result<JsonResponse, ReqwestError> {
		let response = self.0.get(url).bearer_auth(token).send().await?;
		let status = response.status().as_u16();
		let body = response.text().await?;

		Ok(JsonResponse { status, body })
	}

	/// Builds an instrumented token-call handle that records statuses in `slot`.
	pub(crate) fn instrumented(&self, slot: ResponseStatusSlot) -> InstrumentedHandle {
		InstrumentedHandle::new(self.0.clone(), slot)
	}
}
#[cfg(feature = "reqwest")]
impl Debug for HttpConnector {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HttpConnector").finish_non_exhaustive()
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for HttpConnector {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for HttpConnector {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

#[cfg(feature = "reqwest")]
struct InstrumentedHttpClient {
	client: ReqwestClient,
	slot: ResponseStatusSlot,
}

#[cfg(feature = "reqwest")]
/// Instrumented [`AsyncHttpClient`] adapter handed to the `oauth2` facade.
#[derive(Clone)]
pub struct InstrumentedHandle(Arc<InstrumentedHttpClient>);
#[cfg(feature = "reqwest")]
impl InstrumentedHandle {
	fn new(client: ReqwestClient, slot: ResponseStatusSlot) -> Self {
		Self(Arc::new(InstrumentedHttpClient { client, slot }))
	}
}
#[cfg(feature = "reqwest")]
impl<'c> AsyncHttpClient<'c> for InstrumentedHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let client = Arc::clone(&self.0);

		Box::pin(async move {
			client.slot.take();

			let response = client
				.client
				.execute(request.try_into().map_err(Box::new)?)
				.await
				.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();

			client.slot.store(status.as_u16());

			let mut response_new =
				HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn status_slot_consumes_on_take() {
		let slot = ResponseStatusSlot::default();

		assert_eq!(slot.take(), None);

		slot.store(400);

		assert_eq!(slot.take(), Some(400));
		assert_eq!(slot.take(), None);
	}

	#[cfg(feature = "reqwest")]
	#[test]
	fn connector_debug_stays_opaque() {
		let connector = HttpConnector::new().expect("Connector should build for tests.");

		assert_eq!(format!("{connector:?}"), "HttpConnector { .. }");
	}

	#[test]
	fn json_response_success_and_parse() {
		let response = JsonResponse { status: 200, body: "{\"ok\":true}".into() };

		assert!(response.is_success());
		assert_eq!(response.parse_json().expect("Body should parse as JSON.")["ok"], true);

		let failure = JsonResponse { status: 404, body: "not json".into() };

		assert!(!failure.is_success());
		assert!(failure.parse_json().is_err());
	}
}
