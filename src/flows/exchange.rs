//! Redirect callback handling: state validation, code exchange, patient context.

// self
use crate::{
	_prelude::*,
	error::StateMismatchError,
	flows::{Broker, authorize::validate_callback_state},
	obs::{FlowKind, FlowSpan},
	patient::PatientContextSources,
	session::{AuthSessionState, AuthorizedContext, FhirAccess},
};

/// Query parameters the authorization server appends to the redirect URI.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CallbackParams {
	/// Authorization code, present on success.
	pub code: Option<String>,
	/// Echoed anti-forgery state.
	pub state: Option<String>,
	/// OAuth error code, present when the user or server denied the request.
	pub error: Option<String>,
	/// Optional human-readable error description.
	pub error_description: Option<String>,
}

impl Broker {
	/// Handles the redirect callback end to end: validates `state`, exchanges the
	/// code, resolves the patient context, and transitions the session to
	/// authorized.
	///
	/// The pending context is consumed whether or not the exchange succeeds; any
	/// failure past state validation requires a restarted flow. An `error`
	/// parameter aborts before the exchange is ever attempted.
	pub async fn handle_callback(
		&self,
		session: &mut AuthSessionState,
		params: CallbackParams,
	) -> Result<FhirAccess> {
		let span = FlowSpan::new(FlowKind::Callback, "handle_callback");

		span.instrument(async move {
			if let Some(error) = params.error {
				session.take_pending();

				return Err(Error::AuthorizationDenied {
					error,
					description: params.error_description,
				});
			}

			validate_callback_state(session, params.state.as_deref())?;

			let pending = session
				.take_pending()
				.ok_or(StateMismatchError::NoPendingAuthorization)?;
			let code = params
				.code
				.as_deref()
				.map(str::trim)
				.filter(|value| !value.is_empty())
				.ok_or_else(|| Error::AuthorizationDenied {
					error: "invalid_request".into(),
					description: Some("Callback is missing the authorization code.".into()),
				})?;
			let facade = self.facade(&pending.token_endpoint, true)?;
			let outcome = facade
				.exchange_code(code, pending.code_verifier.expose())
				.await
				.map_err(Error::TokenExchange)?;
			let patient_id = self
				.resolver()
				.resolve(PatientContextSources {
					id_token: outcome.id_token.as_deref(),
					token_response_patient: outcome.tokens.patient_id.as_deref(),
					raw_token_response: Some(&outcome.raw_context),
					userinfo_endpoint: pending.userinfo_endpoint.as_ref(),
					access_token: Some(outcome.tokens.access_token.expose()),
				})
				.await;
			let access = FhirAccess {
				fhir_base: pending.fhir_base.clone(),
				access_token: outcome.tokens.access_token.clone(),
				patient_id: patient_id.clone(),
			};

			session.authorize(AuthorizedContext {
				tokens: outcome.tokens,
				patient_id,
				token_endpoint: pending.token_endpoint,
				userinfo_endpoint: pending.userinfo_endpoint,
			});

			Ok(access)
		})
		.await
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::*, auth::TokenSecret, session::PendingAuthContext};

	fn pending_session() -> AuthSessionState {
		let mut session = AuthSessionState::new("https://ehr.example.com/fhir");

		session.begin_pending(PendingAuthContext {
			state: "expected".into(),
			code_verifier: TokenSecret::new("verifier"),
			nonce: "nonce".into(),
			token_endpoint: Url::parse("https://ehr.example.com/token")
				.expect("Token endpoint fixture should parse successfully."),
			fhir_base: "https://ehr.example.com/fhir".into(),
			launch: None,
			userinfo_endpoint: None,
		});

		session
	}

	#[tokio::test]
	async fn error_parameter_aborts_before_any_exchange() {
		let broker = build_test_broker("https://ehr.example.com/fhir");
		let mut session = pending_session();
		let result = broker
			.handle_callback(
				&mut session,
				CallbackParams {
					error: Some("access_denied".into()),
					error_description: Some("User declined.".into()),
					..Default::default()
				},
			)
			.await;

		assert!(matches!(
			result,
			Err(Error::AuthorizationDenied { ref error, .. }) if error == "access_denied"
		));
		assert!(session.pending().is_none(), "A denied flow must discard the pending context.");
	}

	#[tokio::test]
	async fn forged_state_is_rejected_without_consuming_the_context() {
		let broker = build_test_broker("https://ehr.example.com/fhir");
		let mut session = pending_session();
		let result = broker
			.handle_callback(
				&mut session,
				CallbackParams {
					code: Some("valid-looking-code".into()),
					state: Some("forged".into()),
					..Default::default()
				},
			)
			.await;

		assert!(matches!(
			result,
			Err(Error::StateMismatch(StateMismatchError::StateDiffers))
		));
		assert!(session.pending().is_some(), "Validation alone must not consume the context.");
	}

	#[tokio::test]
	async fn missing_code_with_valid_state_is_a_denial() {
		let broker = build_test_broker("https://ehr.example.com/fhir");
		let mut session = pending_session();
		let result = broker
			.handle_callback(
				&mut session,
				CallbackParams { state: Some("expected".into()), ..Default::default() },
			)
			.await;

		assert!(matches!(result, Err(Error::AuthorizationDenied { .. })));
		assert!(session.pending().is_none(), "The consumed context must not be retried.");
	}
}
