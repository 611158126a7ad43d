//! Refresh rotation: superseding a session's token set before it expires.

// self
use crate::{
	_prelude::*,
	error::ConfigError,
	flows::Broker,
	obs::{FlowKind, FlowSpan},
	session::AuthSessionState,
};

impl Broker {
	/// Refreshes the session's tokens when they are due, per the freshness margin.
	///
	/// Returns whether a refresh was performed. Tokens with an unknown lifetime
	/// are never considered due; callers react to request failures instead.
	pub async fn ensure_fresh(&self, session: &mut AuthSessionState) -> Result<bool> {
		let due = session
			.authorized()
			.ok_or(ConfigError::SessionNotAuthorized)?
			.tokens
			.is_due_for_refresh();

		if !due {
			return Ok(false);
		}

		self.refresh(session).await?;

		Ok(true)
	}

	/// Rotates the session's tokens via `grant_type=refresh_token`.
	///
	/// The stored token set is superseded wholesale, with two carve-outs: a
	/// provider that omits `refresh_token` from the response does not revoke the
	/// stored one, and the resolved patient context is never re-derived here.
	pub async fn refresh(&self, session: &mut AuthSessionState) -> Result<()> {
		let span = FlowSpan::new(FlowKind::Refresh, "refresh");

		span.instrument(async move {
			let (token_endpoint, refresh_token) = {
				let context =
					session.authorized().ok_or(ConfigError::SessionNotAuthorized)?;
				let secret = context
					.tokens
					.refresh_token
					.as_ref()
					.ok_or(ConfigError::MissingRefreshToken)?;

				(context.token_endpoint.clone(), secret.expose().to_owned())
			};
			let facade = self.facade(&token_endpoint, false)?;
			let outcome =
				facade.refresh_token(&refresh_token).await.map_err(Error::TokenRefresh)?;
			let context =
				session.authorized_mut().ok_or(ConfigError::SessionNotAuthorized)?;
			let mut tokens = outcome.tokens;

			if tokens.refresh_token.is_none() {
				tokens.refresh_token = context.tokens.refresh_token.take();
			}
			if tokens.patient_id.is_none() {
				tokens.patient_id = context.tokens.patient_id.take();
			}
			if tokens.encounter_id.is_none() {
				tokens.encounter_id = context.tokens.encounter_id.take();
			}

			context.tokens = tokens;

			Ok(())
		})
		.await
	}
}
