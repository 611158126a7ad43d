//! Optional observability helpers for broker flows.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `smart_auth_broker.flow` with the `flow`
//!   (stage of the SMART launch) and `stage` (call site) fields. Token material never appears
//!   in span fields; secrets are wrapped in redacting types before they reach any recorder.

// self
use crate::_prelude::*;

/// SMART launch stages observed by the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Endpoint discovery against a FHIR base.
	Discovery,
	/// Authorization start (PKCE + state + authorize URL).
	Authorize,
	/// Redirect callback handling and code exchange.
	Callback,
	/// Refresh token rotation.
	Refresh,
	/// Patient-context resolution fallback chain.
	PatientContext,
}
impl FlowKind {
	/// Returns a stable label suitable for span fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Discovery => "discovery",
			FlowKind::Authorize => "authorize",
			FlowKind::Callback => "callback",
			FlowKind::Refresh => "refresh",
			FlowKind::PatientContext => "patient_context",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedFlow<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFlow<F> = F;

/// A span builder used by broker flows.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl FlowSpan {
	/// Creates a new span tagged with the provided flow kind + stage.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("smart_auth_broker.flow", flow = kind.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn flow_kind_labels_are_stable() {
		assert_eq!(FlowKind::Discovery.as_str(), "discovery");
		assert_eq!(FlowKind::Authorize.as_str(), "authorize");
		assert_eq!(FlowKind::Callback.as_str(), "callback");
		assert_eq!(FlowKind::Refresh.as_str(), "refresh");
		assert_eq!(FlowKind::PatientContext.to_string(), "patient_context");
	}

	#[tokio::test]
	async fn instrumented_future_resolves_transparently() {
		let span = FlowSpan::new(FlowKind::Authorize, "test");
		let value = span.instrument(async { 21 * 2 }).await;

		assert_eq!(value, 42);
	}
}
