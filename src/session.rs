//! Per-session authorization state and the in-memory session store.
//!
//! All mutable flow state—the pending context, the token set, the resolved patient
//! id—is scoped to one user's session and must never be visible to another. The
//! phase invariant ("pending" and "tokens" are mutually exclusive) is enforced by
//! [`SessionPhase`] being a tagged union rather than by convention.

// std
use std::borrow::Borrow;
// self
use crate::{
	_prelude::*,
	auth::{TokenSecret, TokenSet},
};

const SESSION_ID_MAX_LEN: usize = 128;

/// Error returned when session identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum SessionIdError {
	/// The identifier was empty.
	#[error("Session identifier cannot be empty.")]
	Empty,
	/// The identifier contains whitespace characters.
	#[error("Session identifier contains whitespace.")]
	ContainsWhitespace,
	/// The identifier exceeded the allowed character count.
	#[error("Session identifier exceeds {max} characters.")]
	TooLong {
		/// Maximum permitted character count.
		max: usize,
	},
}

/// Opaque identifier of one user visit (e.g. a server-side session cookie value).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);
impl SessionId {
	/// Creates a new identifier after validation.
	pub fn new(value: impl AsRef<str>) -> Result<Self, SessionIdError> {
		let view = value.as_ref();

		if view.is_empty() {
			return Err(SessionIdError::Empty);
		}
		if view.chars().any(char::is_whitespace) {
			return Err(SessionIdError::ContainsWhitespace);
		}
		if view.len() > SESSION_ID_MAX_LEN {
			return Err(SessionIdError::TooLong { max: SESSION_ID_MAX_LEN });
		}

		Ok(Self(view.to_owned()))
	}
}
impl AsRef<str> for SessionId {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
impl Borrow<str> for SessionId {
	fn borrow(&self) -> &str {
		&self.0
	}
}
impl From<SessionId> for String {
	fn from(value: SessionId) -> Self {
		value.0
	}
}
impl TryFrom<String> for SessionId {
	type Error = SessionIdError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::new(&value)
	}
}
impl FromStr for SessionId {
	type Err = SessionIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}
impl Debug for SessionId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "Session({})", self.0)
	}
}
impl Display for SessionId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

/// Scratch state held between authorization start and the redirect callback.
///
/// Owned exclusively by the session that created it; consumed (read then
/// invalidated) at callback time and never reused across more than one callback.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingAuthContext {
	/// Anti-forgery token that must round-trip via the redirect.
	pub state: String,
	/// PKCE verifier to present at the token exchange.
	pub code_verifier: TokenSecret,
	/// OpenID Connect nonce sent in the authorize request.
	pub nonce: String,
	/// Token endpoint resolved by discovery for this flow.
	pub token_endpoint: Url,
	/// FHIR base (issuer) this flow authorizes against.
	pub fhir_base: String,
	/// SMART launch context string, when launched from an EHR.
	pub launch: Option<String>,
	/// Userinfo endpoint advertised by discovery, if any.
	pub userinfo_endpoint: Option<Url>,
}

/// Phase of one session's authorization lifecycle.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub enum SessionPhase {
	/// No flow started and no tokens held.
	#[default]
	Anonymous,
	/// Between authorization start and callback.
	Pending(PendingAuthContext),
	/// Exchange completed; the session holds live tokens.
	Authorized(AuthorizedContext),
}

/// Tokens plus resolved launch context for an authorized session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizedContext {
	/// Current token set; superseded wholesale on refresh.
	pub tokens: TokenSet,
	/// Patient id resolved by the fallback chain, when any source produced one.
	pub patient_id: Option<String>,
	/// Token endpoint the tokens came from, kept for refresh calls.
	pub token_endpoint: Url,
	/// Userinfo endpoint carried over from discovery for later use.
	pub userinfo_endpoint: Option<Url>,
}

/// Aggregate auth state persisted for one user session across the whole flow.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthSessionState {
	/// FHIR base this session talks to; an EHR launch may override the default.
	pub fhir_base: String,
	phase: SessionPhase,
}
impl AuthSessionState {
	/// Creates a fresh anonymous session bound to a FHIR base.
	pub fn new(fhir_base: impl Into<String>) -> Self {
		Self { fhir_base: fhir_base.into(), phase: SessionPhase::Anonymous }
	}

	/// Current phase (read-only; transitions go through the helpers below).
	pub fn phase(&self) -> &SessionPhase {
		&self.phase
	}

	/// Enters the pending phase, discarding any previous flow or token set.
	pub fn begin_pending(&mut self, pending: PendingAuthContext) {
		self.fhir_base = pending.fhir_base.clone();
		self.phase = SessionPhase::Pending(pending);
	}

	/// Returns the pending context, if the session is mid-flow.
	pub fn pending(&self) -> Option<&PendingAuthContext> {
		match &self.phase {
			SessionPhase::Pending(pending) => Some(pending),
			_ => None,
		}
	}

	/// Consumes the pending context, leaving the session anonymous.
	///
	/// The context is invalidated whether or not the following exchange succeeds;
	/// a failed exchange requires a restarted flow.
	pub fn take_pending(&mut self) -> Option<PendingAuthContext> {
		match std::mem::take(&mut self.phase) {
			SessionPhase::Pending(pending) => Some(pending),
			other => {
				self.phase = other;

				None
			},
		}
	}

	/// Enters the authorized phase with the exchanged tokens.
	pub fn authorize(&mut self, context: AuthorizedContext) {
		self.phase = SessionPhase::Authorized(context);
	}

	/// Authorized context, if the session completed an exchange.
	pub fn authorized(&self) -> Option<&AuthorizedContext> {
		match &self.phase {
			SessionPhase::Authorized(context) => Some(context),
			_ => None,
		}
	}

	/// Mutable authorized context, used by the refresh flow to supersede tokens.
	pub fn authorized_mut(&mut self) -> Option<&mut AuthorizedContext> {
		match &mut self.phase {
			SessionPhase::Authorized(context) => Some(context),
			_ => None,
		}
	}

	/// Resolved patient id, when authorized and in a patient context.
	pub fn patient_id(&self) -> Option<&str> {
		self.authorized().and_then(|context| context.patient_id.as_deref())
	}

	/// The contract handed to downstream FHIR-querying code.
	pub fn fhir_access(&self) -> Option<FhirAccess> {
		self.authorized().map(|context| FhirAccess {
			fhir_base: self.fhir_base.clone(),
			access_token: context.tokens.access_token.clone(),
			patient_id: context.patient_id.clone(),
		})
	}
}

/// Everything the excluded resource-viewing layer needs to query FHIR.
#[derive(Clone, Debug)]
pub struct FhirAccess {
	/// FHIR base URL to issue resource requests against.
	pub fhir_base: String,
	/// Bearer token for those requests.
	pub access_token: TokenSecret,
	/// Scoped patient id; `None` means "no patient context"—a displayable
	/// outcome (relaunch from a patient chart), not a failure.
	pub patient_id: Option<String>,
}

/// Shared handle to one session's state; lock it across a whole operation so
/// concurrent requests from the same browser apply updates atomically.
pub type SessionHandle = Arc<AsyncMutex<AuthSessionState>>;

/// Thread-safe in-process session store for embedding servers and tests.
#[derive(Clone, Debug, Default)]
pub struct MemorySessionStore(Arc<RwLock<HashMap<SessionId, SessionHandle>>>);
impl MemorySessionStore {
	/// Returns the handle for `id`, creating a fresh anonymous session bound to
	/// `fhir_base` on first sight.
	pub fn session(&self, id: &SessionId, fhir_base: &str) -> SessionHandle {
		if let Some(handle) = self.0.read().get(id) {
			return handle.clone();
		}

		let mut guard = self.0.write();

		guard
			.entry(id.clone())
			.or_insert_with(|| Arc::new(AsyncMutex::new(AuthSessionState::new(fhir_base))))
			.clone()
	}

	/// Returns the handle for `id` without creating one.
	pub fn get(&self, id: &SessionId) -> Option<SessionHandle> {
		self.0.read().get(id).cloned()
	}

	/// Destroys the session and all token material it held.
	pub fn end_session(&self, id: &SessionId) -> bool {
		self.0.write().remove(id).is_some()
	}

	/// Number of live sessions.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Whether the store holds no sessions.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}
}
