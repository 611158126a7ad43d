//! PKCE verifier/challenge generation (RFC 7636 S256).

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

const VERIFIER_ENTROPY_BYTES: usize = 32;

/// Supported PKCE challenge methods advertised in the authorize request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceCodeChallengeMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	S256,
}
impl PkceCodeChallengeMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub fn as_str(self) -> &'static str {
		match self {
			PkceCodeChallengeMethod::S256 => "S256",
		}
	}
}

/// A freshly generated PKCE verifier and its derived challenge.
///
/// Created at authorization start, consumed exactly once at token exchange, then
/// discarded. The verifier never appears in `Debug` output.
#[derive(Clone)]
pub struct PkceMaterial {
	verifier: String,
	/// Challenge derived from the verifier; safe to place in the authorize URL.
	pub challenge: String,
}
impl PkceMaterial {
	/// Generates a verifier from 32 CSPRNG bytes and computes its S256 challenge.
	///
	/// The base64url no-pad encoding yields a 43-character verifier, inside the
	/// RFC 7636 `[43, 128]` window.
	pub fn generate() -> Self {
		let entropy: [u8; VERIFIER_ENTROPY_BYTES] = rand::rng().random();
		let verifier = URL_SAFE_NO_PAD.encode(entropy);
		let challenge = compute_challenge(&verifier);

		Self { verifier, challenge }
	}

	/// Returns the secret verifier. Callers must keep it inside the session store.
	pub fn verifier(&self) -> &str {
		&self.verifier
	}

	/// Challenge method to advertise alongside [`Self::challenge`] (always `S256`).
	pub fn method(&self) -> PkceCodeChallengeMethod {
		PkceCodeChallengeMethod::S256
	}
}
impl Debug for PkceMaterial {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PkceMaterial")
			.field("verifier", &"<redacted>")
			.field("challenge", &self.challenge)
			.finish()
	}
}

/// Computes `base64url_nopad(SHA256(verifier))`.
pub fn compute_challenge(verifier: &str) -> String {
	let mut hasher = Sha256::new();

	hasher.update(verifier.as_bytes());

	URL_SAFE_NO_PAD.encode(hasher.finalize())
}
