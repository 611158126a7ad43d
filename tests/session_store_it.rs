#![cfg(feature = "reqwest")]

// self
use smart_auth_broker::{
	_preludet::*,
	auth::{TokenSecret, TokenSet},
	session::{AuthorizedContext, MemorySessionStore, SessionId, SessionPhase},
};

fn tokens(access: &str) -> TokenSet {
	TokenSet {
		access_token: TokenSecret::new(access),
		refresh_token: None,
		expires_at: None,
		token_type: "Bearer".into(),
		patient_id: None,
		encounter_id: None,
	}
}

fn authorized(access: &str) -> AuthorizedContext {
	AuthorizedContext {
		tokens: tokens(access),
		patient_id: Some("42".into()),
		token_endpoint: Url::parse("https://ehr.example.com/token")
			.expect("Token endpoint fixture should parse successfully."),
		userinfo_endpoint: None,
	}
}

#[tokio::test]
async fn sessions_are_isolated_from_each_other() {
	let store = MemorySessionStore::default();
	let alice = SessionId::new("sess-alice").expect("Session id fixture should be valid.");
	let bob = SessionId::new("sess-bob").expect("Session id fixture should be valid.");
	let alice_handle = store.session(&alice, "https://ehr.example.com/fhir");
	let bob_handle = store.session(&bob, "https://ehr.example.com/fhir");

	alice_handle.lock().await.authorize(authorized("alice-access"));

	{
		let bob_state = bob_handle.lock().await;

		assert!(matches!(bob_state.phase(), SessionPhase::Anonymous));
		assert!(bob_state.fhir_access().is_none());
	}

	let access = alice_handle
		.lock()
		.await
		.fhir_access()
		.expect("Alice's session should expose FHIR access.");

	assert_eq!(access.access_token.expose(), "alice-access");
}

#[tokio::test]
async fn ending_a_session_destroys_its_token_material() {
	let store = MemorySessionStore::default();
	let id = SessionId::new("sess-end").expect("Session id fixture should be valid.");
	let handle = store.session(&id, "https://ehr.example.com/fhir");

	handle.lock().await.authorize(authorized("doomed-access"));

	assert!(store.end_session(&id));
	assert!(store.get(&id).is_none());

	// A new visit with the same cookie starts from a blank slate.
	let fresh = store.session(&id, "https://ehr.example.com/fhir");

	assert!(matches!(fresh.lock().await.phase(), SessionPhase::Anonymous));
}

#[tokio::test]
async fn concurrent_updates_to_one_session_serialize_atomically() {
	let store = MemorySessionStore::default();
	let id = SessionId::new("sess-racy").expect("Session id fixture should be valid.");
	let handle = store.session(&id, "https://ehr.example.com/fhir");
	let tasks = (0..8_u32)
		.map(|i| {
			let handle = handle.clone();

			tokio::spawn(async move {
				let mut state = handle.lock().await;

				// Read-modify-write under one lock; interleaving would lose writes.
				let seen = state.authorized().map_or(0, |context| {
					context.tokens.patient_id.as_deref().map_or(0, |v| v.parse().unwrap_or(0))
				});
				let mut context = authorized(&format!("access-{i}"));

				context.tokens.patient_id = Some((seen + 1).to_string());
				state.authorize(context);
			})
		})
		.collect::<Vec<_>>();

	for task in tasks {
		task.await.expect("Session update task should not panic.");
	}

	let state = handle.lock().await;
	let counter = state
		.authorized()
		.and_then(|context| context.tokens.patient_id.as_deref())
		.expect("The final update should be visible.");

	assert_eq!(counter, "8", "Every read-modify-write must observe the previous one.");
}
