//! SMART-on-FHIR authorization broker—endpoint discovery, PKCE authorization-code flows,
//! refresh rotation, and patient-context resolution for clinical-data viewers.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
#[cfg(feature = "reqwest")] pub mod discovery;
pub mod error;
#[cfg(feature = "reqwest")] pub mod flows;
pub mod http;
#[cfg(feature = "reqwest")] pub mod oauth;
pub mod obs;
#[cfg(feature = "reqwest")] pub mod patient;
pub mod pkce;
pub mod session;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::flows::{Broker, ClientAuth, SmartClientConfig};

	/// Builds a broker configuration pointing at a mock FHIR server base URL.
	pub fn test_config(fhir_base: &str, client_auth: ClientAuth) -> SmartClientConfig {
		SmartClientConfig {
			fhir_base: fhir_base.into(),
			client_id: "viewer-client".into(),
			client_auth,
			redirect_uri: Url::parse("http://127.0.0.1:8080/callback")
				.expect("Test redirect URI should parse successfully."),
			scopes: "launch/patient patient/*.read openid fhirUser offline_access".into(),
			launch: None,
		}
	}

	/// Constructs a [`Broker`] for a public PKCE-only client against a mock server base.
	pub fn build_test_broker(fhir_base: &str) -> Broker {
		Broker::new(test_config(fhir_base, ClientAuth::Public))
			.expect("Test broker should build successfully.")
	}

	/// Constructs a [`Broker`] for a confidential client against a mock server base.
	pub fn build_confidential_test_broker(fhir_base: &str, secret: &str) -> Broker {
		Broker::new(test_config(
			fhir_base,
			ClientAuth::Confidential { client_secret: secret.into() },
		))
		.expect("Confidential test broker should build successfully.")
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use serde_json::Value as Json;
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(not(feature = "reqwest"))] use oauth2 as _;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _, tokio as _};
