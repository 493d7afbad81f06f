//! # Rollcall
//!
//! **Rotating signed attendance codes with scan admission and live fan-out.**
//!
//! An instructor opens a session and presents a code that rotates every
//! couple of seconds. Each code carries an HMAC-SHA256 signed token bound
//! to the session and its generation time, so a photo of the code shared
//! later is useless. Students scan, and the admission pipeline records
//! them as present or late.
//!
//! ## Features
//!
//! - **Signed rotating tokens**: validation needs only the shared secret and the clock
//! - **Ordered admission**: session, enrollment, duplicate, geofence, then token
//! - **Uniqueness backstop**: concurrent duplicate scans have exactly one winner
//! - **Live fan-out**: token streams for presenters, stats for every subscriber
//! - **Finalization**: closing a session marks every unscanned student absent
//!
//! ## Quickstart
//!
//! ```no_run
//! use rollcall::store::memory::MemoryStore;
//! use rollcall::{
//!     AttendanceManager, CreateSessionRequest, EngineConfig, Principal, ScanRequest, Stores,
//! };
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! # async fn run() -> Result<(), rollcall::AttendanceError> {
//! let store = Arc::new(MemoryStore::new());
//! let course = Uuid::new_v4();
//! store.add_course(course, "prof");
//! store.enroll(course, "alice");
//!
//! let manager = AttendanceManager::new(EngineConfig::from_env()?, Stores::from_backend(store))?;
//!
//! let prof = Principal::instructor("prof");
//! let session = manager
//!     .create_session(&prof, &CreateSessionRequest::new(course))
//!     .await?;
//!
//! let mut presenter = manager.subscribe_presenter(&prof, session.id).await?;
//! if let Some(payload) = presenter.tokens.next().await {
//!     let outcome = manager
//!         .submit_scan(
//!             &Principal::student("alice"),
//!             &ScanRequest::new(session.id, payload.token),
//!         )
//!         .await?;
//!     println!("{:?}: {}", outcome.result, outcome.message);
//! }
//!
//! manager.close_session(&prof, session.id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Threat Model
//!
//! Rollcall protects against:
//! - **Code sharing**: tokens expire after the generation period plus a small buffer
//! - **Forgery**: tokens are signed; any altered byte fails verification
//! - **Cross-session replay**: tokens are bound to one session id
//! - **Remote scanning**: optional geofence with great-circle distance
//!
//! Rollcall does **not** stop a student physically in the room from relaying
//! a live code to someone nearby within the validity window.
//!
//! ## Configuration
//!
//! - `signing_secret`: Shared HMAC secret, at least 32 bytes
//! - `generation_period`: Token rotation cadence (default 2 s)
//! - `validation_buffer`: Extra acceptance time for network and clock skew
//!
//! See [`EngineConfig`] for full documentation.

#![deny(missing_docs)]

// Core modules
pub mod clock;
pub mod config;
pub mod errors;
pub mod models;

// Crypto layer
pub mod crypto;

// Token engine
pub mod engine;

// Collaborator contracts
pub mod audit;
pub mod auth;
pub mod store;

// Admission and lifecycle
pub mod admission;
pub mod lifecycle;
pub mod stats;

// Live distribution
pub mod live;

// Manager (main public API)
pub mod manager;

// Re-exports for public API
pub use admission::{ScanOutcome, ScanRequest, ScanResult};
pub use auth::{Principal, Role};
pub use clock::{Clock, SystemClock};
pub use config::EngineConfig;
pub use engine::{TokenEngine, TokenPayload, VerifiedToken};
pub use errors::{AttendanceError, StoreError, TokenError};
pub use lifecycle::CreateSessionRequest;
pub use live::{SessionEvent, Subscription, TokenStream};
pub use manager::{AttendanceManager, Presenter};
pub use models::{
    AttendanceRecord, AttendanceStatus, Coordinates, CourseId, Geofence, Session, SessionId,
};
pub use stats::{SessionSummary, StatsSnapshot};
pub use store::Stores;

#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;
