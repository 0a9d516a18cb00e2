//! # ASC Test Utilities
//!
//! Shared test utilities for the Audio Session Controller (ASC).
//!
//! This crate provides in-memory implementations of the controller's
//! collaborators, so sessions can be exercised end to end without a media
//! engine, a database or the group service.
//!
//! ## Modules
//!
//! - `mock_engine` - In-memory media engine with handle tracking
//! - `mock_store` - In-memory session store
//! - `mock_groups` - Mock group directory
//! - `fixtures` - A wired-up service harness and test data
//!
//! ## Usage
//!
//! ```rust,ignore
//! use asc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = TestHarness::new().await;
//!     let alice = harness.member();
//!
//!     let view = harness
//!         .create_session(alice, SessionType::VoiceOnly)
//!         .await
//!         .unwrap();
//!
//!     harness.service.participants.leave(view.session.id, alice).await.unwrap();
//!     assert_eq!(harness.engine.open_handle_count(), 0);
//! }
//! ```

pub mod fixtures;
pub mod mock_engine;
pub mod mock_groups;
pub mod mock_store;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_engine::*;
pub use mock_groups::*;
pub use mock_store::*;
