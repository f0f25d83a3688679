//! Clients for the Keptn control plane collaborators of the monaco service:
//! the configuration service (resources), the secret store, and the event
//! broker (CloudEvents in and out).

pub mod events;
pub mod resources;
pub mod secrets;
pub mod sender;

#[cfg(any(test, feature = "testutils"))]
pub mod testutils;
