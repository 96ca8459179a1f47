//! syncpoint - file-based startup coordination for process fan-out
//!
//! One controller process and N worker processes start independently and
//! must agree on a single piece of shared initialization state before the
//! workers proceed. The controller computes the state once and publishes it;
//! workers block until it is visible, acknowledge receipt, and the
//! controller confirms quorum.
//!
//! The mechanism is pure filesystem IPC: a coordination directory under the
//! project root holding one atomically-written envelope file and one empty
//! acknowledgment marker per worker. No sockets, no shared memory, no
//! broker. All processes must share one writable filesystem.
//!
//! # Protocol
//!
//! 1. Controller: [`ControllerCoordination::publish_state`] writes the
//!    envelope via temp-file-then-rename, so readers never see a torn file.
//! 2. Workers: [`WorkerCoordination::wait_for_envelope`] polls with
//!    exponential backoff until a non-stale envelope appears, touches the
//!    worker's marker, and returns the payload.
//! 3. Controller: [`ControllerCoordination::wait_for_quorum`] polls the
//!    marker set until the expected count is reached or the timeout passes.
//!
//! The payload is an opaque JSON mapping; the protocol never interprets it.
//!
//! # Modules
//!
//! - [`config`] - env-driven knobs and well-known paths
//! - [`errors`] - the coordination error taxonomy
//! - [`dir`] - coordination directory and atomic file primitives
//! - [`envelope`] - the timestamped state envelope and staleness model
//! - [`controller`] - publish + quorum wait
//! - [`worker`] - envelope wait + acknowledge
//! - [`cli`] - command definitions for the `syncpoint` binary

pub mod backoff;
pub mod cli;
pub mod config;
pub mod controller;
pub mod dir;
pub mod envelope;
pub mod errors;
pub mod worker;

pub use config::{CoordinationConfig, DEFAULT_QUORUM_TIMEOUT};
pub use controller::ControllerCoordination;
pub use dir::CoordinationDir;
pub use envelope::{read_envelope, EnvelopeRead, StateEnvelope};
pub use errors::{CoordinationError, Result};
pub use worker::{initialize_worker, WorkerCoordination};
