//! Policies for crash recovery:
//!  - [`RecoveryPolicy`] for restart delays, burst detection, and degradation.
//!
//! ## Overview
//! A crashed slot is restarted after an exponential backoff capped at a
//! maximum delay. Restarts are grouped into **bursts**: a slot that has been
//! stable for longer than the burst-reset window starts counting from one
//! again. A slot that keeps crashing inside the degradation window is
//! declared degraded and left alone for inspection.

mod recovery;

pub use recovery::{RecoveryDecision, RecoveryPolicy};
