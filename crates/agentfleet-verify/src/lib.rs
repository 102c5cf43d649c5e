//! agentfleet-verify: the gate every fleet and template passes before it
//! may provision.
//!
//! ```text
//! register_fleet ──► pending fleets (Mutex)      ──┐
//! register_template ► pending templates (Mutex)  ──┤ run_pass()
//!                                                  ▼
//!   fleet:    credentials + sanity ─► authoritative VM count ─► reconcile
//!   template: image | network | storage | admin creds  (concurrent, bounded)
//! ```
//!
//! Failures keep the entry pending with an updated status message; every
//! pass retries it. Entries whose fleet or template disappeared are dropped.

pub mod gate;

pub use gate::{TemplateKey, VerificationGate, VerificationReport};
