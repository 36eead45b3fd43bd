//! HTTP proxy adapter
//!
//! The ingress and egress twins share the same toolkit: an incremental
//! head parser ([`parse`]), owned head types with byte-exact serialization
//! ([`head`]), and a per-direction byte cache ([`cache`]). Each twin is a
//! small state machine that switches between tunneling and relaying on the
//! fly without losing bytes already buffered.

pub mod cache;
pub mod egress;
pub mod head;
pub mod ingress;
pub mod parse;

pub use egress::{EgressReader, EgressWriter, HttpEgress};
pub use ingress::{HttpIngress, IngressReader, IngressWriter};
