//! Negotiation engine: live sessions, event routing, and lifecycle.
//!
//! # Architecture
//!
//! [`service::NegotiationEngine`] is the facade interfaces call. Each
//! started negotiation gets a [`session::NegotiationSession`] held in the
//! [`registry::SessionRegistry`]; the session spawns one worker task per
//! supplier conversation, so work for the same (negotiation, supplier)
//! pair runs strictly in arrival order while distinct pairs proceed
//! concurrently. Inbound events enter through [`router::EventRouter`],
//! which resolves by thread key first and sender address second, and
//! records anything unresolvable as an orphaned event.
//!
//! Sessions are process-local. The store is the durable record; a
//! restarted process serves status and transcripts from it but does not
//! resume in-flight conversations.

pub mod registry;
pub mod router;
pub mod service;
pub mod session;
