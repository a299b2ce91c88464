//! Mail channel - the email boundary of haggler
//!
//! This crate owns both directions of gateway traffic:
//! - **Envelopes** (`envelope`) - normalized inbound email shapes
//! - **Transport** (`transport`) - inbound gateway connection (connect,
//!   pull, acknowledge)
//! - **Runner** (`runner`) - pump loop with reconnection and at-least-once
//!   hand-off to the engine
//! - **Mailer** (`mailer`) - outbound send with HTTP relay and local doubles
//!
//! # Architecture
//!
//! ```text
//! Mail Gateway → MailTransport → MailboxRunner → InboundSink (event router)
//!                                                      ↓
//!                            Mailer ← negotiation engine replies
//! ```
//!
//! # Key Types
//!
//! - `MailboxRunner` - inbound event loop; acks an envelope only after the
//!   sink accepts it, so failed hand-offs are redelivered
//! - `MailTransport` / `InboundSink` - the two seams test doubles plug into
//! - `Mailer` - outbound trait with `HttpRelayMailer`, `NoopMailer`, and
//!   `RecordingMailer` implementations

pub mod envelope;
pub mod mailer;
pub mod runner;
pub mod transport;
