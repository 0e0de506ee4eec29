//! coa-approval: out-of-band certificate approval by email.
//!
//! The [`TokenBroker`] mints a bearer token bound to a snapshot of the
//! certificate, the mailer sends approve/reject/preview links carrying it,
//! and the approver's click decides the snapshot. The [`Reconciler`] later
//! copies decided snapshots into the durable certificate store.

pub mod broker;
pub mod clock;
pub mod email;
pub mod links;
pub mod mailer;
pub mod reconcile;
pub mod token;

pub use broker::{BrokerError, DecisionResult, IssuedToken, TokenBroker, UnsyncedDecision, DEFAULT_TOKEN_TTL};
pub use clock::{Clock, ManualClock, SystemClock};
pub use email::{render_approval_email, EmailMessage};
pub use links::{app_preview_url, ApprovalLinks, LinkError};
pub use mailer::{HttpMailer, LogMailer, MailError, Mailer, SentMail};
pub use reconcile::{ReconcileReport, Reconciler};
pub use token::generate_token;
