//! Mail plumbing: recipient rewriting, outbound dispatch, inbound
//! classification, and bounce handling.

pub mod address;
pub mod bounce;
pub mod inbound;
pub mod outbound;

pub use address::{Recipients, extract_addrs, resolve};
pub use inbound::{InboundMail, InboundOutcome};
pub use outbound::{
    Dispatched, LoggingMailTransport, MailBody, MailDispatcher, MailTransport,
    MemoryMailTransport, OutboundEmail, SmtpMailTransport,
};
