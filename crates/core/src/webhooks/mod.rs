//! Push channel lifecycle and notification ingress

mod ingress;
mod registration;
mod renewal;

pub use ingress::{IgnoreReason, IngressDecision, WebhookIngress};
pub use registration::WebhookRegistrationService;
pub use renewal::{ChannelRenewalService, RenewalSettings};
