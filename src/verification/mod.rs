pub mod api;
pub mod early_stop;

pub use api::{EmailVerifier, MailTesterClient};
pub use early_stop::{EarlyStopOutcome, EarlyStopVerifier};
