//! Spam report over a mail backend.
//!
//! Takes a list of email addresses, some of which are aliases of the same
//! user, and reports every message of every distinct user with its spam
//! verdict. The backend limits how many users one message lookup accepts and
//! how many spam checks may run at once; the pipeline stays within both.

mod models;
mod service;
mod stages;

pub use models::{MsgData, MsgId, User};
pub use service::{
    Latency, MailService, MailServiceBuilder, MessageStore, ServiceLimits, ServiceStats,
    SpamChecker, UserDirectory,
};
pub use stages::{
    spam_report_pipeline, stage_names, MessageFetch, SpamCheck, SpamServices, UserLookup,
};
