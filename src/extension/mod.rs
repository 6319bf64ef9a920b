//! The extension side: applying cookies to a browser cookie store, the
//! background message protocol, and the API client.

pub mod applier;
pub mod client;
pub mod messages;
pub mod store;

pub use applier::{ApplyError, BatchError, BatchReport, CookieApplier};
pub use client::{ApiClient, ClientError};
pub use messages::{BackgroundWorker, ExtensionMessage, PlanChecker, PlanStatus, TabController, TabError};
pub use store::{AppliedCookie, CookieStore, HostPolicy, JarCookieStore, SetCookieDetails, StoreError};
