//! Client-side core of the invoicing app: session bootstrap, navigation,
//! client directory, and the invoice creation flow, all talking to the
//! hosted account and record service through [`PersistenceGateway`].

pub mod clients;
pub mod computation;
pub mod error;
pub mod gateway;
pub mod history;
pub mod http;
pub mod invoice;
pub mod navigation;
pub mod remote;
pub mod session;

pub use clients::ClientDirectoryService;
pub use computation::Totals;
pub use error::InvoiceError;
pub use gateway::{AuthSubscription, PersistenceGateway};
pub use history::{DashboardStats, InvoiceHistory};
pub use http::{HttpRemoteConfig, HttpRemoteService};
pub use invoice::{
    CompletionCallback, InvoiceDraft, InvoiceLifecycleController, ItemUpdate, LifecyclePhase,
    SubmitAs,
};
pub use navigation::{AppPage, NavigationRouter, ResolvedPage, Screen, SidebarEntry};
pub use remote::RemoteService;
pub use session::{BootstrapDisposer, BootstrapState, PageDecision, SessionBootstrapController};

#[cfg(test)]
#[path = "tests/support.rs"]
mod support;

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod http_tests;
