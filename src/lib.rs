pub mod audit;
pub mod config;
pub mod connectivity;
pub mod dates;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod models;
pub mod proxy;
pub mod reports;
pub mod settings;
pub mod store;
pub mod sync;

pub use config::{ProxyConfig, SyncConfig};
pub use connectivity::{ConnectivityMonitor, HttpReachability, NetworkStatus, ReachabilityCheck};
pub use dates::{normalize, try_normalize, CanonicalInstant, DateInput};
pub use error::AppError;
pub use gateway::{GatewayError, HttpGateway, RemoteGateway, RemoteRequest};
pub use models::{Budget, SyncPhase, SyncReport, SyncStatus, Transaction, TransactionInput, TxType};
pub use store::LocalStore;
pub use sync::{SyncCoordinator, SyncOutcome, SyncTrigger};
