//! # crmsync Client
//!
//! The remote side of [`crmsync_engine`]: a blocking OData client for the
//! CRM's REST endpoint, its session handling and its configuration.
//!
//! ```no_run
//! use crmsync_client::{ClientConfig, ODataClient};
//! use crmsync_engine::{MemoryStore, Synchronizer};
//!
//! let config = ClientConfig::from_env()?;
//! let remote = ODataClient::from_config(&config)?;
//! let sync = Synchronizer::new(MemoryStore::new(), remote, config.sync.clone());
//! # let _ = sync;
//! # Ok::<(), crmsync_client::ClientError>(())
//! ```

pub mod config;
pub mod error;
pub mod odata;
pub mod session;

pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, Result};
pub use odata::{ListParams, ODataClient};
pub use session::{CredentialProvider, Session, SessionToken, StaticCredentials};
