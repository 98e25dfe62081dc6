//! # Zeta4G Reactive
//!
//! A reactive, backpressured client adapter for [Zeta4G](https://github.com/zeta9044/zeta4g)
//! and other Bolt graph databases.
//!
//! The crate does not speak the wire protocol itself. A driver implementing
//! [`GraphDriver`] is injected through a [`DriverFactory`], and this crate layers
//! the following on top of it:
//!
//! - **Record streams** - push-style, pausable and cancellable result streams
//!   with a bounded delivery queue and guaranteed commit/close of the owning
//!   transaction
//! - **Shared drivers** - name-keyed, reference-counted driver sharing across
//!   logical clients
//! - **Managed transactions** - one-shot `execute`, `find`, `find_one`,
//!   `delete` and `bulk_write`
//! - **Execution contexts** - user callbacks always run on the caller's context
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use zeta4g_reactive::{ClientOptions, GraphClient, MemoryDriver, ScriptedResult, SharedDriverRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = MemoryDriver::new()
//!         .with_result("MATCH (n) RETURN n", ScriptedResult::sequence("n", 1..=3));
//!
//!     let registry = SharedDriverRegistry::new();
//!     let client = GraphClient::create_shared(&registry, ClientOptions::new(), driver.factory())?;
//!
//!     let stream = client.query_stream("MATCH (n) RETURN n").await?;
//!     stream
//!         .exception_handler(|err| eprintln!("Stream failed: {}", err))
//!         .end_handler(|| println!("Done"))
//!         .handler(|record| println!("{:?}", record));
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Pacing
//!
//! ```rust,no_run
//! # use zeta4g_reactive::{GraphClient, ClientResult};
//! # async fn example(client: &GraphClient) -> ClientResult<()> {
//! let stream = client.query_stream("MATCH (n) RETURN n").await?;
//!
//! // Explicit demand: deliver two records, then wait for more fetch() calls
//! stream.pause().handler(|record| println!("{:?}", record)).fetch(2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Pull-Style Consumption
//!
//! ```rust,no_run
//! # use zeta4g_reactive::{GraphClient, ClientResult};
//! # async fn example(client: &GraphClient) -> ClientResult<()> {
//! let records = client
//!     .query_stream("MATCH (n) RETURN n")
//!     .await?
//!     .into_stream(32)
//!     .try_collect()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`client`] - Client, record stream, shared registry and driver traits
//!

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod client;

// Re-exports for convenience
pub use client::{
    GraphClient, ClientOptions, AuthOptions, EncryptionOptions, TrustStrategy,
    SharedDriverRegistry, DEFAULT_POOL_NAME,
    RecordStream, ReactiveRecordStream, StreamConfig, StreamState,
    ClientTransaction, Record, Value, Query, Counters, ResultSummary,
    ClientError, ClientResult,
    AccessMode, DriverFactory, GraphDriver, GraphSession, GraphTransaction, ResultCursor,
    MemoryDriver, ScriptedResult,
};
