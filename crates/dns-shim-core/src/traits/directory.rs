// # Directory Client Trait
//
// Defines the interface to the remote record store.
//
// ## Implementations
//
// - Pi-hole v6 API: `dns-shim-pihole` crate
//
// ## Usage
//
// ```rust,ignore
// use dns_shim_core::{DirectoryClient, Record};
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let directory = /* DirectoryClient implementation */;
//
//     let hosts = directory.list_address_records().await?;
//     directory.create_address_record(&Record::new("a.lan", "10.0.0.5")).await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::collections::HashSet;

use crate::record::{ActualRecords, Record};

/// Trait for directory API clients
///
/// The engine decides which sub-API a record belongs to (see
/// [`Record::kind`]); implementations only translate each call into one
/// request against their backend.
///
/// # Error contract
///
/// - A create for a record that already exists should fail with
///   [`crate::Error::AlreadyPresent`]. The engine treats it as success.
/// - A delete for a record that does not exist should fail with
///   [`crate::Error::NotFound`]. The engine treats it as success.
/// - Anything else is a recoverable failure retried on the next pass.
///
/// Implementations must not retry internally. One call, one request.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// List all published address (host) records
    async fn list_address_records(&self) -> Result<HashSet<Record>, crate::Error>;

    /// List all published alias (CNAME) records
    async fn list_alias_records(&self) -> Result<HashSet<Record>, crate::Error>;

    /// Publish an address record
    async fn create_address_record(&self, record: &Record) -> Result<(), crate::Error>;

    /// Withdraw an address record
    async fn delete_address_record(&self, record: &Record) -> Result<(), crate::Error>;

    /// Publish an alias record
    async fn create_alias_record(&self, record: &Record) -> Result<(), crate::Error>;

    /// Withdraw an alias record
    async fn delete_alias_record(&self, record: &Record) -> Result<(), crate::Error>;

    /// Get the directory backend name (for logging/debugging)
    fn directory_name(&self) -> &'static str;

    /// Fetch a full snapshot of both record lists
    async fn fetch_actual(&self) -> Result<ActualRecords, crate::Error> {
        let addresses = self.list_address_records().await?;
        let aliases = self.list_alias_records().await?;
        Ok(ActualRecords::new(addresses, aliases))
    }
}
