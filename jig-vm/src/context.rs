use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use jig_types::output::Output;
use jig_types::package::PkgData;
use jig_types::pointer::Pointer;
use jig_types::primitives::{OutputId, PackageId, PublicKey, TxHash};

use crate::error::ExecError;

/// Everything a transaction execution needs from the outside world.
///
/// Reads are synchronous; compiling a deployed package is the only
/// asynchronous step.
#[async_trait]
pub trait ExecContext: Send + Sync {
    fn tx_hash(&self) -> TxHash;

    /// Unspent output with the given id.
    fn output_by_id(&self, id: &OutputId) -> Result<Output, ExecError>;

    /// Latest output of the jig with the given origin.
    fn input_by_origin(&self, origin: &Pointer) -> Result<Output, ExecError>;

    fn wasm_from_pkg_id(&self, id: &PackageId) -> Result<Arc<PkgData>, ExecError>;

    async fn compile(
        &self,
        entries: Vec<String>,
        sources: BTreeMap<String, String>,
    ) -> Result<PkgData, ExecError>;

    /// Verified signer public keys of the transaction.
    fn signers(&self) -> Vec<PublicKey>;
}
