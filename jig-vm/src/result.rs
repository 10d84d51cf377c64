use jig_types::output::Output;
use jig_types::package::PkgData;
use jig_types::pointer::Pointer;
use jig_types::primitives::TxHash;

/// Everything a finalized transaction produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub tx_hash: TxHash,
    /// New states of every affected jig, in affected order.
    pub outputs: Vec<Output>,
    /// Previous outputs of affected jigs that already existed.
    pub spends: Vec<Output>,
    /// Outputs that were hydrated but left untouched.
    pub reads: Vec<Output>,
    pub deploys: Vec<PkgData>,
    /// Total billable hydros across every counter.
    pub hydros_used: u64,
}

impl ExecutionResult {
    /// New output of the jig with `origin`, if the transaction touched it.
    pub fn output_for(&self, origin: &Pointer) -> Option<&Output> {
        self.outputs.iter().find(|o| &o.origin == origin)
    }
}
