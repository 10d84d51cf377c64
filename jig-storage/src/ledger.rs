use borsh::BorshDeserialize;
use tracing::debug;

use jig_types::output::Output;
use jig_types::package::PkgData;
use jig_types::pointer::Pointer;
use jig_types::primitives::{Address, OutputId, PackageId};

use crate::error::StorageError;
use crate::traits::{BatchOp, BatchWriter};

const OUTPUT_PREFIX: &[u8] = b"output:";
const TIP_PREFIX: &[u8] = b"tip:";
const PACKAGE_PREFIX: &[u8] = b"pkg:";
const ADDRESS_PREFIX: &[u8] = b"addr:";

/// Ledger view over a key-value store.
///
/// Every output version ever produced is kept under its id. For each origin
/// a tip entry points at the latest version, and address-locked tips are
/// indexed by address. Packages are stored by id.
pub struct LedgerStore<S: BatchWriter> {
    store: S,
}

fn make_key(prefix: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let len = prefix.len() + parts.iter().map(|p| p.len()).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    key.extend_from_slice(prefix);
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

fn decode<T: BorshDeserialize>(bytes: &[u8]) -> Result<T, StorageError> {
    T::try_from_slice(bytes).map_err(|e| StorageError::DeserializationError {
        reason: e.to_string(),
    })
}

impl<S: BatchWriter> LedgerStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Load an output version by id.
    pub fn output_by_id(&self, id: &OutputId) -> Result<Option<Output>, StorageError> {
        match self.store.get(&make_key(OUTPUT_PREFIX, &[id]))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load the latest version of the object with the given origin.
    pub fn output_by_origin(&self, origin: &Pointer) -> Result<Option<Output>, StorageError> {
        match self.tip_id(origin)? {
            Some(id) => self.output_by_id(&id),
            None => Ok(None),
        }
    }

    fn tip_id(&self, origin: &Pointer) -> Result<Option<OutputId>, StorageError> {
        match self
            .store
            .get(&make_key(TIP_PREFIX, &[&origin.to_bytes()]))?
        {
            Some(bytes) => {
                let id: OutputId =
                    bytes
                        .as_slice()
                        .try_into()
                        .map_err(|_| StorageError::DeserializationError {
                            reason: format!("tip for {origin} is {} bytes", bytes.len()),
                        })?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Latest versions of every object currently locked to `address`.
    pub fn outputs_by_address(&self, address: &Address) -> Result<Vec<Output>, StorageError> {
        let mut outputs = Vec::new();
        for (_, id_bytes) in self
            .store
            .prefix_scan(&make_key(ADDRESS_PREFIX, &[address]))?
        {
            let id: OutputId = id_bytes.as_slice().try_into().map_err(|_| {
                StorageError::DeserializationError {
                    reason: "address index entry is not an output id".to_string(),
                }
            })?;
            if let Some(output) = self.output_by_id(&id)? {
                outputs.push(output);
            }
        }
        Ok(outputs)
    }

    pub fn has_package(&self, id: &PackageId) -> Result<bool, StorageError> {
        self.store.exists(&make_key(PACKAGE_PREFIX, &[id]))
    }

    pub fn package(&self, id: &PackageId) -> Result<Option<PkgData>, StorageError> {
        match self.store.get(&make_key(PACKAGE_PREFIX, &[id]))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn add_package(&self, pkg: &PkgData) -> Result<(), StorageError> {
        self.commit(&[], std::slice::from_ref(pkg))
    }

    /// Store an output and make it the tip of its origin.
    pub fn add_output(&self, output: &Output) -> Result<(), StorageError> {
        self.commit(std::slice::from_ref(output), &[])
    }

    /// Atomically store new outputs (replacing their origin tips and address
    /// index entries) and deployed packages.
    pub fn commit(&self, outputs: &[Output], packages: &[PkgData]) -> Result<(), StorageError> {
        let mut ops = Vec::new();
        for output in outputs {
            let id = output.id();
            let origin = output.origin.to_bytes();

            if let Some(previous) = self.output_by_origin(&output.origin)? {
                if let Some(prev_addr) = previous.lock.as_address() {
                    ops.push(BatchOp::delete(make_key(
                        ADDRESS_PREFIX,
                        &[&prev_addr, &origin],
                    )));
                }
            }

            ops.push(BatchOp::put(make_key(OUTPUT_PREFIX, &[&id]), output.to_bytes()));
            ops.push(BatchOp::put(make_key(TIP_PREFIX, &[&origin]), id.to_vec()));
            if let Some(addr) = output.lock.as_address() {
                ops.push(BatchOp::put(
                    make_key(ADDRESS_PREFIX, &[&addr, &origin]),
                    id.to_vec(),
                ));
            }
        }
        for pkg in packages {
            let bytes = pkg.to_bytes().map_err(|e| StorageError::SerializationError {
                reason: e.to_string(),
            })?;
            ops.push(BatchOp::put(make_key(PACKAGE_PREFIX, &[&pkg.id]), bytes));
        }
        debug!(
            outputs = outputs.len(),
            packages = packages.len(),
            ops = ops.len(),
            "committing to ledger"
        );
        self.store.write_batch(ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use jig_types::abi::{Abi, ABI_VERSION};
    use jig_types::lock::SerializedLock;

    fn output(origin: Pointer, loc_idx: u16, lock: SerializedLock) -> Output {
        Output {
            origin,
            location: Pointer::new([loc_idx as u8; 32], loc_idx),
            class_ptr: Pointer::new([9u8; 32], 0),
            lock,
            state: vec![loc_idx as u8],
        }
    }

    #[test]
    fn test_tip_replaced_and_history_kept() {
        let ledger = LedgerStore::new(MemoryStore::new());
        let origin = Pointer::new([1u8; 32], 0);
        let v1 = output(origin, 1, SerializedLock::frozen());
        let v2 = output(origin, 2, SerializedLock::frozen());
        ledger.add_output(&v1).unwrap();
        ledger.add_output(&v2).unwrap();

        assert_eq!(ledger.output_by_origin(&origin).unwrap(), Some(v2.clone()));
        assert_eq!(ledger.output_by_id(&v1.id()).unwrap(), Some(v1));
        assert_eq!(ledger.output_by_id(&v2.id()).unwrap(), Some(v2));
    }

    #[test]
    fn test_address_index_follows_tip() {
        let ledger = LedgerStore::new(MemoryStore::new());
        let origin = Pointer::new([1u8; 32], 0);
        let alice = [0xAA; 20];
        let bob = [0xBB; 20];
        ledger
            .add_output(&output(origin, 1, SerializedLock::address(&alice)))
            .unwrap();
        assert_eq!(ledger.outputs_by_address(&alice).unwrap().len(), 1);

        ledger
            .add_output(&output(origin, 2, SerializedLock::address(&bob)))
            .unwrap();
        assert!(ledger.outputs_by_address(&alice).unwrap().is_empty());
        let bobs = ledger.outputs_by_address(&bob).unwrap();
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].location.idx, 2);
    }

    #[test]
    fn test_packages() {
        let ledger = LedgerStore::new(MemoryStore::new());
        let pkg = PkgData {
            id: [5u8; 32],
            abi: Abi {
                version: ABI_VERSION,
                exports: vec![],
                imports: vec![],
                objects: vec![],
                type_ids: vec![],
            },
            wasm: vec![1, 2, 3],
            entries: vec![],
            sources: Default::default(),
            docs: vec![],
        };
        assert!(!ledger.has_package(&pkg.id).unwrap());
        ledger.add_package(&pkg).unwrap();
        assert!(ledger.has_package(&pkg.id).unwrap());
        assert_eq!(ledger.package(&pkg.id).unwrap(), Some(pkg));
    }

    #[test]
    fn test_missing_lookups() {
        let ledger = LedgerStore::new(MemoryStore::new());
        assert!(ledger.output_by_id(&[0u8; 32]).unwrap().is_none());
        assert!(ledger
            .output_by_origin(&Pointer::new([0u8; 32], 0))
            .unwrap()
            .is_none());
    }
}
