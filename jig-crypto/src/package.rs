use std::collections::BTreeMap;

use jig_types::error::TypesError;
use jig_types::primitives::PackageId;

/// Content-addressed package id over `(entries, sources)`.
///
/// Entries are sorted and sources are keyed by filename in a sorted map, so
/// neither entry order nor source insertion order affects the id.
pub fn package_id(
    entries: &[String],
    sources: &BTreeMap<String, String>,
) -> Result<PackageId, TypesError> {
    let mut sorted_entries = entries.to_vec();
    sorted_entries.sort();
    sorted_entries.dedup();
    let bytes = borsh::to_vec(&(sorted_entries, sources)).map_err(|e| TypesError::Encode {
        reason: e.to_string(),
    })?;
    Ok(crate::hash::blake3_hash_domain("jig package id v1", &bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE1: &str = "export class Thing extends Jig {}";
    const FILE2: &str = "export class Another extends Jig {}";

    fn sources(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_different_files_different_ids() {
        let entries = vec!["source.ts".to_string()];
        let a = package_id(&entries, &sources(&[("source.ts", FILE1)])).unwrap();
        let b = package_id(&entries, &sources(&[("source.ts", FILE2)])).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_different_entries_different_ids() {
        let srcs = sources(&[("source1.ts", FILE1), ("source2.ts", FILE1)]);
        let a = package_id(&["source1.ts".to_string()], &srcs).unwrap();
        let b = package_id(&["source2.ts".to_string()], &srcs).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_entry_order_irrelevant() {
        let srcs = sources(&[("source1.ts", FILE1), ("source2.ts", FILE1)]);
        let a = package_id(&["source1.ts".into(), "source2.ts".into()], &srcs).unwrap();
        let b = package_id(&["source2.ts".into(), "source1.ts".into()], &srcs).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_source_insertion_order_irrelevant() {
        let entries = vec!["source1.ts".to_string(), "source2.ts".to_string()];
        let mut first = BTreeMap::new();
        first.insert("source1.ts".to_string(), FILE1.to_string());
        first.insert("source2.ts".to_string(), FILE1.to_string());
        let mut second = BTreeMap::new();
        second.insert("source2.ts".to_string(), FILE1.to_string());
        second.insert("source1.ts".to_string(), FILE1.to_string());
        assert_eq!(
            package_id(&entries, &first).unwrap(),
            package_id(&entries, &second).unwrap()
        );
    }
}
