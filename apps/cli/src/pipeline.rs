//! Pipeline steps shared by the `aggregate` and `run` commands.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use dropcraft_aggregator::{
    allocate_budget, exclude, ingest_calls, ingest_contributions, load_address_set, load_calls,
    load_contributions, merge, DecoderRegistry, DeltaLedger,
};
use dropcraft_core::{format_units, keccak256, Address, ContributionMap};
use dropcraft_distribution::{Checkpoint, Distribution, DistributionDocument};
use dropcraft_normalizer::{normalize_with_report, NormalizeParams};
use dropcraft_settings::{Settings, SourceFormat};

/// First four bytes of keccak-256, hex encoded.
fn short_digest(data: &[u8]) -> String {
    hex::encode(&keccak256(data)[..4])
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Ledger key for a source: its name tagged with a digest of its file, so
/// an edited file is scanned again under a new key.
fn ledger_key(name: &str, path: &Path) -> Result<String> {
    Ok(format!("{}-{}", name, short_digest(&read_file(path)?)))
}

/// Digest of everything the aggregated contribution map depends on.
pub fn input_fingerprint(settings: &Settings) -> Result<String> {
    let mut preimage = serde_json::to_vec(&settings.sources)?;
    for path in settings.sources.iter().map(|s| &s.file).chain(&settings.exclude) {
        preimage.extend_from_slice(&keccak256(&read_file(&settings.resolve_path(path))?));
    }
    Ok(short_digest(&preimage))
}

/// Union of every configured exclusion list.
pub fn excluded_addresses(settings: &Settings) -> Result<BTreeSet<Address>> {
    let mut previous = BTreeSet::new();
    for path in &settings.exclude {
        let path = settings.resolve_path(path);
        let set = load_address_set(&path)
            .with_context(|| format!("Failed to load exclusion list {}", path.display()))?;
        previous.extend(set);
    }
    Ok(previous)
}

/// Scan every configured source into `ledger` and fold the result into one
/// contribution map (budgets applied, sources merged, exclusions removed).
///
/// Sources whose file is already recorded in the ledger are not rescanned.
pub fn aggregate(settings: &Settings, ledger: &mut DeltaLedger) -> Result<ContributionMap> {
    let registry = DecoderRegistry::renbtc_defaults();
    let recorded: BTreeSet<String> = ledger.sources().into_iter().map(str::to_string).collect();

    let mut maps = Vec::with_capacity(settings.sources.len());
    for source in &settings.sources {
        let path = settings.resolve_path(&source.file);
        let key = ledger_key(&source.name, &path)?;

        if recorded.contains(&key) {
            info!("Source {}: unchanged since last scan, using ledger", source.name);
        } else {
            match source.format {
                SourceFormat::Contributions => {
                    let contributions = load_contributions(&path)
                        .with_context(|| format!("Failed to load source {}", source.name))?;
                    ingest_contributions(ledger, &key, &contributions);
                }
                SourceFormat::Calls => {
                    let calls = load_calls(&path)
                        .with_context(|| format!("Failed to load source {}", source.name))?;
                    ingest_calls(ledger, &registry, &key, &calls)
                        .with_context(|| format!("Failed to decode source {}", source.name))?;
                }
            }
        }

        let mut map = ledger.finalize_source(&key)?;
        if map.is_empty() {
            warn!("Source {}: no contributions", source.name);
            continue;
        }
        if let Some(budget) = source.budget_amount()? {
            map = allocate_budget(&map, budget)
                .with_context(|| format!("Failed to allocate budget for source {}", source.name))?;
        }
        maps.push(map);
    }

    let merged = merge(&maps)?;
    let previous = excluded_addresses(settings)?;
    if previous.is_empty() {
        return Ok(merged);
    }
    Ok(exclude(&merged, &previous))
}

/// Normalize and log what moved.
pub fn normalize_logged(
    contributions: &ContributionMap,
    params: &NormalizeParams,
    decimals: u32,
) -> Result<ContributionMap> {
    let (normalized, report) = normalize_with_report(contributions, params)?;
    report.before.log("Before smoothing", decimals);
    report.after.log("After smoothing", decimals);
    info!(
        "Raised {} recipients to the floor, {} moved from a pool of {} recipients (pool total {})",
        report.boosted,
        format_units(&report.deficit, decimals),
        report.reduced,
        format_units(&report.pool_total, decimals),
    );
    Ok(normalized)
}

/// Aggregate, normalize and commit, reusing checkpointed steps.
///
/// The document is validated and written to the configured output path.
pub fn run<C: Checkpoint>(settings: &Settings, checkpoint: &C) -> Result<DistributionDocument> {
    settings.validate().context("Invalid settings")?;
    let params = settings.smoothing.params()?;
    let inputs = input_fingerprint(settings)?;

    let contributions: ContributionMap =
        checkpoint.compute_or_load(&format!("contributions-{inputs}"), || {
            let ledger_path = settings.ledger_path();
            let mut ledger = DeltaLedger::load(&ledger_path)
                .with_context(|| format!("Failed to load ledger {}", ledger_path.display()))?;
            let contributions = aggregate(settings, &mut ledger)?;
            ledger.flush(&ledger_path)?;
            Ok::<_, anyhow::Error>(contributions)
        })?;
    info!("Aggregated {} contributors", contributions.len());

    let smoothing = serde_json::to_vec(&settings.smoothing)?;
    let name = format!("normalized-{}-{}", inputs, short_digest(&smoothing));
    let normalized: ContributionMap = checkpoint.compute_or_load(&name, || {
        normalize_logged(&contributions, &params, settings.smoothing.decimals)
    })?;

    let document = Distribution::from_contributions(&normalized)?.to_document()?;
    document.validate().context("Generated document failed validation")?;
    document.save(&settings.document_path())?;
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropcraft_aggregator::abi::{encode_call, AbiValue};
    use dropcraft_aggregator::CallRecord;
    use dropcraft_core::{contributions_to_json, Amount};
    use dropcraft_distribution::{JsonCheckpoint, NoCheckpoint};
    use dropcraft_settings::SourceSettings;
    use std::path::PathBuf;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    fn amt(v: u64) -> Amount {
        Amount::from(v)
    }

    fn write_mints(dir: &Path, entries: &[(Address, u64)]) {
        let map: ContributionMap = entries.iter().map(|(a, v)| (*a, amt(*v))).collect();
        std::fs::write(dir.join("mints.json"), contributions_to_json(&map)).unwrap();
    }

    /// `{A:5, C:100}` from a contribution file plus a 25-unit deposit by B.
    fn setup(dir: &Path) -> Settings {
        write_mints(dir, &[(addr(0xa1), 5), (addr(0xc3), 100)]);

        let input = encode_call(
            "deposit(bytes,uint256,bytes32,bytes)",
            &[
                AbiValue::Bytes(vec![1, 2, 3]),
                AbiValue::Uint(amt(25)),
                AbiValue::FixedBytes(vec![7; 32]),
                AbiValue::Bytes(Vec::new()),
            ],
        )
        .unwrap();
        let calls = vec![CallRecord {
            from: addr(0xb2),
            input: format!("0x{}", hex::encode(input)),
            amount: None,
            hash: Some("0xdeadbeef".to_string()),
        }];
        std::fs::write(dir.join("deposits.json"), serde_json::to_string(&calls).unwrap()).unwrap();

        let mut settings = Settings::load_from(&dir.join("settings.json")).unwrap();
        settings.smoothing.threshold = "20".to_string();
        settings.smoothing.surplus_band = "5".to_string();
        settings.sources = vec![
            SourceSettings {
                name: "mints".to_string(),
                file: PathBuf::from("mints.json"),
                format: SourceFormat::Contributions,
                budget: None,
            },
            SourceSettings {
                name: "deposits".to_string(),
                file: PathBuf::from("deposits.json"),
                format: SourceFormat::Calls,
                budget: None,
            },
        ];
        settings
    }

    #[test]
    fn test_aggregate_merges_sources() {
        let dir = tempfile::tempdir().unwrap();
        let settings = setup(dir.path());

        let mut ledger = DeltaLedger::new();
        let map = aggregate(&settings, &mut ledger).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map[&addr(0xb2)], amt(25));
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_run_worked_example() {
        let dir = tempfile::tempdir().unwrap();
        let settings = setup(dir.path());
        let checkpoint = JsonCheckpoint::new(settings.checkpoint_dir());

        let document = run(&settings, &checkpoint).unwrap();
        assert_eq!(document.token_total, amt(130));
        assert_eq!(document.claims[&addr(0xa1)].amount, amt(20));
        assert_eq!(document.claims[&addr(0xb2)].amount, amt(25));
        assert_eq!(document.claims[&addr(0xc3)].amount, amt(85));
        assert!(document.verify_claim(&addr(0xb2)).unwrap());

        let saved = DistributionDocument::load(&settings.document_path()).unwrap();
        assert_eq!(saved, document);
        assert_eq!(std::fs::read_dir(settings.checkpoint_dir()).unwrap().count(), 2);

        // Second run is served from checkpoints and leaves the ledger alone.
        let again = run(&settings, &checkpoint).unwrap();
        assert_eq!(again, document);
        assert_eq!(DeltaLedger::load(&settings.ledger_path()).unwrap().len(), 3);
    }

    #[test]
    fn test_unchanged_sources_not_rescanned() {
        let dir = tempfile::tempdir().unwrap();
        let settings = setup(dir.path());

        run(&settings, &NoCheckpoint).unwrap();
        run(&settings, &NoCheckpoint).unwrap();
        assert_eq!(DeltaLedger::load(&settings.ledger_path()).unwrap().len(), 3);

        write_mints(dir.path(), &[(addr(0xa1), 10), (addr(0xc3), 100)]);
        let document = run(&settings, &NoCheckpoint).unwrap();
        assert_eq!(DeltaLedger::load(&settings.ledger_path()).unwrap().len(), 5);
        assert_eq!(document.token_total, amt(135));
        assert_eq!(document.claims[&addr(0xa1)].amount, amt(20));
    }

    #[test]
    fn test_exclusion_and_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = setup(dir.path());
        std::fs::write(
            dir.path().join("previous.json"),
            serde_json::to_string(&vec![addr(0xa1).to_checksum()]).unwrap(),
        )
        .unwrap();
        settings.exclude = vec![PathBuf::from("previous.json")];
        settings.sources[0].budget = Some("1000".to_string());

        let mut ledger = DeltaLedger::new();
        let map = aggregate(&settings, &mut ledger).unwrap();
        assert!(!map.contains_key(&addr(0xa1)));
        // 100 of 105 weight in the mints budget
        assert_eq!(map[&addr(0xc3)], amt(952));
        assert_eq!(map[&addr(0xb2)], amt(25));
    }

    #[test]
    fn test_fingerprint_tracks_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let settings = setup(dir.path());
        let before = input_fingerprint(&settings).unwrap();
        assert_eq!(input_fingerprint(&settings).unwrap(), before);

        write_mints(dir.path(), &[(addr(0xa1), 6), (addr(0xc3), 100)]);
        assert_ne!(input_fingerprint(&settings).unwrap(), before);
    }

    #[test]
    fn test_run_refuses_corrupt_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let settings = setup(dir.path());
        run(&settings, &NoCheckpoint).unwrap();
        std::fs::remove_file(settings.document_path()).unwrap();

        // Drop one of the mints deltas mid-file; the mints key stays recorded.
        let ledger_path = settings.ledger_path();
        let text = std::fs::read_to_string(&ledger_path).unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        lines[1] = "{\"seq\":1,";
        std::fs::write(&ledger_path, format!("{}\n", lines.join("\n"))).unwrap();

        let err = run(&settings, &NoCheckpoint).unwrap_err();
        assert!(format!("{err:#}").contains("Corrupt ledger at line 2"));
        assert!(!settings.document_path().exists());
    }

    #[test]
    fn test_run_rejects_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = setup(dir.path());
        settings.sources[0].file = PathBuf::from("nope.json");
        assert!(run(&settings, &NoCheckpoint).is_err());
        assert!(!settings.document_path().exists());
    }
}
