use alloy_primitives::Address;
use keel_deploy::DeploymentLedger;
use keel_deploy::artifacts::parse_abi;

const ABI: &str = r#"[{"type": "constructor", "inputs": [{"name": "supply", "type": "uint256"}], "stateMutability": "nonpayable"}, {"type": "event", "name": "Transfer", "anonymous": false, "inputs": [{"name": "from", "type": "address", "indexed": true}]}]"#;

fn addr(b: u8) -> Address {
    Address::repeat_byte(b)
}

fn hash(b: u8) -> String {
    format!("0x{}", format!("{b:02x}").repeat(32))
}

#[test]
fn test_round_trip_through_a_fresh_instance() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("metafile.json");
    let abi = parse_abi(ABI).unwrap();

    let ledger = DeploymentLedger::open(&path);
    ledger.add("Token", 1337, addr(0xaa), &abi, &hash(1)).unwrap();
    ledger.add("Token", 1, addr(0xbb), &abi, &hash(2)).unwrap();
    ledger.add_account(addr(0xcc)).unwrap();
    ledger.set_default_account(addr(0xdd)).unwrap();

    let reopened = DeploymentLedger::open(&path);
    assert_eq!(reopened.latest_hash("Token", 1337).unwrap(), Some(hash(1)));
    assert_eq!(reopened.latest_hash("Token", 1).unwrap(), Some(hash(2)));
    let record = reopened.latest_deployment("Token", 1).unwrap().unwrap();
    assert_eq!(record.address().unwrap(), addr(0xbb));
    assert_eq!(record.abi, abi);
    assert!(reopened.account_known(addr(0xcc)).unwrap());
    assert_eq!(reopened.get_default_account().unwrap(), Some(addr(0xdd)));
}

#[test]
fn test_file_layout() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("metafile.json");
    let ledger = DeploymentLedger::open(&path);
    ledger.add("Token", 1337, addr(0xaa), &[], &hash(1)).unwrap();
    ledger.set_default_account(addr(0xdd)).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let network = &raw["contracts"][0]["networks"]["1337"];
    assert_eq!(raw["contracts"][0]["name"], "Token");
    assert_eq!(network["deployedHash"], hash(1));
    assert_eq!(network["deployedInstances"][0]["hash"], hash(1));
    assert!(network["deployedInstances"][0]["date"].as_str().unwrap().ends_with('Z'));
    assert_eq!(
        network["deployedInstances"][0]["address"],
        addr(0xaa).to_checksum(None)
    );
    assert_eq!(raw["seenAccounts"][0], addr(0xdd).to_checksum(None));
    assert_eq!(raw["defaultAccount"], addr(0xdd).to_checksum(None));
}

#[test]
fn test_mutations_see_external_edits() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("metafile.json");
    let first = DeploymentLedger::open(&path);
    let second = DeploymentLedger::open(&path);

    first.add("A", 1337, addr(1), &[], &hash(1)).unwrap();
    second.add("B", 1337, addr(2), &[], &hash(2)).unwrap();

    first.reload();
    let names: Vec<String> = first
        .get_all_contracts()
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, ["A", "B"]);
}

#[test]
fn test_cleanup_keeps_official_chains() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("metafile.json");
    let ledger = DeploymentLedger::open(&path);
    ledger.add("Token", 100, addr(1), &[], &hash(1)).unwrap();
    ledger.add("Token", 101, addr(2), &[], &hash(2)).unwrap();
    ledger.add("Token", 1337, addr(3), &[], &hash(3)).unwrap();
    ledger.add("Other", 1, addr(4), &[], &hash(4)).unwrap();

    let before = std::fs::read_to_string(&path).unwrap();
    let pending = ledger.cleanup(true).unwrap();
    assert_eq!(
        pending,
        [("Token".to_string(), 101), ("Token".to_string(), 1337)]
    );
    assert_eq!(std::fs::read_to_string(&path).unwrap(), before);

    let removed = ledger.cleanup(false).unwrap();
    assert_eq!(removed, pending);

    let reopened = DeploymentLedger::open(&path);
    let token = reopened.get_contract("Token").unwrap().unwrap();
    assert_eq!(token.networks.keys().copied().collect::<Vec<_>>(), [100]);
    assert!(reopened.latest_hash("Other", 1).unwrap().is_some());
    assert!(reopened.cleanup(true).unwrap().is_empty());
}

#[test]
fn test_backup_of_a_populated_ledger() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("metafile.json");
    let ledger = DeploymentLedger::open(&path);
    ledger.add("Token", 1, addr(1), &[], &hash(1)).unwrap();

    let dest = tmp.path().join("backups").join("metafile.json.bak");
    assert!(ledger.backup(&dest).unwrap());
    let copy = DeploymentLedger::open(&dest);
    assert_eq!(copy.latest_hash("Token", 1).unwrap(), Some(hash(1)));
}

#[test]
fn test_cleanup_dry_run_sees_writes_from_another_instance() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("metafile.json");
    let first = DeploymentLedger::open(&path);
    let second = DeploymentLedger::open(&path);

    first.add("Token", 1, addr(1), &[], &hash(1)).unwrap();
    second.add("Token", 1337, addr(2), &[], &hash(2)).unwrap();

    let pending = first.cleanup(true).unwrap();
    assert_eq!(pending, [("Token".to_string(), 1337)]);
    assert_eq!(first.cleanup(false).unwrap(), pending);
    assert!(first.latest_hash("Token", 1).unwrap().is_some());
}
