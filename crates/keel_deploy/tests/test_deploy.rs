use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use alloy_primitives::{Address, B256, Bytes, U256};
use keel_chain::{
    ChainClient, DevChain, KeyStore, NetworkDefinition, PasswordPrompt, TransactionReceipt,
    TransactionRequest,
};
use keel_core::{KeelConfig, KeelError, ProjectContext, Result};
use keel_deploy::*;
use zeroize::Zeroizing;

const PH_LIB: &str = "$13811623e8434e588b8942cf9304d14b96$";
const LIB_V1: &str = "6080604052348015600f57600080fd5b50603f80601d6000396000f3fe";
const LIB_V2: &str = "6080604052348015600f57600080fd5b50604080601d6000396000f3fe";
const TEST_CODE: &str = "608060405234801561001057600080fd5b50610150806100206000396000f3fe";
const TEST_ABI: &str = r#"[{"type": "function", "name": "get", "inputs": [], "outputs": [{"name": "", "type": "uint256"}], "stateMutability": "view"}]"#;

fn main_code() -> String {
    format!(
        "6080604052348015600f5773__{PH_LIB}__6040\n\n// {PH_LIB} -> /project/contracts/Lib.sol:Lib\n"
    )
}

fn write_contract(project: &Path, name: &str, bin: &str, abi: &str) {
    let dir = project.join("build").join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(format!("{name}.bin")), bin).unwrap();
    std::fs::write(dir.join(format!("{name}.abi")), abi).unwrap();
}

fn context(project: &Path) -> ProjectContext {
    let config = KeelConfig {
        keystore_dir: project.join("keystore"),
        ..Default::default()
    };
    ProjectContext::new(project, config)
}

fn deployer(project: &Path, chain: Arc<dyn ChainClient>) -> Deployer {
    Deployer::with_client(
        context(project),
        NetworkDefinition::implicit_test(),
        chain,
        None,
        None,
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// Single contract
// ---------------------------------------------------------------------------

#[test]
fn test_single_contract_deploys_exactly_once() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Test", TEST_CODE, TEST_ABI);
    let chain = Arc::new(DevChain::new());
    let deployer = deployer(tmp.path(), chain.clone());

    assert_eq!(
        deployer.plan().unwrap().state("Test"),
        Some(ContractState::NeverDeployed)
    );
    assert!(deployer.check_needs_deploy(Some("Test")).unwrap());

    let report = deployer.ensure_deployed().unwrap();
    assert_eq!(report.transactions, 1);
    assert_eq!(report.names(), ["Test"]);
    assert_eq!(chain.transaction_count(), 1);

    let entry = deployer.ledger().get_contract("Test").unwrap().unwrap();
    let network = &entry.networks[&deployer.chain_id()];
    assert_eq!(network.deployed_instances.len(), 1);
    assert_eq!(network.deployed_hash, network.deployed_instances[0].hash);

    let again = deployer.ensure_deployed().unwrap();
    assert_eq!(again.transactions, 0);
    assert_eq!(chain.transaction_count(), 1);
    assert!(!deployer.check_needs_deploy(None).unwrap());
}

#[test]
fn test_get_deployed_returns_latest_instance() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Test", TEST_CODE, TEST_ABI);
    let chain = Arc::new(DevChain::new());
    let deployer = deployer(tmp.path(), chain.clone());

    assert!(deployer.get_deployed("Test").unwrap_err().is_not_found());

    let report = deployer.ensure_deployed().unwrap();
    let handle = deployer.get_deployed("Test").unwrap();
    assert_eq!(handle.address, report.deployed[0].address);
    assert_eq!(handle.abi.len(), 1);
    assert_eq!(handle.chain_id, chain.chain_id().unwrap());
    assert!(!chain.get_code(handle.address).unwrap().is_empty());
}

#[test]
fn test_unknown_contract_name_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Test", TEST_CODE, TEST_ABI);
    let deployer = deployer(tmp.path(), Arc::new(DevChain::new()));
    assert!(
        deployer
            .check_needs_deploy(Some("Nope"))
            .unwrap_err()
            .is_not_found()
    );
}

#[test]
fn test_interfaces_are_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "IThing", "", "[]");
    write_contract(tmp.path(), "Test", TEST_CODE, TEST_ABI);
    let deployer = deployer(tmp.path(), Arc::new(DevChain::new()));

    assert_eq!(deployer.contracts_to_deploy().unwrap(), ["Test"]);
    assert_eq!(deployer.ensure_deployed().unwrap().names(), ["Test"]);
}

// ---------------------------------------------------------------------------
// Libraries
// ---------------------------------------------------------------------------

#[test]
fn test_library_change_redeploys_consumer() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Lib", LIB_V1, "[]");
    write_contract(tmp.path(), "Main", &main_code(), TEST_ABI);
    let chain = Arc::new(DevChain::new());
    let deployer = deployer(tmp.path(), chain.clone());

    let first = deployer.ensure_deployed().unwrap();
    assert_eq!(first.names(), ["Lib", "Main"]);
    let main_before = deployer.get_deployed("Main").unwrap();
    let lib_before = deployer.get_deployed("Lib").unwrap();

    let plan = deployer.plan().unwrap();
    assert_eq!(plan.state("Lib"), Some(ContractState::UpToDate));
    assert_eq!(plan.state("Main"), Some(ContractState::UpToDate));

    // Recompile with a changed library; Main's source is untouched.
    write_contract(tmp.path(), "Lib", LIB_V2, "[]");
    let plan = deployer.plan().unwrap();
    assert_eq!(
        plan.state("Lib"),
        Some(ContractState::NeedsRedeploy(RedeployReason::SelfChanged))
    );
    assert_eq!(
        plan.state("Main"),
        Some(ContractState::NeedsRedeploy(RedeployReason::DependencyChanged))
    );

    let second = deployer.ensure_deployed().unwrap();
    assert_eq!(second.names(), ["Lib", "Main"]);

    let lib_after = deployer.get_deployed("Lib").unwrap();
    let main_after = deployer.get_deployed("Main").unwrap();
    assert_ne!(lib_after.address, lib_before.address);
    assert_ne!(main_after.address, main_before.address);
    assert_eq!(main_after.hash, main_before.hash);

    let code = chain.get_code(main_after.address).unwrap();
    let code_hex = hex::encode(&code);
    assert!(code_hex.contains(&hex::encode(lib_after.address.as_slice())));
    assert!(!code_hex.contains(&hex::encode(lib_before.address.as_slice())));

    let main_entry = deployer.ledger().get_contract("Main").unwrap().unwrap();
    assert_eq!(
        main_entry.networks[&deployer.chain_id()].deployed_instances.len(),
        2
    );
}

#[test]
fn test_consumer_change_leaves_library_alone() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Lib", LIB_V1, "[]");
    write_contract(tmp.path(), "Main", &main_code(), TEST_ABI);
    let chain = Arc::new(DevChain::new());
    let deployer = deployer(tmp.path(), chain.clone());
    deployer.ensure_deployed().unwrap();
    let lib = deployer.get_deployed("Lib").unwrap();

    let changed_main = main_code().replacen("6040", "6041", 1);
    write_contract(tmp.path(), "Main", &changed_main, TEST_ABI);

    let report = deployer.ensure_deployed().unwrap();
    assert_eq!(report.names(), ["Main"]);
    let code = chain.get_code(deployer.get_deployed("Main").unwrap().address).unwrap();
    assert!(hex::encode(&code).contains(&hex::encode(lib.address.as_slice())));
}

#[test]
fn test_missing_library_fails_before_sending() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Main", &main_code(), TEST_ABI);
    let chain = Arc::new(DevChain::new());
    let deployer = deployer(tmp.path(), chain.clone());

    let err = deployer.ensure_deployed().unwrap_err();
    assert!(matches!(err, KeelError::Link(_)));
    assert!(err.to_string().contains("Lib"));
    assert_eq!(chain.transaction_count(), 0);
}

#[test]
fn test_library_from_earlier_deploy_is_linked() {
    let tmp = tempfile::tempdir().unwrap();
    let chain = Arc::new(DevChain::new());
    let deployer = deployer(tmp.path(), chain.clone());

    // Lib was deployed on this chain before but is no longer in the build.
    let lib_address = Address::repeat_byte(0x77);
    deployer
        .ledger()
        .add("Lib", deployer.chain_id(), lib_address, &[], "0x01")
        .unwrap();
    write_contract(tmp.path(), "Main", &main_code(), TEST_ABI);

    deployer.ensure_deployed().unwrap();
    let code = chain.get_code(deployer.get_deployed("Main").unwrap().address).unwrap();
    assert!(hex::encode(&code).contains(&"77".repeat(20)));
}

#[test]
fn test_conflicting_library_sources_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Lib", LIB_V1, "[]");
    write_contract(tmp.path(), "Main", &main_code(), TEST_ABI);
    let other = main_code().replace("/project/contracts/Lib.sol", "/project/vendor/Lib.sol");
    write_contract(tmp.path(), "Other", &other, TEST_ABI);
    let deployer = deployer(tmp.path(), Arc::new(DevChain::new()));

    assert!(matches!(deployer.plan().unwrap_err(), KeelError::Link(_)));
}

// ---------------------------------------------------------------------------
// Constructor arguments
// ---------------------------------------------------------------------------

/// ABI encoding of a small uint256.
fn uint_word(value: u8) -> Bytes {
    let mut word = vec![0u8; 32];
    word[31] = value;
    Bytes::from(word)
}

#[test]
fn test_constructor_args_take_part_in_change_detection() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Test", TEST_CODE, TEST_ABI);
    let chain = Arc::new(DevChain::new());

    let mut deployer = deployer(tmp.path(), chain.clone());
    deployer.set_constructor_args("Test", uint_word(7));
    deployer.ensure_deployed().unwrap();
    assert!(!deployer.check_needs_deploy(Some("Test")).unwrap());

    let code = chain.get_code(deployer.get_deployed("Test").unwrap().address).unwrap();
    assert_eq!(code.last(), Some(&7));

    deployer.set_constructor_args("Test", uint_word(8));
    assert_eq!(
        deployer.plan().unwrap().state("Test"),
        Some(ContractState::NeedsRedeploy(RedeployReason::SelfChanged))
    );
}

// ---------------------------------------------------------------------------
// Accounts and funding
// ---------------------------------------------------------------------------

#[test]
fn test_keystore_account_deploys_with_signed_transaction() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Test", TEST_CODE, TEST_ABI);
    let keystore = KeyStore::new(tmp.path().join("keystore"));
    let account = keystore.create_account("pw").unwrap();
    let chain = Arc::new(DevChain::new());
    chain.fund(account, U256::from(10u64).pow(U256::from(18u64)));

    let deployer = Deployer::with_client(
        context(tmp.path()),
        NetworkDefinition::implicit_test(),
        chain.clone(),
        Some(account),
        Some("pw".into()),
    )
    .unwrap();
    deployer.ensure_deployed().unwrap();

    assert_eq!(chain.get_transaction_count(account).unwrap(), 1);
    assert!(deployer.ledger().account_known(account).unwrap());
}

/// Answers every prompt with a fixed password and counts the calls.
struct FixedPrompt {
    password: &'static str,
    calls: Arc<AtomicUsize>,
}

impl PasswordPrompt for FixedPrompt {
    fn prompt(&self, _address: Address) -> Result<Zeroizing<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Zeroizing::new(self.password.to_string()))
    }
}

#[test]
fn test_locked_keystore_account_prompts_for_password() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Test", TEST_CODE, TEST_ABI);
    let keystore = KeyStore::new(tmp.path().join("keystore"));
    let account = keystore.create_account("pw").unwrap();
    let chain = Arc::new(DevChain::new());
    chain.fund(account, U256::from(10u64).pow(U256::from(18u64)));

    let without_prompt = Deployer::with_client(
        context(tmp.path()),
        NetworkDefinition::implicit_test(),
        chain.clone(),
        Some(account),
        None,
    )
    .unwrap();
    assert!(matches!(
        without_prompt.ensure_deployed().unwrap_err(),
        KeelError::Validation(_)
    ));
    assert_eq!(chain.transaction_count(), 0);

    let calls = Arc::new(AtomicUsize::new(0));
    let deployer = Deployer::with_client(
        context(tmp.path()),
        NetworkDefinition::implicit_test(),
        chain.clone(),
        Some(account),
        None,
    )
    .unwrap()
    .with_prompt(Box::new(FixedPrompt {
        password: "pw",
        calls: calls.clone(),
    }));

    assert_eq!(deployer.ensure_deployed().unwrap().transactions, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(chain.get_transaction_count(account).unwrap(), 1);
}

#[test]
fn test_wrong_prompted_password_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Test", TEST_CODE, TEST_ABI);
    let keystore = KeyStore::new(tmp.path().join("keystore"));
    let account = keystore.create_account("pw").unwrap();
    let chain = Arc::new(DevChain::new());
    chain.fund(account, U256::from(10u64).pow(U256::from(18u64)));

    let deployer = Deployer::with_client(
        context(tmp.path()),
        NetworkDefinition::implicit_test(),
        chain.clone(),
        Some(account),
        None,
    )
    .unwrap()
    .with_prompt(Box::new(FixedPrompt {
        password: "nope",
        calls: Arc::new(AtomicUsize::new(0)),
    }));

    assert!(matches!(
        deployer.ensure_deployed().unwrap_err(),
        KeelError::WrongPassword { .. }
    ));
    assert_eq!(chain.transaction_count(), 0);
}

#[test]
fn test_underfunded_account_is_deployment_error() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Test", TEST_CODE, TEST_ABI);
    let keystore = KeyStore::new(tmp.path().join("keystore"));
    let account = keystore.create_account("pw").unwrap();
    let chain = Arc::new(DevChain::new());
    chain.fund(account, U256::from(1_000));

    let deployer = Deployer::with_client(
        context(tmp.path()),
        NetworkDefinition::implicit_test(),
        chain.clone(),
        Some(account),
        Some("pw".into()),
    )
    .unwrap();

    let err = deployer.ensure_deployed().unwrap_err();
    assert!(matches!(err, KeelError::Deployment(_)));
    assert_eq!(chain.transaction_count(), 0);
    assert!(deployer.ledger().get_contract("Test").unwrap().is_none());
}

#[test]
fn test_no_account_on_network_without_default_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let mut network = NetworkDefinition::implicit_test();
    network.use_default_account = false;
    let err = Deployer::with_client(
        context(tmp.path()),
        network,
        Arc::new(DevChain::new()),
        None,
        None,
    )
    .err()
    .unwrap();
    assert!(matches!(err, KeelError::Validation(_)));
}

// ---------------------------------------------------------------------------
// Chain failures
// ---------------------------------------------------------------------------

/// Wraps a dev chain; can pretend to switch chains, reject sends, or lose
/// deployed code.
struct ScriptedChain {
    inner: DevChain,
    chain_id: AtomicU64,
    send_error: Option<String>,
    hide_code: bool,
}

impl ScriptedChain {
    fn new(send_error: Option<&str>) -> Self {
        let inner = DevChain::new();
        let chain_id = AtomicU64::new(inner.chain_id().unwrap());
        Self {
            inner,
            chain_id,
            send_error: send_error.map(str::to_string),
            hide_code: false,
        }
    }

    fn without_code() -> Self {
        Self {
            hide_code: true,
            ..Self::new(None)
        }
    }
}

impl ChainClient for ScriptedChain {
    fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id.load(Ordering::SeqCst))
    }

    fn get_balance(&self, address: Address) -> Result<U256> {
        self.inner.get_balance(address)
    }

    fn get_transaction_count(&self, address: Address) -> Result<u64> {
        self.inner.get_transaction_count(address)
    }

    fn gas_price(&self) -> Result<u128> {
        self.inner.gas_price()
    }

    fn accounts(&self) -> Result<Vec<Address>> {
        self.inner.accounts()
    }

    fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256> {
        match &self.send_error {
            Some(msg) => Err(KeelError::Rpc(msg.clone())),
            None => self.inner.send_raw_transaction(raw),
        }
    }

    fn send_transaction(&self, tx: &TransactionRequest) -> Result<B256> {
        match &self.send_error {
            Some(msg) => Err(KeelError::Rpc(msg.clone())),
            None => self.inner.send_transaction(tx),
        }
    }

    fn get_transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        self.inner.get_transaction_receipt(hash)
    }

    fn get_code(&self, address: Address) -> Result<Bytes> {
        if self.hide_code {
            return Ok(Bytes::new());
        }
        self.inner.get_code(address)
    }
}

#[test]
fn test_provider_cannot_afford_becomes_deployment_error() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Test", TEST_CODE, TEST_ABI);
    let deployer = deployer(
        tmp.path(),
        Arc::new(ScriptedChain::new(Some("sender cannot afford txn"))),
    );
    assert!(matches!(
        deployer.ensure_deployed().unwrap_err(),
        KeelError::Deployment(_)
    ));
}

#[test]
fn test_other_provider_errors_propagate_unchanged() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Test", TEST_CODE, TEST_ABI);
    let deployer = deployer(
        tmp.path(),
        Arc::new(ScriptedChain::new(Some("execution reverted"))),
    );
    match deployer.ensure_deployed().unwrap_err() {
        KeelError::Rpc(msg) => assert_eq!(msg, "execution reverted"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_chain_switch_is_deployment_error() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Test", TEST_CODE, TEST_ABI);
    let chain = Arc::new(ScriptedChain::new(None));
    let deployer = deployer(tmp.path(), chain.clone());

    chain.chain_id.store(4242, Ordering::SeqCst);
    assert!(matches!(
        deployer.ensure_deployed().unwrap_err(),
        KeelError::Deployment(_)
    ));
    assert_eq!(chain.inner.transaction_count(), 0);
}

#[test]
fn test_failed_receipt_is_deployment_error() {
    let tmp = tempfile::tempdir().unwrap();
    // Enough gas to get in, not enough to store the code.
    let big = "60".repeat(200);
    write_contract(tmp.path(), "Big", &big, "[]");
    let config = KeelConfig {
        keystore_dir: tmp.path().join("keystore"),
        default_gas_limit: 70_000,
        ..Default::default()
    };
    let chain = Arc::new(DevChain::new());
    let deployer = Deployer::with_client(
        ProjectContext::new(tmp.path(), config),
        NetworkDefinition::implicit_test(),
        chain.clone(),
        None,
        None,
    )
    .unwrap();

    assert!(matches!(
        deployer.ensure_deployed().unwrap_err(),
        KeelError::Deployment(_)
    ));
    assert_eq!(chain.transaction_count(), 1);
    assert!(deployer.ledger().get_contract("Big").unwrap().is_none());
}

#[test]
fn test_missing_code_after_successful_receipt_is_deployment_error() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Test", TEST_CODE, TEST_ABI);
    let chain = Arc::new(ScriptedChain::without_code());
    let deployer = deployer(tmp.path(), chain.clone());

    assert!(matches!(
        deployer.ensure_deployed().unwrap_err(),
        KeelError::Deployment(_)
    ));
    assert_eq!(chain.inner.transaction_count(), 1);
    assert!(deployer.ledger().get_contract("Test").unwrap().is_none());
    assert!(!tmp.path().join("metafile.json").exists());
}

#[test]
fn test_partial_progress_survives_failure() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Lib", LIB_V1, "[]");
    // Main is bigger than the gas limit allows once the code is stored.
    let padded = main_code().replacen("6040", &"60".repeat(200), 1);
    write_contract(tmp.path(), "Main", &padded, TEST_ABI);
    let config = KeelConfig {
        keystore_dir: tmp.path().join("keystore"),
        default_gas_limit: 70_000,
        ..Default::default()
    };
    let deployer = Deployer::with_client(
        ProjectContext::new(tmp.path(), config),
        NetworkDefinition::implicit_test(),
        Arc::new(DevChain::new()),
        None,
        None,
    )
    .unwrap();

    assert!(deployer.ensure_deployed().is_err());
    assert!(deployer.get_deployed("Lib").is_ok());
    assert!(deployer.get_deployed("Main").unwrap_err().is_not_found());
}

// ---------------------------------------------------------------------------
// Networks
// ---------------------------------------------------------------------------

#[test]
fn test_new_connects_to_implicit_test_network() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Test", TEST_CODE, TEST_ABI);

    let deployer = Deployer::new(context(tmp.path()), "test", None, None).unwrap();
    assert!(deployer.network().kind.is_test_chain());
    assert_eq!(deployer.ensure_deployed().unwrap().transactions, 1);
}

#[test]
fn test_from_context_uses_active_network() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Test", TEST_CODE, TEST_ABI);
    std::fs::write(
        tmp.path().join("networks.yml"),
        "dev:\n  type: eth_tester\n  use_default_account: true\n",
    )
    .unwrap();

    let deployer =
        Deployer::from_context(context(tmp.path()).with_network("dev"), None, None).unwrap();
    assert_eq!(deployer.network().name, "dev");

    let fallback = Deployer::from_context(context(tmp.path()), None, None).unwrap();
    assert_eq!(fallback.network().name, "test");

    let err = Deployer::from_context(context(tmp.path()).with_network("mainnet"), None, None)
        .err()
        .unwrap();
    assert!(matches!(err, KeelError::Configuration(_)));
}

#[test]
fn test_unknown_network_is_configuration_error() {
    let tmp = tempfile::tempdir().unwrap();
    let err = Deployer::new(context(tmp.path()), "mainnet", None, None)
        .err()
        .unwrap();
    assert!(matches!(err, KeelError::Configuration(_)));
}

#[test]
fn test_autodeploy_respects_network_policy() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Test", TEST_CODE, TEST_ABI);
    std::fs::write(
        tmp.path().join("networks.yml"),
        "locked:\n  type: eth_tester\n  use_default_account: true\n",
    )
    .unwrap();

    let locked = Deployer::new(context(tmp.path()), "locked", None, None).unwrap();
    assert!(matches!(
        locked.autodeploy().unwrap_err(),
        KeelError::Validation(_)
    ));

    let open = Deployer::new(context(tmp.path()), "test", None, None).unwrap();
    assert_eq!(open.autodeploy().unwrap().transactions, 1);
}

#[test]
fn test_read_only_ledger_leaves_disk_alone() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Test", TEST_CODE, TEST_ABI);
    let ctx = context(tmp.path());
    let ledger_path = ctx.ledger_path();
    let deployer = deployer(tmp.path(), Arc::new(DevChain::new()))
        .with_ledger(DeploymentLedger::read_only(&ledger_path))
        .unwrap();

    assert_eq!(deployer.ensure_deployed().unwrap().transactions, 1);
    assert_eq!(deployer.ensure_deployed().unwrap().transactions, 0);
    assert!(!ledger_path.exists());
}

#[test]
fn test_read_only_ledger_ignores_default_account_on_disk() {
    let tmp = tempfile::tempdir().unwrap();
    write_contract(tmp.path(), "Test", TEST_CODE, TEST_ABI);
    let ctx = context(tmp.path());
    let ledger_path = ctx.ledger_path();
    let stored_default = Address::repeat_byte(0x42);
    DeploymentLedger::open(&ledger_path)
        .set_default_account(stored_default)
        .unwrap();
    let before = std::fs::read_to_string(&ledger_path).unwrap();

    let chain = Arc::new(DevChain::new());
    let deployer = deployer(tmp.path(), chain.clone());
    assert_eq!(deployer.account(), stored_default);

    let deployer = deployer
        .with_ledger(DeploymentLedger::read_only(&ledger_path))
        .unwrap();
    assert_eq!(deployer.account(), chain.accounts().unwrap()[0]);
    assert_eq!(deployer.ensure_deployed().unwrap().transactions, 1);
    assert_eq!(std::fs::read_to_string(&ledger_path).unwrap(), before);
}
