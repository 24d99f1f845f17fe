//! Decides what needs (re)deployment on the active network and does it.
//!
//! Each cycle starts from the compiled artifacts on disk:
//!
//! 1. every contract's address-independent hash is compared with the
//!    ledger's latest hash for the chain,
//! 2. anything that changed forces every contract linking against it to
//!    redeploy as well,
//! 3. flagged contracts are deployed libraries first, one transaction at a
//!    time, and each success is written to the ledger before moving on.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256, keccak256};
use keel_chain::client::connect;
use keel_chain::{
    ChainClient, IMPLICIT_TEST_NETWORK, KeyStore, NetworkDefinition, NetworksConfig,
    PasswordPrompt, TransactionRequest, TransactionSigner,
};
use keel_core::utils::remove_0x;
use keel_core::{KeelError, ProjectContext, ProviderErrorKind, Result, classify_provider_error};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::artifacts::{AbiItem, CompiledContract, load_all};
use crate::graph::DependencyGraph;
use crate::ledger::DeploymentLedger;
use crate::linker::{LinkDef, decode_bytecode, hash_address_independent, link, parse_link_defs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RedeployReason {
    /// The contract's own code (or constructor arguments) changed.
    SelfChanged,
    /// A library it links against is being redeployed.
    DependencyChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ContractState {
    NeverDeployed,
    UpToDate,
    NeedsRedeploy(RedeployReason),
}

impl ContractState {
    pub fn needs_deploy(&self) -> bool {
        !matches!(self, ContractState::UpToDate)
    }
}

/// Per-contract decisions for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeploymentPlan {
    /// Libraries before the contracts that need them.
    pub order: Vec<String>,
    pub states: BTreeMap<String, ContractState>,
}

impl DeploymentPlan {
    pub fn state(&self, name: &str) -> Option<ContractState> {
        self.states.get(name).copied()
    }

    /// Contracts to deploy, in deployment order.
    pub fn to_deploy(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|n| self.state(n).is_some_and(|s| s.needs_deploy()))
            .cloned()
            .collect()
    }

    pub fn is_up_to_date(&self) -> bool {
        self.states.values().all(|s| !s.needs_deploy())
    }
}

/// Handle to a contract instance recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployedContract {
    pub name: String,
    pub address: Address,
    pub abi: Vec<AbiItem>,
    pub chain_id: u64,
    pub hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeploymentReport {
    pub deployed: Vec<DeployedContract>,
    pub transactions: usize,
}

impl DeploymentReport {
    pub fn names(&self) -> Vec<&str> {
        self.deployed.iter().map(|d| d.name.as_str()).collect()
    }
}

/// State gathered at the start of a cycle.
struct Cycle {
    contracts: BTreeMap<String, CompiledContract>,
    hashes: BTreeMap<String, String>,
    plan: DeploymentPlan,
}

pub struct Deployer {
    ctx: ProjectContext,
    network: NetworkDefinition,
    client: Arc<dyn ChainClient>,
    signer: TransactionSigner,
    ledger: DeploymentLedger,
    account: Address,
    requested_account: Option<Address>,
    chain_id: u64,
    constructor_args: HashMap<String, Bytes>,
}

impl Deployer {
    /// Connect to the context's active network, or the implicit test
    /// network when none is set.
    pub fn from_context(
        ctx: ProjectContext,
        account: Option<Address>,
        password: Option<String>,
    ) -> Result<Self> {
        let network_name = ctx.network_name().unwrap_or(IMPLICIT_TEST_NETWORK).to_string();
        Self::new(ctx, &network_name, account, password)
    }

    /// Connect to `network_name` as defined in the project's networks.yml.
    pub fn new(
        ctx: ProjectContext,
        network_name: &str,
        account: Option<Address>,
        password: Option<String>,
    ) -> Result<Self> {
        let networks = NetworksConfig::load(&ctx.networks_path())?;
        let network = networks.get_network_config(network_name)?;
        let client = connect(&network, ctx.config())?;
        Self::with_client(ctx, network, client, account, password)
    }

    /// Use an existing connection.
    pub fn with_client(
        ctx: ProjectContext,
        network: NetworkDefinition,
        client: Arc<dyn ChainClient>,
        account: Option<Address>,
        password: Option<String>,
    ) -> Result<Self> {
        let ledger = DeploymentLedger::from_context(&ctx);
        let chain_id = client.chain_id()?;
        let requested_account = account;
        let account = resolve_account(&network, client.as_ref(), &ledger, requested_account)?;
        let keystore = Arc::new(KeyStore::from_context(&ctx));
        let signer = TransactionSigner::new(client.clone(), keystore, network.kind)
            .with_password(password);

        info!(
            network = %network.name,
            chain_id,
            account = %account,
            "deployer ready"
        );
        Ok(Self {
            ctx,
            network,
            client,
            signer,
            ledger,
            account,
            requested_account,
            chain_id,
            constructor_args: HashMap::new(),
        })
    }

    /// Replace the ledger, e.g. with a read-only one. The deployment
    /// account is resolved again against the new ledger.
    pub fn with_ledger(mut self, ledger: DeploymentLedger) -> Result<Self> {
        self.account = resolve_account(
            &self.network,
            self.client.as_ref(),
            &ledger,
            self.requested_account,
        )?;
        self.ledger = ledger;
        Ok(self)
    }

    /// Sign local-account transactions with `keystore`.
    pub fn with_keystore(mut self, keystore: Arc<KeyStore>) -> Self {
        self.signer = self.signer.with_keystore(keystore);
        self
    }

    /// Ask `prompt` for a password when a keystore account is locked and
    /// neither a password nor a session passphrase was given.
    pub fn with_prompt(self, prompt: Box<dyn PasswordPrompt>) -> Self {
        let keystore = Arc::new(KeyStore::from_context(&self.ctx).with_prompt(prompt));
        self.with_keystore(keystore)
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn network(&self) -> &NetworkDefinition {
        &self.network
    }

    pub fn ledger(&self) -> &DeploymentLedger {
        &self.ledger
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    /// ABI-encoded constructor arguments appended to `name`'s bytecode.
    /// They take part in change detection.
    pub fn set_constructor_args(&mut self, name: impl Into<String>, args: Bytes) {
        self.constructor_args.insert(name.into(), args);
    }

    fn change_hash(&self, contract: &CompiledContract) -> Result<String> {
        let code_hash = hash_address_independent(&contract.bytecode)?;
        match self.constructor_args.get(&contract.name) {
            Some(args) if !args.is_empty() => {
                let mut preimage = hex::decode(remove_0x(&code_hash))
                    .map_err(|e| KeelError::Link(format!("bad bytecode hash: {e}")))?;
                preimage.extend_from_slice(args);
                Ok(format!("0x{}", hex::encode(keccak256(&preimage))))
            }
            _ => Ok(code_hash),
        }
    }

    fn prepare(&self) -> Result<Cycle> {
        let mut contracts = BTreeMap::new();
        for contract in load_all(&self.ctx.build_dir(), &self.ctx.contracts_dir())? {
            if !contract.has_bytecode() {
                warn!(contract = %contract.name, "no bytecode, skipping");
                continue;
            }
            contracts.insert(contract.name.clone(), contract);
        }

        let mut defs: BTreeMap<String, Vec<LinkDef>> = BTreeMap::new();
        for (name, contract) in &contracts {
            defs.insert(name.clone(), parse_link_defs(&contract.bytecode)?);
        }
        check_library_sources(&defs)?;

        let graph = DependencyGraph::build(defs.iter().map(|(n, d)| (n.as_str(), d.as_slice())))?;

        let mut hashes = BTreeMap::new();
        let mut states = BTreeMap::new();
        for (name, contract) in &contracts {
            let hash = self.change_hash(contract)?;
            let state = match self.ledger.latest_hash(name, self.chain_id)? {
                None => ContractState::NeverDeployed,
                Some(latest) if latest == hash => ContractState::UpToDate,
                Some(_) => ContractState::NeedsRedeploy(RedeployReason::SelfChanged),
            };
            debug!(contract = %name, hash = %hash, ?state, "change check");
            hashes.insert(name.clone(), hash);
            states.insert(name.clone(), state);
        }

        let changed: Vec<String> = states
            .iter()
            .filter(|(_, s)| s.needs_deploy())
            .map(|(n, _)| n.clone())
            .collect();
        for name in changed {
            for consumer in graph.get_consumers(&name) {
                if let Some(state) = states.get_mut(&consumer) {
                    if *state == ContractState::UpToDate {
                        debug!(contract = %consumer, library = %name, "dependency changed");
                        *state = ContractState::NeedsRedeploy(RedeployReason::DependencyChanged);
                    }
                }
            }
        }

        let order = graph
            .deploy_order()?
            .into_iter()
            .filter(|n| contracts.contains_key(n))
            .collect();

        Ok(Cycle {
            contracts,
            hashes,
            plan: DeploymentPlan { order, states },
        })
    }

    /// What this cycle would do, without doing it.
    pub fn plan(&self) -> Result<DeploymentPlan> {
        Ok(self.prepare()?.plan)
    }

    pub fn contracts_to_deploy(&self) -> Result<Vec<String>> {
        Ok(self.plan()?.to_deploy())
    }

    /// Whether `name` (or, with `None`, anything) needs deploying.
    pub fn check_needs_deploy(&self, name: Option<&str>) -> Result<bool> {
        let plan = self.plan()?;
        match name {
            None => Ok(!plan.is_up_to_date()),
            Some(name) => plan
                .state(name)
                .map(|s| s.needs_deploy())
                .ok_or_else(|| KeelError::NotFound(format!("no compiled contract named {name}"))),
        }
    }

    /// Deploy everything that is new or stale.
    pub fn ensure_deployed(&self) -> Result<DeploymentReport> {
        let cycle = self.prepare()?;
        let to_deploy = cycle.plan.to_deploy();
        if to_deploy.is_empty() {
            info!(network = %self.network.name, "all contracts up to date");
            return Ok(DeploymentReport::default());
        }

        let current = self.client.chain_id()?;
        if current != self.chain_id {
            return Err(KeelError::Deployment(format!(
                "chain id changed from {} to {current} since connecting",
                self.chain_id
            )));
        }

        // Addresses of everything that is not being redeployed.
        let mut known: HashMap<String, Address> = HashMap::new();
        for entry in self.ledger.get_all_contracts()? {
            let stale = cycle
                .plan
                .state(&entry.name)
                .is_some_and(|s| s.needs_deploy());
            if stale {
                continue;
            }
            if let Some(record) = entry.latest(self.chain_id) {
                known.insert(entry.name.clone(), record.address()?);
            }
        }

        info!(count = to_deploy.len(), contracts = ?to_deploy, "deploying");
        let mut report = DeploymentReport::default();
        for name in &to_deploy {
            let (Some(contract), Some(hash)) = (cycle.contracts.get(name), cycle.hashes.get(name))
            else {
                continue;
            };
            let deployed = self.deploy_contract(contract, hash, &known)?;
            known.insert(name.clone(), deployed.address);
            report.transactions += 1;
            report.deployed.push(deployed);
        }

        info!(deployed = ?report.names(), "deployment complete");
        Ok(report)
    }

    /// [`Deployer::ensure_deployed`], if the network allows it implicitly.
    pub fn autodeploy(&self) -> Result<DeploymentReport> {
        if !self.network.autodeploy_allowed {
            if self.check_needs_deploy(None)? {
                return Err(KeelError::Validation(format!(
                    "contracts need deploying but autodeploy is not allowed on network '{}'",
                    self.network.name
                )));
            }
            return Ok(DeploymentReport::default());
        }
        self.ensure_deployed()
    }

    /// The latest recorded instance of `name` on this chain.
    pub fn get_deployed(&self, name: &str) -> Result<DeployedContract> {
        let record = self
            .ledger
            .latest_deployment(name, self.chain_id)?
            .ok_or_else(|| {
                KeelError::NotFound(format!(
                    "{name} has not been deployed on chain {}",
                    self.chain_id
                ))
            })?;
        Ok(DeployedContract {
            name: name.to_string(),
            address: record.address()?,
            abi: record.abi,
            chain_id: self.chain_id,
            hash: record.hash,
        })
    }

    fn deploy_contract(
        &self,
        contract: &CompiledContract,
        hash: &str,
        known: &HashMap<String, Address>,
    ) -> Result<DeployedContract> {
        let name = contract.name.as_str();
        let linked = link(&contract.bytecode, known)?;
        let mut code = decode_bytecode(&linked)?.to_vec();
        if let Some(args) = self.constructor_args.get(name) {
            code.extend_from_slice(args);
        }

        let gas = self.ctx.config().default_gas_limit;
        let gas_price = match self.ctx.config().gas_price_wei {
            Some(price) => price,
            None => self.client.gas_price()?,
        };

        let balance = self.client.get_balance(self.account)?;
        let max_cost = U256::from(gas).saturating_mul(U256::from(gas_price));
        if balance < max_cost {
            error!(
                contract = name,
                account = %self.account,
                %balance,
                %max_cost,
                "account cannot pay for deployment"
            );
            return Err(KeelError::Deployment(format!(
                "account {} has {balance} wei but deploying {name} may cost {max_cost} wei",
                self.account
            )));
        }

        let nonce = self.client.get_transaction_count(self.account)?;
        let tx = TransactionRequest::deploy(self.account, Bytes::from(code))
            .with_gas(gas)
            .with_gas_price(gas_price)
            .with_nonce(nonce)
            .with_chain_id(self.chain_id);

        debug!(contract = name, nonce, gas, gas_price, "sending deployment");
        let tx_hash = self
            .signer
            .send_transaction(&tx)
            .map_err(|e| provider_error(name, e))?;
        let receipt = self
            .client
            .wait_for_receipt(tx_hash)
            .map_err(|e| provider_error(name, e))?;

        if !receipt.status {
            return Err(KeelError::Deployment(format!(
                "deployment of {name} failed on chain (tx {tx_hash})"
            )));
        }
        let address = receipt.contract_address.ok_or_else(|| {
            KeelError::Deployment(format!("receipt for {name} has no contract address"))
        })?;
        if self.client.get_code(address)?.is_empty() {
            return Err(KeelError::Deployment(format!(
                "no code at {address} after deploying {name}"
            )));
        }

        let record = self
            .ledger
            .add(name, self.chain_id, address, &contract.abi, hash)?;
        if !self.ledger.account_known(self.account)? {
            self.ledger.add_account(self.account)?;
        }

        info!(
            contract = name,
            address = %address,
            tx = %tx_hash,
            gas_used = receipt.gas_used,
            "deployed"
        );
        Ok(DeployedContract {
            name: name.to_string(),
            address,
            abi: record.abi,
            chain_id: self.chain_id,
            hash: record.hash,
        })
    }
}

/// Turn underfunded-account provider errors into deployment errors.
fn provider_error(contract: &str, err: KeelError) -> KeelError {
    match err {
        KeelError::Rpc(msg) if classify_provider_error(&msg) == ProviderErrorKind::Underfunded => {
            error!(contract, error = %msg, "deployment rejected by provider");
            KeelError::Deployment(format!(
                "unable to deploy {contract}, the account cannot pay for it: {msg}"
            ))
        }
        other => other,
    }
}

/// Explicit account, then the ledger default, then (on test chains) the
/// node's first account.
fn resolve_account(
    network: &NetworkDefinition,
    client: &dyn ChainClient,
    ledger: &DeploymentLedger,
    explicit: Option<Address>,
) -> Result<Address> {
    if let Some(account) = explicit {
        return Ok(account);
    }
    if network.use_default_account {
        if let Some(default) = ledger.get_default_account()? {
            return Ok(default);
        }
        if network.kind.is_test_chain() {
            if let Some(first) = client.accounts()?.first() {
                return Ok(*first);
            }
        }
    }
    Err(KeelError::Validation(format!(
        "no deployment account given and network '{}' has no default account to use",
        network.name
    )))
}

/// One library name must mean one source file across the build.
fn check_library_sources(defs: &BTreeMap<String, Vec<LinkDef>>) -> Result<()> {
    let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
    for def in defs.values().flatten() {
        let Some(path) = def.source_path.as_deref() else {
            continue;
        };
        match seen.get(def.library.as_str()) {
            Some(existing) if *existing != path => {
                return Err(KeelError::Link(format!(
                    "library name {} refers to both {existing} and {path}",
                    def.library
                )));
            }
            Some(_) => {}
            None => {
                seen.insert(def.library.as_str(), path);
            }
        }
    }
    Ok(())
}
