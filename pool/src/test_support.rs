//! In-memory ledger used by unit tests.
//!
//! Behaves like the CLC ledger for the operations the pool uses: coins carry
//! a holder public key, split/merge/transaction signatures are checked
//! against the origin coin's holder, and values actually move.

use async_trait::async_trait;
use serde_json::{json, Map};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use crate::crypto::{self, CoinKey};
use crate::ledger::{
    Coin, CoinId, LedgerClient, LedgerError, MergeRequest, NetworkJob, SolvedChallenge,
    SplitRequest, TransferRequest,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Solve(SolvedChallenge),
    Split(SplitRequest),
    Merge(MergeRequest),
    Transfer(TransferRequest),
}

#[derive(Default)]
struct State {
    challenge: Option<NetworkJob>,
    challenge_fails: bool,
    coins: BTreeMap<CoinId, Coin>,
    length: u64,
    next_solutions: VecDeque<(CoinId, f64)>,
    calls: Vec<Call>,
    // op -> (successes still allowed, error once exhausted)
    failures: HashMap<&'static str, (usize, LedgerError)>,
}

pub struct MockLedger {
    state: Mutex<State>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()) }
    }

    pub fn set_challenge(&self, seed: &str, diff: &str) {
        self.state.lock().unwrap().challenge = Some(NetworkJob {
            seed: seed.to_string(),
            diff: diff.to_string(),
            extra: Map::new(),
        });
    }

    pub fn fail_challenge(&self, fail: bool) {
        self.state.lock().unwrap().challenge_fails = fail;
    }

    /// Create (or replace) a coin held by `holder`.
    pub fn put_coin(&self, id: CoinId, val: f64, holder: &str, tx_count: usize) {
        let mut s = self.state.lock().unwrap();
        s.coins.insert(
            id,
            Coin {
                val,
                transactions: (0..tx_count).map(|i| json!(i)).collect(),
                holder: Some(holder.to_string()),
            },
        );
        s.length = s.length.max(id + 1);
    }

    /// The next `challenge-solved` mints coin `id` worth `val`.
    /// Queue the coin the next accepted solution mints.
    pub fn mint_next(&self, id: CoinId, val: f64) {
        self.state.lock().unwrap().next_solutions.push_back((id, val));
    }

    pub fn fail_op(&self, op: &'static str, err: LedgerError) {
        self.fail_op_after(op, 0, err);
    }

    /// Let `op` succeed `successes` more times, then fail with `err`.
    pub fn fail_op_after(&self, op: &'static str, successes: usize, err: LedgerError) {
        self.state.lock().unwrap().failures.insert(op, (successes, err));
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    pub fn coin(&self, id: CoinId) -> Option<Coin> {
        self.state.lock().unwrap().coins.get(&id).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    fn check_failure(s: &mut State, op: &'static str) -> Result<(), LedgerError> {
        if let Some((remaining, err)) = s.failures.get_mut(op) {
            if *remaining == 0 {
                return Err(err.clone());
            }
            *remaining -= 1;
        }
        Ok(())
    }

    fn holder_of(s: &State, id: CoinId) -> Result<String, LedgerError> {
        s.coins
            .get(&id)
            .and_then(|c| c.holder.clone())
            .ok_or_else(|| LedgerError::Protocol(format!("Coin #{} does not exist", id)))
    }

    fn check_sign(holder: &str, message: &str, sign: &str) -> Result<(), LedgerError> {
        match crypto::verify(holder, message, sign) {
            Ok(true) => Ok(()),
            _ => Err(LedgerError::Protocol("Invalid signature".to_string())),
        }
    }

    fn parse_vol(vol: &str) -> Result<f64, LedgerError> {
        vol.parse::<f64>()
            .map_err(|_| LedgerError::Protocol(format!("Invalid volume {}", vol)))
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn get_challenge(&self) -> Result<NetworkJob, LedgerError> {
        let s = self.state.lock().unwrap();
        if s.challenge_fails {
            return Err(LedgerError::Unavailable("connection refused".to_string()));
        }
        s.challenge
            .clone()
            .ok_or_else(|| LedgerError::Protocol("no challenge".to_string()))
    }

    async fn submit_solution(&self, solved: &SolvedChallenge) -> Result<CoinId, LedgerError> {
        let mut s = self.state.lock().unwrap();
        Self::check_failure(&mut s, "solve")?;
        s.calls.push(Call::Solve(solved.clone()));
        let (id, val) = s
            .next_solutions
            .pop_front()
            .ok_or_else(|| LedgerError::Protocol("challenge-solved returned no coin id".to_string()))?;
        s.coins.insert(
            id,
            Coin { val, transactions: Vec::new(), holder: Some(solved.holder.clone()) },
        );
        s.length = s.length.max(id + 1);
        Ok(id)
    }

    async fn get_coin(&self, id: CoinId) -> Result<Coin, LedgerError> {
        let mut s = self.state.lock().unwrap();
        Self::check_failure(&mut s, "coin")?;
        s.coins
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::Protocol(format!("Coin #{} does not exist", id)))
    }

    async fn ledger_length(&self) -> Result<u64, LedgerError> {
        let mut s = self.state.lock().unwrap();
        Self::check_failure(&mut s, "length")?;
        Ok(s.length)
    }

    async fn split(&self, req: &SplitRequest) -> Result<(), LedgerError> {
        let mut s = self.state.lock().unwrap();
        Self::check_failure(&mut s, "split")?;
        s.calls.push(Call::Split(req.clone()));
        let holder = Self::holder_of(&s, req.origin)?;
        Self::check_sign(&holder, &format!("{} 1 {}", req.target, req.vol), &req.sign)?;
        if s.coins.contains_key(&req.target) {
            return Err(LedgerError::Protocol(format!("Coin #{} already exists", req.target)));
        }
        let vol = Self::parse_vol(&req.vol)?;
        if let Some(origin) = s.coins.get_mut(&req.origin) {
            origin.val -= vol;
        }
        s.coins.insert(
            req.target,
            Coin { val: vol, transactions: vec![json!("split")], holder: Some(holder) },
        );
        s.length = s.length.max(req.target + 1);
        Ok(())
    }

    async fn merge(&self, req: &MergeRequest) -> Result<(), LedgerError> {
        let mut s = self.state.lock().unwrap();
        Self::check_failure(&mut s, "merge")?;
        s.calls.push(Call::Merge(req.clone()));
        let holder = Self::holder_of(&s, req.origin)?;
        let target_txs = s
            .coins
            .get(&req.target)
            .map(Coin::tx_count)
            .ok_or_else(|| LedgerError::Protocol(format!("Coin #{} does not exist", req.target)))?;
        Self::check_sign(&holder, &format!("{} {} {}", req.target, target_txs, req.vol), &req.sign)?;
        let vol = Self::parse_vol(&req.vol)?;
        if let Some(origin) = s.coins.get_mut(&req.origin) {
            origin.val -= vol;
        }
        if let Some(target) = s.coins.get_mut(&req.target) {
            target.val += vol;
            target.transactions.push(json!("merge"));
        }
        Ok(())
    }

    async fn transact(&self, req: &TransferRequest) -> Result<(), LedgerError> {
        let mut s = self.state.lock().unwrap();
        Self::check_failure(&mut s, "transact")?;
        s.calls.push(Call::Transfer(req.clone()));
        let holder = Self::holder_of(&s, req.cid)?;
        Self::check_sign(&holder, &req.new_holder, &req.sign)?;
        if let Some(coin) = s.coins.get_mut(&req.cid) {
            coin.holder = Some(req.new_holder.clone());
            coin.transactions.push(json!("transaction"));
        }
        Ok(())
    }
}

/// Deterministic miner key for tests.
pub fn test_key(n: u8) -> CoinKey {
    CoinKey::from_hex(&hex::encode([n.max(1); 32])).unwrap()
}

pub fn test_key_hex(n: u8) -> String {
    hex::encode([n.max(1); 32])
}

/// The hash an honest miner submits for `public_key` under `seed`.
pub fn mined_hash(public_key: &str, seed: &str) -> String {
    crypto::sha256_hex(&format!("{}{}", public_key, seed))
}
