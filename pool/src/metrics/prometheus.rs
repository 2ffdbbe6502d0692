use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};
use std::sync::OnceLock;

static SHARES_ACCEPTED: OnceLock<IntCounter> = OnceLock::new();
static SHARES_REJECTED: OnceLock<IntCounterVec> = OnceLock::new();
static COINS_WON: OnceLock<IntCounter> = OnceLock::new();
static SETTLEMENT_FAILURES: OnceLock<IntCounter> = OnceLock::new();

static PAYOUTS_COMPLETED: OnceLock<IntCounter> = OnceLock::new();
static PAYOUT_FAILURES: OnceLock<IntCounter> = OnceLock::new();

static LEDGER_REQUESTS: OnceLock<IntCounter> = OnceLock::new();
static LEDGER_ERRORS: OnceLock<IntCounter> = OnceLock::new();
static CHALLENGE_UPDATES: OnceLock<IntCounter> = OnceLock::new();
static CHALLENGE_FETCH_ERRORS: OnceLock<IntCounter> = OnceLock::new();

static PERSISTENCE_ERRORS: OnceLock<IntCounter> = OnceLock::new();

static EPOCH_SHARES: OnceLock<IntGauge> = OnceLock::new();
static EPOCH_CONTRIBUTORS: OnceLock<IntGauge> = OnceLock::new();

fn counter(cell: &'static OnceLock<IntCounter>, name: &str, help: &str) -> &'static IntCounter {
    cell.get_or_init(|| IntCounter::new(name, help).unwrap())
}

fn gauge(cell: &'static OnceLock<IntGauge>, name: &str, help: &str) -> &'static IntGauge {
    cell.get_or_init(|| IntGauge::new(name, help).unwrap())
}

fn shares_accepted() -> &'static IntCounter {
    counter(&SHARES_ACCEPTED, "pool_shares_accepted_total", "Total accepted shares")
}

fn shares_rejected() -> &'static IntCounterVec {
    SHARES_REJECTED.get_or_init(|| {
        IntCounterVec::new(
            Opts::new("pool_shares_rejected_total", "Total rejected shares by reason"),
            &["reason"],
        )
        .unwrap()
    })
}

fn coins_won() -> &'static IntCounter {
    counter(&COINS_WON, "pool_coins_won_total", "Coins claimed from the ledger")
}

fn settlement_failures() -> &'static IntCounter {
    counter(
        &SETTLEMENT_FAILURES,
        "pool_settlement_failures_total",
        "Win settlements that did not complete",
    )
}

fn payouts_completed() -> &'static IntCounter {
    counter(&PAYOUTS_COMPLETED, "pool_payouts_completed_total", "Payouts transferred to miners")
}

fn payout_failures() -> &'static IntCounter {
    counter(&PAYOUT_FAILURES, "pool_payout_failures_total", "Payouts that stopped on an error")
}

fn ledger_requests() -> &'static IntCounter {
    counter(&LEDGER_REQUESTS, "pool_ledger_requests_total", "Requests sent to the ledger")
}

fn ledger_errors() -> &'static IntCounter {
    counter(&LEDGER_ERRORS, "pool_ledger_errors_total", "Ledger requests that failed")
}

fn challenge_updates() -> &'static IntCounter {
    counter(&CHALLENGE_UPDATES, "pool_challenge_updates_total", "New challenge seeds observed")
}

fn challenge_fetch_errors() -> &'static IntCounter {
    counter(
        &CHALLENGE_FETCH_ERRORS,
        "pool_challenge_fetch_errors_total",
        "Failed challenge refreshes",
    )
}

fn persistence_errors() -> &'static IntCounter {
    counter(&PERSISTENCE_ERRORS, "pool_persistence_errors_total", "Failed state writes")
}

fn epoch_shares() -> &'static IntGauge {
    gauge(&EPOCH_SHARES, "pool_epoch_shares", "Shares accepted in the current epoch")
}

fn epoch_contributors() -> &'static IntGauge {
    gauge(&EPOCH_CONTRIBUTORS, "pool_epoch_contributors", "Contributors in the current epoch")
}

pub fn inc_shares_accepted() {
    shares_accepted().inc();
}

pub fn inc_shares_rejected(reason: &str) {
    shares_rejected().with_label_values(&[reason]).inc();
}

pub fn inc_coins_won() {
    coins_won().inc();
}

pub fn inc_settlement_failures() {
    settlement_failures().inc();
}

pub fn inc_payouts_completed() {
    payouts_completed().inc();
}

pub fn inc_payout_failures() {
    payout_failures().inc();
}

pub fn inc_ledger_requests() {
    ledger_requests().inc();
}

pub fn inc_ledger_errors() {
    ledger_errors().inc();
}

pub fn inc_challenge_updates() {
    challenge_updates().inc();
}

pub fn inc_challenge_fetch_errors() {
    challenge_fetch_errors().inc();
}

pub fn inc_persistence_errors() {
    persistence_errors().inc();
}

pub fn set_epoch_shares(total: u64) {
    epoch_shares().set(total as i64);
}

pub fn set_epoch_contributors(count: usize) {
    epoch_contributors().set(count as i64);
}

pub fn render() -> String {
    let enc = TextEncoder::new();
    let mut mfs = Vec::new();

    mfs.extend(shares_accepted().collect());
    mfs.extend(shares_rejected().collect());
    mfs.extend(coins_won().collect());
    mfs.extend(settlement_failures().collect());
    mfs.extend(payouts_completed().collect());
    mfs.extend(payout_failures().collect());
    mfs.extend(ledger_requests().collect());
    mfs.extend(ledger_errors().collect());
    mfs.extend(challenge_updates().collect());
    mfs.extend(challenge_fetch_errors().collect());
    mfs.extend(persistence_errors().collect());
    mfs.extend(epoch_shares().collect());
    mfs.extend(epoch_contributors().collect());

    let mut buf = Vec::new();
    let _ = enc.encode(&mfs, &mut buf);
    String::from_utf8_lossy(&buf).to_string()
}
