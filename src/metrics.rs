//! Prometheus metrics for the relayer
//!
//! Exposed on the /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec,
};

lazy_static! {
    // Beacon direction
    pub static ref PAYLOADS_WRITTEN: CounterVec = register_counter_vec!(
        "relayer_sync_payloads_written_total",
        "Sync payloads included on the parachain",
        &["kind"]
    ).unwrap();

    pub static ref SYNC_PERIOD: Gauge = register_gauge!(
        "relayer_sync_committee_period",
        "Latest sync committee period handed to the parachain writer"
    ).unwrap();

    pub static ref FINALIZED_SLOT: Gauge = register_gauge!(
        "relayer_finalized_slot",
        "Latest verified finalized beacon slot"
    ).unwrap();

    // Parachain direction
    pub static ref COMMITMENTS: CounterVec = register_counter_vec!(
        "relayer_beefy_commitments_total",
        "BEEFY commitments seen by the listener",
        &["outcome"]
    ).unwrap();

    pub static ref PACKAGES: CounterVec = register_counter_vec!(
        "relayer_message_packages_total",
        "Message packages produced or delivered",
        &["outcome"]
    ).unwrap();

    // Shared
    pub static ref NONCE: GaugeVec = register_gauge_vec!(
        "relayer_account_nonce",
        "Next nonce of the relayer account",
        &["chain"]
    ).unwrap();

    pub static ref RETRIES: CounterVec = register_counter_vec!(
        "relayer_retries_total",
        "Retried operations",
        &["operation"]
    ).unwrap();

    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "relayer_errors_total",
        "Fatal task errors",
        &["stage", "kind"]
    ).unwrap();

    pub static ref UP: Gauge = register_gauge!(
        "relayer_up",
        "Whether the relayer is up and running"
    ).unwrap();
}

pub fn record_payload_written(kind: &str) {
    PAYLOADS_WRITTEN.with_label_values(&[kind]).inc();
}

pub fn set_sync_period(period: u64) {
    SYNC_PERIOD.set(period as f64);
}

pub fn set_finalized_slot(slot: u64) {
    FINALIZED_SLOT.set(slot as f64);
}

/// `verified` or `skipped`
pub fn record_commitment(outcome: &str) {
    COMMITMENTS.with_label_values(&[outcome]).inc();
}

/// `produced`, `delivered` or `already_delivered`
pub fn record_package(outcome: &str) {
    PACKAGES.with_label_values(&[outcome]).inc();
}

pub fn set_nonce(chain: &str, nonce: u64) {
    NONCE.with_label_values(&[chain]).set(nonce as f64);
}

pub fn record_retry(operation: &str) {
    RETRIES.with_label_values(&[operation]).inc();
}

pub fn record_error(stage: &str, kind: &str) {
    ERRORS.with_label_values(&[stage, kind]).inc();
}
