//! Third-party reports of our public address.
//!
//! Every introduction response tells us the address the responder saw us
//! at. The log keeps one entry per (reporter, reported WAN) pair and derives
//! a WAN estimate and a NAT classification from it.

use crate::address::Address;
use crate::payload::ConnectionType;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

/// Number of most recent entries the WAN majority vote looks at.
pub const MAJORITY_INPUT_SIZE: usize = 3;

/// Share of distinct WAN values above which the NAT is called symmetric.
const SYMMETRIC_THRESHOLD: f64 = 0.1;

/// One WAN report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WanLogItem {
    /// When the report arrived
    pub timestamp: SystemTime,
    /// Who reported it
    pub sender: Address,
    /// Our LAN estimate at the time
    pub lan: Address,
    /// The address the sender saw us at
    pub wan: Address,
}

/// Ordered, deduplicated log of WAN reports.
#[derive(Debug, Default)]
pub struct WanEstimationLog {
    log: Mutex<Vec<WanLogItem>>,
}

impl WanEstimationLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<WanLogItem>> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item` unless its sender already reported the same WAN.
    pub fn add_item(&self, item: WanLogItem) {
        let mut log = self.entries();
        if !log.iter().any(|e| e.wan == item.wan && e.sender == item.sender) {
            log.push(item);
        }
    }

    /// Majority WAN over the last [`MAJORITY_INPUT_SIZE`] entries.
    ///
    /// Ties go to the value seen first within that window.
    #[must_use]
    pub fn estimate_wan(&self) -> Option<Address> {
        estimate_wan(&self.entries())
    }

    /// Classify our NAT from the log.
    ///
    /// Public when the WAN estimate equals our most recent LAN observation;
    /// symmetric when more than one report exists and the share of distinct
    /// WAN values, `(distinct - 1) / total`, exceeds 0.1; unknown otherwise.
    #[must_use]
    pub fn estimate_connection_type(&self) -> ConnectionType {
        let log = self.entries();
        let wan = estimate_wan(&log);
        let lan = log.last().map(|item| item.lan);

        if wan.is_some() && wan == lan {
            return ConnectionType::Public;
        }

        let mut distinct: Vec<Address> = Vec::new();
        for item in log.iter() {
            if !distinct.contains(&item.wan) {
                distinct.push(item.wan);
            }
        }

        if log.len() > 1 {
            let symmetric = (distinct.len() - 1) as f64 / log.len() as f64;
            if symmetric > SYMMETRIC_THRESHOLD {
                return ConnectionType::SymmetricNat;
            }
        }
        ConnectionType::Unknown
    }

    /// Drop every entry. Called when our LAN address changes.
    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Snapshot of the log in insertion order.
    #[must_use]
    pub fn get_log(&self) -> Vec<WanLogItem> {
        self.entries().clone()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

fn estimate_wan(log: &[WanLogItem]) -> Option<Address> {
    let window = &log[log.len().saturating_sub(MAJORITY_INPUT_SIZE)..];

    // insertion-ordered counts so that ties resolve to the first seen
    let mut counts: Vec<(Address, usize)> = Vec::with_capacity(window.len());
    for item in window {
        match counts.iter_mut().find(|(wan, _)| *wan == item.wan) {
            Some((_, count)) => *count += 1,
            None => counts.push((item.wan, 1)),
        }
    }

    let mut best: Option<(Address, usize)> = None;
    for (wan, count) in counts {
        if best.is_none_or(|(_, top)| count > top) {
            best = Some((wan, count));
        }
    }
    best.map(|(wan, _)| wan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn report(sender: &str, lan: &str, wan: &str) -> WanLogItem {
        WanLogItem {
            timestamp: SystemTime::now(),
            sender: addr(sender),
            lan: addr(lan),
            wan: addr(wan),
        }
    }

    #[test]
    fn test_empty_log() {
        let log = WanEstimationLog::new();
        assert_eq!(log.estimate_wan(), None);
        assert_eq!(log.estimate_connection_type(), ConnectionType::Unknown);
    }

    #[test]
    fn test_duplicate_reports_ignored() {
        let log = WanEstimationLog::new();
        log.add_item(report("5.5.5.5:1", "10.0.0.1:1", "1.1.1.1:1"));
        log.add_item(report("5.5.5.5:1", "10.0.0.1:1", "1.1.1.1:1"));
        log.add_item(report("5.5.5.5:1", "10.0.0.1:1", "1.1.1.1:2"));
        log.add_item(report("6.6.6.6:1", "10.0.0.1:1", "1.1.1.1:1"));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_majority_of_three() {
        let log = WanEstimationLog::new();
        log.add_item(report("5.5.5.5:1", "10.0.0.1:1", "1.1.1.1:1"));
        log.add_item(report("6.6.6.6:1", "10.0.0.1:1", "1.1.1.1:1"));
        log.add_item(report("7.7.7.7:1", "10.0.0.1:1", "9.9.9.9:1"));
        assert_eq!(log.estimate_wan(), Some(addr("1.1.1.1:1")));
    }

    #[test]
    fn test_majority_only_looks_at_recent_window() {
        let log = WanEstimationLog::new();
        log.add_item(report("5.5.5.5:1", "10.0.0.1:1", "1.1.1.1:1"));
        log.add_item(report("6.6.6.6:1", "10.0.0.1:1", "1.1.1.1:1"));
        log.add_item(report("7.7.7.7:1", "10.0.0.1:1", "9.9.9.9:1"));
        log.add_item(report("8.8.8.8:1", "10.0.0.1:1", "9.9.9.9:1"));
        assert_eq!(log.estimate_wan(), Some(addr("9.9.9.9:1")));
    }

    #[test]
    fn test_tie_goes_to_first_seen() {
        let log = WanEstimationLog::new();
        log.add_item(report("5.5.5.5:1", "10.0.0.1:1", "2.2.2.2:1"));
        log.add_item(report("6.6.6.6:1", "10.0.0.1:1", "3.3.3.3:1"));
        assert_eq!(log.estimate_wan(), Some(addr("2.2.2.2:1")));
    }

    #[test]
    fn test_public_when_wan_matches_lan() {
        let log = WanEstimationLog::new();
        log.add_item(report("5.5.5.5:1", "1.1.1.1:1", "1.1.1.1:1"));
        assert_eq!(log.estimate_connection_type(), ConnectionType::Public);
    }

    #[test]
    fn test_symmetric_when_wan_keeps_changing() {
        let log = WanEstimationLog::new();
        log.add_item(report("5.5.5.5:1", "10.0.0.1:1", "1.1.1.1:1000"));
        log.add_item(report("6.6.6.6:1", "10.0.0.1:1", "1.1.1.1:1001"));
        assert_eq!(log.estimate_connection_type(), ConnectionType::SymmetricNat);
    }

    #[test]
    fn test_stable_mapping_is_unknown() {
        let log = WanEstimationLog::new();
        for sender in ["5.5.5.5:1", "6.6.6.6:1", "7.7.7.7:1"] {
            log.add_item(report(sender, "10.0.0.1:1", "1.1.1.1:1"));
        }
        assert_eq!(log.estimate_connection_type(), ConnectionType::Unknown);
    }

    #[test]
    fn test_single_entry_is_not_symmetric() {
        let log = WanEstimationLog::new();
        log.add_item(report("5.5.5.5:1", "10.0.0.1:1", "1.1.1.1:1"));
        assert_eq!(log.estimate_connection_type(), ConnectionType::Unknown);
    }

    #[test]
    fn test_clear() {
        let log = WanEstimationLog::new();
        log.add_item(report("5.5.5.5:1", "10.0.0.1:1", "1.1.1.1:1"));
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.estimate_wan(), None);
    }
}
