//! Connectivity classification

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellularGeneration {
    #[serde(rename = "2g")]
    G2,
    #[serde(rename = "3g")]
    G3,
    #[serde(rename = "4g")]
    G4,
    #[serde(rename = "5g")]
    G5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "generation")]
pub enum Transport {
    Wifi,
    Cellular(Option<CellularGeneration>),
    Ethernet,
    Other,
    None,
}

/// Snapshot reported by the platform's connectivity monitor.
///
/// `None` for either flag means the platform could not tell yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub is_connected: Option<bool>,
    pub is_internet_reachable: Option<bool>,
    pub transport: Transport,
}

impl NetworkState {
    pub fn offline() -> Self {
        Self {
            is_connected: Some(false),
            is_internet_reachable: Some(false),
            transport: Transport::None,
        }
    }

    pub fn wifi() -> Self {
        Self {
            is_connected: Some(true),
            is_internet_reachable: Some(true),
            transport: Transport::Wifi,
        }
    }

    pub fn cellular(generation: Option<CellularGeneration>) -> Self {
        Self {
            is_connected: Some(true),
            is_internet_reachable: Some(true),
            transport: Transport::Cellular(generation),
        }
    }

    /// Good enough to spend data on a sync pass: reachable wifi or 4g/5g
    pub fn should_sync(&self) -> bool {
        if self.is_connected != Some(true) || self.is_internet_reachable != Some(true) {
            return false;
        }
        matches!(
            self.transport,
            Transport::Wifi
                | Transport::Cellular(Some(CellularGeneration::G4 | CellularGeneration::G5))
        )
    }
}

impl Default for NetworkState {
    fn default() -> Self {
        Self::offline()
    }
}

/// Shared "is the network sync-worthy right now" flag
#[derive(Debug, Clone, Default)]
pub struct NetworkAvailability(Arc<AtomicBool>);

impl NetworkAvailability {
    pub fn new(available: bool) -> Self {
        Self(Arc::new(AtomicBool::new(available)))
    }

    pub fn is_available(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, available: bool) {
        self.0.store(available, Ordering::Release);
    }
}
