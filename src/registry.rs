use crate::client::{ClientOptions, QscClient};
use crate::error::Result;
use crate::types::{DeviceInfo, StatusRecord};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

/// Clients for many cores, keyed by address
///
/// All callers naming the same address share one [`QscClient`], and so one
/// connection pool. Clients are created on first use and kept for the life of
/// the registry.
pub struct ClientRegistry {
    options: ClientOptions,
    clients: Mutex<HashMap<String, QscClient>>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::with_options(ClientOptions::default())
    }

    /// Registry whose clients all use `options`
    pub fn with_options(options: ClientOptions) -> Self {
        Self {
            options,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The client for `address`, created if this is the first request for it
    pub fn get_or_create(&self, address: &str) -> QscClient {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        clients
            .entry(address.to_string())
            .or_insert_with(|| {
                tracing::debug!("Creating client for {}", address);
                QscClient::with_options(address, self.options.clone())
            })
            .clone()
    }

    /// Addresses with a client, in no particular order
    pub fn addresses(&self) -> Vec<String> {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn control(&self, address: &str, name: &str) -> Result<f64> {
        self.get_or_create(address).control(name).await
    }

    pub async fn set_control(&self, address: &str, name: &str, value: f64) -> Result<()> {
        self.get_or_create(address).set_control(name, value).await
    }

    pub async fn volumes<S: AsRef<str>>(
        &self,
        address: &str,
        names: &[S],
    ) -> Result<BTreeMap<String, u32>> {
        self.get_or_create(address).volumes(names).await
    }

    pub async fn set_volume(&self, address: &str, name: &str, percent: u32) -> Result<()> {
        self.get_or_create(address).set_volume(name, percent).await
    }

    pub async fn mutes<S: AsRef<str>>(
        &self,
        address: &str,
        names: &[S],
    ) -> Result<BTreeMap<String, bool>> {
        self.get_or_create(address).mutes(names).await
    }

    pub async fn set_mute(&self, address: &str, name: &str, mute: bool) -> Result<()> {
        self.get_or_create(address).set_mute(name, mute).await
    }

    pub async fn status(&self, address: &str) -> Result<StatusRecord> {
        self.get_or_create(address).status().await
    }

    pub async fn info(&self, address: &str) -> Result<DeviceInfo> {
        self.get_or_create(address).info().await
    }

    pub async fn healthy(&self, address: &str) -> Result<()> {
        self.get_or_create(address).healthy().await
    }
}
