//! The notification processor: tracks who wants to hear about what, and
//! pushes events to them over outbound unix-stream connections.
//!
//! Transient subscriptions (`module_install`, `feature_enable`) live in
//! memory and die with the engine.  `module_change` subscriptions persist in
//! the target module's `.persist` file so they survive restarts; a reverse
//! index from destination to subscribed modules makes destination teardown
//! cheap.
//!
//! Delivery opens a fresh connection to the subscriber's destination address
//! and writes one framed notification.  A failed delivery purges every
//! subscription of that destination, durable ones included.

use log::{debug, info, warn};
use snafu::ensure;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use futures::SinkExt;
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use super::error::{self, Result};
use datastore::{PersistFiles, PersistedSubscription};
use wire::{Datastore, EventType, Message, MessageCodec, Notification};

/// An addressable notification recipient.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Destination {
    pub address: String,
    pub id: u32,
}

/// One subscription registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub event: EventType,
    pub destination: Destination,
    pub module: Option<String>,
    pub path: Option<String>,
}

pub struct NotificationProcessor {
    transient: RwLock<Vec<Subscription>>,
    /// destination -> modules holding a durable subscription for it.
    index: RwLock<BTreeMap<Destination, BTreeSet<String>>>,
    persist: PersistFiles,
}

impl NotificationProcessor {
    pub fn new(persist: PersistFiles) -> Self {
        Self {
            transient: RwLock::new(Vec::new()),
            index: RwLock::new(BTreeMap::new()),
            persist,
        }
    }

    /// Rebuilds the destination index from the persist files; called once at
    /// engine start so durable subscriptions survive restarts.
    pub fn restore(&self, modules: &[String]) -> Result<()> {
        let mut index = self.index.write().expect("index lock poisoned");
        for module in modules {
            let data = self
                .persist
                .load(module)
                .map_err(|source| error::Error::DataStore {
                    op: "restore_subscriptions".to_string(),
                    source,
                })?;
            for sub in data.subscriptions {
                if sub.event == EventType::ModuleChange {
                    index
                        .entry(Destination {
                            address: sub.dst_address,
                            id: sub.dst_id,
                        })
                        .or_default()
                        .insert(module.clone());
                }
            }
        }
        if !index.is_empty() {
            info!(
                "Restored durable subscriptions for {} destination(s)",
                index.len()
            );
        }
        Ok(())
    }

    pub fn subscribe(&self, subscription: Subscription) -> Result<()> {
        match subscription.event {
            EventType::Rpc => error::UnsupportedEventSnafu {
                event: subscription.event,
            }
            .fail(),
            EventType::ModuleInstall | EventType::FeatureEnable => {
                debug!(
                    "Transient {:?} subscription for {}#{}",
                    subscription.event, subscription.destination.address, subscription.destination.id
                );
                self.transient
                    .write()
                    .expect("transient lock poisoned")
                    .push(subscription);
                Ok(())
            }
            EventType::ModuleChange => {
                let module =
                    subscription
                        .module
                        .clone()
                        .ok_or_else(|| error::Error::SubscriptionModule {
                            event: subscription.event,
                        })?;
                self.persist
                    .update(&module, |data| {
                        data.add_subscription(PersistedSubscription {
                            event: EventType::ModuleChange,
                            dst_address: subscription.destination.address.clone(),
                            dst_id: subscription.destination.id,
                            path: subscription.path.clone(),
                        });
                    })
                    .map_err(|source| error::Error::DataStore {
                        op: "add_subscription".to_string(),
                        source,
                    })?;
                self.index
                    .write()
                    .expect("index lock poisoned")
                    .entry(subscription.destination)
                    .or_default()
                    .insert(module);
                Ok(())
            }
        }
    }

    pub fn unsubscribe(
        &self,
        event: EventType,
        destination: &Destination,
        module: Option<&str>,
    ) -> Result<()> {
        match event {
            EventType::Rpc => error::UnsupportedEventSnafu { event }.fail(),
            EventType::ModuleInstall | EventType::FeatureEnable => {
                let mut transient = self.transient.write().expect("transient lock poisoned");
                let before = transient.len();
                transient.retain(|s| !(s.event == event && s.destination == *destination));
                ensure!(transient.len() != before, error::SubscriptionMissingSnafu);
                Ok(())
            }
            EventType::ModuleChange => {
                let module = module.ok_or(error::Error::SubscriptionModule { event })?;
                let mut removed = false;
                self.persist
                    .update(module, |data| {
                        removed =
                            data.remove_subscription(event, &destination.address, destination.id);
                    })
                    .map_err(|source| error::Error::DataStore {
                        op: "remove_subscription".to_string(),
                        source,
                    })?;
                ensure!(removed, error::SubscriptionMissingSnafu);

                let mut index = self.index.write().expect("index lock poisoned");
                if let Some(modules) = index.get_mut(destination) {
                    modules.remove(module);
                    if modules.is_empty() {
                        index.remove(destination);
                    }
                }
                Ok(())
            }
        }
    }

    /// Drops everything registered for a destination address: used when
    /// delivery fails, meaning the subscriber is gone.
    pub fn purge_destination(&self, address: &str) {
        let doomed: Vec<Destination> = {
            let index = self.index.read().expect("index lock poisoned");
            index
                .keys()
                .filter(|d| d.address == address)
                .cloned()
                .collect()
        };
        for destination in doomed {
            let modules = self
                .index
                .write()
                .expect("index lock poisoned")
                .remove(&destination)
                .unwrap_or_default();
            for module in modules {
                let result = self.persist.update(&module, |data| {
                    data.remove_destination(address);
                });
                if let Err(e) = result {
                    warn!(
                        "Unable to purge subscriptions of '{}' from module '{}': {}",
                        address, module, e
                    );
                }
            }
        }

        self.transient
            .write()
            .expect("transient lock poisoned")
            .retain(|s| s.destination.address != address);
        info!("Purged all subscriptions for destination '{}'", address);
    }

    /// The transient subscribers interested in an event on a module.
    fn transient_targets(&self, event: EventType, module: &str) -> Vec<Subscription> {
        self.transient
            .read()
            .expect("transient lock poisoned")
            .iter()
            .filter(|s| {
                s.event == event && s.module.as_deref().map(|m| m == module).unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    /// The durable module-change subscribers of a module, read from its
    /// persist file.
    fn module_change_targets(&self, module: &str) -> Vec<PersistedSubscription> {
        match self.persist.load(module) {
            Ok(data) => data
                .subscriptions
                .into_iter()
                .filter(|s| s.event == EventType::ModuleChange)
                .collect(),
            Err(e) => {
                warn!("Unable to read subscriptions of module '{}': {}", module, e);
                Vec::new()
            }
        }
    }

    pub fn notify_module_install(
        self: &Arc<Self>,
        module: &str,
        revision: Option<&str>,
        installed: bool,
    ) {
        for sub in self.transient_targets(EventType::ModuleInstall, module) {
            let event = Notification::ModuleInstall {
                dst_id: sub.destination.id,
                module: module.to_string(),
                revision: revision.map(String::from),
                installed,
            };
            self.spawn_delivery(sub.destination.address, event);
        }
    }

    pub fn notify_feature_enable(self: &Arc<Self>, module: &str, feature: &str, enabled: bool) {
        for sub in self.transient_targets(EventType::FeatureEnable, module) {
            let event = Notification::FeatureEnable {
                dst_id: sub.destination.id,
                module: module.to_string(),
                feature: feature.to_string(),
                enabled,
            };
            self.spawn_delivery(sub.destination.address, event);
        }
    }

    /// Emits module-change events for committed modules.  Called only after
    /// the commit's persist step has completed.
    pub fn notify_module_change(self: &Arc<Self>, modules: &[String], datastore: Datastore) {
        for module in modules {
            for sub in self.module_change_targets(module) {
                let event = Notification::ModuleChange {
                    dst_id: sub.dst_id,
                    module: module.clone(),
                    datastore,
                };
                self.spawn_delivery(sub.dst_address, event);
            }
        }
    }

    fn spawn_delivery(self: &Arc<Self>, address: String, event: Notification) {
        let processor = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = deliver(&address, event).await {
                warn!("Notification delivery to '{}' failed: {}", address, e);
                processor.purge_destination(&address);
            }
        });
    }
}

/// Connects to the destination and writes one framed notification.
async fn deliver(address: &str, event: Notification) -> std::io::Result<()> {
    let stream = UnixStream::connect(address).await?;
    let mut framed = Framed::new(stream, MessageCodec::new());
    framed
        .send(Message::Notification {
            session_id: 0,
            event,
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    debug!("Delivered notification to '{}'", address);
    Ok(())
}
