//! Characteristic Registry
//!
//! Maps characteristic UUIDs to the [`Channel`] that owns them. Populated once
//! from a [`GattProfile`] when the transport is constructed and queried while
//! inbound writes are drained.

use crate::error::{NodeError, Result};
use crate::infrastructure::bluetooth::protocol::{Channel, GattProfile, Service};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    by_uuid: HashMap<Uuid, Channel>,
    by_channel: HashMap<Channel, Uuid>,
    services: HashMap<Service, Uuid>,
}

impl ChannelRegistry {
    /// Build a registry covering every channel of the profile
    pub fn from_profile(profile: &GattProfile) -> Result<Self> {
        let mut registry = Self::default();

        for service in [Service::Config, Service::Imu, Service::FileTx] {
            let uuid = parse_uuid(profile.service_uuid(service))?;
            registry.services.insert(service, uuid);
        }

        for channel in Channel::ALL {
            let uuid = parse_uuid(profile.channel_uuid(channel))?;
            registry.register(uuid, channel);
        }

        Ok(registry)
    }

    /// Bind a characteristic UUID to a channel, replacing any earlier binding
    pub fn register(&mut self, uuid: Uuid, channel: Channel) {
        if let Some(previous) = self.by_uuid.insert(uuid, channel) {
            if previous != channel {
                warn!("UUID {} rebound from {:?} to {:?}", uuid, previous, channel);
                self.by_channel.remove(&previous);
            }
        }
        self.by_channel.insert(channel, uuid);
    }

    pub fn resolve(&self, uuid: &Uuid) -> Option<Channel> {
        self.by_uuid.get(uuid).copied()
    }

    pub fn uuid_of(&self, channel: Channel) -> Option<Uuid> {
        self.by_channel.get(&channel).copied()
    }

    pub fn service_uuid(&self, service: Service) -> Option<Uuid> {
        self.services.get(&service).copied()
    }

    pub fn len(&self) -> usize {
        self.by_uuid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uuid.is_empty()
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|source| NodeError::InvalidUuid {
        value: value.to_string(),
        source,
    })
}
