use std::{collections::HashMap, fmt, hash::Hash};

use super::model::{Driver, DriverGuid};

/// Key of a disconnected driver record. A driver who drove several car models during the session
/// keeps one disconnected record per model, each ordered independently.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CarSlot {
    pub guid: DriverGuid,
    pub car_model: String,
}

impl CarSlot {
    pub fn new(guid: DriverGuid, car_model: impl Into<String>) -> Self {
        Self {
            guid,
            car_model: car_model.into(),
        }
    }

    pub fn of(driver: &Driver) -> Self {
        Self::new(driver.guid().clone(), driver.car_model())
    }
}

impl fmt::Display for CarSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.guid, self.car_model)
    }
}

/// Drivers keyed by `K` plus an explicit display order. The order is only ever changed through
/// [`DriverMap::set_order`] or by appending new keys, never derived from the map's iteration order.
#[derive(Clone, Debug, PartialEq)]
pub struct DriverMap<K: Eq + Hash> {
    drivers: HashMap<K, Driver>,
    order: Vec<K>,
}

impl<K: Eq + Hash> Default for DriverMap<K> {
    fn default() -> Self {
        Self {
            drivers: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<K: Clone + Eq + Hash> DriverMap<K> {
    pub fn get(&self, key: &K) -> Option<&Driver> {
        self.drivers.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut Driver> {
        self.drivers.get_mut(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.drivers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Inserts or overwrites a driver. New keys are appended to the end of the order.
    pub fn insert(&mut self, key: K, driver: Driver) -> Option<Driver> {
        if !self.drivers.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.drivers.insert(key, driver)
    }

    pub fn remove(&mut self, key: &K) -> Option<Driver> {
        let removed = self.drivers.remove(key)?;
        self.order.retain(|k| k != key);
        Some(removed)
    }

    pub fn order(&self) -> &[K] {
        &self.order
    }

    /// Replaces the display order. Keys unknown to the map are dropped and keys missing from
    /// `order` keep their relative position at the end. Returns whether the order changed.
    pub fn set_order(&mut self, order: Vec<K>) -> bool {
        let mut new_order: Vec<K> = Vec::with_capacity(self.drivers.len());
        for key in order {
            if self.drivers.contains_key(&key) && !new_order.contains(&key) {
                new_order.push(key);
            }
        }
        for key in &self.order {
            if !new_order.contains(key) {
                new_order.push(key.clone());
            }
        }

        if new_order == self.order {
            return false;
        }
        self.order = new_order;
        true
    }

    /// Drivers in display order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &Driver)> {
        self.order
            .iter()
            .filter_map(|key| self.drivers.get_key_value(key))
    }

    pub fn drivers(&self) -> &HashMap<K, Driver> {
        &self.drivers
    }
}
