use std::collections::HashMap;

use super::model::{CarId, DriverGuid};

/// Bidirectional car id <-> GUID mapping for the cars currently on the server.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CarIdIndex {
    by_car: HashMap<CarId, DriverGuid>,
    by_guid: HashMap<DriverGuid, CarId>,
}

impl CarIdIndex {
    pub fn from_map(map: HashMap<CarId, DriverGuid>) -> Self {
        let mut index = Self::default();
        for (car_id, guid) in map {
            index.insert(car_id, guid);
        }
        index
    }

    /// Binds `car_id` to `guid`, dropping any previous binding of either side. Car ids are
    /// reused by the server once a slot frees up.
    pub fn insert(&mut self, car_id: CarId, guid: DriverGuid) {
        if let Some(previous_guid) = self.by_car.remove(&car_id) {
            self.by_guid.remove(&previous_guid);
        }
        if let Some(previous_car) = self.by_guid.remove(&guid) {
            self.by_car.remove(&previous_car);
        }
        self.by_car.insert(car_id, guid.clone());
        self.by_guid.insert(guid, car_id);
    }

    pub fn guid(&self, car_id: CarId) -> Option<&DriverGuid> {
        self.by_car.get(&car_id)
    }

    pub fn car_id(&self, guid: &DriverGuid) -> Option<CarId> {
        self.by_guid.get(guid).copied()
    }

    pub fn remove_guid(&mut self, guid: &DriverGuid) -> Option<CarId> {
        let car_id = self.by_guid.remove(guid)?;
        self.by_car.remove(&car_id);
        Some(car_id)
    }

    pub fn len(&self) -> usize {
        self.by_car.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_car.is_empty()
    }
}
