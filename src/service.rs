// Station Service - CRUD operations on top of a StationStore
//
// Each call is independent: no transactions span two operations, so concurrent
// create/delete calls interleave at store granularity.

use crate::db::StationStore;
use crate::error::StationResult;
use crate::station::{DeleteAck, NewStation, Station, StationUpdate, UpdateAck};
use std::sync::Arc;

#[derive(Clone)]
pub struct StationService {
    store: Arc<dyn StationStore>,
}

impl StationService {
    pub fn new(store: Arc<dyn StationStore>) -> Self {
        StationService { store }
    }

    /// Ids of every stored station, in the store's natural order
    pub fn list_ids(&self) -> StationResult<Vec<i64>> {
        self.store.list_ids()
    }

    /// First station with this id, if any
    pub fn get(&self, id: i64) -> StationResult<Option<Station>> {
        self.store.find_one(id)
    }

    /// Create a station with random id/actual/target.
    ///
    /// No collision check is made: two creates may yield the same `id`, and both rows persist.
    pub fn create(&self) -> StationResult<Station> {
        let station = NewStation::random(&mut rand::thread_rng());
        self.insert(station)
    }

    pub fn insert(&self, station: NewStation) -> StationResult<Station> {
        self.store.insert(station)
    }

    /// Set `actual` (and `date` when given) on the first match; `target` is never touched
    pub fn update(&self, id: i64, update: StationUpdate) -> StationResult<UpdateAck> {
        self.store.update_one(id, &update)
    }

    pub fn delete(&self, id: i64) -> StationResult<DeleteAck> {
        self.store.delete_one(id)
    }

    pub fn count(&self) -> StationResult<usize> {
        self.store.count()
    }
}
