//! The kill switch cell.
//!
//! Everything that reads or writes the block flag goes through [`FlagCell`].
//! In production the cell is the `BLOCK_ALL` map shared with the classifiers
//! ([`MapCell`]); [`AtomicFlag`] is the same contract over a plain atomic.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use aya::maps::{Array, Map, MapData};
use kac_net_common::{BlockFlag, FLAG_INDEX, FLAG_MAP};

use crate::error::StateError;

pub trait FlagCell {
    fn load(&self) -> Result<BlockFlag, StateError>;
    fn store(&mut self, flag: BlockFlag) -> Result<(), StateError>;
}

/// Lock-free in-process cell. Reads and writes are single atomic word
/// operations; the last store wins.
#[derive(Debug, Default)]
pub struct AtomicFlag(AtomicU32);

impl AtomicFlag {
    pub const fn new(flag: BlockFlag) -> Self {
        Self(AtomicU32::new(flag.as_raw()))
    }

    #[inline]
    pub fn read(&self) -> BlockFlag {
        BlockFlag::from_raw(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn write(&self, flag: BlockFlag) {
        self.0.store(flag.as_raw(), Ordering::Release);
    }
}

impl FlagCell for AtomicFlag {
    fn load(&self) -> Result<BlockFlag, StateError> {
        Ok(self.read())
    }

    fn store(&mut self, flag: BlockFlag) -> Result<(), StateError> {
        self.write(flag);
        Ok(())
    }
}

impl FlagCell for Arc<AtomicFlag> {
    fn load(&self) -> Result<BlockFlag, StateError> {
        Ok(self.read())
    }

    fn store(&mut self, flag: BlockFlag) -> Result<(), StateError> {
        self.write(flag);
        Ok(())
    }
}

/// The `BLOCK_ALL` array map. One lookup or one update per call, each of
/// which the kernel performs as a single 32-bit access.
pub struct MapCell {
    map: Map,
}

impl MapCell {
    pub fn new(map: Map) -> Result<Self, StateError> {
        Array::<_, u32>::try_from(&map)?;
        Ok(Self { map })
    }

    /// Reopens a map pinned by a running daemon.
    pub fn from_pin<P: AsRef<Path>>(path: P) -> Result<Self, StateError> {
        let data = MapData::from_pin(path)?;
        Self::new(Map::Array(data))
    }

    pub fn pin<P: AsRef<Path>>(&self, path: P) -> Result<(), StateError> {
        match &self.map {
            Map::Array(data) => Ok(data.pin(path)?),
            _ => Err(StateError::NotAnArray(FLAG_MAP)),
        }
    }
}

impl FlagCell for MapCell {
    fn load(&self) -> Result<BlockFlag, StateError> {
        let array = Array::<_, u32>::try_from(&self.map)?;
        Ok(BlockFlag::from_raw(array.get(&FLAG_INDEX, 0)?))
    }

    fn store(&mut self, flag: BlockFlag) -> Result<(), StateError> {
        let mut array = Array::<_, u32>::try_from(&mut self.map)?;
        array.set(FLAG_INDEX, flag.as_raw(), 0)?;
        Ok(())
    }
}
