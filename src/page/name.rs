//! # Name Page
//!
//! Per-revision name dictionary: maps dense name keys to interned name
//! bytes plus a usage count, partitioned by record-kind class. Read
//! transactions serve `name`, `raw_name`, and `name_count` lookups from
//! here; writers intern names at record-creation time and carry the page
//! forward copy-on-write like every other page.
//!
//! ## Wire Format
//!
//! ```text
//! i32 class_count
//! repeat class_count times:
//!     u8  kind_class
//!     i32 next_key
//!     i32 entry_count
//!     repeat entry_count times:
//!         i32 name_key
//!         u32 count
//!         i32 len
//!         bytes name (UTF-8)
//! ```

use eyre::Result;

use hashbrown::HashMap;

use crate::encoding::ByteBuf;
use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Eq)]
struct NameEntry {
    count: u32,
    name: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct NameMap {
    entries: HashMap<i32, NameEntry>,
    next_key: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamePage {
    maps: HashMap<u8, NameMap>,
}

impl NamePage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `name` under `kind_class`, returning its key. Re-interning
    /// an existing name bumps its usage count and returns the same key.
    pub fn create_name(&mut self, name: &str, kind_class: u8) -> i32 {
        let map = self.maps.entry(kind_class).or_default();
        if let Some((&key, _)) = map
            .entries
            .iter()
            .find(|(_, entry)| entry.name == name.as_bytes())
        {
            let entry = map.entries.get_mut(&key).unwrap(); // INVARIANT: key was just found
            entry.count += 1;
            return key;
        }
        let key = map.next_key;
        map.next_key += 1;
        map.entries.insert(
            key,
            NameEntry {
                count: 1,
                name: name.as_bytes().to_vec(),
            },
        );
        key
    }

    pub fn name(&self, name_key: i32, kind_class: u8) -> Option<&str> {
        self.raw_name(name_key, kind_class)
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    pub fn raw_name(&self, name_key: i32, kind_class: u8) -> Option<&[u8]> {
        self.maps
            .get(&kind_class)
            .and_then(|map| map.entries.get(&name_key))
            .map(|entry| entry.name.as_slice())
    }

    pub fn count(&self, name_key: i32, kind_class: u8) -> u32 {
        self.maps
            .get(&kind_class)
            .and_then(|map| map.entries.get(&name_key))
            .map_or(0, |entry| entry.count)
    }

    pub fn serialize(&self, out: &mut ByteBuf) {
        out.write_i32(self.maps.len() as i32);
        let mut classes: Vec<u8> = self.maps.keys().copied().collect();
        classes.sort_unstable();
        for class in classes {
            let map = &self.maps[&class];
            out.write_u8(class);
            out.write_i32(map.next_key);
            out.write_i32(map.entries.len() as i32);
            let mut keys: Vec<i32> = map.entries.keys().copied().collect();
            keys.sort_unstable();
            for key in keys {
                let entry = &map.entries[&key];
                out.write_i32(key);
                out.write_u32(entry.count);
                out.write_i32(entry.name.len() as i32);
                out.write_bytes(&entry.name);
            }
        }
    }

    pub fn deserialize(input: &mut ByteBuf) -> Result<Self> {
        let class_count = input.read_i32()?;
        if class_count < 0 {
            return Err(
                StorageError::corrupt(format!("negative name class count {class_count}")).into(),
            );
        }
        let mut maps = HashMap::new();
        for _ in 0..class_count {
            let class = input.read_u8()?;
            let next_key = input.read_i32()?;
            let entry_count = input.read_i32()?;
            if entry_count < 0 {
                return Err(StorageError::corrupt(format!(
                    "negative name entry count {entry_count}"
                ))
                .into());
            }
            let mut entries = HashMap::with_capacity(entry_count as usize);
            for _ in 0..entry_count {
                let key = input.read_i32()?;
                let count = input.read_u32()?;
                let len = input.read_i32()?;
                if len < 0 {
                    return Err(
                        StorageError::corrupt(format!("negative name length {len}")).into(),
                    );
                }
                let name = input.read_vec(len as usize)?;
                entries.insert(key, NameEntry { count, name });
            }
            maps.insert(class, NameMap { entries, next_key });
        }
        Ok(Self { maps })
    }
}
