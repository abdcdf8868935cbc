use std::collections::BTreeMap;
use std::sync::Mutex;

use keep_schema::{HookHeightRow, KeepRow, SectionRow};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeepStoreError {
    #[error("keep {0} is not persisted")]
    MissingKeep(u16),
    #[error("section {section} of keep {keep} is not persisted")]
    MissingSection { keep: u16, section: u8 },
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Durable storage for keep records. One implementation per backend; the
/// runtime only ever sees this trait.
///
/// `save_keep` upserts. `load_keep` returning `Ok(None)` means the row was
/// never written, which callers treat differently from a backend failure.
pub trait KeepStore: Send + Sync {
    fn load_keep(&self, keep_id: u16) -> Result<Option<KeepRow>, KeepStoreError>;
    fn save_keep(&self, row: &KeepRow) -> Result<(), KeepStoreError>;
    fn delete_keep(&self, keep_id: u16) -> Result<(), KeepStoreError>;

    fn load_sections(&self, keep_id: u16) -> Result<Vec<SectionRow>, KeepStoreError>;
    fn save_section(&self, row: &SectionRow) -> Result<(), KeepStoreError>;
    fn delete_section(&self, keep_id: u16, section_id: u8) -> Result<(), KeepStoreError>;

    /// Height-band elevation fixture for a hook point, if one is recorded.
    fn hook_height(&self, hook_id: u8, height: u8) -> Result<Option<HookHeightRow>, KeepStoreError>;
}

/// In-memory backend. Used by the default server build and by tests; survives
/// for the lifetime of the process only.
#[derive(Debug, Default)]
pub struct MemoryKeepStore {
    inner: Mutex<MemoryTables>,
}

#[derive(Debug, Default)]
struct MemoryTables {
    keeps: BTreeMap<u16, KeepRow>,
    sections: BTreeMap<(u16, u8), SectionRow>,
    hook_heights: BTreeMap<(u8, u8), HookHeightRow>,
}

impl MemoryKeepStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an elevation fixture row. Backends loading from disk do this at
    /// startup; tests call it directly.
    pub fn put_hook_height(&self, row: HookHeightRow) {
        let mut tables = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        tables.hook_heights.insert((row.hook_id, row.height), row);
    }

    pub fn keep_count(&self) -> usize {
        let tables = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        tables.keeps.len()
    }
}

impl KeepStore for MemoryKeepStore {
    fn load_keep(&self, keep_id: u16) -> Result<Option<KeepRow>, KeepStoreError> {
        let tables = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        Ok(tables.keeps.get(&keep_id).cloned())
    }

    fn save_keep(&self, row: &KeepRow) -> Result<(), KeepStoreError> {
        let mut tables = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        tables.keeps.insert(row.keep_id, row.clone());
        Ok(())
    }

    fn delete_keep(&self, keep_id: u16) -> Result<(), KeepStoreError> {
        let mut tables = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if tables.keeps.remove(&keep_id).is_none() {
            return Err(KeepStoreError::MissingKeep(keep_id));
        }
        tables.sections.retain(|(keep, _), _| *keep != keep_id);
        Ok(())
    }

    fn load_sections(&self, keep_id: u16) -> Result<Vec<SectionRow>, KeepStoreError> {
        let tables = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        Ok(tables
            .sections
            .range((keep_id, u8::MIN)..=(keep_id, u8::MAX))
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn save_section(&self, row: &SectionRow) -> Result<(), KeepStoreError> {
        let mut tables = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        tables
            .sections
            .insert((row.keep_id, row.section_id), row.clone());
        Ok(())
    }

    fn delete_section(&self, keep_id: u16, section_id: u8) -> Result<(), KeepStoreError> {
        let mut tables = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if tables.sections.remove(&(keep_id, section_id)).is_none() {
            return Err(KeepStoreError::MissingSection {
                keep: keep_id,
                section: section_id,
            });
        }
        Ok(())
    }

    fn hook_height(&self, hook_id: u8, height: u8) -> Result<Option<HookHeightRow>, KeepStoreError> {
        let tables = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        Ok(tables.hook_heights.get(&(hook_id, height)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_keep(keep_id: u16) -> KeepRow {
        KeepRow {
            keep_id,
            name: format!("Caer Test {keep_id}"),
            region: 163,
            x: 1000,
            y: 2000,
            z: 0,
            heading: 512,
            realm: 1,
            original_realm: 1,
            kind: 0,
            shape: 0,
            level: 4,
            base_level: 50,
            difficulty_ardan: 1,
            difficulty_veska: 2,
            difficulty_morwen: 3,
            claimed_guild: String::new(),
        }
    }

    #[test]
    fn keep_rows_round_trip() {
        let store = MemoryKeepStore::new();
        let row = sample_keep(42);
        store.save_keep(&row).unwrap();
        assert_eq!(store.load_keep(42).unwrap(), Some(row));
        assert_eq!(store.load_keep(43).unwrap(), None);
    }

    #[test]
    fn save_keep_upserts() {
        let store = MemoryKeepStore::new();
        let mut row = sample_keep(42);
        store.save_keep(&row).unwrap();
        row.level = 7;
        row.claimed_guild = "Night Watch".into();
        store.save_keep(&row).unwrap();
        let loaded = store.load_keep(42).unwrap().unwrap();
        assert_eq!(loaded.level, 7);
        assert_eq!(loaded.claimed_guild, "Night Watch");
        assert_eq!(store.keep_count(), 1);
    }

    #[test]
    fn delete_keep_removes_its_sections() {
        let store = MemoryKeepStore::new();
        store.save_keep(&sample_keep(42)).unwrap();
        store.save_keep(&sample_keep(43)).unwrap();
        for section_id in 0..3 {
            store
                .save_section(&SectionRow {
                    keep_id: 42,
                    section_id,
                    skin: 10,
                    health: 4_000,
                    max_health: 4_000,
                    razed: false,
                })
                .unwrap();
        }
        store
            .save_section(&SectionRow {
                keep_id: 43,
                section_id: 0,
                skin: 11,
                health: 2_000,
                max_health: 2_000,
                razed: false,
            })
            .unwrap();

        store.delete_keep(42).unwrap();
        assert!(store.load_sections(42).unwrap().is_empty());
        assert_eq!(store.load_sections(43).unwrap().len(), 1);
        assert!(matches!(
            store.delete_keep(42),
            Err(KeepStoreError::MissingKeep(42))
        ));
    }

    #[test]
    fn sections_come_back_ordered() {
        let store = MemoryKeepStore::new();
        for section_id in [3u8, 0, 2, 1] {
            store
                .save_section(&SectionRow {
                    keep_id: 9,
                    section_id,
                    skin: 10,
                    health: 4_000,
                    max_health: 4_000,
                    razed: false,
                })
                .unwrap();
        }
        let ids: Vec<u8> = store
            .load_sections(9)
            .unwrap()
            .iter()
            .map(|row| row.section_id)
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn missing_section_delete_reports_both_ids() {
        let store = MemoryKeepStore::new();
        let err = store.delete_section(7, 2).unwrap_err();
        assert_eq!(
            err.to_string(),
            "section 2 of keep 7 is not persisted"
        );
    }

    #[test]
    fn hook_heights_resolve_by_pair() {
        let store = MemoryKeepStore::new();
        store.put_hook_height(HookHeightRow {
            hook_id: 97,
            height: 2,
            z: 768,
        });
        let row = store.hook_height(97, 2).unwrap().unwrap();
        assert_eq!(row.z, 768);
        assert!(store.hook_height(97, 3).unwrap().is_none());
    }
}
