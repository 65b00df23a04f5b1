/// Persisted space store and per-tab overlays (local storage)
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::error::{HostResult, SpaceError, SpaceResult};
use crate::host::{HostBrowser, StorageArea};
use crate::model::{GroupId, PinnedTabState, Space, TabId, TabNameOverride};

pub const SPACES_KEY: &str = "spaces";
pub const ACTIVE_SPACE_KEY: &str = "activeSpaceId";
pub const NAME_OVERRIDES_KEY: &str = "tabNameOverridesById";
pub const PINNED_STATES_KEY: &str = "pinnedTabStatesById";
pub const ARCHIVE_KEY: &str = "archivedTabs";
pub const ACTIVITY_KEY: &str = "tabLastActivity";

/// Position of a tab id inside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub space_id: GroupId,
    pub bookmarked: bool,
    pub index: usize,
}

/// All spaces in sidebar order.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SpaceStore {
    pub spaces: Vec<Space>,
}

impl SpaceStore {
    pub fn new() -> Self {
        SpaceStore { spaces: Vec::new() }
    }

    pub fn get(&self, space_id: GroupId) -> Option<&Space> {
        self.spaces.iter().find(|s| s.id == space_id)
    }

    pub fn get_mut(&mut self, space_id: GroupId) -> Option<&mut Space> {
        self.spaces.iter_mut().find(|s| s.id == space_id)
    }

    pub fn require_mut(&mut self, space_id: GroupId) -> SpaceResult<&mut Space> {
        self.get_mut(space_id)
            .ok_or_else(|| SpaceError::UnknownSpace(space_id.to_string()))
    }

    pub fn by_uuid(&self, uuid: &str) -> Option<&Space> {
        self.spaces.iter().find(|s| s.uuid == uuid)
    }

    /// Case-insensitive name lookup.
    pub fn by_name(&self, name: &str) -> Option<&Space> {
        let wanted = name.trim().to_lowercase();
        self.spaces.iter().find(|s| s.name.to_lowercase() == wanted)
    }

    /// Trimmed name, or an error if it is empty or taken by another active space.
    pub fn validate_name(&self, name: &str, except: Option<GroupId>) -> SpaceResult<String> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(SpaceError::EmptyName);
        }
        let wanted = trimmed.to_lowercase();
        let taken = self.spaces.iter().any(|s| {
            !s.inactive && Some(s.id) != except && s.name.to_lowercase() == wanted
        });
        if taken {
            Err(SpaceError::DuplicateName(trimmed.to_string()))
        } else {
            Ok(trimmed.to_string())
        }
    }

    pub fn add(&mut self, space: Space) {
        self.spaces.push(space);
    }

    pub fn remove(&mut self, space_id: GroupId) -> Option<Space> {
        let pos = self.spaces.iter().position(|s| s.id == space_id)?;
        Some(self.spaces.remove(pos))
    }

    /// Space currently holding the tab, if any.
    pub fn space_of(&self, tab_id: TabId) -> Option<GroupId> {
        self.spaces.iter().find(|s| s.contains(tab_id)).map(|s| s.id)
    }

    /// Where the tab sits: space, whether bookmarked, position in that array.
    pub fn placement_of(&self, tab_id: TabId) -> Option<Placement> {
        self.spaces.iter().find_map(|s| {
            if let Some(index) = s.space_bookmarks.iter().position(|id| *id == tab_id) {
                return Some(Placement { space_id: s.id, bookmarked: true, index });
            }
            s.temporary_tabs
                .iter()
                .position(|id| *id == tab_id)
                .map(|index| Placement { space_id: s.id, bookmarked: false, index })
        })
    }

    /// Put a tab back where `placement_of` found it. No-op if the space is gone.
    pub fn restore_placement(&mut self, tab_id: TabId, placement: Placement) {
        if let Some(space) = self.get_mut(placement.space_id) {
            let list = if placement.bookmarked {
                &mut space.space_bookmarks
            } else {
                &mut space.temporary_tabs
            };
            let at = placement.index.min(list.len());
            list.insert(at, tab_id);
        }
    }

    /// Remove the id from every space. Returns the spaces that changed.
    pub fn remove_tab_everywhere(&mut self, tab_id: TabId) -> Vec<GroupId> {
        self.spaces
            .iter_mut()
            .filter_map(|s| s.remove_tab(tab_id).then_some(s.id))
            .collect()
    }

    /// Rebind a space to a recreated tab-group id.
    pub fn replace_id(&mut self, old_id: GroupId, new_id: GroupId) -> bool {
        match self.get_mut(old_id) {
            Some(space) => {
                space.id = new_id;
                true
            }
            None => false,
        }
    }

    /// Drop ids that are no longer open. Returns how many were dropped.
    pub fn prune_missing(&mut self, live: &HashSet<TabId>) -> usize {
        let mut dropped = 0;
        for space in self.spaces.iter_mut() {
            let before = space.space_bookmarks.len() + space.temporary_tabs.len();
            space.space_bookmarks.retain(|id| live.contains(id));
            space.temporary_tabs.retain(|id| live.contains(id));
            if space.last_tab.is_some_and(|id| !live.contains(&id)) {
                space.last_tab = None;
            }
            dropped += before - space.space_bookmarks.len() - space.temporary_tabs.len();
            space.normalize();
        }
        dropped
    }

    pub fn is_consistent(&self) -> bool {
        self.spaces.iter().all(Space::is_disjoint)
    }
}

/// Per-tab overlays keyed by ephemeral tab id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlays {
    pub pinned: HashMap<TabId, PinnedTabState>,
    pub names: HashMap<TabId, TabNameOverride>,
}

impl Overlays {
    pub fn forget_tab(&mut self, tab_id: TabId) {
        self.pinned.remove(&tab_id);
        self.names.remove(&tab_id);
    }

    pub fn prune_missing(&mut self, live: &HashSet<TabId>) {
        self.pinned.retain(|id, _| live.contains(id));
        self.names.retain(|id, _| live.contains(id));
    }

    /// Tab whose pinned state points at the bookmark.
    pub fn tab_for_bookmark(&self, bookmark_id: &str) -> Option<TabId> {
        self.pinned
            .iter()
            .find(|(_, state)| state.bookmark_id.as_deref() == Some(bookmark_id))
            .map(|(tab_id, _)| *tab_id)
    }
}

pub(crate) async fn load_json<H: HostBrowser, T: DeserializeOwned + Default>(host: &H, key: &str) -> HostResult<T> {
    match host.storage_get(StorageArea::Local, key).await? {
        Some(value) if !value.is_null() => match serde_json::from_value(value) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                log::warn!("Discarding unreadable {}: {}", key, e);
                Ok(T::default())
            }
        },
        _ => Ok(T::default()),
    }
}

pub(crate) async fn save_json<H: HostBrowser, T: Serialize>(host: &H, key: &str, value: &T) -> HostResult<()> {
    let json = serde_json::to_value(value)?;
    host.storage_set(StorageArea::Local, key, json).await
}

pub async fn load_spaces<H: HostBrowser>(host: &H) -> HostResult<SpaceStore> {
    let spaces: Vec<Space> = load_json(host, SPACES_KEY).await?;
    Ok(SpaceStore { spaces })
}

pub async fn save_spaces<H: HostBrowser>(host: &H, store: &SpaceStore) -> HostResult<()> {
    save_json(host, SPACES_KEY, &store.spaces).await
}

pub async fn load_active_space<H: HostBrowser>(host: &H) -> HostResult<Option<GroupId>> {
    load_json(host, ACTIVE_SPACE_KEY).await
}

pub async fn save_active_space<H: HostBrowser>(host: &H, space_id: Option<GroupId>) -> HostResult<()> {
    save_json(host, ACTIVE_SPACE_KEY, &space_id).await
}

pub async fn load_overlays<H: HostBrowser>(host: &H) -> HostResult<Overlays> {
    Ok(Overlays {
        pinned: load_json(host, PINNED_STATES_KEY).await?,
        names: load_json(host, NAME_OVERRIDES_KEY).await?,
    })
}

pub async fn save_overlays<H: HostBrowser>(host: &H, overlays: &Overlays) -> HostResult<()> {
    save_json(host, PINNED_STATES_KEY, &overlays.pinned).await?;
    save_json(host, NAME_OVERRIDES_KEY, &overlays.names).await
}
