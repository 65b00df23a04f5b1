/// Space lifecycle: startup discovery, create/activate/delete, switching and
/// pinned-section folders.
///
/// A space is active while bound to a live tab-group and inactive when only
/// its bookmark folder remains. Group ids are not stable across recreation,
/// so rebinding replaces every stored reference to the old id.
use std::collections::{HashMap, HashSet};

use super::{SpaceEngine, SyncSource};
use crate::error::{HostError, SpaceError, SpaceResult};
use crate::guards::FlagGuard;
use crate::host::{CreateTabProps, GroupUpdate, HostBrowser, StorageArea, TabQuery, TabUpdate};
use crate::model::{BookmarkId, GroupId, HostGroup, HostTab, PinnedTabState, Space, SpaceColor, TabId};
use crate::projection::{empty_view, pinned_from_tree, FolderNode, PinnedNode, TabRow};
use crate::resolver::{flatten_bookmarks, resolve};
use crate::settings::Settings;
use crate::store;

/// First free name of the form `base`, `base 2`, `base 3`, ...
fn unique_name(taken: impl Fn(&str) -> bool, base: &str) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{} {}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn collect_folder_state(nodes: &[PinnedNode], out: &mut HashSet<BookmarkId>) {
    for node in nodes {
        if let PinnedNode::Folder(folder) = node {
            if folder.collapsed {
                out.insert(folder.id.clone());
            }
            collect_folder_state(&folder.children, out);
        }
    }
}

impl<H: HostBrowser> SpaceEngine<H> {
    /// Load persisted state, discover groups and folders, rebuild every
    /// space's projection and converge host order.
    pub async fn startup(&self) -> SpaceResult<()> {
        self.reload_settings().await?;

        let report = self.mirror().merge_duplicate_folders().await?;
        if !report.is_noop() {
            log::info!("Merged duplicate space folders: {:?}", report);
        }

        let spaces = store::load_spaces(&self.host).await?;
        let overlays = store::load_overlays(&self.host).await?;
        let stored_active = store::load_active_space(&self.host).await?;
        self.load_archive().await?;

        let tabs = self.host.query_tabs(&TabQuery::default()).await?;
        let window_id = tabs
            .iter()
            .find(|t| t.active)
            .or(tabs.first())
            .map(|t| t.window_id);
        let live: HashSet<TabId> = tabs.iter().map(|t| t.id).collect();
        {
            let mut state = self.state.borrow_mut();
            state.store = spaces;
            state.overlays = overlays;
            state.window_id = window_id;
            let dropped = state.store.prune_missing(&live);
            if dropped > 0 {
                log::debug!("Dropped {} stale tab ids from stored spaces", dropped);
            }
            state.overlays.prune_missing(&live);
            state.archive.activity.retain(|id, _| live.contains(id));
        }

        let groups = self.host.query_groups(window_id).await?;
        for (group_id, title) in self.discover_groups(&groups) {
            self.host
                .update_group(
                    group_id,
                    &GroupUpdate {
                        title: Some(title),
                        ..GroupUpdate::default()
                    },
                )
                .await?;
        }
        self.discover_folders().await?;

        let ungrouped: Vec<TabId> = tabs
            .iter()
            .filter(|t| !t.pinned && t.group_id.is_none() && Some(t.window_id) == window_id)
            .map(|t| t.id)
            .collect();
        if !ungrouped.is_empty() {
            self.adopt_ungrouped(&ungrouped).await?;
        }

        let ids: Vec<GroupId> = self.state.borrow().store.spaces.iter().map(|s| s.id).collect();
        for id in &ids {
            self.resolve_space(*id).await?;
        }

        let active = {
            let state = self.state.borrow();
            let is_live = |id: &GroupId| state.store.get(*id).is_some_and(|s| !s.inactive);
            stored_active
                .filter(is_live)
                .or_else(|| {
                    tabs.iter()
                        .find(|t| t.active)
                        .and_then(|t| t.group_id)
                        .filter(is_live)
                })
                .or_else(|| state.store.spaces.iter().find(|s| !s.inactive).map(|s| s.id))
        };
        {
            let mut state = self.state.borrow_mut();
            state.active_space = active;
            state.view.active_space = active;
        }
        self.persist().await?;

        let live_spaces: Vec<GroupId> = self
            .state
            .borrow()
            .store
            .spaces
            .iter()
            .filter(|s| !s.inactive)
            .map(|s| s.id)
            .collect();
        for id in live_spaces {
            self.reconcile_ordering(id, SyncSource::Extension).await?;
        }

        self.host
            .create_alarm(&self.config.alarm_name, self.config.alarm_period_minutes)
            .await?;
        log::info!("Loaded {} spaces", ids.len());
        self.notify();
        Ok(())
    }

    /// Re-read the synced settings area and apply the log level.
    pub async fn reload_settings(&self) -> SpaceResult<Settings> {
        let raw = self.host.storage_get_all(StorageArea::Sync).await?;
        let settings = Settings::from_storage(Some(raw));
        settings.apply_log_level();
        self.state.borrow_mut().settings = settings.clone();
        Ok(settings)
    }

    /// Read persisted state and rebuild projections without touching host
    /// order. The background context runs this before sweeping idle tabs or
    /// applying a command the sidebar didn't take.
    pub async fn load_persisted(&self) -> SpaceResult<()> {
        self.reload_settings().await?;
        let spaces = store::load_spaces(&self.host).await?;
        let overlays = store::load_overlays(&self.host).await?;
        let active = store::load_active_space(&self.host).await?;
        let activity = std::mem::take(&mut self.state.borrow_mut().archive.activity);
        self.load_archive().await?;
        let ids: Vec<GroupId> = {
            let mut state = self.state.borrow_mut();
            state.store = spaces;
            state.overlays = overlays;
            state.active_space = active;
            state.view.active_space = active;
            state.archive.activity.extend(activity);
            state.store.spaces.iter().map(|s| s.id).collect()
        };
        for id in ids {
            self.resolve_space(id).await?;
        }
        Ok(())
    }

    /// Bind live groups to stored spaces. Returns group titles to push back
    /// to the host for groups that had none.
    fn discover_groups(&self, groups: &[HostGroup]) -> Vec<(GroupId, String)> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let live_ids: HashSet<GroupId> = groups.iter().map(|g| g.id).collect();
        let default_name = state.settings.default_space_name.clone();
        let mut retitled = Vec::new();

        for group in groups {
            if let Some(space) = state.store.get_mut(group.id) {
                space.inactive = false;
                continue;
            }
            let title = group.title.trim();
            let rebind = state
                .store
                .by_name(title)
                .filter(|s| !title.is_empty() && !live_ids.contains(&s.id))
                .map(|s| s.id);
            match rebind {
                Some(old_id) => {
                    log::info!("Rebinding space \"{}\" from group {} to {}", title, old_id, group.id);
                    state.store.replace_id(old_id, group.id);
                    state.retries.rename(old_id, group.id);
                    if let Some(space) = state.store.get_mut(group.id) {
                        space.inactive = false;
                    }
                }
                None => {
                    let base = if title.is_empty() { default_name.as_str() } else { title };
                    let name = unique_name(|n| state.store.by_name(n).is_some(), base);
                    if name != title {
                        retitled.push((group.id, name.clone()));
                    }
                    log::info!("Discovered tab group {} as space \"{}\"", group.id, name);
                    state.store.add(Space::new(group.id, &name, group.color));
                }
            }
        }

        for space in state.store.spaces.iter_mut() {
            if !live_ids.contains(&space.id) && !space.inactive {
                log::info!("Space \"{}\" has no tab group; marking inactive", space.name);
                space.inactive = true;
                space.space_bookmarks.clear();
                space.temporary_tabs.clear();
                space.last_tab = None;
            }
        }
        retitled
    }

    /// Folders in the container without a space become inactive spaces.
    async fn discover_folders(&self) -> SpaceResult<()> {
        let names = self.mirror().space_folder_names().await?;
        let mut state = self.state.borrow_mut();
        let used: Vec<SpaceColor> = state.store.spaces.iter().map(|s| s.color).collect();
        for name in names {
            if state.store.by_name(&name).is_some() {
                continue;
            }
            let synthetic = state.store.spaces.iter().map(|s| s.id).min().unwrap_or(0).min(0) - 1;
            let mut space = Space::new(synthetic, &name, SpaceColor::pick_unused(&used));
            space.inactive = true;
            log::debug!("Bookmark folder \"{}\" has no space; adding it as inactive", name);
            state.store.add(space);
        }
        Ok(())
    }

    /// Group loose tabs into the default-named space, creating it if needed.
    async fn adopt_ungrouped(&self, tab_ids: &[TabId]) -> SpaceResult<GroupId> {
        let _creating = FlagGuard::raise(&self.flags.creating_space);
        let (default_name, existing) = {
            let state = self.state.borrow();
            let name = state.settings.default_space_name.clone();
            let existing = state.store.by_name(&name).map(|s| (s.id, s.inactive, s.color));
            (name, existing)
        };

        let group_id = match existing {
            Some((id, false, _)) => {
                self.host.group_tabs(tab_ids, Some(id)).await?;
                id
            }
            _ => {
                let group_id = self.host.group_tabs(tab_ids, None).await?;
                let color = match existing {
                    Some((_, _, color)) => color,
                    None => {
                        let used: Vec<SpaceColor> = self.spaces().iter().map(|s| s.color).collect();
                        SpaceColor::pick_unused(&used)
                    }
                };
                self.host
                    .update_group(
                        group_id,
                        &GroupUpdate {
                            title: Some(default_name.clone()),
                            color: Some(color),
                            collapsed: None,
                        },
                    )
                    .await?;
                let mut state = self.state.borrow_mut();
                match existing {
                    Some((old_id, _, _)) => {
                        state.store.replace_id(old_id, group_id);
                        if let Some(space) = state.store.get_mut(group_id) {
                            space.inactive = false;
                        }
                    }
                    None => state.store.add(Space::new(group_id, &default_name, color)),
                }
                log::info!("Created space \"{}\" for {} loose tabs", default_name, tab_ids.len());
                group_id
            }
        };

        let mut state = self.state.borrow_mut();
        let space = state.store.require_mut(group_id)?;
        space.temporary_tabs.extend_from_slice(tab_ids);
        space.normalize();
        Ok(group_id)
    }

    /// Rebuild one space's projection from its bookmark folder and live
    /// group, and re-derive `space_bookmarks` from the resolution.
    pub(crate) async fn resolve_space(&self, space_id: GroupId) -> SpaceResult<()> {
        let (name, inactive) = {
            let state = self.state.borrow();
            let space = state
                .store
                .get(space_id)
                .ok_or_else(|| SpaceError::UnknownSpace(space_id.to_string()))?;
            (space.name.clone(), space.inactive)
        };
        let tree = self.mirror().space_tree(&name).await?;
        let tabs: Vec<HostTab> = if inactive {
            Vec::new()
        } else {
            self.group_strip(space_id).await?
        };
        let tab_map: HashMap<TabId, HostTab> = tabs.iter().map(|t| (t.id, t.clone())).collect();

        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let mut collapsed = HashSet::new();
        if let Some(view) = state.view.space(space_id) {
            collect_folder_state(&view.pinned, &mut collapsed);
        }

        let (pinned, resolutions) = match &tree {
            Some(tree) => {
                let flat = flatten_bookmarks(tree);
                let resolutions = resolve(&flat, &tabs, &state.overlays.pinned);
                let live: HashMap<BookmarkId, TabId> = resolutions
                    .iter()
                    .filter_map(|r| r.tab_id.map(|t| (r.bookmark_id.clone(), t)))
                    .collect();
                (pinned_from_tree(tree, &live, &tab_map, &collapsed), resolutions)
            }
            None => (Vec::new(), Vec::new()),
        };

        let space = state.store.require_mut(space_id)?;
        let mut view = empty_view(space);
        view.pinned = pinned;
        state.view.upsert_space(view);
        let bookmarked = state.view.pinned_tabs(space_id);

        for resolution in &resolutions {
            if let Some(tab_id) = resolution.tab_id {
                state.overlays.pinned.insert(
                    tab_id,
                    PinnedTabState {
                        pinned_url: resolution.url.clone(),
                        bookmark_id: Some(resolution.bookmark_id.clone()),
                    },
                );
            }
        }
        for tab in &tabs {
            if !bookmarked.contains(&tab.id) && state.overlays.pinned.remove(&tab.id).is_some() {
                log::warn!("Bookmark for pinned tab {} is gone; treating it as temporary", tab.id);
            }
        }

        let space = state.store.require_mut(space_id)?;
        space.space_bookmarks = bookmarked.clone();
        if !inactive {
            let present: HashSet<TabId> = tab_map.keys().copied().collect();
            space.temporary_tabs.retain(|id| present.contains(id));
            for tab in &tabs {
                if !bookmarked.contains(&tab.id) && !space.temporary_tabs.contains(&tab.id) {
                    space.temporary_tabs.push(tab.id);
                }
            }
        }
        space.normalize();
        let temporary = space.temporary_tabs.clone();
        let invert = state.settings.invert_tab_order;
        state.view.sync_temporary(space_id, &temporary, &tab_map, invert);
        Ok(())
    }

    /// Create a space around `tab_id` (or a fresh tab) and switch to it.
    pub async fn create_space(&self, name: &str, tab_id: Option<TabId>) -> SpaceResult<GroupId> {
        let name = self.state.borrow().store.validate_name(name, None)?;
        let _creating = FlagGuard::raise(&self.flags.creating_space);

        let tab = match tab_id {
            Some(id) => self.require_tab(id).await?,
            None => {
                let window_id = self.state.borrow().window_id;
                self.host
                    .create_tab(&CreateTabProps {
                        active: true,
                        window_id,
                        ..CreateTabProps::default()
                    })
                    .await?
            }
        };
        let previous = self.state.borrow().store.space_of(tab.id);
        if let Some(from) = previous {
            if self.space(from).is_some_and(|s| s.is_bookmarked(tab.id)) {
                let pin = self.pinned_state(tab.id);
                if let Some(pin) = pin {
                    let from_name = self.space_name(from)?;
                    self.mirror().unpin(&from_name, &pin).await?;
                }
            }
        }

        let group_id = self.host.group_tabs(&[tab.id], None).await?;
        let color = {
            let used: Vec<SpaceColor> = self.spaces().iter().filter(|s| !s.inactive).map(|s| s.color).collect();
            SpaceColor::pick_unused(&used)
        };
        self.host
            .update_group(
                group_id,
                &GroupUpdate {
                    title: Some(name.clone()),
                    color: Some(color),
                    collapsed: None,
                },
            )
            .await?;
        self.mirror().ensure_space_folder(&name).await?;

        {
            let mut state = self.state.borrow_mut();
            state.store.remove_tab_everywhere(tab.id);
            state.overlays.pinned.remove(&tab.id);
            // A same-named inactive record is superseded; its folder is reused.
            let stale = state
                .store
                .by_name(&name)
                .filter(|s| s.inactive)
                .map(|s| (s.id, s.uuid.clone()));
            let mut space = Space::new(group_id, &name, color);
            if let Some((stale_id, uuid)) = stale {
                state.store.remove(stale_id);
                state.view.remove_space(stale_id);
                space.uuid = uuid;
            }
            space.temporary_tabs.push(tab.id);
            space.last_tab = Some(tab.id);
            state.view.upsert_space(empty_view(&space));
            state.store.add(space);
            state.view.remove_tab_row(tab.id);
            state
                .view
                .insert_temporary(group_id, TabRow::from_tab(&tab, None), None);
        }
        log::info!("Created space \"{}\"", name);

        if let Some(from) = previous {
            self.reconcile_ordering(from, SyncSource::Extension).await?;
        }
        self.resolve_space(group_id).await?;
        self.switch_space(group_id).await?;
        Ok(group_id)
    }

    /// Recreate a tab-group for a bookmark-only space.
    pub async fn activate_inactive_space(&self, name: &str) -> SpaceResult<GroupId> {
        let (old_id, name, color) = {
            let state = self.state.borrow();
            match state.store.by_name(name) {
                Some(space) if space.inactive => (space.id, space.name.clone(), space.color),
                Some(space) => return Err(SpaceError::DuplicateName(space.name.clone())),
                None => return Err(SpaceError::UnknownSpace(name.to_string())),
            }
        };
        let first_url = self
            .mirror()
            .space_tree(&name)
            .await?
            .as_ref()
            .and_then(|tree| flatten_bookmarks(tree).first().and_then(|b| b.url.clone()));

        let _creating = FlagGuard::raise(&self.flags.creating_space);
        let window_id = self.state.borrow().window_id;
        let tab = self
            .host
            .create_tab(&CreateTabProps {
                url: first_url,
                active: true,
                window_id,
                index: None,
            })
            .await?;
        let group_id = self.host.group_tabs(&[tab.id], None).await?;
        self.host
            .update_group(
                group_id,
                &GroupUpdate {
                    title: Some(name.clone()),
                    color: Some(color),
                    collapsed: None,
                },
            )
            .await?;

        {
            let mut state = self.state.borrow_mut();
            state.store.replace_id(old_id, group_id);
            state.retries.rename(old_id, group_id);
            state.view.replace_space_id(old_id, group_id);
            if state.active_space == Some(old_id) {
                state.active_space = Some(group_id);
            }
            let space = state.store.require_mut(group_id)?;
            space.inactive = false;
            space.temporary_tabs = vec![tab.id];
            space.last_tab = Some(tab.id);
        }
        log::info!("Activated space \"{}\" as group {}", name, group_id);

        self.resolve_space(group_id).await?;
        self.reconcile_ordering(group_id, SyncSource::Extension).await?;
        self.switch_space(group_id).await?;
        Ok(group_id)
    }

    /// Cross-context entry: activate an inactive space, or just switch to
    /// it when it is already live.
    pub async fn create_space_from_folder(&self, name: &str) -> SpaceResult<GroupId> {
        let live = self
            .state
            .borrow()
            .store
            .by_name(name)
            .filter(|s| !s.inactive)
            .map(|s| s.id);
        match live {
            Some(id) => {
                self.switch_space(id).await?;
                Ok(id)
            }
            None => self.activate_inactive_space(name).await,
        }
    }

    /// Close every member tab, drop the folder and the record.
    pub async fn delete_space(&self, space_id: GroupId) -> SpaceResult<()> {
        let (space, was_active) = {
            let mut state = self.state.borrow_mut();
            let space = state
                .store
                .remove(space_id)
                .ok_or_else(|| SpaceError::UnknownSpace(space_id.to_string()))?;
            state.view.remove_space(space_id);
            state.retries.cancel(space_id);
            for tab_id in space.canonical_order() {
                state.overlays.forget_tab(tab_id);
                state.archive.forget(tab_id);
            }
            let was_active = state.active_space == Some(space_id);
            if was_active {
                state.active_space = None;
                state.view.active_space = None;
            }
            (space, was_active)
        };
        self.persist().await?;

        let members = space.canonical_order();
        if !members.is_empty() {
            self.host.remove_tabs(&members).await?;
        }
        self.mirror().remove_space_folder(&space.name).await?;
        log::info!("Deleted space \"{}\"", space.name);

        if was_active {
            self.focus_any_space().await?;
        }
        self.notify();
        Ok(())
    }

    /// Switch to the first live space, if any remain.
    async fn focus_any_space(&self) -> SpaceResult<()> {
        let next = self
            .state
            .borrow()
            .store
            .spaces
            .iter()
            .find(|s| !s.inactive)
            .map(|s| s.id);
        match next {
            Some(id) => self.switch_space(id).await,
            None => {
                let any = self.host.query_tabs(&TabQuery::default()).await?;
                if let Some(tab) = any.first() {
                    self.host
                        .update_tab(
                            tab.id,
                            &TabUpdate {
                                url: None,
                                active: Some(true),
                            },
                        )
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// Expand the target group, collapse the others and focus the space's
    /// last tab (or its newest tab, or a fresh one).
    pub async fn switch_space(&self, space_id: GroupId) -> SpaceResult<()> {
        let (others, last_tab) = {
            let state = self.state.borrow();
            let space = state
                .store
                .get(space_id)
                .filter(|s| !s.inactive)
                .ok_or_else(|| SpaceError::UnknownSpace(space_id.to_string()))?;
            let others: Vec<GroupId> = state
                .store
                .spaces
                .iter()
                .filter(|s| !s.inactive && s.id != space_id)
                .map(|s| s.id)
                .collect();
            (others, space.last_tab)
        };

        let mut focus = None;
        if let Some(tab_id) = last_tab {
            if self.host.get_tab(tab_id).await?.is_some() {
                focus = Some(tab_id);
            }
        }
        if focus.is_none() {
            focus = self.group_strip(space_id).await?.last().map(|t| t.id);
        }
        let focus = match focus {
            Some(tab_id) => tab_id,
            None => self.open_blank_tab_in(space_id).await?,
        };

        self.host
            .update_group(
                space_id,
                &GroupUpdate {
                    collapsed: Some(false),
                    ..GroupUpdate::default()
                },
            )
            .await?;
        self.host
            .update_tab(
                focus,
                &TabUpdate {
                    url: None,
                    active: Some(true),
                },
            )
            .await?;
        for other in others {
            let collapse = GroupUpdate {
                collapsed: Some(true),
                ..GroupUpdate::default()
            };
            match self.host.update_group(other, &collapse).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => log::warn!("Group {} vanished while switching", other),
                Err(e) => return Err(e.into()),
            }
        }

        {
            let mut state = self.state.borrow_mut();
            state.active_space = Some(space_id);
            state.view.active_space = Some(space_id);
            if let Some(space) = state.store.get_mut(space_id) {
                space.last_tab = Some(focus);
            }
        }
        log::debug!("Switched to space {}", space_id);
        self.persist().await?;
        self.notify();
        Ok(())
    }

    async fn open_blank_tab_in(&self, space_id: GroupId) -> SpaceResult<TabId> {
        let _creating = FlagGuard::raise(&self.flags.creating_space);
        let window_id = self.state.borrow().window_id;
        let tab = self
            .host
            .create_tab(&CreateTabProps {
                active: true,
                window_id,
                ..CreateTabProps::default()
            })
            .await?;
        self.host.group_tabs(&[tab.id], Some(space_id)).await?;
        let mut state = self.state.borrow_mut();
        state.store.require_mut(space_id)?.temporary_tabs.push(tab.id);
        state
            .view
            .insert_temporary(space_id, TabRow::from_tab(&tab, None), None);
        Ok(tab.id)
    }

    /// The host dropped a space's group. The space keeps its folder and
    /// placeholders but loses its tabs.
    pub async fn handle_group_removed(&self, group_id: GroupId) -> SpaceResult<()> {
        let was_active = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let Some(space) = state.store.get_mut(group_id).filter(|s| !s.inactive) else {
                return Ok(());
            };
            let bookmarked = std::mem::take(&mut space.space_bookmarks);
            let temporary = std::mem::take(&mut space.temporary_tabs);
            space.inactive = true;
            space.last_tab = None;
            log::info!("Tab group for \"{}\" was removed; space is now inactive", space.name);

            for tab_id in &bookmarked {
                state.view.convert_to_placeholder(*tab_id);
                state.overlays.pinned.remove(tab_id);
            }
            if let Some(view) = state.view.space_mut(group_id) {
                view.inactive = true;
                view.temporary.clear();
            }
            for tab_id in &temporary {
                state.view.remove_tab_row(*tab_id);
            }
            state.retries.cancel(group_id);
            let was_active = state.active_space == Some(group_id);
            if was_active {
                state.active_space = None;
                state.view.active_space = None;
            }
            was_active
        };
        self.persist().await?;
        if was_active {
            self.focus_any_space().await?;
        }
        self.notify();
        Ok(())
    }

    pub async fn rename_space(&self, space_id: GroupId, name: &str) -> SpaceResult<()> {
        let (new_name, old_name, inactive) = {
            let state = self.state.borrow();
            let new_name = state.store.validate_name(name, Some(space_id))?;
            let space = state
                .store
                .get(space_id)
                .ok_or_else(|| SpaceError::UnknownSpace(space_id.to_string()))?;
            (new_name, space.name.clone(), space.inactive)
        };
        if !inactive {
            self.host
                .update_group(
                    space_id,
                    &GroupUpdate {
                        title: Some(new_name.clone()),
                        ..GroupUpdate::default()
                    },
                )
                .await?;
        }
        self.mirror().rename_space_folder(&old_name, &new_name).await?;
        {
            let mut state = self.state.borrow_mut();
            if let Some(space) = state.store.get_mut(space_id) {
                space.name = new_name.clone();
            }
            if let Some(view) = state.view.space_mut(space_id) {
                view.name = new_name.clone();
            }
        }
        log::info!("Renamed space \"{}\" to \"{}\"", old_name, new_name);
        self.persist().await?;
        self.notify();
        Ok(())
    }

    pub async fn set_space_color(&self, space_id: GroupId, color: SpaceColor) -> SpaceResult<()> {
        let inactive = self
            .space(space_id)
            .map(|s| s.inactive)
            .ok_or_else(|| SpaceError::UnknownSpace(space_id.to_string()))?;
        if !inactive {
            self.host
                .update_group(
                    space_id,
                    &GroupUpdate {
                        color: Some(color),
                        ..GroupUpdate::default()
                    },
                )
                .await?;
        }
        {
            let mut state = self.state.borrow_mut();
            if let Some(space) = state.store.get_mut(space_id) {
                space.color = color;
            }
            if let Some(view) = state.view.space_mut(space_id) {
                view.color = color;
            }
        }
        self.persist().await?;
        self.notify();
        Ok(())
    }

    /// New folder in a space's pinned section, at the root or nested.
    pub async fn create_folder(&self, space_id: GroupId, parent: Option<&str>, title: &str) -> SpaceResult<BookmarkId> {
        let name = self.space_name(space_id)?;
        let node = self.mirror().create_subfolder(&name, parent, title).await?;
        self.state.borrow_mut().view.add_folder(
            space_id,
            parent,
            FolderNode {
                id: node.id.clone(),
                title: node.title.clone(),
                collapsed: false,
                children: Vec::new(),
            },
        );
        self.notify();
        Ok(node.id)
    }

    pub fn toggle_folder(&self, folder_id: &str) -> Option<bool> {
        let collapsed = self.state.borrow_mut().view.toggle_folder(folder_id);
        if collapsed.is_some() {
            self.notify();
        }
        collapsed
    }

    /// Remove a folder and its bookmarks. Live tabs inside become temporary.
    pub async fn delete_folder(&self, folder_id: &str) -> SpaceResult<()> {
        let (space_id, live) = self
            .state
            .borrow_mut()
            .view
            .remove_folder(folder_id)
            .ok_or_else(|| HostError::NotFound(format!("No folder with id {}", folder_id)))?;
        self.host.remove_bookmark_tree(folder_id).await?;

        let mut rows = Vec::new();
        for tab_id in &live {
            if let Some(tab) = self.host.get_tab(*tab_id).await? {
                rows.push(TabRow::from_tab(&tab, None));
            }
        }
        {
            let mut state = self.state.borrow_mut();
            let space = state.store.require_mut(space_id)?;
            for tab_id in &live {
                space.space_bookmarks.retain(|id| id != tab_id);
                space.temporary_tabs.push(*tab_id);
            }
            for tab_id in &live {
                state.overlays.pinned.remove(tab_id);
            }
            for row in rows {
                state.view.insert_temporary(space_id, row, None);
            }
        }
        log::info!("Deleted folder {} ({} tabs demoted)", folder_id, live.len());
        self.reconcile_ordering(space_id, SyncSource::Extension).await?;
        Ok(())
    }
}
