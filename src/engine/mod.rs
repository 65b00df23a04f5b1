/// Reconciliation engine: keeps host tab order, the space store, the bookmark
/// mirror and the sidebar projection converged.
///
/// Host order inside a space's group is always
/// `space_bookmarks ++ temporary_tabs`. Pinned layout flows from the
/// projection into the model; temporary layout flows from the model (or the
/// host strip) into the projection.
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::archive::ArchiveState;
use crate::bookmarks::BookmarkMirror;
use crate::error::{HostError, HostResult, SpaceError, SpaceResult};
use crate::guards::{ExclusionFlags, FlagGuard, MoveDebouncer, RetrySlots, SyncProvenance};
use crate::host::{CreateTabProps, HostBrowser, TabQuery, TabUpdate};
use crate::model::{BookmarkId, BookmarkNode, GroupId, HostTab, PinnedTabState, Space, TabId, TabNameOverride, WindowId};
use crate::projection::{present, Container, SidebarView, TabRow, TabRowPresentation};
use crate::retry::RetryPolicy;
use crate::settings::{EngineConfig, Settings};
use crate::store::{self, Overlays, SpaceStore};
use crate::url_match::hostname;

pub mod lifecycle;

/// Who caused the order change being reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSource {
    /// The user rearranged the native tab strip.
    Host,
    /// The model changed first (sidebar drag, pin toggle, new tab).
    Extension,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// Host order already matched.
    Unchanged,
    /// One batched move was issued.
    Moved,
    /// A newer request for the same space took over the pending retry.
    Superseded,
    /// Contention outlasted the retry budget; host order is stale.
    GaveUp,
}

/// Where a dragged row was dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct DropTarget {
    pub space_id: GroupId,
    pub container: Container,
    /// Folder inside the pinned section, `None` for its root.
    pub folder_id: Option<BookmarkId>,
    /// Display index among the target's children; `None` appends.
    pub index: Option<usize>,
}

/// Everything the engine mutates. Never borrowed across a host call.
#[derive(Debug, Default)]
pub struct EngineState {
    pub store: SpaceStore,
    pub overlays: Overlays,
    pub settings: Settings,
    pub active_space: Option<GroupId>,
    pub window_id: Option<WindowId>,
    pub view: SidebarView,
    pub provenance: SyncProvenance,
    pub debouncer: MoveDebouncer,
    pub retries: RetrySlots,
    pub archive: ArchiveState,
}

type Listener = Rc<dyn Fn(&SidebarView)>;

pub struct SpaceEngine<H: HostBrowser> {
    pub(crate) host: H,
    pub(crate) config: EngineConfig,
    pub(crate) policy: RetryPolicy,
    pub(crate) state: RefCell<EngineState>,
    pub(crate) flags: ExclusionFlags,
    listeners: RefCell<Vec<Listener>>,
}

/// Rewrite the model from a native strip reorder.
///
/// Temporary tabs take the host order. A bookmarked tab found after the first
/// temporary tab is moved to the end of the bookmark block. Returns the
/// bookmarked ids that had crossed the boundary.
pub fn adopt_host_order(space: &mut Space, host_order: &[TabId]) -> Vec<TabId> {
    let bookmarked: HashSet<TabId> = space.space_bookmarks.iter().copied().collect();
    let violators: Vec<TabId> = match host_order.iter().position(|id| !bookmarked.contains(id)) {
        Some(first_temporary) => host_order[first_temporary..]
            .iter()
            .filter(|id| bookmarked.contains(id))
            .copied()
            .collect(),
        None => Vec::new(),
    };
    for id in &violators {
        space.space_bookmarks.retain(|b| b != id);
        space.space_bookmarks.push(*id);
    }
    space.temporary_tabs = host_order
        .iter()
        .filter(|id| !bookmarked.contains(id))
        .copied()
        .collect();
    violators
}

/// Append ids present in the group but unknown to the model.
fn adopt_untracked(space: &mut Space, host_order: &[TabId]) {
    for id in host_order {
        if !space.contains(*id) {
            log::debug!("Adopting untracked tab {} into space {}", id, space.id);
            space.temporary_tabs.push(*id);
        }
    }
}

/// Canonical order restricted to ids currently in the group.
pub fn desired_order(space: &Space, present: &[TabId]) -> Vec<TabId> {
    let present: HashSet<TabId> = present.iter().copied().collect();
    let mut seen = HashSet::new();
    space
        .canonical_order()
        .into_iter()
        .filter(|id| present.contains(id) && seen.insert(*id))
        .collect()
}

/// Visual order to canonical order. Only temporary rows are ever inverted.
pub fn display_to_canonical(mut visual: Vec<TabId>, container: Container, invert: bool) -> Vec<TabId> {
    if container == Container::Temporary && invert {
        visual.reverse();
    }
    visual
}

/// Write a container's canonical order into the model. Ids the projection
/// doesn't render keep their relative order at the end.
pub fn merge_container_order(space: &mut Space, container: Container, canonical: &[TabId]) {
    let (target, other) = match container {
        Container::Pinned => (&mut space.space_bookmarks, &mut space.temporary_tabs),
        Container::Temporary => (&mut space.temporary_tabs, &mut space.space_bookmarks),
    };
    let rest: Vec<TabId> = target
        .iter()
        .filter(|id| !canonical.contains(id))
        .copied()
        .collect();
    *target = canonical.iter().copied().chain(rest).collect();
    other.retain(|id| !canonical.contains(id));
}

impl<H: HostBrowser> SpaceEngine<H> {
    pub fn new(host: H, config: EngineConfig) -> Self {
        SpaceEngine {
            policy: RetryPolicy::from_config(&config),
            host,
            config,
            state: RefCell::new(EngineState::default()),
            flags: ExclusionFlags::default(),
            listeners: RefCell::new(Vec::new()),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn view(&self) -> SidebarView {
        self.state.borrow().view.clone()
    }

    pub fn spaces(&self) -> Vec<Space> {
        self.state.borrow().store.spaces.clone()
    }

    pub fn space(&self, space_id: GroupId) -> Option<Space> {
        self.state.borrow().store.get(space_id).cloned()
    }

    pub fn active_space(&self) -> Option<GroupId> {
        self.state.borrow().active_space
    }

    pub fn settings(&self) -> Settings {
        self.state.borrow().settings.clone()
    }

    pub fn pinned_state(&self, tab_id: TabId) -> Option<PinnedTabState> {
        self.state.borrow().overlays.pinned.get(&tab_id).cloned()
    }

    /// Called with a fresh projection after every committed change.
    pub fn subscribe(&self, listener: impl Fn(&SidebarView) + 'static) {
        self.listeners.borrow_mut().push(Rc::new(listener));
    }

    pub(crate) fn notify(&self) {
        let view = self.state.borrow().view.clone();
        let listeners: Vec<Listener> = self.listeners.borrow().clone();
        for listener in listeners {
            listener(&view);
        }
    }

    pub(crate) fn mirror(&self) -> BookmarkMirror<'_, H> {
        BookmarkMirror::new(&self.host, &self.config)
    }

    /// Write the store, overlays and active space to local storage.
    pub(crate) async fn persist(&self) -> HostResult<()> {
        let (spaces, overlays, active) = {
            let state = self.state.borrow();
            (state.store.clone(), state.overlays.clone(), state.active_space)
        };
        store::save_spaces(&self.host, &spaces).await?;
        store::save_overlays(&self.host, &overlays).await?;
        store::save_active_space(&self.host, active).await
    }

    pub(crate) async fn require_tab(&self, tab_id: TabId) -> SpaceResult<HostTab> {
        self.host
            .get_tab(tab_id)
            .await?
            .ok_or(SpaceError::UnknownTab(tab_id))
    }

    pub(crate) fn space_name(&self, space_id: GroupId) -> SpaceResult<String> {
        self.state
            .borrow()
            .store
            .get(space_id)
            .map(|s| s.name.clone())
            .ok_or_else(|| SpaceError::UnknownSpace(space_id.to_string()))
    }

    /// Space a tab belongs to: by model membership, else by its live group.
    pub(crate) fn space_for_tab(&self, tab: &HostTab) -> SpaceResult<GroupId> {
        let state = self.state.borrow();
        state
            .store
            .space_of(tab.id)
            .or_else(|| {
                tab.group_id
                    .filter(|g| state.store.get(*g).is_some_and(|s| !s.inactive))
            })
            .ok_or(SpaceError::UnknownTab(tab.id))
    }

    fn display_title_for_bookmark(&self, tab: &HostTab) -> String {
        let state = self.state.borrow();
        match state.overlays.names.get(&tab.id) {
            Some(name) => name.name.clone(),
            None if tab.title.is_empty() => tab.url.clone(),
            None => tab.title.clone(),
        }
    }

    /// Non-host-pinned tabs of a group, in strip order.
    pub(crate) async fn group_strip(&self, space_id: GroupId) -> HostResult<Vec<HostTab>> {
        let mut tabs: Vec<HostTab> = self
            .host
            .query_tabs(&TabQuery::in_group(space_id))
            .await?
            .into_iter()
            .filter(|t| !t.pinned)
            .collect();
        tabs.sort_by_key(|t| t.index);
        Ok(tabs)
    }

    /// Update the model for this pass and return the order the host should show.
    fn plan_order(&self, space_id: GroupId, source: SyncSource, host_order: &[TabId]) -> SpaceResult<Vec<TabId>> {
        let mut state = self.state.borrow_mut();
        // A tab lives in exactly one space.
        for other in state.store.spaces.iter_mut().filter(|s| s.id != space_id) {
            for id in host_order {
                other.remove_tab(*id);
            }
        }
        let space = state.store.require_mut(space_id)?;
        match source {
            SyncSource::Host => {
                let violators = adopt_host_order(space, host_order);
                if !violators.is_empty() {
                    log::info!(
                        "Bookmarked tabs {:?} were dragged past the temporary tabs of {}; restoring",
                        violators,
                        space.name
                    );
                }
            }
            SyncSource::Extension => adopt_untracked(space, host_order),
        }
        space.normalize();
        Ok(desired_order(space, host_order))
    }

    /// Issue the batched move with provenance marks for the echoes.
    async fn apply_order(&self, order: &[TabId], index: i32) -> HostResult<()> {
        let token = {
            let now = self.host.now_ms();
            self.state
                .borrow_mut()
                .provenance
                .begin(order, now, self.config.self_sync_ttl_ms)
        };
        let result = self.host.move_tabs(order, index).await;
        if result.is_err() {
            self.state.borrow_mut().provenance.release(token);
        }
        result
    }

    /// Persist and refresh the temporary section of the projection.
    async fn finish_reconcile(&self, space_id: GroupId, strip: &[HostTab]) -> SpaceResult<()> {
        let tabs: HashMap<TabId, HostTab> = strip.iter().map(|t| (t.id, t.clone())).collect();
        {
            let mut state = self.state.borrow_mut();
            let invert = state.settings.invert_tab_order;
            let order = state.store.get(space_id).map(|s| s.temporary_tabs.clone());
            if let Some(order) = order {
                state.view.sync_temporary(space_id, &order, &tabs, invert);
            }
        }
        self.persist().await?;
        self.notify();
        Ok(())
    }

    /// Converge the host order of one space's group with the model.
    ///
    /// Contention is retried with capped backoff under the space's retry
    /// slot; a newer request for the same space cancels the pending retry.
    /// Any other host failure is returned.
    pub async fn reconcile_ordering(&self, space_id: GroupId, source: SyncSource) -> SpaceResult<Reconciled> {
        self.state.borrow_mut().retries.cancel(space_id);
        let mut attempt = 0;
        loop {
            let strip = self.group_strip(space_id).await?;
            let current: Vec<TabId> = strip.iter().map(|t| t.id).collect();
            let desired = self.plan_order(space_id, source, &current)?;

            let outcome = if desired == current {
                Ok(Reconciled::Unchanged)
            } else {
                let start = strip.iter().map(|t| t.index).min().unwrap_or(0);
                log::debug!("Reordering space {}: {:?} -> {:?}", space_id, current, desired);
                self.apply_order(&desired, start).await.map(|_| Reconciled::Moved)
            };

            match outcome {
                Ok(done) => {
                    self.finish_reconcile(space_id, &strip).await?;
                    return Ok(done);
                }
                Err(e) if e.is_contention() => match self.policy.delay_for(attempt) {
                    Some(delay) => {
                        let generation = self.state.borrow_mut().retries.schedule(space_id);
                        log::debug!("Host busy, retrying space {} in {}ms", space_id, delay);
                        self.host.sleep(delay).await;
                        let still_ours = self.state.borrow_mut().retries.take(space_id, generation);
                        if !still_ours {
                            log::debug!("Retry for space {} superseded", space_id);
                            return Ok(Reconciled::Superseded);
                        }
                        attempt += 1;
                    }
                    None => {
                        log::warn!(
                            "Giving up reordering space {} after {} attempts",
                            space_id,
                            attempt + 1
                        );
                        self.finish_reconcile(space_id, &strip).await?;
                        return Ok(Reconciled::GaveUp);
                    }
                },
                Err(e) => {
                    log::error!("Failed to reorder space {}: {}", space_id, e);
                    return Err(e.into());
                }
            }
        }
    }

    /// Write a container's rendered order back into the model, then converge
    /// the host.
    pub async fn apply_dom_reorder_to_model(&self, space_id: GroupId, container: Container) -> SpaceResult<Reconciled> {
        {
            let mut state = self.state.borrow_mut();
            let visual = state.view.flatten_container(space_id, container);
            let canonical = display_to_canonical(visual, container, state.settings.invert_tab_order);
            for other in state.store.spaces.iter_mut().filter(|s| s.id != space_id) {
                for id in &canonical {
                    other.remove_tab(*id);
                }
            }
            let space = state.store.require_mut(space_id)?;
            merge_container_order(space, container, &canonical);
        }
        self.reconcile_ordering(space_id, SyncSource::Extension).await
    }

    /// A sidebar drag was committed.
    pub async fn commit_drop(&self, tab_id: TabId, target: DropTarget) -> SpaceResult<Reconciled> {
        let origin = self.state.borrow().view.find_tab(tab_id);
        let same_space = origin.is_some_and(|(space, _)| space == target.space_id);
        match (origin, target.container) {
            (Some((space_id, Container::Pinned)), Container::Pinned) if same_space => {
                self.move_pinned_row(tab_id, space_id, &target).await?;
                self.apply_dom_reorder_to_model(space_id, Container::Pinned).await
            }
            (Some((space_id, Container::Temporary)), Container::Temporary) if same_space => {
                {
                    let mut state = self.state.borrow_mut();
                    if let Some(row) = state.view.remove_tab_row(tab_id) {
                        state.view.insert_temporary(space_id, row, target.index);
                    }
                }
                self.apply_dom_reorder_to_model(space_id, Container::Temporary).await
            }
            (origin, Container::Pinned) => {
                if let Some((from, Container::Pinned)) = origin {
                    self.drop_pin_backing(tab_id, from).await?;
                }
                self.pin_tab_into(tab_id, target.space_id, target.folder_id.as_deref(), target.index)
                    .await
            }
            (origin, Container::Temporary) => {
                match origin {
                    Some((from, Container::Pinned)) if from == target.space_id => {
                        self.unpin_tab(tab_id).await?;
                    }
                    _ => {
                        self.move_tab_to_space(tab_id, target.space_id).await?;
                    }
                }
                {
                    let mut state = self.state.borrow_mut();
                    if let Some(row) = state.view.remove_tab_row(tab_id) {
                        state.view.insert_temporary(target.space_id, row, target.index);
                    }
                }
                self.apply_dom_reorder_to_model(target.space_id, Container::Temporary)
                    .await
            }
        }
    }

    /// Reposition a pinned row and its bookmark inside the same space.
    async fn move_pinned_row(&self, tab_id: TabId, space_id: GroupId, target: &DropTarget) -> SpaceResult<()> {
        let bookmark_id = {
            let mut state = self.state.borrow_mut();
            let Some(row) = state.view.remove_tab_row(tab_id) else {
                return Ok(());
            };
            let bookmark_id = row.bookmark_id.clone();
            state
                .view
                .insert_pinned(space_id, row, target.folder_id.as_deref(), target.index);
            bookmark_id
        };
        if let Some(bookmark_id) = bookmark_id {
            let parent = match &target.folder_id {
                Some(folder) => folder.clone(),
                None => {
                    let name = self.space_name(space_id)?;
                    self.mirror().ensure_space_folder(&name).await?
                }
            };
            self.host
                .move_bookmark(&bookmark_id, &parent, target.index)
                .await?;
        }
        Ok(())
    }

    /// Pin a tab at the end of its space's pinned root.
    pub async fn pin_tab(&self, tab_id: TabId) -> SpaceResult<Reconciled> {
        let tab = self.require_tab(tab_id).await?;
        let space_id = self.space_for_tab(&tab)?;
        self.pin_tab_into(tab_id, space_id, None, None).await
    }

    /// Make a tab a pinned slot of `space_id`, optionally inside a folder.
    pub async fn pin_tab_into(
        &self,
        tab_id: TabId,
        space_id: GroupId,
        folder_id: Option<&str>,
        index: Option<usize>,
    ) -> SpaceResult<Reconciled> {
        let tab = self.require_tab(tab_id).await?;
        let space_name = self.space_name(space_id)?;
        let title = self.display_title_for_bookmark(&tab);

        let prior = {
            let mut state = self.state.borrow_mut();
            state.store.require_mut(space_id)?;
            let prior = state.store.placement_of(tab_id);
            state.store.remove_tab_everywhere(tab_id);
            state.store.require_mut(space_id)?.space_bookmarks.push(tab_id);
            prior
        };

        let bookmark = match self
            .back_pin(&tab, space_id, &space_name, &title, folder_id, index)
            .await
        {
            Ok(bookmark) => bookmark,
            Err(e) => {
                let mut state = self.state.borrow_mut();
                state.store.remove_tab_everywhere(tab_id);
                if let Some(prior) = prior {
                    state.store.restore_placement(tab_id, prior);
                }
                return Err(e);
            }
        };
        log::info!("Pinned {} into {}", tab.url, space_name);

        {
            let mut state = self.state.borrow_mut();
            state.overlays.pinned.insert(
                tab_id,
                PinnedTabState {
                    pinned_url: tab.url.clone(),
                    bookmark_id: Some(bookmark.id.clone()),
                },
            );
            state.view.remove_tab_row(tab_id);
            let row = TabRow::from_tab(&tab, Some(bookmark.id.clone()));
            let targeted = folder_id.is_some() || index.is_some();
            if targeted {
                state.view.remove_placeholder(&bookmark.id);
                state.view.insert_pinned(space_id, row, folder_id, index);
            } else if state.view.promote_placeholder(&bookmark.id, row.clone()).is_none() {
                state.view.insert_pinned(space_id, row, None, None);
            }
        }

        self.apply_dom_reorder_to_model(space_id, Container::Pinned).await
    }

    /// Host side of a pin: group the tab, then write its bookmark.
    async fn back_pin(
        &self,
        tab: &HostTab,
        space_id: GroupId,
        space_name: &str,
        title: &str,
        folder_id: Option<&str>,
        index: Option<usize>,
    ) -> SpaceResult<BookmarkNode> {
        if tab.group_id != Some(space_id) {
            self.host.group_tabs(&[tab.id], Some(space_id)).await?;
        }
        let bookmark = self
            .mirror()
            .pin(space_name, &tab.url, title, folder_id, index)
            .await?;
        Ok(bookmark)
    }

    /// Remove the bookmark and pinned state of a tab without touching its
    /// membership. Used before the tab is re-homed elsewhere.
    async fn drop_pin_backing(&self, tab_id: TabId, space_id: GroupId) -> SpaceResult<()> {
        let pin = self.state.borrow().overlays.pinned.get(&tab_id).cloned();
        if let Some(pin) = pin {
            let name = self.space_name(space_id)?;
            self.mirror().unpin(&name, &pin).await?;
        }
        self.state.borrow_mut().overlays.pinned.remove(&tab_id);
        Ok(())
    }

    /// Turn a pinned tab back into a temporary one (newest position).
    pub async fn unpin_tab(&self, tab_id: TabId) -> SpaceResult<Reconciled> {
        let space_id = {
            let state = self.state.borrow();
            state
                .store
                .space_of(tab_id)
                .filter(|id| state.store.get(*id).is_some_and(|s| s.is_bookmarked(tab_id)))
        }
        .ok_or(SpaceError::UnknownTab(tab_id))?;
        let tab = self.require_tab(tab_id).await?;
        let space_name = self.space_name(space_id)?;

        {
            let mut state = self.state.borrow_mut();
            state.store.remove_tab_everywhere(tab_id);
            state.store.require_mut(space_id)?.temporary_tabs.push(tab_id);
        }

        let pin = self
            .state
            .borrow()
            .overlays
            .pinned
            .get(&tab_id)
            .cloned()
            .unwrap_or_else(|| PinnedTabState {
                pinned_url: tab.url.clone(),
                bookmark_id: None,
            });
        self.mirror().unpin(&space_name, &pin).await?;
        log::info!("Unpinned {} from {}", pin.pinned_url, space_name);

        {
            let mut state = self.state.borrow_mut();
            state.overlays.pinned.remove(&tab_id);
            let row = state
                .view
                .remove_tab_row(tab_id)
                .unwrap_or_else(|| TabRow::from_tab(&tab, None));
            state.view.insert_temporary(space_id, row, None);
        }

        self.reconcile_ordering(space_id, SyncSource::Extension).await
    }

    pub async fn toggle_pin(&self, tab_id: TabId) -> SpaceResult<Reconciled> {
        let bookmarked = self
            .state
            .borrow()
            .store
            .spaces
            .iter()
            .any(|s| s.is_bookmarked(tab_id));
        if bookmarked {
            self.unpin_tab(tab_id).await
        } else {
            self.pin_tab(tab_id).await
        }
    }

    /// Move a tab into another space as a temporary tab.
    pub async fn move_tab_to_space(&self, tab_id: TabId, dest: GroupId) -> SpaceResult<Reconciled> {
        self.rehome_tab(tab_id, dest, true).await
    }

    /// Shared by sidebar moves and native regrouping (`regroup == false`).
    async fn rehome_tab(&self, tab_id: TabId, dest: GroupId, regroup: bool) -> SpaceResult<Reconciled> {
        let tab = self.require_tab(tab_id).await?;
        {
            let state = self.state.borrow();
            match state.store.get(dest) {
                Some(space) if !space.inactive => {}
                _ => return Err(SpaceError::UnknownSpace(dest.to_string())),
            }
        }
        let source = self.state.borrow().store.space_of(tab_id);
        let was_pinned = source.is_some_and(|s| {
            self.state
                .borrow()
                .store
                .get(s)
                .is_some_and(|space| space.is_bookmarked(tab_id))
        });
        if let (Some(from), true) = (source, was_pinned) {
            if from != dest {
                self.drop_pin_backing(tab_id, from).await?;
            }
        }

        {
            let mut state = self.state.borrow_mut();
            state.store.remove_tab_everywhere(tab_id);
            state.store.require_mut(dest)?.temporary_tabs.push(tab_id);
        }

        if regroup && tab.group_id != Some(dest) {
            self.host.group_tabs(&[tab_id], Some(dest)).await?;
        }

        {
            let mut state = self.state.borrow_mut();
            let row = state
                .view
                .remove_tab_row(tab_id)
                .unwrap_or_else(|| TabRow::from_tab(&tab, None));
            state.view.insert_temporary(dest, row, None);
        }

        if let Some(from) = source.filter(|from| *from != dest) {
            self.reconcile_ordering(from, SyncSource::Extension).await?;
        }
        self.reconcile_ordering(dest, SyncSource::Extension).await
    }

    /// The host closed a tab. Pinned rows become placeholders in place.
    pub async fn handle_tab_removed(&self, tab_id: TabId) -> SpaceResult<()> {
        let changed = {
            let mut state = self.state.borrow_mut();
            let spaces = state.store.remove_tab_everywhere(tab_id);
            state.overlays.forget_tab(tab_id);
            state.archive.forget(tab_id);
            let placeholder = state.view.convert_to_placeholder(tab_id);
            let removed = !placeholder && state.view.remove_tab_row(tab_id).is_some();
            !spaces.is_empty() || placeholder || removed
        };
        if changed {
            log::debug!("Tab {} closed", tab_id);
            self.persist().await?;
            self.notify();
        }
        Ok(())
    }

    /// A tab appeared that the engine didn't create itself.
    pub async fn handle_tab_created(&self, tab: HostTab) -> SpaceResult<Option<Reconciled>> {
        if tab.pinned {
            return Ok(None);
        }
        let target = {
            let state = self.state.borrow();
            tab.group_id
                .filter(|g| state.store.get(*g).is_some_and(|s| !s.inactive))
                .or(state.active_space)
        };
        let Some(space_id) = target else {
            log::debug!("No space for new tab {}", tab.id);
            return Ok(None);
        };

        {
            let now = self.host.now_ms();
            let mut state = self.state.borrow_mut();
            state.store.remove_tab_everywhere(tab.id);
            state.store.require_mut(space_id)?.temporary_tabs.push(tab.id);
            state.view.remove_tab_row(tab.id);
            state
                .view
                .insert_temporary(space_id, TabRow::from_tab(&tab, None), None);
            state.archive.touch(tab.id, now);
        }

        if tab.group_id != Some(space_id) {
            self.host.group_tabs(&[tab.id], Some(space_id)).await?;
        }
        self.reconcile_ordering(space_id, SyncSource::Extension)
            .await
            .map(Some)
    }

    /// URL, title or group changed on the host.
    pub async fn handle_tab_updated(&self, tab: HostTab) -> SpaceResult<()> {
        let (known, regrouped) = {
            let mut state = self.state.borrow_mut();
            state.view.update_tab(&tab);
            let known = state.store.space_of(tab.id);
            let regrouped = match (known, tab.group_id) {
                (Some(old), Some(new)) if old != new => state
                    .store
                    .get(new)
                    .is_some_and(|s| !s.inactive)
                    .then_some(new),
                _ => None,
            };
            (known, regrouped)
        };
        match (known, tab.group_id, regrouped) {
            (_, _, Some(dest)) => {
                log::debug!("Tab {} was regrouped natively into {}", tab.id, dest);
                self.rehome_tab(tab.id, dest, false).await?;
            }
            (Some(old), None, None) => {
                log::debug!("Tab {} was ungrouped natively from {}", tab.id, old);
                self.release_tab(tab.id);
                self.persist().await?;
                self.reconcile_ordering(old, SyncSource::Extension).await?;
            }
            _ => self.notify(),
        }
        Ok(())
    }

    /// Forget a tab that left every space while staying open. Its pinned
    /// bookmark, if any, shows as a placeholder.
    fn release_tab(&self, tab_id: TabId) {
        let mut state = self.state.borrow_mut();
        state.store.remove_tab_everywhere(tab_id);
        state.overlays.forget_tab(tab_id);
        if !state.view.convert_to_placeholder(tab_id) {
            state.view.remove_tab_row(tab_id);
        }
    }

    /// Track focus: last tab of the space, active space, collapsed folders.
    pub async fn handle_tab_activated(&self, tab_id: TabId) -> SpaceResult<()> {
        let Some(tab) = self.host.get_tab(tab_id).await? else {
            return Ok(());
        };
        let Ok(space_id) = self.space_for_tab(&tab) else {
            return Ok(());
        };
        {
            let now = self.host.now_ms();
            let mut state = self.state.borrow_mut();
            if let Some(space) = state.store.get_mut(space_id) {
                space.last_tab = Some(tab_id);
            }
            state.active_space = Some(space_id);
            state.view.active_space = Some(space_id);
            let show_all = state.settings.show_all_open_tabs_in_collapsed_folders;
            state.view.refresh_collapsed_visibility(Some(tab_id), show_all);
            state.archive.touch(tab_id, now);
        }
        self.persist().await?;
        self.notify();
        Ok(())
    }

    /// The host reordered a tab natively (already debounced).
    pub async fn handle_host_move(&self, tab_id: TabId) -> SpaceResult<Option<Reconciled>> {
        let Some(tab) = self.host.get_tab(tab_id).await? else {
            return Ok(None);
        };
        let space_id = tab
            .group_id
            .filter(|g| {
                self.state
                    .borrow()
                    .store
                    .get(*g)
                    .is_some_and(|s| !s.inactive)
            });
        match space_id {
            Some(space_id) => self
                .reconcile_ordering(space_id, SyncSource::Host)
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    pub fn row_presentation(&self, tab_id: TabId) -> Option<TabRowPresentation> {
        let state = self.state.borrow();
        let row = state.view.row(tab_id)?;
        Some(present(
            &row.url,
            &row.title,
            state.overlays.pinned.get(&tab_id),
            state.overlays.names.get(&tab_id),
        ))
    }

    pub fn display_title(&self, tab_id: TabId) -> Option<String> {
        self.row_presentation(tab_id).map(|p| p.title)
    }

    /// User renamed a row. Pinned tabs also rename their bookmark.
    pub async fn set_tab_name_override(&self, tab_id: TabId, name: &str) -> SpaceResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return self.clear_tab_name_override(tab_id).await;
        }
        let tab = self.require_tab(tab_id).await?;
        self.state.borrow_mut().overlays.names.insert(
            tab_id,
            TabNameOverride {
                name: name.to_string(),
                original_domain: hostname(&tab.url),
            },
        );
        self.rename_pinned_bookmark(&tab, name).await?;
        self.persist().await?;
        self.notify();
        Ok(())
    }

    pub async fn clear_tab_name_override(&self, tab_id: TabId) -> SpaceResult<()> {
        let tab = self.require_tab(tab_id).await?;
        self.state.borrow_mut().overlays.names.remove(&tab_id);
        self.rename_pinned_bookmark(&tab, &tab.title).await?;
        self.persist().await?;
        self.notify();
        Ok(())
    }

    async fn rename_pinned_bookmark(&self, tab: &HostTab, title: &str) -> SpaceResult<()> {
        let pin = self.state.borrow().overlays.pinned.get(&tab.id).cloned();
        let Some(pin) = pin else {
            return Ok(());
        };
        let space_id = self.space_for_tab(tab)?;
        let name = self.space_name(space_id)?;
        if let Some(id) = self.mirror().rename_for_tab(&name, &pin, title).await? {
            let mut state = self.state.borrow_mut();
            if let Some(stored) = state.overlays.pinned.get_mut(&tab.id) {
                stored.bookmark_id = Some(id.clone());
            }
            state.view.set_row_bookmark(tab.id, id);
        }
        Ok(())
    }

    /// Re-anchor a pinned slot to the tab's current URL.
    pub async fn replace_bookmark_url(&self, tab_id: TabId) -> SpaceResult<()> {
        let tab = self.require_tab(tab_id).await?;
        let pin = self
            .pinned_state(tab_id)
            .ok_or(SpaceError::UnknownTab(tab_id))?;
        let space_id = self.space_for_tab(&tab)?;
        let name = self.space_name(space_id)?;
        let title = self.display_title_for_bookmark(&tab);

        match self.mirror().replace_url(&name, &pin, &tab.url, &title).await? {
            Some(node) => {
                let mut state = self.state.borrow_mut();
                state.overlays.pinned.insert(
                    tab_id,
                    PinnedTabState {
                        pinned_url: tab.url.clone(),
                        bookmark_id: Some(node.id.clone()),
                    },
                );
                if let Some(name) = state.overlays.names.get_mut(&tab_id) {
                    name.original_domain = hostname(&tab.url);
                }
                state.view.set_row_bookmark(tab_id, node.id);
                state.view.update_tab(&tab);
            }
            None => log::warn!("No bookmark to re-anchor for tab {}", tab_id),
        }
        self.persist().await?;
        self.notify();
        Ok(())
    }

    /// Send a pinned tab back to the URL its slot is anchored to.
    pub async fn navigate_to_pinned_url(&self, tab_id: TabId) -> SpaceResult<()> {
        let pin = self
            .pinned_state(tab_id)
            .ok_or(SpaceError::UnknownTab(tab_id))?;
        let tab = self
            .host
            .update_tab(
                tab_id,
                &TabUpdate {
                    url: Some(pin.pinned_url),
                    active: None,
                },
            )
            .await?;
        self.state.borrow_mut().view.update_tab(&tab);
        self.notify();
        Ok(())
    }

    /// Open the tab behind a pinned slot, or focus it if already open.
    pub async fn open_pinned_bookmark(&self, space_id: GroupId, bookmark_id: &str) -> SpaceResult<TabId> {
        let live = self.state.borrow().overlays.tab_for_bookmark(bookmark_id);
        if let Some(tab_id) = live {
            self.host
                .update_tab(
                    tab_id,
                    &TabUpdate {
                        url: None,
                        active: Some(true),
                    },
                )
                .await?;
            return Ok(tab_id);
        }

        let url = self
            .host
            .bookmark_subtree(bookmark_id)
            .await?
            .and_then(|node| node.url)
            .ok_or_else(|| HostError::NotFound(format!("Can't find bookmark for id {}", bookmark_id)))?;
        let window_id = self.state.borrow().window_id;

        let _opening = FlagGuard::raise(&self.flags.opening_bookmark);
        let tab = self
            .host
            .create_tab(&CreateTabProps {
                url: Some(url.clone()),
                active: true,
                window_id,
                index: None,
            })
            .await?;
        self.host.group_tabs(&[tab.id], Some(space_id)).await?;

        {
            let mut state = self.state.borrow_mut();
            state.store.remove_tab_everywhere(tab.id);
            state.store.require_mut(space_id)?.space_bookmarks.push(tab.id);
            state.overlays.pinned.insert(
                tab.id,
                PinnedTabState {
                    pinned_url: url,
                    bookmark_id: Some(bookmark_id.to_string()),
                },
            );
            let row = TabRow::from_tab(&tab, Some(bookmark_id.to_string()));
            if state.view.promote_placeholder(bookmark_id, row.clone()).is_none() {
                state.view.insert_pinned(space_id, row, None, None);
            }
        }
        self.apply_dom_reorder_to_model(space_id, Container::Pinned)
            .await?;
        Ok(tab.id)
    }

    /// Bookmark a tab's page in the shared favorites folder.
    pub async fn add_to_favorites(&self, tab_id: TabId) -> SpaceResult<BookmarkNode> {
        let tab = self.require_tab(tab_id).await?;
        let title = self.display_title(tab_id).unwrap_or_else(|| tab.title.clone());
        Ok(self.mirror().add_favorite(&tab.url, &title).await?)
    }

    pub async fn favorites(&self) -> SpaceResult<Vec<BookmarkNode>> {
        Ok(self.mirror().favorites().await?)
    }

    /// Open a favorite in a new tab. The tab-created event files it into the
    /// active space like any other new tab.
    pub async fn open_favorite(&self, url: &str) -> SpaceResult<TabId> {
        let window_id = self.state.borrow().window_id;
        let tab = self
            .host
            .create_tab(&CreateTabProps {
                url: Some(url.to_string()),
                active: true,
                window_id,
                index: None,
            })
            .await?;
        Ok(tab.id)
    }
}
