/// Sidebar projection: the tree of space containers, pinned and temporary
/// sections, folders and rows that the UI renders.
///
/// Pinned layout is owned here and in the bookmark tree; it is never
/// reshuffled from host order. Temporary layout follows the model order,
/// optionally displayed newest-on-top.
use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::model::{
    BookmarkId, BookmarkNode, GroupId, HostTab, PinnedTabState, Space, SpaceColor, TabId,
    TabNameOverride,
};
use crate::url_match::{domain_subtitle, has_navigated_away};

/// Live tab row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TabRow {
    pub tab_id: TabId,
    pub url: String,
    pub title: String,
    /// Backing bookmark for pinned rows.
    pub bookmark_id: Option<BookmarkId>,
}

impl TabRow {
    pub fn from_tab(tab: &HostTab, bookmark_id: Option<BookmarkId>) -> TabRow {
        TabRow {
            tab_id: tab.id,
            url: tab.url.clone(),
            title: tab.title.clone(),
            bookmark_id,
        }
    }
}

/// Pinned slot with no open tab.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceholderRow {
    pub bookmark_id: BookmarkId,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FolderNode {
    pub id: BookmarkId,
    pub title: String,
    pub collapsed: bool,
    pub children: Vec<PinnedNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PinnedNode {
    Tab(TabRow),
    Placeholder(PlaceholderRow),
    Folder(FolderNode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Container {
    Pinned,
    Temporary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpaceView {
    pub space_id: GroupId,
    pub name: String,
    pub color: SpaceColor,
    pub inactive: bool,
    pub pinned: Vec<PinnedNode>,
    /// Display order (reversed from model order when inverted).
    pub temporary: Vec<TabRow>,
}

/// How a row should read: title, optional domain subtitle, and whether the
/// back-to-pinned affordance applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabRowPresentation {
    pub title: String,
    pub subtitle: Option<String>,
    pub navigated_away: bool,
}

pub fn present(
    url: &str,
    live_title: &str,
    pinned: Option<&PinnedTabState>,
    name: Option<&TabNameOverride>,
) -> TabRowPresentation {
    match pinned {
        Some(state) => {
            let navigated_away = has_navigated_away(url, &state.pinned_url);
            let title = match name {
                Some(o) if !navigated_away => o.name.clone(),
                _ => live_title.to_string(),
            };
            TabRowPresentation {
                title,
                subtitle: domain_subtitle(url, &state.pinned_url),
                navigated_away,
            }
        }
        None => TabRowPresentation {
            title: name.map(|o| o.name.clone()).unwrap_or_else(|| live_title.to_string()),
            subtitle: None,
            navigated_away: false,
        },
    }
}

/// Build the pinned section from a space folder subtree. `live` maps
/// bookmark ids to the tab that currently represents them.
pub fn pinned_from_tree(
    folder: &BookmarkNode,
    live: &HashMap<BookmarkId, TabId>,
    tabs: &HashMap<TabId, HostTab>,
    collapsed: &HashSet<BookmarkId>,
) -> Vec<PinnedNode> {
    folder
        .children()
        .iter()
        .map(|node| {
            if node.is_folder() {
                PinnedNode::Folder(FolderNode {
                    id: node.id.clone(),
                    title: node.title.clone(),
                    collapsed: collapsed.contains(&node.id),
                    children: pinned_from_tree(node, live, tabs, collapsed),
                })
            } else {
                match live.get(&node.id).and_then(|id| tabs.get(id)) {
                    Some(tab) => PinnedNode::Tab(TabRow::from_tab(tab, Some(node.id.clone()))),
                    None => PinnedNode::Placeholder(PlaceholderRow {
                        bookmark_id: node.id.clone(),
                        url: node.url.clone().unwrap_or_default(),
                        title: node.title.clone(),
                    }),
                }
            }
        })
        .collect()
}

/// Root-level live rows first, then each folder's contents in folder order.
fn flatten_pinned(nodes: &[PinnedNode], out: &mut Vec<TabId>) {
    for node in nodes {
        if let PinnedNode::Tab(row) = node {
            out.push(row.tab_id);
        }
    }
    for node in nodes {
        if let PinnedNode::Folder(folder) = node {
            flatten_pinned(&folder.children, out);
        }
    }
}

fn find_tab_in(nodes: &[PinnedNode], tab_id: TabId) -> bool {
    nodes.iter().any(|node| match node {
        PinnedNode::Tab(row) => row.tab_id == tab_id,
        PinnedNode::Folder(folder) => find_tab_in(&folder.children, tab_id),
        PinnedNode::Placeholder(_) => false,
    })
}

fn map_tab_in(nodes: &mut [PinnedNode], tab_id: TabId, f: &mut dyn FnMut(&mut PinnedNode)) -> bool {
    for node in nodes.iter_mut() {
        let hit = match node {
            PinnedNode::Tab(row) => row.tab_id == tab_id,
            PinnedNode::Folder(folder) => {
                if map_tab_in(&mut folder.children, tab_id, f) {
                    return true;
                }
                false
            }
            PinnedNode::Placeholder(_) => false,
        };
        if hit {
            f(node);
            return true;
        }
    }
    false
}

fn remove_tab_in(nodes: &mut Vec<PinnedNode>, tab_id: TabId) -> Option<TabRow> {
    if let Some(pos) = nodes
        .iter()
        .position(|n| matches!(n, PinnedNode::Tab(row) if row.tab_id == tab_id))
    {
        if let PinnedNode::Tab(row) = nodes.remove(pos) {
            return Some(row);
        }
    }
    nodes.iter_mut().find_map(|node| match node {
        PinnedNode::Folder(folder) => remove_tab_in(&mut folder.children, tab_id),
        _ => None,
    })
}

fn folder_in<'a>(nodes: &'a mut [PinnedNode], folder_id: &str) -> Option<&'a mut FolderNode> {
    for node in nodes.iter_mut() {
        if let PinnedNode::Folder(folder) = node {
            if folder.id == folder_id {
                return Some(folder);
            }
            if let Some(found) = folder_in(&mut folder.children, folder_id) {
                return Some(found);
            }
        }
    }
    None
}

fn remove_folder_in(nodes: &mut Vec<PinnedNode>, folder_id: &str) -> Option<FolderNode> {
    if let Some(pos) = nodes
        .iter()
        .position(|n| matches!(n, PinnedNode::Folder(f) if f.id == folder_id))
    {
        if let PinnedNode::Folder(folder) = nodes.remove(pos) {
            return Some(folder);
        }
    }
    nodes.iter_mut().find_map(|node| match node {
        PinnedNode::Folder(folder) => remove_folder_in(&mut folder.children, folder_id),
        _ => None,
    })
}

fn placeholder_in(nodes: &[PinnedNode], bookmark_id: &str) -> Option<usize> {
    nodes
        .iter()
        .position(|n| matches!(n, PinnedNode::Placeholder(p) if p.bookmark_id == bookmark_id))
}

fn remove_placeholder_in(nodes: &mut Vec<PinnedNode>, bookmark_id: &str) -> bool {
    if let Some(pos) = placeholder_in(nodes, bookmark_id) {
        nodes.remove(pos);
        return true;
    }
    nodes.iter_mut().any(|node| match node {
        PinnedNode::Folder(folder) => remove_placeholder_in(&mut folder.children, bookmark_id),
        _ => false,
    })
}

fn promote_in(nodes: &mut [PinnedNode], bookmark_id: &str, row: &TabRow) -> bool {
    if let Some(pos) = placeholder_in(nodes, bookmark_id) {
        nodes[pos] = PinnedNode::Tab(row.clone());
        return true;
    }
    nodes.iter_mut().any(|node| match node {
        PinnedNode::Folder(folder) => promote_in(&mut folder.children, bookmark_id, row),
        _ => false,
    })
}

fn live_tabs_in(nodes: &[PinnedNode], out: &mut Vec<TabId>) {
    for node in nodes {
        match node {
            PinnedNode::Tab(row) => out.push(row.tab_id),
            PinnedNode::Folder(folder) => live_tabs_in(&folder.children, out),
            PinnedNode::Placeholder(_) => {}
        }
    }
}

/// The whole sidebar plus the collapsed-folder visibility side table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SidebarView {
    pub spaces: Vec<SpaceView>,
    pub active_space: Option<GroupId>,
    /// Live tabs kept visible inside a collapsed folder, owned by the folder.
    collapsed_visible: HashMap<BookmarkId, HashSet<TabId>>,
}

impl SidebarView {
    pub fn space(&self, space_id: GroupId) -> Option<&SpaceView> {
        self.spaces.iter().find(|s| s.space_id == space_id)
    }

    pub fn space_mut(&mut self, space_id: GroupId) -> Option<&mut SpaceView> {
        self.spaces.iter_mut().find(|s| s.space_id == space_id)
    }

    /// Insert or replace a space's view, keeping sidebar order.
    pub fn upsert_space(&mut self, view: SpaceView) {
        match self.space_mut(view.space_id) {
            Some(existing) => *existing = view,
            None => self.spaces.push(view),
        }
    }

    pub fn remove_space(&mut self, space_id: GroupId) -> Option<SpaceView> {
        let pos = self.spaces.iter().position(|s| s.space_id == space_id)?;
        let view = self.spaces.remove(pos);
        let mut folders = Vec::new();
        collect_folder_ids(&view.pinned, &mut folders);
        for id in folders {
            self.collapsed_visible.remove(&id);
        }
        Some(view)
    }

    pub fn replace_space_id(&mut self, old_id: GroupId, new_id: GroupId) {
        if let Some(view) = self.space_mut(old_id) {
            view.space_id = new_id;
        }
        if self.active_space == Some(old_id) {
            self.active_space = Some(new_id);
        }
    }

    /// Locate the row of a live tab.
    pub fn find_tab(&self, tab_id: TabId) -> Option<(GroupId, Container)> {
        self.spaces.iter().find_map(|view| {
            if find_tab_in(&view.pinned, tab_id) {
                Some((view.space_id, Container::Pinned))
            } else if view.temporary.iter().any(|r| r.tab_id == tab_id) {
                Some((view.space_id, Container::Temporary))
            } else {
                None
            }
        })
    }

    /// Rendered row of a live tab, pinned or temporary.
    pub fn row(&self, tab_id: TabId) -> Option<&TabRow> {
        fn walk(nodes: &[PinnedNode], tab_id: TabId) -> Option<&TabRow> {
            nodes.iter().find_map(|node| match node {
                PinnedNode::Tab(row) if row.tab_id == tab_id => Some(row),
                PinnedNode::Folder(folder) => walk(&folder.children, tab_id),
                _ => None,
            })
        }
        self.spaces.iter().find_map(|view| {
            view.temporary
                .iter()
                .find(|r| r.tab_id == tab_id)
                .or_else(|| walk(&view.pinned, tab_id))
        })
    }

    /// Visual order of live tab ids in a container. Placeholders are skipped.
    pub fn flatten_container(&self, space_id: GroupId, container: Container) -> Vec<TabId> {
        let Some(view) = self.space(space_id) else {
            return Vec::new();
        };
        match container {
            Container::Pinned => {
                let mut out = Vec::new();
                flatten_pinned(&view.pinned, &mut out);
                out
            }
            Container::Temporary => view.temporary.iter().map(|r| r.tab_id).collect(),
        }
    }

    /// Every live pinned tab in tree order.
    pub fn pinned_tabs(&self, space_id: GroupId) -> Vec<TabId> {
        let mut out = Vec::new();
        if let Some(view) = self.space(space_id) {
            live_tabs_in(&view.pinned, &mut out);
        }
        out
    }

    /// Rebuild the temporary section in model order. Rows keep their data;
    /// rows for ids not yet rendered come from `tabs`.
    pub fn sync_temporary(
        &mut self,
        space_id: GroupId,
        model_order: &[TabId],
        tabs: &HashMap<TabId, HostTab>,
        invert: bool,
    ) {
        let Some(view) = self.space_mut(space_id) else {
            return;
        };
        let mut existing: HashMap<TabId, TabRow> =
            view.temporary.drain(..).map(|r| (r.tab_id, r)).collect();
        let mut rows: Vec<TabRow> = model_order
            .iter()
            .filter_map(|id| {
                existing
                    .remove(id)
                    .or_else(|| tabs.get(id).map(|t| TabRow::from_tab(t, None)))
            })
            .collect();
        if invert {
            rows.reverse();
        }
        view.temporary = rows;
    }

    /// Closing a pinned tab leaves a placeholder in the same position.
    pub fn convert_to_placeholder(&mut self, tab_id: TabId) -> bool {
        for view in self.spaces.iter_mut() {
            let converted = map_tab_in(&mut view.pinned, tab_id, &mut |node| {
                let placeholder = match node {
                    PinnedNode::Tab(row) => row.bookmark_id.clone().map(|bookmark_id| PlaceholderRow {
                        bookmark_id,
                        url: row.url.clone(),
                        title: row.title.clone(),
                    }),
                    _ => None,
                };
                if let Some(placeholder) = placeholder {
                    *node = PinnedNode::Placeholder(placeholder);
                }
            });
            if converted {
                // Rows without a backing bookmark can't become placeholders.
                if let Some(row) = remove_unbacked(&mut view.pinned, tab_id) {
                    log::debug!("Dropped unbacked pinned row for tab {}", row.tab_id);
                }
                for visible in self.collapsed_visible.values_mut() {
                    visible.remove(&tab_id);
                }
                return true;
            }
        }
        false
    }

    /// Remove a live row from wherever it is. Placeholders are untouched.
    pub fn remove_tab_row(&mut self, tab_id: TabId) -> Option<TabRow> {
        for visible in self.collapsed_visible.values_mut() {
            visible.remove(&tab_id);
        }
        self.spaces.iter_mut().find_map(|view| {
            if let Some(pos) = view.temporary.iter().position(|r| r.tab_id == tab_id) {
                return Some(view.temporary.remove(pos));
            }
            remove_tab_in(&mut view.pinned, tab_id)
        })
    }

    /// Place a live row into a pinned section, at the root or in a folder.
    pub fn insert_pinned(
        &mut self,
        space_id: GroupId,
        row: TabRow,
        folder_id: Option<&str>,
        index: Option<usize>,
    ) -> bool {
        let Some(view) = self.space_mut(space_id) else {
            return false;
        };
        let in_folder = folder_id.is_some_and(|id| folder_in(&mut view.pinned, id).is_some());
        let target = match folder_id {
            Some(id) if in_folder => match folder_in(&mut view.pinned, id) {
                Some(folder) => &mut folder.children,
                None => return false,
            },
            _ => &mut view.pinned,
        };
        let at = index.unwrap_or(target.len()).min(target.len());
        target.insert(at, PinnedNode::Tab(row));
        true
    }

    /// Place a row into the temporary section at a display position.
    pub fn insert_temporary(&mut self, space_id: GroupId, row: TabRow, display_index: Option<usize>) -> bool {
        let Some(view) = self.space_mut(space_id) else {
            return false;
        };
        let at = display_index
            .unwrap_or(view.temporary.len())
            .min(view.temporary.len());
        view.temporary.insert(at, TabRow { bookmark_id: None, ..row });
        true
    }

    /// Turn a placeholder into a live row in place.
    pub fn promote_placeholder(&mut self, bookmark_id: &str, row: TabRow) -> Option<GroupId> {
        self.spaces.iter_mut().find_map(|view| {
            promote_in(&mut view.pinned, bookmark_id, &row).then_some(view.space_id)
        })
    }

    pub fn remove_placeholder(&mut self, bookmark_id: &str) -> bool {
        self.spaces
            .iter_mut()
            .any(|view| remove_placeholder_in(&mut view.pinned, bookmark_id))
    }

    /// Placeholder rows in a space, in tree order.
    pub fn placeholders(&self, space_id: GroupId) -> Vec<PlaceholderRow> {
        fn walk(nodes: &[PinnedNode], out: &mut Vec<PlaceholderRow>) {
            for node in nodes {
                match node {
                    PinnedNode::Placeholder(p) => out.push(p.clone()),
                    PinnedNode::Folder(f) => walk(&f.children, out),
                    PinnedNode::Tab(_) => {}
                }
            }
        }
        let mut out = Vec::new();
        if let Some(view) = self.space(space_id) {
            walk(&view.pinned, &mut out);
        }
        out
    }

    /// Refresh URL and title of a live row.
    pub fn update_tab(&mut self, tab: &HostTab) {
        for view in self.spaces.iter_mut() {
            if let Some(row) = view.temporary.iter_mut().find(|r| r.tab_id == tab.id) {
                row.url = tab.url.clone();
                row.title = tab.title.clone();
                return;
            }
            let updated = map_tab_in(&mut view.pinned, tab.id, &mut |node| {
                if let PinnedNode::Tab(row) = node {
                    row.url = tab.url.clone();
                    row.title = tab.title.clone();
                }
            });
            if updated {
                return;
            }
        }
    }

    /// Point a pinned row (or placeholder) at a re-anchored bookmark.
    pub fn set_row_bookmark(&mut self, tab_id: TabId, bookmark_id: BookmarkId) {
        for view in self.spaces.iter_mut() {
            let hit = map_tab_in(&mut view.pinned, tab_id, &mut |node| {
                if let PinnedNode::Tab(row) = node {
                    row.bookmark_id = Some(bookmark_id.clone());
                }
            });
            if hit {
                return;
            }
        }
    }

    pub fn add_folder(&mut self, space_id: GroupId, parent: Option<&str>, folder: FolderNode) -> bool {
        let Some(view) = self.space_mut(space_id) else {
            return false;
        };
        match parent.and_then(|id| folder_in(&mut view.pinned, id)) {
            Some(parent) => parent.children.push(PinnedNode::Folder(folder)),
            None => view.pinned.push(PinnedNode::Folder(folder)),
        }
        true
    }

    pub fn folder(&mut self, folder_id: &str) -> Option<&mut FolderNode> {
        self.spaces
            .iter_mut()
            .find_map(|view| folder_in(&mut view.pinned, folder_id))
    }

    /// Manual toggle. Drops the folder's visibility set either way.
    pub fn toggle_folder(&mut self, folder_id: &str) -> Option<bool> {
        let folder = self.folder(folder_id)?;
        folder.collapsed = !folder.collapsed;
        let collapsed = folder.collapsed;
        self.collapsed_visible.remove(folder_id);
        Some(collapsed)
    }

    /// Record which live tabs stay visible in a collapsed folder: the active
    /// tab, or every live tab when `show_all` is set.
    pub fn refresh_collapsed_visibility(&mut self, active_tab: Option<TabId>, show_all: bool) {
        let mut table: HashMap<BookmarkId, HashSet<TabId>> = HashMap::new();
        fn walk(
            nodes: &[PinnedNode],
            active: Option<TabId>,
            show_all: bool,
            table: &mut HashMap<BookmarkId, HashSet<TabId>>,
        ) {
            for node in nodes {
                if let PinnedNode::Folder(folder) = node {
                    if folder.collapsed {
                        let mut live = Vec::new();
                        live_tabs_in(&folder.children, &mut live);
                        let visible: HashSet<TabId> = live
                            .into_iter()
                            .filter(|id| show_all || Some(*id) == active)
                            .collect();
                        if !visible.is_empty() {
                            table.insert(folder.id.clone(), visible);
                        }
                    }
                    walk(&folder.children, active, show_all, table);
                }
            }
        }
        for view in &self.spaces {
            walk(&view.pinned, active_tab, show_all, &mut table);
        }
        self.collapsed_visible = table;
    }

    pub fn visible_in_collapsed(&self, folder_id: &str) -> Option<&HashSet<TabId>> {
        self.collapsed_visible.get(folder_id)
    }

    /// Remove a folder. Its live tabs are returned so the caller can demote
    /// them; its visibility set goes with it.
    pub fn remove_folder(&mut self, folder_id: &str) -> Option<(GroupId, Vec<TabId>)> {
        for view in self.spaces.iter_mut() {
            if let Some(folder) = remove_folder_in(&mut view.pinned, folder_id) {
                let mut live = Vec::new();
                live_tabs_in(&folder.children, &mut live);
                let mut nested = Vec::new();
                collect_folder_ids(&folder.children, &mut nested);
                self.collapsed_visible.remove(folder_id);
                for id in nested {
                    self.collapsed_visible.remove(&id);
                }
                return Some((view.space_id, live));
            }
        }
        None
    }
}

fn collect_folder_ids(nodes: &[PinnedNode], out: &mut Vec<BookmarkId>) {
    for node in nodes {
        if let PinnedNode::Folder(folder) = node {
            out.push(folder.id.clone());
            collect_folder_ids(&folder.children, out);
        }
    }
}

/// Drop a live pinned row that still has no backing bookmark.
fn remove_unbacked(nodes: &mut Vec<PinnedNode>, tab_id: TabId) -> Option<TabRow> {
    if let Some(pos) = nodes.iter().position(
        |n| matches!(n, PinnedNode::Tab(row) if row.tab_id == tab_id && row.bookmark_id.is_none()),
    ) {
        if let PinnedNode::Tab(row) = nodes.remove(pos) {
            return Some(row);
        }
    }
    nodes.iter_mut().find_map(|node| match node {
        PinnedNode::Folder(folder) => remove_unbacked(&mut folder.children, tab_id),
        _ => None,
    })
}

/// Fresh view of a space with an empty pinned section.
pub fn empty_view(space: &Space) -> SpaceView {
    SpaceView {
        space_id: space.id,
        name: space.name.clone(),
        color: space.color,
        inactive: space.inactive,
        pinned: Vec::new(),
        temporary: Vec::new(),
    }
}
