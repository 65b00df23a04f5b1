/// In-memory host for unit tests: one ordered tab strip, a bookmark tree,
/// two storage areas and a virtual clock that `sleep` advances instantly.
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::{
    BookmarkUpdate, CreateBookmark, CreateTabProps, GroupUpdate, HostBrowser, StorageArea,
    TabQuery, TabUpdate,
};
use crate::error::{HostError, HostResult};
use crate::model::{BookmarkNode, GroupId, HostGroup, HostTab, SpaceColor, TabId, WindowId};

pub const WINDOW: WindowId = 1;
pub const CONTENTION_MESSAGE: &str = "Tabs cannot be edited right now (user may be dragging a tab).";

#[derive(Debug, Clone, Default)]
pub struct MockState {
    pub tabs: Vec<HostTab>,
    pub groups: Vec<HostGroup>,
    pub nodes: HashMap<String, BookmarkNode>,
    pub children: HashMap<String, Vec<String>>,
    pub local: HashMap<String, serde_json::Value>,
    pub sync: HashMap<String, serde_json::Value>,
    pub clock: f64,
    next_tab_id: TabId,
    next_group_id: GroupId,
    next_bookmark_id: u64,
    /// Number of upcoming `move_tabs` calls rejected as contention.
    pub contention_failures: u32,
    /// Error returned by the next `move_tabs` call.
    pub fail_next_move: Option<HostError>,
    /// Error returned by the next `create_bookmark` call.
    pub fail_next_bookmark: Option<HostError>,
    pub move_calls: Vec<(Vec<TabId>, i32)>,
    pub message_reply: Option<serde_json::Value>,
    pub hang_messages: bool,
    pub sent_messages: Vec<serde_json::Value>,
    pub alarms: Vec<(String, u32)>,
}

/// Pending once, so futures joined in a test interleave at each sleep.
struct YieldNow(bool);

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            return Poll::Ready(());
        }
        self.0 = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

pub struct MockHost {
    pub state: RefCell<MockState>,
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHost {
    pub fn new() -> MockHost {
        let mut state = MockState {
            clock: 1_000_000.0,
            next_tab_id: 100,
            next_group_id: 10,
            next_bookmark_id: 10,
            ..MockState::default()
        };
        for (id, parent, title) in [("0", None, ""), ("1", Some("0"), "Bookmarks bar"), ("2", Some("0"), "Other bookmarks")] {
            state.nodes.insert(
                id.to_string(),
                BookmarkNode {
                    id: id.to_string(),
                    parent_id: parent.map(str::to_string),
                    title: title.to_string(),
                    url: None,
                    index: None,
                    date_added: Some(0.0),
                    children: None,
                },
            );
            state.children.insert(id.to_string(), Vec::new());
            if let Some(parent) = parent {
                state.children.entry(parent.to_string()).or_default().push(id.to_string());
            }
        }
        MockHost {
            state: RefCell::new(state),
        }
    }

    // ---- test setup helpers ----

    pub fn add_group(&self, title: &str, color: SpaceColor) -> GroupId {
        let mut state = self.state.borrow_mut();
        state.next_group_id += 1;
        let id = state.next_group_id;
        state.groups.push(HostGroup {
            id,
            title: title.to_string(),
            color,
            collapsed: false,
            window_id: WINDOW,
        });
        id
    }

    pub fn add_tab(&self, url: &str, title: &str, group_id: Option<GroupId>) -> TabId {
        let mut state = self.state.borrow_mut();
        state.next_tab_id += 1;
        let id = state.next_tab_id;
        state.tabs.push(HostTab {
            id,
            url: url.to_string(),
            title: title.to_string(),
            pinned: false,
            index: 0,
            group_id,
            window_id: WINDOW,
            active: false,
        });
        state.reindex();
        id
    }

    pub fn set_host_pinned(&self, tab_id: TabId, pinned: bool) {
        if let Some(tab) = self.state.borrow_mut().tabs.iter_mut().find(|t| t.id == tab_id) {
            tab.pinned = pinned;
        }
    }

    pub fn set_url(&self, tab_id: TabId, url: &str) {
        if let Some(tab) = self.state.borrow_mut().tabs.iter_mut().find(|t| t.id == tab_id) {
            tab.url = url.to_string();
        }
    }

    pub fn set_active(&self, tab_id: TabId) {
        for tab in self.state.borrow_mut().tabs.iter_mut() {
            tab.active = tab.id == tab_id;
        }
    }

    /// Reorder the strip directly, as a user dragging natively would.
    pub fn reorder(&self, order: &[TabId]) {
        let mut state = self.state.borrow_mut();
        let mut reordered: Vec<HostTab> = order
            .iter()
            .filter_map(|id| state.tabs.iter().find(|t| t.id == *id).cloned())
            .collect();
        let rest: Vec<HostTab> = state
            .tabs
            .iter()
            .filter(|t| !order.contains(&t.id))
            .cloned()
            .collect();
        reordered.extend(rest);
        state.tabs = reordered;
        state.reindex();
    }

    pub fn close_tab(&self, tab_id: TabId) {
        let mut state = self.state.borrow_mut();
        state.tabs.retain(|t| t.id != tab_id);
        state.drop_empty_groups();
        state.reindex();
    }

    pub fn remove_group_externally(&self, group_id: GroupId) {
        let mut state = self.state.borrow_mut();
        for tab in state.tabs.iter_mut().filter(|t| t.group_id == Some(group_id)) {
            tab.group_id = None;
        }
        state.groups.retain(|g| g.id != group_id);
    }

    pub fn add_folder(&self, parent_id: &str, title: &str) -> String {
        self.state.borrow_mut().insert_node(parent_id, title, None, None)
    }

    pub fn add_bookmark(&self, parent_id: &str, title: &str, url: &str) -> String {
        self.state
            .borrow_mut()
            .insert_node(parent_id, title, Some(url.to_string()), None)
    }

    // ---- inspection helpers ----

    pub fn group_order(&self, group_id: GroupId) -> Vec<TabId> {
        self.state
            .borrow()
            .tabs
            .iter()
            .filter(|t| t.group_id == Some(group_id) && !t.pinned)
            .map(|t| t.id)
            .collect()
    }

    pub fn tab(&self, tab_id: TabId) -> Option<HostTab> {
        self.state.borrow().tabs.iter().find(|t| t.id == tab_id).cloned()
    }

    pub fn group(&self, group_id: GroupId) -> Option<HostGroup> {
        self.state.borrow().groups.iter().find(|g| g.id == group_id).cloned()
    }

    pub fn move_call_count(&self) -> usize {
        self.state.borrow().move_calls.len()
    }

    pub fn tree(&self, id: &str) -> Option<BookmarkNode> {
        self.state.borrow().subtree(id)
    }

    /// Titles of `id`'s direct children, in order.
    pub fn child_titles(&self, id: &str) -> Vec<String> {
        let state = self.state.borrow();
        state
            .children
            .get(id)
            .map(|ids| ids.iter().filter_map(|c| state.nodes.get(c)).map(|n| n.title.clone()).collect())
            .unwrap_or_default()
    }

    pub fn find_folder(&self, parent_id: &str, title: &str) -> Option<String> {
        let state = self.state.borrow();
        state.children.get(parent_id).and_then(|ids| {
            ids.iter()
                .find(|c| {
                    state
                        .nodes
                        .get(*c)
                        .map(|n| n.is_folder() && n.title == title)
                        .unwrap_or(false)
                })
                .cloned()
        })
    }
}

impl MockState {
    fn reindex(&mut self) {
        let mut per_window: HashMap<WindowId, i32> = HashMap::new();
        for tab in self.tabs.iter_mut() {
            let next = per_window.entry(tab.window_id).or_insert(0);
            tab.index = *next;
            *next += 1;
        }
    }

    fn drop_empty_groups(&mut self) {
        let tabs = &self.tabs;
        self.groups
            .retain(|g| tabs.iter().any(|t| t.group_id == Some(g.id)));
    }

    fn insert_node(&mut self, parent_id: &str, title: &str, url: Option<String>, index: Option<usize>) -> String {
        self.next_bookmark_id += 1;
        let id = self.next_bookmark_id.to_string();
        let date_added = self.clock + self.next_bookmark_id as f64;
        self.nodes.insert(
            id.clone(),
            BookmarkNode {
                id: id.clone(),
                parent_id: Some(parent_id.to_string()),
                title: title.to_string(),
                url: url.clone(),
                index: None,
                date_added: Some(date_added),
                children: None,
            },
        );
        if url.is_none() {
            self.children.insert(id.clone(), Vec::new());
        }
        let siblings = self.children.entry(parent_id.to_string()).or_default();
        let at = index.unwrap_or(siblings.len()).min(siblings.len());
        siblings.insert(at, id.clone());
        id
    }

    fn node_with_index(&self, id: &str) -> Option<BookmarkNode> {
        let mut node = self.nodes.get(id)?.clone();
        node.index = node
            .parent_id
            .as_ref()
            .and_then(|p| self.children.get(p))
            .and_then(|siblings| siblings.iter().position(|s| s == id));
        Some(node)
    }

    fn subtree(&self, id: &str) -> Option<BookmarkNode> {
        let mut node = self.node_with_index(id)?;
        if node.is_folder() {
            let kids = self
                .children
                .get(id)
                .map(|ids| ids.iter().filter_map(|c| self.subtree(c)).collect())
                .unwrap_or_default();
            node.children = Some(kids);
        }
        Some(node)
    }

    fn detach(&mut self, id: &str) {
        for siblings in self.children.values_mut() {
            siblings.retain(|s| s != id);
        }
    }

    fn remove_recursive(&mut self, id: &str) {
        if let Some(kids) = self.children.remove(id) {
            for kid in kids {
                self.remove_recursive(&kid);
            }
        }
        self.nodes.remove(id);
    }

    fn store(&mut self, area: StorageArea) -> &mut HashMap<String, serde_json::Value> {
        match area {
            StorageArea::Sync => &mut self.sync,
            StorageArea::Local => &mut self.local,
        }
    }
}

fn matches(tab: &HostTab, query: &TabQuery) -> bool {
    query.group_id.is_none_or(|g| tab.group_id == Some(g))
        && query.window_id.is_none_or(|w| tab.window_id == w)
        && query.pinned.is_none_or(|p| tab.pinned == p)
        && query.active.is_none_or(|a| tab.active == a)
        && query.url.as_ref().is_none_or(|u| &tab.url == u)
        && (!query.ungrouped || tab.group_id.is_none())
}

impl HostBrowser for MockHost {
    async fn query_tabs(&self, query: &TabQuery) -> HostResult<Vec<HostTab>> {
        Ok(self
            .state
            .borrow()
            .tabs
            .iter()
            .filter(|t| matches(t, query))
            .cloned()
            .collect())
    }

    async fn get_tab(&self, tab_id: TabId) -> HostResult<Option<HostTab>> {
        Ok(self.tab(tab_id))
    }

    async fn create_tab(&self, props: &CreateTabProps) -> HostResult<HostTab> {
        let id = self.add_tab(props.url.as_deref().unwrap_or("chrome://newtab/"), "", None);
        if props.active {
            self.set_active(id);
        }
        self.tab(id)
            .ok_or_else(|| HostError::NotFound(format!("No tab with id: {}", id)))
    }

    async fn update_tab(&self, tab_id: TabId, update: &TabUpdate) -> HostResult<HostTab> {
        if self.tab(tab_id).is_none() {
            return Err(HostError::NotFound(format!("No tab with id: {}", tab_id)));
        }
        if let Some(url) = &update.url {
            self.set_url(tab_id, url);
        }
        if update.active == Some(true) {
            self.set_active(tab_id);
        }
        self.tab(tab_id)
            .ok_or_else(|| HostError::NotFound(format!("No tab with id: {}", tab_id)))
    }

    async fn remove_tabs(&self, tab_ids: &[TabId]) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        state.tabs.retain(|t| !tab_ids.contains(&t.id));
        state.drop_empty_groups();
        state.reindex();
        Ok(())
    }

    async fn move_tabs(&self, tab_ids: &[TabId], index: i32) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        if state.contention_failures > 0 {
            state.contention_failures -= 1;
            return Err(HostError::classify(CONTENTION_MESSAGE));
        }
        if let Some(err) = state.fail_next_move.take() {
            return Err(err);
        }
        state.move_calls.push((tab_ids.to_vec(), index));

        let mut moving = Vec::new();
        for id in tab_ids {
            let pos = state
                .tabs
                .iter()
                .position(|t| t.id == *id)
                .ok_or_else(|| HostError::NotFound(format!("No tab with id: {}", id)))?;
            moving.push(state.tabs.remove(pos));
        }
        let at = (index.max(0) as usize).min(state.tabs.len());
        for (offset, tab) in moving.into_iter().enumerate() {
            state.tabs.insert(at + offset, tab);
        }
        state.reindex();
        Ok(())
    }

    async fn group_tabs(&self, tab_ids: &[TabId], group_id: Option<GroupId>) -> HostResult<GroupId> {
        let group_id = match group_id {
            Some(id) => {
                if self.group(id).is_none() {
                    return Err(HostError::NotFound(format!("No group with id: {}", id)));
                }
                id
            }
            None => self.add_group("", SpaceColor::Grey),
        };
        let mut state = self.state.borrow_mut();
        let mut moving = Vec::new();
        for id in tab_ids {
            if let Some(pos) = state.tabs.iter().position(|t| t.id == *id) {
                let mut tab = state.tabs.remove(pos);
                tab.group_id = Some(group_id);
                moving.push(tab);
            }
        }
        let at = state
            .tabs
            .iter()
            .rposition(|t| t.group_id == Some(group_id))
            .map(|p| p + 1)
            .unwrap_or(state.tabs.len());
        for (offset, tab) in moving.into_iter().enumerate() {
            state.tabs.insert(at + offset, tab);
        }
        state.drop_empty_groups();
        state.reindex();
        Ok(group_id)
    }

    async fn ungroup_tabs(&self, tab_ids: &[TabId]) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        for tab in state.tabs.iter_mut().filter(|t| tab_ids.contains(&t.id)) {
            tab.group_id = None;
        }
        state.drop_empty_groups();
        Ok(())
    }

    async fn query_groups(&self, window_id: Option<WindowId>) -> HostResult<Vec<HostGroup>> {
        Ok(self
            .state
            .borrow()
            .groups
            .iter()
            .filter(|g| window_id.is_none_or(|w| g.window_id == w))
            .cloned()
            .collect())
    }

    async fn get_group(&self, group_id: GroupId) -> HostResult<Option<HostGroup>> {
        Ok(self.group(group_id))
    }

    async fn update_group(&self, group_id: GroupId, update: &GroupUpdate) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        let group = state
            .groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .ok_or_else(|| HostError::NotFound(format!("No group with id: {}", group_id)))?;
        if let Some(title) = &update.title {
            group.title = title.clone();
        }
        if let Some(color) = update.color {
            group.color = color;
        }
        if let Some(collapsed) = update.collapsed {
            group.collapsed = collapsed;
        }
        Ok(())
    }

    async fn remove_group(&self, group_id: GroupId) -> HostResult<()> {
        self.remove_group_externally(group_id);
        Ok(())
    }

    async fn bookmark_children(&self, id: &str) -> HostResult<Vec<BookmarkNode>> {
        let state = self.state.borrow();
        let ids = state
            .children
            .get(id)
            .ok_or_else(|| HostError::NotFound(format!("Can't find bookmark for id {}", id)))?;
        Ok(ids.iter().filter_map(|c| state.node_with_index(c)).collect())
    }

    async fn bookmark_subtree(&self, id: &str) -> HostResult<Option<BookmarkNode>> {
        Ok(self.tree(id))
    }

    async fn search_bookmarks(&self, url: &str) -> HostResult<Vec<BookmarkNode>> {
        let state = self.state.borrow();
        let mut found: Vec<BookmarkNode> = state
            .nodes
            .values()
            .filter(|n| n.url.as_deref() == Some(url))
            .filter_map(|n| state.node_with_index(&n.id))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn create_bookmark(&self, create: &CreateBookmark) -> HostResult<BookmarkNode> {
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.fail_next_bookmark.take() {
            return Err(err);
        }
        if !state.children.contains_key(&create.parent_id) {
            return Err(HostError::NotFound(format!("Can't find parent bookmark for id {}", create.parent_id)));
        }
        let id = state.insert_node(&create.parent_id, &create.title, create.url.clone(), create.index);
        state
            .node_with_index(&id)
            .ok_or_else(|| HostError::NotFound(id.clone()))
    }

    async fn update_bookmark(&self, id: &str, update: &BookmarkUpdate) -> HostResult<BookmarkNode> {
        let mut state = self.state.borrow_mut();
        let node = state
            .nodes
            .get_mut(id)
            .ok_or_else(|| HostError::NotFound(format!("Can't find bookmark for id {}", id)))?;
        if let Some(title) = &update.title {
            node.title = title.clone();
        }
        if let Some(url) = &update.url {
            node.url = Some(url.clone());
        }
        state
            .node_with_index(id)
            .ok_or_else(|| HostError::NotFound(id.to_string()))
    }

    async fn move_bookmark(&self, id: &str, parent_id: &str, index: Option<usize>) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        if !state.nodes.contains_key(id) || !state.children.contains_key(parent_id) {
            return Err(HostError::NotFound(format!("Can't find bookmark for id {}", id)));
        }
        state.detach(id);
        if let Some(node) = state.nodes.get_mut(id) {
            node.parent_id = Some(parent_id.to_string());
        }
        let siblings = state.children.entry(parent_id.to_string()).or_default();
        let at = index.unwrap_or(siblings.len()).min(siblings.len());
        siblings.insert(at, id.to_string());
        Ok(())
    }

    async fn remove_bookmark(&self, id: &str) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        if !state.nodes.contains_key(id) {
            return Err(HostError::NotFound(format!("Can't find bookmark for id {}", id)));
        }
        if state.children.get(id).is_some_and(|kids| !kids.is_empty()) {
            return Err(HostError::Rejected("Can't remove non-empty folder".to_string()));
        }
        state.detach(id);
        state.remove_recursive(id);
        Ok(())
    }

    async fn remove_bookmark_tree(&self, id: &str) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        if !state.nodes.contains_key(id) {
            return Err(HostError::NotFound(format!("Can't find bookmark for id {}", id)));
        }
        state.detach(id);
        state.remove_recursive(id);
        Ok(())
    }

    async fn storage_get(&self, area: StorageArea, key: &str) -> HostResult<Option<serde_json::Value>> {
        Ok(self.state.borrow_mut().store(area).get(key).cloned())
    }

    async fn storage_get_all(&self, area: StorageArea) -> HostResult<serde_json::Value> {
        let mut state = self.state.borrow_mut();
        let map: serde_json::Map<String, serde_json::Value> = state
            .store(area)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(serde_json::Value::Object(map))
    }

    async fn storage_set(&self, area: StorageArea, key: &str, value: serde_json::Value) -> HostResult<()> {
        self.state.borrow_mut().store(area).insert(key.to_string(), value);
        Ok(())
    }

    async fn send_message(&self, message: serde_json::Value) -> HostResult<Option<serde_json::Value>> {
        let (hang, reply) = {
            let mut state = self.state.borrow_mut();
            state.sent_messages.push(message);
            (state.hang_messages, state.message_reply.clone())
        };
        if hang {
            futures::future::pending::<()>().await;
        }
        Ok(reply)
    }

    async fn create_alarm(&self, name: &str, period_minutes: u32) -> HostResult<()> {
        self.state.borrow_mut().alarms.push((name.to_string(), period_minutes));
        Ok(())
    }

    fn now_ms(&self) -> f64 {
        self.state.borrow().clock
    }

    async fn sleep(&self, ms: u32) {
        self.state.borrow_mut().clock += f64::from(ms);
        YieldNow(false).await;
    }
}
