/// The host browser's tab, tab-group, bookmark, storage and alarm APIs,
/// as seen by the core.
///
/// All calls may suspend. The core never holds borrowed state across them.
use serde::{Deserialize, Serialize};

use crate::error::HostResult;
use crate::model::{BookmarkNode, GroupId, HostGroup, HostTab, SpaceColor, TabId, WindowId};

pub mod chrome;
#[cfg(test)]
pub mod mock;

pub use chrome::ChromeHost;

/// Filter for tab queries. Unset fields don't constrain the result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_id: Option<WindowId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Only tabs that belong to no group.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ungrouped: bool,
}

impl TabQuery {
    pub fn in_group(group_id: GroupId) -> TabQuery {
        TabQuery {
            group_id: Some(group_id),
            ..TabQuery::default()
        }
    }

    pub fn ungrouped_in(window_id: Option<WindowId>) -> TabQuery {
        TabQuery {
            window_id,
            ungrouped: true,
            ..TabQuery::default()
        }
    }

    pub fn active_in(window_id: Option<WindowId>) -> TabQuery {
        TabQuery {
            window_id,
            active: Some(true),
            ..TabQuery::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTabProps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_id: Option<WindowId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<SpaceColor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collapsed: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookmark {
    pub parent_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Storage partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageArea {
    /// Settings synced across devices.
    Sync,
    /// Per-device data (spaces, overlays, archive).
    Local,
}

impl StorageArea {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageArea::Sync => "sync",
            StorageArea::Local => "local",
        }
    }
}

/// Host Browser Service.
#[allow(async_fn_in_trait)]
pub trait HostBrowser {
    async fn query_tabs(&self, query: &TabQuery) -> HostResult<Vec<HostTab>>;
    async fn get_tab(&self, tab_id: TabId) -> HostResult<Option<HostTab>>;
    async fn create_tab(&self, props: &CreateTabProps) -> HostResult<HostTab>;
    async fn update_tab(&self, tab_id: TabId, update: &TabUpdate) -> HostResult<HostTab>;
    async fn remove_tabs(&self, tab_ids: &[TabId]) -> HostResult<()>;
    /// Move the listed tabs, in list order, so the first lands at `index`.
    async fn move_tabs(&self, tab_ids: &[TabId], index: i32) -> HostResult<()>;
    /// Add tabs to `group_id`, or to a fresh group when `None`.
    async fn group_tabs(&self, tab_ids: &[TabId], group_id: Option<GroupId>) -> HostResult<GroupId>;
    async fn ungroup_tabs(&self, tab_ids: &[TabId]) -> HostResult<()>;

    async fn query_groups(&self, window_id: Option<WindowId>) -> HostResult<Vec<HostGroup>>;
    async fn get_group(&self, group_id: GroupId) -> HostResult<Option<HostGroup>>;
    async fn update_group(&self, group_id: GroupId, update: &GroupUpdate) -> HostResult<()>;
    /// Dissolve a group, leaving its tabs open and ungrouped.
    async fn remove_group(&self, group_id: GroupId) -> HostResult<()>;

    async fn bookmark_children(&self, id: &str) -> HostResult<Vec<BookmarkNode>>;
    async fn bookmark_subtree(&self, id: &str) -> HostResult<Option<BookmarkNode>>;
    async fn search_bookmarks(&self, url: &str) -> HostResult<Vec<BookmarkNode>>;
    async fn create_bookmark(&self, create: &CreateBookmark) -> HostResult<BookmarkNode>;
    async fn update_bookmark(&self, id: &str, update: &BookmarkUpdate) -> HostResult<BookmarkNode>;
    async fn move_bookmark(&self, id: &str, parent_id: &str, index: Option<usize>) -> HostResult<()>;
    async fn remove_bookmark(&self, id: &str) -> HostResult<()>;
    async fn remove_bookmark_tree(&self, id: &str) -> HostResult<()>;

    async fn storage_get(&self, area: StorageArea, key: &str) -> HostResult<Option<serde_json::Value>>;
    async fn storage_get_all(&self, area: StorageArea) -> HostResult<serde_json::Value>;
    async fn storage_set(&self, area: StorageArea, key: &str, value: serde_json::Value) -> HostResult<()>;

    /// Send a message to the other extension context. `None` when nobody replied.
    async fn send_message(&self, message: serde_json::Value) -> HostResult<Option<serde_json::Value>>;
    async fn create_alarm(&self, name: &str, period_minutes: u32) -> HostResult<()>;

    /// Milliseconds since the epoch.
    fn now_ms(&self) -> f64;
    async fn sleep(&self, ms: u32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tab_query_serializes_only_set_fields() {
        let query = TabQuery::in_group(4);
        assert_eq!(serde_json::to_value(&query).unwrap(), json!({"groupId": 4}));

        let query = TabQuery::ungrouped_in(Some(1));
        assert_eq!(
            serde_json::to_value(&query).unwrap(),
            json!({"windowId": 1, "ungrouped": true})
        );
    }

    #[test]
    fn test_create_bookmark_folder_has_no_url() {
        let create = CreateBookmark {
            parent_id: "2".into(),
            title: "Spaces".into(),
            ..CreateBookmark::default()
        };
        assert_eq!(
            serde_json::to_value(&create).unwrap(),
            json!({"parentId": "2", "title": "Spaces"})
        );
    }
}
