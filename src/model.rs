/// Data structures shared by the store, the engine and the host bridge
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Browser tab id. Only valid for the current browser session.
pub type TabId = i32;
/// Browser tab-group id. Regenerated whenever a group is recreated.
pub type GroupId = i32;
pub type WindowId = i32;
pub type BookmarkId = String;

/// Tab-group palette. Mirrors the host's fixed set of group colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpaceColor {
    #[default]
    Grey,
    Blue,
    Red,
    Yellow,
    Green,
    Pink,
    Purple,
    Cyan,
    Orange,
}

impl SpaceColor {
    pub const ALL: [SpaceColor; 9] = [
        SpaceColor::Grey,
        SpaceColor::Blue,
        SpaceColor::Red,
        SpaceColor::Yellow,
        SpaceColor::Green,
        SpaceColor::Pink,
        SpaceColor::Purple,
        SpaceColor::Cyan,
        SpaceColor::Orange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpaceColor::Grey => "grey",
            SpaceColor::Blue => "blue",
            SpaceColor::Red => "red",
            SpaceColor::Yellow => "yellow",
            SpaceColor::Green => "green",
            SpaceColor::Pink => "pink",
            SpaceColor::Purple => "purple",
            SpaceColor::Cyan => "cyan",
            SpaceColor::Orange => "orange",
        }
    }

    /// First palette color not already taken, wrapping to the least used one.
    pub fn pick_unused(used: &[SpaceColor]) -> SpaceColor {
        SpaceColor::ALL
            .iter()
            .copied()
            .min_by_key(|color| used.iter().filter(|u| *u == color).count())
            .unwrap_or_default()
    }
}

/// A user-named workspace bound to one host tab-group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    pub id: GroupId,
    pub uuid: String,
    pub name: String,
    pub color: SpaceColor,
    #[serde(default)]
    pub space_bookmarks: Vec<TabId>,
    #[serde(default)]
    pub temporary_tabs: Vec<TabId>,
    #[serde(default)]
    pub last_tab: Option<TabId>,
    /// Set when the backing tab-group is gone and only the bookmark folder remains.
    #[serde(default)]
    pub inactive: bool,
}

impl Space {
    pub fn new(id: GroupId, name: &str, color: SpaceColor) -> Space {
        Space {
            id,
            uuid: Uuid::new_v4().to_string(),
            name: name.to_string(),
            color,
            space_bookmarks: Vec::new(),
            temporary_tabs: Vec::new(),
            last_tab: None,
            inactive: false,
        }
    }

    pub fn contains(&self, tab_id: TabId) -> bool {
        self.space_bookmarks.contains(&tab_id) || self.temporary_tabs.contains(&tab_id)
    }

    pub fn is_bookmarked(&self, tab_id: TabId) -> bool {
        self.space_bookmarks.contains(&tab_id)
    }

    /// Drop the id from both arrays. Returns true if anything was removed.
    pub fn remove_tab(&mut self, tab_id: TabId) -> bool {
        let before = self.space_bookmarks.len() + self.temporary_tabs.len();
        self.space_bookmarks.retain(|id| *id != tab_id);
        self.temporary_tabs.retain(|id| *id != tab_id);
        if self.last_tab == Some(tab_id) {
            self.last_tab = None;
        }
        before != self.space_bookmarks.len() + self.temporary_tabs.len()
    }

    /// Canonical host order: bookmark block first, then temporary tabs.
    pub fn canonical_order(&self) -> Vec<TabId> {
        self.space_bookmarks
            .iter()
            .chain(self.temporary_tabs.iter())
            .copied()
            .collect()
    }

    /// Remove duplicates within each array and strip bookmarked ids out of the
    /// temporary array so the two stay disjoint.
    pub fn normalize(&mut self) {
        dedup_in_place(&mut self.space_bookmarks);
        dedup_in_place(&mut self.temporary_tabs);
        let bookmarked = self.space_bookmarks.clone();
        self.temporary_tabs.retain(|id| !bookmarked.contains(id));
    }

    pub fn is_disjoint(&self) -> bool {
        self.space_bookmarks
            .iter()
            .all(|id| !self.temporary_tabs.contains(id))
    }
}

/// Keep the first occurrence of every id.
pub fn dedup_in_place(ids: &mut Vec<TabId>) {
    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(*id));
}

/// Anchor of a pinned slot, keyed by tab id in the overlays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PinnedTabState {
    pub pinned_url: String,
    #[serde(default)]
    pub bookmark_id: Option<BookmarkId>,
}

/// User-chosen display title for a tab.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabNameOverride {
    pub name: String,
    #[serde(default)]
    pub original_domain: Option<String>,
}

/// Snapshot of a host tab.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostTab {
    pub id: TabId,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    /// Host-level pin. Unrelated to space bookmarks.
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub index: i32,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub window_id: WindowId,
    #[serde(default)]
    pub active: bool,
}

/// Snapshot of a host tab-group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostGroup {
    pub id: GroupId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub color: SpaceColor,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default)]
    pub window_id: WindowId,
}

/// Bookmark or bookmark folder, optionally with its subtree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkNode {
    pub id: BookmarkId,
    #[serde(default)]
    pub parent_id: Option<BookmarkId>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub date_added: Option<f64>,
    #[serde(default)]
    pub children: Option<Vec<BookmarkNode>>,
}

impl BookmarkNode {
    pub fn is_folder(&self) -> bool {
        self.url.is_none()
    }

    pub fn children(&self) -> &[BookmarkNode] {
        self.children.as_deref().unwrap_or(&[])
    }
}
