/// Matching of bookmark slots to live tabs.
///
/// Precedence, applied across all bookmarks before falling to the next rule:
/// 1. the tab's pinned state names this bookmark id
/// 2. the tab's URL equals the bookmark URL
/// 3. the tab's URL shares origin and path with the bookmark URL
///
/// A tab represents at most one bookmark.
use std::collections::{HashMap, HashSet};

use crate::model::{BookmarkId, BookmarkNode, HostTab, PinnedTabState, TabId};
use crate::url_match::same_origin_and_path;

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub bookmark_id: BookmarkId,
    pub url: String,
    /// `None` renders as a bookmark-only placeholder.
    pub tab_id: Option<TabId>,
}

/// URL bookmarks under `folder`, depth first, in display order.
pub fn flatten_bookmarks(folder: &BookmarkNode) -> Vec<&BookmarkNode> {
    let mut out = Vec::new();
    collect(folder, &mut out);
    out
}

fn collect<'a>(node: &'a BookmarkNode, out: &mut Vec<&'a BookmarkNode>) {
    for child in node.children() {
        if child.is_folder() {
            collect(child, out);
        } else {
            out.push(child);
        }
    }
}

pub fn resolve(
    bookmarks: &[&BookmarkNode],
    tabs: &[HostTab],
    pinned: &HashMap<TabId, PinnedTabState>,
) -> Vec<Resolution> {
    let mut matched: Vec<Option<TabId>> = vec![None; bookmarks.len()];
    let mut claimed: HashSet<TabId> = HashSet::new();

    // 1. stored bookmark id
    for (slot, bookmark) in bookmarks.iter().enumerate() {
        let by_id = tabs.iter().find(|tab| {
            !claimed.contains(&tab.id)
                && pinned
                    .get(&tab.id)
                    .and_then(|state| state.bookmark_id.as_deref())
                    == Some(bookmark.id.as_str())
        });
        if let Some(tab) = by_id {
            claimed.insert(tab.id);
            matched[slot] = Some(tab.id);
        }
    }

    // 2. exact URL
    for (slot, bookmark) in bookmarks.iter().enumerate() {
        if matched[slot].is_some() {
            continue;
        }
        let Some(url) = bookmark.url.as_deref() else {
            continue;
        };
        if let Some(tab) = tabs
            .iter()
            .find(|tab| !claimed.contains(&tab.id) && tab.url == url)
        {
            claimed.insert(tab.id);
            matched[slot] = Some(tab.id);
        }
    }

    // 3. origin + path
    for (slot, bookmark) in bookmarks.iter().enumerate() {
        if matched[slot].is_some() {
            continue;
        }
        let Some(url) = bookmark.url.as_deref() else {
            continue;
        };
        if let Some(tab) = tabs
            .iter()
            .find(|tab| !claimed.contains(&tab.id) && same_origin_and_path(&tab.url, url))
        {
            claimed.insert(tab.id);
            matched[slot] = Some(tab.id);
        }
    }

    bookmarks
        .iter()
        .zip(matched)
        .map(|(bookmark, tab_id)| Resolution {
            bookmark_id: bookmark.id.clone(),
            url: bookmark.url.clone().unwrap_or_default(),
            tab_id,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bookmark(id: &str, url: &str) -> BookmarkNode {
        BookmarkNode {
            id: id.to_string(),
            parent_id: Some("space".to_string()),
            title: id.to_string(),
            url: Some(url.to_string()),
            index: None,
            date_added: None,
            children: None,
        }
    }

    fn folder(id: &str, children: Vec<BookmarkNode>) -> BookmarkNode {
        BookmarkNode {
            id: id.to_string(),
            parent_id: None,
            title: id.to_string(),
            url: None,
            index: None,
            date_added: None,
            children: Some(children),
        }
    }

    fn create_test_tab(id: TabId, url: &str) -> HostTab {
        HostTab {
            id,
            url: url.to_string(),
            title: String::new(),
            pinned: false,
            index: id,
            group_id: Some(1),
            window_id: 1,
            active: false,
        }
    }

    #[test]
    fn test_flatten_walks_nested_folders_in_order() {
        let tree = folder(
            "space",
            vec![
                bookmark("a", "https://a.com"),
                folder("f", vec![bookmark("b", "https://b.com"), folder("g", vec![bookmark("c", "https://c.com")])]),
                bookmark("d", "https://d.com"),
            ],
        );

        let ids: Vec<&str> = flatten_bookmarks(&tree).iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_stored_bookmark_id_wins_over_url() {
        let a = bookmark("a", "https://a.com");
        let tabs = vec![create_test_tab(1, "https://a.com"), create_test_tab(2, "https://elsewhere.com")];
        let mut pinned = HashMap::new();
        pinned.insert(
            2,
            PinnedTabState {
                pinned_url: "https://a.com".into(),
                bookmark_id: Some("a".into()),
            },
        );

        let resolved = resolve(&[&a], &tabs, &pinned);
        assert_eq!(resolved[0].tab_id, Some(2));
    }

    #[test]
    fn test_exact_url_beats_prefix_for_other_bookmark() {
        // Tab 1 matches "b" exactly and "a" only by origin+path; the exact
        // match must win even though "a" comes first.
        let a = bookmark("a", "https://x.com/page?v=1");
        let b = bookmark("b", "https://x.com/page?v=2");
        let tabs = vec![create_test_tab(1, "https://x.com/page?v=2")];

        let resolved = resolve(&[&a, &b], &tabs, &HashMap::new());

        assert_eq!(resolved[0].tab_id, None);
        assert_eq!(resolved[1].tab_id, Some(1));
    }

    #[test]
    fn test_origin_path_fallback_and_single_claim() {
        let a = bookmark("a", "https://a.com/doc");
        let b = bookmark("b", "https://a.com/doc#section");
        let tabs = vec![create_test_tab(1, "https://a.com/doc?tab=2")];

        let resolved = resolve(&[&a, &b], &tabs, &HashMap::new());

        assert_eq!(resolved[0].tab_id, Some(1));
        assert_eq!(resolved[1].tab_id, None);
    }

    #[test]
    fn test_no_candidate_yields_placeholder() {
        let a = bookmark("a", "https://a.com");
        let tabs = vec![create_test_tab(1, "https://b.com")];

        let resolved = resolve(&[&a], &tabs, &HashMap::new());
        assert_eq!(
            resolved,
            vec![Resolution {
                bookmark_id: "a".into(),
                url: "https://a.com".into(),
                tab_id: None
            }]
        );
    }
}
