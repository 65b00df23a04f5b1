/// Bookmark mirror: one folder per space under a container folder, holding
/// the pinned slots of that space.
use std::collections::HashMap;

use crate::error::{HostError, HostResult};
use crate::host::{BookmarkUpdate, CreateBookmark, HostBrowser};
use crate::model::{BookmarkId, BookmarkNode, PinnedTabState};
use crate::resolver::flatten_bookmarks;
use crate::settings::EngineConfig;

/// What a duplicate-folder merge did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub folders_merged: usize,
    pub bookmarks_moved: usize,
    pub duplicates_discarded: usize,
}

impl MergeReport {
    pub fn is_noop(&self) -> bool {
        *self == MergeReport::default()
    }
}

pub struct BookmarkMirror<'a, H: HostBrowser> {
    host: &'a H,
    config: &'a EngineConfig,
}

impl<'a, H: HostBrowser> BookmarkMirror<'a, H> {
    pub fn new(host: &'a H, config: &'a EngineConfig) -> Self {
        BookmarkMirror { host, config }
    }

    /// Locate or create the container folder.
    pub async fn container_folder(&self) -> HostResult<BookmarkId> {
        let parent = &self.config.container_parent_id;
        let title = &self.config.container_folder_title;
        let existing = self
            .host
            .bookmark_children(parent)
            .await?
            .into_iter()
            .find(|n| n.is_folder() && &n.title == title);
        match existing {
            Some(folder) => Ok(folder.id),
            None => {
                log::info!("Creating bookmark container folder \"{}\"", title);
                let folder = self
                    .host
                    .create_bookmark(&CreateBookmark {
                        parent_id: parent.clone(),
                        title: title.clone(),
                        ..CreateBookmark::default()
                    })
                    .await?;
                Ok(folder.id)
            }
        }
    }

    async fn child_folder(&self, parent_id: &str, title: &str) -> HostResult<Option<BookmarkNode>> {
        Ok(self
            .host
            .bookmark_children(parent_id)
            .await?
            .into_iter()
            .find(|n| n.is_folder() && n.title == title))
    }

    async fn ensure_child_folder(&self, parent_id: &str, title: &str) -> HostResult<BookmarkId> {
        match self.child_folder(parent_id, title).await? {
            Some(folder) => Ok(folder.id),
            None => Ok(self
                .host
                .create_bookmark(&CreateBookmark {
                    parent_id: parent_id.to_string(),
                    title: title.to_string(),
                    ..CreateBookmark::default()
                })
                .await?
                .id),
        }
    }

    pub async fn space_folder(&self, space_name: &str) -> HostResult<Option<BookmarkNode>> {
        let container = self.container_folder().await?;
        self.child_folder(&container, space_name).await
    }

    pub async fn ensure_space_folder(&self, space_name: &str) -> HostResult<BookmarkId> {
        let container = self.container_folder().await?;
        self.ensure_child_folder(&container, space_name).await
    }

    pub async fn favorites_folder(&self) -> HostResult<BookmarkId> {
        let container = self.container_folder().await?;
        self.ensure_child_folder(&container, &self.config.favorites_folder_title)
            .await
    }

    /// Add a URL to favorites unless it is already there.
    pub async fn add_favorite(&self, url: &str, title: &str) -> HostResult<BookmarkNode> {
        let folder_id = self.favorites_folder().await?;
        if let Some(existing) = self.find_by_url(&folder_id, url).await? {
            return Ok(existing);
        }
        self.host
            .create_bookmark(&CreateBookmark {
                parent_id: folder_id,
                title: title.to_string(),
                url: Some(url.to_string()),
                index: None,
            })
            .await
    }

    pub async fn favorites(&self) -> HostResult<Vec<BookmarkNode>> {
        let folder_id = self.favorites_folder().await?;
        let children = self.host.bookmark_children(&folder_id).await?;
        Ok(children.into_iter().filter(|b| !b.is_folder()).collect())
    }

    /// Space folder titles under the container, favorites excluded.
    pub async fn space_folder_names(&self) -> HostResult<Vec<String>> {
        let container = self.container_folder().await?;
        let mut names: Vec<String> = Vec::new();
        for node in self.host.bookmark_children(&container).await? {
            if node.is_folder() && node.title != self.config.favorites_folder_title && !names.contains(&node.title) {
                names.push(node.title);
            }
        }
        Ok(names)
    }

    /// Full subtree of a space folder.
    pub async fn space_tree(&self, space_name: &str) -> HostResult<Option<BookmarkNode>> {
        match self.space_folder(space_name).await? {
            Some(folder) => self.host.bookmark_subtree(&folder.id).await,
            None => Ok(None),
        }
    }

    /// Bookmark with exactly this URL anywhere inside the folder.
    pub async fn find_by_url(&self, folder_id: &str, url: &str) -> HostResult<Option<BookmarkNode>> {
        let Some(tree) = self.host.bookmark_subtree(folder_id).await? else {
            return Ok(None);
        };
        Ok(flatten_bookmarks(&tree)
            .into_iter()
            .find(|b| b.url.as_deref() == Some(url))
            .cloned())
    }

    /// Pin a URL into the space folder (or into `parent_folder` inside it).
    /// An existing bookmark with the same URL is reused; when an explicit
    /// folder or index is asked for, it is moved there first.
    pub async fn pin(
        &self,
        space_name: &str,
        url: &str,
        title: &str,
        parent_folder: Option<&str>,
        index: Option<usize>,
    ) -> HostResult<BookmarkNode> {
        let folder_id = self.ensure_space_folder(space_name).await?;
        let parent_id = parent_folder.unwrap_or(&folder_id).to_string();
        if let Some(existing) = self.find_by_url(&folder_id, url).await? {
            let placed = existing.parent_id.as_deref() == Some(parent_id.as_str())
                && (index.is_none() || existing.index == index);
            if placed || (parent_folder.is_none() && index.is_none()) {
                log::debug!("Bookmark for {} already present in {}", url, space_name);
                return Ok(existing);
            }
            log::debug!("Moving existing bookmark for {} to its new slot", url);
            self.host.move_bookmark(&existing.id, &parent_id, index).await?;
            return Ok(BookmarkNode {
                parent_id: Some(parent_id),
                index,
                ..existing
            });
        }
        self.host
            .create_bookmark(&CreateBookmark {
                parent_id,
                title: title.to_string(),
                url: Some(url.to_string()),
                index,
            })
            .await
    }

    /// Remove the bookmark backing a pinned slot. The stored id is tried
    /// first; otherwise the pinned URL is searched for recursively.
    pub async fn unpin(&self, space_name: &str, state: &PinnedTabState) -> HostResult<bool> {
        let Some(folder) = self.space_folder(space_name).await? else {
            return Ok(false);
        };
        let target = self.locate(&folder.id, state).await?;
        match target {
            Some(node) => {
                self.host.remove_bookmark(&node.id).await?;
                Ok(true)
            }
            None => {
                log::warn!("No bookmark for {} in {}", state.pinned_url, space_name);
                Ok(false)
            }
        }
    }

    /// Find the bookmark for a pinned slot inside `folder_id`.
    async fn locate(&self, folder_id: &str, state: &PinnedTabState) -> HostResult<Option<BookmarkNode>> {
        let Some(tree) = self.host.bookmark_subtree(folder_id).await? else {
            return Ok(None);
        };
        let flat = flatten_bookmarks(&tree);
        if let Some(id) = state.bookmark_id.as_deref() {
            if let Some(node) = flat.iter().find(|b| b.id == id) {
                return Ok(Some((*node).clone()));
            }
        }
        Ok(flat
            .into_iter()
            .find(|b| b.url.as_deref() == Some(state.pinned_url.as_str()))
            .cloned())
    }

    /// Rename the bookmark behind a pinned tab. Returns the id that was
    /// updated so a stale stored id can be refreshed.
    pub async fn rename_for_tab(
        &self,
        space_name: &str,
        state: &PinnedTabState,
        new_title: &str,
    ) -> HostResult<Option<BookmarkId>> {
        let update = BookmarkUpdate {
            title: Some(new_title.to_string()),
            url: None,
        };
        if let Some(id) = state.bookmark_id.as_deref() {
            match self.host.update_bookmark(id, &update).await {
                Ok(node) => return Ok(Some(node.id)),
                Err(HostError::NotFound(_)) => {
                    log::debug!("Stored bookmark id {} is stale, searching by URL", id);
                }
                Err(e) => return Err(e),
            }
        }
        let Some(folder) = self.space_folder(space_name).await? else {
            return Ok(None);
        };
        match self.find_by_url(&folder.id, &state.pinned_url).await? {
            Some(node) => {
                let node = self.host.update_bookmark(&node.id, &update).await?;
                Ok(Some(node.id))
            }
            None => Ok(None),
        }
    }

    /// Re-anchor a pinned slot to a new URL and title.
    pub async fn replace_url(
        &self,
        space_name: &str,
        state: &PinnedTabState,
        new_url: &str,
        new_title: &str,
    ) -> HostResult<Option<BookmarkNode>> {
        let Some(folder) = self.space_folder(space_name).await? else {
            return Ok(None);
        };
        let Some(node) = self.locate(&folder.id, state).await? else {
            return Ok(None);
        };
        let updated = self
            .host
            .update_bookmark(
                &node.id,
                &BookmarkUpdate {
                    title: Some(new_title.to_string()),
                    url: Some(new_url.to_string()),
                },
            )
            .await?;
        Ok(Some(updated))
    }

    pub async fn rename_space_folder(&self, old_name: &str, new_name: &str) -> HostResult<()> {
        if let Some(folder) = self.space_folder(old_name).await? {
            self.host
                .update_bookmark(
                    &folder.id,
                    &BookmarkUpdate {
                        title: Some(new_name.to_string()),
                        url: None,
                    },
                )
                .await?;
        }
        Ok(())
    }

    pub async fn remove_space_folder(&self, space_name: &str) -> HostResult<bool> {
        match self.space_folder(space_name).await? {
            Some(folder) => {
                self.host.remove_bookmark_tree(&folder.id).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// New UI folder inside a space's pinned section.
    pub async fn create_subfolder(&self, space_name: &str, parent: Option<&str>, title: &str) -> HostResult<BookmarkNode> {
        let space_folder = self.ensure_space_folder(space_name).await?;
        self.host
            .create_bookmark(&CreateBookmark {
                parent_id: parent.unwrap_or(&space_folder).to_string(),
                title: title.to_string(),
                ..CreateBookmark::default()
            })
            .await
    }

    /// Merge same-titled folders directly under the container. The oldest
    /// folder survives; the others are merged into it and removed.
    pub async fn merge_duplicate_folders(&self) -> HostResult<MergeReport> {
        let container = self.container_folder().await?;
        let mut by_title: Vec<(String, Vec<BookmarkNode>)> = Vec::new();
        let mut slots: HashMap<String, usize> = HashMap::new();
        for node in self.host.bookmark_children(&container).await? {
            if !node.is_folder() {
                continue;
            }
            match slots.get(&node.title) {
                Some(slot) => by_title[*slot].1.push(node),
                None => {
                    slots.insert(node.title.clone(), by_title.len());
                    by_title.push((node.title.clone(), vec![node]));
                }
            }
        }

        let mut report = MergeReport::default();
        for (title, mut folders) in by_title {
            if folders.len() < 2 {
                continue;
            }
            folders.sort_by(|a, b| {
                let a_added = a.date_added.unwrap_or(f64::MAX);
                let b_added = b.date_added.unwrap_or(f64::MAX);
                a_added
                    .total_cmp(&b_added)
                    .then_with(|| a.index.cmp(&b.index))
            });
            let keep = folders.remove(0);
            for duplicate in folders {
                log::info!("Merging duplicate folder \"{}\" ({} into {})", title, duplicate.id, keep.id);
                self.merge_into(&keep.id, &duplicate.id, &mut report).await?;
                self.host.remove_bookmark_tree(&duplicate.id).await?;
                report.folders_merged += 1;
            }
        }
        Ok(report)
    }

    async fn merge_into(&self, target_id: &str, source_id: &str, report: &mut MergeReport) -> HostResult<()> {
        let mut target_children = self.host.bookmark_children(target_id).await?;
        for child in self.host.bookmark_children(source_id).await? {
            if child.is_folder() {
                let existing = target_children
                    .iter()
                    .find(|t| t.is_folder() && t.title == child.title)
                    .map(|t| t.id.clone());
                match existing {
                    Some(existing_id) => {
                        Box::pin(self.merge_into(&existing_id, &child.id, report)).await?;
                        report.folders_merged += 1;
                    }
                    None => {
                        self.host.move_bookmark(&child.id, target_id, None).await?;
                        report.bookmarks_moved += 1;
                        target_children.push(child);
                    }
                }
            } else {
                let duplicate = target_children
                    .iter()
                    .any(|t| !t.is_folder() && t.url == child.url);
                if duplicate {
                    // Same URL already kept; the copy goes away with its folder.
                    log::debug!("Discarding duplicate bookmark {:?}", child.url);
                    report.duplicates_discarded += 1;
                } else {
                    self.host.move_bookmark(&child.id, target_id, None).await?;
                    report.bookmarks_moved += 1;
                    target_children.push(child);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::MockHost;
    use futures::executor::block_on;

    fn setup() -> (MockHost, EngineConfig) {
        (MockHost::new(), EngineConfig::default())
    }

    #[test]
    fn test_container_folder_created_once() {
        let (host, config) = setup();
        let mirror = BookmarkMirror::new(&host, &config);

        let first = block_on(mirror.container_folder()).unwrap();
        let second = block_on(mirror.container_folder()).unwrap();

        assert_eq!(first, second);
        assert_eq!(host.child_titles("2"), vec!["Spaces"]);
    }

    #[test]
    fn test_space_folder_names_exclude_favorites() {
        let (host, config) = setup();
        let mirror = BookmarkMirror::new(&host, &config);
        block_on(async {
            mirror.ensure_space_folder("Work").await.unwrap();
            mirror.favorites_folder().await.unwrap();
            mirror.ensure_space_folder("Home").await.unwrap();

            assert_eq!(mirror.space_folder_names().await.unwrap(), vec!["Work", "Home"]);
        });
    }

    #[test]
    fn test_add_favorite_dedups_by_url() {
        let (host, config) = setup();
        let mirror = BookmarkMirror::new(&host, &config);
        block_on(async {
            let first = mirror.add_favorite("https://a.com", "A").await.unwrap();
            let again = mirror.add_favorite("https://a.com", "A again").await.unwrap();
            mirror.add_favorite("https://b.com", "B").await.unwrap();

            assert_eq!(first.id, again.id);
            let titles: Vec<String> = mirror.favorites().await.unwrap().into_iter().map(|b| b.title).collect();
            assert_eq!(titles, vec!["A", "B"]);
        });
    }

    #[test]
    fn test_pin_same_url_twice_creates_one_bookmark() {
        let (host, config) = setup();
        let mirror = BookmarkMirror::new(&host, &config);

        block_on(async {
            let first = mirror.pin("Work", "https://a.com", "A", None, None).await.unwrap();
            let second = mirror.pin("Work", "https://a.com", "A again", None, None).await.unwrap();
            assert_eq!(first.id, second.id);

            let tree = mirror.space_tree("Work").await.unwrap().unwrap();
            assert_eq!(flatten_bookmarks(&tree).len(), 1);
            assert_eq!(tree.children()[0].title, "A");
        });
    }

    #[test]
    fn test_unpin_uses_pinned_url_in_nested_folder() {
        let (host, config) = setup();
        let mirror = BookmarkMirror::new(&host, &config);

        block_on(async {
            let space = mirror.ensure_space_folder("Work").await.unwrap();
            let nested = host.add_folder(&space, "Docs");
            host.add_bookmark(&nested, "A", "https://a.com");

            let state = PinnedTabState {
                pinned_url: "https://a.com".into(),
                bookmark_id: None,
            };
            assert!(mirror.unpin("Work", &state).await.unwrap());
            assert!(mirror.find_by_url(&space, "https://a.com").await.unwrap().is_none());
            assert!(!mirror.unpin("Work", &state).await.unwrap());
        });
    }

    #[test]
    fn test_rename_falls_back_to_url_when_id_stale() {
        let (host, config) = setup();
        let mirror = BookmarkMirror::new(&host, &config);

        block_on(async {
            let node = mirror.pin("Work", "https://a.com", "A", None, None).await.unwrap();
            let state = PinnedTabState {
                pinned_url: "https://a.com".into(),
                bookmark_id: Some("does-not-exist".into()),
            };

            let used = mirror.rename_for_tab("Work", &state, "Renamed").await.unwrap();

            assert_eq!(used, Some(node.id.clone()));
            assert_eq!(host.tree(&node.id).unwrap().title, "Renamed");
        });
    }

    #[test]
    fn test_replace_url_updates_bookmark() {
        let (host, config) = setup();
        let mirror = BookmarkMirror::new(&host, &config);

        block_on(async {
            let node = mirror.pin("Work", "https://a.com", "A", None, None).await.unwrap();
            let state = PinnedTabState {
                pinned_url: "https://a.com".into(),
                bookmark_id: Some(node.id.clone()),
            };

            let updated = mirror
                .replace_url("Work", &state, "https://a.com/v2", "A v2")
                .await
                .unwrap()
                .unwrap();

            assert_eq!(updated.url.as_deref(), Some("https://a.com/v2"));
            assert_eq!(updated.title, "A v2");
        });
    }

    #[test]
    fn test_merge_keeps_oldest_and_dedupes_by_url() {
        let (host, config) = setup();
        let mirror = BookmarkMirror::new(&host, &config);

        block_on(async {
            let container = mirror.container_folder().await.unwrap();
            let older = host.add_folder(&container, "Work");
            host.add_bookmark(&older, "A", "https://a.com");
            let older_docs = host.add_folder(&older, "Docs");
            host.add_bookmark(&older_docs, "D1", "https://d1.com");

            let newer = host.add_folder(&container, "Work");
            host.add_bookmark(&newer, "A dup", "https://a.com");
            host.add_bookmark(&newer, "B", "https://b.com");
            let newer_docs = host.add_folder(&newer, "Docs");
            host.add_bookmark(&newer_docs, "D2", "https://d2.com");
            let unique = host.add_folder(&newer, "Misc");
            host.add_bookmark(&unique, "M", "https://m.com");

            let report = mirror.merge_duplicate_folders().await.unwrap();

            assert_eq!(report.duplicates_discarded, 1);
            assert_eq!(host.child_titles(&container), vec!["Work"]);
            assert_eq!(mirror.space_folder("Work").await.unwrap().unwrap().id, older);

            let tree = host.tree(&older).unwrap();
            let urls: Vec<&str> = flatten_bookmarks(&tree)
                .iter()
                .filter_map(|b| b.url.as_deref())
                .collect();
            assert_eq!(
                urls,
                vec!["https://a.com", "https://d1.com", "https://d2.com", "https://b.com", "https://m.com"]
            );
            assert_eq!(host.child_titles(&older), vec!["A", "Docs", "B", "Misc"]);
        });
    }

    #[test]
    fn test_merge_is_idempotent() {
        let (host, config) = setup();
        let mirror = BookmarkMirror::new(&host, &config);

        block_on(async {
            let container = mirror.container_folder().await.unwrap();
            let a = host.add_folder(&container, "Work");
            host.add_bookmark(&a, "A", "https://a.com");
            let b = host.add_folder(&container, "Work");
            host.add_bookmark(&b, "B", "https://b.com");

            let first = mirror.merge_duplicate_folders().await.unwrap();
            let snapshot = host.tree(&container);
            let second = mirror.merge_duplicate_folders().await.unwrap();

            assert!(!first.is_noop());
            assert!(second.is_noop());
            assert_eq!(host.tree(&container), snapshot);
        });
    }
}
