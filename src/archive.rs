/// Idle-tab archive: temporary tabs untouched for longer than the configured
/// threshold are closed and kept as restorable records.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::engine::{SpaceEngine, SyncSource};
use crate::error::{HostResult, SpaceResult};
use crate::guards::FlagGuard;
use crate::host::{CreateTabProps, HostBrowser};
use crate::model::{GroupId, TabId};
use crate::projection::TabRow;
use crate::store::{self, ACTIVITY_KEY, ARCHIVE_KEY};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedTab {
    pub url: String,
    pub name: String,
    pub space_id: GroupId,
    #[serde(default)]
    pub space_name: String,
    pub archived_at: f64,
}

/// Archive records (oldest first) and last-activity stamps per tab.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveState {
    pub records: Vec<ArchivedTab>,
    pub activity: HashMap<TabId, f64>,
}

impl ArchiveState {
    pub fn touch(&mut self, tab_id: TabId, now: f64) {
        self.activity.insert(tab_id, now);
    }

    pub fn forget(&mut self, tab_id: TabId) {
        self.activity.remove(&tab_id);
    }

    /// Add a record. An older record for the same URL is replaced and the
    /// oldest records are evicted past `cap`.
    pub fn push(&mut self, record: ArchivedTab, cap: usize) {
        self.records.retain(|r| r.url != record.url);
        self.records.push(record);
        if self.records.len() > cap {
            let excess = self.records.len() - cap;
            self.records.drain(..excess);
        }
    }

    /// Tabs whose last activity is older than `threshold_ms`. Candidates
    /// with no stamp are stamped now and spared for this round.
    pub fn idle_candidates(&mut self, candidates: &[TabId], now: f64, threshold_ms: f64) -> Vec<TabId> {
        let mut idle = Vec::new();
        for tab_id in candidates {
            match self.activity.get(tab_id) {
                Some(last) if now - last >= threshold_ms => idle.push(*tab_id),
                Some(_) => {}
                None => {
                    self.activity.insert(*tab_id, now);
                }
            }
        }
        idle
    }
}

impl<H: HostBrowser> SpaceEngine<H> {
    pub(crate) async fn load_archive(&self) -> HostResult<()> {
        let records: Vec<ArchivedTab> = store::load_json(&self.host, ARCHIVE_KEY).await?;
        let activity: HashMap<TabId, f64> = store::load_json(&self.host, ACTIVITY_KEY).await?;
        let mut state = self.state.borrow_mut();
        state.archive = ArchiveState { records, activity };
        Ok(())
    }

    async fn save_archive(&self) -> HostResult<()> {
        let archive = self.state.borrow().archive.clone();
        store::save_json(&self.host, ARCHIVE_KEY, &archive.records).await?;
        store::save_json(&self.host, ACTIVITY_KEY, &archive.activity).await
    }

    /// Pick up records written by the other context. Activity stamps stay
    /// local.
    pub async fn reload_archived_records(&self) -> SpaceResult<()> {
        let records: Vec<ArchivedTab> = store::load_json(&self.host, ARCHIVE_KEY).await?;
        self.state.borrow_mut().archive.records = records;
        self.notify();
        Ok(())
    }

    pub fn archived_tabs(&self) -> Vec<ArchivedTab> {
        self.state.borrow().archive.records.clone()
    }

    pub fn record_activity(&self, tab_id: TabId) {
        let now = self.host.now_ms();
        self.state.borrow_mut().archive.touch(tab_id, now);
    }

    /// Close temporary tabs idle past the threshold. Pinned tabs (either
    /// kind) and the focused tab are never archived.
    pub async fn run_idle_sweep(&self, now: f64) -> SpaceResult<Vec<ArchivedTab>> {
        let (enabled, threshold) = {
            let state = self.state.borrow();
            (state.settings.auto_archive_enabled, state.settings.idle_threshold_ms())
        };
        if !enabled {
            return Ok(Vec::new());
        }

        let spaces: Vec<(GroupId, String, Vec<TabId>)> = self
            .state
            .borrow()
            .store
            .spaces
            .iter()
            .filter(|s| !s.inactive)
            .map(|s| (s.id, s.name.clone(), s.temporary_tabs.clone()))
            .collect();

        let mut archived = Vec::new();
        for (space_id, space_name, temporary) in spaces {
            let mut candidates = Vec::new();
            for tab_id in temporary {
                match self.host.get_tab(tab_id).await? {
                    Some(tab) if !tab.pinned && !tab.active => candidates.push(tab),
                    _ => {}
                }
            }
            let ids: Vec<TabId> = candidates.iter().map(|t| t.id).collect();
            let idle = self
                .state
                .borrow_mut()
                .archive
                .idle_candidates(&ids, now, threshold);

            for tab in candidates.into_iter().filter(|t| idle.contains(&t.id)) {
                let name = self.display_title(tab.id).unwrap_or_else(|| tab.title.clone());
                let record = ArchivedTab {
                    url: tab.url.clone(),
                    name,
                    space_id,
                    space_name: space_name.clone(),
                    archived_at: now,
                };
                log::info!("Archiving idle tab {} from {}", record.url, space_name);
                self.host.remove_tabs(&[tab.id]).await?;
                self.handle_tab_removed(tab.id).await?;
                let cap = self.config.archive_cap;
                self.state.borrow_mut().archive.push(record.clone(), cap);
                archived.push(record);
            }
        }
        self.save_archive().await?;
        Ok(archived)
    }

    /// Reopen an archived URL into its space, or the active one if the
    /// space is gone.
    pub async fn restore_archived(&self, url: &str) -> SpaceResult<Option<TabId>> {
        let (record, target) = {
            let state = self.state.borrow();
            let Some(record) = state.archive.records.iter().find(|r| r.url == url).cloned() else {
                return Ok(None);
            };
            let live = |id: GroupId| state.store.get(id).filter(|s| !s.inactive).map(|s| s.id);
            let target = live(record.space_id)
                .or_else(|| {
                    state
                        .store
                        .by_name(&record.space_name)
                        .filter(|s| !s.inactive)
                        .map(|s| s.id)
                })
                .or(state.active_space);
            (record, target)
        };

        let window_id = self.state.borrow().window_id;
        let _opening = FlagGuard::raise(&self.flags.opening_bookmark);
        let tab = self
            .host
            .create_tab(&CreateTabProps {
                url: Some(record.url.clone()),
                active: true,
                window_id,
                index: None,
            })
            .await?;
        if let Some(space_id) = target {
            self.host.group_tabs(&[tab.id], Some(space_id)).await?;
            {
                let now = self.host.now_ms();
                let mut state = self.state.borrow_mut();
                state.store.remove_tab_everywhere(tab.id);
                state.store.require_mut(space_id)?.temporary_tabs.push(tab.id);
                state
                    .view
                    .insert_temporary(space_id, TabRow::from_tab(&tab, None), Some(0));
                state.archive.touch(tab.id, now);
            }
            self.reconcile_ordering(space_id, SyncSource::Extension).await?;
        }
        self.state.borrow_mut().archive.records.retain(|r| r.url != record.url);
        self.save_archive().await?;
        self.notify();
        log::info!("Restored archived tab {}", record.url);
        Ok(Some(tab.id))
    }

    pub async fn remove_archived(&self, url: &str) -> SpaceResult<bool> {
        let removed = {
            let mut state = self.state.borrow_mut();
            let before = state.archive.records.len();
            state.archive.records.retain(|r| r.url != url);
            before != state.archive.records.len()
        };
        if removed {
            self.save_archive().await?;
            self.notify();
        }
        Ok(removed)
    }

    /// Periodic alarm entry point.
    pub async fn on_alarm(&self, name: &str) -> SpaceResult<()> {
        if name != self.config.alarm_name {
            return Ok(());
        }
        let now = self.host.now_ms();
        let archived = self.run_idle_sweep(now).await?;
        if !archived.is_empty() {
            log::debug!("Archived {} idle tabs", archived.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::*;
    use futures::executor::block_on;

    const HOUR: f64 = 3_600_000.0;

    fn record(url: &str, at: f64) -> ArchivedTab {
        ArchivedTab {
            url: url.to_string(),
            name: url.to_string(),
            space_id: 1,
            space_name: "Work".to_string(),
            archived_at: at,
        }
    }

    #[test]
    fn test_push_dedups_url_and_evicts_oldest() {
        let mut archive = ArchiveState::default();
        archive.push(record("a", 1.0), 2);
        archive.push(record("b", 2.0), 2);
        archive.push(record("a", 3.0), 2);
        archive.push(record("c", 4.0), 2);

        let urls: Vec<&str> = archive.records.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["a", "c"]);
        assert_eq!(archive.records[0].archived_at, 3.0);
    }

    #[test]
    fn test_unstamped_tabs_are_spared_once() {
        let mut archive = ArchiveState::default();
        archive.touch(1, 0.0);

        let idle = archive.idle_candidates(&[1, 2], 10.0 * HOUR, HOUR);

        assert_eq!(idle, vec![1]);
        assert_eq!(archive.activity.get(&2), Some(&(10.0 * HOUR)));
    }

    #[test]
    fn test_sweep_archives_only_idle_temporary_tabs() {
        let engine = engine();
        let work = add_space(&engine, "Work");
        let pinned = add_temp_tab(&engine, work, "https://pinned.com");
        block_on(engine.pin_tab(pinned)).unwrap();
        let idle = add_temp_tab(&engine, work, "https://idle.com");
        let focused = add_temp_tab(&engine, work, "https://focused.com");
        let fresh = add_temp_tab(&engine, work, "https://fresh.com");
        engine.host.set_active(focused);
        engine.state.borrow_mut().settings.auto_archive_enabled = true;

        let start = engine.host.now_ms();
        for tab in [pinned, idle, focused] {
            engine.state.borrow_mut().archive.touch(tab, start);
        }
        let later = start + 7.0 * HOUR;
        engine.state.borrow_mut().archive.touch(fresh, later - HOUR);

        let archived = block_on(engine.run_idle_sweep(later)).unwrap();

        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].url, "https://idle.com");
        assert_eq!(archived[0].space_name, "Work");
        assert!(engine.host.tab(idle).is_none());
        assert!(engine.host.tab(pinned).is_some());
        assert!(engine.host.tab(focused).is_some());
        assert!(!engine.space(work).unwrap().contains(idle));
        assert!(engine.host.state.borrow().local.contains_key(ARCHIVE_KEY));
    }

    #[test]
    fn test_sweep_disabled_does_nothing() {
        let engine = engine();
        let work = add_space(&engine, "Work");
        let tab = add_temp_tab(&engine, work, "https://a.com");
        engine.state.borrow_mut().archive.touch(tab, 0.0);

        let archived = block_on(engine.run_idle_sweep(100.0 * HOUR)).unwrap();

        assert!(archived.is_empty());
        assert!(engine.host.tab(tab).is_some());
    }

    #[test]
    fn test_restore_reopens_into_original_space() {
        let engine = engine();
        let work = add_space(&engine, "Work");
        let home = add_space(&engine, "Home");
        engine.state.borrow_mut().archive.push(
            ArchivedTab {
                space_id: home,
                space_name: "Home".to_string(),
                ..record("https://a.com", 1.0)
            },
            10,
        );

        let tab_id = block_on(engine.restore_archived("https://a.com")).unwrap().unwrap();

        assert_eq!(engine.host.tab(tab_id).unwrap().group_id, Some(home));
        assert_eq!(engine.active_space(), Some(work));
        assert_eq!(engine.space(home).unwrap().temporary_tabs, vec![tab_id]);
        assert!(!engine.flags.opening_bookmark.is_raised());
        assert!(engine.archived_tabs().is_empty());
    }

    #[test]
    fn test_restore_falls_back_to_active_space() {
        let engine = engine();
        let work = add_space(&engine, "Work");
        engine.state.borrow_mut().archive.push(
            ArchivedTab {
                space_id: 999,
                space_name: "Gone".to_string(),
                ..record("https://a.com", 1.0)
            },
            10,
        );

        let tab_id = block_on(engine.restore_archived("https://a.com")).unwrap().unwrap();

        assert_eq!(engine.host.tab(tab_id).unwrap().group_id, Some(work));
    }

    #[test]
    fn test_remove_archived() {
        let engine = engine();
        engine.state.borrow_mut().archive.push(record("https://a.com", 1.0), 10);

        assert!(block_on(engine.remove_archived("https://a.com")).unwrap());
        assert!(!block_on(engine.remove_archived("https://a.com")).unwrap());
    }

    #[test]
    fn test_alarm_ignores_other_names() {
        let engine = engine();
        let work = add_space(&engine, "Work");
        let tab = add_temp_tab(&engine, work, "https://a.com");
        engine.state.borrow_mut().settings.auto_archive_enabled = true;
        engine.state.borrow_mut().archive.touch(tab, 0.0);

        block_on(engine.on_alarm("something-else")).unwrap();

        assert!(engine.host.tab(tab).is_some());
    }

    #[test]
    fn test_reload_picks_up_records_from_other_context() {
        let engine = engine();
        engine
            .state
            .borrow_mut()
            .archive
            .activity
            .insert(7, 5.0);
        let stored = serde_json::to_value(vec![record("https://old.com", 1.0)]).unwrap();
        engine
            .host
            .state
            .borrow_mut()
            .local
            .insert(ARCHIVE_KEY.to_string(), stored);

        block_on(engine.dispatch(crate::events::HostEvent::ArchiveChanged)).unwrap();

        assert_eq!(engine.archived_tabs(), vec![record("https://old.com", 1.0)]);
        assert_eq!(engine.state.borrow().archive.activity.get(&7), Some(&5.0));
    }
}
