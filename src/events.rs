/// Host events and cross-context commands, as they arrive from the JS side.
use std::pin::pin;

use futures::future::{select, Either};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::engine::{Reconciled, SpaceEngine};
use crate::error::{HostError, SpaceResult};
use crate::host::HostBrowser;
use crate::model::{BookmarkId, GroupId, HostTab, TabId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostEvent {
    TabCreated { tab: HostTab },
    TabUpdated { tab: HostTab },
    TabRemoved { tab_id: TabId },
    TabMoved { tab_id: TabId },
    TabActivated { tab_id: TabId },
    GroupRemoved { group_id: GroupId },
    SettingsChanged,
    ArchiveChanged,
    Alarm { name: String },
}

/// Commands the background context hands to the sidebar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ExtensionMessage {
    TogglePin { tab_id: TabId },
    CreateSpaceFromFolder { name: String },
    ActivatePinnedUrl { space_id: GroupId, bookmark_id: BookmarkId },
}

/// Who ended up executing a forwarded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Forwarded {
    Sidebar(Value),
    Local(Value),
}

impl<H: HostBrowser> SpaceEngine<H> {
    pub async fn dispatch(&self, event: HostEvent) -> SpaceResult<()> {
        match event {
            HostEvent::TabCreated { tab } => {
                if self.flags.any_raised() {
                    log::debug!("Ignoring tab {} created by a guarded sequence", tab.id);
                    return Ok(());
                }
                self.handle_tab_created(tab).await?;
            }
            HostEvent::TabUpdated { tab } => self.handle_tab_updated(tab).await?,
            HostEvent::TabRemoved { tab_id } => self.handle_tab_removed(tab_id).await?,
            HostEvent::TabMoved { tab_id } => {
                self.on_tab_moved(tab_id).await?;
            }
            HostEvent::TabActivated { tab_id } => self.handle_tab_activated(tab_id).await?,
            HostEvent::GroupRemoved { group_id } => self.handle_group_removed(group_id).await?,
            HostEvent::SettingsChanged => self.apply_settings_change().await?,
            HostEvent::ArchiveChanged => self.reload_archived_records().await?,
            HostEvent::Alarm { name } => self.on_alarm(&name).await?,
        }
        Ok(())
    }

    /// Native move: drop our own echoes, debounce the rest per tab.
    pub async fn on_tab_moved(&self, tab_id: TabId) -> SpaceResult<Option<Reconciled>> {
        let now = self.host.now_ms();
        if self.state.borrow_mut().provenance.consume_echo(tab_id, now) {
            log::debug!("Suppressed echo of our own move for tab {}", tab_id);
            return Ok(None);
        }
        let Some(generation) = self.state.borrow_mut().debouncer.schedule(tab_id) else {
            log::debug!("Tab {} already being reconciled", tab_id);
            return Ok(None);
        };
        self.host.sleep(self.config.move_debounce_ms).await;
        if !self.state.borrow_mut().debouncer.claim(tab_id, generation) {
            return Ok(None);
        }
        let result = self.handle_host_move(tab_id).await;
        self.state.borrow_mut().debouncer.finish(tab_id);
        result
    }

    async fn apply_settings_change(&self) -> SpaceResult<()> {
        let settings = self.reload_settings().await?;
        {
            let mut state = self.state.borrow_mut();
            let orders: Vec<(GroupId, Vec<TabId>)> = state
                .store
                .spaces
                .iter()
                .map(|s| (s.id, s.temporary_tabs.clone()))
                .collect();
            for (space_id, order) in orders {
                state
                    .view
                    .sync_temporary(space_id, &order, &Default::default(), settings.invert_tab_order);
            }
            let active_tab = state.active_space.and_then(|id| state.store.get(id)).and_then(|s| s.last_tab);
            state
                .view
                .refresh_collapsed_visibility(active_tab, settings.show_all_open_tabs_in_collapsed_folders);
        }
        self.notify();
        Ok(())
    }

    /// Execute a command in this context.
    pub async fn handle_message(&self, message: ExtensionMessage) -> SpaceResult<Value> {
        match message {
            ExtensionMessage::TogglePin { tab_id } => {
                self.toggle_pin(tab_id).await?;
                Ok(json!({ "ok": true }))
            }
            ExtensionMessage::CreateSpaceFromFolder { name } => {
                let space_id = self.create_space_from_folder(&name).await?;
                Ok(json!({ "ok": true, "spaceId": space_id }))
            }
            ExtensionMessage::ActivatePinnedUrl { space_id, bookmark_id } => {
                let tab_id = self.open_pinned_bookmark(space_id, &bookmark_id).await?;
                Ok(json!({ "ok": true, "tabId": tab_id }))
            }
        }
    }

    /// Hand a command to the sidebar; apply it here if the sidebar doesn't
    /// answer within the timeout.
    pub async fn forward_or_apply(&self, message: ExtensionMessage) -> SpaceResult<Forwarded> {
        let payload = serde_json::to_value(&message).map_err(HostError::from)?;
        let send = pin!(self.host.send_message(payload));
        let timeout = pin!(self.host.sleep(self.config.message_timeout_ms));

        let reply = match select(send, timeout).await {
            Either::Left((Ok(reply), _)) => reply,
            Either::Left((Err(e), _)) => {
                log::debug!("No sidebar to take the command: {}", e);
                None
            }
            Either::Right(((), _)) => {
                log::debug!("Sidebar did not answer within {}ms", self.config.message_timeout_ms);
                None
            }
        };
        match reply {
            Some(reply) => Ok(Forwarded::Sidebar(reply)),
            None => self.handle_message(message).await.map(Forwarded::Local),
        }
    }
}
