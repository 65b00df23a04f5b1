/// `chrome.*` bridge. The JS side lives in `host.js` and returns plain
/// JSON-compatible objects; this file only converts values and errors.
use serde::Serialize;
use serde::de::DeserializeOwned;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

use super::{
    BookmarkUpdate, CreateBookmark, CreateTabProps, GroupUpdate, HostBrowser, StorageArea,
    TabQuery, TabUpdate,
};
use crate::error::{HostError, HostResult};
use crate::model::{BookmarkNode, GroupId, HostGroup, HostTab, TabId, WindowId};

// Import JS bridge functions
#[wasm_bindgen(module = "/host.js")]
extern "C" {
    #[wasm_bindgen(catch)]
    async fn queryTabs(query: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn getTab(tab_id: i32) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn createTab(props: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn updateTab(tab_id: i32, update: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn removeTabs(tab_ids: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn moveTabs(tab_ids: JsValue, index: i32) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn groupTabs(tab_ids: JsValue, group_id: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn ungroupTabs(tab_ids: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn queryGroups(window_id: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn getGroup(group_id: i32) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn updateGroup(group_id: i32, update: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn removeGroup(group_id: i32) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn getBookmarkChildren(id: &str) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn getBookmarkSubTree(id: &str) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn searchBookmarks(url: &str) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn createBookmark(create: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn updateBookmark(id: &str, update: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn moveBookmark(id: &str, destination: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn removeBookmark(id: &str) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn removeBookmarkTree(id: &str) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn getStorage(area: &str, key: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn setStorage(area: &str, key: &str, value: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn sendMessage(message: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn createAlarm(name: &str, period_minutes: u32) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn delay(ms: u32) -> Result<(), JsValue>;

    fn installListeners(on_event: &js_sys::Function, on_message: &js_sys::Function);

    fn installBackgroundListeners(
        on_command: &js_sys::Function,
        on_alarm: &js_sys::Function,
        on_activated: &js_sys::Function,
    );
}

/// Route chrome events and runtime messages into the given handlers.
///
/// The closures live for the rest of the page, so they are leaked on purpose.
pub fn install_listeners(
    on_event: impl Fn(JsValue) + 'static,
    on_message: impl Fn(JsValue) -> js_sys::Promise + 'static,
) {
    let on_event = Closure::wrap(Box::new(on_event) as Box<dyn Fn(JsValue)>);
    let on_message = Closure::wrap(Box::new(on_message) as Box<dyn Fn(JsValue) -> js_sys::Promise>);
    installListeners(on_event.as_ref().unchecked_ref(), on_message.as_ref().unchecked_ref());
    on_event.forget();
    on_message.forget();
}

pub fn install_background_listeners(
    on_command: impl Fn(JsValue) + 'static,
    on_alarm: impl Fn(String) + 'static,
    on_activated: impl Fn(TabId) + 'static,
) {
    let on_command = Closure::wrap(Box::new(on_command) as Box<dyn Fn(JsValue)>);
    let on_alarm = Closure::wrap(Box::new(on_alarm) as Box<dyn Fn(String)>);
    let on_activated = Closure::wrap(Box::new(on_activated) as Box<dyn Fn(TabId)>);
    installBackgroundListeners(
        on_command.as_ref().unchecked_ref(),
        on_alarm.as_ref().unchecked_ref(),
        on_activated.as_ref().unchecked_ref(),
    );
    on_command.forget();
    on_alarm.forget();
    on_activated.forget();
}

/// Convert a JS payload into one of our wire types.
pub fn decode<T: DeserializeOwned>(value: JsValue) -> HostResult<T> {
    from_js(value)
}

/// Convert a value into a JSON-compatible JS object.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> HostResult<JsValue> {
    to_js(value)
}

/// Host backed by the real extension APIs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeHost;

fn to_js<T: Serialize + ?Sized>(value: &T) -> HostResult<JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| HostError::Serialization(format!("{:?}", e)))
}

fn from_js<T: DeserializeOwned>(value: JsValue) -> HostResult<T> {
    serde_wasm_bindgen::from_value(value).map_err(|e| HostError::Serialization(format!("{:?}", e)))
}

fn from_js_opt<T: DeserializeOwned>(value: JsValue) -> HostResult<Option<T>> {
    if value.is_null() || value.is_undefined() {
        Ok(None)
    } else {
        from_js(value).map(Some)
    }
}

/// Turn a rejected promise into a classified host error.
fn host_error(err: JsValue) -> HostError {
    let message = err
        .dyn_ref::<js_sys::Error>()
        .map(|e| String::from(e.message()))
        .or_else(|| err.as_string())
        .unwrap_or_else(|| format!("{:?}", err));
    HostError::classify(&message)
}

impl HostBrowser for ChromeHost {
    async fn query_tabs(&self, query: &TabQuery) -> HostResult<Vec<HostTab>> {
        let tabs = queryTabs(to_js(query)?).await.map_err(host_error)?;
        from_js(tabs)
    }

    async fn get_tab(&self, tab_id: TabId) -> HostResult<Option<HostTab>> {
        let tab = getTab(tab_id).await.map_err(host_error)?;
        from_js_opt(tab)
    }

    async fn create_tab(&self, props: &CreateTabProps) -> HostResult<HostTab> {
        let tab = createTab(to_js(props)?).await.map_err(host_error)?;
        from_js(tab)
    }

    async fn update_tab(&self, tab_id: TabId, update: &TabUpdate) -> HostResult<HostTab> {
        let tab = updateTab(tab_id, to_js(update)?).await.map_err(host_error)?;
        from_js(tab)
    }

    async fn remove_tabs(&self, tab_ids: &[TabId]) -> HostResult<()> {
        removeTabs(to_js(tab_ids)?).await.map_err(host_error)
    }

    async fn move_tabs(&self, tab_ids: &[TabId], index: i32) -> HostResult<()> {
        moveTabs(to_js(tab_ids)?, index).await.map_err(host_error)
    }

    async fn group_tabs(&self, tab_ids: &[TabId], group_id: Option<GroupId>) -> HostResult<GroupId> {
        let group = groupTabs(to_js(tab_ids)?, to_js(&group_id)?)
            .await
            .map_err(host_error)?;
        from_js(group)
    }

    async fn ungroup_tabs(&self, tab_ids: &[TabId]) -> HostResult<()> {
        ungroupTabs(to_js(tab_ids)?).await.map_err(host_error)
    }

    async fn query_groups(&self, window_id: Option<WindowId>) -> HostResult<Vec<HostGroup>> {
        let groups = queryGroups(to_js(&window_id)?).await.map_err(host_error)?;
        from_js(groups)
    }

    async fn get_group(&self, group_id: GroupId) -> HostResult<Option<HostGroup>> {
        match getGroup(group_id).await {
            Ok(group) => from_js_opt(group),
            Err(e) => match host_error(e) {
                HostError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn update_group(&self, group_id: GroupId, update: &GroupUpdate) -> HostResult<()> {
        updateGroup(group_id, to_js(update)?).await.map_err(host_error)
    }

    async fn remove_group(&self, group_id: GroupId) -> HostResult<()> {
        removeGroup(group_id).await.map_err(host_error)
    }

    async fn bookmark_children(&self, id: &str) -> HostResult<Vec<BookmarkNode>> {
        let children = getBookmarkChildren(id).await.map_err(host_error)?;
        from_js(children)
    }

    async fn bookmark_subtree(&self, id: &str) -> HostResult<Option<BookmarkNode>> {
        match getBookmarkSubTree(id).await {
            Ok(tree) => {
                let mut nodes: Vec<BookmarkNode> = from_js(tree)?;
                Ok(if nodes.is_empty() { None } else { Some(nodes.remove(0)) })
            }
            Err(e) => match host_error(e) {
                HostError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn search_bookmarks(&self, url: &str) -> HostResult<Vec<BookmarkNode>> {
        let found = searchBookmarks(url).await.map_err(host_error)?;
        from_js(found)
    }

    async fn create_bookmark(&self, create: &CreateBookmark) -> HostResult<BookmarkNode> {
        let node = createBookmark(to_js(create)?).await.map_err(host_error)?;
        from_js(node)
    }

    async fn update_bookmark(&self, id: &str, update: &BookmarkUpdate) -> HostResult<BookmarkNode> {
        let node = updateBookmark(id, to_js(update)?).await.map_err(host_error)?;
        from_js(node)
    }

    async fn move_bookmark(&self, id: &str, parent_id: &str, index: Option<usize>) -> HostResult<()> {
        let destination = serde_json::json!({ "parentId": parent_id, "index": index });
        moveBookmark(id, to_js(&destination)?).await.map_err(host_error)
    }

    async fn remove_bookmark(&self, id: &str) -> HostResult<()> {
        removeBookmark(id).await.map_err(host_error)
    }

    async fn remove_bookmark_tree(&self, id: &str) -> HostResult<()> {
        removeBookmarkTree(id).await.map_err(host_error)
    }

    async fn storage_get(&self, area: StorageArea, key: &str) -> HostResult<Option<serde_json::Value>> {
        let value = getStorage(area.as_str(), JsValue::from_str(key))
            .await
            .map_err(host_error)?;
        from_js_opt(value)
    }

    async fn storage_get_all(&self, area: StorageArea) -> HostResult<serde_json::Value> {
        let value = getStorage(area.as_str(), JsValue::NULL)
            .await
            .map_err(host_error)?;
        Ok(from_js_opt(value)?.unwrap_or(serde_json::Value::Null))
    }

    async fn storage_set(&self, area: StorageArea, key: &str, value: serde_json::Value) -> HostResult<()> {
        setStorage(area.as_str(), key, to_js(&value)?)
            .await
            .map_err(host_error)
    }

    async fn send_message(&self, message: serde_json::Value) -> HostResult<Option<serde_json::Value>> {
        let reply = sendMessage(to_js(&message)?).await.map_err(host_error)?;
        from_js_opt(reply)
    }

    async fn create_alarm(&self, name: &str, period_minutes: u32) -> HostResult<()> {
        createAlarm(name, period_minutes).await.map_err(host_error)
    }

    fn now_ms(&self) -> f64 {
        js_sys::Date::now()
    }

    async fn sleep(&self, ms: u32) {
        if let Err(e) = delay(ms).await {
            log::warn!("Timer failed: {:?}", e);
        }
    }
}
