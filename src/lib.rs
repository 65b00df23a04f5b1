/// Spaces Sidebar - Chrome extension that turns tab groups into named
/// workspaces with bookmark-backed pinned tabs
/// Built with Rust + WASM + Yew

pub mod archive;
pub mod bookmarks;
pub mod engine;
pub mod error;
pub mod events;
pub mod guards;
pub mod host;
pub mod model;
pub mod projection;
pub mod resolver;
pub mod retry;
pub mod settings;
pub mod store;
pub mod ui;
pub mod url_match;

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, spawn_local};

use crate::engine::SpaceEngine;
use crate::events::{ExtensionMessage, Forwarded, HostEvent};
use crate::host::chrome::{self, ChromeHost};
use crate::host::HostBrowser;
use crate::settings::EngineConfig;
use crate::ui::sidebar::{EngineHandle, Sidebar, SidebarProps};

type Engine = Rc<SpaceEngine<ChromeHost>>;

thread_local! {
    static ENGINE: RefCell<Option<Engine>> = const { RefCell::new(None) };
}

/// One engine per extension page.
fn engine() -> Engine {
    ENGINE.with(|cell| {
        cell.borrow_mut()
            .get_or_insert_with(|| Rc::new(SpaceEngine::new(ChromeHost, EngineConfig::default())))
            .clone()
    })
}

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

// Set up panic hook for better error messages in the browser console
#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());
}

// Start the Yew app for the side panel
#[wasm_bindgen]
pub fn start_sidebar() {
    let engine = engine();
    spawn_local(async move {
        let startup_error = match engine.startup().await {
            Ok(()) => None,
            Err(e) => {
                log::error!("Startup failed: {}", e);
                Some(e.to_string())
            }
        };
        install_sidebar_listeners(engine.clone());
        let props = SidebarProps {
            engine: EngineHandle(engine),
            startup_error,
        };
        yew::Renderer::<Sidebar>::with_props(props).render();
    });
}

fn install_sidebar_listeners(engine: Engine) {
    let events = engine.clone();
    chrome::install_listeners(
        move |raw| {
            let engine = events.clone();
            spawn_local(async move {
                let event: HostEvent = match chrome::decode(raw) {
                    Ok(event) => event,
                    Err(e) => {
                        log::warn!("Ignoring unreadable host event: {}", e);
                        return;
                    }
                };
                if let Err(e) = engine.dispatch(event).await {
                    log::error!("Failed to handle host event: {}", e);
                }
            });
        },
        move |raw| {
            let engine = engine.clone();
            future_to_promise(async move {
                let message: ExtensionMessage = chrome::decode(raw).map_err(js_error)?;
                let reply = engine
                    .handle_message(message)
                    .await
                    .unwrap_or_else(|e| json!({ "ok": false, "error": e.to_string() }));
                chrome::encode(&reply).map_err(js_error)
            })
        },
    );
}

// Start the background service worker hooks: idle archiving, activity
// tracking and command forwarding
#[wasm_bindgen]
pub fn start_background() {
    let engine = engine();
    let boot = engine.clone();
    spawn_local(async move {
        if let Err(e) = boot.load_persisted().await {
            log::error!("Failed to load spaces: {}", e);
        }
        let config = boot.config();
        if let Err(e) = boot
            .host()
            .create_alarm(&config.alarm_name, config.alarm_period_minutes)
            .await
        {
            log::warn!("Failed to schedule idle sweep: {}", e);
        }
    });

    let commands = engine.clone();
    let alarms = engine.clone();
    chrome::install_background_listeners(
        move |raw| {
            let engine = commands.clone();
            spawn_local(async move {
                if let Err(e) = forward(&engine, raw).await {
                    log::error!("Failed to run command: {:?}", e);
                }
            });
        },
        move |name| {
            let engine = alarms.clone();
            spawn_local(async move {
                let result = match engine.load_persisted().await {
                    Ok(()) => engine.on_alarm(&name).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    log::error!("Idle sweep failed: {}", e);
                }
            });
        },
        move |tab_id| engine.record_activity(tab_id),
    );
}

async fn forward(engine: &Engine, raw: JsValue) -> Result<JsValue, JsValue> {
    let message: ExtensionMessage = chrome::decode(raw).map_err(js_error)?;
    engine.load_persisted().await.map_err(js_error)?;
    let reply = match engine.forward_or_apply(message).await.map_err(js_error)? {
        Forwarded::Sidebar(reply) => reply,
        Forwarded::Local(reply) => {
            log::debug!("Sidebar closed, applied command in background");
            reply
        }
    };
    chrome::encode(&reply).map_err(js_error)
}

// Hand a command to the sidebar, or apply it here when the sidebar is
// closed. Used by the context menu and keyboard shortcuts.
#[wasm_bindgen]
pub fn forward_command(message: JsValue) -> js_sys::Promise {
    let engine = engine();
    future_to_promise(async move { forward(&engine, message).await })
}
