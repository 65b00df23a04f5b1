/// Side panel: space switcher, the active space's pinned tree and temporary
/// tabs, and the archive.

use std::future::Future;
use std::rc::Rc;

use gloo_timers::callback::Timeout;
use patternfly_yew::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::spawn_local;
use web_sys::{DragEvent, HtmlInputElement};
use yew::prelude::*;

use super::components::{dragged_tab, ColorDot, DropZone, PlaceholderView, TabRowView};
use crate::engine::{DropTarget, SpaceEngine};
use crate::error::{SpaceError, SpaceResult};
use crate::host::{ChromeHost, HostBrowser, TabUpdate};
use crate::model::{BookmarkId, BookmarkNode, GroupId, SpaceColor, TabId};
use crate::projection::{Container, PinnedNode, SidebarView, SpaceView, TabRow, TabRowPresentation};

type Engine = Rc<SpaceEngine<ChromeHost>>;

/// Shared engine; compared by identity so props never trigger a re-render.
#[derive(Clone)]
pub struct EngineHandle(pub Engine);

impl PartialEq for EngineHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Properties, PartialEq)]
pub struct SidebarProps {
    pub engine: EngineHandle,
    #[prop_or_default]
    pub startup_error: Option<String>,
}

/// How long a rejected input stays on screen.
const NOTICE_DISMISS_MS: u32 = 4_000;

#[derive(Debug, Clone, PartialEq)]
enum AppState {
    Idle,
    Loading(String),
    /// Rejected user input; clears itself after `NOTICE_DISMISS_MS`.
    Notice(String),
    Error(String),
}

fn failure_state(action: &str, e: &SpaceError) -> AppState {
    let message = format!("Failed to {}: {}", action, e);
    if e.is_user_facing() {
        AppState::Notice(message)
    } else {
        AppState::Error(message)
    }
}

/// Run an engine operation in the background and surface its failure.
fn run<F, Fut, T>(engine: &Engine, state: &UseStateHandle<AppState>, action: &'static str, op: F)
where
    F: FnOnce(Engine) -> Fut + 'static,
    Fut: Future<Output = SpaceResult<T>> + 'static,
{
    let engine = engine.clone();
    let state = state.clone();
    spawn_local(async move {
        match op(engine).await {
            Ok(_) => state.set(AppState::Idle),
            Err(e) => {
                if e.is_user_facing() {
                    log::debug!("Rejected {}: {}", action, e);
                } else {
                    log::error!("Failed to {}: {}", action, e);
                }
                state.set(failure_state(action, &e));
            }
        }
    });
}

fn prompt(message: &str, default: &str) -> Option<String> {
    web_sys::window()?
        .prompt_with_message_and_default(message, default)
        .ok()
        .flatten()
}

fn confirm(message: &str) -> bool {
    web_sys::window()
        .and_then(|w| w.confirm_with_message(message).ok())
        .unwrap_or(false)
}

fn next_color(color: SpaceColor) -> SpaceColor {
    let at = SpaceColor::ALL.iter().position(|c| *c == color).unwrap_or(0);
    SpaceColor::ALL[(at + 1) % SpaceColor::ALL.len()]
}

/// Callbacks shared by every row of the active space.
#[derive(Clone)]
struct RowActions {
    activate: Callback<TabId>,
    toggle_pin: Callback<TabId>,
    back: Callback<TabId>,
    rename: Callback<TabId>,
    close: Callback<TabId>,
    favorite: Callback<TabId>,
    open_placeholder: Callback<(GroupId, BookmarkId)>,
    drop: Callback<(TabId, DropTarget)>,
    toggle_folder: Callback<BookmarkId>,
    new_folder: Callback<(GroupId, Option<BookmarkId>)>,
    delete_folder: Callback<BookmarkId>,
}

struct RowContext<'a> {
    engine: &'a Engine,
    view: &'a SidebarView,
    actions: &'a RowActions,
    active_tab: Option<TabId>,
}

fn tab_row(row: &TabRow, pinned: bool, target: DropTarget, ctx: &RowContext) -> Html {
    let presentation = ctx
        .engine
        .row_presentation(row.tab_id)
        .unwrap_or_else(|| TabRowPresentation {
            title: row.title.clone(),
            subtitle: None,
            navigated_away: false,
        });
    let on_drop = ctx.actions.drop.reform(move |dragged| (dragged, target.clone()));
    html! {
        <TabRowView
            key={row.tab_id}
            row={row.clone()}
            {presentation}
            {pinned}
            active={ctx.active_tab == Some(row.tab_id)}
            on_activate={ctx.actions.activate.clone()}
            on_toggle_pin={ctx.actions.toggle_pin.clone()}
            on_back={ctx.actions.back.clone()}
            on_rename={ctx.actions.rename.clone()}
            on_close={ctx.actions.close.clone()}
            on_favorite={ctx.actions.favorite.clone()}
            {on_drop}
        />
    }
}

fn live_rows<'a>(nodes: &'a [PinnedNode], out: &mut Vec<&'a TabRow>) {
    for node in nodes {
        match node {
            PinnedNode::Tab(row) => out.push(row),
            PinnedNode::Folder(folder) => live_rows(&folder.children, out),
            PinnedNode::Placeholder(_) => {}
        }
    }
}

fn pinned_nodes(nodes: &[PinnedNode], space_id: GroupId, folder_id: Option<&BookmarkId>, ctx: &RowContext) -> Html {
    nodes
        .iter()
        .enumerate()
        .map(|(index, node)| match node {
            PinnedNode::Tab(row) => {
                let target = DropTarget {
                    space_id,
                    container: Container::Pinned,
                    folder_id: folder_id.cloned(),
                    index: Some(index),
                };
                tab_row(row, true, target, ctx)
            }
            PinnedNode::Placeholder(row) => {
                let on_open = ctx.actions.open_placeholder.reform(move |bookmark_id| (space_id, bookmark_id));
                html! { <PlaceholderView key={row.bookmark_id.clone()} row={row.clone()} {on_open} /> }
            }
            PinnedNode::Folder(folder) => {
                let id = folder.id.clone();
                let toggle = {
                    let id = id.clone();
                    ctx.actions.toggle_folder.reform(move |_: MouseEvent| id.clone())
                };
                let new_subfolder = {
                    let id = id.clone();
                    ctx.actions.new_folder.reform(move |e: MouseEvent| {
                        e.stop_propagation();
                        (space_id, Some(id.clone()))
                    })
                };
                let delete = {
                    let id = id.clone();
                    ctx.actions.delete_folder.reform(move |e: MouseEvent| {
                        e.stop_propagation();
                        id.clone()
                    })
                };
                let body = if folder.collapsed {
                    let mut rows = Vec::new();
                    live_rows(&folder.children, &mut rows);
                    let visible = ctx.view.visible_in_collapsed(&folder.id);
                    rows.into_iter()
                        .filter(|row| visible.is_some_and(|v| v.contains(&row.tab_id)))
                        .map(|row| {
                            let target = DropTarget {
                                space_id,
                                container: Container::Pinned,
                                folder_id: Some(id.clone()),
                                index: None,
                            };
                            tab_row(row, true, target, ctx)
                        })
                        .collect::<Html>()
                } else {
                    let on_drop = {
                        let id = id.clone();
                        ctx.actions.drop.reform(move |dragged| {
                            let target = DropTarget {
                                space_id,
                                container: Container::Pinned,
                                folder_id: Some(id.clone()),
                                index: None,
                            };
                            (dragged, target)
                        })
                    };
                    html! {
                        <>
                            {pinned_nodes(&folder.children, space_id, Some(&id), ctx)}
                            <DropZone label="" {on_drop} />
                        </>
                    }
                };
                html! {
                    <div class="folder" key={folder.id.clone()}>
                        <div class="folder__header" onclick={toggle}>
                            <span class="folder__chevron">{if folder.collapsed { "▸" } else { "▾" }}</span>
                            <span class="folder__title">{&folder.title}</span>
                            <button class="tab-row__action" title="New folder" onclick={new_subfolder}>{"+"}</button>
                            <button class="tab-row__action" title="Delete folder" onclick={delete}>{"×"}</button>
                        </div>
                        <div class="folder__children">{body}</div>
                    </div>
                }
            }
        })
        .collect()
}

fn space_body(space: &SpaceView, ctx: &RowContext) -> Html {
    let space_id = space.space_id;
    let pin_here = ctx.actions.drop.reform(move |dragged| {
        let target = DropTarget {
            space_id,
            container: Container::Pinned,
            folder_id: None,
            index: None,
        };
        (dragged, target)
    });
    let unpin_here = ctx.actions.drop.reform(move |dragged| {
        let target = DropTarget {
            space_id,
            container: Container::Temporary,
            folder_id: None,
            index: None,
        };
        (dragged, target)
    });
    let new_folder = ctx.actions.new_folder.reform(move |_: MouseEvent| (space_id, None));

    let temporary = space
        .temporary
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let target = DropTarget {
                space_id,
                container: Container::Temporary,
                folder_id: None,
                index: Some(index),
            };
            tab_row(row, false, target, ctx)
        })
        .collect::<Html>();

    html! {
        <div class="space-body">
            <div class="section-header">
                <span>{"Pinned"}</span>
                <button class="tab-row__action" title="New folder" onclick={new_folder}>{"+"}</button>
            </div>
            <div class="section section--pinned">
                {pinned_nodes(&space.pinned, space_id, None, ctx)}
                <DropZone label="Drop here to pin" on_drop={pin_here} />
            </div>
            <div class="section-header"><span>{"Tabs"}</span></div>
            <div class="section section--temporary">
                {temporary}
                <DropZone label="" on_drop={unpin_here} />
            </div>
        </div>
    }
}

#[function_component(Sidebar)]
pub fn sidebar(props: &SidebarProps) -> Html {
    let engine = props.engine.0.clone();
    let view = use_state(|| engine.view());
    let state = use_state(|| match &props.startup_error {
        Some(e) => AppState::Error(format!("Failed to load spaces: {}", e)),
        None => AppState::Idle,
    });
    let new_space_name = use_state(String::new);
    let show_archive = use_state(|| false);
    let favorites = use_state(Vec::<BookmarkNode>::new);
    let refresh_favorites = {
        let engine = engine.clone();
        let favorites = favorites.clone();
        Callback::from(move |_: ()| {
            let engine = engine.clone();
            let favorites = favorites.clone();
            spawn_local(async move {
                match engine.favorites().await {
                    Ok(list) => favorites.set(list),
                    Err(e) => log::warn!("Failed to load favorites: {}", e),
                }
            });
        })
    };

    {
        let state = state.clone();
        use_effect_with((*state).clone(), move |current| {
            let timeout = matches!(current, AppState::Notice(_))
                .then(|| Timeout::new(NOTICE_DISMISS_MS, move || state.set(AppState::Idle)));
            move || drop(timeout)
        });
    }
    {
        let engine = engine.clone();
        let view = view.clone();
        use_effect_with((), move |_| {
            let setter = view.setter();
            engine.subscribe(move |next| setter.set(next.clone()));
            view.set(engine.view());
            || ()
        });
    }
    {
        let refresh_favorites = refresh_favorites.clone();
        use_effect_with((), move |_| {
            refresh_favorites.emit(());
            || ()
        });
    }

    let on_switch = {
        let engine = engine.clone();
        let state = state.clone();
        Callback::from(move |space: (GroupId, bool, String)| {
            let (space_id, inactive, name) = space;
            if inactive {
                state.set(AppState::Loading(format!("Opening {}...", name)));
                run(&engine, &state, "open space", move |engine| async move {
                    engine.activate_inactive_space(&name).await
                });
            } else {
                run(&engine, &state, "switch space", move |engine| async move {
                    engine.switch_space(space_id).await
                });
            }
        })
    };

    let on_rename_space = {
        let engine = engine.clone();
        let state = state.clone();
        Callback::from(move |(space_id, current): (GroupId, String)| {
            let Some(name) = prompt("Rename space", &current) else {
                return;
            };
            run(&engine, &state, "rename space", move |engine| async move {
                engine.rename_space(space_id, &name).await
            });
        })
    };

    let on_recolor = {
        let engine = engine.clone();
        let state = state.clone();
        Callback::from(move |(space_id, color): (GroupId, SpaceColor)| {
            run(&engine, &state, "change color", move |engine| async move {
                engine.set_space_color(space_id, next_color(color)).await
            });
        })
    };

    let on_delete_space = {
        let engine = engine.clone();
        let state = state.clone();
        Callback::from(move |(space_id, name): (GroupId, String)| {
            if !confirm(&format!("Delete space \"{}\" and close its tabs?", name)) {
                return;
            }
            run(&engine, &state, "delete space", move |engine| async move {
                engine.delete_space(space_id).await
            });
        })
    };

    let on_drop_on_space = {
        let engine = engine.clone();
        let state = state.clone();
        Callback::from(move |(tab_id, space_id): (TabId, GroupId)| {
            let target = DropTarget {
                space_id,
                container: Container::Temporary,
                folder_id: None,
                index: None,
            };
            run(&engine, &state, "move tab", move |engine| async move {
                engine.commit_drop(tab_id, target).await
            });
        })
    };

    let on_name_input = {
        let new_space_name = new_space_name.clone();
        Callback::from(move |e: InputEvent| {
            if let Some(input) = e.target().and_then(|t| t.dyn_into::<HtmlInputElement>().ok()) {
                new_space_name.set(input.value());
            }
        })
    };

    let on_create_space = {
        let engine = engine.clone();
        let state = state.clone();
        let new_space_name = new_space_name.clone();
        Callback::from(move |_| {
            let name = (*new_space_name).trim().to_string();
            new_space_name.set(String::new());
            state.set(AppState::Loading("Creating space...".to_string()));
            run(&engine, &state, "create space", move |engine| async move {
                engine.create_space(&name, None).await
            });
        })
    };

    let actions = RowActions {
        activate: {
            let engine = engine.clone();
            let state = state.clone();
            Callback::from(move |tab_id: TabId| {
                run(&engine, &state, "activate tab", move |engine| async move {
                    let update = TabUpdate {
                        active: Some(true),
                        ..TabUpdate::default()
                    };
                    engine.host().update_tab(tab_id, &update).await?;
                    Ok::<_, SpaceError>(())
                });
            })
        },
        toggle_pin: {
            let engine = engine.clone();
            let state = state.clone();
            Callback::from(move |tab_id: TabId| {
                run(&engine, &state, "pin tab", move |engine| async move {
                    engine.toggle_pin(tab_id).await
                });
            })
        },
        back: {
            let engine = engine.clone();
            let state = state.clone();
            Callback::from(move |tab_id: TabId| {
                run(&engine, &state, "go back to pinned page", move |engine| async move {
                    engine.navigate_to_pinned_url(tab_id).await
                });
            })
        },
        rename: {
            let engine = engine.clone();
            let state = state.clone();
            Callback::from(move |tab_id: TabId| {
                let current = engine.display_title(tab_id).unwrap_or_default();
                let Some(name) = prompt("Rename tab (empty to reset)", &current) else {
                    return;
                };
                run(&engine, &state, "rename tab", move |engine| async move {
                    if name.trim().is_empty() {
                        engine.clear_tab_name_override(tab_id).await
                    } else {
                        engine.set_tab_name_override(tab_id, name.trim()).await
                    }
                });
            })
        },
        close: {
            let engine = engine.clone();
            let state = state.clone();
            Callback::from(move |tab_id: TabId| {
                run(&engine, &state, "close tab", move |engine| async move {
                    engine.host().remove_tabs(&[tab_id]).await?;
                    Ok::<_, SpaceError>(())
                });
            })
        },
        favorite: {
            let engine = engine.clone();
            let state = state.clone();
            let refresh_favorites = refresh_favorites.clone();
            Callback::from(move |tab_id: TabId| {
                let refresh_favorites = refresh_favorites.clone();
                run(&engine, &state, "add favorite", move |engine| async move {
                    engine.add_to_favorites(tab_id).await?;
                    refresh_favorites.emit(());
                    Ok::<_, SpaceError>(())
                });
            })
        },
        open_placeholder: {
            let engine = engine.clone();
            let state = state.clone();
            Callback::from(move |(space_id, bookmark_id): (GroupId, BookmarkId)| {
                run(&engine, &state, "open pinned tab", move |engine| async move {
                    engine.open_pinned_bookmark(space_id, &bookmark_id).await
                });
            })
        },
        drop: {
            let engine = engine.clone();
            let state = state.clone();
            Callback::from(move |(tab_id, target): (TabId, DropTarget)| {
                run(&engine, &state, "move tab", move |engine| async move {
                    engine.commit_drop(tab_id, target).await
                });
            })
        },
        toggle_folder: {
            let engine = engine.clone();
            Callback::from(move |folder_id: BookmarkId| {
                engine.toggle_folder(&folder_id);
            })
        },
        new_folder: {
            let engine = engine.clone();
            let state = state.clone();
            Callback::from(move |(space_id, parent): (GroupId, Option<BookmarkId>)| {
                let Some(title) = prompt("Folder name", "New folder") else {
                    return;
                };
                run(&engine, &state, "create folder", move |engine| async move {
                    engine.create_folder(space_id, parent.as_deref(), &title).await
                });
            })
        },
        delete_folder: {
            let engine = engine.clone();
            let state = state.clone();
            Callback::from(move |folder_id: BookmarkId| {
                if !confirm("Delete this folder and its pinned tabs?") {
                    return;
                }
                run(&engine, &state, "delete folder", move |engine| async move {
                    engine.delete_folder(&folder_id).await
                });
            })
        },
    };

    let on_toggle_archive = {
        let show_archive = show_archive.clone();
        Callback::from(move |_| show_archive.set(!*show_archive))
    };

    let on_restore = {
        let engine = engine.clone();
        let state = state.clone();
        Callback::from(move |url: String| {
            run(&engine, &state, "restore tab", move |engine| async move {
                engine.restore_archived(&url).await
            });
        })
    };

    let on_forget = {
        let engine = engine.clone();
        let state = state.clone();
        Callback::from(move |url: String| {
            run(&engine, &state, "remove archived tab", move |engine| async move {
                engine.remove_archived(&url).await
            });
        })
    };

    let on_open_favorite = {
        let engine = engine.clone();
        let state = state.clone();
        Callback::from(move |url: String| {
            run(&engine, &state, "open favorite", move |engine| async move {
                engine.open_favorite(&url).await
            });
        })
    };

    let on_dismiss = {
        let state = state.clone();
        Callback::from(move |_| state.set(AppState::Idle))
    };

    let is_busy = matches!(*state, AppState::Loading(_));
    let active_space = view.active_space;
    let active_tab = active_space
        .and_then(|id| engine.space(id))
        .and_then(|s| s.last_tab);
    let overrides = engine.settings().color_overrides;
    let hex_for = |color: &SpaceColor| overrides.get(color).cloned();
    let ctx = RowContext {
        engine: &engine,
        view: &*view,
        actions: &actions,
        active_tab,
    };

    let switcher = view
        .spaces
        .iter()
        .map(|space| {
            let key = (space.space_id, space.inactive, space.name.clone());
            let onclick = on_switch.reform({
                let key = key.clone();
                move |_: MouseEvent| key.clone()
            });
            let ondblclick = on_rename_space.reform({
                let (id, name) = (space.space_id, space.name.clone());
                move |_: MouseEvent| (id, name.clone())
            });
            let on_dot = on_recolor.reform({
                let (id, color) = (space.space_id, space.color);
                move |e: MouseEvent| {
                    e.stop_propagation();
                    (id, color)
                }
            });
            let ondragover = Callback::from(|e: DragEvent| e.prevent_default());
            let ondrop = {
                let on_drop_on_space = on_drop_on_space.clone();
                let (space_id, inactive) = (space.space_id, space.inactive);
                Callback::from(move |e: DragEvent| {
                    e.prevent_default();
                    if inactive {
                        return;
                    }
                    if let Some(tab_id) = dragged_tab(&e) {
                        on_drop_on_space.emit((tab_id, space_id));
                    }
                })
            };
            let current = active_space == Some(space.space_id);
            html! {
                <li
                    key={space.space_id}
                    class={classes!(
                        "space-chip",
                        current.then_some("space-chip--current"),
                        space.inactive.then_some("space-chip--inactive"),
                    )}
                    title={space.name.clone()}
                    {onclick}
                    {ondblclick}
                    {ondragover}
                    {ondrop}
                >
                    <span onclick={on_dot}><ColorDot color={space.color} hex={hex_for(&space.color)} /></span>
                    <span class="space-chip__name">{&space.name}</span>
                </li>
            }
        })
        .collect::<Html>();

    let current = active_space.and_then(|id| view.space(id));
    let header = current.map(|space| {
        let on_delete = on_delete_space.reform({
            let (id, name) = (space.space_id, space.name.clone());
            move |_: MouseEvent| (id, name.clone())
        });
        html! {
            <div class="space-header">
                <ColorDot color={space.color} hex={hex_for(&space.color)} />
                <h1 class="space-header__name">{&space.name}</h1>
                <button class="tab-row__action" title="Delete space" onclick={on_delete}>{"🗑"}</button>
            </div>
        }
    });

    let archived = engine.archived_tabs();

    html! {
        <div class="sidebar">
            {match &*state {
                AppState::Loading(msg) => html! {
                    <div class="loading-text-center">
                        <Spinner />
                        <p class="loading-text">{msg}</p>
                    </div>
                },
                AppState::Notice(msg) => html! {
                    <div class="message-top-margin" onclick={on_dismiss.clone()}>
                        <Alert r#type={AlertType::Warning} title={"Not saved"} inline={true}>
                            {msg.clone()}
                        </Alert>
                    </div>
                },
                AppState::Error(err) => html! {
                    <div class="message-top-margin" onclick={on_dismiss}>
                        <Alert r#type={AlertType::Danger} title={"Error"} inline={true}>
                            {err.clone()}
                        </Alert>
                    </div>
                },
                AppState::Idle => html! {},
            }}

            if !favorites.is_empty() {
                <ul class="favorites">
                    {for favorites.iter().map(|favorite| {
                        let url = favorite.url.clone().unwrap_or_default();
                        let onclick = on_open_favorite.reform({
                            let url = url.clone();
                            move |_: MouseEvent| url.clone()
                        });
                        html! {
                            <li key={favorite.id.clone()} class="favorites__item" title={url} {onclick}>
                                {&favorite.title}
                            </li>
                        }
                    })}
                </ul>
            }

            {header.unwrap_or_default()}

            if let Some(space) = current {
                {space_body(space, &ctx)}
            } else {
                <p class="empty-text">{"No space yet. Create one below."}</p>
            }

            <ul class="space-switcher">{switcher}</ul>

            <div class="new-space">
                <input
                    class="pf-v5-c-form-control"
                    type="text"
                    placeholder="New space name"
                    value={(*new_space_name).clone()}
                    oninput={on_name_input}
                />
                <Button onclick={on_create_space} disabled={is_busy} variant={ButtonVariant::Secondary} block={true}>
                    {"New space"}
                </Button>
            </div>

            <div class="archive">
                <Button onclick={on_toggle_archive} variant={ButtonVariant::Link}>
                    {format!("Archived tabs ({})", archived.len())}
                </Button>
                if *show_archive {
                    <ul class="archive__list">
                        {for archived.iter().rev().map(|record| {
                            let restore = on_restore.reform({
                                let url = record.url.clone();
                                move |_: MouseEvent| url.clone()
                            });
                            let forget = on_forget.reform({
                                let url = record.url.clone();
                                move |_: MouseEvent| url.clone()
                            });
                            html! {
                                <li key={record.url.clone()} class="archive__item" title={record.url.clone()}>
                                    <span class="archive__name">{&record.name}</span>
                                    <span class="archive__space">{&record.space_name}</span>
                                    <button class="tab-row__action" title="Restore" onclick={restore}>{"↺"}</button>
                                    <button class="tab-row__action" title="Remove" onclick={forget}>{"×"}</button>
                                </li>
                            }
                        })}
                    </ul>
                }
            </div>
        </div>
    }
}
