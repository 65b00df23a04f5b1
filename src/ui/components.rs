/// Reusable sidebar pieces

use web_sys::DragEvent;
use yew::prelude::*;

use crate::model::{SpaceColor, TabId};
use crate::projection::{PlaceholderRow, TabRow, TabRowPresentation};

/// MIME type carried by sidebar drags.
pub const DRAG_MIME: &str = "text/plain";

/// Tab id stored on a drag by `TabRowView`.
pub fn dragged_tab(e: &DragEvent) -> Option<TabId> {
    e.data_transfer()
        .and_then(|dt| dt.get_data(DRAG_MIME).ok())
        .and_then(|raw| raw.parse().ok())
}

#[derive(Properties, PartialEq)]
pub struct ColorDotProps {
    pub color: SpaceColor,
    /// User override from settings, e.g. `#ff8800`.
    #[prop_or_default]
    pub hex: Option<String>,
}

#[function_component(ColorDot)]
pub fn color_dot(props: &ColorDotProps) -> Html {
    let style = props.hex.as_ref().map(|hex| format!("background-color: {};", hex));
    html! {
        <span class={classes!("space-dot", format!("space-dot--{}", props.color.as_str()))} {style}></span>
    }
}

#[derive(Properties, PartialEq)]
pub struct TabRowProps {
    pub row: TabRow,
    pub presentation: TabRowPresentation,
    pub pinned: bool,
    #[prop_or(false)]
    pub active: bool,
    pub on_activate: Callback<TabId>,
    pub on_toggle_pin: Callback<TabId>,
    pub on_back: Callback<TabId>,
    pub on_rename: Callback<TabId>,
    pub on_close: Callback<TabId>,
    pub on_favorite: Callback<TabId>,
    /// Drop onto this row: insert before it.
    pub on_drop: Callback<TabId>,
}

#[function_component(TabRowView)]
pub fn tab_row_view(props: &TabRowProps) -> Html {
    let tab_id = props.row.tab_id;

    let ondragstart = Callback::from(move |e: DragEvent| {
        if let Some(dt) = e.data_transfer() {
            let _ = dt.set_data(DRAG_MIME, &tab_id.to_string());
        }
    });
    let ondragover = Callback::from(|e: DragEvent| e.prevent_default());
    let ondrop = {
        let on_drop = props.on_drop.clone();
        Callback::from(move |e: DragEvent| {
            e.prevent_default();
            e.stop_propagation();
            if let Some(dragged) = dragged_tab(&e) {
                if dragged != tab_id {
                    on_drop.emit(dragged);
                }
            }
        })
    };

    let onclick = props.on_activate.reform(move |_: MouseEvent| tab_id);
    let ondblclick = props.on_rename.reform(move |_: MouseEvent| tab_id);
    let on_pin = props.on_toggle_pin.reform(move |e: MouseEvent| {
        e.stop_propagation();
        tab_id
    });
    let on_back = props.on_back.reform(move |e: MouseEvent| {
        e.stop_propagation();
        tab_id
    });
    let on_close = props.on_close.reform(move |e: MouseEvent| {
        e.stop_propagation();
        tab_id
    });
    let on_favorite = props.on_favorite.reform(move |e: MouseEvent| {
        e.stop_propagation();
        tab_id
    });

    let p = &props.presentation;
    html! {
        <div
            class={classes!("tab-row", props.active.then_some("tab-row--active"))}
            draggable="true"
            title={props.row.url.clone()}
            {ondragstart}
            {ondragover}
            {ondrop}
            {onclick}
            {ondblclick}
        >
            <div class="tab-row__text">
                <span class="tab-row__title">{&p.title}</span>
                if let Some(subtitle) = &p.subtitle {
                    <span class="tab-row__subtitle">{subtitle}</span>
                }
            </div>
            if p.navigated_away {
                <button class="tab-row__action" title="Back to pinned page" onclick={on_back}>{"↩"}</button>
            }
            <button class="tab-row__action" title={if props.pinned { "Unpin" } else { "Pin" }} onclick={on_pin}>
                {if props.pinned { "★" } else { "☆" }}
            </button>
            <button class="tab-row__action" title="Add to favorites" onclick={on_favorite}>{"♥"}</button>
            <button class="tab-row__action" title="Close" onclick={on_close}>{"×"}</button>
        </div>
    }
}

#[derive(Properties, PartialEq)]
pub struct PlaceholderProps {
    pub row: PlaceholderRow,
    pub on_open: Callback<String>,
}

/// Pinned entry whose tab was closed.
#[function_component(PlaceholderView)]
pub fn placeholder_view(props: &PlaceholderProps) -> Html {
    let bookmark_id = props.row.bookmark_id.clone();
    let onclick = props.on_open.reform(move |_: MouseEvent| bookmark_id.clone());
    html! {
        <div class="tab-row tab-row--placeholder" title={props.row.url.clone()} {onclick}>
            <span class="tab-row__title">{&props.row.title}</span>
        </div>
    }
}

#[derive(Properties, PartialEq)]
pub struct DropZoneProps {
    pub label: AttrValue,
    pub on_drop: Callback<TabId>,
}

/// Trailing target of a section; dropping here appends.
#[function_component(DropZone)]
pub fn drop_zone(props: &DropZoneProps) -> Html {
    let over = use_state(|| false);
    let ondragover = {
        let over = over.clone();
        Callback::from(move |e: DragEvent| {
            e.prevent_default();
            over.set(true);
        })
    };
    let ondragleave = {
        let over = over.clone();
        Callback::from(move |_: DragEvent| over.set(false))
    };
    let ondrop = {
        let over = over.clone();
        let on_drop = props.on_drop.clone();
        Callback::from(move |e: DragEvent| {
            e.prevent_default();
            over.set(false);
            if let Some(dragged) = dragged_tab(&e) {
                on_drop.emit(dragged);
            }
        })
    };
    html! {
        <div class={classes!("drop-zone", (*over).then_some("drop-zone--over"))} {ondragover} {ondragleave} {ondrop}>
            {props.label.clone()}
        </div>
    }
}
