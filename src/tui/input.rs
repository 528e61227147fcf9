use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::tui::renderer::Geometry;
use crate::tui::state::{DashboardState, Focus};
use crate::tui::tab::Tab;

/// What the render loop should do after a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Key not bound in the current focus
    Ignore,
    Repaint,
    Quit,
}

/// Handle key event and update dashboard state
pub fn handle_key(
    state: &mut DashboardState,
    tabs: &[Arc<Tab>],
    geometry: Geometry,
    key: KeyEvent,
) -> Action {
    // Ctrl-C quits too: raw mode swallows SIGINT
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Action::Quit;
    }

    match key.code {
        KeyCode::Char('q') => Action::Quit,
        KeyCode::Tab => {
            state.toggle_focus();
            Action::Repaint
        }
        _ => match state.focus() {
            Focus::TabList => handle_tab_list(state, tabs, geometry, key),
            Focus::Content => handle_content(state, tabs, geometry, key),
        },
    }
}

/// Handle key event while the tab list is focused
fn handle_tab_list(
    state: &mut DashboardState,
    tabs: &[Arc<Tab>],
    geometry: Geometry,
    key: KeyEvent,
) -> Action {
    match key.code {
        KeyCode::Up | KeyCode::Char('k') => state.select_prev(),
        KeyCode::Down | KeyCode::Char('j') => state.select_next(tabs.len()),
        KeyCode::Home => state.select_first(),
        KeyCode::End => state.select_last(tabs.len()),
        KeyCode::Left | KeyCode::Char('h') => state.pan_left(),
        KeyCode::Right | KeyCode::Char('l') => {
            let widest = tabs
                .iter()
                .map(|tab| tab.name().chars().count())
                .max()
                .unwrap_or(0);
            state.pan_right(widest, usize::from(geometry.tab_list_width));
        }
        _ => return Action::Ignore,
    }
    Action::Repaint
}

/// Handle key event while the scrollback is focused
fn handle_content(
    state: &mut DashboardState,
    tabs: &[Arc<Tab>],
    geometry: Geometry,
    key: KeyEvent,
) -> Action {
    let Some(tab) = tabs.get(state.selected()) else {
        return Action::Ignore;
    };
    let height = usize::from(geometry.content_height);
    let mut content = tab.lock();

    match key.code {
        KeyCode::Up | KeyCode::Char('k') => content.scroll_up(height),
        KeyCode::Down | KeyCode::Char('j') => content.scroll_down(),
        KeyCode::PageUp => content.page_up(height),
        KeyCode::PageDown => content.page_down(height),
        KeyCode::Home => content.scroll_to_oldest(height),
        KeyCode::End => content.scroll_to_live(),
        _ => return Action::Ignore,
    }
    Action::Repaint
}
