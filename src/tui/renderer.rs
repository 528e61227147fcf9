use std::sync::Arc;

use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Padding, Paragraph};

use crate::buffer::{OutputKind, OutputLine};
use crate::tui::state::{DashboardState, Focus};
use crate::tui::tab::Tab;

/// Width of the tab list panel, borders included
pub const TAB_PANEL_WIDTH: u16 = 22;

const HINTS: &str = " Tab focus | ↑↓ jk move | ←→ hl pan | PgUp PgDn Home End scroll | q quit";

/// Screen regions of one frame
#[derive(Debug, Clone, Copy)]
struct Areas {
    topbar: Rect,
    tab_panel: Rect,
    content_panel: Rect,
    hints: Rect,
}

impl Areas {
    fn new(area: Rect) -> Self {
        let [topbar, body, hints] = Layout::vertical([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .areas(area);
        let [tab_panel, content_panel] =
            Layout::horizontal([Constraint::Length(TAB_PANEL_WIDTH), Constraint::Min(0)])
                .areas(body);
        Self {
            topbar,
            tab_panel,
            content_panel,
            hints,
        }
    }
}

fn panel_block(focused: bool) -> Block<'static> {
    let block = Block::bordered().padding(Padding::horizontal(1));
    if focused {
        block.border_style(Style::new().fg(Color::Cyan))
    } else {
        block
    }
}

/// Inner sizes of the two panels for a given terminal area
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    pub tab_list_width: u16,
    pub content_width: u16,
    pub content_height: u16,
}

impl Geometry {
    pub fn from_area(area: Rect) -> Self {
        let areas = Areas::new(area);
        let tab_list = panel_block(false).inner(areas.tab_panel);
        let content = panel_block(false).inner(areas.content_panel);
        Self {
            tab_list_width: tab_list.width,
            content_width: content.width,
            content_height: content.height,
        }
    }
}

/// TUI rendering handler
pub struct Renderer;

impl Renderer {
    /// Draw the whole dashboard
    pub fn render(frame: &mut Frame, state: &DashboardState, tabs: &[Arc<Tab>]) {
        let areas = Areas::new(frame.area());
        let selected = tabs.get(state.selected());

        Self::render_topbar(frame, areas, state, selected.map(|tab| tab.display_name()));
        Self::render_tab_list(frame, areas.tab_panel, state, tabs);
        Self::render_content(frame, areas.content_panel, state, selected);

        frame.render_widget(
            Paragraph::new(HINTS).style(Style::new().fg(Color::DarkGray)),
            areas.hints,
        );
    }

    fn render_topbar(frame: &mut Frame, areas: Areas, state: &DashboardState, name: Option<String>) {
        let title_style = |focused: bool| {
            let style = Style::new().add_modifier(Modifier::BOLD | Modifier::UNDERLINED);
            if focused {
                style.add_modifier(Modifier::REVERSED)
            } else {
                style
            }
        };

        let left = Rect {
            width: areas.tab_panel.width,
            ..areas.topbar
        };
        let right = Rect {
            x: areas.content_panel.x,
            width: areas.content_panel.width,
            ..areas.topbar
        };

        frame.render_widget(
            Paragraph::new(Span::styled("Select:", title_style(state.focus() == Focus::TabList)))
                .alignment(Alignment::Center),
            left,
        );
        frame.render_widget(
            Paragraph::new(Span::styled(
                name.unwrap_or_else(|| "Terminal".to_string()),
                title_style(state.focus() == Focus::Content),
            ))
            .alignment(Alignment::Center),
            right,
        );
    }

    fn render_tab_list(frame: &mut Frame, area: Rect, state: &DashboardState, tabs: &[Arc<Tab>]) {
        let block = panel_block(state.focus() == Focus::TabList);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let lines: Vec<Line> = tabs
            .iter()
            .enumerate()
            .map(|(idx, tab)| {
                let line = Line::raw(tab.name().to_string());
                if idx == state.selected() {
                    line.style(Style::new().add_modifier(Modifier::REVERSED))
                } else {
                    line
                }
            })
            .collect();

        // Keep the selected entry in view
        let vertical = state
            .selected()
            .saturating_sub(usize::from(inner.height).saturating_sub(1));
        frame.render_widget(
            Paragraph::new(lines).scroll((to_u16(vertical), to_u16(state.tab_list_offset()))),
            inner,
        );
    }

    fn render_content(frame: &mut Frame, area: Rect, state: &DashboardState, tab: Option<&Arc<Tab>>) {
        let mut block = panel_block(state.focus() == Focus::Content);
        let height = usize::from(block.inner(area).height);

        let (visible, offset) = match tab {
            Some(tab) => {
                let content = tab.lock();
                (content.visible(height), content.scroll_offset())
            }
            None => (Vec::new(), 0),
        };
        if offset > 0 {
            block = block.title_bottom(Line::from(format!(" {offset} lines back ")).right_aligned());
        }
        let inner = block.inner(area);
        frame.render_widget(block, area);

        // Newest line sits on the bottom row, like a terminal
        let padding = height.saturating_sub(visible.len());
        let lines: Vec<Line> = std::iter::repeat_n(Line::default(), padding)
            .chain(visible.iter().map(styled_line))
            .collect();
        frame.render_widget(Paragraph::new(lines), inner);
    }
}

fn styled_line(line: &OutputLine) -> Line<'static> {
    let base = match line.kind {
        OutputKind::Stdout => Style::new(),
        OutputKind::Stderr => Style::new().fg(Color::Red),
        OutputKind::Log => Style::new().fg(Color::Gray),
    };
    Line::from(line.spans().to_vec()).style(base)
}

fn to_u16(value: usize) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}
