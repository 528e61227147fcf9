/// Which panel receives navigation keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Focus {
    /// Left panel: keys move the selection and pan the names
    #[default]
    TabList,
    /// Right panel: keys scroll the selected tab's scrollback
    Content,
}

/// Navigation state owned by the render loop.
///
/// Scroll offsets live with each tab; this only tracks which tab is shown.
#[derive(Debug, Default)]
pub struct DashboardState {
    selected: usize,
    focus: Focus,
    tab_list_offset: usize,
}

impl DashboardState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the selected tab index
    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn focus(&self) -> Focus {
        self.focus
    }

    /// Horizontal pan of the tab names, in characters
    pub fn tab_list_offset(&self) -> usize {
        self.tab_list_offset
    }

    pub fn toggle_focus(&mut self) {
        self.focus = match self.focus {
            Focus::TabList => Focus::Content,
            Focus::Content => Focus::TabList,
        };
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn select_next(&mut self, tab_count: usize) {
        self.selected = (self.selected + 1).min(tab_count.saturating_sub(1));
    }

    pub fn select_first(&mut self) {
        self.selected = 0;
    }

    pub fn select_last(&mut self, tab_count: usize) {
        self.selected = tab_count.saturating_sub(1);
    }

    pub fn pan_left(&mut self) {
        self.tab_list_offset = self.tab_list_offset.saturating_sub(1);
    }

    /// Pan right, never further than `max_name_width - panel_width`
    pub fn pan_right(&mut self, max_name_width: usize, panel_width: usize) {
        let max_offset = max_name_width.saturating_sub(panel_width);
        self.tab_list_offset = (self.tab_list_offset + 1).min(max_offset);
    }
}
