use std::io::{self, Write};

use tracing_subscriber::fmt::MakeWriter;

use crate::buffer::OutputKind;
use crate::tui::dashboard::{Dashboard, TabHandle};

/// Routes formatted `tracing` events into a dashboard tab.
///
/// Writing to stderr while the alternate screen is active would corrupt the
/// frame, so log lines become scrollback instead.
#[derive(Clone)]
pub struct TabWriter {
    dashboard: Dashboard,
    tab: TabHandle,
}

impl TabWriter {
    pub fn new(dashboard: Dashboard, tab: TabHandle) -> Self {
        Self { dashboard, tab }
    }
}

impl<'a> MakeWriter<'a> for TabWriter {
    type Writer = EventWriter;

    fn make_writer(&'a self) -> Self::Writer {
        EventWriter {
            dashboard: self.dashboard.clone(),
            tab: self.tab,
            bytes: Vec::new(),
        }
    }
}

/// Collects one formatted event and appends it when dropped
pub struct EventWriter {
    dashboard: Dashboard,
    tab: TabHandle,
    bytes: Vec<u8>,
}

impl Write for EventWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for EventWriter {
    fn drop(&mut self) {
        if self.bytes.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.bytes);
        self.dashboard
            .append(self.tab, OutputKind::Log, text.trim_end_matches('\n'));
    }
}
