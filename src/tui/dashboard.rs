use std::io;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::task::Poll;
use std::thread::JoinHandle;
use std::time::Duration;

use crossterm::event::{Event, EventStream, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use futures::{Stream, StreamExt};
use ratatui::Terminal;
use ratatui::backend::{Backend, CrosstermBackend};
use tokio::sync::{Notify, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::buffer::{OutputKind, OutputLine};
use crate::config::DashboardConfig;
use crate::error::DashboardError;
use crate::tui::input::{Action, handle_key};
use crate::tui::renderer::{Geometry, Renderer};
use crate::tui::state::DashboardState;
use crate::tui::tab::Tab;

/// Refers to one tab of a dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabHandle(usize);

/// Content panel size as of the last frame, read by appending threads
#[derive(Debug, Default)]
struct Viewport {
    width: AtomicU16,
    height: AtomicU16,
}

impl Viewport {
    fn store(&self, geometry: Geometry) {
        self.width.store(geometry.content_width, Ordering::Relaxed);
        self.height.store(geometry.content_height, Ordering::Relaxed);
    }

    fn width(&self) -> usize {
        usize::from(self.width.load(Ordering::Relaxed))
    }

    fn height(&self) -> usize {
        usize::from(self.height.load(Ordering::Relaxed))
    }

    fn geometry(&self, tab_list_width: u16) -> Geometry {
        Geometry {
            tab_list_width,
            content_width: self.width.load(Ordering::Relaxed),
            content_height: self.height.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    tabs: RwLock<Vec<Arc<Tab>>>,
    scrollback: usize,
    viewport: Viewport,
    tab_list_width: AtomicU16,
    /// Coalescing repaint request: many notifications, one permit
    repaint: Notify,
    relayout: AtomicBool,
    stop: CancellationToken,
    running: watch::Sender<bool>,
    stop_timeout: Duration,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn tabs(&self) -> Vec<Arc<Tab>> {
        self.tabs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Tab-based terminal dashboard.
///
/// Rendering happens on a dedicated thread; the handle is cheap to clone and
/// every method can be called from any thread or task.
#[derive(Clone)]
pub struct Dashboard {
    shared: Arc<Shared>,
}

impl Dashboard {
    /// Take over the terminal and start rendering.
    ///
    /// Resolves only once the first frame is on screen.
    pub async fn start(config: DashboardConfig) -> Result<Self, DashboardError> {
        Self::launch(config, init_terminal, restore_terminal).await
    }

    /// Start rendering on a terminal and input stream built on the render thread
    pub(crate) async fn launch<B, S, F, R>(
        config: DashboardConfig,
        init: F,
        restore: R,
    ) -> Result<Self, DashboardError>
    where
        B: Backend + 'static,
        B::Error: Send + Sync + 'static,
        S: Stream<Item = io::Result<Event>> + Unpin + 'static,
        F: FnOnce() -> io::Result<(Terminal<B>, S)> + Send + 'static,
        R: FnOnce(&mut Terminal<B>) -> io::Result<()> + Send + 'static,
    {
        let dashboard = Self::detached(config);
        let (ready_tx, ready_rx) = oneshot::channel();

        let shared = Arc::clone(&dashboard.shared);
        let handle = std::thread::Builder::new()
            .name("dashboard".into())
            .spawn(move || {
                let _running = RunningGuard(Arc::clone(&shared));
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(DashboardError::Init(err)));
                        return;
                    }
                };
                runtime.block_on(render_thread(shared, init, restore, ready_tx));
            })
            .map_err(DashboardError::Init)?;
        *dashboard
            .shared
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        match ready_rx.await {
            Ok(Ok(())) => Ok(dashboard),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(DashboardError::RenderThreadGone),
        }
    }

    /// A dashboard with no render thread behind it.
    ///
    /// Appends wrap at whatever viewport size was last set, which is none
    /// until `set_viewport` is called.
    pub(crate) fn detached(config: DashboardConfig) -> Self {
        let (running, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                tabs: RwLock::new(Vec::new()),
                scrollback: config.scrollback,
                viewport: Viewport::default(),
                tab_list_width: AtomicU16::new(0),
                repaint: Notify::new(),
                relayout: AtomicBool::new(true),
                stop: CancellationToken::new(),
                running,
                stop_timeout: config.stop_timeout,
                thread: Mutex::new(None),
            }),
        }
    }

    /// Register a new tab with an empty scrollback
    pub fn add_tab(&self, name: impl Into<String>) -> TabHandle {
        let tab = Arc::new(Tab::new(name.into(), self.shared.scrollback));
        let handle = {
            let mut tabs = self
                .shared
                .tabs
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            tabs.push(tab);
            TabHandle(tabs.len() - 1)
        };
        self.shared.relayout.store(true, Ordering::Release);
        self.shared.repaint.notify_one();
        handle
    }

    /// Append program output to a tab
    pub fn append_text(&self, handle: TabHandle, text: &str) {
        self.append(handle, OutputKind::Stdout, text);
    }

    /// Append text to a tab.
    ///
    /// Each line is wrapped at the content panel's width as it is right now;
    /// later resizes do not re-wrap what is already stored.
    pub fn append(&self, handle: TabHandle, kind: OutputKind, text: &str) {
        let Some(tab) = self.tab(handle) else {
            return;
        };
        let width = self.shared.viewport.width();
        let lines: Vec<OutputLine> = text
            .split('\n')
            .flat_map(|line| OutputLine::wrap(kind, line, width))
            .collect();
        if lines.is_empty() {
            return;
        }

        tab.lock().push_lines(lines, self.shared.viewport.height());
        self.shared.repaint.notify_one();
    }

    /// Look up a tab
    pub fn tab(&self, handle: TabHandle) -> Option<Arc<Tab>> {
        self.shared
            .tabs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(handle.0)
            .cloned()
    }

    /// Names of all tabs, in the order they were added
    pub fn tab_names(&self) -> Vec<String> {
        self.shared
            .tabs()
            .iter()
            .map(|tab| tab.name().to_string())
            .collect()
    }

    pub fn tab_count(&self) -> usize {
        self.shared
            .tabs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the render loop is still alive
    pub fn is_running(&self) -> bool {
        *self.shared.running.borrow()
    }

    /// Wait until the render loop has ended, e.g. because `q` was pressed
    pub async fn wait_closed(&self) {
        let mut running = self.shared.running.subscribe();
        let _ = running.wait_for(|running| !*running).await;
    }

    /// Ask the render loop to end and wait for it, at most for the
    /// configured stop timeout.
    ///
    /// Returns whether the loop ended in time. Calling it again is harmless.
    pub async fn stop(&self) -> bool {
        self.shared.stop.cancel();
        let finished = tokio::time::timeout(self.shared.stop_timeout, self.wait_closed())
            .await
            .is_ok();
        if finished {
            let handle = self
                .shared
                .thread
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
        }
        finished
    }

    /// Feed a viewport size to a detached dashboard
    #[cfg(test)]
    pub(crate) fn set_viewport(&self, width: u16, height: u16) {
        self.shared.viewport.store(Geometry {
            content_width: width,
            content_height: height,
            ..Geometry::default()
        });
    }

    /// Plain text of every line currently retained by a tab
    #[cfg(test)]
    pub(crate) fn lines(&self, handle: TabHandle) -> Vec<String> {
        self.tab(handle)
            .map(|tab| tab.lock().buffer().iter().map(OutputLine::plain).collect())
            .unwrap_or_default()
    }
}

/// Flips the dashboard to "not running" when the render thread ends,
/// whichever way it ends.
struct RunningGuard(Arc<Shared>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.send_replace(false);
    }
}

async fn render_thread<B, S, F, R>(
    shared: Arc<Shared>,
    init: F,
    restore: R,
    ready: oneshot::Sender<Result<(), DashboardError>>,
) where
    B: Backend,
    B::Error: Send + Sync + 'static,
    S: Stream<Item = io::Result<Event>> + Unpin,
    F: FnOnce() -> io::Result<(Terminal<B>, S)>,
    R: FnOnce(&mut Terminal<B>) -> io::Result<()>,
{
    let (terminal, events) = match init() {
        Ok(parts) => parts,
        Err(err) => {
            let _ = ready.send(Err(DashboardError::Init(err)));
            return;
        }
    };

    let mut render_loop = RenderLoop {
        shared,
        state: DashboardState::new(),
        terminal,
        events,
    };

    if let Err(err) = render_loop.draw() {
        let _ = restore(&mut render_loop.terminal);
        let _ = ready.send(Err(DashboardError::Init(err)));
        return;
    }
    let _ = ready.send(Ok(()));

    let result = render_loop.run().await;
    if let Err(err) = restore(&mut render_loop.terminal) {
        eprintln!("failed to restore terminal: {err}");
    }
    if let Err(err) = result {
        eprintln!("dashboard stopped: {err}");
    }
}

struct RenderLoop<B: Backend, S> {
    shared: Arc<Shared>,
    state: DashboardState,
    terminal: Terminal<B>,
    events: S,
}

impl<B, S> RenderLoop<B, S>
where
    B: Backend,
    B::Error: Send + Sync + 'static,
    S: Stream<Item = io::Result<Event>> + Unpin,
{
    /// Wait for the next input, repaint request or stop, then draw once
    async fn run(&mut self) -> io::Result<()> {
        loop {
            let mut dirty = false;
            tokio::select! {
                biased;
                _ = self.shared.stop.cancelled() => return Ok(()),
                event = self.events.next() => match event {
                    Some(event) => match self.apply(event?) {
                        Action::Quit => return Ok(()),
                        Action::Repaint => dirty = true,
                        Action::Ignore => {}
                    },
                    None => return Ok(()),
                },
                _ = self.shared.repaint.notified() => dirty = true,
            }

            // Input that piled up during the last frame is applied in one go.
            // Polled with this task's waker: EventStream only keeps the waker
            // of the poll that arms it.
            loop {
                let event = match futures::poll!(self.events.next()) {
                    Poll::Ready(Some(event)) => event?,
                    _ => break,
                };
                match self.apply(event) {
                    Action::Quit => return Ok(()),
                    Action::Repaint => dirty = true,
                    Action::Ignore => {}
                }
            }

            // Terminal::clear would query the cursor position, which blocks on
            // the reader EventStream holds; autoresize clears on size changes
            if self.shared.relayout.swap(false, Ordering::AcqRel) {
                self.terminal.autoresize().map_err(io::Error::other)?;
                dirty = true;
            }
            if dirty {
                self.draw()?;
            }
        }
    }

    fn apply(&mut self, event: Event) -> Action {
        match event {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                let tabs = self.shared.tabs();
                let geometry = self
                    .shared
                    .viewport
                    .geometry(self.shared.tab_list_width.load(Ordering::Relaxed));
                handle_key(&mut self.state, &tabs, geometry, key)
            }
            Event::Resize(_, _) => {
                self.shared.relayout.store(true, Ordering::Release);
                Action::Repaint
            }
            _ => Action::Ignore,
        }
    }

    fn draw(&mut self) -> io::Result<()> {
        let tabs = self.shared.tabs();
        let shared = &self.shared;
        let state = &self.state;
        self.terminal.draw(|frame| {
            let geometry = Geometry::from_area(frame.area());
            shared.viewport.store(geometry);
            shared
                .tab_list_width
                .store(geometry.tab_list_width, Ordering::Relaxed);
            Renderer::render(frame, state, &tabs);
        })
        .map_err(io::Error::other)?;
        Ok(())
    }
}

/// Initialize the terminal for TUI
fn init_terminal() -> io::Result<(Terminal<CrosstermBackend<io::Stdout>>, EventStream)> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    let terminal = execute!(stdout, EnterAlternateScreen)
        .and_then(|()| Terminal::new(CrosstermBackend::new(stdout)))
        .inspect_err(|_| {
            let _ = disable_raw_mode();
        })?;
    Ok((terminal, EventStream::new()))
}

/// Restore the terminal to its original state
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()
}
