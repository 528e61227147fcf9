mod dashboard;
mod input;
mod log_writer;
mod renderer;
mod state;
mod tab;

pub use dashboard::{Dashboard, TabHandle};
pub use input::{Action, handle_key};
pub use log_writer::TabWriter;
pub use renderer::{Geometry, Renderer};
pub use state::{DashboardState, Focus};
pub use tab::{Tab, TabContent};

#[cfg(test)]
pub(crate) use dashboard::testing;
