//! Windowed rendering of large channel catalogs.
//!
//! The engine decides which records are mounted as visual elements and
//! recycles those elements as the view scrolls.  Drawing is left to an
//! [`ElementFactory`] supplied by the UI.

mod capabilities;
mod engine;
mod index;
mod mode;
mod recycler;
mod search_worker;
mod window;

pub use capabilities::{ChannelCallbacks, ElementFactory, ItemView, NoopCallbacks};
pub use engine::{EngineDiagnostics, RenderEngine, Viewport};
pub use index::SearchIndex;
pub use mode::{ModePolicy, RenderMode};
pub use recycler::{Acquisition, RecycleStats, ViewRecycler};
pub use search_worker::SearchWorker;
pub use window::{ViewWindow, WindowRange};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("render engine used before a viewport was attached")]
    NotAttached,
    #[error("search worker is no longer running")]
    WorkerGone,
}
