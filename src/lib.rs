pub mod app;
pub mod renderer;
pub mod util;

pub use app::{App, AppControl, AppHandler};
pub use renderer::{Frame, Renderer};
