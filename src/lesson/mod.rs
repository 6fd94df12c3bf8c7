//! Lesson state: curriculum, stages, the context reducer and its timers.

pub mod context;
pub mod curriculum;
pub mod inactivity;
pub mod stage;
pub mod success;

pub use context::{ContextEvent, LastRun, LessonContext, reduce};
pub use curriculum::{Curriculum, CurriculumSlice, NavHints, Position, TestCase};
pub use inactivity::{InactivityMonitor, InactivityPrompt};
pub use stage::Stage;
pub use success::check_success_criteria;
