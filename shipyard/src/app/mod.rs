//! Process lifecycle: state construction, the server loop and shutdown

pub mod options;
pub mod run;
pub mod state;
