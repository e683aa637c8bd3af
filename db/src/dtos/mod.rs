mod exec_status;
mod pipeline_exec;
mod pipeline_exec_event;
mod stage_result;
mod stage_status;

pub use exec_status::*;
pub use pipeline_exec::*;
pub use pipeline_exec_event::*;
pub use stage_result::*;
pub use stage_status::*;
