mod cache;
mod compile;
mod process;

pub use cache::CompileCache;
pub use compile::{
    CompileCommand, CompileOutcome, CompileStatus, Compiler, find_in_path,
    generate_compile_commands, write_compile_commands,
};
pub use process::{CANCELLED_MESSAGE, RunOutcome, RunRequest, RunStatus, TIME_LIMIT_MESSAGE, run};
